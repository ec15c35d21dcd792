//! Pipeline module - labeling jobs, output assembly and recovery.

mod job;
mod labeling;
mod output;

pub use job::*;
pub use labeling::*;
pub use output::*;
