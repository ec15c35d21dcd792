//! Prompt registry, templates and request building.

mod builder;
mod options;
mod registry;
mod template;

pub use builder::*;
pub use options::*;
pub use registry::*;
pub use template::*;
