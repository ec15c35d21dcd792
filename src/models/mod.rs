//! Core data models for aeon.

mod config;
mod error;
mod row;

pub use config::*;
pub use error::*;
pub use row::*;
