//! Pool module - per-row workers.

mod worker;

pub use worker::*;
