//! LLM provider clients and the retry layer.

mod llm_client;
mod provider;
mod retry;

pub use llm_client::*;
pub use provider::*;
pub use retry::*;
