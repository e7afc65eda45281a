//! Output formatters for tool responses.

mod json;
mod markdown;

pub use json::*;
pub use markdown::*;
