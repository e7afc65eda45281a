//! Tool input models.
//!
//! Inputs use `#[serde(rename_all = "camelCase")]` to match the JSON schemas
//! advertised in `tools/list`.

mod enums;
mod inputs;

pub use enums::ResponseFormat;
pub use inputs::*;
