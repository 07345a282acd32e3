pub mod application;

use serde::{Deserialize, Serialize};

pub use application::*;

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct MarkdownContent(pub String);
