pub mod auth;
pub mod customer;
pub mod notification;
pub mod response;
pub mod ward;

use serde::{Deserialize, Serialize};

/// Bilingual text: English default, optional French alternate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub default: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

impl LocalizedText {
    pub fn new(default: impl Into<String>, alt: Option<String>) -> Self {
        Self {
            default: default.into(),
            alt,
        }
    }
}
