use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedDocument {
    pub source: String,
    pub text: String,
}

impl ExtractedDocument {
    /// Returns `None` when the extracted text is blank.
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }

        Some(Self {
            source: source.into(),
            text,
        })
    }
}
