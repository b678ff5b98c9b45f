use serde::{Deserialize, Serialize};

/// Shape expected from structured extraction responses:
/// `{"<field>": ["ITEM", ...]}`, with `[<none_sentinel>]` meaning nothing found.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSchema {
    pub field: String,
    pub none_sentinel: String,
}

impl Default for ResponseSchema {
    fn default() -> Self {
        Self {
            field: "genes".to_string(),
            none_sentinel: "None".to_string(),
        }
    }
}

impl ResponseSchema {
    pub fn new(field: impl Into<String>, none_sentinel: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            none_sentinel: none_sentinel.into(),
        }
    }

    pub fn is_sentinel(&self, entry: &str) -> bool {
        entry.eq_ignore_ascii_case(&self.none_sentinel)
    }
}

/// Entities pulled from one response, trimmed, sentinel removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub entities: Vec<String>,
    pub source: Option<String>,
}

impl ExtractionRecord {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
