use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubjectProfile {
    pub first_name: String,
    pub last_name: String,
}

impl SubjectProfile {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One job held by the subject. Every field may be empty except the
/// workplace of the first position.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    #[serde(default)]
    pub workplace: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub start_year: String,
    #[serde(default)]
    pub end_year: String,
}

impl PositionRecord {
    pub fn new(workplace: impl Into<String>, job_title: impl Into<String>) -> Self {
        Self {
            workplace: workplace.into(),
            job_title: job_title.into(),
            ..Default::default()
        }
    }

    pub fn years(mut self, start_year: impl Into<String>, end_year: impl Into<String>) -> Self {
        self.start_year = start_year.into();
        self.end_year = end_year.into();
        self
    }
}
