use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::MalformedResponse;
use crate::schema::{ExtractionRecord, ResponseSchema};

/// Drop a surrounding ```json fence if the model added one.
fn strip_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a response that must be a JSON object.
pub fn parse_object(response: &str) -> Result<Value, MalformedResponse> {
    let value: Value = serde_json::from_str(strip_fence(response))
        .map_err(|e| MalformedResponse::new(format!("not valid JSON: {}", e), response))?;

    if !value.is_object() {
        return Err(MalformedResponse::new("expected a JSON object", response));
    }
    Ok(value)
}

/// Validate `response` against `schema` and turn it into a record.
pub fn parse_record(
    response: &str,
    schema: &ResponseSchema,
    source: Option<&str>,
) -> Result<ExtractionRecord, MalformedResponse> {
    let value = parse_object(response)?;

    let items = value
        .get(&schema.field)
        .ok_or_else(|| MalformedResponse::new(format!("missing field \"{}\"", schema.field), response))?
        .as_array()
        .ok_or_else(|| MalformedResponse::new(format!("field \"{}\" is not an array", schema.field), response))?;

    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        let entry = item
            .as_str()
            .ok_or_else(|| MalformedResponse::new(format!("non-string entry {}", item), response))?
            .trim();
        if entry.is_empty() || schema.is_sentinel(entry) {
            continue;
        }
        entities.push(entry.to_string());
    }

    Ok(ExtractionRecord {
        entities,
        source: source.map(str::to_string),
    })
}

/// Running set of unique entities across one session. Entries are stored
/// upper-cased and iterate in sorted order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateEntitySet {
    entities: BTreeSet<String>,
}

impl AggregateEntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the record's entities; returns how many were new.
    pub fn extend(&mut self, record: &ExtractionRecord) -> usize {
        let before = self.entities.len();
        self.entities.extend(
            record
                .entities
                .iter()
                .map(|e| e.trim().to_uppercase())
                .filter(|e| !e.is_empty()),
        );
        self.entities.len() - before
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains(&entity.trim().to_uppercase())
    }

    pub fn reset(&mut self) {
        self.entities.clear();
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entities().map(str::to_string).collect()
    }

    pub fn to_prompt_list(&self) -> String {
        self.to_vec().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ResponseSchema {
        ResponseSchema::default()
    }

    #[test]
    fn test_none_sentinel_is_empty() {
        let record = parse_record(r#"{"genes": ["None"]}"#, &schema(), None).unwrap();
        assert!(record.is_empty());

        let record = parse_record(r#"{"genes": ["none", "IL13"]}"#, &schema(), None).unwrap();
        assert_eq!(record.entities, vec!["IL13"]);
    }

    #[test]
    fn test_case_normalized_dedup() {
        let record = parse_record(
            r#"{"genes": ["BRCA1", "brca1", "TP53"]}"#,
            &schema(),
            Some("https://pubmed.ncbi.nlm.nih.gov/1/"),
        )
        .unwrap();
        assert_eq!(record.source.as_deref(), Some("https://pubmed.ncbi.nlm.nih.gov/1/"));

        let mut set = AggregateEntitySet::new();
        assert_eq!(set.extend(&record), 2);
        assert_eq!(set.to_vec(), vec!["BRCA1", "TP53"]);
        assert!(set.contains("brca1"));
        assert_eq!(set.to_prompt_list(), "BRCA1, TP53");
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parse_record("Sure! The genes are BRCA1 and TP53.", &schema(), None).unwrap_err();
        assert!(err.reason.starts_with("not valid JSON"));
        assert_eq!(err.response, "Sure! The genes are BRCA1 and TP53.");
    }

    #[test]
    fn test_shape_violations_are_malformed() {
        for response in [
            r#"["BRCA1"]"#,
            r#"{"proteins": ["BRCA1"]}"#,
            r#"{"genes": "BRCA1"}"#,
            r#"{"genes": ["BRCA1", 7]}"#,
        ] {
            assert!(parse_record(response, &schema(), None).is_err(), "{response}");
        }
    }

    #[test]
    fn test_fenced_response() {
        let record = parse_record("```json\n{\"genes\": [\" IL4 \"]}\n```", &schema(), None).unwrap();
        assert_eq!(record.entities, vec!["IL4"]);
    }

    #[test]
    fn test_aggregate_is_monotonic_until_reset() {
        let mut set = AggregateEntitySet::new();
        set.extend(&ExtractionRecord {
            entities: vec!["il13".into()],
            source: None,
        });
        assert_eq!(set.extend(&ExtractionRecord::default()), 0);
        assert_eq!(set.len(), 1);

        set.reset();
        assert!(set.is_empty());
    }

    #[test]
    fn test_parse_object() {
        let value = parse_object(r#"{"coworkers": []}"#).unwrap();
        assert!(value["coworkers"].is_array());
        assert!(parse_object("null").is_err());
    }
}
