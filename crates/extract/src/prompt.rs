use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TemplateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Substitute `{name}` placeholders. `{{` and `}}` produce literal braces.
/// Every placeholder must have a value; unused values are ignored.
pub fn render(template: &str, values: &HashMap<&str, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' => {
                if chars.next_if(|&(_, next)| next == '{').is_some() {
                    out.push('{');
                    continue;
                }

                let start = i + 1;
                let mut end = None;
                for (j, inner) in chars.by_ref() {
                    match inner {
                        '}' => {
                            end = Some(j);
                            break;
                        }
                        '{' => return Err(TemplateError::Unbalanced { position: j }),
                        _ => {}
                    }
                }
                let end = end.ok_or(TemplateError::Unbalanced { position: i })?;

                let name = &template[start..end];
                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::Unbound(name.to_string()))?;
                out.push_str(value);
            }
            '}' => {
                if chars.next_if(|&(_, next)| next == '}').is_some() {
                    out.push('}');
                    continue;
                }
                return Err(TemplateError::Unbalanced { position: i });
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Templates and system messages for every call the pipelines make.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub gene_system_message: String,
    pub gene_extraction: String,
    pub gene_refinement: String,
    pub analysis_system_message: String,
    pub gene_analysis: String,
    pub gene_json_schema: String,
    pub example_genes: Vec<String>,
    pub none_sentinel: String,

    pub single_position_system_message: String,
    pub multiple_position_system_message: String,
    pub coworker_search: String,
    pub coworker_json_format: String,
    pub coworker_json_schema: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            gene_system_message: GENE_SYSTEM_MESSAGE.to_string(),
            gene_extraction: GENE_EXTRACTION.to_string(),
            gene_refinement: GENE_REFINEMENT.to_string(),
            analysis_system_message: ANALYSIS_SYSTEM_MESSAGE.to_string(),
            gene_analysis: GENE_ANALYSIS.to_string(),
            gene_json_schema: r#"{"genes": ["GENE1", "GENE2"]}"#.to_string(),
            example_genes: vec!["BRCA1".into(), "TP53".into(), "IL13".into()],
            none_sentinel: "None".to_string(),
            single_position_system_message: SINGLE_POSITION_SYSTEM_MESSAGE.to_string(),
            multiple_position_system_message: MULTIPLE_POSITION_SYSTEM_MESSAGE.to_string(),
            coworker_search: COWORKER_SEARCH.to_string(),
            coworker_json_format: "Return a JSON object with a single key \"coworkers\".".to_string(),
            coworker_json_schema: r#"{"coworkers": [{"name": "Full Name", "job_title": "Title", "workplace": "Company", "evidence": "source URL"}]}"#.to_string(),
        }
    }
}

const GENE_SYSTEM_MESSAGE: &str = "You are a biomedical curator. You read scientific abstracts and extract official gene symbols. You answer only with JSON.";

const GENE_EXTRACTION: &str = r#"The abstract below was returned by a PubMed search for "{topic}".

INSTRUCTIONS:
1. Identify every gene or gene product the abstract links to {topic}
2. Use official HGNC gene symbols, for example: {example_genes}
3. If the abstract names no genes, answer {{"genes": ["{none_sentinel}"]}}
4. Output ONLY a JSON object matching the schema below

SCHEMA:
{json_schema}

ABSTRACT:
{abstract_text}

JSON OUTPUT:"#;

const GENE_REFINEMENT: &str = r#"Genes extracted from {document_count} PubMed abstracts about "{topic}":
{genes}

INSTRUCTIONS:
1. Keep only the genes with a well-supported association with {topic}
2. Drop anything that is not a gene symbol
3. If none remain, answer {{"genes": ["{none_sentinel}"]}}
4. Output ONLY a JSON object matching the schema below

SCHEMA:
{json_schema}

JSON OUTPUT:"#;

const ANALYSIS_SYSTEM_MESSAGE: &str = "You are a biomedical research assistant writing concise, factual summaries for clinicians.";

const GENE_ANALYSIS: &str = r#"The following genes were found in recent literature about "{topic}":
{genes}

TASK: For each gene, write two or three sentences on its known role in {topic}. Then compare the genes: which pathways they share and which are the most promising research targets.

Do NOT use markdown tables.

ANALYSIS:"#;

const SINGLE_POSITION_SYSTEM_MESSAGE: &str = "You infer professional networks from web search results. Given one position held by a person, list the people who most likely worked with them there. Answer only with JSON.";

const MULTIPLE_POSITION_SYSTEM_MESSAGE: &str = "You infer professional networks from web search results. Given several positions held by a person, list the people who most likely worked with them at each workplace and period. Answer only with JSON.";

const COWORKER_SEARCH: &str = r#"Search results gathered for {first_name} {last_name}:

{google_results}

Positions held by the person: {job_info}

TASK: Using only the search results above, list the people who most likely worked with {first_name} {last_name}. {json_format}

SCHEMA:
{json_schema}

JSON OUTPUT:"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes() {
        let rendered = render("Topic: {topic}", &values(&[("topic", "asthma")])).unwrap();
        assert_eq!(rendered, "Topic: asthma");
    }

    #[test]
    fn test_render_missing_placeholder() {
        let err = render("Topic: {missing}", &values(&[("topic", "asthma")])).unwrap_err();
        assert_eq!(err, TemplateError::Unbound("missing".to_string()));
    }

    #[test]
    fn test_render_escaped_braces() {
        let rendered = render(r#"{{"genes": ["{x}"]}}"#, &values(&[("x", "None")])).unwrap();
        assert_eq!(rendered, r#"{"genes": ["None"]}"#);
    }

    #[test]
    fn test_values_are_not_reinterpreted() {
        let rendered = render("{schema}", &values(&[("schema", "{topic}")])).unwrap();
        assert_eq!(rendered, "{topic}");
    }

    #[test]
    fn test_render_unbalanced() {
        assert_eq!(
            render("oops {topic", &values(&[("topic", "x")])),
            Err(TemplateError::Unbalanced { position: 5 })
        );
        assert_eq!(
            render("oops } here", &HashMap::new()),
            Err(TemplateError::Unbalanced { position: 5 })
        );
    }

    #[test]
    fn test_default_templates_render() {
        let prompts = PromptSet::default();
        let gene_values = values(&[
            ("topic", "asthma"),
            ("example_genes", "BRCA1, TP53"),
            ("none_sentinel", "None"),
            ("json_schema", prompts.gene_json_schema.as_str()),
            ("abstract_text", "IL13 variants increase risk."),
            ("document_count", "3"),
            ("genes", "IL13, ORMDL3"),
        ]);
        let extraction = render(&prompts.gene_extraction, &gene_values).unwrap();
        assert!(extraction.contains(r#"{"genes": ["None"]}"#));
        assert!(extraction.contains("IL13 variants increase risk."));
        render(&prompts.gene_refinement, &gene_values).unwrap();
        render(&prompts.gene_analysis, &gene_values).unwrap();

        let coworker_values = values(&[
            ("first_name", "Jane"),
            ("last_name", "Doe"),
            ("google_results", "RESULTS FROM https://x:\nJane Doe, Acme"),
            ("job_info", "Engineer at Acme"),
            ("json_format", prompts.coworker_json_format.as_str()),
            ("json_schema", prompts.coworker_json_schema.as_str()),
        ]);
        let coworker = render(&prompts.coworker_search, &coworker_values).unwrap();
        assert!(coworker.contains("worked with Jane Doe"));
    }
}
