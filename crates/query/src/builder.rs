use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{PositionRecord, SubjectProfile};

pub const MAX_POSITIONS: usize = 3;

const GOOGLE_SEARCH: &str = "https://www.google.com/search?q=";
const THEORG: &str = "https://theorg.com/org";
const SIGNALHIRE: &str = "https://www.signalhire.com/companies";
const PUBMED: &str = "https://pubmed.ncbi.nlm.nih.gov/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSite {
    Google,
    TheOrg,
    SignalHire,
    PubMed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub site: SearchSite,
    pub url: String,
}

impl SearchQuery {
    fn new(site: SearchSite, url: String) -> Self {
        Self { site, url }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("at least one position is required")]
    NoPositions,

    #[error("at most 3 positions are supported, got {0}")]
    TooManyPositions(usize),

    #[error("the first position needs a workplace")]
    MissingWorkplace,
}

/// Four lookups per position, in order: name + workplace search, LinkedIn
/// search, org-chart profile, employee directory. Empty optional fields are
/// kept as empty URL segments.
pub fn build_coworker_queries(
    profile: &SubjectProfile,
    positions: &[PositionRecord],
) -> Result<Vec<SearchQuery>, QueryError> {
    let first = positions.first().ok_or(QueryError::NoPositions)?;
    if positions.len() > MAX_POSITIONS {
        return Err(QueryError::TooManyPositions(positions.len()));
    }
    if first.workplace.trim().is_empty() {
        return Err(QueryError::MissingWorkplace);
    }

    let first_name = &profile.first_name;
    let last_name = &profile.last_name;
    let mut queries = Vec::with_capacity(positions.len() * 4);

    for position in positions {
        let workplace = &position.workplace;

        let name_workplace = format!(r#""{first_name} {last_name}"+{workplace}"#);
        queries.push(SearchQuery::new(
            SearchSite::Google,
            format!("{GOOGLE_SEARCH}{name_workplace}"),
        ));

        let linkedin = format!(
            r#""{first_name} {last_name}"+"{workplace}"+{}+Linkedin"#,
            position.job_title
        );
        queries.push(SearchQuery::new(
            SearchSite::Google,
            format!("{GOOGLE_SEARCH}{}", linkedin.replace(' ', "+")),
        ));

        let slug = workplace_slug(workplace);
        queries.push(SearchQuery::new(
            SearchSite::TheOrg,
            format!(
                "{THEORG}/{slug}/org-chart/{}-{}",
                first_name.to_lowercase(),
                last_name.to_lowercase()
            ),
        ));
        queries.push(SearchQuery::new(
            SearchSite::SignalHire,
            format!("{SIGNALHIRE}/{slug}/employees"),
        ));
    }

    Ok(queries)
}

fn workplace_slug(workplace: &str) -> String {
    workplace.replace(' ', "-").to_lowercase()
}

/// Lower-case, `'` to `%27`, space to `+`. The other characters that would
/// break the query string (`%`, `+`, `#`, `&`) are percent-encoded, `%` first.
pub fn encode_topic(topic: &str) -> String {
    topic
        .trim()
        .to_lowercase()
        .replace('%', "%25")
        .replace('+', "%2B")
        .replace('#', "%23")
        .replace('&', "%26")
        .replace('\'', "%27")
        .replace(' ', "+")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicQueryOptions {
    /// Append a "gene" keyword to the search term.
    pub gene_filter: bool,
    pub start_year: u16,
    pub end_year: u16,
}

impl Default for TopicQueryOptions {
    fn default() -> Self {
        Self {
            gene_filter: true,
            start_year: 2019,
            end_year: 2024,
        }
    }
}

pub fn build_topic_query(topic: &str, options: &TopicQueryOptions) -> SearchQuery {
    let mut term = encode_topic(topic);
    if options.gene_filter {
        term.push_str("+gene");
    }

    SearchQuery::new(
        SearchSite::PubMed,
        format!(
            "{PUBMED}?term={term}&filter=years.{}-{}",
            options.start_year, options.end_year
        ),
    )
}
