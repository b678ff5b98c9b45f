//! Per-site knowledge of result-page structure.
//!
//! Everything that depends on a third party's markup (class names, link
//! shapes, pagination cues) lives behind `SiteAdapter`, so a layout change
//! means touching one adapter.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::text::element_text;

pub trait SiteAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Total result pages announced by the first page, if the marker exists.
    fn total_pages(&self, html: &str) -> Option<usize>;

    /// Absolute links to the individual items listed on a result page.
    fn item_links(&self, html: &str) -> Vec<String>;

    /// Plain text of the main content block of an item page.
    fn content_block(&self, html: &str) -> Option<String>;

    fn page_url(&self, base_url: &str, page: usize) -> String {
        format!("{}&page={}", base_url, page)
    }
}

#[derive(Debug, Clone)]
pub struct PubMedAdapter {
    pub origin: String,
    pub total_pages_selector: String,
    pub item_link_selector: String,
    pub content_selector: String,
}

impl Default for PubMedAdapter {
    fn default() -> Self {
        Self {
            origin: "https://pubmed.ncbi.nlm.nih.gov".to_string(),
            total_pages_selector: ".of-total-pages".to_string(),
            item_link_selector: "a.docsum-title".to_string(),
            content_selector: "div.abstract-content".to_string(),
        }
    }
}

impl PubMedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let base = Url::parse(&self.origin).ok()?;
        base.join(href).ok().map(|u| u.to_string())
    }
}

impl SiteAdapter for PubMedAdapter {
    fn name(&self) -> &str {
        "pubmed"
    }

    fn total_pages(&self, html: &str) -> Option<usize> {
        let selector = Selector::parse(&self.total_pages_selector).ok()?;
        let document = Html::parse_document(html);
        let marker = element_text(document.select(&selector).next()?);

        // Marker reads like "of 1,234".
        let re = Regex::new(r"\d[\d,]*").ok()?;
        let digits = re.find(&marker)?.as_str().replace(',', "");
        digits.parse().ok()
    }

    fn item_links(&self, html: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse(&self.item_link_selector) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);

        document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| self.resolve(href))
            .collect()
    }

    fn content_block(&self, html: &str) -> Option<String> {
        let selector = Selector::parse(&self.content_selector).ok()?;
        let document = Html::parse_document(html);
        document.select(&selector).next().map(element_text)
    }
}
