pub mod document;
pub mod error;
pub mod fetch;
pub mod paginate;
pub mod site;
pub mod testing;
pub mod text;

pub use document::ExtractedDocument;
pub use error::{FetchError, IngestError};
pub use fetch::{Fetcher, FetchResult, HeaderProfile, HttpFetcher};
pub use paginate::{PageLinks, PageWalk, PaginationWalker, Progress, WalkReport, WalkStatus};
pub use site::{PubMedAdapter, SiteAdapter};
pub use text::{extract_text, extract_text_from};

use tracing::warn;

/// Fetch each URL in turn and extract the text of every 200 response.
/// Non-200 responses and transport failures are skipped.
pub async fn fetch_documents(fetcher: &dyn Fetcher, urls: &[String]) -> Vec<ExtractedDocument> {
    let mut documents = Vec::new();

    for url in urls {
        match fetcher.fetch(url).await {
            Ok(result) => {
                if let Some(html) = result.into_body() {
                    documents.extend(ExtractedDocument::new(url.as_str(), extract_text(&html)));
                }
            }
            Err(e) => warn!(url = %url, error = %e, "Fetch failed, skipping"),
        }
    }

    documents
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::StaticFetcher;

    #[tokio::test]
    async fn test_fetch_documents_skips_failures() {
        let fetcher = StaticFetcher::new()
            .with_page("https://a.test/1", "<p>Jane Doe works at Acme</p>")
            .with_status("https://a.test/2", 429)
            .with_transport_error("https://a.test/3")
            .with_page("https://a.test/4", "<p> </p>");
        let urls: Vec<String> = (1..=4).map(|i| format!("https://a.test/{i}")).collect();

        let documents = fetch_documents(&fetcher, &urls).await;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].source, "https://a.test/1");
        assert_eq!(documents[0].text, "Jane Doe works at Acme");
        assert_eq!(fetcher.requests().len(), 4);
    }
}
