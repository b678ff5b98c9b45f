use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::document::ExtractedDocument;
use crate::error::{FetchError, IngestError};
use crate::fetch::{FetchResult, Fetcher};
use crate::site::SiteAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStatus {
    Found,
    /// First page carried no pagination marker: zero results for the query.
    NotFound,
    /// First page answered with a non-200 status or could not be fetched.
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub page: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.page as f32 / self.total as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLinks {
    pub page: usize,
    /// False when the page fetch failed; `links` is then empty.
    pub fetched: bool,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub status: WalkStatus,
    pub documents: Vec<ExtractedDocument>,
    pub pages_discovered: usize,
    pub pages_planned: usize,
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub links_found: usize,
    pub links_skipped: usize,
}

pub struct PaginationWalker<'a> {
    fetcher: &'a dyn Fetcher,
    adapter: &'a dyn SiteAdapter,
    max_pages: usize,
}

impl<'a> PaginationWalker<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, adapter: &'a dyn SiteAdapter, max_pages: usize) -> Self {
        Self {
            fetcher,
            adapter,
            max_pages,
        }
    }

    /// Fetch the first page and size the walk from its pagination marker.
    /// A first page that cannot be fetched gives an `Unreachable` walk.
    pub async fn begin(&self, base_url: &str) -> PageWalk<'a> {
        let first = match self.fetcher.fetch(base_url).await {
            Ok(result) => result.into_body(),
            Err(e) => {
                warn!(url = %base_url, error = %e, "First results page fetch failed");
                None
            }
        };

        let (status, discovered) = match first {
            None => {
                warn!(url = %base_url, site = self.adapter.name(), "First results page unavailable");
                (WalkStatus::Unreachable, 0)
            }
            Some(html) => match self.adapter.total_pages(&html) {
                Some(total) => (WalkStatus::Found, total),
                None => {
                    info!(url = %base_url, site = self.adapter.name(), "No pagination marker, zero results");
                    (WalkStatus::NotFound, 0)
                }
            },
        };

        let planned = discovered.min(self.max_pages);
        info!(
            url = %base_url,
            discovered = discovered,
            planned = planned,
            max_pages = self.max_pages,
            "Starting page walk"
        );

        PageWalk {
            fetcher: self.fetcher,
            adapter: self.adapter,
            base_url: base_url.to_string(),
            status,
            discovered,
            planned,
            next: 1,
        }
    }

    /// Walk every planned page, fetch each listed item and keep those with a
    /// content block. Page and item failures are skipped and counted.
    pub async fn collect_documents(
        &self,
        base_url: &str,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<WalkReport, IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let mut walk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            walk = self.begin(base_url) => walk,
        };

        let mut report = WalkReport {
            status: walk.status(),
            documents: Vec::new(),
            pages_discovered: walk.discovered(),
            pages_planned: walk.planned(),
            pages_processed: 0,
            pages_skipped: 0,
            links_found: 0,
            links_skipped: 0,
        };

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                page = walk.next_page() => page,
            };
            let Some(page) = page else { break };

            if page.fetched {
                report.pages_processed += 1;
            } else {
                report.pages_skipped += 1;
            }
            report.links_found += page.links.len();

            for link in &page.links {
                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                    fetched = self.fetcher.fetch(link) => fetched,
                };

                match self.document_from(link, fetched) {
                    Some(document) => report.documents.push(document),
                    None => report.links_skipped += 1,
                }
            }

            on_progress(Progress {
                page: page.page,
                total: report.pages_planned,
            });
        }

        info!(
            url = %base_url,
            documents = report.documents.len(),
            pages_processed = report.pages_processed,
            pages_skipped = report.pages_skipped,
            links_skipped = report.links_skipped,
            "Page walk completed"
        );

        Ok(report)
    }

    fn document_from(
        &self,
        link: &str,
        fetched: Result<FetchResult, FetchError>,
    ) -> Option<ExtractedDocument> {
        let html = match fetched {
            Ok(result) => result.into_body()?,
            Err(e) => {
                warn!(url = %link, error = %e, "Item fetch failed, skipping");
                return None;
            }
        };

        match self.adapter.content_block(&html) {
            Some(text) => ExtractedDocument::new(link, text),
            None => {
                debug!(url = %link, "No content block, skipping");
                None
            }
        }
    }
}

/// A started walk. Yields each planned page once, in order, then stays
/// exhausted.
pub struct PageWalk<'a> {
    fetcher: &'a dyn Fetcher,
    adapter: &'a dyn SiteAdapter,
    base_url: String,
    status: WalkStatus,
    discovered: usize,
    planned: usize,
    next: usize,
}

impl PageWalk<'_> {
    pub fn status(&self) -> WalkStatus {
        self.status
    }

    pub fn discovered(&self) -> usize {
        self.discovered
    }

    pub fn planned(&self) -> usize {
        self.planned
    }

    pub async fn next_page(&mut self) -> Option<PageLinks> {
        if self.next > self.planned {
            return None;
        }
        let page = self.next;
        self.next += 1;

        let url = self.adapter.page_url(&self.base_url, page);
        let html = match self.fetcher.fetch(&url).await {
            Ok(result) => result.into_body(),
            Err(e) => {
                warn!(url = %url, error = %e, "Page fetch failed");
                None
            }
        };

        let Some(html) = html else {
            warn!(url = %url, page = page, "Skipping page");
            return Some(PageLinks {
                page,
                fetched: false,
                links: Vec::new(),
            });
        };

        let links = self.adapter.item_links(&html);
        debug!(url = %url, page = page, links = links.len(), "Page links extracted");
        Some(PageLinks {
            page,
            fetched: true,
            links,
        })
    }
}
