//! Canned fetcher for tests.
//!
//! ```rust
//! use ingest::testing::StaticFetcher;
//!
//! let fetcher = StaticFetcher::new()
//!     .with_page("https://example.com/a", "<p>Hello</p>")
//!     .with_status("https://example.com/b", 503);
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::FetchError;
use crate::fetch::{FetchResult, Fetcher};

#[derive(Debug, Clone)]
enum Canned {
    Page(String),
    Status(u16),
    TransportError,
}

/// Serves canned responses by exact URL. Unknown URLs answer 404.
#[derive(Default, Clone)]
pub struct StaticFetcher {
    responses: Arc<Mutex<HashMap<String, Canned>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, url: impl Into<String>, canned: Canned) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(url.into(), canned);
    }

    pub fn add_page(&self, url: impl Into<String>, html: impl Into<String>) {
        self.insert(url, Canned::Page(html.into()));
    }

    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.add_page(url, html);
        self
    }

    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.insert(url, Canned::Status(status));
        self
    }

    pub fn with_transport_error(self, url: impl Into<String>) -> Self {
        self.insert(url, Canned::TransportError);
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| predicate(url))
            .count()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());

        let canned = self.responses.lock().unwrap().get(url).cloned();
        match canned {
            Some(Canned::Page(html)) => Ok(FetchResult::ok(url, html)),
            Some(Canned::Status(status)) => Ok(FetchResult::status(url, status)),
            Some(Canned::TransportError) => Err(FetchError::Transport {
                url: url.to_string(),
                source: "connection reset".into(),
            }),
            None => Ok(FetchResult::status(url, 404)),
        }
    }
}
