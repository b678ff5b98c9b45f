use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;

/// Browser-like identity; several target sites refuse obvious bot agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub url: String,
    pub status: u16,
    /// Present only for a 200 response.
    pub body: Option<String>,
}

impl FetchResult {
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            body: Some(body.into()),
        }
    }

    pub fn status(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            body: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200 && self.body.is_some()
    }

    pub fn into_body(self) -> Option<String> {
        if self.status == 200 { self.body } else { None }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET a URL. Non-200 statuses come back as a body-less `FetchResult`;
    /// only transport failures are errors.
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError>;
}

/// Extra headers for destinations whose host contains `host_fragment`.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    pub host_fragment: String,
    pub headers: Vec<(String, String)>,
}

impl HeaderProfile {
    pub fn new(host_fragment: impl Into<String>) -> Self {
        Self {
            host_fragment: host_fragment.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host.contains(&self.host_fragment))
    }

    /// The employee directory serves a bot wall unless `Accept` is set.
    pub fn signalhire() -> Self {
        Self::new("signalhire").header("Accept", HTML_ACCEPT)
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    profiles: Vec<HeaderProfile>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            profiles: vec![HeaderProfile::signalhire()],
        })
    }

    pub fn with_profile(mut self, profile: HeaderProfile) -> Self {
        self.profiles.push(profile);
        self
    }

    fn profile_for(&self, url: &Url) -> Option<&HeaderProfile> {
        self.profiles.iter().find(|p| p.matches(url))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut request = self.client.get(parsed.as_str());
        if let Some(profile) = self.profile_for(&parsed) {
            for (name, value) in &profile.headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.send().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        let status = response.status().as_u16();
        debug!(url = %url, status = status, "Fetched");

        if status != 200 {
            warn!(url = %url, status = status, "Non-200 response, no data");
            return Ok(FetchResult::status(url, status));
        }

        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            source: Box::new(e),
        })?;

        Ok(FetchResult::ok(url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signalhire_profile_matches_host_only() {
        let profile = HeaderProfile::signalhire();
        assert!(profile.matches(&Url::parse("https://www.signalhire.com/companies/acme/employees").unwrap()));
        assert!(!profile.matches(&Url::parse("https://www.google.com/search?q=signalhire").unwrap()));
        assert_eq!(profile.headers[0].0, "Accept");
    }

    #[test]
    fn test_non_200_has_no_body() {
        let result = FetchResult {
            url: "https://a".into(),
            status: 404,
            body: Some("not found page".into()),
        };
        assert!(!result.is_ok());
        assert_eq!(result.into_body(), None);
        assert!(FetchResult::ok("https://a", "<p>x</p>").is_ok());
    }

    #[test]
    fn test_profile_lookup() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_profile(HeaderProfile::new("theorg").header("Accept-Language", "en-US"));
        let theorg = Url::parse("https://theorg.com/org/acme").unwrap();
        let google = Url::parse("https://www.google.com/search?q=x").unwrap();
        assert_eq!(fetcher.profile_for(&theorg).unwrap().host_fragment, "theorg");
        assert!(fetcher.profile_for(&google).is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
