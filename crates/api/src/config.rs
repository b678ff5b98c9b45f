use anyhow::{Context, Result};
use extract::{PromptSet, ResponseSchema, RetryConfig, SamplingConfig};
use query::TopicQueryOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub retry: RetryConfig,
    pub scrape: ScrapeConfig,
    pub prompts: PromptSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub max_pages: usize,
    pub fetch_timeout_secs: u64,
    pub topic: TopicQueryOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 120,
            sampling: SamplingConfig::default(),
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            fetch_timeout_secs: 30,
            topic: TopicQueryOptions::default(),
        }
    }
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ScrapeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    /// Defaults, then the JSON file named by `APP_CONFIG`, then individual
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("APP_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;

        if config.generation.api_key.is_empty() {
            anyhow::bail!("OPENAI_API_KEY is not set");
        }
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.generation.api_key = key;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Some(model) = lookup("GENERATION_MODEL") {
            self.generation.sampling.model = model;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(pages) = lookup("MAX_PAGES") {
            self.scrape.max_pages = pages
                .parse()
                .with_context(|| format!("MAX_PAGES must be a number, got {:?}", pages))?;
        }
        Ok(())
    }

    /// Entity responses are validated against the configured sentinel.
    pub fn response_schema(&self) -> ResponseSchema {
        ResponseSchema::new("genes", self.prompts.none_sentinel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scrape.max_pages, 10);
        assert_eq!(config.retry.max_retries, Some(30));
        assert_eq!(config.generation.sampling.model, "gpt-4-0125-preview");
        assert_eq!(config.generation.sampling.max_tokens, Some(1500));
        assert_eq!(config.response_schema().none_sentinel, "None");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("GENERATION_MODEL", "gpt-4o"),
            ("MAX_PAGES", "3"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.generation.api_key, "sk-test");
        assert_eq!(config.generation.sampling.model, "gpt-4o");
        assert_eq!(config.scrape.max_pages, 3);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_bad_max_pages() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(|key| (key == "MAX_PAGES").then(|| "ten".to_string()))
            .is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"scrape": {"max_pages": 2}, "retry": {"max_retries": null}, "prompts": {"none_sentinel": "NONE"}}"#,
        )
        .unwrap();

        assert_eq!(config.scrape.max_pages, 2);
        assert_eq!(config.scrape.fetch_timeout_secs, 30);
        assert_eq!(config.retry.max_retries, None);
        assert_eq!(config.retry.initial_backoff_ms, 10_000);
        assert_eq!(config.prompts.none_sentinel, "NONE");
        assert!(config.prompts.gene_extraction.contains("{abstract_text}"));
    }
}
