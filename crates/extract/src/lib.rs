pub mod aggregate;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod testing;

pub use aggregate::{AggregateEntitySet, parse_object, parse_record};
pub use error::{BackendError, ExtractError, GenerationError, MalformedResponse, TemplateError};
pub use llm::{CompletionBackend, Generation, GenerationClient, OpenAiBackend, SamplingConfig};
pub use prompt::{Prompt, PromptSet, render};
pub use retry::{RetryConfig, RetryPolicy};
pub use schema::{ExtractionRecord, ResponseSchema};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Record(ExtractionRecord),
    /// The input was too large for the model.
    Skipped,
}

/// Generation plus response validation for the three kinds of calls the
/// pipelines make.
#[derive(Clone)]
pub struct Extractor {
    client: GenerationClient,
    schema: ResponseSchema,
}

impl Extractor {
    pub fn new(client: GenerationClient, schema: ResponseSchema) -> Self {
        Self { client, schema }
    }

    /// Structured call validated against the entity schema.
    pub async fn extract_entities(
        &self,
        prompt: &Prompt,
        source: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Extraction, ExtractError> {
        let Some(text) = self.client.generate(prompt, true, cancel).await?.into_text() else {
            return Ok(Extraction::Skipped);
        };

        let record = parse_record(&text, &self.schema, source).inspect_err(|e| {
            warn!(source = ?source, reason = %e.reason, "Malformed extraction response");
        })?;
        debug!(source = ?source, entities = record.entities.len(), "Extracted entities");

        Ok(Extraction::Record(record))
    }

    /// Structured call that only has to return a JSON object.
    pub async fn extract_object(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ExtractError> {
        match self.client.generate(prompt, true, cancel).await? {
            Generation::Text(text) => Ok(Some(parse_object(&text)?)),
            Generation::Skipped => Ok(None),
        }
    }

    /// Free-text call.
    pub async fn narrate(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ExtractError> {
        Ok(self.client.generate(prompt, false, cancel).await?.into_text())
    }
}
