use extract::{
    AggregateEntitySet, ExtractError, Extraction, Extractor, GenerationError, MalformedResponse,
    Prompt, PromptSet, TemplateError, render,
};
use ingest::{ExtractedDocument, Fetcher, IngestError, PaginationWalker, Progress, SiteAdapter, WalkStatus};
use query::{
    PositionRecord, QueryError, SearchQuery, SubjectProfile, build_coworker_queries, build_topic_query,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScrapeConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Generation(GenerationError),

    #[error("request cancelled")]
    Cancelled,
}

impl From<IngestError> for PipelineError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Cancelled => PipelineError::Cancelled,
        }
    }
}

impl From<GenerationError> for PipelineError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Generation(other),
        }
    }
}

/// A response that could not be validated. Kept in the report so callers
/// see backend contract violations.
#[derive(Debug, Clone, Serialize)]
pub struct MalformedItem {
    pub source: Option<String>,
    pub reason: String,
    pub response: String,
}

impl MalformedItem {
    fn new(source: Option<&str>, e: MalformedResponse) -> Self {
        Self {
            source: source.map(str::to_string),
            reason: e.reason,
            response: e.response,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneReport {
    pub topic: String,
    pub query_url: String,
    pub status: WalkStatus,
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub documents_found: usize,
    pub documents_analysed: usize,
    pub documents_skipped: usize,
    pub malformed: Vec<MalformedItem>,
    pub genes: Vec<String>,
    pub refined_genes: Vec<String>,
    pub analysis: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoworkerReport {
    pub name: String,
    pub queries: Vec<SearchQuery>,
    pub sources_fetched: usize,
    pub coworkers: Option<Value>,
    /// The gathered search results did not fit the model.
    pub skipped: bool,
    pub malformed: Option<MalformedItem>,
    pub summary: String,
}

/// Shared collaborators for both pipelines. Cheap to clone per request.
#[derive(Clone)]
pub struct PipelineContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub adapter: Arc<dyn SiteAdapter>,
    pub extractor: Extractor,
    pub prompts: Arc<PromptSet>,
    pub scrape: ScrapeConfig,
}

/// Topic in, genes out: walk the literature search, extract genes from each
/// abstract, refine the aggregate, then ask for a narrative.
pub struct GenePipeline {
    ctx: PipelineContext,
    aggregate: AggregateEntitySet,
}

impl GenePipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            aggregate: AggregateEntitySet::new(),
        }
    }

    pub async fn run(
        &mut self,
        topic: &str,
        cancel: &CancellationToken,
        on_progress: impl FnMut(Progress) + Send,
    ) -> Result<GeneReport, PipelineError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::EmptyTopic);
        }
        self.aggregate.reset();

        let query = build_topic_query(topic, &self.ctx.scrape.topic);
        info!(topic = %topic, url = %query.url, "Starting gene analysis");

        let walker = PaginationWalker::new(
            self.ctx.fetcher.as_ref(),
            self.ctx.adapter.as_ref(),
            self.ctx.scrape.max_pages,
        );
        let walk = walker.collect_documents(&query.url, cancel, on_progress).await?;

        let mut report = GeneReport {
            topic: topic.to_string(),
            query_url: query.url,
            status: walk.status,
            pages_processed: walk.pages_processed,
            pages_skipped: walk.pages_skipped,
            documents_found: walk.documents.len(),
            documents_analysed: 0,
            documents_skipped: 0,
            malformed: Vec::new(),
            genes: Vec::new(),
            refined_genes: Vec::new(),
            analysis: None,
            summary: String::new(),
        };

        for document in &walk.documents {
            self.extract_document(topic, document, &mut report, cancel).await?;
        }
        report.genes = self.aggregate.to_vec();

        if !self.aggregate.is_empty() {
            let refined = self.refine(topic, &mut report, cancel).await?;
            report.analysis = self.analyse(topic, &refined, cancel).await?;
            report.refined_genes = refined;
        }

        report.summary = summarize(&report);
        info!(
            topic = %topic,
            documents = report.documents_found,
            analysed = report.documents_analysed,
            skipped = report.documents_skipped,
            malformed = report.malformed.len(),
            genes = report.genes.len(),
            "Gene analysis completed"
        );

        Ok(report)
    }

    async fn extract_document(
        &mut self,
        topic: &str,
        document: &ExtractedDocument,
        report: &mut GeneReport,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let prompts = &self.ctx.prompts;
        let values = HashMap::from([
            ("topic", topic.to_string()),
            ("abstract_text", document.text.clone()),
            ("json_schema", prompts.gene_json_schema.clone()),
            ("none_sentinel", prompts.none_sentinel.clone()),
            ("example_genes", prompts.example_genes.join(", ")),
        ]);
        let prompt = Prompt::new(&prompts.gene_system_message, render(&prompts.gene_extraction, &values)?);

        match self
            .ctx
            .extractor
            .extract_entities(&prompt, Some(document.source.as_str()), cancel)
            .await
        {
            Ok(Extraction::Record(record)) => {
                report.documents_analysed += 1;
                self.aggregate.extend(&record);
            }
            Ok(Extraction::Skipped) => report.documents_skipped += 1,
            Err(ExtractError::Malformed(e)) => {
                report.malformed.push(MalformedItem::new(Some(document.source.as_str()), e));
            }
            Err(ExtractError::Generation(e)) => return Err(e.into()),
        }
        Ok(())
    }

    /// Second pass over the aggregate. Genes the aggregate never saw are
    /// dropped. Falls back to the aggregate itself when the answer is skipped
    /// or unusable.
    async fn refine(
        &self,
        topic: &str,
        report: &mut GeneReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let prompts = &self.ctx.prompts;
        let values = HashMap::from([
            ("document_count", report.documents_analysed.to_string()),
            ("topic", topic.to_string()),
            ("genes", self.aggregate.to_prompt_list()),
            ("none_sentinel", prompts.none_sentinel.clone()),
            ("json_schema", prompts.gene_json_schema.clone()),
        ]);
        let prompt = Prompt::new(&prompts.gene_system_message, render(&prompts.gene_refinement, &values)?);

        match self.ctx.extractor.extract_entities(&prompt, None, cancel).await {
            Ok(Extraction::Record(record)) => {
                let mut refined = AggregateEntitySet::new();
                refined.extend(&record);
                let kept: Vec<String> = refined
                    .entities()
                    .filter(|gene| self.aggregate.contains(gene))
                    .map(str::to_string)
                    .collect();
                if kept.len() < refined.len() {
                    warn!(topic = %topic, dropped = refined.len() - kept.len(), "Refinement added unseen genes");
                }
                Ok(kept)
            }
            Ok(Extraction::Skipped) => {
                warn!(topic = %topic, "Refinement skipped, keeping aggregate");
                Ok(self.aggregate.to_vec())
            }
            Err(ExtractError::Malformed(e)) => {
                report.malformed.push(MalformedItem::new(None, e));
                Ok(self.aggregate.to_vec())
            }
            Err(ExtractError::Generation(e)) => Err(e.into()),
        }
    }

    async fn analyse(
        &self,
        topic: &str,
        genes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<String>, PipelineError> {
        if genes.is_empty() {
            return Ok(None);
        }
        let prompts = &self.ctx.prompts;
        let values = HashMap::from([("topic", topic.to_string()), ("genes", genes.join(", "))]);
        let prompt = Prompt::new(&prompts.analysis_system_message, render(&prompts.gene_analysis, &values)?);

        match self.ctx.extractor.narrate(&prompt, cancel).await {
            Ok(text) => Ok(text),
            Err(ExtractError::Generation(e)) => Err(e.into()),
            // Free-text calls are never validated.
            Err(ExtractError::Malformed(_)) => Ok(None),
        }
    }
}

fn summarize(report: &GeneReport) -> String {
    match report.status {
        WalkStatus::NotFound => format!("No literature results found for \"{}\"", report.topic),
        WalkStatus::Unreachable => "The literature search could not be reached".to_string(),
        WalkStatus::Found => format!(
            "Analysed {} of {} abstracts ({} too large, {} malformed); found {} genes, {} after refinement",
            report.documents_analysed,
            report.documents_found,
            report.documents_skipped,
            report.malformed.len(),
            report.genes.len(),
            report.refined_genes.len(),
        ),
    }
}

/// Person in, likely coworkers out: search each position, then ask the model
/// to read the gathered results.
pub struct CoworkerPipeline {
    ctx: PipelineContext,
}

impl CoworkerPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        profile: &SubjectProfile,
        positions: &[PositionRecord],
        cancel: &CancellationToken,
    ) -> Result<CoworkerReport, PipelineError> {
        let queries = build_coworker_queries(profile, positions)?;
        let urls: Vec<String> = queries.iter().map(|q| q.url.clone()).collect();
        info!(name = %profile.full_name(), queries = urls.len(), "Starting coworker search");

        let documents = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            documents = ingest::fetch_documents(self.ctx.fetcher.as_ref(), &urls) => documents,
        };

        let prompts = &self.ctx.prompts;
        let values = HashMap::from([
            ("first_name", profile.first_name.clone()),
            ("last_name", profile.last_name.clone()),
            ("google_results", search_results(&documents)),
            ("job_info", job_info(positions)),
            ("json_format", prompts.coworker_json_format.clone()),
            ("json_schema", prompts.coworker_json_schema.clone()),
        ]);
        let system = if positions.len() == 1 {
            &prompts.single_position_system_message
        } else {
            &prompts.multiple_position_system_message
        };
        let prompt = Prompt::new(system, render(&prompts.coworker_search, &values)?);

        let mut report = CoworkerReport {
            name: profile.full_name(),
            queries,
            sources_fetched: documents.len(),
            coworkers: None,
            skipped: false,
            malformed: None,
            summary: String::new(),
        };

        match self.ctx.extractor.extract_object(&prompt, cancel).await {
            Ok(Some(value)) => report.coworkers = Some(value),
            Ok(None) => report.skipped = true,
            Err(ExtractError::Malformed(e)) => {
                warn!(name = %report.name, reason = %e.reason, "Malformed coworker response");
                report.malformed = Some(MalformedItem::new(None, e));
            }
            Err(ExtractError::Generation(e)) => return Err(e.into()),
        }

        report.summary = format!(
            "Read {} of {} search results for {}",
            report.sources_fetched,
            report.queries.len(),
            report.name
        );
        Ok(report)
    }
}

fn search_results(documents: &[ExtractedDocument]) -> String {
    documents
        .iter()
        .map(|d| format!("RESULTS FROM {}:\n{}", d.source, d.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn job_info(positions: &[PositionRecord]) -> String {
    positions
        .iter()
        .map(|p| {
            let mut line = format!("{} at {}", p.job_title, p.workplace);
            if !p.start_year.is_empty() || !p.end_year.is_empty() {
                line.push_str(&format!(" ({}-{})", p.start_year, p.end_year));
            }
            line.trim().to_string()
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::testing::ScriptedBackend;
    use extract::{BackendError, GenerationClient, ResponseSchema, RetryPolicy, SamplingConfig};
    use ingest::PubMedAdapter;
    use ingest::testing::StaticFetcher;
    use std::time::Duration;

    const ASTHMA: &str = "https://pubmed.ncbi.nlm.nih.gov/?term=asthma+gene&filter=years.2019-2024";

    fn results_page(total: usize, ids: &[u32]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!(r#"<article><a class="docsum-title" href="/{id}/">Paper {id}</a></article>"#))
            .collect();
        format!(r#"<html><body><label class="of-total-pages">of {total}</label>{items}</body></html>"#)
    }

    fn abstract_page(text: &str) -> String {
        format!(r#"<html><body><div class="abstract-content"><p>{text}</p></div></body></html>"#)
    }

    fn article(id: u32) -> String {
        format!("https://pubmed.ncbi.nlm.nih.gov/{id}/")
    }

    fn literature(ids: &[u32]) -> StaticFetcher {
        let fetcher = StaticFetcher::new()
            .with_page(ASTHMA, results_page(1, ids))
            .with_page(format!("{ASTHMA}&page=1"), results_page(1, ids));
        for id in ids {
            fetcher.add_page(article(*id), abstract_page(&format!("Abstract number {id}.")));
        }
        fetcher
    }

    fn context(fetcher: &StaticFetcher, backend: &ScriptedBackend, prompts: PromptSet) -> PipelineContext {
        let client = GenerationClient::new(
            Arc::new(backend.clone()),
            SamplingConfig::default(),
            RetryPolicy::fixed(Duration::ZERO),
        );
        PipelineContext {
            fetcher: Arc::new(fetcher.clone()),
            adapter: Arc::new(PubMedAdapter::new()),
            extractor: Extractor::new(client, ResponseSchema::default()),
            prompts: Arc::new(prompts),
            scrape: ScrapeConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_gene_pipeline_end_to_end() {
        let fetcher = literature(&[111, 222]);
        let backend = ScriptedBackend::new()
            .then_reply(r#"{"genes": ["IL13", "il13", "ORMDL3"]}"#)
            .then_reply(r#"{"genes": ["None"]}"#)
            .then_reply(r#"{"genes": ["il13"]}"#)
            .then_reply("IL13 drives type 2 airway inflammation.");
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, PromptSet::default()));

        let mut progress = Vec::new();
        let report = pipeline
            .run(" Asthma ", &CancellationToken::new(), |p| progress.push(p.fraction()))
            .await
            .unwrap();

        assert_eq!(report.status, WalkStatus::Found);
        assert_eq!(report.documents_found, 2);
        assert_eq!(report.documents_analysed, 2);
        assert_eq!(report.genes, vec!["IL13", "ORMDL3"]);
        assert_eq!(report.refined_genes, vec!["IL13"]);
        assert_eq!(report.analysis.as_deref(), Some("IL13 drives type 2 airway inflammation."));
        assert_eq!(
            report.summary,
            "Analysed 2 of 2 abstracts (0 too large, 0 malformed); found 2 genes, 1 after refinement"
        );
        assert_eq!(progress, vec![1.0]);

        let requests = backend.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].messages[1].content.contains("Abstract number 111."));
        assert!(requests[2].messages[1].content.contains("IL13, ORMDL3"));
        assert!(requests[2].is_structured());
        assert!(!requests[3].is_structured());
    }

    #[tokio::test]
    async fn test_refinement_cannot_add_genes() {
        let fetcher = literature(&[1]);
        let backend = ScriptedBackend::new()
            .then_reply(r#"{"genes": ["IL13", "ORMDL3"]}"#)
            .then_reply(r#"{"genes": ["ormdl3", "FOXP3"]}"#)
            .then_reply("ORMDL3 analysis.");
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, PromptSet::default()));

        let report = pipeline
            .run("asthma", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.genes, vec!["IL13", "ORMDL3"]);
        assert_eq!(report.refined_genes, vec!["ORMDL3"]);
        let analysis = &backend.requests()[2].messages[1].content;
        assert!(analysis.contains("ORMDL3"));
        assert!(!analysis.contains("FOXP3"));
    }

    #[tokio::test]
    async fn test_skipped_and_malformed_are_reported() {
        let fetcher = literature(&[1, 2, 3]);
        let backend = ScriptedBackend::new()
            .then_error(BackendError::ContextTooLarge("context_length_exceeded".into()))
            .then_reply("The abstract mentions TP53.")
            .then_reply(r#"{"genes": ["TP53"]}"#)
            .then_reply(r#"{"genes": ["TP53"]}"#)
            .then_reply("TP53 analysis.");
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, PromptSet::default()));

        let report = pipeline
            .run("asthma", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.documents_found, 3);
        assert_eq!(report.documents_skipped, 1);
        assert_eq!(report.documents_analysed, 1);
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].source.as_deref(), Some(article(2).as_str()));
        assert_eq!(report.genes, vec!["TP53"]);
        assert!(report.summary.starts_with("Analysed 1 of 3 abstracts (1 too large, 1 malformed)"));
    }

    #[tokio::test]
    async fn test_missing_results_skip_generation() {
        let fetcher = StaticFetcher::new().with_page(ASTHMA, "<html><body>No results were found.</body></html>");
        let backend = ScriptedBackend::new();
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, PromptSet::default()));

        let report = pipeline
            .run("asthma", &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.status, WalkStatus::NotFound);
        assert!(report.genes.is_empty());
        assert!(report.analysis.is_none());
        assert_eq!(backend.calls(), 0);
        assert_eq!(report.summary, "No literature results found for \"asthma\"");
    }

    #[tokio::test]
    async fn test_template_error_halts() {
        let fetcher = literature(&[1]);
        let backend = ScriptedBackend::new().then_reply(r#"{"genes": ["TP53"]}"#);
        let prompts = PromptSet {
            gene_extraction: "Genes for {disease}?".to_string(),
            ..PromptSet::default()
        };
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, prompts));

        let err = pipeline
            .run("asthma", &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Template(TemplateError::Unbound(ref name)) if name == "disease"));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_gene_run() {
        let fetcher = literature(&[1]);
        let backend = ScriptedBackend::new();
        let mut pipeline = GenePipeline::new(context(&fetcher, &backend, PromptSet::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline.run("asthma", &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_topic() {
        let backend = ScriptedBackend::new();
        let mut pipeline = GenePipeline::new(context(&StaticFetcher::new(), &backend, PromptSet::default()));

        let err = pipeline.run("   ", &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTopic));
    }

    #[tokio::test]
    async fn test_coworker_pipeline() {
        let profile = SubjectProfile::new("Jane", "Doe");
        let positions = vec![PositionRecord::new("Acme Corp", "Engineer").years("2015", "2020")];
        let queries = build_coworker_queries(&profile, &positions).unwrap();

        let fetcher = StaticFetcher::new()
            .with_page(&queries[0].url, "<html><body><p>Jane Doe</p><p>Engineer at Acme Corp</p></body></html>")
            .with_transport_error(&queries[1].url);
        let backend = ScriptedBackend::new().then_reply(r#"{"coworkers": [{"name": "John Roe"}]}"#);
        let pipeline = CoworkerPipeline::new(context(&fetcher, &backend, PromptSet::default()));

        let report = pipeline
            .run(&profile, &positions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.sources_fetched, 1);
        assert_eq!(report.queries.len(), 4);
        assert_eq!(fetcher.requests().len(), 4);
        let coworkers = report.coworkers.unwrap();
        assert_eq!(coworkers["coworkers"][0]["name"], "John Roe");
        assert_eq!(report.summary, "Read 1 of 4 search results for Jane Doe");

        let request = &backend.requests()[0];
        let prompts = PromptSet::default();
        assert_eq!(request.messages[0].content, prompts.single_position_system_message);
        let user = &request.messages[1].content;
        assert!(user.contains(&format!(
            "RESULTS FROM {}:\nJane Doe Engineer at Acme Corp",
            queries[0].url
        )));
        assert!(user.contains("Engineer at Acme Corp (2015-2020)"));
    }

    #[tokio::test]
    async fn test_coworker_multiple_positions_and_malformed() {
        let profile = SubjectProfile::new("Jane", "Doe");
        let positions = vec![
            PositionRecord::new("Acme Corp", "Engineer"),
            PositionRecord::new("Initech", "Manager"),
        ];
        let backend = ScriptedBackend::new().then_reply("['John Roe']");
        let pipeline = CoworkerPipeline::new(context(&StaticFetcher::new(), &backend, PromptSet::default()));

        let report = pipeline
            .run(&profile, &positions, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.sources_fetched, 0);
        assert!(report.coworkers.is_none());
        assert!(report.malformed.is_some());
        assert_eq!(
            backend.requests()[0].messages[0].content,
            PromptSet::default().multiple_position_system_message
        );
    }

    #[tokio::test]
    async fn test_coworker_rejects_too_many_positions() {
        let backend = ScriptedBackend::new();
        let pipeline = CoworkerPipeline::new(context(&StaticFetcher::new(), &backend, PromptSet::default()));
        let positions = vec![PositionRecord::new("Acme", ""); 4];

        let err = pipeline
            .run(&SubjectProfile::new("Jane", "Doe"), &positions, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Query(QueryError::TooManyPositions(4))));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_job_info() {
        let positions = vec![
            PositionRecord::new("Acme Corp", "Engineer").years("2015", "2020"),
            PositionRecord::new("Initech", ""),
        ];
        assert_eq!(job_info(&positions), "Engineer at Acme Corp (2015-2020); at Initech");
    }
}
