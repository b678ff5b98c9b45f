use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::pipeline::{CoworkerReport, GeneReport};

/// Process-wide counters, exposed by `GET /stats`.
#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_gene_time_us: AtomicU64,
    total_coworker_time_us: AtomicU64,
    gene_runs: AtomicUsize,
    coworker_runs: AtomicUsize,

    documents_analysed: AtomicUsize,
    documents_skipped: AtomicUsize,
    malformed_responses: AtomicUsize,
    genes_extracted: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_gene_run(&self, duration: Duration, report: &GeneReport) {
        self.total_gene_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.gene_runs.fetch_add(1, Ordering::Relaxed);
        self.documents_analysed
            .fetch_add(report.documents_analysed, Ordering::Relaxed);
        self.documents_skipped
            .fetch_add(report.documents_skipped, Ordering::Relaxed);
        self.malformed_responses
            .fetch_add(report.malformed.len(), Ordering::Relaxed);
        self.genes_extracted
            .fetch_add(report.genes.len(), Ordering::Relaxed);
    }

    pub fn record_coworker_run(&self, duration: Duration, report: &CoworkerReport) {
        self.total_coworker_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.coworker_runs.fetch_add(1, Ordering::Relaxed);
        if report.malformed.is_some() {
            self.malformed_responses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_gene_run_ms: avg_time_ms(&self.total_gene_time_us, &self.gene_runs),
            avg_coworker_run_ms: avg_time_ms(&self.total_coworker_time_us, &self.coworker_runs),
            documents_analysed: self.documents_analysed.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            genes_extracted: self.genes_extracted.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_gene_run_ms: f64,
    pub avg_coworker_run_ms: f64,
    pub documents_analysed: usize,
    pub documents_skipped: usize,
    pub malformed_responses: usize,
    pub genes_extracted: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
