//! Ingestion pipeline.
//!
//! Drives each document through
//! `Pending → Extracted → Validated → Resolved → Committed → Done`.
//! A document that cannot finish ends in `Failed { stage, .. }` and the
//! run moves on; documents never share in-memory state, only the Store.

use std::collections::BTreeMap;
use std::future::Future;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::documents::Document;
use crate::driver::GraphStore;
use crate::errors::{Result, ScigraphError};
use crate::extract::{Extraction, Extractor};
use crate::resolve::IdentityResolver;
use crate::utils::RetryPolicy;
use crate::validate::{ConsistencyValidator, KnownNodes, Rejection, RejectionKind, ValidatedBatch};
use crate::writer::{GraphWriter, WriteResult};

/// Property recording which paper a node or edge was last seen in.
pub const SOURCE_PAPER: &str = "source_paper";

/// The step a document was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Extraction,
    Validation,
    Resolution,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Extraction,
    IdentityConflict,
    Commit,
    Store,
    Cancelled,
    Other,
}

impl From<&ScigraphError> for FailureKind {
    fn from(err: &ScigraphError) -> Self {
        match err {
            ScigraphError::ExtractionFailure { .. } | ScigraphError::Llm(_) => FailureKind::Extraction,
            ScigraphError::IdentityConflict { .. } => FailureKind::IdentityConflict,
            ScigraphError::CommitFailure { .. } => FailureKind::Commit,
            ScigraphError::Store { .. } => FailureKind::Store,
            ScigraphError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum DocumentStatus {
    Pending,
    Extracted,
    Validated,
    Resolved,
    Committed,
    Done,
    Failed {
        stage: PipelineStage,
        error: FailureKind,
        message: String,
    },
}

impl DocumentStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, DocumentStatus::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DocumentStatus::Failed { .. })
    }
}

/// Outcome of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub rejections: Vec<Rejection>,
    pub write: Option<WriteResult>,
}

impl DocumentReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            status: DocumentStatus::Pending,
            rejections: Vec::new(),
            write: None,
        }
    }

    fn advance(&mut self, status: DocumentStatus) {
        debug!(document = %self.document_id, from = ?self.status, to = ?status, "transition");
        self.status = status;
    }

    fn fail(&mut self, stage: PipelineStage, err: ScigraphError) {
        let kind = FailureKind::from(&err);
        if kind == FailureKind::Cancelled {
            info!(document = %self.document_id, ?stage, "document cancelled");
        } else {
            warn!(document = %self.document_id, ?stage, error = %err, "document failed");
        }
        self.status = DocumentStatus::Failed {
            stage,
            error: kind,
            message: err.to_string(),
        };
    }
}

/// Outcome of a run over many documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// In input order.
    pub documents: Vec<DocumentReport>,
    pub done: usize,
    pub failed: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub rejections: BTreeMap<RejectionKind, usize>,
}

impl RunSummary {
    pub fn from_reports(documents: Vec<DocumentReport>) -> Self {
        let mut summary = RunSummary::default();
        for report in &documents {
            if report.status.is_done() {
                summary.done += 1;
            } else if report.status.is_failed() {
                summary.failed += 1;
            }
            if let Some(write) = &report.write {
                summary.nodes_created += write.nodes_created;
                summary.edges_created += write.edges_created;
            }
            for rejection in &report.rejections {
                *summary.rejections.entry(rejection.kind).or_default() += 1;
            }
        }
        summary.documents = documents;
        summary
    }

    pub fn report(&self, document_id: &str) -> Option<&DocumentReport> {
        self.documents.iter().find(|r| r.document_id == document_id)
    }
}

/// Orchestrates extraction, validation, resolution and commit.
pub struct Pipeline<E, S> {
    extractor: E,
    store: S,
    validator: ConsistencyValidator,
    extraction_retry: RetryPolicy,
    commit_retry: RetryPolicy,
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl<E: Extractor, S: GraphStore> Pipeline<E, S> {
    pub fn new(extractor: E, store: S) -> Self {
        Self {
            extractor,
            store,
            validator: ConsistencyValidator::default(),
            extraction_retry: RetryPolicy::default(),
            commit_retry: RetryPolicy::default(),
            max_concurrency: 4,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_validator(mut self, validator: ConsistencyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_extraction_retry(mut self, retry: RetryPolicy) -> Self {
        self.extraction_retry = retry;
        self
    }

    pub fn with_commit_retry(mut self, retry: RetryPolicy) -> Self {
        self.commit_retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Process `documents`, at most `max_concurrency` at a time.
    pub async fn run(&self, documents: &[Document]) -> RunSummary {
        info!(documents = documents.len(), max_concurrency = self.max_concurrency, "ingestion started");

        let mut reports: Vec<(usize, DocumentReport)> = stream::iter(documents.iter().enumerate())
            .map(|(i, document)| async move { (i, self.run_document(document).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        reports.sort_by_key(|(i, _)| *i);

        let summary = RunSummary::from_reports(reports.into_iter().map(|(_, r)| r).collect());
        info!(
            done = summary.done,
            failed = summary.failed,
            nodes_created = summary.nodes_created,
            edges_created = summary.edges_created,
            "ingestion finished"
        );
        summary
    }

    #[instrument(skip_all, fields(document = %document.id))]
    pub async fn run_document(&self, document: &Document) -> DocumentReport {
        let mut report = DocumentReport::new(&document.id);

        let extraction = match self.until_cancelled(self.extract(document)).await {
            Ok(extraction) => extraction,
            Err(err) => {
                report.fail(PipelineStage::Extraction, err);
                return report;
            }
        };
        report.advance(DocumentStatus::Extracted);

        let mut batch = match self.until_cancelled(self.validate(&extraction)).await {
            Ok(batch) => batch,
            Err(err) => {
                report.fail(PipelineStage::Validation, err);
                return report;
            }
        };
        report.rejections.append(&mut batch.rejections);
        attach_provenance(&mut batch, &document.title);
        report.advance(DocumentStatus::Validated);

        let resolver = IdentityResolver::new(&self.store);
        let mut resolved = match self.until_cancelled(resolver.resolve_batch(&batch)).await {
            Ok(resolved) => resolved,
            Err(err) => {
                report.fail(PipelineStage::Resolution, err);
                return report;
            }
        };
        report.rejections.append(&mut resolved.rejections);
        report.advance(DocumentStatus::Resolved);

        // Last point at which cancellation is honoured: a started commit runs
        // to completion or rolls back on its own.
        if self.cancel.is_cancelled() {
            report.fail(PipelineStage::Commit, ScigraphError::Cancelled);
            return report;
        }
        let writer = GraphWriter::new(&self.store, self.commit_retry.clone());
        match writer.commit(&resolved).await {
            Ok(write) => report.write = Some(write),
            Err(err) => {
                report.fail(PipelineStage::Commit, err);
                return report;
            }
        }
        report.advance(DocumentStatus::Committed);

        if let Some(write) = &report.write {
            info!(
                title = %document.title,
                nodes_created = write.nodes_created,
                nodes_merged = write.nodes_merged,
                edges_created = write.edges_created,
                rejected = report.rejections.len(),
                "document committed"
            );
        }
        report.advance(DocumentStatus::Done);
        report
    }

    async fn extract(&self, document: &Document) -> Result<Extraction> {
        self.extraction_retry
            .run("extract", || self.extractor.extract(document))
            .await
            .map_err(|exhausted| ScigraphError::ExtractionFailure {
                attempts: exhausted.attempts,
                message: exhausted.error.to_string(),
            })
    }

    async fn validate(&self, extraction: &Extraction) -> Result<ValidatedBatch> {
        let names = self.validator.lookup_names(extraction);
        let known = if names.is_empty() {
            KnownNodes::default()
        } else {
            KnownNodes::new(self.store.find_nodes_by_names(&names).await?)
        };
        Ok(self.validator.validate(extraction, &known))
    }

    async fn until_cancelled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScigraphError::Cancelled),
            out = work => out,
        }
    }
}

fn attach_provenance(batch: &mut ValidatedBatch, title: &str) {
    let title = Value::String(title.to_string());
    for entity in &mut batch.entities {
        entity.properties.insert(SOURCE_PAPER.to_string(), title.clone());
    }
    for relation in &mut batch.relations {
        relation.properties.insert(SOURCE_PAPER.to_string(), title.clone());
    }
}
