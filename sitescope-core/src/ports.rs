//! Traits describing adapter, enricher, and store capabilities.

use async_trait::async_trait;

use crate::geometry::{GeometryError, LatLng};
use crate::model::{CanonicalEnrichmentRecord, Domain, DomainResult, FeatureCandidate, PropertyIdentity};

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to a geospatial provider.
///
/// Adapters recover from all of these locally (fail closed: empty candidate
/// list plus a warning flag); the type exists so the shared fetch helper and
/// the retry policy can distinguish transient from permanent failures.
pub enum AdapterError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Provider returned a non-2xx status.
    #[error("Upstream returned HTTP {0}")]
    Status(u16),
    /// Provider returned a 2xx body the projection could not read.
    #[error("Malformed payload: {0}")]
    Malformed(String),
    /// Provider returned an in-band error object.
    #[error("Upstream service error: {0}")]
    Service(String),
}

impl AdapterError {
    /// Whether a retry could plausibly help. 4xx means a bad query, not bad
    /// luck, and is never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Network(err) => err.is_timeout() || err.is_connect(),
            AdapterError::Status(code) => *code >= 500,
            AdapterError::Malformed(_) | AdapterError::Service(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
/// Identity of one external data source.
pub struct SourceMeta {
    /// Stable identifier used in attribution and batch routing.
    pub id: String,
    /// Human-readable provider name.
    pub name: String,
    /// Dataset version or vintage, where the provider advertises one.
    pub version: Option<String>,
}

#[derive(Debug, Default)]
/// What a single adapter query produced.
pub struct QueryOutcome {
    /// Projected candidate features; empty on any failure.
    pub candidates: Vec<FeatureCandidate>,
    /// Structured warnings for failures that were swallowed, e.g.
    /// `txdot_aadt_unreachable`.
    pub warnings: Vec<String>,
}

#[async_trait]
/// One external geospatial query endpoint.
///
/// Contract: fails closed. A network error, non-2xx response, or malformed
/// payload yields an empty candidate list and a warning, never an error;
/// one failed adapter must not abort the enrichment run. Adapters are
/// stateless: buffer expansion is driven by the orchestrator.
pub trait SourceAdapter: Send + Sync {
    /// Identity of the wrapped source.
    fn meta(&self) -> &SourceMeta;

    /// Query features intersecting a bounding envelope around `center`.
    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome;
}

#[derive(Debug)]
/// Candidates from one source, handed to the domain enricher.
pub struct SourceBatch {
    /// Which source produced the batch.
    pub source: SourceMeta,
    /// Candidates, already distance-stamped.
    pub candidates: Vec<FeatureCandidate>,
}

impl SourceBatch {
    /// Batch lookup helper for enrichers with several sources.
    #[must_use]
    pub fn for_source<'batches>(
        batches: &'batches [SourceBatch],
        source_id: &str,
    ) -> &'batches [FeatureCandidate] {
        batches
            .iter()
            .find(|batch| batch.source.id == source_id)
            .map_or(&[], |batch| batch.candidates.as_slice())
    }
}

/// Per-domain business logic: nearest-feature selection, normalization,
/// derived metrics. Pure and synchronous so it can be tested without I/O.
///
/// Degraded outcomes are data (`DomainResult::flags`), never errors.
pub trait DomainEnricher: Send + Sync {
    /// Domain this enricher owns.
    fn domain(&self) -> Domain;

    /// Produce the domain field group from the adapter batches.
    fn enrich(&self, subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult;
}

#[derive(thiserror::Error, Debug)]
/// Errors from the durable record store.
pub enum StoreError {
    /// Database layer failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
/// Durable key-value store for canonical records. One write per run, after
/// all domains settle.
pub trait RecordStore: Send + Sync {
    /// Persist (upsert) a record.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    async fn save(&self, record: &CanonicalEnrichmentRecord) -> Result<(), StoreError>;

    /// Load a record by application id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the read fails.
    async fn load(
        &self,
        application_id: &str,
    ) -> Result<Option<CanonicalEnrichmentRecord>, StoreError>;
}

#[derive(thiserror::Error, Debug)]
/// Errors surfaced to the caller of the enrichment service.
pub enum EnrichmentError {
    /// The request carried invalid coordinates.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] GeometryError),
    /// Enrichment computed a result but it could not be durably saved.
    /// Distinct from domain failures: the data existed and was lost.
    #[error("Persistence failed after enrichment: {0}")]
    Persistence(#[from] StoreError),
}
