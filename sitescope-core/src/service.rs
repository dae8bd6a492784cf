//! Enrichment orchestration.
//!
//! One [`EnrichmentService::enrich`] call drives the whole pipeline: fan out
//! one task per registered domain, apply each settled [`DomainResult`] to the
//! canonical record, resolve conflicts, score, freeze, and persist exactly
//! once. Domains run concurrently but the record itself is only ever touched
//! from this module.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{info, warn};

use crate::conflict::{self, ConflictPolicy};
use crate::geometry::LatLng;
use crate::model::{
    CanonicalEnrichmentRecord, Domain, DomainResult, EnrichmentMode, EnrichmentRequest,
    EnrichmentResponse, EnrichmentStatus, PropertyIdentity, ResponseData,
};
use crate::plugin::{DomainPlugin, PluginRegistry, SourceBinding};
use crate::ports::{EnrichmentError, QueryOutcome, RecordStore, SourceBatch};
use crate::scoring::{self, ScoringConfig};

/// Time limits of one enrichment run.
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    /// Budget for a single adapter query, initial or expanded.
    pub per_call_timeout: Duration,
    /// Hard ceiling for the whole fan-out; domains still in flight when it
    /// passes are abandoned and flagged.
    pub global_deadline: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_secs(12),
            global_deadline: Duration::from_secs(40),
        }
    }
}

/// What one scheduled domain came back with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DomainState {
    /// Not settled before the run ended.
    Unsettled,
    /// Settled with an empty field group.
    Empty,
    /// Settled with data.
    Populated,
}

/// The enrichment facade the application layer talks to.
pub struct EnrichmentService {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn RecordStore>,
    conflict_policy: ConflictPolicy,
    scoring: ScoringConfig,
    config: ServiceConfig,
}

impl EnrichmentService {
    /// Service with default policies and timeouts.
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            conflict_policy: ConflictPolicy::default(),
            scoring: ScoringConfig::default(),
            config: ServiceConfig::default(),
        }
    }

    /// Override the run time limits.
    #[must_use]
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the scoring weights and thresholds.
    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// Run one enrichment end to end and persist the settled record.
    ///
    /// Individual domain failures degrade the result instead of erroring;
    /// the record always freezes at a terminal state and is saved exactly
    /// once.
    ///
    /// # Errors
    ///
    /// Returns an [`EnrichmentError`] when the request coordinates are
    /// invalid or the final write to the store fails. Never for domain
    /// failures.
    pub async fn enrich(
        &self,
        request: EnrichmentRequest,
    ) -> Result<EnrichmentResponse, EnrichmentError> {
        let position = LatLng::new(request.lat, request.lng)?;
        let identity = PropertyIdentity {
            position,
            formatted_address: request.formatted_address.clone(),
            parcel_id: None,
        };
        let mut record =
            CanonicalEnrichmentRecord::new(request.application_id.clone(), identity.clone());
        record.begin_enrichment();

        let scheduled: Vec<Domain> = self
            .registry
            .domains()
            .into_iter()
            .filter(|domain| match request.mode {
                EnrichmentMode::Full => true,
                EnrichmentMode::GeocodeOnly => {
                    matches!(domain, Domain::Parcel | Domain::Zoning)
                }
            })
            .collect();
        info!(
            application_id = %request.application_id,
            mode = ?request.mode,
            domains = scheduled.len(),
            "starting enrichment"
        );

        let mut states: BTreeMap<Domain, DomainState> = scheduled
            .iter()
            .map(|domain| (*domain, DomainState::Unsettled))
            .collect();

        let mut tasks = JoinSet::new();
        for domain in &scheduled {
            let Some(plugin) = self.registry.plugin(*domain) else {
                continue;
            };
            let subject = identity.clone();
            let per_call = self.config.per_call_timeout;
            let domain = *domain;
            tasks.spawn(async move { (domain, run_domain(&plugin, &subject, per_call).await) });
        }

        let deadline = Instant::now() + self.config.global_deadline;
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((domain, result)))) => {
                    let state = if result.fields.is_empty() {
                        DomainState::Empty
                    } else {
                        DomainState::Populated
                    };
                    states.insert(domain, state);
                    record.apply(result);
                }
                Ok(Some(Err(join_error))) => {
                    warn!(%join_error, "domain task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("global enrichment deadline exceeded, abandoning in-flight domains");
                    tasks.abort_all();
                    break;
                }
            }
        }
        for (domain, state) in &states {
            if *state == DomainState::Unsettled {
                record.add_flag(format!("{domain}_timeout"));
            }
        }

        let required_failed = scheduled.iter().any(|domain| {
            self.registry
                .plugin(*domain)
                .is_some_and(|plugin| plugin.required)
                && states.get(domain) != Some(&DomainState::Populated)
        });
        let degraded = states
            .values()
            .any(|state| *state != DomainState::Populated);
        let status = if required_failed {
            EnrichmentStatus::Failed
        } else if degraded {
            EnrichmentStatus::Partial
        } else {
            EnrichmentStatus::Completed
        };

        if let Some(user_values) = request.user_values.as_ref()
            && !user_values.is_empty()
        {
            record.conflicts = conflict::resolve(&record, user_values, &self.conflict_policy);
        }
        if request.mode == EnrichmentMode::Full && status != EnrichmentStatus::Failed {
            record.score = Some(scoring::score(&record, &self.scoring));
        }
        record.freeze(status);
        info!(
            application_id = %record.application_id,
            status = ?record.enrichment_status,
            flags = record.data_flags.len(),
            "enrichment settled"
        );

        self.store.save(&record).await?;

        let data_flags: Vec<String> = record.data_flags.iter().cloned().collect();
        let data = match request.mode {
            EnrichmentMode::Full => ResponseData::Full(Box::new(record)),
            EnrichmentMode::GeocodeOnly => ResponseData::Summary(record.summary()),
        };
        Ok(EnrichmentResponse {
            success: status != EnrichmentStatus::Failed,
            data,
            data_flags,
        })
    }

    /// Load a previously persisted record.
    ///
    /// # Errors
    ///
    /// Returns an [`EnrichmentError`] when the store read fails.
    pub async fn load(
        &self,
        application_id: &str,
    ) -> Result<Option<CanonicalEnrichmentRecord>, EnrichmentError> {
        Ok(self.store.load(application_id).await?)
    }
}

/// Query every source of one domain, expanding the buffer when the initial
/// envelope comes back empty, then hand the batches to the enricher.
async fn run_domain(
    plugin: &DomainPlugin,
    subject: &PropertyIdentity,
    per_call: Duration,
) -> DomainResult {
    let mut batches = Vec::with_capacity(plugin.sources.len());
    let mut warnings = Vec::new();
    for binding in &plugin.sources {
        let mut outcome =
            query_once(binding, subject.position, binding.buffers.initial_ft, per_call).await;
        if outcome.candidates.is_empty()
            && let Some(expanded_ft) = binding.buffers.expanded_ft
        {
            let wider = query_once(binding, subject.position, expanded_ft, per_call).await;
            outcome.candidates = wider.candidates;
            outcome.warnings.extend(wider.warnings);
        }
        warnings.extend(outcome.warnings);
        batches.push(SourceBatch {
            source: binding.adapter.meta().clone(),
            candidates: outcome.candidates,
        });
    }

    let mut result = plugin.enricher.enrich(subject, &batches);
    for warning in warnings {
        result.flag(warning);
    }
    result
}

async fn query_once(
    binding: &SourceBinding,
    center: LatLng,
    buffer_ft: f64,
    per_call: Duration,
) -> QueryOutcome {
    let source_id = binding.adapter.meta().id.clone();
    match timeout(per_call, binding.adapter.query(center, buffer_ft)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(source = %source_id, buffer_ft, "source query timed out");
            QueryOutcome {
                candidates: Vec::new(),
                warnings: vec![format!("{source_id}_timeout")],
            }
        }
    }
}
