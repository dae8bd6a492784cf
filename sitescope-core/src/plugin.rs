//! Registry for all domain plugins and their sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::Domain;
use crate::ports::{DomainEnricher, SourceAdapter};

/// How wide the orchestrator queries one source.
///
/// The orchestrator (never the adapter) retries with `expanded_ft` when the
/// initial query returns zero candidates, keeping adapters stateless and
/// buffer policy centrally tunable.
#[derive(Debug, Clone, Copy)]
pub struct BufferPolicy {
    /// Initial query buffer in feet.
    pub initial_ft: f64,
    /// Wider fallback buffer; `None` disables expansion for this source.
    pub expanded_ft: Option<f64>,
}

/// One adapter plus the buffers the orchestrator drives it with.
pub struct SourceBinding {
    /// The wrapped endpoint.
    pub adapter: Arc<dyn SourceAdapter>,
    /// Buffer policy for this source.
    pub buffers: BufferPolicy,
}

/// Everything needed to enrich one domain: its sources and its enricher.
pub struct DomainPlugin {
    /// Domain this plugin owns.
    pub domain: Domain,
    /// Whether the run fails outright when this domain cannot resolve.
    pub required: bool,
    /// Sources queried for this domain, in order.
    pub sources: Vec<SourceBinding>,
    /// Business logic turning candidates into the field group.
    pub enricher: Arc<dyn DomainEnricher>,
}

/// Registry that resolves plugins by domain.
pub struct PluginRegistry {
    plugins: BTreeMap<Domain, Arc<DomainPlugin>>,
}

impl PluginRegistry {
    /// Build a registry from the provided plugin list.
    #[must_use]
    pub fn new(plugins: Vec<DomainPlugin>) -> Self {
        let plugins_map = plugins
            .into_iter()
            .map(|plugin| (plugin.domain, Arc::new(plugin)))
            .collect();
        Self {
            plugins: plugins_map,
        }
    }

    /// All registered domains, in deterministic order.
    #[must_use]
    pub fn domains(&self) -> Vec<Domain> {
        self.plugins.keys().copied().collect()
    }

    /// Look up a plugin for the given domain.
    #[must_use]
    pub fn plugin(&self, domain: Domain) -> Option<Arc<DomainPlugin>> {
        self.plugins.get(&domain).map(Arc::clone)
    }

    /// Iterator over registered plugins.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DomainPlugin>> {
        self.plugins.values()
    }
}
