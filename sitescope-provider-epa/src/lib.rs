//! Environmental provider backed by the USFWS National Wetlands Inventory
//! and the EPA facility registry layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::warn;

use sitescope_core::{
    arcgis::{RetryPolicy, fetch_features},
    geometry::{LatLng, min_vertex_distance_ft},
    model::{
        Domain, DomainFields, DomainResult, EnvironmentalFields, FeatureCandidate,
        PropertyIdentity, SourceStamp,
    },
    plugin::{BufferPolicy, DomainPlugin, SourceBinding},
    ports::{DomainEnricher, QueryOutcome, SourceAdapter, SourceBatch, SourceMeta},
};

const WETLANDS_URL: &str =
    "https://fwspublicservices.wim.usgs.gov/wetlandsmapservice/rest/services/Wetlands/MapServer/0/query";
const FACILITIES_URL: &str =
    "https://geodata.epa.gov/arcgis/rest/services/OEI/FRS_INTERESTS/MapServer/0/query";

/// Source id of the wetlands inventory layer.
pub const WETLANDS_SOURCE_ID: &str = "usfws_wetlands";
/// Source id of the EPA facility registry layer.
pub const FACILITIES_SOURCE_ID: &str = "epa_facilities";

const WETLANDS_FIELDS: &[&str] = &["ATTRIBUTE", "WETLAND_TYPE", "ACRES"];
const FACILITIES_FIELDS: &[&str] = &["REGISTRY_ID", "PRIMARY_NAME", "INTEREST_TYPE"];

/// Adapter for one environmental feature layer.
pub struct EnvironmentalAdapter {
    client: Client,
    meta: SourceMeta,
    url: &'static str,
    out_fields: &'static [&'static str],
    retry: RetryPolicy,
}

impl EnvironmentalAdapter {
    /// Adapter for the wetlands inventory.
    #[must_use]
    pub fn wetlands(client: Client) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: WETLANDS_SOURCE_ID.into(),
                name: "USFWS National Wetlands Inventory".into(),
                version: None,
            },
            url: WETLANDS_URL,
            out_fields: WETLANDS_FIELDS,
            retry: RetryPolicy::default(),
        }
    }

    /// Adapter for the facility registry.
    #[must_use]
    pub fn facilities(client: Client) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: FACILITIES_SOURCE_ID.into(),
                name: "EPA Facility Registry Service".into(),
                version: None,
            },
            url: FACILITIES_URL,
            out_fields: FACILITIES_FIELDS,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for EnvironmentalAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        match fetch_features(
            &self.client,
            self.url,
            self.out_fields,
            center,
            buffer_ft,
            self.retry,
        )
        .await
        {
            Ok(candidates) => QueryOutcome {
                candidates,
                warnings: Vec::new(),
            },
            Err(error) => {
                warn!(source = %self.meta.id, %error, "query failed");
                QueryOutcome {
                    candidates: Vec::new(),
                    warnings: vec![format!("{}_unreachable", self.meta.id)],
                }
            }
        }
    }
}

/// Nearest candidate by vertex distance, covering wetland polygons and
/// facility points alike.
fn nearest_by_vertex(
    subject: LatLng,
    candidates: &[FeatureCandidate],
) -> Option<(&FeatureCandidate, f64)> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let geometry = candidate.geometry.as_ref()?;
            let distance = min_vertex_distance_ft(subject, geometry)?;
            Some((candidate, distance))
        })
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
}

/// Environmental enricher combining wetland and regulated-facility
/// proximity.
pub struct EnvironmentalEnricher;

impl DomainEnricher for EnvironmentalEnricher {
    fn domain(&self) -> Domain {
        Domain::Environmental
    }

    fn enrich(&self, subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let position = subject.position;
        let mut fields = EnvironmentalFields::default();
        let mut flags = Vec::new();
        let mut attribution = Vec::new();
        let now = Utc::now();

        let wetlands = SourceBatch::for_source(batches, WETLANDS_SOURCE_ID);
        match nearest_by_vertex(position, wetlands) {
            Some((wetland, distance)) => {
                fields.wetland_type = wetland.text_any(&["WETLAND_TYPE", "ATTRIBUTE"]);
                fields.wetland_distance_ft = Some(distance);
                attribution.push((
                    "environmental_wetland".to_owned(),
                    SourceStamp {
                        source: WETLANDS_SOURCE_ID.into(),
                        retrieved_at: now,
                        version: None,
                    },
                ));
            }
            None => flags.push("wetlands_no_data".to_owned()),
        }

        let facilities = SourceBatch::for_source(batches, FACILITIES_SOURCE_ID);
        match nearest_by_vertex(position, facilities) {
            Some((facility, distance)) => {
                fields.facility_name = facility.text("PRIMARY_NAME");
                fields.facility_type = facility.text("INTEREST_TYPE");
                fields.facility_distance_ft = Some(distance);
                attribution.push((
                    "environmental_facility".to_owned(),
                    SourceStamp {
                        source: FACILITIES_SOURCE_ID.into(),
                        retrieved_at: now,
                        version: None,
                    },
                ));
            }
            None => flags.push("epa_no_data".to_owned()),
        }

        let mut result = DomainResult::new(DomainFields::Environmental(fields));
        result.flags = flags;
        result.attribution = attribution;
        result
    }
}

/// Build the plugin bundle for the environmental domain.
#[must_use]
pub fn plugin(client: Client) -> DomainPlugin {
    DomainPlugin {
        domain: Domain::Environmental,
        required: false,
        sources: vec![
            SourceBinding {
                adapter: Arc::new(EnvironmentalAdapter::wetlands(client.clone())),
                buffers: BufferPolicy {
                    initial_ft: 1_000.0,
                    expanded_ft: Some(2_640.0),
                },
            },
            SourceBinding {
                adapter: Arc::new(EnvironmentalAdapter::facilities(client)),
                buffers: BufferPolicy {
                    initial_ft: 2_640.0,
                    expanded_ft: Some(5_280.0),
                },
            },
        ],
        enricher: Arc::new(EnvironmentalEnricher),
    }
}
