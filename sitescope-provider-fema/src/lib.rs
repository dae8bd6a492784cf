//! Flood provider backed by the FEMA National Flood Hazard Layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::warn;

use sitescope_core::{
    arcgis::{RetryPolicy, fetch_features},
    geometry::LatLng,
    model::{Domain, DomainFields, DomainResult, FloodFields, PropertyIdentity, SourceStamp},
    plugin::{BufferPolicy, DomainPlugin, SourceBinding},
    ports::{DomainEnricher, QueryOutcome, SourceAdapter, SourceBatch, SourceMeta},
};

const NFHL_URL: &str =
    "https://hazards.fema.gov/gis/nfhl/rest/services/public/NFHL/MapServer/28/query";

/// Source id of the NFHL flood hazard zone layer.
pub const NFHL_SOURCE_ID: &str = "fema_nfhl";

const NFHL_FIELDS: &[&str] = &["OBJECTID", "DFIRM_ID", "FLD_ZONE", "ZONE_SUBTY", "STATIC_BFE"];

/// Adapter for the NFHL flood hazard zone polygons.
pub struct NfhlAdapter {
    client: Client,
    meta: SourceMeta,
    retry: RetryPolicy,
}

impl NfhlAdapter {
    /// Create a new adapter bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: NFHL_SOURCE_ID.into(),
                name: "FEMA National Flood Hazard Layer".into(),
                version: None,
            },
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for NfhlAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        match fetch_features(&self.client, NFHL_URL, NFHL_FIELDS, center, buffer_ft, self.retry)
            .await
        {
            Ok(candidates) => QueryOutcome {
                candidates,
                warnings: Vec::new(),
            },
            Err(error) => {
                warn!(source = NFHL_SOURCE_ID, %error, "query failed");
                QueryOutcome {
                    candidates: Vec::new(),
                    warnings: vec![format!("{NFHL_SOURCE_ID}_unreachable")],
                }
            }
        }
    }
}

/// Flood enricher reading the first intersecting hazard polygon.
///
/// Zone polygons have no usable centroid distance; with a tight query
/// envelope any intersecting polygon covers the subject, so the first
/// candidate carrying a zone is taken.
pub struct FloodEnricher;

impl DomainEnricher for FloodEnricher {
    fn domain(&self) -> Domain {
        Domain::Flood
    }

    fn enrich(&self, _subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let candidates = SourceBatch::for_source(batches, NFHL_SOURCE_ID);
        let zoned = candidates
            .iter()
            .find(|candidate| candidate.text("FLD_ZONE").is_some());

        let Some(polygon) = zoned else {
            let mut result = DomainResult::new(DomainFields::Flood(FloodFields::default()));
            result.flag("flood_no_data");
            return result;
        };

        let subtype = polygon.text("ZONE_SUBTY");
        let fields = FloodFields {
            zone: polygon.text("FLD_ZONE"),
            static_bfe_ft: polygon
                .number("STATIC_BFE")
                // NFHL publishes -9999 where no static BFE applies.
                .filter(|elevation| *elevation > -9_000.0),
            floodway: subtype
                .as_deref()
                .map(|subtype| subtype.to_uppercase().contains("FLOODWAY")),
        };

        let mut result = DomainResult::new(DomainFields::Flood(fields));
        result.attribute(
            "flood_zone",
            SourceStamp {
                source: NFHL_SOURCE_ID.into(),
                retrieved_at: Utc::now(),
                version: polygon.text("DFIRM_ID"),
            },
        );
        result
    }
}

/// Build the plugin bundle for the flood domain.
#[must_use]
pub fn plugin(client: Client) -> DomainPlugin {
    DomainPlugin {
        domain: Domain::Flood,
        required: false,
        sources: vec![SourceBinding {
            adapter: Arc::new(NfhlAdapter::new(client)),
            buffers: BufferPolicy {
                initial_ft: 500.0,
                expanded_ft: Some(2_000.0),
            },
        }],
        enricher: Arc::new(FloodEnricher),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use sitescope_core::model::FeatureCandidate;

    fn subject() -> PropertyIdentity {
        PropertyIdentity {
            position: LatLng::new(29.76, -95.37).unwrap(),
            formatted_address: "123 Main St".into(),
            parcel_id: None,
        }
    }

    fn candidate(properties: Value) -> FeatureCandidate {
        let Value::Object(properties) = properties else {
            panic!("expected object")
        };
        FeatureCandidate {
            geometry: None,
            properties,
            distance_from_subject_ft: None,
        }
    }

    fn enrich(candidates: Vec<FeatureCandidate>) -> DomainResult {
        FloodEnricher.enrich(
            &subject(),
            &[SourceBatch {
                source: SourceMeta {
                    id: NFHL_SOURCE_ID.into(),
                    name: String::new(),
                    version: None,
                },
                candidates,
            }],
        )
    }

    fn fields(result: DomainResult) -> FloodFields {
        match result.fields {
            DomainFields::Flood(fields) => fields,
            _ => panic!("wrong field group"),
        }
    }

    #[test]
    fn reads_zone_bfe_and_floodway_subtype() {
        let result = enrich(vec![candidate(json!({
            "FLD_ZONE": "AE",
            "ZONE_SUBTY": "FLOODWAY",
            "STATIC_BFE": 48.0,
            "DFIRM_ID": "48201C",
        }))]);
        assert!(result.flags.is_empty());
        let fields = fields(result);
        assert_eq!(fields.zone.as_deref(), Some("AE"));
        assert_eq!(fields.static_bfe_ft, Some(48.0));
        assert_eq!(fields.floodway, Some(true));
    }

    #[test]
    fn sentinel_bfe_is_treated_as_absent() {
        let fields = fields(enrich(vec![candidate(json!({
            "FLD_ZONE": "X",
            "STATIC_BFE": -9999,
        }))]));
        assert_eq!(fields.static_bfe_ft, None);
        // Without a subtype the floodway question stays open.
        assert_eq!(fields.floodway, None);
    }

    #[test]
    fn skips_candidates_without_a_zone() {
        let fields = fields(enrich(vec![
            candidate(json!({"DFIRM_ID": "48201C"})),
            candidate(json!({"FLD_ZONE": "X", "ZONE_SUBTY": "AREA OF MINIMAL FLOOD HAZARD"})),
        ]));
        assert_eq!(fields.zone.as_deref(), Some("X"));
        assert_eq!(fields.floodway, Some(false));
    }

    #[test]
    fn empty_batch_flags_no_data() {
        let result = enrich(Vec::new());
        assert!(result.flags.contains(&"flood_no_data".to_owned()));
        assert!(result.fields.is_empty());
    }
}
