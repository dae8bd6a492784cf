//! Utilities provider backed by the City of Houston water, sanitary sewer,
//! and storm sewer main layers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::warn;

use sitescope_core::{
    arcgis::{RetryPolicy, fetch_features},
    geometry::{LatLng, min_vertex_distance_ft},
    model::{
        Domain, DomainFields, DomainResult, FeatureCandidate, PropertyIdentity, SourceStamp,
        UtilityFields, UtilityLine,
    },
    plugin::{BufferPolicy, DomainPlugin, SourceBinding},
    ports::{DomainEnricher, QueryOutcome, SourceAdapter, SourceBatch, SourceMeta},
};

const WATER_URL: &str =
    "https://cohgis.houstontx.gov/arcgis/rest/services/COH_Public/COH_WaterDistributionMains/MapServer/0/query";
const SEWER_URL: &str =
    "https://cohgis.houstontx.gov/arcgis/rest/services/COH_Public/COH_SanitarySewerLines/MapServer/0/query";
const STORM_URL: &str =
    "https://cohgis.houstontx.gov/arcgis/rest/services/COH_Public/COH_StormSewerLines/MapServer/0/query";

/// Source id of the water distribution main layer.
pub const WATER_SOURCE_ID: &str = "coh_water";
/// Source id of the sanitary sewer line layer.
pub const SEWER_SOURCE_ID: &str = "coh_sewer";
/// Source id of the storm sewer line layer.
pub const STORM_SOURCE_ID: &str = "coh_storm";

const MAIN_FIELDS: &[&str] = &["DIAMETER", "MATERIAL", "STATUS"];

/// Adapter for one City of Houston main layer.
pub struct MainLayerAdapter {
    client: Client,
    meta: SourceMeta,
    url: &'static str,
    retry: RetryPolicy,
}

impl MainLayerAdapter {
    fn new(client: Client, source_id: &str, name: &str, url: &'static str) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: source_id.to_owned(),
                name: name.to_owned(),
                version: None,
            },
            url,
            retry: RetryPolicy::default(),
        }
    }

    /// Adapter for the water distribution mains.
    #[must_use]
    pub fn water(client: Client) -> Self {
        Self::new(client, WATER_SOURCE_ID, "COH Water Distribution Mains", WATER_URL)
    }

    /// Adapter for the sanitary sewer lines.
    #[must_use]
    pub fn sewer(client: Client) -> Self {
        Self::new(client, SEWER_SOURCE_ID, "COH Sanitary Sewer Lines", SEWER_URL)
    }

    /// Adapter for the storm sewer lines.
    #[must_use]
    pub fn storm(client: Client) -> Self {
        Self::new(client, STORM_SOURCE_ID, "COH Storm Sewer Lines", STORM_URL)
    }
}

#[async_trait]
impl SourceAdapter for MainLayerAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        match fetch_features(&self.client, self.url, MAIN_FIELDS, center, buffer_ft, self.retry)
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

/// Nearest main of one kind, by minimum vertex distance along the line.
fn nearest_line(subject: LatLng, candidates: &[FeatureCandidate]) -> Option<UtilityLine> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let geometry = candidate.geometry.as_ref()?;
            let distance = min_vertex_distance_ft(subject, geometry)?;
            Some((candidate, distance))
        })
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(candidate, distance)| UtilityLine {
            diameter: candidate.text("DIAMETER"),
            material: candidate.text("MATERIAL"),
            distance_ft: Some(distance),
        })
}

/// Utilities enricher combining the three main kinds.
pub struct UtilitiesEnricher;

impl DomainEnricher for UtilitiesEnricher {
    fn domain(&self) -> Domain {
        Domain::Utilities
    }

    fn enrich(&self, subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let position = subject.position;
        let mut fields = UtilityFields::default();
        let mut flags = Vec::new();
        let mut attribution = Vec::new();
        let now = Utc::now();

        for (kind, source_id, slot) in [
            ("water", WATER_SOURCE_ID, &mut fields.water),
            ("sewer", SEWER_SOURCE_ID, &mut fields.sewer),
            ("storm", STORM_SOURCE_ID, &mut fields.storm),
        ] {
            let candidates = SourceBatch::for_source(batches, source_id);
            match nearest_line(position, candidates) {
                Some(line) => {
                    *slot = Some(line);
                    attribution.push((
                        format!("utilities_{kind}"),
                        SourceStamp {
                            source: source_id.to_owned(),
                            retrieved_at: now,
                            version: None,
                        },
                    ));
                }
                None => flags.push(format!("utilities_no_{kind}")),
            }
        }

        let mut result = DomainResult::new(DomainFields::Utilities(fields));
        result.flags = flags;
        result.attribution = attribution;
        result
    }
}

/// Build the plugin bundle for the utilities domain.
#[must_use]
pub fn plugin(client: Client) -> DomainPlugin {
    let buffers = BufferPolicy {
        initial_ft: 1_000.0,
        expanded_ft: Some(2_000.0),
    };
    DomainPlugin {
        domain: Domain::Utilities,
        required: false,
        sources: vec![
            SourceBinding {
                adapter: Arc::new(MainLayerAdapter::water(client.clone())),
                buffers,
            },
            SourceBinding {
                adapter: Arc::new(MainLayerAdapter::sewer(client.clone())),
                buffers,
            },
            SourceBinding {
                adapter: Arc::new(MainLayerAdapter::storm(client)),
                buffers,
            },
        ],
        enricher: Arc::new(UtilitiesEnricher),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use sitescope_core::geometry::Geometry;

    fn subject() -> PropertyIdentity {
        PropertyIdentity {
            position: LatLng::new(29.76, -95.37).unwrap(),
            formatted_address: "123 Main St".into(),
            parcel_id: None,
        }
    }

    fn line_candidate(properties: Value, path: Vec<[f64; 2]>) -> FeatureCandidate {
        let Value::Object(properties) = properties else {
            panic!("expected object")
        };
        FeatureCandidate {
            geometry: Some(Geometry::LineString(path)),
            properties,
            distance_from_subject_ft: None,
        }
    }

    fn batch(source_id: &str, candidates: Vec<FeatureCandidate>) -> SourceBatch {
        SourceBatch {
            source: SourceMeta {
                id: source_id.to_owned(),
                name: String::new(),
                version: None,
            },
            candidates,
        }
    }

    #[test]
    fn picks_the_line_with_the_closest_vertex() {
        let near = line_candidate(
            json!({"DIAMETER": "8", "MATERIAL": "PVC"}),
            vec![[-95.370, 29.761], [-95.369, 29.762]],
        );
        let far = line_candidate(
            json!({"DIAMETER": "12", "MATERIAL": "DI"}),
            vec![[-95.40, 29.80], [-95.41, 29.81]],
        );
        let result = UtilitiesEnricher.enrich(
            &subject(),
            &[
                batch(WATER_SOURCE_ID, vec![far, near]),
                batch(SEWER_SOURCE_ID, Vec::new()),
                batch(STORM_SOURCE_ID, Vec::new()),
            ],
        );

        match result.fields {
            DomainFields::Utilities(fields) => {
                let water = fields.water.unwrap();
                assert_eq!(water.diameter.as_deref(), Some("8"));
                assert!(water.distance_ft.unwrap() < 1_000.0);
                assert!(fields.sewer.is_none());
            }
            _ => panic!("wrong field group"),
        }
        assert!(result.flags.contains(&"utilities_no_sewer".to_owned()));
        assert!(result.flags.contains(&"utilities_no_storm".to_owned()));
    }

    #[test]
    fn candidate_without_geometry_is_skipped() {
        let no_geometry = FeatureCandidate {
            geometry: None,
            properties: serde_json::Map::new(),
            distance_from_subject_ft: None,
        };
        let result = UtilitiesEnricher.enrich(
            &subject(),
            &[
                batch(WATER_SOURCE_ID, vec![no_geometry]),
                batch(SEWER_SOURCE_ID, Vec::new()),
                batch(STORM_SOURCE_ID, Vec::new()),
            ],
        );
        assert!(result.flags.contains(&"utilities_no_water".to_owned()));
        assert!(result.fields.is_empty());
    }

    #[test]
    fn all_kinds_populated_without_flags() {
        let path = vec![[-95.370, 29.761]];
        let result = UtilitiesEnricher.enrich(
            &subject(),
            &[
                batch(WATER_SOURCE_ID, vec![line_candidate(json!({"DIAMETER": "8"}), path.clone())]),
                batch(SEWER_SOURCE_ID, vec![line_candidate(json!({"DIAMETER": "10"}), path.clone())]),
                batch(STORM_SOURCE_ID, vec![line_candidate(json!({"DIAMETER": "24"}), path)]),
            ],
        );
        assert!(result.flags.is_empty());
        assert_eq!(result.attribution.len(), 3);
    }
}
