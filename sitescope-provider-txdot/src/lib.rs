//! Traffic provider backed by the TxDOT AADT and roadway inventory layers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::warn;

use sitescope_core::{
    arcgis::{RetryPolicy, fetch_features},
    geometry::LatLng,
    model::{
        CongestionLevel, Domain, DomainFields, DomainResult, PropertyIdentity, RoadClass,
        SourceStamp, TrafficFields, nearest_candidate,
    },
    plugin::{BufferPolicy, DomainPlugin, SourceBinding},
    ports::{DomainEnricher, QueryOutcome, SourceAdapter, SourceBatch, SourceMeta},
};

const AADT_URL: &str =
    "https://services.arcgis.com/KTcxiTD9dsQw4r7Z/arcgis/rest/services/TxDOT_AADT/FeatureServer/0/query";
const ROADWAY_INVENTORY_URL: &str =
    "https://services.arcgis.com/KTcxiTD9dsQw4r7Z/arcgis/rest/services/TxDOT_Roadway_Inventory/FeatureServer/0/query";

/// Source id of the AADT count layer.
pub const AADT_SOURCE_ID: &str = "txdot_aadt";
/// Source id of the supplemental roadway inventory layer.
pub const INVENTORY_SOURCE_ID: &str = "txdot_roadway_inventory";

const AADT_FIELDS: &[&str] = &[
    "OBJECTID", "RTE_NM", "RTE_ID", "RTE_PRFX", "F_SYSTEM", "AADT_CUR", "T_FLAG", "K_FLAG",
    "DHV", "T_PCT", "YR", "DIR_FLAG",
];
const INVENTORY_FIELDS: &[&str] = &[
    "OBJECTID", "RTE_NM", "RTE_ID", "RTE_PRFX", "SPD_MAX", "SPD_LMT", "SURF_TYP", "F_SYSTEM",
];

/// Thresholds and fallback tables for the traffic enricher.
#[derive(Debug, Clone, Copy)]
pub struct TrafficConfig {
    /// K-factor used when the segment carries no `K_FLAG`.
    pub default_k_factor: f64,
    /// Planning capacity of an arterial, vehicles per day.
    pub arterial_capacity: f64,
    /// Planning capacity of a collector.
    pub collector_capacity: f64,
    /// Planning capacity of a local street.
    pub local_capacity: f64,
    /// Highest speed limit accepted as plausible, mph.
    pub max_plausible_speed_mph: f64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            default_k_factor: 0.10,
            arterial_capacity: 40_000.0,
            collector_capacity: 15_000.0,
            local_capacity: 5_000.0,
            max_plausible_speed_mph: 85.0,
        }
    }
}

/// Adapter for the statewide AADT count layer.
pub struct AadtAdapter {
    client: Client,
    meta: SourceMeta,
    retry: RetryPolicy,
}

impl AadtAdapter {
    /// Create a new adapter bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: AADT_SOURCE_ID.into(),
                name: "TxDOT Annual Average Daily Traffic".into(),
                version: None,
            },
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for AadtAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        match fetch_features(&self.client, AADT_URL, AADT_FIELDS, center, buffer_ft, self.retry)
            .await
        {
            Ok(candidates) => QueryOutcome {
                candidates,
                warnings: Vec::new(),
            },
            Err(error) => {
                warn!(source = AADT_SOURCE_ID, %error, "query failed");
                QueryOutcome {
                    candidates: Vec::new(),
                    warnings: vec![format!("{AADT_SOURCE_ID}_unreachable")],
                }
            }
        }
    }
}

/// Adapter for the roadway inventory layer supplying speed limit and
/// surface type.
pub struct RoadwayInventoryAdapter {
    client: Client,
    meta: SourceMeta,
    retry: RetryPolicy,
}

impl RoadwayInventoryAdapter {
    /// Create a new adapter bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: INVENTORY_SOURCE_ID.into(),
                name: "TxDOT Roadway Inventory".into(),
                version: None,
            },
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for RoadwayInventoryAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        match fetch_features(
            &self.client,
            ROADWAY_INVENTORY_URL,
            INVENTORY_FIELDS,
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
                warn!(source = INVENTORY_SOURCE_ID, %error, "query failed");
                QueryOutcome {
                    candidates: Vec::new(),
                    warnings: vec![format!("{INVENTORY_SOURCE_ID}_unreachable")],
                }
            }
        }
    }
}

/// Traffic enricher combining the AADT count with roadway inventory
/// attributes of the nearest segment.
pub struct TrafficEnricher {
    config: TrafficConfig,
}

impl TrafficEnricher {
    /// Enricher with the given thresholds.
    #[must_use]
    pub fn new(config: TrafficConfig) -> Self {
        Self { config }
    }
}

impl DomainEnricher for TrafficEnricher {
    fn domain(&self) -> Domain {
        Domain::Traffic
    }

    fn enrich(&self, _subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let mut fields = TrafficFields::default();
        let mut flags = Vec::new();
        let mut attribution = Vec::new();
        let now = Utc::now();

        let aadt_batch = SourceBatch::for_source(batches, AADT_SOURCE_ID);
        if let Some(segment) = nearest_candidate(aadt_batch) {
            let aadt_raw = segment.number_any(&["AADT_CUR", "T_FLAG"]);
            fields.road_name = segment.text_any(&["RTE_NM", "RTE_ID"]);
            fields.distance_ft = segment.distance_from_subject_ft;
            #[allow(clippy::cast_possible_truncation, reason = "count years are four-digit")]
            {
                fields.year = segment.number("YR").map(|year| year as i32);
            }
            fields.segment_id = segment.text_any(&["RTE_ID", "OBJECTID"]);
            fields.direction = segment.text("DIR_FLAG");
            fields.truck_percent = segment.number("T_PCT");

            if let Some(aadt) = aadt_raw.filter(|value| *value >= 0.0) {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    reason = "filtered non-negative and well under u32::MAX"
                )]
                let aadt_rounded = aadt.round() as u32;
                fields.aadt = Some(aadt_rounded);

                let class = classify(
                    segment.text("RTE_PRFX").as_deref(),
                    segment.number("F_SYSTEM"),
                    aadt,
                    &self.config,
                );
                fields.classification = Some(class);
                fields.congestion = Some(congestion_level(aadt, class, &self.config));

                // Per-segment K-factor is published as a whole percent.
                let k_factor = segment
                    .number("K_FLAG")
                    .map(|k| k / 100.0)
                    .filter(|k| *k > 0.0 && *k < 1.0)
                    .unwrap_or(self.config.default_k_factor);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    reason = "K-factor is in (0, 1), so this stays below the count"
                )]
                {
                    fields.peak_hour_volume = Some((aadt * k_factor).round() as u32);
                }

                attribution.push((
                    "traffic_aadt".to_owned(),
                    SourceStamp {
                        source: AADT_SOURCE_ID.into(),
                        retrieved_at: now,
                        version: fields.year.map(|year| year.to_string()),
                    },
                ));
            }
        }
        if fields.aadt.is_none() {
            flags.push("traffic_no_data_1mi".to_owned());
        }

        let inventory_batch = SourceBatch::for_source(batches, INVENTORY_SOURCE_ID);
        if let Some(roadway) = nearest_candidate(inventory_batch) {
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                reason = "plausibility filter bounds the value to (0, 85]"
            )]
            {
                fields.speed_limit_mph = roadway
                    .number_any(&["SPD_MAX", "SPD_LMT"])
                    .filter(|mph| *mph > 0.0 && *mph <= self.config.max_plausible_speed_mph)
                    .map(|mph| mph.round() as u8);
            }
            fields.surface_type = roadway.text("SURF_TYP").map(|code| surface_label(&code));
            if fields.speed_limit_mph.is_some() || fields.surface_type.is_some() {
                attribution.push((
                    "traffic_roadway".to_owned(),
                    SourceStamp {
                        source: INVENTORY_SOURCE_ID.into(),
                        retrieved_at: now,
                        version: None,
                    },
                ));
            }
        } else {
            flags.push("no_roadway_inventory".to_owned());
        }

        let mut result = DomainResult::new(DomainFields::Traffic(fields));
        result.flags = flags;
        result.attribution = attribution;
        result
    }
}

/// Classify a segment by route prefix, then functional class, then AADT.
fn classify(
    route_prefix: Option<&str>,
    f_system: Option<f64>,
    aadt: f64,
    config: &TrafficConfig,
) -> RoadClass {
    if let Some(prefix) = route_prefix {
        match prefix.to_uppercase().as_str() {
            "IH" | "US" | "PA" | "SH" | "SA" | "UA" => return RoadClass::Arterial,
            "FM" | "RM" | "RR" | "FS" | "RS" | "UP" => return RoadClass::Collector,
            "CS" | "CR" | "PV" | "PR" => return RoadClass::Local,
            _ => {}
        }
    }
    if let Some(functional) = f_system {
        #[allow(clippy::cast_possible_truncation, reason = "functional classes are single digits")]
        let code = functional.round() as i64;
        match code {
            1..=4 => return RoadClass::Arterial,
            5 | 6 => return RoadClass::Collector,
            7 => return RoadClass::Local,
            _ => {}
        }
    }
    if aadt >= 20_000.0 {
        RoadClass::Arterial
    } else if aadt >= config.local_capacity {
        RoadClass::Collector
    } else {
        RoadClass::Local
    }
}

fn congestion_level(aadt: f64, class: RoadClass, config: &TrafficConfig) -> CongestionLevel {
    let capacity = match class {
        RoadClass::Arterial => config.arterial_capacity,
        RoadClass::Collector => config.collector_capacity,
        RoadClass::Local => config.local_capacity,
    };
    let ratio = aadt / capacity;
    if ratio < 0.5 {
        CongestionLevel::Low
    } else if ratio < 0.8 {
        CongestionLevel::Moderate
    } else if ratio < 1.0 {
        CongestionLevel::High
    } else {
        CongestionLevel::Severe
    }
}

/// Expand a TxDOT surface type code; unmapped codes pass through verbatim.
fn surface_label(code: &str) -> String {
    match code.to_uppercase().as_str() {
        "A" => "Asphalt".to_owned(),
        "B" => "Brick".to_owned(),
        "C" => "Concrete".to_owned(),
        "D" => "Composite".to_owned(),
        "E" => "Earth".to_owned(),
        "G" => "Gravel".to_owned(),
        "M" => "Mixed".to_owned(),
        "P" => "Paved".to_owned(),
        "S" => "Surface Treated".to_owned(),
        "U" => "Unpaved".to_owned(),
        _ => code.to_owned(),
    }
}

/// Build the plugin bundle for the traffic domain.
///
/// The AADT layer starts at a 2,000 ft envelope and widens to a mile when
/// empty; the inventory layer is supplemental and queried once.
#[must_use]
pub fn plugin(client: Client) -> DomainPlugin {
    DomainPlugin {
        domain: Domain::Traffic,
        required: false,
        sources: vec![
            SourceBinding {
                adapter: Arc::new(AadtAdapter::new(client.clone())),
                buffers: BufferPolicy {
                    initial_ft: 2_000.0,
                    expanded_ft: Some(5_280.0),
                },
            },
            SourceBinding {
                adapter: Arc::new(RoadwayInventoryAdapter::new(client)),
                buffers: BufferPolicy {
                    initial_ft: 1_500.0,
                    expanded_ft: None,
                },
            },
        ],
        enricher: Arc::new(TrafficEnricher::new(TrafficConfig::default())),
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

    fn candidate(properties: Value, distance: f64) -> FeatureCandidate {
        let Value::Object(properties) = properties else {
            panic!("expected object")
        };
        FeatureCandidate {
            geometry: None,
            properties,
            distance_from_subject_ft: Some(distance),
        }
    }

    fn batches(aadt: Vec<FeatureCandidate>, inventory: Vec<FeatureCandidate>) -> Vec<SourceBatch> {
        vec![
            SourceBatch {
                source: SourceMeta {
                    id: AADT_SOURCE_ID.into(),
                    name: String::new(),
                    version: None,
                },
                candidates: aadt,
            },
            SourceBatch {
                source: SourceMeta {
                    id: INVENTORY_SOURCE_ID.into(),
                    name: String::new(),
                    version: None,
                },
                candidates: inventory,
            },
        ]
    }

    fn enrich(aadt: Vec<FeatureCandidate>, inventory: Vec<FeatureCandidate>) -> TrafficFields {
        let enricher = TrafficEnricher::new(TrafficConfig::default());
        let result = enricher.enrich(&subject(), &batches(aadt, inventory));
        match result.fields {
            DomainFields::Traffic(fields) => fields,
            _ => panic!("wrong field group"),
        }
    }

    #[test]
    fn congestion_boundary_on_arterial_capacity() {
        let below = enrich(
            vec![candidate(
                json!({"AADT_CUR": 39_999, "RTE_PRFX": "IH", "RTE_NM": "IH0045"}),
                300.0,
            )],
            Vec::new(),
        );
        assert_eq!(below.congestion, Some(CongestionLevel::High));

        let at_capacity = enrich(
            vec![candidate(
                json!({"AADT_CUR": 40_000, "RTE_PRFX": "IH", "RTE_NM": "IH0045"}),
                300.0,
            )],
            Vec::new(),
        );
        assert_eq!(at_capacity.congestion, Some(CongestionLevel::Severe));
    }

    #[test]
    fn prefers_current_count_over_fallback() {
        let fields = enrich(
            vec![candidate(json!({"AADT_CUR": 18_000, "T_FLAG": 9_000}), 300.0)],
            Vec::new(),
        );
        assert_eq!(fields.aadt, Some(18_000));
    }

    #[test]
    fn segment_k_factor_drives_peak_hour_volume() {
        let fields = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000, "K_FLAG": 8}), 300.0)],
            Vec::new(),
        );
        assert_eq!(fields.peak_hour_volume, Some(800));

        let defaulted = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000}), 300.0)],
            Vec::new(),
        );
        assert_eq!(defaulted.peak_hour_volume, Some(1_000));
    }

    #[test]
    fn implausible_speed_limit_stays_unset() {
        let fields = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000}), 300.0)],
            vec![candidate(json!({"SPD_MAX": 120}), 200.0)],
        );
        assert_eq!(fields.speed_limit_mph, None);

        let plausible = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000}), 300.0)],
            vec![candidate(json!({"SPD_MAX": 45}), 200.0)],
        );
        assert_eq!(plausible.speed_limit_mph, Some(45));
    }

    #[test]
    fn unmapped_surface_code_passes_through() {
        let fields = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000}), 300.0)],
            vec![candidate(json!({"SURF_TYP": "Z9"}), 200.0)],
        );
        assert_eq!(fields.surface_type.as_deref(), Some("Z9"));

        let mapped = enrich(
            vec![candidate(json!({"AADT_CUR": 10_000}), 300.0)],
            vec![candidate(json!({"SURF_TYP": "C"}), 200.0)],
        );
        assert_eq!(mapped.surface_type.as_deref(), Some("Concrete"));
    }

    #[test]
    fn empty_count_batch_flags_no_data() {
        let enricher = TrafficEnricher::new(TrafficConfig::default());
        let result = enricher.enrich(&subject(), &batches(Vec::new(), Vec::new()));
        assert!(result.flags.contains(&"traffic_no_data_1mi".to_owned()));
        assert!(result.flags.contains(&"no_roadway_inventory".to_owned()));
        assert!(result.fields.is_empty());
    }

    #[test]
    fn functional_class_used_when_prefix_unknown() {
        let fields = enrich(
            vec![candidate(json!({"AADT_CUR": 3_000, "F_SYSTEM": 3}), 300.0)],
            Vec::new(),
        );
        assert_eq!(fields.classification, Some(RoadClass::Arterial));

        let heuristic = enrich(
            vec![candidate(json!({"AADT_CUR": 3_000}), 300.0)],
            Vec::new(),
        );
        assert_eq!(heuristic.classification, Some(RoadClass::Local));
    }

    #[test]
    fn empty_properties_yield_no_fields() {
        let fields = enrich(vec![candidate(json!({}), 300.0)], Vec::new());
        assert_eq!(fields.aadt, None);
        assert_eq!(fields.classification, None);
    }
}
