//! Canonical domain data structures for property enrichment.
//!
//! The [`CanonicalEnrichmentRecord`] is the single mutable aggregate of an
//! enrichment run. Domain enrichers never touch it directly; they produce a
//! [`DomainResult`] scoped to their own field group and the orchestrator
//! applies it, which is what keeps concurrent domains from corrupting each
//! other's writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geometry::{Geometry, LatLng};

/// Enrichment domains known to the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Roadway traffic volumes and classification.
    Traffic,
    /// Flood hazard zones.
    Flood,
    /// Zoning codes and overlay districts.
    Zoning,
    /// Water, sanitary, and storm mains.
    Utilities,
    /// Wetlands and regulated facilities.
    Environmental,
    /// Cadastral parcel and jurisdiction identity.
    Parcel,
}

impl Domain {
    /// Data-flag prefixes emitted by this domain's enricher or its source
    /// adapters. Adapter warnings are named after the source id
    /// (`txdot_aadt_unreachable`, `coh_water_timeout`), so each domain also
    /// claims the source-id prefixes of the adapters bound to it.
    #[must_use]
    pub fn flag_prefixes(&self) -> &'static [&'static str] {
        match self {
            Domain::Traffic => &["traffic", "no_roadway_inventory", "txdot"],
            Domain::Flood => &["flood", "fema"],
            Domain::Zoning => &["zoning", "county_zoning"],
            Domain::Utilities => &["utilities", "coh_"],
            Domain::Environmental => &["wetlands", "epa", "usfws"],
            Domain::Parcel => &["parcel", "county_parcels"],
        }
    }

    /// Whether a merged data flag was emitted by this domain.
    #[must_use]
    pub fn owns_flag(&self, flag: &str) -> bool {
        self.flag_prefixes()
            .iter()
            .any(|prefix| flag.starts_with(prefix))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = match self {
            Domain::Traffic => "traffic",
            Domain::Flood => "flood",
            Domain::Zoning => "zoning",
            Domain::Utilities => "utilities",
            Domain::Environmental => "environmental",
            Domain::Parcel => "parcel",
        };
        write!(formatter, "{slug}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Immutable identity of the subject property, created once per request.
pub struct PropertyIdentity {
    /// Geocoded position of the subject.
    pub position: LatLng,
    /// Formatted street address as supplied by the caller.
    pub formatted_address: String,
    /// Parcel identifier when already known to the caller.
    pub parcel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Provenance for one populated canonical field.
pub struct SourceStamp {
    /// Source identifier, e.g. `txdot_aadt`.
    pub source: String,
    /// When the value was retrieved from the source.
    pub retrieved_at: DateTime<Utc>,
    /// Optional dataset version or vintage.
    pub version: Option<String>,
}

/// Transient feature returned by a source adapter.
///
/// Produced at the adapter boundary by projecting the provider's untyped
/// payload, consumed by the matching enricher, then discarded. Never
/// persisted.
#[derive(Debug, Clone)]
pub struct FeatureCandidate {
    /// Feature geometry, when the provider returned one.
    pub geometry: Option<Geometry>,
    /// Raw attribute bag; enrichers read only the fields they declare.
    pub properties: Map<String, Value>,
    /// Haversine distance from the subject to the feature centroid, stamped
    /// at projection time. `None` when the geometry has no centroid.
    pub distance_from_subject_ft: Option<f64>,
}

impl FeatureCandidate {
    /// Read a numeric attribute, accepting JSON numbers or numeric strings.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.properties.get(key)? {
            Value::Number(num) => num.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read a string attribute, trimmed; empty strings count as unset.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            Value::Number(num) => Some(num.to_string()),
            _ => None,
        }
    }

    /// First attribute present among `keys`, read as text.
    #[must_use]
    pub fn text_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// First attribute present among `keys`, read as a number.
    #[must_use]
    pub fn number_any(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|key| self.number(key))
    }
}

/// Select the candidate nearest the subject.
///
/// Uses the centroid distance stamped at projection time; candidates without
/// a centroid are skipped. Ties keep the first-seen candidate so selection
/// is deterministic for identical input.
#[must_use]
pub fn nearest_candidate(candidates: &[FeatureCandidate]) -> Option<&FeatureCandidate> {
    let mut nearest: Option<(&FeatureCandidate, f64)> = None;
    for candidate in candidates {
        let Some(distance) = candidate.distance_from_subject_ft else {
            continue;
        };
        match nearest {
            Some((_, best)) if distance >= best => {}
            _ => nearest = Some((candidate, distance)),
        }
    }
    nearest.map(|(candidate, _)| candidate)
}

/// Roadway functional classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadClass {
    /// Principal or minor arterial.
    Arterial,
    /// Major or minor collector.
    Collector,
    /// Local street.
    Local,
}

/// Congestion bucket derived from the AADT/capacity ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    /// Ratio below 0.5.
    Low,
    /// Ratio below 0.8.
    Moderate,
    /// Ratio below 1.0.
    High,
    /// Ratio at or above 1.0.
    Severe,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Traffic domain field group.
pub struct TrafficFields {
    /// Annual average daily traffic of the nearest segment.
    pub aadt: Option<u32>,
    /// Route name of the nearest segment.
    pub road_name: Option<String>,
    /// Distance from the subject to the segment, in feet.
    pub distance_ft: Option<f64>,
    /// Count year of the AADT figure.
    pub year: Option<i32>,
    /// Provider segment identifier.
    pub segment_id: Option<String>,
    /// Directionality flag of the count.
    pub direction: Option<String>,
    /// Derived roadway classification.
    pub classification: Option<RoadClass>,
    /// Estimated peak-hour volume (AADT x K-factor).
    pub peak_hour_volume: Option<u32>,
    /// Truck share of traffic, percent.
    pub truck_percent: Option<f64>,
    /// Derived congestion bucket.
    pub congestion: Option<CongestionLevel>,
    /// Posted speed limit in mph, only when within plausible bounds.
    pub speed_limit_mph: Option<u8>,
    /// Pavement surface description.
    pub surface_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Flood domain field group.
pub struct FloodFields {
    /// FEMA flood zone designation, e.g. `AE` or `X`.
    pub zone: Option<String>,
    /// Static base flood elevation in feet, where published.
    pub static_bfe_ft: Option<f64>,
    /// Whether the subject lies in a regulatory floodway. `None` means the
    /// zone subtype was not available, which is not the same as `false`.
    pub floodway: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Zoning domain field group.
pub struct ZoningFields {
    /// Zoning code, e.g. `C-2`.
    pub code: Option<String>,
    /// Overlay district name, where applicable.
    pub overlay_district: Option<String>,
    /// Jurisdiction that published the zoning layer.
    pub jurisdiction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One utility main near the subject.
pub struct UtilityLine {
    /// Pipe diameter as published (units vary by provider).
    pub diameter: Option<String>,
    /// Pipe material code.
    pub material: Option<String>,
    /// Minimum vertex distance from the subject, in feet.
    pub distance_ft: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Utilities domain field group.
pub struct UtilityFields {
    /// Nearest water distribution main.
    pub water: Option<UtilityLine>,
    /// Nearest sanitary sewer line.
    pub sewer: Option<UtilityLine>,
    /// Nearest storm sewer line.
    pub storm: Option<UtilityLine>,
}

impl UtilityFields {
    /// Smallest known distance to any main, in feet.
    #[must_use]
    pub fn nearest_distance_ft(&self) -> Option<f64> {
        [&self.water, &self.sewer, &self.storm]
            .into_iter()
            .flatten()
            .filter_map(|line| line.distance_ft)
            .min_by(f64::total_cmp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Environmental domain field group.
pub struct EnvironmentalFields {
    /// National Wetlands Inventory classification of the nearest wetland.
    pub wetland_type: Option<String>,
    /// Distance to the nearest mapped wetland, in feet.
    pub wetland_distance_ft: Option<f64>,
    /// Name of the nearest regulated facility.
    pub facility_name: Option<String>,
    /// Facility interest type, e.g. `Superfund NPL`.
    pub facility_type: Option<String>,
    /// Distance to the nearest regulated facility, in feet.
    pub facility_distance_ft: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Parcel/cadastral domain field group. This is the required domain: a run
/// that cannot resolve it fails outright.
pub struct ParcelFields {
    /// Assessor parcel identifier.
    pub parcel_id: Option<String>,
    /// Owner of record.
    pub owner: Option<String>,
    /// Situs address from the cadastral layer.
    pub situs_address: Option<String>,
    /// County name.
    pub county: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// State abbreviation.
    pub state: Option<String>,
    /// ZIP code.
    pub zip: Option<String>,
    /// Appraisal neighborhood code.
    pub neighborhood: Option<String>,
    /// Legal description.
    pub legal_description: Option<String>,
    /// Lot size in acres.
    pub lot_size_acres: Option<f64>,
}

/// Typed per-domain output applied to the canonical record.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainFields {
    /// Traffic group.
    Traffic(TrafficFields),
    /// Flood group.
    Flood(FloodFields),
    /// Zoning group.
    Zoning(ZoningFields),
    /// Utilities group.
    Utilities(UtilityFields),
    /// Environmental group.
    Environmental(EnvironmentalFields),
    /// Parcel group.
    Parcel(ParcelFields),
}

impl DomainFields {
    /// Domain that owns this field group.
    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            DomainFields::Traffic(_) => Domain::Traffic,
            DomainFields::Flood(_) => Domain::Flood,
            DomainFields::Zoning(_) => Domain::Zoning,
            DomainFields::Utilities(_) => Domain::Utilities,
            DomainFields::Environmental(_) => Domain::Environmental,
            DomainFields::Parcel(_) => Domain::Parcel,
        }
    }

    /// True when no field in the group was populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            DomainFields::Traffic(fields) => *fields == TrafficFields::default(),
            DomainFields::Flood(fields) => *fields == FloodFields::default(),
            DomainFields::Zoning(fields) => *fields == ZoningFields::default(),
            DomainFields::Utilities(fields) => *fields == UtilityFields::default(),
            DomainFields::Environmental(fields) => *fields == EnvironmentalFields::default(),
            DomainFields::Parcel(fields) => *fields == ParcelFields::default(),
        }
    }
}

#[derive(Debug, Clone)]
/// Output of one domain enricher: the field group, degraded-outcome flags,
/// and provenance stamps for every populated field.
pub struct DomainResult {
    /// The populated field group.
    pub fields: DomainFields,
    /// Non-fatal degradation markers, e.g. `traffic_no_data_1mi`.
    pub flags: Vec<String>,
    /// Provenance entries keyed by canonical field name.
    pub attribution: Vec<(String, SourceStamp)>,
}

impl DomainResult {
    /// Result with no flags or attribution.
    #[must_use]
    pub fn new(fields: DomainFields) -> Self {
        Self {
            fields,
            flags: Vec::new(),
            attribution: Vec::new(),
        }
    }

    /// Record a degradation flag.
    pub fn flag<S: Into<String>>(&mut self, flag: S) {
        self.flags.push(flag.into());
    }

    /// Attach a provenance stamp for one populated field.
    pub fn attribute<F: Into<String>>(&mut self, field: F, stamp: SourceStamp) {
        self.attribution.push((field.into(), stamp));
    }
}

/// Confidence label shared by conflict flags and factor scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Authoritative data, no degradation.
    High,
    /// Authoritative data with degraded coverage.
    Medium,
    /// Divergent or defaulted data.
    Low,
    /// Strongly divergent data.
    VeryLow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A user-entered value diverging from an authoritative one. Immutable once
/// created; attached read-only to the final record.
pub struct ConflictFlag {
    /// Canonical field name, e.g. `zoning_code`.
    pub field: String,
    /// Value the user submitted.
    pub user_value: String,
    /// Value the authoritative source reported.
    pub authoritative_value: String,
    /// Percent difference for continuous fields; `None` for exact-match
    /// fields.
    pub percent_difference: Option<f64>,
    /// Confidence in the user value given the divergence.
    pub confidence: Confidence,
    /// Human-readable explanation.
    pub message: String,
}

/// Severity of a kill factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Materially raises cost or risk.
    Warning,
    /// Stops the deal regardless of score.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A condition severe enough to override the numeric score presentation.
pub struct KillFactor {
    /// Stable code, e.g. `FLOOD_FLOODWAY`.
    pub code: String,
    /// Severity class.
    pub severity: Severity,
    /// Short title for display.
    pub title: String,
    /// What the condition means for the site.
    pub description: String,
}

/// Letter band for the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Band {
    /// Score >= 75 with no kill factors.
    A,
    /// Score >= 50.
    B,
    /// Score >= 25.
    C,
    /// Everything else.
    D,
}

/// Presented verdict, which kill factors can override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No stop conditions, favorable score.
    Proceed,
    /// Degraded score or warning-level kill factors.
    Caution,
    /// A critical kill factor is active; the numeric score does not matter.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One domain's contribution to the composite score.
pub struct FactorScore {
    /// Sub-score in `[0, 100]`.
    pub score: f64,
    /// Fixed weight of this domain.
    pub weight: f64,
    /// Confidence in the underlying data.
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Composite feasibility score, recomputed in full whenever any contributing
/// domain output changes.
pub struct FeasibilityScore {
    /// Weighted sum clamped to `[0, 100]`.
    pub overall_score: f64,
    /// Letter band.
    pub band: Band,
    /// Per-domain breakdown.
    pub factors: BTreeMap<Domain, FactorScore>,
    /// Active kill factors, evaluated independently of the score.
    pub kill_factors: Vec<KillFactor>,
}

impl FeasibilityScore {
    /// Presented verdict. Kill factors communicate "stop"; the numeric score
    /// communicates "how good, given no stop conditions".
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        if self
            .kill_factors
            .iter()
            .any(|factor| factor.severity == Severity::Critical)
        {
            Verdict::Fail
        } else if matches!(self.band, Band::A | Band::B) && self.kill_factors.is_empty() {
            Verdict::Proceed
        } else {
            Verdict::Caution
        }
    }
}

/// Lifecycle state of an enrichment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Accepted, not yet started.
    Pending,
    /// Domain fan-out in flight.
    Enriching,
    /// Required domains succeeded, at least one optional domain failed.
    Partial,
    /// Every scheduled domain succeeded.
    Completed,
    /// A required domain could not be resolved.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The canonical, source-attributed aggregate for one property.
///
/// Owned exclusively by the orchestrator: created pending, mutated during
/// the run via [`CanonicalEnrichmentRecord::apply`], frozen at a terminal
/// state, then persisted once.
pub struct CanonicalEnrichmentRecord {
    /// Application this record belongs to.
    pub application_id: String,
    /// Immutable subject identity.
    pub identity: PropertyIdentity,
    /// Traffic field group.
    pub traffic: Option<TrafficFields>,
    /// Flood field group.
    pub flood: Option<FloodFields>,
    /// Zoning field group.
    pub zoning: Option<ZoningFields>,
    /// Utilities field group.
    pub utilities: Option<UtilityFields>,
    /// Environmental field group.
    pub environmental: Option<EnvironmentalFields>,
    /// Parcel field group.
    pub parcel: Option<ParcelFields>,
    /// Append-only, deduplicated degradation markers.
    pub data_flags: BTreeSet<String>,
    /// Run lifecycle state.
    pub enrichment_status: EnrichmentStatus,
    /// Provenance per populated canonical field.
    pub source_attribution: BTreeMap<String, SourceStamp>,
    /// Conflicts between user and authoritative values.
    pub conflicts: Vec<ConflictFlag>,
    /// Composite score, present once a full run has settled.
    pub score: Option<FeasibilityScore>,
}

impl CanonicalEnrichmentRecord {
    /// Fresh pending record for a subject.
    #[must_use]
    pub fn new(application_id: String, identity: PropertyIdentity) -> Self {
        Self {
            application_id,
            identity,
            traffic: None,
            flood: None,
            zoning: None,
            utilities: None,
            environmental: None,
            parcel: None,
            data_flags: BTreeSet::new(),
            enrichment_status: EnrichmentStatus::Pending,
            source_attribution: BTreeMap::new(),
            conflicts: Vec::new(),
            score: None,
        }
    }

    /// Transition `pending -> enriching`. No-op from any other state.
    pub fn begin_enrichment(&mut self) {
        if self.enrichment_status == EnrichmentStatus::Pending {
            self.enrichment_status = EnrichmentStatus::Enriching;
        }
    }

    /// Freeze the record at a terminal state. Only meaningful while
    /// enriching; terminal states are never overwritten.
    pub fn freeze(&mut self, status: EnrichmentStatus) {
        if self.enrichment_status == EnrichmentStatus::Enriching
            && matches!(
                status,
                EnrichmentStatus::Partial | EnrichmentStatus::Completed | EnrichmentStatus::Failed
            )
        {
            self.enrichment_status = status;
        }
    }

    /// Merge one domain's output into the record: the field group, its
    /// flags (set union), and its attribution stamps.
    pub fn apply(&mut self, result: DomainResult) {
        match result.fields {
            DomainFields::Traffic(fields) => self.traffic = Some(fields),
            DomainFields::Flood(fields) => self.flood = Some(fields),
            DomainFields::Zoning(fields) => self.zoning = Some(fields),
            DomainFields::Utilities(fields) => self.utilities = Some(fields),
            DomainFields::Environmental(fields) => self.environmental = Some(fields),
            DomainFields::Parcel(fields) => self.parcel = Some(fields),
        }
        self.data_flags.extend(result.flags);
        for (field, stamp) in result.attribution {
            self.source_attribution.insert(field, stamp);
        }
    }

    /// Record a flag outside any domain result (e.g. a domain timeout).
    pub fn add_flag<S: Into<String>>(&mut self, flag: S) {
        self.data_flags.insert(flag.into());
    }

    /// Whether a domain's field group is populated.
    #[must_use]
    pub fn domain_populated(&self, domain: Domain) -> bool {
        match domain {
            Domain::Traffic => self.traffic.as_ref().is_some_and(|f| *f != TrafficFields::default()),
            Domain::Flood => self.flood.as_ref().is_some_and(|f| *f != FloodFields::default()),
            Domain::Zoning => self.zoning.as_ref().is_some_and(|f| *f != ZoningFields::default()),
            Domain::Utilities => self
                .utilities
                .as_ref()
                .is_some_and(|f| *f != UtilityFields::default()),
            Domain::Environmental => self
                .environmental
                .as_ref()
                .is_some_and(|f| *f != EnvironmentalFields::default()),
            Domain::Parcel => self.parcel.as_ref().is_some_and(|f| *f != ParcelFields::default()),
        }
    }

    /// Reduced field subset returned for geocode-only requests.
    #[must_use]
    pub fn summary(&self) -> RecordSummary {
        let parcel = self.parcel.clone().unwrap_or_default();
        let zoning = self.zoning.clone().unwrap_or_default();
        RecordSummary {
            county: parcel.county,
            city: parcel.city,
            state: parcel.state,
            zip: parcel.zip,
            neighborhood: parcel.neighborhood,
            parcel_id: parcel.parcel_id,
            lot_size_acres: parcel.lot_size_acres,
            zoning_code: zoning.code,
            owner: parcel.owner,
        }
    }
}

/// How much of the pipeline a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentMode {
    /// All registered domains.
    Full,
    /// Parcel and zoning identity only, used for address auto-fill.
    GeocodeOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Values the user typed into the intake form, compared against
/// authoritative sources by the conflict resolver.
pub struct UserValues {
    /// User-entered lot size in acres.
    pub lot_size_acres: Option<f64>,
    /// User-entered zoning code.
    pub zoning_code: Option<String>,
    /// User-entered parcel identifier.
    pub parcel_id: Option<String>,
}

impl UserValues {
    /// True when no user value was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lot_size_acres.is_none() && self.zoning_code.is_none() && self.parcel_id.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Inbound enrichment request from the application layer.
pub struct EnrichmentRequest {
    /// Application the result is persisted under.
    pub application_id: String,
    /// Subject latitude.
    pub lat: f64,
    /// Subject longitude.
    pub lng: f64,
    /// Formatted street address.
    pub formatted_address: String,
    /// Requested pipeline mode.
    pub mode: EnrichmentMode,
    /// Optional user-entered values for conflict checking.
    #[serde(default)]
    pub user_values: Option<UserValues>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Reduced record subset returned for geocode-only requests.
pub struct RecordSummary {
    /// County name.
    pub county: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// State abbreviation.
    pub state: Option<String>,
    /// ZIP code.
    pub zip: Option<String>,
    /// Appraisal neighborhood code.
    pub neighborhood: Option<String>,
    /// Assessor parcel identifier.
    pub parcel_id: Option<String>,
    /// Lot size in acres.
    pub lot_size_acres: Option<f64>,
    /// Zoning code.
    pub zoning_code: Option<String>,
    /// Owner of record.
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
/// Payload variant of an [`EnrichmentResponse`].
pub enum ResponseData {
    /// Full canonical record, for full-mode runs.
    Full(Box<CanonicalEnrichmentRecord>),
    /// Reduced subset, for geocode-only runs.
    Summary(RecordSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Result returned to the calling layer. Always produced, even for failed
/// runs, so auto-fill can degrade gracefully instead of blocking.
pub struct EnrichmentResponse {
    /// False only when a required domain could not be resolved.
    pub success: bool,
    /// Resolved data.
    pub data: ResponseData,
    /// Merged degradation markers from the run.
    pub data_flags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(distance: Option<f64>) -> FeatureCandidate {
        FeatureCandidate {
            geometry: None,
            properties: Map::new(),
            distance_from_subject_ft: distance,
        }
    }

    #[test]
    fn nearest_candidate_is_deterministic_on_ties() {
        let mut first = candidate(Some(100.0));
        first
            .properties
            .insert("tag".into(), Value::String("first".into()));
        let mut second = candidate(Some(100.0));
        second
            .properties
            .insert("tag".into(), Value::String("second".into()));

        let list = vec![first, second];
        for _ in 0..3 {
            let picked = nearest_candidate(&list).unwrap();
            assert_eq!(picked.text("tag").as_deref(), Some("first"));
        }
    }

    #[test]
    fn nearest_candidate_skips_missing_distance() {
        let list = vec![candidate(None), candidate(Some(50.0))];
        let picked = nearest_candidate(&list).unwrap();
        assert_eq!(picked.distance_from_subject_ft, Some(50.0));
    }

    #[test]
    fn state_machine_only_moves_forward() {
        let identity = PropertyIdentity {
            position: crate::geometry::LatLng::new(29.7, -95.3).unwrap(),
            formatted_address: "123 Main St".into(),
            parcel_id: None,
        };
        let mut record = CanonicalEnrichmentRecord::new("app-1".into(), identity);
        assert_eq!(record.enrichment_status, EnrichmentStatus::Pending);

        // Freezing before the run starts does nothing.
        record.freeze(EnrichmentStatus::Completed);
        assert_eq!(record.enrichment_status, EnrichmentStatus::Pending);

        record.begin_enrichment();
        assert_eq!(record.enrichment_status, EnrichmentStatus::Enriching);

        record.freeze(EnrichmentStatus::Partial);
        assert_eq!(record.enrichment_status, EnrichmentStatus::Partial);

        // Terminal states are never overwritten.
        record.freeze(EnrichmentStatus::Completed);
        assert_eq!(record.enrichment_status, EnrichmentStatus::Partial);
    }

    #[test]
    fn apply_merges_flags_and_attribution() {
        let identity = PropertyIdentity {
            position: crate::geometry::LatLng::new(29.7, -95.3).unwrap(),
            formatted_address: "123 Main St".into(),
            parcel_id: None,
        };
        let mut record = CanonicalEnrichmentRecord::new("app-1".into(), identity);

        let mut result = DomainResult::new(DomainFields::Traffic(TrafficFields {
            aadt: Some(12_000),
            ..TrafficFields::default()
        }));
        result.flag("no_roadway_inventory");
        result.attribute(
            "traffic_aadt",
            SourceStamp {
                source: "txdot_aadt".into(),
                retrieved_at: Utc::now(),
                version: None,
            },
        );
        record.apply(result);

        assert_eq!(record.traffic.as_ref().unwrap().aadt, Some(12_000));
        assert!(record.data_flags.contains("no_roadway_inventory"));
        assert!(record.source_attribution.contains_key("traffic_aadt"));
        assert!(record.domain_populated(Domain::Traffic));
        assert!(!record.domain_populated(Domain::Flood));
    }

    #[test]
    fn source_adapter_warnings_are_owned_by_their_domain() {
        assert!(Domain::Traffic.owns_flag("txdot_aadt_unreachable"));
        assert!(Domain::Traffic.owns_flag("txdot_roadway_inventory_timeout"));
        assert!(Domain::Flood.owns_flag("fema_nfhl_unreachable"));
        assert!(Domain::Utilities.owns_flag("coh_water_unreachable"));
        assert!(Domain::Environmental.owns_flag("usfws_wetlands_unreachable"));
        assert!(Domain::Environmental.owns_flag("epa_facilities_timeout"));

        // The county catalog serves two domains; its warnings must not
        // cross-attribute.
        assert!(Domain::Parcel.owns_flag("county_parcels_harris_unreachable"));
        assert!(!Domain::Zoning.owns_flag("county_parcels_harris_unreachable"));
        assert!(Domain::Zoning.owns_flag("county_zoning_galveston_unreachable"));
        assert!(!Domain::Parcel.owns_flag("county_zoning_galveston_unreachable"));
    }

    #[test]
    fn verdict_fails_on_critical_kill_factor() {
        let score = FeasibilityScore {
            overall_score: 92.0,
            band: Band::B,
            factors: BTreeMap::new(),
            kill_factors: vec![KillFactor {
                code: "FLOOD_FLOODWAY".into(),
                severity: Severity::Critical,
                title: "Within Regulatory Floodway".into(),
                description: "No development permitted in floodway.".into(),
            }],
        };
        assert_eq!(score.verdict(), Verdict::Fail);
    }
}
