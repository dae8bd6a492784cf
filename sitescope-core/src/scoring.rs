//! Composite feasibility scoring.
//!
//! Each domain contributes a 0-100 sub-score with a fixed weight; the
//! overall score is the weighted sum clamped to [0, 100]. Kill factors are
//! detected independently of the numeric score and can override the
//! presented verdict. The score is always recomputed in full from the
//! record, never incrementally patched, so it can never go stale against a
//! changed domain output.

use std::collections::BTreeMap;

use crate::model::{
    Band, CanonicalEnrichmentRecord, Confidence, Domain, FactorScore, FeasibilityScore,
    KillFactor, Severity,
};

/// Neutral sub-score used when a domain produced no data.
const NEUTRAL_SCORE: f64 = 50.0;

/// Weights and thresholds injected into the scoring engine. Overridable
/// per jurisdiction without touching the scoring logic.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Per-domain weights; should sum to 1.0.
    pub weights: BTreeMap<Domain, f64>,
    /// Max distance to a utility main before the no-utilities kill factor
    /// triggers, in feet.
    pub utilities_kill_distance_ft: f64,
    /// Max distance to a superfund facility before its kill factor
    /// triggers, in feet.
    pub superfund_kill_distance_ft: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (Domain::Flood, 0.25),
            (Domain::Utilities, 0.20),
            (Domain::Traffic, 0.15),
            (Domain::Zoning, 0.15),
            (Domain::Environmental, 0.15),
            (Domain::Parcel, 0.10),
        ]);
        Self {
            weights,
            utilities_kill_distance_ft: 2_000.0,
            superfund_kill_distance_ft: 5_280.0,
        }
    }
}

/// Compute the composite score for a settled record.
#[must_use]
pub fn score(record: &CanonicalEnrichmentRecord, config: &ScoringConfig) -> FeasibilityScore {
    let kill_factors = detect_kill_factors(record, config);

    let mut factors = BTreeMap::new();
    let mut overall = 0.0;
    for (&domain, &weight) in &config.weights {
        let sub_score = domain_score(record, domain);
        overall += sub_score * weight;
        factors.insert(
            domain,
            FactorScore {
                score: sub_score,
                weight,
                confidence: factor_confidence(record, domain),
            },
        );
    }
    let overall_score = overall.clamp(0.0, 100.0);

    FeasibilityScore {
        overall_score,
        band: band_for(overall_score, &kill_factors),
        factors,
        kill_factors,
    }
}

/// An A band requires both a high score and a clean kill-factor slate.
fn band_for(overall: f64, kill_factors: &[KillFactor]) -> Band {
    if overall >= 75.0 && kill_factors.is_empty() {
        Band::A
    } else if overall >= 50.0 {
        Band::B
    } else if overall >= 25.0 {
        Band::C
    } else {
        Band::D
    }
}

fn domain_score(record: &CanonicalEnrichmentRecord, domain: Domain) -> f64 {
    match domain {
        Domain::Flood => score_flood(record),
        Domain::Traffic => score_traffic(record),
        Domain::Zoning => score_zoning(record),
        Domain::Utilities => score_utilities(record),
        Domain::Environmental => score_environmental(record),
        Domain::Parcel => score_parcel(record),
    }
}

fn score_flood(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(zone) = record.flood.as_ref().and_then(|f| f.zone.as_deref()) else {
        return NEUTRAL_SCORE;
    };
    if record
        .flood
        .as_ref()
        .is_some_and(|f| f.floodway == Some(true))
    {
        return 10.0;
    }
    match zone.to_uppercase().as_str() {
        "X" | "X500" => 100.0,
        "AE" => 40.0,
        "A" | "AO" | "AH" => 35.0,
        "VE" | "V" => 10.0,
        _ => NEUTRAL_SCORE,
    }
}

fn score_traffic(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(aadt) = record.traffic.as_ref().and_then(|t| t.aadt) else {
        return NEUTRAL_SCORE;
    };
    let aadt = f64::from(aadt);
    if aadt >= 50_000.0 {
        100.0
    } else if aadt >= 30_000.0 {
        90.0
    } else if aadt >= 20_000.0 {
        80.0
    } else if aadt >= 10_000.0 {
        70.0
    } else if aadt >= 5_000.0 {
        60.0
    } else {
        40.0 + (aadt / 250.0).min(20.0)
    }
}

fn score_zoning(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(code) = record.zoning.as_ref().and_then(|z| z.code.as_deref()) else {
        return NEUTRAL_SCORE;
    };
    let code = code.to_uppercase();
    if code.contains("C-") || code.contains("COMMERCIAL") || code.contains("MU") {
        100.0
    } else if code.contains("I-") || code.contains("INDUSTRIAL") {
        90.0
    } else if code.contains("R-") || code.contains("RESIDENTIAL") {
        50.0
    } else if code.contains("AG") || code.contains("AGRICULTURAL") {
        30.0
    } else {
        60.0
    }
}

fn score_utilities(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(utilities) = record.utilities.as_ref() else {
        return NEUTRAL_SCORE;
    };
    // Missing mains count as far away rather than unknown: the layer was
    // queried and came back without a line nearby.
    let water = utilities
        .water
        .as_ref()
        .and_then(|line| line.distance_ft)
        .unwrap_or(5_000.0);
    let sewer = utilities
        .sewer
        .as_ref()
        .and_then(|line| line.distance_ft)
        .unwrap_or(5_000.0);
    let average = (water + sewer) / 2.0;
    if average <= 150.0 {
        100.0
    } else if average <= 300.0 {
        90.0
    } else if average <= 500.0 {
        80.0
    } else if average <= 1_000.0 {
        60.0
    } else if average <= 2_000.0 {
        40.0
    } else {
        20.0
    }
}

fn score_environmental(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(env) = record.environmental.as_ref() else {
        return NEUTRAL_SCORE;
    };
    let mut value: f64 = 100.0;
    if let Some(distance) = env.wetland_distance_ft {
        if distance < 100.0 {
            value -= 40.0;
        } else if distance < 500.0 {
            value -= 15.0;
        }
    }
    if let Some(kind) = env.facility_type.as_deref() {
        let kind = kind.to_lowercase();
        if kind.contains("superfund") || kind.contains("npl") {
            value -= 30.0;
        } else if env.facility_distance_ft.is_some_and(|d| d < 5_280.0) {
            value -= 10.0;
        }
    }
    value.max(0.0)
}

fn score_parcel(record: &CanonicalEnrichmentRecord) -> f64 {
    let Some(parcel) = record.parcel.as_ref() else {
        return NEUTRAL_SCORE;
    };
    let populated = [
        parcel.parcel_id.is_some(),
        parcel.owner.is_some(),
        parcel.lot_size_acres.is_some(),
        parcel.legal_description.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();
    #[allow(clippy::cast_precision_loss, reason = "count is at most 4")]
    let bonus = populated as f64 * 15.0;
    (40.0 + bonus).min(100.0)
}

/// Confidence in one factor's underlying data: high for clean authoritative
/// data, medium when the domain flagged degradation, low when the neutral
/// default stood in.
fn factor_confidence(record: &CanonicalEnrichmentRecord, domain: Domain) -> Confidence {
    if !record.domain_populated(domain) {
        return Confidence::Low;
    }
    let degraded = record
        .data_flags
        .iter()
        .any(|flag| domain.owns_flag(flag));
    if degraded {
        Confidence::Medium
    } else {
        Confidence::High
    }
}

fn detect_kill_factors(
    record: &CanonicalEnrichmentRecord,
    config: &ScoringConfig,
) -> Vec<KillFactor> {
    let mut detected = Vec::new();

    if let Some(flood) = record.flood.as_ref() {
        if flood.floodway == Some(true) {
            detected.push(KillFactor {
                code: "FLOOD_FLOODWAY".into(),
                severity: Severity::Critical,
                title: "Within Regulatory Floodway".into(),
                description: "No development permitted in floodway.".into(),
            });
        }
        if matches!(
            flood.zone.as_deref().map(str::to_uppercase).as_deref(),
            Some("VE" | "V")
        ) {
            detected.push(KillFactor {
                code: "FLOOD_VE".into(),
                severity: Severity::Critical,
                title: "Coastal High Hazard Zone".into(),
                description: "Property in VE flood zone with wave action risk.".into(),
            });
        }
    }

    if let Some(env) = record.environmental.as_ref()
        && let Some(kind) = env.facility_type.as_deref()
    {
        let kind = kind.to_lowercase();
        let close_enough = env
            .facility_distance_ft
            .is_none_or(|d| d <= config.superfund_kill_distance_ft);
        if (kind.contains("superfund") || kind.contains("npl")) && close_enough {
            detected.push(KillFactor {
                code: "EPA_SUPERFUND".into(),
                severity: Severity::Critical,
                title: "Superfund Site Proximity".into(),
                description: "Property on or adjacent to an EPA Superfund site.".into(),
            });
        }
    }

    // Only raised when the utilities layer was actually resolved; an absent
    // group means the domain failed, which is not evidence of absence.
    if let Some(utilities) = record.utilities.as_ref() {
        let reachable = utilities
            .nearest_distance_ft()
            .is_some_and(|d| d <= config.utilities_kill_distance_ft);
        if !reachable {
            detected.push(KillFactor {
                code: "NO_UTILITIES".into(),
                severity: Severity::Warning,
                title: "No Utilities Nearby".into(),
                description: "No water, sanitary, or storm main within reach; extension costs may be prohibitive.".into(),
            });
        }
    }

    detected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;
    use crate::model::{
        EnvironmentalFields, FloodFields, ParcelFields, PropertyIdentity, TrafficFields,
        UtilityFields, UtilityLine, Verdict, ZoningFields,
    };

    fn base_record() -> CanonicalEnrichmentRecord {
        let identity = PropertyIdentity {
            position: LatLng::new(29.7, -95.3).unwrap(),
            formatted_address: "123 Main St".into(),
            parcel_id: None,
        };
        CanonicalEnrichmentRecord::new("app-1".into(), identity)
    }

    fn line(distance: f64) -> Option<UtilityLine> {
        Some(UtilityLine {
            diameter: Some("8".into()),
            material: Some("PVC".into()),
            distance_ft: Some(distance),
        })
    }

    #[test]
    fn empty_record_scores_neutral_everywhere() {
        let result = score(&base_record(), &ScoringConfig::default());
        assert!((result.overall_score - 50.0).abs() < 1e-9);
        assert_eq!(result.band, Band::B);
        assert!(result.kill_factors.is_empty());
        for factor in result.factors.values() {
            assert_eq!(factor.confidence, Confidence::Low);
        }
    }

    #[test]
    fn floodway_forces_fail_verdict_despite_good_score() {
        let mut record = base_record();
        record.flood = Some(FloodFields {
            zone: Some("AE".into()),
            static_bfe_ft: None,
            floodway: Some(true),
        });
        record.zoning = Some(ZoningFields {
            code: Some("C-2".into()),
            ..ZoningFields::default()
        });
        record.utilities = Some(UtilityFields {
            water: line(100.0),
            sewer: line(120.0),
            storm: None,
        });
        record.traffic = Some(TrafficFields {
            aadt: Some(60_000),
            ..TrafficFields::default()
        });

        let result = score(&record, &ScoringConfig::default());
        let codes: Vec<_> = result.kill_factors.iter().map(|k| k.code.as_str()).collect();
        assert!(codes.contains(&"FLOOD_FLOODWAY"));
        assert_eq!(result.verdict(), Verdict::Fail);
        assert_ne!(result.band, Band::A);
    }

    #[test]
    fn band_a_requires_clean_kill_slate() {
        let mut record = base_record();
        record.flood = Some(FloodFields {
            zone: Some("X".into()),
            static_bfe_ft: None,
            floodway: Some(false),
        });
        record.zoning = Some(ZoningFields {
            code: Some("C-2".into()),
            ..ZoningFields::default()
        });
        record.utilities = Some(UtilityFields {
            water: line(100.0),
            sewer: line(120.0),
            storm: line(200.0),
        });
        record.traffic = Some(TrafficFields {
            aadt: Some(60_000),
            ..TrafficFields::default()
        });
        record.environmental = Some(EnvironmentalFields::default());
        record.parcel = Some(ParcelFields {
            parcel_id: Some("0660640130020".into()),
            owner: Some("ACME HOLDINGS".into()),
            lot_size_acres: Some(2.1),
            legal_description: Some("LT 2 BLK 1".into()),
            ..ParcelFields::default()
        });

        let result = score(&record, &ScoringConfig::default());
        assert!(result.overall_score >= 75.0);
        assert_eq!(result.band, Band::A);
        assert_eq!(result.verdict(), Verdict::Proceed);
    }

    #[test]
    fn distant_utilities_raise_warning_kill_factor() {
        let mut record = base_record();
        record.utilities = Some(UtilityFields {
            water: line(3_500.0),
            sewer: None,
            storm: None,
        });
        let result = score(&record, &ScoringConfig::default());
        let codes: Vec<_> = result.kill_factors.iter().map(|k| k.code.as_str()).collect();
        assert!(codes.contains(&"NO_UTILITIES"));
        assert_eq!(result.verdict(), Verdict::Caution);
    }

    #[test]
    fn degradation_flags_lower_factor_confidence_to_medium() {
        let mut record = base_record();
        record.traffic = Some(TrafficFields {
            aadt: Some(12_000),
            ..TrafficFields::default()
        });
        record.add_flag("no_roadway_inventory");
        let result = score(&record, &ScoringConfig::default());
        let factor = result.factors.get(&Domain::Traffic).unwrap();
        assert_eq!(factor.confidence, Confidence::Medium);
    }

    #[test]
    fn adapter_warning_flag_lowers_factor_confidence_to_medium() {
        let mut record = base_record();
        record.utilities = Some(UtilityFields {
            water: line(100.0),
            sewer: line(120.0),
            storm: None,
        });
        record.add_flag("coh_storm_unreachable");
        let result = score(&record, &ScoringConfig::default());
        let factor = result.factors.get(&Domain::Utilities).unwrap();
        assert_eq!(factor.confidence, Confidence::Medium);
    }

    #[test]
    fn superfund_facility_is_critical() {
        let mut record = base_record();
        record.environmental = Some(EnvironmentalFields {
            facility_name: Some("OLD SMELTER".into()),
            facility_type: Some("Superfund NPL".into()),
            facility_distance_ft: Some(2_000.0),
            ..EnvironmentalFields::default()
        });
        let result = score(&record, &ScoringConfig::default());
        let codes: Vec<_> = result.kill_factors.iter().map(|k| k.code.as_str()).collect();
        assert!(codes.contains(&"EPA_SUPERFUND"));
    }
}
