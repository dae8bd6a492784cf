//! Comparison of user-entered values against authoritative sources.
//!
//! A conflict is only ever raised when both values exist: absence of an
//! authoritative value is not evidence of disagreement.

use crate::model::{CanonicalEnrichmentRecord, Confidence, ConflictFlag, UserValues};

/// Per-field comparison thresholds.
///
/// Continuous fields flag strictly above `continuous_flag_pct` (a 10.0%
/// difference exactly does not flag) and drop to very-low confidence
/// strictly above `continuous_very_low_pct`.
#[derive(Debug, Clone, Copy)]
pub struct ConflictPolicy {
    /// Percent difference above which a continuous field flags.
    pub continuous_flag_pct: f64,
    /// Percent difference above which confidence drops to very low.
    pub continuous_very_low_pct: f64,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            continuous_flag_pct: 10.0,
            continuous_very_low_pct: 25.0,
        }
    }
}

/// Compare user values against the authoritative record.
///
/// Exact-match fields (zoning code, parcel id) flag any mismatch at low
/// confidence. Continuous fields (lot size) flag by percent difference.
#[must_use]
pub fn resolve(
    record: &CanonicalEnrichmentRecord,
    user: &UserValues,
    policy: &ConflictPolicy,
) -> Vec<ConflictFlag> {
    let mut flags = Vec::new();

    if let (Some(user_zoning), Some(auth_zoning)) = (
        user.zoning_code.as_deref(),
        record.zoning.as_ref().and_then(|z| z.code.as_deref()),
    ) && let Some(flag) = exact_mismatch("zoning_code", user_zoning, auth_zoning)
    {
        flags.push(flag);
    }

    if let (Some(user_parcel), Some(auth_parcel)) = (
        user.parcel_id.as_deref(),
        record.parcel.as_ref().and_then(|p| p.parcel_id.as_deref()),
    ) && let Some(flag) = exact_mismatch("parcel_id", user_parcel, auth_parcel)
    {
        flags.push(flag);
    }

    if let (Some(user_acres), Some(auth_acres)) = (
        user.lot_size_acres,
        record.parcel.as_ref().and_then(|p| p.lot_size_acres),
    ) && let Some(flag) = continuous_mismatch("lot_size_acres", user_acres, auth_acres, policy)
    {
        flags.push(flag);
    }

    flags
}

fn exact_mismatch(field: &str, user: &str, authoritative: &str) -> Option<ConflictFlag> {
    let user_norm = user.trim();
    let auth_norm = authoritative.trim();
    if user_norm.eq_ignore_ascii_case(auth_norm) {
        return None;
    }
    Some(ConflictFlag {
        field: field.to_owned(),
        user_value: user_norm.to_owned(),
        authoritative_value: auth_norm.to_owned(),
        percent_difference: None,
        confidence: Confidence::Low,
        message: format!("User entered \"{user_norm}\" but the authoritative source reports \"{auth_norm}\""),
    })
}

fn continuous_mismatch(
    field: &str,
    user: f64,
    authoritative: f64,
    policy: &ConflictPolicy,
) -> Option<ConflictFlag> {
    // A zero or negative authoritative value can't anchor a percent
    // difference; treat it as unusable rather than as disagreement.
    if authoritative <= 0.0 {
        return None;
    }
    // Compare scaled values instead of dividing so that a difference of
    // exactly 10.0% stays on the no-flag side of the exclusive boundary.
    let scaled = (user - authoritative).abs() * 100.0;
    if scaled <= policy.continuous_flag_pct * authoritative {
        return None;
    }
    let percent = scaled / authoritative;
    let confidence = if scaled > policy.continuous_very_low_pct * authoritative {
        Confidence::VeryLow
    } else {
        Confidence::Low
    };
    Some(ConflictFlag {
        field: field.to_owned(),
        user_value: format!("{user}"),
        authoritative_value: format!("{authoritative}"),
        percent_difference: Some(percent),
        confidence,
        message: format!(
            "User value {user} differs from authoritative value {authoritative} by {percent:.1}%"
        ),
    })
}
