//! Shared query builder, retry policy, and feature projection for ArcGIS
//! feature services.
//!
//! Every provider speaks the same envelope-query dialect, so the request
//! shape, the retry behavior, and the property-bag projection live in one
//! place. Adapters only contribute a URL, a field list, and a source id.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::geometry::{Geometry, LatLng, buffer_degrees, haversine_distance_ft};
use crate::model::FeatureCandidate;
use crate::ports::AdapterError;

/// Explicit retry behavior shared by all adapters.
///
/// One retry on transient failures (5xx, timeout, connect); none on 4xx,
/// which signals a bad query rather than bad luck.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Bounding envelope in geographic coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl Envelope {
    /// Envelope of `buffer_ft` around a subject point.
    #[must_use]
    pub fn around(center: LatLng, buffer_ft: f64) -> Self {
        let offset = buffer_degrees(buffer_ft);
        Self {
            xmin: center.lng() - offset,
            ymin: center.lat() - offset,
            xmax: center.lng() + offset,
            ymax: center.lat() + offset,
        }
    }

    fn to_query_value(self) -> String {
        format!("{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

/// ArcGIS can return an error object with a 200 status; it has to be
/// detected in-band.
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Value>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
    error: Option<ServiceError>,
}

/// Execute an envelope query against a feature service layer and project
/// the response into candidates.
///
/// The projection is schema-tolerant: fields outside `out_fields` that the
/// provider returns anyway are kept in the property bag and ignored by
/// enrichers; unparseable geometries drop to `None` rather than failing the
/// batch. Candidate distance is stamped from the query center at projection
/// time.
///
/// # Errors
///
/// Returns an [`AdapterError`] after retries are exhausted; callers (the
/// adapters) convert this into an empty result plus a warning flag.
pub async fn fetch_features(
    client: &Client,
    url: &str,
    out_fields: &[&str],
    center: LatLng,
    buffer_ft: f64,
    policy: RetryPolicy,
) -> Result<Vec<FeatureCandidate>, AdapterError> {
    let envelope = Envelope::around(center, buffer_ft).to_query_value();
    let fields = out_fields.join(",");

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = client
            .get(url)
            .query(&[
                ("where", "1=1"),
                ("geometry", envelope.as_str()),
                ("geometryType", "esriGeometryEnvelope"),
                ("inSR", "4326"),
                ("outSR", "4326"),
                ("spatialRel", "esriSpatialRelIntersects"),
                ("outFields", fields.as_str()),
                ("returnGeometry", "true"),
                ("f", "geojson"),
            ])
            .send()
            .await;

        let error = match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let collection: FeatureCollection = response
                        .json()
                        .await
                        .map_err(|err| AdapterError::Malformed(err.to_string()))?;
                    if let Some(service_error) = collection.error {
                        return Err(AdapterError::Service(service_error.message));
                    }
                    debug!(url, features = collection.features.len(), "query ok");
                    return Ok(project(collection.features, center));
                }
                AdapterError::Status(status.as_u16())
            }
            Err(err) => AdapterError::Network(err),
        };

        if error.is_transient() && attempt < policy.max_attempts {
            warn!(url, attempt, %error, "transient failure, retrying");
            continue;
        }
        return Err(error);
    }
}

fn project(features: Vec<Feature>, center: LatLng) -> Vec<FeatureCandidate> {
    features
        .into_iter()
        .map(|feature| {
            let geometry = feature
                .geometry
                .and_then(|value| serde_json::from_value::<Geometry>(value).ok());
            let distance_from_subject_ft = geometry
                .as_ref()
                .and_then(Geometry::centroid)
                .map(|centroid| haversine_distance_ft(center, centroid));
            FeatureCandidate {
                geometry,
                properties: feature.properties,
                distance_from_subject_ft,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_centered_on_subject() {
        let center = LatLng::new(29.76, -95.37).unwrap();
        let envelope = Envelope::around(center, 2_000.0);
        let offset = buffer_degrees(2_000.0);
        assert!((envelope.xmin - (-95.37 - offset)).abs() < 1e-12);
        assert!((envelope.xmax - (-95.37 + offset)).abs() < 1e-12);
        assert!((envelope.ymin - (29.76 - offset)).abs() < 1e-12);
        assert!((envelope.ymax - (29.76 + offset)).abs() < 1e-12);
    }

    #[test]
    fn wider_envelope_contains_narrower_one() {
        let center = LatLng::new(29.76, -95.37).unwrap();
        let narrow = Envelope::around(center, 2_000.0);
        let wide = Envelope::around(center, 5_280.0);
        // Containment is what makes the expanded query's candidate set a
        // superset of the narrow one against the same static source.
        assert!(wide.xmin < narrow.xmin);
        assert!(wide.ymin < narrow.ymin);
        assert!(wide.xmax > narrow.xmax);
        assert!(wide.ymax > narrow.ymax);
    }

    #[test]
    fn projection_stamps_distance_and_tolerates_bad_geometry() {
        let center = LatLng::new(29.76, -95.37).unwrap();
        let features = vec![
            Feature {
                geometry: Some(serde_json::json!({
                    "type": "Point",
                    "coordinates": [-95.37, 29.76],
                })),
                properties: Map::new(),
            },
            Feature {
                geometry: Some(serde_json::json!({"type": "Noodle", "coordinates": []})),
                properties: Map::new(),
            },
            Feature {
                geometry: None,
                properties: Map::new(),
            },
        ];

        let candidates = project(features, center);
        assert_eq!(candidates.len(), 3);
        let first = candidates.first().unwrap();
        assert!(first.distance_from_subject_ft.unwrap() < 1.0);
        assert!(candidates.get(1).unwrap().geometry.is_none());
        assert!(candidates.get(2).unwrap().distance_from_subject_ft.is_none());
    }

    #[test]
    fn transient_classification() {
        assert!(AdapterError::Status(503).is_transient());
        assert!(!AdapterError::Status(400).is_transient());
        assert!(!AdapterError::Malformed("bad json".into()).is_transient());
    }
}
