//! Distance, centroid, and buffer math shared by all enrichers.
//!
//! Everything here is pure and offline. Distances are in feet because every
//! upstream roadway and utility dataset publishes proximity thresholds in
//! feet; degree conversions use a fixed Texas-latitude constant and are only
//! valid at the scale of a single query buffer.

use serde::{Deserialize, Serialize};

/// Earth radius in feet, matching the constant used by the historical
/// scoring pipeline. Changing it would shift every persisted distance.
const EARTH_RADIUS_FT: f64 = 20_902_231.0;

/// Approximate feet per degree of latitude/longitude at Texas latitudes.
const FT_PER_DEGREE: f64 = 364_000.0;

#[derive(thiserror::Error, Debug)]
/// Errors raised for invalid geometric input.
pub enum GeometryError {
    /// Latitude/longitude was NaN or outside the valid range.
    #[error("Invalid coordinates: lat={lat}, lng={lng}")]
    InvalidGeometry {
        /// Offending latitude.
        lat: f64,
        /// Offending longitude.
        lng: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// A validated geographic point.
pub struct LatLng {
    lat: f64,
    lng: f64,
}

impl LatLng {
    /// Construct a point, rejecting NaN and out-of-range coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeometry`] when either coordinate is
    /// NaN or outside `[-90, 90]` / `[-180, 180]`.
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeometryError> {
        let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
        let lng_ok = lng.is_finite() && (-180.0..=180.0).contains(&lng);
        if lat_ok && lng_ok {
            Ok(Self { lat, lng })
        } else {
            Err(GeometryError::InvalidGeometry { lat, lng })
        }
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// GeoJSON geometry as returned by provider feature services.
///
/// Only the variants the enrichers consume are modeled; anything else fails
/// candidate projection and the feature is skipped rather than erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// Single position, `[lng, lat]`.
    Point([f64; 2]),
    /// Sequence of positions.
    LineString(Vec<[f64; 2]>),
    /// Multiple position sequences.
    MultiLineString(Vec<Vec<[f64; 2]>>),
    /// Exterior ring plus holes.
    Polygon(Vec<Vec<[f64; 2]>>),
    /// Multiple polygons.
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

impl Geometry {
    /// Representative point used for proximity ranking.
    ///
    /// A Point is its own centroid. Line geometries use the midpoint vertex
    /// (the historical approximation; a true geometric centroid would change
    /// nearest-feature selection near long curved segments, so it is kept).
    /// Polygons have no centroid here and return `None`.
    #[must_use]
    pub fn centroid(&self) -> Option<LatLng> {
        let position = match self {
            Geometry::Point(pos) => Some(*pos),
            Geometry::LineString(coords) => coords.get(coords.len() / 2).copied(),
            Geometry::MultiLineString(lines) => lines
                .first()
                .and_then(|line| line.get(line.len() / 2))
                .copied(),
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => None,
        };
        position.and_then(|[lng, lat]| LatLng::new(lat, lng).ok())
    }

    /// Iterate over every vertex of the geometry as `[lng, lat]` pairs.
    fn vertices(&self) -> Vec<[f64; 2]> {
        match self {
            Geometry::Point(pos) => vec![*pos],
            Geometry::LineString(coords) => coords.clone(),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon(polys) => {
                polys.iter().flatten().flatten().copied().collect()
            }
        }
    }
}

/// Great-circle distance between two points in feet.
#[must_use]
pub fn haversine_distance_ft(from: LatLng, to: LatLng) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let half_chord = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let angle = 2.0 * half_chord.sqrt().atan2((1.0 - half_chord).sqrt());
    EARTH_RADIUS_FT * angle
}

/// Convert a foot radius into an approximate degree offset.
///
/// Valid only for building a query envelope around a subject point; not for
/// general geodesy.
#[must_use]
pub fn buffer_degrees(feet: f64) -> f64 {
    feet / FT_PER_DEGREE
}

/// Minimum haversine distance in feet from a point to any vertex of the
/// geometry. Segment interiors are ignored, matching the historical
/// utility-proximity computation. Returns `None` when the geometry has no
/// valid vertices.
#[must_use]
pub fn min_vertex_distance_ft(from: LatLng, geometry: &Geometry) -> Option<f64> {
    geometry
        .vertices()
        .into_iter()
        .filter_map(|[lng, lat]| LatLng::new(lat, lng).ok())
        .map(|vertex| haversine_distance_ft(from, vertex))
        .min_by(f64::total_cmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).unwrap()
    }

    #[test]
    fn distance_to_self_is_zero() {
        let subject = point(29.7604, -95.3698);
        assert!(haversine_distance_ft(subject, subject).abs() < f64::EPSILON);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = point(29.7604, -95.3698);
        let b = point(30.2672, -97.7431);
        let forward = haversine_distance_ft(a, b);
        let back = haversine_distance_ft(b, a);
        assert!((forward - back).abs() < 1e-6);
    }

    #[test]
    fn one_degree_of_latitude_is_roughly_364k_ft() {
        let a = point(29.0, -95.0);
        let b = point(30.0, -95.0);
        let distance = haversine_distance_ft(a, b);
        assert!((distance - 364_000.0).abs() < 4_000.0);
    }

    #[test]
    fn rejects_nan_and_out_of_range() {
        assert!(LatLng::new(f64::NAN, -95.0).is_err());
        assert!(LatLng::new(29.0, f64::NAN).is_err());
        assert!(LatLng::new(91.0, -95.0).is_err());
        assert!(LatLng::new(29.0, -181.0).is_err());
    }

    #[test]
    fn point_centroid_is_itself() {
        let geom = Geometry::Point([-95.3698, 29.7604]);
        let centroid = geom.centroid().unwrap();
        assert!((centroid.lat() - 29.7604).abs() < f64::EPSILON);
        assert!((centroid.lng() - -95.3698).abs() < f64::EPSILON);
    }

    #[test]
    fn linestring_centroid_is_midpoint_vertex() {
        let geom = Geometry::LineString(vec![
            [-95.0, 29.0],
            [-95.1, 29.1],
            [-95.2, 29.2],
            [-95.3, 29.3],
            [-95.4, 29.4],
        ]);
        let centroid = geom.centroid().unwrap();
        assert!((centroid.lng() - -95.2).abs() < f64::EPSILON);
        assert!((centroid.lat() - 29.2).abs() < f64::EPSILON);
    }

    #[test]
    fn multilinestring_uses_first_line() {
        let geom = Geometry::MultiLineString(vec![
            vec![[-95.0, 29.0], [-95.1, 29.1], [-95.2, 29.2]],
            vec![[-96.0, 30.0]],
        ]);
        let centroid = geom.centroid().unwrap();
        assert!((centroid.lng() - -95.1).abs() < f64::EPSILON);
    }

    #[test]
    fn polygon_has_no_centroid() {
        let geom = Geometry::Polygon(vec![vec![
            [-95.0, 29.0],
            [-95.0, 29.1],
            [-95.1, 29.1],
            [-95.0, 29.0],
        ]]);
        assert!(geom.centroid().is_none());
    }

    #[test]
    fn buffer_degrees_matches_texas_constant() {
        assert!((buffer_degrees(364_000.0) - 1.0).abs() < f64::EPSILON);
        assert!((buffer_degrees(2_000.0) - 0.005_494_505_494_505_494).abs() < 1e-12);
    }

    #[test]
    fn min_vertex_distance_picks_closest_vertex() {
        let subject = point(29.0, -95.0);
        let geom = Geometry::LineString(vec![[-95.5, 29.5], [-95.001, 29.001], [-96.0, 30.0]]);
        let nearest = min_vertex_distance_ft(subject, &geom).unwrap();
        let expected = haversine_distance_ft(subject, point(29.001, -95.001));
        assert!((nearest - expected).abs() < 1e-6);
    }

    #[test]
    fn min_vertex_distance_covers_polygon_rings() {
        let subject = point(29.0, -95.0);
        let geom = Geometry::Polygon(vec![vec![
            [-95.01, 29.01],
            [-95.02, 29.02],
            [-95.01, 29.0],
        ]]);
        assert!(min_vertex_distance_ft(subject, &geom).is_some());
    }
}
