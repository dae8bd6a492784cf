//! Core types and service wiring for the sitescope feasibility enrichment
//! engine.

/// Envelope queries, retries, and feature projection for ArcGIS services.
pub mod arcgis;
/// Comparison of user-entered values against authoritative sources.
pub mod conflict;
/// Coordinates, distances, and GeoJSON geometry helpers.
pub mod geometry;
/// Canonical record and the domain data structures it aggregates.
pub mod model;
/// Registry and helpers for plugging domain providers into the service.
pub mod plugin;
/// Traits describing the adapter, enricher, and store interfaces.
pub mod ports;
/// Composite feasibility scoring and kill-factor detection.
pub mod scoring;
/// High-level enrichment facade used by clients.
pub mod service;
/// Durable persistence for canonical records.
pub mod store;

pub use geometry::*;
pub use model::*;
pub use plugin::*;
pub use ports::*;
pub use service::*;
pub use store::*;
