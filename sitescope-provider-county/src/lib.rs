//! Parcel and zoning provider backed by county CAD and municipal zoning
//! layers.
//!
//! Each county publishes its cadastral data under different field names, so
//! the adapters multiplex over an endpoint catalog and the enrichers
//! normalize through alias lists. The subject point lies in exactly one
//! county, so the first endpoint that returns candidates wins.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use sitescope_core::{
    arcgis::{RetryPolicy, fetch_features},
    geometry::LatLng,
    model::{
        Domain, DomainFields, DomainResult, FeatureCandidate, ParcelFields, PropertyIdentity,
        SourceStamp, ZoningFields,
    },
    plugin::{BufferPolicy, DomainPlugin, SourceBinding},
    ports::{DomainEnricher, QueryOutcome, SourceAdapter, SourceBatch, SourceMeta},
};

/// Source id of the multiplexed parcel layer set.
pub const PARCEL_SOURCE_ID: &str = "county_parcels";
/// Source id of the multiplexed zoning layer set.
pub const ZONING_SOURCE_ID: &str = "county_zoning";

/// Property key carrying the county name injected by the adapter.
const COUNTY_KEY: &str = "__county";

/// One county's layer endpoint and its published field names.
#[derive(Debug, Clone, Copy)]
pub struct LayerEndpoint {
    /// County the layer covers.
    pub county: &'static str,
    /// Query URL of the feature layer.
    pub url: &'static str,
    /// Fields requested from the layer.
    pub out_fields: &'static [&'static str],
}

/// Parcel layers, one per supported county.
pub const PARCEL_ENDPOINTS: &[LayerEndpoint] = &[
    LayerEndpoint {
        county: "Harris",
        url: "https://maps.hcad.org/arcgis/rest/services/Parcels/MapServer/0/query",
        out_fields: &[
            "ACCOUNT",
            "OWNER_NAME",
            "SITE_ADDR",
            "CITY",
            "ZIP",
            "ACREAGE",
            "LEGAL_DSCR",
            "NEIGHBORHOOD_CODE",
        ],
    },
    LayerEndpoint {
        county: "Galveston",
        url: "https://gis.galvestontx.gov/server/rest/services/Cadastral/Parcels/MapServer/0/query",
        out_fields: &[
            "PARCEL_ID",
            "OWNER",
            "SITUS_ADDR",
            "SITUS_CITY",
            "SITUS_ZIP",
            "ACRES",
            "LEGAL",
        ],
    },
];

/// Zoning layers, one per supported jurisdiction.
pub const ZONING_ENDPOINTS: &[LayerEndpoint] = &[
    LayerEndpoint {
        county: "Harris",
        url: "https://gis.houstontx.gov/arcgis/rest/services/Zoning/MapServer/0/query",
        out_fields: &["ZONING", "ZONE_CODE", "OVERLAY"],
    },
    LayerEndpoint {
        county: "Galveston",
        url: "https://gis.galvestontx.gov/server/rest/services/Planning/Zoning/MapServer/0/query",
        out_fields: &["ZONE", "ZONE_DESC", "OVERLAY"],
    },
];

/// Adapter that tries each county layer in catalog order and returns the
/// first non-empty result, tagging candidates with the county they came
/// from.
pub struct CountyLayerAdapter {
    client: Client,
    meta: SourceMeta,
    endpoints: &'static [LayerEndpoint],
    retry: RetryPolicy,
}

impl CountyLayerAdapter {
    /// Adapter over the given endpoint catalog.
    #[must_use]
    pub fn new(client: Client, source_id: &str, name: &str, endpoints: &'static [LayerEndpoint]) -> Self {
        Self {
            client,
            meta: SourceMeta {
                id: source_id.to_owned(),
                name: name.to_owned(),
                version: None,
            },
            endpoints,
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SourceAdapter for CountyLayerAdapter {
    fn meta(&self) -> &SourceMeta {
        &self.meta
    }

    async fn query(&self, center: LatLng, buffer_ft: f64) -> QueryOutcome {
        let mut warnings = Vec::new();
        for endpoint in self.endpoints {
            match fetch_features(
                &self.client,
                endpoint.url,
                endpoint.out_fields,
                center,
                buffer_ft,
                self.retry,
            )
            .await
            {
                Ok(candidates) if !candidates.is_empty() => {
                    debug!(
                        source = %self.meta.id,
                        county = endpoint.county,
                        count = candidates.len(),
                        "county layer resolved"
                    );
                    let tagged = candidates
                        .into_iter()
                        .map(|mut candidate| {
                            candidate
                                .properties
                                .insert(COUNTY_KEY.into(), Value::from(endpoint.county));
                            candidate
                        })
                        .collect();
                    return QueryOutcome {
                        candidates: tagged,
                        warnings,
                    };
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(source = %self.meta.id, county = endpoint.county, %error, "query failed");
                    warnings.push(format!(
                        "{}_{}_unreachable",
                        self.meta.id,
                        endpoint.county.to_lowercase()
                    ));
                }
            }
        }
        QueryOutcome {
            candidates: Vec::new(),
            warnings,
        }
    }
}

const PARCEL_ID_ALIASES: &[&str] = &["PARCEL_ID", "ACCOUNT", "HCAD_NUM", "QuickRefID", "TAX_ID"];
const OWNER_ALIASES: &[&str] = &["OWNER", "OWNER_NAME", "OwnerName", "owner_name_1"];
const SITUS_ALIASES: &[&str] = &["SITUS_ADDR", "SITE_ADDR", "situs", "SITUS"];
const CITY_ALIASES: &[&str] = &["SITUS_CITY", "CITY", "site_city"];
const ZIP_ALIASES: &[&str] = &["SITUS_ZIP", "ZIP", "ZIPCODE", "site_zip"];
const NEIGHBORHOOD_ALIASES: &[&str] = &["NEIGHBORHOOD_CODE", "Neighborhood_Code", "NBHD"];
const LEGAL_ALIASES: &[&str] = &["LEGAL", "LEGAL_DSCR", "Legal_Dscr_1"];
const ACRE_ALIASES: &[&str] = &["ACRES", "ACREAGE", "LANDSIZEAC", "acreage_1"];
const SQFT_ALIASES: &[&str] = &["Total_Land_Area", "LAND_SQFT", "SQ_FT"];

const SQFT_PER_ACRE: f64 = 43_560.0;

/// First candidate that carries any parcel identifier; cadastral polygons
/// have no centroid distance, so selection falls back to catalog order.
fn identified_parcel(candidates: &[FeatureCandidate]) -> Option<&FeatureCandidate> {
    candidates
        .iter()
        .find(|candidate| candidate.text_any(PARCEL_ID_ALIASES).is_some())
        .or_else(|| candidates.first())
}

/// Parcel enricher normalizing cadastral attributes across county catalogs.
pub struct ParcelEnricher;

impl DomainEnricher for ParcelEnricher {
    fn domain(&self) -> Domain {
        Domain::Parcel
    }

    fn enrich(&self, _subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let candidates = SourceBatch::for_source(batches, PARCEL_SOURCE_ID);
        let Some(parcel) = identified_parcel(candidates) else {
            let mut result = DomainResult::new(DomainFields::Parcel(ParcelFields::default()));
            result.flag("parcel_not_found");
            return result;
        };

        let lot_size_acres = parcel.number_any(ACRE_ALIASES).or_else(|| {
            parcel
                .number_any(SQFT_ALIASES)
                .map(|sqft| sqft / SQFT_PER_ACRE)
        });
        let county = parcel.text(COUNTY_KEY);
        let fields = ParcelFields {
            parcel_id: parcel.text_any(PARCEL_ID_ALIASES),
            owner: parcel.text_any(OWNER_ALIASES),
            situs_address: parcel.text_any(SITUS_ALIASES),
            county: county.clone(),
            city: parcel.text_any(CITY_ALIASES),
            state: Some("TX".into()),
            zip: parcel.text_any(ZIP_ALIASES),
            neighborhood: parcel.text_any(NEIGHBORHOOD_ALIASES),
            legal_description: parcel.text_any(LEGAL_ALIASES),
            lot_size_acres: lot_size_acres.filter(|acres| *acres > 0.0),
        };

        let mut result = DomainResult::new(DomainFields::Parcel(fields));
        result.attribute(
            "parcel",
            SourceStamp {
                source: PARCEL_SOURCE_ID.into(),
                retrieved_at: Utc::now(),
                version: county,
            },
        );
        result
    }
}

const ZONE_ALIASES: &[&str] = &["ZONING", "ZONE_CODE", "ZONING_CODE", "ZONE"];
const OVERLAY_ALIASES: &[&str] = &["OVERLAY", "OVERLAY_DIST"];

/// Zoning enricher reading the jurisdiction's zoning polygon.
pub struct ZoningEnricher;

impl DomainEnricher for ZoningEnricher {
    fn domain(&self) -> Domain {
        Domain::Zoning
    }

    fn enrich(&self, _subject: &PropertyIdentity, batches: &[SourceBatch]) -> DomainResult {
        let candidates = SourceBatch::for_source(batches, ZONING_SOURCE_ID);
        let zoned = candidates
            .iter()
            .find(|candidate| candidate.text_any(ZONE_ALIASES).is_some());

        let Some(polygon) = zoned else {
            let mut result = DomainResult::new(DomainFields::Zoning(ZoningFields::default()));
            result.flag("zoning_not_found");
            return result;
        };

        let jurisdiction = polygon.text(COUNTY_KEY);
        let fields = ZoningFields {
            code: polygon.text_any(ZONE_ALIASES),
            overlay_district: polygon.text_any(OVERLAY_ALIASES),
            jurisdiction: jurisdiction.clone(),
        };

        let mut result = DomainResult::new(DomainFields::Zoning(fields));
        result.attribute(
            "zoning_code",
            SourceStamp {
                source: ZONING_SOURCE_ID.into(),
                retrieved_at: Utc::now(),
                version: jurisdiction,
            },
        );
        result
    }
}

/// Build the plugin bundle for the parcel domain. This is the required
/// domain: a run that cannot place the subject on a parcel fails.
#[must_use]
pub fn parcel_plugin(client: Client) -> DomainPlugin {
    DomainPlugin {
        domain: Domain::Parcel,
        required: true,
        sources: vec![SourceBinding {
            adapter: Arc::new(CountyLayerAdapter::new(
                client,
                PARCEL_SOURCE_ID,
                "County CAD parcels",
                PARCEL_ENDPOINTS,
            )),
            buffers: BufferPolicy {
                initial_ft: 50.0,
                expanded_ft: Some(300.0),
            },
        }],
        enricher: Arc::new(ParcelEnricher),
    }
}

/// Build the plugin bundle for the zoning domain.
#[must_use]
pub fn zoning_plugin(client: Client) -> DomainPlugin {
    DomainPlugin {
        domain: Domain::Zoning,
        required: false,
        sources: vec![SourceBinding {
            adapter: Arc::new(CountyLayerAdapter::new(
                client,
                ZONING_SOURCE_ID,
                "Municipal zoning",
                ZONING_ENDPOINTS,
            )),
            buffers: BufferPolicy {
                initial_ft: 50.0,
                expanded_ft: Some(300.0),
            },
        }],
        enricher: Arc::new(ZoningEnricher),
    }
}
