//! Durable persistence for canonical enrichment records.
//!
//! Records are stored as one JSON document per application id. The stored
//! document additionally carries the flat `aadt_near` and `aadt_road_name`
//! mirror keys that older readers of the table still expect; they are
//! derived from the traffic group at write time and ignored on read.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, params};
use serde_json::Value;
use tracing::debug;

use crate::model::CanonicalEnrichmentRecord;
use crate::ports::{RecordStore, StoreError};

/// SQLite-backed record store.
///
/// A single connection behind a mutex is plenty here: the store sees one
/// write per enrichment run and occasional point reads.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (and migrate) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the database cannot be opened or the
    /// schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory store, used by tests.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                application_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Serialize a record to its stored document, injecting the legacy flat
/// mirror keys derived from the traffic group.
fn to_stored_document(record: &CanonicalEnrichmentRecord) -> Result<String, StoreError> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(document) = &mut value
        && let Some(traffic) = record.traffic.as_ref()
    {
        if let Some(aadt) = traffic.aadt {
            document.insert("aadt_near".into(), Value::from(aadt));
        }
        if let Some(road_name) = traffic.road_name.as_deref() {
            document.insert("aadt_road_name".into(), Value::from(road_name));
        }
    }
    Ok(serde_json::to_string(&value)?)
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save(&self, record: &CanonicalEnrichmentRecord) -> Result<(), StoreError> {
        let document = to_stored_document(record)?;
        let updated_at = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO records (application_id, document, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(application_id) DO UPDATE SET
                 document = excluded.document,
                 updated_at = excluded.updated_at",
            params![record.application_id, document, updated_at],
        )?;
        debug!(application_id = %record.application_id, "record saved");
        Ok(())
    }

    async fn load(
        &self,
        application_id: &str,
    ) -> Result<Option<CanonicalEnrichmentRecord>, StoreError> {
        let document: Option<String> = {
            let conn = self.conn();
            let mut statement =
                conn.prepare("SELECT document FROM records WHERE application_id = ?1")?;
            let mut rows = statement.query(params![application_id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        document
            .map(|doc| serde_json::from_str(&doc).map_err(StoreError::from))
            .transpose()
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, CanonicalEnrichmentRecord>>,
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: &CanonicalEnrichmentRecord) -> Result<(), StoreError> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert(record.application_id.clone(), record.clone());
        Ok(())
    }

    async fn load(
        &self,
        application_id: &str,
    ) -> Result<Option<CanonicalEnrichmentRecord>, StoreError> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.get(application_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::geometry::LatLng;
    use crate::model::{
        EnrichmentStatus, PropertyIdentity, SourceStamp, TrafficFields,
    };

    fn sample_record() -> CanonicalEnrichmentRecord {
        let identity = PropertyIdentity {
            position: LatLng::new(29.76, -95.37).unwrap(),
            formatted_address: "123 Main St, Houston, TX".into(),
            parcel_id: None,
        };
        let mut record = CanonicalEnrichmentRecord::new("app-42".into(), identity);
        record.begin_enrichment();
        record.traffic = Some(TrafficFields {
            aadt: Some(38_500),
            road_name: Some("IH0045".into()),
            distance_ft: Some(410.0),
            ..TrafficFields::default()
        });
        record.add_flag("flood_no_data");
        record.source_attribution.insert(
            "traffic_aadt".into(),
            SourceStamp {
                source: "txdot_aadt".into(),
                retrieved_at: Utc::now(),
                version: Some("2023".into()),
            },
        );
        record.freeze(EnrichmentStatus::Partial);
        record
    }

    #[tokio::test]
    async fn round_trips_a_record_including_attribution() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let record = sample_record();

        store.save(&record).await.unwrap();
        let loaded = store.load("app-42").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        let mut record = sample_record();
        store.save(&record).await.unwrap();

        record.add_flag("utilities_no_storm");
        store.save(&record).await.unwrap();

        let loaded = store.load("app-42").await.unwrap().unwrap();
        assert!(loaded.data_flags.contains("utilities_no_storm"));
    }

    #[tokio::test]
    async fn stored_document_carries_legacy_traffic_mirrors() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        store.save(&sample_record()).await.unwrap();

        let document: String = {
            let conn = store.conn();
            conn.query_row(
                "SELECT document FROM records WHERE application_id = 'app-42'",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        let value: Value = serde_json::from_str(&document).unwrap();
        assert_eq!(value.get("aadt_near"), Some(&Value::from(38_500)));
        assert_eq!(value.get("aadt_road_name"), Some(&Value::from("IH0045")));
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        let store = SqliteRecordStore::open(&path).unwrap();
        store.save(&sample_record()).await.unwrap();
        drop(store);

        let reopened = SqliteRecordStore::open(&path).unwrap();
        let loaded = reopened.load("app-42").await.unwrap().unwrap();
        assert_eq!(loaded.traffic.unwrap().aadt, Some(38_500));
    }
}
