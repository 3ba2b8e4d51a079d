// 🗂️ Mapping Store - Human-approved merchant/brand → ticker records
//
// Read by the resolver (approved rows only), written only by the feedback
// loop. Each key holds at most one approved row and at most one pending row;
// a newer approval replaces the older one outright.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::brands::{contains_word, normalize_key};
use crate::db::{self, Event, MAPPING_ENTITY};

// ============================================================================
// MAPPING RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Normalized (lower-cased) merchant or brand name
    pub key: String,
    pub ticker: String,
    pub company_name: String,
    pub category: String,
    pub confidence: f64,

    /// Only approved records take part in resolution
    pub approved: bool,
    pub updated_at: DateTime<Utc>,
}

impl MappingRecord {
    /// New pending record; the key is normalized from the observed name
    pub fn new(
        name: &str,
        ticker: &str,
        company_name: &str,
        category: &str,
        confidence: f64,
    ) -> Self {
        MappingRecord {
            key: normalize_key(name),
            ticker: ticker.trim().to_uppercase(),
            company_name: company_name.trim().to_string(),
            category: category.trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            approved: false,
            updated_at: Utc::now(),
        }
    }

    /// Builder pattern: mark as approved
    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Persistence seam for learned mappings.
///
/// Lookups are idempotent and need no coordination; writes are per-key
/// upserts and rely on the backend's own atomicity.
pub trait MappingStore: Send + Sync {
    /// Approved record for an exact (normalized) key
    fn lookup(&self, key: &str) -> Result<Option<MappingRecord>>;

    /// Approved record whose key appears as whole words in the text;
    /// the longest key wins
    fn find_in_text(&self, text: &str) -> Result<Option<MappingRecord>>;

    /// Pending (unapproved) record for a key
    fn pending(&self, key: &str) -> Result<Option<MappingRecord>>;

    /// Insert or replace the row with the same key and approval state
    fn upsert(&self, record: &MappingRecord, actor: &str) -> Result<()>;

    /// Second-level approval: the pending row becomes the approved row
    fn promote(&self, key: &str, actor: &str) -> Result<Option<MappingRecord>>;

    /// Every row, approved and pending, ordered by key
    fn all(&self) -> Result<Vec<MappingRecord>>;

    /// Store a record as approved (last-approved-wins)
    fn approve(&self, record: MappingRecord, actor: &str) -> Result<MappingRecord> {
        let record = record.approved();
        self.upsert(&record, actor)?;
        Ok(record)
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

const UPSERT_SQL: &str = "INSERT INTO mappings (
        key, approved, ticker, company_name, category, confidence, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT(key, approved) DO UPDATE SET
        ticker = excluded.ticker,
        company_name = excluded.company_name,
        category = excluded.category,
        confidence = excluded.confidence,
        updated_at = excluded.updated_at";

const SELECT_COLUMNS: &str =
    "SELECT key, ticker, company_name, category, confidence, approved, updated_at FROM mappings";

pub struct SqliteMappingStore {
    conn: Mutex<Connection>,
}

impl SqliteMappingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open mapping database: {:?}", path.as_ref()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        db::setup_database(&conn).context("Failed to set up mapping schema")?;
        Ok(SqliteMappingStore {
            conn: Mutex::new(conn),
        })
    }

    /// Audit trail for one key
    pub fn events_for(&self, key: &str) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        db::get_events_for_entity(&conn, MAPPING_ENTITY, &normalize_key(key))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Mapping database lock poisoned"))
    }

    fn select_one(&self, key: &str, approved: bool) -> Result<Option<MappingRecord>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE key = ?1 AND approved = ?2", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![normalize_key(key), approved], row_to_record)
            .optional()?;
        Ok(record)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MappingRecord> {
    let updated_at: String = row.get(6)?;
    Ok(MappingRecord {
        key: row.get(0)?,
        ticker: row.get(1)?,
        company_name: row.get(2)?,
        category: row.get(3)?,
        confidence: row.get(4)?,
        approved: row.get(5)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc),
    })
}

fn write_record(conn: &Connection, record: &MappingRecord) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_SQL,
        params![
            record.key,
            record.approved,
            record.ticker,
            record.company_name,
            record.category,
            record.confidence,
            record.updated_at.to_rfc3339(),
        ],
    )
}

fn mapping_event(event_type: &str, record: &MappingRecord, actor: &str) -> Event {
    Event::new(
        event_type,
        MAPPING_ENTITY,
        &record.key,
        serde_json::json!({
            "ticker": record.ticker,
            "company_name": record.company_name,
            "category": record.category,
            "confidence": record.confidence,
        }),
        actor,
    )
}

impl MappingStore for SqliteMappingStore {
    fn lookup(&self, key: &str) -> Result<Option<MappingRecord>> {
        self.select_one(key, true)
    }

    fn find_in_text(&self, text: &str) -> Result<Option<MappingRecord>> {
        let normalized = normalize_key(text);
        if normalized.is_empty() {
            return Ok(None);
        }

        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE approved = 1 AND instr(?1, key) > 0 ORDER BY length(key) DESC, key ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let candidates = stmt
            .query_map(params![normalized], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(candidates
            .into_iter()
            .find(|record| contains_word(&normalized, &record.key)))
    }

    fn pending(&self, key: &str) -> Result<Option<MappingRecord>> {
        self.select_one(key, false)
    }

    fn upsert(&self, record: &MappingRecord, actor: &str) -> Result<()> {
        if record.key.is_empty() {
            return Err(anyhow!("Refusing to store a mapping with an empty key"));
        }

        let conn = self.conn()?;
        write_record(&conn, record)
            .with_context(|| format!("Failed to upsert mapping '{}'", record.key))?;

        let event_type = if record.approved {
            "mapping_approved"
        } else {
            "mapping_pending"
        };
        db::insert_event(&conn, &mapping_event(event_type, record, actor))?;

        Ok(())
    }

    fn promote(&self, key: &str, actor: &str) -> Result<Option<MappingRecord>> {
        let key = normalize_key(key);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let sql = format!("{} WHERE key = ?1 AND approved = 0", SELECT_COLUMNS);
        let pending = tx
            .query_row(&sql, params![key], row_to_record)
            .optional()?;

        let Some(mut record) = pending else {
            return Ok(None);
        };

        record.approved = true;
        record.updated_at = Utc::now();

        write_record(&tx, &record)?;
        tx.execute(
            "DELETE FROM mappings WHERE key = ?1 AND approved = 0",
            params![key],
        )?;
        db::insert_event(&tx, &mapping_event("mapping_promoted", &record, actor))?;
        tx.commit()?;

        Ok(Some(record))
    }

    fn all(&self) -> Result<Vec<MappingRecord>> {
        let conn = self.conn()?;
        let sql = format!("{} ORDER BY key ASC, approved DESC", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// HashMap-backed store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryMappingStore {
    records: RwLock<HashMap<(String, bool), MappingRecord>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<(String, bool), MappingRecord>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("Mapping store lock poisoned"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<(String, bool), MappingRecord>>> {
        self.records
            .write()
            .map_err(|_| anyhow!("Mapping store lock poisoned"))
    }
}

impl MappingStore for InMemoryMappingStore {
    fn lookup(&self, key: &str) -> Result<Option<MappingRecord>> {
        Ok(self.read()?.get(&(normalize_key(key), true)).cloned())
    }

    fn find_in_text(&self, text: &str) -> Result<Option<MappingRecord>> {
        let normalized = normalize_key(text);
        let records = self.read()?;

        let mut hits: Vec<&MappingRecord> = records
            .values()
            .filter(|record| record.approved && contains_word(&normalized, &record.key))
            .collect();
        hits.sort_by(|a, b| {
            b.key
                .len()
                .cmp(&a.key.len())
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(hits.first().map(|record| (*record).clone()))
    }

    fn pending(&self, key: &str) -> Result<Option<MappingRecord>> {
        Ok(self.read()?.get(&(normalize_key(key), false)).cloned())
    }

    fn upsert(&self, record: &MappingRecord, _actor: &str) -> Result<()> {
        if record.key.is_empty() {
            return Err(anyhow!("Refusing to store a mapping with an empty key"));
        }
        self.write()?
            .insert((record.key.clone(), record.approved), record.clone());
        Ok(())
    }

    fn promote(&self, key: &str, _actor: &str) -> Result<Option<MappingRecord>> {
        let key = normalize_key(key);
        let mut records = self.write()?;

        let Some(mut record) = records.remove(&(key.clone(), false)) else {
            return Ok(None);
        };
        record.approved = true;
        record.updated_at = Utc::now();
        records.insert((key, true), record.clone());

        Ok(Some(record))
    }

    fn all(&self) -> Result<Vec<MappingRecord>> {
        let mut records: Vec<MappingRecord> = self.read()?.values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key).then(b.approved.cmp(&a.approved)));
        Ok(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<Box<dyn MappingStore>> {
        vec![
            Box::new(SqliteMappingStore::open_in_memory().unwrap()),
            Box::new(InMemoryMappingStore::new()),
        ]
    }

    #[test]
    fn test_record_key_is_normalized() {
        let record = MappingRecord::new("  Trader Joe's #552 ", "aldi", "Aldi", "Grocery", 0.9);
        assert_eq!(record.key, "trader joe's");
        assert_eq!(record.ticker, "ALDI");
        assert!(!record.approved);
    }

    #[test]
    fn test_lookup_only_sees_approved() {
        for store in stores() {
            let pending = MappingRecord::new("Blue Bottle", "NSRGY", "Nestle", "Cafe", 0.9);
            store.upsert(&pending, "reviewer").unwrap();

            assert!(store.lookup("blue bottle").unwrap().is_none());
            assert!(store.find_in_text("BLUE BOTTLE COFFEE").unwrap().is_none());
            assert_eq!(store.pending("BLUE BOTTLE").unwrap().unwrap().ticker, "NSRGY");
        }
    }

    #[test]
    fn test_last_approved_wins() {
        for store in stores() {
            store
                .approve(MappingRecord::new("acme", "OLD", "Old Acme", "Misc", 0.95), "a")
                .unwrap();
            store
                .approve(MappingRecord::new("ACME", "NEW", "New Acme", "Misc", 0.85), "b")
                .unwrap();

            let record = store.lookup("acme").unwrap().unwrap();
            assert_eq!(record.ticker, "NEW");
            assert_eq!(record.confidence, 0.85);

            let approved_rows = store
                .all()
                .unwrap()
                .into_iter()
                .filter(|r| r.key == "acme" && r.approved)
                .count();
            assert_eq!(approved_rows, 1);
        }
    }

    #[test]
    fn test_find_in_text_prefers_longest_key() {
        for store in stores() {
            store
                .approve(MappingRecord::new("joe", "JOE", "Joe", "Misc", 0.9), "t")
                .unwrap();
            store
                .approve(MappingRecord::new("trader joe's", "ALDI", "Aldi", "Grocery", 0.9), "t")
                .unwrap();

            let hit = store.find_in_text("TRADER JOE'S #552").unwrap().unwrap();
            assert_eq!(hit.ticker, "ALDI");

            // whole words only
            assert!(store.find_in_text("JOEY'S DINER").unwrap().is_none());
        }
    }

    #[test]
    fn test_promote_pending() {
        for store in stores() {
            store
                .approve(MappingRecord::new("kale chips", "OLD", "Old", "Snacks", 0.9), "t")
                .unwrap();
            store
                .upsert(&MappingRecord::new("kale chips", "BRBR", "BellRing", "Snacks", 0.9), "t")
                .unwrap();

            // still the old approved row
            assert_eq!(store.lookup("kale chips").unwrap().unwrap().ticker, "OLD");

            let promoted = store.promote("KALE CHIPS", "supervisor").unwrap().unwrap();
            assert!(promoted.approved);
            assert_eq!(store.lookup("kale chips").unwrap().unwrap().ticker, "BRBR");
            assert!(store.pending("kale chips").unwrap().is_none());

            assert!(store.promote("kale chips", "supervisor").unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        for store in stores() {
            let record = MappingRecord::new("  #123 ", "X", "X", "X", 0.9);
            assert!(store.upsert(&record, "t").is_err());
        }
    }

    #[test]
    fn test_sqlite_audit_trail() {
        let store = SqliteMappingStore::open_in_memory().unwrap();
        store
            .upsert(&MappingRecord::new("air max", "NKE", "Nike", "Apparel", 0.9), "reviewer")
            .unwrap();
        store.promote("air max", "supervisor").unwrap();

        let events = store.events_for("AIR MAX").unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["mapping_pending", "mapping_promoted"]);
        assert_eq!(events[1].actor, "supervisor");
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        // the directory also holds the -wal/-shm side files
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.db");

        {
            let store = SqliteMappingStore::open(&path).unwrap();
            store
                .approve(MappingRecord::new("yeti", "YETI", "YETI", "Outdoor", 0.9), "t")
                .unwrap();
        }

        let store = SqliteMappingStore::open(&path).unwrap();
        assert_eq!(store.lookup("yeti").unwrap().unwrap().company_name, "YETI");
    }
}
