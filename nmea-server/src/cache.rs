//! SQLite contact cache: one table holding the last saved snapshot.
//!
//! Implements `CacheStore` so the contact database can survive restarts.
//! Each save replaces the whole snapshot inside one transaction.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Result as SqlResult};
use tracing::warn;

use nmea_core::contact_db::CacheStore;
use nmea_core::types::{Contact, ContactSource, NmeaError, ShipStatic};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    label TEXT PRIMARY KEY,
    name TEXT,
    mmsi INTEGER,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    heading_deg REAL,
    cog_deg REAL,
    sog_kts REAL,
    ship TEXT,
    source TEXT NOT NULL,
    first_seen REAL NOT NULL,
    last_update REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contacts_last_update ON contacts(last_update);
"#;

/// SQLite-backed snapshot store.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open or create a cache database at the given path.
    pub fn open(path: &str) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteCache {
            conn: Mutex::new(conn),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        Self::open(":memory:")
    }

    pub fn count(&self) -> i64 {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM contacts", [], |r| r.get(0))
            .unwrap_or(0)
    }

    fn write_snapshot(&self, contacts: &[Contact]) -> SqlResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM contacts", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO contacts (label, name, mmsi, lat, lon, heading_deg, cog_deg, sog_kts, ship, source, first_seen, last_update)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for c in contacts {
                let ship = c
                    .ship
                    .as_ref()
                    .and_then(|s| serde_json::to_string(s).ok());
                stmt.execute(params![
                    c.label,
                    c.name,
                    c.mmsi,
                    c.lat,
                    c.lon,
                    c.heading_deg,
                    c.cog_deg,
                    c.sog_kts,
                    ship,
                    c.source.as_str(),
                    c.first_seen,
                    c.last_update,
                ])?;
            }
        }
        tx.commit()
    }

    fn read_snapshot(&self) -> SqlResult<Vec<Contact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT label, name, mmsi, lat, lon, heading_deg, cog_deg, sog_kts, ship, source, first_seen, last_update
             FROM contacts ORDER BY last_update DESC",
        )?;

        let rows = stmt.query_map([], |r| {
            let label: String = r.get(0)?;
            let ship: Option<String> = r.get(8)?;
            let source: String = r.get(9)?;
            Ok(Contact {
                name: r.get(1)?,
                mmsi: r.get(2)?,
                lat: r.get(3)?,
                lon: r.get(4)?,
                heading_deg: r.get(5)?,
                cog_deg: r.get(6)?,
                sog_kts: r.get(7)?,
                ship: ship.and_then(|s| match serde_json::from_str::<ShipStatic>(&s) {
                    Ok(ship) => Some(ship),
                    Err(e) => {
                        warn!(label = %label, error = %e, "dropping unreadable ship data from cache");
                        None
                    }
                }),
                source: ContactSource::parse(&source).unwrap_or_else(|| {
                    warn!(label = %label, source = %source, "unknown source in cache, assuming ais");
                    ContactSource::Ais
                }),
                first_seen: r.get(10)?,
                last_update: r.get(11)?,
                label,
            })
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            match row {
                Ok(c) => contacts.push(c),
                Err(e) => warn!(error = %e, "skipping unreadable cached contact"),
            }
        }
        Ok(contacts)
    }
}

impl CacheStore for SqliteCache {
    fn save(&self, contacts: &[Contact]) -> nmea_core::Result<()> {
        self.write_snapshot(contacts)
            .map_err(|e| NmeaError::Cache(e.to_string()))
    }

    fn load(&self) -> nmea_core::Result<Vec<Contact>> {
        self.read_snapshot()
            .map_err(|e| NmeaError::Cache(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
