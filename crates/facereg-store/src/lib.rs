//! SQLite-backed store of registered identities, keyed by national ID.
//!
//! Feature vectors are persisted as comma-delimited strings next to a
//! provenance column; the raw registration photo is kept as a BLOB.

use facereg_core::types::{FaceVector, RegisteredIdentity, VectorSource};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("national ID {0} is already registered")]
    DuplicateId(String),
    #[error("national ID {0} is not registered")]
    NotFound(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity persistence over a single SQLite connection.
pub struct IdentityStore {
    conn: Connection,
}

impl IdentityStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        tracing::info!(path = %path.display(), "identity store opened");
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                national_id   TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                surname       TEXT NOT NULL,
                contact       TEXT NOT NULL,
                vector        TEXT,
                vector_source TEXT,
                photo         BLOB,
                created_at    TEXT NOT NULL
            );",
        )
    }

    /// Insert a new identity. The national ID is trimmed before storage and
    /// must be unique; a colliding insert maps to [`StoreError::DuplicateId`].
    pub fn create(&self, identity: &RegisteredIdentity) -> Result<(), StoreError> {
        let national_id = identity.national_id.trim();
        let created_at = if identity.created_at.is_empty() {
            chrono::Utc::now().to_rfc3339()
        } else {
            identity.created_at.clone()
        };

        let result = self.conn.execute(
            "INSERT INTO identities
                (national_id, name, surname, contact, vector, vector_source, photo, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                national_id,
                identity.name,
                identity.surname,
                identity.contact,
                identity.vector.as_ref().map(|v| v.to_delimited()),
                identity.vector.as_ref().map(|v| v.source.as_str()),
                identity.photo,
                created_at,
            ],
        );

        match result {
            Ok(_) => {
                tracing::info!(national_id, "identity registered");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(national_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up one identity by (trimmed) national ID.
    pub fn get(&self, national_id: &str) -> Result<Option<RegisteredIdentity>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT national_id, name, surname, contact, vector, vector_source, photo, created_at
                 FROM identities WHERE national_id = ?1",
                params![national_id.trim()],
                row_to_identity,
            )
            .optional()?;
        Ok(row)
    }

    /// All registered identities, oldest first.
    pub fn list(&self) -> Result<Vec<RegisteredIdentity>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT national_id, name, surname, contact, vector, vector_source, photo, created_at
             FROM identities ORDER BY created_at, national_id",
        )?;
        let rows = stmt.query_map([], row_to_identity)?;
        let mut identities = Vec::new();
        for row in rows {
            identities.push(row?);
        }
        Ok(identities)
    }

    /// Replace the stored vector for an existing identity.
    pub fn update_vector(
        &self,
        national_id: &str,
        vector: &FaceVector,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE identities SET vector = ?2, vector_source = ?3 WHERE national_id = ?1",
            params![national_id.trim(), vector.to_delimited(), vector.source.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(national_id.trim().to_string()));
        }
        Ok(())
    }

    /// Delete one identity; returns whether a record was removed.
    pub fn delete(&self, national_id: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM identities WHERE national_id = ?1", params![national_id.trim()])?;
        Ok(changed > 0)
    }

    /// Remove every identity; returns how many were deleted.
    pub fn clear(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM identities", [])?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// Map a row to an identity. A malformed stored vector degrades to "no
/// vector" with a warning rather than failing the whole query.
fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegisteredIdentity> {
    let national_id: String = row.get(0)?;
    let vector_text: Option<String> = row.get(4)?;
    let vector_source: Option<String> = row.get(5)?;

    let vector = vector_text.and_then(|text| {
        let source = vector_source
            .as_deref()
            .and_then(VectorSource::parse)
            .unwrap_or(VectorSource::Geometric);
        match FaceVector::from_delimited(&text, source) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(national_id = %national_id, error = %e, "stored vector is malformed; ignoring");
                None
            }
        }
    });

    Ok(RegisteredIdentity {
        national_id,
        name: row.get(1)?,
        surname: row.get(2)?,
        contact: row.get(3)?,
        vector,
        photo: row.get(6)?,
        created_at: row.get(7)?,
    })
}
