// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inventory store: one row per file ever seen in the origin directory

mod record;

pub use record::{new_file_id, FileRecord, FileState};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{DropsortError, Result};

const SELECT_COLUMNS: &str = "SELECT id, name, path, size, last_modified, state, category, \
     not_to_move, created_at, updated_at FROM files";

/// Inventory database (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Inventory statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStats {
    pub file_count: i64,
    pub by_state: Vec<(String, i64)>,
    pub by_category: Vec<(String, i64)>,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DropsortError::Config("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT NOT NULL,
                state TEXT NOT NULL,
                category TEXT,
                not_to_move INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_files_active_name
                ON files(name) WHERE state != 'retired';
            CREATE INDEX IF NOT EXISTS idx_files_state ON files(state);
            CREATE INDEX IF NOT EXISTS idx_files_category ON files(category);
        "#)?;
        Ok(())
    }

    /// Insert a batch of new records in one transaction
    pub fn insert_files(&self, records: &[FileRecord]) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO files (id, name, path, size, last_modified, state, category,
                                      not_to_move, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.name,
                    r.path,
                    r.size as i64,
                    r.last_modified.to_rfc3339(),
                    r.state.name(),
                    r.category(),
                    r.not_to_move,
                    r.created_at.to_rfc3339(),
                    r.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Persist the mutable part of a record
    pub fn update_file(&self, record: &FileRecord) -> Result<()> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            r#"UPDATE files SET path = ?2, size = ?3, last_modified = ?4, state = ?5,
                   category = ?6, not_to_move = ?7, updated_at = ?8
               WHERE id = ?1"#,
            params![
                record.id,
                record.path,
                record.size as i64,
                record.last_modified.to_rfc3339(),
                record.state.name(),
                record.category(),
                record.not_to_move,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(DropsortError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    /// Get a record by id, retired or not
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        conn.query_row(&sql, params![id], row_to_record)
            .optional()
            .map_err(Into::into)
    }

    /// Get a record by id, ignoring retired ones
    pub fn get_active_file(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.get_file(id)?.filter(FileRecord::is_active))
    }

    /// Find the active record for a file name
    pub fn find_active_by_name(&self, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("{} WHERE name = ?1 AND state != 'retired'", SELECT_COLUMNS);
        conn.query_row(&sql, params![name], row_to_record)
            .optional()
            .map_err(Into::into)
    }

    /// List records, newest first, optionally restricted to one state
    pub fn list_files(&self, state: Option<&str>, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock_conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let files = match state {
            Some(state) => {
                let sql = format!(
                    "{} WHERE state = ?1 ORDER BY created_at DESC, name LIMIT ?2",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![state, limit], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("{} ORDER BY created_at DESC, name LIMIT ?1", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(files)
    }

    /// Records that still need a prediction
    pub fn list_unclassified(&self) -> Result<Vec<FileRecord>> {
        self.list_files(Some(FileState::PENDING), usize::MAX)
    }

    /// Set or clear the relocation hold on a record
    pub fn set_not_to_move(&self, id: &str, hold: bool) -> Result<FileRecord> {
        let mut record = self
            .get_active_file(id)?
            .ok_or_else(|| DropsortError::NotFound(id.to_string()))?;
        record.set_hold(hold)?;
        self.update_file(&record)?;
        Ok(record)
    }

    /// Soft-delete a record
    pub fn retire(&self, id: &str) -> Result<FileRecord> {
        let mut record = self
            .get_active_file(id)?
            .ok_or_else(|| DropsortError::NotFound(id.to_string()))?;
        record.retire();
        self.update_file(&record)?;
        Ok(record)
    }

    /// Get inventory statistics
    pub fn get_stats(&self) -> Result<InventoryStats> {
        let conn = self.lock_conn()?;
        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;

        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM files GROUP BY state ORDER BY state")?;
        let by_state = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            r#"SELECT COALESCE(category, 'Uncategorized') AS cat, COUNT(*) AS cnt
               FROM files WHERE state != 'retired' GROUP BY cat ORDER BY cnt DESC, cat"#,
        )?;
        let by_category = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(InventoryStats { file_count, by_state, by_category })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let state_name: String = row.get(5)?;
    let category: Option<String> = row.get(6)?;
    let state = FileState::from_parts(&state_name, category).ok_or_else(|| {
        conversion_error(5, format!("invalid state '{}'", state_name))
    })?;
    let size: i64 = row.get(3)?;

    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        size: size.max(0) as u64,
        last_modified: parse_time(row, 4)?,
        state,
        not_to_move: row.get(7)?,
        created_at: parse_time(row, 8)?,
        updated_at: parse_time(row, 9)?,
    })
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> FileRecord {
        FileRecord::discovered(name, "/inbox", 42, Utc::now())
    }

    #[test]
    fn test_insert_and_find_by_name() {
        let db = Database::in_memory().unwrap();
        let mut r = record("a.pdf");
        r.categorize("Docs").unwrap();
        assert_eq!(db.insert_files(&[r.clone(), record("b.txt")]).unwrap(), 2);

        let found = db.find_active_by_name("a.pdf").unwrap().unwrap();
        assert_eq!(found.id, r.id);
        assert_eq!(found.category(), Some("Docs"));
        assert_eq!(found.size, 42);
        assert!(db.find_active_by_name("c.txt").unwrap().is_none());
    }

    #[test]
    fn test_active_name_is_unique() {
        let db = Database::in_memory().unwrap();
        db.insert_files(&[record("a.pdf")]).unwrap();
        assert!(db.insert_files(&[record("a.pdf")]).is_err());
    }

    #[test]
    fn test_retired_name_can_be_reused() {
        let db = Database::in_memory().unwrap();
        let r = record("a.pdf");
        db.insert_files(&[r.clone()]).unwrap();
        db.retire(&r.id).unwrap();

        assert!(db.find_active_by_name("a.pdf").unwrap().is_none());
        assert!(db.get_active_file(&r.id).unwrap().is_none());
        assert!(db.get_file(&r.id).unwrap().unwrap().is_deleted());
        db.insert_files(&[record("a.pdf")]).unwrap();
    }

    #[test]
    fn test_update_roundtrips_state() {
        let db = Database::in_memory().unwrap();
        let mut r = record("a.pdf");
        db.insert_files(&[r.clone()]).unwrap();

        r.relocate("Invoices").unwrap();
        db.update_file(&r).unwrap();
        let stored = db.get_file(&r.id).unwrap().unwrap();
        assert_eq!(stored.state, FileState::Relocated { category: "Invoices".into() });

        let missing = record("ghost.pdf");
        assert!(matches!(db.update_file(&missing), Err(DropsortError::NotFound(_))));
    }

    #[test]
    fn test_hold_and_stats() {
        let db = Database::in_memory().unwrap();
        let mut a = record("a.pdf");
        a.categorize("Docs").unwrap();
        let mut b = record("b.pdf");
        b.mark_unclassified();
        db.insert_files(&[a.clone(), b.clone()]).unwrap();

        assert!(db.set_not_to_move(&a.id, true).unwrap().not_to_move);
        assert!(db.set_not_to_move("nope", true).is_err());
        assert_eq!(db.list_unclassified().unwrap().len(), 1);
        assert_eq!(db.list_files(Some(FileState::CATEGORIZED), 10).unwrap().len(), 1);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.file_count, 2);
        assert!(stats.by_category.contains(&("Docs".to_string(), 1)));
        assert!(stats.by_category.contains(&("Uncategorized".to_string(), 1)));
    }
}
