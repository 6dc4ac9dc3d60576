// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable record storage behind a narrow trait.
//!
//! The queue and the cache both mirror their in-memory state to a durable
//! store so it can be reconstructed after a restart. In-memory state is
//! authoritative for the current process lifetime; the store is only read
//! back on open.
//!
//! Two implementations are provided: [`SqliteStore`] for hosts with a
//! filesystem, and [`MemoryStore`] as a no-op fallback for environments
//! without persistent storage. The choice is made once at construction
//! time, never by capability checks inside the engine logic.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// SQL schema for the record store.
pub const SCHEMA: &str = r#"
-- Generic JSON records grouped into named collections
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);

CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection);
"#;

/// A local persistent store of JSON records, grouped into named collections.
///
/// Writes must be durable before the call returns; the queue relies on this
/// for its persist-before-acknowledge guarantee.
pub trait DurableStore: Send + Sync {
    /// Inserts or fully replaces the record under (collection, key).
    fn put(&self, collection: &str, key: &str, record: &serde_json::Value) -> Result<()>;

    /// Returns the record under (collection, key), if present.
    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>>;

    /// Returns all records in a collection, ordered by key.
    fn get_all(&self, collection: &str) -> Result<Vec<serde_json::Value>>;

    /// Deletes the record under (collection, key). Missing keys are not an error.
    fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// Deletes every record in a collection, returning how many were removed.
    fn delete_all(&self, collection: &str) -> Result<usize>;
}

impl<S: DurableStore + ?Sized> DurableStore for std::sync::Arc<S> {
    fn put(&self, collection: &str, key: &str, record: &serde_json::Value) -> Result<()> {
        (**self).put(collection, key, record)
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        (**self).get(collection, key)
    }

    fn get_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        (**self).get_all(collection)
    }

    fn delete(&self, collection: &str, key: &str) -> Result<()> {
        (**self).delete(collection, key)
    }

    fn delete_all(&self, collection: &str) -> Result<usize> {
        (**self).delete_all(collection)
    }
}

/// SQLite-backed durable store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite store (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for SqliteStore {
    fn put(&self, collection: &str, key: &str, record: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn().execute(
            "INSERT INTO records (collection, key, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, key) DO UPDATE SET record = excluded.record",
            params![collection, key, json],
        )?;
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            None => Ok(None),
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        }
    }

    fn get_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT record FROM records WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            let json = row?;
            records.push(serde_json::from_str(&json)?);
        }
        Ok(records)
    }

    fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM records WHERE collection = ?1 AND key = ?2",
            params![collection, key],
        )?;
        Ok(())
    }

    fn delete_all(&self, collection: &str) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM records WHERE collection = ?1",
            params![collection],
        )?;
        Ok(removed)
    }
}

/// In-memory store for environments without persistent storage.
///
/// Satisfies the durability contract trivially: nothing survives a restart,
/// which is the documented behavior of hosts that select it.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, serde_json::Value>>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, collection: &str, key: &str, record: &serde_json::Value) -> Result<()> {
        self.collections()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .collections()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    fn get_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .collections()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<()> {
        if let Some(c) = self.collections().get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    fn delete_all(&self, collection: &str) -> Result<usize> {
        Ok(self
            .collections()
            .remove(collection)
            .map(|c| c.len())
            .unwrap_or(0))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
