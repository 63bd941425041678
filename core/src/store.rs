//! Key-value persistence for saved games.
//!
//! RULE: Only store.rs talks to the database.
//! The game hands over an opaque string and gets the same string back.

use crate::{
    error::CoreResult,
    serial::{deserialize, json_to_ascii, serialize, Persist, Restore},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// An opaque string store.
pub trait KvStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    fn put(&mut self, key: &str, value: &str) -> CoreResult<()>;

    /// Returns whether the key existed.
    fn remove(&mut self, key: &str) -> CoreResult<bool>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the save database at `path` and apply migrations.
    pub fn open(path: &str) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CoreResult<Self> {
        let store = Self { conn: Connection::open_in_memory()? };
        store.migrate()?;
        Ok(store)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CoreResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_save_slots.sql"))?;
        Ok(())
    }

    /// When `key` was last written.
    pub fn saved_at(&self, key: &str) -> CoreResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT saved_at FROM save_slot WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|t| t.with_timezone(&Utc)))
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM save_slot WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: &str) -> CoreResult<()> {
        self.conn.execute(
            "INSERT INTO save_slot (key, value, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, saved_at = excluded.saved_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CoreResult<bool> {
        let n = self.conn.execute("DELETE FROM save_slot WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }
}

/// A volatile store. Clones share the same slots, so a test can keep one
/// handle while a StorageCell owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    slots: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize { self.slots.borrow().len() }

    pub fn is_empty(&self) -> bool { self.slots.borrow().is_empty() }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.slots.borrow().get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> CoreResult<()> {
        self.slots.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CoreResult<bool> {
        Ok(self.slots.borrow_mut().remove(key).is_some())
    }
}

/// One named slot in a store, caching the last raw value read or written.
pub struct StorageCell {
    name:  String,
    store: Box<dyn KvStore>,
    raw:   Option<String>,
}

impl StorageCell {
    pub fn new(name: impl Into<String>, store: Box<dyn KvStore>) -> Self {
        Self { name: name.into(), store, raw: None }
    }

    pub fn name(&self) -> &str { &self.name }

    /// The last raw value seen by this cell.
    pub fn raw(&self) -> Option<&str> { self.raw.as_deref() }

    pub fn load_raw(&mut self) -> CoreResult<Option<&str>> {
        self.raw = self.store.get(&self.name)?;
        Ok(self.raw.as_deref())
    }

    pub fn save_raw(&mut self, raw: String) -> CoreResult<()> {
        self.store.put(&self.name, &raw)?;
        self.raw = Some(raw);
        Ok(())
    }

    /// Restore the stored object, if there is one.
    pub fn load<T, E>(&mut self, env: &E) -> CoreResult<Option<T>>
    where
        T: Restore<E>,
        E: ?Sized,
    {
        match self.load_raw()? {
            Some(raw) => {
                let raw = raw.to_string();
                deserialize(&raw, env).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Serialize `value` as ASCII-safe JSON and store it.
    pub fn save<P: Persist + ?Sized>(&mut self, value: &P) -> CoreResult<()> {
        let text = json_to_ascii(&serialize(value)?);
        log::info!("saving '{}' ({} bytes)", self.name, text.len());
        self.save_raw(text)
    }

    pub fn clear(&mut self) -> CoreResult<bool> {
        self.raw = None;
        self.store.remove(&self.name)
    }
}
