//! Backing store abstraction
//!
//! The bridge owns no durable state. Every row it reads or writes lives in a
//! remote relational store (Supabase, spoken to over its PostgREST API).
//! This module defines the narrow surface the bridge consumes so the
//! resolver and mutator can be exercised against an in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod postgrest;

pub use postgrest::{PostgrestConfig, PostgrestStore};

/// Tables touched by the bridge, named exactly as they exist in the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Devices,
    Supervisor,
    Game,
    Post,
    Character,
    Task,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Devices => "Devices",
            Table::Supervisor => "Supervisor",
            Table::Game => "Game",
            Table::Post => "Post",
            Table::Character => "Character",
            Table::Task => "Task",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal primary key of a row
///
/// Supabase tables use either `int8` identity columns or `uuid` keys, so the
/// key is kept opaque: integer or text, never interpreted by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(v) => write!(f, "{v}"),
            RowKey::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        RowKey::Int(value)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey::Text(value.to_string())
    }
}

/// Value used in an equality filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
    Key(RowKey),
}

impl FilterValue {
    /// Render the value the way PostgREST expects it after `eq.`
    pub fn to_query_literal(&self) -> String {
        match self {
            FilterValue::Text(s) => s.clone(),
            FilterValue::Bool(b) => b.to_string(),
            FilterValue::Key(k) => k.to_string(),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_literal())
    }
}

/// A `Devices` row as written by the status upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Selector for the conditional `Task.solved = true` update
///
/// Matches rows whose `post` is in `post_keys` and whose `game` and
/// `character` equal the given keys.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSelector {
    pub post_keys: Vec<RowKey>,
    pub game_key: RowKey,
    pub character_key: RowKey,
}

/// Errors surfaced by a backing store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Transport(String),

    #[error("Store rejected request to {table} with status {status}: {message}")]
    Api {
        table: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from store: {0}")]
    InvalidResponse(String),

    #[error("Store not configured: {0}")]
    NotConfigured(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Relational surface the bridge depends on
///
/// Implementations must make `upsert_device` and `mark_tasks_solved` single
/// atomic requests; the bridge never reads before it writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a device row keyed by its id
    async fn upsert_device(&self, row: &DeviceRow) -> StoreResult<()>;

    /// Return the primary keys of every row in `table` where `column = value`
    async fn select_keys(
        &self,
        table: Table,
        column: &str,
        value: &FilterValue,
    ) -> StoreResult<Vec<RowKey>>;

    /// Set `solved = true` on matching tasks, returning the number of rows matched
    async fn mark_tasks_solved(&self, selector: &TaskSelector) -> StoreResult<u64>;

    /// Cheap reachability check
    async fn ping(&self) -> StoreResult<()>;
}
