//! In-memory backing store
//!
//! Implements [`Store`] over plain vectors guarded by a single async mutex,
//! so every write is atomic the way a database row update is. Records each
//! call for assertions and can be told to fail per table or to add latency.

use crate::store::{DeviceRow, FilterValue, RowKey, Store, StoreError, StoreResult, Table, TaskSelector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// One call made against the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    UpsertDevice(DeviceRow),
    Select {
        table: Table,
        column: String,
        value: FilterValue,
    },
    MarkTasksSolved(TaskSelector),
    Ping,
}

impl StoreCall {
    pub fn table(&self) -> Table {
        match self {
            StoreCall::UpsertDevice(_) | StoreCall::Ping => Table::Devices,
            StoreCall::Select { table, .. } => *table,
            StoreCall::MarkTasksSolved(_) => Table::Task,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, StoreCall::UpsertDevice(_) | StoreCall::MarkTasksSolved(_))
    }
}

/// A `Task` row
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub post: RowKey,
    pub game: RowKey,
    pub character: RowKey,
    pub solved: bool,
}

impl TaskRecord {
    fn matches(&self, selector: &TaskSelector) -> bool {
        selector.post_keys.contains(&self.post)
            && self.game == selector.game_key
            && self.character == selector.character_key
    }
}

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<String, DeviceRow>,
    supervisors: Vec<(RowKey, String)>,
    games: Vec<(RowKey, bool)>,
    posts: Vec<(RowKey, RowKey)>,
    characters: Vec<(RowKey, String)>,
    tasks: Vec<TaskRecord>,
    failing: HashSet<Table>,
    calls: Vec<StoreCall>,
    solved_transitions: u64,
}

/// Store double backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tracks concurrent requests for the lifetime of one call
struct InFlight<'a>(&'a InMemoryStore);

impl<'a> InFlight<'a> {
    fn enter(store: &'a InMemoryStore) -> Self {
        let now = store.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        store.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(store)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps this long before touching the tables
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub async fn add_supervisor(&self, id: i64, rfid: &str) {
        self.tables
            .lock()
            .await
            .supervisors
            .push((RowKey::Int(id), rfid.to_string()));
    }

    pub async fn add_game(&self, id: i64, is_active: bool) {
        self.tables.lock().await.games.push((RowKey::Int(id), is_active));
    }

    pub async fn add_post(&self, id: i64, supervisor: i64) {
        self.tables
            .lock()
            .await
            .posts
            .push((RowKey::Int(id), RowKey::Int(supervisor)));
    }

    pub async fn add_character(&self, id: i64, rfid: &str) {
        self.tables
            .lock()
            .await
            .characters
            .push((RowKey::Int(id), rfid.to_string()));
    }

    pub async fn add_task(&self, id: i64, post: i64, game: i64, character: i64, solved: bool) {
        self.tables.lock().await.tasks.push(TaskRecord {
            id,
            post: RowKey::Int(post),
            game: RowKey::Int(game),
            character: RowKey::Int(character),
            solved,
        });
    }

    /// Make every request touching `table` fail with a transport error
    pub async fn fail_table(&self, table: Table) {
        self.tables.lock().await.failing.insert(table);
    }

    pub async fn device(&self, id: &str) -> Option<DeviceRow> {
        self.tables.lock().await.devices.get(id).cloned()
    }

    pub async fn device_count(&self) -> usize {
        self.tables.lock().await.devices.len()
    }

    pub async fn task(&self, id: i64) -> Option<TaskRecord> {
        self.tables
            .lock()
            .await
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
    }

    pub async fn tasks(&self) -> Vec<TaskRecord> {
        self.tables.lock().await.tasks.clone()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.tables.lock().await.calls.clone()
    }

    /// Number of task rows that went from unsolved to solved
    pub async fn solved_transitions(&self) -> u64 {
        self.tables.lock().await.solved_transitions
    }

    /// Highest number of requests that were in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failure(tables: &Tables, table: Table) -> StoreResult<()> {
        if tables.failing.contains(&table) {
            return Err(StoreError::Transport(format!(
                "simulated outage for table {table}"
            )));
        }
        Ok(())
    }

    /// Evaluate an equality select (pure function)
    fn select(tables: &Tables, table: Table, column: &str, value: &FilterValue) -> StoreResult<Vec<RowKey>> {
        let by_rfid = |rows: &[(RowKey, String)]| -> Vec<RowKey> {
            match value {
                FilterValue::Text(rfid) => rows
                    .iter()
                    .filter(|(_, r)| r == rfid)
                    .map(|(id, _)| id.clone())
                    .collect(),
                _ => Vec::new(),
            }
        };

        let keys = match (table, column) {
            (Table::Supervisor, "rfid") => by_rfid(&tables.supervisors),
            (Table::Character, "rfid") => by_rfid(&tables.characters),
            (Table::Game, "is_active") => match value {
                FilterValue::Bool(wanted) => tables
                    .games
                    .iter()
                    .filter(|(_, active)| active == wanted)
                    .map(|(id, _)| id.clone())
                    .collect(),
                _ => Vec::new(),
            },
            (Table::Post, "supervisor") => match value {
                FilterValue::Key(owner) => tables
                    .posts
                    .iter()
                    .filter(|(_, supervisor)| supervisor == owner)
                    .map(|(id, _)| id.clone())
                    .collect(),
                _ => Vec::new(),
            },
            _ => {
                return Err(StoreError::Api {
                    table: table.to_string(),
                    status: 400,
                    message: format!("column {column} does not exist"),
                })
            }
        };
        Ok(keys)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_device(&self, row: &DeviceRow) -> StoreResult<()> {
        let _guard = InFlight::enter(self);
        self.simulate_latency().await;

        let mut tables = self.tables.lock().await;
        tables.calls.push(StoreCall::UpsertDevice(row.clone()));
        Self::check_failure(&tables, Table::Devices)?;
        tables.devices.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn select_keys(
        &self,
        table: Table,
        column: &str,
        value: &FilterValue,
    ) -> StoreResult<Vec<RowKey>> {
        let _guard = InFlight::enter(self);
        self.simulate_latency().await;

        let mut tables = self.tables.lock().await;
        tables.calls.push(StoreCall::Select {
            table,
            column: column.to_string(),
            value: value.clone(),
        });
        Self::check_failure(&tables, table)?;
        Self::select(&tables, table, column, value)
    }

    async fn mark_tasks_solved(&self, selector: &TaskSelector) -> StoreResult<u64> {
        let _guard = InFlight::enter(self);
        self.simulate_latency().await;

        let mut tables = self.tables.lock().await;
        tables.calls.push(StoreCall::MarkTasksSolved(selector.clone()));
        Self::check_failure(&tables, Table::Task)?;

        let mut matched = 0;
        let mut transitions = 0;
        for task in tables.tasks.iter_mut().filter(|task| task.matches(selector)) {
            matched += 1;
            if !task.solved {
                task.solved = true;
                transitions += 1;
            }
        }
        tables.solved_transitions += transitions;
        Ok(matched)
    }

    async fn ping(&self) -> StoreResult<()> {
        let _guard = InFlight::enter(self);
        let mut tables = self.tables.lock().await;
        tables.calls.push(StoreCall::Ping);
        Self::check_failure(&tables, Table::Devices)
    }
}
