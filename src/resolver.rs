//! Relational resolution for task updates
//!
//! An RFID tap carries two physical-world identifiers. Before the task can
//! be marked solved they have to be translated into internal keys:
//!
//! 1. Supervisor by RFID
//! 2. the single active Game
//! 3. every Post owned by the supervisor from step 1
//! 4. Character by RFID
//!
//! The supervisor lookup runs first and gates the rest; steps 2-4 then run
//! concurrently. The first failure wins and nothing is written.

use crate::events::TaskUpdateEvent;
use crate::store::{FilterValue, RowKey, Store, StoreError, Table, TaskSelector};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Entities the resolver looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Supervisor,
    Game,
    Post,
    Character,
}

impl Entity {
    fn table(&self) -> Table {
        match self {
            Entity::Supervisor => Table::Supervisor,
            Entity::Game => Table::Game,
            Entity::Post => Table::Post,
            Entity::Character => Table::Character,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table().as_str())
    }
}

/// Resolution failures; any of these drops the event without a write
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Zero rows, or the query itself failed (`source` is then set)
    #[error("{entity} not found for RFID {key}")]
    NotFound {
        entity: Entity,
        key: String,
        #[source]
        source: Option<StoreError>,
    },

    #[error("{entity} lookup for RFID {key} matched {matches} rows, expected one")]
    Ambiguous {
        entity: Entity,
        key: String,
        matches: usize,
    },

    #[error("No active game found ({matches} rows have is_active = true)")]
    NoActiveGame { matches: usize },

    #[error("{entity} lookup failed for {key}")]
    Lookup {
        entity: Entity,
        key: String,
        #[source]
        source: StoreError,
    },
}

impl ResolveError {
    /// Entity whose lookup failed
    pub fn entity(&self) -> Entity {
        match self {
            ResolveError::NotFound { entity, .. }
            | ResolveError::Ambiguous { entity, .. }
            | ResolveError::Lookup { entity, .. } => *entity,
            ResolveError::NoActiveGame { .. } => Entity::Game,
        }
    }
}

/// Internal keys needed to mark a task solved
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    pub supervisor_key: RowKey,
    pub game_key: RowKey,
    pub post_keys: Vec<RowKey>,
    pub character_key: RowKey,
}

impl ResolvedTask {
    /// Selector for the conditional update
    pub fn selector(&self) -> TaskSelector {
        TaskSelector {
            post_keys: self.post_keys.clone(),
            game_key: self.game_key.clone(),
            character_key: self.character_key.clone(),
        }
    }
}

/// Translates RFIDs into relational keys
pub struct Resolver<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Resolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve every key a task update needs, or fail without partial data
    #[tracing::instrument(
        name = "resolve_task",
        skip(self, event),
        fields(character = %event.character_rfid, supervisor = %event.supervisor_rfid)
    )]
    pub async fn resolve(&self, event: &TaskUpdateEvent) -> Result<ResolvedTask, ResolveError> {
        let supervisor_key = self
            .resolve_by_rfid(Entity::Supervisor, &event.supervisor_rfid)
            .await?;

        let (game_key, post_keys, character_key) = tokio::try_join!(
            self.resolve_active_game(),
            self.resolve_posts(&supervisor_key),
            self.resolve_by_rfid(Entity::Character, &event.character_rfid),
        )?;

        debug!(
            supervisor = %supervisor_key,
            game = %game_key,
            posts = post_keys.len(),
            character = %character_key,
            "Task update resolved"
        );

        Ok(ResolvedTask {
            supervisor_key,
            game_key,
            post_keys,
            character_key,
        })
    }

    /// Single-row lookup of a supervisor or character by RFID
    ///
    /// A failed query reports the entity as not found, with the store error
    /// kept as the source.
    pub async fn resolve_by_rfid(&self, entity: Entity, rfid: &str) -> Result<RowKey, ResolveError> {
        let keys = self
            .store
            .select_keys(entity.table(), "rfid", &FilterValue::Text(rfid.to_string()))
            .await
            .map_err(|source| ResolveError::NotFound {
                entity,
                key: rfid.to_string(),
                source: Some(source),
            })?;

        single_row(keys).map_err(|matches| match matches {
            0 => ResolveError::NotFound {
                entity,
                key: rfid.to_string(),
                source: None,
            },
            matches => ResolveError::Ambiguous {
                entity,
                key: rfid.to_string(),
                matches,
            },
        })
    }

    /// The one game with `is_active = true`
    pub async fn resolve_active_game(&self) -> Result<RowKey, ResolveError> {
        let keys = self
            .store
            .select_keys(Table::Game, "is_active", &FilterValue::Bool(true))
            .await
            .map_err(|source| ResolveError::Lookup {
                entity: Entity::Game,
                key: "is_active".to_string(),
                source,
            })?;

        single_row(keys).map_err(|matches| ResolveError::NoActiveGame { matches })
    }

    /// All posts owned by a supervisor; an empty set is valid
    pub async fn resolve_posts(&self, supervisor_key: &RowKey) -> Result<Vec<RowKey>, ResolveError> {
        self.store
            .select_keys(
                Table::Post,
                "supervisor",
                &FilterValue::Key(supervisor_key.clone()),
            )
            .await
            .map_err(|source| ResolveError::Lookup {
                entity: Entity::Post,
                key: supervisor_key.to_string(),
                source,
            })
    }
}

/// Exactly one key, or the number of rows that matched instead (pure function)
fn single_row(mut keys: Vec<RowKey>) -> Result<RowKey, usize> {
    match keys.len() {
        1 => Ok(keys.remove(0)),
        n => Err(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;

    fn task_event(character: &str, supervisor: &str) -> TaskUpdateEvent {
        TaskUpdateEvent {
            character_rfid: character.to_string(),
            supervisor_rfid: supervisor.to_string(),
        }
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.add_supervisor(10, "RFID999").await;
        store.add_game(1, false).await;
        store.add_game(2, true).await;
        store.add_post(100, 10).await;
        store.add_post(101, 10).await;
        store.add_character(50, "RFID123").await;
        store
    }

    #[test]
    fn test_single_row() {
        assert_eq!(single_row(vec![RowKey::Int(4)]), Ok(RowKey::Int(4)));
        assert_eq!(single_row(vec![]), Err(0));
        assert_eq!(single_row(vec![RowKey::Int(1), RowKey::Int(2)]), Err(2));
    }

    #[tokio::test]
    async fn test_resolve_full_chain() {
        let store = seeded_store().await;
        let resolver = Resolver::new(store);

        let resolved = resolver
            .resolve(&task_event("RFID123", "RFID999"))
            .await
            .unwrap();

        assert_eq!(resolved.supervisor_key, RowKey::Int(10));
        assert_eq!(resolved.game_key, RowKey::Int(2));
        assert_eq!(resolved.post_keys, vec![RowKey::Int(100), RowKey::Int(101)]);
        assert_eq!(resolved.character_key, RowKey::Int(50));
    }

    #[tokio::test]
    async fn test_unknown_supervisor_short_circuits() {
        let store = seeded_store().await;
        let resolver = Resolver::new(store.clone());

        let err = resolver
            .resolve(&task_event("RFID123", "RFID000"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveError::NotFound { entity: Entity::Supervisor, ref key, source: None } if key == "RFID000"
        ));
        let tables: Vec<Table> = store.calls().await.iter().map(|c| c.table()).collect();
        assert_eq!(tables, vec![Table::Supervisor]);
    }

    #[tokio::test]
    async fn test_no_active_game() {
        let store = Arc::new(InMemoryStore::new());
        store.add_supervisor(10, "S").await;
        store.add_character(50, "C").await;
        store.add_game(1, false).await;

        let err = Resolver::new(store).resolve(&task_event("C", "S")).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoActiveGame { matches: 0 }));
    }

    #[tokio::test]
    async fn test_multiple_active_games() {
        let store = Arc::new(InMemoryStore::new());
        store.add_supervisor(10, "S").await;
        store.add_character(50, "C").await;
        store.add_game(1, true).await;
        store.add_game(2, true).await;

        let err = Resolver::new(store).resolve(&task_event("C", "S")).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoActiveGame { matches: 2 }));
        assert_eq!(err.entity(), Entity::Game);
    }

    #[tokio::test]
    async fn test_supervisor_without_posts_resolves() {
        let store = Arc::new(InMemoryStore::new());
        store.add_supervisor(10, "S").await;
        store.add_character(50, "C").await;
        store.add_game(2, true).await;

        let resolved = Resolver::new(store).resolve(&task_event("C", "S")).await.unwrap();
        assert!(resolved.post_keys.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_character() {
        let store = seeded_store().await;
        let err = Resolver::new(store)
            .resolve(&task_event("RFID404", "RFID999"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveError::NotFound { entity: Entity::Character, ref key, source: None } if key == "RFID404"
        ));
    }

    #[tokio::test]
    async fn test_duplicate_character_rfid_is_ambiguous() {
        let store = seeded_store().await;
        store.add_character(51, "RFID123").await;

        let err = Resolver::new(store)
            .resolve(&task_event("RFID123", "RFID999"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { matches: 2, .. }));
    }

    #[tokio::test]
    async fn test_failed_supervisor_query_is_not_found() {
        let store = seeded_store().await;
        store.fail_table(Table::Supervisor).await;

        let err = Resolver::new(store.clone())
            .resolve(&task_event("RFID123", "RFID999"))
            .await
            .unwrap_err();

        match &err {
            ResolveError::NotFound {
                entity: Entity::Supervisor,
                key,
                source: Some(_),
            } => assert_eq!(key, "RFID999"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(store.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_character_query_is_not_found() {
        let store = seeded_store().await;
        store.fail_table(Table::Character).await;

        let err = Resolver::new(store)
            .resolve(&task_event("RFID123", "RFID999"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NotFound { entity: Entity::Character, source: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_game_query_stays_lookup_error() {
        let store = seeded_store().await;
        store.fail_table(Table::Game).await;

        let err = Resolver::new(store)
            .resolve(&task_event("RFID123", "RFID999"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { entity: Entity::Game, .. }));
    }
}
