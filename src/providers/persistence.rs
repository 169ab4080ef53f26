//! Party persistence interface and implementations
//!
//! Only two fields per party survive a restart: the assigned activity and
//! the lifecycle state. Parties are restored only when that state is
//! `InActivity` or `ActivityFinished`.

use crate::error::MatchmakingError;
use crate::types::{ActivityId, LifecycleState, PartyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Persisted row of a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedParty {
    pub activity: ActivityId,
    pub state: LifecycleState,
}

/// Trait for party persistence operations
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceStore: Send + Sync {
    /// Store or replace the row of a party
    fn save(
        &self,
        party: PartyId,
        activity: ActivityId,
        state: LifecycleState,
    ) -> crate::error::Result<()>;

    /// Row of a party, if any
    fn load(&self, party: PartyId) -> crate::error::Result<Option<PersistedParty>>;

    /// Drop the row of a disbanded party
    fn delete(&self, party: PartyId) -> crate::error::Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    row: PersistedParty,
    updated_at: DateTime<Utc>,
}

/// In-memory party persistence
#[derive(Debug, Default)]
pub struct InMemoryPersistenceStore {
    rows: RwLock<HashMap<PartyId, StoredRow>>,
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceStore for InMemoryPersistenceStore {
    fn save(
        &self,
        party: PartyId,
        activity: ActivityId,
        state: LifecycleState,
    ) -> crate::error::Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence write lock".to_string(),
            })?;

        rows.insert(
            party,
            StoredRow {
                row: PersistedParty { activity, state },
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn load(&self, party: PartyId) -> crate::error::Result<Option<PersistedParty>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence read lock".to_string(),
            })?;

        Ok(rows.get(&party).map(|stored| stored.row))
    }

    fn delete(&self, party: PartyId) -> crate::error::Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence write lock".to_string(),
            })?;

        rows.remove(&party);
        Ok(())
    }
}

/// Party persistence in a JSON file, rewritten on every change
#[derive(Debug)]
pub struct JsonFilePersistenceStore {
    path: PathBuf,
    rows: RwLock<HashMap<PartyId, StoredRow>>,
}

impl JsonFilePersistenceStore {
    /// Open a store, reading existing rows if the file exists
    pub fn open(path: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    fn flush(&self, rows: &HashMap<PartyId, StoredRow>) -> crate::error::Result<()> {
        let contents = serde_json::to_string_pretty(rows)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl PersistenceStore for JsonFilePersistenceStore {
    fn save(
        &self,
        party: PartyId,
        activity: ActivityId,
        state: LifecycleState,
    ) -> crate::error::Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence write lock".to_string(),
            })?;

        rows.insert(
            party,
            StoredRow {
                row: PersistedParty { activity, state },
                updated_at: Utc::now(),
            },
        );
        self.flush(&rows).map_err(|e| {
            MatchmakingError::PersistenceFailed {
                party_id: party,
                message: e.to_string(),
            }
            .into()
        })
    }

    fn load(&self, party: PartyId) -> crate::error::Result<Option<PersistedParty>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence read lock".to_string(),
            })?;

        Ok(rows.get(&party).map(|stored| stored.row))
    }

    fn delete(&self, party: PartyId) -> crate::error::Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire persistence write lock".to_string(),
            })?;

        if rows.remove(&party).is_some() {
            self.flush(&rows)?;
        }
        Ok(())
    }
}
