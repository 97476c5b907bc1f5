use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use thiserror::Error;
use uuid::Uuid;

use crate::models::StoredSubscription;

const SUBSCRIPTIONS: TableDefinition<&str, &str> = TableDefinition::new("subscriptions");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("corrupt subscription record: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("failed to allocate unique id")]
    IdExhausted,
}

/// Browser push subscriptions, keyed by a short random id.
pub struct SubscriptionStore {
    db: Database,
}

impl SubscriptionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };

        let write_txn = db.begin_write()?;
        write_txn.open_table(SUBSCRIPTIONS)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Stores the subscription under a fresh id and returns that id.
    pub fn insert(&self, stored: &StoredSubscription) -> Result<String, StoreError> {
        let id = self.allocate_id()?;
        self.put(&id, stored)?;
        Ok(id)
    }

    fn allocate_id(&self) -> Result<String, StoreError> {
        for _ in 0..5 {
            let candidate: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
            if self.get(&candidate)?.is_none() {
                return Ok(candidate);
            }
        }
        Err(StoreError::IdExhausted)
    }

    fn put(&self, id: &str, stored: &StoredSubscription) -> Result<(), StoreError> {
        let value = serde_json::to_string(stored)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SUBSCRIPTIONS)?;
            table.insert(id, value.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredSubscription>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SUBSCRIPTIONS)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<(String, StoredSubscription)>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            entries.push((key.value().to_string(), serde_json::from_str(value.value())?));
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        Ok(table.len()?)
    }

    /// Drops every subscription created before `cutoff`; returns how many went.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SUBSCRIPTIONS)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let stored: StoredSubscription = serde_json::from_str(value.value())?;
                if stored.created_at < cutoff {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str())?;
            }
            stale.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}
