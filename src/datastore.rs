//! The external datastore interface the Check pipeline consumes (§6). Real
//! backends (Postgres, etc.) are an explicit Non-goal; `InMemoryTupleDatastore`
//! here is reference/test tooling, generalized from the teacher's
//! `InMemoryTupleRepository` to be store-scoped and to serve the four read
//! shapes `LocalChecker` needs.

use crate::error::CheckResult;
use crate::models::{ObjectKey, Tuple, TupleFilter, TupleKey, TupleWriteBatch, UserKey};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A userset-only read filter for `read_userset_tuples`: tuples on
/// `(object, relation)` whose user is a userset (never a terminal user or
/// wildcard), optionally narrowed to a set of allowed user types.
#[derive(Debug, Clone)]
pub struct UsersetFilter {
    pub object: ObjectKey,
    pub relation: String,
    pub allowed_user_types: Vec<String>,
}

impl UsersetFilter {
    pub fn matches(&self, tuple: &Tuple) -> bool {
        if tuple.key.object != self.object || tuple.key.relation != self.relation {
            return false;
        }
        match &tuple.key.user {
            UserKey::Userset { object, .. } => {
                self.allowed_user_types.is_empty()
                    || self.allowed_user_types.iter().any(|t| t == &object.object_type)
            }
            _ => false,
        }
    }
}

/// A reverse-read filter for `read_starting_with_user`: all tuples on
/// `(object_type, relation)` whose user is one of `users`. Present on the
/// façade for ListObjects; Check never calls it.
#[derive(Debug, Clone)]
pub struct StartingWithUserFilter {
    pub object_type: String,
    pub relation: String,
    pub users: Vec<UserKey>,
}

impl StartingWithUserFilter {
    pub fn matches(&self, tuple: &Tuple) -> bool {
        tuple.key.object.object_type == self.object_type
            && tuple.key.relation == self.relation
            && self.users.contains(&tuple.key.user)
    }
}

/// Readiness status of the underlying store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStatus {
    Serving,
    NotServing,
}

#[async_trait]
pub trait TupleDatastore: Send + Sync {
    /// Exact-match single tuple lookup.
    async fn read_user_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<Option<Tuple>>;

    /// Range read; `filter` fields may be `None` wildcards. The in-memory
    /// implementation materializes eagerly; a real driver would stream and
    /// the caller would be required to drain or close the cursor.
    async fn read(&self, store_id: &str, filter: &TupleFilter) -> CheckResult<Vec<Tuple>>;

    /// Tuples whose user is a userset, filtered by the relation's allowed
    /// user-type set.
    async fn read_userset_tuples(&self, store_id: &str, filter: &UsersetFilter) -> CheckResult<Vec<Tuple>>;

    /// Reverse read by user(s), for ListObjects. Not used by Check.
    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> CheckResult<Vec<Tuple>>;

    /// Readiness probe.
    async fn is_ready(&self) -> CheckResult<ReadinessStatus>;

    async fn write_tuple(&self, store_id: &str, tuple: Tuple) -> CheckResult<()>;
    async fn delete_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<()>;
    async fn batch_write(&self, store_id: &str, batch: TupleWriteBatch) -> CheckResult<()>;
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct StoredKey {
    store_id: String,
    tuple_key: String,
}

/// In-memory tuple datastore, store-scoped.
#[derive(Default)]
pub struct InMemoryTupleDatastore {
    tuples: DashMap<StoredKey, Tuple>,
}

impl InMemoryTupleDatastore {
    pub fn new() -> Self {
        Self {
            tuples: DashMap::new(),
        }
    }

    fn key(store_id: &str, tuple_key: &TupleKey) -> StoredKey {
        StoredKey {
            store_id: store_id.to_string(),
            tuple_key: tuple_key.to_string(),
        }
    }
}

#[async_trait]
impl TupleDatastore for InMemoryTupleDatastore {
    async fn read_user_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<Option<Tuple>> {
        Ok(self.tuples.get(&Self::key(store_id, key)).map(|e| e.value().clone()))
    }

    async fn read(&self, store_id: &str, filter: &TupleFilter) -> CheckResult<Vec<Tuple>> {
        let tuples: Vec<Tuple> = self
            .tuples
            .iter()
            .filter(|entry| entry.key().store_id == store_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        debug!("read {} tuples for store {}", tuples.len(), store_id);
        Ok(tuples)
    }

    async fn read_userset_tuples(&self, store_id: &str, filter: &UsersetFilter) -> CheckResult<Vec<Tuple>> {
        let tuples: Vec<Tuple> = self
            .tuples
            .iter()
            .filter(|entry| entry.key().store_id == store_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(tuples)
    }

    async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> CheckResult<Vec<Tuple>> {
        let tuples: Vec<Tuple> = self
            .tuples
            .iter()
            .filter(|entry| entry.key().store_id == store_id && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(tuples)
    }

    async fn is_ready(&self) -> CheckResult<ReadinessStatus> {
        Ok(ReadinessStatus::Serving)
    }

    async fn write_tuple(&self, store_id: &str, tuple: Tuple) -> CheckResult<()> {
        self.tuples.insert(Self::key(store_id, &tuple.key), tuple);
        Ok(())
    }

    async fn delete_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<()> {
        self.tuples.remove(&Self::key(store_id, key));
        Ok(())
    }

    async fn batch_write(&self, store_id: &str, batch: TupleWriteBatch) -> CheckResult<()> {
        for tuple in batch.writes {
            self.write_tuple(store_id, tuple).await?;
        }
        for key in batch.deletes {
            self.delete_tuple(store_id, &key).await?;
        }
        Ok(())
    }
}

pub type SharedDatastore = Arc<dyn TupleDatastore>;
