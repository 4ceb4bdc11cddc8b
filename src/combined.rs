//! Overlays a request's contextual tuples onto the datastore's view (§4.5).
//! Contextual tuples are unconditional writes that shadow stored tuples:
//! the combined iterator yields contextual matches first (cheap, in-memory),
//! then the datastore's results, deduplicated on `(object, relation, user)`.
//! Deleting a stored tuple via contextuals is not supported, they're
//! additive only.

use crate::datastore::{StartingWithUserFilter, TupleDatastore, UsersetFilter};
use crate::error::CheckResult;
use crate::models::{Tuple, TupleFilter, TupleKey};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct CombinedTupleReader {
    datastore: Arc<dyn TupleDatastore>,
    contextual_tuples: Vec<Tuple>,
}

impl CombinedTupleReader {
    pub fn new(datastore: Arc<dyn TupleDatastore>, contextual_tuples: Vec<Tuple>) -> Self {
        Self {
            datastore,
            contextual_tuples,
        }
    }

    /// Exact-match lookup: a matching contextual tuple shadows the stored
    /// one outright, and the datastore is never read in that case. Returns
    /// whether the datastore was actually queried alongside the tuple, so
    /// callers can count only real datastore reads.
    pub async fn read_user_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<(Option<Tuple>, bool)> {
        if let Some(tuple) = self.contextual_tuples.iter().find(|t| &t.key == key) {
            return Ok((Some(tuple.clone()), false));
        }
        let tuple = self.datastore.read_user_tuple(store_id, key).await?;
        Ok((tuple, true))
    }

    pub async fn read(&self, store_id: &str, filter: &TupleFilter) -> CheckResult<Vec<Tuple>> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for tuple in self.contextual_tuples.iter().filter(|t| filter.matches(t)) {
            if seen.insert(dedup_key(tuple)) {
                merged.push(tuple.clone());
            }
        }
        for tuple in self.datastore.read(store_id, filter).await? {
            if seen.insert(dedup_key(&tuple)) {
                merged.push(tuple);
            }
        }
        Ok(merged)
    }

    pub async fn read_userset_tuples(&self, store_id: &str, filter: &UsersetFilter) -> CheckResult<Vec<Tuple>> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for tuple in self.contextual_tuples.iter().filter(|t| filter.matches(t)) {
            if seen.insert(dedup_key(tuple)) {
                merged.push(tuple.clone());
            }
        }
        for tuple in self.datastore.read_userset_tuples(store_id, filter).await? {
            if seen.insert(dedup_key(&tuple)) {
                merged.push(tuple);
            }
        }
        Ok(merged)
    }

    pub async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
    ) -> CheckResult<Vec<Tuple>> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for tuple in self.contextual_tuples.iter().filter(|t| filter.matches(t)) {
            if seen.insert(dedup_key(tuple)) {
                merged.push(tuple.clone());
            }
        }
        for tuple in self.datastore.read_starting_with_user(store_id, filter).await? {
            if seen.insert(dedup_key(&tuple)) {
                merged.push(tuple);
            }
        }
        Ok(merged)
    }
}

fn dedup_key(tuple: &Tuple) -> String {
    tuple.key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::InMemoryTupleDatastore;
    use crate::models::{ObjectKey, UserKey};

    #[tokio::test]
    async fn contextual_tuple_overlays_without_duplication() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        datastore.write_tuple("store1", Tuple::new(key.clone())).await.unwrap();

        let reader = CombinedTupleReader::new(datastore, vec![Tuple::new(key.clone())]);
        let tuples = reader
            .read("store1", &TupleFilter { relation: Some("viewer".to_string()), ..Default::default() })
            .await
            .unwrap();

        assert_eq!(tuples.len(), 1);
    }

    #[tokio::test]
    async fn contextual_only_tuple_is_visible_with_empty_store() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));

        let reader = CombinedTupleReader::new(datastore, vec![Tuple::new(key.clone())]);
        let (tuple, store_hit) = reader.read_user_tuple("store1", &key).await.unwrap();
        assert!(tuple.is_some());
        assert!(!store_hit, "a contextual match must shadow the store without reading it");
    }
}
