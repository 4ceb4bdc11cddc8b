//! A stable, order-insensitive hash over a Check request, used as both the
//! cycle-detection key and the cache key (§3). Built with `ahash`'s fixed
//! (non-randomized) hasher rather than `ahash::RandomState` so that equal
//! logical requests hash equally across process restarts; `RandomState`
//! reseeds per process and would break that guarantee.

use crate::models::ResolveCheckRequest;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Fingerprint {
    /// Compute the fingerprint of a request: `(store, model, tuple key,
    /// sorted contextual tuples, canonicalized context)`. `serde_json::Map`
    /// is backed by a `BTreeMap` (the `preserve_order` feature is not
    /// enabled), so serializing `context` already yields key-sorted JSON.
    /// That's all the canonicalization context equality needs.
    pub fn of(request: &ResolveCheckRequest) -> Self {
        let mut hasher = ahash::AHasher::default();

        request.store_id.hash(&mut hasher);
        request.model_id.hash(&mut hasher);
        request.tuple_key.to_string().hash(&mut hasher);

        let mut contextual: Vec<String> = request
            .contextual_tuples
            .iter()
            .map(|t| t.key.to_string())
            .collect();
        contextual.sort_unstable();
        contextual.hash(&mut hasher);

        serde_json::to_string(&request.context)
            .unwrap_or_default()
            .hash(&mut hasher);

        Fingerprint(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectKey, ResolveCheckRequest, Tuple, TupleKey, UserKey};
    use serde_json::json;

    fn request() -> ResolveCheckRequest {
        ResolveCheckRequest::new(
            "store1",
            "model1",
            TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice")),
        )
    }

    #[test]
    fn equal_requests_fingerprint_equally() {
        assert_eq!(Fingerprint::of(&request()), Fingerprint::of(&request()));
    }

    #[test]
    fn differing_tuple_keys_fingerprint_differently() {
        let mut other = request();
        other.tuple_key.relation = "editor".to_string();
        assert_ne!(Fingerprint::of(&request()), Fingerprint::of(&other));
    }

    #[test]
    fn context_key_order_does_not_affect_fingerprint() {
        let mut a = request();
        a.context = json!({ "a": 1, "b": 2 });
        let mut b = request();
        b.context = json!({ "b": 2, "a": 1 });
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn contextual_tuple_order_does_not_affect_fingerprint() {
        let t1 = Tuple::new(TupleKey::new(
            ObjectKey::new("document", "1"),
            "viewer",
            UserKey::user("user", "bob"),
        ));
        let t2 = Tuple::new(TupleKey::new(
            ObjectKey::new("document", "1"),
            "viewer",
            UserKey::user("user", "carol"),
        ));

        let mut a = request();
        a.contextual_tuples = vec![t1.clone(), t2.clone()];
        let mut b = request();
        b.contextual_tuples = vec![t2, t1];

        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn contextual_tuples_change_the_fingerprint() {
        let t1 = Tuple::new(TupleKey::new(
            ObjectKey::new("document", "1"),
            "viewer",
            UserKey::user("user", "bob"),
        ));
        let mut with_ctx = request();
        with_ctx.contextual_tuples = vec![t1];
        assert_ne!(Fingerprint::of(&request()), Fingerprint::of(&with_ctx));
    }
}
