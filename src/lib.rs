//! Relationship-based access control Check resolution pipeline, Zanzibar-style.
//!
//! This crate implements the Check half of a Zanzibar-style authorization
//! system: given a `(store, model, object, relation, user)` tuple key, walk
//! the authorization model's rewrite tree against stored and contextual
//! relationship tuples to decide whether the user holds the relation,
//! through a composable chain of resolvers:
//!
//! - **Cycle detection**: short-circuits a fingerprint repeating on the
//!   current dispatch path as `{allowed: false, cycle_detected: true}`.
//! - **Caching**: an optional TTL- and size-bounded cache in front of the
//!   evaluator, keyed by request fingerprint.
//! - **Local evaluation**: the actual rewrite-tree walk over direct tuples,
//!   computed usersets, tuple-to-userset dispatch, unions, intersections,
//!   and differences, with bounded concurrency and cooperative cancellation.
//!
//! # Example
//!
//! ```rust
//! use rebac_check_engine::engine::AuthorizationEngine;
//! use rebac_check_engine::models::{ObjectKey, Tuple, TupleKey, UserKey};
//! use rebac_check_engine::schema::{AuthorizationModel, Rewrite};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (engine, datastore, models) = AuthorizationEngine::in_memory();
//!
//!     models.register("store1", |id| {
//!         AuthorizationModel::new(id, "store1")
//!             .with_relation("document", "owner", Rewrite::This)
//!             .with_relation(
//!                 "document",
//!                 "viewer",
//!                 Rewrite::union([Rewrite::This, Rewrite::computed("owner")]),
//!             )
//!     });
//!
//!     let owner_key = TupleKey::new(ObjectKey::new("document", "1"), "owner", UserKey::user("user", "alice"));
//!     datastore.write_tuple("store1", Tuple::new(owner_key)).await?;
//!
//!     let viewer_key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
//!     let response = engine.check("store1", "", viewer_key, Vec::new(), Value::Null).await?;
//!     assert!(response.allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod bounded;
pub mod cache;
pub mod combined;
pub mod condition;
pub mod config;
pub mod datastore;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod local;
pub mod models;
pub mod resolver;
pub mod schema;

pub use engine::AuthorizationEngine;
pub use error::{CheckError, CheckResult};
pub use models::*;
