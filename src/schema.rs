//! The authorization model: a mapping from `(type, relation)` to a rewrite
//! tree, plus the type restrictions that gate wildcard matching. This is
//! the in-memory equivalent of what a model-authoring/DSL-parsing
//! collaborator would hand the Check pipeline (that collaborator itself is
//! out of scope, per the Non-goals).

use crate::error::{CheckError, CheckResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A rewrite expression defining how a relation is computed.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    /// Direct tuples stored on this relation.
    This,
    /// Dispatch to another relation on the same object.
    ComputedUserset(String),
    /// Read the tupleset relation, then dispatch the computed relation on
    /// each referenced object.
    TupleToUserset {
        tupleset_relation: String,
        computed_relation: String,
    },
    Union(Vec<Rewrite>),
    Intersection(Vec<Rewrite>),
    Difference {
        base: Box<Rewrite>,
        subtract: Box<Rewrite>,
    },
}

impl Rewrite {
    pub fn union(children: impl IntoIterator<Item = Rewrite>) -> Self {
        Rewrite::Union(children.into_iter().collect())
    }

    pub fn intersection(children: impl IntoIterator<Item = Rewrite>) -> Self {
        Rewrite::Intersection(children.into_iter().collect())
    }

    pub fn difference(base: Rewrite, subtract: Rewrite) -> Self {
        Rewrite::Difference {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    pub fn computed(relation: impl Into<String>) -> Self {
        Rewrite::ComputedUserset(relation.into())
    }

    pub fn tuple_to_userset(tupleset: impl Into<String>, computed: impl Into<String>) -> Self {
        Rewrite::TupleToUserset {
            tupleset_relation: tupleset.into(),
            computed_relation: computed.into(),
        }
    }
}

/// Which user types (including the `<type>:*` wildcard) are permitted as
/// the `user` of a tuple on a given relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeRestriction {
    pub object_type: String,
    pub allows_wildcard: bool,
}

/// A single relation's rewrite plus the user types it accepts.
#[derive(Debug, Clone)]
pub struct RelationDefinition {
    pub name: String,
    pub rewrite: Rewrite,
    pub type_restrictions: Vec<TypeRestriction>,
}

/// All relations defined for one object type.
#[derive(Debug, Clone, Default)]
pub struct TypeDefinition {
    pub name: String,
    pub relations: HashMap<String, RelationDefinition>,
}

/// A resolved authorization model: the graph of rewrite rules the
/// LocalChecker traverses.
#[derive(Debug, Clone)]
pub struct AuthorizationModel {
    pub id: String,
    pub store_id: String,
    pub type_definitions: HashMap<String, TypeDefinition>,
}

impl AuthorizationModel {
    pub fn new(id: impl Into<String>, store_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store_id: store_id.into(),
            type_definitions: HashMap::new(),
        }
    }

    pub fn with_relation(
        mut self,
        object_type: impl Into<String>,
        relation: impl Into<String>,
        rewrite: Rewrite,
    ) -> Self {
        self.with_relation_restricted(object_type, relation, rewrite, Vec::new())
    }

    pub fn with_relation_restricted(
        mut self,
        object_type: impl Into<String>,
        relation: impl Into<String>,
        rewrite: Rewrite,
        type_restrictions: Vec<TypeRestriction>,
    ) -> Self {
        let object_type = object_type.into();
        let relation = relation.into();
        let def = self
            .type_definitions
            .entry(object_type.clone())
            .or_insert_with(|| TypeDefinition {
                name: object_type.clone(),
                relations: HashMap::new(),
            });
        def.relations.insert(
            relation.clone(),
            RelationDefinition {
                name: relation,
                rewrite,
                type_restrictions,
            },
        );
        self
    }

    pub fn get_rewrite(&self, object_type: &str, relation: &str) -> CheckResult<&Rewrite> {
        let type_def = self
            .type_definitions
            .get(object_type)
            .ok_or_else(|| CheckError::InvalidInput(format!("unknown object type: {object_type}")))?;
        let relation_def = type_def.relations.get(relation).ok_or_else(|| {
            CheckError::InvalidInput(format!(
                "unknown relation '{relation}' for object type '{object_type}'"
            ))
        })?;
        Ok(&relation_def.rewrite)
    }

    /// Whether the wildcard `<user_type>:*` is a permitted user for this
    /// relation. Returns `false` (never `Err`) for unknown relations so
    /// callers can use this as a pure predicate inside ThisRelation
    /// evaluation without duplicating the `get_rewrite` error path.
    pub fn allows_wildcard(&self, object_type: &str, relation: &str, user_type: &str) -> bool {
        self.type_definitions
            .get(object_type)
            .and_then(|t| t.relations.get(relation))
            .map(|r| {
                r.type_restrictions
                    .iter()
                    .any(|tr| tr.object_type == user_type && tr.allows_wildcard)
            })
            .unwrap_or(false)
    }
}

/// The narrow typesystem interface the Check pipeline consumes (§6):
/// resolve a store's authorization model, defaulting to the latest one
/// when the caller doesn't pin a specific model ID.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> CheckResult<Arc<AuthorizationModel>>;
}

/// In-memory model store keyed by store, versioned by ULID so "latest" is
/// a lexicographic max.
#[derive(Default)]
pub struct InMemoryModelStore {
    models: dashmap::DashMap<String, Vec<Arc<AuthorizationModel>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self {
            models: dashmap::DashMap::new(),
        }
    }

    /// Register a model, generating a fresh monotonic ULID for it.
    pub fn register(&self, store_id: &str, mut build: impl FnMut(String) -> AuthorizationModel) -> Arc<AuthorizationModel> {
        let model_id = ulid::Ulid::new().to_string();
        let model = Arc::new(build(model_id));
        self.models
            .entry(store_id.to_string())
            .or_default()
            .push(model.clone());
        model
    }
}

#[async_trait]
impl ModelResolver for InMemoryModelStore {
    async fn resolve(
        &self,
        store_id: &str,
        model_id: Option<&str>,
    ) -> CheckResult<Arc<AuthorizationModel>> {
        let versions = self
            .models
            .get(store_id)
            .ok_or_else(|| CheckError::LatestModelNotFound(store_id.to_string()))?;

        match model_id {
            Some(id) => versions
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .ok_or_else(|| CheckError::ModelNotFound(id.to_string())),
            None => versions
                .iter()
                .max_by(|a, b| a.id.cmp(&b.id))
                .cloned()
                .ok_or_else(|| CheckError::LatestModelNotFound(store_id.to_string())),
        }
    }
}
