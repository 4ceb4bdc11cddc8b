use crate::error::{CheckError, CheckResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An object reference: `<type>:<id>`, e.g. `document:1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectKey {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parse a `type:id` string.
    pub fn parse(s: &str) -> CheckResult<Self> {
        let (object_type, object_id) = s
            .split_once(':')
            .ok_or_else(|| CheckError::InvalidInput(format!("malformed object key: {s}")))?;
        if object_type.is_empty() || object_id.is_empty() {
            return Err(CheckError::InvalidInput(format!("malformed object key: {s}")));
        }
        Ok(Self::new(object_type, object_id))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A user reference: a terminal user (`user:alice`), a userset
/// (`group:eng#member`), or a type-scoped wildcard (`user:*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserKey {
    Terminal(ObjectKey),
    Userset { object: ObjectKey, relation: String },
    Wildcard { object_type: String },
}

impl UserKey {
    pub fn user(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        UserKey::Terminal(ObjectKey::new(object_type, object_id))
    }

    pub fn userset(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        UserKey::Userset {
            object: ObjectKey::new(object_type, object_id),
            relation: relation.into(),
        }
    }

    pub fn wildcard(object_type: impl Into<String>) -> Self {
        UserKey::Wildcard {
            object_type: object_type.into(),
        }
    }

    pub fn object_type(&self) -> &str {
        match self {
            UserKey::Terminal(o) => &o.object_type,
            UserKey::Userset { object, .. } => &object.object_type,
            UserKey::Wildcard { object_type } => object_type,
        }
    }

    /// Parse `type:id`, `type:id#relation`, or `type:*`.
    pub fn parse(s: &str) -> CheckResult<Self> {
        let (object_type, rest) = s
            .split_once(':')
            .ok_or_else(|| CheckError::InvalidInput(format!("malformed user key: {s}")))?;
        if object_type.is_empty() {
            return Err(CheckError::InvalidInput(format!("malformed user key: {s}")));
        }
        if rest == "*" {
            return Ok(UserKey::wildcard(object_type));
        }
        match rest.split_once('#') {
            Some((id, relation)) if !id.is_empty() && !relation.is_empty() => {
                Ok(UserKey::userset(object_type, id, relation))
            }
            Some(_) => Err(CheckError::InvalidInput(format!("malformed user key: {s}"))),
            None if !rest.is_empty() => Ok(UserKey::user(object_type, rest)),
            None => Err(CheckError::InvalidInput(format!("malformed user key: {s}"))),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Terminal(o) => write!(f, "{o}"),
            UserKey::Userset { object, relation } => write!(f, "{object}#{relation}"),
            UserKey::Wildcard { object_type } => write!(f, "{object_type}:*"),
        }
    }
}

/// A condition bound to a tuple: a named expression plus the parameter
/// context the expression will be evaluated against. Evaluation itself is
/// delegated to a `ConditionEvaluator` (see `condition.rs`); an unconditioned
/// tuple behaves as condition `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub context: serde_json::Value,
}

/// The `(object, relation, user)` triple a Check resolves, with an
/// optional condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleKey {
    pub object: ObjectKey,
    pub relation: String,
    pub user: UserKey,
}

impl TupleKey {
    pub fn new(object: ObjectKey, relation: impl Into<String>, user: UserKey) -> Self {
        Self {
            object,
            relation: relation.into(),
            user,
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A stored (or contextual) relationship tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    pub key: TupleKey,
    pub condition: Option<Condition>,
    pub created_at: DateTime<Utc>,
}

impl Tuple {
    pub fn new(key: TupleKey) -> Self {
        Self {
            key,
            condition: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Recursion and datastore-read bookkeeping threaded through a Check
/// dispatch tree. `depth` is decremented on every sub-dispatch;
/// `datastore_query_count` is incremented on every datastore read and
/// summed at join points.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionMetadata {
    pub depth: u32,
    pub datastore_query_count: u32,
}

impl ResolutionMetadata {
    pub fn new(depth: u32) -> Self {
        Self {
            depth,
            datastore_query_count: 0,
        }
    }

    /// A fresh frame for a sub-dispatch: depth decremented, counters reset
    /// (the sub-dispatch's own counters are folded back into the parent by
    /// the caller once it returns).
    pub fn descend(&self) -> Self {
        Self {
            depth: self.depth.saturating_sub(1),
            datastore_query_count: 0,
        }
    }
}

/// A Check request as consumed by the resolver stack.
#[derive(Debug, Clone)]
pub struct ResolveCheckRequest {
    pub store_id: String,
    pub model_id: String,
    pub tuple_key: TupleKey,
    pub contextual_tuples: Vec<Tuple>,
    pub context: serde_json::Value,
    pub resolution_metadata: ResolutionMetadata,
}

impl ResolveCheckRequest {
    pub fn new(store_id: impl Into<String>, model_id: impl Into<String>, tuple_key: TupleKey) -> Self {
        Self {
            store_id: store_id.into(),
            model_id: model_id.into(),
            tuple_key,
            contextual_tuples: Vec::new(),
            context: serde_json::Value::Null,
            resolution_metadata: ResolutionMetadata::new(25),
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<Tuple>) -> Self {
        self.contextual_tuples = tuples;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.resolution_metadata.depth = depth;
        self
    }

    /// Build the request for a recursive sub-dispatch: same store/model/
    /// contextual-tuples/context, a new tuple key, depth decremented.
    pub fn dispatch(&self, tuple_key: TupleKey) -> Self {
        Self {
            store_id: self.store_id.clone(),
            model_id: self.model_id.clone(),
            tuple_key,
            contextual_tuples: self.contextual_tuples.clone(),
            context: self.context.clone(),
            resolution_metadata: self.resolution_metadata.descend(),
        }
    }
}

/// Metadata returned alongside a Check decision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResolveCheckResponseMetadata {
    pub datastore_query_count: u32,
    pub dispatch_count: u32,
    pub cycle_detected: bool,
    /// Set when the decision was served from the cache (counters above are
    /// zero in that case, per the cache's contract).
    pub cache_hit: bool,
}

impl ResolveCheckResponseMetadata {
    /// Fold a completed child's metadata into this (parent) accumulator:
    /// counters sum, `cycle_detected` is sticky.
    pub fn fold(&mut self, child: &ResolveCheckResponseMetadata) {
        self.datastore_query_count += child.datastore_query_count;
        self.dispatch_count += child.dispatch_count;
        self.cycle_detected |= child.cycle_detected;
    }
}

/// A Check decision with its resolution metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResolveCheckResponse {
    pub allowed: bool,
    pub metadata: ResolveCheckResponseMetadata,
}

impl ResolveCheckResponse {
    pub fn new(allowed: bool, metadata: ResolveCheckResponseMetadata) -> Self {
        Self { allowed, metadata }
    }

    pub fn denied(metadata: ResolveCheckResponseMetadata) -> Self {
        Self::new(false, metadata)
    }
}

/// A batch of tuple writes/deletes for the datastore façade.
#[derive(Debug, Clone, Default)]
pub struct TupleWriteBatch {
    pub writes: Vec<Tuple>,
    pub deletes: Vec<TupleKey>,
}

/// Loose filter used by `TupleDatastore::read`: `None` fields act as
/// wildcards.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub object: Option<ObjectKey>,
    pub relation: Option<String>,
    pub user: Option<UserKey>,
}

impl TupleFilter {
    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(ref o) = self.object {
            if tuple.key.object != *o {
                return false;
            }
        }
        if let Some(ref r) = self.relation {
            if &tuple.key.relation != r {
                return false;
            }
        }
        if let Some(ref u) = self.user {
            if tuple.key.user != *u {
                return false;
            }
        }
        true
    }
}

/// Extra per-type user-type restrictions, keyed by `(object_type,
/// relation)`, used to decide whether a wildcard user is permitted on a
/// relation (§3 Invariants, §4.1 ThisRelation).
pub type TypeRestrictions = HashMap<(String, String), Vec<String>>;
