//! The local evaluator (§4.1): walks one relation's rewrite tree against the
//! datastore and the request's contextual tuples, dispatching back through
//! the head of the resolver chain for `ComputedUserset`, `TupleToUserset`,
//! and userset expansion. This is the piece that actually reads tuples;
//! everything upstream of it (cycle detection, caching) only decides
//! whether to call it.

use crate::bounded::BoundedTupleReader;
use crate::combined::CombinedTupleReader;
use crate::condition::ConditionEvaluator;
use crate::datastore::{TupleDatastore, UsersetFilter};
use crate::error::{CheckError, CheckResult};
use crate::models::{
    ObjectKey, ResolveCheckResponse, ResolveCheckResponseMetadata, Tuple, TupleFilter, TupleKey, UserKey,
};
use crate::schema::{AuthorizationModel, ModelResolver, Rewrite};
use crate::resolver::{CheckContext, CheckResolver};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct LocalChecker {
    /// The head of the resolver chain, wired in by `build_resolver_chain`.
    /// Sub-checks re-enter here so cycle detection and caching apply to
    /// them too, not just to the top-level request.
    dispatcher: Arc<std::sync::OnceLock<Arc<dyn CheckResolver>>>,
    datastore: Arc<dyn TupleDatastore>,
    models: Arc<dyn ModelResolver>,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
    read_semaphore: Option<Arc<Semaphore>>,
}

impl LocalChecker {
    pub fn new(
        datastore: Arc<dyn TupleDatastore>,
        models: Arc<dyn ModelResolver>,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        max_concurrent_reads_for_check: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::new(std::sync::OnceLock::new()),
            datastore,
            models,
            condition_evaluator,
            read_semaphore: max_concurrent_reads_for_check.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    fn dispatcher(&self) -> Arc<dyn CheckResolver> {
        self.dispatcher
            .get()
            .expect("resolver chain not wired: call build_resolver_chain before resolving checks")
            .clone()
    }

    /// Re-enter the resolver chain for a sub-check, folding the one extra
    /// dispatch this call represents on top of whatever the sub-check itself
    /// dispatched.
    async fn dispatch(&self, ctx: &CheckContext, tuple_key: TupleKey) -> CheckResult<ResolveCheckResponse> {
        let child_ctx = ctx.dispatch(tuple_key);
        let mut response = self.dispatcher().resolve_check(&child_ctx).await?;
        response.metadata.dispatch_count += 1;
        Ok(response)
    }

    async fn tuple_condition_holds(&self, tuple: &Tuple, context: &serde_json::Value) -> CheckResult<bool> {
        match &tuple.condition {
            None => Ok(true),
            Some(condition) => self.condition_evaluator.evaluate(condition, context).await,
        }
    }

    /// Evaluate every branch concurrently, short-circuiting as soon as one
    /// returns `want`. An error from a branch that hasn't yet decided the
    /// outcome is remembered but not propagated until every other branch has
    /// also finished without deciding it (§7: one child's error must not
    /// fail a Union another child has already satisfied).
    async fn fan_out(
        &self,
        mut joinset: JoinSet<CheckResult<ResolveCheckResponse>>,
        group_cancel: CancellationToken,
        want: bool,
    ) -> CheckResult<ResolveCheckResponse> {
        let mut metadata = ResolveCheckResponseMetadata::default();
        let mut pending_error: Option<CheckError> = None;

        while let Some(joined) = joinset.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(_) => Err(CheckError::Cancelled),
            };
            match result {
                Ok(response) => {
                    metadata.fold(&response.metadata);
                    if response.allowed == want {
                        group_cancel.cancel();
                        joinset.abort_all();
                        return Ok(ResolveCheckResponse::new(want, metadata));
                    }
                }
                Err(err) => {
                    pending_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = pending_error {
            return Err(err);
        }
        Ok(ResolveCheckResponse::new(!want, metadata))
    }

    /// `This`: direct tuple assignment, wildcard assignment, and userset
    /// expansion (a stored tuple whose user is itself a userset, e.g.
    /// `document:1#viewer@group:eng#member`, is expanded by dispatching the
    /// userset's own relation for the same target user).
    async fn evaluate_this(
        &self,
        ctx: &CheckContext,
        reader: &BoundedTupleReader,
        model: &Arc<AuthorizationModel>,
    ) -> CheckResult<ResolveCheckResponse> {
        let mut metadata = ResolveCheckResponseMetadata::default();
        let tuple_key = &ctx.request.tuple_key;

        let (tuple, store_hit) = reader.read_user_tuple(&ctx.request.store_id, tuple_key, &ctx.cancellation).await?;
        if store_hit {
            metadata.datastore_query_count += 1;
        }
        if let Some(tuple) = tuple {
            if self.tuple_condition_holds(&tuple, &ctx.request.context).await? {
                return Ok(ResolveCheckResponse::new(true, metadata));
            }
        }

        if let UserKey::Terminal(user_object) = &tuple_key.user {
            if model.allows_wildcard(&tuple_key.object.object_type, &tuple_key.relation, &user_object.object_type) {
                let wildcard_key = TupleKey::new(
                    tuple_key.object.clone(),
                    tuple_key.relation.clone(),
                    UserKey::wildcard(user_object.object_type.clone()),
                );
                let (tuple, store_hit) = reader
                    .read_user_tuple(&ctx.request.store_id, &wildcard_key, &ctx.cancellation)
                    .await?;
                if store_hit {
                    metadata.datastore_query_count += 1;
                }
                if let Some(tuple) = tuple {
                    if self.tuple_condition_holds(&tuple, &ctx.request.context).await? {
                        return Ok(ResolveCheckResponse::new(true, metadata));
                    }
                }
            }
        }

        let filter = UsersetFilter {
            object: tuple_key.object.clone(),
            relation: tuple_key.relation.clone(),
            allowed_user_types: Vec::new(),
        };
        let userset_tuples = reader
            .read_userset_tuples(&ctx.request.store_id, &filter, &ctx.cancellation)
            .await?;
        metadata.datastore_query_count += 1;

        if userset_tuples.is_empty() {
            return Ok(ResolveCheckResponse::new(false, metadata));
        }

        let group_cancel = ctx.cancellation.child_token();
        let mut joinset = JoinSet::new();
        for tuple in userset_tuples {
            let UserKey::Userset { object, relation } = tuple.key.user else {
                continue;
            };
            let child_tuple_key = TupleKey::new(object, relation, tuple_key.user.clone());
            let checker = self.clone();
            let child_ctx = ctx.with_cancellation(group_cancel.clone());
            joinset.spawn(async move { checker.dispatch(&child_ctx, child_tuple_key).await });
        }

        let outcome = self.fan_out(joinset, group_cancel, true).await?;
        metadata.fold(&outcome.metadata);
        Ok(ResolveCheckResponse::new(outcome.allowed, metadata))
    }

    /// `ComputedUserset(cr)`: the same object, a different relation, the
    /// same target user.
    async fn evaluate_computed(&self, relation: &str, ctx: &CheckContext) -> CheckResult<ResolveCheckResponse> {
        let tuple_key = TupleKey::new(
            ctx.request.tuple_key.object.clone(),
            relation.to_string(),
            ctx.request.tuple_key.user.clone(),
        );
        self.dispatch(ctx, tuple_key).await
    }

    /// `TupleToUserset(ts, cr)`: read the tupleset relation, then dispatch
    /// `cr` on each referenced object. A referenced object is skipped if the
    /// model doesn't define `cr` for its type (§4.1: "terminal users in the
    /// tupleset relation are ignored unless `cr` names a relation they
    /// possess"). The same rule handles both a literal terminal reference
    /// and a userset reference whose relation part we discard, since the
    /// tupleset relation's user is always read as "an object", never
    /// expanded as a userset in its own right.
    async fn evaluate_ttu(
        &self,
        tupleset_relation: &str,
        computed_relation: &str,
        ctx: &CheckContext,
        reader: &BoundedTupleReader,
        model: &Arc<AuthorizationModel>,
    ) -> CheckResult<ResolveCheckResponse> {
        let filter = TupleFilter {
            object: Some(ctx.request.tuple_key.object.clone()),
            relation: Some(tupleset_relation.to_string()),
            user: None,
        };
        let tuples = reader.read(&ctx.request.store_id, &filter, &ctx.cancellation).await?;
        let mut metadata = ResolveCheckResponseMetadata {
            datastore_query_count: 1,
            ..Default::default()
        };

        let mut candidates: Vec<ObjectKey> = Vec::new();
        for tuple in tuples {
            let candidate = match tuple.key.user {
                UserKey::Terminal(object) => object,
                UserKey::Userset { object, .. } => object,
                UserKey::Wildcard { .. } => continue,
            };
            if model.get_rewrite(&candidate.object_type, computed_relation).is_ok() {
                candidates.push(candidate);
            }
        }

        if candidates.is_empty() {
            return Ok(ResolveCheckResponse::new(false, metadata));
        }

        let group_cancel = ctx.cancellation.child_token();
        let mut joinset = JoinSet::new();
        for object in candidates {
            let tuple_key = TupleKey::new(object, computed_relation.to_string(), ctx.request.tuple_key.user.clone());
            let checker = self.clone();
            let child_ctx = ctx.with_cancellation(group_cancel.clone());
            joinset.spawn(async move { checker.dispatch(&child_ctx, tuple_key).await });
        }

        let outcome = self.fan_out(joinset, group_cancel, true).await?;
        metadata.fold(&outcome.metadata);
        Ok(ResolveCheckResponse::new(outcome.allowed, metadata))
    }

    /// Recursive node evaluation, boxed because `Union`/`Intersection`/
    /// `Difference` evaluate this same function again for their children.
    fn evaluate<'a>(
        &'a self,
        rewrite: &'a Rewrite,
        ctx: &'a CheckContext,
        reader: &'a BoundedTupleReader,
        model: &'a Arc<AuthorizationModel>,
    ) -> Pin<Box<dyn Future<Output = CheckResult<ResolveCheckResponse>> + Send + 'a>> {
        Box::pin(async move {
            if ctx.cancellation.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let _permit = tokio::select! {
                biased;
                _ = ctx.cancellation.cancelled() => return Err(CheckError::Cancelled),
                permit = ctx.breadth.clone().acquire_owned() => permit.map_err(|_| CheckError::Cancelled)?,
            };

            match rewrite {
                Rewrite::This => self.evaluate_this(ctx, reader, model).await,
                Rewrite::ComputedUserset(relation) => self.evaluate_computed(relation, ctx).await,
                Rewrite::TupleToUserset {
                    tupleset_relation,
                    computed_relation,
                } => {
                    self.evaluate_ttu(tupleset_relation, computed_relation, ctx, reader, model)
                        .await
                }
                Rewrite::Union(children) => {
                    let group_cancel = ctx.cancellation.child_token();
                    let mut joinset = JoinSet::new();
                    for child in children {
                        let checker = self.clone();
                        let child_rewrite = child.clone();
                        let child_ctx = ctx.with_cancellation(group_cancel.clone());
                        let reader = reader.clone();
                        let model = model.clone();
                        joinset.spawn(async move { checker.evaluate(&child_rewrite, &child_ctx, &reader, &model).await });
                    }
                    self.fan_out(joinset, group_cancel, true).await
                }
                Rewrite::Intersection(children) => {
                    let group_cancel = ctx.cancellation.child_token();
                    let mut joinset = JoinSet::new();
                    for child in children {
                        let checker = self.clone();
                        let child_rewrite = child.clone();
                        let child_ctx = ctx.with_cancellation(group_cancel.clone());
                        let reader = reader.clone();
                        let model = model.clone();
                        joinset.spawn(async move { checker.evaluate(&child_rewrite, &child_ctx, &reader, &model).await });
                    }
                    self.fan_out(joinset, group_cancel, false).await
                }
                Rewrite::Difference { base, subtract } => {
                    let group_cancel = ctx.cancellation.child_token();
                    let base_ctx = ctx.with_cancellation(group_cancel.clone());
                    let subtract_ctx = ctx.with_cancellation(group_cancel.clone());

                    let base_checker = self.clone();
                    let base_rewrite = base.as_ref().clone();
                    let base_reader = reader.clone();
                    let base_model = model.clone();
                    let base_handle = tokio::spawn(
                        async move { base_checker.evaluate(&base_rewrite, &base_ctx, &base_reader, &base_model).await },
                    );

                    let subtract_checker = self.clone();
                    let subtract_rewrite = subtract.as_ref().clone();
                    let subtract_reader = reader.clone();
                    let subtract_model = model.clone();
                    let subtract_handle = tokio::spawn(async move {
                        subtract_checker
                            .evaluate(&subtract_rewrite, &subtract_ctx, &subtract_reader, &subtract_model)
                            .await
                    });

                    let base_result = base_handle.await.map_err(|_| CheckError::Cancelled)?;

                    let base_response = match base_result {
                        Ok(response) if !response.allowed => {
                            // base already decided the outcome: cancel subtract's
                            // group before waiting on it, not after, so it can
                            // actually stop early.
                            group_cancel.cancel();
                            let mut metadata = response.metadata;
                            if let Ok(Ok(subtract_response)) = subtract_handle.await {
                                metadata.fold(&subtract_response.metadata);
                            }
                            return Ok(ResolveCheckResponse::new(false, metadata));
                        }
                        Ok(response) => response,
                        Err(err) => {
                            group_cancel.cancel();
                            let _ = subtract_handle.await;
                            return Err(err);
                        }
                    };

                    let subtract_response = subtract_handle.await.map_err(|_| CheckError::Cancelled)??;
                    let mut metadata = ResolveCheckResponseMetadata::default();
                    metadata.fold(&base_response.metadata);
                    metadata.fold(&subtract_response.metadata);
                    Ok(ResolveCheckResponse::new(base_response.allowed && !subtract_response.allowed, metadata))
                }
            }
        })
    }
}

#[async_trait]
impl CheckResolver for LocalChecker {
    fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        let _ = self.dispatcher.set(delegate);
    }

    async fn resolve_check(&self, ctx: &CheckContext) -> CheckResult<ResolveCheckResponse> {
        if ctx.request.resolution_metadata.depth == 0 {
            return Err(CheckError::ResolutionDepthExceeded);
        }
        if ctx.cancellation.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        let model_id = if ctx.request.model_id.is_empty() {
            None
        } else {
            Some(ctx.request.model_id.as_str())
        };
        let model = self.models.resolve(&ctx.request.store_id, model_id).await?;
        let rewrite = model
            .get_rewrite(&ctx.request.tuple_key.object.object_type, &ctx.request.tuple_key.relation)?
            .clone();

        let reader = BoundedTupleReader::with_shared_semaphore(
            CombinedTupleReader::new(self.datastore.clone(), ctx.request.contextual_tuples.clone()),
            self.read_semaphore.clone(),
        );

        self.evaluate(&rewrite, ctx, &reader, &model).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::BooleanContextEvaluator;
    use crate::datastore::InMemoryTupleDatastore;
    use crate::models::{Condition, ResolveCheckRequest};
    use crate::resolver::build_resolver_chain;
    use crate::schema::{AuthorizationModel, InMemoryModelStore, Rewrite, TypeRestriction};
    use serde_json::json;

    fn chain_over(datastore: Arc<InMemoryTupleDatastore>, models: Arc<InMemoryModelStore>) -> Arc<dyn CheckResolver> {
        let local = LocalChecker::new(datastore, models, Arc::new(BooleanContextEvaluator), None);
        build_resolver_chain(local, None)
    }

    fn request(key: TupleKey) -> ResolveCheckRequest {
        // Empty model_id asks `ModelResolver` for the latest registered model.
        ResolveCheckRequest::new("store1", "", key)
    }

    #[tokio::test]
    async fn direct_tuple_grants_access() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation("document", "viewer", Rewrite::This)
        });
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        datastore.write_tuple("store1", Tuple::new(key.clone())).await.unwrap();

        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn missing_tuple_denies_access() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation("document", "viewer", Rewrite::This)
        });
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));

        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn computed_userset_grants_through_owner() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1")
                .with_relation("document", "owner", Rewrite::This)
                .with_relation(
                    "document",
                    "viewer",
                    Rewrite::union([Rewrite::This, Rewrite::computed("owner")]),
                )
        });
        let owner_key = TupleKey::new(ObjectKey::new("document", "1"), "owner", UserKey::user("user", "alice"));
        datastore.write_tuple("store1", Tuple::new(owner_key)).await.unwrap();

        let viewer_key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(viewer_key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
        assert!(response.metadata.dispatch_count >= 1);
    }

    #[tokio::test]
    async fn tuple_to_userset_grants_through_parent_folder() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1")
                .with_relation("folder", "viewer", Rewrite::This)
                .with_relation(
                    "document",
                    "viewer",
                    Rewrite::union([Rewrite::This, Rewrite::tuple_to_userset("parent", "viewer")]),
                )
        });
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(
                    ObjectKey::new("document", "1"),
                    "parent",
                    UserKey::user("folder", "x"),
                )),
            )
            .await
            .unwrap();
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("folder", "x"), "viewer", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();

        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn intersection_requires_both_branches() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1")
                .with_relation("document", "approver", Rewrite::This)
                .with_relation("document", "is_manager", Rewrite::This)
                .with_relation(
                    "document",
                    "can_approve",
                    Rewrite::intersection([Rewrite::computed("approver"), Rewrite::computed("is_manager")]),
                )
        });
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("document", "1"), "approver", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();

        let key = TupleKey::new(ObjectKey::new("document", "1"), "can_approve", UserKey::user("user", "alice"));
        let chain = chain_over(datastore.clone(), models.clone());
        let ctx = CheckContext::root(request(key.clone()), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(!response.allowed, "approver alone must not satisfy the intersection");

        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("document", "1"), "is_manager", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn difference_excludes_explicit_ban() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1")
                .with_relation("document", "editor", Rewrite::This)
                .with_relation("document", "banned", Rewrite::This)
                .with_relation(
                    "document",
                    "can_edit",
                    Rewrite::difference(Rewrite::computed("editor"), Rewrite::computed("banned")),
                )
        });
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("document", "1"), "editor", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("document", "1"), "banned", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();

        let key = TupleKey::new(ObjectKey::new("document", "1"), "can_edit", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn wildcard_grants_when_relation_allows_it() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation_restricted(
                "document",
                "viewer",
                Rewrite::This,
                vec![TypeRestriction {
                    object_type: "user".to_string(),
                    allows_wildcard: true,
                }],
            )
        });
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::wildcard("user"))),
            )
            .await
            .unwrap();

        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn cyclic_model_resolves_to_denied_without_hanging() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1")
                .with_relation("document", "viewer", Rewrite::computed("editor"))
                .with_relation("document", "editor", Rewrite::computed("viewer"))
        });

        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);
        let ctx = CheckContext::root(request(key), CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(!response.allowed);
        assert!(response.metadata.cycle_detected);
    }

    #[tokio::test]
    async fn depth_exhaustion_is_an_error_not_a_denial() {
        // A three-hop parent chain (folder:0 -> folder:1 -> folder:2, with the
        // grant on folder:2) that never repeats a fingerprint, so it must be
        // caught by the depth budget rather than cycle detection.
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation(
                "folder",
                "viewer",
                Rewrite::union([Rewrite::This, Rewrite::tuple_to_userset("parent", "viewer")]),
            )
        });
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("folder", "0"), "parent", UserKey::user("folder", "1"))),
            )
            .await
            .unwrap();
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("folder", "1"), "parent", UserKey::user("folder", "2"))),
            )
            .await
            .unwrap();
        datastore
            .write_tuple(
                "store1",
                Tuple::new(TupleKey::new(ObjectKey::new("folder", "2"), "viewer", UserKey::user("user", "alice"))),
            )
            .await
            .unwrap();

        let key = TupleKey::new(ObjectKey::new("folder", "0"), "viewer", UserKey::user("user", "alice"));
        let chain = chain_over(datastore, models);

        let mut shallow = request(key.clone());
        shallow.resolution_metadata.depth = 2;
        let ctx = CheckContext::root(shallow, CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await;
        assert!(matches!(response, Err(CheckError::ResolutionDepthExceeded)));

        let mut deep = request(key);
        deep.resolution_metadata.depth = 25;
        let ctx = CheckContext::root(deep, CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn conditioned_tuple_denies_when_condition_fails() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation("document", "viewer", Rewrite::This)
        });
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));
        datastore
            .write_tuple(
                "store1",
                Tuple::new(key.clone()).with_condition(Condition {
                    name: "is_business_hours".to_string(),
                    context: serde_json::Value::Null,
                }),
            )
            .await
            .unwrap();

        let chain = chain_over(datastore, models);
        let mut req = request(key);
        req.context = json!({ "is_business_hours": false });
        let ctx = CheckContext::root(req, CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn contextual_tuple_overrides_an_empty_store() {
        let datastore = Arc::new(InMemoryTupleDatastore::new());
        let models = Arc::new(InMemoryModelStore::new());
        models.register("store1", |id| {
            AuthorizationModel::new(id, "store1").with_relation("document", "viewer", Rewrite::This)
        });
        let key = TupleKey::new(ObjectKey::new("document", "1"), "viewer", UserKey::user("user", "alice"));

        let chain = chain_over(datastore, models);
        let req = request(key.clone()).with_contextual_tuples(vec![Tuple::new(key)]);
        let ctx = CheckContext::root(req, CancellationToken::new(), 100);
        let response = chain.resolve_check(&ctx).await.unwrap();
        assert!(response.allowed);
    }
}
