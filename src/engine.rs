//! The façade: wires the resolver chain (§2, §9) and the datastore/model
//! collaborators into one handle callers hold. `AuthorizationEngine` owns no
//! authorization logic itself, it builds the chain once at construction and
//! forwards every Check through it, plus exposes the tuple-write and
//! readiness operations `TupleDatastore` defines.

use crate::cache::CachedCheckResolver;
use crate::condition::ConditionEvaluator;
use crate::config::CheckResolverConfig;
use crate::datastore::{ReadinessStatus, TupleDatastore};
use crate::error::{CheckError, CheckResult};
use crate::local::LocalChecker;
use crate::models::{ResolveCheckRequest, ResolveCheckResponse, Tuple, TupleKey, TupleWriteBatch};
use crate::resolver::{build_resolver_chain, CheckContext, CheckResolver};
use crate::schema::ModelResolver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct AuthorizationEngine {
    datastore: Arc<dyn TupleDatastore>,
    models: Arc<dyn ModelResolver>,
    chain: Arc<dyn CheckResolver>,
    config: CheckResolverConfig,
}

impl AuthorizationEngine {
    pub fn new(
        datastore: Arc<dyn TupleDatastore>,
        models: Arc<dyn ModelResolver>,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        config: CheckResolverConfig,
    ) -> Self {
        let local = LocalChecker::new(
            datastore.clone(),
            models.clone(),
            condition_evaluator,
            config.max_concurrent_reads_for_check,
        );
        let cache = config
            .check_query_cache_enabled
            .then(|| CachedCheckResolver::new(config.check_query_cache_limit, config.check_query_cache_ttl));
        let chain = build_resolver_chain(local, cache);
        info!(
            resolve_node_limit = config.resolve_node_limit,
            resolve_node_breadth_limit = config.resolve_node_breadth_limit,
            cache_enabled = config.check_query_cache_enabled,
            "authorization engine resolver chain wired"
        );

        Self {
            datastore,
            models,
            chain,
            config,
        }
    }

    /// Convenience constructor over the in-memory reference datastore and
    /// model store, and the built-in boolean-context condition evaluator:
    /// everything this crate needs to run standalone.
    pub fn in_memory() -> (
        Self,
        Arc<crate::datastore::InMemoryTupleDatastore>,
        Arc<crate::schema::InMemoryModelStore>,
    ) {
        let datastore = Arc::new(crate::datastore::InMemoryTupleDatastore::new());
        let models = Arc::new(crate::schema::InMemoryModelStore::new());
        let engine = Self::new(
            datastore.clone(),
            models.clone(),
            Arc::new(crate::condition::BooleanContextEvaluator),
            CheckResolverConfig::default(),
        );
        (engine, datastore, models)
    }

    pub fn config(&self) -> &CheckResolverConfig {
        &self.config
    }

    pub fn models(&self) -> &Arc<dyn ModelResolver> {
        &self.models
    }

    /// Build a request for `store_id`/`model_id` (empty `model_id` resolves
    /// the latest registered model) with the engine's configured recursion
    /// depth, and resolve it.
    pub async fn check(
        &self,
        store_id: impl Into<String>,
        model_id: impl Into<String>,
        tuple_key: TupleKey,
        contextual_tuples: Vec<Tuple>,
        context: serde_json::Value,
    ) -> CheckResult<ResolveCheckResponse> {
        let request = ResolveCheckRequest::new(store_id, model_id, tuple_key)
            .with_contextual_tuples(contextual_tuples)
            .with_context(context)
            .with_depth(self.config.resolve_node_limit);
        self.check_request(request, CancellationToken::new()).await
    }

    /// Resolve a caller-built request directly, under a caller-supplied
    /// cancellation token (e.g. one tied to an RPC deadline) and the
    /// engine's configured `check_deadline` (§5 Deadlines): if the deadline
    /// elapses first, the token is cancelled so in-flight work unwinds
    /// promptly, and the caller sees `CheckError::DeadlineExceeded` rather
    /// than a cancellation error or `allowed: false`.
    pub async fn check_request(
        &self,
        request: ResolveCheckRequest,
        cancellation: CancellationToken,
    ) -> CheckResult<ResolveCheckResponse> {
        let ctx = CheckContext::root(request, cancellation.clone(), self.config.resolve_node_breadth_limit);

        match self.config.check_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.chain.resolve_check(&ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    cancellation.cancel();
                    Err(CheckError::DeadlineExceeded)
                }
            },
            None => self.chain.resolve_check(&ctx).await,
        }
    }

    pub async fn write_tuple(&self, store_id: &str, tuple: Tuple) -> CheckResult<()> {
        self.datastore.write_tuple(store_id, tuple).await
    }

    pub async fn delete_tuple(&self, store_id: &str, key: &TupleKey) -> CheckResult<()> {
        self.datastore.delete_tuple(store_id, key).await
    }

    pub async fn batch_write(&self, store_id: &str, batch: TupleWriteBatch) -> CheckResult<()> {
        self.datastore.batch_write(store_id, batch).await
    }

    pub async fn is_ready(&self) -> CheckResult<ReadinessStatus> {
        self.datastore.is_ready().await
    }

    /// Release resources owned by the resolver chain (the cache's backing
    /// store). Idempotent; call on shutdown.
    pub fn close(&self) {
        self.chain.close();
    }
}
