//! The resolver chain abstraction (§9 Design Notes): Check resolution is a
//! pipeline of values that each implement one capability: resolve a check,
//! release owned resources, and wire a delegate, rather than one monolithic
//! engine. `CycleDetectionResolver`, `CachedCheckResolver`, and `LocalChecker`
//! each implement `CheckResolver`; `build_resolver_chain` wires them into the
//! order §2 specifies: cycle detection, then the optional cache, then the
//! local evaluator, which dispatches sub-checks back through the head of the
//! chain so cycle detection and caching apply uniformly at every depth.

use crate::error::CheckResult;
use crate::fingerprint::Fingerprint;
use crate::models::ResolveCheckRequest;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::models::ResolveCheckResponse;

/// Everything a resolver needs to evaluate one node of the dispatch tree:
/// the request itself, the fingerprints already visited on this path (for
/// cycle detection), the cancellation token for this branch, and the
/// breadth semaphore shared across the whole top-level request.
#[derive(Clone)]
pub struct CheckContext {
    pub request: ResolveCheckRequest,
    pub visited: HashSet<Fingerprint>,
    pub cancellation: CancellationToken,
    pub breadth: Arc<Semaphore>,
}

impl CheckContext {
    /// The context for a brand-new top-level Check. `breadth_limit` bounds
    /// concurrently executing sub-resolvers across every level of this one
    /// request (§4.1, §6 `resolve_node_breadth_limit`).
    pub fn root(request: ResolveCheckRequest, cancellation: CancellationToken, breadth_limit: usize) -> Self {
        Self {
            request,
            visited: HashSet::new(),
            cancellation,
            breadth: Arc::new(Semaphore::new(breadth_limit.max(1))),
        }
    }

    /// A context for a sub-dispatch: new tuple key, depth decremented,
    /// visited set and breadth semaphore carried forward unchanged.
    pub fn dispatch(&self, tuple_key: crate::models::TupleKey) -> Self {
        Self {
            request: self.request.dispatch(tuple_key),
            visited: self.visited.clone(),
            cancellation: self.cancellation.clone(),
            breadth: self.breadth.clone(),
        }
    }

    /// The same context with a different cancellation token, used to give
    /// a fan-out group (a Union/Intersection/Difference's children) a token
    /// the evaluator can cancel on short-circuit without touching the
    /// parent branch.
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self {
            request: self.request.clone(),
            visited: self.visited.clone(),
            cancellation,
            breadth: self.breadth.clone(),
        }
    }
}

/// One capability: resolve a check. Implementations form a chain by holding
/// a delegate: the next resolver forward for `CycleDetectionResolver` and
/// `CachedCheckResolver`, or the head of the whole chain for `LocalChecker`,
/// which re-enters it on every sub-dispatch.
#[async_trait]
pub trait CheckResolver: Send + Sync {
    async fn resolve_check(&self, ctx: &CheckContext) -> CheckResult<ResolveCheckResponse>;

    /// Wire this resolver's delegate. Called once, while the chain is being
    /// built; resolvers that have no further delegate to wire (there are
    /// none in this chain) may ignore it.
    fn set_delegate(&self, delegate: Arc<dyn CheckResolver>);

    /// Release any owned resources (e.g. the cache's backing store).
    /// Default no-op; only `CachedCheckResolver` overrides it.
    fn close(&self) {}
}

/// Detects a fingerprint repeating on the current dispatch path (§4.2) and
/// short-circuits it as `{allowed: false, cycle_detected: true}`, a result,
/// not an error, so a cyclic branch of a larger Union/Intersection doesn't
/// poison sibling branches that don't depend on the cycle.
pub struct CycleDetectionResolver {
    delegate: std::sync::OnceLock<Arc<dyn CheckResolver>>,
}

impl CycleDetectionResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delegate: std::sync::OnceLock::new(),
        })
    }
}

#[async_trait]
impl CheckResolver for CycleDetectionResolver {
    fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        let _ = self.delegate.set(delegate);
    }

    async fn resolve_check(&self, ctx: &CheckContext) -> CheckResult<ResolveCheckResponse> {
        let fingerprint = Fingerprint::of(&ctx.request);
        if ctx.visited.contains(&fingerprint) {
            tracing::debug!(%fingerprint, "cycle detected");
            return Ok(ResolveCheckResponse::new(
                false,
                crate::models::ResolveCheckResponseMetadata {
                    cycle_detected: true,
                    ..Default::default()
                },
            ));
        }

        let mut visited = ctx.visited.clone();
        visited.insert(fingerprint);
        let next = CheckContext { visited, ..ctx.clone() };

        let delegate = self
            .delegate
            .get()
            .expect("resolver chain not wired: call build_resolver_chain before resolving checks");
        delegate.resolve_check(&next).await
    }
}

/// Wire `CycleDetectionResolver -> [CachedCheckResolver] -> LocalChecker`,
/// with `LocalChecker`'s own delegate set back to the head so recursive
/// sub-dispatches run through cycle detection and caching again. Returns the
/// head of the chain, the value callers invoke.
pub fn build_resolver_chain(
    local: Arc<crate::local::LocalChecker>,
    cache: Option<Arc<crate::cache::CachedCheckResolver>>,
) -> Arc<dyn CheckResolver> {
    let cycle = CycleDetectionResolver::new();

    match cache {
        Some(cache) => {
            cycle.set_delegate(cache.clone());
            cache.set_delegate(local.clone());
        }
        None => {
            cycle.set_delegate(local.clone());
        }
    }

    local.set_delegate(cycle.clone());
    cycle
}
