//! The cache resolver (§4.3): a TTL- and size-bounded async cache in front
//! of the local evaluator, keyed by request fingerprint. Only the decision
//! survives in the cache; resolution metadata is not, so a hit always
//! reports zeroed counters and `cache_hit: true`. Errors and cycle-detected
//! results are never inserted: a caller who hits a transient datastore
//! failure, or a cyclic model, should see the pipeline actually run again
//! next time rather than replay a poisoned answer for the TTL's duration.

use crate::error::CheckResult;
use crate::fingerprint::Fingerprint;
use crate::models::{ResolveCheckResponse, ResolveCheckResponseMetadata};
use crate::resolver::{CheckContext, CheckResolver};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
}

pub struct CachedCheckResolver {
    delegate: std::sync::OnceLock<Arc<dyn CheckResolver>>,
    cache: moka::future::Cache<Fingerprint, CachedDecision>,
}

impl CachedCheckResolver {
    pub fn new(max_capacity: u64, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            delegate: std::sync::OnceLock::new(),
            cache: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        })
    }
}

#[async_trait]
impl CheckResolver for CachedCheckResolver {
    fn set_delegate(&self, delegate: Arc<dyn CheckResolver>) {
        let _ = self.delegate.set(delegate);
    }

    fn close(&self) {
        self.cache.invalidate_all();
    }

    async fn resolve_check(&self, ctx: &CheckContext) -> CheckResult<ResolveCheckResponse> {
        let fingerprint = Fingerprint::of(&ctx.request);

        if let Some(decision) = self.cache.get(&fingerprint).await {
            tracing::debug!(%fingerprint, "check cache hit");
            return Ok(ResolveCheckResponse::new(
                decision.allowed,
                ResolveCheckResponseMetadata {
                    cache_hit: true,
                    ..Default::default()
                },
            ));
        }

        let delegate = self
            .delegate
            .get()
            .expect("resolver chain not wired: call build_resolver_chain before resolving checks");
        let response = delegate.resolve_check(ctx).await?;

        if !response.metadata.cycle_detected {
            self.cache
                .insert(fingerprint, CachedDecision { allowed: response.allowed })
                .await;
        }

        Ok(response)
    }
}
