//! Resolver-stack configuration (§6). The core does not own process
//! configuration, that's the gateway's job, so this is a plain struct
//! with a `Default`, set up via builder methods the way the teacher wires
//! `AuthorizationEngine::with_cache`/`with_debug`, not a config-file loader.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CheckResolverConfig {
    /// Maximum recursion depth before `ResolutionDepthExceeded`.
    pub resolve_node_limit: u32,
    /// Maximum concurrent sub-resolvers per request across all levels.
    pub resolve_node_breadth_limit: usize,
    /// Semaphore width for datastore reads on Check. `None` means
    /// effectively unlimited.
    pub max_concurrent_reads_for_check: Option<usize>,
    pub check_query_cache_enabled: bool,
    pub check_query_cache_limit: u64,
    pub check_query_cache_ttl: Duration,
    /// Overall wall-clock budget for one Check (§5 Deadlines). `None` means
    /// no deadline is enforced; the resolver stack still honors a caller-
    /// supplied `CancellationToken` regardless of this setting.
    pub check_deadline: Option<Duration>,
}

impl Default for CheckResolverConfig {
    fn default() -> Self {
        Self {
            resolve_node_limit: 25,
            resolve_node_breadth_limit: 100,
            max_concurrent_reads_for_check: None,
            check_query_cache_enabled: true,
            check_query_cache_limit: 10_000,
            check_query_cache_ttl: Duration::from_secs(10),
            check_deadline: Some(Duration::from_secs(3)),
        }
    }
}

impl CheckResolverConfig {
    pub fn with_resolve_node_limit(mut self, limit: u32) -> Self {
        self.resolve_node_limit = limit;
        self
    }

    pub fn with_resolve_node_breadth_limit(mut self, limit: usize) -> Self {
        self.resolve_node_breadth_limit = limit;
        self
    }

    pub fn with_max_concurrent_reads(mut self, limit: usize) -> Self {
        self.max_concurrent_reads_for_check = Some(limit);
        self
    }

    pub fn with_cache_disabled(mut self) -> Self {
        self.check_query_cache_enabled = false;
        self
    }

    pub fn with_cache_limit(mut self, limit: u64) -> Self {
        self.check_query_cache_limit = limit;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.check_query_cache_ttl = ttl;
        self
    }

    pub fn with_check_deadline(mut self, deadline: Duration) -> Self {
        self.check_deadline = Some(deadline);
        self
    }

    pub fn with_no_check_deadline(mut self) -> Self {
        self.check_deadline = None;
        self
    }
}
