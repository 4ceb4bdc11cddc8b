//! A semaphore-wrapped façade over a tuple reader that caps concurrent
//! datastore reads per request (§4.4). A blocked acquirer aborts on request
//! cancellation and returns `CheckError::Cancelled` without ever having
//! counted against the limit. The wait from acquisition attempt to
//! admission is recorded on the current tracing span, operators use it to
//! size the pool.

use crate::combined::CombinedTupleReader;
use crate::datastore::{ReadinessStatus, StartingWithUserFilter, UsersetFilter};
use crate::error::{CheckError, CheckResult};
use crate::models::{Tuple, TupleFilter, TupleKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct BoundedTupleReader {
    inner: CombinedTupleReader,
    /// `None` means effectively unlimited concurrency.
    semaphore: Option<Arc<Semaphore>>,
}

impl BoundedTupleReader {
    pub fn new(inner: CombinedTupleReader, max_concurrent_reads: Option<usize>) -> Self {
        Self {
            inner,
            semaphore: max_concurrent_reads.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Build a reader sharing an already-constructed semaphore, so a single
    /// `LocalChecker`-wide limit can back a fresh `CombinedTupleReader` per
    /// request without re-sizing the pool each time.
    pub fn with_shared_semaphore(inner: CombinedTupleReader, semaphore: Option<Arc<Semaphore>>) -> Self {
        Self { inner, semaphore }
    }

    async fn admit<F, T>(&self, cancellation: &CancellationToken, op: F) -> CheckResult<T>
    where
        F: Future<Output = CheckResult<T>>,
    {
        let Some(semaphore) = &self.semaphore else {
            return op.await;
        };

        let started_waiting = Instant::now();
        let permit = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(CheckError::Cancelled),
            permit = semaphore.clone().acquire_owned() => {
                permit.map_err(|_| CheckError::Cancelled)?
            }
        };
        let wait = started_waiting.elapsed();
        debug!(wait_ms = wait.as_secs_f64() * 1000.0, "admitted datastore read");

        let result = op.await;
        drop(permit);
        result
    }

    pub async fn read_user_tuple(
        &self,
        store_id: &str,
        key: &TupleKey,
        cancellation: &CancellationToken,
    ) -> CheckResult<(Option<Tuple>, bool)> {
        self.admit(cancellation, self.inner.read_user_tuple(store_id, key)).await
    }

    pub async fn read(
        &self,
        store_id: &str,
        filter: &TupleFilter,
        cancellation: &CancellationToken,
    ) -> CheckResult<Vec<Tuple>> {
        self.admit(cancellation, self.inner.read(store_id, filter)).await
    }

    pub async fn read_userset_tuples(
        &self,
        store_id: &str,
        filter: &UsersetFilter,
        cancellation: &CancellationToken,
    ) -> CheckResult<Vec<Tuple>> {
        self.admit(cancellation, self.inner.read_userset_tuples(store_id, filter)).await
    }

    pub async fn read_starting_with_user(
        &self,
        store_id: &str,
        filter: &StartingWithUserFilter,
        cancellation: &CancellationToken,
    ) -> CheckResult<Vec<Tuple>> {
        self.admit(
            cancellation,
            self.inner.read_starting_with_user(store_id, filter),
        )
        .await
    }

    pub async fn is_ready(&self, datastore: &dyn crate::datastore::TupleDatastore) -> CheckResult<ReadinessStatus> {
        // Readiness probes don't consume a read permit.
        datastore.is_ready().await
    }
}
