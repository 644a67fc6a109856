//! Download strategies.
//!
//! Sequential vs pooled execution of a batch of [`DownloadRequest`]s.
//! Results are returned in request order.

use rayon::prelude::*;

use super::engine::{DownloadEngine, DownloadOutcome, DownloadRequest};
use super::error::{DownloadError, DownloadResult};

/// Called once per finished request, from whichever thread ran it.
pub type CompletionCallback<'a> =
    dyn Fn(&DownloadRequest, &DownloadResult<DownloadOutcome>) + Send + Sync + 'a;

/// Strategy for running a batch of downloads.
pub trait DownloadStrategy: Send + Sync {
    /// Execute every request, returning results in request order.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine performing each transfer
    /// * `requests` - Artifacts to fetch
    /// * `on_complete` - Optional per-request callback
    fn execute(
        &self,
        engine: &DownloadEngine,
        requests: &[DownloadRequest],
        on_complete: Option<&CompletionCallback<'_>>,
    ) -> Vec<DownloadResult<DownloadOutcome>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

fn run_one(
    engine: &DownloadEngine,
    request: &DownloadRequest,
    on_complete: Option<&CompletionCallback<'_>>,
) -> DownloadResult<DownloadOutcome> {
    let result = if engine.is_cancelled() {
        Err(DownloadError::Cancelled {
            url: request.url.clone(),
        })
    } else {
        engine.download(request)
    };
    if let Some(cb) = on_complete {
        cb(request, &result);
    }
    result
}

/// Downloads one request at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialStrategy;

impl SequentialStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl DownloadStrategy for SequentialStrategy {
    fn execute(
        &self,
        engine: &DownloadEngine,
        requests: &[DownloadRequest],
        on_complete: Option<&CompletionCallback<'_>>,
    ) -> Vec<DownloadResult<DownloadOutcome>> {
        requests
            .iter()
            .map(|r| run_one(engine, r, on_complete))
            .collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Downloads on a bounded worker pool.
///
/// Duplicate URLs within one batch are resolved by the engine's in-flight
/// set; the loser reports [`DownloadOutcome::InFlight`].
#[derive(Debug, Clone, Copy)]
pub struct ParallelStrategy {
    /// Maximum number of concurrent downloads.
    pub concurrency: usize,
}

impl ParallelStrategy {
    /// Create a new parallel strategy (minimum one worker).
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }
}

impl Default for ParallelStrategy {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DownloadStrategy for ParallelStrategy {
    fn execute(
        &self,
        engine: &DownloadEngine,
        requests: &[DownloadRequest],
        on_complete: Option<&CompletionCallback<'_>>,
    ) -> Vec<DownloadResult<DownloadOutcome>> {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("download-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build download pool, falling back to sequential");
                return SequentialStrategy.execute(engine, requests, on_complete);
            }
        };

        pool.install(|| {
            requests
                .par_iter()
                .map(|r| run_one(engine, r, on_complete))
                .collect()
        })
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

/// Build a strategy from a worker count; `0` or `1` means sequential.
pub fn strategy_for(workers: usize) -> Box<dyn DownloadStrategy> {
    if workers > 1 {
        Box::new(ParallelStrategy::new(workers))
    } else {
        Box::new(SequentialStrategy::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::testing::{MockTransport, Reply};
    use crate::download::InFlightSet;
    use crate::integrity::IntegrityChecker;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(temp: &TempDir, n: usize) -> (Arc<MockTransport>, Vec<DownloadRequest>) {
        let mut transport = MockTransport::new();
        let mut requests = Vec::new();
        for i in 0..n {
            let url = format!("http://x/s{}.xsd", i);
            transport = transport.with(&url, Reply::ok(format!("schema {}", i).into_bytes()));
            requests.push(DownloadRequest::new(url, temp.path().join(format!("s{}.xsd", i))));
        }
        (Arc::new(transport), requests)
    }

    fn engine(transport: Arc<MockTransport>) -> DownloadEngine {
        DownloadEngine::new(
            transport,
            Arc::new(IntegrityChecker::default()),
            Arc::new(InFlightSet::new()),
        )
    }

    #[test]
    fn test_parallel_strategy_min_concurrency() {
        assert_eq!(ParallelStrategy::new(0).concurrency, 1);
        assert_eq!(ParallelStrategy::default().concurrency, 4);
    }

    #[test]
    fn test_strategy_for() {
        assert_eq!(strategy_for(0).name(), "sequential");
        assert_eq!(strategy_for(1).name(), "sequential");
        assert_eq!(strategy_for(8).name(), "parallel");
    }

    #[test]
    fn test_sequential_preserves_order() {
        let temp = TempDir::new().unwrap();
        let (transport, requests) = setup(&temp, 3);
        let engine = engine(transport);

        let results = SequentialStrategy.execute(&engine, &requests, None);
        assert_eq!(results.len(), 3);
        for (i, result) in results.iter().enumerate() {
            let expected = format!("schema {}", i).len() as u64;
            assert_eq!(
                *result.as_ref().unwrap(),
                DownloadOutcome::Downloaded { bytes: expected }
            );
        }
    }

    #[test]
    fn test_parallel_downloads_everything() {
        let temp = TempDir::new().unwrap();
        let (transport, requests) = setup(&temp, 12);
        let engine = engine(transport.clone());
        let completed = AtomicUsize::new(0);
        let callback: &CompletionCallback<'_> = &|_, _| {
            completed.fetch_add(1, Ordering::SeqCst);
        };

        let results = ParallelStrategy::new(4).execute(&engine, &requests, Some(callback));
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(completed.load(Ordering::SeqCst), 12);
        for request in &requests {
            assert!(request.dest.exists());
            assert_eq!(transport.requests(&request.url), 1);
        }
    }

    #[test]
    fn test_parallel_duplicate_url_transfers_once() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new().with(
            "http://x/dup.xsd",
            Reply::slow(vec![b'x'; 4096], Duration::from_millis(25)),
        ));
        let engine = engine(transport.clone());
        let requests = vec![
            DownloadRequest::new("http://x/dup.xsd", temp.path().join("a").join("dup.xsd")),
            DownloadRequest::new("http://x/dup.xsd", temp.path().join("b").join("dup.xsd")),
        ];

        let results = ParallelStrategy::new(2).execute(&engine, &requests, None);
        assert_eq!(transport.requests("http://x/dup.xsd"), 1);
        let in_flight = results
            .iter()
            .filter(|r| matches!(r, Ok(DownloadOutcome::InFlight)))
            .count();
        assert_eq!(in_flight, 1);
    }

    #[test]
    fn test_cancelled_batch_does_nothing() {
        let temp = TempDir::new().unwrap();
        let (transport, requests) = setup(&temp, 3);
        let engine = engine(transport.clone()).with_cancel_flag(Arc::new(AtomicBool::new(true)));

        let results = SequentialStrategy.execute(&engine, &requests, None);
        assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_cancelled())));
        assert_eq!(transport.requests("http://x/s0.xsd"), 0);
    }
}
