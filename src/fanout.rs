//! Fan-out/fan-in over remote lookups.
//!
//! [`run_bounded`] and [`run_collect`] spawn one task per id, cap how many
//! run at once, gather successes into an accumulator and return the first
//! failure as soon as it happens. Later failures are dropped (or logged,
//! see [`DroppedFailures`]). Units that have not yet started their remote
//! call when a failure lands skip it; in-flight calls finish and their
//! results are thrown away with the accumulator.
//!
//! ```text
//! ids ──► spawn ──► admit ──► work(id, trace) ──► accumulator
//!                                   │
//!                                   └─ Err ──► failure channel ──► caller
//! ```

pub mod accumulator;
pub mod channel;
pub mod group;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::trace::StageTrace;

pub use accumulator::{Accumulator, SyncMap, SyncVec};
pub use channel::{DroppedFailures, Failure, FailureChannel};
pub use group::{Progress, TaskGroup};

/// Errors surfaced by a fan-out.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError<E> {
    /// The first unit of work that failed.
    #[error("{0}")]
    Unit(E),

    /// A unit of work panicked instead of returning.
    #[error("unit of work for {key} panicked")]
    Panicked { key: String },
}

/// How a fan-out runs.
#[derive(Debug, Clone)]
pub struct FanoutOptions {
    /// Stage name entered on the caller's trace for the duration of the run.
    pub label: String,

    /// Admission cap. `None` or `Some(0)` means unbounded.
    pub max_concurrent: Option<usize>,

    /// Receives a snapshot after every completion.
    pub progress: Option<watch::Sender<Progress>>,

    pub dropped: DroppedFailures,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            label: "fan-out".to_string(),
            max_concurrent: None,
            progress: None,
            dropped: DroppedFailures::Discard,
        }
    }
}

impl FanoutOptions {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }
}

/// Run `work` for every id and collect the results by id.
///
/// Returns exactly one entry per id when every unit succeeds. On failure
/// the unit's own trace is appended to `trace` and the partial results are
/// discarded.
pub async fn run_bounded<K, T, E, F>(
    ids: Vec<K>,
    options: &FanoutOptions,
    trace: &mut StageTrace,
    work: F,
) -> Result<HashMap<K, T>, FanoutError<E>>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: for<'a> Fn(K, &'a mut StageTrace) -> BoxFuture<'a, Result<T, E>> + Send + Sync + 'static,
{
    let results = Arc::new(SyncMap::with_capacity(ids.len()));
    run(ids, options, trace, Arc::clone(&results), work).await?;
    Ok(results.take())
}

/// Like [`run_bounded`], but the results come back in no particular order.
pub async fn run_collect<K, T, E, F>(
    ids: Vec<K>,
    options: &FanoutOptions,
    trace: &mut StageTrace,
    work: F,
) -> Result<Vec<T>, FanoutError<E>>
where
    K: Clone + fmt::Display + Send + Sync + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: for<'a> Fn(K, &'a mut StageTrace) -> BoxFuture<'a, Result<T, E>> + Send + Sync + 'static,
{
    let results = Arc::new(SyncVec::with_capacity(ids.len()));
    run(ids, options, trace, Arc::clone(&results), work).await?;
    Ok(Accumulator::<K, T>::take(&*results))
}

async fn run<K, T, E, A, F>(
    ids: Vec<K>,
    options: &FanoutOptions,
    trace: &mut StageTrace,
    results: Arc<A>,
    work: F,
) -> Result<(), FanoutError<E>>
where
    K: Clone + fmt::Display + Send + Sync + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    A: Accumulator<K, T> + 'static,
    F: for<'a> Fn(K, &'a mut StageTrace) -> BoxFuture<'a, Result<T, E>> + Send + Sync + 'static,
{
    let mark = trace.checkpoint();
    trace.enter_stage(options.label.clone());

    let (channel, failures) = FailureChannel::new(options.dropped);
    let group = Arc::new(
        TaskGroup::new(&*options.label, ids.len(), options.max_concurrent, channel)
            .with_progress(options.progress.clone()),
    );
    tracing::debug!(label = %options.label, total = group.total(), "fan-out started");

    let work = Arc::new(work);
    for id in ids {
        let group = Arc::clone(&group);
        let results = Arc::clone(&results);
        let work = Arc::clone(&work);

        tokio::spawn(async move {
            // Declared first so it drops last, after the permit is released.
            let _completion = group.completion(&id);
            let _permit = group.admit().await;

            if !group.is_open() {
                return;
            }

            let mut local = StageTrace::new(format!("work item {id}"));
            let outcome = AssertUnwindSafe(work(id.clone(), &mut local))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(value)) => results.accept(id, value),
                Ok(Err(error)) => {
                    group.fail(FanoutError::Unit(error), local);
                }
                Err(_panic) => {
                    let key = id.to_string();
                    group.fail(FanoutError::Panicked { key }, local);
                }
            }
        });
    }

    match failures.wait().await {
        Some(Failure { error, trace: local }) => {
            trace.absorb(local);
            Err(error)
        }
        None => {
            trace.rewind(mark);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn every_id_gets_an_entry() {
        let mut trace = StageTrace::new("start");
        let ids: Vec<u32> = (1..=50).collect();

        let results = run_bounded(
            ids,
            &FanoutOptions::labeled("squares"),
            &mut trace,
            |id, _trace| async move { Ok::<_, String>(id * id) }.boxed(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 50);
        assert_eq!(results[&7], 49);
        // A clean run leaves the caller's trace as it found it.
        assert_eq!(trace.path(), "start -> ");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_ids_return_immediately() {
        let mut trace = StageTrace::new("start");

        let results = tokio::time::timeout(
            Duration::from_secs(1),
            run_bounded(
                Vec::<u32>::new(),
                &FanoutOptions::default(),
                &mut trace,
                |_id, _trace| async { Ok::<u32, String>(0) }.boxed(),
            ),
        )
        .await
        .expect("empty fan-out must not block")
        .unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn cap_bounds_concurrent_units() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut trace = StageTrace::new("start");

        let counters = (Arc::clone(&in_flight), Arc::clone(&peak));
        let results = run_bounded(
            (0..40).collect(),
            &FanoutOptions::labeled("capped").max_concurrent(3),
            &mut trace,
            move |_id: u32, _trace| {
                let (in_flight, peak) = (Arc::clone(&counters.0), Arc::clone(&counters.1));
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
                .boxed()
            },
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 40);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_failure_is_reported_with_its_trace() {
        let mut trace = StageTrace::new("start");

        let err = run_bounded(
            vec![1, 2, 3],
            &FanoutOptions::labeled("lookup"),
            &mut trace,
            |id: u32, trace| {
                async move {
                    trace.enter_stage("remote lookup");
                    if id == 2 {
                        return Err("not found".to_string());
                    }
                    trace.pop_stage_on_success(&Ok::<(), ()>(()));
                    Ok(id)
                }
                .boxed()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(&err, FanoutError::Unit(e) if e == "not found"));
        assert!(trace.contains("work item 2"));
        assert!(trace.contains("lookup"));
        assert_eq!(
            trace.path(),
            "start -> lookup -> work item 2 -> remote lookup -> "
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_stops_units_not_yet_started() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut trace = StageTrace::default();

        let counter = Arc::clone(&started);
        let result = run_bounded(
            (0..200).collect(),
            &FanoutOptions::labeled("serial").max_concurrent(1),
            &mut trace,
            move |id: u32, _trace| {
                let started = Arc::clone(&counter);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if id == 0 {
                        return Err("first unit fails".to_string());
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(id)
                }
                .boxed()
            },
        )
        .await;

        assert!(result.is_err());
        // Let the remaining units drain through the gate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.load(Ordering::SeqCst) < 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_unit_surfaces_as_failure() {
        let mut trace = StageTrace::new("start");

        let err = run_bounded(
            vec![1, 2, 3],
            &FanoutOptions::default(),
            &mut trace,
            |id: u32, _trace| {
                async move {
                    assert!(id != 3, "unit three blew up");
                    Ok::<_, String>(id)
                }
                .boxed()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FanoutError::Panicked { ref key } if key == "3"));
        assert!(trace.contains("work item 3"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collect_gathers_all_values() {
        let mut trace = StageTrace::new("start");

        let mut values = run_collect(
            vec!["a", "bb", "ccc"],
            &FanoutOptions::default().max_concurrent(2),
            &mut trace,
            |id, _trace| async move { Ok::<_, String>(id.len()) }.boxed(),
        )
        .await
        .unwrap();

        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn progress_reaches_total() {
        let (tx, rx) = watch::channel(Progress::default());
        let options = FanoutOptions {
            progress: Some(tx),
            ..FanoutOptions::labeled("progress")
        };
        let mut trace = StageTrace::default();

        run_bounded((0..10).collect(), &options, &mut trace, |id: u32, _trace| {
            async move { Ok::<_, String>(id) }.boxed()
        })
        .await
        .unwrap();

        let last = rx.borrow().clone();
        assert_eq!(last.label, "progress");
        assert_eq!(last.done, 10);
        assert_eq!(last.left, 0);
    }
}
