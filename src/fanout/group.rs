//! Bounded task group: completion counting and the admission gate.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit, watch};

use super::FanoutError;
use super::channel::FailureChannel;
use crate::trace::StageTrace;

/// A snapshot of how far a fan-out has come.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub label: String,
    pub done: usize,
    pub left: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} done, {} left", self.label, self.done, self.left)
    }
}

/// Tracks `total` units of work and closes the failure channel once all of
/// them have completed.
#[derive(Debug)]
pub struct TaskGroup<E> {
    label: String,
    total: usize,
    completed: AtomicUsize,
    gate: Option<Semaphore>,
    channel: Arc<FailureChannel<FanoutError<E>>>,
    progress: Option<watch::Sender<Progress>>,
}

impl<E: fmt::Display> TaskGroup<E> {
    /// Create a group expecting exactly `total` completions.
    ///
    /// `max_concurrent` of `None` or `Some(0)` leaves admission unbounded.
    /// An empty group closes its channel immediately.
    pub fn new(
        label: impl Into<String>,
        total: usize,
        max_concurrent: Option<usize>,
        channel: Arc<FailureChannel<FanoutError<E>>>,
    ) -> Self {
        let gate = max_concurrent.filter(|&n| n > 0).map(Semaphore::new);
        if total == 0 {
            channel.close();
        }
        Self {
            label: label.into(),
            total,
            completed: AtomicUsize::new(0),
            gate,
            channel,
            progress: None,
        }
    }

    /// Publish every completion to `sink`.
    pub fn with_progress(mut self, sink: Option<watch::Sender<Progress>>) -> Self {
        self.progress = sink;
        self
    }

    /// Wait for an admission slot. Unbounded groups admit immediately.
    pub async fn admit(&self) -> Option<SemaphorePermit<'_>> {
        match &self.gate {
            // The gate is never closed, so acquire only fails if it were.
            Some(gate) => gate.acquire().await.ok(),
            None => None,
        }
    }

    /// Whether units should still start their remote work.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Report a unit's failure. Only the first one reaches the waiter.
    pub fn fail(&self, error: FanoutError<E>, trace: StageTrace) -> bool {
        self.channel.try_send(error, trace)
    }

    /// A guard that counts the unit as complete when dropped, on every exit
    /// path.
    pub fn completion(&self, key: &impl fmt::Display) -> Completion<'_, E> {
        Completion {
            group: self,
            key: key.to_string(),
        }
    }

    /// Count one completion, closing the channel when it is the last.
    pub fn on_unit_complete(&self) -> Progress {
        let done = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(done <= self.total, "more completions than units");

        let progress = Progress {
            label: self.label.clone(),
            done,
            left: self.total.saturating_sub(done),
        };
        tracing::debug!(label = %self.label, done, left = progress.left, "unit complete");
        if let Some(sink) = &self.progress {
            sink.send_replace(progress.clone());
        }

        if done == self.total {
            self.channel.close();
        }
        progress
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Completion accounting for one unit of work. See [`TaskGroup::completion`].
pub struct Completion<'a, E: fmt::Display> {
    group: &'a TaskGroup<E>,
    key: String,
}

impl<E: fmt::Display> Drop for Completion<'_, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let key = std::mem::take(&mut self.key);
            let trace = StageTrace::new(format!("work item {key}"));
            self.group.fail(FanoutError::Panicked { key }, trace);
        }
        self.group.on_unit_complete();
    }
}
