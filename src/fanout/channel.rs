//! First-failure-wins result channel.
//!
//! A single-slot mailbox plus an `open` flag. The first unit of work to fail
//! delivers its error and flips the flag; every later failure is dropped.
//! The task group closes the channel once every unit has completed, which
//! wakes the waiter with "no failure".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::trace::StageTrace;

/// What happens to failures that arrive after the first one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DroppedFailures {
    /// Drop them without a trace.
    #[default]
    Discard,

    /// Drop them, but emit a `warn` log line for each.
    Log,
}

/// A delivered failure: the error plus the trace of the unit that raised it.
#[derive(Debug)]
pub struct Failure<E> {
    pub error: E,
    pub trace: StageTrace,
}

/// Sending half, shared by every unit of work in a group.
#[derive(Debug)]
pub struct FailureChannel<E> {
    open: AtomicBool,
    slot: Mutex<Option<oneshot::Sender<Failure<E>>>>,
    dropped: DroppedFailures,
}

/// Receiving half, held by the orchestrator.
#[derive(Debug)]
pub struct FailureReceiver<E> {
    rx: oneshot::Receiver<Failure<E>>,
}

impl<E: std::fmt::Display> FailureChannel<E> {
    /// Create an open channel and its receiver.
    pub fn new(dropped: DroppedFailures) -> (Arc<Self>, FailureReceiver<E>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            open: AtomicBool::new(true),
            slot: Mutex::new(Some(tx)),
            dropped,
        };
        (Arc::new(channel), FailureReceiver { rx })
    }

    /// Deliver a failure if none has been delivered yet.
    ///
    /// Returns whether this call was the one that got through.
    pub fn try_send(&self, error: E, trace: StageTrace) -> bool {
        let mut slot = self.slot.lock();
        if self.open.load(Ordering::Acquire)
            && let Some(tx) = slot.take()
        {
            self.open.store(false, Ordering::Release);
            // The orchestrator may already have given up waiting.
            let _ = tx.send(Failure { error, trace });
            return true;
        }
        drop(slot);

        if self.dropped == DroppedFailures::Log {
            tracing::warn!(error = %error, path = %trace, "dropping failure after the first");
        }
        false
    }

    /// Whether no failure has been delivered and the group is still running.
    ///
    /// A hint only: a unit may read `true` just before another unit fails.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the channel without a failure.
    ///
    /// Called once, by the completion that brings the group to its total.
    /// A no-op when a failure was already delivered.
    pub(super) fn close(&self) {
        let mut slot = self.slot.lock();
        self.open.store(false, Ordering::Release);
        slot.take();
    }
}

impl<E> FailureReceiver<E> {
    /// Wait for the first failure, or `None` once the channel closes cleanly.
    pub async fn wait(self) -> Option<Failure<E>> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_send_wins() {
        let (channel, rx) = FailureChannel::new(DroppedFailures::Discard);

        assert!(channel.try_send("first".to_string(), StageTrace::new("a")));
        assert!(!channel.try_send("second".to_string(), StageTrace::new("b")));
        assert!(!channel.is_open());

        let failure = rx.wait().await.unwrap();
        assert_eq!(failure.error, "first");
        assert!(failure.trace.contains("a"));
    }

    #[tokio::test]
    async fn close_without_failure_yields_none() {
        let (channel, rx) = FailureChannel::<String>::new(DroppedFailures::Discard);
        channel.close();

        assert!(!channel.is_open());
        assert!(rx.wait().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_ignored() {
        let (channel, rx) = FailureChannel::new(DroppedFailures::Log);
        channel.close();

        assert!(!channel.try_send("late".to_string(), StageTrace::default()));
        assert!(rx.wait().await.is_none());
    }

    #[tokio::test]
    async fn close_after_failure_keeps_failure() {
        let (channel, rx) = FailureChannel::new(DroppedFailures::Discard);
        channel.try_send("boom".to_string(), StageTrace::default());
        channel.close();

        assert_eq!(rx.wait().await.unwrap().error, "boom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_senders_deliver_exactly_one() {
        let (channel, rx) = FailureChannel::new(DroppedFailures::Discard);

        let mut handles = Vec::new();
        for i in 0..200 {
            let channel = Arc::clone(&channel);
            handles.push(tokio::spawn(async move {
                channel.try_send(format!("error {i}"), StageTrace::default())
            }));
        }

        let mut delivered = 0;
        for handle in handles {
            if handle.await.unwrap() {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 1);
        let failure = rx.wait().await.unwrap();
        assert!(failure.error.starts_with("error "));
    }
}
