//! Mutex-guarded containers that units of work write their results into.
//!
//! Contents are only taken out after the owning task group has closed its
//! channel without a failure. Until then the containers are write-only.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// Where a fan-out deposits each successful unit's value.
pub trait Accumulator<K, T>: Send + Sync {
    type Output;

    fn accept(&self, key: K, value: T);

    /// Move the collected values out, leaving the container empty.
    fn take(&self) -> Self::Output;
}

/// A keyed accumulator.
#[derive(Debug)]
pub struct SyncMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> SyncMap<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(key, value);
    }
}

impl<K, V> Accumulator<K, V> for SyncMap<K, V>
where
    K: Eq + Hash + Send,
    V: Send,
{
    type Output = HashMap<K, V>;

    fn accept(&self, key: K, value: V) {
        self.insert(key, value);
    }

    fn take(&self) -> HashMap<K, V> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// An unordered accumulator. Keys are dropped.
#[derive(Debug)]
pub struct SyncVec<T> {
    inner: Mutex<Vec<T>>,
}

impl<T> SyncVec<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn push(&self, value: T) {
        self.inner.lock().push(value);
    }
}

impl<K, T: Send> Accumulator<K, T> for SyncVec<T> {
    type Output = Vec<T>;

    fn accept(&self, _key: K, value: T) {
        self.push(value);
    }

    fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.lock())
    }
}
