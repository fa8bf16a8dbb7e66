//! Bookkeeping for live subscriptions.
//!
//! The registry only holds handles and the join handles of their
//! consumption loops; the loops themselves own their subscriber streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;

use crate::manifest::SubscriptionKind;
use crate::payload::PayloadType;

/// Wildcard accepted by [`SubscriptionRegistry::get_subscriptions`] filters.
pub const FILTER_WILDCARD: char = '*';

/// Descriptor returned for every live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: u64,
    pub subject: String,
    pub queue: Option<String>,
    pub kind: SubscriptionKind,
    pub payload_type: PayloadType,
}

struct Entry {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

/// Thread-safe table of active subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Entry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn insert(&self, handle: SubscriptionHandle, task: JoinHandle<()>) {
        self.lock().insert(handle.id, Entry { handle, task });
    }

    /// Stop a single subscription's loop. Returns `false` if the handle is
    /// unknown.
    pub fn remove(&self, id: u64) -> bool {
        match self.lock().remove(&id) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every consumption loop immediately and clear the table.
    pub fn abort_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.lock());
        let count = entries.len();
        for entry in entries.into_values() {
            entry.task.abort();
        }
        count
    }

    /// Take every loop out of the table without stopping it.
    pub(crate) fn take_tasks(&self) -> Vec<(SubscriptionHandle, JoinHandle<()>)> {
        std::mem::take(&mut *self.lock())
            .into_values()
            .map(|entry| (entry.handle, entry.task))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Look up subscriptions by subject.
    ///
    /// An empty filter list returns everything. A filter without a wildcard
    /// matches exactly, a filter with a single [`FILTER_WILDCARD`] matches by
    /// prefix and suffix, and a filter with more than one wildcard matches
    /// nothing.
    pub fn get_subscriptions<S: AsRef<str>>(
        &self,
        filters: &[S],
    ) -> HashMap<String, SubscriptionHandle> {
        self.lock()
            .values()
            .filter(|entry| {
                filters.is_empty()
                    || filters
                        .iter()
                        .any(|f| subject_matches(&entry.handle.subject, f.as_ref()))
            })
            .map(|entry| (entry.handle.subject.clone(), entry.handle.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Entry>> {
        // A poisoned table is still structurally valid.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Match a concrete subject against a registry filter.
pub fn subject_matches(subject: &str, filter: &str) -> bool {
    let Some(idx) = filter.find(FILTER_WILDCARD) else {
        return subject == filter;
    };
    let (prefix, rest) = filter.split_at(idx);
    let suffix = &rest[FILTER_WILDCARD.len_utf8()..];
    if suffix.contains(FILTER_WILDCARD) {
        return false;
    }
    subject.starts_with(prefix) && subject.ends_with(suffix)
}
