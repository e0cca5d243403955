//! # Subscription Registry
//!
//! Single source of truth for which subjects are subscribed, with which
//! handler and broker handle. Every operation touches one subject's entry
//! under that entry's shard lock only; no lock is ever held across a broker
//! call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::broker::SubscriptionHandle;
use crate::handler::MessageHandler;

/// Registry entry for one subject.
struct Subscription {
    handler: Arc<dyn MessageHandler>,
    handle: Option<SubscriptionHandle>,
    active: bool,
    /// Registration sequence number; grows with every `register`.
    generation: u64,
}

/// Thread-safe map from subject to subscription state.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<String, Subscription>,
    generations: AtomicU64,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription for `subject`. Last registration
    /// wins; the replaced handle, if still held, is returned for release.
    pub fn register(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler>,
        handle: SubscriptionHandle,
    ) -> Option<SubscriptionHandle> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Subscription {
            handler,
            handle: Some(handle),
            active: true,
            generation,
        };

        let previous = self
            .entries
            .insert(subject.to_string(), entry)
            .and_then(|old| old.handle);

        debug!(
            subject = %subject,
            generation,
            replaced = previous.is_some(),
            "Subscription registered"
        );
        previous
    }

    /// Active handler for `subject`, if any.
    pub fn lookup(&self, subject: &str) -> Option<Arc<dyn MessageHandler>> {
        self.entries
            .get(subject)
            .filter(|entry| entry.active)
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// Atomically mark `subject` inactive and hand back its broker handle.
    ///
    /// Returns `None` when the subject was never subscribed or is already
    /// inactive.
    pub fn deactivate(&self, subject: &str) -> Option<SubscriptionHandle> {
        let mut entry = self.entries.get_mut(subject)?;
        if !entry.active {
            return None;
        }
        entry.active = false;
        entry.handle.take()
    }

    /// Deactivate every subject, returning the handles to release.
    pub fn drain(&self) -> Vec<SubscriptionHandle> {
        let subjects: Vec<String> = self.active_subjects();
        subjects
            .iter()
            .filter_map(|subject| self.deactivate(subject))
            .collect()
    }

    pub fn is_active(&self, subject: &str) -> bool {
        self.entries
            .get(subject)
            .map(|entry| entry.active)
            .unwrap_or(false)
    }

    /// Generation of the current registration for `subject`.
    pub fn generation(&self, subject: &str) -> Option<u64> {
        self.entries.get(subject).map(|entry| entry.generation)
    }

    /// Subjects with an active subscription, sorted.
    pub fn active_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.key().clone())
            .collect();
        subjects.sort();
        subjects
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.active).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
