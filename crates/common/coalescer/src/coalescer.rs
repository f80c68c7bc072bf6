//! Coalescing algorithm which is unaware of IO and timers. It uses the
//! "Imperative shell, functional core" approach with this code being the
//! "functional core": the current time is always given by the caller.

use crate::batch::Batch;
use crate::config::CoalescerConfig;
use crate::config::MaxWaitAnchor;
use crate::notified::NotifiedSet;
use crate::subject::BatchKey;
use crate::subject::Subject;
use clock::Timestamp;
use std::collections::HashMap;

/// What the imperative shell has to do after an arrival.
#[must_use]
#[derive(Debug)]
pub enum ArrivalOutcome<K: BatchKey, S: Subject> {
    /// The subject has already been notified. Nothing to do.
    AlreadyNotified,

    /// A new batch has been opened: a timer has to be set for the deadline.
    Opened { deadline: Timestamp },

    /// The subject joined the pending batch, whose deadline is unchanged.
    Appended,

    /// The subject joined the pending batch and the deadline has been pushed back:
    /// the pending timer has to be replaced by a timer for the new deadline.
    Extended { deadline: Timestamp },

    /// The pending batch has been waiting for too long and is closed right away:
    /// the pending timer has to be cancelled and the batch flushed.
    Forced(Batch<K, S>),
}

/// Provides the core implementation of the coalescing algorithm.
#[derive(Debug)]
pub struct Coalescer<K: BatchKey, S: Subject> {
    config: CoalescerConfig,
    batches: HashMap<K, Batch<K, S>>,
    notified: NotifiedSet<S::Id>,
}

impl<K: BatchKey, S: Subject> Coalescer<K, S> {
    /// Create a Coalescer with the specified config.
    pub fn new(config: CoalescerConfig) -> Coalescer<K, S> {
        let notified = NotifiedSet::new(config.notified_capacity());
        Coalescer {
            config,
            batches: HashMap::new(),
            notified,
        }
    }

    pub fn config(&self) -> &CoalescerConfig {
        &self.config
    }

    pub fn arrival(&mut self, now: Timestamp, key: K, subject: S) -> ArrivalOutcome<K, S> {
        if self.notified.contains(&subject.id()) {
            return ArrivalOutcome::AlreadyNotified;
        }

        let Some(batch) = self.batches.get_mut(&key) else {
            let deadline = now + self.config.base_delay();
            let batch = Batch::new(key.clone(), now, deadline, subject);
            self.batches.insert(key, batch);
            return ArrivalOutcome::Opened { deadline };
        };

        // A subject already pending still counts as an arrival for the timing rules
        let _ = batch.add(subject);

        let anchor = match self.config.max_wait_anchor() {
            MaxWaitAnchor::OpenedAt => batch.opened_at(),
            MaxWaitAnchor::ScheduledStart => batch
                .deadline()
                .checked_sub(self.config.base_delay())
                .unwrap_or(batch.opened_at()),
        };
        if now.saturating_duration_since(anchor) > self.config.max_wait() {
            return match self.batches.remove(&key) {
                Some(batch) => ArrivalOutcome::Forced(batch),
                None => ArrivalOutcome::Appended,
            };
        }

        let remaining = batch.deadline().saturating_duration_since(now);
        if remaining < self.config.min_delay() {
            let deadline = now + self.config.min_delay();
            batch.set_deadline(deadline);
            return ArrivalOutcome::Extended { deadline };
        }

        ArrivalOutcome::Appended
    }

    /// Close the batch of the given key, if its deadline has been reached.
    ///
    /// Returns `None` when there is no batch or when its deadline has been pushed back
    /// since the timer was set.
    pub fn expire(&mut self, key: &K, now: Timestamp) -> Option<Batch<K, S>> {
        let deadline = self.batches.get(key)?.deadline();
        if deadline > now {
            return None;
        }
        self.batches.remove(key)
    }

    /// Select the subjects to be emitted among those that passed the validity check
    /// and record them as notified.
    ///
    /// The eligible subjects must be given in arrival order:
    /// only the first `max_users` are kept, the others are neither emitted nor recorded.
    pub fn complete(&mut self, mut eligible: Vec<S>) -> Vec<S> {
        eligible.truncate(self.config.max_users());
        for subject in &eligible {
            self.notified.insert(subject.id());
        }
        eligible
    }

    pub fn pending(&self, key: &K) -> Option<&Batch<K, S>> {
        self.batches.get(key)
    }

    pub fn pending_keys(&self) -> impl Iterator<Item = &K> {
        self.batches.keys()
    }

    pub fn is_notified(&self, id: &S::Id) -> bool {
        self.notified.contains(id)
    }

    /// Discard all the pending batches and forget all the notified subjects.
    ///
    /// Returns the number of discarded batches.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.batches.len();
        self.batches.clear();
        self.notified.clear();
        discarded
    }
}
