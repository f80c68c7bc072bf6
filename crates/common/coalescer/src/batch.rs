use crate::subject::BatchKey;
use crate::subject::Subject;
use clock::Timestamp;
use std::collections::HashSet;

#[must_use]
#[derive(Debug, Eq, PartialEq)]
pub enum BatchAdd {
    Added,
    Duplicate,
}

/// The subjects waiting for a single emission for a given key.
///
/// Subjects are kept in arrival order. Guaranteed to contain at least one subject.
#[derive(Debug)]
pub struct Batch<K: BatchKey, S: Subject> {
    key: K,
    opened_at: Timestamp,
    deadline: Timestamp,
    subjects: Vec<S>,
    ids: HashSet<S::Id>,
}

impl<K: BatchKey, S: Subject> Batch<K, S> {
    pub fn new(key: K, opened_at: Timestamp, deadline: Timestamp, subject: S) -> Batch<K, S> {
        let mut ids = HashSet::new();
        ids.insert(subject.id());

        Batch {
            key,
            opened_at,
            deadline,
            subjects: vec![subject],
            ids,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub(crate) fn set_deadline(&mut self, deadline: Timestamp) {
        self.deadline = deadline;
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subjects(&self) -> &[S] {
        &self.subjects
    }

    /// Append a subject, unless the same subject is already pending.
    ///
    /// A subject is never listed twice in a batch, so a repeated arrival
    /// doesn't take one of the `max_users` slots. The caller still applies the timing rules
    /// to such an arrival, as if it had been appended.
    pub fn add(&mut self, subject: S) -> BatchAdd {
        if !self.ids.insert(subject.id()) {
            return BatchAdd::Duplicate;
        }

        self.subjects.push(subject);
        BatchAdd::Added
    }

    pub fn into_subjects(self) -> Vec<S> {
        self.subjects
    }
}
