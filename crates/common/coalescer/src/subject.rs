use std::fmt::Debug;
use std::hash::Hash;

/// Implement this for the arrivals that are to be coalesced.
pub trait Subject: Debug + Clone + Send + Sync + 'static {
    type Id: Debug + Clone + Eq + Hash + Send + Sync + 'static;

    /// The identity used to tell whether this subject has already been notified.
    fn id(&self) -> Self::Id;
}

/// The key partitioning arrivals into independent batches.
///
/// Implemented for any type with the required bounds.
pub trait BatchKey: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

impl<K> BatchKey for K where K: Debug + Clone + Eq + Hash + Send + Sync + 'static {}
