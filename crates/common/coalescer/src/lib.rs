//! Group together arrivals that are close in time, per key.
//!
//! A burst of arrivals for the same key is emitted as a single batch:
//! - the first arrival opens a batch due after the base delay;
//! - an arrival that finds the batch about to close pushes its deadline back to the min delay;
//! - an arrival that finds the batch open for more than the max wait closes it right away.
//!
//! A subject that has been emitted once is never emitted again.

mod batch;
mod coalescer;
mod config;
mod error;
mod notified;
mod scheduler;
mod subject;

pub use crate::batch::Batch;
pub use crate::batch::BatchAdd;
pub use crate::coalescer::ArrivalOutcome;
pub use crate::coalescer::Coalescer;
pub use crate::config::CoalescerConfig;
pub use crate::config::CoalescerConfigBuilder;
pub use crate::config::ConfigError;
pub use crate::config::MaxWaitAnchor;
pub use crate::config::DEFAULT_BASE_DELAY;
pub use crate::config::DEFAULT_MAX_USERS;
pub use crate::config::DEFAULT_MAX_WAIT;
pub use crate::config::DEFAULT_MIN_DELAY;
pub use crate::error::SchedulerError;
pub use crate::notified::NotifiedSet;
pub use crate::scheduler::AlwaysEligible;
pub use crate::scheduler::EmitSink;
pub use crate::scheduler::Scheduler;
pub use crate::scheduler::ValidityCheck;
pub use crate::subject::BatchKey;
pub use crate::subject::Subject;
