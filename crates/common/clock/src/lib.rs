use mockall::automock;
use std::future::Future;
use tokio::task::JoinHandle;

/// A monotonic point in time.
///
/// This is tokio's instant, so tests running on a paused runtime
/// observe the same timeline as the timers.
pub type Timestamp = tokio::time::Instant;

#[automock]
pub trait Clock: Sync + Send + 'static {
    fn now(&self) -> Timestamp;
}

#[derive(Clone, Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        tokio::time::Instant::now()
    }
}

/// A delayed task that can be cancelled until it fires.
///
/// Once the deadline is reached the task is spawned on its own,
/// hence cancelling the handle afterwards is a no-op and never aborts the task mid-way.
#[derive(Debug)]
pub struct TimerHandle {
    deadline: Timestamp,
    sleeper: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Run `task` on the tokio runtime at `deadline`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_at<F, Fut>(deadline: Timestamp, task: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sleeper = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            tokio::spawn(task());
        });

        TimerHandle {
            deadline,
            sleeper: Some(sleeper),
        }
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    /// Prevent the task from firing, if it has not fired yet.
    ///
    /// Calling this more than once is harmless.
    pub fn cancel(&mut self) {
        if let Some(sleeper) = self.sleeper.take() {
            sleeper.abort();
        }
    }
}
