use crate::batch::Batch;
use crate::coalescer::ArrivalOutcome;
use crate::coalescer::Coalescer;
use crate::config::CoalescerConfig;
use crate::error::SchedulerError;
use crate::subject::BatchKey;
use crate::subject::Subject;
use async_trait::async_trait;
use clock::Clock;
use clock::TimerHandle;
use clock::Timestamp;
use clock::WallClock;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Tells if a subject is still to be notified, when its batch is closed.
#[async_trait]
pub trait ValidityCheck<K, S>: Send + Sync + 'static {
    /// An error is handled as if the subject were no longer eligible.
    async fn is_eligible(&self, key: &K, subject: &S) -> anyhow::Result<bool>;
}

/// Receives the closed batches.
#[async_trait]
pub trait EmitSink<K, S>: Send + Sync + 'static {
    /// Called exactly once per closed batch, even if no subjects are left.
    async fn deliver(&self, key: &K, subjects: Vec<S>) -> anyhow::Result<()>;
}

/// A validity check accepting any subject.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysEligible;

#[async_trait]
impl<K: BatchKey, S: Subject> ValidityCheck<K, S> for AlwaysEligible {
    async fn is_eligible(&self, _key: &K, _subject: &S) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// The central API for the coalescing algorithm.
/// Record arrivals in, get batches out through the [EmitSink].
///
/// Timers are run on the tokio runtime: hence the scheduler must be used from within a runtime.
pub struct Scheduler<K: BatchKey, S: Subject> {
    shared: Arc<Shared<K, S>>,
}

impl<K: BatchKey, S: Subject> Clone for Scheduler<K, S> {
    fn clone(&self) -> Self {
        Scheduler {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<K: BatchKey, S: Subject> {
    clock: Arc<dyn Clock>,
    validity: Arc<dyn ValidityCheck<K, S>>,
    sink: Arc<dyn EmitSink<K, S>>,
    state: Mutex<State<K, S>>,
    in_flight: AtomicUsize,
    idle: Notify,
}

struct State<K: BatchKey, S: Subject> {
    coalescer: Coalescer<K, S>,
    timers: HashMap<K, TimerHandle>,
    shut_down: bool,
}

impl<K: BatchKey, S: Subject> Scheduler<K, S> {
    pub fn new(
        config: CoalescerConfig,
        validity: impl ValidityCheck<K, S>,
        sink: impl EmitSink<K, S>,
    ) -> Self {
        Self::with_clock(config, WallClock, validity, sink)
    }

    pub fn with_clock(
        config: CoalescerConfig,
        clock: impl Clock,
        validity: impl ValidityCheck<K, S>,
        sink: impl EmitSink<K, S>,
    ) -> Self {
        let state = State {
            coalescer: Coalescer::new(config),
            timers: HashMap::new(),
            shut_down: false,
        };
        Scheduler {
            shared: Arc::new(Shared {
                clock: Arc::new(clock),
                validity: Arc::new(validity),
                sink: Arc::new(sink),
                state: Mutex::new(state),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Add a subject to the pending batch of the given key, opening a batch if none.
    ///
    /// Returns once the arrival has been recorded, or, when this arrival forces the pending batch out,
    /// once that batch has been delivered. Only in the latter case can a delivery error be returned.
    pub async fn record_arrival(&self, key: K, subject: S) -> Result<(), SchedulerError> {
        let forced = {
            let mut state = self.shared.state.lock().await;
            if state.shut_down {
                return Err(SchedulerError::ShutDown);
            }

            let id = subject.id();
            let now = self.shared.clock.now();
            match state.coalescer.arrival(now, key.clone(), subject) {
                ArrivalOutcome::AlreadyNotified => {
                    debug!(?key, subject = ?id, "Ignoring subject already notified");
                    None
                }
                ArrivalOutcome::Opened { deadline } => {
                    debug!(?key, subject = ?id, "Opening batch");
                    let timer = self.timer(key.clone(), deadline);
                    if let Some(mut stale) = state.timers.insert(key, timer) {
                        stale.cancel();
                    }
                    None
                }
                ArrivalOutcome::Appended => {
                    debug!(?key, subject = ?id, "Adding subject to pending batch");
                    None
                }
                ArrivalOutcome::Extended { deadline } => {
                    let timer = self.timer(key.clone(), deadline);
                    if let Some(mut previous) = state.timers.insert(key.clone(), timer) {
                        debug!(
                            ?key,
                            subject = ?id,
                            pushed_back_by = ?deadline.saturating_duration_since(previous.deadline()),
                            "Adding subject and extending pending batch"
                        );
                        previous.cancel();
                    }
                    None
                }
                ArrivalOutcome::Forced(batch) => {
                    debug!(?key, subject = ?id, "Pending batch waited too long, flushing now");
                    if let Some(mut timer) = state.timers.remove(&key) {
                        timer.cancel();
                    }
                    Some((batch, self.shared.start_flush()))
                }
            }
        };

        match forced {
            Some((batch, in_flight)) => self.shared.flush(batch, in_flight).await,
            None => Ok(()),
        }
    }

    /// Cancel all the timers and discard the pending batches without emitting them.
    ///
    /// Flushes already in progress are not interrupted.
    /// Any later arrival is rejected.
    pub async fn shutdown(&self) {
        let mut state = self.shared.state.lock().await;
        for (_, mut timer) in state.timers.drain() {
            timer.cancel();
        }
        let discarded = state.coalescer.shutdown();
        state.shut_down = true;
        self.shared.idle.notify_waiters();
        info!(discarded, "Coalescing scheduler shut down");
    }

    pub async fn is_notified(&self, id: &S::Id) -> bool {
        self.shared.state.lock().await.coalescer.is_notified(id)
    }

    /// True when no batch is pending nor being flushed.
    pub async fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().await;
        state.coalescer.pending_keys().next().is_none()
            && self.shared.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Wait until no batch is pending nor being flushed.
    ///
    /// Arrivals recorded meanwhile are waited for too.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle().await {
                return;
            }
            notified.await;
        }
    }

    /// The number of subjects pending for the given key, if any.
    pub async fn pending_len(&self, key: &K) -> Option<usize> {
        let state = self.shared.state.lock().await;
        state.coalescer.pending(key).map(Batch::len)
    }

    fn timer(&self, key: K, deadline: Timestamp) -> TimerHandle {
        let shared = Arc::downgrade(&self.shared);
        TimerHandle::schedule_at(deadline, move || Shared::on_timer(shared, key))
    }
}

impl<K: BatchKey, S: Subject> Shared<K, S> {
    async fn on_timer(shared: Weak<Self>, key: K) {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        let (batch, in_flight) = {
            let mut state = shared.state.lock().await;
            let now = shared.clock.now();
            let Some(batch) = state.coalescer.expire(&key, now) else {
                // The deadline has been pushed back since this timer was set
                return;
            };
            state.timers.remove(&key);
            (batch, shared.start_flush())
        };

        if let Err(err) = shared.flush(batch, in_flight).await {
            error!("{:#}", anyhow::Error::from(err));
        }
    }

    /// Count a batch as being flushed, until the returned guard is dropped.
    ///
    /// Must be called under the state lock that removed the batch from the pending batches.
    fn start_flush(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            count: &self.in_flight,
            idle: &self.idle,
        }
    }

    /// Filter, cap and deliver a batch already removed from the pending batches.
    async fn flush(
        &self,
        batch: Batch<K, S>,
        _in_flight: InFlight<'_>,
    ) -> Result<(), SchedulerError> {
        self.filter_and_deliver(batch).await
    }

    async fn filter_and_deliver(&self, batch: Batch<K, S>) -> Result<(), SchedulerError> {
        let key = batch.key().clone();

        let mut eligible = Vec::with_capacity(batch.len());
        for subject in batch.into_subjects() {
            match self.validity.is_eligible(&key, &subject).await {
                Ok(true) => eligible.push(subject),
                Ok(false) => {
                    debug!(?key, subject = ?subject.id(), "Dropping subject no longer eligible")
                }
                Err(err) => {
                    warn!(?key, subject = ?subject.id(), "Dropping subject, eligibility check failed: {err:#}")
                }
            }
        }

        let selected = self.state.lock().await.coalescer.complete(eligible);
        info!(?key, subjects = selected.len(), "Emitting batch");

        self.sink
            .deliver(&key, selected)
            .await
            .map_err(|source| SchedulerError::DeliveryFailed {
                key: format!("{key:?}"),
                source,
            })
    }
}

/// A flush in progress.
///
/// Released on drop, including when the flushing future is dropped before completion.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    idle: &'a Notify,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoalescerConfig;
    use assert_matches::assert_matches;
    use clock::MockClock;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::sleep;
    use tokio::time::timeout;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn close_arrivals_are_emitted_together() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;
        sleep(Duration::from_secs(3)).await;
        scheduler.record_arrival("g1", member("B")).await?;
        sleep(Duration::from_secs(6)).await;
        scheduler.record_arrival("g1", member("C")).await?;

        assert_recv_batch(&mut batches, start, 8, "g1", vec!["A", "B"]).await;
        assert_recv_batch(&mut batches, start, 17, "g1", vec!["C"]).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn distant_arrivals_are_emitted_one_by_one() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
            scheduler.record_arrival("g1", member(name)).await?;
            assert_recv_batch(&mut batches, start, 8 + 9 * i as u64, "g1", vec![name]).await;
            sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_burst_is_flushed_by_the_arrival_exceeding_max_wait() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        let names = ["A", "B", "C", "D", "E", "F", "G"];
        for name in names {
            scheduler.record_arrival("g1", member(name)).await?;
            sleep(Duration::from_secs(4)).await;
        }

        // The 7th arrival, at 24s, forced the batch out
        assert_recv_batch(&mut batches, start, 24, "g1", names.to_vec()).await;
        assert_no_batch(&mut batches).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn notified_subjects_are_ignored() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;
        assert_recv_batch(&mut batches, start, 8, "g1", vec!["A"]).await;
        assert!(scheduler.is_notified(&"A").await);

        scheduler.record_arrival("g1", member("A")).await?;
        scheduler.record_arrival("g2", member("A")).await?;
        assert_eq!(scheduler.pending_len(&"g1").await, None);
        assert_eq!(scheduler.pending_len(&"g2").await, None);
        assert_no_batch(&mut batches).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn truncated_subjects_are_not_notified() -> anyhow::Result<()> {
        let config = CoalescerConfig::builder().max_users(2).build()?;
        let (scheduler, mut batches) = spawn_scheduler(config);
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;
        scheduler.record_arrival("g1", member("B")).await?;
        scheduler.record_arrival("g1", member("C")).await?;
        assert_eq!(scheduler.pending_len(&"g1").await, Some(3));

        assert_recv_batch(&mut batches, start, 8, "g1", vec!["A", "B"]).await;
        assert!(scheduler.is_notified(&"B").await);
        assert!(!scheduler.is_notified(&"C").await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_subjects_are_dropped() -> anyhow::Result<()> {
        let validity = TestValidity::default().reject("B").fail_on("D");
        let (scheduler, mut batches) = spawn_scheduler_with(CoalescerConfig::default(), validity);
        let start = Instant::now();

        for name in ["A", "B", "C", "D"] {
            scheduler.record_arrival("g1", member(name)).await?;
        }

        assert_recv_batch(&mut batches, start, 8, "g1", vec!["A", "C"]).await;
        assert!(!scheduler.is_notified(&"B").await);
        assert!(!scheduler.is_notified(&"D").await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batches_are_delivered() -> anyhow::Result<()> {
        let validity = TestValidity::default().reject("A");
        let (scheduler, mut batches) = spawn_scheduler_with(CoalescerConfig::default(), validity);
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;

        assert_recv_batch(&mut batches, start, 8, "g1", vec![]).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_during_a_flush_opens_a_new_batch() -> anyhow::Result<()> {
        let validity = TestValidity::default().with_delay(Duration::from_secs(30));
        let (scheduler, mut batches) = spawn_scheduler_with(CoalescerConfig::default(), validity);
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;
        sleep(Duration::from_secs(10)).await;

        // the first batch has been closed at 8s, but is still being checked
        assert_eq!(scheduler.pending_len(&"g1").await, None);
        scheduler.record_arrival("g1", member("B")).await?;
        assert_eq!(scheduler.pending_len(&"g1").await, Some(1));

        assert_recv_batch(&mut batches, start, 38, "g1", vec!["A"]).await;
        assert!(!scheduler.is_idle().await);
        assert_recv_batch(&mut batches, start, 48, "g1", vec!["B"]).await;
        tokio::task::yield_now().await;
        assert!(scheduler.is_idle().await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_forced_flush_is_no_longer_in_flight() -> anyhow::Result<()> {
        let validity = TestValidity::default().with_delay(Duration::from_secs(30));
        let (scheduler, mut batches) = spawn_scheduler_with(CoalescerConfig::default(), validity);

        for name in ["A", "B", "C", "D", "E", "F"] {
            scheduler.record_arrival("g1", member(name)).await?;
            sleep(Duration::from_secs(4)).await;
        }

        // The 7th arrival forces the batch out, but the caller gives up during the validity checks
        let forced = timeout(
            Duration::from_secs(1),
            scheduler.record_arrival("g1", member("G")),
        )
        .await;
        assert!(forced.is_err());

        assert_eq!(scheduler.pending_len(&"g1").await, None);
        assert!(scheduler.is_idle().await);
        timeout(Duration::from_secs(1), scheduler.wait_idle()).await?;
        assert_no_batch(&mut batches).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_once_all_batches_are_delivered() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        scheduler.wait_idle().await;
        assert_eq!(Instant::now(), start);

        scheduler.record_arrival("g1", member("A")).await?;
        sleep(Duration::from_secs(6)).await;
        scheduler.record_arrival("g2", member("B")).await?;

        scheduler.wait_idle().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(14));
        assert_recv_batch(&mut batches, start, 8, "g1", vec!["A"]).await;
        assert_recv_batch(&mut batches, start, 14, "g2", vec!["B"]).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_on_shutdown() -> anyhow::Result<()> {
        let (scheduler, _batches) = spawn_scheduler(CoalescerConfig::default());
        let start = Instant::now();

        scheduler.record_arrival("g1", member("A")).await?;
        let waiting = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.wait_idle().await }
        });
        sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;

        waiting.await?;
        assert_eq!(Instant::now() - start, Duration::from_secs(1));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending_batches() -> anyhow::Result<()> {
        let (scheduler, mut batches) = spawn_scheduler(CoalescerConfig::default());

        scheduler.record_arrival("g1", member("A")).await?;
        scheduler.record_arrival("g1", member("B")).await?;
        scheduler.shutdown().await;

        sleep(Duration::from_secs(60)).await;
        assert_no_batch(&mut batches).await;
        assert!(!scheduler.is_notified(&"A").await);
        assert_matches!(
            scheduler.record_arrival("g1", member("C")).await,
            Err(SchedulerError::ShutDown)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_reports_delivery_errors() -> anyhow::Result<()> {
        let start = Instant::now();
        let mut times = vec![start + Duration::from_secs(21), start];
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(move || times.pop().unwrap_or(start));

        let scheduler = Scheduler::with_clock(
            CoalescerConfig::default(),
            clock,
            AlwaysEligible,
            FailingSink,
        );

        scheduler.record_arrival("g1", member("A")).await?;
        let result = scheduler.record_arrival("g1", member("B")).await;

        assert_matches!(result, Err(SchedulerError::DeliveryFailed { key, .. }) if key == "\"g1\"");
        // the subjects have been selected before the delivery failed
        assert!(scheduler.is_notified(&"A").await);
        assert_eq!(scheduler.pending_len(&"g1").await, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timer_delivery_errors_do_not_stop_the_scheduler() -> anyhow::Result<()> {
        let scheduler = Scheduler::new(CoalescerConfig::default(), AlwaysEligible, FailingSink);

        scheduler.record_arrival("g1", member("A")).await?;
        sleep(Duration::from_secs(9)).await;
        assert!(scheduler.is_notified(&"A").await);

        scheduler.record_arrival("g1", member("B")).await?;
        assert_eq!(scheduler.pending_len(&"g1").await, Some(1));
        Ok(())
    }

    #[derive(Debug, Clone, Eq, PartialEq)]
    struct Member {
        id: &'static str,
        display_name: String,
    }

    impl Subject for Member {
        type Id = &'static str;

        fn id(&self) -> Self::Id {
            self.id
        }
    }

    fn member(id: &'static str) -> Member {
        Member {
            id,
            display_name: id.to_lowercase(),
        }
    }

    type Emitted = (&'static str, Vec<Member>, Instant);

    struct ChannelSink {
        sender: mpsc::UnboundedSender<Emitted>,
    }

    #[async_trait]
    impl EmitSink<&'static str, Member> for ChannelSink {
        async fn deliver(&self, key: &&'static str, subjects: Vec<Member>) -> anyhow::Result<()> {
            self.sender.send((*key, subjects, Instant::now()))?;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EmitSink<&'static str, Member> for FailingSink {
        async fn deliver(&self, _key: &&'static str, _subjects: Vec<Member>) -> anyhow::Result<()> {
            anyhow::bail!("channel unavailable")
        }
    }

    #[derive(Default)]
    struct TestValidity {
        rejected: HashSet<&'static str>,
        failing: HashSet<&'static str>,
        delay: Option<Duration>,
    }

    impl TestValidity {
        fn reject(mut self, id: &'static str) -> Self {
            self.rejected.insert(id);
            self
        }

        fn fail_on(mut self, id: &'static str) -> Self {
            self.failing.insert(id);
            self
        }

        fn with_delay(self, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..self
            }
        }
    }

    #[async_trait]
    impl ValidityCheck<&'static str, Member> for TestValidity {
        async fn is_eligible(&self, _key: &&'static str, subject: &Member) -> anyhow::Result<bool> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            if self.failing.contains(subject.id) {
                anyhow::bail!("member lookup failed for {}", subject.id);
            }
            Ok(!self.rejected.contains(subject.id))
        }
    }

    fn spawn_scheduler(
        config: CoalescerConfig,
    ) -> (
        Scheduler<&'static str, Member>,
        mpsc::UnboundedReceiver<Emitted>,
    ) {
        spawn_scheduler_with(config, TestValidity::default())
    }

    fn spawn_scheduler_with(
        config: CoalescerConfig,
        validity: TestValidity,
    ) -> (
        Scheduler<&'static str, Member>,
        mpsc::UnboundedReceiver<Emitted>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(config, validity, ChannelSink { sender });
        (scheduler, receiver)
    }

    async fn assert_recv_batch(
        batches: &mut mpsc::UnboundedReceiver<Emitted>,
        start: Instant,
        at_secs: u64,
        expected_key: &'static str,
        expected: Vec<&'static str>,
    ) {
        match timeout(Duration::from_secs(120), batches.recv()).await {
            Ok(Some((key, subjects, emitted_at))) => {
                let ids: Vec<_> = subjects.iter().map(|subject| subject.id).collect();
                assert_eq!((key, ids), (expected_key, expected));
                assert_eq!(emitted_at - start, Duration::from_secs(at_secs));
            }
            other => panic!("Failed to receive batch: {:?}", other),
        }
    }

    async fn assert_no_batch(batches: &mut mpsc::UnboundedReceiver<Emitted>) {
        if let Ok(batch) = timeout(Duration::from_secs(120), batches.recv()).await {
            panic!("Unexpected batch: {:?}", batch)
        }
    }
}
