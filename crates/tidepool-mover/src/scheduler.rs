//! Per-queue mover admission and execution
//!
//! Each pool runs one [`MoverScheduler`] per named queue. The scheduler
//! admits movers under a priority order and a runtime-adjustable concurrency
//! limit; a single dedicated dispatch task matches concurrency permits to the
//! best queued mover. Post-processing (closing the mover, dropping its
//! record, returning the permit) runs exactly once on every completion
//! path, whether the transfer succeeded, failed or was cancelled.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mover::{CancelToken, Mover, MoverId, MoverInfo, MoverPhase, Priority, TRANSFER_KILLED};
use crate::queue::{PrioritizedMover, QueueOrder};
use crate::semaphore::AdjustableSemaphore;

/// How long shutdown waits for running movers to drain before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default concurrency limit for a freshly created queue.
const DEFAULT_MAX_ACTIVE: u64 = 2;

/// Sequence numbers wrap below the queue-id byte.
const SEQUENCE_MASK: u32 = 0x00FF_FFFF;

#[derive(Debug)]
struct JobState {
    phase: MoverPhase,
    started_at: Option<DateTime<Utc>>,
}

/// One admitted mover, owned by the scheduler from admission to completion.
pub(crate) struct JobEntry {
    pub(crate) id: MoverId,
    pub(crate) priority: Priority,
    pub(crate) created: Instant,
    submitted_at: DateTime<Utc>,
    mover: Arc<dyn Mover>,
    cancel: CancelToken,
    state: Mutex<JobState>,
}

impl JobEntry {
    pub(crate) fn new(id: MoverId, mover: Arc<dyn Mover>, priority: Priority) -> Self {
        Self {
            id,
            priority,
            created: Instant::now(),
            submitted_at: Utc::now(),
            mover,
            cancel: CancelToken::new(),
            state: Mutex::new(JobState {
                phase: MoverPhase::Queued,
                started_at: None,
            }),
        }
    }

    /// Mark the transfer as running. Returns false if it was killed while
    /// still queued, in which case execution is skipped and only
    /// post-processing runs.
    fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != MoverPhase::Queued {
            return false;
        }
        state.phase = MoverPhase::Running;
        state.started_at = Some(Utc::now());
        true
    }

    /// Request cooperative cancellation. Returns false if the mover is
    /// already cancelled or done, making repeated kills a no-op.
    fn kill(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            MoverPhase::Canceled | MoverPhase::Done => false,
            MoverPhase::Queued => {
                state.phase = MoverPhase::Canceled;
                drop(state);
                // never executed, so record the failure on the mover directly
                self.mover.set_failure(TRANSFER_KILLED, "Transfer cancelled");
                self.cancel.cancel();
                true
            }
            MoverPhase::Running => {
                state.phase = MoverPhase::Canceled;
                drop(state);
                self.cancel.cancel();
                true
            }
        }
    }

    fn finish(&self) {
        self.state.lock().phase = MoverPhase::Done;
    }

    fn phase(&self) -> MoverPhase {
        self.state.lock().phase
    }

    fn info(&self, queue: &str) -> MoverInfo {
        let state = self.state.lock();
        MoverInfo {
            id: self.id,
            queue: queue.to_string(),
            phase: state.phase,
            priority: self.priority,
            submitted_at: self.submitted_at,
            started_at: state.started_at,
            bytes_transferred: self.mover.bytes_transferred(),
        }
    }
}

struct Inner {
    name: String,
    queue_id: u8,
    order: QueueOrder,
    queue: Mutex<BinaryHeap<PrioritizedMover>>,
    jobs: DashMap<MoverId, Arc<JobEntry>>,
    next_seq: Mutex<u32>,
    shutdown: AtomicBool,
    semaphore: AdjustableSemaphore,
    /// Signals the dispatch task that the queue may be non-empty.
    queued: Notify,
    /// Signals the dispatch task to exit.
    stop: Notify,
}

impl Inner {
    fn next_seq(&self) -> u32 {
        let mut n = self.next_seq.lock();
        *n = if *n == SEQUENCE_MASK { 0 } else { *n + 1 };
        *n
    }

    fn remove_queued(&self, id: MoverId) -> bool {
        let mut queue = self.queue.lock();
        if !queue.iter().any(|p| p.entry.id == id) {
            return false;
        }
        let remaining: Vec<PrioritizedMover> = std::mem::take(&mut *queue)
            .into_iter()
            .filter(|p| p.entry.id != id)
            .collect();
        *queue = remaining.into();
        true
    }

    /// Dedicated dispatch loop: one concurrency permit, then the best queued
    /// mover. A permit acquired but not matched to a mover is released on
    /// every exit path.
    async fn dispatch_loop(inner: Arc<Inner>) {
        loop {
            tokio::select! {
                _ = inner.semaphore.acquire(1) => {}
                _ = inner.stop.notified() => return,
            }

            let entry = loop {
                if inner.shutdown.load(Ordering::Acquire) {
                    inner.semaphore.release(1);
                    return;
                }

                let notified = inner.queued.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(popped) = inner.queue.lock().pop() {
                    break popped.entry;
                }

                tokio::select! {
                    _ = notified => {}
                    _ = inner.stop.notified() => {
                        inner.semaphore.release(1);
                        return;
                    }
                }
            };

            Inner::send_to_execution(Arc::clone(&inner), entry);
        }
    }

    /// Run a mover on its own task. The concurrency permit is owned by this
    /// execution and returned during post-processing.
    fn send_to_execution(inner: Arc<Inner>, entry: Arc<JobEntry>) {
        tokio::spawn(async move {
            if entry.begin() {
                debug!(queue = %inner.name, mover = %entry.id, "transfer starting");
                match entry.mover.execute(entry.cancel.clone()).await {
                    Ok(()) => {
                        debug!(queue = %inner.name, mover = %entry.id, "transfer completed");
                    }
                    Err(Error::TransferKilled) => {
                        entry.mover.set_failure(TRANSFER_KILLED, "Transfer was killed");
                        info!(queue = %inner.name, mover = %entry.id, "transfer was killed");
                    }
                    Err(e) => {
                        warn!(queue = %inner.name, mover = %entry.id, error = %e, "transfer failed");
                    }
                }
            }
            Inner::postprocess(&inner, &entry, true).await;
        });
    }

    /// Close the mover, drop its record and (when it held one) return the
    /// concurrency permit. Failures here are logged but never skip the
    /// release: a leaked permit or job record is a correctness bug.
    async fn postprocess(inner: &Arc<Inner>, entry: &Arc<JobEntry>, release_permit: bool) {
        if let Err(e) = entry.mover.close().await {
            warn!(queue = %inner.name, mover = %entry.id, error = %e, "mover post-processing failed");
        }
        entry.finish();
        inner.jobs.remove(&entry.id);
        if release_permit {
            inner.semaphore.release(1);
        }
    }

    async fn cancel_entry(inner: &Arc<Inner>, entry: Arc<JobEntry>) {
        if inner.remove_queued(entry.id) {
            // still queued: kill and post-process synchronously; it never
            // held a concurrency permit
            entry.kill();
            info!(queue = %inner.name, mover = %entry.id, "cancelled queued mover");
            Inner::postprocess(inner, &entry, false).await;
        } else if entry.kill() {
            info!(queue = %inner.name, mover = %entry.id, "kill requested for running mover");
        }
    }
}

/// Priority mover queue with bounded-concurrency execution.
pub struct MoverScheduler {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MoverScheduler {
    /// Create a scheduler and start its dispatch task.
    ///
    /// `queue_id` is embedded in the high bits of every mover id issued by
    /// this instance. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, queue_id: u8, order: QueueOrder) -> Self {
        let inner = Arc::new(Inner {
            name: name.into(),
            queue_id,
            order,
            queue: Mutex::new(BinaryHeap::new()),
            jobs: DashMap::new(),
            next_seq: Mutex::new(0),
            shutdown: AtomicBool::new(false),
            semaphore: AdjustableSemaphore::new(DEFAULT_MAX_ACTIVE),
            queued: Notify::new(),
            stop: Notify::new(),
        });
        let dispatcher = tokio::spawn(Inner::dispatch_loop(Arc::clone(&inner)));
        Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Admit a mover. If a free concurrency slot exists it starts
    /// immediately; otherwise it waits in the priority queue.
    pub fn add(&self, mover: Arc<dyn Mover>, priority: Priority) -> Result<MoverId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let id = MoverId::new(self.inner.queue_id, self.inner.next_seq());

        if self.inner.semaphore.max_permits() == 0 {
            warn!(
                queue = %self.inner.name,
                mover = %id,
                "mover added to a queue that is not configured to execute any transfers"
            );
        }

        let entry = Arc::new(JobEntry::new(id, mover, priority));
        self.inner.jobs.insert(id, Arc::clone(&entry));

        if self.inner.semaphore.try_acquire(1) {
            debug!(queue = %self.inner.name, mover = %id, "free slot, starting immediately");
            Inner::send_to_execution(Arc::clone(&self.inner), entry);
        } else {
            debug!(queue = %self.inner.name, mover = %id, priority = ?priority, "mover queued");
            self.inner
                .queue
                .lock()
                .push(PrioritizedMover::new(entry, self.inner.order));
            self.inner.queued.notify_one();
        }

        Ok(id)
    }

    /// Cancel a mover. A queued mover is removed and post-processed at once;
    /// a running mover gets a cooperative kill and completes through normal
    /// post-processing. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: MoverId) -> Result<()> {
        let entry = self
            .inner
            .jobs
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(Error::NotFound(id))?;
        Inner::cancel_entry(&self.inner, entry).await;
        Ok(())
    }

    /// Shut the scheduler down: reject further admission, stop the dispatch
    /// task, cancel every tracked mover and wait up to a fixed grace period
    /// for running transfers to drain. Movers that fail to terminate in time
    /// are logged; shutdown proceeds regardless.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.notify_one();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        let entries: Vec<Arc<JobEntry>> = self
            .inner
            .jobs
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for entry in entries {
            Inner::cancel_entry(&self.inner, entry).await;
        }

        info!(queue = %self.inner.name, "waiting for movers to finish");
        let max = self.inner.semaphore.max_permits();
        let drained =
            tokio::time::timeout(SHUTDOWN_GRACE, self.inner.semaphore.acquire(max)).await;
        if drained.is_err() {
            let stuck: Vec<String> = self.inner.jobs.iter().map(|e| e.key().to_string()).collect();
            warn!(
                queue = %self.inner.name,
                movers = ?stuck,
                "failed to terminate some movers prior to shutdown"
            );
        }
    }

    /// Name of this queue.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue id embedded in mover ids issued by this scheduler.
    pub fn queue_id(&self) -> u8 {
        self.inner.queue_id
    }

    /// Tie-break order of this queue.
    pub fn order(&self) -> QueueOrder {
        self.inner.order
    }

    /// Number of movers currently executing.
    pub fn active_count(&self) -> usize {
        self.inner.jobs.len().saturating_sub(self.queue_size())
    }

    /// Number of movers waiting for a concurrency slot.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Number of queued movers with the given priority.
    pub fn count_by_priority(&self, priority: Priority) -> usize {
        self.inner
            .queue
            .lock()
            .iter()
            .filter(|p| p.entry.priority == priority)
            .count()
    }

    /// Current concurrency limit.
    pub fn max_active(&self) -> u64 {
        self.inner.semaphore.max_permits()
    }

    /// Change the concurrency limit at runtime. Raising it dispatches queued
    /// movers; lowering it never preempts running transfers.
    pub fn set_max_active(&self, max: u64) {
        self.inner.semaphore.set_max_permits(max);
    }

    /// Introspection record for one mover.
    pub fn job_info(&self, id: MoverId) -> Result<MoverInfo> {
        self.inner
            .jobs
            .get(&id)
            .map(|e| e.value().info(&self.inner.name))
            .ok_or(Error::NotFound(id))
    }

    /// Introspection records for every tracked mover.
    pub fn job_infos(&self) -> Vec<MoverInfo> {
        self.inner
            .jobs
            .iter()
            .map(|e| e.value().info(&self.inner.name))
            .collect()
    }

    /// Phase of one mover, if still tracked.
    pub fn phase(&self, id: MoverId) -> Option<MoverPhase> {
        self.inner.jobs.get(&id).map(|e| e.value().phase())
    }
}

static_assertions::assert_impl_all!(MoverScheduler: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    /// Test mover that records its lifecycle in a shared log. It spins until
    /// its gate opens (or it is cancelled, when `respect_cancel` is set).
    struct TestMover {
        label: &'static str,
        gate: Arc<AtomicBool>,
        respect_cancel: bool,
        log: Arc<Mutex<Vec<String>>>,
        failure: Mutex<Option<(i32, String)>>,
    }

    impl TestMover {
        fn new(
            label: &'static str,
            gate: Arc<AtomicBool>,
            respect_cancel: bool,
            log: Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                label,
                gate,
                respect_cancel,
                log,
                failure: Mutex::new(None),
            })
        }

        fn open_gate() -> Arc<AtomicBool> {
            Arc::new(AtomicBool::new(true))
        }

        fn closed_gate() -> Arc<AtomicBool> {
            Arc::new(AtomicBool::new(false))
        }
    }

    #[async_trait]
    impl Mover for TestMover {
        async fn execute(&self, cancel: CancelToken) -> Result<()> {
            self.log.lock().push(format!("start:{}", self.label));
            while !self.gate.load(Ordering::Acquire) {
                if self.respect_cancel && cancel.is_cancelled() {
                    return Err(Error::TransferKilled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.log.lock().push(format!("done:{}", self.label));
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.log.lock().push(format!("close:{}", self.label));
            Ok(())
        }

        fn set_failure(&self, code: i32, message: &str) {
            *self.failure.lock() = Some((code, message.to_string()));
        }

        fn bytes_transferred(&self) -> u64 {
            0
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn log_of(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_executes_immediately_when_slot_free() {
        let sched = MoverScheduler::new("regular", 1, QueueOrder::Fifo);
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = sched
            .add(
                TestMover::new("a", TestMover::open_gate(), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        assert_eq!(id.queue_id(), 1);
        assert_eq!(id.sequence(), 1);

        wait_until(|| sched.job_infos().is_empty()).await;
        assert_eq!(log_of(&log), vec!["start:a", "done:a", "close:a"]);
    }

    #[tokio::test]
    async fn test_priority_order_when_queued() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = TestMover::closed_gate();

        sched
            .add(
                TestMover::new("blocker", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;

        sched
            .add(
                TestMover::new("low", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Low,
            )
            .unwrap();
        sched
            .add(
                TestMover::new("high", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::High,
            )
            .unwrap();
        assert_eq!(sched.queue_size(), 2);
        assert_eq!(sched.count_by_priority(Priority::High), 1);
        assert_eq!(sched.count_by_priority(Priority::Low), 1);

        gate.store(true, Ordering::Release);
        wait_until(|| sched.job_infos().is_empty()).await;

        let starts: Vec<String> = log_of(&log)
            .into_iter()
            .filter(|l| l.starts_with("start:"))
            .collect();
        assert_eq!(starts, vec!["start:blocker", "start:high", "start:low"]);
    }

    #[tokio::test]
    async fn test_lifo_tie_break() {
        let sched = MoverScheduler::new("p2p", 0, QueueOrder::Lifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = TestMover::closed_gate();

        sched
            .add(
                TestMover::new("blocker", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;

        sched
            .add(
                TestMover::new("first", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        sched
            .add(
                TestMover::new("second", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();

        gate.store(true, Ordering::Release);
        wait_until(|| sched.job_infos().is_empty()).await;

        let starts: Vec<String> = log_of(&log)
            .into_iter()
            .filter(|l| l.starts_with("start:"))
            .collect();
        assert_eq!(starts, vec!["start:blocker", "start:second", "start:first"]);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        struct CountingMover {
            current: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Mover for CountingMover {
            async fn execute(&self, _cancel: CancelToken) -> Result<()> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }

            async fn close(&self) -> Result<()> {
                Ok(())
            }

            fn set_failure(&self, _code: i32, _message: &str) {}

            fn bytes_transferred(&self) -> u64 {
                0
            }
        }

        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        assert_eq!(sched.max_active(), 2);

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            sched
                .add(
                    Arc::new(CountingMover {
                        current: Arc::clone(&current),
                        peak: Arc::clone(&peak),
                    }),
                    Priority::Regular,
                )
                .unwrap();
        }

        wait_until(|| sched.job_infos().is_empty()).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_queued_mover() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = TestMover::closed_gate();

        sched
            .add(
                TestMover::new("blocker", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;

        let queued_mover =
            TestMover::new("queued", TestMover::open_gate(), true, Arc::clone(&log));
        let queued_id = sched
            .add(Arc::clone(&queued_mover) as Arc<dyn Mover>, Priority::Regular)
            .unwrap();
        assert_eq!(sched.queue_size(), 1);

        sched.cancel(queued_id).await.unwrap();
        assert_eq!(sched.queue_size(), 0);
        assert!(sched.job_info(queued_id).is_err());

        // never started, but post-processing closed it and recorded the kill
        assert!(log_of(&log).contains(&"close:queued".to_string()));
        assert!(!log_of(&log).contains(&"start:queued".to_string()));
        assert_eq!(
            queued_mover.failure.lock().as_ref().map(|f| f.0),
            Some(TRANSFER_KILLED)
        );

        // the slot the queued mover never held is still usable
        gate.store(true, Ordering::Release);
        wait_until(|| sched.job_infos().is_empty()).await;
        sched
            .add(
                TestMover::new("after", TestMover::open_gate(), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log_of(&log).contains(&"done:after".to_string())).await;
    }

    #[tokio::test]
    async fn test_cancel_running_mover_releases_slot_once() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = sched
            .add(
                TestMover::new("victim", TestMover::closed_gate(), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;
        assert_eq!(sched.phase(id), Some(MoverPhase::Running));

        sched.cancel(id).await.unwrap();
        // second cancel while post-processing may still be pending: no-op
        let _ = sched.cancel(id).await;

        wait_until(|| sched.job_infos().is_empty()).await;
        assert!(log_of(&log).contains(&"close:victim".to_string()));

        // permit was released exactly once: one new mover runs, a second queues
        let gate = TestMover::closed_gate();
        sched
            .add(
                TestMover::new("next", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log_of(&log).contains(&"start:next".to_string())).await;
        sched
            .add(
                TestMover::new("waiting", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sched.queue_size(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_mover() {
        let sched = MoverScheduler::new("regular", 3, QueueOrder::Fifo);
        let missing = MoverId::new(3, 99);
        assert!(matches!(
            sched.cancel(missing).await,
            Err(Error::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            sched.job_info(missing),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_rejected_after_shutdown() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.shutdown().await;

        let log = Arc::new(Mutex::new(Vec::new()));
        let result = sched.add(
            TestMover::new("late", TestMover::open_gate(), true, log),
            Priority::Regular,
        );
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_and_running() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = TestMover::closed_gate();

        sched
            .add(
                TestMover::new("running", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;
        sched
            .add(
                TestMover::new("queued", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();

        sched.shutdown().await;

        let entries = log_of(&log);
        assert!(entries.contains(&"close:running".to_string()));
        assert!(entries.contains(&"close:queued".to_string()));
        assert!(!entries.contains(&"start:queued".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_gives_up_on_stuck_mover() {
        let sched = MoverScheduler::new("regular", 0, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        // ignores its cancel token entirely
        sched
            .add(
                TestMover::new("stuck", TestMover::closed_gate(), false, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;

        let start = Instant::now();
        sched.shutdown().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= SHUTDOWN_GRACE);
        assert!(elapsed < SHUTDOWN_GRACE + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_raising_concurrency_dispatches_queued() {
        let sched = MoverScheduler::new("tape", 0, QueueOrder::Fifo);
        sched.set_max_active(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        sched
            .add(
                TestMover::new("parked", TestMover::open_gate(), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sched.queue_size(), 1);
        assert!(log.lock().is_empty());

        sched.set_max_active(1);
        wait_until(|| sched.job_infos().is_empty()).await;
        assert!(log_of(&log).contains(&"done:parked".to_string()));
    }

    #[tokio::test]
    async fn test_job_info_reflects_phase() {
        let sched = MoverScheduler::new("regular", 2, QueueOrder::Fifo);
        sched.set_max_active(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let gate = TestMover::closed_gate();

        let running = sched
            .add(
                TestMover::new("running", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::Regular,
            )
            .unwrap();
        wait_until(|| log.lock().len() == 1).await;
        let queued = sched
            .add(
                TestMover::new("queued", Arc::clone(&gate), true, Arc::clone(&log)),
                Priority::High,
            )
            .unwrap();

        let info = sched.job_info(running).unwrap();
        assert_eq!(info.phase, MoverPhase::Running);
        assert_eq!(info.queue, "regular");
        assert!(info.started_at.is_some());

        let info = sched.job_info(queued).unwrap();
        assert_eq!(info.phase, MoverPhase::Queued);
        assert_eq!(info.priority, Priority::High);
        assert!(info.started_at.is_none());

        assert_eq!(sched.active_count(), 1);
        assert_eq!(sched.job_infos().len(), 2);

        // introspection records serialize for the monitoring layer
        let json = serde_json::to_string(&sched.job_infos()).unwrap();
        assert!(json.contains("\"queue\":\"regular\""));

        gate.store(true, Ordering::Release);
        wait_until(|| sched.job_infos().is_empty()).await;
    }

    #[tokio::test]
    async fn test_sequence_wraps_below_queue_id() {
        let sched = MoverScheduler::new("regular", 5, QueueOrder::Fifo);
        *sched.inner.next_seq.lock() = SEQUENCE_MASK - 1;

        assert_eq!(sched.inner.next_seq(), SEQUENCE_MASK);
        assert_eq!(sched.inner.next_seq(), 0);
        assert_eq!(sched.inner.next_seq(), 1);

        let id = MoverId::new(5, SEQUENCE_MASK);
        assert_eq!(id.queue_id(), 5);
        assert_eq!(id.sequence(), SEQUENCE_MASK);
    }
}
