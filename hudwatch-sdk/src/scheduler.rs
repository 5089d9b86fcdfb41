//! Frame scheduler: coalesces UI work into one batched pass per frame.
//!
//! Callers queue `(task type, task)` pairs. The same task queued twice for
//! the same type before a flush runs once. The first enqueue after a flush
//! asks the host for exactly one frame; the host calls
//! [`FrameScheduler::flush`] when that frame arrives.
//!
//! ```text
//! enqueue ──▶ Idle ──request_frame()──▶ Scheduled ──flush()──▶ Flushing ──▶ Idle
//!                                                                 │
//!                                         work queued meanwhile ──┴──▶ Scheduled
//! ```

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::panic_message;
use crate::perf::PerfStore;

/// A unit of scheduled work.
///
/// Identity is the handle, not the closure body: clones of one `Task` are
/// the same task for de-duplication, two `Task::new` calls never are.
#[derive(Clone)]
pub struct Task {
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Task {
    /// Wrap a closure as a task.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Whether `other` is the same task.
    pub fn same(&self, other: &Task) -> bool {
        self.key() == other.key()
    }

    /// Address of the shared closure. Unique while any clone is alive.
    fn key(&self) -> usize {
        Arc::as_ptr(&self.run) as *const () as usize
    }

    fn run(&self) {
        (self.run)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("ptr", &(Arc::as_ptr(&self.run) as *const ()))
            .finish()
    }
}

/// Something that can arrange for [`FrameScheduler::flush`] to be called on
/// the next frame.
pub trait FrameRequester: Send + Sync {
    fn request_frame(&self);
}

/// A requester for hosts that drive frames themselves.
///
/// It only counts requests; the host polls [`FrameScheduler::is_scheduled`]
/// or [`ManualFrames::requests`] and calls `flush` on its own frame clock.
#[derive(Debug, Default)]
pub struct ManualFrames {
    requests: AtomicU64,
}

impl ManualFrames {
    /// Total frames requested so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl FrameRequester for ManualFrames {
    fn request_frame(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Nothing pending, no frame requested.
    Idle,
    /// A frame has been requested and not yet flushed.
    Scheduled,
    /// A flush is running.
    Flushing,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Tasks that ran to completion.
    pub executed: usize,
    /// Tasks that panicked.
    pub failed: usize,
    /// Task types that had pending work.
    pub types: usize,
}

/// Pending tasks for one type: insertion order plus a key set for dedup.
#[derive(Default)]
struct PendingSet {
    tasks: Vec<Task>,
    keys: HashSet<usize>,
}

impl PendingSet {
    fn insert(&mut self, task: &Task) -> bool {
        if !self.keys.insert(task.key()) {
            return false;
        }
        self.tasks.push(task.clone());
        true
    }

    fn take(&mut self) -> Vec<Task> {
        self.keys.clear();
        std::mem::take(&mut self.tasks)
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.tasks.clear();
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

struct Queue {
    phase: FramePhase,
    /// Pending tasks per type, in the order types were first seen.
    types: Vec<(String, PendingSet)>,
}

struct SchedulerInner {
    queue: Mutex<Queue>,
    requester: Arc<dyn FrameRequester>,
    perf: Option<PerfStore>,
}

/// Per-frame task de-duplication and coalescing.
///
/// Cloning gives another handle to the same queue.
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::{FrameScheduler, Task};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let (scheduler, frames) = FrameScheduler::manual();
/// let renders = Arc::new(AtomicU32::new(0));
///
/// let counter = renders.clone();
/// let render = Task::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// scheduler.enqueue("render", &render);
/// scheduler.enqueue("render", &render);
/// assert_eq!(frames.requests(), 1);
///
/// scheduler.flush();
/// assert_eq!(renders.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
}

impl FrameScheduler {
    /// Create a scheduler that asks `requester` for frames.
    pub fn new(requester: Arc<dyn FrameRequester>) -> Self {
        Self::build(requester, None)
    }

    /// Create a scheduler that also times each task type's batch in `perf`
    /// under `frame.<type>`.
    pub fn with_perf(requester: Arc<dyn FrameRequester>, perf: PerfStore) -> Self {
        Self::build(requester, Some(perf))
    }

    /// Create a host-driven scheduler, returning the request counter too.
    pub fn manual() -> (Self, Arc<ManualFrames>) {
        let frames = Arc::new(ManualFrames::default());
        (Self::new(frames.clone()), frames)
    }

    fn build(requester: Arc<dyn FrameRequester>, perf: Option<PerfStore>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(Queue {
                    phase: FramePhase::Idle,
                    types: Vec::new(),
                }),
                requester,
                perf,
            }),
        }
    }

    /// Queue `task` under `task_type`.
    ///
    /// Returns `false` if the same task is already pending for this type.
    /// Work queued while a flush is running lands in the next frame.
    pub fn enqueue(&self, task_type: &str, task: &Task) -> bool {
        let request = {
            let mut queue = self.inner.queue.lock();
            let index = match queue.types.iter().position(|(ty, _)| ty == task_type) {
                Some(index) => index,
                None => {
                    queue.types.push((task_type.to_string(), PendingSet::default()));
                    queue.types.len() - 1
                }
            };

            if !queue.types[index].1.insert(task) {
                trace!(task_type, "task already queued for this frame");
                return false;
            }

            if queue.phase == FramePhase::Idle {
                queue.phase = FramePhase::Scheduled;
                true
            } else {
                false
            }
        };

        if request {
            self.inner.requester.request_frame();
        }
        true
    }

    /// Run everything queued for this frame.
    ///
    /// All pending sets are taken at the start, so tasks queued by running
    /// tasks wait for the next frame. Types run in the order they were first
    /// queued, tasks in insertion order. A panicking task is logged and
    /// skipped. Calling `flush` from inside a task does nothing.
    pub fn flush(&self) -> FlushReport {
        let batches: Vec<(String, Vec<Task>)> = {
            let mut queue = self.inner.queue.lock();
            if queue.phase == FramePhase::Flushing {
                return FlushReport::default();
            }
            queue.phase = FramePhase::Flushing;
            queue
                .types
                .iter_mut()
                .filter(|(_, tasks)| !tasks.is_empty())
                .map(|(ty, tasks)| (ty.clone(), tasks.take()))
                .collect()
        };

        let mut report = FlushReport::default();
        for (task_type, tasks) in batches {
            let watch = self
                .inner
                .perf
                .as_ref()
                .map(|perf| perf.time_start(&format!("frame.{}", task_type)));

            for task in tasks {
                match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                    Ok(()) => report.executed += 1,
                    Err(payload) => {
                        report.failed += 1;
                        warn!(
                            task_type = %task_type,
                            error = panic_message(payload.as_ref()).unwrap_or("task panicked"),
                            "scheduled task failed"
                        );
                    }
                }
            }

            if let Some(watch) = watch {
                watch.end();
            }
            report.types += 1;
        }

        let request = {
            let mut queue = self.inner.queue.lock();
            let pending = queue.types.iter().any(|(_, tasks)| !tasks.is_empty());
            queue.phase = if pending {
                FramePhase::Scheduled
            } else {
                FramePhase::Idle
            };
            pending
        };
        if request {
            self.inner.requester.request_frame();
        }

        trace!(
            executed = report.executed,
            failed = report.failed,
            "frame flushed"
        );
        report
    }

    /// Drop all pending work and forget any requested frame.
    ///
    /// Meant for teardown and tests.
    pub fn clear_all(&self) {
        let mut queue = self.inner.queue.lock();
        for (_, tasks) in queue.types.iter_mut() {
            tasks.clear();
        }
        if queue.phase == FramePhase::Scheduled {
            queue.phase = FramePhase::Idle;
        }
    }

    /// Current scheduling state.
    pub fn phase(&self) -> FramePhase {
        self.inner.queue.lock().phase
    }

    /// Whether a frame has been requested and not flushed yet.
    pub fn is_scheduled(&self) -> bool {
        self.phase() == FramePhase::Scheduled
    }

    /// Pending tasks for one type.
    pub fn pending(&self, task_type: &str) -> usize {
        self.inner
            .queue
            .lock()
            .types
            .iter()
            .find(|(ty, _)| ty == task_type)
            .map_or(0, |(_, tasks)| tasks.len())
    }

    /// Pending tasks across all types.
    pub fn pending_total(&self) -> usize {
        self.inner
            .queue
            .lock()
            .types
            .iter()
            .map(|(_, tasks)| tasks.len())
            .sum()
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("phase", &self.phase())
            .field("pending", &self.pending_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_task() -> (Task, Arc<AtomicU32>) {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let task = Task::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (task, runs)
    }

    fn recording_task(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(move || log.lock().push(name))
    }

    #[test]
    fn same_task_twice_runs_once() {
        let (scheduler, _) = FrameScheduler::manual();
        let (task, runs) = counting_task();

        assert!(scheduler.enqueue("x", &task));
        assert!(!scheduler.enqueue("x", &task));
        assert!(!scheduler.enqueue("x", &task.clone()));

        let report = scheduler.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(report.executed, 1);
    }

    #[test]
    fn same_task_under_different_types_runs_per_type() {
        let (scheduler, _) = FrameScheduler::manual();
        let (task, runs) = counting_task();

        scheduler.enqueue("x", &task);
        scheduler.enqueue("y", &task);
        scheduler.flush();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_tasks_with_same_body_both_run() {
        let (scheduler, _) = FrameScheduler::manual();
        let (a, runs_a) = counting_task();
        let (b, runs_b) = counting_task();

        scheduler.enqueue("x", &a);
        scheduler.enqueue("x", &b);
        scheduler.flush();

        assert_eq!(runs_a.load(Ordering::SeqCst), 1);
        assert_eq!(runs_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn many_tasks_dedup_and_keep_insertion_order() {
        let (scheduler, frames) = FrameScheduler::manual();
        let log = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<Task> = (0..2_000usize)
            .map(|i| {
                let log = log.clone();
                Task::new(move || log.lock().push(i))
            })
            .collect();

        for task in &tasks {
            assert!(scheduler.enqueue("bulk", task));
        }
        for task in tasks.iter().rev() {
            assert!(!scheduler.enqueue("bulk", task));
        }
        assert_eq!(scheduler.pending("bulk"), 2_000);
        assert_eq!(frames.requests(), 1);

        let report = scheduler.flush();
        assert_eq!(report.executed, 2_000);
        assert_eq!(*log.lock(), (0..2_000).collect::<Vec<_>>());

        assert!(scheduler.enqueue("bulk", &tasks[0]));
        assert_eq!(scheduler.pending("bulk"), 1);
    }

    #[test]
    fn only_first_enqueue_requests_a_frame() {
        let (scheduler, frames) = FrameScheduler::manual();
        let (a, _) = counting_task();
        let (b, _) = counting_task();

        assert_eq!(scheduler.phase(), FramePhase::Idle);
        scheduler.enqueue("x", &a);
        scheduler.enqueue("y", &b);
        scheduler.enqueue("x", &b);

        assert_eq!(frames.requests(), 1);
        assert!(scheduler.is_scheduled());

        scheduler.flush();
        assert_eq!(scheduler.phase(), FramePhase::Idle);

        scheduler.enqueue("x", &a);
        assert_eq!(frames.requests(), 2);
    }

    #[test]
    fn runs_in_type_then_insertion_order() {
        let (scheduler, _) = FrameScheduler::manual();
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue("layout", &recording_task(&log, "layout-1"));
        scheduler.enqueue("paint", &recording_task(&log, "paint-1"));
        scheduler.enqueue("layout", &recording_task(&log, "layout-2"));
        scheduler.flush();

        assert_eq!(*log.lock(), vec!["layout-1", "layout-2", "paint-1"]);
    }

    #[test]
    fn type_order_is_stable_across_frames() {
        let (scheduler, _) = FrameScheduler::manual();
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue("first", &recording_task(&log, "a"));
        scheduler.enqueue("second", &recording_task(&log, "b"));
        scheduler.flush();
        log.lock().clear();

        scheduler.enqueue("second", &recording_task(&log, "b"));
        scheduler.enqueue("first", &recording_task(&log, "a"));
        scheduler.flush();

        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn requeue_during_flush_runs_next_frame() {
        let (scheduler, frames) = FrameScheduler::manual();
        let runs = Arc::new(AtomicU32::new(0));

        let slot: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));
        let task = {
            let scheduler = scheduler.clone();
            let runs = runs.clone();
            let slot = slot.clone();
            Task::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
                let me = slot.lock().clone();
                if let Some(me) = me {
                    scheduler.enqueue("x", &me);
                }
            })
        };
        *slot.lock() = Some(task.clone());

        scheduler.enqueue("x", &task);
        scheduler.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending("x"), 1);
        assert!(scheduler.is_scheduled());
        assert_eq!(frames.requests(), 2);

        scheduler.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Break the cycle so the task can be dropped.
        slot.lock().take();
        scheduler.clear_all();
    }

    #[test]
    fn panicking_task_does_not_stop_siblings() {
        let (scheduler, _) = FrameScheduler::manual();
        let (before, runs_before) = counting_task();
        let (after, runs_after) = counting_task();
        let (other_type, runs_other) = counting_task();

        scheduler.enqueue("x", &before);
        scheduler.enqueue("x", &Task::new(|| panic!("render failed")));
        scheduler.enqueue("x", &after);
        scheduler.enqueue("y", &other_type);

        let report = scheduler.flush();
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed, 3);
        assert_eq!(report.types, 2);
        assert_eq!(runs_before.load(Ordering::SeqCst), 1);
        assert_eq!(runs_after.load(Ordering::SeqCst), 1);
        assert_eq!(runs_other.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn nested_flush_is_ignored() {
        let (scheduler, _) = FrameScheduler::manual();
        let nested = Arc::new(Mutex::new(None));
        let task = {
            let scheduler = scheduler.clone();
            let nested = nested.clone();
            Task::new(move || {
                *nested.lock() = Some(scheduler.flush());
            })
        };

        scheduler.enqueue("x", &task);
        scheduler.flush();
        assert_eq!(*nested.lock(), Some(FlushReport::default()));
    }

    #[test]
    fn clear_all_discards_pending_work() {
        let (scheduler, frames) = FrameScheduler::manual();
        let (task, runs) = counting_task();

        scheduler.enqueue("x", &task);
        scheduler.clear_all();
        assert_eq!(scheduler.pending_total(), 0);
        assert_eq!(scheduler.phase(), FramePhase::Idle);

        scheduler.flush();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        scheduler.enqueue("x", &task);
        assert_eq!(frames.requests(), 2);
    }

    #[test]
    fn flush_without_work_is_empty() {
        let (scheduler, frames) = FrameScheduler::manual();
        assert_eq!(scheduler.flush(), FlushReport::default());
        assert_eq!(frames.requests(), 0);
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn batches_are_timed_when_perf_is_attached() {
        let perf = PerfStore::new();
        let scheduler = FrameScheduler::with_perf(Arc::new(ManualFrames::default()), perf.clone());
        let (task, _) = counting_task();

        scheduler.enqueue("paint", &task);
        scheduler.flush();

        assert_eq!(perf.get("frame.paint").unwrap().count, 1);
    }
}
