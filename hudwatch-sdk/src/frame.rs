//! A tokio-driven frame clock for [`FrameScheduler`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::perf::PerfStore;
use crate::scheduler::{FrameRequester, FrameScheduler};

/// Default gap between a frame request and its flush (about 60 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Wakes the frame loop when the scheduler asks for a frame.
#[derive(Debug, Default)]
pub struct FrameSignal {
    notify: Notify,
}

impl FrameRequester for FrameSignal {
    fn request_frame(&self) {
        // Stores a permit if the loop is busy flushing, so no request is lost.
        self.notify.notify_one();
    }
}

/// Spawn a frame loop and return a scheduler wired to it.
///
/// After each frame request the loop waits `frame_interval`, then flushes.
/// Must be called from within a tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use hudwatch_sdk::{frame, Task};
///
/// #[tokio::main]
/// async fn main() {
///     let (scheduler, handle) = frame::spawn(frame::DEFAULT_FRAME_INTERVAL, None);
///     scheduler.enqueue("render", &Task::new(|| println!("frame")));
///
///     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
///     handle.stop();
/// }
/// ```
pub fn spawn(
    frame_interval: Duration,
    perf: Option<PerfStore>,
) -> (FrameScheduler, FrameLoopHandle) {
    let signal = Arc::new(FrameSignal::default());
    let scheduler = match perf {
        Some(perf) => FrameScheduler::with_perf(signal.clone(), perf),
        None => FrameScheduler::new(signal.clone()),
    };
    let handle = drive(signal, scheduler.clone(), frame_interval);
    (scheduler, handle)
}

/// Run a frame loop for a scheduler that was created with `signal` as its
/// requester.
///
/// Requests made before the loop starts are not lost: the first one is
/// flushed as soon as the loop runs.
pub fn drive(
    signal: Arc<FrameSignal>,
    scheduler: FrameScheduler,
    frame_interval: Duration,
) -> FrameLoopHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = signal.notify.notified() => {
                    tokio::time::sleep(frame_interval).await;
                    scheduler.flush();
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("frame loop stopped");
    });

    FrameLoopHandle { stop_tx }
}

/// Handle for stopping a frame loop.
///
/// Dropping the handle stops the loop as well.
#[derive(Debug)]
pub struct FrameLoopHandle {
    stop_tx: watch::Sender<bool>,
}

impl FrameLoopHandle {
    /// Stop the frame loop. Pending work stays queued.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }
}
