//! # Change Debouncer
//!
//! Collapses bursts of change signals into one sync trigger.
//!
//! ## Timing
//! ```text
//! signals:   x  x x   x                          x
//!            │  │ │   │                          │
//! deadline:  ├──┼─┼───┼────────5s────────► fire  ├───────5s───────► fire
//!            reset on every signal
//! ```
//!
//! A single pending deadline is kept; every signal moves it to
//! `now + quiet`. When it passes, the trigger is invoked on its own task so a
//! failing or slow pass never stalls the signal stream.

use async_trait::async_trait;
use boxsync_core::ChangeSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Something that can run a sync pass on demand.
#[async_trait]
pub trait SyncTrigger: Send + Sync + 'static {
    async fn request_sync(&self);
}

// =============================================================================
// Debouncer Handle
// =============================================================================

/// Handle to a running debouncer task.
#[derive(Clone)]
pub struct ChangeDebouncer {
    signal_tx: mpsc::Sender<ChangeSource>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ChangeDebouncer {
    /// Spawns the debounce loop.
    pub fn spawn(trigger: Arc<dyn SyncTrigger>, quiet: Duration) -> (Self, JoinHandle<()>) {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(run(trigger, quiet, signal_rx, shutdown_rx));

        (
            ChangeDebouncer {
                signal_tx,
                shutdown_tx,
            },
            task,
        )
    }

    /// Records that something changed.
    ///
    /// Never blocks. If the channel is full the dropped signal is redundant:
    /// the queued ones already reset the deadline.
    pub fn signal(&self, source: ChangeSource) {
        if self.signal_tx.try_send(source).is_err() {
            debug!(%source, "Change signal coalesced (queue full or stopped)");
        }
    }

    /// Stops the loop. A pending deadline is discarded.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Debounce Loop
// =============================================================================

async fn run(
    trigger: Arc<dyn SyncTrigger>,
    quiet: Duration,
    mut signal_rx: mpsc::Receiver<ChangeSource>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Debouncer received shutdown");
                break;
            }

            signal = signal_rx.recv() => match signal {
                Some(source) => {
                    debug!(%source, "Change signal, quiet period restarted");
                    deadline = Some(Instant::now() + quiet);
                }
                None => break,
            },

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                debug!("Quiet period elapsed, triggering sync");
                let trigger = trigger.clone();
                tokio::spawn(async move {
                    trigger.request_sync().await;
                });
            }
        }
    }

    info!("Debouncer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        fired_at: Mutex<Vec<Instant>>,
    }

    impl RecordingTrigger {
        fn count(&self) -> usize {
            self.fired_at.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SyncTrigger for RecordingTrigger {
        async fn request_sync(&self) {
            self.fired_at.lock().unwrap().push(Instant::now());
        }
    }

    /// Panics on every call after recording it.
    #[derive(Default)]
    struct PanickingTrigger {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SyncTrigger for PanickingTrigger {
        async fn request_sync(&self) {
            *self.calls.lock().unwrap() += 1;
            panic!("engine blew up");
        }
    }

    const QUIET: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_after_last_signal() {
        let trigger = Arc::new(RecordingTrigger::default());
        let (debouncer, _task) = ChangeDebouncer::spawn(trigger.clone(), QUIET);
        let start = Instant::now();

        for i in 0..4 {
            if i > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            debouncer.signal(if i % 2 == 0 {
                ChangeSource::Local
            } else {
                ChangeSource::Remote
            });
        }
        // Last signal at t=3s, so nothing may fire before t=8s.
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(trigger.count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(trigger.count(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let fired = trigger.fired_at.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        let elapsed = fired[0] - start;
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_millis(8_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let trigger = Arc::new(RecordingTrigger::default());
        let (debouncer, _task) = ChangeDebouncer::spawn(trigger.clone(), QUIET);

        debouncer.signal(ChangeSource::Local);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(trigger.count(), 1);

        debouncer.signal(ChangeSource::Remote);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(trigger.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_survives_failing_trigger() {
        let trigger = Arc::new(PanickingTrigger::default());
        let (debouncer, task) = ChangeDebouncer::spawn(trigger.clone(), QUIET);

        for _ in 0..3 {
            debouncer.signal(ChangeSource::Local);
            tokio::time::sleep(Duration::from_secs(6)).await;
        }

        assert_eq!(*trigger.calls.lock().unwrap(), 3);
        assert!(!task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_deadline() {
        let trigger = Arc::new(RecordingTrigger::default());
        let (debouncer, task) = ChangeDebouncer::spawn(trigger.clone(), QUIET);

        debouncer.signal(ChangeSource::Local);
        debouncer.shutdown().await;
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(trigger.count(), 0);
    }
}
