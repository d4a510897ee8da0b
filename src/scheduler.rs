//! Periodic background tasks with cancellation.
//!
//! Live view and the recording countdown are both "do something every N ms
//! until told to stop". Each runs as its own Tokio task that selects between
//! an interval tick and a oneshot shutdown signal.

use crate::acquisition::AcquisitionSession;
use crate::events::{ControllerEvent, EventSender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running periodic task.
///
/// Dropping the handle signals the task to stop without waiting for it.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Call `tick` every `period`, starting immediately, until it returns
    /// `false` or the task is cancelled.
    pub fn every<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !tick() {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            tracing::trace!(task = name, "Scheduled task finished");
        });
        tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Scheduled task started");
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Task name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the task and wait for it to exit.
    pub async fn cancel(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, error = %e, "Scheduled task panicked");
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Publish the newest captured frame every `period`.
///
/// Ticks are skipped while another operation holds the session, so live view
/// never delays a settings change or a drain.
pub fn live_view(
    session: Arc<Mutex<AcquisitionSession>>,
    events: EventSender,
    period: Duration,
) -> ScheduledTask {
    let mut last_sent = 0;
    ScheduledTask::every("live_view", period, move || {
        let Ok(session) = session.try_lock() else {
            return true;
        };
        match session.current_frame() {
            Ok(Some(frame)) if frame.index != last_sent => {
                last_sent = frame.index;
                // No receivers is fine; the task keeps running.
                let _ = events.send(ControllerEvent::Frame(Arc::new(frame)));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Live view frame unavailable"),
        }
        true
    })
}

/// Count `seconds` down to zero, one event per second.
pub fn countdown(seconds: u64, events: EventSender) -> ScheduledTask {
    let mut remaining = seconds;
    ScheduledTask::every("countdown", Duration::from_secs(1), move || {
        let _ = events.send(ControllerEvent::Countdown {
            remaining_secs: remaining,
        });
        if remaining == 0 {
            return false;
        }
        remaining -= 1;
        true
    })
}
