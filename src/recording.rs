//! Timed recordings.
//!
//! A recording captures `seconds * framerate` frames into a buffer of exactly
//! that size, waits for the configured stop trigger, stops the acquisition and
//! drains the buffer into a video sink on a blocking worker. Optionally live
//! capture is resumed afterwards.

use crate::acquisition::AcquisitionSession;
use crate::config::RecordingConfig;
use crate::drain::{DrainPipeline, DrainReport, FrameRange};
use crate::error::{AppResult, CameraError};
use crate::events::{ControllerEvent, EventSender};
use crate::scheduler;
use crate::settings::FrameWindow;
use crate::sink::{self, VideoArtifact, VideoSink};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Interval at which the capture progress is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What ends the capture phase of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Stop once the requested frame count is captured. Gives up after the
    /// recording duration plus the stall grace period.
    #[default]
    FrameCount,
    /// Stop when the recording duration has elapsed.
    Timer,
}

/// Frame budget of one recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingPlan {
    /// Frames to capture
    pub frames: u64,
    /// Recording length
    pub duration: Duration,
    /// Window the frames are captured with
    pub window: FrameWindow,
}

impl RecordingPlan {
    /// Plan `seconds` of capture at `framerate`; at least one frame.
    pub fn new(seconds: f64, framerate: u32, window: FrameWindow) -> AppResult<Self> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(CameraError::validation(
                "seconds",
                seconds,
                "recording length must be positive",
            ));
        }
        let frames = (seconds * f64::from(framerate)).round().max(1.0) as u64;
        Ok(Self {
            frames,
            duration: Duration::from_secs_f64(seconds),
            window,
        })
    }

    /// Whole seconds shown by the countdown.
    pub fn countdown_secs(&self) -> u64 {
        self.duration.as_secs_f64().ceil() as u64
    }
}

/// Marks the acquisition session as owned by a recording.
///
/// Reserved synchronously before the recording task is spawned, so a second
/// request or a frame size change cannot slip in before the counted
/// acquisition starts or after it stops.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSlot(Arc<AtomicBool>);

impl RecordingSlot {
    pub fn is_taken(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reserve(&self) -> AppResult<RecordingGuard> {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CameraError::Busy("a recording is already in progress".to_string()))?;
        Ok(RecordingGuard(Arc::clone(&self.0)))
    }
}

/// Releases the slot when dropped, however the recording task ends.
#[derive(Debug)]
pub(crate) struct RecordingGuard(Arc<AtomicBool>);

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Opens the video sink for a window once the capture is stopped.
pub(crate) type SinkFactory = Box<dyn FnOnce(&FrameWindow) -> AppResult<Box<dyn VideoSink>> + Send>;

/// Writes a stopped session into a sink, then optionally resumes live capture.
pub(crate) struct DrainJob {
    pub session: Arc<Mutex<AcquisitionSession>>,
    pub events: EventSender,
    pub config: RecordingConfig,
    /// Window the captured frames were taken with
    pub window: FrameWindow,
    pub range: FrameRange,
    pub open_sink: SinkFactory,
    pub guard: RecordingGuard,
}

/// Everything a recording task needs, detached from the controller.
pub(crate) struct RecordingJob {
    pub plan: RecordingPlan,
    pub drain: DrainJob,
}

/// A recording in progress.
#[derive(Debug)]
pub struct RecordingTask {
    plan: RecordingPlan,
    handle: JoinHandle<AppResult<DrainReport>>,
}

impl RecordingTask {
    /// Frame budget this recording was started with.
    pub fn plan(&self) -> RecordingPlan {
        self.plan
    }

    /// Whether capture and drain have both ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for capture and drain to complete.
    pub async fn wait(self) -> AppResult<DrainReport> {
        self.handle
            .await
            .map_err(|e| CameraError::InvalidState(format!("recording task failed: {e}")))?
    }
}

impl RecordingJob {
    pub fn spawn(self) -> RecordingTask {
        let plan = self.plan;
        RecordingTask {
            plan,
            handle: tokio::spawn(self.run()),
        }
    }

    async fn run(self) -> AppResult<DrainReport> {
        let drain = self.drain;
        let countdown = scheduler::countdown(self.plan.countdown_secs(), drain.events.clone());
        let captured = capture(&drain.session, &drain.config, self.plan).await;
        countdown.cancel().await;
        if let Err(e) = captured {
            tracing::error!(error = %e, "Recording capture failed");
            if drain.config.resume_live {
                resume(&mut *drain.session.lock().await, drain.window);
            }
            return Err(e);
        }
        drain.run().await
    }
}

impl DrainJob {
    pub async fn run(self) -> AppResult<DrainReport> {
        let events = self.events.clone();
        let report = self.drain().await;
        match &report {
            Ok(report) => {
                let _ = events.send(ControllerEvent::RecordingFinished {
                    report: report.clone(),
                });
            }
            Err(e) => tracing::error!(error = %e, "Recording failed"),
        }
        report
    }

    async fn drain(self) -> AppResult<DrainReport> {
        let DrainJob {
            session,
            events,
            config,
            window,
            range,
            open_sink,
            guard,
        } = self;
        let mut session_guard = session.lock_owned().await;
        let resume_live = config.resume_live;
        let sink = match open_sink(&window) {
            Ok(sink) => sink,
            Err(e) => {
                if resume_live {
                    resume(&mut session_guard, window);
                }
                return Err(e);
            }
        };
        let pipeline = DrainPipeline::new(config.drain_bound, config.progress).with_range(range);

        tokio::task::spawn_blocking(move || {
            let _reserved = guard;
            let mut session = session_guard;
            let report = pipeline.run(&session, VideoArtifact::new(sink), |progress| {
                let _ = events.send(ControllerEvent::Progress {
                    index: progress.index,
                    written: progress.written,
                    total: progress.total,
                });
            });
            if resume_live {
                resume(&mut session, window);
            }
            report
        })
        .await
        .map_err(|e| CameraError::InvalidState(format!("drain worker failed: {e}")))?
    }
}

fn resume(session: &mut AcquisitionSession, window: FrameWindow) {
    if let Err(e) = session.start(None, window) {
        tracing::error!(error = %e, "Failed to resume live capture");
    }
}

/// Start a counted acquisition and wait for the stop trigger.
async fn capture(
    session: &Mutex<AcquisitionSession>,
    config: &RecordingConfig,
    plan: RecordingPlan,
) -> AppResult<()> {
    session
        .lock()
        .await
        .start(Some(plan.frames), plan.window)?;
    tracing::info!(frames = plan.frames, seconds = plan.duration.as_secs_f64(), "Recording started");

    let started = Instant::now();
    match config.stop_trigger {
        StopTrigger::Timer => tokio::time::sleep(plan.duration).await,
        StopTrigger::FrameCount => {
            let deadline = plan.duration + config.stall_grace();
            loop {
                let (last, complete) = {
                    let session = session.lock().await;
                    (session.last_index()?, session.is_complete()?)
                };
                if complete {
                    break;
                }
                if started.elapsed() >= deadline {
                    tracing::warn!(
                        captured = last,
                        requested = plan.frames,
                        "Capture stalled, stopping early"
                    );
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    let mut session = session.lock().await;
    session.stop()?;
    tracing::info!(captured = session.last_index()?, "Capture finished");
    Ok(())
}

/// Sink factory for the configured output.
pub(crate) fn configured_sink(config: &RecordingConfig) -> SinkFactory {
    let config = config.clone();
    Box::new(move |window: &FrameWindow| {
        sink::open_sink(&config, window.width, window.height, chrono::Utc::now())
    })
}
