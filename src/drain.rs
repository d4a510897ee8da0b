//! Video drain: copies a stopped ring buffer into a [`VideoArtifact`].
//!
//! The drain is synchronous and runs on a blocking worker while the caller
//! holds the session lock, so no acquisition can start underneath it.

use crate::acquisition::AcquisitionSession;
use crate::error::{AppResult, CameraError};
use crate::sink::VideoArtifact;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Upper bound of the drained index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainBound {
    /// `first..n`: the newest frame is left out.
    #[default]
    Exclusive,
    /// `first..=n`.
    Inclusive,
}

/// Sub-range of logical frame indices to write, `start..stop`.
///
/// Bounds are clamped into the frames the buffer holds: a missing or zero
/// `start` means the oldest frame, a missing or too large `stop` the end of
/// the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameRange {
    /// First index to write
    pub start: Option<u64>,
    /// Index to stop before
    pub stop: Option<u64>,
}

impl FrameRange {
    /// Range from optional bounds.
    pub fn new(start: Option<u64>, stop: Option<u64>) -> Self {
        Self { start, stop }
    }

    /// Intersect with the `held` indices.
    pub fn narrow(&self, held: Range<u64>) -> Range<u64> {
        let start = self.start.map_or(held.start, |s| s.max(held.start));
        let end = match self.stop {
            Some(stop) if stop > held.end => {
                tracing::warn!(requested = stop, available = held.end, "Stop frame beyond the capture");
                held.end
            }
            Some(stop) => stop,
            None => held.end,
        };
        start..end.max(start)
    }
}

/// How often progress is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// After every written frame.
    #[default]
    PerFrame,
    /// At most once per elapsed second, plus the final frame.
    PerSecond,
}

/// Position of a running drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainProgress {
    /// Logical index just written
    pub index: u64,
    /// Frames written so far
    pub written: u64,
    /// Frames the drain will write in total
    pub total: u64,
}

/// Summary of a completed drain.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    /// First and last logical index written; `None` when nothing was written.
    pub indices: Option<(u64, u64)>,
    /// Frames written
    pub frames_written: u64,
    /// File or directory the frames went to, if the sink has one
    pub location: Option<PathBuf>,
    /// Wall time of the drain
    pub elapsed: Duration,
}

/// Copies frames out of a stopped session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainPipeline {
    bound: DrainBound,
    progress: ProgressMode,
    range: FrameRange,
}

impl DrainPipeline {
    /// Drain every captured frame up to `bound`.
    pub fn new(bound: DrainBound, progress: ProgressMode) -> Self {
        Self {
            bound,
            progress,
            range: FrameRange::default(),
        }
    }

    /// Only write the frames inside `range`.
    pub fn with_range(mut self, range: FrameRange) -> Self {
        self.range = range;
        self
    }

    /// Upper bound applied to the captured range.
    pub fn bound(&self) -> DrainBound {
        self.bound
    }

    /// Write every captured frame to `artifact` in index order and close it.
    ///
    /// On a fetch failure the partial artifact is closed and
    /// [`CameraError::Drain`] names the last index that was written.
    pub fn run<F>(
        &self,
        session: &AcquisitionSession,
        mut artifact: VideoArtifact,
        mut on_progress: F,
    ) -> AppResult<DrainReport>
    where
        F: FnMut(DrainProgress),
    {
        let started = Instant::now();
        let range = self.range.narrow(session.captured_range(self.bound)?);
        let total = range.end.saturating_sub(range.start);
        tracing::info!(first = range.start, end = range.end, total, "Draining ring buffer");

        let mut last_good = range.start.saturating_sub(1);
        let mut written = 0;
        let mut last_report = Instant::now();

        for index in range.clone() {
            let image = match fetch(session, index) {
                Ok(image) => image,
                Err(reason) => {
                    tracing::error!(index, last_good, %reason, "Drain aborted");
                    if let Err(e) = artifact.close() {
                        tracing::warn!(error = %e, "Failed to close partial recording");
                    }
                    return Err(CameraError::Drain {
                        last_good_index: last_good,
                        reason,
                    });
                }
            };

            if let Err(e) = artifact.append(index, &image) {
                tracing::error!(index, error = %e, "Video sink failed");
                if let Err(close_err) = artifact.close() {
                    tracing::warn!(error = %close_err, "Failed to close partial recording");
                }
                return Err(e);
            }
            last_good = index;
            written += 1;

            let is_last = index + 1 == range.end;
            let due = match self.progress {
                ProgressMode::PerFrame => true,
                ProgressMode::PerSecond => is_last || last_report.elapsed() >= Duration::from_secs(1),
            };
            if due {
                last_report = Instant::now();
                on_progress(DrainProgress {
                    index,
                    written,
                    total,
                });
            }
        }

        let location = artifact.close()?;
        let report = DrainReport {
            indices: (written > 0).then_some((range.start, last_good)),
            frames_written: written,
            location,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            frames = report.frames_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Drain complete"
        );
        Ok(report)
    }
}

fn fetch(session: &AcquisitionSession, index: u64) -> Result<image::RgbImage, String> {
    match session.frame_at(index) {
        Ok(Some(frame)) => frame.to_rgb().map_err(|e| e.to_string()),
        Ok(None) => Err(format!("frame {index} is not in the buffer")),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grabber::{FrameGrabber, GrabberParameter};
    use crate::mock::{MockMode, SimulatedGrabber};
    use crate::settings::FrameWindow;
    use crate::sink::MemorySink;
    use std::sync::Arc;

    const WINDOW: FrameWindow = FrameWindow {
        x: 0,
        y: 0,
        width: 16,
        height: 8,
    };

    fn recorded(frames: u64) -> (SimulatedGrabber, AcquisitionSession) {
        let grabber = SimulatedGrabber::new(MockMode::Instant);
        grabber.set_parameter(GrabberParameter::Width, 16).unwrap();
        grabber.set_parameter(GrabberParameter::Height, 8).unwrap();
        let mut session = AcquisitionSession::new(Arc::new(grabber.clone()), 1 << 20);
        session.start(Some(frames), WINDOW).unwrap();
        session.stop().unwrap();
        (grabber, session)
    }

    #[test]
    fn exclusive_drain_leaves_out_newest_frame() {
        let (_grabber, session) = recorded(100);
        let (sink, handle) = MemorySink::new();
        let report = DrainPipeline::default()
            .run(&session, VideoArtifact::new(Box::new(sink)), |_| {})
            .unwrap();

        assert_eq!(report.frames_written, 99);
        assert_eq!(report.indices, Some((1, 99)));
        let firsts: Vec<u8> = handle.frames().iter().map(|f| f.get_pixel(0, 0).0[0]).collect();
        assert_eq!(firsts.len(), 99);
        assert!(firsts.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(firsts[0], 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn inclusive_drain_writes_every_frame() {
        let (_grabber, session) = recorded(100);
        let (sink, handle) = MemorySink::new();
        let report = DrainPipeline::new(DrainBound::Inclusive, ProgressMode::PerFrame)
            .run(&session, VideoArtifact::new(Box::new(sink)), |_| {})
            .unwrap();

        assert_eq!(report.frames_written, 100);
        assert_eq!(handle.frames().len(), 100);
    }

    #[test]
    fn fetch_failure_closes_partial_artifact() {
        let (grabber, session) = recorded(20);
        grabber.fail_fetch_at(8);
        let (sink, handle) = MemorySink::new();
        let err = DrainPipeline::default()
            .run(&session, VideoArtifact::new(Box::new(sink)), |_| {})
            .unwrap_err();

        assert!(matches!(err, CameraError::Drain { last_good_index: 7, .. }));
        assert_eq!(handle.frames().len(), 7);
        assert!(handle.is_closed());
    }

    #[test]
    fn progress_is_reported_per_frame() {
        let (_grabber, session) = recorded(5);
        let (sink, _handle) = MemorySink::new();
        let mut seen = Vec::new();
        DrainPipeline::default()
            .run(&session, VideoArtifact::new(Box::new(sink)), |p| seen.push(p.index))
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn per_second_progress_reports_last_frame() {
        let (_grabber, session) = recorded(5);
        let (sink, _handle) = MemorySink::new();
        let mut seen = Vec::new();
        DrainPipeline::new(DrainBound::Inclusive, ProgressMode::PerSecond)
            .run(&session, VideoArtifact::new(Box::new(sink)), |p| seen.push(p))
            .unwrap();
        assert_eq!(seen.last().map(|p| (p.index, p.written, p.total)), Some((5, 5, 5)));
    }

    #[test]
    fn ranged_drain_writes_only_the_selected_frames() {
        let (_grabber, session) = recorded(50);
        let (sink, handle) = MemorySink::new();
        let report = DrainPipeline::default()
            .with_range(FrameRange::new(Some(10), Some(20)))
            .run(&session, VideoArtifact::new(Box::new(sink)), |_| {})
            .unwrap();

        assert_eq!(report.frames_written, 10);
        assert_eq!(report.indices, Some((10, 19)));
        assert_eq!(handle.frames()[0].get_pixel(0, 0).0[0], 10);
    }

    #[test]
    fn frame_range_is_clamped_to_the_capture() {
        assert_eq!(FrameRange::default().narrow(1..100), 1..100);
        assert_eq!(FrameRange::new(Some(0), None).narrow(1..100), 1..100);
        assert_eq!(FrameRange::new(None, Some(500)).narrow(1..100), 1..100);
        assert_eq!(FrameRange::new(Some(40), Some(60)).narrow(50..100), 50..60);
        assert_eq!(FrameRange::new(Some(80), Some(20)).narrow(1..100), 80..80);
    }

    #[test]
    fn empty_session_writes_nothing() {
        let grabber = SimulatedGrabber::new(MockMode::Instant);
        let session = AcquisitionSession::new(Arc::new(grabber), 1 << 20);
        let (sink, handle) = MemorySink::new();
        let report = DrainPipeline::default()
            .run(&session, VideoArtifact::new(Box::new(sink)), |_| {})
            .unwrap();
        assert_eq!(report.frames_written, 0);
        assert_eq!(report.indices, None);
        assert!(handle.is_closed());
    }
}
