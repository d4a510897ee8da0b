//! Simulated frame grabber.
//!
//! Frames are synthesized on demand from their index, so large rings cost no
//! memory. Pixel `(x, y)` of frame `i` holds `(x + y + i) mod 256`; the
//! top-left pixel therefore identifies the frame.

use super::{DeviceEvent, DeviceLog, MockMode};
use crate::error::{AppResult, CameraError};
use crate::frame::Frame;
use crate::grabber::{BufferHandle, FrameCount, FrameGrabber, GrabberParameter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct SimBuffer {
    width: u32,
    height: u32,
    frame_bytes: u64,
    capacity: u64,
    last_index: u64,
    limit: Option<u64>,
    acquiring: bool,
    generation: u64,
}

#[derive(Debug)]
struct GrabberState {
    width: u32,
    height: u32,
    frames_per_sec: u32,
    next_id: u64,
    buffers: HashMap<u64, SimBuffer>,
    memory_limit: Option<u64>,
    fail_fetch_at: Option<u64>,
}

impl GrabberState {
    fn buffer(&mut self, handle: &BufferHandle) -> AppResult<&mut SimBuffer> {
        self.buffers
            .get_mut(&handle.id())
            .ok_or_else(|| CameraError::Grabber(format!("unknown buffer {}", handle.id())))
    }
}

/// In-process stand-in for the frame grabber board.
#[derive(Debug, Clone)]
pub struct SimulatedGrabber {
    mode: MockMode,
    state: Arc<Mutex<GrabberState>>,
    log: Option<DeviceLog>,
}

impl SimulatedGrabber {
    /// Grabber with default geometry and no buffers.
    pub fn new(mode: MockMode) -> Self {
        Self {
            mode,
            state: Arc::new(Mutex::new(GrabberState {
                width: 1024,
                height: 1024,
                frames_per_sec: 30,
                next_id: 1,
                buffers: HashMap::new(),
                memory_limit: None,
                fail_fetch_at: None,
            })),
            log: None,
        }
    }

    /// Record every call into `log`.
    pub fn with_log(mut self, log: DeviceLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Fail allocations that would exceed `bytes` in total.
    pub fn with_memory_limit(self, bytes: u64) -> Self {
        self.state.lock().memory_limit = Some(bytes);
        self
    }

    /// Make fetching logical frame `index` fail with a device error.
    pub fn fail_fetch_at(&self, index: u64) {
        self.state.lock().fail_fetch_at = Some(index);
    }

    /// Undo injected faults.
    pub fn clear_faults(&self) {
        self.state.lock().fail_fetch_at = None;
    }

    /// Deliver `frames` more frames to every acquiring buffer.
    ///
    /// This is the capture clock in [`MockMode::Instant`] for continuous
    /// acquisitions.
    pub fn advance(&self, frames: u64) {
        let mut state = self.state.lock();
        for buffer in state.buffers.values_mut().filter(|b| b.acquiring) {
            deliver(buffer, frames);
        }
    }

    /// Last value set for `parameter`.
    pub fn parameter(&self, parameter: GrabberParameter) -> u32 {
        let state = self.state.lock();
        match parameter {
            GrabberParameter::Width => state.width,
            GrabberParameter::Height => state.height,
            GrabberParameter::FramesPerSec => state.frames_per_sec,
        }
    }

    /// Bytes held by all live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.state
            .lock()
            .buffers
            .values()
            .map(|b| b.frame_bytes * b.capacity)
            .sum()
    }

    /// Buffers not yet freed.
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    fn record(&self, event: DeviceEvent) {
        if let Some(log) = &self.log {
            log.push(event);
        }
    }

    fn spawn_clock(&self, id: u64, generation: u64) {
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || loop {
            let fps = state.lock().frames_per_sec.max(1);
            std::thread::sleep(Duration::from_secs_f64(1.0 / f64::from(fps)));
            let mut guard = state.lock();
            match guard.buffers.get_mut(&id) {
                Some(buffer) if buffer.generation == generation && buffer.acquiring => {
                    deliver(buffer, 1)
                }
                _ => break,
            }
        });
    }
}

fn deliver(buffer: &mut SimBuffer, frames: u64) {
    let target = buffer.last_index.saturating_add(frames);
    buffer.last_index = match buffer.limit {
        Some(limit) => target.min(limit),
        None => target,
    };
    if buffer.limit.is_some_and(|limit| buffer.last_index >= limit) {
        buffer.acquiring = false;
    }
}

fn synthesize(index: u64, width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.push((u64::from(x) + u64::from(y) + index) as u8);
        }
    }
    pixels
}

impl FrameGrabber for SimulatedGrabber {
    fn allocate(&self, frame_bytes: u64, capacity: u64) -> AppResult<BufferHandle> {
        let requested = frame_bytes.saturating_mul(capacity);
        let mut state = self.state.lock();

        let expected = u64::from(state.width) * u64::from(state.height);
        if frame_bytes != expected {
            return Err(CameraError::Allocation {
                requested_bytes: requested,
                capacity,
                reason: format!(
                    "frame size {frame_bytes} does not match grabber geometry {}x{}",
                    state.width, state.height
                ),
            });
        }
        if capacity == 0 {
            return Err(CameraError::Allocation {
                requested_bytes: 0,
                capacity,
                reason: "capacity must be at least one frame".to_string(),
            });
        }
        if let Some(limit) = state.memory_limit {
            let in_use: u64 = state.buffers.values().map(|b| b.frame_bytes * b.capacity).sum();
            if in_use.saturating_add(requested) > limit {
                return Err(CameraError::Allocation {
                    requested_bytes: requested,
                    capacity,
                    reason: format!("only {} of {limit} bytes available", limit - in_use.min(limit)),
                });
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        let (width, height) = (state.width, state.height);
        state.buffers.insert(
            id,
            SimBuffer {
                width,
                height,
                frame_bytes,
                capacity,
                last_index: 0,
                limit: None,
                acquiring: false,
                generation: 0,
            },
        );
        drop(state);

        self.record(DeviceEvent::Allocate {
            frame_bytes,
            capacity,
        });
        Ok(BufferHandle::new(id))
    }

    fn acquire(&self, handle: &BufferHandle, count: FrameCount) -> AppResult<()> {
        let generation = {
            let mut state = self.state.lock();
            let buffer = state.buffer(handle)?;
            if buffer.acquiring {
                return Err(CameraError::Grabber("buffer is already acquiring".to_string()));
            }
            buffer.last_index = 0;
            buffer.generation += 1;
            buffer.acquiring = true;
            buffer.limit = match count {
                FrameCount::Frames(n) => Some(n),
                FrameCount::Infinite => None,
            };
            if let (MockMode::Instant, FrameCount::Frames(n)) = (self.mode, count) {
                deliver(buffer, n);
            }
            buffer.generation
        };

        self.record(DeviceEvent::Acquire { count });
        if self.mode == MockMode::Realistic {
            self.spawn_clock(handle.id(), generation);
        }
        Ok(())
    }

    fn frame_at(&self, handle: &BufferHandle, index: u64) -> AppResult<Option<Frame>> {
        let (width, height) = {
            let mut state = self.state.lock();
            let fail_at = state.fail_fetch_at;
            let buffer = state.buffer(handle)?;
            if index == 0 || index > buffer.last_index {
                return Ok(None);
            }
            if buffer.last_index - index >= buffer.capacity {
                return Err(CameraError::Grabber(format!(
                    "frame {index} was overwritten (last {}, capacity {})",
                    buffer.last_index, buffer.capacity
                )));
            }
            if fail_at == Some(index) {
                return Err(CameraError::Grabber(format!("DMA transfer of frame {index} failed")));
            }
            (buffer.width, buffer.height)
        };

        self.record(DeviceEvent::FrameRead { index });
        Ok(Some(Frame {
            index,
            width,
            height,
            pixels: synthesize(index, width, height),
        }))
    }

    fn last_index(&self, handle: &BufferHandle) -> AppResult<u64> {
        Ok(self.state.lock().buffer(handle)?.last_index)
    }

    fn stop(&self, handle: &BufferHandle) -> AppResult<()> {
        self.state.lock().buffer(handle)?.acquiring = false;
        self.record(DeviceEvent::Stop);
        Ok(())
    }

    fn free(&self, handle: BufferHandle) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            if state.buffer(&handle)?.acquiring {
                return Err(CameraError::Grabber(
                    "cannot free a buffer while acquiring".to_string(),
                ));
            }
            state.buffers.remove(&handle.id());
        }
        self.record(DeviceEvent::Free);
        Ok(())
    }

    fn set_parameter(&self, parameter: GrabberParameter, value: u32) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            match parameter {
                GrabberParameter::Width => state.width = value,
                GrabberParameter::Height => state.height = value,
                GrabberParameter::FramesPerSec => state.frames_per_sec = value,
            }
        }
        tracing::trace!(parameter = %parameter, value, "Grabber parameter set");
        self.record(DeviceEvent::GrabberParameter { parameter, value });
        Ok(())
    }
}
