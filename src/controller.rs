//! Camera controller.
//!
//! The controller owns the settings registry, the camera link, the frame
//! grabber and the acquisition session, and exposes the high-level intents:
//! set a parameter, load or save settings, record for N seconds.
//!
//! Every intent runs to completion before the next one starts (`&mut self`),
//! so the camera never sees interleaved commands. A parameter reaches the
//! registry only after the camera acknowledged it; dependent parameters that
//! had to be clamped are pushed and committed one by one, so the registry
//! always mirrors what the device was told.

use crate::acquisition::{AcquisitionSession, AcquisitionState};
use crate::channel::shell::spawn_shell;
use crate::channel::{CameraLink, Command, Opcode};
use crate::config::{ControllerConfig, Transport};
use crate::error::{AppResult, CameraError, ChannelError};
use crate::events::{self, ControllerEvent, EventReceiver, EventSender};
use crate::frame::Frame;
use crate::grabber::{FrameGrabber, GrabberParameter};
use crate::mock::{SimulatedCamera, SimulatedGrabber};
use crate::drain::{DrainReport, FrameRange};
use crate::recording::{
    configured_sink, DrainJob, RecordingGuard, RecordingJob, RecordingPlan, RecordingSlot,
    RecordingTask, SinkFactory,
};
use crate::scheduler::{self, ScheduledTask};
use crate::settings::registry::{assign, clamp_dependents, value_of};
use crate::settings::{
    self, Adjustment, CameraSettings, FrameWindow, Gain, Parameter, SensorGeometry,
    SetOutcome, SettingsRegistry, SettingsSource,
};
use crate::settings::legacy::LegacyExtras;
use crate::sink::VideoSink;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Owns the camera link, the grabber session and the committed settings.
///
/// Every camera and grabber operation goes through here so that the device,
/// the grabber and the registry never disagree about the frame window.
pub struct Controller {
    config: ControllerConfig,
    registry: SettingsRegistry,
    link: Box<dyn CameraLink>,
    grabber: Arc<dyn FrameGrabber>,
    session: Arc<Mutex<AcquisitionSession>>,
    events: EventSender,
    source: SettingsSource,
    live_view: Option<ScheduledTask>,
    recording: RecordingSlot,
    /// Frames captured after a trigger before live capture stops
    frames_after_trigger: u64,
}

impl Controller {
    /// Assemble a controller from already opened devices. Performs no I/O.
    pub fn new(
        config: ControllerConfig,
        link: Box<dyn CameraLink>,
        grabber: Arc<dyn FrameGrabber>,
    ) -> Self {
        let (events, _) = events::channel();
        let registry = SettingsRegistry::new(sensor_geometry(&config), config.sensor.width_policy);
        let mut session =
            AcquisitionSession::new(Arc::clone(&grabber), config.grabber.max_buffer_bytes)
                .with_events(events.clone());
        session.set_live_frames(config.grabber.live_buffer_frames);
        let frames_after_trigger = config.recording.frames_after_trigger;
        Self {
            config,
            registry,
            link,
            grabber,
            session: Arc::new(Mutex::new(session)),
            events,
            source: SettingsSource::Json,
            live_view: None,
            recording: RecordingSlot::default(),
            frames_after_trigger,
        }
    }

    /// Open the configured camera transport and frame grabber.
    pub async fn open(config: ControllerConfig) -> AppResult<Self> {
        let link: Box<dyn CameraLink> = match config.channel.transport {
            Transport::Shell => Box::new(spawn_shell(&config.channel).await?),
            Transport::Serial => open_serial_link(&config).await?,
            Transport::Simulated => {
                tracing::info!("Using the simulated camera");
                let camera = SimulatedCamera::new(sensor_geometry(&config));
                Box::new(camera.connect().with_timeout(config.channel.timeout()))
            }
        };

        tracing::warn!(
            board = config.grabber.board,
            port = config.grabber.port,
            mode = ?config.grabber.simulation,
            "No frame grabber SDK backend is built in, using the simulated grabber"
        );
        let grabber: Arc<dyn FrameGrabber> =
            Arc::new(SimulatedGrabber::new(config.grabber.simulation));
        Ok(Self::new(config, link, grabber))
    }

    /// Configuration the controller was built from.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Last committed camera settings.
    pub fn settings(&self) -> &CameraSettings {
        self.registry.settings()
    }

    /// Rules and committed values.
    pub fn registry(&self) -> &SettingsRegistry {
        &self.registry
    }

    /// Shared handle to the acquisition session.
    pub fn session(&self) -> Arc<Mutex<AcquisitionSession>> {
        Arc::clone(&self.session)
    }

    /// New receiver for controller events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Push the startup configuration and begin live capture.
    ///
    /// Uses `settings_file` from the configuration when set, the registry
    /// defaults otherwise.
    pub async fn connect(&mut self) -> AppResult<Vec<Adjustment>> {
        let adjustments = match self.config.settings_file.clone() {
            Some(path) => self.load_settings(&path).await?,
            None => {
                let defaults = self.registry.settings().clone();
                self.apply_all(defaults).await?
            }
        };
        self.start_live().await?;
        Ok(adjustments)
    }

    /// Start continuous capture for the current window.
    pub async fn start_live(&mut self) -> AppResult<()> {
        let window = self.registry.settings().window();
        self.session.lock().await.start(None, window)
    }

    /// Publish live frames on the event channel.
    pub fn start_live_view(&mut self) {
        if self.live_view.is_none() {
            self.live_view = Some(scheduler::live_view(
                Arc::clone(&self.session),
                self.events.clone(),
                self.config.recording.live_view_interval(),
            ));
        }
    }

    /// Stop publishing live frames. No-op when live view is off.
    pub async fn stop_live_view(&mut self) {
        if let Some(task) = self.live_view.take() {
            task.cancel().await;
        }
    }

    /// Latest captured frame.
    pub async fn current_frame(&self) -> AppResult<Option<Frame>> {
        self.session.lock().await.current_frame()
    }

    /// Set a parameter by its settings-file name.
    pub async fn set_parameter(&mut self, name: &str, value: f64) -> AppResult<SetOutcome> {
        let parameter: Parameter = name.parse()?;
        self.set(parameter, value).await
    }

    /// Validate, transmit and commit one parameter, then fit its dependents.
    pub async fn set(&mut self, parameter: Parameter, value: f64) -> AppResult<SetOutcome> {
        let result = match self.registry.validate(parameter, value) {
            Err(e) => Err(e),
            Ok(()) => match parameter {
                Parameter::Width | Parameter::Height => self.resize(parameter, value).await,
                Parameter::XOffset | Parameter::YOffset => self.move_window(parameter, value).await,
                Parameter::FrameRate => self.change_framerate(value).await,
                Parameter::Exposure => self.change_exposure(value).await,
                _ => self.change_plain(parameter, value).await,
            },
        };

        match &result {
            Ok(outcome) => {
                tracing::info!(parameter = %parameter, value = outcome.applied, "Parameter set");
                if outcome.was_clamped() {
                    self.notify_adjusted(&Adjustment {
                        parameter,
                        requested: outcome.requested,
                        applied: outcome.applied,
                    });
                }
                for adjustment in &outcome.adjustments {
                    self.notify_adjusted(adjustment);
                }
            }
            Err(e) => self.notify_failed(e),
        }
        result
    }

    /// Set the analog gain step.
    pub async fn set_gain(&mut self, gain: Gain) -> AppResult<SetOutcome> {
        self.set(Parameter::Gain, gain.as_f64()).await
    }

    /// Turn fixed pattern noise correction on or off.
    pub async fn set_fpn_correction(&mut self, enabled: bool) -> AppResult<SetOutcome> {
        self.set(Parameter::FpnCorrection, flag(enabled)).await
    }

    /// Set the sensor black level.
    pub async fn set_blacklevel(&mut self, level: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::BlackLevel, f64::from(level)).await
    }

    /// Change the window width; live capture restarts with a new ring.
    pub async fn set_width(&mut self, width: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::Width, f64::from(width)).await
    }

    /// Change the window height; live capture restarts with a new ring.
    pub async fn set_height(&mut self, height: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::Height, f64::from(height)).await
    }

    /// Move the window horizontally.
    pub async fn set_x(&mut self, x: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::XOffset, f64::from(x)).await
    }

    /// Move the window vertically.
    pub async fn set_y(&mut self, y: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::YOffset, f64::from(y)).await
    }

    /// Change the frame rate; exposure is clamped to the new maximum.
    pub async fn set_framerate(&mut self, framerate: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::FrameRate, f64::from(framerate)).await
    }

    /// Exposure in microseconds; clamped to the camera's current maximum.
    pub async fn set_exposure(&mut self, exposure: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::Exposure, f64::from(exposure)).await
    }

    /// Turn dual-slope mode on or off.
    pub async fn set_dualslope(&mut self, enabled: bool) -> AppResult<SetOutcome> {
        self.set(Parameter::DualSlope, flag(enabled)).await
    }

    /// Set the dual-slope time.
    pub async fn set_dualslope_time(&mut self, time: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::DualSlopeTime, f64::from(time)).await
    }

    /// Turn triple-slope mode on or off.
    pub async fn set_tripleslope(&mut self, enabled: bool) -> AppResult<SetOutcome> {
        self.set(Parameter::TripleSlope, flag(enabled)).await
    }

    /// Set the triple-slope time.
    pub async fn set_tripleslope_time(&mut self, time: u32) -> AppResult<SetOutcome> {
        self.set(Parameter::TripleSlopeTime, f64::from(time)).await
    }

    /// Push a complete configuration to camera and grabber.
    ///
    /// Order: gain, fpn, frame format, framerate, exposure, blacklevel,
    /// dualslope, dualslope time, tripleslope, tripleslope time. Values the
    /// camera cannot honour are clamped and returned.
    pub async fn apply_all(&mut self, settings: CameraSettings) -> AppResult<Vec<Adjustment>> {
        self.registry.validate_settings(&settings)?;
        tracing::info!("Applying full camera configuration");

        let mut staged = settings;
        let mut adjustments = Vec::new();
        for parameter in [Parameter::Gain, Parameter::FpnCorrection] {
            self.push(parameter, &staged).await?;
        }

        let window = staged.window();
        self.apply_window(Parameter::Width, window, window.width.to_string())
            .await?;
        let mut committed = self.registry.settings().clone();
        committed.set_window(window);
        self.registry.commit(committed);

        let max_rate = self.device_limit(Opcode::MaxFrameRate).await?;
        clamp_to(&mut staged, Parameter::FrameRate, max_rate, &mut adjustments);
        self.push(Parameter::FrameRate, &staged).await?;

        let max_exposure = self.device_limit(Opcode::MaxExposure).await?;
        clamp_to(&mut staged, Parameter::Exposure, max_exposure, &mut adjustments);
        self.push(Parameter::Exposure, &staged).await?;

        adjustments.extend(clamp_dependents(&mut staged));
        for parameter in [
            Parameter::BlackLevel,
            Parameter::DualSlope,
            Parameter::DualSlopeTime,
            Parameter::TripleSlope,
            Parameter::TripleSlopeTime,
        ] {
            self.push(parameter, &staged).await?;
        }

        for adjustment in &adjustments {
            self.notify_adjusted(adjustment);
        }
        Ok(adjustments)
    }

    /// Load a settings file of either generation and apply it.
    pub async fn load_settings(&mut self, path: &Path) -> AppResult<Vec<Adjustment>> {
        let loaded = settings::load_settings(path)?;
        tracing::info!(path = %path.display(), "Loading camera settings");
        if let SettingsSource::Legacy { extras, .. } = &loaded.source {
            self.registry.validate_settings(&loaded.settings)?;
            self.apply_legacy_extras(extras).await;
        }
        let adjustments = self.apply_all(loaded.settings).await?;
        self.source = loaded.source;
        Ok(adjustments)
    }

    /// Ring size and post-trigger count carried by legacy files. The ring size
    /// takes effect when `apply_all` rebuilds the buffer.
    async fn apply_legacy_extras(&mut self, extras: &LegacyExtras) {
        if let Some(frames) = extras.buffer_frames.filter(|&n| n > 0) {
            self.session.lock().await.set_live_frames(Some(u64::from(frames)));
        }
        if let Some(frames) = extras.frames_after_trigger {
            self.frames_after_trigger = u64::from(frames);
        }
        tracing::debug!(?extras, "Applied legacy capture settings");
    }

    /// Save the committed settings in the generation they were loaded from.
    pub fn save_settings(&self, path: &Path) -> AppResult<()> {
        settings::save_settings(path, self.registry.settings(), &self.source)?;
        tracing::info!(path = %path.display(), "Saved camera settings");
        Ok(())
    }

    /// Record `seconds` of video into the configured sink.
    pub async fn start_recording(&mut self, seconds: f64) -> AppResult<RecordingTask> {
        let open_sink = configured_sink(&self.config.recording);
        self.spawn_recording(seconds, open_sink).await
    }

    /// Record `seconds` of video into `sink`.
    pub async fn start_recording_into(
        &mut self,
        seconds: f64,
        sink: Box<dyn VideoSink>,
    ) -> AppResult<RecordingTask> {
        self.spawn_recording(seconds, Box::new(move |_: &FrameWindow| Ok(sink)))
            .await
    }

    /// Record and wait until the artifact is closed.
    pub async fn record(&mut self, seconds: f64) -> AppResult<DrainReport> {
        self.start_recording(seconds).await?.wait().await
    }

    async fn spawn_recording(
        &mut self,
        seconds: f64,
        open_sink: SinkFactory,
    ) -> AppResult<RecordingTask> {
        let settings = self.registry.settings();
        let plan = RecordingPlan::new(seconds, settings.framerate, settings.window())?;
        let guard = self.recording.reserve()?;
        {
            let session = self.session.lock().await;
            if session.is_acquiring() && session.target().is_some() {
                return Err(CameraError::Busy(
                    "a counted acquisition is already running".to_string(),
                ));
            }
        }
        tracing::info!(seconds, frames = plan.frames, "Starting recording");
        let job = RecordingJob {
            plan,
            drain: self.drain_job(plan.window, FrameRange::default(), open_sink, guard),
        };
        Ok(job.spawn())
    }

    /// Stop live capture `frames_after` frames from now, keeping the ring
    /// contents for [`Controller::save_capture`].
    ///
    /// Without an explicit count the configured (or legacy file's)
    /// post-trigger frame count is used. Returns the logical indices held.
    pub async fn trigger(&mut self, frames_after: Option<u64>) -> AppResult<Range<u64>> {
        if self.recording.is_taken() {
            return Err(CameraError::Busy("a recording is already in progress".to_string()));
        }
        {
            let session = self.session.lock().await;
            if !session.is_acquiring() || session.target().is_some() {
                return Err(CameraError::InvalidState(
                    "a trigger needs running live capture".to_string(),
                ));
            }
        }

        let frames_after = frames_after.unwrap_or(self.frames_after_trigger);
        let framerate = self.registry.settings().framerate.max(1);
        if frames_after > 0 {
            let wait = Duration::from_secs_f64(frames_after as f64 / f64::from(framerate));
            tracing::info!(frames_after, wait_ms = wait.as_millis() as u64, "Trigger received");
            tokio::time::sleep(wait).await;
        }
        self.stop_live_view().await;

        let mut session = self.session.lock().await;
        session.stop()?;
        let held = session.captured_range(self.config.recording.drain_bound)?;
        tracing::info!(first = held.start, end = held.end, "Capture stopped by trigger");
        Ok(held)
    }

    /// Write `range` of a stopped capture into the configured sink.
    pub async fn save_capture(&mut self, range: FrameRange) -> AppResult<DrainReport> {
        let open_sink = configured_sink(&self.config.recording);
        self.drain_stopped(range, open_sink).await
    }

    /// Write `range` of a stopped capture into `sink`.
    pub async fn save_capture_into(
        &mut self,
        range: FrameRange,
        sink: Box<dyn VideoSink>,
    ) -> AppResult<DrainReport> {
        self.drain_stopped(range, Box::new(move |_: &FrameWindow| Ok(sink)))
            .await
    }

    async fn drain_stopped(&mut self, range: FrameRange, open_sink: SinkFactory) -> AppResult<DrainReport> {
        let guard = self.recording.reserve()?;
        let window = {
            let session = self.session.lock().await;
            match (session.state(), session.window()) {
                (AcquisitionState::Stopped, Some(window)) => window,
                (state, _) => {
                    return Err(CameraError::InvalidState(format!(
                        "no stopped capture to save (session is {state})"
                    )))
                }
            }
        };
        self.drain_job(window, range, open_sink, guard).run().await
    }

    fn drain_job(
        &self,
        window: FrameWindow,
        range: FrameRange,
        open_sink: SinkFactory,
        guard: RecordingGuard,
    ) -> DrainJob {
        DrainJob {
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            config: self.config.recording.clone(),
            window,
            range,
            open_sink,
            guard,
        }
    }

    /// Stop scheduled tasks, release the ring buffer and close the link.
    pub async fn shutdown(mut self) -> AppResult<()> {
        self.stop_live_view().await;
        let released = self.session.lock().await.shutdown();
        if let Err(e) = &released {
            tracing::error!(error = %e, "Failed to release acquisition resources");
        }
        self.link.disconnect(&self.config.channel.quit_command).await;
        tracing::info!("Controller shut down");
        released
    }

    async fn change_plain(&mut self, parameter: Parameter, value: f64) -> AppResult<SetOutcome> {
        let mut staged = self.registry.settings().clone();
        let applied = match parameter.bounded_by() {
            Some(bound) if !parameter.is_geometry() => value.min(value_of(&staged, bound)),
            _ => value,
        };
        assign(&mut staged, parameter, applied);
        self.push(parameter, &staged).await?;

        let mut adjustments = Vec::new();
        self.fit_dependents(&mut staged, &mut adjustments).await?;
        Ok(SetOutcome {
            parameter,
            requested: value,
            applied,
            adjustments,
        })
    }

    async fn change_framerate(&mut self, value: f64) -> AppResult<SetOutcome> {
        let max = self.device_limit(Opcode::MaxFrameRate).await?;
        let applied = value.min(f64::from(max));
        let mut staged = self.registry.settings().clone();
        assign(&mut staged, Parameter::FrameRate, applied);
        self.push(Parameter::FrameRate, &staged).await?;

        let mut adjustments = Vec::new();
        self.fit_exposure(&mut staged, &mut adjustments).await?;
        Ok(SetOutcome {
            parameter: Parameter::FrameRate,
            requested: value,
            applied,
            adjustments,
        })
    }

    async fn change_exposure(&mut self, value: f64) -> AppResult<SetOutcome> {
        let max = self.device_limit(Opcode::MaxExposure).await?;
        let applied = value.min(f64::from(max));
        let mut staged = self.registry.settings().clone();
        assign(&mut staged, Parameter::Exposure, applied);
        self.push(Parameter::Exposure, &staged).await?;

        let mut adjustments = Vec::new();
        self.fit_dependents(&mut staged, &mut adjustments).await?;
        Ok(SetOutcome {
            parameter: Parameter::Exposure,
            requested: value,
            applied,
            adjustments,
        })
    }

    /// Change width or height: the ring buffer is rebuilt for the new frame size.
    async fn resize(&mut self, parameter: Parameter, value: f64) -> AppResult<SetOutcome> {
        let current = self.registry.settings().clone();
        let size = value as u32;
        let (width, height) = match parameter {
            Parameter::Width => (size, current.height),
            _ => (current.width, size),
        };
        let (window, mut adjustments) = self.registry.plan_window(width, height);
        self.apply_window(parameter, window, size.to_string()).await?;

        let mut next = current;
        next.set_window(window);
        self.registry.commit(next);

        self.refit_timing(&mut adjustments).await?;
        Ok(SetOutcome {
            parameter,
            requested: value,
            applied: value,
            adjustments,
        })
    }

    /// Move the window on the sensor; the frame size and buffer are unchanged.
    async fn move_window(&mut self, parameter: Parameter, value: f64) -> AppResult<SetOutcome> {
        let mut next = self.registry.settings().clone();
        assign(&mut next, parameter, value);
        let window = next.window();
        let command = Command::frame_format(window.x, window.y, window.width, window.height);
        self.send(command, parameter, format_value(value)).await?;
        self.registry.commit(next);
        Ok(SetOutcome {
            parameter,
            requested: value,
            applied: value,
            adjustments: Vec::new(),
        })
    }

    /// Send a new frame format and rebuild the ring buffer around it.
    ///
    /// Stop, free, reconfigure camera and grabber, reallocate, and restart
    /// only when capture was running. On failure the previous geometry is
    /// restored.
    async fn apply_window(
        &mut self,
        parameter: Parameter,
        window: FrameWindow,
        attempted: String,
    ) -> AppResult<()> {
        if self.recording.is_taken() {
            return Err(CameraError::Busy(
                "cannot change the frame size during a recording".to_string(),
            ));
        }
        let previous = self.registry.settings().window();
        let shared = Arc::clone(&self.session);
        let mut session = shared.lock().await;
        if session.is_acquiring() && session.target().is_some() {
            return Err(CameraError::Busy(
                "cannot change the frame size during a counted acquisition".to_string(),
            ));
        }
        let resume = session.is_acquiring();
        session.stop()?;
        session.clear_buffer()?;

        let command = Command::frame_format(window.x, window.y, window.width, window.height);
        if let Err(e) = self.send(command, parameter, attempted).await {
            if resume {
                if let Err(restart_err) = session.start(None, previous) {
                    tracing::error!(error = %restart_err, "Failed to restart capture");
                }
            }
            return Err(e);
        }

        let reallocated = match self.project_window(&window) {
            Ok(()) if resume => session.start(None, window),
            other => other,
        };
        if let Err(e) = reallocated {
            tracing::error!(error = %e, "Frame size change failed, restoring previous window");
            self.restore_window(&mut session, previous, resume).await;
            return Err(e);
        }
        tracing::debug!(
            x = window.x,
            y = window.y,
            width = window.width,
            height = window.height,
            resumed = resume,
            "Frame format applied"
        );
        Ok(())
    }

    async fn restore_window(
        &mut self,
        session: &mut AcquisitionSession,
        previous: FrameWindow,
        resume: bool,
    ) {
        let command =
            Command::frame_format(previous.x, previous.y, previous.width, previous.height);
        if let Err(e) = self.link.send(&command, false).await {
            tracing::error!(error = %e, "Failed to restore camera frame format");
        }
        if let Err(e) = self.project_window(&previous) {
            tracing::error!(error = %e, "Failed to restore grabber geometry");
        }
        if resume {
            if let Err(e) = session.start(None, previous) {
                tracing::error!(error = %e, "Failed to restart capture");
            }
        }
    }

    fn project_window(&self, window: &FrameWindow) -> AppResult<()> {
        self.grabber
            .set_parameter(GrabberParameter::Width, window.width)?;
        self.grabber
            .set_parameter(GrabberParameter::Height, window.height)
    }

    /// After a geometry change the camera may no longer reach the committed
    /// frame rate and exposure.
    async fn refit_timing(&mut self, adjustments: &mut Vec<Adjustment>) -> AppResult<()> {
        let mut staged = self.registry.settings().clone();
        let max_rate = self.device_limit(Opcode::MaxFrameRate).await?;
        if clamp_to(&mut staged, Parameter::FrameRate, max_rate, adjustments) {
            self.push(Parameter::FrameRate, &staged).await?;
        }
        self.fit_exposure(&mut staged, adjustments).await
    }

    async fn fit_exposure(
        &mut self,
        staged: &mut CameraSettings,
        adjustments: &mut Vec<Adjustment>,
    ) -> AppResult<()> {
        let max = self.device_limit(Opcode::MaxExposure).await?;
        if clamp_to(staged, Parameter::Exposure, max, adjustments) {
            self.push(Parameter::Exposure, staged).await?;
        }
        self.fit_dependents(staged, adjustments).await
    }

    async fn fit_dependents(
        &mut self,
        staged: &mut CameraSettings,
        adjustments: &mut Vec<Adjustment>,
    ) -> AppResult<()> {
        let clamped = clamp_dependents(staged);
        for adjustment in &clamped {
            self.push(adjustment.parameter, staged).await?;
        }
        adjustments.extend(clamped);
        Ok(())
    }

    /// Transmit one non-geometry parameter from `staged` and commit it.
    async fn push(&mut self, parameter: Parameter, staged: &CameraSettings) -> AppResult<()> {
        let spec = parameter.spec();
        let argument = wire_value(staged, parameter);
        self.send(Command::set(spec.opcode, &argument), parameter, argument.clone())
            .await?;

        let value = value_of(staged, parameter);
        if let Some(grabber_parameter) = spec.grabber.filter(|_| !parameter.is_geometry()) {
            self.grabber.set_parameter(grabber_parameter, value as u32)?;
        }

        let mut committed = self.registry.settings().clone();
        assign(&mut committed, parameter, value);
        self.registry.commit(committed);
        Ok(())
    }

    async fn send(
        &mut self,
        command: Command,
        parameter: Parameter,
        attempted: String,
    ) -> AppResult<()> {
        match self.link.send(&command, false).await {
            Ok(_) => Ok(()),
            Err(ChannelError::Rejected { command }) => {
                tracing::warn!(%command, parameter = %parameter, "Camera rejected setting");
                Err(CameraError::SettingRejected {
                    parameter: parameter.name().to_string(),
                    attempted,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn device_limit(&mut self, opcode: Opcode) -> AppResult<u32> {
        let limit = self.link.query_limit(opcode).await?;
        tracing::trace!(%opcode, limit, "Device limit");
        Ok(limit)
    }

    fn notify_adjusted(&self, adjustment: &Adjustment) {
        tracing::warn!(
            parameter = %adjustment.parameter,
            requested = adjustment.requested,
            applied = adjustment.applied,
            "Value out of device range, clamped"
        );
        let _ = self
            .events
            .send(ControllerEvent::SettingAdjusted(adjustment.clone()));
    }

    fn notify_failed(&self, error: &CameraError) {
        let (name, attempted, reason) = match error {
            CameraError::Validation {
                parameter,
                attempted,
                reason,
            } => (parameter, attempted, reason.clone()),
            CameraError::SettingRejected {
                parameter,
                attempted,
            } => (parameter, attempted, "rejected by camera".to_string()),
            other => {
                tracing::error!(error = %other, "Setting failed");
                return;
            }
        };
        tracing::warn!(parameter = %name, %attempted, %reason, "Setting not applied");
        let _ = self.events.send(ControllerEvent::SettingRejected {
            name: name.clone(),
            attempted: attempted.clone(),
            reason,
        });
    }
}

fn sensor_geometry(config: &ControllerConfig) -> SensorGeometry {
    SensorGeometry {
        width: config.sensor.width,
        height: config.sensor.height,
    }
}

#[cfg(feature = "serial")]
async fn open_serial_link(config: &ControllerConfig) -> AppResult<Box<dyn CameraLink>> {
    Ok(Box::new(
        crate::channel::serial::open_serial(&config.channel).await?,
    ))
}

#[cfg(not(feature = "serial"))]
async fn open_serial_link(_config: &ControllerConfig) -> AppResult<Box<dyn CameraLink>> {
    Err(CameraError::Configuration(
        "serial transport requires the `serial` feature".to_string(),
    ))
}

fn flag(enabled: bool) -> f64 {
    if enabled {
        1.0
    } else {
        0.0
    }
}

/// Lower `parameter` in `staged` to `max`; true when it changed.
fn clamp_to(
    staged: &mut CameraSettings,
    parameter: Parameter,
    max: u32,
    adjustments: &mut Vec<Adjustment>,
) -> bool {
    let current = value_of(staged, parameter);
    let max = f64::from(max);
    if current <= max {
        return false;
    }
    assign(staged, parameter, max);
    adjustments.push(Adjustment {
        parameter,
        requested: current,
        applied: max,
    });
    true
}

/// Argument text for a set-command.
fn wire_value(settings: &CameraSettings, parameter: Parameter) -> String {
    match parameter {
        Parameter::Gain => settings.gain.to_string(),
        _ => format_value(value_of(settings, parameter)),
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
