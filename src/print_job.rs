//! # Upload / print / simulate job state machine
//!
//! ```text
//! Ready --reserve--> Writing(Serializing) --commit--> Writing(Connecting) -> Uploading -> ...
//!       ... -> Succeeded | Failed | aborted -> Ready
//! ```
//!
//! The machine is sans-IO: [`JobMachine::commit`] and [`JobMachine::handle`] return an
//! [`Effect`] (send a request, sleep, or finished) and the caller feeds the outcome back as
//! an [`Input`]. Every input carries the job id, and input that does not match the current
//! job and step is ignored, so late replies after a reset are harmless.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::config::{ConnectionConfig, TimingConfig};
use crate::file_manager::{FileNameError, gcodes_path, validate_file_name};
use crate::source::SourceError;
use crate::transport::{ApiDialect, DuetApi, HttpReply, HttpRequest, TransportError, api_for};

/// What happens after the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Print,
    Simulate,
    Upload,
}

/// Notifications for the user interface collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    WriteStarted { file_name: String },
    Status { text: String },
    /// Percent complete, 0..=100.
    Progress { percent: f32 },
    ProgressHidden,
    ErrorMessage { text: String },
    WriteSuccess { file_name: String, reply: Option<String> },
    WriteError { file_name: String },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Device is busy with another job")]
    DeviceBusy,
    #[error("Invalid file name: {0}")]
    InvalidFileName(#[from] FileNameError),
    #[error("{0}")]
    Serialization(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStep {
    Serializing,
    Connecting,
    Uploading,
    StartingPrint,
    StartingSimulation,
    WaitingForStatus,
    PollingStatus,
    StoppingSimulation,
    FetchingReply,
    Disconnecting,
}

/// Externally visible state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Writing(JobStep),
}

#[derive(Debug)]
pub struct UploadJob {
    pub id: Uuid,
    pub file_name: String,
    pub device_type: DeviceType,
    /// Released once the upload request has been built.
    gcode: Option<Vec<u8>>,
}

#[derive(Debug)]
struct ActiveJob {
    job: UploadJob,
    step: JobStep,
    reply: Option<String>,
    last_progress: Option<f32>,
}

#[derive(Debug)]
pub enum Input {
    Reply { job_id: Uuid, result: Result<HttpReply, TransportError> },
    TimerFired { job_id: Uuid },
}

impl Input {
    pub fn job_id(&self) -> Uuid {
        match self {
            Input::Reply { job_id, .. } | Input::TimerFired { job_id } => *job_id,
        }
    }
}

#[derive(Debug)]
pub enum Effect {
    Request { job_id: Uuid, request: HttpRequest, tracks_progress: bool },
    Sleep { job_id: Uuid, delay: Duration },
    Finished(JobOutcome),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { file_name: String, reply: Option<String> },
    Failed { file_name: String, error: String },
    /// The driver stopped because its job was no longer the active one.
    Abandoned,
}

#[derive(Debug)]
pub struct JobMachine {
    device_type: DeviceType,
    connection: ConnectionConfig,
    timing: TimingConfig,
    api: Box<dyn DuetApi>,
    active: Option<ActiveJob>,
    events: UnboundedSender<DeviceEvent>,
}

impl JobMachine {
    pub fn new(
        device_type: DeviceType,
        connection: ConnectionConfig,
        timing: TimingConfig,
        events: UnboundedSender<DeviceEvent>,
    ) -> Self {
        Self {
            device_type,
            connection,
            timing,
            api: api_for(ApiDialect::RrfHttp),
            active: None,
            events,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn state(&self) -> JobState {
        match &self.active {
            Some(active) => JobState::Writing(active.step),
            None => JobState::Ready,
        }
    }

    pub fn dialect(&self) -> ApiDialect {
        self.api.dialect()
    }

    pub fn current_job_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.job.id)
    }

    fn emit(&self, event: DeviceEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Claim the device for a new write. Busy and invalid names are rejected here; on
    /// success the job sits in `Serializing` until [`JobMachine::commit`] hands over the
    /// G-code, so the device reports busy for the whole serialization.
    pub fn reserve(&mut self, requested_name: &str) -> Result<Uuid, WriteError> {
        if self.active.is_some() {
            tracing::warn!("Rejecting write of '{}': device busy", requested_name);
            return Err(WriteError::DeviceBusy);
        }
        let file_name = validate_file_name(requested_name)?;
        tracing::debug!("Filename set to: {}", file_name);

        let id = Uuid::new_v4();
        self.active = Some(ActiveJob {
            job: UploadJob { id, file_name: file_name.clone(), device_type: self.device_type, gcode: None },
            step: JobStep::Serializing,
            reply: None,
            last_progress: None,
        });
        self.emit(DeviceEvent::WriteStarted { file_name });
        Ok(id)
    }

    /// Finish a reservation with the serializer's result. A failed serialization resets
    /// the device before any network activity.
    pub fn commit(&mut self, job_id: Uuid, gcode: Result<String, SourceError>) -> Result<Effect, WriteError> {
        let Some(active) = self.active.as_mut().filter(|a| a.job.id == job_id && a.step == JobStep::Serializing)
        else {
            tracing::debug!("Ignoring commit for job {} that is no longer reserved", job_id);
            return Ok(Effect::Ignored);
        };
        let gcode = match gcode {
            Ok(gcode) => gcode,
            Err(e) => {
                tracing::error!("G-code serialization failed: {}", e);
                self.fail(e.to_string());
                return Err(WriteError::Serialization(e));
            }
        };

        tracing::info!(job = %job_id, "Starting {:?} job for {} ({} bytes)", self.device_type, active.job.file_name, gcode.len());
        active.job.gcode = Some(gcode.into_bytes());
        self.api = api_for(ApiDialect::RrfHttp);

        tracing::debug!("Connecting...");
        let request = self.api.connect(&self.connection);
        Ok(self.request(JobStep::Connecting, request))
    }

    /// Reserve, serialize and commit in one go.
    pub fn start_write<F>(&mut self, requested_name: &str, serialize: F) -> Result<Effect, WriteError>
    where
        F: FnOnce() -> Result<String, SourceError>,
    {
        let job_id = self.reserve(requested_name)?;
        tracing::debug!("Loading gcode...");
        self.commit(job_id, serialize())
    }

    /// Drop `job_id` without a regular outcome, e.g. when its driver went away.
    /// Returns false when that job is not the active one.
    pub fn abort(&mut self, job_id: Uuid, reason: &str) -> bool {
        if self.current_job_id() != Some(job_id) {
            return false;
        }
        tracing::warn!(job = %job_id, "Aborting job: {}", reason);
        self.fail(reason.to_string());
        true
    }

    /// Single dispatch point for replies and timers.
    pub fn handle(&mut self, input: Input) -> Effect {
        let Some(active) = &self.active else {
            tracing::debug!("Ignoring input for job {} while ready", input.job_id());
            return Effect::Ignored;
        };
        if active.job.id != input.job_id() {
            tracing::debug!("Ignoring stale input for job {}", input.job_id());
            return Effect::Ignored;
        }
        let step = active.step;
        if step == JobStep::Serializing {
            tracing::debug!("Ignoring input while the job is still serializing");
            return Effect::Ignored;
        }

        match input {
            Input::TimerFired { .. } if step == JobStep::WaitingForStatus => self.poll_status(),
            Input::TimerFired { .. } => {
                tracing::debug!("Ignoring timer during {:?}", step);
                Effect::Ignored
            }
            Input::Reply { .. } if step == JobStep::WaitingForStatus => {
                tracing::debug!("Ignoring reply while waiting for the next status poll");
                Effect::Ignored
            }
            Input::Reply { result: Err(e), .. } => self.on_error(step, e),
            Input::Reply { result: Ok(reply), .. } => self.on_reply(step, reply),
        }
    }

    /// Byte-level upload progress; decreasing percentages are dropped.
    pub fn upload_progress(&mut self, job_id: Uuid, bytes_sent: u64, bytes_total: u64) {
        if bytes_total == 0 {
            return;
        }
        let Some(active) = self.active.as_mut() else { return };
        if active.job.id != job_id || active.step != JobStep::Uploading {
            return;
        }
        let percent = (bytes_sent.min(bytes_total) * 100 / bytes_total) as f32;
        if active.last_progress.is_some_and(|last| percent < last) {
            return;
        }
        active.last_progress = Some(percent);
        self.emit(DeviceEvent::Progress { percent });
    }

    fn on_error(&mut self, step: JobStep, error: TransportError) -> Effect {
        if step == JobStep::Connecting && error.is_not_found() && self.api.dialect() == ApiDialect::RrfHttp {
            tracing::info!("rr_connect failed with {}, trying the Duet Software Framework API instead", error);
            self.api = api_for(ApiDialect::Dsf);
            let request = self.api.connect(&self.connection);
            return self.request(JobStep::Connecting, request);
        }
        if step == JobStep::Disconnecting {
            tracing::warn!("Disconnect failed, job already complete: {}", error);
            return self.succeed();
        }
        tracing::error!("{:?} failed: {}", step, error);
        self.fail(format!("There was a network error: {}", error))
    }

    fn on_reply(&mut self, step: JobStep, reply: HttpReply) -> Effect {
        let Some(active) = self.active.as_mut() else { return Effect::Ignored };
        let file_name = active.job.file_name.clone();

        match step {
            JobStep::Connecting => {
                tracing::debug!("Uploading...");
                let gcode = active.job.gcode.take().unwrap_or_default();
                self.emit(DeviceEvent::Status { text: format!("Uploading {} ...", file_name) });
                let request = self.api.upload(&file_name, gcode);
                self.request(JobStep::Uploading, request)
            }
            JobStep::Uploading => {
                tracing::info!("Upload done: {}", file_name);
                active.last_progress = None;
                match self.device_type {
                    DeviceType::Upload => self.disconnect(),
                    DeviceType::Print => {
                        tracing::debug!("Ready to print");
                        let gcode = format!("M32 \"{}\"", gcodes_path(&file_name));
                        tracing::debug!("Sending gcode: {}", gcode);
                        let request = self.api.send_gcode(&gcode);
                        self.request(JobStep::StartingPrint, request)
                    }
                    DeviceType::Simulate => {
                        self.emit(DeviceEvent::ProgressHidden);
                        self.emit(DeviceEvent::Status {
                            text: format!(
                                "Simulating print {}...\nPlease close DWC and DO NOT interact with the printer!",
                                file_name
                            ),
                        });
                        let gcode = format!("M37 P\"{}\"", gcodes_path(&file_name));
                        tracing::debug!("Sending gcode: {}", gcode);
                        let request = self.api.send_gcode(&gcode);
                        self.request(JobStep::StartingSimulation, request)
                    }
                }
            }
            JobStep::StartingPrint => {
                tracing::info!("Print started: {}", file_name);
                self.disconnect()
            }
            JobStep::StartingSimulation => {
                tracing::info!("Simulation print started for file {}", file_name);
                self.sleep(self.timing.poll_initial_delay())
            }
            JobStep::PollingStatus => {
                tracing::trace!("Status: {}", reply.body);
                match self.api.parse_status(&reply.body) {
                    Err(e) => {
                        tracing::error!("Undecodable status reply: {}", e);
                        self.fail(format!("Invalid status reply from printer: {}", e))
                    }
                    Ok(status) if status.busy => {
                        if let Some(percent) = status.progress {
                            if active.last_progress.is_none_or(|last| percent >= last) {
                                active.last_progress = Some(percent);
                                self.emit(DeviceEvent::Progress { percent });
                            }
                        }
                        self.sleep(self.timing.poll_interval())
                    }
                    Ok(_) => {
                        tracing::info!("Simulation print finished");
                        tracing::debug!("Sending gcode: M37");
                        let request = self.api.send_gcode("M37");
                        self.request(JobStep::StoppingSimulation, request)
                    }
                }
            }
            JobStep::StoppingSimulation => {
                let body = reply.body.trim().to_string();
                tracing::debug!("M37 gcode reply | {}", body);
                match self.api.last_reply() {
                    Some(request) => self.request(JobStep::FetchingReply, request),
                    None => {
                        active.reply = Some(body);
                        self.disconnect()
                    }
                }
            }
            JobStep::FetchingReply => {
                let body = reply.body.trim().to_string();
                tracing::debug!("Reported | {}", body);
                active.reply = Some(body);
                self.disconnect()
            }
            JobStep::Disconnecting => self.succeed(),
            JobStep::WaitingForStatus | JobStep::Serializing => Effect::Ignored,
        }
    }

    fn set_step(&mut self, step: JobStep) -> Option<Uuid> {
        let active = self.active.as_mut()?;
        active.step = step;
        Some(active.job.id)
    }

    fn request(&mut self, step: JobStep, request: HttpRequest) -> Effect {
        match self.set_step(step) {
            Some(job_id) => Effect::Request { job_id, request, tracks_progress: step == JobStep::Uploading },
            None => Effect::Ignored,
        }
    }

    fn sleep(&mut self, delay: Duration) -> Effect {
        match self.set_step(JobStep::WaitingForStatus) {
            Some(job_id) => Effect::Sleep { job_id, delay },
            None => Effect::Ignored,
        }
    }

    fn poll_status(&mut self) -> Effect {
        tracing::debug!("Checking status...");
        let request = self.api.status();
        self.request(JobStep::PollingStatus, request)
    }

    fn disconnect(&mut self) -> Effect {
        match self.api.disconnect() {
            Some(request) => self.request(JobStep::Disconnecting, request),
            None => self.succeed(),
        }
    }

    fn succeed(&mut self) -> Effect {
        let Some(active) = self.active.take() else { return Effect::Ignored };
        let file_name = active.job.file_name;
        tracing::info!(job = %active.job.id, "{:?} of {} finished", self.device_type, file_name);
        let text = match (self.device_type, &active.reply) {
            (DeviceType::Upload, _) => format!("Uploaded file: {}", file_name),
            (DeviceType::Print, _) => format!("Print started: {}", file_name),
            (DeviceType::Simulate, Some(reply)) => format!("Simulation finished!\n\n{}", reply),
            (DeviceType::Simulate, None) => "Simulation finished!".to_string(),
        };
        self.emit(DeviceEvent::ProgressHidden);
        self.emit(DeviceEvent::Status { text });
        self.emit(DeviceEvent::WriteSuccess { file_name: file_name.clone(), reply: active.reply.clone() });
        Effect::Finished(JobOutcome::Succeeded { file_name, reply: active.reply })
    }

    fn fail(&mut self, error: String) -> Effect {
        let Some(active) = self.active.take() else { return Effect::Ignored };
        let file_name = active.job.file_name;
        tracing::error!(job = %active.job.id, "{:?} of {} failed: {}", self.device_type, file_name, error);
        self.emit(DeviceEvent::ProgressHidden);
        self.emit(DeviceEvent::ErrorMessage { text: error.clone() });
        self.emit(DeviceEvent::WriteError { file_name: file_name.clone() });
        Effect::Finished(JobOutcome::Failed { file_name, error })
    }
}
