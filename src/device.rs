//! Output device: one printer, one job at a time.
//!
//! [`OutputDevice::request_write`] reserves the [`JobMachine`], serializes and embeds
//! thumbnails on the caller's thread without holding the lock, then spawns a tokio task
//! that executes the [`Effect`]s the machine produces.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{PrinterSettings, TimingConfig};
use crate::print_job::{DeviceEvent, DeviceType, Effect, Input, JobMachine, JobOutcome, JobState, WriteError};
use crate::source::{GcodeSource, Renderer};
use crate::thumbnail::{ThumbnailSettings, prepare_gcode};
use crate::transport::{ApiDialect, HttpClient, ProgressFn, ReqwestClient, TransportError};

type SharedMachine = Arc<Mutex<JobMachine>>;

fn lock(machine: &SharedMachine) -> MutexGuard<'_, JobMachine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct OutputDevice {
    machine: SharedMachine,
    client: Arc<dyn HttpClient>,
    thumbnails: ThumbnailSettings,
    renderer: Option<Arc<dyn Renderer>>,
}

impl OutputDevice {
    /// Device talking to the printer over the real HTTP client.
    pub fn new(
        settings: &PrinterSettings,
        timing: TimingConfig,
        device_type: DeviceType,
        events: UnboundedSender<DeviceEvent>,
    ) -> Result<Self, TransportError> {
        let connection = settings.connection();
        let client = ReqwestClient::new(connection.clone(), timing.request_timeout())?;
        let machine = JobMachine::new(device_type, connection, timing, events);
        Ok(Self::with_client(machine, Arc::new(client)))
    }

    pub fn with_client(machine: JobMachine, client: Arc<dyn HttpClient>) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            client,
            thumbnails: ThumbnailSettings::default(),
            renderer: None,
        }
    }

    pub fn with_thumbnails(mut self, settings: ThumbnailSettings, renderer: Option<Arc<dyn Renderer>>) -> Self {
        self.thumbnails = settings;
        self.renderer = renderer;
        self
    }

    pub fn device_type(&self) -> DeviceType {
        lock(&self.machine).device_type()
    }

    pub fn state(&self) -> JobState {
        lock(&self.machine).state()
    }

    pub fn is_busy(&self) -> bool {
        self.state() != JobState::Ready
    }

    pub fn dialect(&self) -> ApiDialect {
        lock(&self.machine).dialect()
    }

    /// Start a write. Rejections are reported synchronously; everything after the
    /// serialization step is reported through events and the returned task's outcome.
    /// The device lock is only held to reserve and to commit, so a concurrent caller is
    /// rejected with [`WriteError::DeviceBusy`] while this one serializes.
    /// Must be called from within a tokio runtime.
    pub fn request_write(
        &self,
        file_name: &str,
        source: &dyn GcodeSource,
    ) -> Result<JoinHandle<JobOutcome>, WriteError> {
        let job_id = lock(&self.machine).reserve(file_name)?;
        let mut guard = JobGuard::new(&self.machine, job_id, "G-code serialization did not complete");

        tracing::debug!("Loading gcode...");
        let gcode = source
            .serialize()
            .map(|gcode| prepare_gcode(gcode, self.renderer.as_deref(), &self.thumbnails));
        let first = lock(&self.machine).commit(job_id, gcode);
        guard.disarm();

        let first = first?;
        let machine = Arc::clone(&self.machine);
        let client = Arc::clone(&self.client);
        Ok(tokio::spawn(drive(machine, client, job_id, first)))
    }
}

impl std::fmt::Debug for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDevice")
            .field("state", &self.state())
            .field("thumbnails", &self.thumbnails)
            .finish()
    }
}

fn progress_callback(machine: &SharedMachine, job_id: Uuid) -> ProgressFn {
    let machine = Arc::clone(machine);
    Arc::new(move |sent, total| lock(&machine).upload_progress(job_id, sent, total))
}

/// Resets the machine if a job is left behind without an outcome: the driver task was
/// aborted or dropped with its runtime, a client panicked, or a serializer unwound.
struct JobGuard {
    machine: SharedMachine,
    job_id: Uuid,
    reason: &'static str,
    armed: bool,
}

impl JobGuard {
    fn new(machine: &SharedMachine, job_id: Uuid, reason: &'static str) -> Self {
        Self { machine: Arc::clone(machine), job_id, reason, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.machine).abort(self.job_id, self.reason);
        }
    }
}

async fn drive(machine: SharedMachine, client: Arc<dyn HttpClient>, job_id: Uuid, mut effect: Effect) -> JobOutcome {
    let mut guard = JobGuard::new(&machine, job_id, "Job was interrupted before it finished");
    loop {
        let input = match effect {
            Effect::Request { job_id, request, tracks_progress } => {
                let progress = tracks_progress.then(|| progress_callback(&machine, job_id));
                let result = client.execute(request, progress).await;
                Input::Reply { job_id, result }
            }
            Effect::Sleep { job_id, delay } => {
                tokio::time::sleep(delay).await;
                Input::TimerFired { job_id }
            }
            Effect::Finished(outcome) => {
                guard.disarm();
                return outcome;
            }
            Effect::Ignored => {
                tracing::debug!("Job driver stopping, no effect to execute");
                return JobOutcome::Abandoned;
            }
        };
        effect = lock(&machine).handle(input);
    }
}
