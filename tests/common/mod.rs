// Shared helpers for the device integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use duet_rrf::config::{ConnectionConfig, TimingConfig};
use duet_rrf::print_job::{DeviceEvent, DeviceType, JobMachine};
use duet_rrf::source::{GcodeSource, SourceError};
use duet_rrf::transport::{HttpClient, HttpReply, HttpRequest, ProgressFn, TransportError};
use duet_rrf::OutputDevice;

/// Replays canned replies in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    progress_ticks: Vec<(u64, u64)>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Self {
        Self { replies: Mutex::new(replies.into()), ..Default::default() }
    }

    pub fn with_progress_ticks(mut self, ticks: Vec<(u64, u64)>) -> Self {
        self.progress_ticks = ticks;
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn execute(&self, request: HttpRequest, progress: Option<ProgressFn>) -> Result<HttpReply, TransportError> {
        self.requests.lock().unwrap().push(request);
        if let Some(progress) = progress {
            for &(sent, total) in &self.progress_ticks {
                progress(sent, total);
            }
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(HttpReply::ok("")))
    }
}

/// Never answers, so the job stays in its first step.
pub struct StallingClient;

#[async_trait]
impl HttpClient for StallingClient {
    async fn execute(&self, _request: HttpRequest, _progress: Option<ProgressFn>) -> Result<HttpReply, TransportError> {
        std::future::pending().await
    }
}

/// Blows up inside the driver task.
pub struct PanickingClient;

#[async_trait]
impl HttpClient for PanickingClient {
    async fn execute(&self, request: HttpRequest, _progress: Option<ProgressFn>) -> Result<HttpReply, TransportError> {
        panic!("client failure on {}", request.path)
    }
}

/// Takes its time producing G-code.
pub struct SlowSource(pub Duration);

impl GcodeSource for SlowSource {
    fn serialize(&self) -> Result<String, SourceError> {
        std::thread::sleep(self.0);
        Ok("G1 X10\n".to_string())
    }
}

pub fn ok(body: &str) -> Result<HttpReply, TransportError> {
    Ok(HttpReply::ok(body))
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig { poll_initial_delay_ms: 1, poll_interval_ms: 1, ..TimingConfig::default() }
}

pub fn device(
    device_type: DeviceType,
    client: Arc<dyn HttpClient>,
) -> (OutputDevice, UnboundedReceiver<DeviceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = ConnectionConfig::new("http://duet.local", "reprap", "", "");
    let machine = JobMachine::new(device_type, connection, fast_timing(), tx);
    (OutputDevice::with_client(machine, client), rx)
}

pub fn drain(rx: &mut UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn progress_values(events: &[DeviceEvent]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}
