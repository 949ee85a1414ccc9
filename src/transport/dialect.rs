//! API dialects.
//!
//! Standalone boards and Duet 3 in standalone mode speak the RepRapFirmware HTTP API
//! (`rr_*` endpoints). A Duet 3 attached to a single board computer runs the Duet
//! Software Framework, which only offers the `machine/*` REST endpoints. Both dialects
//! implement [`DuetApi`] so the job state machine never branches on the dialect itself.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::HttpRequest;
use crate::config::ConnectionConfig;
use crate::file_manager::gcodes_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiDialect {
    /// Legacy RepRapFirmware HTTP API.
    RrfHttp,
    /// Duet Software Framework REST API.
    Dsf,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid status payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// What a status poll tells us about a running simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationStatus {
    pub busy: bool,
    /// Percent complete, 0..=100, when the controller reports it.
    pub progress: Option<f32>,
}

pub trait DuetApi: Send + Sync + std::fmt::Debug {
    fn dialect(&self) -> ApiDialect;
    fn connect(&self, connection: &ConnectionConfig) -> HttpRequest;
    fn upload(&self, file_name: &str, gcode: Vec<u8>) -> HttpRequest;
    fn send_gcode(&self, gcode: &str) -> HttpRequest;
    fn status(&self) -> HttpRequest;
    /// Separate request for the last G-code reply; `None` when the reply comes back
    /// with the `send_gcode` call itself.
    fn last_reply(&self) -> Option<HttpRequest>;
    fn disconnect(&self) -> Option<HttpRequest>;
    fn parse_status(&self, body: &str) -> Result<SimulationStatus, ProtocolError>;
}

pub fn api_for(dialect: ApiDialect) -> Box<dyn DuetApi> {
    match dialect {
        ApiDialect::RrfHttp => Box::new(RrfHttpApi),
        ApiDialect::Dsf => Box::new(DsfApi),
    }
}

/// Local time stamp used to defeat caching on legacy requests.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn clamp_percent(value: f64) -> f32 {
    value.clamp(0.0, 100.0) as f32
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RrfHttpApi;

impl RrfHttpApi {
    fn stamped(request: HttpRequest) -> HttpRequest {
        request.query("time", timestamp())
    }
}

impl DuetApi for RrfHttpApi {
    fn dialect(&self) -> ApiDialect {
        ApiDialect::RrfHttp
    }

    fn connect(&self, connection: &ConnectionConfig) -> HttpRequest {
        Self::stamped(HttpRequest::get("rr_connect").query("password", connection.duet_password.as_str()))
    }

    fn upload(&self, file_name: &str, gcode: Vec<u8>) -> HttpRequest {
        Self::stamped(HttpRequest::post("rr_upload", gcode).query("name", gcodes_path(file_name)))
    }

    fn send_gcode(&self, gcode: &str) -> HttpRequest {
        Self::stamped(HttpRequest::get("rr_gcode").query("gcode", gcode))
    }

    fn status(&self) -> HttpRequest {
        Self::stamped(HttpRequest::get("rr_status").query("type", "3"))
    }

    fn last_reply(&self) -> Option<HttpRequest> {
        Some(Self::stamped(HttpRequest::get("rr_reply")))
    }

    fn disconnect(&self) -> Option<HttpRequest> {
        Some(Self::stamped(HttpRequest::get("rr_disconnect")))
    }

    fn parse_status(&self, body: &str) -> Result<SimulationStatus, ProtocolError> {
        let status: Value = serde_json::from_str(body)?;
        // RRF 1.21RC2 and earlier report 'P' while simulating, later versions 'M'.
        let busy = match status.get("status").and_then(Value::as_str) {
            Some(code) => code == "P" || code == "M",
            None => true,
        };
        let progress = status.get("fractionPrinted").and_then(Value::as_f64).map(clamp_percent);
        Ok(SimulationStatus { busy, progress })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DsfApi;

impl DsfApi {
    /// Older DSF versions wrap the object model in `result`.
    fn lookup<'a>(status: &'a Value, pointer: &str) -> Option<&'a Value> {
        status
            .get("result")
            .and_then(|inner| inner.pointer(pointer))
            .or_else(|| status.pointer(pointer))
    }
}

impl DuetApi for DsfApi {
    fn dialect(&self) -> ApiDialect {
        ApiDialect::Dsf
    }

    fn connect(&self, _connection: &ConnectionConfig) -> HttpRequest {
        HttpRequest::get("machine/status")
    }

    fn upload(&self, file_name: &str, gcode: Vec<u8>) -> HttpRequest {
        let encoded = file_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        HttpRequest::put(format!("machine/file/gcodes/{}", encoded), gcode)
    }

    fn send_gcode(&self, gcode: &str) -> HttpRequest {
        HttpRequest::post("machine/code", gcode.as_bytes().to_vec())
    }

    fn status(&self) -> HttpRequest {
        HttpRequest::get("machine/status")
    }

    fn last_reply(&self) -> Option<HttpRequest> {
        None
    }

    fn disconnect(&self) -> Option<HttpRequest> {
        None
    }

    fn parse_status(&self, body: &str) -> Result<SimulationStatus, ProtocolError> {
        let status: Value = serde_json::from_str(body)?;
        // ASSUMPTION: a payload without state.status is treated as still simulating.
        // Not yet confirmed against DSF firmware.
        let busy = match Self::lookup(&status, "/state/status").and_then(Value::as_str) {
            Some(state) => state == "simulating",
            None => true,
        };
        let progress = match Self::lookup(&status, "/fractionPrinted").and_then(Value::as_f64) {
            Some(fraction) => Some(clamp_percent(fraction)),
            None => {
                let position = Self::lookup(&status, "/job/filePosition").and_then(Value::as_f64);
                let size = Self::lookup(&status, "/job/file/size").and_then(Value::as_f64);
                match (position, size) {
                    (Some(position), Some(size)) if size > 0.0 => Some(clamp_percent(position / size * 100.0)),
                    _ => None,
                }
            }
        };
        Ok(SimulationStatus { busy, progress })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Method;

    fn conn() -> ConnectionConfig {
        ConnectionConfig::new("http://duet/", "reprap", "", "")
    }

    #[test]
    fn test_legacy_endpoints() {
        let api = RrfHttpApi;
        let connect = api.connect(&conn());
        assert_eq!(connect.path, "rr_connect");
        assert_eq!(connect.query_value("password"), Some("reprap"));
        assert!(connect.query_value("time").is_some());

        let upload = api.upload("test.gcode", b"G1 X10\n".to_vec());
        assert_eq!(upload.method, Method::Post);
        assert_eq!(upload.path, "rr_upload");
        assert_eq!(upload.query_value("name"), Some("0:/gcodes/test.gcode"));
        assert_eq!(upload.body.as_deref(), Some(&b"G1 X10\n"[..]));

        let gcode = api.send_gcode("M32 \"0:/gcodes/test.gcode\"");
        assert_eq!(gcode.method, Method::Get);
        assert_eq!(gcode.query_value("gcode"), Some("M32 \"0:/gcodes/test.gcode\""));

        assert_eq!(api.status().query_value("type"), Some("3"));
        assert_eq!(api.last_reply().unwrap().path, "rr_reply");
        assert_eq!(api.disconnect().unwrap().path, "rr_disconnect");
    }

    #[test]
    fn test_dsf_endpoints() {
        let api = DsfApi;
        assert_eq!(api.connect(&conn()).path, "machine/status");
        assert!(api.connect(&conn()).query.is_empty());

        let upload = api.upload("my part.gcode", b"G28\n".to_vec());
        assert_eq!(upload.method, Method::Put);
        assert_eq!(upload.path, "machine/file/gcodes/my%20part.gcode");

        let code = api.send_gcode("M37");
        assert_eq!(code.method, Method::Post);
        assert_eq!(code.path, "machine/code");
        assert_eq!(code.body.as_deref(), Some(&b"M37"[..]));

        assert!(api.last_reply().is_none());
        assert!(api.disconnect().is_none());
    }

    #[test]
    fn test_legacy_status_parsing() {
        let api = RrfHttpApi;
        let simulating = api.parse_status(r#"{"status":"M","fractionPrinted":42.5}"#).unwrap();
        assert_eq!(simulating, SimulationStatus { busy: true, progress: Some(42.5) });
        assert!(api.parse_status(r#"{"status":"P"}"#).unwrap().busy);
        assert!(!api.parse_status(r#"{"status":"I"}"#).unwrap().busy);
        assert!(api.parse_status(r#"{}"#).unwrap().busy);
        assert!(matches!(api.parse_status("<html>"), Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_dsf_status_parsing() {
        let api = DsfApi;
        let body = r#"{"state":{"status":"simulating"},"job":{"filePosition":250,"file":{"size":1000}}}"#;
        assert_eq!(api.parse_status(body).unwrap(), SimulationStatus { busy: true, progress: Some(25.0) });

        let wrapped = r#"{"result":{"state":{"status":"idle"}}}"#;
        assert_eq!(api.parse_status(wrapped).unwrap(), SimulationStatus { busy: false, progress: None });

        // partial payloads are treated as busy
        assert!(api.parse_status(r#"{"result":{}}"#).unwrap().busy);
        assert!(api.parse_status(r#"{"state":{}}"#).unwrap().busy);
        assert!(api.parse_status(r#"{"state":{"status":3}}"#).unwrap().busy);

        let zero_size = r#"{"state":{"status":"simulating"},"job":{"filePosition":5,"file":{"size":0}}}"#;
        assert_eq!(api.parse_status(zero_size).unwrap().progress, None);
    }

    #[test]
    fn test_api_for() {
        assert_eq!(api_for(ApiDialect::RrfHttp).dialect(), ApiDialect::RrfHttp);
        assert_eq!(api_for(ApiDialect::Dsf).dialect(), ApiDialect::Dsf);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "T");
    }
}
