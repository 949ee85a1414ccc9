//! Upload G-code to Duet RepRapFirmware controllers, start prints and simulations, and
//! embed QOI thumbnails into the uploaded file.

pub mod config;
pub mod device;
pub mod file_manager;
pub mod print_job;
pub mod qoi;
pub mod source;
pub mod thumbnail;
pub mod transport;

pub use config::{Config, ConfigError, ConnectionConfig, PrinterSettings, TimingConfig};
pub use device::OutputDevice;
pub use print_job::{DeviceEvent, DeviceType, JobMachine, JobOutcome, JobState, WriteError};
pub use qoi::{QoiEncoder, QoiError};
pub use source::{FileSource, GcodeSource, ImageFileRenderer, Renderer, SourceError};
pub use thumbnail::{ThumbnailSettings, ThumbnailSpec};
pub use transport::{ApiDialect, HttpClient, TransportError};
