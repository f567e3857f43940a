//! QR Generator Core
//!
//! Shared configuration, error types, and logging setup for the offline
//! worker crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::WorkerConfig;
pub use error::{QrGenError, QrGenResult};
pub use logging::{init_logging, LogConfig, LogFormat};
