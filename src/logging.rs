//! Tracing setup and the external log sink seam.
//!
//! `init_tracing` wires the usual env-filtered stderr subscriber. `LogSink`
//! models the external log collaborator: the engine reports every stage
//! milestone and failure through it, and never reads logs back.

pub use tracing::{debug, error, info, warn};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Initialize the tracing subscriber with environment filter support.
///
/// By default, logs at INFO level and above are displayed. Control the log
/// level with the `RUST_LOG` environment variable:
///
/// ```bash
/// RUST_LOG=debug sitesync sync -d pull
/// RUST_LOG=sitesync::database=trace sitesync backup
/// ```
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

/// Outcome level of a logged milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
	Info,
	Success,
	Warning,
	Error,
}

impl fmt::Display for LogStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LogStatus::Info => write!(f, "info"),
			LogStatus::Success => write!(f, "success"),
			LogStatus::Warning => write!(f, "warning"),
			LogStatus::Error => write!(f, "error"),
		}
	}
}

/// External log collaborator: receives one record per significant
/// milestone or failure. Storage and display belong to the caller.
pub trait LogSink: Send + Sync {
	fn record(&self, stage: &str, direction: &str, status: LogStatus, message: &str);
}

/// Default sink that forwards records to `tracing`
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
	fn record(&self, stage: &str, direction: &str, status: LogStatus, message: &str) {
		match status {
			LogStatus::Info => info!(stage, direction, "{}", message),
			LogStatus::Success => info!(stage, direction, "{}", message),
			LogStatus::Warning => warn!(stage, direction, "{}", message),
			LogStatus::Error => error!(stage, direction, "{}", message),
		}
	}
}

// vim: ts=4
