use std::time::Duration;

use serde::Deserialize;

use crate::processors::{self, LogLevel, SharedProcessor};

/// Diagnostic context attached to log records and errors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SupportConfig {
	pub name: String,
	#[serde(default)]
	pub support_url: Option<String>,
}

impl SupportConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			support_url: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessConfig {
	#[serde(default = "default_stop_timeout_ms")]
	pub stop_timeout_ms: u64,
	#[serde(default = "default_true")]
	pub daemon_process: bool,
}

impl ProcessConfig {
	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop_timeout_ms)
	}
}

impl Default for ProcessConfig {
	fn default() -> Self {
		Self {
			stop_timeout_ms: default_stop_timeout_ms(),
			daemon_process: default_true(),
		}
	}
}

fn default_stop_timeout_ms() -> u64 {
	15_000
}
fn default_true() -> bool {
	true
}

/// Where a process's stdout, stderr and echoed command lines go.
#[derive(Clone)]
pub struct ProcessOutput {
	pub output: SharedProcessor,
	pub error: SharedProcessor,
	pub commands: SharedProcessor,
}

impl ProcessOutput {
	pub fn new(output: SharedProcessor, error: SharedProcessor, commands: SharedProcessor) -> Self {
		Self {
			output,
			error,
			commands,
		}
	}

	pub fn named_console(label: &str) -> Self {
		Self::new(
			processors::named_console(format!("[{} output]", label)),
			processors::named_console(format!("[{} error]", label)),
			processors::console(),
		)
	}

	pub fn named_log(label: &str) -> Self {
		Self::new(
			processors::named(format!("[{} output]", label), processors::log_to(LogLevel::Info)),
			processors::named(format!("[{} error]", label), processors::log_to(LogLevel::Error)),
			processors::log_to(LogLevel::Debug),
		)
	}

	pub fn silent() -> Self {
		Self::new(processors::silent(), processors::silent(), processors::silent())
	}
}
