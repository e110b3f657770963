use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden::{Marker, ProcessConfig, ProcessOutput, SupportConfig, WatchedFactory};

// ── Launch file (warden run <launch.toml>) ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
	pub name: String,
	/// Relative paths are resolved against the launch file's directory.
	pub executable: PathBuf,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	pub support_url: Option<String>,
	#[serde(default)]
	pub output: OutputMode,
	#[serde(default)]
	pub process: ProcessConfig,
	pub ready: Option<ReadyConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
	#[default]
	Console,
	Log,
	Silent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyConfig {
	pub marker: String,
	#[serde(default)]
	pub failures: Vec<String>,
	#[serde(default = "default_ready_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub ignore_case: bool,
}

fn default_ready_timeout_ms() -> u64 { 30_000 }

impl LaunchConfig {
	pub fn support(&self) -> SupportConfig {
		SupportConfig {
			name: self.name.clone(),
			support_url: self.support_url.clone(),
		}
	}

	pub fn output(&self) -> ProcessOutput {
		match self.output {
			OutputMode::Console => ProcessOutput::named_console(&self.name),
			OutputMode::Log => ProcessOutput::named_log(&self.name),
			OutputMode::Silent => ProcessOutput::silent(),
		}
	}
}

impl ReadyConfig {
	pub fn factory(&self) -> WatchedFactory {
		let marker = |text: &str| {
			if self.ignore_case { Marker::ignore_case(text) } else { Marker::literal(text) }
		};
		let mut factory = WatchedFactory::new(marker(&self.marker), Duration::from_millis(self.timeout_ms));
		for failure in &self.failures {
			factory = factory.failing_on(marker(failure));
		}
		factory
	}
}

pub fn load(path: &Path) -> Result<LaunchConfig, String> {
	let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
	let mut config = parse(&content).map_err(|e| format!("invalid {}: {}", path.display(), e))?;
	if config.executable.is_relative() {
		let base = path.parent().unwrap_or_else(|| Path::new("."));
		config.executable = base.join(&config.executable);
	}
	Ok(config)
}

pub fn parse(content: &str) -> Result<LaunchConfig, toml::de::Error> {
	toml::from_str(content)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minimal_launch_file_gets_defaults() {
		let config = parse("name = \"db\"\nexecutable = \"bin/server\"\n").unwrap();
		assert_eq!(config.name, "db");
		assert!(config.args.is_empty());
		assert_eq!(config.output, OutputMode::Console);
		assert_eq!(config.process, ProcessConfig::default());
		assert!(config.ready.is_none());
		assert_eq!(config.support(), SupportConfig::new("db"));
	}

	#[test]
	fn full_launch_file() {
		let config = parse(
			r#"
name = "db"
executable = "/opt/db/server"
args = ["--port", "5432"]
support_url = "https://example.org/issues"
output = "log"

[env]
DB_MODE = "embedded"

[process]
stop_timeout_ms = 3000
daemon_process = false

[ready]
marker = "ready to accept"
failures = ["FATAL"]
timeout_ms = 5000
"#,
		)
		.unwrap();
		assert_eq!(config.args, ["--port", "5432"]);
		assert_eq!(config.env.get("DB_MODE").map(String::as_str), Some("embedded"));
		assert_eq!(config.output, OutputMode::Log);
		assert_eq!(config.process.stop_timeout(), Duration::from_secs(3));
		assert!(!config.process.daemon_process);

		let ready = config.ready.unwrap();
		let factory = ready.factory();
		assert_eq!(factory.timeout, Duration::from_secs(5));
		assert_eq!(factory.success[0].text(), "ready to accept");
		assert_eq!(factory.failures.len(), 1);
	}

	#[test]
	fn ready_timeout_defaults_to_thirty_seconds() {
		let config = parse("name = \"x\"\nexecutable = \"x\"\n[ready]\nmarker = \"up\"\n").unwrap();
		assert_eq!(config.ready.unwrap().timeout_ms, 30_000);
	}

	#[test]
	fn unknown_output_mode_is_rejected() {
		assert!(parse("name = \"x\"\nexecutable = \"x\"\noutput = \"loud\"\n").is_err());
	}

	#[test]
	fn relative_executable_resolves_against_the_launch_file() {
		let dir = std::env::temp_dir().join(format!("warden-cli-config-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let file = dir.join("launch.toml");
		std::fs::write(&file, "name = \"db\"\nexecutable = \"bin/server\"\n").unwrap();

		let config = load(&file).unwrap();
		assert_eq!(config.executable, dir.join("bin/server"));
		let _ = std::fs::remove_dir_all(&dir);
	}
}
