use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by start/stop. Background pumps and liveness checks never
/// produce these; they log instead.
#[derive(Error, Debug)]
pub enum Error {
	#[error("[{label}] failed to spawn {program}: {source}")]
	Spawn {
		label: String,
		program: String,
		#[source]
		source: io::Error,
	},

	#[error("pid file {}: {source}", path.display())]
	PidFile {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("[{label}] failed to stop process: {source}")]
	Stop {
		label: String,
		#[source]
		source: io::Error,
	},

	#[error("[{label}] startup failed: {reason}")]
	Startup { label: String, reason: String },

	#[error("artifact {distribution}: {reason}")]
	Artifact { distribution: String, reason: String },

	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// True for the I/O class of failures (spawn, pid file, stop, raw io).
	pub fn is_io(&self) -> bool {
		matches!(
			self,
			Error::Spawn { .. } | Error::PidFile { .. } | Error::Stop { .. } | Error::Io(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, Error>;
