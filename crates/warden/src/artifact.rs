//! The boundary to whatever produces executables (downloaders, extractors).
//!
//! The supervisor only needs an executable path that exists and can be run,
//! and a way to hand the files back for cleanup once the process is stopped.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::supervisor::{RunningProcess, RunningProcessFactory, Supervisor};
use crate::types::{ProcessConfig, ProcessOutput, SupportConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFileSet {
	executable: PathBuf,
	library_files: Vec<PathBuf>,
}

impl ExtractedFileSet {
	pub fn new(executable: impl Into<PathBuf>) -> Self {
		Self {
			executable: executable.into(),
			library_files: Vec::new(),
		}
	}

	pub fn with_library(mut self, file: impl Into<PathBuf>) -> Self {
		self.library_files.push(file.into());
		self
	}

	pub fn executable(&self) -> &Path {
		&self.executable
	}

	pub fn library_files(&self) -> &[PathBuf] {
		&self.library_files
	}

	pub fn files(&self) -> impl Iterator<Item = &Path> {
		std::iter::once(self.executable.as_path()).chain(self.library_files.iter().map(PathBuf::as_path))
	}
}

pub trait ArtifactProvider: Send + Sync {
	/// A ready-to-run file set for `distribution`; the executable exists and
	/// is marked executable.
	fn extract(&self, distribution: &str) -> Result<ExtractedFileSet>;

	/// Cleans up a file set previously returned by `extract`.
	fn remove(&self, distribution: &str, files: &ExtractedFileSet) -> Result<()>;
}

/// File sets already on disk, registered by distribution id.
#[derive(Default)]
pub struct LocalFileSets {
	sets: HashMap<String, ExtractedFileSet>,
}

impl LocalFileSets {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(mut self, distribution: impl Into<String>, files: ExtractedFileSet) -> Self {
		self.sets.insert(distribution.into(), files);
		self
	}
}

impl ArtifactProvider for LocalFileSets {
	fn extract(&self, distribution: &str) -> Result<ExtractedFileSet> {
		let files = self.sets.get(distribution).ok_or_else(|| Error::Artifact {
			distribution: distribution.to_string(),
			reason: "unknown distribution".into(),
		})?;
		if !files.executable.is_file() {
			return Err(Error::Artifact {
				distribution: distribution.to_string(),
				reason: format!("{} does not exist", files.executable.display()),
			});
		}
		mark_executable(&files.executable).map_err(|e| Error::Artifact {
			distribution: distribution.to_string(),
			reason: format!("cannot make {} executable: {}", files.executable.display(), e),
		})?;
		Ok(files.clone())
	}

	fn remove(&self, distribution: &str, files: &ExtractedFileSet) -> Result<()> {
		let mut first_error = None;
		for file in files.files() {
			match std::fs::remove_file(file) {
				Ok(()) => {}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => {
					tracing::warn!("[{}] could not delete {}: {}", distribution, file.display(), e);
					first_error.get_or_insert(e);
				}
			}
		}
		match first_error {
			Some(e) => Err(Error::Io(e)),
			None => Ok(()),
		}
	}
}

pub fn mark_executable(path: &Path) -> io::Result<()> {
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let mut perms = std::fs::metadata(path)?.permissions();
		if perms.mode() & 0o111 != 0o111 {
			perms.set_mode(perms.mode() | 0o755);
			std::fs::set_permissions(path, perms)?;
		}
	}
	#[cfg(not(unix))]
	let _ = path;
	Ok(())
}

/// A started process together with the files it was started from. Stopping it
/// also hands the files back to the provider.
pub struct Executable<P> {
	distribution: String,
	files: ExtractedFileSet,
	provider: Arc<dyn ArtifactProvider>,
	process: P,
}

impl<P: AsRef<RunningProcess>> Executable<P> {
	#[allow(clippy::too_many_arguments)]
	pub async fn start<F>(
		supervisor: &Supervisor,
		factory: &F,
		provider: Arc<dyn ArtifactProvider>,
		distribution: &str,
		arguments: &[String],
		environment: &HashMap<String, String>,
		config: &ProcessConfig,
		output: &ProcessOutput,
		support: &SupportConfig,
	) -> Result<Self>
	where
		F: RunningProcessFactory<Process = P>,
	{
		let files = provider.extract(distribution)?;
		let started = supervisor
			.start(factory, files.executable(), arguments, environment, config, output, support)
			.await;
		match started {
			Ok(process) => Ok(Self {
				distribution: distribution.to_string(),
				files,
				provider,
				process,
			}),
			Err(e) => {
				if let Err(cleanup) = provider.remove(distribution, &files) {
					tracing::warn!("[{}] cleanup after failed start: {}", support.name, cleanup);
				}
				Err(e)
			}
		}
	}

	pub fn process(&self) -> &P {
		&self.process
	}

	pub fn files(&self) -> &ExtractedFileSet {
		&self.files
	}

	pub async fn stop(&self) -> Result<()> {
		let stopped = self.process.as_ref().stop().await;
		let removed = self.provider.remove(&self.distribution, &self.files);
		stopped?;
		removed
	}
}
