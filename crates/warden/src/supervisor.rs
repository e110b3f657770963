use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::exit::{ExitRegistrar, HookId};
use crate::launcher::{ProcessControl, ProcessStreams};
use crate::log_watch::{LogWatch, Marker, WatchState};
use crate::pid::PidResolver;
use crate::pidfile;
use crate::types::{ProcessConfig, ProcessOutput, SupportConfig};

// Extra time an exit hook gets on top of the stop timeout for the kill + reap.
const EXIT_HOOK_GRACE: Duration = Duration::from_secs(2);

pub struct Supervisor {
	resolver: Arc<PidResolver>,
	registrar: Arc<dyn ExitRegistrar>,
}

impl Supervisor {
	pub fn new(registrar: Arc<dyn ExitRegistrar>) -> Self {
		Self {
			resolver: PidResolver::global(),
			registrar,
		}
	}

	pub fn with_resolver(mut self, resolver: Arc<PidResolver>) -> Self {
		self.resolver = resolver;
		self
	}

	/// Starts `executable`, records its pid next to it, wires its output through
	/// `factory` and, for daemon processes, arranges for it to be stopped when
	/// the host exits. Anything failing after the spawn kills the process and
	/// removes the pid file before the error is returned.
	#[allow(clippy::too_many_arguments)]
	pub async fn start<F: RunningProcessFactory>(
		&self,
		factory: &F,
		executable: &Path,
		arguments: &[String],
		environment: &HashMap<String, String>,
		config: &ProcessConfig,
		output: &ProcessOutput,
		support: &SupportConfig,
	) -> Result<F::Process> {
		let pid_file = pidfile::path_for(executable);
		let program = std::path::absolute(executable).map_err(|source| Error::Spawn {
			label: support.name.clone(),
			program: executable.display().to_string(),
			source,
		})?;

		let mut command_line = Vec::with_capacity(arguments.len() + 1);
		command_line.push(program.to_string_lossy().into_owned());
		command_line.extend(arguments.iter().cloned());
		output.commands.process(&format!("{}\n", command_line.join(" ")));

		let mut control = ProcessControl::start(support, &command_line, environment, &self.resolver, true)?;

		if let Some(pid) = control.pid() {
			if let Err(e) = pidfile::write(&pid_file, pid) {
				let _ = pidfile::remove(&pid_file);
				if let Err(kill) = control.force_stop().await {
					tracing::error!("[{}] rollback kill failed: {}", support.name, kill);
				}
				return Err(e);
			}
			tracing::debug!("[{}] pid file {}", support.name, pid_file.display());
		}

		let streams = control.take_streams();
		let running = RunningProcess::new(control, pid_file, config.stop_timeout(), support.clone());

		let process = match factory.started_with(running.clone(), streams, output).await {
			Ok(process) => process,
			Err(e) => {
				tracing::warn!("[{}] start failed, rolling back: {}", support.name, e);
				running.abort().await;
				return Err(e);
			}
		};

		if config.daemon_process {
			let hook_target = running.clone();
			let id = self.registrar.register(
				&support.name,
				config.stop_timeout() + EXIT_HOOK_GRACE,
				Box::new(move || {
					Box::pin(async move {
						if let Err(e) = hook_target.stop().await {
							tracing::error!("[{}] stop on exit failed: {}", hook_target.support().name, e);
						}
					})
				}),
			);
			running.attach_exit_hook(Arc::clone(&self.registrar), id);
		}

		Ok(process)
	}
}

/// Turns a freshly spawned process into the handle returned by
/// [`Supervisor::start`]. Implementations decide how output is wired and may
/// refuse the process (e.g. it never became ready), which rolls the start back.
pub trait RunningProcessFactory {
	type Process: Send;

	fn started_with(
		&self,
		running: RunningProcess,
		streams: ProcessStreams,
		output: &ProcessOutput,
	) -> impl Future<Output = Result<Self::Process>> + Send;
}

/// stdout to `output.output`, stderr line by line to `output.error`.
pub struct DefaultFactory;

impl RunningProcessFactory for DefaultFactory {
	type Process = RunningProcess;

	async fn started_with(
		&self,
		running: RunningProcess,
		streams: ProcessStreams,
		output: &ProcessOutput,
	) -> Result<RunningProcess> {
		running.connect(streams, output);
		Ok(running)
	}
}

/// Waits for a readiness marker on stdout before handing the process out.
pub struct WatchedFactory {
	pub success: Vec<Marker>,
	pub failures: Vec<Marker>,
	pub timeout: Duration,
}

impl WatchedFactory {
	pub fn new(success: impl Into<Marker>, timeout: Duration) -> Self {
		Self {
			success: vec![success.into()],
			failures: Vec::new(),
			timeout,
		}
	}

	pub fn failing_on(mut self, marker: impl Into<Marker>) -> Self {
		self.failures.push(marker.into());
		self
	}
}

pub struct WatchedProcess {
	running: RunningProcess,
	watch: Arc<LogWatch>,
}

impl WatchedProcess {
	pub fn running(&self) -> &RunningProcess {
		&self.running
	}

	pub fn watch(&self) -> &LogWatch {
		&self.watch
	}

	pub async fn stop(&self) -> Result<()> {
		self.running.stop().await
	}
}

impl AsRef<RunningProcess> for WatchedProcess {
	fn as_ref(&self) -> &RunningProcess {
		&self.running
	}
}

impl RunningProcessFactory for WatchedFactory {
	type Process = WatchedProcess;

	async fn started_with(
		&self,
		running: RunningProcess,
		streams: ProcessStreams,
		output: &ProcessOutput,
	) -> Result<WatchedProcess> {
		let watch = LogWatch::new(self.success.clone(), self.failures.clone(), output.output.clone());
		streams.connect(watch.clone(), output.error.clone());

		let state = watch.wait_for_result(self.timeout).await;
		watch.mark_result_as_retrieved();
		let label = running.support().name.clone();
		let reason = match state {
			WatchState::Success => {
				tracing::info!("[{}] ready", label);
				return Ok(WatchedProcess { running, watch });
			}
			WatchState::Failure => {
				let found = watch.failure_found().unwrap_or_default();
				format!("failure marker: {}", found.lines().next().unwrap_or_default())
			}
			WatchState::StreamClosed => "output closed before the process reported ready".to_string(),
			WatchState::TimedOut | WatchState::Pending => {
				format!("not ready after {}ms", self.timeout.as_millis())
			}
		};
		Err(Error::Startup { label, reason })
	}
}

struct Inner {
	support: SupportConfig,
	pid: Option<u32>,
	pid_file: PathBuf,
	stop_timeout: Duration,
	control: Mutex<Option<ProcessControl>>,
	exit_hook: std::sync::Mutex<Option<(Arc<dyn ExitRegistrar>, HookId)>>,
}

/// A started process. Clones share the same process; stopping any of them
/// stops it, and later stops are no-ops.
#[derive(Clone)]
pub struct RunningProcess {
	inner: Arc<Inner>,
}

impl RunningProcess {
	fn new(control: ProcessControl, pid_file: PathBuf, stop_timeout: Duration, support: SupportConfig) -> Self {
		Self {
			inner: Arc::new(Inner {
				support,
				pid: control.pid(),
				pid_file,
				stop_timeout,
				control: Mutex::new(Some(control)),
				exit_hook: std::sync::Mutex::new(None),
			}),
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.inner.pid
	}

	pub fn pid_file(&self) -> &Path {
		&self.inner.pid_file
	}

	pub fn stop_timeout(&self) -> Duration {
		self.inner.stop_timeout
	}

	pub fn support(&self) -> &SupportConfig {
		&self.inner.support
	}

	/// The default wiring: stdout as read, stderr split into lines.
	pub fn connect(&self, streams: ProcessStreams, output: &ProcessOutput) {
		streams.connect(output.output.clone(), output.error.clone());
	}

	pub async fn is_stopped(&self) -> bool {
		self.inner.control.lock().await.is_none()
	}

	/// True once the process has exited on its own (or was stopped).
	pub async fn has_exited(&self) -> bool {
		let guard = self.inner.control.lock().await;
		match guard.as_ref() {
			Some(control) => !matches!(control.try_wait(), Ok(None)),
			None => true,
		}
	}

	/// Stops the process (graceful, then forced after the stop timeout) and
	/// removes the pid file. The pid file is removed even when stopping failed.
	pub async fn stop(&self) -> Result<()> {
		let mut guard = self.inner.control.lock().await;
		let Some(mut control) = guard.take() else {
			return Ok(());
		};
		self.detach_exit_hook();
		let stopped = control.stop(self.inner.stop_timeout).await;
		let removed = pidfile::remove(&self.inner.pid_file);
		stopped?;
		removed
	}

	fn attach_exit_hook(&self, registrar: Arc<dyn ExitRegistrar>, id: HookId) {
		*self.exit_hook_slot() = Some((registrar, id));
	}

	// The hook holds a clone of this handle; withdrawing it breaks the cycle.
	fn detach_exit_hook(&self) {
		let attached = self.exit_hook_slot().take();
		if let Some((registrar, id)) = attached {
			registrar.deregister(id);
		}
	}

	fn exit_hook_slot(&self) -> std::sync::MutexGuard<'_, Option<(Arc<dyn ExitRegistrar>, HookId)>> {
		match self.inner.exit_hook.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	// Start rollback: pid file first, then the kill. Errors are logged because
	// the caller is already returning the original failure.
	async fn abort(&self) {
		let mut guard = self.inner.control.lock().await;
		if let Err(e) = pidfile::remove(&self.inner.pid_file) {
			tracing::error!("[{}] rollback: {}", self.inner.support.name, e);
		}
		if let Some(mut control) = guard.take() {
			if let Err(e) = control.force_stop().await {
				tracing::error!("[{}] rollback kill failed: {}", self.inner.support.name, e);
			}
		}
	}
}

impl AsRef<RunningProcess> for RunningProcess {
	fn as_ref(&self) -> &RunningProcess {
		self
	}
}
