use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::pid::PidResolver;
use crate::processors::{self, SharedProcessor};
use crate::types::SupportConfig;

/// The output readers of a spawned process, not yet wired to any consumer.
pub struct ProcessStreams {
	stdout: Option<ChildStdout>,
	stderr: Option<ChildStderr>,
	error_separately: bool,
}

impl ProcessStreams {
	/// Starts one pump per stream. stdout goes to `output` as read; stderr is
	/// split into lines and goes to `error`, or to `output` when the process was
	/// started without separate error redirection.
	pub fn connect(self, output: SharedProcessor, error: SharedProcessor) -> Vec<JoinHandle<()>> {
		let error = if self.error_separately { error } else { output.clone() };
		let mut pumps = Vec::with_capacity(2);
		if let Some(stdout) = self.stdout {
			pumps.push(processors::connect(stdout, output));
		}
		if let Some(stderr) = self.stderr {
			pumps.push(processors::connect(stderr, processors::to_lines(error)));
		}
		pumps
	}
}

// What the reaper task saw: nothing yet, or the exit status (or why waiting
// for it failed).
type Reaped = Option<std::result::Result<ExitStatus, String>>;

/// A spawned OS process. A reaper task owns the child and collects its exit
/// status as soon as it dies; dropping this handle kills the process.
pub struct ProcessControl {
	support: SupportConfig,
	pid: Option<u32>,
	stdout: Option<ChildStdout>,
	stderr: Option<ChildStderr>,
	error_separately: bool,
	kill: mpsc::Sender<()>,
	exited: watch::Receiver<Reaped>,
}

impl ProcessControl {
	/// Spawns `command_line` (program first) with `env` layered over the
	/// inherited environment. With `redirect_error_separately` unset, stderr is
	/// later wired into the same consumer as stdout.
	pub fn start(
		support: &SupportConfig,
		command_line: &[String],
		env: &HashMap<String, String>,
		resolver: &PidResolver,
		redirect_error_separately: bool,
	) -> Result<Self> {
		let control = Self::spawn(support, command_line, env, resolver, redirect_error_separately)?;
		match control.pid {
			Some(pid) => tracing::info!("[{}] started {} (pid {})", support.name, command_line[0], pid),
			None => tracing::warn!("[{}] started {} (pid unknown)", support.name, command_line[0]),
		}
		Ok(control)
	}

	fn spawn(
		support: &SupportConfig,
		command_line: &[String],
		env: &HashMap<String, String>,
		resolver: &PidResolver,
		redirect_error_separately: bool,
	) -> Result<Self> {
		let (program, args) = command_line.split_first().ok_or_else(|| Error::Spawn {
			label: support.name.clone(),
			program: String::new(),
			source: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
		})?;

		let mut cmd = Command::new(program);
		cmd.args(args)
			.envs(env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = cmd.spawn().map_err(|source| Error::Spawn {
			label: support.name.clone(),
			program: program.clone(),
			source,
		})?;

		let pid = resolver.resolve(&child, Path::new(program));
		let stdout = child.stdout.take();
		let stderr = child.stderr.take();
		let (kill, exited) = reap(child, support.name.clone());

		Ok(Self {
			support: support.clone(),
			pid,
			stdout,
			stderr,
			error_separately: redirect_error_separately,
			kill,
			exited,
		})
	}

	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub fn support(&self) -> &SupportConfig {
		&self.support
	}

	/// Hands out the output readers; later calls get empty streams.
	pub fn take_streams(&mut self) -> ProcessStreams {
		ProcessStreams {
			stdout: self.stdout.take(),
			stderr: self.stderr.take(),
			error_separately: self.error_separately,
		}
	}

	pub fn connect(&mut self, output: SharedProcessor, error: SharedProcessor) -> Vec<JoinHandle<()>> {
		self.take_streams().connect(output, error)
	}

	/// The exit status once the process has died and been reaped.
	pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
		match &*self.exited.borrow() {
			None => Ok(None),
			Some(Ok(status)) => Ok(Some(*status)),
			Some(Err(reason)) => Err(self.stop_error(io::Error::other(reason.clone()))),
		}
	}

	pub async fn wait(&mut self) -> Result<ExitStatus> {
		if self.exited.wait_for(Option::is_some).await.is_err() {
			return Err(self.stop_error(io::Error::other("reaper task ended without a status")));
		}
		match self.try_wait()? {
			Some(status) => Ok(status),
			None => Err(self.stop_error(io::Error::other("no exit status"))),
		}
	}

	/// Asks the process to exit, then kills it if it is still alive after
	/// `timeout`. An already exited process just reports its status.
	pub async fn stop(&mut self, timeout: Duration) -> Result<ExitStatus> {
		if let Some(status) = self.try_wait()? {
			return Ok(status);
		}

		if self.request_graceful_stop() {
			match tokio::time::timeout(timeout, self.wait()).await {
				Ok(Ok(status)) => {
					tracing::info!("[{}] stopped ({})", self.support.name, status);
					return Ok(status);
				}
				Ok(Err(e)) => return Err(e),
				Err(_) => tracing::warn!(
					"[{}] still running {}ms after stop request, killing",
					self.support.name,
					timeout.as_millis()
				),
			}
		}

		self.force_stop().await
	}

	pub async fn force_stop(&mut self) -> Result<ExitStatus> {
		// a full channel already holds a kill request
		let _ = self.kill.try_send(());
		let status = self.wait().await?;
		tracing::info!("[{}] killed ({})", self.support.name, status);
		Ok(status)
	}

	#[cfg(unix)]
	fn request_graceful_stop(&self) -> bool {
		use nix::sys::signal::{kill, Signal};
		use nix::unistd::Pid;

		let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
			return false;
		};
		match kill(Pid::from_raw(pid), Signal::SIGTERM) {
			Ok(()) => true,
			Err(e) => {
				tracing::debug!("[{}] SIGTERM to {} failed: {}", self.support.name, pid, e);
				false
			}
		}
	}

	// No signal to ask for an orderly exit; stop falls through to the kill.
	#[cfg(not(unix))]
	fn request_graceful_stop(&self) -> bool {
		false
	}

	fn stop_error(&self, source: io::Error) -> Error {
		Error::Stop {
			label: self.support.name.clone(),
			source,
		}
	}
}

// Moves the child onto its own task, which waits for it to exit (or kills it
// on request, or when the handle is dropped) and publishes the status.
fn reap(mut child: Child, label: String) -> (mpsc::Sender<()>, watch::Receiver<Reaped>) {
	let (kill, mut kill_requests) = mpsc::channel::<()>(1);
	let (publish, exited) = watch::channel::<Reaped>(None);

	tokio::spawn(async move {
		let exited_alone = tokio::select! {
			status = child.wait() => Some(status),
			_ = kill_requests.recv() => None,
		};
		let status = match exited_alone {
			Some(status) => status,
			None => {
				if let Err(e) = child.start_kill() {
					tracing::debug!("[{}] kill: {}", label, e);
				}
				child.wait().await
			}
		};
		if let Err(e) = &status {
			tracing::error!("[{}] waiting for exit failed: {}", label, e);
		}
		let _ = publish.send(Some(status.map_err(|e| e.to_string())));
	});

	(kill, exited)
}

/// Runs a short-lived helper command to completion, feeding both of its
/// streams into `output`. Returns whether it exited successfully; spawn and
/// wait failures are logged, not returned.
pub async fn execute_command_line(
	support: &SupportConfig,
	label: &str,
	command_line: &[String],
	output: SharedProcessor,
) -> bool {
	tracing::debug!("[{}] {} {}", support.name, label, command_line.join(" "));

	let run = async {
		let resolver = PidResolver::global();
		let mut control = ProcessControl::spawn(support, command_line, &HashMap::new(), &resolver, false)?;
		let pumps = control.connect(output.clone(), output);
		let status = control.wait().await?;
		for pump in pumps {
			let _ = pump.await;
		}
		Ok::<_, Error>(status)
	};

	match run.await {
		Ok(status) if status.success() => true,
		Ok(status) => {
			tracing::debug!("[{}] {} exited with {}", support.name, label, status);
			false
		}
		Err(e) => {
			tracing::error!("[{}] {} failed: {}", support.name, label, e);
			false
		}
	}
}
