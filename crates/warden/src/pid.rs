//! Pid resolution for spawned children.
//!
//! The strategy is chosen once per process ([`PidResolver::global`]) and never
//! re-detected. The direct accessor asks the child handle for its id; the
//! platform fallback walks a list of [`PlatformInspector`]s. Neither path ever
//! errors: an unknown pid is a legitimate outcome that pid files and the
//! termination toolkit have to tolerate.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use sysinfo::{ProcessStatus, System};
use thiserror::Error;
use tokio::process::Child;

use crate::pidfile::is_valid_pid;

/// Forces a strategy: `direct` or `fallback`.
pub const STRATEGY_ENV: &str = "WARDEN_PID_STRATEGY";

static GLOBAL: OnceLock<Arc<PidResolver>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStrategy {
	DirectAccessor,
	PlatformFallback,
}

impl PidStrategy {
	pub fn detect() -> Self {
		match std::env::var(STRATEGY_ENV).ok().as_deref() {
			Some("direct") => return PidStrategy::DirectAccessor,
			Some("fallback") => return PidStrategy::PlatformFallback,
			Some(other) => tracing::warn!("ignoring unknown {}={}", STRATEGY_ENV, other),
			None => {}
		}
		if cfg!(any(unix, windows)) {
			PidStrategy::DirectAccessor
		} else {
			PidStrategy::PlatformFallback
		}
	}
}

#[derive(Error, Debug)]
pub enum InspectError {
	#[error("not supported on this platform")]
	Unsupported,
	#[error("no matching process")]
	NotFound,
	#[error("native call failed: {0}")]
	Native(String),
}

/// A best-effort, platform-specific way to learn a child's pid.
pub trait PlatformInspector: Send + Sync {
	fn name(&self) -> &'static str;
	fn process_id(&self, child: &Child, program: &Path) -> Result<u32, InspectError>;
}

pub struct Unavailable;

impl PlatformInspector for Unavailable {
	fn name(&self) -> &'static str {
		"unavailable"
	}

	fn process_id(&self, _child: &Child, _program: &Path) -> Result<u32, InspectError> {
		Err(InspectError::Unsupported)
	}
}

/// Finds the newest live direct child of this process running `program` in the
/// OS process table. A script started through its shebang runs under the
/// interpreter, with the script somewhere in its arguments, so the executable
/// and every argument are checked.
#[derive(Default)]
pub struct ProcessTable;

impl ProcessTable {
	pub fn new() -> Self {
		Self
	}
}

impl PlatformInspector for ProcessTable {
	fn name(&self) -> &'static str {
		"process-table"
	}

	fn process_id(&self, _child: &Child, program: &Path) -> Result<u32, InspectError> {
		let parent = sysinfo::get_current_pid().map_err(|e| InspectError::Native(e.to_string()))?;
		let system = System::new_all();

		system
			.processes()
			.iter()
			.filter(|(_, process)| process.parent() == Some(parent))
			.filter(|(_, process)| process.status() != ProcessStatus::Zombie)
			.filter(|(_, process)| runs_program(process.exe(), process.cmd(), program))
			.max_by_key(|(_, process)| process.start_time())
			.map(|(pid, _)| pid.as_u32())
			.ok_or(InspectError::NotFound)
	}
}

fn runs_program<A: AsRef<std::ffi::OsStr>>(exe: Option<&Path>, cmd: &[A], program: &Path) -> bool {
	exe == Some(program) || cmd.iter().any(|arg| Path::new(arg) == program)
}

/// Asks the kernel for the id behind the child's process handle.
#[cfg(windows)]
pub struct KernelHandle;

#[cfg(windows)]
mod native {
	#[link(name = "kernel32")]
	extern "system" {
		pub fn GetProcessId(process: *mut std::ffi::c_void) -> u32;
	}
}

#[cfg(windows)]
impl PlatformInspector for KernelHandle {
	fn name(&self) -> &'static str {
		"kernel-handle"
	}

	fn process_id(&self, child: &Child, _program: &Path) -> Result<u32, InspectError> {
		let handle = child.raw_handle().ok_or(InspectError::NotFound)?;
		// SAFETY: the handle is owned by `child`, which outlives this call.
		let pid = unsafe { native::GetProcessId(handle as *mut std::ffi::c_void) };
		if pid == 0 {
			return Err(InspectError::Native(std::io::Error::last_os_error().to_string()));
		}
		Ok(pid)
	}
}

/// Inspectors for the running platform: the native handle lookup where there
/// is one, then the process table.
pub fn platform_inspectors() -> Vec<Box<dyn PlatformInspector>> {
	#[allow(unused_mut)]
	let mut inspectors: Vec<Box<dyn PlatformInspector>> = Vec::new();
	#[cfg(windows)]
	inspectors.push(Box::new(KernelHandle));
	if sysinfo::IS_SUPPORTED_SYSTEM {
		inspectors.push(Box::new(ProcessTable::new()));
	}
	if inspectors.is_empty() {
		inspectors.push(Box::new(Unavailable));
	}
	inspectors
}

pub struct PidResolver {
	strategy: PidStrategy,
	inspectors: Vec<Box<dyn PlatformInspector>>,
}

impl PidResolver {
	pub fn new(strategy: PidStrategy, inspectors: Vec<Box<dyn PlatformInspector>>) -> Self {
		Self {
			strategy,
			inspectors,
		}
	}

	pub fn detect() -> Self {
		Self::new(PidStrategy::detect(), platform_inspectors())
	}

	/// The process-wide resolver, detected on first use and kept for the life of
	/// the process.
	pub fn global() -> Arc<PidResolver> {
		GLOBAL
			.get_or_init(|| {
				let resolver = Self::detect();
				tracing::debug!("pid strategy: {:?}", resolver.strategy);
				Arc::new(resolver)
			})
			.clone()
	}

	pub fn strategy(&self) -> PidStrategy {
		self.strategy
	}

	pub fn resolve(&self, child: &Child, program: &Path) -> Option<u32> {
		let pid = match self.strategy {
			PidStrategy::DirectAccessor => {
				let pid = child.id();
				if pid.is_none() {
					tracing::debug!("child handle reported no pid for {}", program.display());
				}
				pid
			}
			PidStrategy::PlatformFallback => self.inspectors.iter().find_map(|inspector| {
				match inspector.process_id(child, program) {
					Ok(pid) => {
						tracing::debug!("detected pid {} via {}", pid, inspector.name());
						Some(pid)
					}
					Err(e) => {
						tracing::debug!("{}: could not determine pid: {}", inspector.name(), e);
						None
					}
				}
			}),
		};
		pid.filter(|pid| is_valid_pid(*pid))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn script_is_matched_anywhere_in_the_interpreter_arguments() {
		let script = Path::new("/opt/db/run.sh");
		let sh = Some(Path::new("/bin/sh"));
		assert!(runs_program(sh, &["/bin/sh", "/opt/db/run.sh"], script));
		assert!(runs_program(sh, &["/bin/sh", "-e", "/opt/db/run.sh", "--port"], script));
		assert!(!runs_program(sh, &["/bin/sh", "/opt/other/run.sh"], script));
		assert!(runs_program(Some(script), &[] as &[&str], script));
	}

	#[test]
	fn fallback_list_is_never_empty() {
		assert!(!platform_inspectors().is_empty());
	}
}
