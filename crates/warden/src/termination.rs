//! Signal, kill and check a process by pid with the platform's own commands.
//!
//! Every function here answers with a plain `bool` and never errors: a failed
//! command, a missing tool, or a call on the wrong platform is simply `false`.
//! Unix-like systems get `interrupt`/`terminate` and no forced kill; Windows
//! gets `force_kill` and nothing gentler.

use std::time::Duration;

use crate::launcher;
use crate::log_watch::{LogWatch, Marker};
use crate::pidfile::is_valid_pid;
use crate::platform::Platform;
use crate::processors::{self, SharedProcessor};
use crate::types::SupportConfig;

const TASKLIST_WAIT: Duration = Duration::from_millis(2000);

pub(crate) fn interrupt_command(pid: u32) -> Vec<String> {
	vec!["kill".into(), "-2".into(), pid.to_string()]
}

pub(crate) fn terminate_command(pid: u32) -> Vec<String> {
	vec!["kill".into(), pid.to_string()]
}

pub(crate) fn force_kill_command(pid: u32) -> Vec<String> {
	vec!["taskkill".into(), "/F".into(), "/pid".into(), pid.to_string()]
}

pub(crate) fn liveness_command(platform: Platform, pid: u32) -> Vec<String> {
	if platform.is_unix_like() {
		vec!["kill".into(), "-0".into(), pid.to_string()]
	} else {
		vec![
			"tasklist.exe".into(),
			"/FI".into(),
			format!("PID eq {}", pid),
			"/FO".into(),
			"CSV".into(),
		]
	}
}

/// SIGINT via `kill -2`. Unix-like only.
pub async fn interrupt(support: &SupportConfig, platform: Platform, output: SharedProcessor, pid: u32) -> bool {
	if !platform.is_unix_like() || !is_valid_pid(pid) {
		return false;
	}
	launcher::execute_command_line(support, "[kill process]", &interrupt_command(pid), output).await
}

/// SIGTERM via `kill`. Unix-like only.
pub async fn terminate(support: &SupportConfig, platform: Platform, output: SharedProcessor, pid: u32) -> bool {
	if !platform.is_unix_like() || !is_valid_pid(pid) {
		return false;
	}
	launcher::execute_command_line(support, "[term process]", &terminate_command(pid), output).await
}

/// `taskkill /F`. Windows only.
pub async fn force_kill(support: &SupportConfig, platform: Platform, output: SharedProcessor, pid: u32) -> bool {
	if platform != Platform::Windows || !is_valid_pid(pid) {
		return false;
	}
	launcher::execute_command_line(support, "[taskkill process]", &force_kill_command(pid), output).await
}

pub async fn is_running(platform: Platform, pid: u32) -> bool {
	if !is_valid_pid(pid) {
		return false;
	}
	let support = SupportConfig::new("is-running");
	let command = liveness_command(platform, pid);

	if platform.is_unix_like() {
		return launcher::execute_command_line(&support, "[check process]", &command, processors::silent()).await;
	}

	// tasklist prints a CSV row with the quoted pid only when the process exists
	let watch = LogWatch::new([Marker::literal(format!("\"{}\"", pid))], Vec::new(), processors::silent());
	let run = launcher::execute_command_line(&support, "[tasklist]", &command, watch.clone());
	let bounded = tokio::time::timeout(TASKLIST_WAIT, async {
		tokio::join!(run, watch.wait_for_result(TASKLIST_WAIT))
	});
	if bounded.await.is_err() {
		tracing::debug!("tasklist did not finish within {}ms", TASKLIST_WAIT.as_millis());
	}
	tracing::trace!("tasklist output: {}", watch.output());
	watch.mark_result_as_retrieved();
	watch.is_init_with_success()
}
