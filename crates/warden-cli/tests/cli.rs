use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("warden-cli-test-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn warden() -> Command {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
	cmd.env("RUST_LOG", "warn");
	cmd
}

#[test]
fn version_prints_the_package_version() {
	let out = warden().arg("version").output().unwrap();
	assert!(out.status.success());
	assert_eq!(
		String::from_utf8_lossy(&out.stdout).trim(),
		format!("warden {}", env!("CARGO_PKG_VERSION"))
	);
}

#[test]
fn unknown_command_fails() {
	let out = warden().arg("frobnicate").output().unwrap();
	assert!(!out.status.success());
	assert!(String::from_utf8_lossy(&out.stderr).contains("unknown command"));
}

#[test]
fn status_without_a_pid_file_fails() {
	let dir = temp_dir("status-missing");
	let out = warden().arg("status").arg(dir.join("nothing.pid")).output().unwrap();
	assert!(!out.status.success());
	assert!(String::from_utf8_lossy(&out.stderr).contains("no pid recorded"));
}

#[cfg(unix)]
#[test]
fn status_and_kill_by_pid_file() {
	let dir = temp_dir("kill");
	let pid_file = dir.join("sleeper.pid");
	let mut child = Command::new("sleep").arg("30").spawn().unwrap();
	std::fs::write(&pid_file, child.id().to_string()).unwrap();

	let out = warden().arg("status").arg(&pid_file).output().unwrap();
	assert!(out.status.success());
	assert!(String::from_utf8_lossy(&out.stdout).contains("running"));

	// reap in the background so the killed process does not linger as a zombie
	let reaper = std::thread::spawn(move || child.wait());

	let out = warden().arg("kill").arg(&pid_file).output().unwrap();
	assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
	assert!(!pid_file.exists());
	assert!(!reaper.join().unwrap().unwrap().success());
}

#[cfg(unix)]
#[test]
fn status_of_a_stale_pid_file_fails() {
	let dir = temp_dir("stale");
	let pid_file = dir.join("gone.pid");
	let mut child = Command::new("true").spawn().unwrap();
	let pid = child.id();
	child.wait().unwrap();
	std::fs::write(&pid_file, pid.to_string()).unwrap();

	let out = warden().arg("status").arg(&pid_file).output().unwrap();
	assert!(!out.status.success());
	assert!(String::from_utf8_lossy(&out.stdout).contains("not running"));
}
