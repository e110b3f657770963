use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const EXTENSION: &str = "pid";

/// `<dir of executable>/<file stem>.pid`, so distinct executables never share
/// a pid file.
pub fn path_for(executable: &Path) -> PathBuf {
	let stem = executable
		.file_stem()
		.map(|s| s.to_os_string())
		.unwrap_or_else(|| "process".into());
	let mut name = stem;
	name.push(".");
	name.push(EXTENSION);
	match executable.parent() {
		Some(dir) => dir.join(name),
		None => PathBuf::from(name),
	}
}

pub fn write(path: &Path, pid: u32) -> Result<()> {
	std::fs::write(path, pid.to_string()).map_err(|source| Error::PidFile {
		path: path.to_path_buf(),
		source,
	})
}

/// The recorded pid, or `None` when the file is missing, unparsable, or holds
/// a value that is not a valid positive OS pid.
pub fn read(path: &Path) -> Option<u32> {
	std::fs::read_to_string(path)
		.ok()
		.and_then(|s| s.trim().parse().ok())
		.filter(|pid| is_valid_pid(*pid))
}

/// Positive and representable as a signed `pid_t`. Larger values wrap to
/// negative pids, which `kill` treats as process groups (-1 being "everyone").
pub fn is_valid_pid(pid: u32) -> bool {
	pid > 0 && i32::try_from(pid).is_ok()
}

/// Removes the pid file. A file that was never written is not an error.
pub fn remove(path: &Path) -> Result<()> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		Err(source) => Err(Error::PidFile {
			path: path.to_path_buf(),
			source,
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extension_is_replaced() {
		assert_eq!(path_for(Path::new("/opt/db/bin/mongod.exe")), PathBuf::from("/opt/db/bin/mongod.pid"));
		assert_eq!(path_for(Path::new("/opt/db/bin/mongod")), PathBuf::from("/opt/db/bin/mongod.pid"));
		assert_eq!(path_for(Path::new("/x/run.tar.sh")), PathBuf::from("/x/run.tar.pid"));
	}

	#[test]
	fn read_rejects_pids_outside_the_signed_range() {
		let dir = std::env::temp_dir().join(format!("warden-pidfile-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let file = dir.join("server.pid");

		for (content, expected) in [
			("4242", Some(4242)),
			("4242\n", Some(4242)),
			("2147483647", Some(2147483647)),
			("2147483648", None),
			("4294967295", None),
			("0", None),
			("-1", None),
			("abc", None),
		] {
			std::fs::write(&file, content).unwrap();
			assert_eq!(read(&file), expected, "content {:?}", content);
		}

		remove(&file).unwrap();
		assert_eq!(read(&file), None);
		remove(&file).unwrap();
	}

	#[test]
	fn same_name_in_different_dirs_does_not_collide() {
		assert_ne!(path_for(Path::new("a/run.sh")), path_for(Path::new("b/run.sh")));
	}
}
