#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	Linux,
	Windows,
	MacOs,
	Solaris,
	FreeBsd,
}

impl Platform {
	pub fn detect() -> Self {
		if cfg!(target_os = "windows") {
			Platform::Windows
		} else if cfg!(target_os = "macos") {
			Platform::MacOs
		} else if cfg!(target_os = "solaris") || cfg!(target_os = "illumos") {
			Platform::Solaris
		} else if cfg!(target_os = "freebsd") {
			Platform::FreeBsd
		} else {
			Platform::Linux
		}
	}

	pub fn is_unix_like(&self) -> bool {
		!matches!(self, Platform::Windows)
	}
}
