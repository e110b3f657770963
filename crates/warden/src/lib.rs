//! # warden
//!
//! Launch, supervise and terminate external executables from a Rust host.
//!
//! A started process gets a pid file next to its executable, its output wired
//! through [`StreamProcessor`]s, an optional readiness wait on a stdout marker,
//! and a stop hook that runs when the host shuts down.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use warden::{ProcessConfig, ProcessOutput, SignalExitRegistrar, Supervisor, SupportConfig, WatchedFactory};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registrar = SignalExitRegistrar::new();
//! registrar.listen();
//! let sup = Supervisor::new(registrar.clone());
//!
//! let db = sup
//!     .start(
//!         &WatchedFactory::new("ready to accept connections", Duration::from_secs(10)),
//!         "/opt/db/bin/server".as_ref(),
//!         &["--port".into(), "5432".into()],
//!         &HashMap::new(),
//!         &ProcessConfig::default(),
//!         &ProcessOutput::named_console("db"),
//!         &SupportConfig::new("db"),
//!     )
//!     .await
//!     .unwrap();
//!
//! db.stop().await.unwrap();
//! # }
//! ```

pub mod artifact;
pub mod error;
pub mod exit;
pub mod launcher;
pub mod log_watch;
pub mod pid;
pub mod pidfile;
pub mod platform;
pub mod processors;
pub mod supervisor;
pub mod termination;
pub mod types;

pub use artifact::{ArtifactProvider, Executable, ExtractedFileSet, LocalFileSets};
pub use error::{Error, Result};
pub use exit::{ExitRegistrar, HookId, SignalExitRegistrar};
pub use launcher::{ProcessControl, ProcessStreams};
pub use log_watch::{LogWatch, Marker, WatchState};
pub use pid::{PidResolver, PidStrategy};
pub use platform::Platform;
pub use processors::{LogLevel, SharedProcessor, StreamProcessor};
pub use supervisor::{DefaultFactory, RunningProcess, RunningProcessFactory, Supervisor, WatchedFactory, WatchedProcess};
pub use types::{ProcessConfig, ProcessOutput, SupportConfig};
