//! Stop-on-exit for daemon processes.
//!
//! The host decides what "exiting" means; the supervisor only needs somewhere
//! to register a callback. [`SignalExitRegistrar`] is the production
//! implementation: hooks run when the host calls [`SignalExitRegistrar::run_hooks`]
//! or, after [`SignalExitRegistrar::listen`], when Ctrl-C / SIGTERM arrives.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ExitHook = Box<dyn FnOnce() -> HookFuture + Send>;

/// Identifies a registered hook so it can be withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

pub trait ExitRegistrar: Send + Sync {
	/// Registers `hook` to run once when the host exits. `bound` is the
	/// longest the hook may take before it is abandoned.
	fn register(&self, label: &str, bound: Duration, hook: ExitHook) -> HookId;

	/// Drops a hook that is no longer needed. Unknown or already run ids are
	/// ignored.
	fn deregister(&self, id: HookId);
}

struct Registered {
	id: HookId,
	label: String,
	bound: Duration,
	hook: ExitHook,
}

#[derive(Default)]
pub struct SignalExitRegistrar {
	hooks: Mutex<Vec<Registered>>,
	next_id: AtomicU64,
}

impl SignalExitRegistrar {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn pending(&self) -> usize {
		self.lock().len()
	}

	/// Runs every registered hook concurrently, each under its own bound.
	/// Hooks are drained, so a second call runs nothing.
	pub async fn run_hooks(&self) {
		let hooks = std::mem::take(&mut *self.lock());
		if hooks.is_empty() {
			return;
		}
		tracing::info!("running {} exit hook(s)", hooks.len());

		let handles: Vec<(String, Duration, JoinHandle<()>)> = hooks
			.into_iter()
			.map(|r| (r.label, r.bound, tokio::spawn((r.hook)())))
			.collect();

		for (label, bound, handle) in handles {
			match tokio::time::timeout(bound, handle).await {
				Ok(Ok(())) => tracing::debug!("[{}] exit hook done", label),
				Ok(Err(e)) => tracing::error!("[{}] exit hook panicked: {}", label, e),
				Err(_) => tracing::warn!("[{}] exit hook exceeded {}ms", label, bound.as_millis()),
			}
		}
	}

	/// Waits for Ctrl-C (and SIGTERM on Unix) in the background, then runs
	/// the hooks.
	pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
		let registrar = Arc::clone(self);
		tokio::spawn(async move {
			wait_for_shutdown_signal().await;
			tracing::info!("shutdown signal received");
			registrar.run_hooks().await;
		})
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registered>> {
		match self.hooks.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}
}

impl ExitRegistrar for SignalExitRegistrar {
	fn register(&self, label: &str, bound: Duration, hook: ExitHook) -> HookId {
		let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.lock().push(Registered {
			id,
			label: label.to_string(),
			bound,
			hook,
		});
		id
	}

	fn deregister(&self, id: HookId) {
		self.lock().retain(|r| r.id != id);
	}
}

pub async fn wait_for_shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		match signal(SignalKind::terminate()) {
			Ok(mut term) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {},
					_ = term.recv() => {},
				}
			}
			Err(e) => {
				tracing::warn!("cannot listen for SIGTERM: {}", e);
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
