//! Readiness detection over process output.
//!
//! [`LogWatch`] sits in front of another processor, forwards everything to it,
//! and classifies the text seen so far against success and failure markers.
//! The first marker to appear (by position in the accumulated output) decides
//! the result; a stream that ends first yields [`WatchState::StreamClosed`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::processors::{SharedProcessor, StreamProcessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
	Pending,
	Success,
	Failure,
	/// Returned by [`LogWatch::wait_for_result`] only; never stored.
	TimedOut,
	StreamClosed,
}

impl WatchState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, WatchState::Success | WatchState::Failure | WatchState::StreamClosed)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
	text: String,
	ignore_case: bool,
}

impl Marker {
	pub fn literal(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			ignore_case: false,
		}
	}

	/// ASCII case-insensitive match.
	pub fn ignore_case(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			ignore_case: true,
		}
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	fn find_in(&self, haystack: &[u8]) -> Option<usize> {
		let needle = self.text.as_bytes();
		if needle.is_empty() || needle.len() > haystack.len() {
			return None;
		}
		haystack.windows(needle.len()).position(|window| {
			if self.ignore_case {
				window.eq_ignore_ascii_case(needle)
			} else {
				window == needle
			}
		})
	}
}

impl From<&str> for Marker {
	fn from(text: &str) -> Self {
		Marker::literal(text)
	}
}

impl From<String> for Marker {
	fn from(text: String) -> Self {
		Marker::literal(text)
	}
}

struct WatchInner {
	output: String,
	failure_found: Option<String>,
	retrieved: bool,
}

pub struct LogWatch {
	success: Vec<Marker>,
	failures: Vec<Marker>,
	destination: SharedProcessor,
	inner: Mutex<WatchInner>,
	state: watch::Sender<WatchState>,
}

impl LogWatch {
	pub fn new(
		success: impl IntoIterator<Item = Marker>,
		failures: impl IntoIterator<Item = Marker>,
		destination: SharedProcessor,
	) -> Arc<Self> {
		let (state, _) = watch::channel(WatchState::Pending);
		Arc::new(Self {
			success: success.into_iter().collect(),
			failures: failures.into_iter().collect(),
			destination,
			inner: Mutex::new(WatchInner {
				output: String::new(),
				failure_found: None,
				retrieved: false,
			}),
			state,
		})
	}

	pub fn state(&self) -> WatchState {
		*self.state.borrow()
	}

	/// Waits until a terminal state is reached or `timeout` elapses. A timeout
	/// returns [`WatchState::TimedOut`] and leaves the stored state pending; the
	/// pump feeding this watch keeps running either way.
	pub async fn wait_for_result(&self, timeout: Duration) -> WatchState {
		let mut rx = self.state.subscribe();
		let result = tokio::time::timeout(timeout, async {
			match rx.wait_for(|s| s.is_terminal()).await {
				Ok(state) => *state,
				// sender lives in self, so this is unreachable while we're borrowed
				Err(_) => WatchState::StreamClosed,
			}
		})
		.await;
		result.unwrap_or(WatchState::TimedOut)
	}

	pub fn is_init_with_success(&self) -> bool {
		self.state() == WatchState::Success
	}

	/// Output from the failure marker onwards, once a failure was seen.
	pub fn failure_found(&self) -> Option<String> {
		self.lock().failure_found.clone()
	}

	pub fn output(&self) -> String {
		self.lock().output.clone()
	}

	pub fn mark_result_as_retrieved(&self) {
		self.lock().retrieved = true;
	}

	pub fn is_result_retrieved(&self) -> bool {
		self.lock().retrieved
	}

	/// Hands out the terminal state to exactly one caller.
	pub fn take_result(&self) -> Option<WatchState> {
		let mut inner = self.lock();
		let state = self.state();
		if inner.retrieved || !state.is_terminal() {
			return None;
		}
		inner.retrieved = true;
		Some(state)
	}

	fn lock(&self) -> MutexGuard<'_, WatchInner> {
		match self.inner.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		}
	}

	fn earliest(markers: &[Marker], haystack: &[u8]) -> Option<usize> {
		markers.iter().filter_map(|m| m.find_in(haystack)).min()
	}

	fn resolve(&self, next: WatchState) {
		self.state.send_if_modified(|current| {
			if current.is_terminal() {
				return false;
			}
			*current = next;
			true
		});
	}
}

impl StreamProcessor for LogWatch {
	fn process(&self, block: &str) {
		if self.state() == WatchState::Pending {
			let mut inner = self.lock();
			inner.output.push_str(block);
			let (success, failure) = {
				let haystack = inner.output.as_bytes();
				(
					Self::earliest(&self.success, haystack),
					Self::earliest(&self.failures, haystack),
				)
			};
			let failed_at = match (success, failure) {
				(Some(s), Some(f)) if f < s => Some(f),
				(None, Some(f)) => Some(f),
				_ => None,
			};
			let next = if let Some(f) = failed_at {
				let excerpt = String::from_utf8_lossy(&inner.output.as_bytes()[f..]).into_owned();
				inner.failure_found = Some(excerpt);
				Some(WatchState::Failure)
			} else if success.is_some() {
				Some(WatchState::Success)
			} else {
				None
			};
			drop(inner);
			if let Some(next) = next {
				self.resolve(next);
			}
		}
		self.destination.process(block);
	}

	fn on_processed(&self) {
		self.resolve(WatchState::StreamClosed);
		self.destination.on_processed();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::processors;

	fn watch(success: &[&str], failures: &[&str]) -> Arc<LogWatch> {
		LogWatch::new(
			success.iter().map(|s| Marker::literal(*s)),
			failures.iter().map(|s| Marker::literal(*s)),
			processors::silent(),
		)
	}

	#[test]
	fn success_marker_resolves_success() {
		let w = watch(&["listening on port"], &[]);
		for line in ["starting\n", "listening on port 27017\n", "ready\n"] {
			w.process(line);
		}
		assert!(w.is_init_with_success());
		assert_eq!(w.state(), WatchState::Success);
	}

	#[test]
	fn failure_before_success_wins() {
		let w = watch(&["ready"], &["fatal error"]);
		w.process("fatal error: disk full\nready\n");
		assert!(!w.is_init_with_success());
		assert_eq!(w.state(), WatchState::Failure);
		assert!(w.failure_found().unwrap().starts_with("fatal error"));
	}

	#[test]
	fn marker_split_across_blocks_still_matches() {
		let w = watch(&["waiting for connections"], &[]);
		w.process("... waiting for con");
		assert_eq!(w.state(), WatchState::Pending);
		w.process("nections on port 1\n");
		assert_eq!(w.state(), WatchState::Success);
	}

	#[test]
	fn terminal_state_is_immutable() {
		let w = watch(&["ok"], &["bad"]);
		w.process("ok\n");
		w.process("bad\n");
		w.on_processed();
		assert_eq!(w.state(), WatchState::Success);
	}

	#[test]
	fn case_insensitive_marker() {
		let w = LogWatch::new([Marker::ignore_case("READY")], Vec::new(), processors::silent());
		w.process("server is Ready\n");
		assert!(w.is_init_with_success());
	}

	#[test]
	fn empty_marker_never_matches() {
		let w = watch(&[""], &[]);
		w.process("anything\n");
		assert_eq!(w.state(), WatchState::Pending);
	}

	#[test]
	fn take_result_hands_out_once() {
		let w = watch(&["ok"], &[]);
		assert_eq!(w.take_result(), None);
		w.process("ok");
		assert_eq!(w.take_result(), Some(WatchState::Success));
		assert_eq!(w.take_result(), None);
		assert!(w.is_result_retrieved());
		assert_eq!(w.state(), WatchState::Success);
	}

	#[tokio::test]
	async fn resolved_watch_returns_without_waiting() {
		let w = watch(&["listening on port"], &[]);
		w.process("starting\nlistening on port 27017\nready\n");
		let started = std::time::Instant::now();
		assert_eq!(w.wait_for_result(Duration::from_secs(10)).await, WatchState::Success);
		assert!(started.elapsed() < Duration::from_secs(1));
	}

	#[tokio::test]
	async fn closed_stream_ends_the_wait_early() {
		use tokio::io::AsyncWriteExt;

		let w = watch(&["ready"], &[]);
		let (mut tx, rx) = tokio::io::duplex(64);
		processors::connect(rx, w.clone());
		tokio::spawn(async move {
			let _ = tx.write_all(b"starting\n").await;
			tokio::time::sleep(Duration::from_millis(500)).await;
			drop(tx);
		});

		let started = std::time::Instant::now();
		assert_eq!(w.wait_for_result(Duration::from_secs(5)).await, WatchState::StreamClosed);
		assert!(started.elapsed() < Duration::from_secs(2));
		assert_eq!(w.output(), "starting\n");
	}

	#[tokio::test]
	async fn timeout_leaves_state_pending() {
		let w = watch(&["never"], &[]);
		let r = w.wait_for_result(Duration::from_millis(50)).await;
		assert_eq!(r, WatchState::TimedOut);
		assert_eq!(w.state(), WatchState::Pending);
		w.process("never");
		assert_eq!(w.state(), WatchState::Success);
	}
}
