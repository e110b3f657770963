//! Consumers for process output.
//!
//! A [`StreamProcessor`] receives blocks of text as they are read from a child's
//! stdout/stderr and does something with them. Processors compose by wrapping:
//! [`named`] prefixes each line, [`to_lines`] re-chunks into whole lines,
//! [`multiplex`] fans out. None of them ever fail the caller; console and log
//! errors are dropped here.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 4096;
const RING_BUFFER_SIZE: usize = 64 * 1024;

pub trait StreamProcessor: Send + Sync {
	fn process(&self, block: &str);

	/// Called once when the underlying stream is exhausted.
	fn on_processed(&self) {}
}

pub type SharedProcessor = Arc<dyn StreamProcessor>;

impl<T: StreamProcessor + ?Sized> StreamProcessor for Arc<T> {
	fn process(&self, block: &str) {
		(**self).process(block)
	}

	fn on_processed(&self) {
		(**self).on_processed()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

pub struct Silent;

impl StreamProcessor for Silent {
	fn process(&self, _block: &str) {}
}

pub struct Console;

impl StreamProcessor for Console {
	fn process(&self, block: &str) {
		let mut out = std::io::stdout().lock();
		let _ = out.write_all(block.as_bytes());
		let _ = out.flush();
	}
}

pub struct LogTo {
	level: LogLevel,
}

impl StreamProcessor for LogTo {
	fn process(&self, block: &str) {
		let text = block.trim_end_matches(['\r', '\n']);
		if text.is_empty() {
			return;
		}
		match self.level {
			LogLevel::Trace => tracing::trace!(target: "warden::output", "{}", text),
			LogLevel::Debug => tracing::debug!(target: "warden::output", "{}", text),
			LogLevel::Info => tracing::info!(target: "warden::output", "{}", text),
			LogLevel::Warn => tracing::warn!(target: "warden::output", "{}", text),
			LogLevel::Error => tracing::error!(target: "warden::output", "{}", text),
		}
	}
}

/// Prefixes every line with a label, tracking line starts across blocks.
pub struct Named {
	name: String,
	destination: SharedProcessor,
	at_line_start: Mutex<bool>,
}

impl StreamProcessor for Named {
	fn process(&self, block: &str) {
		let mut at_line_start = match self.at_line_start.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		let mut labelled = String::with_capacity(block.len() + self.name.len() + 1);
		for piece in block.split_inclusive('\n') {
			if *at_line_start {
				labelled.push_str(&self.name);
				labelled.push(' ');
			}
			labelled.push_str(piece);
			*at_line_start = piece.ends_with('\n');
		}
		drop(at_line_start);
		self.destination.process(&labelled);
	}

	fn on_processed(&self) {
		self.destination.on_processed();
	}
}

pub struct Multiplex {
	targets: Vec<SharedProcessor>,
}

impl StreamProcessor for Multiplex {
	fn process(&self, block: &str) {
		for target in &self.targets {
			target.process(block);
		}
	}

	fn on_processed(&self) {
		for target in &self.targets {
			target.on_processed();
		}
	}
}

/// Re-chunks arbitrary blocks into complete lines (newline kept). A trailing
/// partial line is flushed when the stream ends.
pub struct StreamToLine {
	destination: SharedProcessor,
	buffer: Mutex<String>,
}

impl StreamProcessor for StreamToLine {
	fn process(&self, block: &str) {
		let lines = {
			let mut buffer = match self.buffer.lock() {
				Ok(guard) => guard,
				Err(poisoned) => poisoned.into_inner(),
			};
			buffer.push_str(block);
			let mut lines = Vec::new();
			while let Some(idx) = buffer.find('\n') {
				lines.push(buffer.drain(..=idx).collect::<String>());
			}
			lines
		};
		for line in lines {
			self.destination.process(&line);
		}
	}

	fn on_processed(&self) {
		let rest = match self.buffer.lock() {
			Ok(mut guard) => std::mem::take(&mut *guard),
			Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
		};
		if !rest.is_empty() {
			self.destination.process(&rest);
		}
		self.destination.on_processed();
	}
}

/// Keeps the most recent output in a bounded ring and rebroadcasts each block
/// to live subscribers.
#[derive(Clone)]
pub struct Capture {
	ring: Arc<Mutex<VecDeque<u8>>>,
	capacity: usize,
	sender: broadcast::Sender<String>,
}

impl Capture {
	pub fn new() -> Self {
		Self::with_capacity(RING_BUFFER_SIZE)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(256);
		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
			capacity,
			sender,
		}
	}

	pub fn snapshot(&self) -> String {
		let ring = match self.ring.lock() {
			Ok(guard) => guard,
			Err(poisoned) => poisoned.into_inner(),
		};
		let bytes: Vec<u8> = ring.iter().copied().collect();
		String::from_utf8_lossy(&bytes).into_owned()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<String> {
		self.sender.subscribe()
	}
}

impl Default for Capture {
	fn default() -> Self {
		Self::new()
	}
}

impl StreamProcessor for Capture {
	fn process(&self, block: &str) {
		{
			let mut ring = match self.ring.lock() {
				Ok(guard) => guard,
				Err(poisoned) => poisoned.into_inner(),
			};
			for &byte in block.as_bytes() {
				if ring.len() >= self.capacity {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}
		let _ = self.sender.send(block.to_string());
	}
}

pub fn silent() -> SharedProcessor {
	Arc::new(Silent)
}

pub fn console() -> SharedProcessor {
	Arc::new(Console)
}

pub fn log_to(level: LogLevel) -> SharedProcessor {
	Arc::new(LogTo { level })
}

pub fn named(name: impl Into<String>, destination: SharedProcessor) -> SharedProcessor {
	Arc::new(Named {
		name: name.into(),
		destination,
		at_line_start: Mutex::new(true),
	})
}

pub fn named_console(name: impl Into<String>) -> SharedProcessor {
	named(name, console())
}

pub fn multiplex(targets: Vec<SharedProcessor>) -> SharedProcessor {
	Arc::new(Multiplex { targets })
}

pub fn to_lines(destination: SharedProcessor) -> SharedProcessor {
	Arc::new(StreamToLine {
		destination,
		buffer: Mutex::new(String::new()),
	})
}

/// Pumps `reader` into `processor` on its own task until EOF or a read error.
pub fn connect<R>(reader: R, processor: SharedProcessor) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		pump(reader, &*processor).await;
	})
}

pub async fn pump<R: AsyncRead + Unpin>(mut reader: R, processor: &dyn StreamProcessor) {
	let mut buf = [0u8; READ_CHUNK];
	let mut pending: Vec<u8> = Vec::new();
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				pending.extend_from_slice(&buf[..n]);
				let text = take_utf8(&mut pending);
				if !text.is_empty() {
					processor.process(&text);
				}
			}
			Err(e) => {
				tracing::warn!("output stream read failed: {}", e);
				break;
			}
		}
	}
	if !pending.is_empty() {
		processor.process(&String::from_utf8_lossy(&pending));
	}
	processor.on_processed();
}

// Decodes what is decodable, keeping an incomplete trailing sequence for the
// next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
	match std::str::from_utf8(pending) {
		Ok(text) => {
			let text = text.to_string();
			pending.clear();
			text
		}
		Err(e) if e.error_len().is_none() => {
			let tail = pending.split_off(e.valid_up_to());
			let text = String::from_utf8_lossy(pending).into_owned();
			*pending = tail;
			text
		}
		Err(_) => {
			let text = String::from_utf8_lossy(pending).into_owned();
			pending.clear();
			text
		}
	}
}
