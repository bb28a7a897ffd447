//! In-memory log file backing the `logfile` endpoint
//!
//! `LogCapture` is a `tracing_subscriber::Layer`: every event that reaches it
//! is formatted as one line and appended to a bounded buffer. Clones share
//! the buffer, so the layer can be installed in a subscriber while the
//! actuator keeps a handle for reading.

use chrono::{SecondsFormat, Utc};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Default number of lines kept before the oldest are dropped
pub const DEFAULT_MAX_LINES: usize = 10_000;

#[derive(Debug)]
struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
}

/// Shared, bounded capture of formatted log lines
#[derive(Debug, Clone)]
pub struct LogCapture {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl Default for LogCapture {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl LogCapture {
    pub fn new(max_lines: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer {
                lines: VecDeque::new(),
                max_lines: max_lines.max(1),
            })),
        }
    }

    /// Append a pre-formatted line
    pub fn push(&self, line: String) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.lines.len() == buffer.max_lines {
            buffer.lines.pop_front();
        }
        buffer.lines.push_back(line);
    }

    /// Whole captured log, one line per event, newline terminated
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.lines.iter().fold(String::new(), |mut out, line| {
            out.push_str(line);
            out.push('\n');
            out
        })
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .lines
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{} {:>5} {} {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            meta.level().to_string(),
            meta.target(),
            visitor.finish()
        );
        self.push(line);
    }
}

/// Collects the message and any structured fields of one event
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// A byte range requested through a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b` (inclusive) or `bytes=a-` when `end` is `None`
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`
    Suffix(u64),
}

impl ByteRange {
    /// Parse a single-range `Range` header value
    ///
    /// Multi-range and non-byte units are not supported and yield `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let ranges = header.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }
        let start = start.parse().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        Some(ByteRange::From { start, end })
    }

    /// Resolve against a body length into an inclusive `(first, last)` pair
    ///
    /// `None` means the range cannot be satisfied.
    pub fn resolve(self, len: u64) -> Option<(u64, u64)> {
        if len == 0 {
            return None;
        }
        match self {
            ByteRange::From { start, end } => {
                if start >= len {
                    return None;
                }
                let last = end.map_or(len - 1, |e| e.min(len - 1));
                (last >= start).then_some((start, last))
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(n) => Some((len.saturating_sub(n), len - 1)),
        }
    }
}
