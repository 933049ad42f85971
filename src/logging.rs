//! Structured logging: per-category runtime filter mask plus a bounded
//! in-memory ring mirroring emitted lines, independent of whatever
//! `tracing` subscriber is installed.
//!
//! The category bitmask is the knob the admin interface flips to control
//! tracing verbosity at runtime, guarding nothing but whether a line is
//! worth mirroring into [`LogRing`] for the log-tail endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::constants::LOG_RING_MAX;

/// One logging category. Values are bit positions, not sequential
/// indices, so they compose directly into [`CategoryMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Network = 1 << 0,
    ClientLifecycle = 1 << 1,
    EcmTrace = 1 << 2,
    Dispatch = 1 << 3,
    Config = 1 << 4,
    Admin = 1 << 5,
    FailBan = 1 << 6,
}

impl LogCategory {
    pub const ALL: u32 = 0x7f;
}

/// Runtime-togglable per-category mask. The admin interface flips bits
/// here directly; it has no effect on the `tracing` `EnvFilter` installed
/// at startup, which still governs what actually reaches stdout.
pub struct CategoryMask(AtomicU32);

impl CategoryMask {
    pub fn new() -> Self {
        CategoryMask(AtomicU32::new(LogCategory::ALL))
    }

    pub fn enabled(&self, cat: LogCategory) -> bool {
        self.0.load(Ordering::Relaxed) & (cat as u32) != 0
    }

    pub fn set(&self, mask: u32) {
        self.0.store(mask, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CategoryMask {
    fn default() -> Self {
        CategoryMask::new()
    }
}

/// Bounded mirror of the most recently emitted log lines, read by the
/// admin interface's log-tail endpoint.
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
}

impl LogRing {
    pub fn new() -> Self {
        LogRing {
            lines: Mutex::new(VecDeque::with_capacity(LOG_RING_MAX)),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= LOG_RING_MAX {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        LogRing::new()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

/// A `tracing_subscriber::Layer` that mirrors every event's message into a
/// [`LogRing`]. Installed alongside the `fmt` layer, not instead of it —
/// the ring is a parallel sink, not a replacement for stdout logging.
pub struct RingLayer {
    ring: Arc<LogRing>,
}

impl RingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        RingLayer { ring }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let meta = event.metadata();
        self.ring
            .push(format!("{} {} {}", meta.level(), meta.target(), visitor.0));
    }
}
