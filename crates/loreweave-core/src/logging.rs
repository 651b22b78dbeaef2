//! Warning capture for user-visible notices.
//!
//! Provides a [`WarningCollector`] that captures `tracing` warnings and errors
//! into a bounded ring buffer, and a [`WarningReader`] handle for draining
//! them. Hosts surface the captured messages as toasts or CLI output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// A single captured warning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub level: Level,
    /// Target module path.
    pub target: String,
    pub message: String,
    /// Structured fields other than `message`, as `(name, value)` pairs.
    pub fields: Vec<(String, String)>,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for (name, value) in &self.fields {
            write!(f, " {name}={value}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct WarningBuffer {
    warnings: VecDeque<Warning>,
    capacity: usize,
}

impl WarningBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            warnings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, warning: Warning) {
        if self.capacity == 0 {
            return;
        }
        if self.warnings.len() >= self.capacity {
            self.warnings.pop_front();
        }
        self.warnings.push_back(warning);
    }
}

/// A `tracing` layer that keeps the most recent `WARN` and `ERROR` events.
#[derive(Debug, Clone)]
pub struct WarningCollector {
    buffer: Arc<Mutex<WarningBuffer>>,
}

impl WarningCollector {
    /// Create a new collector with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(WarningBuffer::new(capacity))),
        }
    }

    /// Get a reader handle for the captured warnings.
    pub fn reader(&self) -> WarningReader {
        WarningReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for WarningCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Level ordering: ERROR < WARN < INFO.
        if *metadata.level() > Level::WARN {
            return;
        }

        let mut visitor = WarningVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(Warning {
                level: *metadata.level(),
                target: metadata.target().to_string(),
                message: visitor.message,
                fields: visitor.fields,
            });
        }
    }
}

/// A read handle for the warning buffer.
#[derive(Debug, Clone)]
pub struct WarningReader {
    buffer: Arc<Mutex<WarningBuffer>>,
}

impl WarningReader {
    /// Return a snapshot of all captured warnings.
    pub fn warnings(&self) -> Vec<Warning> {
        self.buffer
            .lock()
            .map(|buf| buf.warnings.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return all captured warnings.
    pub fn drain(&self) -> Vec<Warning> {
        self.buffer
            .lock()
            .map(|mut buf| buf.warnings.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.warnings.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct WarningVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for WarningVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}
