//! Telemetry formatting for runtime events and run summaries.
//!
//! Sinks decide *where* rendered output goes; formatters decide *how* it
//! looks. Color output is controlled by [`FormatterMode`].

use std::io::IsTerminal;

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::event_bus::RuntimeEvent;
use crate::run::RunRecord;
use crate::types::RunStatus;

/// Install the global tracing subscriber: env-filtered fmt output plus span
/// traces on errors.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate. Safe to call once
/// per process; subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skeinrun=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}

pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const ERROR_COLOR: &str = "\x1b[31m"; // red
pub const RESET_COLOR: &str = "\x1b[0m";

/// Formatter color mode for telemetry output.
///
/// - [`FormatterMode::Auto`]: detects TTY capability via `stderr.is_terminal()`
/// - [`FormatterMode::Colored`]: always include color codes
/// - [`FormatterMode::Plain`]: never include color codes (logs/files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    /// Returns true if this mode should use colored output.
    ///
    /// For `Auto` mode, performs TTY detection on each call.
    #[must_use]
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

pub trait TelemetryFormatter: Send + Sync {
    /// Render one event as a line (with trailing newline).
    fn render_event(&self, event: &RuntimeEvent) -> String;
    /// Render a run's closing summary as one or more lines.
    fn render_run_summary(&self, run: &RunRecord) -> String;
}

/// Plain text formatter with optional ANSI color codes.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn wrap(&self, color: &str, text: String) -> String {
        if self.mode.is_colored() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text
        }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &RuntimeEvent) -> String {
        let mut line = self.wrap(LINE_COLOR, event.to_string());
        line.push('\n');
        line
    }

    fn render_run_summary(&self, run: &RunRecord) -> String {
        let header = format!(
            "run {} goal={} status={} steps={} retries={}",
            run.id, run.goal_id, run.status, run.metrics.steps, run.metrics.retries
        );
        let mut out = match run.status {
            RunStatus::Failed => self.wrap(ERROR_COLOR, header),
            _ => self.wrap(LINE_COLOR, header),
        };
        out.push('\n');
        if let Some(summary) = &run.summary {
            let kind = run.error_kind.as_deref().unwrap_or("unknown");
            out.push_str(&self.wrap(ERROR_COLOR, format!("  {kind}: {summary}")));
            out.push('\n');
        }
        out
    }
}
