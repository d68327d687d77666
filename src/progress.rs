//! Scan progress reporting.
//!
//! Reports observable progress during `harvest scan` so operators see which
//! target is being listed, how many repositories are done, and how the run
//! ended. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// A single progress event for one scan target.
#[derive(Clone, Debug)]
pub enum ScanProgressEvent {
    /// Listing repositories. Total unknown.
    Discovering { target: String },
    /// n repositories finished out of total.
    Processing { target: String, n: u64, total: u64 },
    /// Target finished and its snapshot was written.
    Finished {
        target: String,
        hits: u64,
        misses: u64,
        degraded: u64,
    },
}

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator and target runner.
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "harvest github:CDCgov  processing  1,234 / 5,000 repos".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Discovering { target } => {
                format!("harvest {}  discovering...\n", target)
            }
            ScanProgressEvent::Processing { target, n, total } => format!(
                "harvest {}  processing  {} / {} repos\n",
                target,
                format_number(*n),
                format_number(*total)
            ),
            ScanProgressEvent::Finished {
                target,
                hits,
                misses,
                degraded,
            } => format!(
                "harvest {}  done  {} cached, {} fetched, {} degraded\n",
                target,
                format_number(*hits),
                format_number(*misses),
                format_number(*degraded)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Discovering { target } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "discovering"
            }),
            ScanProgressEvent::Processing { target, n, total } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "processing",
                "n": n,
                "total": total
            }),
            ScanProgressEvent::Finished {
                target,
                hits,
                misses,
                degraded,
            } => serde_json::json!({
                "event": "progress",
                "target": target,
                "phase": "finished",
                "hits": hits,
                "misses": misses,
                "degraded": degraded
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
