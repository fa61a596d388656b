//! Progress reporting for repository ingestion.
//!
//! Ingestion runs in three stages (scan, extract, write). The CLI shows them
//! with `IndicatifReporter`; library callers pass `NoopReporter` or their own
//! implementation.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Ingestion stage being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scan,
    Extract,
    Write,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Scan => "Scanning files",
            Self::Extract => "Extracting declarations",
            Self::Write => "Writing graph",
        }
    }
}

/// Receives ingestion progress. Implementations must be callable from the
/// extraction thread pool.
pub trait ProgressReporter: Send + Sync {
    /// A stage begins; `total` is the number of files it will touch, if known.
    fn begin(&self, stage: Stage, total: Option<u64>);

    /// `files` more files finished the current stage.
    fn advance(&self, files: u64);

    /// A non-fatal problem worth showing to the user.
    fn note(&self, message: &str);

    /// The current stage ended.
    fn end(&self);
}

#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn begin(&self, _stage: Stage, _total: Option<u64>) {}
    fn advance(&self, _files: u64) {}
    fn note(&self, _message: &str) {}
    fn end(&self) {}
}

/// Terminal progress bars drawn on stderr.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    stage: Mutex<Option<Stage>>,
}

impl IndicatifReporter {
    /// A reporter drawing to stderr, or a hidden one when `visible` is false
    /// (quiet mode, non-interactive output).
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            bar: ProgressBar::with_draw_target(None, target),
            stage: Mutex::new(None),
        }
    }

    /// Stage currently shown, if any.
    pub fn current_stage(&self) -> Option<Stage> {
        *self.stage.lock().expect("progress stage mutex poisoned")
    }
}

impl ProgressReporter for IndicatifReporter {
    fn begin(&self, stage: Stage, total: Option<u64>) {
        *self.stage.lock().expect("progress stage mutex poisoned") = Some(stage);
        let style = match total {
            Some(total) => {
                self.bar.set_length(total);
                ProgressStyle::with_template("{spinner:.green} {msg:<24} [{bar:30}] {pos}/{len}")
                    .map(|s| s.progress_chars("#>-"))
            }
            None => ProgressStyle::with_template("{spinner:.green} {msg:<24} {pos} files"),
        };
        self.bar
            .set_style(style.unwrap_or_else(|_| ProgressStyle::default_bar()));
        self.bar.reset();
        self.bar.set_message(stage.label());
    }

    fn advance(&self, files: u64) {
        self.bar.inc(files);
    }

    fn note(&self, message: &str) {
        if !self.bar.is_hidden() {
            self.bar.suspend(|| eprintln!("{message}"));
        }
    }

    fn end(&self) {
        *self.stage.lock().expect("progress stage mutex poisoned") = None;
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_reporter_tracks_stage() {
        let reporter = IndicatifReporter::new(false);
        reporter.begin(Stage::Extract, Some(4));
        assert_eq!(reporter.current_stage(), Some(Stage::Extract));
        reporter.advance(4);
        reporter.note("pkg/broken.py: parse error");
        reporter.end();
        assert_eq!(reporter.current_stage(), None);
    }

    #[test]
    fn stage_labels() {
        assert_eq!(Stage::Write.label(), "Writing graph");
        NoopReporter.begin(Stage::Scan, None);
    }
}
