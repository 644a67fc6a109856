//! Terminal progress display for harvest runs.

use std::sync::Arc;
use std::time::Duration;

use harvester::pipeline::{FileState, ProgressCallback, ProgressEvent, StatusKind};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} manifests {msg}";

/// Manifest-level progress bar fed by pipeline events.
#[derive(Clone)]
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar }
    }

    /// Hidden display for non-interactive use.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn handle(&self, event: &ProgressEvent<'_>) {
        match *event {
            ProgressEvent::ManifestsDiscovered { total } => self.bar.set_length(total as u64),
            ProgressEvent::ManifestStarted { manifest, artifacts } => {
                self.bar.set_message(format!("{} (0/{})", manifest, artifacts));
            }
            ProgressEvent::FileFinished {
                manifest,
                filename,
                state,
            } => {
                if state == FileState::Failed {
                    self.bar.println(format!("  failed: {} ({})", filename, manifest));
                }
                self.bar.set_message(format!("{}: {} {}", manifest, filename, state));
            }
            ProgressEvent::ManifestFinished { manifest, status } => {
                if status != StatusKind::Completed {
                    self.bar.println(format!("  {} is {}", manifest, status));
                }
                self.bar.inc(1);
            }
        }
    }

    /// Callback to hand to the harvester.
    pub fn callback(&self) -> Arc<ProgressCallback> {
        let display = self.clone();
        Arc::new(move |event: &ProgressEvent<'_>| display.handle(event))
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
