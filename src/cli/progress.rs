//! Spinner shown while a run waits for its downloads to settle

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::app::pipeline::PipelineProgress;

const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// How often the run loop refreshes the spinner message
pub const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// Live pipeline progress on stderr
#[derive(Debug)]
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Start a spinner; hidden spinners cost nothing to update
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
            bar.set_style(style.tick_strings(&["◐", "◓", "◑", "◒", "●"]));
        }
        bar.enable_steady_tick(TICK_INTERVAL);
        bar.set_message("fetching listings");
        Self { bar }
    }

    pub fn update(&self, progress: &PipelineProgress) {
        self.bar.set_message(progress_message(progress));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// One-line description of pipeline counters
pub fn progress_message(progress: &PipelineProgress) -> String {
    let mut message = format!(
        "{}/{} tasks settled, {} active",
        progress.finished, progress.enqueued, progress.active
    );
    if progress.pending_events > 0 {
        message.push_str(&format!(", {} notifications pending", progress.pending_events));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_message() {
        let progress = PipelineProgress {
            enqueued: 10,
            active: 3,
            finished: 7,
            pending_events: 0,
        };
        assert_eq!(progress_message(&progress), "7/10 tasks settled, 3 active");

        let progress = PipelineProgress {
            pending_events: 2,
            ..progress
        };
        assert!(progress_message(&progress).ends_with("2 notifications pending"));
    }

    #[test]
    fn test_hidden_spinner_accepts_updates() {
        let spinner = RunProgress::new(false);
        spinner.update(&PipelineProgress::default());
        spinner.finish();
    }
}
