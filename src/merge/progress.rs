//! Running packet counter on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Spinner showing how many packets have been merged.
#[derive(Debug)]
pub struct MergeProgress {
    bar: ProgressBar,
}

impl MergeProgress {
    /// Create a spinner, or a hidden one when `visible` is false.
    pub fn new(visible: bool) -> Self {
        let bar = if visible {
            let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{elapsed_precise}] {pos} packets merged ({per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
            );
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// Record the running total after a packet is written.
    pub fn update(&self, emitted: u64) {
        self.bar.set_position(emitted);
    }

    /// Leave the final count on screen.
    pub fn finish(&self, emitted: u64) {
        self.bar.set_position(emitted);
        self.bar.finish();
    }

    /// Clear the spinner without a final message.
    pub fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_tracks_position() {
        let progress = MergeProgress::new(false);
        progress.update(3);
        progress.update(4);
        assert_eq!(progress.bar.position(), 4);
        progress.finish(4);
        assert!(progress.bar.is_finished());
    }
}
