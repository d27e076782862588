//! Progress feedback utilities for CLI commands
//!
//! Provides spinners and byte progress bars for long-running operations.
//! All progress output is suppressed when --quiet or --json is set.

use causeway_core::StreamProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or(fallback)
}

/// Create a spinner with a message
pub fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}", ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Create a progress bar measured in bytes
pub fn bytes_bar(total: u64, message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new(total);
    pb.set_style(
        style(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ProgressStyle::default_bar(),
        )
        .progress_chars("█▓░"),
    );
    pb.set_message(message.to_string());
    Some(pb)
}

/// Advance a byte bar from a streaming parser's progress
pub fn update_stream(pb: Option<&ProgressBar>, progress: &StreamProgress) {
    if let Some(pb) = pb {
        pb.set_position(progress.bytes_read);
        if progress.skipped_so_far > 0 {
            pb.set_message(format!(
                "{} records ({} skipped)",
                progress.records_so_far, progress.skipped_so_far
            ));
        } else {
            pb.set_message(format!("{} records", progress.records_so_far));
        }
    }
}

/// Finish a spinner with a success message
pub fn finish_spinner(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{prefix:.green} {msg}", ProgressStyle::default_spinner()));
        pb.set_prefix("✓");
        pb.finish_with_message(message.to_string());
    }
}

/// Finish a spinner with a warning message
pub fn finish_spinner_warn(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.set_style(style("{prefix:.yellow} {msg}", ProgressStyle::default_spinner()));
        pb.set_prefix("!");
        pb.finish_with_message(message.to_string());
    }
}

/// Finish a progress bar
pub fn finish_progress(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_quiet_returns_none() {
        let pb = spinner("test", true);
        assert!(pb.is_none());
    }

    #[test]
    fn test_spinner_not_quiet_returns_some() {
        let pb = spinner("test", false);
        assert!(pb.is_some());
        if let Some(pb) = pb {
            pb.finish();
        }
    }

    #[test]
    fn test_bytes_bar_tracks_stream_progress() {
        assert!(bytes_bar(100, "test", true).is_none());

        let pb = bytes_bar(100, "test", false).unwrap();
        update_stream(
            Some(&pb),
            &StreamProgress {
                chunk_index: 1,
                records_so_far: 10,
                skipped_so_far: 1,
                bytes_read: 42,
            },
        );
        assert_eq!(pb.position(), 42);
        assert_eq!(pb.message(), "10 records (1 skipped)");
        finish_progress(Some(pb));
    }

    #[test]
    fn test_finish_handles_none() {
        // Should not panic
        finish_spinner(None, "done");
        finish_spinner_warn(None, "warning");
        finish_progress(None);
        update_stream(None, &StreamProgress::default());
    }
}
