// src/fetch/progress.rs

//! Progress display for parallel artifact downloads

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";

/// Wrapper around indicatif's MultiProgress, one bar per artifact
///
/// When disabled every bar is hidden, so callers never branch on it.
pub struct DownloadProgress {
    multi: MultiProgress,
    enabled: bool,
}

impl DownloadProgress {
    pub fn new(enabled: bool) -> Self {
        let multi = if enabled {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self { multi, enabled }
    }

    /// Add a bar for one artifact; its length is set once the size is known
    pub fn add_download(&self, name: &str) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(0);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(name.to_string());
        self.multi.add(pb)
    }

    pub fn finish_download(pb: &ProgressBar, name: &str) {
        pb.finish_with_message(format!("{} [done]", name));
    }

    pub fn fail_download(pb: &ProgressBar, name: &str, error: &str) {
        pb.abandon_with_message(format!("{} [FAILED: {}]", name, error));
    }
}
