//! Row-level progress display for coding sessions

use crate::io::configuration::PROGRESS_BAR_WIDTH;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::LazyLock;

static ROW_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template(&format!(
            "{{prefix:>8}} [{{bar:{PROGRESS_BAR_WIDTH}.cyan/blue}}] {{pos}}/{{len}} rows {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

/// Progress of one encode, decode or prediction pass, counted in coded rows
#[derive(Debug, Clone)]
pub struct CodingProgress {
    bar: ProgressBar,
}

impl CodingProgress {
    /// Visible progress bar
    pub fn visible() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(ROW_STYLE.clone());
        Self { bar }
    }

    /// Progress that draws nothing
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Start a pass over `rows` rows
    pub fn start(&self, label: &'static str, rows: u64) {
        self.bar.reset();
        self.bar.set_length(rows);
        self.bar.set_position(0);
        self.bar.set_prefix(label);
    }

    /// Announce the plane being coded
    pub fn set_plane(&self, plane: usize, planes: usize) {
        self.bar.set_message(format!("(plane {}/{planes})", plane + 1));
    }

    /// One more row coded
    pub fn advance(&self) {
        self.bar.inc(1);
    }

    /// Rows coded so far
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// End the pass and clear the bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for CodingProgress {
    fn default() -> Self {
        Self::hidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_counts_rows() {
        let progress = CodingProgress::hidden();
        progress.start("encode", 3);
        progress.set_plane(0, 1);
        progress.advance();
        progress.advance();
        assert_eq!(progress.position(), 2);
        progress.finish();
    }
}
