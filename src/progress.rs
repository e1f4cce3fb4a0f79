//! Transfer progress display
//!
//! One bar per operation, advanced once per finished transfer unit. When
//! disabled the bar is hidden and every call is a cheap no-op.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

#[derive(Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(enabled: bool, operation: &str) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(operation.to_string());
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self::new(false, "")
    }

    pub fn inc_total(&self, n: u64) {
        self.bar.inc_length(n);
    }

    pub fn increment(&self) {
        self.bar.inc(1);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, succeeded: usize, failed: usize) {
        self.bar
            .finish_with_message(format!("Completed: {succeeded} succeeded, {failed} failed"));
    }
}
