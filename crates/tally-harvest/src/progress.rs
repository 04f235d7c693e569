//! Console progress for harvest runs

use indicatif::{ProgressBar, ProgressStyle};

const BATCH_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} keys ({eta})";

/// Bar counting processed keys across batches
pub fn create_run_progress(total_keys: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total_keys);
    let style = ProgressStyle::default_bar()
        .template(BATCH_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Batch status line shown under the bar
pub fn batch_message(index: usize, total: usize, failed: usize) -> String {
    if failed == 0 {
        format!("batch {}/{}", index, total)
    } else {
        format!("batch {}/{} ({} failed)", index, total, failed)
    }
}
