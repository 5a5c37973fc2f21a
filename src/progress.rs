use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Bar used for every long batch. Draws nothing when stderr is not a terminal.
pub fn progress_bar(len: usize, unit: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "[{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) [{{eta}}]",
                unit
            ))?
            .progress_chars("#>-"),
    );
    Ok(bar)
}
