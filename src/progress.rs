// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Download progress reporting.
//!
//! The archive download calls a [`ProgressReporter`] after every chunk it
//! writes out. Reporters only ever see monotonically non-decreasing byte
//! counts within one download. The total may be zero when the remote does not
//! announce a content length, in which case no percentage can be computed.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

/// Observer of download progress.
pub trait ProgressReporter {
    /// Receive a progress sample.
    fn on_sample(&mut self, downloaded: u64, total: u64);
}

/// Reporter that ignores every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_sample(&mut self, _downloaded: u64, _total: u64) {}
}

/// Reporter that logs progress every time another tenth of the download is
/// done.
#[derive(Debug, Default, Clone)]
pub struct LogProgress {
    last_decile: Option<u64>,
}

impl LogProgress {
    /// Construct new logging reporter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LogProgress {
    fn on_sample(&mut self, downloaded: u64, total: u64) {
        if total == 0 {
            return;
        }

        let decile = (downloaded.min(total) * 10) / total;
        if self.last_decile != Some(decile) {
            self.last_decile = Some(decile);
            info!("downloaded {downloaded} of {total} bytes");
        }
    }
}

/// Reporter that renders an indicatif progress bar.
///
/// Degrades to a spinner showing the raw byte count when the total size is
/// unknown.
#[derive(Debug, Clone)]
pub struct IndicatifProgress {
    bar: ProgressBar,
    styled: bool,
}

impl IndicatifProgress {
    /// Construct new progress bar reporter.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar, styled: false }
    }

    /// Finish progress bar with a final message.
    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    /// Stop progress bar where it is, leaving it on screen with a message.
    pub fn abandon(&self, message: impl Into<String>) {
        self.bar.abandon_with_message(message.into());
    }

    /// Stop progress bar and wipe it off the screen.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }

    fn style(&mut self, total: u64) -> Result<(), indicatif::style::TemplateError> {
        let style = if total == 0 {
            ProgressStyle::with_template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")?
        } else {
            ProgressStyle::with_template(
                "{elapsed_precise:.green}  {msg:<20}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
            )?
            .progress_chars("-Cco.")
        };

        self.bar.set_style(style);
        if total == 0 {
            self.bar.enable_steady_tick(Duration::from_millis(100));
        } else {
            self.bar.set_length(total);
        }
        self.styled = true;

        Ok(())
    }
}

impl ProgressReporter for IndicatifProgress {
    fn on_sample(&mut self, downloaded: u64, total: u64) {
        if !self.styled {
            // INVARIANT: A broken template only costs us the pretty bar.
            let _ = self.style(total);
        }

        self.bar.set_position(downloaded);
    }
}
