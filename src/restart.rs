// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Process restart after a successful update.
//!
//! The updater never owns the process lifecycle. It only raises a restart
//! request through [`RestartSignal`], and the host decides when to act on it,
//! e.g., after closing its windows. [`relaunch`] is provided for hosts that
//! simply want to re-run themselves with their original arguments.

use std::{
    env,
    process::{exit, Command},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::info;

/// Receiver of restart requests.
pub trait RestartSignal {
    /// Ask host to restart the process.
    fn request_restart(&self);
}

/// Restart signal that records requests for the host to poll.
#[derive(Debug, Default, Clone)]
pub struct RestartFlag {
    requests: Arc<AtomicUsize>,
}

impl RestartFlag {
    /// Construct new restart flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a restart was requested.
    pub fn is_requested(&self) -> bool {
        self.requests() > 0
    }

    /// Number of restart requests received.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RestartSignal for RestartFlag {
    fn request_restart(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Re-run current executable with its original arguments, then terminate.
///
/// On Unix the current process image is replaced in place. Elsewhere a new
/// process is spawned and the current one exits.
///
/// # Errors
///
/// - Return [`std::io::Error`] if the current executable cannot be located or
///   started. Never returns otherwise.
pub fn relaunch() -> std::io::Result<()> {
    let exe = env::current_exe()?;
    let args = env::args_os().skip(1).collect::<Vec<_>>();
    info!("restart {:?}", exe.display());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        Err(Command::new(exe).args(args).exec())
    }

    #[cfg(not(unix))]
    {
        Command::new(exe).args(args).spawn()?;
        exit(0)
    }
}

/// Relaunch, or exit with failure if relaunching is impossible.
pub fn relaunch_or_exit() -> ! {
    if let Err(error) = relaunch() {
        tracing::error!("failed to restart: {error}");
    }

    exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn restart_flag_counts_requests() {
        let flag = RestartFlag::new();
        let signal = flag.clone();
        assert!(!flag.is_requested());

        signal.request_restart();
        assert!(flag.is_requested());
        assert_eq!(flag.requests(), 1);
    }
}
