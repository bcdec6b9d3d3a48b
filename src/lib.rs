// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Self-updater for the DiccioPynthon concept manager.
//!
//! The concept manager is distributed as a plain source tree. Keeping it up to
//! date means comparing the locally recorded __version token__ against the one
//! the project currently publishes, downloading a zip snapshot of the
//! published source tree, and overlaying it onto the installation directory.
//!
//! # Collaborators
//!
//! The updater does not own any window or process. It talks to its host
//! through three seams:
//!
//! 1. A confirmation callback that blocks until the user says yes or no.
//! 2. A [`ProgressReporter`] that receives byte progress of the download.
//! 3. A [`RestartSignal`] that gets raised once an update is in place.
//!
//! # See Also
//!
//! 1. [`UpdateOrchestrator`]
//! 2. [`install`] for overlay semantics and known limitations.

pub mod config;
pub mod install;
pub mod orchestrator;
pub mod path;
pub mod progress;
pub mod remote;
pub mod restart;
pub mod version;

pub use config::{MarkerFormat, UpdaterConfig};
pub use install::{ApplyReport, ArchiveInstaller, InstallError};
pub use orchestrator::{
    FailureReason, UpdateCheck, UpdateFailure, UpdateOrchestrator, UpdatePrompt, UpdateResult,
    UpdateState,
};
pub use progress::{IndicatifProgress, LogProgress, NoProgress, ProgressReporter};
pub use remote::{FetchError, HttpRemote, RemoteSource};
pub use restart::{RestartFlag, RestartSignal};
pub use version::{FileVersionStore, VersionStore, VersionToken};
