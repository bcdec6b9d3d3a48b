// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! End-to-end update attempts.
//!
//! An __update attempt__ walks the following state machine:
//!
//! ```text
//! Idle -> CheckingRemote -> AwaitingConfirmation -> Downloading -> Installing
//!      -> PersistingVersion -> RestartPending -> Done
//! ```
//!
//! Every state other than `Idle` can end in `Failed`, after which the
//! orchestrator is idle again and the user has to trigger a whole new attempt.
//! Nothing is ever retried automatically.
//!
//! # Inconsistency Window
//!
//! The version marker is persisted only after the package has been installed.
//! If persisting fails, the installation is already updated but still reports
//! the old version, so the next check prompts for the same update again.

use crate::{
    config::UpdaterConfig,
    install::{cleanup, ApplyReport, ArchiveInstaller, InstallError},
    progress::ProgressReporter,
    remote::{FetchError, HttpRemote, RemoteSource},
    restart::RestartSignal,
    version::{FileVersionStore, VersionStore, VersionToken},
};

use mkdirp::mkdirp;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

/// Step of an update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingRemote,
    AwaitingConfirmation,
    Downloading,
    Installing,
    PersistingVersion,
    RestartPending,
    Done,
    Failed(FailureReason),
}

/// Reason tag of a failed update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NetworkUnavailable,
    DownloadFailed,
    InstallFailed,
    VersionPersistFailed,
}

impl Display for FailureReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let tag = match self {
            Self::NetworkUnavailable => "network unavailable",
            Self::DownloadFailed => "download failed",
            Self::InstallFailed => "install failed",
            Self::VersionPersistFailed => "version persist failed",
        };
        fmt.write_str(tag)
    }
}

/// Versions offered to the user for confirmation.
#[derive(Debug, Clone, Copy)]
pub struct UpdatePrompt<'a> {
    /// Locally recorded version, if any.
    pub local: Option<&'a VersionToken>,

    /// Published version.
    pub remote: &'a VersionToken,
}

/// Result of comparing local and published versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub local: Option<VersionToken>,
    pub remote: VersionToken,
}

impl UpdateCheck {
    /// Local version matches published version.
    ///
    /// An unknown local version never matches.
    pub fn is_up_to_date(&self) -> bool {
        self.local.as_ref() == Some(&self.remote)
    }
}

/// Outcome of an update attempt.
#[derive(Debug)]
pub enum UpdateResult {
    /// Local version already matches published version.
    AlreadyUpToDate(VersionToken),

    /// User turned the update down.
    Declined,

    /// Update installed, version recorded, and restart requested.
    Applied {
        version: VersionToken,
        report: ApplyReport,
    },

    /// Attempt failed.
    Failed(UpdateFailure),
}

/// Why an update attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum UpdateFailure {
    /// Published version cannot be fetched.
    #[error("cannot check for updates")]
    NetworkUnavailable(#[source] FetchError),

    /// Staging area for the download cannot be prepared.
    #[error("cannot prepare staging area at {:?}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Published archive cannot be downloaded.
    #[error("cannot download update")]
    DownloadFailed(#[source] FetchError),

    /// Downloaded package cannot be installed.
    #[error("cannot install update")]
    InstallFailed(#[source] InstallError),

    /// Package installed, but new version cannot be recorded.
    #[error("update installed, but version {version} cannot be recorded")]
    VersionPersistFailed {
        version: VersionToken,
        #[source]
        source: std::io::Error,
    },
}

impl UpdateFailure {
    /// Reason tag of failure.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::NetworkUnavailable(_) => FailureReason::NetworkUnavailable,
            Self::Staging { .. } | Self::DownloadFailed(_) => FailureReason::DownloadFailed,
            Self::InstallFailed(_) => FailureReason::InstallFailed,
            Self::VersionPersistFailed { .. } => FailureReason::VersionPersistFailed,
        }
    }
}

/// Drive update attempts.
///
/// # Invariant
///
/// - At most one attempt runs at a time. [`check_and_apply`] borrows the
///   orchestrator mutably for the whole attempt.
/// - After an applied update the version store holds the published version
///   fetched at the start of that same attempt.
///
/// [`check_and_apply`]: UpdateOrchestrator::check_and_apply
#[derive(Debug)]
pub struct UpdateOrchestrator<R, S, X>
where
    R: RemoteSource,
    S: VersionStore,
    X: RestartSignal,
{
    remote: R,
    store: S,
    restart: X,
    installer: ArchiveInstaller,
    install_root: PathBuf,
    staging_dir: PathBuf,
    transitions: Vec<UpdateState>,
}

impl<R, S, X> UpdateOrchestrator<R, S, X>
where
    R: RemoteSource,
    S: VersionStore,
    X: RestartSignal,
{
    /// Construct new orchestrator for an installation root.
    ///
    /// Staging directories are allocated in the system temporary directory
    /// unless [`with_staging_dir`](Self::with_staging_dir) says otherwise.
    pub fn new(remote: R, store: S, restart: X, install_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            store,
            restart,
            installer: ArchiveInstaller::new(),
            install_root: install_root.into(),
            staging_dir: std::env::temp_dir(),
            transitions: Vec::new(),
        }
    }

    /// Use a specific archive installer.
    pub fn with_installer(mut self, installer: ArchiveInstaller) -> Self {
        self.installer = installer;
        self
    }

    /// Allocate staging directories under a specific directory.
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Current state.
    pub fn state(&self) -> UpdateState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(UpdateState::Idle)
    }

    /// States entered during the most recent attempt, in order.
    pub fn transitions(&self) -> &[UpdateState] {
        self.transitions.as_slice()
    }

    /// Locally recorded version.
    pub fn local_version(&self) -> Option<VersionToken> {
        self.store.read()
    }

    /// Compare local and published versions without installing anything.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError`] if published version cannot be fetched.
    #[instrument(skip(self), level = "debug")]
    pub fn check(&self) -> Result<UpdateCheck, FetchError> {
        let remote = self.remote.fetch_version()?;
        let local = self.store.read();

        Ok(UpdateCheck { local, remote })
    }

    /// Run one full update attempt.
    ///
    /// The `confirm` callback is called synchronously once the published
    /// version is known to differ from the local one, and may block for as
    /// long as it needs to. Declining is always safe, because nothing has been
    /// touched yet at that point.
    #[instrument(skip(self, confirm, progress), level = "debug")]
    pub fn check_and_apply<F>(
        &mut self,
        confirm: F,
        progress: &mut dyn ProgressReporter,
    ) -> UpdateResult
    where
        F: FnOnce(&UpdatePrompt<'_>) -> bool,
    {
        self.transitions.clear();

        self.enter(UpdateState::CheckingRemote);
        let check = match self.check() {
            Ok(check) => check,
            Err(err) => return self.fail(UpdateFailure::NetworkUnavailable(err)),
        };

        if check.is_up_to_date() {
            info!("already up to date at version {}", check.remote);
            self.enter(UpdateState::Done);
            return UpdateResult::AlreadyUpToDate(check.remote);
        }

        match &check.local {
            Some(local) => info!("update available: {local} -> {}", check.remote),
            None => info!("update available: unknown -> {}", check.remote),
        }

        self.enter(UpdateState::AwaitingConfirmation);
        let prompt = UpdatePrompt {
            local: check.local.as_ref(),
            remote: &check.remote,
        };
        if !confirm(&prompt) {
            info!("update to {} declined", check.remote);
            self.enter(UpdateState::Idle);
            return UpdateResult::Declined;
        }

        self.enter(UpdateState::Downloading);
        let staging = match self.allocate_staging() {
            Ok(staging) => staging,
            Err(failure) => return self.fail(failure),
        };
        let archive = staging.path().join("package.zip");
        let extracted = staging.path().join("extracted");

        if let Err(err) = self.download(&archive, progress) {
            discard(staging, &archive, &extracted);
            return self.fail(err);
        }

        self.enter(UpdateState::Installing);
        let report = match self
            .installer
            .extract(&archive, &extracted)
            .and_then(|_| self.installer.apply(&extracted, &self.install_root))
        {
            Ok(report) => report,
            Err(err) => {
                discard(staging, &archive, &extracted);
                return self.fail(UpdateFailure::InstallFailed(err));
            }
        };

        self.enter(UpdateState::PersistingVersion);
        discard(staging, &archive, &extracted);
        if let Err(err) = self.store.write(&check.remote) {
            return self.fail(UpdateFailure::VersionPersistFailed {
                version: check.remote,
                source: err,
            });
        }

        self.enter(UpdateState::RestartPending);
        info!("updated to version {}, restart requested", check.remote);
        self.restart.request_restart();

        self.enter(UpdateState::Done);
        UpdateResult::Applied {
            version: check.remote,
            report,
        }
    }

    fn enter(&mut self, state: UpdateState) {
        debug!("update state {:?} -> {state:?}", self.state());
        self.transitions.push(state);
    }

    fn fail(&mut self, failure: UpdateFailure) -> UpdateResult {
        error!("{}: {failure}", failure.reason());
        self.enter(UpdateState::Failed(failure.reason()));
        self.enter(UpdateState::Idle);
        UpdateResult::Failed(failure)
    }

    fn allocate_staging(&self) -> Result<TempDir, UpdateFailure> {
        let staging_error = |source: std::io::Error| UpdateFailure::Staging {
            path: self.staging_dir.clone(),
            source,
        };

        mkdirp(&self.staging_dir).map_err(staging_error)?;
        let staging = tempfile::Builder::new()
            .prefix("diccio-update-")
            .tempdir_in(&self.staging_dir)
            .map_err(staging_error)?;
        debug!("staging update in {:?}", staging.path().display());

        Ok(staging)
    }

    fn download(
        &self,
        archive: &Path,
        progress: &mut dyn ProgressReporter,
    ) -> Result<(), UpdateFailure> {
        // INVARIANT: Only a fully downloaded archive carries the final name.
        let partial = archive.with_extension("zip.part");
        let staging_error = |source: std::io::Error| UpdateFailure::Staging {
            path: partial.clone(),
            source,
        };

        let mut file = File::create(&partial).map_err(staging_error)?;
        let size = self
            .remote
            .fetch_archive(&mut file, progress)
            .map_err(UpdateFailure::DownloadFailed)?;
        file.sync_all()
            .map_err(|err| UpdateFailure::DownloadFailed(FetchError::Sink(err)))?;
        drop(file);

        fs::rename(&partial, archive).map_err(staging_error)?;
        info!("downloaded {size} bytes");

        Ok(())
    }
}

impl<X> UpdateOrchestrator<HttpRemote, FileVersionStore, X>
where
    X: RestartSignal,
{
    /// Construct orchestrator talking HTTP to the remote, and keeping the
    /// version marker inside the installation root, as configured.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Client`] if HTTP client cannot be built.
    pub fn from_config(config: &UpdaterConfig, restart: X) -> Result<Self, FetchError> {
        let remote = HttpRemote::new(config.remote.clone())?;
        let store = FileVersionStore::new(config.install.version_path());
        let installer = ArchiveInstaller::with_exclude_rules(
            config.install.exclude.iter().flatten().cloned(),
        );

        Ok(
            Self::new(remote, store, restart, config.install.root.as_path())
                .with_installer(installer)
                .with_staging_dir(config.install.staging_dir()),
        )
    }
}

fn discard(staging: TempDir, archive: &Path, extracted: &Path) {
    cleanup([
        archive.with_extension("zip.part").as_path(),
        archive,
        extracted,
    ]);

    let path = staging.path().to_path_buf();
    if let Err(err) = staging.close() {
        warn!("failed to remove staging directory {:?}: {err}", path.display());
    }
}
