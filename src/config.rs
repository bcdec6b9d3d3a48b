// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the updater configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # General Layout
//!
//! The configuration file is composed of two tables: `remote` and `install`.
//! The remote table describes where the published version marker and source
//! archive live. The install table describes the installation root that gets
//! overlaid, and where the local version marker is kept inside of it. Every
//! field has a default, so an empty file (or no file at all) is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Default URL of the published version marker.
pub const DEFAULT_VERSION_URL: &str =
    "https://raw.githubusercontent.com/sapoclay/DiccioPynthon/main/version.txt";

/// Default URL of the published source archive.
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/sapoclay/DiccioPynthon/archive/refs/heads/main.zip";

/// Updater configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct UpdaterConfig {
    /// Where to fetch updates from.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Where to install updates to.
    #[serde(default)]
    pub install: InstallSettings,
}

impl FromStr for UpdaterConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: UpdaterConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        config.install.root = InstallRoot::new(expand(config.install.root.as_path())?);
        config.install.staging_dir = config
            .install
            .staging_dir
            .map(|path| expand(&path))
            .transpose()?;

        Ok(config)
    }
}

impl Display for UpdaterConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Remote settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// URL whose response body is the published version marker.
    pub version_url: String,

    /// URL of zip archive holding the latest source tree.
    pub archive_url: String,

    /// How to interpret the version marker response body.
    pub marker: MarkerFormat,

    /// User agent sent with every request.
    pub user_agent: String,

    /// Timeout in seconds for connecting and receiving response headers, and
    /// for each individual read of a response body. A slow archive download
    /// that keeps making progress is never cut off.
    pub timeout_secs: u64,
}

impl RemoteSettings {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            version_url: DEFAULT_VERSION_URL.into(),
            archive_url: DEFAULT_ARCHIVE_URL.into(),
            marker: MarkerFormat::default(),
            user_agent: format!("diccio-updater/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

/// Format of the remote version marker.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerFormat {
    /// Whole response body is the version token.
    #[default]
    Plain,

    /// Response body is a GitHub commit object whose `sha` is the token.
    GithubCommit,
}

/// Installation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Directory tree that updates get overlaid onto.
    pub root: InstallRoot,

    /// Local version marker, relative to installation root.
    pub version_file: PathBuf,

    /// Directory to allocate per-attempt staging directories in.
    pub staging_dir: Option<PathBuf>,

    /// Gitignore style rules for package entries that must never be
    /// installed.
    pub exclude: Option<Vec<String>>,
}

impl InstallSettings {
    /// Absolute or root-relative path of the local version marker.
    pub fn version_path(&self) -> PathBuf {
        self.root.as_path().join(&self.version_file)
    }

    /// Directory to create staging directories in.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            root: InstallRoot::default(),
            version_file: PathBuf::from("version.txt"),
            staging_dir: None,
            exclude: None,
        }
    }
}

/// Path acting as the installation root.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct InstallRoot(PathBuf);

impl InstallRoot {
    /// Construct new installation root.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat installation root as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Default for InstallRoot {
    fn default() -> Self {
        Self(PathBuf::from("."))
    }
}

impl Display for InstallRoot {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
