// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version tokens and local version marker storage.
//!
//! A __version token__ is an opaque string identifying a published revision of
//! the application. Depending on how the project is published this is either
//! a commit hash or a semantic version string. The updater never interprets
//! tokens; two tokens are the same revision if and only if they are equal
//! byte for byte.
//!
//! The installed revision is recorded in a plain text __version marker__ file
//! that lives inside the installation root. A missing or blank marker simply
//! means that no local version is known, which always forces the update path.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// Opaque revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Construct version token from raw text.
    ///
    /// Surrounding whitespace is trimmed. Returns [`None`] if nothing is left
    /// after trimming.
    pub fn parse(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }

        Some(Self(trimmed.to_owned()))
    }

    /// Treat version token as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for VersionToken {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Storage of the local version marker.
pub trait VersionStore {
    /// Read locally recorded version, if any.
    fn read(&self) -> Option<VersionToken>;

    /// Replace locally recorded version.
    fn write(&self, token: &VersionToken) -> std::io::Result<()>;
}

/// Version marker kept as a plain text file.
///
/// # Invariant
///
/// - The marker only ever holds a complete token. Writes go to a sibling
///   temporary file that is renamed over the marker.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    /// Construct new file backed version store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of version marker file.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl VersionStore for FileVersionStore {
    #[instrument(skip(self), level = "debug")]
    fn read(&self) -> Option<VersionToken> {
        match read_to_string(&self.path) {
            Ok(content) => VersionToken::parse(content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no version marker at {:?}", self.path.display());
                None
            }
            Err(err) => {
                warn!(
                    "cannot read version marker at {:?}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn write(&self, token: &VersionToken) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = NamedTempFile::new_in(parent)?;
        staged.write_all(token.as_str().as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|err| err.error)?;
        debug!("recorded version {token} at {:?}", self.path.display());

        Ok(())
    }
}
