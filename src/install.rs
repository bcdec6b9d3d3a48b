// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive extraction and overlay installation.
//!
//! A downloaded __package__ is a zip archive of the project's source tree with
//! exactly one top-level directory, e.g., `DiccioPynthon-main/`. Installing a
//! package means extracting it into a staging directory, and then moving every
//! entry directly under that top-level directory into the installation root.
//!
//! # Overlay Semantics
//!
//! Installation is an __overlay__, not a mirror. A package entry replaces a
//! same-named entry in the installation root in full: directories are
//! recursively removed before the new one is moved in, and files are
//! overwritten. Entries that only exist in the installation root are never
//! touched. There is no manifest of which files belong to the application,
//! so an optional set of gitignore style exclude rules can protect user data
//! that lives next to the application, e.g., a local database.
//!
//! Exclude rules apply at every depth. When any rule is configured, package
//! directories are merged into their installed counterparts instead of
//! replacing them wholesale. Excluded paths are neither installed nor
//! removed, while everything else under a replaced directory still ends up
//! mirroring the package.
//!
//! # Known Limitations
//!
//! The layout of a package is fully checked before the installation root is
//! touched. However, once entries start getting replaced there is no rollback.
//! If replacing a later entry fails, earlier entries stay replaced, leaving a
//! partially applied package behind.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use mkdirp::mkdirp;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};
use zip::{result::ZipError, ZipArchive};

/// Extract and overlay update packages.
#[derive(Debug, Default, Clone)]
pub struct ArchiveInstaller {
    exclude: Vec<String>,
}

impl ArchiveInstaller {
    /// Construct new installer that installs every package entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct new installer that skips package entries matching any of the
    /// given gitignore style rules.
    pub fn with_exclude_rules(rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            exclude: rules.into_iter().map(Into::into).collect(),
        }
    }

    /// Extract zip archive into destination directory.
    ///
    /// Destination directory is created if missing. The archive is parsed
    /// before anything is created, so an unreadable archive leaves nothing
    /// behind. Entries whose names would escape the destination are skipped.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::CorruptArchive`] if the archive or one of its
    ///   entries cannot be decoded.
    /// - Return [`InstallError::Filesystem`] if extracted content cannot be
    ///   written out.
    #[instrument(skip(self, archive, dest), level = "debug")]
    pub fn extract(&self, archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
        let (archive, dest) = (archive.as_ref(), dest.as_ref());
        info!("extract {:?} into {:?}", archive.display(), dest.display());

        let file = File::open(archive).map_err(|err| fs_error(archive, err))?;
        let mut zip = ZipArchive::new(file).map_err(|err| corrupt(archive, err))?;
        mkdirp(dest).map_err(|err| fs_error(dest, err))?;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|err| corrupt(archive, err))?;
            let Some(relative) = entry.enclosed_name() else {
                warn!("skip archive entry with unsafe name {:?}", entry.name());
                continue;
            };
            let outpath = dest.join(relative);

            if entry.is_dir() {
                mkdirp(&outpath).map_err(|err| fs_error(&outpath, err))?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                mkdirp(parent).map_err(|err| fs_error(parent, err))?;
            }

            // INVARIANT: Decode the whole entry before writing anything, so
            // checksum failures are reported as corruption. Declared sizes are
            // untrusted, so the buffer only grows with bytes actually decoded.
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|err| corrupt(archive, ZipError::Io(err)))?;
            if data.len() as u64 != entry.size() {
                return Err(corrupt(
                    archive,
                    ZipError::Io(std::io::Error::new(
                        ErrorKind::InvalidData,
                        format!(
                            "entry {:?} declares {} bytes but holds {}",
                            entry.name(),
                            entry.size(),
                            data.len()
                        ),
                    )),
                ));
            }
            fs::write(&outpath, &data).map_err(|err| fs_error(&outpath, err))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o777))
                        .map_err(|err| fs_error(&outpath, err))?;
                }
            }
        }

        debug!("extracted {} entries", zip.len());
        Ok(())
    }

    /// Overlay extracted package onto installation root.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::AmbiguousLayout`] if the extraction does not
    ///   hold exactly one top-level directory. Nothing is touched.
    /// - Return [`InstallError::MissingInstallRoot`] if the installation root
    ///   is not a directory. Nothing is touched.
    /// - Return [`InstallError::ExcludeRule`] if exclude rules are invalid.
    ///   Nothing is touched.
    /// - Return [`InstallError::Filesystem`] if an entry cannot be replaced.
    ///   Entries replaced before the failure stay replaced.
    #[instrument(skip(self, extracted, install_root), level = "debug")]
    pub fn apply(
        &self,
        extracted: impl AsRef<Path>,
        install_root: impl AsRef<Path>,
    ) -> Result<ApplyReport> {
        let (extracted, install_root) = (extracted.as_ref(), install_root.as_ref());
        let package_root = package_root(extracted)?;

        if !install_root.is_dir() {
            return Err(InstallError::MissingInstallRoot {
                path: install_root.to_path_buf(),
            });
        }

        let matcher = self.exclude_matcher(install_root)?;
        let mut entries = fs::read_dir(&package_root)
            .map_err(|err| fs_error(&package_root, err))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| fs_error(&package_root, err))?;
        entries.sort_by_key(|entry| entry.file_name());

        info!(
            "install {} entries from {:?} into {:?}",
            entries.len(),
            package_root.display(),
            install_root.display()
        );

        let mut report = ApplyReport::default();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let source = entry.path();
            let target = install_root.join(entry.file_name());

            if matcher.matched(&target, source.is_dir()).is_ignore() {
                info!("skip excluded entry {name:?}");
                report.skipped.push(name);
                continue;
            }

            let existed = exists(&target)?;
            overlay_entry(&matcher, install_root, &source, &target, &mut report.skipped)?;

            if existed {
                debug!("replaced {name:?}");
                report.replaced.push(name);
            } else {
                debug!("added {name:?}");
                report.added.push(name);
            }
        }

        Ok(report)
    }

    fn exclude_matcher(&self, install_root: &Path) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new(install_root);
        for rule in &self.exclude {
            builder.add_line(None, rule)?;
        }

        Ok(builder.build()?)
    }
}

/// Outcome of overlaying a package.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entries that replaced an existing entry.
    pub replaced: Vec<String>,

    /// Entries that did not exist before.
    pub added: Vec<String>,

    /// Entries left out because of exclude rules, relative to the
    /// installation root with `/` separators.
    pub skipped: Vec<String>,
}

/// Locate the single top-level directory of an extracted package.
///
/// # Errors
///
/// - Return [`InstallError::AmbiguousLayout`] if there are zero entries, more
///   than one entry, or a single entry that is not a directory.
/// - Return [`InstallError::Filesystem`] if the extraction cannot be listed.
pub fn package_root(extracted: impl AsRef<Path>) -> Result<PathBuf> {
    let extracted = extracted.as_ref();
    let entries = sorted_entries(extracted)?;

    match entries.as_slice() {
        [root] if root.is_dir() => Ok(root.clone()),
        _ => Err(InstallError::AmbiguousLayout {
            extracted: extracted.to_path_buf(),
            entries: entries
                .iter()
                .filter_map(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
        }),
    }
}

/// Remove temporary update files.
///
/// Best-effort: missing paths are ignored, and failures are logged instead of
/// being returned.
pub fn cleanup(paths: impl IntoIterator<Item = impl AsRef<Path>>) {
    for path in paths {
        let path = path.as_ref();
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => debug!("removed {:?}", path.display()),
            Err(err) => warn!("failed to clean up {:?}: {err}", path.display()),
        }
    }
}

fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(fs_error(path, err)),
    }
}

/// Put package entry in place of installed entry, honoring exclude rules
/// below the entry.
fn overlay_entry(
    matcher: &Gitignore,
    install_root: &Path,
    source: &Path,
    target: &Path,
    skipped: &mut Vec<String>,
) -> Result<()> {
    if matcher.is_empty() {
        remove_existing(target)?;
        return move_entry(source, target);
    }

    if source.is_dir() && target.is_dir() {
        return merge_dir(matcher, install_root, source, target, skipped);
    }

    prune(matcher, target)?;
    move_entry(source, target)
}

fn merge_dir(
    matcher: &Gitignore,
    install_root: &Path,
    source: &Path,
    target: &Path,
    skipped: &mut Vec<String>,
) -> Result<()> {
    let incoming = sorted_entries(source)?;
    let names = incoming
        .iter()
        .filter_map(|path| path.file_name())
        .collect::<HashSet<_>>();

    for installed in sorted_entries(target)? {
        let stale = installed
            .file_name()
            .is_some_and(|name| !names.contains(name));
        if stale {
            prune(matcher, &installed)?;
        }
    }

    for entry in &incoming {
        let Some(name) = entry.file_name() else {
            continue;
        };
        let dest = target.join(name);

        if matcher.matched(&dest, entry.is_dir()).is_ignore() {
            let relative = relative_name(install_root, &dest);
            info!("skip excluded entry {relative:?}");
            skipped.push(relative);
            continue;
        }

        overlay_entry(matcher, install_root, entry, &dest, skipped)?;
    }

    Ok(())
}

/// Remove installed entry, except for anything at or below it that matches
/// an exclude rule.
fn prune(matcher: &Gitignore, path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(fs_error(path, err)),
    };

    if matcher.matched(path, meta.is_dir()).is_ignore() {
        debug!("keep excluded {:?}", path.display());
        return Ok(());
    }

    if !meta.is_dir() {
        return fs::remove_file(path).map_err(|err| fs_error(path, err));
    }

    for entry in sorted_entries(path)? {
        prune(matcher, &entry)?;
    }

    // INVARIANT: A directory still holding excluded entries stays.
    if sorted_entries(path)?.is_empty() {
        fs::remove_dir(path).map_err(|err| fs_error(path, err))?;
    }

    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| fs_error(dir, err))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| fs_error(dir, err))?;
    entries.sort();

    Ok(entries)
}

fn relative_name(install_root: &Path, path: &Path) -> String {
    path.strip_prefix(install_root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn remove_existing(target: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(fs_error(target, err)),
    };

    if meta.is_dir() {
        fs::remove_dir_all(target).map_err(|err| fs_error(target, err))?;
    } else {
        fs::remove_file(target).map_err(|err| fs_error(target, err))?;
    }

    Ok(())
}

fn move_entry(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }

    // Staging may live on another file system, so fall back to a deep copy.
    debug!("rename failed, copy {:?} instead", source.display());
    copy_recursive(source, target)
}

fn copy_recursive(source: &Path, target: &Path) -> Result<()> {
    if !source.is_dir() {
        fs::copy(source, target).map_err(|err| fs_error(target, err))?;
        return Ok(());
    }

    mkdirp(target).map_err(|err| fs_error(target, err))?;
    for entry in fs::read_dir(source).map_err(|err| fs_error(source, err))? {
        let entry = entry.map_err(|err| fs_error(source, err))?;
        copy_recursive(&entry.path(), &target.join(entry.file_name()))?;
    }

    Ok(())
}

fn fs_error(path: impl Into<PathBuf>, source: std::io::Error) -> InstallError {
    InstallError::Filesystem {
        path: path.into(),
        source,
    }
}

fn corrupt(archive: impl Into<PathBuf>, source: ZipError) -> InstallError {
    InstallError::CorruptArchive {
        archive: archive.into(),
        source,
    }
}

/// Installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Archive content cannot be decoded.
    #[error("archive {:?} is corrupt", archive.display())]
    CorruptArchive {
        archive: PathBuf,
        #[source]
        source: ZipError,
    },

    /// Extracted archive does not hold exactly one top-level directory.
    #[error(
        "expected exactly one top-level directory in {:?}, found {entries:?}",
        extracted.display()
    )]
    AmbiguousLayout {
        extracted: PathBuf,
        entries: Vec<String>,
    },

    /// Installation root is not a directory.
    #[error("installation root {:?} is not a directory", path.display())]
    MissingInstallRoot { path: PathBuf },

    /// Exclude rules cannot be compiled.
    #[error(transparent)]
    ExcludeRule(#[from] ignore::Error),

    /// File system operation fails.
    #[error("file system operation failed at {:?}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
