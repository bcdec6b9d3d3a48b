// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{snapshot, zip_bytes, HttpFixture, Route, Samples};

use anyhow::Result;
use diccio_updater::{FailureReason, RestartFlag, UpdateOrchestrator, UpdateResult, UpdaterConfig};
use pretty_assertions::assert_eq;
use std::{fs, path::Path};
use tempfile::TempDir;

struct Installation {
    root: TempDir,
    staging: TempDir,
}

impl Installation {
    fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("version.txt"), "1.0.0")?;
        fs::write(root.path().join("main.py"), "print('old')")?;
        fs::write(root.path().join("conceptos.db"), "user data")?;

        Ok(Self {
            root,
            staging: tempfile::tempdir()?,
        })
    }

    fn config(&self, server: &HttpFixture, extra: &str) -> Result<UpdaterConfig> {
        let config = format!(
            r#"
            [remote]
            version_url = '{}'
            archive_url = '{}'
            {extra}

            [install]
            root = '{}'
            staging_dir = '{}'
            "#,
            server.url("/version.txt"),
            server.url("/main.zip"),
            self.root.path().display(),
            self.staging.path().display(),
        );

        Ok(config.parse()?)
    }

    fn read(&self, name: impl AsRef<Path>) -> Result<String> {
        Ok(fs::read_to_string(self.root.path().join(name))?)
    }

    fn staging_is_empty(&self) -> Result<bool> {
        Ok(fs::read_dir(self.staging.path())?.next().is_none())
    }
}

#[test]
fn update_applies_published_package() -> Result<()> {
    let archive = zip_bytes(&[
        ("project-main/", ""),
        ("project-main/version.txt", "1.0.1"),
        ("project-main/main.py", "print('new')"),
        ("project-main/app/", ""),
        ("project-main/app/menu.py", "menu"),
    ])?;
    let archive_len = archive.len() as u64;
    let server = HttpFixture::serve([
        ("/version.txt", Route::Body(b"1.0.1\n".to_vec())),
        ("/main.zip", Route::Body(archive)),
    ])?;
    let install = Installation::new()?;
    let restart = RestartFlag::new();

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, restart.clone())?;
    let mut samples = Samples::default();
    let result = orchestrator.check_and_apply(|_| true, &mut samples);

    assert!(matches!(
        result,
        UpdateResult::Applied { ref version, .. } if version.as_str() == "1.0.1"
    ));
    assert_eq!(install.read("version.txt")?, "1.0.1");
    assert_eq!(install.read("main.py")?, "print('new')");
    assert_eq!(install.read("app/menu.py")?, "menu");
    assert_eq!(install.read("conceptos.db")?, "user data");
    assert_eq!(restart.requests(), 1);
    assert!(install.staging_is_empty()?);

    assert!(!samples.0.is_empty());
    assert!(samples.0.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!(samples.0.last(), Some(&(archive_len, archive_len)));

    Ok(())
}

#[test]
fn update_skips_download_when_up_to_date() -> Result<()> {
    let server = HttpFixture::serve([
        ("/version.txt", Route::Body(b"1.0.0".to_vec())),
        ("/main.zip", Route::Status(500)),
    ])?;
    let install = Installation::new()?;
    let before = snapshot(install.root.path())?;

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, RestartFlag::new())?;
    let result =
        orchestrator.check_and_apply(|_| panic!("must not prompt"), &mut Samples::default());

    assert!(matches!(result, UpdateResult::AlreadyUpToDate(_)));
    assert_eq!(server.hits("/version.txt"), 1);
    assert_eq!(server.hits("/main.zip"), 0);
    assert_eq!(snapshot(install.root.path())?, before);

    Ok(())
}

#[test]
fn declined_update_leaves_installation_alone() -> Result<()> {
    let server = HttpFixture::serve([
        ("/version.txt", Route::Body(b"1.0.1".to_vec())),
        ("/main.zip", Route::Body(zip_bytes(&[("p/main.py", "new")])?)),
    ])?;
    let install = Installation::new()?;
    let before = snapshot(install.root.path())?;

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, RestartFlag::new())?;
    let result = orchestrator.check_and_apply(|_| false, &mut Samples::default());

    assert!(matches!(result, UpdateResult::Declined));
    assert_eq!(server.hits("/main.zip"), 0);
    assert_eq!(snapshot(install.root.path())?, before);

    Ok(())
}

#[test]
fn failing_version_endpoint_is_network_unavailable() -> Result<()> {
    let server = HttpFixture::serve([("/version.txt", Route::Status(503))])?;
    let install = Installation::new()?;

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, RestartFlag::new())?;
    let result = orchestrator.check_and_apply(|_| true, &mut Samples::default());

    match result {
        UpdateResult::Failed(failure) => {
            assert_eq!(failure.reason(), FailureReason::NetworkUnavailable)
        }
        other => panic!("expected failure, got {other:?}"),
    }

    Ok(())
}

#[test]
fn missing_archive_is_download_failure() -> Result<()> {
    let server = HttpFixture::serve([("/version.txt", Route::Body(b"1.0.1".to_vec()))])?;
    let install = Installation::new()?;
    let before = snapshot(install.root.path())?;

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, RestartFlag::new())?;
    let result = orchestrator.check_and_apply(|_| true, &mut Samples::default());

    match result {
        UpdateResult::Failed(failure) => {
            assert_eq!(failure.reason(), FailureReason::DownloadFailed)
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(snapshot(install.root.path())?, before);
    assert!(install.staging_is_empty()?);

    Ok(())
}

#[test]
fn interrupted_archive_is_download_failure() -> Result<()> {
    let archive = zip_bytes(&[("project-main/main.py", "print('new')")])?;
    let server = HttpFixture::serve([
        ("/version.txt", Route::Body(b"1.0.1".to_vec())),
        ("/main.zip", Route::Truncated(archive)),
    ])?;
    let install = Installation::new()?;
    let before = snapshot(install.root.path())?;
    let restart = RestartFlag::new();

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, restart.clone())?;
    let result = orchestrator.check_and_apply(|_| true, &mut Samples::default());

    match result {
        UpdateResult::Failed(failure) => {
            assert_eq!(failure.reason(), FailureReason::DownloadFailed)
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(snapshot(install.root.path())?, before);
    assert_eq!(install.read("version.txt")?, "1.0.0");
    assert!(install.staging_is_empty()?);
    assert!(!restart.is_requested());

    Ok(())
}

#[test]
fn corrupt_archive_is_install_failure() -> Result<()> {
    let server = HttpFixture::serve([
        ("/version.txt", Route::Body(b"1.0.1".to_vec())),
        ("/main.zip", Route::Body(b"<html>rate limited</html>".to_vec())),
    ])?;
    let install = Installation::new()?;
    let before = snapshot(install.root.path())?;

    let mut orchestrator =
        UpdateOrchestrator::from_config(&install.config(&server, "")?, RestartFlag::new())?;
    let result = orchestrator.check_and_apply(|_| true, &mut Samples::default());

    match result {
        UpdateResult::Failed(failure) => {
            assert_eq!(failure.reason(), FailureReason::InstallFailed)
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(snapshot(install.root.path())?, before);
    assert!(install.staging_is_empty()?);

    Ok(())
}

#[test]
fn github_commit_marker_and_exclude_rules() -> Result<()> {
    let sha = "6dcb09b5b57875f334f61aebed695e2e4193db5e";
    let archive = zip_bytes(&[
        ("DiccioPynthon-main/main.py", "print('new')"),
        ("DiccioPynthon-main/conceptos.db", "empty"),
    ])?;
    let server = HttpFixture::serve([
        (
            "/version.txt",
            Route::Body(format!(r#"{{"sha": "{sha}", "commit": {{}}}}"#).into_bytes()),
        ),
        ("/main.zip", Route::Body(archive)),
    ])?;
    let install = Installation::new()?;
    let mut config = install.config(&server, "marker = 'github-commit'")?;
    config.install.exclude = Some(vec!["*.db".into()]);

    let mut orchestrator = UpdateOrchestrator::from_config(&config, RestartFlag::new())?;
    let result = orchestrator.check_and_apply(
        |prompt| prompt.remote.as_str() == sha,
        &mut Samples::default(),
    );

    match result {
        UpdateResult::Applied { version, report } => {
            assert_eq!(version.as_str(), sha);
            assert_eq!(report.skipped, vec!["conceptos.db".to_string()]);
        }
        other => panic!("expected applied update, got {other:?}"),
    }
    assert_eq!(install.read("version.txt")?, sha);
    assert_eq!(install.read("conceptos.db")?, "user data");
    assert_eq!(install.read("main.py")?, "print('new')");

    Ok(())
}
