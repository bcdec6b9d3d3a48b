// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote version marker and archive access.
//!
//! The project publishes two things: a __version marker__ whose body names the
//! latest revision, and a zip __archive__ of the source tree at that revision.
//! Both are plain HTTP GET requests. Network I/O is a blocking sequence of
//! bounded chunk reads; no chunk is ever fetched in parallel.

use crate::{
    config::{MarkerFormat, RemoteSettings},
    progress::ProgressReporter,
    version::VersionToken,
};

use reqwest::{
    blocking::{Client, Response},
    StatusCode,
};
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use tracing::{debug, info, instrument};

/// Default number of bytes read per archive chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Source of published updates.
pub trait RemoteSource {
    /// Fetch the currently published version token.
    fn fetch_version(&self) -> Result<VersionToken>;

    /// Stream the published archive into a sink.
    ///
    /// Returns total number of bytes written into the sink.
    fn fetch_archive(
        &self,
        sink: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64>;
}

/// Remote source over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    settings: RemoteSettings,
    chunk_size: usize,
}

impl HttpRemote {
    /// Construct new HTTP remote from remote settings.
    ///
    /// # Errors
    ///
    /// - Return [`FetchError::Client`] if HTTP client cannot be built.
    pub fn new(settings: RemoteSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            settings,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Use a different chunk size for archive downloads.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::Network {
                url: url.to_owned(),
                source: err,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status,
            });
        }

        Ok(response)
    }
}

impl RemoteSource for HttpRemote {
    #[instrument(skip(self), level = "debug")]
    fn fetch_version(&self) -> Result<VersionToken> {
        let url = self.settings.version_url.as_str();
        debug!("fetch version marker from {url}");
        let body = self.get(url)?.text().map_err(|err| FetchError::Network {
            url: url.to_owned(),
            source: err,
        })?;

        parse_marker(self.settings.marker, &body)
            .map_err(|err| FetchError::Malformed {
                url: url.to_owned(),
                source: err,
            })?
            .ok_or_else(|| FetchError::Empty {
                url: url.to_owned(),
            })
    }

    #[instrument(skip(self, sink, progress), level = "debug")]
    fn fetch_archive(
        &self,
        sink: &mut dyn Write,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64> {
        let url = self.settings.archive_url.as_str();
        info!("download archive from {url}");
        let response = self.get(url)?;
        let total = response.content_length().unwrap_or(0);
        stream_chunks(url, response, total, sink, progress, self.chunk_size)
    }
}

/// Interpret version marker response body.
///
/// Returns `Ok(None)` if the marker names no version at all.
///
/// # Errors
///
/// - Return [`serde_json::Error`] if a structured marker cannot be parsed.
pub fn parse_marker(
    format: MarkerFormat,
    body: &str,
) -> std::result::Result<Option<VersionToken>, serde_json::Error> {
    match format {
        MarkerFormat::Plain => Ok(VersionToken::parse(body)),
        MarkerFormat::GithubCommit => {
            let commit: GithubCommit = serde_json::from_str(body)?;
            Ok(VersionToken::parse(commit.sha))
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

/// Copy a body into a sink in bounded chunks, reporting progress after each
/// chunk.
///
/// A non-zero `total` is treated as the announced content length. A body that
/// ends before the announced length is reported as interrupted rather than
/// being silently accepted.
///
/// # Errors
///
/// - Return [`FetchError::Interrupted`] if reading the body fails or the body
///   ends early.
/// - Return [`FetchError::Sink`] if writing to the sink fails.
pub fn stream_chunks(
    url: &str,
    mut body: impl Read,
    total: u64,
    sink: &mut dyn Write,
    progress: &mut dyn ProgressReporter,
    chunk_size: usize,
) -> Result<u64> {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut downloaded: u64 = 0;

    loop {
        let read = match body.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(FetchError::Interrupted {
                    url: url.to_owned(),
                    source: err,
                })
            }
        };

        sink.write_all(&chunk[..read]).map_err(FetchError::Sink)?;
        downloaded += read as u64;
        progress.on_sample(downloaded, total);
    }

    sink.flush().map_err(FetchError::Sink)?;

    if total != 0 && downloaded < total {
        return Err(FetchError::Interrupted {
            url: url.to_owned(),
            source: std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("received {downloaded} of {total} bytes"),
            ),
        });
    }

    debug!("streamed {downloaded} bytes from {url}");
    Ok(downloaded)
}

/// Remote access error types.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP client cannot be constructed.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// Request could not be performed.
    #[error("request to {url} failed")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Remote answered with a non-success status.
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: StatusCode },

    /// Response body stopped before it was complete.
    #[error("download from {url} was interrupted")]
    Interrupted {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// Version marker names no version.
    #[error("version marker at {url} is empty")]
    Empty { url: String },

    /// Structured version marker cannot be parsed.
    #[error("version marker at {url} is malformed")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Downloaded bytes cannot be written out.
    #[error("failed to write downloaded bytes")]
    Sink(#[source] std::io::Error),
}

impl FetchError {
    /// Whether error comes from the transport rather than the content or the
    /// local file system.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Client(_) | Self::Network { .. } | Self::Status { .. } | Self::Interrupted { .. }
        )
    }
}

/// Friendly result alias :3
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
