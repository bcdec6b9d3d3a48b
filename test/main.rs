// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod update;

use anyhow::Result;
use diccio_updater::ProgressReporter;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::{BufRead, BufReader, Cursor, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
};
use zip::{write::SimpleFileOptions, ZipWriter};

/// Canned HTTP response.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// Respond with 200 and full body.
    Body(Vec<u8>),

    /// Respond with status code and empty body.
    Status(u16),

    /// Announce full length, but hang up after sending half the body.
    Truncated(Vec<u8>),
}

/// Loopback HTTP server serving canned responses.
///
/// Every connection is served exactly one response and closed afterwards.
pub(crate) struct HttpFixture {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl HttpFixture {
    pub(crate) fn serve(routes: impl IntoIterator<Item = (&'static str, Route)>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let routes = routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect::<HashMap<_, _>>();
        let hits = Arc::new(Mutex::new(HashMap::new()));

        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                // INVARIANT: A broken connection must not stop the fixture.
                let _ = respond(stream, &routes, &counter);
            }
        });

        Ok(Self { addr, hits })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or_default()
    }
}

fn respond(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<HashMap<String, usize>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    // Drain headers.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    match routes.get(&path) {
        Some(Route::Body(body)) => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(body)?;
        }
        Some(Route::Truncated(body)) => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(&body[..body.len() / 2])?;
        }
        Some(Route::Status(code)) => {
            write!(
                stream,
                "HTTP/1.1 {code} Fixture\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )?;
        }
        None => {
            write!(
                stream,
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )?;
        }
    }

    stream.flush()
}

/// Build zip archive in memory. Entry names ending with '/' are directories.
pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, SimpleFileOptions::default())?;
        } else {
            writer.start_file(*name, SimpleFileOptions::default())?;
            writer.write_all(contents.as_bytes())?;
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// Capture every file under a tree along with its contents.
pub(crate) fn snapshot(root: &Path) -> Result<BTreeMap<PathBuf, Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(root, &path, out)?;
            } else {
                out.insert(path.strip_prefix(root)?.to_path_buf(), fs::read(&path)?);
            }
        }

        Ok(())
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

/// Progress reporter that records every sample.
#[derive(Debug, Default)]
pub(crate) struct Samples(pub(crate) Vec<(u64, u64)>);

impl ProgressReporter for Samples {
    fn on_sample(&mut self, downloaded: u64, total: u64) {
        self.0.push((downloaded, total));
    }
}
