#![allow(dead_code)]

use anyhow::Result;
use parking_lot::Mutex;
use rtsync::checksum::checksums_of;
use rtsync::config::TransferConfig;
use rtsync::record::{ItemRecord, Property};
use rtsync::search::{CommonParams, Searcher};
use rtsync::stream::RecordStream;
use rtsync::transport::{Headers, Response, Transport, CHECKSUM_DEPLOY_HEADER};
use rtsync::ServiceContext;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

pub const BASE_URL: &str = "http://repo.test/artifactory/";

#[derive(Debug, Clone)]
pub struct Request {
    pub method: &'static str,
    /// Repository path without matrix params or query
    pub path: String,
    pub headers: Headers,
    pub body_len: usize,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    folders: BTreeSet<String>,
    props: BTreeMap<String, Vec<(String, String)>>,
    requests: Vec<Request>,
}

/// In-memory repository serving both the transport and the search side.
#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<State>,
    pub accept_ranges: AtomicBool,
    /// Content bytes written to download sinks
    pub bytes_served: AtomicU64,
    /// Full uploads that went through `upload_file`
    pub streamed_uploads: AtomicU64,
    failing_patterns: Mutex<HashSet<String>>,
}

impl FakeRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.state.lock().files.insert(path.to_string(), content.to_vec());
    }

    pub fn put_folder(&self, path: &str) {
        self.state
            .lock()
            .folders
            .insert(path.trim_end_matches('/').to_string());
    }

    pub fn set_props(&self, path: &str, props: &[(&str, &str)]) {
        self.state.lock().props.insert(
            path.to_string(),
            props.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );
    }

    pub fn fail_search(&self, pattern: &str) {
        self.failing_patterns.lock().insert(pattern.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn has_folder(&self, path: &str) -> bool {
        self.state.lock().folders.contains(path.trim_end_matches('/'))
    }

    pub fn props(&self, path: &str) -> Vec<(String, String)> {
        self.state.lock().props.get(path).cloned().unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    pub fn requests_with(&self, method: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn record_for(&self, path: &str) -> Option<ItemRecord> {
        let state = self.state.lock();
        let content = state.files.get(path)?;
        Some(file_record(path, content, state.props.get(path)))
    }

    fn log(&self, method: &'static str, path: &str, headers: &Headers, body_len: usize) {
        self.state.lock().requests.push(Request {
            method,
            path: path.to_string(),
            headers: headers.clone(),
            body_len,
        });
    }
}

fn split_path(path: &str) -> (String, String, String) {
    let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let repo = parts[0].to_string();
    let name = parts[parts.len() - 1].to_string();
    let middle = parts[1..parts.len() - 1].join("/");
    let dir = if middle.is_empty() { ".".to_string() } else { middle };
    (repo, dir, name)
}

fn file_record(path: &str, content: &[u8], props: Option<&Vec<(String, String)>>) -> ItemRecord {
    let (repo, dir, name) = split_path(path);
    let sums = checksums_of(content);
    ItemRecord {
        size: content.len() as u64,
        actual_md5: sums.md5,
        actual_sha1: sums.sha1,
        sha256: sums.sha256,
        properties: props
            .map(|p| {
                p.iter()
                    .map(|(k, v)| Property {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ..ItemRecord::file(&repo, &dir, &name)
    }
}

/// Repository path, matrix params and query pairs of a request url.
fn parse(url: &str) -> (String, Vec<(String, String)>, Vec<(String, String)>) {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return (String::new(), Vec::new(), Vec::new()),
    };
    let raw = parsed.path().trim_start_matches("/artifactory/").to_string();
    let (path, matrix) = match raw.split_once(';') {
        Some((p, m)) => (
            p.to_string(),
            m.split(';')
                .flat_map(|kv| url::form_urlencoded::parse(kv.as_bytes()).into_owned())
                .collect(),
        ),
        None => (raw, Vec::new()),
    };
    let query = parsed.query_pairs().into_owned().collect();
    (path, matrix, query)
}

impl Transport for FakeRepository {
    fn send_get(&self, url: &str, headers: &Headers) -> Result<Response> {
        let (path, _, _) = parse(url);
        self.log("GET", &path, headers, 0);
        Ok(match self.file(&path) {
            Some(content) => Response::new(200).with_body(content),
            None => Response::new(404),
        })
    }

    fn send_put(&self, url: &str, body: &[u8], headers: &Headers) -> Result<Response> {
        let (path, matrix, _) = parse(url);
        self.log("PUT", &path, headers, body.len());
        let mut state = self.state.lock();
        if path.ends_with('/') {
            state.folders.insert(path.trim_end_matches('/').to_string());
            return Ok(Response::new(201));
        }
        let content = if headers.get(CHECKSUM_DEPLOY_HEADER).map(String::as_str) == Some("true") {
            let wanted = headers.get("X-Checksum-Sha1").cloned().unwrap_or_default();
            match state
                .files
                .values()
                .find(|c| checksums_of(c).sha1 == wanted)
            {
                Some(existing) => existing.clone(),
                None => return Ok(Response::new(404)),
            }
        } else {
            body.to_vec()
        };
        let sums = checksums_of(&content);
        state.files.insert(path.clone(), content);
        if !matrix.is_empty() {
            state.props.insert(path, matrix);
        }
        Ok(Response::new(201).with_body(format!(r#"{{"checksums":{{"sha256":"{}"}}}}"#, sums.sha256)))
    }

    fn upload_file(&self, url: &str, path: &Path, headers: &Headers) -> Result<Response> {
        let mut body = Vec::new();
        std::io::copy(&mut File::open(path)?, &mut body)?;
        self.streamed_uploads.fetch_add(1, Ordering::SeqCst);
        self.send_put(url, &body, headers)
    }

    fn send_post(&self, url: &str, body: &[u8], headers: &Headers) -> Result<Response> {
        let (path, _, query) = parse(url);
        self.log("POST", &path, headers, body.len());
        let (is_move, src) = if let Some(src) = path.strip_prefix("api/move/") {
            (true, src.to_string())
        } else if let Some(src) = path.strip_prefix("api/copy/") {
            (false, src.to_string())
        } else {
            return Ok(Response::new(400));
        };
        let src = src.trim_end_matches('/').to_string();
        // A destination ending in '/' is a folder the source goes into
        let dest = match query.iter().find(|(k, _)| k == "to") {
            Some((_, to)) if to.ends_with('/') => {
                let name = src.rsplit('/').next().unwrap_or(&src);
                format!("{to}{name}")
            }
            Some((_, to)) => to.clone(),
            None => return Ok(Response::new(400)),
        };
        let mut state = self.state.lock();
        let prefix = format!("{src}/");
        let moved: Vec<(String, Vec<u8>)> = state
            .files
            .iter()
            .filter(|(p, _)| **p == src || p.starts_with(&prefix))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        let is_folder = state.folders.contains(&src);
        if moved.is_empty() && !is_folder {
            return Ok(Response::new(404));
        }
        for (p, c) in moved {
            let new_path = format!("{dest}{}", &p[src.len()..]);
            if is_move {
                state.files.remove(&p);
            }
            state.files.insert(new_path, c);
        }
        if is_folder {
            if is_move {
                state.folders.retain(|f| *f != src && !f.starts_with(&prefix));
            }
            state.folders.insert(dest);
        }
        Ok(Response::new(200))
    }

    fn send_delete(&self, url: &str, headers: &Headers) -> Result<Response> {
        let (path, _, _) = parse(url);
        self.log("DELETE", &path, headers, 0);
        let mut state = self.state.lock();
        let target = path.trim_end_matches('/').to_string();
        let prefix = format!("{target}/");
        let before = state.files.len() + state.folders.len();
        state.files.retain(|p, _| *p != target && !p.starts_with(&prefix));
        state.folders.retain(|p| *p != target && !p.starts_with(&prefix));
        if state.files.len() + state.folders.len() == before {
            return Ok(Response::new(404));
        }
        Ok(Response::new(204))
    }

    fn accepts_ranges(&self, url: &str, headers: &Headers) -> Result<(bool, Response)> {
        let (path, _, _) = parse(url);
        self.log("HEAD", &path, headers, 0);
        Ok((self.accept_ranges.load(Ordering::SeqCst), Response::new(200)))
    }

    fn download_to(&self, url: &str, headers: &Headers, sink: &mut dyn Write) -> Result<Response> {
        let (path, _, _) = parse(url);
        self.log("GET", &path, headers, 0);
        match self.file(&path) {
            Some(content) => {
                sink.write_all(&content)?;
                self.bytes_served
                    .fetch_add(content.len() as u64, Ordering::SeqCst);
                Ok(Response::new(200))
            }
            None => Ok(Response::new(404)),
        }
    }

    fn download_range(
        &self,
        url: &str,
        range: Range<u64>,
        headers: &Headers,
        sink: &mut dyn Write,
    ) -> Result<Response> {
        let (path, _, _) = parse(url);
        self.log("RANGE", &path, headers, 0);
        let content = match self.file(&path) {
            Some(c) => c,
            None => return Ok(Response::new(404)),
        };
        let start = range.start as usize;
        let end = (range.end as usize).min(content.len());
        sink.write_all(&content[start..end])?;
        self.bytes_served
            .fetch_add((end - start) as u64, Ordering::SeqCst);
        Ok(Response::new(206))
    }
}

impl Searcher for FakeRepository {
    fn search(&self, spec: &CommonParams) -> Result<RecordStream<ItemRecord>> {
        if self.failing_patterns.lock().contains(&spec.pattern) {
            anyhow::bail!("search failed for {}", spec.pattern);
        }
        let re = rtsync::target::compile(&rtsync::target::path_to_regex(&spec.pattern), &spec.pattern)?;
        let state = self.state.lock();
        let mut records = Vec::new();
        for (path, content) in &state.files {
            if re.is_match(path) {
                records.push(file_record(path, content, state.props.get(path)));
            }
        }
        if spec.include_dirs {
            let mut folders: BTreeSet<String> = state.folders.clone();
            for path in state.files.keys() {
                let mut parts: Vec<&str> = path.split('/').collect();
                parts.pop();
                // Skip the repository itself
                while parts.len() > 1 {
                    folders.insert(parts.join("/"));
                    parts.pop();
                }
            }
            for folder in folders {
                if re.is_match(&folder) {
                    let (repo, dir, name) = split_path(&folder);
                    records.push(ItemRecord::folder(&repo, &dir, &name));
                }
            }
        }
        RecordStream::from_records(records)
    }
}

pub fn context(repo: &Arc<FakeRepository>, config: TransferConfig) -> Result<Arc<ServiceContext>> {
    let ctx = ServiceContext::new(BASE_URL, repo.clone(), repo.clone()).with_config(config)?;
    Ok(Arc::new(ctx))
}

/// Deterministic content of `len` bytes
pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
