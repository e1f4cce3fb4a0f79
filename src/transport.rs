//! Transport collaborator
//!
//! The engine never speaks HTTP itself. Retries, auth and connection pooling
//! belong to whatever implements [`Transport`]; services only look at status
//! codes and bodies.

use crate::checksum::{ChecksumType, Checksums};
use crate::error::TransferError;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use url::Url;

pub type Headers = BTreeMap<String, String>;

pub const CHECKSUM_DEPLOY_HEADER: &str = "X-Checksum-Deploy";
pub const EXPLODE_ARCHIVE_HEADER: &str = "X-Explode-Archive";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Headers,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error unless the status is one of `expected`.
    pub fn expect_status(&self, operation: &'static str, url: &str, expected: &[u16]) -> Result<()> {
        if expected.contains(&self.status) {
            Ok(())
        } else {
            Err(TransferError::status(operation, url, self.status, &self.body).into())
        }
    }
}

pub trait Transport: Send + Sync {
    fn send_get(&self, url: &str, headers: &Headers) -> Result<Response>;
    fn send_put(&self, url: &str, body: &[u8], headers: &Headers) -> Result<Response>;
    fn send_post(&self, url: &str, body: &[u8], headers: &Headers) -> Result<Response>;
    fn send_delete(&self, url: &str, headers: &Headers) -> Result<Response>;

    /// PUT the content of a local file, streamed from disk. Files may be far
    /// larger than memory, so the body must not be buffered whole.
    fn upload_file(&self, url: &str, path: &Path, headers: &Headers) -> Result<Response>;

    /// Whether the server honours byte-range requests for `url`.
    fn accepts_ranges(&self, url: &str, headers: &Headers) -> Result<(bool, Response)>;

    /// GET `url`, streaming the body into `sink`. The returned response
    /// carries no body.
    fn download_to(&self, url: &str, headers: &Headers, sink: &mut dyn Write) -> Result<Response>;

    /// GET the bytes in `range` (end exclusive) into `sink`. A successful
    /// partial response is `206`.
    fn download_range(
        &self,
        url: &str,
        range: Range<u64>,
        headers: &Headers,
        sink: &mut dyn Write,
    ) -> Result<Response>;
}

/// Headers for a checksum-only deploy of content with `sums`.
pub fn checksum_deploy_headers(base: &Headers, sums: &Checksums) -> Headers {
    let mut headers = base.clone();
    headers.insert(CHECKSUM_DEPLOY_HEADER.to_string(), "true".to_string());
    add_checksum_headers(&mut headers, sums);
    headers
}

pub fn add_checksum_headers(headers: &mut Headers, sums: &Checksums) {
    for kind in [ChecksumType::Sha1, ChecksumType::Md5, ChecksumType::Sha256] {
        let value = sums.get(kind);
        if !value.is_empty() {
            headers.insert(kind.header().to_string(), value.to_string());
        }
    }
}

/// `base` joined with the slash-separated repository `path`, each segment
/// percent-encoded, plus query `params`. A trailing `/` in `path` is kept.
pub fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid base url {base}"))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Base url {base} cannot carry a path"))?;
        segments.pop_if_empty();
        segments.extend(path.trim_start_matches('/').split('/'));
    }
    if !params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }
    Ok(url.into())
}

/// Append properties as `;key=value` matrix parameters.
pub fn with_matrix_params(url: &str, props: &[(String, String)]) -> String {
    let mut out = url.to_string();
    for (k, v) in props {
        out.push(';');
        out.extend(url::form_urlencoded::byte_serialize(k.as_bytes()));
        out.push('=');
        out.extend(url::form_urlencoded::byte_serialize(v.as_bytes()));
    }
    out
}
