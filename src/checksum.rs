//! Checksum and hashing utilities

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const READ_BUF: usize = 64 * 1024;

/// Checksum algorithms the repository stores for every artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
}

impl ChecksumType {
    /// Request header carrying this checksum on a deploy
    pub fn header(self) -> &'static str {
        match self {
            ChecksumType::Md5 => "X-Checksum-Md5",
            ChecksumType::Sha1 => "X-Checksum-Sha1",
            ChecksumType::Sha256 => "X-Checksum",
        }
    }
}

/// Lowercase hex digests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub sha256: String,
}

impl Checksums {
    pub fn get(&self, kind: ChecksumType) -> &str {
        match kind {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDetails {
    pub size: u64,
    pub checksums: Checksums,
}

/// Hash all three algorithms in a single pass over `data`
pub fn checksums_of(data: &[u8]) -> Checksums {
    let mut md5 = md5::Context::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    md5.consume(data);
    sha1.update(data);
    sha256.update(data);
    Checksums {
        md5: format!("{:x}", md5.compute()),
        sha1: format!("{:x}", sha1.finalize()),
        sha256: format!("{:x}", sha256.finalize()),
    }
}

/// Size and checksums of a local file, read once
pub fn file_details(path: &Path) -> Result<FileDetails> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut md5 = md5::Context::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut size = 0u64;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        md5.consume(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
        size += n as u64;
    }
    Ok(FileDetails {
        size,
        checksums: Checksums {
            md5: format!("{:x}", md5.compute()),
            sha1: format!("{:x}", sha1.finalize()),
            sha256: format!("{:x}", sha256.finalize()),
        },
    })
}

pub fn file_sha1(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut sha1 = Sha1::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha1.update(&buf[..n]);
    }
    Ok(format!("{:x}", sha1.finalize()))
}

/// True when `path` is an existing regular file whose MD5 and SHA1 both match.
/// Missing files and empty expected checksums never match.
pub fn is_equal_to_local_file(path: &Path, md5: &str, sha1: &str) -> Result<bool> {
    if md5.is_empty() || sha1.is_empty() {
        return Ok(false);
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    let details = file_details(path)?;
    Ok(details.checksums.md5.eq_ignore_ascii_case(md5)
        && details.checksums.sha1.eq_ignore_ascii_case(sha1))
}
