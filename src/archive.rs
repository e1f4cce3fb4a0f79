//! Archive explosion for downloads
//!
//! A downloaded `.tar`, `.tar.gz`/`.tgz` or `.zip` is unpacked next to
//! itself and then removed. Entries that would escape the destination are
//! skipped by the tar and zip readers.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tar::Archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }
}

pub fn is_archive(file_name: &str) -> bool {
    ArchiveKind::detect(file_name).is_some()
}

/// Unpack `archive` into its parent directory and delete it.
/// Returns `false` without touching anything when it is not an archive.
pub fn explode(archive: &Path) -> Result<bool> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = match ArchiveKind::detect(&name) {
        Some(kind) => kind,
        None => return Ok(false),
    };
    let dest = match archive.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let reader = BufReader::new(file);
    match kind {
        ArchiveKind::Tar => Archive::new(reader).unpack(dest)?,
        ArchiveKind::TarGz => Archive::new(GzDecoder::new(reader)).unpack(dest)?,
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(reader)
                .with_context(|| format!("Invalid zip {}", archive.display()))?;
            zip.extract(dest)?;
        }
    }
    fs::remove_file(archive)
        .with_context(|| format!("Failed to remove exploded archive {}", archive.display()))?;
    Ok(true)
}
