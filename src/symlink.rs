//! Symlink preservation
//!
//! A symlink is stored remotely as an empty artifact whose properties name
//! the link target and, when the target is a regular file, its SHA1.

use crate::checksum;
use crate::error::TransferError;
use crate::record::ItemRecord;
use anyhow::{Context, Result};
use std::path::Path;

pub const SYMLINK_DEST: &str = "symlink.dest";
pub const SYMLINK_DEST_SHA1: &str = "symlink.destsha1";

/// Link target recorded on the item, if it represents a symlink
pub fn symlink_target(item: &ItemRecord) -> Option<&str> {
    item.property(SYMLINK_DEST).filter(|v| !v.is_empty())
}

pub fn symlink_checksum(item: &ItemRecord) -> Option<&str> {
    item.property(SYMLINK_DEST_SHA1).filter(|v| !v.is_empty())
}

pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Remove `path` if it is a symlink so new content is not written through it.
pub fn remove_if_symlink(path: &Path) -> Result<()> {
    if is_symlink(path) {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale symlink {}", path.display()))?;
    }
    Ok(())
}

/// Recreate `link` pointing at `target`.
///
/// With `validate` and a stored `expected_sha1`, the live SHA1 of `target`
/// must match first. Anything already at `link` is replaced.
pub fn create_local_symlink(
    link: &Path,
    target: &str,
    validate: bool,
    expected_sha1: Option<&str>,
) -> Result<()> {
    if let (true, Some(expected)) = (validate, expected_sha1) {
        let target_path = Path::new(target);
        if !target_path.exists() {
            return Err(TransferError::SymlinkValidation {
                path: link.display().to_string(),
                target: target.to_string(),
            })
            .context("symlink target does not exist");
        }
        let actual = checksum::file_sha1(target_path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(TransferError::SymlinkValidation {
                path: link.display().to_string(),
                target: target.to_string(),
            }
            .into());
        }
    }
    if std::fs::symlink_metadata(link).is_ok() {
        std::fs::remove_file(link)
            .with_context(|| format!("Failed to replace {}", link.display()))?;
    }
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }
    make_symlink(target, link)
        .with_context(|| format!("Failed to create symlink {} -> {}", link.display(), target))
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> std::io::Result<()> {
    if Path::new(target).is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Properties describing a local symlink for upload: the link target and,
/// when it resolves to a regular file, that file's SHA1.
pub fn upload_properties(link: &Path) -> Result<Option<Vec<(String, String)>>> {
    let meta = std::fs::symlink_metadata(link)?;
    if !meta.file_type().is_symlink() {
        return Ok(None);
    }
    let target = std::fs::read_link(link)?;
    let mut props = Vec::new();
    match std::fs::metadata(link) {
        Ok(m) if m.is_file() => {
            props.push((SYMLINK_DEST_SHA1.to_string(), checksum::file_sha1(link)?));
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    props.push((SYMLINK_DEST.to_string(), target.to_string_lossy().into_owned()));
    Ok(Some(props))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_replace_symlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"hello")?;
        let link = dir.path().join("nested/link.txt");
        create_local_symlink(&link, target.to_str().unwrap(), false, None)?;
        assert!(is_symlink(&link));
        assert_eq!(std::fs::read(&link)?, b"hello");
        // Replacing an existing link works
        create_local_symlink(&link, target.to_str().unwrap(), false, None)?;
        assert!(is_symlink(&link));
        Ok(())
    }

    #[test]
    fn test_validation_mismatch_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("real.txt");
        std::fs::write(&target, b"hello")?;
        let link = dir.path().join("link");
        let good = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
        create_local_symlink(&link, target.to_str().unwrap(), true, Some(good))?;

        let err = create_local_symlink(&link, target.to_str().unwrap(), true, Some("deadbeef"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransferError>(),
            Some(TransferError::SymlinkValidation { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_remove_if_symlink_leaves_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("f");
        std::fs::write(&file, b"x")?;
        remove_if_symlink(&file)?;
        assert!(file.exists());
        let link = dir.path().join("l");
        std::os::unix::fs::symlink(&file, &link)?;
        remove_if_symlink(&link)?;
        assert!(!link.exists() && !is_symlink(&link));
        Ok(())
    }

    #[test]
    fn test_upload_properties() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("f");
        std::fs::write(&file, b"hello")?;
        assert!(upload_properties(&file)?.is_none());
        let link = dir.path().join("l");
        std::os::unix::fs::symlink(&file, &link)?;
        let props = upload_properties(&link)?.unwrap();
        assert_eq!(props[0].0, SYMLINK_DEST_SHA1);
        assert_eq!(props[0].1, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(props[1], (SYMLINK_DEST.to_string(), file.display().to_string()));
        Ok(())
    }
}
