//! Download service
//!
//! Every parameter group is searched, sorted by computed local destination
//! with duplicates dropped, and turned into file units plus a reduced set of
//! directory units. Each file is skipped when the local copy already has the
//! same checksums, fetched in one GET, or split into concurrent ranged GETs.

use crate::archive;
use crate::checksum::{self, Checksums};
use crate::context::ServiceContext;
use crate::error::TransferError;
use crate::progress::TransferProgress;
use crate::record::ItemRecord;
use crate::reduce::DirectoryKeys;
use crate::scheduler::TaskProducer;
use crate::search::CommonParams;
use crate::stream::RecordStream;
use crate::summary::{
    ArtifactDetails, FileTransferDetails, OperationSummary, SummaryRecorder, TransferTotals,
};
use crate::symlink;
use crate::target;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tempfile::NamedTempFile;

pub const DEFAULT_MIN_SPLIT_SIZE_KB: i64 = 5120;
pub const DEFAULT_SPLIT_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadParams {
    #[serde(flatten)]
    pub common: CommonParams,
    /// Recreate items carrying symlink properties as local symlinks
    pub symlink: bool,
    pub validate_symlinks: bool,
    pub flat: bool,
    pub explode: bool,
    /// Files below this many KB are never split; negative disables splitting
    pub min_split_size: i64,
    pub split_count: usize,
    pub skip_checksum: bool,
    /// With `size`, describes a single file without searching for it
    pub sha256: String,
    pub size: Option<u64>,
}

impl Default for DownloadParams {
    fn default() -> Self {
        Self {
            common: CommonParams::default(),
            symlink: false,
            validate_symlinks: false,
            flat: false,
            explode: false,
            min_split_size: DEFAULT_MIN_SPLIT_SIZE_KB,
            split_count: DEFAULT_SPLIT_COUNT,
            skip_checksum: false,
            sha256: String::new(),
            size: None,
        }
    }
}

impl DownloadParams {
    pub fn new(pattern: &str, target: &str) -> Self {
        Self {
            common: CommonParams::new(pattern, target),
            ..Default::default()
        }
    }

    /// Single GET unless the file is large enough and splitting is enabled
    pub fn is_bulk(&self, size: u64) -> bool {
        self.split_count == 0
            || self.min_split_size < 0
            || (self.min_split_size as u64).saturating_mul(1000) > size
    }
}

pub struct DownloadService {
    ctx: Arc<ServiceContext>,
}

impl DownloadService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn download_files(&self, params: &[DownloadParams]) -> Result<TransferTotals> {
        self.run(params, None)
    }

    pub fn download_files_with_summary(&self, params: &[DownloadParams]) -> Result<OperationSummary> {
        let recorder = SummaryRecorder::start()?;
        let totals = self.run(params, Some(&recorder))?;
        let (transfer_details, artifacts_details) = recorder.finish()?;
        Ok(OperationSummary {
            totals,
            transfer_details,
            artifacts_details,
        })
    }

    fn run(&self, params: &[DownloadParams], summary: Option<&SummaryRecorder>) -> Result<TransferTotals> {
        let ctx = &*self.ctx;
        let started = Instant::now();
        ctx.logger().start("download", params.len());
        let errors = ctx.error_queue();
        let progress = ctx.progress("Downloading");
        let run = ctx.runner().run(&errors, |producer| {
            for p in params {
                if producer.is_cancelled() {
                    break;
                }
                // A failing group is reported and the next one still runs
                if let Err(e) = self.produce_group(p, producer, summary, &progress) {
                    ctx.logger().error("", &p.common.pattern, &format!("{e:#}"));
                    errors.add(e);
                }
            }
        });
        let totals = TransferTotals::from_run(&run, &errors);
        progress.finish(totals.succeeded, totals.failed);
        ctx.logger().done(
            "download",
            totals.succeeded,
            totals.failed,
            started.elapsed().as_secs_f64(),
        );
        Ok(totals)
    }

    fn search_group(&self, p: &DownloadParams) -> Result<RecordStream<ItemRecord>> {
        match (p.sha256.is_empty(), p.size) {
            (false, Some(size)) => {
                let (repo, path, name) = split_download_path(&p.common.pattern)?;
                let item = ItemRecord {
                    size,
                    sha256: p.sha256.clone(),
                    ..ItemRecord::file(&repo, &path, &name)
                };
                RecordStream::from_records([item])
            }
            (true, None) => self.ctx.searcher().search(&p.common),
            _ => anyhow::bail!("both sha256 and size must be provided to download without searching"),
        }
    }

    fn produce_group<'a>(
        &'a self,
        p: &'a DownloadParams,
        producer: &mut TaskProducer<'a>,
        summary: Option<&'a SummaryRecorder>,
        progress: &'a TransferProgress,
    ) -> Result<()> {
        let mut items = self.search_group(p)?;
        // Two items resolving to the same local file would race; keep one
        let mut sorted = items.sort_unique_by_key(self.ctx.config().sort_chunk_size, true, |item| {
            let (dir, file) = local_destination(p, item)?;
            Ok(dir.join(file))
        })?;
        items.close();

        let mut dirs = DirectoryKeys::new();
        let mut already_created = HashSet::new();
        while let Some(item) = sorted.next_record() {
            if item.is_folder() {
                dirs.insert(item.directory_key(), item);
                continue;
            }
            already_created.insert(item.path.clone());
            progress.inc_total(1);
            if !producer.add_task(move |worker| self.download_item(worker, p, &item, summary, progress)) {
                return Ok(());
            }
        }
        sorted.take_error()?;

        for (_, item) in dirs.reduce(&already_created, p.flat) {
            progress.inc_total(1);
            if !producer.add_task(move |worker| self.download_item(worker, p, &item, summary, progress)) {
                break;
            }
        }
        Ok(())
    }

    fn download_item(
        &self,
        worker: usize,
        p: &DownloadParams,
        item: &ItemRecord,
        summary: Option<&SummaryRecorder>,
        progress: &TransferProgress,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let prefix = ctx.prefix(worker);
        let rel = item.relative_path();
        if ctx.is_dry_run() {
            ctx.logger().info(&prefix, &format!("Downloading {rel}"));
            progress.increment();
            return Ok(());
        }
        let url = ctx.url(&rel)?;
        let (local_dir, file_name) = local_destination(p, item)?;
        let local_path = local_dir.join(&file_name);

        if item.is_folder() {
            fs::create_dir_all(&local_path)
                .with_context(|| format!("Failed to create folder {}", local_path.display()))?;
            ctx.logger().info(&prefix, &format!("Creating folder: {}", local_path.display()));
            progress.increment();
            return Ok(());
        }

        symlink::remove_if_symlink(&local_path)?;
        if p.symlink {
            if let Some(link_target) = symlink::symlink_target(item) {
                symlink::create_local_symlink(
                    &local_path,
                    link_target,
                    p.validate_symlinks,
                    symlink::symlink_checksum(item),
                )?;
                ctx.logger().info(
                    &prefix,
                    &format!("Created symlink: {} -> {link_target}", local_path.display()),
                );
                self.record(summary, item, &local_path);
                progress.increment();
                return Ok(());
            }
        }

        ctx.logger().info(&prefix, &format!("Downloading {rel} to {}", local_path.display()));
        if let Err(e) = self.download_if_needed(&url, &local_dir, &local_path, item, p, &prefix) {
            ctx.logger().error(&prefix, &rel, &format!("{e:#}"));
            return Err(e);
        }
        self.record(summary, item, &local_path);
        progress.increment();
        Ok(())
    }

    fn download_if_needed(
        &self,
        url: &str,
        local_dir: &Path,
        local_path: &Path,
        item: &ItemRecord,
        p: &DownloadParams,
        prefix: &str,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        if checksum::is_equal_to_local_file(local_path, &item.actual_md5, &item.actual_sha1)? {
            ctx.logger()
                .skipped(prefix, &local_path.display().to_string(), "already exists locally");
            if p.explode {
                archive::explode(local_path)?;
            }
            return Ok(());
        }

        fs::create_dir_all(local_dir)
            .with_context(|| format!("Failed to create {}", local_dir.display()))?;
        let started = Instant::now();
        let mut bulk = p.is_bulk(item.size);
        if !bulk {
            let (accepts, _) = ctx.transport().accepts_ranges(url, ctx.headers())?;
            bulk = !accepts;
        }
        if bulk {
            self.bulk_download(url, local_dir, local_path, item, p)?;
        } else {
            self.split_download(url, local_dir, local_path, item, p)?;
        }
        ctx.buffers().record_throughput(item.size, started.elapsed());
        ctx.logger()
            .transferred(prefix, url, &local_path.display().to_string(), item.size);

        if p.explode {
            archive::explode(local_path)?;
        }
        Ok(())
    }

    fn bulk_download(
        &self,
        url: &str,
        local_dir: &Path,
        local_path: &Path,
        item: &ItemRecord,
        p: &DownloadParams,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let tmp = NamedTempFile::new_in(local_dir)?;
        let cap = ctx.buffers().calculate_buffer_size(item.size);
        {
            let mut out = BufWriter::with_capacity(cap, tmp.as_file());
            let resp = ctx.transport().download_to(url, ctx.headers(), &mut out)?;
            resp.expect_status("GET", url, &[200])?;
            out.flush()?;
        }
        verify_sha1(tmp.path(), local_path, item, p)?;
        tmp.persist(local_path)
            .with_context(|| format!("Failed to save {}", local_path.display()))?;
        Ok(())
    }

    fn split_download(
        &self,
        url: &str,
        local_dir: &Path,
        local_path: &Path,
        item: &ItemRecord,
        p: &DownloadParams,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let tmp = NamedTempFile::new_in(local_dir)?;
        preallocate(tmp.as_file(), item.size)?;
        let windows = split_windows(item.size, p.split_count);
        let cap = ctx.buffers().calculate_split_buffer_size(item.size, windows.len());
        let part_path = tmp.path();

        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = windows
                .iter()
                .cloned()
                .map(|window| s.spawn(move || self.download_window(url, part_path, window, cap)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("range download thread panicked")))
                })
                .collect()
        });
        for result in results {
            result?;
        }

        verify_sha1(tmp.path(), local_path, item, p)?;
        tmp.persist(local_path)
            .with_context(|| format!("Failed to save {}", local_path.display()))?;
        Ok(())
    }

    fn download_window(&self, url: &str, path: &Path, window: Range<u64>, cap: usize) -> Result<()> {
        let ctx = &*self.ctx;
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(window.start))?;
        let mut out = WindowWriter {
            inner: BufWriter::with_capacity(cap, file),
            remaining: window.end - window.start,
        };
        let resp = ctx
            .transport()
            .download_range(url, window.clone(), ctx.headers(), &mut out)?;
        resp.expect_status("GET", url, &[206])?;
        if out.remaining != 0 {
            anyhow::bail!(
                "range {}-{} of {url} ended {} bytes short",
                window.start,
                window.end,
                out.remaining
            );
        }
        out.inner.flush()?;
        Ok(())
    }

    fn record(&self, summary: Option<&SummaryRecorder>, item: &ItemRecord, local_path: &Path) {
        if let Some(recorder) = summary {
            let rel = item.relative_path();
            recorder.record(
                FileTransferDetails {
                    source_path: rel.clone(),
                    target_path: local_path.display().to_string(),
                    rt_url: self.ctx.base_url().to_string(),
                    sha256: item.sha256.clone(),
                },
                ArtifactDetails {
                    artifactory_path: rel,
                    checksums: Checksums {
                        md5: item.actual_md5.clone(),
                        sha1: item.actual_sha1.clone(),
                        sha256: item.sha256.clone(),
                    },
                },
            );
        }
    }
}

/// Local directory and file name `item` downloads to under `p`.
pub fn local_destination(p: &DownloadParams, item: &ItemRecord) -> Result<(PathBuf, String)> {
    let (resolved, placeholders_used) = target::build_target_path(
        &p.common.pattern,
        &item.relative_path(),
        &p.common.target,
        true,
    )?;
    Ok(target::local_path_and_file(
        &item.name,
        &item.path,
        &resolved,
        p.flat,
        placeholders_used,
    ))
}

/// `repo/dir/name` into its parts. Only exact paths are accepted.
pub fn split_download_path(pattern: &str) -> Result<(String, String, String)> {
    if target::is_wildcard_pattern(pattern) {
        return Err(TransferError::WildcardChecksumPath(pattern.to_string()).into());
    }
    let parts: Vec<&str> = pattern.split('/').collect();
    let repo = parts[0].to_string();
    let name = parts[parts.len() - 1].to_string();
    let path = parts[1..parts.len() - 1].join("/");
    Ok((repo, path, name))
}

/// Disjoint byte windows covering `size`; the last one takes the remainder.
pub fn split_windows(size: u64, parts: usize) -> Vec<Range<u64>> {
    let parts = parts.max(1) as u64;
    let chunk = size / parts;
    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i == parts - 1 { size } else { start + chunk };
            start..end
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn verify_sha1(downloaded: &Path, local_path: &Path, item: &ItemRecord, p: &DownloadParams) -> Result<()> {
    if p.skip_checksum || item.actual_sha1.is_empty() {
        return Ok(());
    }
    let actual = checksum::file_sha1(downloaded)?;
    if !actual.eq_ignore_ascii_case(&item.actual_sha1) {
        return Err(TransferError::ChecksumMismatch {
            path: local_path.display().to_string(),
            expected: item.actual_sha1.clone(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// Writer confined to one byte window of a shared file
struct WindowWriter<W: Write> {
    inner: W,
    remaining: u64,
}

impl<W: Write> Write for WindowWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "range response larger than requested window",
            ));
        }
        let n = self.inner.write(buf)?;
        self.remaining -= n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn preallocate(file: &File, size: u64) -> Result<()> {
    file.set_len(size)?;
    reserve_blocks(file, size);
    Ok(())
}

#[cfg(target_os = "linux")]
fn reserve_blocks(file: &File, size: u64) {
    use std::os::fd::AsRawFd;
    // Best effort: set_len already sized the file, sparsely if need be
    let _ = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
}

#[cfg(not(target_os = "linux"))]
fn reserve_blocks(_file: &File, _size: u64) {}
