//! Upload service
//!
//! Local files are enumerated from the longest wildcard-free prefix of the
//! pattern, matched against the pattern regex and sent to the target the
//! regex groups resolve to. Large files are first offered by checksum so
//! content the server already has is never sent again.

use crate::checksum::{self, Checksums, FileDetails};
use crate::context::ServiceContext;
use crate::progress::TransferProgress;
use crate::scheduler::TaskProducer;
use crate::search::CommonParams;
use crate::summary::{
    ArtifactDetails, FileTransferDetails, OperationSummary, SummaryRecorder, TransferTotals,
};
use crate::symlink;
use crate::target;
use crate::transport::{
    add_checksum_headers, checksum_deploy_headers, with_matrix_params, Response,
    EXPLODE_ARCHIVE_HEADER,
};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

/// Statuses the repository answers a successful deploy with
pub const UPLOAD_SUCCESS: &[u16] = &[200, 201, 202];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadParams {
    #[serde(flatten)]
    pub common: CommonParams,
    pub flat: bool,
    /// Upload symlinks as empty artifacts carrying their target instead of
    /// following them
    pub symlinks: bool,
    /// Ask the server to extract the uploaded archive
    pub explode: bool,
}

impl UploadParams {
    pub fn new(pattern: &str, target: &str) -> Self {
        Self {
            common: CommonParams::new(pattern, target),
            ..Default::default()
        }
    }
}

/// One local path bound to its remote target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    pub local_path: String,
    pub target: String,
    pub is_dir: bool,
}

#[derive(Deserialize)]
struct DeployResponse {
    #[serde(default)]
    checksums: Checksums,
}

pub struct UploadService {
    ctx: Arc<ServiceContext>,
}

impl UploadService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn upload_files(&self, params: &[UploadParams]) -> Result<TransferTotals> {
        self.run(params, None)
    }

    pub fn upload_files_with_summary(&self, params: &[UploadParams]) -> Result<OperationSummary> {
        let recorder = SummaryRecorder::start()?;
        let totals = self.run(params, Some(&recorder))?;
        let (transfer_details, artifacts_details) = recorder.finish()?;
        Ok(OperationSummary {
            totals,
            transfer_details,
            artifacts_details,
        })
    }

    fn run(&self, params: &[UploadParams], summary: Option<&SummaryRecorder>) -> Result<TransferTotals> {
        let ctx = &*self.ctx;
        let started = Instant::now();
        ctx.logger().start("upload", params.len());
        let errors = ctx.error_queue();
        let progress = ctx.progress("Uploading");
        let run = ctx.runner().run(&errors, |producer| {
            for p in params {
                if producer.is_cancelled() {
                    break;
                }
                if let Err(e) = self.produce_group(p, producer, summary, &progress) {
                    ctx.logger().error("", &p.common.pattern, &format!("{e:#}"));
                    errors.add(e);
                }
            }
        });
        let totals = TransferTotals::from_run(&run, &errors);
        progress.finish(totals.succeeded, totals.failed);
        ctx.logger().done(
            "upload",
            totals.succeeded,
            totals.failed,
            started.elapsed().as_secs_f64(),
        );
        Ok(totals)
    }

    fn produce_group<'a>(
        &'a self,
        p: &'a UploadParams,
        producer: &mut TaskProducer<'a>,
        summary: Option<&'a SummaryRecorder>,
        progress: &'a TransferProgress,
    ) -> Result<()> {
        for unit in collect_upload_units(p)? {
            progress.inc_total(1);
            if !producer.add_task(move |worker| self.upload_unit(worker, p, &unit, summary, progress)) {
                break;
            }
        }
        Ok(())
    }

    fn upload_unit(
        &self,
        worker: usize,
        p: &UploadParams,
        unit: &UploadUnit,
        summary: Option<&SummaryRecorder>,
        progress: &TransferProgress,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let prefix = ctx.prefix(worker);
        ctx.logger().info(&prefix, &format!("Uploading: {}", unit.local_path));
        if ctx.is_dry_run() {
            progress.increment();
            return Ok(());
        }

        if unit.is_dir {
            let url = ctx.url(&format!("{}/", unit.target.trim_end_matches('/')))?;
            let resp = ctx.transport().send_put(&url, &[], ctx.headers())?;
            resp.expect_status("PUT", &url, UPLOAD_SUCCESS)?;
            self.record(summary, unit, Checksums::default());
            progress.increment();
            return Ok(());
        }

        let local = Path::new(&unit.local_path);
        let mut props = p.common.props.clone();
        let link_props = if p.symlinks {
            symlink::upload_properties(local)?
        } else {
            None
        };
        if let Some(extra) = &link_props {
            props.extend(extra.iter().cloned());
        }
        let url = with_matrix_params(&ctx.url(&unit.target)?, &props);

        let result = if link_props.is_some() {
            let details = FileDetails {
                size: 0,
                checksums: checksum::checksums_of(&[]),
            };
            ctx.transport()
                .send_put(&url, &[], ctx.headers())
                .map(|resp| (details, resp, false))
        } else {
            checksum::file_details(local)
                .and_then(|details| self.upload_content(&url, local, details, p))
        };
        let (details, resp, deployed) = match result {
            Ok(r) => r,
            Err(e) => {
                ctx.logger().error(&prefix, &unit.local_path, &format!("{e:#}"));
                return Err(e);
            }
        };
        resp.expect_status("PUT", &url, UPLOAD_SUCCESS)?;

        let mut checksums = details.checksums;
        if let Some(sha256) = response_sha256(&resp.body) {
            checksums.sha256 = sha256;
        }
        if deployed {
            ctx.logger()
                .skipped(&prefix, &unit.local_path, "deployed by checksum");
        } else {
            ctx.logger()
                .transferred(&prefix, &unit.local_path, &unit.target, details.size);
        }
        self.record(summary, unit, checksums);
        progress.increment();
        Ok(())
    }

    /// Checksum deploy when worthwhile, otherwise (or when the server does not
    /// have the content) a full PUT. The flag tells whether the checksum
    /// deploy was accepted.
    fn upload_content(
        &self,
        url: &str,
        local: &Path,
        details: FileDetails,
        p: &UploadParams,
    ) -> Result<(FileDetails, Response, bool)> {
        let ctx = &*self.ctx;
        if details.size >= ctx.config().min_checksum_deploy && !p.explode {
            let headers = checksum_deploy_headers(ctx.headers(), &details.checksums);
            let resp = ctx.transport().send_put(url, &[], &headers)?;
            if UPLOAD_SUCCESS.contains(&resp.status) {
                return Ok((details, resp, true));
            }
        }
        let mut headers = ctx.headers().clone();
        add_checksum_headers(&mut headers, &details.checksums);
        if p.explode {
            headers.insert(EXPLODE_ARCHIVE_HEADER.to_string(), "true".to_string());
        }
        let resp = ctx.transport().upload_file(url, local, &headers)?;
        Ok((details, resp, false))
    }

    fn record(&self, summary: Option<&SummaryRecorder>, unit: &UploadUnit, checksums: Checksums) {
        if let Some(recorder) = summary {
            recorder.record(
                FileTransferDetails {
                    source_path: unit.local_path.clone(),
                    target_path: unit.target.clone(),
                    rt_url: self.ctx.base_url().to_string(),
                    sha256: checksums.sha256.clone(),
                },
                ArtifactDetails {
                    artifactory_path: unit.target.clone(),
                    checksums,
                },
            );
        }
    }
}

fn response_sha256(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<DeployResponse>(body)
        .ok()
        .map(|r| r.checksums.sha256)
        .filter(|s| !s.is_empty())
}

/// Every local path `p` selects with its remote target, longest path first.
pub fn collect_upload_units(p: &UploadParams) -> Result<Vec<UploadUnit>> {
    // Targets are repository relative and always name at least a repository
    let mut target = p.common.target.trim_start_matches('/').to_string();
    if !target.contains('/') {
        target.push('/');
    }

    let pattern = target::expand_home(&p.common.pattern);
    let root = target::root_path(&pattern, p.common.regexp);
    let root_path = Path::new(&root);
    let meta = fs::symlink_metadata(root_path)
        .with_context(|| format!("Path does not exist: {root}"))?;
    let is_link = meta.file_type().is_symlink();
    let is_dir = if is_link && !p.symlinks {
        fs::metadata(root_path).map(|m| m.is_dir()).unwrap_or(false)
    } else {
        meta.is_dir()
    };
    if !is_dir {
        return Ok(vec![UploadUnit {
            target: target::upload_target(&root, &target, p.flat, false),
            local_path: root,
            is_dir: false,
        }]);
    }

    let regex = if p.common.regexp {
        pattern.clone()
    } else {
        target::escape_unreferenced_parentheses(&target::path_to_regex(&pattern), &target)
    };
    let regex = target::compile(&regex, &p.common.pattern)?;
    let exclusions = p
        .common
        .exclusions
        .iter()
        .map(|e| target::compile(&target::path_to_regex(&target::expand_home(e)), e))
        .collect::<Result<Vec<_>>>()?;

    let mut units = Vec::new();
    let mut uploaded_targets: Vec<String> = Vec::new();
    let mut uploaded_dirs: Vec<String> = Vec::new();
    for (path, is_dir) in list_local_paths(root_path, p, &exclusions)? {
        let groups = match match_groups(&regex, &path, is_dir) {
            Some(groups) => groups,
            None => continue,
        };
        let (resolved, used) = target::replace_placeholders(&groups, &target);
        let unit_target = target::upload_target(&path, &resolved, p.flat, used);
        if is_dir {
            if skip_dir_upload(
                &uploaded_targets,
                &uploaded_dirs,
                &unit_target,
                &path,
                p.common.include_dirs,
            ) {
                continue;
            }
            uploaded_dirs.push(path.clone());
        }
        uploaded_targets.push(unit_target.clone());
        units.push(UploadUnit {
            local_path: path,
            target: unit_target,
            is_dir,
        });
    }
    Ok(units)
}

/// Paths under `root` sorted descending, so children come before parents.
fn list_local_paths(root: &Path, p: &UploadParams, exclusions: &[Regex]) -> Result<Vec<(String, bool)>> {
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(!p.symlinks);
    if !p.common.recursive {
        walker = walker.max_depth(1);
    }
    let excluded = |path: &Path| {
        let path = path.to_string_lossy();
        exclusions.iter().any(|re| re.is_match(&path))
    };
    let mut out = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| !excluded(e.path())) {
        let entry = entry?;
        let is_dir = entry.file_type().is_dir();
        if is_dir && !p.common.include_dirs {
            continue;
        }
        out.push((entry.path().to_string_lossy().into_owned(), is_dir));
    }
    out.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(out)
}

fn match_groups(regex: &Regex, path: &str, is_dir: bool) -> Option<Vec<String>> {
    // A directory may be selected by a pattern ending in '/'
    let candidate = if is_dir && !regex.is_match(path) {
        format!("{path}/")
    } else {
        path.to_string()
    };
    let caps = regex.captures(&candidate)?;
    Some(
        caps.iter()
            .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect(),
    )
}

/// A directory needs no explicit PUT when a file below it was already
/// uploaded, or, with `include_dirs`, when a deeper local directory was.
fn skip_dir_upload(
    uploaded_targets: &[String],
    uploaded_dirs: &[String],
    target_dir: &str,
    source_dir: &str,
    include_dirs: bool,
) -> bool {
    let target_prefix = format!("{target_dir}/");
    if uploaded_targets.iter().any(|t| t.starts_with(&target_prefix)) {
        return true;
    }
    let source_prefix = format!("{source_dir}{}", std::path::MAIN_SEPARATOR);
    include_dirs && uploaded_dirs.iter().any(|d| d.starts_with(&source_prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_sha256() {
        assert_eq!(
            response_sha256(br#"{"checksums":{"sha256":"abc"}}"#),
            Some("abc".to_string())
        );
        assert_eq!(response_sha256(b""), None);
        assert_eq!(response_sha256(br#"{"checksums":{}}"#), None);
    }

    #[test]
    fn test_skip_dir_upload() {
        let targets = vec!["repo/a/b/f.txt".to_string()];
        assert!(skip_dir_upload(&targets, &[], "repo/a/b", "a/b", false));
        assert!(skip_dir_upload(&targets, &[], "repo/a", "a", false));
        assert!(!skip_dir_upload(&targets, &[], "repo/a/bc", "a/bc", false));

        let dirs = vec![format!("a{}b", std::path::MAIN_SEPARATOR)];
        assert!(skip_dir_upload(&[], &dirs, "x", "a", true));
        assert!(!skip_dir_upload(&[], &dirs, "x", "a", false));
    }

    #[test]
    fn test_match_groups_dir_with_trailing_slash() -> Result<()> {
        let re = target::compile(&target::path_to_regex("data/(*)/"), "data/(*)/")?;
        let groups = match_groups(&re, "data/sub", true);
        assert_eq!(groups.map(|g| g[1].clone()), Some("sub".to_string()));
        assert!(match_groups(&re, "data/sub", false).is_none());
        Ok(())
    }

    #[test]
    fn test_collect_units_for_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("data");
        fs::create_dir_all(root.join("a/b"))?;
        fs::create_dir_all(root.join("empty"))?;
        fs::write(root.join("a/b/one.txt"), b"1")?;
        fs::write(root.join("two.log"), b"2")?;

        let pattern = format!("{}/*", root.display());
        let mut p = UploadParams::new(&pattern, "repo/dest/");
        p.flat = true;
        p.common.exclusions = vec!["*.log".to_string()];
        let units = collect_upload_units(&p)?;
        let targets: Vec<&str> = units.iter().map(|u| u.target.as_str()).collect();
        assert_eq!(targets, vec!["repo/dest/one.txt"]);

        // Flat targets lose the hierarchy, so check directory skipping unflattened
        p.flat = false;
        p.common.include_dirs = true;
        let units = collect_upload_units(&p)?;
        let dirs: Vec<&UploadUnit> = units.iter().filter(|u| u.is_dir).collect();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].local_path.ends_with("empty"));
        Ok(())
    }

    #[test]
    fn test_collect_single_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("f.bin");
        fs::write(&file, b"x")?;
        let mut p = UploadParams::new(&file.display().to_string(), "/repo");
        p.flat = true;
        let units = collect_upload_units(&p)?;
        assert_eq!(
            units,
            vec![UploadUnit {
                local_path: file.display().to_string(),
                target: "repo/f.bin".to_string(),
                is_dir: false,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_placeholders_in_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("in");
        fs::create_dir_all(root.join("v1"))?;
        fs::write(root.join("v1/app.jar"), b"jar")?;
        let pattern = format!("{}/(*)/(*).jar", root.display());
        let p = UploadParams::new(&pattern, "repo/{1}/{2}-final.jar");
        let units = collect_upload_units(&p)?;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].target, "repo/v1/app-final.jar");
        Ok(())
    }
}
