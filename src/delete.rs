//! Delete service
//!
//! Resolution and deletion are separate steps so callers can show or confirm
//! the resolved set first. Wildcard groups select folders too and are
//! top-chain reduced: deleting a folder removes everything below it. A group
//! whose search fails is skipped; its error travels with the resolved set and
//! is reported by the deletion run.

use crate::checksum::Checksums;
use crate::context::ServiceContext;
use crate::progress::TransferProgress;
use crate::record::ItemRecord;
use crate::reduce::reduce_top_chain;
use crate::search::{CommonParams, SpecType};
use crate::stream::{RecordStream, RecordWriter};
use crate::summary::{
    ArtifactDetails, FileTransferDetails, OperationSummary, SummaryRecorder, TransferTotals,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteParams {
    #[serde(flatten)]
    pub common: CommonParams,
}

impl DeleteParams {
    pub fn new(pattern: &str) -> Self {
        Self {
            common: CommonParams::new(pattern, ""),
        }
    }
}

/// Resolved delete set plus the errors of groups that could not be searched.
pub struct PathsToDelete {
    pub items: RecordStream<ItemRecord>,
    pub search_errors: Vec<anyhow::Error>,
}

impl From<RecordStream<ItemRecord>> for PathsToDelete {
    fn from(items: RecordStream<ItemRecord>) -> Self {
        Self {
            items,
            search_errors: Vec::new(),
        }
    }
}

pub struct DeleteService {
    ctx: Arc<ServiceContext>,
}

impl DeleteService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Everything `params` select, reduced so no item lies below another.
    pub fn get_paths_to_delete(&self, params: &[DeleteParams]) -> Result<PathsToDelete> {
        let ctx = &*self.ctx;
        let chunk = ctx.config().sort_chunk_size;
        let mut writer = RecordWriter::new()?;
        let mut search_errors = Vec::new();
        for p in params {
            ctx.logger().info("", &format!("Searching artifacts: {}", p.common.pattern));
            let mut found = match self.search_group(p, chunk) {
                Ok(found) => found,
                Err(e) => {
                    ctx.logger().error("", &p.common.pattern, &format!("{e:#}"));
                    search_errors.push(e);
                    continue;
                }
            };
            while let Some(item) = found.next_record() {
                writer.write(&item)?;
            }
            found.take_error()?;
        }
        let mut combined = writer.finish()?;
        // Groups may overlap each other
        let items = reduce_top_chain(&mut combined, chunk)?;
        Ok(PathsToDelete {
            items,
            search_errors,
        })
    }

    fn search_group(&self, p: &DeleteParams, chunk: usize) -> Result<RecordStream<ItemRecord>> {
        let searcher = self.ctx.searcher();
        match p.common.spec_type() {
            SpecType::Wildcard => {
                let mut spec = p.common.clone();
                spec.include_dirs = true;
                let mut raw = searcher.search(&spec)?;
                reduce_top_chain(&mut raw, chunk)
            }
            SpecType::Build | SpecType::Aql => searcher.search(&p.common),
        }
    }

    /// Delete every resolved item. Search errors carried by `paths` are
    /// reported ahead of item failures.
    pub fn delete_files(&self, paths: &mut PathsToDelete) -> Result<TransferTotals> {
        self.run(paths, None)
    }

    pub fn delete_files_with_summary(&self, paths: &mut PathsToDelete) -> Result<OperationSummary> {
        let recorder = SummaryRecorder::start()?;
        let totals = self.run(paths, Some(&recorder))?;
        let (transfer_details, artifacts_details) = recorder.finish()?;
        Ok(OperationSummary {
            totals,
            transfer_details,
            artifacts_details,
        })
    }

    fn run(&self, paths: &mut PathsToDelete, summary: Option<&SummaryRecorder>) -> Result<TransferTotals> {
        let ctx = &*self.ctx;
        let started = Instant::now();
        ctx.logger().start("delete", 1);
        let errors = ctx.error_queue();
        for e in paths.search_errors.drain(..) {
            errors.add(e);
        }
        let items = &mut paths.items;
        let progress = ctx.progress("Deleting");
        items.reset();
        let run = ctx.runner().run(&errors, |producer| {
            while let Some(item) = items.next_record() {
                progress.inc_total(1);
                let progress = &progress;
                if !producer.add_task(move |worker| self.delete_item(worker, &item, summary, progress)) {
                    break;
                }
            }
            if let Err(e) = items.take_error() {
                errors.add(e);
            }
        });
        let totals = TransferTotals::from_run(&run, &errors);
        progress.finish(totals.succeeded, totals.failed);
        ctx.logger().done(
            "delete",
            totals.succeeded,
            totals.failed,
            started.elapsed().as_secs_f64(),
        );
        Ok(totals)
    }

    fn delete_item(
        &self,
        worker: usize,
        item: &ItemRecord,
        summary: Option<&SummaryRecorder>,
        progress: &TransferProgress,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let prefix = ctx.prefix(worker);
        let path = item.chain_path();
        ctx.logger().info(&prefix, &format!("Deleting: {path}"));
        if ctx.is_dry_run() {
            progress.increment();
            return Ok(());
        }

        let url = ctx.url(&path)?;
        let resp = ctx.transport().send_delete(&url, ctx.headers());
        if let Err(e) = resp.and_then(|resp| resp.expect_status("DELETE", &url, &[204])) {
            ctx.logger().error(&prefix, &path, &format!("{e:#}"));
            return Err(e);
        }

        if let Some(recorder) = summary {
            recorder.record(
                FileTransferDetails {
                    source_path: path.clone(),
                    target_path: String::new(),
                    rt_url: ctx.base_url().to_string(),
                    sha256: item.sha256.clone(),
                },
                ArtifactDetails {
                    artifactory_path: path,
                    checksums: Checksums {
                        md5: item.actual_md5.clone(),
                        sha1: item.actual_sha1.clone(),
                        sha256: item.sha256.clone(),
                    },
                },
            );
        }
        progress.increment();
        Ok(())
    }
}
