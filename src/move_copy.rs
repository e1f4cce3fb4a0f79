//! Server-side move and copy
//!
//! Every parameter group is searched and chain-reduced on its own, then the
//! groups are merged into one stream whose records remember the group they
//! came from. Moves are reduced once more across groups: once a folder moves,
//! nothing below it can be moved separately.

use crate::checksum::Checksums;
use crate::context::ServiceContext;
use crate::progress::TransferProgress;
use crate::record::ItemRecord;
use crate::reduce::{reduce_chain, reduce_top_chain, ChainFlavor};
use crate::scheduler::{ErrorQueue, TaskProducer};
use crate::search::{CommonParams, SpecType};
use crate::stream::{merge_tagged, RecordStream, TaggedRecord};
use crate::summary::{
    ArtifactDetails, FileTransferDetails, OperationSummary, SummaryRecorder, TransferTotals,
};
use crate::target;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveType {
    Move,
    Copy,
}

impl MoveType {
    /// Path segment of the REST endpoint
    pub fn api(self) -> &'static str {
        match self {
            MoveType::Move => "move",
            MoveType::Copy => "copy",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            MoveType::Move => "Moving",
            MoveType::Copy => "Copying",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveCopyParams {
    #[serde(flatten)]
    pub common: CommonParams,
    pub flat: bool,
}

impl MoveCopyParams {
    pub fn new(pattern: &str, target: &str) -> Self {
        Self {
            common: CommonParams::new(pattern, target),
            flat: false,
        }
    }
}

pub struct MoveCopyService {
    ctx: Arc<ServiceContext>,
    move_type: MoveType,
}

impl MoveCopyService {
    pub fn new(ctx: Arc<ServiceContext>, move_type: MoveType) -> Self {
        Self { ctx, move_type }
    }

    pub fn move_type(&self) -> MoveType {
        self.move_type
    }

    pub fn move_copy(&self, params: &[MoveCopyParams]) -> Result<TransferTotals> {
        self.run(params, None)
    }

    pub fn move_copy_with_summary(&self, params: &[MoveCopyParams]) -> Result<OperationSummary> {
        let recorder = SummaryRecorder::start()?;
        let totals = self.run(params, Some(&recorder))?;
        let (transfer_details, artifacts_details) = recorder.finish()?;
        Ok(OperationSummary {
            totals,
            transfer_details,
            artifacts_details,
        })
    }

    /// Items one group selects. Wildcard groups include folders and are
    /// reduced so that a moved folder carries its content along.
    pub fn get_paths_to_move(&self, p: &MoveCopyParams) -> Result<RecordStream<ItemRecord>> {
        let ctx = &*self.ctx;
        match p.common.spec_type() {
            SpecType::Wildcard => {
                let mut spec = p.common.clone();
                spec.include_dirs = true;
                let mut found = ctx.searcher().search(&spec)?;
                let flavor = ChainFlavor::for_target(p.flat, &p.common.target);
                let reduced = reduce_chain(&mut found, flavor, ctx.config().sort_chunk_size)?;
                found.close();
                Ok(reduced)
            }
            SpecType::Build | SpecType::Aql => ctx.searcher().search(&p.common),
        }
    }

    fn run(&self, params: &[MoveCopyParams], summary: Option<&SummaryRecorder>) -> Result<TransferTotals> {
        let ctx = &*self.ctx;
        let started = Instant::now();
        let operation = self.move_type.api();
        ctx.logger().start(operation, params.len());
        let errors = ctx.error_queue();
        let progress = ctx.progress(self.move_type.verb());
        let run = ctx.runner().run(&errors, |producer| {
            if let Err(e) = self.produce(params, producer, &errors, summary, &progress) {
                ctx.logger().error("", operation, &format!("{e:#}"));
                errors.add(e);
            }
        });
        let totals = TransferTotals::from_run(&run, &errors);
        progress.finish(totals.succeeded, totals.failed);
        ctx.logger().done(
            operation,
            totals.succeeded,
            totals.failed,
            started.elapsed().as_secs_f64(),
        );
        Ok(totals)
    }

    fn produce<'a>(
        &'a self,
        params: &'a [MoveCopyParams],
        producer: &mut TaskProducer<'a>,
        errors: &ErrorQueue,
        summary: Option<&'a SummaryRecorder>,
        progress: &'a TransferProgress,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let mut groups = Vec::with_capacity(params.len());
        for p in params {
            match self.get_paths_to_move(p) {
                Ok(found) => groups.push(found),
                Err(e) => {
                    // Keep group indices aligned with `params`
                    ctx.logger().error("", &p.common.pattern, &format!("{e:#}"));
                    errors.add(e);
                    groups.push(RecordStream::empty()?);
                }
            }
        }
        let mut merged = merge_tagged(&mut groups)?;
        let mut items = match self.move_type {
            MoveType::Move => reduce_top_chain(&mut merged, ctx.config().sort_chunk_size)?,
            MoveType::Copy => merged,
        };
        let count = items.length()?;
        ctx.logger().info(
            "",
            &format!(
                "Preparing to {} {count} {}",
                self.move_type.api(),
                if count == 1 { "artifact" } else { "artifacts" }
            ),
        );

        while let Some(TaggedRecord { record, spec_index }) = items.next_record() {
            let p = match params.get(spec_index) {
                Some(p) => p,
                None => anyhow::bail!("record tagged with unknown group {spec_index}"),
            };
            progress.inc_total(1);
            if !producer.add_task(move |worker| self.move_item(worker, p, &record, summary, progress)) {
                break;
            }
        }
        items.take_error()
    }

    fn move_item(
        &self,
        worker: usize,
        p: &MoveCopyParams,
        item: &ItemRecord,
        summary: Option<&SummaryRecorder>,
        progress: &TransferProgress,
    ) -> Result<()> {
        let ctx = &*self.ctx;
        let prefix = ctx.prefix(worker);
        let rel = item.relative_path();
        let mut dest = target::destination_path(
            &p.common.target,
            &p.common.pattern,
            &item.path,
            &rel,
            p.flat,
        )?;
        if dest.ends_with('/') {
            if !item.is_folder() {
                dest.push_str(&item.name);
            } else if ctx.is_dry_run() {
                ctx.logger().info(&prefix, &format!("Create path: {dest}"));
            } else {
                self.create_path(&dest)?;
            }
        }

        ctx.logger().info(
            &prefix,
            &format!("{} artifact: {rel} to: {dest}", self.move_type.verb()),
        );
        if ctx.is_dry_run() {
            progress.increment();
            return Ok(());
        }

        let url = ctx.url_with_params(
            &format!("api/{}/{rel}", self.move_type.api()),
            &[("to", dest.as_str())],
        )?;
        let resp = ctx.transport().send_post(&url, &[], ctx.headers());
        if let Err(e) = resp.and_then(|resp| resp.expect_status("POST", &url, &[200])) {
            ctx.logger().error(&prefix, &rel, &format!("{e:#}"));
            return Err(e);
        }

        if let Some(recorder) = summary {
            recorder.record(
                FileTransferDetails {
                    source_path: rel,
                    target_path: dest.clone(),
                    rt_url: ctx.base_url().to_string(),
                    sha256: item.sha256.clone(),
                },
                ArtifactDetails {
                    artifactory_path: dest,
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

    /// Create the `/`-terminated destination folder of a folder move.
    fn create_path(&self, dest: &str) -> Result<()> {
        let ctx = &*self.ctx;
        let url = ctx.url(dest)?;
        let resp = ctx.transport().send_put(&url, &[], ctx.headers())?;
        resp.expect_status("PUT", &url, &[200, 201])
    }
}
