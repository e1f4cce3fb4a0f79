//! Result aggregation
//!
//! Workers never touch the summary files directly. Completed units are sent
//! to a single writer thread that owns both record writers, so appends are
//! serialized no matter how many workers report at once.

use crate::checksum::Checksums;
use crate::error::TransferError;
use crate::scheduler::{ErrorQueue, RunTotals};
use crate::stream::{RecordStream, RecordWriter};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};

/// Where one unit came from and where it went
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTransferDetails {
    pub source_path: String,
    pub target_path: String,
    pub rt_url: String,
    pub sha256: String,
}

/// Remote path and checksums of a transferred artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactDetails {
    pub artifactory_path: String,
    pub checksums: Checksums,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub path: String,
    pub sha1: String,
    pub md5: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDependency {
    pub id: String,
    #[serde(rename = "type")]
    pub dependency_type: String,
    pub sha1: String,
    pub md5: String,
}

impl ArtifactDetails {
    fn name(&self) -> &str {
        self.artifactory_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.artifactory_path)
    }

    fn file_type(&self) -> String {
        match self.name().rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext.to_string(),
            _ => String::new(),
        }
    }

    pub fn to_build_artifact(&self) -> BuildArtifact {
        BuildArtifact {
            name: self.name().to_string(),
            artifact_type: self.file_type(),
            path: self.artifactory_path.clone(),
            sha1: self.checksums.sha1.clone(),
            md5: self.checksums.md5.clone(),
            sha256: self.checksums.sha256.clone(),
        }
    }

    pub fn to_build_dependency(&self) -> BuildDependency {
        BuildDependency {
            id: self.name().to_string(),
            dependency_type: self.file_type(),
            sha1: self.checksums.sha1.clone(),
            md5: self.checksums.md5.clone(),
        }
    }
}

type Outcome = (FileTransferDetails, ArtifactDetails);
type Streams = (RecordStream<FileTransferDetails>, RecordStream<ArtifactDetails>);

/// Dedicated writer thread fed by a channel.
pub struct SummaryRecorder {
    tx: Option<Sender<Outcome>>,
    handle: Option<JoinHandle<Result<Streams>>>,
}

impl SummaryRecorder {
    /// Open both writers up front; failing here aborts the operation.
    pub fn start() -> Result<Self> {
        let mut transfers = RecordWriter::<FileTransferDetails>::new()?;
        let mut artifacts = RecordWriter::<ArtifactDetails>::new()?;
        let (tx, rx) = channel::unbounded::<Outcome>();
        let handle = thread::Builder::new()
            .name("summary-writer".to_string())
            .spawn(move || -> Result<Streams> {
                let mut first_err: Option<anyhow::Error> = None;
                for (transfer, artifact) in rx.iter() {
                    if first_err.is_some() {
                        continue;
                    }
                    if let Err(e) = transfers.write(&transfer).and_then(|_| artifacts.write(&artifact)) {
                        first_err = Some(e);
                    }
                }
                if let Some(e) = first_err {
                    return Err(e.context("Failed to write operation summary"));
                }
                Ok((transfers.finish()?, artifacts.finish()?))
            })
            .context("Failed to start summary writer")?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn record(&self, transfer: FileTransferDetails, artifact: ArtifactDetails) {
        if let Some(tx) = &self.tx {
            let _ = tx.send((transfer, artifact));
        }
    }

    /// Wait for every queued outcome to be written and return the streams.
    pub fn finish(mut self) -> Result<Streams> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("summary writer panicked"))?,
            None => Err(anyhow::anyhow!("summary writer already finished")),
        }
    }
}

impl Drop for SummaryRecorder {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Aggregate counts of one operation. `error` holds the oldest retained
/// item-level error and `more_errors` the rest, in report order. The counts
/// are authoritative even when errors are set.
#[derive(Debug, Default)]
pub struct TransferTotals {
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<anyhow::Error>,
    pub more_errors: Vec<anyhow::Error>,
}

impl TransferTotals {
    pub fn from_run(run: &RunTotals, errors: &ErrorQueue) -> Self {
        let mut retained = errors.take_all().into_iter();
        let error = retained.next().or_else(|| {
            if run.cancelled > 0 {
                Some(TransferError::Cancelled.into())
            } else {
                None
            }
        });
        Self {
            succeeded: run.succeeded,
            failed: run.failed(),
            error,
            more_errors: retained.collect(),
        }
    }

    /// Every retained error, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.error.iter().chain(self.more_errors.iter())
    }

    /// `(succeeded, failed)`, or the retained errors folded into one. The
    /// oldest error stays the root, so it can still be downcast.
    pub fn into_result(self) -> Result<(usize, usize)> {
        let Some(first) = self.error else {
            return Ok((self.succeeded, self.failed));
        };
        if self.more_errors.is_empty() {
            return Err(first);
        }
        let rest: Vec<String> = self.more_errors.iter().map(|e| format!("{e:#}")).collect();
        Err(first.context(format!(
            "{} errors, also: {}",
            rest.len() + 1,
            rest.join("; ")
        )))
    }
}

/// Totals plus the recorded outcomes, for build-info collection.
pub struct OperationSummary {
    pub totals: TransferTotals,
    pub transfer_details: RecordStream<FileTransferDetails>,
    pub artifacts_details: RecordStream<ArtifactDetails>,
}

impl OperationSummary {
    /// Release both streams; their files are deleted.
    pub fn close(self) -> TransferTotals {
        self.transfer_details.close();
        self.artifacts_details.close();
        self.totals
    }
}
