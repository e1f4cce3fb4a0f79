//! Shared service state
//!
//! Everything a transfer service needs besides its per-call parameters:
//! where the repository lives, how to reach and search it, and how to run
//! and report the work.

use crate::buffer::BufferSizer;
use crate::config::TransferConfig;
use crate::logger::{Logger, NoopLogger, TextLogger};
use crate::progress::TransferProgress;
use crate::scheduler::{log_msg_prefix, CancelToken, ErrorQueue, Runner};
use crate::search::Searcher;
use crate::transport::{build_url, Headers, Transport};
use anyhow::Result;
use std::sync::Arc;

pub struct ServiceContext {
    base_url: String,
    transport: Arc<dyn Transport>,
    searcher: Arc<dyn Searcher>,
    config: TransferConfig,
    headers: Headers,
    logger: Arc<dyn Logger>,
    cancel: Option<CancelToken>,
    buffers: BufferSizer,
}

impl ServiceContext {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, searcher: Arc<dyn Searcher>) -> Self {
        Self {
            base_url: base_url.to_string(),
            transport,
            searcher,
            config: TransferConfig::default(),
            headers: Headers::new(),
            logger: Arc::new(NoopLogger),
            cancel: None,
            buffers: BufferSizer::new(),
        }
    }

    /// Apply `config`; a configured log file replaces the current logger.
    pub fn with_config(mut self, config: TransferConfig) -> Result<Self> {
        if let Some(path) = &config.log_file {
            self.logger = Arc::new(TextLogger::new(path)?);
        }
        self.config = config;
        Ok(self)
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Headers sent with every request, e.g. authorization
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn searcher(&self) -> &dyn Searcher {
        self.searcher.as_ref()
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn buffers(&self) -> &BufferSizer {
        &self.buffers
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn url(&self, path: &str) -> Result<String> {
        build_url(&self.base_url, path, &[])
    }

    pub fn url_with_params(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        build_url(&self.base_url, path, params)
    }

    pub fn runner(&self) -> Runner {
        Runner::new(self.config.worker_count(), self.config.task_queue_capacity)
            .with_cancel(self.cancel.clone())
    }

    pub fn error_queue(&self) -> ErrorQueue {
        ErrorQueue::new(self.config.error_queue_capacity)
    }

    pub fn progress(&self, operation: &str) -> TransferProgress {
        TransferProgress::new(self.config.progress, operation)
    }

    pub fn prefix(&self, worker: usize) -> String {
        log_msg_prefix(worker, self.config.dry_run)
    }
}
