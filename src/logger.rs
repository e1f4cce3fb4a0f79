use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Transfer event sink. `prefix` is the `"[Thread N] "` worker prefix.
pub trait Logger: Send + Sync {
    fn start(&self, _operation: &str, _groups: usize) {}
    fn info(&self, _prefix: &str, _msg: &str) {}
    fn transferred(&self, _prefix: &str, _src: &str, _dst: &str, _bytes: u64) {}
    fn skipped(&self, _prefix: &str, _path: &str, _reason: &str) {}
    fn error(&self, _prefix: &str, _path: &str, _msg: &str) {}
    fn done(&self, _operation: &str, _succeeded: usize, _failed: usize, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn start(&self, operation: &str, groups: usize) {
        self.line(&format!("START op={operation} groups={groups}"));
    }
    fn info(&self, prefix: &str, msg: &str) {
        self.line(&format!("{prefix}{msg}"));
    }
    fn transferred(&self, prefix: &str, src: &str, dst: &str, bytes: u64) {
        self.line(&format!("{prefix}DONE src={src} dst={dst} bytes={bytes}"));
    }
    fn skipped(&self, prefix: &str, path: &str, reason: &str) {
        self.line(&format!("{prefix}SKIP path={path} reason={reason}"));
    }
    fn error(&self, prefix: &str, path: &str, msg: &str) {
        self.line(&format!("{prefix}ERROR path={path} msg={msg}"));
    }
    fn done(&self, operation: &str, succeeded: usize, failed: usize, seconds: f64) {
        self.line(&format!(
            "END op={operation} succeeded={succeeded} failed={failed} seconds={seconds:.3}"
        ));
    }
}
