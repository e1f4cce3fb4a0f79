//! Write-buffer sizing for downloads
//!
//! Buffers grow with file size and shrink when many workers write at once,
//! capped at a fraction of available memory. Measured throughput nudges the
//! base size up when downloads run below target.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

const MAX_SAMPLES: usize = 16;

pub struct BufferSizer {
    max_buffer_size: usize,
    min_buffer_size: usize,
    cached_available_memory: Mutex<Option<u64>>,
    /// Recent (bytes, duration) pairs
    throughput_samples: Mutex<VecDeque<(u64, Duration)>>,
    /// Bytes per second below which buffers are enlarged
    target_throughput: u64,
}

impl BufferSizer {
    pub fn new() -> Self {
        BufferSizer {
            max_buffer_size: 8 * 1024 * 1024,
            min_buffer_size: 64 * 1024,
            cached_available_memory: Mutex::new(None),
            throughput_samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
            target_throughput: 100 * 1024 * 1024,
        }
    }

    pub fn record_throughput(&self, bytes: u64, duration: Duration) {
        let mut samples = self.throughput_samples.lock();
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back((bytes, duration));
    }

    fn average_throughput(&self) -> Option<f64> {
        let samples = self.throughput_samples.lock();
        let bytes: u64 = samples.iter().map(|s| s.0).sum();
        let secs: f64 = samples.iter().map(|s| s.1.as_secs_f64()).sum();
        if secs > 0.0 {
            Some(bytes as f64 / secs)
        } else {
            None
        }
    }

    /// Available memory using sysinfo, floored at 1GB
    fn get_available_memory() -> u64 {
        use sysinfo::System;
        let mut sys = System::new();
        sys.refresh_memory();
        sys.available_memory().max(1024 * 1024 * 1024)
    }

    fn available_memory(&self) -> u64 {
        let mut cached = self.cached_available_memory.lock();
        *cached.get_or_insert_with(Self::get_available_memory)
    }

    /// Buffer for writing one downloaded file of `file_size` bytes
    pub fn calculate_buffer_size(&self, file_size: u64) -> usize {
        let mut base_size = 1024 * 1024;
        if let Some(avg) = self.average_throughput() {
            if avg < self.target_throughput as f64 {
                base_size *= 2;
            }
        }

        let optimal = if file_size < 1024 * 1024 {
            self.min_buffer_size
        } else if file_size <= 100 * 1024 * 1024 {
            base_size
        } else {
            self.max_buffer_size
        };

        // Never more than 10% of available memory
        let memory_limit = (self.available_memory() / 10) as usize;
        optimal
            .min(memory_limit)
            .min(self.max_buffer_size)
            .max(self.min_buffer_size)
    }

    /// Buffer per part when a file is split into `parts` concurrent ranges
    pub fn calculate_split_buffer_size(&self, file_size: u64, parts: usize) -> usize {
        let parts = parts.max(1);
        (self.calculate_buffer_size(file_size) / parts).max(self.min_buffer_size)
    }
}

impl Default for BufferSizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_detection() {
        let mem = BufferSizer::get_available_memory();
        assert!(mem >= 1024 * 1024 * 1024);
    }

    #[test]
    fn test_buffer_bounds() {
        let sizer = BufferSizer::new();
        assert_eq!(sizer.calculate_buffer_size(10), 64 * 1024);
        let big = sizer.calculate_buffer_size(1024 * 1024 * 1024);
        assert!(big >= 64 * 1024 && big <= 8 * 1024 * 1024);
    }

    #[test]
    fn test_slow_throughput_grows_buffer() {
        let sizer = BufferSizer::new();
        let before = sizer.calculate_buffer_size(50 * 1024 * 1024);
        sizer.record_throughput(1024, Duration::from_secs(1));
        let after = sizer.calculate_buffer_size(50 * 1024 * 1024);
        assert!(after >= before);
    }

    #[test]
    fn test_split_buffer_handles_zero_parts() {
        let sizer = BufferSizer::new();
        let whole = sizer.calculate_buffer_size(50 * 1024 * 1024);
        assert_eq!(sizer.calculate_split_buffer_size(50 * 1024 * 1024, 0), whole);
    }
}
