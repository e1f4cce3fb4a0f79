//! Disk-backed record streams
//!
//! Records are written as JSON lines into a temp file. Readers iterate lazily
//! and forward-only, can be restarted with [`RecordStream::reset`], and can be
//! sorted by an arbitrary projection with an external merge sort so memory
//! stays bounded by the sort chunk size instead of the number of records.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};

/// Default number of records held in memory per sort chunk
pub const DEFAULT_SORT_CHUNK: usize = 50_000;

/// Single writer producing a [`RecordStream`].
pub struct RecordWriter<T> {
    out: BufWriter<File>,
    path: TempPath,
    count: usize,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> RecordWriter<T> {
    pub fn new() -> Result<Self> {
        let (file, path) = NamedTempFile::new()
            .context("Failed to create record stream file")?
            .into_parts();
        Ok(Self {
            out: BufWriter::new(file),
            path,
            count: 0,
            _marker: PhantomData,
        })
    }

    pub fn write(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush and hand the file over to readers. Writing is over after this.
    pub fn finish(mut self) -> Result<RecordStream<T>>
    where
        T: DeserializeOwned,
    {
        self.out.flush().context("Failed to flush record stream")?;
        drop(self.out);
        Ok(RecordStream::open(Arc::new(self.path)))
    }
}

/// Lazy, restartable reader over a finished record file.
///
/// The first read or decode failure stops iteration and is kept until
/// [`RecordStream::take_error`] is called; callers check it after each
/// consuming loop.
pub struct RecordStream<T> {
    path: Arc<TempPath>,
    reader: Option<BufReader<File>>,
    error: Option<anyhow::Error>,
    line: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStream<T> {
    fn clone(&self) -> Self {
        Self {
            path: Arc::clone(&self.path),
            reader: None,
            error: None,
            line: String::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> RecordStream<T> {
    fn open(path: Arc<TempPath>) -> Self {
        Self {
            path,
            reader: None,
            error: None,
            line: String::new(),
            _marker: PhantomData,
        }
    }

    pub fn empty() -> Result<Self> {
        RecordWriter::new()?.finish()
    }

    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let mut writer = RecordWriter::new()?;
        for record in records {
            writer.write(&record)?;
        }
        writer.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record, or `None` at the end or on the first error.
    pub fn next_record(&mut self) -> Option<T> {
        if self.error.is_some() {
            return None;
        }
        if self.reader.is_none() {
            match File::open(&*self.path) {
                Ok(f) => self.reader = Some(BufReader::new(f)),
                Err(e) => {
                    self.error = Some(anyhow::Error::new(e).context("Failed to open record stream"));
                    return None;
                }
            }
        }
        let reader = self.reader.as_mut()?;
        loop {
            self.line.clear();
            match reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = self.line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    return match serde_json::from_str(line) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            self.error =
                                Some(anyhow::Error::new(e).context("Corrupt record stream line"));
                            None
                        }
                    };
                }
                Err(e) => {
                    self.error = Some(anyhow::Error::new(e).context("Failed to read record stream"));
                    return None;
                }
            }
        }
    }

    /// Rewind to the first record and clear any stored error.
    pub fn reset(&mut self) {
        self.reader = None;
        self.error = None;
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Result<()> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Count records in one pass without disturbing the current position.
    pub fn length(&self) -> Result<usize> {
        let f = File::open(&*self.path).context("Failed to open record stream")?;
        let mut count = 0;
        for line in BufReader::new(f).lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Release this handle. The file is removed once every clone is gone.
    pub fn close(self) {}

    /// Collect the whole stream; meant for small streams and tests.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        self.reset();
        let mut out = Vec::new();
        while let Some(record) = self.next_record() {
            out.push(record);
        }
        self.take_error()?;
        self.reset();
        Ok(out)
    }

    /// New stream ordered by `key_fn`. Equal keys keep their input order.
    pub fn sort_by_key<K, F>(&mut self, chunk_size: usize, ascending: bool, key_fn: F) -> Result<Self>
    where
        K: Ord,
        F: FnMut(&T) -> Result<K>,
    {
        self.external_sort(chunk_size, ascending, false, key_fn)
    }

    /// Like [`RecordStream::sort_by_key`] but keeps only the first record for
    /// each distinct key.
    pub fn sort_unique_by_key<K, F>(
        &mut self,
        chunk_size: usize,
        ascending: bool,
        key_fn: F,
    ) -> Result<Self>
    where
        K: Ord,
        F: FnMut(&T) -> Result<K>,
    {
        self.external_sort(chunk_size, ascending, true, key_fn)
    }

    fn external_sort<K, F>(
        &mut self,
        chunk_size: usize,
        ascending: bool,
        unique: bool,
        mut key_fn: F,
    ) -> Result<Self>
    where
        K: Ord,
        F: FnMut(&T) -> Result<K>,
    {
        let chunk_size = chunk_size.max(1);
        self.reset();
        let mut chunks: Vec<RecordStream<T>> = Vec::new();
        let mut buffer: Vec<(K, T)> = Vec::with_capacity(chunk_size.min(4096));
        while let Some(record) = self.next_record() {
            let key = key_fn(&record)?;
            buffer.push((key, record));
            if buffer.len() == chunk_size {
                chunks.push(write_sorted_chunk(&mut buffer, ascending)?);
            }
        }
        self.take_error()?;
        self.reset();
        if !buffer.is_empty() {
            chunks.push(write_sorted_chunk(&mut buffer, ascending)?);
        }

        let mut heap = BinaryHeap::with_capacity(chunks.len());
        for (chunk, stream) in chunks.iter_mut().enumerate() {
            if let Some(record) = stream.next_record() {
                let key = key_fn(&record)?;
                heap.push(MergeEntry { key, chunk, record, ascending });
            }
        }

        let mut writer = RecordWriter::new()?;
        let mut last_key: Option<K> = None;
        while let Some(entry) = heap.pop() {
            let MergeEntry { key, chunk, record, .. } = entry;
            if let Some(next) = chunks[chunk].next_record() {
                let next_key = key_fn(&next)?;
                heap.push(MergeEntry {
                    key: next_key,
                    chunk,
                    record: next,
                    ascending,
                });
            }
            if unique && last_key.as_ref() == Some(&key) {
                continue;
            }
            writer.write(&record)?;
            last_key = Some(key);
        }
        for chunk in chunks.iter_mut() {
            chunk.take_error()?;
        }
        writer.finish()
    }
}

impl<T: Serialize + DeserializeOwned> Iterator for RecordStream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.next_record()
    }
}

fn write_sorted_chunk<K: Ord, T: Serialize + DeserializeOwned>(
    buffer: &mut Vec<(K, T)>,
    ascending: bool,
) -> Result<RecordStream<T>> {
    if ascending {
        buffer.sort_by(|a, b| a.0.cmp(&b.0));
    } else {
        buffer.sort_by(|a, b| b.0.cmp(&a.0));
    }
    let mut writer = RecordWriter::new()?;
    for (_, record) in buffer.drain(..) {
        writer.write(&record)?;
    }
    writer.finish()
}

/// Heap slot for the k-way merge. Ties break on chunk index so the merge is
/// stable across chunks.
struct MergeEntry<K, T> {
    key: K,
    chunk: usize,
    record: T,
    ascending: bool,
}

impl<K: Ord, T> PartialEq for MergeEntry<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, T> Eq for MergeEntry<K, T> {}

impl<K: Ord, T> PartialOrd for MergeEntry<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for MergeEntry<K, T> {
    // BinaryHeap pops the greatest entry first
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = if self.ascending {
            other.key.cmp(&self.key)
        } else {
            self.key.cmp(&other.key)
        };
        by_key.then_with(|| other.chunk.cmp(&self.chunk))
    }
}

/// Record tagged with the index of the parameter group that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedRecord<T> {
    pub record: T,
    pub spec_index: usize,
}

/// Concatenate several streams into one, tagging every record with the
/// position of its source stream in `streams`.
pub fn merge_tagged<T>(streams: &mut [RecordStream<T>]) -> Result<RecordStream<TaggedRecord<T>>>
where
    T: Serialize + DeserializeOwned,
{
    let mut writer = RecordWriter::new()?;
    for (spec_index, stream) in streams.iter_mut().enumerate() {
        stream.reset();
        while let Some(record) = stream.next_record() {
            writer.write(&TaggedRecord { record, spec_index })?;
        }
        stream.take_error()?;
        stream.reset();
    }
    writer.finish()
}
