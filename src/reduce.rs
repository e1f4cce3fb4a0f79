//! Path reduction
//!
//! Collapses a stream of matched files and folders into the minimal set of
//! directory operations. Running this single-threaded before scheduling keeps
//! workers from racing to create overlapping directories.

use crate::record::ItemRecord;
use crate::stream::{RecordStream, RecordWriter, TaggedRecord};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Which end of each ancestor chain survives a reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFlavor {
    /// Keep the shallowest item; descendants move along with it.
    Top,
    /// Keep the deepest item per leaf; ancestors are implied.
    Bottom,
}

impl ChainFlavor {
    /// Flat layouts and placeholder targets discard the source hierarchy, so
    /// only the deepest items can be moved one by one.
    pub fn for_target(flat: bool, target: &str) -> Self {
        if flat || crate::target::has_placeholders(target) {
            ChainFlavor::Bottom
        } else {
            ChainFlavor::Top
        }
    }
}

/// Directory keys mapped to the transfer data of their first occurrence.
#[derive(Debug)]
pub struct DirectoryKeys<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for DirectoryKeys<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> DirectoryKeys<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, data: T) {
        self.entries.entry(key).or_insert(data);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Explicit directory creations, longest key first.
    ///
    /// The root (`"."`) and any key with a surviving descendant are dropped.
    /// Unless `flat` is set, keys already created as a side effect of a file
    /// transfer (`already_created`) are dropped too; they still count as
    /// descendants for the keys above them.
    pub fn reduce(self, already_created: &HashSet<String>, flat: bool) -> Vec<(String, T)> {
        let mut kept: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::new();
        for (key, data) in self.entries.into_iter().rev() {
            if key.is_empty() || key == "." {
                continue;
            }
            if has_descendant(&kept, &format!("{key}/")) {
                continue;
            }
            kept.insert(key.clone());
            if flat || !already_created.contains(&key) {
                out.push((key, data));
            }
        }
        out
    }
}

/// Reduce bare directory keys with no already-created filter.
pub fn reduce_directory_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut dirs = DirectoryKeys::new();
    for key in keys {
        dirs.insert(key, ());
    }
    dirs.reduce(&HashSet::new(), true)
        .into_iter()
        .map(|(k, _)| k)
        .collect()
}

fn has_descendant(kept: &BTreeSet<String>, dir_prefix: &str) -> bool {
    kept.range(dir_prefix.to_string()..)
        .next()
        .map(|k| k.starts_with(dir_prefix))
        .unwrap_or(false)
}

/// Anything in a stream that wraps an [`ItemRecord`].
pub trait ChainItem: Serialize + DeserializeOwned {
    fn item(&self) -> &ItemRecord;
}

impl ChainItem for ItemRecord {
    fn item(&self) -> &ItemRecord {
        self
    }
}

impl ChainItem for TaggedRecord<ItemRecord> {
    fn item(&self) -> &ItemRecord {
        &self.record
    }
}

/// Keep the shallowest item of every chain: `a/ | a/b | c | e/f` becomes
/// `a/ | c | e/f`. Output is sorted ascending by relative path.
pub fn reduce_top_chain<T: ChainItem>(
    items: &mut RecordStream<T>,
    chunk_size: usize,
) -> Result<RecordStream<T>> {
    reduce_chain(items, ChainFlavor::Top, chunk_size)
}

/// Keep the deepest item of every chain: `a/ | a/b/ | a/b/c` becomes `a/b/c`.
/// Output is sorted descending by relative path.
pub fn reduce_bottom_chain<T: ChainItem>(
    items: &mut RecordStream<T>,
    chunk_size: usize,
) -> Result<RecordStream<T>> {
    reduce_chain(items, ChainFlavor::Bottom, chunk_size)
}

pub fn reduce_chain<T: ChainItem>(
    items: &mut RecordStream<T>,
    flavor: ChainFlavor,
    chunk_size: usize,
) -> Result<RecordStream<T>> {
    let ascending = flavor == ChainFlavor::Top;
    let mut sorted =
        items.sort_unique_by_key(chunk_size, ascending, |entry| Ok(entry.item().chain_path()))?;
    // Sorting makes every chain contiguous, so only the last kept path matters
    let mut last: Option<String> = None;
    let mut writer = RecordWriter::new()?;
    while let Some(entry) = sorted.next_record() {
        let item = entry.item();
        if item.name == "." {
            continue;
        }
        let path = item.chain_path();
        let subsumed = match (&last, flavor) {
            (Some(last), ChainFlavor::Top) => last.ends_with('/') && path.starts_with(last.as_str()),
            (Some(last), ChainFlavor::Bottom) => path.ends_with('/') && last.starts_with(&path),
            (None, _) => false,
        };
        if subsumed {
            continue;
        }
        writer.write(&entry)?;
        last = Some(path);
    }
    sorted.take_error()?;
    writer.finish()
}
