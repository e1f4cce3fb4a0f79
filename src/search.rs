//! Search collaborator and the file-spec parameters shared by every operation

use crate::record::ItemRecord;
use crate::stream::RecordStream;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// How a file spec selects remote items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecType {
    Wildcard,
    Build,
    Aql,
}

/// One file spec. Every operation's parameters embed one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonParams {
    pub pattern: String,
    pub target: String,
    /// Raw query for the search collaborator; never interpreted here
    pub aql: String,
    /// `name/number` of a build whose artifacts are selected
    pub build: String,
    pub recursive: bool,
    pub include_dirs: bool,
    pub exclusions: Vec<String>,
    /// `key=value` properties, attached on upload and matched on search
    pub props: Vec<(String, String)>,
    /// Treat `pattern` as a regular expression instead of a wildcard
    pub regexp: bool,
}

impl Default for CommonParams {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            target: String::new(),
            aql: String::new(),
            build: String::new(),
            recursive: true,
            include_dirs: false,
            exclusions: Vec::new(),
            props: Vec::new(),
            regexp: false,
        }
    }
}

impl CommonParams {
    pub fn new(pattern: &str, target: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    pub fn spec_type(&self) -> SpecType {
        if !self.build.is_empty()
            && self.aql.is_empty()
            && (self.pattern.is_empty() || self.pattern == "*")
        {
            SpecType::Build
        } else if !self.aql.is_empty() {
            SpecType::Aql
        } else {
            SpecType::Wildcard
        }
    }
}

/// Resolves a file spec into a stream of matching remote items.
pub trait Searcher: Send + Sync {
    fn search(&self, spec: &CommonParams) -> Result<RecordStream<ItemRecord>>;
}
