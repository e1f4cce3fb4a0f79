//! Remote item records as produced by a search

use serde::{Deserialize, Serialize};

/// Kind of a remote item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

impl Default for ItemType {
    fn default() -> Self {
        Self::File
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

/// One file or folder descriptor returned by the search collaborator.
///
/// Records are immutable once produced; every consumer works on clones read
/// back from a [`crate::stream::RecordStream`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemRecord {
    pub repo: String,
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub size: u64,
    pub actual_md5: String,
    pub actual_sha1: String,
    pub sha256: String,
    pub properties: Vec<Property>,
    pub created: String,
    pub modified: String,
}

impl ItemRecord {
    pub fn file(repo: &str, path: &str, name: &str) -> Self {
        Self {
            repo: repo.to_string(),
            path: path.to_string(),
            name: name.to_string(),
            item_type: ItemType::File,
            ..Default::default()
        }
    }

    pub fn folder(repo: &str, path: &str, name: &str) -> Self {
        Self {
            item_type: ItemType::Folder,
            ..Self::file(repo, path, name)
        }
    }

    pub fn is_folder(&self) -> bool {
        self.item_type == ItemType::Folder
    }

    /// `repo/path/name`, collapsing a root path of `"."`.
    pub fn relative_path(&self) -> String {
        if self.path.is_empty() || self.path == "." {
            format!("{}/{}", self.repo, self.name)
        } else {
            format!("{}/{}/{}", self.repo, self.path, self.name)
        }
    }

    /// Relative path with a trailing `/` for folders. Used by chain reductions
    /// and move/copy/delete urls so that `a/` never prefixes `ab`.
    pub fn chain_path(&self) -> String {
        let mut p = self.relative_path();
        if self.is_folder() && !p.ends_with('/') {
            p.push('/');
        }
        p
    }

    /// Directory key relative to the repository root (`path/name`, or `name`
    /// when the item lives at the root).
    pub fn directory_key(&self) -> String {
        if self.path.is_empty() || self.path == "." {
            self.name.clone()
        } else {
            format!("{}/{}", self.path, self.name)
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.push(Property {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }
}
