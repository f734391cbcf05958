//! Hierarchical attribute store with dotted-path access.
//!
//! Instrument and calibration metadata arrive as nested, open-ended
//! dictionaries. `DictionaryTree` keeps them as a tagged value tree so that
//! lookups like `"Acquisition_instrument.TEM.beam_energy"` are explicit and
//! typed at the call site.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Sequence(Vec<MetadataValue>),
    Tree(DictionaryTree),
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&DictionaryTree> {
        match self {
            MetadataValue::Tree(t) => Some(t),
            _ => None,
        }
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<DictionaryTree> for MetadataValue {
    fn from(value: DictionaryTree) -> Self {
        MetadataValue::Tree(value)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(value: Vec<T>) -> Self {
        MetadataValue::Sequence(value.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DictionaryTree {
    entries: BTreeMap<String, MetadataValue>,
}

impl DictionaryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, path: &str) -> Option<&MetadataValue> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.entries.get(first)?;
        for part in parts {
            current = current.as_tree()?.entries.get(part)?;
        }
        Some(current)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(MetadataValue::as_f64)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(MetadataValue::as_str)
    }

    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set `path` to `value`, creating intermediate nodes.
    ///
    /// Fails if an intermediate path segment already holds a leaf value.
    pub fn set(&mut self, path: &str, value: impl Into<MetadataValue>) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(SpecError::MetadataPath {
                path: path.to_string(),
                reason: "empty path segment",
            });
        }
        let (last, parents) = parts.split_last().ok_or(SpecError::MetadataPath {
            path: path.to_string(),
            reason: "empty path",
        })?;

        let mut node = self;
        for part in parents {
            let entry = node
                .entries
                .entry((*part).to_string())
                .or_insert_with(|| MetadataValue::Tree(DictionaryTree::new()));
            node = match entry {
                MetadataValue::Tree(t) => t,
                _ => {
                    return Err(SpecError::MetadataPath {
                        path: path.to_string(),
                        reason: "intermediate segment is not a mapping",
                    });
                }
            };
        }
        node.entries.insert((*last).to_string(), value.into());
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<MetadataValue> {
        match path.rsplit_once('.') {
            None => self.entries.remove(path),
            Some((parent, key)) => self.get_tree_mut(parent)?.entries.remove(key),
        }
    }

    /// Recursively copy every entry of `other` into `self`, overwriting leaves.
    pub fn merge(&mut self, other: &DictionaryTree) {
        for (key, value) in &other.entries {
            match (self.entries.get_mut(key), value) {
                (Some(MetadataValue::Tree(mine)), MetadataValue::Tree(theirs)) => mine.merge(theirs),
                _ => {
                    self.entries.insert(key.clone(), value.clone());
                }
            }
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn get_tree_mut(&mut self, path: &str) -> Option<&mut DictionaryTree> {
        let mut node = self;
        for part in path.split('.') {
            node = match node.entries.get_mut(part)? {
                MetadataValue::Tree(t) => t,
                _ => return None,
            };
        }
        Some(node)
    }
}
