//! Configuration for view creation.
//!
//! Every setting has a default and, where numeric, a permitted range that
//! [`ImmvConfig::validate`] enforces. Hosts usually embed the settings in
//! their own configuration file and hand them over as JSON.

use serde::{Deserialize, Serialize};

use crate::error::ImmvError;

/// Default maximum nesting depth for query-tree walks.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 1000;
/// Permitted range for `max_tree_depth`.
pub const MAX_TREE_DEPTH_RANGE: (usize, usize) = (16, 100_000);

/// Default identifier buffer length, including the terminator byte.
pub const DEFAULT_NAME_DATA_LEN: usize = 64;
/// Permitted range for `name_data_len`.
pub const NAME_DATA_LEN_RANGE: (usize, usize) = (16, 1024);

/// Access method used for automatically created indexes.
pub const DEFAULT_INDEX_ACCESS_METHOD: &str = "btree";

/// Settings that shape how a view is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmvConfig {
    /// Whether a unique index is created automatically on new views.
    pub auto_index: bool,

    /// Access method for the automatically created index.
    pub index_access_method: String,

    /// Maximum query nesting accepted by the tree walkers.
    pub max_tree_depth: usize,

    /// Identifier buffer length. Generated names are truncated to one byte
    /// less than this.
    pub name_data_len: usize,
}

impl Default for ImmvConfig {
    fn default() -> Self {
        Self {
            auto_index: true,
            index_access_method: DEFAULT_INDEX_ACCESS_METHOD.to_string(),
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            name_data_len: DEFAULT_NAME_DATA_LEN,
        }
    }
}

impl ImmvConfig {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ImmvError> {
        let config: ImmvConfig = serde_json::from_str(json)
            .map_err(|e| ImmvError::InvalidConfig(format!("malformed settings: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting against its permitted range.
    pub fn validate(&self) -> Result<(), ImmvError> {
        let (lo, hi) = MAX_TREE_DEPTH_RANGE;
        if !(lo..=hi).contains(&self.max_tree_depth) {
            return Err(ImmvError::InvalidConfig(format!(
                "max_tree_depth must be between {lo} and {hi}, got {}",
                self.max_tree_depth
            )));
        }
        let (lo, hi) = NAME_DATA_LEN_RANGE;
        if !(lo..=hi).contains(&self.name_data_len) {
            return Err(ImmvError::InvalidConfig(format!(
                "name_data_len must be between {lo} and {hi}, got {}",
                self.name_data_len
            )));
        }
        if self.index_access_method.trim().is_empty() {
            return Err(ImmvError::InvalidConfig(
                "index_access_method must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest identifier, in bytes, that fits the name buffer.
    pub fn max_identifier_len(&self) -> usize {
        self.name_data_len - 1
    }
}

/// Truncate `name` to at most `max_len` bytes without splitting a character.
pub fn truncate_identifier(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
