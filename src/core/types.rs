// src/core/types.rs
use std::path::PathBuf;

/// Frequency recorded when the source field is absent or unparsable.
pub const DEFAULT_FREQUENCY: u64 = 1;

/// A parsed dictionary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub word: String,
    pub frequency: u64,
}

impl Entry {
    pub fn new(word: impl Into<String>, frequency: u64) -> Self {
        Self { word: word.into(), frequency }
    }
}

/// One input file tagged with the logical category its statistics are grouped under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionarySource {
    pub dict_type: String,
    pub path: PathBuf,
}

impl DictionarySource {
    pub fn new(dict_type: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { dict_type: dict_type.into(), path: path.into() }
    }
}

/// Statistics recorded once a dictionary source has finished loading.
/// Never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryTypeStats {
    pub dict_type: String,
    pub loaded_count: u64,
    /// Heuristic upper bound, see [`crate::core::estimator`].
    pub estimated_memory_bytes: u64,
    /// Compilation identifier of the form `precompiled-v<format>-<millis>`.
    /// Not a content hash.
    pub version_token: String,
}
