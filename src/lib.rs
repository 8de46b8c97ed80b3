// src/lib.rs

pub mod compiler;
pub mod core;
pub mod error;
pub mod persistence;

pub use crate::compiler::{compile, CompileConfig, CompileReport};
pub use crate::core::trie::{CompiledArtifact, Trie, TrieNode};
pub use crate::core::types::{DictionarySource, DictionaryTypeStats, Entry};
pub use crate::error::{CompileError, Result};
