// src/core/mod.rs
pub mod estimator;
pub mod reader;
pub mod trie;
pub mod types;
