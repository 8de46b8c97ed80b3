// File: src/compiler.rs
use crate::core::estimator::estimate_memory;
use crate::core::reader::DictionaryReader;
use crate::core::trie::CompiledArtifact;
use crate::core::types::{DictionarySource, DictionaryTypeStats};
use crate::error::{CompileError, Result};
use crate::persistence::{save_artifact, version_token, ArtifactPaths};
use chrono::Local;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

pub const TYPE_CHARS: &str = "chars";
pub const TYPE_BASE: &str = "base";
pub const DEFAULT_DICT_ROOT: &str = "cn_dicts";
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Default priority list: single characters first, then the base lexicon, so
/// the base lexicon's frequency wins when both contain the same word.
pub fn default_sources(dict_root: &Path) -> Vec<DictionarySource> {
    vec![
        DictionarySource::new(TYPE_CHARS, dict_root.join("chars.dict.yaml")),
        DictionarySource::new(TYPE_BASE, dict_root.join("base.dict.yaml")),
    ]
}

/// What to compile and where to put it.
///
/// Sources are processed in order; on duplicate words the later source wins.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    pub sources: Vec<DictionarySource>,
    pub output_dir: PathBuf,
    pub progress_interval: u64,
}

impl CompileConfig {
    pub fn new(sources: Vec<DictionarySource>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            output_dir: output_dir.into(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Summary of one source's load, including the tolerated parse problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub stats: DictionaryTypeStats,
    pub skipped_lines: u64,
    pub defaulted_frequencies: u64,
    pub lossy_lines: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct CompileReport {
    pub sources: Vec<SourceReport>,
    pub total_entries: u64,
    pub node_count: usize,
    pub word_count: usize,
    pub paths: ArtifactPaths,
}

/// Streams one source into the artifact's trie and returns its statistics.
pub fn load_source(
    artifact: &mut CompiledArtifact,
    source: &DictionarySource,
    progress_interval: u64,
) -> Result<SourceReport> {
    info!(dict_type = %source.dict_type, path = %source.path.display(), "building trie from dictionary file");
    let start = Instant::now();

    let trie = artifact
        .trie_mut()
        .ok_or_else(|| CompileError::invalid("artifact already marked ready"))?;
    let mut reader = DictionaryReader::open(source)?;
    let mut loaded_count: u64 = 0;
    for entry in reader.by_ref() {
        let entry = entry?;
        trie.insert(&entry.word, entry.frequency);
        loaded_count += 1;
        if progress_interval > 0 && loaded_count % progress_interval == 0 {
            info!(loaded = loaded_count, dict_type = %source.dict_type, "loading");
        }
    }

    let stats = DictionaryTypeStats {
        dict_type: source.dict_type.clone(),
        loaded_count,
        estimated_memory_bytes: estimate_memory(loaded_count),
        version_token: version_token(Local::now()),
    };
    let elapsed_ms = start.elapsed().as_millis();
    info!(
        dict_type = %stats.dict_type,
        entries = loaded_count,
        skipped = reader.skipped_lines(),
        defaulted = reader.defaulted_frequencies(),
        lossy = reader.lossy_lines(),
        elapsed_ms = elapsed_ms as u64,
        "dictionary type build completed"
    );

    Ok(SourceReport {
        stats,
        skipped_lines: reader.skipped_lines(),
        defaulted_frequencies: reader.defaulted_frequencies(),
        lossy_lines: reader.lossy_lines(),
        elapsed_ms,
    })
}

/// Reads every source into one shared trie, then serializes exactly once.
///
/// Type labels must be unique because statistics are keyed by type. Nothing is
/// written unless every source loads; a read failure aborts the run before the
/// output directory is touched.
pub fn compile(config: &CompileConfig) -> Result<CompileReport> {
    if config.sources.is_empty() {
        return Err(CompileError::NoSources);
    }
    let mut seen = HashSet::with_capacity(config.sources.len());
    for source in &config.sources {
        if !seen.insert(source.dict_type.as_str()) {
            return Err(CompileError::DuplicateType { dict_type: source.dict_type.clone() });
        }
    }

    let mut artifact = CompiledArtifact::new();
    let mut reports = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        reports.push(load_source(&mut artifact, source, config.progress_interval)?);
    }
    artifact.mark_ready();

    let total_entries = reports.iter().map(|r| r.stats.loaded_count).sum();
    info!(total_entries, nodes = artifact.trie().node_count(), words = artifact.trie().word_count(), "all dictionaries loaded");

    let stats: Vec<DictionaryTypeStats> = reports.iter().map(|r| r.stats.clone()).collect();
    let paths = save_artifact(&config.output_dir, &artifact, &stats, Local::now())?;

    Ok(CompileReport {
        sources: reports,
        total_entries,
        node_count: artifact.trie().node_count(),
        word_count: artifact.trie().word_count(),
        paths,
    })
}
