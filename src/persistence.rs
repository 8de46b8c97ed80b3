// File: src/persistence.rs
//! On-disk artifact format.
//!
//! The tree file is a bincode (fixed-width little-endian integers, `u64` length
//! prefixes) encoding of [`TreeImage`]:
//!
//! ```text
//! magic: [u8; 4] = "PTRI"
//! format_version: u32
//! ready: bool
//! nodes: Vec<NodeRecord>          // node 0 is the root, depth-first pre-order
//!   edges: Vec<(u32, u32)>        // (code point, child index), ascending by code point
//!   terminal: bool
//!   frequency: u64                // 0 unless terminal
//!   word: Option<String>          // Some only when terminal
//! ```
//!
//! Children are always emitted in ascending code-point order, so identical input
//! produces a byte-identical tree file.
use crate::core::estimator::format_size;
use crate::core::trie::{CompiledArtifact, NodeId, Terminal, Trie, TrieNode, ROOT};
use crate::core::types::DictionaryTypeStats;
use crate::error::{CompileError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

pub const TRIE_FILE: &str = "precompiled_trie.bin";
pub const MEMORY_FILE: &str = "memory_usage.bin";
pub const VERSIONS_FILE: &str = "dictionary_versions.bin";
pub const INFO_FILE: &str = "dict_info.json";
pub const LOCK_FILE: &str = ".precompile.lock";

pub const FORMAT_MAGIC: [u8; 4] = *b"PTRI";
/// Bumped on any change to the node layout; also embedded in version tokens.
pub const FORMAT_VERSION: u32 = 1;

const EXPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize, Deserialize)]
struct TreeImage {
    magic: [u8; 4],
    format_version: u32,
    ready: bool,
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    edges: Vec<(u32, u32)>,
    terminal: bool,
    frequency: u64,
    word: Option<String>,
}

/// The `dict_info.json` document. For inspection, not for reloading the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictInfo {
    pub export_time: String,
    pub format_version: u32,
    pub total_entries: u64,
    pub node_count: u64,
    pub dict_types: Vec<DictTypeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictTypeInfo {
    #[serde(rename = "type")]
    pub dict_type: String,
    pub count: u64,
    pub memory: String,
    pub memory_bytes: u64,
    pub version: String,
}

/// Paths of a published artifact.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub trie: PathBuf,
    pub memory_usage: PathBuf,
    pub versions: PathBuf,
    pub info: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            trie: dir.join(TRIE_FILE),
            memory_usage: dir.join(MEMORY_FILE),
            versions: dir.join(VERSIONS_FILE),
            info: dir.join(INFO_FILE),
        }
    }
}

/// `precompiled-v<format>-<unix millis>`.
pub fn version_token(at: DateTime<Local>) -> String {
    format!("precompiled-v{}-{}", FORMAT_VERSION, at.timestamp_millis())
}

fn encode_tree(artifact: &CompiledArtifact) -> Result<TreeImage> {
    let trie = artifact.trie();
    let order = trie.preorder();
    if u32::try_from(order.len()).is_err() {
        return Err(CompileError::invalid(format!(
            "{} nodes exceed the u32 index space",
            order.len()
        )));
    }

    let mut position = vec![0u32; trie.node_count()];
    for (pos, &id) in order.iter().enumerate() {
        position[id] = pos as u32;
    }

    let nodes = order
        .iter()
        .map(|&id| {
            let node = trie.node(id);
            NodeRecord {
                edges: node.children().map(|(c, child)| (c as u32, position[child])).collect(),
                terminal: node.is_terminal(),
                frequency: node.frequency().unwrap_or(0),
                word: node.word().map(str::to_string),
            }
        })
        .collect();

    Ok(TreeImage {
        magic: FORMAT_MAGIC,
        format_version: FORMAT_VERSION,
        ready: artifact.is_ready(),
        nodes,
    })
}

fn decode_tree(image: TreeImage) -> Result<CompiledArtifact> {
    if image.magic != FORMAT_MAGIC {
        return Err(CompileError::invalid("bad magic"));
    }
    if image.format_version != FORMAT_VERSION {
        return Err(CompileError::invalid(format!(
            "unsupported format version {} (expected {})",
            image.format_version, FORMAT_VERSION
        )));
    }
    if !image.ready {
        return Err(CompileError::invalid("tree was not marked ready"));
    }
    if image.nodes.is_empty() {
        return Err(CompileError::invalid("missing root node"));
    }

    let len = image.nodes.len();
    let mut parents = vec![0u32; len];
    let mut nodes = Vec::with_capacity(len);
    for (idx, record) in image.nodes.into_iter().enumerate() {
        let mut children = BTreeMap::new();
        let mut last: Option<u32> = None;
        for (code, child) in record.edges {
            if last.is_some_and(|prev| code <= prev) {
                return Err(CompileError::invalid(format!("node {idx}: edges not strictly ascending")));
            }
            last = Some(code);
            let c = char::from_u32(code)
                .ok_or_else(|| CompileError::invalid(format!("node {idx}: invalid code point {code:#x}")))?;
            let child = child as usize;
            if child == ROOT || child >= len {
                return Err(CompileError::invalid(format!("node {idx}: child index {child} out of range")));
            }
            parents[child] += 1;
            children.insert(c, child);
        }

        let terminal = match (record.terminal, record.word) {
            (true, Some(word)) if !word.is_empty() => Some(Terminal { word, frequency: record.frequency }),
            (false, None) => None,
            _ => return Err(CompileError::invalid(format!("node {idx}: word must be stored exactly on terminal nodes"))),
        };
        nodes.push(TrieNode::with_parts(children, terminal));
    }

    if parents[ROOT] != 0 || parents[1..].iter().any(|&p| p != 1) {
        return Err(CompileError::invalid("node graph is not a tree"));
    }

    let trie = Trie::from_nodes(nodes);
    verify_paths(&trie)?;
    Ok(CompiledArtifact::from_parts(trie, true))
}

/// Every node must be reachable from the root and every stored word must spell its path.
fn verify_paths(trie: &Trie) -> Result<()> {
    let mut visited = 0usize;
    let mut stack: Vec<(NodeId, String)> = vec![(ROOT, String::new())];
    while let Some((id, path)) = stack.pop() {
        visited += 1;
        let node = trie.node(id);
        if let Some(word) = node.word() {
            if word != path {
                return Err(CompileError::invalid(format!("word {word:?} stored at path {path:?}")));
            }
        }
        for (c, child) in node.children() {
            let mut child_path = path.clone();
            child_path.push(c);
            stack.push((child, child_path));
        }
    }
    if visited != trie.node_count() {
        return Err(CompileError::invalid("unreachable nodes in tree"));
    }
    Ok(())
}

fn dict_info(
    artifact: &CompiledArtifact,
    stats: &[DictionaryTypeStats],
    exported_at: DateTime<Local>,
) -> DictInfo {
    DictInfo {
        export_time: exported_at.format(EXPORT_TIME_FORMAT).to_string(),
        format_version: FORMAT_VERSION,
        total_entries: stats.iter().map(|s| s.loaded_count).sum(),
        node_count: artifact.trie().node_count() as u64,
        dict_types: stats
            .iter()
            .map(|s| DictTypeInfo {
                dict_type: s.dict_type.clone(),
                count: s.loaded_count,
                memory: format_size(s.estimated_memory_bytes),
                memory_bytes: s.estimated_memory_bytes,
                version: s.version_token.clone(),
            })
            .collect(),
    }
}

/// Writes one file into `dir` under a temporary name. Nothing is visible at
/// `dir/name` until the returned handle is persisted.
fn stage<F>(dir: &Path, name: &str, write: F) -> Result<(NamedTempFile, PathBuf)>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let target = dir.join(name);
    let temp_file = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .tempfile_in(dir)
        .map_err(|e| CompileError::output_write(&target, e))?;
    {
        let mut writer = BufWriter::new(temp_file.as_file());
        write(&mut writer)?;
        writer.flush().map_err(|e| CompileError::output_write(&target, e))?;
    }
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| CompileError::output_write(&target, e))?;
    Ok((temp_file, target))
}

/// Excludes concurrent publications into the same directory. Removed on drop.
///
/// The file holds the owner's PID. A run killed by a signal, or a release build
/// that aborts on panic, skips `Drop` and leaves the file behind; the `Locked`
/// error names it so it can be deleted by hand.
struct PublishLock {
    path: PathBuf,
}

impl PublishLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Construct first so the file is removed if the holder write fails.
                let lock = Self { path };
                writeln!(file, "{}", std::process::id())
                    .map_err(|e| CompileError::output_write(&lock.path, e))?;
                Ok(lock)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(CompileError::Locked { path }),
            Err(e) => Err(CompileError::output_write(path, e)),
        }
    }
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

/// Serializes a ready artifact and its per-type statistics into `out_dir`.
///
/// `stats` is written in the given order into the summary; the binary maps are
/// keyed by type. Existing files of the same names are replaced atomically.
pub fn save_artifact(
    out_dir: &Path,
    artifact: &CompiledArtifact,
    stats: &[DictionaryTypeStats],
    exported_at: DateTime<Local>,
) -> Result<ArtifactPaths> {
    if !artifact.is_ready() {
        return Err(CompileError::invalid("refusing to save an artifact that is not ready"));
    }

    // Encode everything up front so a failure never touches the directory.
    let tree = encode_tree(artifact)?;
    let memory_usage: BTreeMap<&str, u64> = stats
        .iter()
        .map(|s| (s.dict_type.as_str(), s.estimated_memory_bytes))
        .collect();
    let versions: BTreeMap<&str, &str> = stats
        .iter()
        .map(|s| (s.dict_type.as_str(), s.version_token.as_str()))
        .collect();
    let info = dict_info(artifact, stats, exported_at);

    fs::create_dir_all(out_dir).map_err(|e| CompileError::output_write(out_dir, e))?;
    let _lock = PublishLock::acquire(out_dir)?;
    info!(dir = %out_dir.display(), "saving precompiled trie");

    let paths = ArtifactPaths::in_dir(out_dir);
    if paths.trie.exists() {
        warn!(path = %paths.trie.display(), "replacing existing artifact");
    }

    // Metadata first, tree last.
    let staged = vec![
        stage(out_dir, MEMORY_FILE, |w| Ok(bincode::serialize_into(w, &memory_usage)?))?,
        stage(out_dir, VERSIONS_FILE, |w| Ok(bincode::serialize_into(w, &versions)?))?,
        stage(out_dir, INFO_FILE, |w| {
            serde_json::to_writer_pretty(&mut *w, &info)?;
            writeln!(w).map_err(|e| CompileError::output_write(out_dir.join(INFO_FILE), e))
        })?,
        stage(out_dir, TRIE_FILE, |w| Ok(bincode::serialize_into(w, &tree)?))?,
    ];

    let mut published: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (temp_file, target) in staged {
        if let Err(e) = temp_file.persist(&target) {
            if published.is_empty() {
                return Err(CompileError::output_write(target, e.error));
            }
            error!(path = %target.display(), ?published, "publication interrupted, artifact set is mixed");
            return Err(CompileError::Publish { path: target, published, source: e.error });
        }
        debug!(path = %target.display(), "published");
        published.push(target);
    }

    let size = fs::metadata(&paths.trie)
        .map_err(|e| CompileError::output_write(&paths.trie, e))?
        .len();
    info!(size = %format_size(size), nodes = artifact.trie().node_count(), "precompiled trie saved");
    Ok(paths)
}

/// Reads the tree file back and validates it against the node-layout contract.
pub fn load_artifact(dir: &Path) -> Result<CompiledArtifact> {
    let path = dir.join(TRIE_FILE);
    let file = File::open(&path).map_err(|e| CompileError::source_read(&path, e))?;
    let image: TreeImage = bincode::deserialize_from(BufReader::new(file))?;
    decode_tree(image)
}

pub fn load_memory_usage(dir: &Path) -> Result<BTreeMap<String, u64>> {
    let path = dir.join(MEMORY_FILE);
    let file = File::open(&path).map_err(|e| CompileError::source_read(&path, e))?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}

pub fn load_versions(dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = dir.join(VERSIONS_FILE);
    let file = File::open(&path).map_err(|e| CompileError::source_read(&path, e))?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}

pub fn load_info(dir: &Path) -> Result<DictInfo> {
    let path = dir.join(INFO_FILE);
    let file = File::open(&path).map_err(|e| CompileError::source_read(&path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ready(words: &[(&str, u64)]) -> CompiledArtifact {
        let mut artifact = CompiledArtifact::new();
        let trie = artifact.trie_mut().unwrap();
        for &(w, f) in words {
            trie.insert(w, f);
        }
        artifact.mark_ready();
        artifact
    }

    fn stats(dict_type: &str, count: u64) -> DictionaryTypeStats {
        DictionaryTypeStats {
            dict_type: dict_type.to_string(),
            loaded_count: count,
            estimated_memory_bytes: crate::core::estimator::estimate_memory(count),
            version_token: format!("precompiled-v{FORMAT_VERSION}-0"),
        }
    }

    fn fixed_time() -> DateTime<Local> {
        Local.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn tree_round_trips() {
        let artifact = ready(&[("爱", 100), ("爱你", 50), ("我", 7), ("我们", 3)]);
        let image = encode_tree(&artifact).unwrap();
        let bytes = bincode::serialize(&image).unwrap();
        let back = decode_tree(bincode::deserialize(&bytes).unwrap()).unwrap();
        assert!(back.is_ready());
        assert_eq!(back.trie().words(), artifact.trie().words());
        assert_eq!(back.trie().node_count(), artifact.trie().node_count());
    }

    #[test]
    fn encoding_ignores_insertion_order() {
        let a = ready(&[("b", 1), ("a", 2), ("ab", 3)]);
        let b = ready(&[("ab", 3), ("a", 2), ("b", 1)]);
        let bytes_a = bincode::serialize(&encode_tree(&a).unwrap()).unwrap();
        let bytes_b = bincode::serialize(&encode_tree(&b).unwrap()).unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn header_layout_is_fixed() {
        let bytes = bincode::serialize(&encode_tree(&ready(&[])).unwrap()).unwrap();
        assert_eq!(&bytes[..4], b"PTRI");
        assert_eq!(&bytes[4..8], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(bytes[8], 1); // ready
        assert_eq!(&bytes[9..17], &1u64.to_le_bytes()); // root only
    }

    #[test]
    fn decode_rejects_unready_and_foreign_trees() {
        let mut image = encode_tree(&ready(&[("词", 1)])).unwrap();
        image.ready = false;
        assert!(matches!(decode_tree(image), Err(CompileError::InvalidArtifact(_))));

        let mut image = encode_tree(&ready(&[("词", 1)])).unwrap();
        image.format_version = FORMAT_VERSION + 1;
        assert!(decode_tree(image).is_err());

        let mut image = encode_tree(&ready(&[("词", 1)])).unwrap();
        image.magic = *b"XXXX";
        assert!(decode_tree(image).is_err());
    }

    #[test]
    fn decode_rejects_word_at_wrong_path() {
        let mut image = encode_tree(&ready(&[("爱", 1)])).unwrap();
        image.nodes[1].word = Some("恨".to_string());
        assert!(decode_tree(image).is_err());
    }

    #[test]
    fn decode_rejects_shared_children() {
        let mut image = encode_tree(&ready(&[("a", 1), ("b", 1)])).unwrap();
        let first = image.nodes[0].edges[0].1;
        image.nodes[0].edges[1].1 = first;
        assert!(decode_tree(image).is_err());
    }

    #[test]
    fn save_refuses_unready_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dict");
        let err = save_artifact(&out, &CompiledArtifact::new(), &[], fixed_time()).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArtifact(_)));
        assert!(!out.exists());
    }

    #[test]
    fn save_writes_all_files_and_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("assets").join("dict");
        let artifact = ready(&[("爱", 100), ("爱你", 50)]);
        let paths = save_artifact(&out, &artifact, &[stats("chars", 2)], fixed_time()).unwrap();

        assert!(paths.trie.is_file() && paths.memory_usage.is_file());
        assert!(paths.versions.is_file() && paths.info.is_file());
        assert!(!out.join(LOCK_FILE).exists());

        let leftovers: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "staging files left behind: {leftovers:?}");

        assert_eq!(load_memory_usage(&out).unwrap()["chars"], 24);
        assert_eq!(load_versions(&out).unwrap()["chars"], format!("precompiled-v{FORMAT_VERSION}-0"));
        let info = load_info(&out).unwrap();
        assert_eq!(info.total_entries, 2);
        assert_eq!(info.dict_types[0].memory, "24.0 B");
        assert_eq!(load_artifact(&out).unwrap().trie().words(), artifact.trie().words());
    }

    #[test]
    fn save_keeps_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("emoji.json"), "{}").unwrap();
        save_artifact(dir.path(), &ready(&[("词", 1)]), &[stats("base", 1)], fixed_time()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("emoji.json")).unwrap(), "{}");
    }

    #[test]
    fn held_lock_blocks_second_publisher() {
        let dir = tempfile::tempdir().unwrap();
        let _held = PublishLock::acquire(dir.path()).unwrap();
        let err = save_artifact(dir.path(), &ready(&[("词", 1)]), &[], fixed_time()).unwrap_err();
        assert!(matches!(err, CompileError::Locked { .. }));
        assert!(!dir.path().join(TRIE_FILE).exists());

        let message = err.to_string();
        assert!(message.contains(LOCK_FILE), "{message}");
        assert!(message.contains("delete this file"), "{message}");
    }

    #[test]
    fn lock_records_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PublishLock::acquire(dir.path()).unwrap();
        let holder = fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    fn dot_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn interrupted_publish_reports_mixed_set() {
        let dir = tempfile::tempdir().unwrap();
        // A directory squatting on the tree's name makes the last rename fail.
        fs::create_dir(dir.path().join(TRIE_FILE)).unwrap();

        let err = save_artifact(dir.path(), &ready(&[("词", 1)]), &[stats("base", 1)], fixed_time())
            .unwrap_err();
        match &err {
            CompileError::Publish { path, published, .. } => {
                assert_eq!(path, &dir.path().join(TRIE_FILE));
                assert_eq!(
                    published,
                    &vec![
                        dir.path().join(MEMORY_FILE),
                        dir.path().join(VERSIONS_FILE),
                        dir.path().join(INFO_FILE),
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("mixed"));
        assert!(dot_files(dir.path()).is_empty(), "leftovers: {:?}", dot_files(dir.path()));
    }

    #[test]
    fn first_rename_failure_is_a_plain_write_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(MEMORY_FILE)).unwrap();

        let err = save_artifact(dir.path(), &ready(&[("词", 1)]), &[stats("base", 1)], fixed_time())
            .unwrap_err();
        assert!(matches!(err, CompileError::OutputWrite { .. }), "{err:?}");
        assert!(!dir.path().join(TRIE_FILE).exists());
        assert!(dot_files(dir.path()).is_empty());
    }

    #[test]
    fn version_token_carries_format_version() {
        assert_eq!(version_token(fixed_time()), "precompiled-v1-1700000000000");
    }
}
