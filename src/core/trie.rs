// --- File: src/core/trie.rs
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Index of a node inside the trie arena.
pub type NodeId = usize;

/// The root always lives at index 0.
pub const ROOT: NodeId = 0;

/// Payload carried only by nodes that end a complete dictionary word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub word: String,
    pub frequency: u64,
}

/// One character position on a root-to-node path.
///
/// Children are kept in a `BTreeMap` so that every traversal visits siblings in
/// ascending code-point order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrieNode {
    children: BTreeMap<char, NodeId>,
    terminal: Option<Terminal>,
}

impl TrieNode {
    pub(crate) fn with_parts(children: BTreeMap<char, NodeId>, terminal: Option<Terminal>) -> Self {
        Self { children, terminal }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn frequency(&self) -> Option<u64> {
        self.terminal.as_ref().map(|t| t.frequency)
    }

    /// The complete word, stored only on terminal nodes.
    pub fn word(&self) -> Option<&str> {
        self.terminal.as_ref().map(|t| t.word.as_str())
    }

    pub fn child(&self, c: char) -> Option<NodeId> {
        self.children.get(&c).copied()
    }

    /// Children in ascending character order.
    pub fn children(&self) -> impl Iterator<Item = (char, NodeId)> + '_ {
        self.children.iter().map(|(&c, &id)| (c, id))
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// An append-only prefix tree keyed by `char`.
///
/// Each edge is one Unicode scalar value, which is the unit the keyboard runtime
/// queries by for CJK text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trie {
    nodes: Vec<TrieNode>,
    word_count: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self { nodes: vec![TrieNode::default()], word_count: 0 }
    }

    /// Rebuilds a trie from an already-validated node arena.
    pub(crate) fn from_nodes(nodes: Vec<TrieNode>) -> Self {
        let word_count = nodes.iter().filter(|n| n.is_terminal()).count();
        Self { nodes, word_count }
    }

    /// Inserts `word` with `frequency`. O(k) in the number of characters.
    ///
    /// The empty string is ignored. Re-inserting an existing word overwrites its
    /// frequency without creating new nodes. Returns `true` if the word was new.
    pub fn insert(&mut self, word: &str, frequency: u64) -> bool {
        if word.is_empty() {
            return false;
        }

        let mut node_idx = ROOT;
        for c in word.chars() {
            node_idx = match self.nodes[node_idx].children.get(&c) {
                Some(&id) => id,
                None => {
                    let new_node_id = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node_idx].children.insert(c, new_node_id);
                    new_node_id
                }
            };
        }

        let node = &mut self.nodes[node_idx];
        let is_new = node.terminal.is_none();
        node.terminal = Some(Terminal { word: word.to_string(), frequency });
        if is_new {
            self.word_count += 1;
        }
        is_new
    }

    /// Walks `prefix` from the root.
    pub fn find_node(&self, prefix: &str) -> Option<NodeId> {
        prefix
            .chars()
            .try_fold(ROOT, |idx, c| self.nodes[idx].children.get(&c).copied())
    }

    /// Returns the terminal node for `word`, if `word` was inserted.
    pub fn lookup(&self, word: &str) -> Option<&TrieNode> {
        if word.is_empty() {
            return None;
        }
        self.find_node(word)
            .map(|id| &self.nodes[id])
            .filter(|node| node.is_terminal())
    }

    pub fn node(&self, id: NodeId) -> &TrieNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &TrieNode {
        &self.nodes[ROOT]
    }

    /// Total nodes including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Node ids in depth-first pre-order, children visited by ascending character.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            // Reverse so the smallest character is popped first.
            stack.extend(self.nodes[idx].children.values().rev().copied());
        }
        order
    }

    /// Every stored `(word, frequency)` in path order.
    pub fn words(&self) -> Vec<(String, u64)> {
        self.preorder()
            .into_iter()
            .filter_map(|idx| self.nodes[idx].terminal.as_ref())
            .map(|t| (t.word.clone(), t.frequency))
            .collect()
    }

    /// Up to `limit` words starting with `prefix`, highest frequency first,
    /// ties broken by word. O(S log limit) where S is the subtree size.
    pub fn candidates(&self, prefix: &str, limit: usize) -> Vec<(String, u64)> {
        if limit == 0 {
            return vec![];
        }
        let Some(start) = self.find_node(prefix) else {
            return vec![];
        };

        let mut heap = BinaryHeap::with_capacity(limit + 1);
        self.collect_top(start, limit, &mut heap);

        // Min-heap of Reverse(key): sorting ascending yields the best key first.
        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse((freq, Reverse(word)))| (word.to_string(), freq))
            .collect()
    }

    fn collect_top<'a>(
        &'a self,
        node_idx: NodeId,
        limit: usize,
        heap: &mut BinaryHeap<Reverse<(u64, Reverse<&'a str>)>>,
    ) {
        let node = &self.nodes[node_idx];
        if let Some(t) = &node.terminal {
            let key = Reverse((t.frequency, Reverse(t.word.as_str())));
            if heap.len() < limit {
                heap.push(key);
            } else if heap.peek().is_some_and(|worst| key < *worst) {
                heap.pop();
                heap.push(key);
            }
        }
        for &child_idx in node.children.values() {
            self.collect_top(child_idx, limit, heap);
        }
    }
}

/// The output of the build phase: a trie plus the flag that says it is complete.
///
/// Consumers must refuse to use the tree unless [`CompiledArtifact::is_ready`] is true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledArtifact {
    trie: Trie,
    ready: bool,
}

impl CompiledArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(trie: Trie, ready: bool) -> Self {
        Self { trie, ready }
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    /// Mutable access for the build phase. Unavailable once the artifact is ready.
    pub fn trie_mut(&mut self) -> Option<&mut Trie> {
        (!self.ready).then_some(&mut self.trie)
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}
