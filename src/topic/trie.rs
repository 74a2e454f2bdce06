//! Pattern trie for handler selection
//!
//! A trie (prefix tree) keyed by pattern levels. Supports the `+` and `#`
//! wildcards and answers "which stored pattern is the most specific one
//! covering this topic" in a single depth-first walk.
//!
//! Specificity is decided level by level from the left: a literal level beats
//! `+`, `+` beats `#`, and a pattern ending exactly at the topic's end beats
//! one that continues with a trailing `#`. Visiting children in that order
//! makes the first complete match the most specific one.

use ahash::AHashMap;
use compact_str::CompactString;
use smallvec::SmallVec;

use super::validation::{parse_levels, TopicLevel};
use super::SEPARATOR;

/// Node in the pattern trie
#[derive(Debug)]
struct TrieNode<V> {
    /// Value of the pattern that ends at this node
    value: Option<V>,
    /// Children indexed by literal level
    children: AHashMap<CompactString, TrieNode<V>>,
    /// Single-level wildcard (+) child
    single_wildcard: Option<Box<TrieNode<V>>>,
    /// Value of the pattern `<path to this node>/#`
    multi_wildcard: Option<V>,
}

impl<V> TrieNode<V> {
    fn new() -> Self {
        Self {
            value: None,
            children: AHashMap::with_capacity(4),
            single_wildcard: None,
            multi_wildcard: None,
        }
    }
}

impl<V> Default for TrieNode<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pattern trie mapping validated patterns to values
#[derive(Debug)]
pub struct PatternTrie<V> {
    root: TrieNode<V>,
    len: usize,
}

impl<V> PatternTrie<V> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            len: 0,
        }
    }

    /// Number of stored patterns
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a pattern, returning the value it replaces
    ///
    /// The pattern must already be validated (`#` only as the last level).
    pub fn insert(&mut self, pattern: &str, value: V) -> Option<V> {
        let mut node = &mut self.root;

        for level in parse_levels(pattern) {
            node = match level {
                TopicLevel::MultiWildcard => {
                    let previous = node.multi_wildcard.replace(value);
                    if previous.is_none() {
                        self.len += 1;
                    }
                    return previous;
                }
                TopicLevel::SingleWildcard => &mut **node
                    .single_wildcard
                    .get_or_insert_with(|| Box::new(TrieNode::new())),
                TopicLevel::Literal(level) => {
                    node.children.entry(CompactString::new(level)).or_default()
                }
            };
        }

        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Get the value stored under exactly this pattern
    pub fn get(&self, pattern: &str) -> Option<&V> {
        let mut node = &self.root;

        for level in parse_levels(pattern) {
            node = match level {
                TopicLevel::MultiWildcard => return node.multi_wildcard.as_ref(),
                TopicLevel::SingleWildcard => node.single_wildcard.as_deref()?,
                TopicLevel::Literal(level) => node.children.get(level)?,
            };
        }

        node.value.as_ref()
    }

    /// Find the value of the most specific pattern covering `topic`
    pub fn best_match(&self, topic: &str) -> Option<&V> {
        let levels: SmallVec<[&str; 8]> = topic.split(SEPARATOR).collect();
        Self::best_match_recursive(&self.root, &levels, 0)
    }

    fn best_match_recursive<'a>(
        node: &'a TrieNode<V>,
        levels: &[&str],
        index: usize,
    ) -> Option<&'a V> {
        if index >= levels.len() {
            return node.value.as_ref().or(node.multi_wildcard.as_ref());
        }

        let level = levels[index];

        if let Some(child) = node.children.get(level) {
            if let Some(v) = Self::best_match_recursive(child, levels, index + 1) {
                return Some(v);
            }
        }

        if let Some(ref child) = node.single_wildcard {
            if let Some(v) = Self::best_match_recursive(child, levels, index + 1) {
                return Some(v);
            }
        }

        node.multi_wildcard.as_ref()
    }
}

impl<V> Default for PatternTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}
