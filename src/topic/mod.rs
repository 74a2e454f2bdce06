//! Topic handling
//!
//! Topic name and pattern validation, plus the pattern trie used to pick the
//! conversion handler for a concrete topic.

mod trie;
pub mod validation;

pub use trie::PatternTrie;
pub use validation::{
    is_exact_pattern, pattern_matches, validate_pattern, validate_topic_name, TopicLevel,
};

/// Level separator shared by bus topics and namespace paths
pub const SEPARATOR: char = '/';

/// Pattern matching every topic, including zero levels
pub const MATCH_ALL: &str = "#";
