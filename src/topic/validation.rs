//! Topic name and handler pattern validation
//!
//! Key rules:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Patterns MAY contain wildcards
//! - Multi-level wildcard (#) must be the last level and occupy it entirely
//! - Single-level wildcard (+) must occupy an entire level
//! - Unlike broker subscriptions, `$`-prefixed topics get no special treatment:
//!   `#` on its own matches `$SYS/...` as well

use super::SEPARATOR;

/// Represents a level in a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicLevel<'a> {
    /// Literal topic level
    Literal(&'a str),
    /// Single-level wildcard (+)
    SingleWildcard,
    /// Multi-level wildcard (#)
    MultiWildcard,
}

/// Parse a pattern into levels
pub fn parse_levels(pattern: &str) -> impl Iterator<Item = TopicLevel<'_>> {
    pattern.split(SEPARATOR).map(|level| match level {
        "+" => TopicLevel::SingleWildcard,
        "#" => TopicLevel::MultiWildcard,
        s => TopicLevel::Literal(s),
    })
}

/// True when the pattern contains no wildcard level, i.e. it names exactly one topic
pub fn is_exact_pattern(pattern: &str) -> bool {
    parse_levels(pattern).all(|level| matches!(level, TopicLevel::Literal(_)))
}

/// Validate a concrete topic name (as received on the bus)
///
/// Topic names:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Must not contain wildcards (+ or #)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }

    Ok(())
}

/// Validate a handler pattern or subscription filter
pub fn validate_pattern(pattern: &str) -> Result<(), &'static str> {
    if pattern.is_empty() {
        return Err("pattern cannot be empty");
    }

    if pattern.len() > 65535 {
        return Err("pattern exceeds maximum length");
    }

    if pattern.contains('\0') {
        return Err("pattern cannot contain null character");
    }

    let level_count = pattern.split(SEPARATOR).count();
    for (i, level) in pattern.split(SEPARATOR).enumerate() {
        if level.contains('#') {
            if level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != level_count - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check if a pattern covers a topic name
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level
/// - # matches zero or more trailing levels
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split(SEPARATOR);

    for level in parse_levels(pattern) {
        match level {
            TopicLevel::MultiWildcard => return true,
            TopicLevel::SingleWildcard => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            TopicLevel::Literal(expected) => match topic_levels.next() {
                Some(actual) if actual == expected => {}
                _ => return false,
            },
        }
    }

    topic_levels.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("test").is_ok());
        assert!(validate_topic_name("test/topic").is_ok());
        assert!(validate_topic_name("/test/topic").is_ok());
        assert!(validate_topic_name("$SYS/broker/uptime").is_ok());

        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("test+topic").is_err());
        assert!(validate_topic_name("test/#").is_err());
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("test").is_ok());
        assert!(validate_pattern("+").is_ok());
        assert!(validate_pattern("#").is_ok());
        assert!(validate_pattern("test/+/topic").is_ok());
        assert!(validate_pattern("$SYS/broker/bytes/#").is_ok());

        assert!(validate_pattern("").is_err());
        assert!(validate_pattern("test#").is_err());
        assert!(validate_pattern("test/#/more").is_err());
        assert!(validate_pattern("+test").is_err());
    }

    #[test]
    fn test_exact_pattern() {
        assert!(is_exact_pattern("a/b/c"));
        assert!(is_exact_pattern("/a"));
        assert!(!is_exact_pattern("a/+/c"));
        assert!(!is_exact_pattern("a/#"));
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("test/topic", "test/topic"));
        assert!(!pattern_matches("test/topic", "test"));

        assert!(pattern_matches("test/+", "test/topic"));
        assert!(pattern_matches("+/b/+", "a/b/c"));
        assert!(!pattern_matches("+/+", "test"));
        assert!(!pattern_matches("test/+", "test/topic/extra"));

        // # covers zero trailing levels too
        assert!(pattern_matches("test/#", "test"));
        assert!(pattern_matches("test/#", "test/topic/more"));
        assert!(!pattern_matches("test/#", "other/topic"));

        // no special casing for $-topics
        assert!(pattern_matches("#", "$SYS/broker/uptime"));
        assert!(pattern_matches("+/broker/#", "$SYS/broker/uptime"));
    }
}
