//! Property tests for handler dispatch and tree building

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use mqtt2opcua::builder::AddressSpaceBuilder;
use mqtt2opcua::convert::{ConvertError, DataType, ForwardHandler, Variant};
use mqtt2opcua::dispatch::{HandlerRegistry, Handlers};
use mqtt2opcua::namespace::{MemoryNamespace, StatusCode, VariableCallbacks};
use mqtt2opcua::topic::pattern_matches;

fn tagged(tag: String) -> ForwardHandler {
    Arc::new(move |_: &[u8]| -> Result<Variant, ConvertError> {
        Ok(Variant::String(tag.clone()))
    })
}

/// Pattern the resolved handler was registered under, `None` for the default
fn resolved(handlers: &Handlers, topic: &str) -> Option<String> {
    let handler = handlers.resolve_forward(topic)?;
    match handler(b"") {
        Ok(Variant::String(tag)) if !tag.is_empty() => Some(tag),
        _ => None,
    }
}

fn topic() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..5)
        .prop_map(|levels| levels.join("/"))
}

fn pattern() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(vec!["a", "b", "+"]), 0..4),
        any::<bool>(),
    )
        .prop_filter_map("empty pattern", |(mut levels, multi)| {
            if multi {
                levels.push("#");
            }
            if levels.is_empty() {
                None
            } else {
                Some(levels.join("/"))
            }
        })
}

fn registry(patterns: &[String]) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for pattern in patterns {
        registry
            .on_forward(pattern, tagged(pattern.clone()))
            .expect("generated pattern is valid");
    }
    registry
}

struct Null;

impl VariableCallbacks for Null {
    fn get(&self, _topic: &str) -> Result<Variant, StatusCode> {
        Err(StatusCode::BadCommunicationError)
    }

    fn set(&self, _topic: &str, _value: Variant) -> StatusCode {
        StatusCode::Good
    }
}

proptest! {
    #[test]
    fn resolved_pattern_covers_topic(patterns in prop::collection::vec(pattern(), 0..8), topic in topic()) {
        let handlers = registry(&patterns).finalize();
        match resolved(&handlers, &topic) {
            Some(pattern) => prop_assert!(pattern_matches(&pattern, &topic)),
            None => prop_assert!(
                patterns.iter().all(|p| p == "#" || !pattern_matches(p, &topic)),
                "default chosen although a pattern matches"
            ),
        }
    }

    #[test]
    fn exact_registration_always_wins(patterns in prop::collection::vec(pattern(), 0..8), topic in topic()) {
        let mut registry = registry(&patterns);
        registry.on_forward(&topic, tagged(format!("exact:{}", topic))).unwrap();
        let handlers = registry.finalize();

        prop_assert_eq!(resolved(&handlers, &topic), Some(format!("exact:{}", topic)));
    }

    #[test]
    fn second_build_pass_creates_nothing(topics in prop::collection::vec(topic(), 1..12)) {
        let namespace = MemoryNamespace::new();
        let mut builder = AddressSpaceBuilder::new();
        let callbacks: Arc<dyn VariableCallbacks> = Arc::new(Null);

        for topic in &topics {
            let _ = builder.ensure_node(&namespace, topic, DataType::Double, callbacks.clone());
        }
        let folders = namespace.folder_count();
        let variables = namespace.variable_count();

        for topic in &topics {
            let _ = builder.ensure_node(&namespace, topic, DataType::Double, callbacks.clone());
        }
        prop_assert_eq!(namespace.folder_count(), folders);
        prop_assert_eq!(namespace.variable_count(), variables);

        let distinct: HashSet<&String> = topics.iter().collect();
        prop_assert!(variables <= distinct.len());
        prop_assert_eq!(builder.variable_count(), variables);
    }
}
