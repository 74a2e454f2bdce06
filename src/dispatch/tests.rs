//! Dispatch module tests

use std::sync::Arc;

use bytes::Bytes;

use super::*;
use crate::convert::{
    typed_forward, ConvertError, DataType, ForwardHandler, PublishRequest, Variant, WriteRequest,
};

/// Forward handler that always yields the given tag as a string
fn tagged(tag: &'static str) -> ForwardHandler {
    Arc::new(move |_: &[u8]| -> Result<Variant, ConvertError> {
        Ok(Variant::String(tag.to_string()))
    })
}

fn forward_tag(handlers: &Handlers, topic: &str) -> Option<String> {
    let handler = handlers.resolve_forward(topic)?;
    match handler(b"") {
        Ok(Variant::String(tag)) => Some(tag),
        _ => None,
    }
}

fn write(topic: &str, value: Variant) -> WriteRequest {
    WriteRequest {
        topic: topic.to_string(),
        value,
    }
}

#[test]
fn test_exact_registration_wins_over_wildcards() {
    let mut registry = HandlerRegistry::new();
    registry.on_forward("plant/+/level", tagged("wildcard")).unwrap();
    registry.on_forward("plant/tank1/level", tagged("exact")).unwrap();
    registry.on_forward("plant/#", tagged("multi")).unwrap();
    let handlers = registry.finalize();

    assert_eq!(
        forward_tag(&handlers, "plant/tank1/level").as_deref(),
        Some("exact")
    );
    assert_eq!(
        forward_tag(&handlers, "plant/tank2/level").as_deref(),
        Some("wildcard")
    );
    assert_eq!(
        forward_tag(&handlers, "plant/tank2/temp").as_deref(),
        Some("multi")
    );
}

#[test]
fn test_most_specific_wildcard_wins() {
    let mut registry = HandlerRegistry::new();
    registry.on_forward("a/#", tagged("a/#")).unwrap();
    registry.on_forward("a/+/#", tagged("a/+/#")).unwrap();
    registry.on_forward("a/b/+", tagged("a/b/+")).unwrap();
    registry.on_forward("a/+/c", tagged("a/+/c")).unwrap();
    let handlers = registry.finalize();

    assert_eq!(forward_tag(&handlers, "a/b/c").as_deref(), Some("a/b/+"));
    assert_eq!(forward_tag(&handlers, "a/x/c").as_deref(), Some("a/+/c"));
    assert_eq!(forward_tag(&handlers, "a/x/y").as_deref(), Some("a/+/#"));
    assert_eq!(forward_tag(&handlers, "a").as_deref(), Some("a/#"));
}

#[test]
fn test_default_forward_installed() {
    let handlers = Handlers::defaults();
    let handler = handlers.resolve_forward("anything/at/all").unwrap();
    assert_eq!(handler(b"42").unwrap(), Variant::Double(42.0));

    let handler = handlers.resolve_forward("$SYS/broker/uptime").unwrap();
    assert_eq!(
        handler(b"12 seconds").unwrap(),
        Variant::String("12 seconds".to_string())
    );
}

#[test]
fn test_default_forward_policy_is_configurable() {
    let handlers = HandlerRegistry::new()
        .with_forward_default(ForwardDefault::Text)
        .finalize();
    let handler = handlers.resolve_forward("x").unwrap();
    assert_eq!(handler(b"42").unwrap(), Variant::String("42".to_string()));
}

#[test]
fn test_registered_default_is_kept() {
    let mut registry = HandlerRegistry::new();
    registry.on_forward("#", tagged("custom")).unwrap();
    assert!(registry.has_default(Direction::Forward));
    assert!(!registry.has_default(Direction::Backward));

    let handlers = registry.finalize();
    assert_eq!(forward_tag(&handlers, "x/y").as_deref(), Some("custom"));
    assert_eq!(handlers.forward().len(), 1);
    assert_eq!(handlers.backward().len(), 1);
}

#[test]
fn test_default_backward_installed() {
    let handlers = Handlers::defaults();
    let handler = handlers.resolve_backward("x").unwrap();
    let message = handler(&write("x", Variant::Double(42.0))).unwrap().unwrap();
    assert_eq!(
        message,
        PublishRequest {
            topic: "x".to_string(),
            payload: Bytes::from_static(b"42"),
        }
    );
}

#[test]
fn test_reregistration_replaces_handler() {
    let mut registry = HandlerRegistry::new();
    registry.on_forward("a/+", tagged("first")).unwrap();
    registry.on_forward("a/+", tagged("second")).unwrap();
    let handlers = registry.finalize();

    assert_eq!(forward_tag(&handlers, "a/b").as_deref(), Some("second"));
    // "a/+" plus the auto-installed "#"
    assert_eq!(handlers.forward().len(), 2);
}

#[test]
fn test_directions_are_independent() {
    let mut registry = HandlerRegistry::new();
    registry
        .on_forward("$SYS/broker/bytes/#", typed_forward(DataType::Int32))
        .unwrap();
    registry
        .on_backward(
            "$SYS/broker/bytes/#",
            Arc::new(
                |_: &WriteRequest| -> Result<Option<PublishRequest>, ConvertError> {
                    Err(ConvertError::Other("read only".to_string()))
                },
            ),
        )
        .unwrap();
    let handlers = registry.finalize();

    let forward = handlers.resolve_forward("$SYS/broker/bytes/received").unwrap();
    assert_eq!(forward(b"1024").unwrap(), Variant::Int32(1024));

    let backward = handlers
        .resolve_backward("$SYS/broker/bytes/received")
        .unwrap();
    assert!(backward(&write("$SYS/broker/bytes/received", Variant::Int32(1))).is_err());

    let other = handlers.resolve_backward("other").unwrap();
    assert!(other(&write("other", Variant::Int32(1))).unwrap().is_some());
}

#[test]
fn test_resolve_by_direction() {
    let handlers = Handlers::defaults();
    let forward = handlers.resolve("x", Direction::Forward).unwrap();
    assert_eq!(forward.direction(), Direction::Forward);
    let backward = handlers.resolve("x", Direction::Backward).unwrap();
    assert_eq!(backward.direction(), Direction::Backward);
}

#[test]
fn test_invalid_pattern_rejected() {
    let mut registry = HandlerRegistry::new();
    let err = registry.on_forward("a/#/b", tagged("bad")).unwrap_err();
    assert_eq!(err.pattern, "a/#/b");
    assert!(registry.on_forward("", tagged("bad")).is_err());
    assert!(registry.on_forward("a+", tagged("bad")).is_err());
}
