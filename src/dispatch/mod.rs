//! Handler dispatch
//!
//! Selects the conversion handler for a concrete topic. Handlers are
//! registered on a [`HandlerRegistry`] in order; [`HandlerRegistry::finalize`]
//! builds the immutable [`Handlers`] used at runtime.
//!
//! Resolution rules:
//! 1. A pattern without wildcards equal to the topic wins outright.
//! 2. Otherwise the most specific wildcard pattern covering the topic wins
//!    (see [`PatternTrie`](crate::topic::PatternTrie) for the ordering).
//! 3. Each direction always has a `#` handler: when none is registered,
//!    `finalize` installs the direction's default converter.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;

use crate::convert::{default_backward, BackwardHandler, ForwardDefault, ForwardHandler};
use crate::topic::{is_exact_pattern, validate_pattern, PatternTrie, MATCH_ALL};

#[cfg(test)]
mod tests;

/// Conversion direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bus -> namespace
    Forward,
    /// Namespace -> bus
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

/// A handler together with its direction
#[derive(Clone)]
pub enum Handler {
    Forward(ForwardHandler),
    Backward(BackwardHandler),
}

impl Handler {
    pub fn direction(&self) -> Direction {
        match self {
            Handler::Forward(_) => Direction::Forward,
            Handler::Backward(_) => Direction::Backward,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.direction())
    }
}

/// Invalid handler pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub reason: &'static str,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pattern {:?}: {}", self.pattern, self.reason)
    }
}

impl std::error::Error for PatternError {}

/// Ordered registrations for one direction
struct Registrations<H> {
    entries: Vec<(String, H)>,
}

impl<H> Registrations<H> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add or replace; a replaced pattern keeps its position
    fn upsert(&mut self, pattern: &str, handler: H) {
        match self.entries.iter_mut().find(|(p, _)| p == pattern) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((pattern.to_string(), handler)),
        }
    }

    fn contains(&self, pattern: &str) -> bool {
        self.entries.iter().any(|(p, _)| p == pattern)
    }

    fn build(self) -> Matcher<H> {
        let mut exact = AHashMap::new();
        let mut wildcard = PatternTrie::new();

        for (pattern, handler) in self.entries {
            if is_exact_pattern(&pattern) {
                exact.insert(pattern, handler);
            } else {
                wildcard.insert(&pattern, handler);
            }
        }

        Matcher { exact, wildcard }
    }
}

/// Builder collecting handler registrations before they are frozen
pub struct HandlerRegistry {
    forward: Registrations<ForwardHandler>,
    backward: Registrations<BackwardHandler>,
    forward_default: ForwardDefault,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            forward: Registrations::new(),
            backward: Registrations::new(),
            forward_default: ForwardDefault::default(),
        }
    }

    /// Policy of the forward handler installed when `#` is not registered
    pub fn with_forward_default(mut self, policy: ForwardDefault) -> Self {
        self.forward_default = policy;
        self
    }

    /// Register a handler under a pattern, replacing any handler previously
    /// registered for the same (direction, pattern)
    pub fn register(&mut self, pattern: &str, handler: Handler) -> Result<(), PatternError> {
        validate_pattern(pattern).map_err(|reason| PatternError {
            pattern: pattern.to_string(),
            reason,
        })?;

        match handler {
            Handler::Forward(h) => self.forward.upsert(pattern, h),
            Handler::Backward(h) => self.backward.upsert(pattern, h),
        }
        Ok(())
    }

    pub fn on_forward(
        &mut self,
        pattern: &str,
        handler: ForwardHandler,
    ) -> Result<(), PatternError> {
        self.register(pattern, Handler::Forward(handler))
    }

    pub fn on_backward(
        &mut self,
        pattern: &str,
        handler: BackwardHandler,
    ) -> Result<(), PatternError> {
        self.register(pattern, Handler::Backward(handler))
    }

    /// Whether `#` is registered for a direction
    pub fn has_default(&self, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.forward.contains(MATCH_ALL),
            Direction::Backward => self.backward.contains(MATCH_ALL),
        }
    }

    /// Freeze the registrations, installing default `#` handlers where missing
    pub fn finalize(mut self) -> Handlers {
        if !self.has_default(Direction::Forward) {
            let handler = self.forward_default.handler();
            self.forward.upsert(MATCH_ALL, handler);
        }
        if !self.has_default(Direction::Backward) {
            let handler: BackwardHandler = Arc::new(default_backward);
            self.backward.upsert(MATCH_ALL, handler);
        }

        Handlers {
            forward: self.forward.build(),
            backward: self.backward.build(),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable pattern -> handler lookup for one direction
pub struct Matcher<H> {
    exact: AHashMap<String, H>,
    wildcard: PatternTrie<H>,
}

impl<H> Matcher<H> {
    /// Handler of the best pattern covering `topic`
    pub fn resolve(&self, topic: &str) -> Option<&H> {
        self.exact
            .get(topic)
            .or_else(|| self.wildcard.best_match(topic))
    }

    /// Number of registered patterns
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Frozen forward and backward handler sets
pub struct Handlers {
    forward: Matcher<ForwardHandler>,
    backward: Matcher<BackwardHandler>,
}

impl Handlers {
    /// Handlers containing only the defaults
    pub fn defaults() -> Self {
        HandlerRegistry::new().finalize()
    }

    pub fn resolve_forward(&self, topic: &str) -> Option<&ForwardHandler> {
        self.forward.resolve(topic)
    }

    pub fn resolve_backward(&self, topic: &str) -> Option<&BackwardHandler> {
        self.backward.resolve(topic)
    }

    /// Resolve either direction
    pub fn resolve(&self, topic: &str, direction: Direction) -> Option<Handler> {
        match direction {
            Direction::Forward => self.resolve_forward(topic).cloned().map(Handler::Forward),
            Direction::Backward => self.resolve_backward(topic).cloned().map(Handler::Backward),
        }
    }

    pub fn forward(&self) -> &Matcher<ForwardHandler> {
        &self.forward
    }

    pub fn backward(&self) -> &Matcher<BackwardHandler> {
        &self.backward
    }
}
