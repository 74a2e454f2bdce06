//! Variable store
//!
//! Per-topic cache of the last payload, the variable's declared data type and
//! the roundtrip acknowledgement state, plus the read/write logic the
//! namespace callbacks run against it.
//!
//! The cache keeps raw payload bytes, but only payloads the forward handler
//! accepts with the declared type get in. A read converts the cached payload
//! again, so after a write (roundtrip mode off) a read observes the
//! backward-then-forward converted value.
//!
//! In roundtrip mode a write does not touch the cache. The entry moves to
//! [`EntryState::AwaitingAck`] and reads report `BadCommunicationError` until
//! the device confirms the change by publishing on the same topic.

use std::fmt;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use bytes::Bytes;

use crate::convert::{ConvertError, DataType, PublishRequest, Variant, WriteRequest};
use crate::dispatch::Handlers;
use crate::namespace::StatusCode;

/// Acknowledgement state of a store entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No write awaiting confirmation
    Fresh,
    /// A write was published but no message has confirmed it yet
    AwaitingAck,
}

#[derive(Debug)]
struct Entry {
    payload: Bytes,
    data_type: DataType,
    pending_since: Option<Instant>,
}

/// Why a payload produced no value
///
/// Returned by reads and by rejected inbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    /// No message has been cached for the topic
    Unknown,
    /// A roundtrip write is awaiting confirmation
    Pending,
    /// No forward handler resolves for the topic
    Unroutable,
    /// The forward handler rejected the payload or changed its type
    Conversion(ConvertError),
}

impl ReadFailure {
    /// Status reported to the namespace client
    pub fn status(&self) -> StatusCode {
        StatusCode::BadCommunicationError
    }
}

impl fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadFailure::Unknown => write!(f, "no cached value"),
            ReadFailure::Pending => write!(f, "write awaiting confirmation"),
            ReadFailure::Unroutable => write!(f, "no forward handler"),
            ReadFailure::Conversion(e) => write!(f, "conversion failed: {}", e),
        }
    }
}

/// Accepted inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    /// First message on the topic; the variable should be created with this type
    New(DataType),
    /// Cache refreshed for a known topic
    Updated,
}

/// Result of a namespace write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Publish this message on the bus
    Publish(PublishRequest),
    /// The backward handler produced no message
    Skipped,
    /// No backward handler resolves for the topic
    Unroutable,
    /// The backward handler failed
    Failed(ConvertError),
}

/// Run the forward handler and check the result against `declared`
fn convert(
    handlers: &Handlers,
    topic: &str,
    payload: &[u8],
    declared: Option<DataType>,
) -> Result<Variant, ReadFailure> {
    let handler = handlers
        .resolve_forward(topic)
        .ok_or(ReadFailure::Unroutable)?;
    let value = handler(payload).map_err(ReadFailure::Conversion)?;

    match declared {
        Some(declared) if value.data_type() != declared => {
            Err(ReadFailure::Conversion(ConvertError::TypeMismatch {
                declared,
                actual: value.data_type(),
            }))
        }
        _ => Ok(value),
    }
}

/// Cache of per-topic payloads and roundtrip state
#[derive(Debug)]
pub struct VariableStore {
    entries: AHashMap<String, Entry>,
    roundtrip: bool,
    roundtrip_timeout: Option<Duration>,
}

impl VariableStore {
    pub fn new(roundtrip: bool) -> Self {
        Self {
            entries: AHashMap::new(),
            roundtrip,
            roundtrip_timeout: None,
        }
    }

    /// Revert `AwaitingAck` entries older than `timeout` on their next read
    pub fn with_roundtrip_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.roundtrip_timeout = timeout;
        self
    }

    pub fn roundtrip(&self) -> bool {
        self.roundtrip
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn state(&self, topic: &str) -> Option<EntryState> {
        self.entries.get(topic).map(|entry| match entry.pending_since {
            Some(_) => EntryState::AwaitingAck,
            None => EntryState::Fresh,
        })
    }

    /// Data type fixed by the first accepted message
    pub fn data_type(&self, topic: &str) -> Option<DataType> {
        self.entries.get(topic).map(|entry| entry.data_type)
    }

    /// Last cached payload for a topic
    pub fn cached(&self, topic: &str) -> Option<&Bytes> {
        self.entries.get(topic).map(|entry| &entry.payload)
    }

    /// Record an inbound message
    ///
    /// The payload is converted first. A known topic only accepts payloads
    /// of its declared type; a rejected payload leaves the entry, including
    /// a pending write, untouched.
    pub fn observe(
        &mut self,
        topic: &str,
        payload: Bytes,
        handlers: &Handlers,
    ) -> Result<Observed, ReadFailure> {
        let declared = self.data_type(topic);
        let value = convert(handlers, topic, &payload[..], declared)?;

        match self.entries.get_mut(topic) {
            Some(entry) => {
                entry.payload = payload;
                entry.pending_since = None;
                Ok(Observed::Updated)
            }
            None => {
                let data_type = value.data_type();
                self.entries.insert(
                    topic.to_string(),
                    Entry {
                        payload,
                        data_type,
                        pending_since: None,
                    },
                );
                Ok(Observed::New(data_type))
            }
        }
    }

    /// Read the typed value of a topic
    pub fn read(&mut self, topic: &str, handlers: &Handlers) -> Result<Variant, ReadFailure> {
        let timeout = self.roundtrip_timeout;
        let entry = self.entries.get_mut(topic).ok_or(ReadFailure::Unknown)?;

        if let Some(since) = entry.pending_since {
            match timeout {
                Some(timeout) if since.elapsed() >= timeout => entry.pending_since = None,
                _ => return Err(ReadFailure::Pending),
            }
        }

        convert(handlers, topic, &entry.payload[..], Some(entry.data_type))
    }

    /// Apply a namespace write
    ///
    /// Runs the backward handler and, when it yields a message, updates the
    /// entry according to the roundtrip mode. The caller publishes the
    /// returned message.
    pub fn write(&mut self, topic: &str, value: Variant, handlers: &Handlers) -> WriteOutcome {
        let Some(handler) = handlers.resolve_backward(topic) else {
            return WriteOutcome::Unroutable;
        };

        let request = WriteRequest {
            topic: topic.to_string(),
            value,
        };
        let message = match handler(&request) {
            Ok(Some(message)) if !message.topic.is_empty() => message,
            Ok(_) => return WriteOutcome::Skipped,
            Err(e) => return WriteOutcome::Failed(e),
        };

        if let Some(entry) = self.entries.get_mut(topic) {
            if self.roundtrip {
                entry.pending_since = Some(Instant::now());
            } else {
                entry.payload = message.payload.clone();
                entry.pending_since = None;
            }
        }

        WriteOutcome::Publish(message)
    }
}
