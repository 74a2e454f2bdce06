//! Message bus
//!
//! The bridge sees the bus only through [`Publisher`] (outbound) and a
//! [`MessageCallback`] (inbound). [`MqttClient`] provides both over an MQTT
//! v3.1.1 connection.
//!
//! There is no reconnect: any transport failure ends [`Connection::run`] with
//! a [`BusError`] and the process is expected to exit.

mod client;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{ConnectReturnCode, DecodeError, EncodeError};

pub use client::{Connection, MqttClient, MqttHandle};

/// Callback for messages received from the bus
pub type MessageCallback = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Error type for bus operations
#[derive(Debug)]
pub enum BusError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Broker refused the session
    Rejected(ConnectReturnCode),
    /// Operation timed out
    Timeout,
    /// Broker sent something that is not valid MQTT
    Protocol(DecodeError),
    /// Packet could not be encoded
    Encode(EncodeError),
    /// Outbound queue is full
    QueueFull,
    /// The connection task has ended
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            BusError::Rejected(code) => write!(f, "Connection refused: {}", code),
            BusError::Timeout => write!(f, "Operation timed out"),
            BusError::Protocol(e) => write!(f, "Protocol error: {}", e),
            BusError::Encode(e) => write!(f, "Encode error: {}", e),
            BusError::QueueFull => write!(f, "Outbound queue full"),
            BusError::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for BusError {}

impl From<std::io::Error> for BusError {
    fn from(e: std::io::Error) -> Self {
        BusError::ConnectionLost(e.to_string())
    }
}

impl From<DecodeError> for BusError {
    fn from(e: DecodeError) -> Self {
        BusError::Protocol(e)
    }
}

impl From<EncodeError> for BusError {
    fn from(e: EncodeError) -> Self {
        BusError::Encode(e)
    }
}

/// Outbound side of the bus
///
/// `publish` must not block: it either queues the message or fails at once.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;
}
