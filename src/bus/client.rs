//! MQTT client
//!
//! Connects to the broker, subscribes to the configured filters and then
//! runs a single task that multiplexes inbound packets, queued publishes and
//! keep-alive pings on one TCP stream.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{BusError, MessageCallback, Publisher};
use crate::codec::{Decoder, Encoder};
use crate::config::MqttConfig;
use crate::protocol::{
    Connect, ConnectReturnCode, Packet, PubAck, Publish, QoS, Subscribe, Subscription,
};

/// Packet id used for the initial SUBSCRIBE
const SUBSCRIBE_PACKET_ID: u16 = 1;

/// Message to send to the connection task
#[derive(Debug)]
enum Command {
    Publish { topic: String, payload: Bytes },
    Shutdown,
}

/// Cloneable handle for publishing and shutting down
#[derive(Clone)]
pub struct MqttHandle {
    tx: mpsc::Sender<Command>,
}

impl MqttHandle {
    /// Ask the connection to send DISCONNECT and stop
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

impl Publisher for MqttHandle {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.tx
            .try_send(Command::Publish {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => BusError::Closed,
            })
    }
}

/// Unconnected MQTT client
///
/// Publishes made through [`MqttClient::handle`] before the connection is up
/// are queued and sent once it is.
pub struct MqttClient {
    config: MqttConfig,
    topics: Vec<String>,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
}

impl MqttClient {
    pub fn new(config: MqttConfig, topics: Vec<String>) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            topics,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> MqttHandle {
        MqttHandle {
            tx: self.tx.clone(),
        }
    }

    /// Open the TCP stream, establish the session and subscribe
    pub async fn connect(self) -> Result<Connection, BusError> {
        let address = self.config.address();
        let connect_timeout = self.config.connect_timeout_duration();

        debug!("MQTT: Connecting to {}", address);
        let stream = timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| BusError::Timeout)??;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let mut connection = Connection {
            read_half,
            write_half,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            commands: self.rx,
            tx: self.tx,
            keep_alive: self.config.keepalive,
        };

        connection
            .send(&Packet::Connect(Box::new(Connect {
                client_id: self.config.client_id.clone(),
                clean_session: true,
                keep_alive: self.config.keepalive,
                username: self.config.username.clone(),
                password: self.config.password.clone().map(Bytes::from),
            })))
            .await?;
        debug!("MQTT: CONNECT sent");

        let packet = timeout(connect_timeout, connection.next_packet())
            .await
            .map_err(|_| BusError::Timeout)??;
        match packet {
            Packet::ConnAck(connack) if connack.return_code == ConnectReturnCode::Accepted => {
                info!("MQTT: Connected to {}", address);
            }
            Packet::ConnAck(connack) => return Err(BusError::Rejected(connack.return_code)),
            other => {
                return Err(BusError::ConnectionLost(format!(
                    "expected CONNACK, got packet type {}",
                    other.packet_type()
                )))
            }
        }

        if !self.topics.is_empty() {
            let qos = self.config.subscription_qos();
            let subscriptions = self
                .topics
                .iter()
                .map(|filter| Subscription {
                    filter: filter.clone(),
                    qos,
                })
                .collect();
            connection
                .send(&Packet::Subscribe(Subscribe {
                    packet_id: SUBSCRIBE_PACKET_ID,
                    subscriptions,
                }))
                .await?;
            info!("MQTT: Subscribing to {}", self.topics.join(", "));
        }

        Ok(connection)
    }
}

/// Established MQTT session
pub struct Connection {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    commands: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    keep_alive: u16,
}

impl Connection {
    pub fn handle(&self) -> MqttHandle {
        MqttHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run the message loop until shutdown or transport failure
    ///
    /// Returns `Ok(())` only after a requested shutdown.
    pub async fn run(mut self, on_message: MessageCallback) -> Result<(), BusError> {
        let keep_alive = Duration::from_secs(u64::from(self.keep_alive.max(1)));
        let mut keepalive_timer = tokio::time::interval(keep_alive);
        keepalive_timer.reset();

        loop {
            tokio::select! {
                Some(cmd) = self.commands.recv() => {
                    match cmd {
                        Command::Publish { topic, payload } => {
                            debug!("MQTT: Publishing {} ({} bytes)", topic, payload.len());
                            self.send(&Packet::Publish(Publish {
                                topic,
                                payload,
                                ..Default::default()
                            }))
                            .await?;
                        }
                        Command::Shutdown => {
                            self.send(&Packet::Disconnect).await?;
                            info!("MQTT: Disconnected");
                            return Ok(());
                        }
                    }
                }

                result = self.read_half.read_buf(&mut self.read_buf) => {
                    if result? == 0 {
                        return Err(BusError::ConnectionLost("connection closed by broker".to_string()));
                    }

                    while let Some((packet, consumed)) = self.decoder.decode(&self.read_buf)? {
                        self.read_buf.advance(consumed);
                        self.handle_packet(packet, &on_message).await?;
                    }
                }

                _ = keepalive_timer.tick(), if self.keep_alive > 0 => {
                    self.send(&Packet::PingReq).await?;
                }
            }
        }
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        on_message: &MessageCallback,
    ) -> Result<(), BusError> {
        match packet {
            Packet::Publish(publish) => {
                debug!(
                    "MQTT: Message on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                on_message(&publish.topic, publish.payload);

                if publish.qos == QoS::AtLeastOnce {
                    if let Some(packet_id) = publish.packet_id {
                        self.send(&Packet::PubAck(PubAck { packet_id })).await?;
                    }
                }
            }
            Packet::SubAck(suback) => {
                let rejected = suback.granted.iter().filter(|g| g.is_none()).count();
                if rejected > 0 {
                    warn!("MQTT: Broker rejected {} topic filter(s)", rejected);
                } else {
                    debug!("MQTT: SUBACK received");
                }
            }
            Packet::PingResp => {
                debug!("MQTT: PINGRESP received");
            }
            Packet::PubAck(_) => {}
            other => {
                warn!("MQTT: Ignoring unexpected packet type {}", other.packet_type());
            }
        }
        Ok(())
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), BusError> {
        self.write_buf.clear();
        self.encoder.encode(packet, &mut self.write_buf)?;
        self.write_half.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// Read until one complete packet is buffered
    async fn next_packet(&mut self) -> Result<Packet, BusError> {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(packet);
            }
            if self.read_half.read_buf(&mut self.read_buf).await? == 0 {
                return Err(BusError::ConnectionLost(
                    "connection closed by broker".to_string(),
                ));
            }
        }
    }
}
