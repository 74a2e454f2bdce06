//! Bridge Integration Tests
//!
//! Runs the bus client against an in-process broker stub speaking the
//! crate's own codec, with the bridge and the in-memory namespace attached.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use mqtt2opcua::bridge::Bridge;
use mqtt2opcua::bus::{BusError, MqttClient};
use mqtt2opcua::codec::{Decoder, Encoder};
use mqtt2opcua::config::{BridgeConfig, MqttConfig};
use mqtt2opcua::dispatch::Handlers;
use mqtt2opcua::namespace::{MemoryNamespace, NodeId, StatusCode};
use mqtt2opcua::protocol::{
    ConnAck, ConnectReturnCode, Packet, PubAck, Publish, QoS, SubAck,
};
use mqtt2opcua::Variant;

/// Broker side of one client connection
struct StubPeer {
    stream: TcpStream,
    encoder: Encoder,
    decoder: Decoder,
    buf: BytesMut,
}

impl StubPeer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("Timed out waiting for client")
            .expect("Failed to accept");
        Self {
            stream,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            buf: BytesMut::new(),
        }
    }

    async fn send(&mut self, packet: &Packet) {
        let mut buf = BytesMut::new();
        self.encoder
            .encode(packet, &mut buf)
            .expect("Failed to encode");
        self.stream.write_all(&buf).await.expect("Failed to write");
    }

    async fn recv(&mut self) -> Packet {
        loop {
            if let Some((packet, consumed)) = self.decoder.decode(&self.buf).expect("Bad packet") {
                self.buf.advance(consumed);
                return packet;
            }
            let n = timeout(Duration::from_secs(5), self.stream.read_buf(&mut self.buf))
                .await
                .expect("Timed out waiting for packet")
                .expect("Failed to read");
            assert!(n > 0, "client closed the connection");
        }
    }

    /// Complete CONNECT/CONNACK and SUBSCRIBE/SUBACK
    async fn handshake(&mut self) -> Vec<String> {
        match self.recv().await {
            Packet::Connect(connect) => assert_eq!(connect.client_id, "bridge-test"),
            other => panic!("expected CONNECT, got {:?}", other),
        }
        self.send(&Packet::ConnAck(ConnAck::default())).await;

        let subscribe = match self.recv().await {
            Packet::Subscribe(subscribe) => subscribe,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        };
        self.send(&Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            granted: subscribe
                .subscriptions
                .iter()
                .map(|s| Some(s.qos))
                .collect(),
        }))
        .await;

        subscribe
            .subscriptions
            .into_iter()
            .map(|s| s.filter)
            .collect()
    }
}

fn mqtt_config(addr: SocketAddr) -> MqttConfig {
    MqttConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        client_id: "bridge-test".to_string(),
        keepalive: 30,
        connect_timeout: 2,
        ..Default::default()
    }
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("No local address");
    (listener, addr)
}

/// Wait until `check` holds or give up after a few seconds
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

fn spawn_client(
    client: MqttClient,
    bridge: &Bridge,
) -> JoinHandle<Result<(), BusError>> {
    let callback = bridge.message_callback();
    tokio::spawn(async move { client.connect().await?.run(callback).await })
}

#[tokio::test]
async fn test_messages_and_writes_flow_through_bridge() {
    let (listener, addr) = listener().await;
    let namespace = Arc::new(MemoryNamespace::new());

    let client = MqttClient::new(mqtt_config(addr), vec!["sensors/#".to_string()]);
    let handle = client.handle();
    let bridge = Bridge::new(
        Handlers::defaults(),
        namespace.clone(),
        Arc::new(handle.clone()),
        &BridgeConfig::default(),
        None,
    );
    let task = spawn_client(client, &bridge);

    let mut broker = StubPeer::accept(&listener).await;
    assert_eq!(broker.handshake().await, vec!["sensors/#".to_string()]);

    broker
        .send(&Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: "sensors/room1/temp".to_string(),
            packet_id: Some(7),
            payload: Bytes::from_static(b"21.5"),
            ..Default::default()
        }))
        .await;
    assert_eq!(
        broker.recv().await,
        Packet::PubAck(PubAck { packet_id: 7 })
    );

    let node = NodeId::string("sensors/room1/temp");
    eventually(|| namespace.read(&node).is_ok()).await;
    assert_eq!(namespace.read(&node), Ok(Variant::Double(21.5)));
    assert_eq!(namespace.folder_count(), 2);

    assert_eq!(namespace.write(&node, Variant::Double(30.0)), StatusCode::Good);
    match broker.recv().await {
        Packet::Publish(publish) => {
            assert_eq!(publish.topic, "sensors/room1/temp");
            assert_eq!(publish.payload, Bytes::from_static(b"30"));
            assert_eq!(publish.qos, QoS::AtMostOnce);
        }
        other => panic!("expected PUBLISH, got {:?}", other),
    }

    handle.shutdown().await;
    assert_eq!(broker.recv().await, Packet::Disconnect);
    let result = timeout(Duration::from_secs(5), task)
        .await
        .expect("client did not stop")
        .expect("client task panicked");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_roundtrip_write_waits_for_device() {
    let (listener, addr) = listener().await;
    let namespace = Arc::new(MemoryNamespace::new());

    let client = MqttClient::new(mqtt_config(addr), vec!["#".to_string()]);
    let bridge = Bridge::new(
        Handlers::defaults(),
        namespace.clone(),
        Arc::new(client.handle()),
        &BridgeConfig {
            roundtrip: true,
            ..Default::default()
        },
        None,
    );
    let _task = spawn_client(client, &bridge);

    let mut broker = StubPeer::accept(&listener).await;
    broker.handshake().await;

    broker
        .send(&Packet::Publish(Publish {
            topic: "valve/open".to_string(),
            payload: Bytes::from_static(b"0"),
            ..Default::default()
        }))
        .await;

    let node = NodeId::string("valve/open");
    eventually(|| namespace.read(&node).is_ok()).await;

    assert_eq!(namespace.write(&node, Variant::Double(1.0)), StatusCode::Good);
    assert!(matches!(broker.recv().await, Packet::Publish(_)));
    assert_eq!(
        namespace.read(&node),
        Err(StatusCode::BadCommunicationError)
    );

    broker
        .send(&Packet::Publish(Publish {
            topic: "valve/open".to_string(),
            payload: Bytes::from_static(b"1"),
            ..Default::default()
        }))
        .await;
    eventually(|| namespace.read(&node) == Ok(Variant::Double(1.0))).await;
}

#[tokio::test]
async fn test_refused_connection_is_an_error() {
    let (listener, addr) = listener().await;
    let client = MqttClient::new(mqtt_config(addr), vec!["#".to_string()]);
    let connecting = tokio::spawn(client.connect());

    let mut broker = StubPeer::accept(&listener).await;
    assert!(matches!(broker.recv().await, Packet::Connect(_)));
    broker
        .send(&Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        }))
        .await;

    let result = connecting.await.expect("connect task panicked");
    assert!(matches!(
        result,
        Err(BusError::Rejected(ConnectReturnCode::NotAuthorized))
    ));
}

#[tokio::test]
async fn test_broker_disconnect_ends_run_with_error() {
    let (listener, addr) = listener().await;
    let namespace = Arc::new(MemoryNamespace::new());
    let client = MqttClient::new(mqtt_config(addr), vec!["#".to_string()]);
    let bridge = Bridge::new(
        Handlers::defaults(),
        namespace,
        Arc::new(client.handle()),
        &BridgeConfig::default(),
        None,
    );
    let task = spawn_client(client, &bridge);

    let mut broker = StubPeer::accept(&listener).await;
    broker.handshake().await;
    drop(broker);

    let result = timeout(Duration::from_secs(5), task)
        .await
        .expect("client did not notice the disconnect")
        .expect("client task panicked");
    assert!(matches!(result, Err(BusError::ConnectionLost(_))));
}

#[tokio::test]
async fn test_unreachable_broker_is_an_error() {
    let (listener, addr) = listener().await;
    drop(listener);

    let client = MqttClient::new(mqtt_config(addr), vec!["#".to_string()]);
    let result = client.connect().await;
    assert!(matches!(
        result,
        Err(BusError::ConnectionLost(_)) | Err(BusError::Timeout)
    ));
}
