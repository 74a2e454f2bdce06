//! Config module tests

use std::io::Write;
use std::time::Duration;

use super::*;
use crate::convert::{DataType, Variant};

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("M2O_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${M2O_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("M2O_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("M2O_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${M2O_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("M2O_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${M2O_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("M2O_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("M2O_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${M2O_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.mqtt.address(), "localhost:1883");
    assert_eq!(config.opcua.endpoint_url(), "opc.tcp://127.0.0.1:4334/UA/MQTT Bridge Server");
    assert_eq!(config.bridge.topics, vec!["$SYS/#".to_string(), "#".to_string()]);
    assert!(!config.bridge.roundtrip);
    assert_eq!(config.bridge.roundtrip_timeout, None);
    assert_eq!(config.log.effective_level(), "info");
    assert!(!config.metrics.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.mqtt.port, 1883);
    assert_eq!(config.opcua.port, 4334);
    assert!(config.forward.is_empty());
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "warn"
debug = true

[mqtt]
host = "broker.local"
port = 1884
client_id = "bridge-1"
username = "user"
password = "secret"
keepalive = 30
qos = 1

[opcua]
host = "0.0.0.0"
port = 4840
name = "Plant"

[bridge]
roundtrip = true
roundtrip_timeout = "30s"
topics = ["plant/#"]
default_forward = "text"

[[forward]]
pattern = "$SYS/broker/bytes/#"
data_type = "int32"

[[backward]]
pattern = "plant/+/setpoint"
topic = "{topic}/set"

[metrics]
enabled = true
bind = "127.0.0.1:9100"
"#,
    )
    .unwrap();

    assert_eq!(config.log.effective_level(), "debug");
    assert_eq!(config.mqtt.address(), "broker.local:1884");
    assert_eq!(config.mqtt.client_id, "bridge-1");
    assert_eq!(config.mqtt.username.as_deref(), Some("user"));
    assert_eq!(config.mqtt.subscription_qos(), QoS::AtLeastOnce);
    assert_eq!(config.opcua.endpoint_url(), "opc.tcp://0.0.0.0:4840/Plant");
    assert!(config.bridge.roundtrip);
    assert_eq!(config.bridge.roundtrip_timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.bridge.topics, vec!["plant/#".to_string()]);
    assert_eq!(config.bridge.default_forward, ForwardDefault::Text);
    assert_eq!(
        config.forward,
        vec![ForwardRule {
            pattern: "$SYS/broker/bytes/#".to_string(),
            data_type: DataType::Int32,
        }]
    );
    assert_eq!(config.backward[0].topic, "{topic}/set");
    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.bind.port(), 9100);
}

#[test]
fn test_handler_rules_are_registered() {
    let config = Config::parse(
        r#"
[[forward]]
pattern = "$SYS/broker/bytes/#"
data_type = "int32"

[[backward]]
pattern = "plant/+/setpoint"
topic = "{topic}/set"
"#,
    )
    .unwrap();

    let handlers = config.handler_registry().unwrap().finalize();

    let forward = handlers
        .resolve_forward("$SYS/broker/bytes/received")
        .unwrap();
    assert_eq!(forward(&b"1024"[..]).unwrap(), Variant::Int32(1024));

    let backward = handlers.resolve_backward("plant/tank/setpoint").unwrap();
    let message = backward(&crate::convert::WriteRequest {
        topic: "plant/tank/setpoint".to_string(),
        value: Variant::Double(2.5),
    })
    .unwrap()
    .unwrap();
    assert_eq!(message.topic, "plant/tank/setpoint/set");
    assert_eq!(&message.payload[..], b"2.5");
}

#[test]
fn test_invalid_mqtt_qos() {
    let result = Config::parse("[mqtt]\nqos = 2\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_ports() {
    assert!(Config::parse("[mqtt]\nport = 0\n").is_err());
    assert!(Config::parse("[opcua]\nport = 0\n").is_err());
}

#[test]
fn test_metrics_bind_needs_port() {
    let result = Config::parse("[metrics]\nenabled = true\nbind = \"127.0.0.1:0\"\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let config = Config::parse("[metrics]\nbind = \"127.0.0.1:0\"\n").unwrap();
    assert!(!config.metrics.enabled);
}

#[test]
fn test_empty_topics_rejected() {
    let result = Config::parse("[bridge]\ntopics = []\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_handler_pattern() {
    let result = Config::parse(
        r#"
[[forward]]
pattern = "a/#/b"
data_type = "double"
"#,
    );
    match result {
        Err(ConfigError::Validation(msg)) => assert!(msg.contains("a/#/b")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_unknown_data_type() {
    let result = Config::parse(
        r#"
[[forward]]
pattern = "a/+"
data_type = "decimal"
"#,
    );
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_with_env_substitution() {
    std::env::set_var("M2O_TEST_BROKER_HOST", "10.0.0.5");

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[mqtt]
host = "${{M2O_TEST_BROKER_HOST}}"
port = ${{M2O_TEST_BROKER_PORT:-1885}}

[bridge]
roundtrip_timeout = "2m"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.mqtt.address(), "10.0.0.5:1885");
    assert_eq!(config.bridge.roundtrip_timeout, Some(Duration::from_secs(120)));
    assert_eq!(config.bridge.topics.len(), 2);

    std::env::remove_var("M2O_TEST_BROKER_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.opcua.name, "UA/MQTT Bridge Server");
}
