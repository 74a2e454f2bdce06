//! Declarative handler rules
//!
//! ```toml
//! [[forward]]
//! pattern = "$SYS/broker/bytes/#"
//! data_type = "int32"
//!
//! [[backward]]
//! pattern = "plant/+/setpoint"
//! topic = "{topic}/set"
//! ```

use serde::Deserialize;

use super::{Config, ConfigError};
use crate::convert::{templated_backward, typed_forward, DataType};
use crate::dispatch::HandlerRegistry;

/// Forward rule: payloads on matching topics are parsed as `data_type`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForwardRule {
    pub pattern: String,
    pub data_type: DataType,
}

/// Backward rule: writes to matching variables publish on `topic`
///
/// `{topic}` in the template is replaced with the variable's topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackwardRule {
    pub pattern: String,
    pub topic: String,
}

impl Config {
    /// Registry with every configured rule registered, not yet finalized
    pub fn handler_registry(&self) -> Result<HandlerRegistry, ConfigError> {
        let mut registry =
            HandlerRegistry::new().with_forward_default(self.bridge.default_forward);

        for rule in &self.forward {
            registry
                .on_forward(&rule.pattern, typed_forward(rule.data_type))
                .map_err(|e| ConfigError::Validation(format!("[[forward]] {}", e)))?;
        }

        for rule in &self.backward {
            if rule.topic.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "[[backward]] rule for {:?} has an empty topic",
                    rule.pattern
                )));
            }
            registry
                .on_backward(&rule.pattern, templated_backward(rule.topic.as_str()))
                .map_err(|e| ConfigError::Validation(format!("[[backward]] {}", e)))?;
        }

        Ok(registry)
    }
}
