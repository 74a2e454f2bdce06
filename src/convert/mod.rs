//! Payload conversion
//!
//! Typed namespace values ([`Variant`]) and the converter contract between raw
//! bus payloads and those values:
//!
//! - forward converters turn payload bytes into a [`Variant`]
//! - backward converters turn a [`WriteRequest`] into an outbound
//!   [`PublishRequest`], or `None` when nothing should be published
//!
//! Converters must be pure. The bridge calls a forward converter once to learn
//! a new variable's data type and again on every read of the cached payload.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;

/// Forward converter (bus -> namespace)
pub type ForwardHandler = Arc<dyn Fn(&[u8]) -> Result<Variant, ConvertError> + Send + Sync>;

/// Backward converter (namespace -> bus)
pub type BackwardHandler =
    Arc<dyn Fn(&WriteRequest) -> Result<Option<PublishRequest>, ConvertError> + Send + Sync>;

/// Conversion error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// Payload is not valid UTF-8 where text was required
    InvalidUtf8,
    /// Payload could not be parsed as the requested type
    Parse {
        data_type: DataType,
        input: String,
    },
    /// Value of this type cannot be rendered by the converter
    Unsupported(DataType),
    /// Payload converted to a type other than the variable's declared one
    TypeMismatch {
        declared: DataType,
        actual: DataType,
    },
    /// Converter-specific failure
    Other(String),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            ConvertError::Parse { data_type, input } => {
                write!(f, "cannot parse {:?} as {}", input, data_type)
            }
            ConvertError::Unsupported(data_type) => {
                write!(f, "unsupported data type: {}", data_type)
            }
            ConvertError::TypeMismatch { declared, actual } => {
                write!(f, "got {} for a {} variable", actual, declared)
            }
            ConvertError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Data type of a namespace variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    ByteString,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::UInt32 => "UInt32",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String => "String",
            DataType::ByteString => "ByteString",
        };
        f.write_str(name)
    }
}

impl DataType {
    /// Parse a payload strictly as this data type
    ///
    /// Text types are trimmed before parsing; `ByteString` keeps the raw bytes.
    pub fn parse_payload(self, payload: &[u8]) -> Result<Variant, ConvertError> {
        if self == DataType::ByteString {
            return Ok(Variant::ByteString(Bytes::copy_from_slice(payload)));
        }

        let text = std::str::from_utf8(payload).map_err(|_| ConvertError::InvalidUtf8)?;
        if self == DataType::String {
            return Ok(Variant::String(text.to_string()));
        }

        let trimmed = text.trim();
        let parse_error = || ConvertError::Parse {
            data_type: self,
            input: trimmed.to_string(),
        };

        let variant = match self {
            DataType::Boolean => match trimmed {
                "true" | "1" => Variant::Boolean(true),
                "false" | "0" => Variant::Boolean(false),
                _ => return Err(parse_error()),
            },
            DataType::Int32 => Variant::Int32(parse_number(trimmed).ok_or_else(parse_error)?),
            DataType::Int64 => Variant::Int64(parse_number(trimmed).ok_or_else(parse_error)?),
            DataType::UInt32 => Variant::UInt32(parse_number(trimmed).ok_or_else(parse_error)?),
            DataType::UInt64 => Variant::UInt64(parse_number(trimmed).ok_or_else(parse_error)?),
            DataType::Float => Variant::Float(parse_number(trimmed).ok_or_else(parse_error)?),
            DataType::Double => Variant::Double(parse_finite(trimmed).ok_or_else(parse_error)?),
            DataType::String | DataType::ByteString => unreachable!("handled above"),
        };
        Ok(variant)
    }
}

fn parse_number<T: FromStr>(text: &str) -> Option<T> {
    text.parse().ok()
}

fn parse_finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Typed value exposed through a namespace variable
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    ByteString(Bytes),
}

impl Variant {
    pub fn data_type(&self) -> DataType {
        match self {
            Variant::Boolean(_) => DataType::Boolean,
            Variant::Int32(_) => DataType::Int32,
            Variant::Int64(_) => DataType::Int64,
            Variant::UInt32(_) => DataType::UInt32,
            Variant::UInt64(_) => DataType::UInt64,
            Variant::Float(_) => DataType::Float,
            Variant::Double(_) => DataType::Double,
            Variant::String(_) => DataType::String,
            Variant::ByteString(_) => DataType::ByteString,
        }
    }

    /// Render the value as a bus payload
    ///
    /// Numbers use their shortest textual form (`42.0` renders as `42`),
    /// byte strings are passed through untouched.
    pub fn to_payload(&self) -> Bytes {
        match self {
            Variant::ByteString(bytes) => bytes.clone(),
            Variant::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            other => Bytes::from(other.to_string()),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => f.write_str(v),
            Variant::ByteString(v) => write!(f, "{}", String::from_utf8_lossy(v)),
        }
    }
}

/// A namespace write, tagged with the topic of the written variable
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub topic: String,
    pub value: Variant,
}

/// A message to publish on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Bytes,
}

/// Policy of the default forward converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardDefault {
    /// Finite numbers become `Double`, everything else `String`
    #[default]
    Auto,
    /// Always `String`
    Text,
    /// Always `Double`; non-numeric payloads are a conversion failure
    Number,
}

impl ForwardDefault {
    /// Convert a payload according to this policy
    pub fn convert(self, payload: &[u8]) -> Result<Variant, ConvertError> {
        match self {
            ForwardDefault::Auto => {
                let text = String::from_utf8_lossy(payload);
                Ok(match parse_finite(text.trim()) {
                    Some(number) => Variant::Double(number),
                    None => Variant::String(text.into_owned()),
                })
            }
            ForwardDefault::Text => Ok(Variant::String(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            ForwardDefault::Number => DataType::Double.parse_payload(payload),
        }
    }

    pub fn handler(self) -> ForwardHandler {
        Arc::new(move |payload: &[u8]| self.convert(payload))
    }
}

/// Default backward converter: same topic, textual payload
pub fn default_backward(request: &WriteRequest) -> Result<Option<PublishRequest>, ConvertError> {
    Ok(Some(PublishRequest {
        topic: request.topic.clone(),
        payload: request.value.to_payload(),
    }))
}

/// Forward converter parsing every payload strictly as `data_type`
pub fn typed_forward(data_type: DataType) -> ForwardHandler {
    Arc::new(move |payload: &[u8]| data_type.parse_payload(payload))
}

/// Backward converter publishing to a topic template
///
/// `{topic}` in the template is replaced with the written variable's topic.
pub fn templated_backward(template: impl Into<String>) -> BackwardHandler {
    let template = template.into();
    Arc::new(move |request: &WriteRequest| -> Result<Option<PublishRequest>, ConvertError> {
        Ok(Some(PublishRequest {
            topic: template.replace("{topic}", &request.topic),
            payload: request.value.to_payload(),
        }))
    })
}
