//! Agent and user attributes with destination filtering
//!
//! Attributes are collected over the life of a transaction and later filtered
//! per destination. A transaction trace only carries the attributes whose
//! destination set includes [`Destination::TXN_TRACE`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum key length in bytes
pub const ATTRIBUTE_KEY_LENGTH_LIMIT: usize = 255;
/// String values longer than this are truncated
pub const ATTRIBUTE_VALUE_LENGTH_LIMIT: usize = 255;
/// Maximum number of user attributes per transaction
pub const USER_ATTRIBUTE_LIMIT: usize = 64;

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Convert a JSON value, rejecting anything that is not a scalar
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AttributeValue::Int(i))
                } else {
                    n.as_f64().map(AttributeValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }

    /// Truncate string values to the value length limit
    pub fn truncated(self) -> Self {
        match self {
            AttributeValue::String(s) => {
                AttributeValue::String(truncate_str(&s, ATTRIBUTE_VALUE_LENGTH_LIMIT).to_string())
            }
            other => other,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Truncate to at most `limit` bytes without splitting a character
pub fn truncate_str(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Set of destinations an attribute is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(u8);

impl Destination {
    pub const NONE: Destination = Destination(0);
    pub const TXN_EVENT: Destination = Destination(1 << 0);
    pub const ERROR: Destination = Destination(1 << 1);
    pub const TXN_TRACE: Destination = Destination(1 << 2);
    pub const ALL: Destination = Destination(0b111);

    pub fn contains(&self, other: Destination) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Destination {
    type Output = Destination;

    fn bitor(self, rhs: Destination) -> Destination {
        Destination(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
struct Attribute {
    value: AttributeValue,
    destinations: Destination,
}

/// Attributes gathered for one transaction
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    agent: BTreeMap<String, Attribute>,
    user: BTreeMap<String, Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute captured by the agent itself (e.g. `request.method`)
    pub fn add_agent_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destination,
    ) {
        self.agent.insert(
            key.into(),
            Attribute {
                value: value.into().truncated(),
                destinations,
            },
        );
    }

    /// Record an attribute supplied by application code
    pub fn add_user_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destination,
    ) -> Result<(), AttributeError> {
        let key = key.into();
        if key.len() > ATTRIBUTE_KEY_LENGTH_LIMIT {
            return Err(AttributeError::KeyTooLong(key.len()));
        }
        if !self.user.contains_key(&key) && self.user.len() >= USER_ATTRIBUTE_LIMIT {
            return Err(AttributeError::LimitExceeded(key));
        }

        self.user.insert(
            key,
            Attribute {
                value: value.into().truncated(),
                destinations,
            },
        );
        Ok(())
    }

    /// Record a user attribute from an arbitrary JSON value
    pub fn add_user_json(
        &mut self,
        key: impl Into<String>,
        value: &serde_json::Value,
        destinations: Destination,
    ) -> Result<(), AttributeError> {
        let key = key.into();
        let value = AttributeValue::from_json(value)
            .ok_or_else(|| AttributeError::InvalidValue(key.clone()))?;
        self.add_user_attribute(key, value, destinations)
    }

    pub fn is_empty(&self) -> bool {
        self.agent.is_empty() && self.user.is_empty()
    }

    /// Attributes bound for a single destination, keys sorted
    pub fn for_destination(&self, destination: Destination) -> DestinationAttributes {
        let filter = |attrs: &BTreeMap<String, Attribute>| {
            attrs
                .iter()
                .filter(|(_, attr)| attr.destinations.contains(destination))
                .map(|(key, attr)| (key.clone(), attr.value.clone()))
                .collect()
        };

        DestinationAttributes {
            agent: filter(&self.agent),
            user: filter(&self.user),
        }
    }
}

/// Agent and user attributes filtered for one destination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationAttributes {
    pub agent: BTreeMap<String, AttributeValue>,
    pub user: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    #[error("Attribute key too long: {0} bytes")]
    KeyTooLong(usize),

    #[error("User attribute limit reached, dropping {0}")]
    LimitExceeded(String),

    #[error("Attribute {0} has an unsupported value type")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_filtering() {
        let mut attrs = Attributes::new();
        attrs.add_agent_attribute("request.method", "GET", Destination::ALL);
        attrs.add_agent_attribute("request.headers.host", "localhost", Destination::TXN_EVENT);
        attrs
            .add_user_attribute("zap", 123i64, Destination::ALL)
            .unwrap();
        attrs
            .add_user_attribute("error_only", true, Destination::ERROR)
            .unwrap();

        let trace = attrs.for_destination(Destination::TXN_TRACE);
        assert_eq!(trace.agent.len(), 1);
        assert_eq!(
            trace.agent.get("request.method"),
            Some(&AttributeValue::String("GET".to_string()))
        );
        assert_eq!(trace.user.len(), 1);
        assert_eq!(trace.user.get("zap"), Some(&AttributeValue::Int(123)));
    }

    #[test]
    fn test_destination_union() {
        let dest = Destination::TXN_TRACE | Destination::ERROR;
        assert!(dest.contains(Destination::TXN_TRACE));
        assert!(dest.contains(Destination::ERROR));
        assert!(!dest.contains(Destination::TXN_EVENT));
        assert!(Destination::ALL.contains(dest));
    }

    #[test]
    fn test_user_attribute_vetting() {
        let mut attrs = Attributes::new();

        let long_key = "k".repeat(ATTRIBUTE_KEY_LENGTH_LIMIT + 1);
        assert!(matches!(
            attrs.add_user_attribute(long_key, 1i64, Destination::ALL),
            Err(AttributeError::KeyTooLong(256))
        ));

        assert!(matches!(
            attrs.add_user_json("list", &serde_json::json!([1, 2]), Destination::ALL),
            Err(AttributeError::InvalidValue(_))
        ));

        for i in 0..USER_ATTRIBUTE_LIMIT {
            attrs
                .add_user_attribute(format!("key_{}", i), i as i64, Destination::ALL)
                .unwrap();
        }
        assert!(matches!(
            attrs.add_user_attribute("one_too_many", 1i64, Destination::ALL),
            Err(AttributeError::LimitExceeded(_))
        ));
        // Overwriting an existing key is still allowed at the limit
        attrs
            .add_user_attribute("key_0", 99i64, Destination::ALL)
            .unwrap();
    }

    #[test]
    fn test_string_values_truncated() {
        let mut attrs = Attributes::new();
        attrs
            .add_user_attribute("long", "é".repeat(200), Destination::ALL)
            .unwrap();

        let trace = attrs.for_destination(Destination::TXN_TRACE);
        match trace.user.get("long") {
            Some(AttributeValue::String(s)) => {
                assert!(s.len() <= ATTRIBUTE_VALUE_LENGTH_LIMIT);
                assert_eq!(s.len(), 254);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(
            AttributeValue::from_json(&serde_json::json!(1)),
            Some(AttributeValue::Int(1))
        );
        assert_eq!(
            AttributeValue::from_json(&serde_json::json!(1.5)),
            Some(AttributeValue::Float(1.5))
        );
        assert_eq!(AttributeValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(AttributeValue::from_json(&serde_json::json!({"a": 1})), None);
    }
}
