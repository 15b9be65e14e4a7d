//! Call argument and return values.
//!
//! Values are externally tagged so proposal files stay readable:
//!
//! ```yaml
//! args:
//!   - uint: 1000
//!   - address: "0xdead"
//!   - list: [{ bool: true }, { string: "memo" }]
//! ```

use std::fmt;

use serde::de::{self, DeserializeSeed};
use serde::{Deserialize, Deserializer, Serialize};

use crate::address::Address;

/// A single ABI-like value passed to or returned from a contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Uint(#[serde(with = "wide_uint")] u128),
    Int(#[serde(with = "wide_int")] i128),
    Address(Address),
    String(String),
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    /// Short name of the value's kind, used in type-mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Uint(_) => "uint",
            Value::Int(_) => "int",
            Value::Address(_) => "address",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Value::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i128::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Address(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u128> for Value {
    fn from(v: u128) -> Self {
        Value::Uint(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v as u128)
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::Int(v)
    }
}

impl From<Address> for Value {
    fn from(v: Address) -> Self {
        Value::Address(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Tags accepted for [`Value`] in files.
pub const VALUE_TAGS: &[&str] = &["bool", "uint", "int", "address", "string", "bytes", "list"];

/// Deserializes the body of one tagged [`Value`] once the caller has read
/// the tag itself. Types that dispatch on the map key (such as symbolic
/// arguments) use this so wide integers reach [`wide_uint`] unbuffered.
pub struct TaggedValueSeed<'a>(pub &'a str);

impl<'de> DeserializeSeed<'de> for TaggedValueSeed<'_> {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        match self.0 {
            "bool" => bool::deserialize(deserializer).map(Value::Bool),
            "uint" => wide_uint::deserialize(deserializer).map(Value::Uint),
            "int" => wide_int::deserialize(deserializer).map(Value::Int),
            "address" => Address::deserialize(deserializer).map(Value::Address),
            "string" => String::deserialize(deserializer).map(Value::String),
            "bytes" => hex_bytes::deserialize(deserializer).map(Value::Bytes),
            "list" => Vec::<Value>::deserialize(deserializer).map(Value::List),
            other => Err(de::Error::unknown_variant(other, VALUE_TAGS)),
        }
    }
}

/// Format a value list as `a, b, c` for logs and reports.
pub fn format_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Serde adapter for `u128` amounts.
///
/// Amounts above `u64::MAX` travel as decimal strings; YAML and buffered serde
/// content cannot carry 128-bit integers.
pub mod wide_uint {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        match u64::try_from(*value) {
            Ok(small) => serializer.serialize_u64(small),
            Err(_) => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct WideUint;

        impl<'de> Visitor<'de> for WideUint {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom(format!("negative uint {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim()
                    .replace('_', "")
                    .parse()
                    .map_err(|e| E::custom(format!("invalid uint '{}': {}", v, e)))
            }
        }

        deserializer.deserialize_any(WideUint)
    }
}

/// Serde adapter for `Option<u128>` amounts, see [`wide_uint`].
pub mod wide_uint_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    struct Wrapped(#[serde(with = "super::wide_uint")] u128);

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => super::wide_uint::serialize(v, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u128>, D::Error> {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(v)| v))
    }
}

mod wide_int {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        match i64::try_from(*value) {
            Ok(small) => serializer.serialize_i64(small),
            Err(_) => serializer.serialize_str(&value.to_string()),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        struct WideInt;

        impl<'de> Visitor<'de> for WideInt {
            type Value = i128;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a signed integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
                Ok(v as i128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
                Ok(v as i128)
            }

            fn visit_i128<E: de::Error>(self, v: i128) -> Result<i128, E> {
                Ok(v)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<i128, E> {
                v.trim()
                    .replace('_', "")
                    .parse()
                    .map_err(|e| E::custom(format!("invalid int '{}': {}", v, e)))
            }
        }

        deserializer.deserialize_any(WideInt)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(stripped).map_err(serde::de::Error::custom)
    }
}
