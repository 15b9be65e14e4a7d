//! Method signatures such as `setCap(uint256)`.
//!
//! A signature is parsed once and then used to type-check argument lists
//! before a call leaves the harness, so a malformed command fails with a
//! precise message instead of an opaque revert.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

/// Parameter type in a method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Uint(u16),
    Int(u16),
    Address,
    Bool,
    String,
    Bytes,
    FixedBytes(usize),
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_suffix("[]") {
            return Ok(ParamType::Array(Box::new(ParamType::parse(inner)?)));
        }
        match raw {
            "address" => return Ok(ParamType::Address),
            "bool" => return Ok(ParamType::Bool),
            "string" => return Ok(ParamType::String),
            "bytes" => return Ok(ParamType::Bytes),
            "uint" => return Ok(ParamType::Uint(256)),
            "int" => return Ok(ParamType::Int(256)),
            _ => {}
        }
        if let Some(bits) = raw.strip_prefix("uint") {
            return Ok(ParamType::Uint(parse_bits(raw, bits)?));
        }
        if let Some(bits) = raw.strip_prefix("int") {
            return Ok(ParamType::Int(parse_bits(raw, bits)?));
        }
        if let Some(len) = raw.strip_prefix("bytes") {
            let len: usize = len
                .parse()
                .with_context(|| format!("invalid fixed bytes type '{}'", raw))?;
            if len == 0 || len > 32 {
                bail!("fixed bytes length must be 1..=32, got '{}'", raw);
            }
            return Ok(ParamType::FixedBytes(len));
        }
        Err(anyhow!("unsupported parameter type '{}'", raw))
    }

    /// Check a value against this type, returning a reason on mismatch.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match (self, value) {
            (ParamType::Uint(bits), Value::Uint(v)) => {
                if *bits < 128 && *v >> bits != 0 {
                    Err(format!("{} does not fit in uint{}", v, bits))
                } else {
                    Ok(())
                }
            }
            (ParamType::Int(bits), Value::Int(v)) => check_int_width(*v, *bits),
            (ParamType::Int(bits), Value::Uint(v)) => match i128::try_from(*v) {
                Ok(v) => check_int_width(v, *bits),
                Err(_) => Err(format!("{} does not fit in int{}", v, bits)),
            },
            (ParamType::Address, Value::Address(_)) => Ok(()),
            (ParamType::Bool, Value::Bool(_)) => Ok(()),
            (ParamType::String, Value::String(_)) => Ok(()),
            (ParamType::Bytes, Value::Bytes(_)) => Ok(()),
            (ParamType::FixedBytes(len), Value::Bytes(bytes)) => {
                if bytes.len() == *len {
                    Ok(())
                } else {
                    Err(format!("expected {} bytes, got {}", len, bytes.len()))
                }
            }
            (ParamType::Array(inner), Value::List(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    inner
                        .check(item)
                        .map_err(|reason| format!("element {}: {}", idx, reason))?;
                }
                Ok(())
            }
            (expected, got) => Err(format!("expected {}, got {}", expected, got.kind())),
        }
    }
}

fn parse_bits(raw: &str, bits: &str) -> Result<u16> {
    let bits: u16 = bits
        .parse()
        .with_context(|| format!("invalid integer type '{}'", raw))?;
    if bits == 0 || bits > 256 || bits % 8 != 0 {
        bail!("integer width must be a multiple of 8 in 8..=256, got '{}'", raw);
    }
    Ok(bits)
}

fn check_int_width(v: i128, bits: u16) -> std::result::Result<(), String> {
    if bits >= 128 {
        return Ok(());
    }
    let max = (1i128 << (bits - 1)) - 1;
    let min = -(1i128 << (bits - 1));
    if v < min || v > max {
        Err(format!("{} does not fit in int{}", v, bits))
    } else {
        Ok(())
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Uint(bits) => write!(f, "uint{}", bits),
            ParamType::Int(bits) => write!(f, "int{}", bits),
            ParamType::Address => write!(f, "address"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::String => write!(f, "string"),
            ParamType::Bytes => write!(f, "bytes"),
            ParamType::FixedBytes(len) => write!(f, "bytes{}", len),
            ParamType::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

/// A parsed method signature: name plus ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    name: String,
    params: Vec<ParamType>,
}

impl MethodSignature {
    /// Parse `name(type,type,...)`.
    ///
    /// ```
    /// use proposal_sandbox_types::MethodSignature;
    ///
    /// let sig = MethodSignature::parse("setCap(uint256)").unwrap();
    /// assert_eq!(sig.name(), "setCap");
    /// assert_eq!(sig.to_string(), "setCap(uint256)");
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let open = raw
            .find('(')
            .ok_or_else(|| anyhow!("signature '{}' is missing '('", raw))?;
        let inner = raw[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| anyhow!("signature '{}' is missing closing ')'", raw))?;
        let name = raw[..open].trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid method name in signature '{}'", raw);
        }
        let params = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(ParamType::parse)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("invalid signature '{}'", raw))?
        };
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Validate arity and per-argument types.
    pub fn check_args(&self, args: &[Value]) -> Result<()> {
        if args.len() != self.params.len() {
            bail!(
                "{} expects {} argument(s), got {}",
                self,
                self.params.len(),
                args.len()
            );
        }
        for (idx, (param, arg)) in self.params.iter().zip(args).enumerate() {
            if let Err(reason) = param.check(arg) {
                bail!("{} argument {}: {}", self, idx, reason);
            }
        }
        Ok(())
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

impl FromStr for MethodSignature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for MethodSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MethodSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MethodSignature::parse(&raw).map_err(serde::de::Error::custom)
    }
}
