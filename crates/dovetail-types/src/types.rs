use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Monotonically increasing fact index. Zero means the fact was never asserted.
pub type FactId = u64;

/// Possible values that can be stored in a fact slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FactValue {
    /// Interned symbol (`red`, `nil`, `TRUE`)
    Symbol(Arc<str>),
    /// Interned string (`"hello"`)
    String(Arc<str>),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Ordered sequence of values occupying a multifield slot
    Multifield(Vec<FactValue>),
}

/// Type tag of a `FactValue`, used by slot constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// `FactValue::Symbol`
    Symbol,
    /// `FactValue::String`
    String,
    /// `FactValue::Integer`
    Integer,
    /// `FactValue::Float`
    Float,
    /// `FactValue::Multifield`
    Multifield,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Symbol => "SYMBOL",
            Self::String => "STRING",
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Multifield => "MULTIFIELD",
        };
        f.write_str(name)
    }
}

// -------------------------------------------------------------------------------------------------
// Conversions between `FactValue` and `serde_json::Value`.
// JSON has no symbols, so booleans and null travel as the conventional symbols
// `TRUE`, `FALSE` and `nil`.
// -------------------------------------------------------------------------------------------------

impl From<&FactValue> for serde_json::Value {
    fn from(value: &FactValue) -> Self {
        match value {
            FactValue::Symbol(s) => match &**s {
                "TRUE" => Self::Bool(true),
                "FALSE" => Self::Bool(false),
                "nil" => Self::Null,
                other => Self::String(other.to_string()),
            },
            FactValue::String(s) => Self::String(s.to_string()),
            FactValue::Integer(i) => Self::Number(serde_json::Number::from(*i)),
            FactValue::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number)
            }
            FactValue::Multifield(items) => {
                Self::Array(items.iter().map(std::convert::Into::into).collect())
            }
        }
    }
}

impl From<FactValue> for serde_json::Value {
    fn from(value: FactValue) -> Self {
        Self::from(&value)
    }
}

impl TryFrom<&serde_json::Value> for FactValue {
    type Error = anyhow::Error;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(anyhow!("Unsupported number value: {}", n));
                }
            }
            serde_json::Value::Bool(b) => Self::symbol(if *b { "TRUE" } else { "FALSE" }),
            serde_json::Value::Array(arr) => {
                let inner = arr.iter().map(Self::try_from).collect::<Result<Vec<_>, _>>()?;
                if inner.iter().any(Self::is_multifield) {
                    return Err(anyhow!("Multifield values cannot be nested"));
                }
                Self::Multifield(inner)
            }
            serde_json::Value::Null => Self::symbol("nil"),
            serde_json::Value::Object(_) => {
                return Err(anyhow!("JSON objects have no slot value representation"));
            }
        })
    }
}

impl Hash for FactValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Symbol(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::String(s) => {
                1u8.hash(state);
                s.hash(state);
            }
            Self::Integer(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                3u8.hash(state);
                f.to_bits().hash(state); // bit pattern keeps Hash consistent with Eq
            }
            Self::Multifield(items) => {
                4u8.hash(state);
                items.len().hash(state);
                for item in items {
                    item.hash(state);
                }
            }
        }
    }
}

impl PartialEq for FactValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Symbol(a), Self::Symbol(b)) | (Self::String(a), Self::String(b)) => {
                Arc::ptr_eq(a, b) || a == b
            }
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Multifield(a), Self::Multifield(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FactValue {}

impl PartialOrd for FactValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use FactValue::{Float, Integer, String, Symbol};
        match (self, other) {
            (Symbol(a), Symbol(b)) | (String(a), String(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(s) => write!(f, "{s}"),
            Self::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    if ch == '"' || ch == '\\' {
                        write!(f, "\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                write!(f, "\"")
            }
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl:?}"),
            Self::Multifield(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl FactValue {
    /// Create a symbol value
    #[must_use]
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Arc::from(name))
    }

    /// Create a string value
    #[must_use]
    pub fn string(text: &str) -> Self {
        Self::String(Arc::from(text))
    }

    /// Create a multifield value from its members
    #[must_use]
    pub const fn multifield(items: Vec<Self>) -> Self {
        Self::Multifield(items)
    }

    /// The empty multifield
    #[must_use]
    pub const fn empty_multifield() -> Self {
        Self::Multifield(Vec::new())
    }

    /// Get the type tag of this value
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Symbol(_) => ValueType::Symbol,
            Self::String(_) => ValueType::String,
            Self::Integer(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Float,
            Self::Multifield(_) => ValueType::Multifield,
        }
    }

    /// Get the type name as a string
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Symbol(_) => "symbol",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Multifield(_) => "multifield",
        }
    }

    /// Whether this value occupies a multifield slot
    #[must_use]
    pub const fn is_multifield(&self) -> bool {
        matches!(self, Self::Multifield(_))
    }

    /// Borrow the members of a multifield value
    #[must_use]
    pub fn as_multifield(&self) -> Option<&[Self]> {
        match self {
            Self::Multifield(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the text of a symbol or string
    #[must_use]
    pub fn as_lexeme(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) | Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convenience accessor returning an `f64` representation if this value is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Number of fields this value contributes to a fact: the member count of a
    /// multifield, one otherwise
    #[must_use]
    pub fn field_count(&self) -> usize {
        match self {
            Self::Multifield(items) => items.len(),
            _ => 1,
        }
    }
}
