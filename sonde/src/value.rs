//! The decoded output tree. Everything here is an owned snapshot copied
//! out of foreign memory; no live references survive a decode.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Raw 64-bit patterns between these bounds usually belong to IEEE-754
/// doubles (they carry an exponent); everything outside is far more
/// likely an integer. The bounds come from the original tooling and are
/// a heuristic, which is why both readings are always emitted.
pub const NATIVE_INT_BELOW: u64 = 0x1000_0000_0000_0000;
pub const NATIVE_INT_ABOVE: u64 = 0xFFFF_FFFF_FFFF_0000;

#[inline]
pub fn looks_like_double(raw: u64) -> bool {
    raw > NATIVE_INT_BELOW && raw < NATIVE_INT_ABOVE
}

/// One node of the extracted value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    Text(String),
    /// An unboxed field. The layout loses static type information for
    /// these, so the raw bits are kept and both readings serialized.
    NativeWord(u64),
    List(Vec<ExtractedValue>),
    Object(IndexMap<String, ExtractedValue>),
    /// Recursion-depth bound reached.
    Truncated,
    /// Reference back into an object currently being decoded.
    Cycle(u64),
    /// Diagnostic placeholder for anything the decoder cannot handle.
    Unsupported(String),
}

impl ExtractedValue {
    pub fn diagnostic(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl Serialize for ExtractedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Uint(v) => serializer.serialize_u64(*v),
            Self::Double(v) => serializer.serialize_f64(*v),
            Self::Text(t) => serializer.serialize_str(t),
            Self::NativeWord(raw) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("asInteger", raw)?;
                map.serialize_entry("asDouble", &f64::from_bits(*raw))?;
                map.serialize_entry("likelyDouble", &looks_like_double(*raw))?;
                map.end()
            }
            Self::List(items) => serializer.collect_seq(items),
            Self::Object(fields) => serializer.collect_map(fields),
            Self::Truncated => serializer.serialize_str("<recursion limit>"),
            Self::Cycle(addr) => serializer.serialize_str(&format!("<cycle @{addr:x}>")),
            Self::Unsupported(msg) => serializer.serialize_str(msg),
        }
    }
}

impl fmt::Display for ExtractedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(t) => write!(f, "{t:?}"),
            Self::NativeWord(raw) => write!(f, "{raw:#x}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Truncated => write!(f, "<recursion limit>"),
            Self::Cycle(addr) => write!(f, "<cycle @{addr:x}>"),
            Self::Unsupported(msg) => write!(f, "<{msg}>"),
        }
    }
}

/// Top-level decode result: the resolved class, the tagged absolute
/// address (the raw word itself for smis) and the value tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedObject {
    pub address: u64,
    pub class_name: String,
    pub value: ExtractedValue,
}

impl Serialize for DecodedObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("class", &self.class_name)?;
        map.serialize_entry("address", &format!("{:#x}", self.address))?;
        map.serialize_entry("value", &self.value)?;
        map.end()
    }
}

impl fmt::Display for DecodedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x} = {}", self.class_name, self.address, self.value)
    }
}
