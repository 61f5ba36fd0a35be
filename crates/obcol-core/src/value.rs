#![forbid(unsafe_code)]

//! Dynamic values stored inside observable collections.
//!
//! Maps and sequences are shared handles (`Rc<RefCell<..>>`): cloning a
//! [`Value::Map`] clones the handle, not the contents. A nested reference
//! obtained through a proxy therefore mutates the same node of the tree the
//! root proxy wraps.
//!
//! [`Value::Observed`] holds a proxy that was stored into a container, e.g. a
//! collection built with [`create`](crate::create) and then inserted
//! elsewhere. Reads through another proxy return it as is, so it is never
//! wrapped twice.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::container::Container;
use crate::error::{Error, Result};
use crate::proxy::ObservableProxy;

/// Shared, interiorly mutable storage for container values.
pub type Shared<T> = Rc<RefCell<T>>;

/// Sequence contents.
pub type Seq = Vec<Value>;

/// Map contents. Iteration is in insertion order; re-assigning a key keeps
/// its position and removal closes the gap.
pub type Map = IndexMap<String, Value>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Shared<Seq>),
    Map(Shared<Map>),
    /// A collection already wrapped in a proxy.
    Observed(ObservableProxy),
}

impl Value {
    /// Build a sequence from any iterator of values.
    pub fn seq<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Seq(Rc::new(RefCell::new(
            items.into_iter().map(Into::into).collect(),
        )))
    }

    /// Build a map from `(key, value)` pairs.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(Rc::new(RefCell::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    #[must_use]
    pub fn empty_seq() -> Self {
        Self::Seq(Rc::default())
    }

    #[must_use]
    pub fn empty_map() -> Self {
        Self::Map(Rc::default())
    }

    /// Short type name used in error messages and diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "map",
            Self::Observed(proxy) => proxy.kind().name(),
        }
    }

    /// Whether this is a raw (unwrapped) map or sequence.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Seq(_) | Self::Map(_))
    }

    #[must_use]
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_proxy(&self) -> Option<&ObservableProxy> {
        match self {
            Self::Observed(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_proxy(self) -> Option<ObservableProxy> {
        match self {
            Self::Observed(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// The container handle behind this value, looking through proxies.
    #[must_use]
    pub fn container(&self) -> Option<Container> {
        match self {
            Self::Seq(items) => Some(Container::Seq(Rc::clone(items))),
            Self::Map(entries) => Some(Container::Map(Rc::clone(entries))),
            Self::Observed(proxy) => Some(proxy.subject().clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON tree. Observed values render as their subject;
    /// non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(n) => Json::from(*n),
            Self::Float(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
            Self::Str(s) => Json::String(s.clone()),
            Self::Seq(items) => Json::Array(items.borrow().iter().map(Value::to_json).collect()),
            Self::Map(entries) => Json::Object(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Observed(proxy) => proxy.subject().to_json(),
        }
    }

    /// Strip the proxy layer, if any, yielding the raw subject handle.
    fn unobserved(&self) -> Value {
        match self {
            Self::Observed(proxy) => proxy.subject().to_value(),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Equality and ordering
// ---------------------------------------------------------------------------

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.unobserved(), other.unobserved()) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => a as f64 == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Seq(a), Self::Seq(b)) => Rc::ptr_eq(&a, &b) || *a.borrow() == *b.borrow(),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(&a, &b) || *a.borrow() == *b.borrow(),
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    /// Numbers compare numerically, strings lexically, sequences
    /// element-wise. Everything else is unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.unobserved(), other.unobserved()) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(&b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(&b)),
            (Self::Seq(a), Self::Seq(b)) => {
                if Rc::ptr_eq(&a, &b) {
                    return Some(Ordering::Equal);
                }
                a.borrow().partial_cmp(&*b.borrow())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Seq(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Self::Map(entries) => f.debug_map().entries(entries.borrow().iter()).finish(),
            Self::Observed(proxy) => f.debug_tuple("Observed").field(proxy).finish(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Seq(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let entries = entries.borrow();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Observed(proxy) => proxy.subject().to_value().serialize(serializer),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Self::Float(n as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Seq(Rc::new(RefCell::new(items)))
    }
}

impl From<Map> for Value {
    fn from(entries: Map) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }
}

impl From<ObservableProxy> for Value {
    fn from(proxy: ObservableProxy) -> Self {
        Self::Observed(proxy)
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        container.to_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Json::String(s) => Self::Str(s),
            Json::Array(items) => Self::seq(items.into_iter().map(Value::from)),
            Json::Object(entries) => Self::map(entries.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Address of an element: a field name for maps, a position for sequences.
///
/// Negative indexes count from the end of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(i64),
}

impl Key {
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Field(name) => Value::Str(name),
            Self::Index(i) => Value::Int(i),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Self::Index(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Self::Index(i64::from(i))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Self::Index(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl TryFrom<&Value> for Key {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Str(name) => Ok(Self::Field(name.clone())),
            Value::Int(i) => Ok(Self::Index(*i)),
            _ => Err(Error::InvalidArgument {
                op: "[]",
                expected: "a string key or integer index",
            }),
        }
    }
}
