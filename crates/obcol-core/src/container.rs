#![forbid(unsafe_code)]

//! Raw map and sequence semantics.
//!
//! [`Container`] is the subject a proxy wraps. Its methods are the real
//! operations; a proxy forwards to them unchanged and adds notification on
//! top. Calling them directly never notifies anyone.
//!
//! # Borrowing
//!
//! Operations that run caller closures (`each`, `retain`, `reject`,
//! `map_in_place`, `sort_by_key`) snapshot the elements first and release the `RefCell`
//! borrow before calling out, so closures may mutate nested collections or
//! read the container itself. Results are written back afterwards.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Error |
//! |---------|-------|-------|
//! | Wrong kind | e.g. `push` on a map | `UnsupportedOperation` |
//! | Missing key | `fetch` | `KeyNotFound` |
//! | Bad index | `fetch`, negative `set`, `insert` | `IndexOutOfRange` |
//! | Unallocatable padding | `set`/`insert` far past the end | `IndexOutOfRange` (contents untouched) |
//! | Mixed types | `sort` | `Incomparable` (contents untouched) |
//! | Wrong argument | e.g. `merge` with a sequence | `InvalidArgument` |

use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ops::Op;
use crate::value::{Key, Map, Seq, Shared, Value};

/// Which kind of collection a subject is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Seq,
    Map,
}

impl ContainerKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Seq => "sequence",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A shared handle to a map or sequence.
///
/// Cloning shares the contents. Identity is handle identity.
#[derive(Clone)]
pub enum Container {
    Seq(Shared<Seq>),
    Map(Shared<Map>),
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_value(), f)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Map a possibly negative index onto `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Null-fill `items` up to `at` with room for one more element.
///
/// Fails with [`Error::IndexOutOfRange`] when that much room cannot be
/// allocated; `items` is left untouched.
fn pad_to(items: &mut Seq, at: usize, index: i64) -> Result<()> {
    let len = items.len();
    items
        .try_reserve((at - len).saturating_add(1))
        .map_err(|_| Error::IndexOutOfRange { index, len })?;
    items.resize(at, Value::Null);
    Ok(())
}

impl Container {
    #[must_use]
    pub fn new_seq() -> Self {
        Self::Seq(Rc::default())
    }

    #[must_use]
    pub fn new_map() -> Self {
        Self::Map(Rc::default())
    }

    /// The raw container behind `value`. Observed values are not raw and
    /// yield `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Seq(items) => Some(Self::Seq(Rc::clone(items))),
            Value::Map(entries) => Some(Self::Map(Rc::clone(entries))),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        match self {
            Self::Seq(_) => ContainerKind::Seq,
            Self::Map(_) => ContainerKind::Map,
        }
    }

    /// This handle as a raw value (shares contents).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Seq(items) => Value::Seq(Rc::clone(items)),
            Self::Map(entries) => Value::Map(Rc::clone(entries)),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Container) -> bool {
        match (self, other) {
            (Self::Seq(a), Self::Seq(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Whether `value` is a raw handle to this very container.
    #[must_use]
    pub fn is_handle_of(&self, value: &Value) -> bool {
        Self::from_value(value).is_some_and(|other| self.ptr_eq(&other))
    }

    fn unsupported(&self, op: Op) -> Error {
        Error::UnsupportedOperation {
            op: op.name().to_owned(),
            kind: self.kind(),
        }
    }

    fn seq(&self, op: Op) -> Result<&Shared<Seq>> {
        match self {
            Self::Seq(items) => Ok(items),
            Self::Map(_) => Err(self.unsupported(op)),
        }
    }

    fn map(&self, op: Op) -> Result<&Shared<Map>> {
        match self {
            Self::Map(entries) => Ok(entries),
            Self::Seq(_) => Err(self.unsupported(op)),
        }
    }

    // -- reads ------------------------------------------------------------

    /// Element at `key`, or null when absent.
    pub fn get(&self, key: &Key) -> Result<Value> {
        match (self, key) {
            (Self::Map(entries), Key::Field(name)) => {
                Ok(entries.borrow().get(name).cloned().unwrap_or_default())
            }
            (Self::Seq(items), Key::Index(index)) => {
                let items = items.borrow();
                Ok(resolve_index(*index, items.len())
                    .map(|i| items[i].clone())
                    .unwrap_or_default())
            }
            (Self::Map(_), Key::Index(_)) => Err(Error::InvalidArgument {
                op: Op::Get.name(),
                expected: "a string key",
            }),
            (Self::Seq(_), Key::Field(_)) => Err(Error::InvalidArgument {
                op: Op::Get.name(),
                expected: "an integer index",
            }),
        }
    }

    /// Element at `key`, failing when absent.
    pub fn fetch(&self, key: &Key) -> Result<Value> {
        match (self, key) {
            (Self::Map(entries), Key::Field(name)) => entries
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::KeyNotFound(name.clone())),
            (Self::Seq(items), Key::Index(index)) => {
                let items = items.borrow();
                resolve_index(*index, items.len())
                    .map(|i| items[i].clone())
                    .ok_or(Error::IndexOutOfRange {
                        index: *index,
                        len: items.len(),
                    })
            }
            _ => Err(Error::InvalidArgument {
                op: Op::Fetch.name(),
                expected: "a key matching the container kind",
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Seq(items) => items.borrow().len(),
            Self::Map(entries) => entries.borrow().len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.map(Op::ContainsKey)?.borrow().contains_key(key))
    }

    /// Sequence membership, or map value membership.
    #[must_use]
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Self::Seq(items) => items.borrow().iter().any(|v| v == needle),
            Self::Map(entries) => entries.borrow().values().any(|v| v == needle),
        }
    }

    /// Map keys as a new sequence.
    pub fn keys(&self) -> Result<Value> {
        let keys: Vec<Value> = self
            .map(Op::Keys)?
            .borrow()
            .keys()
            .map(|k| Value::Str(k.clone()))
            .collect();
        Ok(Value::from(keys))
    }

    /// Map values as a new sequence.
    pub fn values(&self) -> Result<Value> {
        let values: Vec<Value> = self.map(Op::Values)?.borrow().values().cloned().collect();
        Ok(Value::from(values))
    }

    /// First element; for maps a new `[key, value]` pair.
    #[must_use]
    pub fn first(&self) -> Value {
        match self {
            Self::Seq(items) => items.borrow().first().cloned().unwrap_or_default(),
            Self::Map(entries) => entries
                .borrow()
                .iter()
                .next()
                .map(|(k, v)| Value::seq([Value::Str(k.clone()), v.clone()]))
                .unwrap_or_default(),
        }
    }

    pub fn last(&self) -> Result<Value> {
        Ok(self
            .seq(Op::Last)?
            .borrow()
            .last()
            .cloned()
            .unwrap_or_default())
    }

    /// Shallow copy into a new, unshared container.
    #[must_use]
    pub fn dup(&self) -> Value {
        match self {
            Self::Seq(items) => Value::from(items.borrow().clone()),
            Self::Map(entries) => Value::from(entries.borrow().clone()),
        }
    }

    #[must_use]
    pub fn inspect(&self) -> String {
        self.to_string()
    }

    // -- writes -----------------------------------------------------------

    /// Store `value` at `key`, returning the previous element (or null).
    ///
    /// Sequence assignment past the end pads with nulls.
    pub fn set(&self, key: Key, value: Value) -> Result<Value> {
        match (self, key) {
            (Self::Map(entries), Key::Field(name)) => {
                Ok(entries.borrow_mut().insert(name, value).unwrap_or_default())
            }
            (Self::Seq(items), Key::Index(index)) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                if let Some(i) = resolve_index(index, len) {
                    return Ok(std::mem::replace(&mut items[i], value));
                }
                if index < 0 {
                    return Err(Error::IndexOutOfRange { index, len });
                }
                let at = usize::try_from(index).map_err(|_| Error::IndexOutOfRange { index, len })?;
                pad_to(&mut items, at, index)?;
                items.push(value);
                Ok(Value::Null)
            }
            (Self::Map(_), Key::Index(_)) => Err(Error::InvalidArgument {
                op: Op::Set.name(),
                expected: "a string key",
            }),
            (Self::Seq(_), Key::Field(_)) => Err(Error::InvalidArgument {
                op: Op::Set.name(),
                expected: "an integer index",
            }),
        }
    }

    /// Append and return this container.
    pub fn push(&self, value: Value) -> Result<Value> {
        self.seq(Op::Push)?.borrow_mut().push(value);
        Ok(self.to_value())
    }

    pub fn pop(&self) -> Result<Value> {
        Ok(self.seq(Op::Pop)?.borrow_mut().pop().unwrap_or_default())
    }

    pub fn shift(&self) -> Result<Value> {
        let items = self.seq(Op::Shift)?;
        let mut items = items.borrow_mut();
        if items.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(items.remove(0))
        }
    }

    /// Prepend and return this container.
    pub fn unshift(&self, value: Value) -> Result<Value> {
        self.seq(Op::Unshift)?.borrow_mut().insert(0, value);
        Ok(self.to_value())
    }

    /// Insert before `index` (negative indexes insert after the addressed
    /// element) and return this container.
    pub fn insert(&self, index: i64, value: Value) -> Result<Value> {
        let items = self.seq(Op::Insert)?;
        let mut items = items.borrow_mut();
        let len = items.len();
        let at = if index < 0 {
            resolve_index(index, len).map(|i| i + 1)
        } else {
            usize::try_from(index).ok()
        };
        match at {
            Some(at) if at <= len => items.insert(at, value),
            Some(at) => {
                pad_to(&mut items, at, index)?;
                items.push(value);
            }
            None => return Err(Error::IndexOutOfRange { index, len }),
        }
        drop(items);
        Ok(self.to_value())
    }

    /// Remove the element at `key`, returning it (or null when absent).
    pub fn remove(&self, key: &Key) -> Result<Value> {
        match (self, key) {
            (Self::Map(entries), Key::Field(name)) => {
                Ok(entries.borrow_mut().shift_remove(name).unwrap_or_default())
            }
            (Self::Seq(items), Key::Index(index)) => {
                let mut items = items.borrow_mut();
                Ok(resolve_index(*index, items.len())
                    .map(|i| items.remove(i))
                    .unwrap_or_default())
            }
            _ => Err(Error::InvalidArgument {
                op: Op::Remove.name(),
                expected: "a key matching the container kind",
            }),
        }
    }

    /// Remove every element (or map entry) equal to `needle`. Returns the
    /// needle when something was removed, null otherwise.
    pub fn remove_value(&self, needle: &Value) -> Value {
        let removed = match self {
            Self::Seq(items) => {
                let snapshot = items.borrow().clone();
                let kept: Seq = snapshot.iter().filter(|v| *v != needle).cloned().collect();
                let removed = kept.len() != snapshot.len();
                *items.borrow_mut() = kept;
                removed
            }
            Self::Map(entries) => {
                let snapshot = entries.borrow().clone();
                let before = snapshot.len();
                let kept: Map = snapshot.into_iter().filter(|(_, v)| v != needle).collect();
                let removed = kept.len() != before;
                *entries.borrow_mut() = kept;
                removed
            }
        };
        if removed { needle.clone() } else { Value::Null }
    }

    pub fn clear(&self) -> Value {
        match self {
            Self::Seq(items) => items.borrow_mut().clear(),
            Self::Map(entries) => entries.borrow_mut().clear(),
        }
        self.to_value()
    }

    /// Append every element of another sequence.
    pub fn concat(&self, other: &Value) -> Result<Value> {
        let items = self.seq(Op::Concat)?;
        let extra = match other.container() {
            Some(Container::Seq(extra)) => extra.borrow().clone(),
            _ => {
                return Err(Error::InvalidArgument {
                    op: Op::Concat.name(),
                    expected: "a sequence",
                });
            }
        };
        items.borrow_mut().extend(extra);
        Ok(self.to_value())
    }

    /// Copy every entry of another map into this one.
    pub fn merge(&self, other: &Value) -> Result<Value> {
        let entries = self.map(Op::Merge)?;
        let extra = match other.container() {
            Some(Container::Map(extra)) => extra.borrow().clone(),
            _ => {
                return Err(Error::InvalidArgument {
                    op: Op::Merge.name(),
                    expected: "a map",
                });
            }
        };
        entries.borrow_mut().extend(extra);
        Ok(self.to_value())
    }

    /// Replace the contents with those of a container of the same kind.
    pub fn replace(&self, other: &Value) -> Result<Value> {
        match (self, other.container()) {
            (Self::Seq(items), Some(Container::Seq(src))) => {
                let copy = src.borrow().clone();
                *items.borrow_mut() = copy;
            }
            (Self::Map(entries), Some(Container::Map(src))) => {
                let copy = src.borrow().clone();
                *entries.borrow_mut() = copy;
            }
            _ => {
                return Err(Error::InvalidArgument {
                    op: Op::Replace.name(),
                    expected: "a container of the same kind",
                });
            }
        }
        Ok(self.to_value())
    }

    /// Keep only the elements for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&Value) -> bool) -> Result<Value> {
        let items = self.seq(Op::Retain)?;
        let snapshot = items.borrow().clone();
        let kept: Seq = snapshot.into_iter().filter(|v| keep(v)).collect();
        *items.borrow_mut() = kept;
        Ok(self.to_value())
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain_pairs(&self, mut keep: impl FnMut(&str, &Value) -> bool) -> Result<Value> {
        let entries = self.map(Op::Retain)?;
        let snapshot = entries.borrow().clone();
        let kept: Map = snapshot.into_iter().filter(|(k, v)| keep(k, v)).collect();
        *entries.borrow_mut() = kept;
        Ok(self.to_value())
    }

    /// Drop the elements for which `reject` returns true.
    pub fn reject(&self, mut reject: impl FnMut(&Value) -> bool) -> Result<Value> {
        self.seq(Op::RejectIf)?;
        self.retain(|v| !reject(v))
    }

    /// Drop the entries for which `reject` returns true.
    pub fn reject_pairs(&self, mut reject: impl FnMut(&str, &Value) -> bool) -> Result<Value> {
        self.map(Op::RejectIf)?;
        self.retain_pairs(|k, v| !reject(k, v))
    }

    /// Drop null elements, or entries whose value is null.
    pub fn compact(&self) -> Value {
        match self {
            Self::Seq(items) => items.borrow_mut().retain(|v| !v.is_null()),
            Self::Map(entries) => entries.borrow_mut().retain(|_, v| !v.is_null()),
        }
        self.to_value()
    }

    pub fn map_in_place(&self, mut f: impl FnMut(&Value) -> Value) -> Result<Value> {
        let items = self.seq(Op::MapInPlace)?;
        let snapshot = items.borrow().clone();
        let mapped: Seq = snapshot.iter().map(&mut f).collect();
        *items.borrow_mut() = mapped;
        Ok(self.to_value())
    }

    /// Sort ascending. Fails without touching the contents when two
    /// elements have no ordering.
    pub fn sort(&self) -> Result<Value> {
        let items = self.seq(Op::Sort)?;
        let mut keyed: Vec<(Value, Value)> =
            items.borrow().iter().map(|v| (v.clone(), v.clone())).collect();
        sort_checked(&mut keyed)?;
        *items.borrow_mut() = keyed.into_iter().map(|(_, v)| v).collect();
        Ok(self.to_value())
    }

    /// Sort by a derived key.
    pub fn sort_by_key(&self, mut key: impl FnMut(&Value) -> Value) -> Result<Value> {
        let items = self.seq(Op::SortBy)?;
        let snapshot = items.borrow().clone();
        let mut keyed: Vec<(Value, Value)> = snapshot.into_iter().map(|v| (key(&v), v)).collect();
        sort_checked(&mut keyed)?;
        *items.borrow_mut() = keyed.into_iter().map(|(_, v)| v).collect();
        Ok(self.to_value())
    }

    pub fn reverse(&self) -> Result<Value> {
        self.seq(Op::Reverse)?.borrow_mut().reverse();
        Ok(self.to_value())
    }

    /// Rotate left by `count` (right when negative).
    pub fn rotate(&self, count: i64) -> Result<Value> {
        let items = self.seq(Op::Rotate)?;
        let mut items = items.borrow_mut();
        if let Ok(len) = i64::try_from(items.len()) {
            if len > 0 {
                let shift = usize::try_from(count.rem_euclid(len)).unwrap_or(0);
                items.rotate_left(shift);
            }
        }
        drop(items);
        Ok(self.to_value())
    }

    /// Drop repeated elements, keeping first occurrences.
    pub fn dedup(&self) -> Result<Value> {
        let items = self.seq(Op::Dedup)?;
        let snapshot = items.borrow().clone();
        let mut unique: Seq = Vec::with_capacity(snapshot.len());
        for item in snapshot {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        *items.borrow_mut() = unique;
        Ok(self.to_value())
    }

    pub fn fill(&self, value: Value) -> Result<Value> {
        self.seq(Op::Fill)?.borrow_mut().fill(value);
        Ok(self.to_value())
    }

    // -- iteration --------------------------------------------------------

    /// Visit each element; map entries are yielded as `[key, value]` pairs.
    pub fn each(&self, mut f: impl FnMut(&Value)) -> Value {
        match self {
            Self::Seq(items) => {
                let snapshot = items.borrow().clone();
                snapshot.iter().for_each(&mut f);
            }
            Self::Map(entries) => {
                let snapshot = entries.borrow().clone();
                for (k, v) in snapshot {
                    f(&Value::seq([Value::Str(k), v]));
                }
            }
        }
        self.to_value()
    }

    pub fn each_pair(&self, mut f: impl FnMut(&str, &Value)) -> Result<Value> {
        let snapshot = self.map(Op::EachPair)?.borrow().clone();
        for (k, v) in &snapshot {
            f(k, v);
        }
        Ok(self.to_value())
    }

    pub fn each_key(&self, mut f: impl FnMut(&str)) -> Result<Value> {
        let keys: Vec<String> = self.map(Op::EachKey)?.borrow().keys().cloned().collect();
        keys.iter().for_each(|k| f(k));
        Ok(self.to_value())
    }

    pub fn each_value(&self, mut f: impl FnMut(&Value)) -> Result<Value> {
        let values: Seq = self.map(Op::EachValue)?.borrow().values().cloned().collect();
        values.iter().for_each(&mut f);
        Ok(self.to_value())
    }

    // -- dynamic dispatch ---------------------------------------------------

    /// Run a callback-free operation with positional arguments.
    ///
    /// Operations that [take a callback](Op::takes_callback) fail with
    /// [`Error::CallbackRequired`].
    pub fn apply(&self, op: Op, args: &[Value]) -> Result<Value> {
        let arg = |i: usize| -> Result<&Value> {
            args.get(i).ok_or(Error::InvalidArgument {
                op: op.name(),
                expected: "more arguments",
            })
        };
        let key = |i: usize| -> Result<Key> { Key::try_from(arg(i)?) };
        let int = |i: usize| -> Result<i64> {
            arg(i)?.as_i64().ok_or(Error::InvalidArgument {
                op: op.name(),
                expected: "an integer",
            })
        };
        match op {
            Op::Get => self.get(&key(0)?),
            Op::Fetch => self.fetch(&key(0)?),
            Op::Len => Ok(Value::from(self.len())),
            Op::IsEmpty => Ok(Value::Bool(self.is_empty())),
            Op::ContainsKey => match arg(0)? {
                Value::Str(name) => self.contains_key(name).map(Value::Bool),
                _ => Err(Error::InvalidArgument {
                    op: op.name(),
                    expected: "a string key",
                }),
            },
            Op::Contains => Ok(Value::Bool(self.contains(arg(0)?))),
            Op::Keys => self.keys(),
            Op::Values => self.values(),
            Op::First => Ok(self.first()),
            Op::Last => self.last(),
            Op::Dup => Ok(self.dup()),
            Op::Inspect => Ok(Value::Str(self.inspect())),
            Op::Set => self.set(key(0)?, arg(1)?.clone()),
            Op::Push => self.push(arg(0)?.clone()),
            Op::Pop => self.pop(),
            Op::Shift => self.shift(),
            Op::Unshift => self.unshift(arg(0)?.clone()),
            Op::Insert => self.insert(int(0)?, arg(1)?.clone()),
            Op::Remove => self.remove(&key(0)?),
            Op::RemoveValue => Ok(self.remove_value(arg(0)?)),
            Op::Clear => Ok(self.clear()),
            Op::Concat => self.concat(arg(0)?),
            Op::Merge => self.merge(arg(0)?),
            Op::Replace => self.replace(arg(0)?),
            Op::Sort => self.sort(),
            Op::Reverse => self.reverse(),
            Op::Rotate => self.rotate(if args.is_empty() { 1 } else { int(0)? }),
            Op::Dedup => self.dedup(),
            Op::Fill => self.fill(arg(0)?.clone()),
            Op::Compact => Ok(self.compact()),
            op => {
                debug_assert!(op.takes_callback(), "{op:?} has no dispatch");
                Err(Error::CallbackRequired { op: op.name() })
            }
        }
    }
}

/// Stable sort of `(key, value)` pairs by key that reports the first
/// incomparable pair instead of producing an arbitrary order.
fn sort_checked(items: &mut [(Value, Value)]) -> Result<()> {
    let failure: Cell<Option<(&'static str, &'static str)>> = Cell::new(None);
    items.sort_by(|(x, _), (y, _)| {
        x.partial_cmp(y).unwrap_or_else(|| {
            if failure.get().is_none() {
                failure.set(Some((x.kind_name(), y.kind_name())));
            }
            Ordering::Equal
        })
    });
    match failure.into_inner() {
        Some((left, right)) => Err(Error::Incomparable { left, right }),
        None => Ok(()),
    }
}
