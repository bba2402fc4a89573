//! The value model: entity identifiers and the tagged attribute-value variant.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use ordered_float::OrderedFloat;

/// A stable entity identifier, as it appears inside a committed database.
///
/// Transaction-time identifiers additionally admit temporary placeholders and
/// lookup-refs (see `crate::tx::TxEntity`); those never survive into an
/// `EntityMap` or an AVE slot, which only ever key on `EntityId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// An integer assigned by the engine, monotonically increasing within one
    /// database value (spec invariant 8).
    Id(i64),
    /// A user-supplied symbolic name, stable for the life of the entity.
    Symbol(Arc<str>),
}

impl EntityId {
    pub fn symbol(name: impl Into<Arc<str>>) -> EntityId {
        EntityId::Symbol(name.into())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Id(i) => write!(f, "{i}"),
            EntityId::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// A namespaced attribute name, e.g. `"person/name"`.
///
/// Names whose local segment (the part after the last `/`) begins with `_`
/// are reserved for reverse navigation in pull patterns and may never be used
/// as attribute names in data (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrName(Arc<str>);

impl AttrName {
    pub fn new(name: impl Into<Arc<str>>) -> AttrName {
        AttrName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part of the name after the last `/`, or the whole name if there is
    /// no namespace separator.
    pub fn local_segment(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Whether this name's local segment begins with `_`, marking it as the
    /// reserved reverse-navigation spelling of some forward attribute.
    pub fn is_reverse_spelling(&self) -> bool {
        self.local_segment().starts_with('_')
    }

    /// The forward attribute this name denotes reverse navigation for, i.e.
    /// strip the leading `_` from the local segment. Panics if this name is
    /// not a reverse spelling; callers are expected to check first.
    pub fn forward_of_reverse(&self) -> AttrName {
        debug_assert!(self.is_reverse_spelling());
        let ns_len = self.0.len() - self.local_segment().len();
        let mut s = String::with_capacity(self.0.len() - 1);
        s.push_str(&self.0[..ns_len]);
        s.push_str(&self.local_segment()[1..]);
        AttrName::new(s)
    }

    /// The reverse spelling of this (forward) attribute name, i.e. a leading
    /// `_` prepended to the local segment. Used by recursive reverse joins,
    /// which must re-describe a reverse step as a pattern element to recurse
    /// through `pull_entity` again.
    pub fn reverse_of_forward(&self) -> AttrName {
        debug_assert!(!self.is_reverse_spelling());
        let ns_len = self.0.len() - self.local_segment().len();
        let mut s = String::with_capacity(self.0.len() + 1);
        s.push_str(&self.0[..ns_len]);
        s.push('_');
        s.push_str(self.local_segment());
        AttrName::new(s)
    }
}

impl fmt::Display for AttrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AttrName {
    fn from(s: &str) -> AttrName {
        AttrName::new(s)
    }
}

impl From<String> for AttrName {
    fn from(s: String) -> AttrName {
        AttrName::new(s)
    }
}

/// The reserved pattern element selecting every attribute on an entity.
pub const WILDCARD: &str = "*";

/// The reserved attribute name under which an entity's own identifier is
/// exposed to pull patterns and result maps.
pub const SELF_ID: &str = "db/id";

/// Any datum an attribute may hold, except the absent marker (there is no
/// `Value` variant for "nothing"; omission is represented at the type level,
/// never as a value).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Float(OrderedFloat<f64>),
    Text(String),
    Bool(bool),
    /// A reference to another entity. Whether this is legal in a given slot
    /// depends on the attribute's schema (`is_reference`); dangling targets
    /// are permitted (spec §4.6: dangling-ref is not enforced).
    Eid(EntityId),
    /// An explicit set-valued datum (distinct from the cardinality-many
    /// *container*, which is never itself a `Value`).
    Set(im::Vector<Value>),
    /// An explicit map-valued datum, stored as ordered pairs so it can
    /// implement `Eq`/`Ord`/`Hash`.
    Map(im::Vector<(Value, Value)>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    pub fn float(f: f64) -> Value {
        Value::Float(OrderedFloat(f))
    }

    pub fn as_eid(&self) -> Option<&EntityId> {
        match self {
            Value::Eid(e) => Some(e),
            _ => None,
        }
    }

    /// Looks up `key` in a `Value::Map`, returning `None` for any other
    /// variant or a missing key. Used by `pull` to build result maps and by
    /// callers inspecting its output.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_map_pairs(&self) -> Option<&im::Vector<(Value, Value)>> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&im::Vector<Value>> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<EntityId> for Value {
    fn from(v: EntityId) -> Value {
        Value::Eid(v)
    }
}

/// Discriminant order: variants are ordered by tag first, then payload. This
/// gives every `Value` a total order so it can key `im::OrdMap`/`im::OrdSet`
/// slots without requiring the caller to supply a comparator.
fn variant_rank(v: &Value) -> u8 {
    match v {
        Value::Int(_) => 0,
        Value::Float(_) => 1,
        Value::Text(_) => 2,
        Value::Bool(_) => 3,
        Value::Eid(_) => 4,
        Value::Set(_) => 5,
        Value::Map(_) => 6,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Eid(a), Value::Eid(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.iter().cmp(b.iter()),
            (Value::Map(a), Value::Map(b)) => a.iter().cmp(b.iter()),
            _ => variant_rank(self).cmp(&variant_rank(other)),
        }
    }
}
