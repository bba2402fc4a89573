//! Value model and schema encoding (spec §4.1).
//!
//! A `Schema` is validated once, at database creation, and is immutable
//! thereafter (spec §3). Validation failures are fatal and produce no
//! database (spec §7: `invalid-schema`). After validation the schema is
//! compiled into the lookup sets the transactor and pull operator consult on
//! every operation, so that "is this attribute a component reference" is an
//! `im::HashSet` membership test rather than a match on raw schema data.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{AttrName, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::One
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unique {
    None,
    Identity,
    Value,
}

impl Default for Unique {
    fn default() -> Self {
        Unique::None
    }
}

impl Unique {
    pub fn is_unique(self) -> bool {
        !matches!(self, Unique::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    Hash,
    Ordered,
    OrderedRange,
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::None
    }
}

impl IndexKind {
    pub fn is_ordered(self) -> bool {
        matches!(self, IndexKind::Ordered | IndexKind::OrderedRange)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Unordered,
    Ordered,
    OrderedRange,
}

impl Default for ContainerKind {
    fn default() -> Self {
        ContainerKind::Unordered
    }
}

impl ContainerKind {
    pub fn is_ordered(self) -> bool {
        matches!(self, ContainerKind::Ordered | ContainerKind::OrderedRange)
    }
}

/// A value comparator, used only when an attribute requests an ordered
/// container or index and the caller wants something other than `Value`'s
/// natural order. When absent, natural order is used — see DESIGN.md's
/// resolution of the "legal comparator" open question.
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

#[derive(Clone)]
pub struct AttrSchema {
    pub cardinality: Cardinality,
    pub is_reference: bool,
    pub is_component: bool,
    pub unique: Unique,
    pub index: IndexKind,
    pub index_comparator: Option<Comparator>,
    pub container: ContainerKind,
    pub container_comparator: Option<Comparator>,
}

impl fmt::Debug for AttrSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrSchema")
            .field("cardinality", &self.cardinality)
            .field("is_reference", &self.is_reference)
            .field("is_component", &self.is_component)
            .field("unique", &self.unique)
            .field("index", &self.index)
            .field("container", &self.container)
            .finish()
    }
}

impl Default for AttrSchema {
    fn default() -> Self {
        AttrSchema {
            cardinality: Cardinality::default(),
            is_reference: false,
            is_component: false,
            unique: Unique::default(),
            index: IndexKind::default(),
            index_comparator: None,
            container: ContainerKind::default(),
            container_comparator: None,
        }
    }
}

impl AttrSchema {
    pub fn many(mut self) -> Self {
        self.cardinality = Cardinality::Many;
        self
    }

    pub fn reference(mut self) -> Self {
        self.is_reference = true;
        self
    }

    pub fn component(mut self) -> Self {
        self.is_component = true;
        self.is_reference = true;
        self
    }

    pub fn unique_identity(mut self) -> Self {
        self.unique = Unique::Identity;
        self
    }

    pub fn unique_value(mut self) -> Self {
        self.unique = Unique::Value;
        self
    }

    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index = kind;
        self
    }

    pub fn container(mut self, kind: ContainerKind) -> Self {
        self.container = kind;
        self
    }
}

/// A property of a compiled attribute, as surfaced by `check_attr` (spec
/// §6). Each variant mirrors one field of `AttrSchema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrProperty {
    Cardinality,
    IsReference,
    IsComponent,
    Unique,
    Index,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Cardinality(Cardinality),
    Bool(bool),
    Unique(Unique),
    Index(IndexKind),
    Container(ContainerKind),
}

/// The immutable, compiled schema. Construction validates every rule in
/// spec §4.1; the compiled sets below let the rest of the engine answer
/// "is `a` a component reference attribute" etc. in O(1) instead of walking
/// the raw attribute map.
#[derive(Clone)]
pub struct Schema {
    attrs: im::HashMap<AttrName, AttrSchema>,
    many_attrs: im::HashSet<AttrName>,
    ref_attrs: im::HashSet<AttrName>,
    component_attrs: im::HashSet<AttrName>,
    unique_identity_attrs: im::HashSet<AttrName>,
    unique_value_attrs: im::HashSet<AttrName>,
    /// Attributes that are reference-typed, uniqueness-constrained, or
    /// explicitly indexed — i.e. attributes present in AVE (spec §3).
    indexed_attrs: im::HashSet<AttrName>,
}

impl Schema {
    /// Validates and compiles a raw attribute map into a `Schema`. This is
    /// the only fallible entry point into schema construction (spec §7:
    /// `invalid-schema` is fatal and produces no database).
    pub fn build(defs: impl IntoIterator<Item = (AttrName, AttrSchema)>) -> Result<Schema> {
        let mut attrs = im::HashMap::new();
        for (name, spec) in defs {
            if name.is_reverse_spelling() {
                return Err(Error::InvalidSchema(format!(
                    "attribute name {name} uses the reserved reverse-navigation namespace"
                )));
            }
            if spec.unique.is_unique() && spec.cardinality != Cardinality::One {
                return Err(Error::InvalidSchema(format!(
                    "{name}: a unique attribute must be cardinality-one"
                )));
            }
            if spec.is_component && !spec.is_reference {
                return Err(Error::InvalidSchema(format!(
                    "{name}: a component attribute must be a reference"
                )));
            }
            if spec.container.is_ordered() && spec.is_reference {
                return Err(Error::InvalidSchema(format!(
                    "{name}: ordered many-value containers are forbidden for reference attributes"
                )));
            }
            attrs.insert(name, spec);
        }

        let mut many_attrs = im::HashSet::new();
        let mut ref_attrs = im::HashSet::new();
        let mut component_attrs = im::HashSet::new();
        let mut unique_identity_attrs = im::HashSet::new();
        let mut unique_value_attrs = im::HashSet::new();
        let mut indexed_attrs = im::HashSet::new();

        for (name, spec) in attrs.iter() {
            if spec.cardinality == Cardinality::Many {
                many_attrs.insert(name.clone());
            }
            if spec.is_reference {
                ref_attrs.insert(name.clone());
                indexed_attrs.insert(name.clone());
            }
            if spec.is_component {
                component_attrs.insert(name.clone());
            }
            match spec.unique {
                Unique::Identity => {
                    unique_identity_attrs.insert(name.clone());
                    indexed_attrs.insert(name.clone());
                }
                Unique::Value => {
                    unique_value_attrs.insert(name.clone());
                    indexed_attrs.insert(name.clone());
                }
                Unique::None => {}
            }
            if spec.index != IndexKind::None {
                indexed_attrs.insert(name.clone());
            }
        }

        Ok(Schema {
            attrs,
            many_attrs,
            ref_attrs,
            component_attrs,
            unique_identity_attrs,
            unique_value_attrs,
            indexed_attrs,
        })
    }

    pub fn get(&self, attr: &AttrName) -> Option<&AttrSchema> {
        self.attrs.get(attr)
    }

    pub fn is_many(&self, attr: &AttrName) -> bool {
        self.many_attrs.contains(attr)
    }

    pub fn is_reference(&self, attr: &AttrName) -> bool {
        self.ref_attrs.contains(attr)
    }

    pub fn is_component(&self, attr: &AttrName) -> bool {
        self.component_attrs.contains(attr)
    }

    pub fn is_unique_identity(&self, attr: &AttrName) -> bool {
        self.unique_identity_attrs.contains(attr)
    }

    pub fn is_unique_value(&self, attr: &AttrName) -> bool {
        self.unique_value_attrs.contains(attr)
    }

    pub fn is_unique(&self, attr: &AttrName) -> bool {
        self.is_unique_identity(attr) || self.is_unique_value(attr)
    }

    pub fn is_indexed(&self, attr: &AttrName) -> bool {
        self.indexed_attrs.contains(attr)
    }

    /// Every reference attribute whose AVE slot uses the single-entity shape
    /// (unique attributes and component reference attributes — spec §3/§4.3).
    pub fn is_single_shape(&self, attr: &AttrName) -> bool {
        self.is_unique(attr) || self.is_component(attr)
    }

    pub fn reference_attrs(&self) -> impl Iterator<Item = &AttrName> {
        self.ref_attrs.iter()
    }

    pub fn indexed_attrs(&self) -> impl Iterator<Item = &AttrName> {
        self.indexed_attrs.iter()
    }

    pub fn property(&self, attr: &AttrName, prop: AttrProperty) -> Option<PropertyValue> {
        let spec = self.attrs.get(attr)?;
        Some(match prop {
            AttrProperty::Cardinality => PropertyValue::Cardinality(spec.cardinality),
            AttrProperty::IsReference => PropertyValue::Bool(spec.is_reference),
            AttrProperty::IsComponent => PropertyValue::Bool(spec.is_component),
            AttrProperty::Unique => PropertyValue::Unique(spec.unique),
            AttrProperty::Index => PropertyValue::Index(spec.index),
            AttrProperty::Container => PropertyValue::Container(spec.container),
        })
    }
}
