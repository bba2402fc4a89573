//! The EAV index: an entity-keyed store of entity maps (spec §3, §4.2).

use crate::schema::Schema;
use crate::value::{AttrName, EntityId, Value};

/// The stored representation of one attribute's value on one entity.
///
/// Cardinality-one values are stored directly; cardinality-many values are
/// always a set of distinct values (spec §3), regardless of the schema's
/// requested container kind — `im::HashSet`/`im::OrdSet` both give set
/// semantics, the container kind only changes iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    One(Value),
    ManyHash(im::HashSet<Value>),
    ManyOrd(im::OrdSet<Value>),
}

impl AttrValue {
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            AttrValue::One(v) => Box::new(std::iter::once(v)),
            AttrValue::ManyHash(s) => Box::new(s.iter()),
            AttrValue::ManyOrd(s) => Box::new(s.iter()),
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        match self {
            AttrValue::One(x) => x == v,
            AttrValue::ManyHash(s) => s.contains(v),
            AttrValue::ManyOrd(s) => s.contains(v),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AttrValue::One(_) => 1,
            AttrValue::ManyHash(s) => s.len(),
            AttrValue::ManyOrd(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `v` into a many-valued `AttrValue`, returning whether this was
    /// a new value (for AVE bookkeeping). Panics if called on a `One`; the
    /// caller is expected to have dispatched on cardinality already.
    fn insert_many(&mut self, v: Value) -> bool {
        match self {
            AttrValue::ManyHash(s) => {
                let was_present = s.contains(&v);
                s.insert(v);
                !was_present
            }
            AttrValue::ManyOrd(s) => {
                let was_present = s.contains(&v);
                s.insert(v);
                !was_present
            }
            AttrValue::One(_) => panic!("insert_many called on cardinality-one AttrValue"),
        }
    }

    /// Removes `v` from a many-valued `AttrValue`, returning whether it was
    /// present.
    fn remove_many(&mut self, v: &Value) -> bool {
        match self {
            AttrValue::ManyHash(s) => s.remove(v).is_some(),
            AttrValue::ManyOrd(s) => s.remove(v).is_some(),
            AttrValue::One(_) => panic!("remove_many called on cardinality-one AttrValue"),
        }
    }
}

/// One entity's complete attribute map, including its own identifier under
/// the reserved `db/id` key (spec §3: "Each entity map includes its own
/// identifier under a reserved key").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMap {
    id: EntityId,
    attrs: im::HashMap<AttrName, AttrValue>,
}

impl EntityMap {
    pub fn new(id: EntityId) -> EntityMap {
        EntityMap {
            id,
            attrs: im::HashMap::new(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn get(&self, attr: &AttrName) -> Option<&AttrValue> {
        self.attrs.get(attr)
    }

    pub fn contains(&self, attr: &AttrName, v: &Value) -> bool {
        self.attrs.get(attr).is_some_and(|av| av.contains(v))
    }

    /// True once every real attribute has been retracted; a bare
    /// self-identifier entry is not enough to keep the entity alive (spec
    /// invariant 7).
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttrName, &AttrValue)> {
        self.attrs.iter()
    }
}

/// The EAV index proper: identifier to entity map. Immutable value type;
/// every mutator returns a new `Eav` sharing structure with its predecessor
/// via `im::HashMap`'s persistent tree (spec §9: "shared-structure persistent
/// maps").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eav {
    entities: im::HashMap<EntityId, EntityMap>,
}

impl Eav {
    pub fn new() -> Eav {
        Eav::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityMap> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &EntityMap)> {
        self.entities.iter()
    }

    /// Installs a map-form assertion directly as the EAV entry for a
    /// not-yet-existing entity (spec §4.7: map-form optimization). `attrs`
    /// must already have passed per-attribute invariant checks.
    pub fn install(&mut self, id: EntityId, attrs: im::HashMap<AttrName, AttrValue>) {
        self.entities.insert(id.clone(), EntityMap { id, attrs });
    }

    /// Overwrites the cardinality-one value of `attr` on `id`, creating the
    /// entity map if needed.
    pub fn set_one(&mut self, id: &EntityId, attr: AttrName, v: Value) {
        let entry = self
            .entities
            .entry(id.clone())
            .or_insert_with(|| EntityMap::new(id.clone()));
        entry.attrs.insert(attr, AttrValue::One(v));
    }

    /// Inserts `v` into the cardinality-many set of `attr` on `id`, creating
    /// both the entity map and the set if needed. Returns whether `v` was
    /// newly added (false if it was already present — spec §8: "asserting an
    /// already-present triple is a no-op").
    pub fn insert_many(
        &mut self,
        id: &EntityId,
        attr: AttrName,
        v: Value,
        schema: &Schema,
    ) -> bool {
        let entry = self
            .entities
            .entry(id.clone())
            .or_insert_with(|| EntityMap::new(id.clone()));
        let ordered = schema.get(&attr).is_some_and(|s| s.container.is_ordered());
        let container = entry.attrs.entry(attr).or_insert_with(|| {
            if ordered {
                AttrValue::ManyOrd(im::OrdSet::new())
            } else {
                AttrValue::ManyHash(im::HashSet::new())
            }
        });
        container.insert_many(v)
    }

    /// Removes `(id, attr, v)`; if `attr` becomes empty the attribute key is
    /// dropped, and if the entity map becomes empty (no attributes left, not
    /// even the self-identifier beyond the struct field) the entity key is
    /// dropped too (spec §4.2, invariant 7). Returns whether the value was
    /// present.
    pub fn remove(&mut self, id: &EntityId, attr: &AttrName, v: &Value) -> bool {
        let Some(entry) = self.entities.get_mut(id) else {
            return false;
        };
        let present = match entry.attrs.get_mut(attr) {
            None => false,
            Some(AttrValue::One(existing)) if existing == v => {
                entry.attrs.remove(attr);
                true
            }
            Some(AttrValue::One(_)) => false,
            Some(container) => {
                let removed = container.remove_many(v);
                if removed && container.is_empty() {
                    entry.attrs.remove(attr);
                }
                removed
            }
        };
        if entry.attrs.is_empty() {
            self.entities.remove(id);
        }
        present
    }

    /// Removes `(id, attr)` entirely regardless of cardinality (used when a
    /// bare `retract` form omits the value — spec §4.7).
    pub fn remove_attr(&mut self, id: &EntityId, attr: &AttrName) {
        if let Some(entry) = self.entities.get_mut(id) {
            entry.attrs.remove(attr);
            if entry.attrs.is_empty() {
                self.entities.remove(id);
            }
        }
    }

    /// Removes the entity outright (entity retraction — spec §4.7).
    pub fn remove_entity(&mut self, id: &EntityId) {
        self.entities.remove(id);
    }

    /// Validates invariant 2: every entity's self-identifier equals the key
    /// it is stored under (used by property tests, not by normal operation —
    /// `EntityMap::id` is always constructed to match).
    pub fn self_id_matches(&self, id: &EntityId) -> bool {
        self.entities.get(id).is_some_and(|e| e.id() == id)
    }
}
