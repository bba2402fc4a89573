//! The AVE index: attribute-keyed map of value to entity(ies), with optional
//! ordering (spec §3, §4.3).
//!
//! There is no separate reverse index (spec §9 "Reverse lookups"): the
//! entity-set shape of a reference attribute's AVE slot *is* the reverse
//! lookup table the pull operator reads for reverse navigation.

use crate::schema::{IndexKind, Schema};
use crate::value::{AttrName, EntityId, Value};

/// One attribute's secondary map. The single-entity shape is used for
/// uniqueness-constrained attributes and component reference attributes
/// (spec §4.3: `Schema::is_single_shape`); every other indexed attribute uses
/// the entity-set shape.
#[derive(Debug, Clone)]
pub enum AveSlot {
    SingleHash(im::HashMap<Value, EntityId>),
    SingleOrd(im::OrdMap<Value, EntityId>),
    MultiHash(im::HashMap<Value, im::HashSet<EntityId>>),
    MultiOrd(im::OrdMap<Value, im::HashSet<EntityId>>),
}

impl AveSlot {
    fn new(single: bool, ordered: bool) -> AveSlot {
        match (single, ordered) {
            (true, false) => AveSlot::SingleHash(im::HashMap::new()),
            (true, true) => AveSlot::SingleOrd(im::OrdMap::new()),
            (false, false) => AveSlot::MultiHash(im::HashMap::new()),
            (false, true) => AveSlot::MultiOrd(im::OrdMap::new()),
        }
    }

    /// Look up the single entity bound to `v`, for the single-entity shape.
    pub fn get_single(&self, v: &Value) -> Option<&EntityId> {
        match self {
            AveSlot::SingleHash(m) => m.get(v),
            AveSlot::SingleOrd(m) => m.get(v),
            AveSlot::MultiHash(_) | AveSlot::MultiOrd(_) => None,
        }
    }

    /// Look up the entity set bound to `v`, for the entity-set shape.
    pub fn get_multi(&self, v: &Value) -> Option<&im::HashSet<EntityId>> {
        match self {
            AveSlot::MultiHash(m) => m.get(v),
            AveSlot::MultiOrd(m) => m.get(v),
            AveSlot::SingleHash(_) | AveSlot::SingleOrd(_) => None,
        }
    }

    pub fn is_single_shape(&self) -> bool {
        matches!(self, AveSlot::SingleHash(_) | AveSlot::SingleOrd(_))
    }

    pub fn iter_values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            AveSlot::SingleHash(m) => Box::new(m.keys()),
            AveSlot::SingleOrd(m) => Box::new(m.keys()),
            AveSlot::MultiHash(m) => Box::new(m.keys()),
            AveSlot::MultiOrd(m) => Box::new(m.keys()),
        }
    }

    /// All (value, entity) pairs this slot carries, used by
    /// `find_reverse_refs` and by property tests checking invariant 3.
    pub fn iter_pairs(&self) -> Box<dyn Iterator<Item = (&Value, EntityId)> + '_> {
        match self {
            AveSlot::SingleHash(m) => Box::new(m.iter().map(|(v, e)| (v, e.clone()))),
            AveSlot::SingleOrd(m) => Box::new(m.iter().map(|(v, e)| (v, e.clone()))),
            AveSlot::MultiHash(m) => {
                Box::new(m.iter().flat_map(|(v, es)| es.iter().map(move |e| (v, e.clone()))))
            }
            AveSlot::MultiOrd(m) => {
                Box::new(m.iter().flat_map(|(v, es)| es.iter().map(move |e| (v, e.clone()))))
            }
        }
    }
}

/// The AVE index proper, keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct Ave {
    slots: im::HashMap<AttrName, AveSlot>,
}

impl Ave {
    pub fn new() -> Ave {
        Ave::default()
    }

    pub fn slot(&self, attr: &AttrName) -> Option<&AveSlot> {
        self.slots.get(attr)
    }

    /// Looks up a single-entity-shape binding directly; used by the tempid
    /// resolver and lookup-ref evaluation (spec §4.4).
    pub fn get_single(&self, attr: &AttrName, v: &Value) -> Option<&EntityId> {
        self.slots.get(attr)?.get_single(v)
    }

    pub fn get_multi(&self, attr: &AttrName, v: &Value) -> Option<&im::HashSet<EntityId>> {
        self.slots.get(attr)?.get_multi(v)
    }

    fn slot_mut(&mut self, attr: &AttrName, schema: &Schema) -> &mut AveSlot {
        let single = schema.is_single_shape(attr);
        let ordered = schema
            .get(attr)
            .map(|s| s.index == IndexKind::Ordered || s.index == IndexKind::OrderedRange)
            .unwrap_or(false);
        self.slots
            .entry(attr.clone())
            .or_insert_with(|| AveSlot::new(single, ordered))
    }

    /// Inserts/replaces the single-entity binding `attr[v] = id` (unique
    /// attributes and component references — spec §4.3).
    pub fn set_single(&mut self, attr: &AttrName, v: Value, id: EntityId, schema: &Schema) {
        match self.slot_mut(attr, schema) {
            AveSlot::SingleHash(m) => {
                m.insert(v, id);
            }
            AveSlot::SingleOrd(m) => {
                m.insert(v, id);
            }
            _ => unreachable!("schema marked {attr} single-shape inconsistently"),
        }
    }

    /// Removes the single-entity binding at `(attr, v)`, if present.
    pub fn remove_single(&mut self, attr: &AttrName, v: &Value) {
        if let Some(slot) = self.slots.get_mut(attr) {
            match slot {
                AveSlot::SingleHash(m) => {
                    m.remove(v);
                }
                AveSlot::SingleOrd(m) => {
                    m.remove(v);
                }
                _ => {}
            }
        }
    }

    /// Unions `id` into the entity-set binding at `(attr, v)`.
    pub fn insert_multi(&mut self, attr: &AttrName, v: Value, id: EntityId, schema: &Schema) {
        match self.slot_mut(attr, schema) {
            AveSlot::MultiHash(m) => {
                m.entry(v).or_default().insert(id);
            }
            AveSlot::MultiOrd(m) => {
                m.entry(v).or_default().insert(id);
            }
            _ => unreachable!("schema marked {attr} multi-shape inconsistently"),
        }
    }

    /// Differences `id` out of the entity-set binding at `(attr, v)`; if the
    /// set becomes empty, removes the value entirely (spec §4.3).
    pub fn remove_multi(&mut self, attr: &AttrName, v: &Value, id: &EntityId) {
        let Some(slot) = self.slots.get_mut(attr) else {
            return;
        };
        match slot {
            AveSlot::MultiHash(m) => {
                if let Some(set) = m.get_mut(v) {
                    set.remove(id);
                    if set.is_empty() {
                        m.remove(v);
                    }
                }
            }
            AveSlot::MultiOrd(m) => {
                if let Some(set) = m.get_mut(v) {
                    set.remove(id);
                    if set.is_empty() {
                        m.remove(v);
                    }
                }
            }
            _ => {}
        }
    }

    /// Every `(attr, id)` pair where `id` is the reference value stored
    /// under `attr` pointing at `target` — spec §6's `find_reverse_refs`.
    pub fn reverse_refs_to(&self, target: &EntityId) -> im::HashSet<(AttrName, EntityId)> {
        let target_value = Value::Eid(target.clone());
        let mut out = im::HashSet::new();
        for (attr, slot) in self.slots.iter() {
            match slot {
                AveSlot::SingleHash(m) => {
                    if let Some(e) = m.get(&target_value) {
                        out.insert((attr.clone(), e.clone()));
                    }
                }
                AveSlot::SingleOrd(m) => {
                    if let Some(e) = m.get(&target_value) {
                        out.insert((attr.clone(), e.clone()));
                    }
                }
                AveSlot::MultiHash(m) => {
                    if let Some(es) = m.get(&target_value) {
                        for e in es.iter() {
                            out.insert((attr.clone(), e.clone()));
                        }
                    }
                }
                AveSlot::MultiOrd(m) => {
                    if let Some(es) = m.get(&target_value) {
                        for e in es.iter() {
                            out.insert((attr.clone(), e.clone()));
                        }
                    }
                }
            }
        }
        out
    }
}
