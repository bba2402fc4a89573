//! The pull operator (spec §4.8): hierarchical, recursive, cycle-safe data
//! retrieval starting from one entity.
//!
//! There is no separate reverse index to consult (spec §9 "Reverse lookups")
//! — reverse navigation reads the forward attribute's AVE slot directly, the
//! same slot the transactor maintains for every indexed attribute.

use im::HashSet as ImHashSet;
use itertools::Itertools;
use log::trace;

use crate::db::Db;
use crate::value::{AttrName, EntityId, Value, SELF_ID};

/// One join's nested selection: either a further pattern to apply
/// non-recursively, or a recursion depth limit (spec §4.8 grammar).
#[derive(Debug, Clone)]
pub enum JoinSpec {
    Pattern(Pattern),
    Recursive(u64),
}

/// One element of a pull pattern (spec §4.8).
#[derive(Debug, Clone)]
pub enum PatternElement {
    /// A plain attribute name, forward or reverse (reverse iff
    /// `AttrName::is_reverse_spelling`). No further descent: a reference
    /// value is wrapped as an identifier-only map (or sequence of them).
    Attr(AttrName),
    /// The reserved wildcard: every attribute present on the entity, plus
    /// recursive component expansion (spec §4.8).
    Wildcard,
    /// A join: an attribute (forward or reverse) paired with a sub-pattern
    /// or a recursion depth.
    Join(AttrName, JoinSpec),
}

/// A complete pull pattern: a list of composable elements (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct Pattern(pub Vec<PatternElement>);

impl Pattern {
    pub fn new(elems: impl IntoIterator<Item = PatternElement>) -> Pattern {
        Pattern(elems.into_iter().collect())
    }

    fn has_wildcard(&self) -> bool {
        self.0.iter().any(|e| matches!(e, PatternElement::Wildcard))
    }

    /// Whether this pattern would, on its own, surface a dangling/absent
    /// target as an identifier-only map rather than eliding it (spec §4.8:
    /// "in wildcard or self-identifier contexts").
    fn surfaces_identifier(&self) -> bool {
        self.has_wildcard()
            || self
                .0
                .iter()
                .any(|e| matches!(e, PatternElement::Attr(a) if a.as_str() == SELF_ID))
    }
}

/// A starting point for `pull`: either an already-known identifier or a
/// lookup-ref to resolve against the current AVE first (spec §4.8: "resolve
/// lookup ref if needed").
#[derive(Debug, Clone)]
pub enum PullRef {
    Id(EntityId),
    Lookup(AttrName, Value),
}

impl From<EntityId> for PullRef {
    fn from(id: EntityId) -> PullRef {
        PullRef::Id(id)
    }
}

fn empty_map() -> Value {
    Value::Map(im::Vector::new())
}

fn identifier_only_map(id: &EntityId) -> Value {
    Value::Map(im::vector![(
        Value::Text(SELF_ID.to_string()),
        Value::Eid(id.clone())
    )])
}

/// `pull` (spec §6, §4.8): evaluates `pattern` against the entity named by
/// `start`, returning a `Value::Map` (or the empty map / identifier-only map
/// per the unresolved-start rules).
pub fn pull(db: &Db, pattern: &Pattern, start: impl Into<PullRef>) -> Value {
    let id = match start.into() {
        PullRef::Id(id) => id,
        PullRef::Lookup(attr, value) => {
            if !db.schema().is_unique(&attr) {
                return empty_map();
            }
            match db.ave().get_single(&attr, &value) {
                Some(id) => id.clone(),
                None => return empty_map(),
            }
        }
    };

    let mut visited = ImHashSet::new();
    visited.insert(id.clone());
    pull_entity(db, pattern, &id, &visited)
}

/// `pull-many` (spec §6): `pull` applied to a sequence of identifiers, in
/// order.
pub fn pull_many(db: &Db, pattern: &Pattern, ids: &[EntityId]) -> Vec<Value> {
    ids.iter().map(|id| pull(db, pattern, id.clone())).collect()
}

/// Evaluates `pattern` against `id`, handling the case where `id` has no EAV
/// entry at all (spec §4.8: "when the starting identifier does not resolve").
/// This same rule governs every nested join target, not just the top-level
/// start, since a reference value may point at a non-existent entity
/// (dangling ref, spec §4.6) at any depth.
fn pull_entity(db: &Db, pattern: &Pattern, id: &EntityId, visited: &ImHashSet<EntityId>) -> Value {
    let Some(entity) = db.eav().get(id) else {
        return if pattern.surfaces_identifier() {
            identifier_only_map(id)
        } else {
            empty_map()
        };
    };

    let mut pairs: Vec<(Value, Value)> = Vec::new();
    let mut seen_keys: ImHashSet<String> = ImHashSet::new();

    for elem in pattern.0.iter() {
        match elem {
            PatternElement::Wildcard => continue,
            PatternElement::Attr(attr) if attr.as_str() == SELF_ID => {
                push_once(&mut pairs, &mut seen_keys, SELF_ID, Value::Eid(id.clone()));
            }
            PatternElement::Attr(attr) if attr.is_reverse_spelling() => {
                let forward = attr.forward_of_reverse();
                let value = reverse_plain(db, &forward, id);
                if let Some(v) = value {
                    push_once(&mut pairs, &mut seen_keys, attr.as_str(), v);
                }
            }
            PatternElement::Attr(attr) => {
                if let Some(v) = forward_plain(db, attr, entity) {
                    push_once(&mut pairs, &mut seen_keys, attr.as_str(), v);
                }
            }
            PatternElement::Join(attr, spec) if attr.is_reverse_spelling() => {
                let forward = attr.forward_of_reverse();
                if let Some(v) = reverse_join(db, &forward, id, spec, visited) {
                    push_once(&mut pairs, &mut seen_keys, attr.as_str(), v);
                }
            }
            PatternElement::Join(attr, spec) => {
                if let Some(v) = forward_join(db, attr, id, entity, spec, visited) {
                    push_once(&mut pairs, &mut seen_keys, attr.as_str(), v);
                }
            }
        }
    }

    if pattern.has_wildcard() {
        wildcard_fill(db, id, entity, visited, &mut pairs, &mut seen_keys);
    }

    Value::Map(pairs.into_iter().collect())
}

fn push_once(
    pairs: &mut Vec<(Value, Value)>,
    seen_keys: &mut ImHashSet<String>,
    key: &str,
    value: Value,
) {
    if seen_keys.insert(key.to_string()).is_none() {
        pairs.push((Value::Text(key.to_string()), value));
    }
}

/// A bare forward attribute name with no join: literal value for
/// non-references, identifier-only wrapping for references (spec §4.8
/// result contract).
fn forward_plain(
    db: &Db,
    attr: &AttrName,
    entity: &crate::eav::EntityMap,
) -> Option<Value> {
    let av = entity.get(attr)?;
    let is_ref = db.schema().is_reference(attr);
    let is_many = db.schema().is_many(attr);
    if !is_ref {
        return Some(if is_many {
            Value::Set(av.values().cloned().collect())
        } else {
            av.values().next().cloned().unwrap()
        });
    }
    if is_many {
        let seq: im::Vector<Value> = av
            .values()
            .filter_map(|v| v.as_eid().map(identifier_only_map))
            .collect();
        Some(Value::Set(seq))
    } else {
        let target = av.values().next()?.as_eid()?;
        Some(identifier_only_map(target))
    }
}

/// A bare reverse attribute name with no join: identifier-only map(s) of
/// every entity whose `forward` attribute points at `id` (spec §4.8).
fn reverse_plain(db: &Db, forward: &AttrName, id: &EntityId) -> Option<Value> {
    let target = Value::Eid(id.clone());
    if db.schema().is_single_shape(forward) {
        let source = db.ave().get_single(forward, &target)?;
        Some(identifier_only_map(source))
    } else {
        let sources = db.ave().get_multi(forward, &target)?;
        if sources.is_empty() {
            return None;
        }
        let seq: im::Vector<Value> = sources.iter().map(identifier_only_map).collect();
        Some(Value::Set(seq))
    }
}

/// A forward join: either a non-recursive sub-pattern applied to each
/// referenced entity, or a recursive chain along the same attribute.
fn forward_join(
    db: &Db,
    attr: &AttrName,
    _id: &EntityId,
    entity: &crate::eav::EntityMap,
    spec: &JoinSpec,
    visited: &ImHashSet<EntityId>,
) -> Option<Value> {
    let av = entity.get(attr)?;
    let is_many = db.schema().is_many(attr);
    let targets: Vec<EntityId> = av.values().filter_map(|v| v.as_eid().cloned()).collect();
    if targets.is_empty() {
        return None;
    }

    match spec {
        JoinSpec::Recursive(depth) => {
            if is_many {
                let seq: im::Vector<Value> = targets
                    .iter()
                    .map(|t| recursive_step(db, attr, *depth, t, visited, Direction::Forward))
                    .collect();
                Some(Value::Set(seq))
            } else {
                Some(recursive_step(
                    db,
                    attr,
                    *depth,
                    &targets[0],
                    visited,
                    Direction::Forward,
                ))
            }
        }
        JoinSpec::Pattern(sub) => {
            if is_many {
                let seq: im::Vector<Value> = targets
                    .iter()
                    .filter_map(|t| pull_join_target(db, sub, t, visited))
                    .collect();
                if seq.is_empty() {
                    None
                } else {
                    Some(Value::Set(seq))
                }
            } else {
                pull_join_target(db, sub, &targets[0], visited)
            }
        }
    }
}

/// A reverse join: a sub-pattern or recursive chain applied to every entity
/// referencing `id` via `forward`.
fn reverse_join(
    db: &Db,
    forward: &AttrName,
    id: &EntityId,
    spec: &JoinSpec,
    visited: &ImHashSet<EntityId>,
) -> Option<Value> {
    let target = Value::Eid(id.clone());
    let single = db.schema().is_single_shape(forward);
    let sources: Vec<EntityId> = if single {
        db.ave().get_single(forward, &target).cloned().into_iter().collect()
    } else {
        db.ave()
            .get_multi(forward, &target)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    };
    if sources.is_empty() {
        return None;
    }

    match spec {
        JoinSpec::Recursive(depth) => {
            if single {
                Some(recursive_step(
                    db,
                    forward,
                    *depth,
                    &sources[0],
                    visited,
                    Direction::Reverse,
                ))
            } else {
                let seq: im::Vector<Value> = sources
                    .iter()
                    .map(|s| recursive_step(db, forward, *depth, s, visited, Direction::Reverse))
                    .collect();
                Some(Value::Set(seq))
            }
        }
        JoinSpec::Pattern(sub) => {
            if single {
                pull_join_target(db, sub, &sources[0], visited)
            } else {
                let seq: im::Vector<Value> = sources
                    .iter()
                    .filter_map(|s| pull_join_target(db, sub, s, visited))
                    .collect();
                if seq.is_empty() {
                    None
                } else {
                    Some(Value::Set(seq))
                }
            }
        }
    }
}

/// Applies a non-recursive sub-pattern to one join target, honoring the
/// dangling-ref elision rule (spec §4.8: "otherwise elided") and extending
/// the visited set so a cycle reachable only through nested joins (not
/// recursion) still terminates pull's own recursive descent.
fn pull_join_target(
    db: &Db,
    sub: &Pattern,
    target: &EntityId,
    visited: &ImHashSet<EntityId>,
) -> Option<Value> {
    if db.eav().get(target).is_none() {
        return if sub.surfaces_identifier() {
            Some(identifier_only_map(target))
        } else {
            None
        };
    }
    let mut next_visited = visited.clone();
    next_visited.insert(target.clone());
    Some(pull_entity(db, sub, target, &next_visited))
}

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Reverse,
}

/// One step of a recursive join (spec §4.8, §9 "Cycles and shared
/// structure"): terminates on a previously-visited identifier, on depth
/// exhaustion, or on a dangling reference, in all three cases yielding an
/// identifier-only map; otherwise descends one more level by re-applying the
/// same single-attribute join with the depth decremented.
fn recursive_step(
    db: &Db,
    attr: &AttrName,
    depth: u64,
    target: &EntityId,
    visited: &ImHashSet<EntityId>,
    direction: Direction,
) -> Value {
    if visited.contains(target) {
        trace!("pull: cycle detected at {target} via {attr}, truncating recursion");
        return identifier_only_map(target);
    }
    if depth == 0 {
        return identifier_only_map(target);
    }
    if db.eav().get(target).is_none() {
        return identifier_only_map(target);
    }
    let mut next_visited = visited.clone();
    next_visited.insert(target.clone());
    let next_spec = JoinSpec::Recursive(depth - 1);
    let singleton = match direction {
        Direction::Forward => Pattern::new([PatternElement::Join(attr.clone(), next_spec)]),
        Direction::Reverse => {
            Pattern::new([PatternElement::Join(attr.reverse_of_forward(), next_spec)])
        }
    };
    pull_entity(db, &singleton, target, &next_visited)
}

/// Fills in every attribute the explicit pattern elements left untouched
/// (spec §4.8: "the wildcard never overwrites an already-accumulated join
/// result"). Component references recurse with a nested wildcard; other
/// references are wrapped as identifier-only maps.
fn wildcard_fill(
    db: &Db,
    id: &EntityId,
    entity: &crate::eav::EntityMap,
    visited: &ImHashSet<EntityId>,
    pairs: &mut Vec<(Value, Value)>,
    seen_keys: &mut ImHashSet<String>,
) {
    push_once(pairs, seen_keys, SELF_ID, Value::Eid(id.clone()));

    let attrs = entity
        .iter()
        .map(|(a, _)| a)
        .sorted_by(|a, b| a.as_str().cmp(b.as_str()));

    for attr in attrs {
        if seen_keys.contains(attr.as_str()) {
            continue;
        }
        let av = entity.get(attr).expect("attr came from entity.iter()");
        let is_ref = db.schema().is_reference(attr);
        let is_component = db.schema().is_component(attr);
        let is_many = db.schema().is_many(attr);

        let value = if !is_ref {
            if is_many {
                Value::Set(av.values().cloned().collect())
            } else {
                av.values().next().cloned().unwrap()
            }
        } else if is_component {
            let wildcard_pattern = Pattern::new([PatternElement::Wildcard]);
            let targets: Vec<EntityId> = av.values().filter_map(|v| v.as_eid().cloned()).collect();
            if is_many {
                let seq: im::Vector<Value> = targets
                    .iter()
                    .map(|t| pull_component(db, &wildcard_pattern, t, visited))
                    .collect();
                Value::Set(seq)
            } else {
                pull_component(db, &wildcard_pattern, &targets[0], visited)
            }
        } else if is_many {
            let seq: im::Vector<Value> = av
                .values()
                .filter_map(|v| v.as_eid().map(identifier_only_map))
                .collect();
            Value::Set(seq)
        } else {
            let target = av
                .values()
                .next()
                .and_then(|v| v.as_eid())
                .expect("reference attribute value must be an Eid");
            identifier_only_map(target)
        };
        push_once(pairs, seen_keys, attr.as_str(), value);
    }
}

/// Recursively pulls a component target with a wildcard pattern (spec
/// §4.8: wildcard's component expansion), cycle-guarded the same as any
/// other recursive descent even though component ownership (invariant 6)
/// makes a true cycle impossible in practice.
fn pull_component(
    db: &Db,
    wildcard: &Pattern,
    target: &EntityId,
    visited: &ImHashSet<EntityId>,
) -> Value {
    if visited.contains(target) {
        return identifier_only_map(target);
    }
    let mut next_visited = visited.clone();
    next_visited.insert(target.clone());
    pull_entity(db, wildcard, target, &next_visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::schema::{AttrSchema, Schema};
    use crate::tx::{transact, FormValue, MapForm, TxEntity, TxForm};

    fn s0() -> Schema {
        Schema::build([
            (
                AttrName::new("email"),
                AttrSchema::default().unique_identity(),
            ),
            (AttrName::new("name"), AttrSchema::default()),
            (
                AttrName::new("best-friend"),
                AttrSchema::default().reference(),
            ),
            (
                AttrName::new("license"),
                AttrSchema::default().component(),
            ),
            (
                AttrName::new("license-number"),
                AttrSchema::default().unique_value(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn wildcard_matches_eav_entry_shape() {
        let db = db::create(s0());
        let report = transact(
            &db,
            vec![TxForm::AssertMap(
                MapForm::new()
                    .with_id(TxEntity::temp("t"))
                    .set("name", Value::text("A")),
            )],
        )
        .unwrap();
        let id = report.tempids.get("t").unwrap().clone();
        let result = pull(&report.after, &Pattern::new([PatternElement::Wildcard]), id.clone());
        assert_eq!(
            result.map_get(&Value::text(SELF_ID)),
            Some(&Value::Eid(id))
        );
        assert_eq!(result.map_get(&Value::text("name")), Some(&Value::text("A")));
    }

    #[test]
    fn component_is_fully_expanded_under_wildcard() {
        let db = db::create(s0());
        let license = MapForm::new().set("license-number", Value::text("L1"));
        let person = MapForm::new()
            .with_id(TxEntity::temp("p"))
            .set("name", Value::text("P"))
            .set(
                "license",
                FormValue::Nested(Box::new(license)),
            );
        let report = transact(&db, vec![TxForm::AssertMap(person)]).unwrap();
        let p = report.tempids.get("p").unwrap().clone();

        let result = pull(&report.after, &Pattern::new([PatternElement::Wildcard]), p);
        let license_val = result.map_get(&Value::text("license")).unwrap();
        assert_eq!(
            license_val.map_get(&Value::text("license-number")),
            Some(&Value::text("L1"))
        );
    }

    #[test]
    fn cyclic_recursive_pull_terminates() {
        let db = db::create(s0());
        let forms = vec![
            TxForm::AssertMap(MapForm::new().with_id(TxEntity::temp("a")).set("name", Value::text("A"))),
            TxForm::AssertMap(MapForm::new().with_id(TxEntity::temp("b")).set("name", Value::text("B"))),
            TxForm::AssertMap(MapForm::new().with_id(TxEntity::temp("c")).set("name", Value::text("C"))),
        ];
        let report = transact(&db, forms).unwrap();
        let a = report.tempids.get("a").unwrap().clone();
        let b = report.tempids.get("b").unwrap().clone();
        let c = report.tempids.get("c").unwrap().clone();

        let edges = vec![
            TxForm::Assert(TxEntity::id(a.clone()), AttrName::new("best-friend"), FormValue::Ref(TxEntity::id(b.clone()))),
            TxForm::Assert(TxEntity::id(b.clone()), AttrName::new("best-friend"), FormValue::Ref(TxEntity::id(c.clone()))),
            TxForm::Assert(TxEntity::id(c.clone()), AttrName::new("best-friend"), FormValue::Ref(TxEntity::id(a.clone()))),
        ];
        let report2 = transact(&report.after, edges).unwrap();

        let pattern = Pattern::new([
            PatternElement::Attr(AttrName::new("name")),
            PatternElement::Join(AttrName::new("best-friend"), JoinSpec::Recursive(3)),
        ]);
        let result = pull(&report2.after, &pattern, a.clone());
        assert_eq!(result.map_get(&Value::text("name")), Some(&Value::text("A")));

        let l1 = result.map_get(&Value::text("best-friend")).unwrap();
        let l2 = l1.map_get(&Value::text("best-friend")).unwrap();
        let l3 = l2.map_get(&Value::text("best-friend")).unwrap();
        assert_eq!(l3.map_get(&Value::text(SELF_ID)), Some(&Value::Eid(a)));
        // no fourth level: the leaf is identifier-only
        assert!(l3.map_get(&Value::text("best-friend")).is_none());
    }

    #[test]
    fn pull_is_idempotent() {
        let db = db::create(s0());
        let report = transact(
            &db,
            vec![TxForm::AssertMap(
                MapForm::new().with_id(TxEntity::temp("t")).set("name", Value::text("A")),
            )],
        )
        .unwrap();
        let id = report.tempids.get("t").unwrap().clone();
        let pattern = Pattern::new([PatternElement::Wildcard]);
        let r1 = pull(&report.after, &pattern, id.clone());
        let r2 = pull(&report.after, &pattern, id);
        assert_eq!(r1, r2);
    }

    #[test]
    fn unresolved_start_without_wildcard_is_empty_map() {
        let db = db::create(s0());
        let pattern = Pattern::new([PatternElement::Attr(AttrName::new("name"))]);
        let result = pull(&db, &pattern, EntityId::Id(999));
        assert_eq!(result, empty_map());
    }

    #[test]
    fn unresolved_start_with_wildcard_is_identifier_only() {
        let db = db::create(s0());
        let pattern = Pattern::new([PatternElement::Wildcard]);
        let result = pull(&db, &pattern, EntityId::Id(999));
        assert_eq!(result, identifier_only_map(&EntityId::Id(999)));
    }
}
