//! Validation and index update (spec §4.6, §4.7): resolves every remaining
//! placeholder to a concrete `Value`/`EntityId`, computes the
//! entity-retraction closure and retraction tuple set against the
//! before-snapshot, then applies retractions followed by assertions to a
//! transient draft built from the before-snapshot's EAV/AVE pair.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::ave::Ave;
use crate::db::Db;
use crate::eav::{AttrValue, Eav};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::{AttrName, EntityId, Value};

use super::expand::{Grouped, RetractionForm};
use super::resolve::Resolution;
use super::{AttrValueForm, FormValue, ResolvedForm, TempId, TxEntity};

/// The transient, mutable working copy of one transaction's index pair.
/// Built from the before-snapshot and installed as the after-value only once
/// every validation rule has passed (spec §5: "builder... operates on
/// transient versions of the two indexes").
struct Draft {
    eav: Eav,
    ave: Ave,
}

pub fn apply(
    db: &Db,
    grouped: Grouped,
    resolution: &Resolution,
) -> Result<(Db, Vec<ResolvedForm>)> {
    let schema = db.schema().clone();
    let bindings = &resolution.all_bindings;

    let mut entity_retract_ids = Vec::new();
    let mut attr_retractions: Vec<(EntityId, AttrName, Option<Value>)> = Vec::new();
    for r in grouped.retractions {
        match r {
            RetractionForm::Entity(e) => entity_retract_ids.push(materialize_entity(&e, bindings)?),
            RetractionForm::Attr(e, attr, v) => {
                let eid = materialize_entity(&e, bindings)?;
                let val = match v {
                    Some(fv) => Some(materialize_value(fv, &attr, bindings)?),
                    None => None,
                };
                attr_retractions.push((eid, attr, val));
            }
        }
    }

    let mut list_with_id = Vec::new();
    let mut list_with_placeholder = Vec::new();
    for (e, attr, v) in grouped.list_asserts {
        let is_id = matches!(e, TxEntity::Id(_));
        let eid = materialize_entity(&e, bindings)?;
        let val = materialize_value(v, &attr, bindings)?;
        if is_id {
            list_with_id.push((eid, attr, val));
        } else {
            list_with_placeholder.push((eid, attr, val));
        }
    }

    let mut map_terms = Vec::new();
    for form in grouped.map_asserts {
        let id_spec = form
            .id
            .as_ref()
            .expect("every map-form has an id by the time apply() runs");
        let eid = materialize_entity(id_spec, bindings)?;
        for (attr, value_form) in form.attrs {
            match value_form {
                AttrValueForm::One(fv) => {
                    let val = materialize_value(fv, &attr, bindings)?;
                    map_terms.push((eid.clone(), attr, val));
                }
                AttrValueForm::Many(items) => {
                    for fv in items {
                        let val = materialize_value(fv, &attr, bindings)?;
                        map_terms.push((eid.clone(), attr.clone(), val));
                    }
                }
            }
        }
    }

    debug!(
        "materialized: {} entity retractions, {} attr retractions, {} list(id), {} list(placeholder), {} map terms",
        entity_retract_ids.len(),
        attr_retractions.len(),
        list_with_id.len(),
        list_with_placeholder.len(),
        map_terms.len()
    );

    // Entity-retraction closure, transitively including component
    // descendants, plus the tuples needed to null every incoming reference
    // (spec §4.7 step 1, glossary "Entity-retraction").
    let (closure, null_tuples) = retraction_closure(db, &entity_retract_ids);

    // Attribute-value retraction tuple set, expanding omitted values against
    // the before-snapshot (spec §4.7 step 2).
    let mut retract_tuples = compute_retract_tuples(db, &attr_retractions);
    retract_tuples.extend(null_tuples);

    let all_asserts: Vec<&(EntityId, AttrName, Value)> = list_with_id
        .iter()
        .chain(list_with_placeholder.iter())
        .chain(map_terms.iter())
        .collect();

    let retract_set: HashSet<(EntityId, AttrName, Value)> =
        retract_tuples.iter().cloned().collect();
    for (e, a, v) in all_asserts {
        if retract_set.contains(&(e.clone(), a.clone(), v.clone())) {
            return Err(Error::AssertionRetractionConflict {
                entity: e.clone(),
                attr: a.clone(),
                value: v.clone(),
            });
        }
        if closure.contains(e) {
            return Err(Error::RetractedEntityConflict { entity: e.clone() });
        }
    }

    let mut draft = Draft {
        eav: db.eav().clone(),
        ave: db.ave().clone(),
    };

    apply_entity_retractions(&mut draft, db, &closure);
    apply_tuple_retractions(&mut draft, &schema, &retract_tuples);

    let mut processed = Vec::new();
    for e in entity_retract_ids {
        processed.push(ResolvedForm::RetractEntity(e));
    }
    for (e, a, v) in attr_retractions.into_iter() {
        // Record the retraction as processed regardless of whether it
        // turned out to be a no-op (spec §8: retracting an absent triple is
        // a no-op, but it was still a legitimate, validated form).
        match v {
            Some(val) => processed.push(ResolvedForm::Retract(e, a, val)),
            None => {
                // Value was omitted; report every concrete tuple this
                // omission actually expanded to, against the before-snapshot.
                if let Some(entity_map) = db.eav().get(&e) {
                    if let Some(av) = entity_map.get(&a) {
                        for v in av.values() {
                            processed.push(ResolvedForm::Retract(e.clone(), a.clone(), v.clone()));
                        }
                    }
                }
            }
        }
    }

    let mut first_asserted_this_tx: HashMap<(EntityId, AttrName), Value> = HashMap::new();
    for (e, a, v) in list_with_id
        .into_iter()
        .chain(list_with_placeholder)
        .chain(map_terms)
    {
        apply_one_assertion(
            &mut draft,
            db,
            &schema,
            e,
            a,
            v,
            &mut processed,
            &mut first_asserted_this_tx,
        )?;
    }

    let after = Db {
        schema,
        eav: draft.eav,
        ave: draft.ave,
        next_id: resolution.next_id,
    };

    Ok((after, processed))
}

fn materialize_entity(e: &TxEntity, bindings: &HashMap<TempId, EntityId>) -> Result<EntityId> {
    match e {
        TxEntity::Id(id) => Ok(id.clone()),
        TxEntity::TempId(t) => bindings
            .get(t)
            .cloned()
            .ok_or_else(|| Error::InvalidEntityId(format!("unresolved tempid {t}"))),
        TxEntity::LookupRef(attr, _) => {
            unreachable!("lookup-ref on {attr} should have been resolved to an id already")
        }
    }
}

fn materialize_value(
    v: FormValue,
    attr: &AttrName,
    bindings: &HashMap<TempId, EntityId>,
) -> Result<Value> {
    match v {
        FormValue::Val(val) => Ok(val),
        FormValue::Ref(TxEntity::Id(id)) => Ok(Value::Eid(id)),
        FormValue::Ref(TxEntity::TempId(t)) => match bindings.get(&t) {
            Some(id) => Ok(Value::Eid(id.clone())),
            None => Err(Error::RefResolutionError {
                attr: attr.clone(),
                value: Value::Text(t.to_string()),
            }),
        },
        FormValue::Ref(TxEntity::LookupRef(..)) => {
            unreachable!("lookup-ref value should have been resolved to an id already")
        }
        FormValue::Nested(_) => unreachable!("nested maps were expanded before apply()"),
    }
}

/// Transitively expands a set of explicitly-retracted entities to include
/// every component descendant, and computes the tuples needed to null every
/// incoming reference to a member of the closure (spec §4.7 step 1).
fn retraction_closure(
    before: &Db,
    starts: &[EntityId],
) -> (HashSet<EntityId>, Vec<(EntityId, AttrName, Value)>) {
    let mut closure = HashSet::new();
    let mut queue: VecDeque<EntityId> = starts.iter().cloned().collect();

    while let Some(e) = queue.pop_front() {
        if !closure.insert(e.clone()) {
            continue;
        }
        if let Some(entity_map) = before.eav().get(&e) {
            for (attr, attr_value) in entity_map.iter() {
                if before.schema().is_component(attr) {
                    for v in attr_value.values() {
                        if let Value::Eid(child) = v {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
        }
    }

    let mut null_tuples = Vec::new();
    for e in closure.iter() {
        for (attr, source) in before.ave().reverse_refs_to(e) {
            if closure.contains(&source) {
                continue;
            }
            null_tuples.push((source, attr, Value::Eid(e.clone())));
        }
    }

    (closure, null_tuples)
}

/// Expands explicit `Retract` forms with an omitted value against the
/// before-snapshot (spec §4.7 step 2).
fn compute_retract_tuples(
    before: &Db,
    retractions: &[(EntityId, AttrName, Option<Value>)],
) -> Vec<(EntityId, AttrName, Value)> {
    let mut tuples = Vec::new();
    for (e, attr, v) in retractions {
        match v {
            Some(val) => tuples.push((e.clone(), attr.clone(), val.clone())),
            None => {
                if let Some(entity_map) = before.eav().get(e) {
                    if let Some(attr_value) = entity_map.get(attr) {
                        for v in attr_value.values() {
                            tuples.push((e.clone(), attr.clone(), v.clone()));
                        }
                    }
                }
            }
        }
    }
    tuples
}

fn apply_entity_retractions(draft: &mut Draft, before: &Db, closure: &HashSet<EntityId>) {
    for e in closure {
        if let Some(entity_map) = before.eav().get(e) {
            for (attr, attr_value) in entity_map.iter() {
                if !before.schema().is_indexed(attr) {
                    continue;
                }
                for v in attr_value.values() {
                    if before.schema().is_single_shape(attr) {
                        draft.ave.remove_single(attr, v);
                    } else {
                        draft.ave.remove_multi(attr, v, e);
                    }
                }
            }
        }
        draft.eav.remove_entity(e);
    }
}

fn apply_tuple_retractions(
    draft: &mut Draft,
    schema: &Schema,
    tuples: &[(EntityId, AttrName, Value)],
) {
    for (e, attr, v) in tuples {
        let removed = draft.eav.remove(e, attr, v);
        if removed && schema.is_indexed(attr) {
            if schema.is_single_shape(attr) {
                draft.ave.remove_single(attr, v);
            } else {
                draft.ave.remove_multi(attr, v, e);
            }
        }
    }
}

/// Validates and applies one assertion. Most checks read the *draft's
/// current state*, which already reflects every retraction and every
/// assertion earlier in this same pass — so a single lookup catches both
/// pre-existing conflicts (survivors of the retraction phase) and
/// intra-transaction conflicts introduced by an earlier form, with no
/// separate "seen" bookkeeping required. The cardinality-one-conflict rule
/// is the exception: the draft's carried-over value *is* the pre-transaction
/// value for any attribute this pass hasn't touched yet, so comparing against
/// it would reject every ordinary single-assertion update. That rule instead
/// needs its own per-transaction record of which (entity, attribute) pairs
/// have already been explicitly asserted this pass, in `first_asserted`.
fn apply_one_assertion(
    draft: &mut Draft,
    before: &Db,
    schema: &Schema,
    e: EntityId,
    attr: AttrName,
    value: Value,
    processed: &mut Vec<ResolvedForm>,
    first_asserted: &mut HashMap<(EntityId, AttrName), Value>,
) -> Result<()> {
    if !schema.is_many(&attr) {
        let key = (e.clone(), attr.clone());
        match first_asserted.get(&key) {
            None => {
                first_asserted.insert(key, value.clone());
            }
            Some(prior) if prior != &value => {
                let pre_tx = before
                    .eav()
                    .get(&e)
                    .and_then(|m| m.get(&attr))
                    .and_then(|av| match av {
                        AttrValue::One(v) => Some(v.clone()),
                        _ => None,
                    });
                if pre_tx.as_ref() != Some(&value) {
                    return Err(Error::CardinalityOneConflict { entity: e, attr });
                }
            }
            Some(_) => {}
        }
    }

    if schema.is_unique(&attr) {
        if let Some(existing) = draft.ave.get_single(&attr, &value) {
            if existing != &e {
                return Err(Error::UniqueConflict { attr, value });
            }
        }
    }

    if schema.is_component(&attr) {
        if let Value::Eid(target) = &value {
            if let Some(existing_parent) = draft.ave.get_single(&attr, &value) {
                if existing_parent != &e {
                    return Err(Error::ComponentConflict {
                        attr,
                        target: target.clone(),
                    });
                }
            }
        }
    }

    if schema.is_many(&attr) {
        let newly_added = draft.eav.insert_many(&e, attr.clone(), value.clone(), schema);
        if newly_added && schema.is_indexed(&attr) {
            install_ave(draft, schema, &attr, value.clone(), &e);
        }
    } else {
        if schema.is_indexed(&attr) {
            let old = draft
                .eav
                .get(&e)
                .and_then(|m| m.get(&attr))
                .and_then(|av| match av {
                    AttrValue::One(v) => Some(v.clone()),
                    _ => None,
                });
            if let Some(old) = old {
                if old != value {
                    if schema.is_single_shape(&attr) {
                        draft.ave.remove_single(&attr, &old);
                    } else {
                        draft.ave.remove_multi(&attr, &old, &e);
                    }
                }
            }
        }
        draft.eav.set_one(&e, attr.clone(), value.clone());
        if schema.is_indexed(&attr) {
            install_ave(draft, schema, &attr, value.clone(), &e);
        }
    }

    processed.push(ResolvedForm::Assert(e, attr, value));
    Ok(())
}

fn install_ave(draft: &mut Draft, schema: &Schema, attr: &AttrName, value: Value, e: &EntityId) {
    if schema.is_single_shape(attr) {
        draft.ave.set_single(attr, value, e.clone(), schema);
    } else {
        draft.ave.insert_multi(attr, value, e.clone(), schema);
    }
}
