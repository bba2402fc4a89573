//! Tempid and lookup-ref resolution (spec §4.4).
//!
//! Grounded in the upsert-resolution algorithm sketched (but left as
//! commented-out dead code) in the pack's mentat example; this is a
//! from-scratch completion tailored to this spec's exact ordering rules
//! rather than a port of that generation-evolution machinery, since the
//! retrieved snapshot never finished it (see DESIGN.md).

use std::collections::HashMap;

use log::trace;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::value::{AttrName, EntityId, Value};

use super::expand::{Grouped, RetractionForm};
use super::{AttrValueForm, FormValue, TempId, TxEntity};

pub struct Resolution {
    /// Every tempid that was actually bound, including internally
    /// synthesized ones from anonymous map-forms and lifted nested maps.
    pub all_bindings: HashMap<TempId, EntityId>,
    /// The subset callers see in `TxReport::tempids` — synthesized
    /// placeholders are an implementation detail, not something a caller
    /// ever named.
    pub tempids: im::HashMap<TempId, EntityId>,
    pub next_id: i64,
}

/// Resolves every lookup-ref and tempid appearing anywhere in `grouped`
/// (mutating it in place to assign synthetic ids to anonymous map-forms),
/// returning the full binding table used by `apply` to materialize final
/// `(EntityId, AttrName, Value)` forms.
pub fn resolve(grouped: &mut Grouped, db: &Db) -> Result<Resolution> {
    // Step 1 (spec §4.4): resolve every lookup-ref against the *current*
    // AVE, wherever it appears (identifier slots and reference-value slots).
    resolve_lookup_refs_in_place(grouped, db)?;

    // Give every identifier-less map-form a synthetic tempid so it
    // participates in the same walk as named placeholders (spec §4.4 step
    // 4, folded into step 2's walk).
    let mut gensym = 0u64;
    for form in grouped.map_asserts.iter_mut() {
        if form.id.is_none() {
            gensym += 1;
            form.id = Some(TxEntity::TempId(format!("__anon_{gensym}").into()));
        }
    }

    let mut binder = Binder {
        db,
        working_ave: HashMap::new(),
        bound: HashMap::new(),
        next_id: db.next_id(),
    };

    // Step 2 + 4: walk retractions, then list-form assertions, then
    // map-form assertions, binding every placeholder-with-unique-pair as it
    // is encountered.
    for r in grouped.retractions.iter() {
        if let RetractionForm::Attr(TxEntity::TempId(t), attr, Some(FormValue::Val(v))) = r {
            if db.schema().is_unique_identity(attr) {
                binder.bind_pair(t, attr, v)?;
            }
        }
    }
    for (e, attr, v) in grouped.list_asserts.iter() {
        if let (TxEntity::TempId(t), FormValue::Val(v)) = (e, v) {
            if db.schema().is_unique_identity(attr) {
                binder.bind_pair(t, attr, v)?;
            }
        }
    }
    for form in grouped.map_asserts.iter() {
        let Some(TxEntity::TempId(t)) = &form.id else {
            continue;
        };
        for (attr, value_form) in form.attrs.iter() {
            if !db.schema().is_unique_identity(attr) {
                continue;
            }
            if let AttrValueForm::One(FormValue::Val(v)) = value_form {
                binder.bind_pair(t, attr, v)?;
            }
        }
    }

    // Step 3: any placeholder appearing as a *subject* that is still
    // unbound (no unique-identity attribute was present) gets a fresh id.
    for r in grouped.retractions.iter() {
        let subject = match r {
            RetractionForm::Attr(e, ..) => e,
            RetractionForm::Entity(e) => e,
        };
        if let TxEntity::TempId(t) = subject {
            binder.bound.entry(t.clone()).or_insert_with(|| {
                let id = EntityId::Id(binder_next(&mut binder.next_id));
                trace!("tempid {t} assigned fresh id {id}");
                id
            });
        }
    }
    for (e, _, _) in grouped.list_asserts.iter() {
        if let TxEntity::TempId(t) = e {
            binder.bound.entry(t.clone()).or_insert_with(|| {
                EntityId::Id(binder_next(&mut binder.next_id))
            });
        }
    }
    for form in grouped.map_asserts.iter() {
        if let Some(TxEntity::TempId(t)) = &form.id {
            binder.bound.entry(t.clone()).or_insert_with(|| {
                EntityId::Id(binder_next(&mut binder.next_id))
            });
        }
    }

    let all_bindings = binder.bound;
    let tempids = all_bindings
        .iter()
        .filter(|(t, _)| !t.starts_with("__anon_") && !t.starts_with("__nested_"))
        .map(|(t, id)| (t.clone(), id.clone()))
        .collect();

    Ok(Resolution {
        all_bindings,
        tempids,
        next_id: binder.next_id,
    })
}

fn binder_next(next_id: &mut i64) -> i64 {
    let id = *next_id;
    *next_id += 1;
    id
}

struct Binder<'a> {
    db: &'a Db,
    working_ave: HashMap<(AttrName, Value), EntityId>,
    bound: HashMap<TempId, EntityId>,
    next_id: i64,
}

impl<'a> Binder<'a> {
    fn alloc(&mut self) -> EntityId {
        EntityId::Id(binder_next(&mut self.next_id))
    }

    /// Resolves one (placeholder, unique-identity attribute, value)
    /// occurrence (spec §4.4 step 2 tie-break rules).
    fn bind_pair(&mut self, temp: &TempId, attr: &AttrName, value: &Value) -> Result<()> {
        let found = self
            .db
            .ave()
            .get_single(attr, value)
            .cloned()
            .or_else(|| self.working_ave.get(&(attr.clone(), value.clone())).cloned());

        match (self.bound.get(temp).cloned(), found) {
            (Some(bound), Some(found)) => {
                if bound != found {
                    return Err(Error::UniqueConflict {
                        attr: attr.clone(),
                        value: value.clone(),
                    });
                }
            }
            (Some(bound), None) => {
                self.working_ave.insert((attr.clone(), value.clone()), bound);
            }
            (None, Some(found)) => {
                self.bound.insert(temp.clone(), found);
            }
            (None, None) => {
                let fresh = self.alloc();
                self.bound.insert(temp.clone(), fresh.clone());
                self.working_ave.insert((attr.clone(), value.clone()), fresh);
            }
        }
        Ok(())
    }
}

fn resolve_lookup_ref(entity: TxEntity, db: &Db) -> Result<TxEntity> {
    match entity {
        TxEntity::LookupRef(attr, value) => {
            if !db.schema().is_unique(&attr) {
                return Err(Error::InvalidLookupRef { attr });
            }
            match db.ave().get_single(&attr, &value) {
                Some(id) => Ok(TxEntity::Id(id.clone())),
                None => Err(Error::InvalidLookupRef { attr }),
            }
        }
        other => Ok(other),
    }
}

fn resolve_lookup_ref_in_value(value: FormValue, db: &Db) -> Result<FormValue> {
    match value {
        FormValue::Ref(e) => Ok(FormValue::Ref(resolve_lookup_ref(e, db)?)),
        other => Ok(other),
    }
}

fn resolve_lookup_refs_in_place(grouped: &mut Grouped, db: &Db) -> Result<()> {
    for r in grouped.retractions.iter_mut() {
        match r {
            RetractionForm::Attr(e, _, v) => {
                *e = resolve_lookup_ref(e.clone(), db)?;
                if let Some(val) = v.take() {
                    *v = Some(resolve_lookup_ref_in_value(val, db)?);
                }
            }
            RetractionForm::Entity(e) => {
                *e = resolve_lookup_ref(e.clone(), db)?;
            }
        }
    }
    for (e, _, v) in grouped.list_asserts.iter_mut() {
        *e = resolve_lookup_ref(e.clone(), db)?;
        let taken = std::mem::replace(v, FormValue::Val(Value::Bool(false)));
        *v = resolve_lookup_ref_in_value(taken, db)?;
    }
    for form in grouped.map_asserts.iter_mut() {
        if let Some(id) = form.id.take() {
            form.id = Some(resolve_lookup_ref(id, db)?);
        }
        for (_, value_form) in form.attrs.iter_mut() {
            match value_form {
                AttrValueForm::One(v) => {
                    let taken = std::mem::replace(v, FormValue::Val(Value::Bool(false)));
                    *v = resolve_lookup_ref_in_value(taken, db)?;
                }
                AttrValueForm::Many(items) => {
                    for v in items.iter_mut() {
                        let taken = std::mem::replace(v, FormValue::Val(Value::Bool(false)));
                        *v = resolve_lookup_ref_in_value(taken, db)?;
                    }
                }
            }
        }
    }
    Ok(())
}
