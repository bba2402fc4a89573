//! The transaction processor (spec §4.4–§4.7): grouping, nested-map
//! expansion, tempid/lookup-ref resolution, validation, and index update.
//!
//! `transact` is the single fallible entry point. On success it returns a
//! `TxReport` carrying both the before- and after-database values, the fully
//! resolved forms that were applied, and the tempid-to-identifier mapping
//! (spec §6). On failure no index change is observable (spec §7: atomic).

mod apply;
mod expand;
mod resolve;

use std::sync::Arc;

use log::debug;

use crate::db::Db;
use crate::error::Result;
use crate::value::{AttrName, EntityId, Value};

/// A temporary, transaction-scoped identifier. Stable only for the life of
/// one `transact` call (spec §3).
pub type TempId = Arc<str>;

/// The identifier slot of a transaction form, before resolution (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxEntity {
    /// An already-assigned integer or a user symbol.
    Id(EntityId),
    /// A placeholder valid only within this transaction.
    TempId(TempId),
    /// An (attribute, value) pair resolved against AVE; the attribute must
    /// carry a uniqueness constraint.
    LookupRef(AttrName, Value),
}

impl TxEntity {
    pub fn temp(name: impl Into<TempId>) -> TxEntity {
        TxEntity::TempId(name.into())
    }

    pub fn id(id: EntityId) -> TxEntity {
        TxEntity::Id(id)
    }

    pub fn lookup(attr: impl Into<AttrName>, value: impl Into<Value>) -> TxEntity {
        TxEntity::LookupRef(attr.into(), value.into())
    }
}

/// A value appearing in a transaction form's value position. Literal data is
/// `Val`; a value in a reference attribute's slot may instead name another
/// entity (`Ref`) or, for map-form assertions only, a nested entity map to be
/// lifted out during expansion (spec §4.5).
#[derive(Debug, Clone)]
pub enum FormValue {
    Val(Value),
    Ref(TxEntity),
    Nested(Box<MapForm>),
}

impl From<Value> for FormValue {
    fn from(v: Value) -> FormValue {
        FormValue::Val(v)
    }
}

impl From<TxEntity> for FormValue {
    fn from(e: TxEntity) -> FormValue {
        FormValue::Ref(e)
    }
}

/// One attribute's value(s) within a map-form assertion.
#[derive(Debug, Clone)]
pub enum AttrValueForm {
    One(FormValue),
    Many(Vec<FormValue>),
}

/// A map-form assertion: attribute-to-value(s) plus an optional explicit
/// self-identifier (spec §6).
#[derive(Debug, Clone, Default)]
pub struct MapForm {
    pub id: Option<TxEntity>,
    pub attrs: Vec<(AttrName, AttrValueForm)>,
}

impl MapForm {
    pub fn new() -> MapForm {
        MapForm::default()
    }

    pub fn with_id(mut self, id: TxEntity) -> MapForm {
        self.id = Some(id);
        self
    }

    pub fn set(mut self, attr: impl Into<AttrName>, value: impl Into<FormValue>) -> MapForm {
        self.attrs.push((attr.into(), AttrValueForm::One(value.into())));
        self
    }

    pub fn set_many(
        mut self,
        attr: impl Into<AttrName>,
        values: impl IntoIterator<Item = FormValue>,
    ) -> MapForm {
        self.attrs
            .push((attr.into(), AttrValueForm::Many(values.into_iter().collect())));
        self
    }
}

/// One transaction form (spec §6): list-form or map-form.
#[derive(Debug, Clone)]
pub enum TxForm {
    Assert(TxEntity, AttrName, FormValue),
    /// A `value` of `None` retracts the current value (cardinality-one) or
    /// every current value (cardinality-many).
    Retract(TxEntity, AttrName, Option<FormValue>),
    RetractEntity(TxEntity),
    AssertMap(MapForm),
}

/// One fully-resolved `(entity, attribute, value)` assertion or retraction,
/// as it was actually applied to the index pair. Returned in
/// `TxReport::processed` (spec §6: "processed-forms").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedForm {
    Assert(EntityId, AttrName, Value),
    Retract(EntityId, AttrName, Value),
    RetractEntity(EntityId),
}

/// The result of a successful `transact` call (spec §6).
pub struct TxReport {
    pub before: Db,
    pub after: Db,
    pub processed: Vec<ResolvedForm>,
    pub tempids: im::HashMap<TempId, EntityId>,
}

/// `transact` (spec §6): applies `forms` to `db`, returning the before/after
/// values and the resolution report, or a fatal diagnostic (spec §7). On
/// error, `db` itself is never mutated — this function only ever reads it and
/// builds a fresh value on success.
pub fn transact(db: &Db, forms: Vec<TxForm>) -> Result<TxReport> {
    debug!("transact: {} raw forms", forms.len());

    // Step 1: group by operation and id kind, expand nested maps (spec §4.5).
    let mut grouped = expand::group_and_expand(forms, db.schema())?;
    debug!(
        "after grouping/expansion: {} retractions, {} list assertions, {} map assertions",
        grouped.retractions.len(),
        grouped.list_asserts.len(),
        grouped.map_asserts.len()
    );

    // Step 2: resolve lookup-refs, then tempids (spec §4.4).
    let resolution = resolve::resolve(&mut grouped, db)?;
    debug!(
        "resolved {} tempids; next_id now {}",
        resolution.tempids.len(),
        resolution.next_id
    );

    // Step 3-5 (validate + apply; spec §4.6, §4.7).
    let (after, processed) = apply::apply(db, grouped, &resolution)?;

    Ok(TxReport {
        before: db.clone(),
        after,
        processed,
        tempids: resolution.tempids,
    })
}
