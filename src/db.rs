//! The database value type (spec §3, §6): an immutable snapshot of schema,
//! EAV index, AVE index, and the next-assignable identifier counter.

use crate::ave::Ave;
use crate::eav::Eav;
use crate::schema::{AttrProperty, PropertyValue, Schema};
use crate::value::{AttrName, EntityId};

/// One logical database value. Every successful `transact` call produces a
/// new `Db`; the one it was called on is untouched (spec §5).
#[derive(Debug, Clone)]
pub struct Db {
    pub(crate) schema: Schema,
    pub(crate) eav: Eav,
    pub(crate) ave: Ave,
    /// The next integer this database will assign to a fresh entity.
    /// Strictly exceeds every assigned integer identifier that has ever
    /// existed in this database's lineage (spec invariant 8).
    pub(crate) next_id: i64,
}

/// The lowest integer identifier ever handed out. Low integers are left free
/// for callers who want to reserve a small range of well-known ids, mirroring
/// the teacher's practice of bootstrapping a handful of fixed entities before
/// user data begins.
pub const FIRST_ENTITY_ID: i64 = 1;

impl Db {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn eav(&self) -> &Eav {
        &self.eav
    }

    pub fn ave(&self) -> &Ave {
        &self.ave
    }

    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// `check_attr` (spec §6): the compiled value of one schema property for
    /// one attribute, or `None` if the attribute is unknown to the schema.
    pub fn check_attr(&self, attr: &AttrName, prop: AttrProperty) -> Option<PropertyValue> {
        self.schema.property(attr, prop)
    }

    /// `find_reverse_refs` (spec §6): every `(attribute, source-entity)` pair
    /// where `source-entity`'s value for `attribute` is `target`.
    pub fn find_reverse_refs(&self, target: &EntityId) -> im::HashSet<(AttrName, EntityId)> {
        self.ave.reverse_refs_to(target)
    }
}

/// `create` (spec §6): builds a fresh, empty database from a validated
/// schema.
pub fn create(schema: Schema) -> Db {
    Db {
        schema,
        eav: Eav::new(),
        ave: Ave::new(),
        next_id: FIRST_ENTITY_ID,
    }
}
