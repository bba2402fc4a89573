//! The diagnostic taxonomy (spec §7). Every fatal condition the engine can
//! raise is a variant here; there is no local recovery inside the engine,
//! and a transaction either returns a `TxReport` or one of these.

use thiserror::Error;

use crate::value::{AttrName, EntityId, Value};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid entity id in form: {0}")]
    InvalidEntityId(String),

    #[error("{attr} cannot be resolved to an entity id for value {value:?}")]
    RefResolutionError { attr: AttrName, value: Value },

    #[error("nested map under non-component attribute {attr} has no unique-identity attribute")]
    InvalidNestedEntity { attr: AttrName },

    #[error("({entity}, {attr}, {value:?}) is both asserted and retracted in this transaction")]
    AssertionRetractionConflict {
        entity: EntityId,
        attr: AttrName,
        value: Value,
    },

    #[error("{entity} already has a different value for cardinality-one attribute {attr}")]
    CardinalityOneConflict { entity: EntityId, attr: AttrName },

    #[error("{attr} value {value:?} is already held by a different entity")]
    UniqueConflict { attr: AttrName, value: Value },

    #[error("entity {target} is already a component of a different (parent, attribute) pair under {attr}")]
    ComponentConflict { attr: AttrName, target: EntityId },

    #[error("cannot assert on entity {entity}, which is being retracted in this transaction")]
    RetractedEntityConflict { entity: EntityId },

    #[error("invalid lookup-ref: attribute {attr} is not uniqueness-constrained")]
    InvalidLookupRef { attr: AttrName },
}
