//! `entigraph`: an in-memory, immutable entity-attribute-value database with
//! a schema-driven secondary index (AVE), a declarative transaction
//! processor, and a hierarchical pull operator.
//!
//! Every successful [`transact`] call returns a new [`Db`] value; the one it
//! was called on is left untouched, so callers may hold past versions by
//! reference (spec §1, §5). There is no persistence, network transport, or
//! query language beyond pull — those are out of scope by design, not by
//! omission.
//!
//! The external surface mirrors spec §6 almost one-to-one:
//!
//! - [`create`] builds an empty database from a validated [`Schema`].
//! - [`transact`] applies a batch of [`tx::TxForm`]s, returning a
//!   [`tx::TxReport`] or a fatal [`Error`].
//! - [`pull`]/[`pull_many`] answer hierarchical queries against one database
//!   value.
//! - [`Db::find_reverse_refs`] and [`Db::check_attr`] round out the
//!   interface for reverse-reference enumeration and schema introspection.

pub mod ave;
pub mod db;
pub mod eav;
pub mod error;
pub mod pull;
pub mod schema;
pub mod tx;
pub mod value;

pub use db::{create, Db};
pub use error::{Error, Result};
pub use pull::{pull, pull_many, JoinSpec, Pattern, PatternElement, PullRef};
pub use schema::{AttrProperty, AttrSchema, Schema};
pub use tx::{transact, TxForm, TxReport};
pub use value::{AttrName, EntityId, Value};

impl Db {
    /// Inherent convenience wrapper around the free function [`transact`]
    /// (spec §6 names `transact(database, forms)`; both spellings are kept,
    /// mirroring the teacher's own inherent `process_tx` alongside its
    /// module-level transaction machinery).
    pub fn transact(&self, forms: Vec<TxForm>) -> Result<TxReport> {
        transact(self, forms)
    }

    pub fn pull(&self, pattern: &Pattern, start: impl Into<PullRef>) -> Value {
        pull(self, pattern, start)
    }

    pub fn pull_many(&self, pattern: &Pattern, ids: &[EntityId]) -> Vec<Value> {
        pull_many(self, pattern, ids)
    }
}
