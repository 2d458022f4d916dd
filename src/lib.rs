//! Stratum: tiered persistence contexts over a disk-backed object store
//!
//! A process owns one [`ContextManager`] per store. The manager runs a writer
//! context bound to the store and a main context above it, each confined to
//! its own serial queue, and hands out temporary leaf contexts whose saves
//! propagate leaf → main → writer → store. Entity actions (create, fetch,
//! update, delete, aggregates) run as jobs on a context's queue.

pub mod actions;
pub mod cli;
pub mod config;
pub mod context;
pub mod date_format;
pub mod error;
pub mod logging;
pub mod query;
pub mod schema;
pub mod store;
pub mod types;
pub mod value;

pub use actions::{FetchRequest, Record, SortDescriptor};
pub use context::{
    Context, ContextHandle, ContextManager, ManagedObject, MergePolicy, SaveHandle, SaveReport,
    SaveSummary, TemporaryContext,
};
pub use error::{ContextError, SaveError, SaveStage};
pub use query::Predicate;
pub use schema::Schema;
pub use store::{ObjectStore, StoreCoordinator};
pub use value::{Attributes, Value};
