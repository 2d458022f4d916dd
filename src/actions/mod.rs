//! Entity Actions
//!
//! Generic create, fetch, update, delete and aggregate operations over any
//! context. They are inherent methods on [`Context`](crate::context::Context)
//! and therefore run inside a job on that context's queue:
//!
//! ```ignore
//! let people = handle
//!     .perform(|cx| cx.fetch_all_sorted("Person", "name", true, 10))
//!     .await??;
//! ```
//!
//! Actions never hop queues and never propagate saves; `and_save` flags save
//! the one context they run on.

mod aggregate;
mod create;
mod delete;
mod fetch;

use crate::query::Predicate;

/// Untyped attribute map, as decoded from JSON. Values are coerced to the
/// declared attribute types; unknown keys are ignored.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn new(key: impl Into<String>, ascending: bool) -> Self {
        Self {
            key: key.into(),
            ascending,
        }
    }
}

/// Description of a fetch: entity, optional predicate, sort order, limit.
///
/// Without sort descriptors results come in identifier order.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    entity: String,
    predicate: Option<Predicate>,
    sort: Vec<SortDescriptor>,
    limit: Option<usize>,
}

impl FetchRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Append a sort key; earlier keys take precedence.
    pub fn sorted_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor::new(key, ascending));
        self
    }

    /// Cap the number of results. Zero means no limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn sort(&self) -> &[SortDescriptor] {
        &self.sort
    }

    pub fn fetch_limit(&self) -> Option<usize> {
        self.limit
    }
}
