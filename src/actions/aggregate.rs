//! Aggregates. These read the same view as fetches but register nothing.

use crate::context::Context;
use crate::error::ContextError;
use crate::query::Predicate;
use crate::value::Value;

impl Context {
    pub fn count(&self, entity: &str) -> Result<usize, ContextError> {
        self.count_matching(entity, None)
    }

    pub fn count_with_predicate(&self, entity: &str, predicate: &Predicate) -> Result<usize, ContextError> {
        self.count_matching(entity, Some(predicate))
    }

    /// True when some object of `entity` has `key` equal to `value`.
    pub fn exists_for(&self, entity: &str, key: &str, value: impl Into<Value>) -> Result<bool, ContextError> {
        let predicate = Predicate::eq(key, value);
        Ok(self.count_matching(entity, Some(&predicate))? > 0)
    }

    fn count_matching(&self, entity: &str, predicate: Option<&Predicate>) -> Result<usize, ContextError> {
        self.ensure_confined()?;
        let entity = self.entity(entity)?;
        let predicate = self.bind_predicate(&entity, predicate)?;
        Ok(self
            .visible_records(&entity)?
            .values()
            .filter(|attributes| predicate.matches(attributes))
            .count())
    }
}
