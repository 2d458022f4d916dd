//! Delete and truncate.

use crate::context::{Context, ManagedObject};
use crate::error::ContextError;
use tracing::debug;

impl Context {
    /// Remove `object` from this context. Returns false when it was not
    /// registered here. With `and_save`, saves this context only.
    pub fn delete(&mut self, object: &ManagedObject, and_save: bool) -> Result<bool, ContextError> {
        self.ensure_confined()?;
        if object.context() != self.id() {
            // Reuse the foreign-object check and its message.
            self.slot_for(object)?;
        }
        if !self.is_registered(object.id()) {
            return Ok(false);
        }
        self.remove_object(object.entity(), object.id());
        if and_save {
            self.save()?;
        }
        Ok(true)
    }

    /// Remove every object of `entity` visible to this context and return
    /// how many were removed. With `and_save`, saves this context only.
    pub fn truncate_all(&mut self, entity: &str, and_save: bool) -> Result<usize, ContextError> {
        self.ensure_confined()?;
        let description = self.entity(entity)?;
        let ids: Vec<_> = self.visible_records(&description)?.into_keys().collect();
        for id in &ids {
            self.remove_object(description.name(), *id);
        }
        debug!(context = %self.label(), entity, removed = ids.len(), "Truncated entity");
        if and_save {
            self.save()?;
        }
        Ok(ids.len())
    }
}
