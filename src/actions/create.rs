//! Create and update.

use super::Record;
use crate::context::{Context, ManagedObject};
use crate::error::{CoercionError, ContextError};
use crate::value::Value;
use std::sync::Arc;

impl Context {
    /// Insert a new object of `entity` with declared defaults applied.
    pub fn create(&mut self, entity: &str) -> Result<ManagedObject, ContextError> {
        self.create_with_record(entity, &Record::new())
    }

    /// Insert a new object and populate it from `record`.
    pub fn create_with_record(&mut self, entity: &str, record: &Record) -> Result<ManagedObject, ContextError> {
        self.ensure_confined()?;
        let entity = self.entity(entity)?;
        let mut values = entity.initial_values();
        entity
            .setters()
            .apply_record(&mut values, record, self.date_format())?;

        let id = self.allocate_id();
        self.register_insert(id, entity, values);
        self.snapshot(id)
    }

    /// Apply `record` to an existing object with the same coercion as create.
    pub fn update_with_record(
        &mut self,
        object: &ManagedObject,
        record: &Record,
    ) -> Result<ManagedObject, ContextError> {
        self.ensure_confined()?;
        let date_format = Arc::clone(&self.date_format);
        let slot = self.slot_for_mut(object)?;
        let entity = Arc::clone(&slot.entity);
        let changed = entity
            .setters()
            .apply_record(&mut slot.values, record, &date_format)?;
        self.mark_updated(object.id(), changed);
        self.snapshot(object.id())
    }

    /// Coerce `raw` into the attribute `key` maps to and store it.
    pub fn set_parsed_value(
        &mut self,
        object: &ManagedObject,
        key: &str,
        raw: &serde_json::Value,
    ) -> Result<ManagedObject, ContextError> {
        self.ensure_confined()?;
        let date_format = Arc::clone(&self.date_format);
        let slot = self.slot_for_mut(object)?;
        let entity = Arc::clone(&slot.entity);
        let setter = entity
            .setters()
            .get(key)
            .ok_or_else(|| CoercionError::UnknownAttribute {
                entity: entity.name().to_string(),
                attribute: key.to_string(),
            })?;
        if setter.apply(&mut slot.values, raw, &date_format)? {
            let attribute = setter.attribute().to_string();
            self.mark_updated(object.id(), [attribute]);
        }
        self.snapshot(object.id())
    }

    /// Typed form of [`set_parsed_value`](Self::set_parsed_value).
    pub fn set_value(
        &mut self,
        object: &ManagedObject,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<ManagedObject, ContextError> {
        let raw = value.into().to_json(self.date_format());
        self.set_parsed_value(object, key, &raw)
    }
}
