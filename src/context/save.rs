//! Local commit: validate pending changes and push them one level up.

use super::{Context, MergePolicy, ParentLink, Slot};
use crate::error::ContextError;
use crate::store::{ChangeSet, RecordUpdate, StoredRecord};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counts of changes pushed by one `save()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveSummary {
    fn of(changes: &ChangeSet) -> Self {
        Self {
            inserted: changes.inserted.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl Context {
    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }

    /// Validate pending changes and push them into the parent (the store for
    /// the writer). On success pending changes are cleared; on failure
    /// nothing reached the parent and they are kept.
    pub fn save(&mut self) -> Result<SaveSummary, ContextError> {
        self.ensure_confined()?;
        if !self.has_changes() {
            return Ok(SaveSummary::default());
        }
        self.validate()?;

        let changes = self.collect_changes();
        let summary = SaveSummary::of(&changes);
        match &self.parent {
            ParentLink::Store(coordinator) => {
                coordinator.commit(&changes)?;
            }
            ParentLink::Context { .. } => {
                let parent = self.parent_handle()?;
                parent.perform_and_wait(move |p| p.absorb(changes))??;
            }
        }
        self.clear_pending();

        debug!(
            context = %self.label,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "Saved context"
        );
        Ok(summary)
    }

    /// Make buffered store writes durable. Only valid on the writer.
    pub(crate) fn flush_store(&self) -> Result<(), ContextError> {
        match &self.parent {
            ParentLink::Store(coordinator) => coordinator.flush(),
            ParentLink::Context { .. } => Err(ContextError::ContractViolation(format!(
                "{} is not bound to the store",
                self.label
            ))),
        }
    }

    fn validate(&self) -> Result<(), ContextError> {
        let pending = self.inserted.iter().chain(self.updated.keys());
        for id in pending {
            let Some(slot) = self.registered.get(id) else {
                continue;
            };
            let missing = slot
                .entity
                .attributes()
                .iter()
                .filter(|a| a.required)
                .find(|a| slot.values.get(&a.name).map_or(true, Value::is_null));
            if let Some(attribute) = missing {
                return Err(ContextError::Validation {
                    entity: slot.entity.name().to_string(),
                    object: *id,
                    attribute: attribute.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn collect_changes(&self) -> ChangeSet {
        let inserted = self
            .inserted
            .iter()
            .filter_map(|id| {
                self.registered.get(id).map(|slot| StoredRecord {
                    id: *id,
                    entity: slot.entity.name().to_string(),
                    attributes: slot.values.clone(),
                })
            })
            .collect();

        let updated = self
            .updated
            .iter()
            .filter_map(|(id, keys)| {
                let slot = self.registered.get(id)?;
                let changes = keys
                    .iter()
                    .map(|k| (k.clone(), slot.values.get(k).cloned().unwrap_or(Value::Null)))
                    .collect();
                Some(RecordUpdate {
                    id: *id,
                    entity: slot.entity.name().to_string(),
                    changes,
                })
            })
            .collect();

        let deleted = self
            .deleted
            .iter()
            .map(|(id, entity)| (entity.clone(), *id))
            .collect();

        ChangeSet {
            inserted,
            updated,
            deleted,
        }
    }

    fn clear_pending(&mut self) {
        let pushed = self.inserted.iter().chain(self.updated.keys());
        for id in pushed {
            if let Some(slot) = self.registered.get_mut(id) {
                slot.snapshot = slot.values.clone();
            }
        }
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }

    /// Apply a child's pushed changes as this context's own pending changes.
    pub(crate) fn absorb(&mut self, changes: ChangeSet) -> Result<(), ContextError> {
        self.ensure_confined()?;
        let policy = self.merge_policy;

        for record in changes.inserted {
            let entity = self.entity(&record.entity)?;
            self.updated.remove(&record.id);
            self.register_insert(record.id, entity, record.attributes);
        }

        for update in changes.updated {
            let entity = self.entity(&update.entity)?;
            if self.deleted.contains_key(&update.id) {
                if policy == MergePolicy::ExternalTrump {
                    warn!(
                        context = %self.label,
                        object = %update.id,
                        "Dropping update for object deleted in parent"
                    );
                    continue;
                }
                self.deleted.remove(&update.id);
            }

            if !self.registered.contains_key(&update.id) {
                match self.parent_record(&entity, update.id)? {
                    Some(base) => {
                        self.registered.insert(
                            update.id,
                            Slot {
                                entity: Arc::clone(&entity),
                                values: base.clone(),
                                snapshot: base,
                            },
                        );
                    }
                    None if policy == MergePolicy::InMemoryTrump => {
                        let mut values = entity.initial_values();
                        values.extend(update.changes);
                        self.register_insert(update.id, entity, values);
                        continue;
                    }
                    None => {
                        warn!(
                            context = %self.label,
                            object = %update.id,
                            "Dropping update for object missing from parent chain"
                        );
                        continue;
                    }
                }
            }

            let slot = self
                .registered
                .get_mut(&update.id)
                .ok_or(ContextError::UnknownObject(update.id))?;
            let keys: Vec<String> = update.changes.keys().cloned().collect();
            slot.values.extend(update.changes);
            self.mark_updated(update.id, keys);
        }

        for (entity, id) in changes.deleted {
            self.remove_object(&entity, id);
        }
        Ok(())
    }
}
