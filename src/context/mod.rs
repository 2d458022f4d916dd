//! Persistence Contexts
//!
//! A [`Context`] is a unit of work: the objects registered in it, plus the
//! pending inserts, updates and deletes not yet pushed to its parent. A
//! context is owned by its confinement queue; code reaches it only through
//! jobs submitted via a [`ContextHandle`], so its state is never shared
//! between threads.
//!
//! Contexts form a fixed three-level hierarchy managed by
//! [`ContextManager`]: writer (bound to the store coordinator), main (child of
//! writer) and temporary leaves (children of main). Reads fall through the
//! parent chain; saves push pending changes one level up.

pub mod handle;
pub mod manager;
pub mod queue;
mod save;

pub use handle::ContextHandle;
pub use manager::{ContextManager, SaveHandle, SaveReport, TemporaryContext};
pub use save::SaveSummary;

use crate::date_format::DateFormat;
use crate::error::ContextError;
use crate::schema::{EntityDescription, Schema};
use crate::store::{IdAllocator, StoreCoordinator};
use crate::types::{ContextId, ContextRole, ObjectId, QueueId};
use crate::value::{Attributes, Value};
use chrono::{DateTime, Utc};
use manager::Hierarchy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use tracing::warn;

/// How a context resolves a property it changed locally when the parent's
/// value for that property changed too. Resolution is per property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// The parent (external) value wins.
    #[default]
    ExternalTrump,
    /// The local, in-memory value wins.
    InMemoryTrump,
}

/// Snapshot of an object registered in one context.
///
/// Carries the persisted identity, which is shared by every instance of the
/// same record across contexts, and the id of the owning context. Mutations
/// go through the owning context's entity actions.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedObject {
    id: ObjectId,
    entity: Arc<str>,
    context: ContextId,
    values: Attributes,
}

impl ManagedObject {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Context this instance is bound to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn values(&self) -> &Attributes {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(Value::as_date)
    }
}

pub(crate) struct Slot {
    pub(crate) entity: Arc<EntityDescription>,
    pub(crate) values: Attributes,
    /// Parent's values as of the last load or push; the merge baseline.
    pub(crate) snapshot: Attributes,
}

pub(crate) enum ParentLink {
    Store(Arc<StoreCoordinator>),
    /// Non-owning reference to a parent context, resolved through the manager.
    Context {
        id: ContextId,
        hierarchy: Weak<Hierarchy>,
    },
}

pub(crate) struct ContextSetup {
    pub(crate) role: ContextRole,
    pub(crate) label: Arc<str>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) date_format: Arc<DateFormat>,
    pub(crate) merge_policy: MergePolicy,
    pub(crate) ids: Arc<IdAllocator>,
    pub(crate) parent: ParentLink,
}

pub struct Context {
    id: ContextId,
    role: ContextRole,
    queue: QueueId,
    label: Arc<str>,
    schema: Arc<Schema>,
    pub(crate) date_format: Arc<DateFormat>,
    merge_policy: MergePolicy,
    ids: Arc<IdAllocator>,
    parent: ParentLink,
    registered: BTreeMap<ObjectId, Slot>,
    inserted: BTreeSet<ObjectId>,
    updated: BTreeMap<ObjectId, BTreeSet<String>>,
    deleted: BTreeMap<ObjectId, String>,
}

impl Context {
    pub(crate) fn new(id: ContextId, queue: QueueId, setup: ContextSetup) -> Self {
        Self {
            id,
            role: setup.role,
            queue,
            label: setup.label,
            schema: setup.schema,
            date_format: setup.date_format,
            merge_policy: setup.merge_policy,
            ids: setup.ids,
            parent: setup.parent,
            registered: BTreeMap::new(),
            inserted: BTreeSet::new(),
            updated: BTreeMap::new(),
            deleted: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn date_format(&self) -> &DateFormat {
        &self.date_format
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn set_merge_policy(&mut self, policy: MergePolicy) {
        self.merge_policy = policy;
    }

    /// Number of objects currently materialized in this context.
    pub fn registered_count(&self) -> usize {
        self.registered.len()
    }

    /// Drop every registered object and every pending change.
    pub fn reset(&mut self) {
        self.registered.clear();
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }

    /// Re-read `object` from the parent chain.
    ///
    /// With `merge_changes`, locally changed properties are kept unless the
    /// merge policy says the parent's value wins; without it, local changes
    /// are discarded. Returns `None` when the object no longer exists above
    /// this context (it is then unregistered here).
    pub fn refresh_object(
        &mut self,
        object: &ManagedObject,
        merge_changes: bool,
    ) -> Result<Option<ManagedObject>, ContextError> {
        self.ensure_confined()?;
        let entity = Arc::clone(&self.slot_for(object)?.entity);
        if self.inserted.contains(&object.id) {
            return self.snapshot(object.id).map(Some);
        }

        let Some(base) = self.parent_record(&entity, object.id)? else {
            self.registered.remove(&object.id);
            self.updated.remove(&object.id);
            return Ok(None);
        };
        if !merge_changes {
            self.updated.remove(&object.id);
        }
        self.reconcile(&entity, object.id, base);
        self.snapshot(object.id).map(Some)
    }

    pub(crate) fn ensure_confined(&self) -> Result<(), ContextError> {
        match queue::current_queue() {
            Some(queue) if queue == self.queue => Ok(()),
            other => Err(ContextError::ContractViolation(format!(
                "context {} used from {:?} instead of its confinement queue {}",
                self.label, other, self.queue
            ))),
        }
    }

    pub(crate) fn entity(&self, name: &str) -> Result<Arc<EntityDescription>, ContextError> {
        Ok(Arc::clone(self.schema.entity(name)?))
    }

    pub(crate) fn is_registered(&self, id: ObjectId) -> bool {
        self.registered.contains_key(&id)
    }

    pub(crate) fn allocate_id(&self) -> ObjectId {
        self.ids.allocate()
    }

    pub(crate) fn parent_handle(&self) -> Result<ContextHandle, ContextError> {
        let ParentLink::Context { id, hierarchy } = &self.parent else {
            return Err(ContextError::ContractViolation(format!(
                "{} is bound to the store and has no parent context",
                self.label
            )));
        };
        hierarchy
            .upgrade()
            .and_then(|h| h.resolve(*id))
            .ok_or_else(|| ContextError::QueueClosed {
                context: id.to_string(),
            })
    }

    /// Every record of `entity` as the parent sees it.
    pub(crate) fn parent_view(
        &self,
        entity: &Arc<EntityDescription>,
    ) -> Result<BTreeMap<ObjectId, Attributes>, ContextError> {
        match &self.parent {
            ParentLink::Store(coordinator) => Ok(coordinator
                .scan(entity.name())?
                .into_iter()
                .map(|record| (record.id, record.attributes))
                .collect()),
            ParentLink::Context { .. } => {
                let parent = self.parent_handle()?;
                let entity = Arc::clone(entity);
                parent.perform_and_wait(move |p| p.visible_records(&entity))?
            }
        }
    }

    /// One record as the parent sees it.
    pub(crate) fn parent_record(
        &self,
        entity: &Arc<EntityDescription>,
        id: ObjectId,
    ) -> Result<Option<Attributes>, ContextError> {
        match &self.parent {
            ParentLink::Store(coordinator) => {
                Ok(coordinator.load(entity.name(), id)?.map(|r| r.attributes))
            }
            ParentLink::Context { .. } => {
                let parent = self.parent_handle()?;
                let entity = Arc::clone(entity);
                parent.perform_and_wait(move |p| p.visible_record(&entity, id))?
            }
        }
    }

    /// Every record of `entity` as this context sees it: the parent's view
    /// with this context's pending changes laid over it.
    pub(crate) fn visible_records(
        &self,
        entity: &Arc<EntityDescription>,
    ) -> Result<BTreeMap<ObjectId, Attributes>, ContextError> {
        let base = self.parent_view(entity)?;
        Ok(self.overlay(entity, base))
    }

    pub(crate) fn visible_record(
        &self,
        entity: &Arc<EntityDescription>,
        id: ObjectId,
    ) -> Result<Option<Attributes>, ContextError> {
        if self.deleted.contains_key(&id) {
            return Ok(None);
        }
        if self.inserted.contains(&id) {
            return Ok(self.registered.get(&id).map(|slot| slot.values.clone()));
        }
        let base = self.parent_record(entity, id)?;
        let (Some(slot), Some(changed)) = (self.registered.get(&id), self.updated.get(&id)) else {
            return Ok(base);
        };
        Ok(match base {
            Some(base) => Some(merge_properties(self.merge_policy, slot, changed, &base).0),
            None if self.merge_policy == MergePolicy::InMemoryTrump => Some(slot.values.clone()),
            None => None,
        })
    }

    pub(crate) fn overlay(
        &self,
        entity: &Arc<EntityDescription>,
        mut view: BTreeMap<ObjectId, Attributes>,
    ) -> BTreeMap<ObjectId, Attributes> {
        for id in self.deleted.keys() {
            view.remove(id);
        }
        let own = self
            .registered
            .iter()
            .filter(|(_, slot)| slot.entity.name() == entity.name());
        for (id, slot) in own {
            if self.inserted.contains(id) {
                view.insert(*id, slot.values.clone());
                continue;
            }
            let Some(changed) = self.updated.get(id) else {
                continue;
            };
            match view.get_mut(id) {
                Some(current) => {
                    *current = merge_properties(self.merge_policy, slot, changed, current).0;
                }
                None if self.merge_policy == MergePolicy::InMemoryTrump => {
                    view.insert(*id, slot.values.clone());
                }
                None => {}
            }
        }
        view
    }

    /// Register `id` with the parent's values, or refresh an already
    /// registered instance, merging its pending changes per the merge policy.
    pub(crate) fn reconcile(&mut self, entity: &Arc<EntityDescription>, id: ObjectId, base: Attributes) {
        if self.inserted.contains(&id) || self.deleted.contains_key(&id) {
            return;
        }
        let policy = self.merge_policy;
        let Some(slot) = self.registered.get_mut(&id) else {
            self.registered.insert(
                id,
                Slot {
                    entity: Arc::clone(entity),
                    values: base.clone(),
                    snapshot: base,
                },
            );
            return;
        };

        match self.updated.get_mut(&id) {
            None => {
                slot.values = base.clone();
                slot.snapshot = base;
            }
            Some(changed) => {
                let (merged, conflicts) = merge_properties(policy, slot, changed, &base);
                if !conflicts.is_empty() {
                    warn!(
                        context = %self.label,
                        object = %id,
                        entity = %entity.name(),
                        conflicts = ?conflicts,
                        policy = ?policy,
                        "Resolved merge conflict on refresh"
                    );
                    if policy == MergePolicy::ExternalTrump {
                        for key in &conflicts {
                            changed.remove(key);
                        }
                    }
                }
                slot.values = merged;
                slot.snapshot = base;
                if changed.is_empty() {
                    self.updated.remove(&id);
                }
            }
        }
    }

    pub(crate) fn snapshot(&self, id: ObjectId) -> Result<ManagedObject, ContextError> {
        let slot = self
            .registered
            .get(&id)
            .ok_or(ContextError::UnknownObject(id))?;
        Ok(ManagedObject {
            id,
            entity: Arc::from(slot.entity.name()),
            context: self.id,
            values: slot.values.clone(),
        })
    }

    /// Resolve an object handed in by the caller, rejecting instances that
    /// belong to another context.
    pub(crate) fn slot_for(&self, object: &ManagedObject) -> Result<&Slot, ContextError> {
        if object.context != self.id {
            return Err(ContextError::ContractViolation(format!(
                "object {} belongs to {} but was used in {} ({})",
                object.id, object.context, self.id, self.label
            )));
        }
        self.registered
            .get(&object.id)
            .ok_or(ContextError::UnknownObject(object.id))
    }

    pub(crate) fn slot_for_mut(&mut self, object: &ManagedObject) -> Result<&mut Slot, ContextError> {
        self.slot_for(object)?;
        self.registered
            .get_mut(&object.id)
            .ok_or(ContextError::UnknownObject(object.id))
    }

    /// Record that `keys` changed on `id`. Inserted objects stay inserted.
    pub(crate) fn mark_updated(&mut self, id: ObjectId, keys: impl IntoIterator<Item = String>) {
        if self.inserted.contains(&id) {
            return;
        }
        let mut keys = keys.into_iter().peekable();
        if keys.peek().is_none() {
            return;
        }
        self.updated.entry(id).or_default().extend(keys);
    }

    /// Register a brand-new object as a pending insert.
    pub(crate) fn register_insert(&mut self, id: ObjectId, entity: Arc<EntityDescription>, values: Attributes) {
        self.registered.insert(
            id,
            Slot {
                entity,
                values,
                snapshot: Attributes::new(),
            },
        );
        self.inserted.insert(id);
    }

    /// Remove `id` from this context, recording a pending delete unless the
    /// object was inserted here and never pushed.
    pub(crate) fn remove_object(&mut self, entity: &str, id: ObjectId) {
        self.registered.remove(&id);
        self.updated.remove(&id);
        if !self.inserted.remove(&id) {
            self.deleted.insert(id, entity.to_string());
        }
    }
}

/// Lay `slot`'s changed properties over `base`. A property is in conflict
/// when the parent's value moved away from the slot's snapshot; conflicting
/// properties keep the parent's value under `ExternalTrump`.
fn merge_properties(
    policy: MergePolicy,
    slot: &Slot,
    changed: &BTreeSet<String>,
    base: &Attributes,
) -> (Attributes, Vec<String>) {
    let mut merged = base.clone();
    let mut conflicts = Vec::new();
    for key in changed {
        if base.get(key) != slot.snapshot.get(key) {
            conflicts.push(key.clone());
            if policy == MergePolicy::ExternalTrump {
                continue;
            }
        }
        let local = slot.values.get(key).cloned().unwrap_or(Value::Null);
        merged.insert(key.clone(), local);
    }
    (merged, conflicts)
}
