//! Fetches.
//!
//! Every fetch reads the parent chain's view of the entity, lays this
//! context's pending changes over it, filters, sorts and limits, then
//! registers the selected objects in this context.

use super::{FetchRequest, SortDescriptor};
use crate::context::{Context, ManagedObject};
use crate::error::{ContextError, QueryError};
use crate::query::{BoundPredicate, Predicate};
use crate::schema::EntityDescription;
use crate::types::ObjectId;
use crate::value::{Attributes, Value};
use std::cmp::Ordering;
use std::sync::Arc;

impl Context {
    pub fn fetch(&mut self, request: &FetchRequest) -> Result<Vec<ManagedObject>, ContextError> {
        self.ensure_confined()?;
        let entity = self.entity(request.entity())?;
        let predicate = self.bind_predicate(&entity, request.predicate())?;
        check_sort_keys(&entity, request.sort())?;

        let base = self.parent_view(&entity)?;
        let mut selected: Vec<(ObjectId, Attributes)> = self
            .overlay(&entity, base.clone())
            .into_iter()
            .filter(|(_, attributes)| predicate.matches(attributes))
            .collect();
        if !request.sort().is_empty() {
            selected.sort_by(|(_, a), (_, b)| compare_by(request.sort(), a, b));
        }
        if let Some(limit) = request.fetch_limit() {
            selected.truncate(limit);
        }

        let mut objects = Vec::with_capacity(selected.len());
        for (id, _) in selected {
            if let Some(parent_values) = base.get(&id) {
                self.reconcile(&entity, id, parent_values.clone());
            }
            objects.push(self.snapshot(id)?);
        }
        Ok(objects)
    }

    fn fetch_first(&mut self, request: FetchRequest) -> Result<Option<ManagedObject>, ContextError> {
        Ok(self.fetch(&request.limit(1))?.into_iter().next())
    }

    pub fn fetch_all(&mut self, entity: &str) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(&FetchRequest::new(entity))
    }

    /// All objects sorted by `key`. A `limit` of zero means no limit.
    pub fn fetch_all_sorted(
        &mut self,
        entity: &str,
        key: &str,
        ascending: bool,
        limit: usize,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(&FetchRequest::new(entity).sorted_by(key, ascending).limit(limit))
    }

    /// Objects whose `key` equals `value`. The value is coerced to the
    /// attribute type, so dates may be given as text.
    pub fn fetch_by(
        &mut self,
        entity: &str,
        key: &str,
        value: impl Into<Value>,
        limit: usize,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(
            &FetchRequest::new(entity)
                .with_predicate(Predicate::eq(key, value))
                .limit(limit),
        )
    }

    pub fn fetch_by_sorted(
        &mut self,
        entity: &str,
        key: &str,
        value: impl Into<Value>,
        sort_key: &str,
        ascending: bool,
        limit: usize,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(
            &FetchRequest::new(entity)
                .with_predicate(Predicate::eq(key, value))
                .sorted_by(sort_key, ascending)
                .limit(limit),
        )
    }

    pub fn fetch_first_by_key(
        &mut self,
        entity: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<ManagedObject>, ContextError> {
        self.fetch_first(FetchRequest::new(entity).with_predicate(Predicate::eq(key, value)))
    }

    pub fn fetch_by_predicate(
        &mut self,
        entity: &str,
        predicate: &Predicate,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(&FetchRequest::new(entity).with_predicate(predicate.clone()))
    }

    pub fn fetch_by_predicate_sorted(
        &mut self,
        entity: &str,
        predicate: &Predicate,
        sort_key: &str,
        ascending: bool,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(
            &FetchRequest::new(entity)
                .with_predicate(predicate.clone())
                .sorted_by(sort_key, ascending),
        )
    }

    pub fn fetch_first_by_predicate(
        &mut self,
        entity: &str,
        predicate: &Predicate,
    ) -> Result<Option<ManagedObject>, ContextError> {
        self.fetch_first(FetchRequest::new(entity).with_predicate(predicate.clone()))
    }

    /// Object with the smallest `key`.
    pub fn fetch_first_sorted(&mut self, entity: &str, key: &str) -> Result<Option<ManagedObject>, ContextError> {
        self.fetch_first(FetchRequest::new(entity).sorted_by(key, true))
    }

    /// Last object of the ascending sort by `key`; among equal keys that is
    /// the one with the highest identifier.
    pub fn fetch_last_sorted(&mut self, entity: &str, key: &str) -> Result<Option<ManagedObject>, ContextError> {
        Ok(self.fetch(&FetchRequest::new(entity).sorted_by(key, true))?.pop())
    }

    /// Objects whose `key` is among `values` (or, with `include == false`,
    /// is not), sorted ascending by `sort_key`.
    pub fn objects_for_key(
        &mut self,
        entity: &str,
        key: &str,
        sort_key: &str,
        values: Vec<Value>,
        include: bool,
    ) -> Result<Vec<ManagedObject>, ContextError> {
        self.fetch(
            &FetchRequest::new(entity)
                .with_predicate(Predicate::one_of(key, values, include))
                .sorted_by(sort_key, true),
        )
    }

    /// Fetch one object by identity.
    pub fn fetch_object(&mut self, entity: &str, id: ObjectId) -> Result<Option<ManagedObject>, ContextError> {
        self.ensure_confined()?;
        let entity = self.entity(entity)?;
        if self.visible_record(&entity, id)?.is_none() {
            return Ok(None);
        }
        if let Some(parent_values) = self.parent_record(&entity, id)? {
            self.reconcile(&entity, id, parent_values);
        }
        self.snapshot(id).map(Some)
    }

    pub(crate) fn bind_predicate(
        &self,
        entity: &EntityDescription,
        predicate: Option<&Predicate>,
    ) -> Result<BoundPredicate, ContextError> {
        match predicate {
            Some(predicate) => Ok(predicate.bind(entity, &self.date_format)?),
            None => Ok(BoundPredicate::always()),
        }
    }
}

fn check_sort_keys(entity: &Arc<EntityDescription>, sort: &[SortDescriptor]) -> Result<(), QueryError> {
    match sort.iter().find(|d| entity.attribute(&d.key).is_none()) {
        Some(descriptor) => Err(QueryError::UnknownAttribute {
            entity: entity.name().to_string(),
            attribute: descriptor.key.clone(),
        }),
        None => Ok(()),
    }
}

fn compare_by(sort: &[SortDescriptor], a: &Attributes, b: &Attributes) -> Ordering {
    for descriptor in sort {
        let lhs = a.get(&descriptor.key).unwrap_or(&Value::Null);
        let rhs = b.get(&descriptor.key).unwrap_or(&Value::Null);
        let ordering = lhs.compare(rhs);
        let ordering = if descriptor.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
