//! Entities: a field bag for one object type with change tracking.

use keel_core::{AccountId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A business entity of any object type.
///
/// Field values are stored as JSON. Every [`set_value`](Self::set_value) that
/// actually changes a value records the field as changed until
/// [`reset_dirty`](Self::reset_dirty) is called, which the save pipeline does
/// after workflows for the save have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Persisted ID, `None` until first saved.
    pub id: Option<EntityId>,
    /// Object type name, e.g. `task`.
    pub obj_type: String,
    /// Owning tenant.
    pub account_id: AccountId,
    /// Soft-deleted entities stay queryable with `include_archived`.
    #[serde(default)]
    pub archived: bool,
    values: Map<String, Value>,
    #[serde(skip)]
    changed: BTreeSet<String>,
}

impl Entity {
    /// Creates an unsaved entity with no values.
    #[must_use]
    pub fn new(obj_type: impl Into<String>, account_id: AccountId) -> Self {
        Self {
            id: None,
            obj_type: obj_type.into(),
            account_id,
            archived: false,
            values: Map::new(),
            changed: BTreeSet::new(),
        }
    }

    /// Rebuilds a persisted entity from storage. Nothing is marked changed.
    #[must_use]
    pub fn from_storage(
        id: EntityId,
        obj_type: impl Into<String>,
        account_id: AccountId,
        values: Map<String, Value>,
        archived: bool,
    ) -> Self {
        Self {
            id: Some(id),
            obj_type: obj_type.into(),
            account_id,
            archived,
            values,
            changed: BTreeSet::new(),
        }
    }

    /// Sets a value while building, chaining style.
    #[must_use]
    pub fn with_value(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set_value(field, value);
        self
    }

    /// Returns the stored value of a field.
    #[must_use]
    pub fn get_value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Returns a field value, resolving the virtual `id` and `entity_id`
    /// fields to the entity's own ID.
    #[must_use]
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" | "entity_id" => self.id.map(|id| Value::String(id.to_string())),
            _ => self.values.get(field).cloned(),
        }
    }

    /// Returns a field rendered as plain text. Missing and null fields render empty.
    #[must_use]
    pub fn value_text(&self, field: &str) -> String {
        match self.field_value(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.to_string(),
        }
    }

    /// Sets a field. Returns `true` if the stored value changed.
    pub fn set_value(&mut self, field: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if self.values.get(field) == Some(&value) {
            return false;
        }
        self.values.insert(field.to_string(), value);
        self.changed.insert(field.to_string());
        true
    }

    /// Appends a value to a multi-valued field, ignoring duplicates.
    ///
    /// A scalar already stored in the field becomes the first element.
    pub fn add_multi_value(&mut self, field: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        let mut items = match self.values.remove(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(scalar) => vec![scalar],
        };
        let added = !items.contains(&value);
        if added {
            items.push(value);
            self.changed.insert(field.to_string());
        }
        self.values.insert(field.to_string(), Value::Array(items));
        added
    }

    /// Returns true if the field changed since the last reset.
    #[must_use]
    pub fn field_changed(&self, field: &str) -> bool {
        self.changed.contains(field)
    }

    /// Fields changed since the last reset, in name order.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    /// Forgets all recorded changes.
    pub fn reset_dirty(&mut self) {
        self.changed.clear();
    }

    /// All stored values.
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}
