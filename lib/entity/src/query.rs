//! Entity queries.
//!
//! A query selects entities of one object type within one account and filters
//! them with an ordered list of [`Where`] conditions. Conditions combine left to
//! right: each condition's [`Combinator`] joins it to the result accumulated so
//! far, with no operator precedence. The first condition's combinator is
//! ignored.
//!
//! Comparisons are loose the way stored form values are: `"t"`, `"true"` and
//! `1` all equal `true`, numeric strings compare as numbers, and RFC 3339 or
//! `YYYY-MM-DD` strings compare as dates.

use crate::entity::Entity;
use chrono::{DateTime, NaiveDate, Utc};
use keel_core::{AccountId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// How a condition joins the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    DoesNotEqual,
    IsGreater,
    IsLess,
    IsGreaterOrEqual,
    IsLessOrEqual,
    Contains,
    BeginsWith,
}

impl Operator {
    /// Applies the operator to a field's current value.
    #[must_use]
    pub fn apply(self, actual: Option<&Value>, expected: &Value) -> bool {
        match self {
            Self::Equals => loose_eq(actual, expected),
            Self::DoesNotEqual => !loose_eq(actual, expected),
            Self::IsGreater => loose_cmp(actual, expected) == Some(Ordering::Greater),
            Self::IsLess => loose_cmp(actual, expected) == Some(Ordering::Less),
            Self::IsGreaterOrEqual => matches!(
                loose_cmp(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::IsLessOrEqual => matches!(
                loose_cmp(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains => match actual {
                Some(Value::Array(items)) => items.iter().any(|v| loose_eq(Some(v), expected)),
                Some(v) => text(v)
                    .to_lowercase()
                    .contains(&text(expected).to_lowercase()),
                None => false,
            },
            Self::BeginsWith => actual.is_some_and(|v| {
                text(v)
                    .to_lowercase()
                    .starts_with(&text(expected).to_lowercase())
            }),
        }
    }
}

/// One stored condition: `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    #[serde(default)]
    pub combinator: Combinator,
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Where {
    /// Creates an `AND` condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            combinator: Combinator::And,
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Switches this condition to `OR`.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.combinator = Combinator::Or;
        self
    }

    /// Evaluates this condition alone against an entity.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = entity.field_value(&self.field);
        self.operator.apply(actual.as_ref(), &self.value)
    }
}

/// Evaluates conditions left to right against an entity. Empty lists match.
#[must_use]
pub fn conditions_match(conditions: &[Where], entity: &Entity) -> bool {
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    iter.fold(first.matches(entity), |acc, cond| match cond.combinator {
        Combinator::And => acc && cond.matches(entity),
        Combinator::Or => acc || cond.matches(entity),
    })
}

/// A filter over the entities of one object type within one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub obj_type: String,
    pub account_id: AccountId,
    /// Restricts the query to one entity, independent of the conditions.
    pub entity_id: Option<EntityId>,
    pub conditions: Vec<Where>,
    pub include_archived: bool,
    pub limit: Option<usize>,
}

impl EntityQuery {
    /// Creates a query matching every live entity of a type.
    #[must_use]
    pub fn new(obj_type: impl Into<String>, account_id: AccountId) -> Self {
        Self {
            obj_type: obj_type.into(),
            account_id,
            entity_id: None,
            conditions: Vec::new(),
            include_archived: false,
            limit: None,
        }
    }

    /// Starts an `AND` condition on a field.
    pub fn where_field(&mut self, field: impl Into<String>) -> WhereBuilder<'_> {
        self.and_where(field)
    }

    /// Starts an `AND` condition on a field.
    pub fn and_where(&mut self, field: impl Into<String>) -> WhereBuilder<'_> {
        WhereBuilder {
            query: self,
            combinator: Combinator::And,
            field: field.into(),
        }
    }

    /// Starts an `OR` condition on a field.
    pub fn or_where(&mut self, field: impl Into<String>) -> WhereBuilder<'_> {
        WhereBuilder {
            query: self,
            combinator: Combinator::Or,
            field: field.into(),
        }
    }

    /// Appends stored conditions unchanged.
    pub fn extend_conditions(&mut self, conditions: impl IntoIterator<Item = Where>) -> &mut Self {
        self.conditions.extend(conditions);
        self
    }

    /// Restricts the query to one entity.
    pub fn for_entity(&mut self, id: EntityId) -> &mut Self {
        self.entity_id = Some(id);
        self
    }

    /// Includes archived entities.
    pub fn include_archived(&mut self, include: bool) -> &mut Self {
        self.include_archived = include;
        self
    }

    /// Caps the number of returned entities. The total count is unaffected.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the entity is selected by this query.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.obj_type == self.obj_type
            && entity.account_id == self.account_id
            && (self.include_archived || !entity.archived)
            && self.entity_id.is_none_or(|id| entity.id == Some(id))
            && conditions_match(&self.conditions, entity)
    }
}

/// Completes a condition started with [`EntityQuery::where_field`].
pub struct WhereBuilder<'a> {
    query: &'a mut EntityQuery,
    combinator: Combinator,
    field: String,
}

impl<'a> WhereBuilder<'a> {
    fn push(self, operator: Operator, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.query.conditions.push(Where {
            combinator: self.combinator,
            field: self.field,
            operator,
            value: value.into(),
        });
        self.query
    }

    pub fn equals(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::Equals, value)
    }

    pub fn does_not_equal(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::DoesNotEqual, value)
    }

    pub fn is_greater(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::IsGreater, value)
    }

    pub fn is_less(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::IsLess, value)
    }

    pub fn is_greater_or_equal(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::IsGreaterOrEqual, value)
    }

    pub fn is_less_or_equal(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::IsLessOrEqual, value)
    }

    pub fn contains(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::Contains, value)
    }

    pub fn begins_with(self, value: impl Into<Value>) -> &'a mut EntityQuery {
        self.push(Operator::BeginsWith, value)
    }
}

/// Result of executing a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    /// Number of matching entities before any limit.
    pub total_count: usize,
    pub entities: Vec<Entity>,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" => Some(true),
            "f" | "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let Value::String(s) = value else {
        return None;
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn loose_eq(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match (actual, expected) {
        (Value::Array(items), _) if !expected.is_array() => {
            items.iter().any(|v| loose_eq(Some(v), expected))
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            matches!((as_bool(actual), as_bool(expected)), (Some(a), Some(b)) if a == b)
        }
        (Value::Null, _) | (_, Value::Null) => text(actual) == text(expected),
        _ => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => text(actual) == text(expected),
        },
    }
}

fn loose_cmp(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    if actual.is_null() {
        return None;
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_date(actual), as_date(expected)) {
        return Some(a.cmp(&b));
    }
    Some(text(actual).cmp(&text(expected)))
}
