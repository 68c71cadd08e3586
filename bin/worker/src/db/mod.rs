//! Postgres storage for the worker.
//!
//! Ids are stored as their prefixed display strings and JSON payloads
//! (field values, conditions, params) as JSONB.

pub mod entity;
pub mod workflow;

pub use entity::PgEntityStore;
pub use workflow::PgWorkflowStore;

use std::fmt;
use std::str::FromStr;

/// Builds the decode error used when a stored value cannot be parsed.
pub(crate) fn decode_error(what: &str, raw: &str, reason: impl fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{raw}': {reason}"),
    )))
}

/// Parses a stored id column.
pub(crate) fn parse_id<T>(what: &str, raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    T::from_str(raw).map_err(|e| decode_error(what, raw, e))
}

/// Deserializes a stored JSONB column.
pub(crate) fn parse_json<T>(what: &str, value: serde_json::Value) -> Result<T, sqlx::Error>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(value).map_err(|e| decode_error(what, "<json>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::WorkflowId;

    #[test]
    fn parse_id_accepts_prefixed_form() {
        let id = WorkflowId::new();
        let parsed: WorkflowId = parse_id("workflow id", &id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_id_reports_the_column() {
        let err = parse_id::<WorkflowId>("workflow id", "nope").unwrap_err();
        assert!(err.to_string().contains("workflow id"));
    }
}
