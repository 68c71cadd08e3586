//! Object type definitions.

use serde::{Deserialize, Serialize};

/// Storage type of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Bool,
    Number,
    Date,
    /// Reference to one entity of `subtype`.
    Object { subtype: String },
    /// Reference to many entities of `subtype`; values are arrays of ids.
    ObjectMulti { subtype: String },
}

impl FieldType {
    /// Returns true for fields holding a list of references.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::ObjectMulti { .. })
    }
}

/// One field of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// The definition of an object type: its name and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub obj_type: String,
    pub fields: Vec<Field>,
}

impl EntityDefinition {
    /// Creates a definition with no fields.
    #[must_use]
    pub fn new(obj_type: impl Into<String>) -> Self {
        Self {
            obj_type: obj_type.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(Field::new(name, field_type));
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup() {
        let def = EntityDefinition::new("task")
            .with_field("name", FieldType::Text)
            .with_field(
                "members",
                FieldType::ObjectMulti {
                    subtype: "user".to_string(),
                },
            );

        assert_eq!(def.field("name").map(|f| &f.field_type), Some(&FieldType::Text));
        assert!(def.field("members").is_some_and(|f| f.field_type.is_multi()));
        assert!(def.field("missing").is_none());
    }

    #[test]
    fn field_type_serializes_with_tag() {
        let field = Field::new(
            "owner_id",
            FieldType::Object {
                subtype: "user".to_string(),
            },
        );
        let json = serde_json::to_value(&field).expect("serialize");
        assert_eq!(json["type"], "object");
        assert_eq!(json["subtype"], "user");
        assert_eq!(json["name"], "owner_id");
    }
}
