//! Merge fields: `<%field%>` placeholders in action params.
//!
//! - `<%name%>` renders the entity's `name` value
//! - `<%id%>` renders the entity ID
//! - `<%entity_link%>` renders `{application_url}/browse/{id}`
//! - `<%owner_id.email%>` follows the `owner_id` object reference and renders
//!   the referenced entity's `email`, recursively
//!
//! Unknown fields and broken references render as the empty string.

use futures::future::BoxFuture;
use keel_core::EntityId;
use keel_entity::{Entity, EntityError, EntityStore, FieldType};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

static MERGE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<%\s*([A-Za-z0-9_.]+)\s*%>").expect("merge field pattern is valid")
});

/// Deepest chain of references followed by one placeholder.
const MAX_REFERENCE_DEPTH: usize = 5;

/// Renders merge fields against an entity.
#[derive(Clone)]
pub struct MergeFields {
    entities: Arc<dyn EntityStore>,
    application_url: String,
}

impl MergeFields {
    #[must_use]
    pub fn new(entities: Arc<dyn EntityStore>, application_url: impl Into<String>) -> Self {
        let application_url = application_url.into().trim_end_matches('/').to_string();
        Self {
            entities,
            application_url,
        }
    }

    /// Browser link to an entity. Empty for unsaved entities.
    #[must_use]
    pub fn entity_link(&self, entity: &Entity) -> String {
        entity
            .id
            .map(|id| format!("{}/browse/{id}", self.application_url))
            .unwrap_or_default()
    }

    /// Replaces every placeholder in `template`.
    ///
    /// # Errors
    ///
    /// Fails only when loading a referenced entity hits a storage error.
    pub async fn render(&self, template: &str, entity: &Entity) -> Result<String, EntityError> {
        // Collected up front so no regex state is held across an await.
        let placeholders: Vec<(usize, usize, String)> = MERGE_FIELD
            .captures_iter(template)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let path = caps.get(1)?;
                Some((whole.start(), whole.end(), path.as_str().to_string()))
            })
            .collect();
        if placeholders.is_empty() {
            return Ok(template.to_string());
        }

        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for (start, end, path) in placeholders {
            out.push_str(&template[last..start]);
            out.push_str(&self.resolve(&path, entity, 0).await?);
            last = end;
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Renders every string inside a JSON value.
    pub fn render_value<'a>(
        &'a self,
        value: &'a Value,
        entity: &'a Entity,
    ) -> BoxFuture<'a, Result<Value, EntityError>> {
        Box::pin(async move {
            Ok(match value {
                Value::String(s) => Value::String(self.render(s, entity).await?),
                Value::Array(items) => {
                    let mut rendered = Vec::with_capacity(items.len());
                    for item in items {
                        rendered.push(self.render_value(item, entity).await?);
                    }
                    Value::Array(rendered)
                }
                Value::Object(map) => {
                    let mut rendered = Map::with_capacity(map.len());
                    for (key, item) in map {
                        rendered.insert(key.clone(), self.render_value(item, entity).await?);
                    }
                    Value::Object(rendered)
                }
                other => other.clone(),
            })
        })
    }

    fn resolve<'a>(
        &'a self,
        path: &'a str,
        entity: &'a Entity,
        depth: usize,
    ) -> BoxFuture<'a, Result<String, EntityError>> {
        Box::pin(async move {
            match path {
                "id" => return Ok(entity.id.map(|id| id.to_string()).unwrap_or_default()),
                "entity_link" => return Ok(self.entity_link(entity)),
                _ => {}
            }
            let Some((head, rest)) = path.split_once('.') else {
                return Ok(entity.value_text(path));
            };
            if depth >= MAX_REFERENCE_DEPTH {
                return Ok(String::new());
            }

            let definition = match self.entities.get_definition(&entity.obj_type).await {
                Ok(definition) => definition,
                Err(EntityError::UnknownObjectType { .. }) => return Ok(String::new()),
                Err(e) => return Err(e),
            };
            let Some(FieldType::Object { subtype }) =
                definition.field(head).map(|f| f.field_type.clone())
            else {
                return Ok(String::new());
            };
            let Some(ref_id) = entity
                .get_value(head)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<EntityId>().ok())
            else {
                return Ok(String::new());
            };

            let referenced = match self
                .entities
                .get(&subtype, ref_id, entity.account_id)
                .await
            {
                Ok(referenced) => referenced,
                Err(EntityError::NotFound { .. }) => return Ok(String::new()),
                Err(e) => return Err(e),
            };
            self.resolve(rest, &referenced, depth + 1).await
        })
    }
}
