//! Tool call dispatch
//!
//! Maps a tool name and its flat argument object onto the knowledge graph.
//! Arguments are type-checked here; presence and content are checked by the
//! graph's own validators, so a missing required argument surfaces as
//! `RequiredFieldError` from the library.

use chrono::{DateTime, Utc};
use kgraph_memory::temporal::parse_timestamp;
use kgraph_memory::validation::{json_kind, properties_from_value};
use kgraph_memory::{
    AddMemory, Direction, EntityUpdate, GraphError, KnowledgeGraph, NewEntity, NewRelationship,
    Patch, Properties, RelationshipQuery, UpdateMemory,
};
use serde_json::{json, Map, Value};

use crate::error::{McpError, McpResult};

/// Flat argument object of one tool call
#[derive(Debug, Default)]
pub struct ToolArgs {
    map: Map<String, Value>,
}

fn mismatch(key: &str, expected: &str, got: &Value) -> McpError {
    GraphError::type_mismatch(format!(
        "{} must be {}, got {}",
        key,
        expected,
        json_kind(got)
    ))
    .into()
}

impl ToolArgs {
    /// Absent or null arguments are an empty object
    pub fn from_value(value: Option<Value>) -> McpResult<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(map)) => Ok(Self { map }),
            Some(other) => Err(mismatch("arguments", "an object", &other)),
        }
    }

    /// Present and non-null
    fn value(&self, key: &str) -> Option<&Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> McpResult<Option<&str>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(mismatch(key, "a string", other)),
        }
    }

    pub fn int(&self, key: &str) -> McpResult<Option<i64>> {
        let Some(value) = self.value(key) else {
            return Ok(None);
        };
        if let Some(n) = value.as_i64() {
            return Ok(Some(n));
        }
        match value.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
            _ => Err(mismatch(key, "an integer", value)),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> McpResult<bool> {
        match self.value(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(mismatch(key, "a boolean", other)),
        }
    }

    pub fn str_list(&self, key: &str) -> McpResult<Option<Vec<String>>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(mismatch(key, "a list of strings", other)),
                })
                .collect::<McpResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(mismatch(key, "a list of strings", other)),
        }
    }

    pub fn properties(&self, key: &str) -> McpResult<Option<Properties>> {
        Ok(properties_from_value(self.value(key))?)
    }

    pub fn timestamp(&self, key: &str) -> McpResult<Option<DateTime<Utc>>> {
        match self.str(key)? {
            None => Ok(None),
            Some(raw) => Ok(Some(parse_timestamp(key, raw)?)),
        }
    }

    /// Absent keeps, null clears, a string sets
    pub fn patch_str(&self, key: &str) -> McpResult<Patch<String>> {
        match self.map.get(key) {
            None => Ok(Patch::Unset),
            Some(Value::Null) => Ok(Patch::Clear),
            Some(Value::String(s)) => Ok(Patch::Set(s.clone())),
            Some(other) => Err(mismatch(key, "a string or null", other)),
        }
    }

    fn owned(&self, key: &str) -> McpResult<Option<String>> {
        Ok(self.str(key)?.map(str::to_string))
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> McpResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim)
}

/// Execute a tool by name
pub async fn execute_tool(
    graph: &KnowledgeGraph,
    name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let args = ToolArgs::from_value(arguments)?;
    let group = args.str("group_id")?;
    tracing::debug!("Executing tool {} (group: {:?})", name, group);

    match name {
        "add_entity" => {
            let new = NewEntity {
                entity_id: args.owned("entity_id")?,
                entity_type: args.owned("entity_type")?,
                name: args.owned("name")?,
                summary: args.owned("summary")?,
                properties: args.properties("properties")?,
                episode_uuid: args.owned("episode_uuid")?,
                ..Default::default()
            };
            let entity = graph.entities().create(group, new).await?;
            to_value(&entity)
        }

        "update_entity" => {
            let update = EntityUpdate {
                name: args.owned("name")?,
                summary: args.patch_str("summary")?,
                properties: args.properties("properties")?,
            };
            let entity = graph
                .entities()
                .update(group, args.str("entity_id")?, update)
                .await?;
            to_value(&entity)
        }

        "get_entity_by_id" => {
            let entity = graph.entities().get(
                group,
                args.str("entity_id")?,
                args.bool_or("include_deleted", false)?,
            )?;
            to_value(&entity)
        }

        "get_entities_by_type" => {
            let offset = match args.int("offset")? {
                None => None,
                Some(n) => Some(usize::try_from(n).map_err(|_| {
                    GraphError::validation(format!("offset must be non-negative, got {}", n))
                })?),
            };
            let entities = graph.entities().list_by_type(
                group,
                args.str("entity_type")?,
                args.int("limit")?,
                offset,
            )?;
            Ok(json!({ "count": entities.len(), "entities": entities }))
        }

        "search_nodes" => {
            let query = args.str("query")?;
            let entity_types = args.str_list("entity_types")?;
            let results = graph
                .search()
                .search(
                    group,
                    query,
                    args.int("max_nodes")?,
                    entity_types.as_deref(),
                )
                .await?;
            Ok(json!({
                "entities": results,
                "total": results.len(),
                "query": trimmed(query),
            }))
        }

        "add_relationship" => {
            let new = NewRelationship {
                source_entity_id: args.owned("source_entity_id")?,
                target_entity_id: args.owned("target_entity_id")?,
                relationship_type: args.owned("relationship_type")?,
                properties: args.properties("properties")?,
                fact: args.owned("fact")?,
                t_valid: args.timestamp("t_valid")?,
                t_invalid: args.timestamp("t_invalid")?,
            };
            let relationship = graph.relationships().create(group, new)?;
            to_value(&relationship)
        }

        "get_entity_relationships" => {
            let direction = match args.str("direction")? {
                Some(raw) => raw.parse::<Direction>()?,
                None => Direction::default(),
            };
            let query = RelationshipQuery {
                direction,
                types: args.str_list("relationship_types")?,
                limit: args.int("limit")?,
                include_deleted: args.bool_or("include_deleted", false)?,
            };
            let relationships =
                graph
                    .relationships()
                    .list_for_entity(group, args.str("entity_id")?, query)?;
            Ok(json!({ "count": relationships.len(), "relationships": relationships }))
        }

        "add_memory" => {
            let input = AddMemory {
                name: args.owned("name")?,
                episode_body: args.owned("episode_body")?,
                source: args.owned("source")?,
                source_description: args.owned("source_description")?,
                uuid: args.owned("uuid")?,
            };
            let result = graph.memory().add_memory(group, input).await?;
            to_value(&result)
        }

        "update_memory" => {
            let input = UpdateMemory {
                uuid: args.owned("uuid")?,
                episode_body: args.owned("episode_body")?,
                name: args.owned("name")?,
                source: args.owned("source")?,
                source_description: args.owned("source_description")?,
                update_strategy: args.owned("update_strategy")?,
            };
            let result = graph.memory().update_memory(group, input).await?;
            to_value(&result)
        }

        "soft_delete_entity" => {
            let entity_id = args.str("entity_id")?;
            let outcome = graph.entities().soft_delete(group, entity_id)?;
            Ok(json!({
                "status": "deleted",
                "entity_id": trimmed(entity_id),
                "hard_delete": false,
                "already_deleted": outcome.already_deleted,
                "deleted_at": outcome.deleted_at,
            }))
        }

        "restore_entity" => {
            let entity = graph.entities().restore(group, args.str("entity_id")?)?;
            Ok(json!({ "status": "restored", "entity_id": entity.entity_id }))
        }

        "hard_delete_entity" => {
            let entity_id = args.str("entity_id")?;
            let removed = graph.entities().hard_delete(group, entity_id)?;
            Ok(json!({
                "status": "deleted",
                "entity_id": trimmed(entity_id),
                "hard_delete": true,
                "relationships_removed": removed,
            }))
        }

        "soft_delete_relationship" | "restore_relationship" | "hard_delete_relationship" => {
            let source = args.str("source_entity_id")?;
            let target = args.str("target_entity_id")?;
            let rel_type = args.str("relationship_type")?;
            let relationships = graph.relationships();

            let mut result = json!({
                "source_entity_id": trimmed(source),
                "target_entity_id": trimmed(target),
                "relationship_type": trimmed(rel_type),
            });
            let fields = match name {
                "soft_delete_relationship" => {
                    let outcome = relationships.soft_delete(group, source, target, rel_type)?;
                    json!({
                        "status": "deleted",
                        "hard_delete": false,
                        "already_deleted": outcome.already_deleted,
                        "deleted_at": outcome.deleted_at,
                    })
                }
                "restore_relationship" => {
                    relationships.restore(group, source, target, rel_type)?;
                    json!({ "status": "restored" })
                }
                _ => {
                    relationships.hard_delete(group, source, target, rel_type)?;
                    json!({ "status": "deleted", "hard_delete": true })
                }
            };
            if let (Some(out), Value::Object(extra)) = (result.as_object_mut(), fields) {
                out.extend(extra);
            }
            Ok(result)
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
