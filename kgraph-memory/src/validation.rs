//! Input validation for entities, relationships and tenant ids
//!
//! Every mutation runs its inputs through these functions before touching
//! the store. All validators are pure: they trim and normalise, and return
//! a fresh value rather than mutating the input.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{GraphError, Result};

/// Flat scalar property map stored on entities and relationships
pub type Properties = BTreeMap<String, Value>;

pub const MAX_PROPERTIES: usize = 50;
pub const MAX_KEY_LENGTH: usize = 255;
pub const MAX_VALUE_LENGTH: usize = 10_000;

/// Upper bound for list operations
pub const MAX_LIMIT: usize = 1000;

/// Tenant used when the caller supplies none
pub const DEFAULT_GROUP_ID: &str = "default";

const RESERVED_GROUP_IDS: &[&str] = &[
    "default",
    "global",
    "system",
    "admin",
    "_system_",
    "_internal_",
    "_admin_",
];

const RESERVED_GROUP_PREFIXES: &[&str] = &["_system_", "_internal_", "_admin_"];

/// Keys that name core record fields and may not appear in a property map
pub const RESERVED_PROPERTY_KEYS: &[&str] = &[
    "entity_id",
    "entity_type",
    "name",
    "group_id",
    "summary",
    "embedding",
    "episode_uuid",
    "episode_content_hash",
    "episode_name",
    "_deleted",
    "deleted_at",
    "created_at",
    "updated_at",
];

/// A present, non-blank value, trimmed
pub fn required_text(field: &str, value: Option<&str>) -> Result<String> {
    let value = value.ok_or_else(|| GraphError::required(format!("{} is required", field)))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GraphError::required(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// A present, non-blank value, returned as given.
///
/// Used for free text whose exact bytes matter, such as a memory body.
pub fn required_body(field: &str, value: Option<&str>) -> Result<String> {
    required_text(field, value)?;
    Ok(value.unwrap_or_default().to_string())
}

/// Identifiers are storage key components; NUL is the key separator.
fn reject_control_chars(field: &str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(GraphError::validation(format!(
            "{} must not contain control characters",
            field
        )));
    }
    Ok(())
}

fn key_component(field: &str, value: Option<&str>) -> Result<String> {
    let value = required_text(field, value)?;
    reject_control_chars(field, &value)?;
    Ok(value)
}

pub fn validate_entity_id(entity_id: Option<&str>) -> Result<String> {
    key_component("entity_id", entity_id)
}

pub fn validate_entity_type(entity_type: Option<&str>) -> Result<String> {
    key_component("entity_type", entity_type)
}

pub fn validate_episode_uuid(uuid: Option<&str>) -> Result<String> {
    key_component("uuid", uuid)
}

pub fn validate_name(name: Option<&str>) -> Result<String> {
    required_text("name", name)
}

pub fn validate_relationship_type(relationship_type: Option<&str>) -> Result<String> {
    key_component("relationship_type", relationship_type)
}

/// Validate a property map, returning a copy with trimmed keys.
///
/// `None` yields an empty map. Values must be string, number, boolean or
/// null; nested objects and arrays are a [`GraphError::TypeMismatch`].
pub fn validate_properties(properties: Option<&Properties>) -> Result<Properties> {
    let Some(properties) = properties else {
        return Ok(Properties::new());
    };

    if properties.len() > MAX_PROPERTIES {
        return Err(GraphError::validation(format!(
            "Maximum {} properties allowed, got {}",
            MAX_PROPERTIES,
            properties.len()
        )));
    }

    let mut validated = Properties::new();
    for (key, value) in properties {
        let key_len = key.chars().count();
        if key_len > MAX_KEY_LENGTH {
            return Err(GraphError::validation(format!(
                "Property key too long: {} > {}",
                key_len, MAX_KEY_LENGTH
            )));
        }
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(GraphError::validation("Property key cannot be empty"));
        }
        if RESERVED_PROPERTY_KEYS.contains(&trimmed) {
            return Err(GraphError::validation(format!(
                "Property key '{}' is reserved",
                trimmed
            )));
        }

        match value {
            Value::Array(_) | Value::Object(_) => {
                return Err(GraphError::type_mismatch(format!(
                    "Property value must be string|number|boolean|null, got {} for key '{}'",
                    json_kind(value),
                    key
                )));
            }
            Value::String(s) => {
                let len = s.chars().count();
                if len > MAX_VALUE_LENGTH {
                    return Err(GraphError::validation(format!(
                        "Property value too long for key '{}': {} > {}",
                        key, len, MAX_VALUE_LENGTH
                    )));
                }
            }
            _ => {}
        }

        validated.insert(trimmed.to_string(), value.clone());
    }

    Ok(validated)
}

/// Convert a JSON value into a property map without validating its entries.
///
/// `null` is treated as absent.
pub fn properties_from_value(value: Option<&Value>) -> Result<Option<Properties>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )),
        Some(other) => Err(GraphError::type_mismatch(format!(
            "properties must be an object, got {}",
            json_kind(other)
        ))),
    }
}

/// Normalise a tenant id: lower-cased and trimmed, `default` when absent.
pub fn validate_group_id(group_id: Option<&str>) -> Result<String> {
    let Some(raw) = group_id else {
        return Ok(DEFAULT_GROUP_ID.to_string());
    };

    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Ok(DEFAULT_GROUP_ID.to_string());
    }
    reject_control_chars("group_id", &normalized)?;

    if RESERVED_GROUP_IDS.contains(&normalized.as_str()) {
        return Err(GraphError::ReservedIdentifier(format!(
            "Group ID '{}' is reserved",
            raw
        )));
    }
    if RESERVED_GROUP_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with(prefix))
    {
        return Err(GraphError::ReservedIdentifier(format!(
            "Group ID '{}' uses reserved prefix",
            raw
        )));
    }

    Ok(normalized)
}

/// Check a page size against `[1, MAX_LIMIT]`, applying `default` when absent.
///
/// Out-of-range values are rejected rather than clamped.
pub fn validate_limit(limit: Option<i64>, default: usize) -> Result<usize> {
    let Some(limit) = limit else {
        return Ok(default);
    };
    if limit < 1 {
        return Err(GraphError::validation(format!(
            "Limit must be at least 1, got {}",
            limit
        )));
    }
    if limit as u64 > MAX_LIMIT as u64 {
        return Err(GraphError::validation(format!(
            "Limit cannot exceed {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok(limit as usize)
}

/// Short name of a JSON value's type for error messages
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
