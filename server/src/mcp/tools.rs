//! MCP Tool Definitions
//!
//! Schemas of the fifteen knowledge graph tools.

use super::protocol::{PropertySchema, Tool, ToolInputSchema};
use std::collections::HashMap;

/// Get all available knowledge graph tools
pub fn get_all_tools() -> Vec<Tool> {
    vec![
        // Entities (5)
        add_entity_tool(),
        update_entity_tool(),
        get_entity_by_id_tool(),
        get_entities_by_type_tool(),
        search_nodes_tool(),
        // Relationships (2)
        add_relationship_tool(),
        get_entity_relationships_tool(),
        // Memories (2)
        add_memory_tool(),
        update_memory_tool(),
        // Lifecycle (6)
        soft_delete_entity_tool(),
        soft_delete_relationship_tool(),
        restore_entity_tool(),
        restore_relationship_tool(),
        hard_delete_entity_tool(),
        hard_delete_relationship_tool(),
    ]
}

fn prop(property_type: &str, description: &str) -> PropertySchema {
    PropertySchema {
        property_type: property_type.to_string(),
        description: Some(description.to_string()),
        default: None,
        enum_values: None,
        items: None,
        minimum: None,
        maximum: None,
        additional_properties: None,
    }
}

fn string_prop(description: &str) -> PropertySchema {
    prop("string", description)
}

fn integer_prop(description: &str, minimum: f64, maximum: f64) -> PropertySchema {
    PropertySchema {
        minimum: Some(minimum),
        maximum: Some(maximum),
        ..prop("integer", description)
    }
}

fn boolean_prop(description: &str, default: bool) -> PropertySchema {
    PropertySchema {
        default: Some(serde_json::json!(default)),
        ..prop("boolean", description)
    }
}

fn enum_prop(description: &str, values: &[&str], default: &str) -> PropertySchema {
    PropertySchema {
        default: Some(serde_json::json!(default)),
        enum_values: Some(values.iter().map(|s| s.to_string()).collect()),
        ..prop("string", description)
    }
}

fn array_prop(description: &str, item_type: &str) -> PropertySchema {
    PropertySchema {
        items: Some(Box::new(PropertySchema {
            description: None,
            ..prop(item_type, "")
        })),
        ..prop("array", description)
    }
}

fn object_prop(description: &str) -> PropertySchema {
    PropertySchema {
        additional_properties: Some(true),
        ..prop("object", description)
    }
}

fn group_prop() -> PropertySchema {
    string_prop(
        "Optional group ID for multi-tenancy (defaults to 'default'). Reserved: 'default', 'global', 'system', 'admin' and the 'system_'/'admin_' prefixes",
    )
}

fn tool(
    name: &str,
    description: &str,
    properties: Vec<(&str, PropertySchema)>,
    required: &[&str],
) -> Tool {
    let mut map = HashMap::new();
    for (key, schema) in properties {
        map.insert(key.to_string(), schema);
    }
    map.insert("group_id".to_string(), group_prop());

    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: Some(map),
            required: Some(required.iter().map(|s| s.to_string()).collect()),
        },
    }
}

fn relationship_key_props() -> Vec<(&'static str, PropertySchema)> {
    vec![
        ("source_entity_id", string_prop("Source entity ID (required)")),
        ("target_entity_id", string_prop("Target entity ID (required)")),
        ("relationship_type", string_prop("Relationship type (required)")),
    ]
}

const RELATIONSHIP_KEY: [&str; 3] = ["source_entity_id", "target_entity_id", "relationship_type"];

// === Entities ===

fn add_entity_tool() -> Tool {
    tool(
        "add_entity",
        "Create a new entity in the knowledge graph. Fails if a live entity with the same ID exists in the group.",
        vec![
            ("entity_id", string_prop("Unique identifier for the entity (required)")),
            ("entity_type", string_prop("Type of the entity (required)")),
            ("name", string_prop("Human-readable name for the entity (required)")),
            (
                "properties",
                object_prop("Optional key-value properties (flat scalars only, max 50)"),
            ),
            ("summary", string_prop("Optional brief description of the entity")),
            (
                "episode_uuid",
                string_prop("Optional UUID of the memory episode that produced this entity"),
            ),
        ],
        &["entity_id", "entity_type", "name"],
    )
}

fn update_entity_tool() -> Tool {
    tool(
        "update_entity",
        "Partially update an entity. Supplied properties replace the whole map; summary null clears it.",
        vec![
            ("entity_id", string_prop("Unique identifier for the entity (required)")),
            ("name", string_prop("New name")),
            ("summary", string_prop("New summary, or null to clear")),
            ("properties", object_prop("Replacement property map")),
        ],
        &["entity_id"],
    )
}

fn get_entity_by_id_tool() -> Tool {
    tool(
        "get_entity_by_id",
        "Retrieve an entity by its ID",
        vec![
            ("entity_id", string_prop("Unique identifier for the entity (required)")),
            (
                "include_deleted",
                boolean_prop("Return the entity even if it is soft-deleted", false),
            ),
        ],
        &["entity_id"],
    )
}

fn get_entities_by_type_tool() -> Tool {
    tool(
        "get_entities_by_type",
        "List live entities of one type, ordered by entity ID",
        vec![
            ("entity_type", string_prop("Type of entities to retrieve (required)")),
            ("limit", integer_prop("Maximum number of entities (default 50)", 1.0, 1000.0)),
            ("offset", integer_prop("Number of entities to skip", 0.0, f64::from(u32::MAX))),
        ],
        &["entity_type"],
    )
}

fn search_nodes_tool() -> Tool {
    tool(
        "search_nodes",
        "Semantic search over entity names and summaries",
        vec![
            ("query", string_prop("Search query text (required)")),
            (
                "max_nodes",
                integer_prop("Maximum number of results (default 10)", 1.0, 100.0),
            ),
            ("entity_types", array_prop("Restrict results to these entity types", "string")),
        ],
        &["query"],
    )
}

// === Relationships ===

fn add_relationship_tool() -> Tool {
    let mut props = relationship_key_props();
    props.extend([
        ("properties", object_prop("Optional key-value properties")),
        ("fact", string_prop("Optional human-readable statement of the relationship")),
        ("t_valid", string_prop("RFC 3339 time from which the fact holds")),
        ("t_invalid", string_prop("RFC 3339 time at which the fact stops holding")),
    ]);
    tool(
        "add_relationship",
        "Create a relationship between two existing entities. Re-creating the same relationship updates it.",
        props,
        &RELATIONSHIP_KEY,
    )
}

fn get_entity_relationships_tool() -> Tool {
    tool(
        "get_entity_relationships",
        "List relationships touching an entity",
        vec![
            ("entity_id", string_prop("Entity ID to get relationships for (required)")),
            (
                "direction",
                enum_prop(
                    "Which edges to include",
                    &["incoming", "outgoing", "both"],
                    "both",
                ),
            ),
            (
                "relationship_types",
                array_prop("Restrict to these relationship types", "string"),
            ),
            ("limit", integer_prop("Maximum number of relationships", 1.0, 1000.0)),
            (
                "include_deleted",
                boolean_prop("Include soft-deleted relationships", false),
            ),
        ],
        &["entity_id"],
    )
}

// === Memories ===

fn add_memory_tool() -> Tool {
    tool(
        "add_memory",
        "Extract entities and relationships from unstructured text and add them to the graph",
        vec![
            ("name", string_prop("Episode name/identifier (required)")),
            ("episode_body", string_prop("Unstructured text content (required)")),
            (
                "source",
                enum_prop("Content type", &["text", "json", "message"], "text"),
            ),
            ("source_description", string_prop("Optional description of the source")),
            (
                "uuid",
                string_prop("Optional episode UUID; required to update the memory later"),
            ),
        ],
        &["name", "episode_body"],
    )
}

fn update_memory_tool() -> Tool {
    tool(
        "update_memory",
        "Re-extract an existing memory from edited text. Unchanged text is a no-op.",
        vec![
            ("uuid", string_prop("UUID of the memory episode to update (required)")),
            ("episode_body", string_prop("New unstructured text content (required)")),
            ("name", string_prop("Episode name used by the replace strategy")),
            (
                "source",
                enum_prop("Content type", &["text", "json", "message"], "text"),
            ),
            ("source_description", string_prop("Optional description of the source")),
            (
                "update_strategy",
                enum_prop(
                    "'incremental' applies only the delta, 'replace' re-ingests from scratch",
                    &["incremental", "replace"],
                    "incremental",
                ),
            ),
        ],
        &["uuid", "episode_body"],
    )
}

// === Lifecycle ===

fn soft_delete_entity_tool() -> Tool {
    tool(
        "soft_delete_entity",
        "Mark an entity as deleted. Idempotent; the entity can be restored.",
        vec![("entity_id", string_prop("Unique identifier for the entity (required)"))],
        &["entity_id"],
    )
}

fn soft_delete_relationship_tool() -> Tool {
    tool(
        "soft_delete_relationship",
        "Mark a relationship as deleted. Idempotent; the relationship can be restored.",
        relationship_key_props(),
        &RELATIONSHIP_KEY,
    )
}

fn restore_entity_tool() -> Tool {
    tool(
        "restore_entity",
        "Restore a soft-deleted entity",
        vec![("entity_id", string_prop("Unique identifier for the entity (required)"))],
        &["entity_id"],
    )
}

fn restore_relationship_tool() -> Tool {
    tool(
        "restore_relationship",
        "Restore a soft-deleted relationship",
        relationship_key_props(),
        &RELATIONSHIP_KEY,
    )
}

fn hard_delete_entity_tool() -> Tool {
    tool(
        "hard_delete_entity",
        "Permanently delete an entity and all of its relationships",
        vec![("entity_id", string_prop("Unique identifier for the entity (required)"))],
        &["entity_id"],
    )
}

fn hard_delete_relationship_tool() -> Tool {
    tool(
        "hard_delete_relationship",
        "Permanently delete a relationship",
        relationship_key_props(),
        &RELATIONSHIP_KEY,
    )
}
