//! Entity/relationship extraction results
//!
//! The extractor returns a JSON object with `entities` and `relationships`
//! lists. Missing keys normalise to empty lists; anything else malformed at
//! the top level is an `ExtractionError`. Individual candidates are parsed
//! leniently and checked later by the synchronizer.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{GraphError, Result};
use crate::validation::{json_kind, Properties};

/// Prompt sent to chat-completion extractors. `{text}` is replaced by the input.
pub const EXTRACTION_PROMPT: &str = r#"Extract entities and relationships from the following text.

Return a JSON object with this exact structure:
{
  "entities": [
    {
      "entity_id": "unique_id_for_entity",
      "entity_type": "Type of entity (e.g., User, Module, Rule)",
      "name": "Human-readable name",
      "summary": "Brief description (optional)",
      "properties": {"key": "value"}
    }
  ],
  "relationships": [
    {
      "source_entity_id": "entity_id_of_source",
      "target_entity_id": "entity_id_of_target",
      "relationship_type": "Type of relationship (e.g., USES, DEPENDS_ON, WORKS_ON)",
      "fact": "Human-readable description of relationship (optional)",
      "properties": {"key": "value"}
    }
  ]
}

Guidelines:
- Extract all entities mentioned in the text
- Extract all relationships between entities
- Use clear, descriptive entity_id format (e.g., "user:john_doe", "module:auth")
- Use descriptive relationship types (e.g., USES, DEPENDS_ON, WORKS_ON, OWNS)
- Include summaries when helpful for understanding
- Only include properties that are explicitly mentioned in the text

Text to analyze:
{text}
"#;

/// Candidate entity produced by extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateEntity {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub properties: Properties,
}

impl CandidateEntity {
    pub fn new(entity_id: &str, entity_type: &str, name: &str) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            entity_type: Some(entity_type.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            entity_id: string_field(obj, "entity_id"),
            entity_type: string_field(obj, "entity_type"),
            name: string_field(obj, "name"),
            summary: string_field(obj, "summary"),
            properties: object_field(obj, "properties"),
        })
    }
}

/// Candidate relationship produced by extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateRelationship {
    pub source_entity_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub relationship_type: Option<String>,
    pub fact: Option<String>,
    pub properties: Properties,
}

impl CandidateRelationship {
    pub fn new(source: &str, target: &str, rel_type: &str) -> Self {
        Self {
            source_entity_id: Some(source.to_string()),
            target_entity_id: Some(target.to_string()),
            relationship_type: Some(rel_type.to_string()),
            ..Default::default()
        }
    }

    pub fn with_fact(mut self, fact: &str) -> Self {
        self.fact = Some(fact.to_string());
        self
    }

    /// (source, target, type) identity, if all three are present
    pub fn key(&self) -> Option<(String, String, String)> {
        Some((
            self.source_entity_id.clone()?,
            self.target_entity_id.clone()?,
            self.relationship_type.clone()?,
        ))
    }

    fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            source_entity_id: string_field(obj, "source_entity_id"),
            target_entity_id: string_field(obj, "target_entity_id"),
            relationship_type: string_field(obj, "relationship_type"),
            fact: string_field(obj, "fact"),
            properties: object_field(obj, "properties"),
        })
    }
}

/// Output of one extraction call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: Vec<CandidateEntity>,
    pub relationships: Vec<CandidateRelationship>,
}

/// Extraction collaborator
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction>;
}

/// Extractor used when no provider is configured; every call fails
pub struct UnconfiguredExtractor;

#[async_trait]
impl Extractor for UnconfiguredExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction> {
        Err(GraphError::extraction(
            "API key not configured. Set OPENAI_API_KEY environment variable.",
        ))
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn object_field(obj: &serde_json::Map<String, Value>, key: &str) -> Properties {
    match obj.get(key) {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Properties::new(),
    }
}

/// Parse raw extractor output
pub fn parse_extraction(content: &str) -> Result<Extraction> {
    if content.trim().is_empty() {
        return Err(GraphError::extraction("Empty response from LLM"));
    }

    let value: Value = serde_json::from_str(content)
        .map_err(|e| GraphError::extraction(format!("Invalid JSON response from LLM: {}", e)))?;

    let Value::Object(obj) = value else {
        return Err(GraphError::extraction(format!(
            "LLM response must be a JSON object, got {}",
            json_kind(&value)
        )));
    };

    let entities = list_field(&obj, "entities")?;
    let relationships = list_field(&obj, "relationships")?;

    let extraction = Extraction {
        entities: entities
            .iter()
            .filter_map(|v| {
                let parsed = CandidateEntity::from_json(v);
                if parsed.is_none() {
                    log::warn!("Skipping non-object entity candidate: {}", v);
                }
                parsed
            })
            .collect(),
        relationships: relationships
            .iter()
            .filter_map(|v| {
                let parsed = CandidateRelationship::from_json(v);
                if parsed.is_none() {
                    log::warn!("Skipping non-object relationship candidate: {}", v);
                }
                parsed
            })
            .collect(),
    };

    log::debug!(
        "Extracted {} entities and {} relationships",
        extraction.entities.len(),
        extraction.relationships.len()
    );
    Ok(extraction)
}

fn list_field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a [Value]> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(other) => Err(GraphError::extraction(format!(
            "{} must be a list, got {}",
            key,
            json_kind(other)
        ))),
    }
}
