//! Typed relationships between entities
//!
//! A relationship is keyed by `(group_id, source, target, relationship_type)`.
//! Creating the same key twice merges into the existing edge instead of
//! adding a second one. Both endpoints must be live entities of the group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::entity::{read_for_update, EntityStore};
use crate::error::{GraphError, Result};
use crate::store::{decode, encode, keys, GraphStore};
use crate::temporal::{Lifecycle, SoftDeleteOutcome, ValidityWindow};
use crate::validation::{
    validate_entity_id, validate_group_id, validate_limit, validate_properties,
    validate_relationship_type, Properties, MAX_LIMIT,
};

/// A typed, directed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub group_id: String,

    #[serde(default)]
    pub properties: Properties,

    /// Human-readable statement of the relationship
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact: Option<String>,

    #[serde(flatten)]
    pub window: ValidityWindow,

    #[serde(flatten)]
    pub lifecycle: Lifecycle,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    /// (source, target, type)
    pub fn key(&self) -> (String, String, String) {
        (
            self.source_entity_id.clone(),
            self.target_entity_id.clone(),
            self.relationship_type.clone(),
        )
    }
}

/// Input for [`RelationshipStore::create`]
#[derive(Debug, Clone, Default)]
pub struct NewRelationship {
    pub source_entity_id: Option<String>,
    pub target_entity_id: Option<String>,
    pub relationship_type: Option<String>,
    pub properties: Option<Properties>,
    pub fact: Option<String>,
    pub t_valid: Option<DateTime<Utc>>,
    pub t_invalid: Option<DateTime<Utc>>,
}

impl NewRelationship {
    pub fn new(source: &str, target: &str, rel_type: &str) -> Self {
        Self {
            source_entity_id: Some(source.to_string()),
            target_entity_id: Some(target.to_string()),
            relationship_type: Some(rel_type.to_string()),
            ..Default::default()
        }
    }

    pub fn fact(mut self, fact: &str) -> Self {
        self.fact = Some(fact.to_string());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Which edges of an entity to list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

impl FromStr for Direction {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            "both" => Ok(Self::Both),
            _ => Err(GraphError::validation(format!(
                "direction must be 'incoming', 'outgoing', or 'both', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

/// Query for [`RelationshipStore::list_for_entity`]
#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
    pub direction: Direction,
    /// Restrict to these types; an empty list is rejected
    pub types: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub include_deleted: bool,
}

struct ValidatedKey {
    group_id: String,
    source: String,
    target: String,
    rel_type: String,
}

impl ValidatedKey {
    fn new(
        group_id: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            source: validate_entity_id(source)?,
            target: validate_entity_id(target)?,
            rel_type: validate_relationship_type(rel_type)?,
            group_id: validate_group_id(group_id)?,
        })
    }

    fn record_key(&self) -> Vec<u8> {
        keys::relationship(&self.group_id, &self.source, &self.target, &self.rel_type)
    }

    fn incoming_key(&self) -> Vec<u8> {
        keys::incoming(&self.group_id, &self.target, &self.source, &self.rel_type)
    }

    fn not_found(&self) -> GraphError {
        GraphError::not_found(format!(
            "Relationship {} --[{}]--> {} not found in group {}",
            self.source, self.rel_type, self.target, self.group_id
        ))
    }
}

/// Wrap raw store failures of relationship writes
fn relationship_failure(action: &str, err: GraphError) -> GraphError {
    match err {
        GraphError::Storage(e) => {
            GraphError::relationship(format!("Failed to {} relationship: {}", action, e))
        }
        other => other,
    }
}

/// Relationship CRUD and lifecycle over a [`GraphStore`]
#[derive(Clone)]
pub struct RelationshipStore {
    store: GraphStore,
    entities: EntityStore,
}

impl RelationshipStore {
    pub fn new(store: GraphStore, entities: EntityStore) -> Self {
        Self { store, entities }
    }

    /// Create or merge a relationship.
    ///
    /// Both endpoints are checked under lock before the edge is written. An
    /// existing edge with the same key has its properties, fact and window
    /// overwritten, keeps its `created_at` and is revived if soft-deleted.
    pub fn create(&self, group_id: Option<&str>, new: NewRelationship) -> Result<Relationship> {
        let key = ValidatedKey::new(
            group_id,
            new.source_entity_id.as_deref(),
            new.target_entity_id.as_deref(),
            new.relationship_type.as_deref(),
        )?;
        let properties = validate_properties(new.properties.as_ref())?;
        let window = ValidityWindow::new(new.t_valid, new.t_invalid)?;

        let relationship = self
            .upsert(&key, properties, new.fact, window)
            .map_err(|e| relationship_failure("create", e))?;

        log::info!(
            "Created relationship: {} --[{}]--> {} (group: {})",
            key.source,
            key.rel_type,
            key.target,
            key.group_id
        );
        Ok(relationship)
    }

    fn upsert(
        &self,
        key: &ValidatedKey,
        properties: Properties,
        fact: Option<String>,
        window: ValidityWindow,
    ) -> Result<Relationship> {
        let txn = self.store.transaction();

        let source_live = read_for_update(&txn, &key.group_id, &key.source, false)?
            .is_some_and(|e| !e.is_deleted());
        if !source_live {
            return Err(GraphError::not_found(format!(
                "Source entity with ID '{}' not found in group '{}'",
                key.source, key.group_id
            )));
        }
        let target_live = read_for_update(&txn, &key.group_id, &key.target, false)?
            .is_some_and(|e| !e.is_deleted());
        if !target_live {
            return Err(GraphError::not_found(format!(
                "Target entity with ID '{}' not found in group '{}'",
                key.target, key.group_id
            )));
        }

        let record_key = key.record_key();
        let now = Utc::now();
        let created_at = match txn.get_for_update(&record_key, true)? {
            Some(bytes) => {
                let existing: Relationship = decode(&bytes)?;
                log::debug!(
                    "Merging into existing relationship {} --[{}]--> {}",
                    key.source,
                    key.rel_type,
                    key.target
                );
                existing.created_at
            }
            None => now,
        };

        let relationship = Relationship {
            source_entity_id: key.source.clone(),
            target_entity_id: key.target.clone(),
            relationship_type: key.rel_type.clone(),
            group_id: key.group_id.clone(),
            properties,
            fact,
            window,
            lifecycle: Lifecycle::active(),
            created_at,
            updated_at: now,
        };

        txn.put(&record_key, encode(&relationship)?)?;
        txn.put(key.incoming_key(), b"")?;
        txn.commit()?;
        Ok(relationship)
    }

    /// Relationships touching an entity, ordered by creation time
    pub fn list_for_entity(
        &self,
        group_id: Option<&str>,
        entity_id: Option<&str>,
        query: RelationshipQuery,
    ) -> Result<Vec<Relationship>> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;
        let limit = validate_limit(query.limit, MAX_LIMIT)?;
        let types = match query.types {
            None => None,
            Some(types) if types.is_empty() => {
                return Err(GraphError::validation(
                    "relationship_types cannot be an empty list",
                ))
            }
            Some(types) => {
                let mut validated = Vec::with_capacity(types.len());
                for t in &types {
                    let trimmed = t.trim();
                    if trimmed.is_empty() {
                        return Err(GraphError::validation(
                            "relationship_types must contain non-empty strings",
                        ));
                    }
                    validated.push(trimmed.to_string());
                }
                Some(validated)
            }
        };

        if self.entities.find_live(&group_id, &entity_id)?.is_none() {
            return Err(crate::entity::not_found(&entity_id, &group_id));
        }

        let mut found: BTreeMap<(String, String, String), Relationship> = BTreeMap::new();

        if matches!(query.direction, Direction::Outgoing | Direction::Both) {
            let prefix = keys::outgoing_prefix(&group_id, &entity_id);
            for rel in self.store.scan_records::<Relationship>(&prefix)? {
                found.insert(rel.key(), rel);
            }
        }

        if matches!(query.direction, Direction::Incoming | Direction::Both) {
            let prefix = keys::incoming_prefix(&group_id, &entity_id);
            for key in self.store.scan_keys(&prefix)? {
                if let [source, rel_type] = keys::tail(&key, &prefix).as_slice() {
                    let record_key = keys::relationship(&group_id, source, &entity_id, rel_type);
                    if let Some(rel) = self.store.get::<Relationship>(&record_key)? {
                        found.insert(rel.key(), rel);
                    }
                }
            }
        }

        let mut relationships: Vec<Relationship> = found
            .into_values()
            .filter(|r| query.include_deleted || !r.is_deleted())
            .filter(|r| {
                types
                    .as_ref()
                    .map_or(true, |types| types.contains(&r.relationship_type))
            })
            .collect();
        relationships.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        relationships.truncate(limit);

        log::info!(
            "Retrieved {} relationships for entity {} (direction: {}, group: {})",
            relationships.len(),
            entity_id,
            query.direction,
            group_id
        );
        Ok(relationships)
    }

    /// Fetch one relationship by key
    pub fn get(
        &self,
        group_id: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
        include_deleted: bool,
    ) -> Result<Relationship> {
        let key = ValidatedKey::new(group_id, source, target, rel_type)?;
        match self.store.get::<Relationship>(&key.record_key())? {
            Some(rel) if include_deleted || !rel.is_deleted() => Ok(rel),
            _ => Err(key.not_found()),
        }
    }

    /// Tombstone a relationship. Missing or already-deleted edges succeed.
    pub fn soft_delete(
        &self,
        group_id: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
    ) -> Result<SoftDeleteOutcome> {
        let key = ValidatedKey::new(group_id, source, target, rel_type)?;
        let record_key = key.record_key();

        let txn = self.store.transaction();
        let Some(bytes) = txn.get_for_update(&record_key, true)? else {
            log::warn!(
                "Relationship {} --[{}]--> {} not found in group {}, but deletion is idempotent",
                key.source,
                key.rel_type,
                key.target,
                key.group_id
            );
            return Ok(SoftDeleteOutcome::missing());
        };

        let mut relationship: Relationship = decode(&bytes)?;
        if relationship.is_deleted() {
            return Ok(SoftDeleteOutcome {
                deleted_at: relationship.lifecycle.deleted_at,
                already_deleted: true,
            });
        }

        let deleted_at = relationship.lifecycle.soft_delete();
        txn.put(&record_key, encode(&relationship)?)?;
        txn.commit()
            .map_err(|e| relationship_failure("delete", e.into()))?;

        log::info!(
            "Soft deleted relationship: {} --[{}]--> {} (group: {})",
            key.source,
            key.rel_type,
            key.target,
            key.group_id
        );
        Ok(SoftDeleteOutcome {
            deleted_at: Some(deleted_at),
            already_deleted: false,
        })
    }

    /// Clear the tombstone of a soft-deleted relationship
    pub fn restore(
        &self,
        group_id: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
    ) -> Result<Relationship> {
        let key = ValidatedKey::new(group_id, source, target, rel_type)?;
        let record_key = key.record_key();

        let txn = self.store.transaction();
        let Some(bytes) = txn.get_for_update(&record_key, true)? else {
            return Err(key.not_found());
        };
        let mut relationship: Relationship = decode(&bytes)?;
        if !relationship.lifecycle.restore() {
            return Err(GraphError::not_found(format!(
                "Relationship {} --[{}]--> {} is not deleted in group {}",
                key.source, key.rel_type, key.target, key.group_id
            )));
        }
        relationship.updated_at = Utc::now();
        txn.put(&record_key, encode(&relationship)?)?;
        txn.commit()
            .map_err(|e| relationship_failure("restore", e.into()))?;

        log::info!(
            "Restored relationship: {} --[{}]--> {} (group: {})",
            key.source,
            key.rel_type,
            key.target,
            key.group_id
        );
        Ok(relationship)
    }

    /// Permanently remove a relationship; endpoints are untouched
    pub fn hard_delete(
        &self,
        group_id: Option<&str>,
        source: Option<&str>,
        target: Option<&str>,
        rel_type: Option<&str>,
    ) -> Result<()> {
        let key = ValidatedKey::new(group_id, source, target, rel_type)?;
        let record_key = key.record_key();

        let txn = self.store.transaction();
        if txn.get_for_update(&record_key, true)?.is_none() {
            return Err(key.not_found());
        }
        txn.delete(&record_key)?;
        txn.delete(key.incoming_key())?;
        txn.commit()
            .map_err(|e| relationship_failure("delete", e.into()))?;

        log::info!(
            "Hard deleted relationship: {} --[{}]--> {} (group: {})",
            key.source,
            key.rel_type,
            key.target,
            key.group_id
        );
        Ok(())
    }
}
