//! Entity records and their lifecycle
//!
//! An entity is identified by `(group_id, entity_id)`. Creation never
//! overwrites a live record; soft-deleted records stay readable with
//! `include_deleted` until restored or hard-deleted.

use chrono::{DateTime, Utc};
use rocksdb::{Transaction, TransactionDB};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::VectorEngine;
use crate::error::{GraphError, Result};
use crate::store::{decode, encode, keys, map_conflict, GraphStore};
use crate::temporal::{Lifecycle, SoftDeleteOutcome};
use crate::validation::{
    validate_entity_id, validate_entity_type, validate_episode_uuid, validate_group_id,
    validate_limit, validate_name, validate_properties, Properties,
};

/// Default page size for [`EntityStore::list_by_type`]
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// A typed node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub entity_type: String,
    pub name: String,
    pub group_id: String,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub properties: Properties,

    /// Memory that produced this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_uuid: Option<String>,

    /// Content hash of the memory text, set on the episode anchor only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_content_hash: Option<String>,

    /// Episode name, set on the episode anchor only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_name: Option<String>,

    #[serde(flatten)]
    pub lifecycle: Lifecycle,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Stored separately under `vec:`; populated only when freshly generated
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Entity {
    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }
}

/// Input for [`EntityStore::create`]
#[derive(Debug, Clone, Default)]
pub struct NewEntity {
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub properties: Option<Properties>,
    pub episode_uuid: Option<String>,
    pub episode_content_hash: Option<String>,
    pub episode_name: Option<String>,
}

impl NewEntity {
    pub fn new(entity_id: &str, entity_type: &str, name: &str) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            entity_type: Some(entity_type.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn episode(mut self, uuid: &str) -> Self {
        self.episode_uuid = Some(uuid.to_string());
        self
    }
}

/// Tri-state optional field for partial updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Field not supplied; keep the stored value
    #[default]
    Unset,
    /// Explicit null; clear the stored value
    Clear,
    /// Replace the stored value
    Set(T),
}

impl<T> Patch<T> {
    /// Apply to a stored optional value
    pub fn apply(self, current: &mut Option<T>) {
        match self {
            Patch::Unset => {}
            Patch::Clear => *current = None,
            Patch::Set(value) => *current = Some(value),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Patch::Unset)
    }
}

impl<T> From<Option<T>> for Patch<T> {
    /// `Some` sets, `None` clears
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Patch::Set(v),
            None => Patch::Clear,
        }
    }
}

/// Input for [`EntityStore::update`]
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub summary: Patch<String>,
    /// Replaces the whole property map when supplied
    pub properties: Option<Properties>,
}

pub(crate) fn not_found(entity_id: &str, group_id: &str) -> GraphError {
    GraphError::not_found(format!(
        "Entity with ID '{}' not found in group '{}'",
        entity_id, group_id
    ))
}

/// Read an entity inside a transaction, locking its key
pub(crate) fn read_for_update(
    txn: &Transaction<'_, TransactionDB>,
    group_id: &str,
    entity_id: &str,
    exclusive: bool,
) -> Result<Option<Entity>> {
    match txn.get_for_update(keys::entity(group_id, entity_id), exclusive)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn write_index_keys(txn: &Transaction<'_, TransactionDB>, entity: &Entity) -> Result<()> {
    txn.put(
        keys::type_index(&entity.group_id, &entity.entity_type, &entity.entity_id),
        b"",
    )?;
    if let Some(uuid) = &entity.episode_uuid {
        txn.put(
            keys::episode_index(&entity.group_id, uuid, &entity.entity_id),
            b"",
        )?;
    }
    Ok(())
}

fn remove_entity_keys(txn: &Transaction<'_, TransactionDB>, entity: &Entity) -> Result<()> {
    txn.delete(keys::entity(&entity.group_id, &entity.entity_id))?;
    txn.delete(keys::vector(&entity.group_id, &entity.entity_id))?;
    txn.delete(keys::type_index(
        &entity.group_id,
        &entity.entity_type,
        &entity.entity_id,
    ))?;
    if let Some(uuid) = &entity.episode_uuid {
        txn.delete(keys::episode_index(&entity.group_id, uuid, &entity.entity_id))?;
    }
    Ok(())
}

/// Entity CRUD and lifecycle over a [`GraphStore`]
#[derive(Clone)]
pub struct EntityStore {
    store: GraphStore,
    engine: Arc<VectorEngine>,
}

impl EntityStore {
    pub fn new(store: GraphStore, engine: Arc<VectorEngine>) -> Self {
        Self { store, engine }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Create an entity and attach its embedding.
    ///
    /// Fails with `DuplicateEntityError` when a live entity with the same id
    /// exists in the group. A soft-deleted record is replaced. Embedding
    /// failures are logged and the entity is kept without a vector.
    pub async fn create(&self, group_id: Option<&str>, new: NewEntity) -> Result<Entity> {
        let entity_id = validate_entity_id(new.entity_id.as_deref())?;
        let entity_type = validate_entity_type(new.entity_type.as_deref())?;
        let name = validate_name(new.name.as_deref())?;
        let properties = validate_properties(new.properties.as_ref())?;
        let group_id = validate_group_id(group_id)?;
        let episode_uuid = match non_blank(new.episode_uuid) {
            Some(uuid) => Some(validate_episode_uuid(Some(&uuid))?),
            None => None,
        };

        let now = Utc::now();
        let mut entity = Entity {
            entity_id,
            entity_type,
            name,
            group_id,
            summary: new.summary,
            properties,
            episode_uuid,
            episode_content_hash: new.episode_content_hash,
            episode_name: new.episode_name,
            lifecycle: Lifecycle::active(),
            created_at: now,
            updated_at: now,
            embedding: None,
        };

        self.insert(&entity)?;
        log::info!(
            "Created entity: {} (type: {}, group: {})",
            entity.entity_id,
            entity.entity_type,
            entity.group_id
        );

        self.refresh_embedding(&mut entity).await;
        Ok(entity)
    }

    fn insert(&self, entity: &Entity) -> Result<()> {
        let duplicate = || {
            format!(
                "Entity with ID '{}' already exists in group '{}'",
                entity.entity_id, entity.group_id
            )
        };

        let key = keys::entity(&entity.group_id, &entity.entity_id);
        let txn = self.store.transaction();
        let existing = txn
            .get_for_update(&key, true)
            .map_err(|e| map_conflict(e, duplicate))?;

        if let Some(bytes) = existing {
            let previous: Entity = decode(&bytes)?;
            if !previous.is_deleted() {
                log::warn!(
                    "Duplicate entity {} in group {}",
                    entity.entity_id,
                    entity.group_id
                );
                return Err(GraphError::DuplicateEntity(duplicate()));
            }
            log::debug!(
                "Replacing soft-deleted entity {} in group {}",
                entity.entity_id,
                entity.group_id
            );
            remove_entity_keys(&txn, &previous)?;
        }

        txn.put(&key, encode(entity)?)?;
        write_index_keys(&txn, entity)?;
        txn.commit().map_err(|e| map_conflict(e, duplicate))?;
        Ok(())
    }

    /// Regenerate and persist the embedding; failures are logged only
    async fn refresh_embedding(&self, entity: &mut Entity) {
        let vector = match self
            .engine
            .embed_entity(&entity.name, entity.summary.as_deref())
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                log::warn!(
                    "Failed to generate embedding for entity {}: {}",
                    entity.entity_id,
                    e
                );
                return;
            }
        };

        match self.attach_vector(&entity.group_id, &entity.entity_id, &vector) {
            Ok(()) => {
                log::debug!("Stored embedding for entity: {}", entity.entity_id);
                entity.embedding = Some(vector);
            }
            Err(e) => log::warn!(
                "Failed to store embedding for entity {}: {}",
                entity.entity_id,
                e
            ),
        }
    }

    /// Write a vector only if the entity still exists
    fn attach_vector(&self, group_id: &str, entity_id: &str, vector: &[f32]) -> Result<()> {
        let txn = self.store.transaction();
        if read_for_update(&txn, group_id, entity_id, false)?.is_some() {
            txn.put(keys::vector(group_id, entity_id), bincode::serialize(vector)?)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Fetch an entity. Soft-deleted entities are `NotFoundError` unless
    /// `include_deleted` is set.
    pub fn get(
        &self,
        group_id: Option<&str>,
        entity_id: Option<&str>,
        include_deleted: bool,
    ) -> Result<Entity> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;

        match self.store.get::<Entity>(&keys::entity(&group_id, &entity_id))? {
            Some(entity) if include_deleted || !entity.is_deleted() => Ok(entity),
            _ => Err(not_found(&entity_id, &group_id)),
        }
    }

    /// Live entity lookup by already-validated ids
    pub(crate) fn find_live(&self, group_id: &str, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self
            .store
            .get::<Entity>(&keys::entity(group_id, entity_id))?
            .filter(|e| !e.is_deleted()))
    }

    /// Stored embedding of an entity, if one was ever generated
    pub fn vector(&self, group_id: &str, entity_id: &str) -> Result<Option<Vec<f32>>> {
        self.store.get_vector(&keys::vector(group_id, entity_id))
    }

    /// Live entities of one type, ordered by entity_id
    pub fn list_by_type(
        &self,
        group_id: Option<&str>,
        entity_type: Option<&str>,
        limit: Option<i64>,
        offset: Option<usize>,
    ) -> Result<Vec<Entity>> {
        let entity_type = validate_entity_type(entity_type)?;
        let group_id = validate_group_id(group_id)?;
        let limit = validate_limit(limit, DEFAULT_LIST_LIMIT)?;
        let offset = offset.unwrap_or(0);

        let prefix = keys::type_prefix(&group_id, &entity_type);
        let mut entities = Vec::new();
        let mut skipped = 0;
        for key in self.store.scan_keys(&prefix)? {
            let Some(entity_id) = keys::tail(&key, &prefix).into_iter().next() else {
                continue;
            };
            let Some(entity) = self.find_live(&group_id, &entity_id)? else {
                continue;
            };
            if skipped < offset {
                skipped += 1;
                continue;
            }
            entities.push(entity);
            if entities.len() >= limit {
                break;
            }
        }
        Ok(entities)
    }

    /// Every live entity in a group, ordered by entity_id
    pub fn list_live(&self, group_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .store
            .scan_records::<Entity>(&keys::entity_prefix(group_id))?
            .into_iter()
            .filter(|e| !e.is_deleted())
            .collect())
    }

    /// Live entities tagged with an episode uuid, ordered by entity_id
    pub fn list_by_episode(&self, group_id: &str, episode_uuid: &str) -> Result<Vec<Entity>> {
        let prefix = keys::episode_prefix(group_id, episode_uuid);
        let mut entities = Vec::new();
        for key in self.store.scan_keys(&prefix)? {
            if let Some(entity_id) = keys::tail(&key, &prefix).into_iter().next() {
                if let Some(entity) = self.find_live(group_id, &entity_id)? {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }

    /// Partial update. Supplied properties replace the whole map. The
    /// embedding is regenerated only when name or summary actually changed.
    pub async fn update(
        &self,
        group_id: Option<&str>,
        entity_id: Option<&str>,
        update: EntityUpdate,
    ) -> Result<Entity> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;
        let name = match update.name.as_deref() {
            Some(name) => Some(validate_name(Some(name))?),
            None => None,
        };
        let properties = match update.properties.as_ref() {
            Some(properties) => Some(validate_properties(Some(properties))?),
            None => None,
        };

        let (mut entity, text_changed) =
            self.apply_update(&group_id, &entity_id, name, update.summary, properties)?;
        log::info!("Updated entity: {} (group: {})", entity_id, group_id);

        if text_changed {
            self.refresh_embedding(&mut entity).await;
        } else {
            log::debug!("Name and summary unchanged for {}; keeping embedding", entity_id);
        }
        Ok(entity)
    }

    fn apply_update(
        &self,
        group_id: &str,
        entity_id: &str,
        name: Option<String>,
        summary: Patch<String>,
        properties: Option<Properties>,
    ) -> Result<(Entity, bool)> {
        let txn = self.store.transaction();
        let mut entity = match read_for_update(&txn, group_id, entity_id, true)? {
            Some(entity) if !entity.is_deleted() => entity,
            _ => return Err(not_found(entity_id, group_id)),
        };

        let old_name = entity.name.clone();
        let old_summary = entity.summary.clone();

        if let Some(name) = name {
            entity.name = name;
        }
        summary.apply(&mut entity.summary);
        if let Some(properties) = properties {
            entity.properties = properties;
        }
        entity.updated_at = Utc::now();

        txn.put(keys::entity(group_id, entity_id), encode(&entity)?)?;
        txn.commit()?;

        let text_changed = old_name != entity.name || old_summary != entity.summary;
        Ok((entity, text_changed))
    }

    /// Stamp the episode anchor fields on a live entity.
    ///
    /// Every other entity of the episode, tombstones included, loses its
    /// stamp in the same transaction, so at most one record carries one.
    pub fn set_episode_anchor(
        &self,
        group_id: &str,
        episode_uuid: &str,
        entity_id: &str,
        content_hash: &str,
        episode_name: Option<&str>,
    ) -> Result<()> {
        let txn = self.store.transaction();
        let mut entity = match read_for_update(&txn, group_id, entity_id, true)? {
            Some(entity) if !entity.is_deleted() => entity,
            _ => return Err(not_found(entity_id, group_id)),
        };

        let prefix = keys::episode_prefix(group_id, episode_uuid);
        for key in self.store.scan_keys(&prefix)? {
            let Some(other_id) = keys::tail(&key, &prefix).into_iter().next() else {
                continue;
            };
            if other_id == entity_id {
                continue;
            }
            if let Some(mut other) = read_for_update(&txn, group_id, &other_id, true)? {
                if other.episode_content_hash.is_some() || other.episode_name.is_some() {
                    other.episode_content_hash = None;
                    other.episode_name = None;
                    txn.put(keys::entity(group_id, &other_id), encode(&other)?)?;
                }
            }
        }

        entity.episode_content_hash = Some(content_hash.to_string());
        if let Some(name) = episode_name {
            entity.episode_name = Some(name.to_string());
        }
        txn.put(keys::entity(group_id, entity_id), encode(&entity)?)?;
        txn.commit()?;
        Ok(())
    }

    /// Tombstone an entity. Missing or already-deleted entities succeed;
    /// a repeat call returns the original `deleted_at`.
    pub fn soft_delete(
        &self,
        group_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<SoftDeleteOutcome> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;

        let txn = self.store.transaction();
        let Some(mut entity) = read_for_update(&txn, &group_id, &entity_id, true)? else {
            log::warn!(
                "Entity {} not found in group {}, but deletion is idempotent, so returning success",
                entity_id,
                group_id
            );
            return Ok(SoftDeleteOutcome::missing());
        };

        if entity.is_deleted() {
            return Ok(SoftDeleteOutcome {
                deleted_at: entity.lifecycle.deleted_at,
                already_deleted: true,
            });
        }

        let deleted_at = entity.lifecycle.soft_delete();
        txn.put(keys::entity(&group_id, &entity_id), encode(&entity)?)?;
        txn.commit()?;

        log::info!("Soft deleted entity: {} (group: {})", entity_id, group_id);
        Ok(SoftDeleteOutcome {
            deleted_at: Some(deleted_at),
            already_deleted: false,
        })
    }

    /// Permanently remove an entity and every incident relationship.
    ///
    /// Returns the number of relationships removed.
    pub fn hard_delete(&self, group_id: Option<&str>, entity_id: Option<&str>) -> Result<usize> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;

        let txn = self.store.transaction();
        let Some(entity) = read_for_update(&txn, &group_id, &entity_id, true)? else {
            return Err(not_found(&entity_id, &group_id));
        };
        remove_entity_keys(&txn, &entity)?;

        let mut removed: HashSet<(String, String, String)> = HashSet::new();

        let outgoing = keys::outgoing_prefix(&group_id, &entity_id);
        for key in self.store.scan_keys(&outgoing)? {
            if let [target, rel_type] = keys::tail(&key, &outgoing).as_slice() {
                removed.insert((entity_id.clone(), target.clone(), rel_type.clone()));
            }
        }
        let incoming = keys::incoming_prefix(&group_id, &entity_id);
        for key in self.store.scan_keys(&incoming)? {
            if let [source, rel_type] = keys::tail(&key, &incoming).as_slice() {
                removed.insert((source.clone(), entity_id.clone(), rel_type.clone()));
            }
        }

        for (source, target, rel_type) in &removed {
            txn.delete(keys::relationship(&group_id, source, target, rel_type))?;
            txn.delete(keys::incoming(&group_id, target, source, rel_type))?;
        }
        txn.commit()?;

        log::info!(
            "Hard deleted entity: {} (group: {}, {} relationships)",
            entity_id,
            group_id,
            removed.len()
        );
        Ok(removed.len())
    }

    /// Clear the tombstone of a soft-deleted entity
    pub fn restore(&self, group_id: Option<&str>, entity_id: Option<&str>) -> Result<Entity> {
        let entity_id = validate_entity_id(entity_id)?;
        let group_id = validate_group_id(group_id)?;

        let txn = self.store.transaction();
        let Some(mut entity) = read_for_update(&txn, &group_id, &entity_id, true)? else {
            return Err(not_found(&entity_id, &group_id));
        };
        if !entity.lifecycle.restore() {
            return Err(GraphError::not_found(format!(
                "Entity with ID '{}' is not deleted in group '{}'",
                entity_id, group_id
            )));
        }
        entity.updated_at = Utc::now();
        txn.put(keys::entity(&group_id, &entity_id), encode(&entity)?)?;
        txn.commit()?;

        log::info!("Restored entity: {} (group: {})", entity_id, group_id);
        Ok(entity)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio_test::assert_ok;

    fn props(value: serde_json::Value) -> Properties {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrips() {
        let fx = fixture();
        let entities = &fx.entities;
        let created = entities
            .create(
                Some("TeamA"),
                NewEntity::new(" user:1 ", "User", "Ann")
                    .summary("Engineer")
                    .properties(props(json!({"email": "ann@example.com"}))),
            )
            .await
            .unwrap();
        assert_eq!(created.group_id, "teama");
        assert!(created.embedding.is_some());

        let fetched = entities.get(Some("teama"), Some("user:1"), false).unwrap();
        assert_eq!(fetched.entity_id, "user:1");
        assert_eq!(fetched.entity_type, "User");
        assert_eq!(fetched.name, "Ann");
        assert_eq!(fetched.summary.as_deref(), Some("Engineer"));
        assert_eq!(fetched.properties.get("email"), Some(&json!("ann@example.com")));
        assert!(entities.vector("teama", "user:1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_original() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "First"))
            .await
            .unwrap();
        let err = entities
            .create(Some("g"), NewEntity::new("e", "T", "Second"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "DuplicateEntityError");
        assert_eq!(entities.get(Some("g"), Some("e"), false).unwrap().name, "First");
    }

    #[tokio::test]
    async fn test_same_id_in_two_groups() {
        let fx = fixture();
        let entities = &fx.entities;
        assert_ok!(entities.create(Some("a"), NewEntity::new("e", "T", "A")).await);
        assert_ok!(entities.create(Some("b"), NewEntity::new("e", "T", "B")).await);
        assert_eq!(entities.get(Some("b"), Some("e"), false).unwrap().name, "B");
    }

    #[tokio::test]
    async fn test_embedding_failure_does_not_fail_create() {
        let fx = fixture();
        fx.embedder.fail.store(true, Ordering::SeqCst);
        let entity = fx
            .entities
            .create(Some("g"), NewEntity::new("e", "T", "Name"))
            .await
            .unwrap();
        assert!(entity.embedding.is_none());
        assert!(fx.entities.vector("g", "e").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validation_precedes_io() {
        let fx = fixture();
        let entities = &fx.entities;
        let err = entities
            .create(Some("g"), NewEntity::new("e", "T", "  "))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "RequiredFieldError");

        let err = entities
            .create(Some("system"), NewEntity::new("e", "T", "N"))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "ReservedIdentifierError");
    }

    #[tokio::test]
    async fn test_soft_delete_get_restore_cycle() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "N"))
            .await
            .unwrap();

        let first = entities.soft_delete(Some("g"), Some("e")).unwrap();
        assert!(!first.already_deleted);
        let second = entities.soft_delete(Some("g"), Some("e")).unwrap();
        assert_eq!(first.deleted_at, second.deleted_at);
        assert!(second.already_deleted);

        let err = entities.get(Some("g"), Some("e"), false).unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
        let deleted = entities.get(Some("g"), Some("e"), true).unwrap();
        assert!(deleted.lifecycle.deleted);

        entities.restore(Some("g"), Some("e")).unwrap();
        let restored = entities.get(Some("g"), Some("e"), false).unwrap();
        assert!(!restored.lifecycle.deleted);
        assert!(restored.lifecycle.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_missing_is_success() {
        let fx = fixture();
        let entities = &fx.entities;
        let outcome = entities.soft_delete(Some("g"), Some("ghost")).unwrap();
        assert!(outcome.already_deleted);
        assert!(outcome.deleted_at.is_none());
    }

    #[tokio::test]
    async fn test_restore_requires_soft_deleted() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "N"))
            .await
            .unwrap();
        let err = entities.restore(Some("g"), Some("e")).unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
        let err = entities.restore(Some("g"), Some("nope")).unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_hard_delete_is_terminal() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "N"))
            .await
            .unwrap();
        entities.soft_delete(Some("g"), Some("e")).unwrap();
        assert_eq!(entities.hard_delete(Some("g"), Some("e")).unwrap(), 0);

        let err = entities.restore(Some("g"), Some("e")).unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
        let err = entities.hard_delete(Some("g"), Some("e")).unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
        assert!(entities.get(Some("g"), Some("e"), true).is_err());
        assert!(entities.vector("g", "e").unwrap().is_none());
        assert!(entities
            .list_by_type(Some("g"), Some("T"), None, None)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_over_tombstone_replaces_it() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "Old", "Before"))
            .await
            .unwrap();
        entities.soft_delete(Some("g"), Some("e")).unwrap();
        entities
            .create(Some("g"), NewEntity::new("e", "New", "After"))
            .await
            .unwrap();

        let entity = entities.get(Some("g"), Some("e"), false).unwrap();
        assert_eq!(entity.name, "After");
        assert!(entities
            .list_by_type(Some("g"), Some("Old"), None, None)
            .unwrap()
            .is_empty());
        assert_eq!(
            entities
                .list_by_type(Some("g"), Some("New"), None, None)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_by_type_orders_and_pages() {
        let fx = fixture();
        let entities = &fx.entities;
        for id in ["c", "a", "d", "b"] {
            entities
                .create(Some("g"), NewEntity::new(id, "User", id))
                .await
                .unwrap();
        }
        entities
            .create(Some("g"), NewEntity::new("m", "Module", "m"))
            .await
            .unwrap();
        entities.soft_delete(Some("g"), Some("d")).unwrap();

        let ids = |list: Vec<Entity>| list.into_iter().map(|e| e.entity_id).collect::<Vec<_>>();
        assert_eq!(
            ids(entities.list_by_type(Some("g"), Some("User"), None, None).unwrap()),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            ids(entities
                .list_by_type(Some("g"), Some("User"), Some(1), Some(1))
                .unwrap()),
            vec!["b"]
        );

        let err = entities
            .list_by_type(Some("g"), Some("User"), Some(1001), None)
            .unwrap_err();
        assert_eq!(err.error_type(), "ValidationError");
        let err = entities
            .list_by_type(Some("g"), Some("User"), Some(0), None)
            .unwrap_err();
        assert_eq!(err.error_type(), "ValidationError");
    }

    #[tokio::test]
    async fn test_update_replaces_properties() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(
                Some("g"),
                NewEntity::new("e", "T", "N").properties(props(json!({"a": 1, "b": 2}))),
            )
            .await
            .unwrap();

        let updated = entities
            .update(
                Some("g"),
                Some("e"),
                EntityUpdate {
                    properties: Some(props(json!({"c": 3}))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.properties, props(json!({"c": 3})));
        assert_eq!(updated.name, "N");
    }

    #[tokio::test]
    async fn test_update_summary_tri_state() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "N").summary("keep"))
            .await
            .unwrap();

        let unchanged = entities
            .update(Some("g"), Some("e"), EntityUpdate::default())
            .await
            .unwrap();
        assert_eq!(unchanged.summary.as_deref(), Some("keep"));

        let cleared = entities
            .update(
                Some("g"),
                Some("e"),
                EntityUpdate {
                    summary: Patch::Clear,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.summary, None);
    }

    #[tokio::test]
    async fn test_update_regenerates_embedding_only_on_text_change() {
        let fx = fixture();
        fx.entities
            .create(Some("g"), NewEntity::new("e", "T", "Name"))
            .await
            .unwrap();
        fx.engine.clear_cache();
        let before = fx.embedder.calls.load(Ordering::SeqCst);

        fx.entities
            .update(
                Some("g"),
                Some("e"),
                EntityUpdate {
                    name: Some("Name".into()),
                    properties: Some(props(json!({"x": true}))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), before);

        fx.entities
            .update(
                Some("g"),
                Some("e"),
                EntityUpdate {
                    summary: Patch::Set("now described".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_update_soft_deleted_is_not_found() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("e", "T", "N"))
            .await
            .unwrap();
        entities.soft_delete(Some("g"), Some("e")).unwrap();
        let err = entities
            .update(Some("g"), Some("e"), EntityUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_episode_index_and_anchor() {
        let fx = fixture();
        let entities = &fx.entities;
        entities
            .create(Some("g"), NewEntity::new("b", "T", "B").episode("ep-1"))
            .await
            .unwrap();
        entities
            .create(Some("g"), NewEntity::new("a", "T", "A").episode("ep-1"))
            .await
            .unwrap();
        entities
            .create(Some("g"), NewEntity::new("c", "T", "C").episode("ep-2"))
            .await
            .unwrap();

        let ids: Vec<_> = entities
            .list_by_episode("g", "ep-1")
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        entities
            .set_episode_anchor("g", "ep-1", "a", "hash", Some("notes"))
            .unwrap();
        let anchor = entities.get(Some("g"), Some("a"), false).unwrap();
        assert_eq!(anchor.episode_content_hash.as_deref(), Some("hash"));
        assert_eq!(anchor.episode_name.as_deref(), Some("notes"));
        assert!(anchor.properties.is_empty());

        entities.soft_delete(Some("g"), Some("a")).unwrap();
        entities
            .set_episode_anchor("g", "ep-1", "b", "newer", None)
            .unwrap();
        let old = entities.get(Some("g"), Some("a"), true).unwrap();
        assert!(old.episode_content_hash.is_none());
        assert!(old.episode_name.is_none());
        let b = entities.get(Some("g"), Some("b"), false).unwrap();
        assert_eq!(b.episode_content_hash.as_deref(), Some("newer"));

        let err = entities
            .set_episode_anchor("g", "ep-1", "a", "hash", None)
            .unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
    }

    #[test]
    fn test_patch_from_option() {
        assert_eq!(Patch::from(Some(1)), Patch::Set(1));
        assert_eq!(Patch::<i32>::from(None), Patch::Clear);
        assert!(Patch::<i32>::default().is_unset());
    }
}
