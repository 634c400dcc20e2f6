//! Memory ingestion and incremental synchronisation
//!
//! A memory (episode) is a piece of raw text whose extracted entities are
//! tagged with the episode uuid. Exactly one of them, the anchor, carries the
//! content hash of the text it was extracted from, so that re-submitting
//! unchanged text never reaches the extractor.

pub mod diff;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::embedding::{CandidateEntity, CandidateRelationship, Extraction, Extractor};
use crate::entity::{Entity, EntityStore, EntityUpdate, NewEntity, Patch};
use crate::error::{GraphError, Result};
use crate::relationship::{Direction, NewRelationship, RelationshipQuery, RelationshipStore};
use crate::validation::{required_body, required_text, validate_episode_uuid, validate_group_id};

pub use diff::{
    compare_entities, compare_relationships, content_hash, deduplicate_entities, BatchOutcome,
    EntityDiff, RelationshipDiff,
};

/// Content type of a memory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Source {
    #[default]
    Text,
    Json,
    Message,
}

impl FromStr for Source {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "message" => Ok(Self::Message),
            other => Err(GraphError::validation(format!(
                "source must be one of: \"text\", \"json\", \"message\", got \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Message => "message",
        })
    }
}

/// How `update_memory` reconciles new text with the stored episode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Diff against the previous extraction and apply only the delta
    #[default]
    Incremental,
    /// Soft-delete the episode's entities and ingest from scratch
    Replace,
}

impl FromStr for UpdateStrategy {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incremental" => Ok(Self::Incremental),
            "replace" => Ok(Self::Replace),
            other => Err(GraphError::validation(format!(
                "update_strategy must be \"incremental\" or \"replace\", got \"{}\"",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Incremental => "incremental",
            Self::Replace => "replace",
        })
    }
}

/// Arguments of [`MemorySync::add_memory`]
#[derive(Debug, Clone, Default)]
pub struct AddMemory {
    pub name: Option<String>,
    pub episode_body: Option<String>,
    pub source: Option<String>,
    pub source_description: Option<String>,
    pub uuid: Option<String>,
}

impl AddMemory {
    pub fn new(name: &str, episode_body: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            episode_body: Some(episode_body.to_string()),
            ..Default::default()
        }
    }

    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }
}

/// Arguments of [`MemorySync::update_memory`]
#[derive(Debug, Clone, Default)]
pub struct UpdateMemory {
    pub uuid: Option<String>,
    pub episode_body: Option<String>,
    pub name: Option<String>,
    pub source: Option<String>,
    pub source_description: Option<String>,
    pub update_strategy: Option<String>,
}

impl UpdateMemory {
    pub fn new(uuid: &str, episode_body: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            episode_body: Some(episode_body.to_string()),
            ..Default::default()
        }
    }

    pub fn strategy(mut self, strategy: &str) -> Self {
        self.update_strategy = Some(strategy.to_string());
        self
    }
}

/// Edge reported by `add_memory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddMemoryResult {
    pub entities_created: usize,
    pub relationships_created: usize,
    pub entities: Vec<String>,
    pub relationships: Vec<CreatedRelationship>,
    pub entities_failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateMemoryResult {
    pub entities_added: usize,
    pub entities_updated: usize,
    pub entities_removed: usize,
    pub relationships_added: usize,
    pub relationships_updated: usize,
    pub relationships_removed: usize,
}

/// What the graph currently holds for one episode
#[derive(Debug, Clone)]
struct EpisodeSnapshot {
    content_hash: Option<String>,
    episode_name: Option<String>,
    entities: Vec<CandidateEntity>,
    relationships: Vec<CandidateRelationship>,
}

fn parse_source(source: Option<&str>) -> Result<Source> {
    source.map_or(Ok(Source::default()), str::parse::<Source>)
}

/// The live entity carrying the episode stamp, else the oldest live one.
/// Ties are broken by entity_id.
fn anchor_of(entities: &[Entity]) -> Option<&Entity> {
    let oldest = |a: &&Entity, b: &&Entity| {
        (a.created_at, &a.entity_id).cmp(&(b.created_at, &b.entity_id))
    };
    entities
        .iter()
        .filter(|e| e.episode_content_hash.is_some())
        .min_by(oldest)
        .or_else(|| entities.iter().min_by(oldest))
}

fn as_candidate(entity: &Entity) -> CandidateEntity {
    CandidateEntity {
        entity_id: Some(entity.entity_id.clone()),
        entity_type: Some(entity.entity_type.clone()),
        name: Some(entity.name.clone()),
        summary: entity.summary.clone(),
        properties: entity.properties.clone(),
    }
}

fn new_entity(candidate: &CandidateEntity, episode_uuid: Option<&str>) -> NewEntity {
    NewEntity {
        entity_id: candidate.entity_id.clone(),
        entity_type: candidate.entity_type.clone(),
        name: candidate.name.clone(),
        summary: candidate.summary.clone(),
        properties: Some(candidate.properties.clone()),
        episode_uuid: episode_uuid.map(str::to_string),
        ..Default::default()
    }
}

fn new_relationship(candidate: &CandidateRelationship) -> NewRelationship {
    NewRelationship {
        source_entity_id: candidate.source_entity_id.clone(),
        target_entity_id: candidate.target_entity_id.clone(),
        relationship_type: candidate.relationship_type.clone(),
        properties: Some(candidate.properties.clone()),
        fact: candidate.fact.clone(),
        ..Default::default()
    }
}

fn entity_label(candidate: &CandidateEntity) -> String {
    candidate
        .entity_id
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
}

/// Ingests memories and keeps the graph in step with edited text
pub struct MemorySync {
    entities: EntityStore,
    relationships: RelationshipStore,
    extractor: Arc<dyn Extractor>,
}

impl MemorySync {
    pub fn new(
        entities: EntityStore,
        relationships: RelationshipStore,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            entities,
            relationships,
            extractor,
        }
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        self.extractor.extract(text).await.map_err(|e| {
            log::error!("Failed to extract entities/relationships: {}", e);
            match e {
                GraphError::Extraction(_) => e,
                other => GraphError::extraction(other.to_string()),
            }
        })
    }

    /// Extract entities and relationships from `text` and store them.
    ///
    /// Per-item failures are reported in the result; only invalid arguments
    /// and a failed extraction are errors.
    pub async fn add_memory(&self, group_id: Option<&str>, input: AddMemory) -> Result<AddMemoryResult> {
        let name = required_text("name", input.name.as_deref())?;
        let body = required_body("episode_body", input.episode_body.as_deref())?;
        let source = parse_source(input.source.as_deref())?;
        let group = validate_group_id(group_id)?;
        let uuid = match input.uuid.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => Some(validate_episode_uuid(Some(u))?),
            _ => None,
        };

        if let Some(description) = &input.source_description {
            log::debug!("add_memory '{}' ({}): {}", name, source, description);
        }

        let extraction = self.extract(&body).await?;
        let hash = content_hash(&body);
        let result = self
            .ingest(group_id, &group, &name, &hash, uuid.as_deref(), extraction)
            .await;

        log::info!(
            "add_memory completed: {} entities, {} relationships (name: {}, group: {})",
            result.entities_created,
            result.relationships_created,
            name,
            group
        );
        Ok(result)
    }

    async fn ingest(
        &self,
        group_id: Option<&str>,
        group: &str,
        name: &str,
        hash: &str,
        uuid: Option<&str>,
        extraction: Extraction,
    ) -> AddMemoryResult {
        let candidates = deduplicate_entities(extraction.entities);

        let mut entities = BatchOutcome::default();
        let mut anchor = None;
        for candidate in &candidates {
            let created = self
                .entities
                .create(group_id, new_entity(candidate, uuid))
                .await;
            if let Some(entity) = entities.record(entity_label(candidate), created) {
                if anchor.is_none() {
                    anchor = Some(entity.entity_id);
                }
            }
        }

        if let (Some(uuid), Some(anchor)) = (uuid, anchor) {
            if let Err(e) = self
                .entities
                .set_episode_anchor(group, uuid, &anchor, hash, Some(name))
            {
                log::warn!("Failed to stamp memory {} on {}: {}", uuid, anchor, e);
            }
        }

        let mut relationships = BatchOutcome::default();
        for candidate in &extraction.relationships {
            let Some((source, target, relationship_type)) = candidate.key() else {
                log::warn!("Skipping relationship with missing source, target or type: {:?}", candidate);
                continue;
            };

            let endpoints_exist = self.entities.get(group_id, Some(&source), false).is_ok()
                && self.entities.get(group_id, Some(&target), false).is_ok();
            if !endpoints_exist {
                log::warn!(
                    "Skipping relationship {} -> {}: source or target entity not found",
                    source,
                    target
                );
                continue;
            }

            let created = self.relationships.create(group_id, new_relationship(candidate));
            let edge = CreatedRelationship {
                source,
                target,
                relationship_type,
            };
            relationships.record(edge, created);
        }

        AddMemoryResult {
            entities_created: entities.succeeded_count(),
            relationships_created: relationships.succeeded_count(),
            entities: entities.succeeded,
            relationships: relationships.succeeded,
            entities_failed: entities.failed,
        }
    }

    fn snapshot(&self, group_id: Option<&str>, group: &str, uuid: &str) -> Result<Option<EpisodeSnapshot>> {
        let live = self.entities.list_by_episode(group, uuid)?;
        let Some(anchor) = anchor_of(&live) else {
            return Ok(None);
        };

        let mut relationships = BTreeMap::new();
        for entity in &live {
            let query = RelationshipQuery {
                direction: Direction::Both,
                ..Default::default()
            };
            let edges = match self
                .relationships
                .list_for_entity(group_id, Some(&entity.entity_id), query)
            {
                Ok(edges) => edges,
                Err(e) => {
                    log::debug!("Skipping edges of {}: {}", entity.entity_id, e);
                    continue;
                }
            };
            for edge in edges {
                relationships.entry(edge.key()).or_insert_with(|| CandidateRelationship {
                    source_entity_id: Some(edge.source_entity_id.clone()),
                    target_entity_id: Some(edge.target_entity_id.clone()),
                    relationship_type: Some(edge.relationship_type.clone()),
                    fact: edge.fact.clone(),
                    properties: edge.properties.clone(),
                });
            }
        }

        Ok(Some(EpisodeSnapshot {
            content_hash: anchor.episode_content_hash.clone(),
            episode_name: anchor.episode_name.clone(),
            entities: live.iter().map(as_candidate).collect(),
            relationships: relationships.into_values().collect(),
        }))
    }

    /// Reconcile a stored memory with new text.
    ///
    /// Unchanged text (same content hash) returns an all-zero summary without
    /// calling the extractor. Relationships that disappear from the text are
    /// left in place by the incremental strategy.
    pub async fn update_memory(
        &self,
        group_id: Option<&str>,
        input: UpdateMemory,
    ) -> Result<UpdateMemoryResult> {
        let uuid = validate_episode_uuid(input.uuid.as_deref())?;
        let body = required_body("episode_body", input.episode_body.as_deref())?;
        let source = parse_source(input.source.as_deref())?;
        let strategy = input
            .update_strategy
            .as_deref()
            .map_or(Ok(UpdateStrategy::default()), str::parse::<UpdateStrategy>)?;
        let group = validate_group_id(group_id)?;

        let Some(snapshot) = self.snapshot(group_id, &group, &uuid)? else {
            return Err(GraphError::not_found(format!(
                "Memory with UUID '{}' not found in group '{}'",
                uuid, group
            )));
        };

        let new_hash = content_hash(&body);
        if snapshot.content_hash.as_deref() == Some(new_hash.as_str()) {
            log::info!(
                "Content hash matches for UUID '{}', skipping update (no changes)",
                uuid
            );
            return Ok(UpdateMemoryResult::default());
        }

        let result = match strategy {
            UpdateStrategy::Replace => {
                let name = input
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("updated_{}", uuid));
                self.replace(group_id, &uuid, &name, &body, source, snapshot)
                    .await?
            }
            UpdateStrategy::Incremental => {
                let name = input.name.clone().or(snapshot.episode_name.clone());
                self.reconcile(group_id, &group, &uuid, &body, &new_hash, name, snapshot)
                    .await?
            }
        };

        log::info!(
            "update_memory completed (uuid: {}, strategy: {}, group: {}): {} added, {} updated, {} removed",
            uuid,
            strategy,
            group,
            result.entities_added,
            result.entities_updated,
            result.entities_removed
        );
        Ok(result)
    }

    async fn replace(
        &self,
        group_id: Option<&str>,
        uuid: &str,
        name: &str,
        body: &str,
        source: Source,
        snapshot: EpisodeSnapshot,
    ) -> Result<UpdateMemoryResult> {
        let mut removed = BatchOutcome::default();
        for entity in &snapshot.entities {
            let outcome = self
                .entities
                .soft_delete(group_id, entity.entity_id.as_deref());
            removed.record(entity_label(entity), outcome);
        }

        let mut add = AddMemory::new(name, body).uuid(uuid);
        add.source = Some(source.to_string());
        let added = self.add_memory(group_id, add).await?;

        Ok(UpdateMemoryResult {
            entities_added: added.entities_created,
            entities_removed: removed.succeeded_count(),
            relationships_added: added.relationships_created,
            ..Default::default()
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile(
        &self,
        group_id: Option<&str>,
        group: &str,
        uuid: &str,
        body: &str,
        new_hash: &str,
        name: Option<String>,
        snapshot: EpisodeSnapshot,
    ) -> Result<UpdateMemoryResult> {
        let extraction = self.extract(body).await?;
        let new_entities = deduplicate_entities(extraction.entities);

        let entity_diff = compare_entities(&snapshot.entities, &new_entities);
        let rel_diff = compare_relationships(&snapshot.relationships, &extraction.relationships);

        let mut added = BatchOutcome::default();
        for candidate in &entity_diff.added {
            let created = self
                .entities
                .create(group_id, new_entity(candidate, Some(uuid)))
                .await;
            added.record(entity_label(candidate), created);
        }

        let mut updated = BatchOutcome::default();
        for candidate in &entity_diff.modified {
            let update = EntityUpdate {
                name: candidate.name.clone(),
                summary: Patch::from(candidate.summary.clone()),
                properties: Some(candidate.properties.clone()),
            };
            let result = self
                .entities
                .update(group_id, candidate.entity_id.as_deref(), update)
                .await;
            updated.record(entity_label(candidate), result);
        }

        let mut removed = BatchOutcome::default();
        for candidate in &entity_diff.removed {
            let outcome = self
                .entities
                .soft_delete(group_id, candidate.entity_id.as_deref());
            removed.record(entity_label(candidate), outcome);
        }

        let mut rels_added = BatchOutcome::default();
        for candidate in &rel_diff.added {
            let result = self.relationships.create(group_id, new_relationship(candidate));
            rels_added.record(candidate.key(), result);
        }

        let mut rels_updated = BatchOutcome::default();
        for candidate in &rel_diff.modified {
            let result = self.relationships.create(group_id, new_relationship(candidate));
            rels_updated.record(candidate.key(), result);
        }

        if !rel_diff.removed.is_empty() {
            log::debug!(
                "Leaving {} relationships no longer present in memory {} untouched",
                rel_diff.removed.len(),
                uuid
            );
        }

        self.restamp_anchor(group, uuid, new_hash, name.as_deref())?;

        Ok(UpdateMemoryResult {
            entities_added: added.succeeded_count(),
            entities_updated: updated.succeeded_count(),
            entities_removed: removed.succeeded_count(),
            relationships_added: rels_added.succeeded_count(),
            relationships_updated: rels_updated.succeeded_count(),
            relationships_removed: 0,
        })
    }

    /// Record the new content hash on the episode's current anchor
    fn restamp_anchor(&self, group: &str, uuid: &str, hash: &str, name: Option<&str>) -> Result<()> {
        let live = self.entities.list_by_episode(group, uuid)?;
        match anchor_of(&live) {
            Some(anchor) => self
                .entities
                .set_episode_anchor(group, uuid, &anchor.entity_id, hash, name),
            None => {
                log::warn!("Memory {} has no live entities left to anchor its content hash", uuid);
                Ok(())
            }
        }
    }
}
