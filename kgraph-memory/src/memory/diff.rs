//! Snapshot diffing between extraction runs

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::embedding::{CandidateEntity, CandidateRelationship};
use crate::error::Result;

/// Lower-case hex SHA-256 of the raw memory text
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn candidate_id(entity: &CandidateEntity) -> Option<&str> {
    entity
        .entity_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Collapse candidates sharing an `entity_id`.
///
/// The first occurrence keeps its type, name and summary. Properties of later
/// duplicates are folded in key by key, the later value winning. Candidates
/// without an id are dropped.
pub fn deduplicate_entities(entities: Vec<CandidateEntity>) -> Vec<CandidateEntity> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: BTreeMap<String, CandidateEntity> = BTreeMap::new();

    for entity in entities {
        let Some(id) = candidate_id(&entity).map(str::to_string) else {
            log::warn!("Skipping entity without entity_id");
            continue;
        };
        match seen.get_mut(&id) {
            Some(existing) => existing.properties.extend(entity.properties),
            None => {
                order.push(id.clone());
                seen.insert(id, entity);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| seen.remove(&id))
        .collect()
}

/// Entity changes between two snapshots, each list ordered by entity_id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDiff {
    pub added: Vec<CandidateEntity>,
    pub removed: Vec<CandidateEntity>,
    /// New-side versions of entities whose name, summary or properties changed
    pub modified: Vec<CandidateEntity>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

pub fn compare_entities(old: &[CandidateEntity], new: &[CandidateEntity]) -> EntityDiff {
    let index = |list: &[CandidateEntity]| -> BTreeMap<String, CandidateEntity> {
        list.iter()
            .filter_map(|e| candidate_id(e).map(|id| (id.to_string(), e.clone())))
            .collect()
    };
    let old_by_id = index(old);
    let mut new_by_id = index(new);

    let mut diff = EntityDiff::default();
    for (id, old_entity) in old_by_id {
        match new_by_id.remove(&id) {
            None => diff.removed.push(old_entity),
            Some(new_entity) => {
                if old_entity.name != new_entity.name
                    || old_entity.summary != new_entity.summary
                    || old_entity.properties != new_entity.properties
                {
                    diff.modified.push(new_entity);
                }
            }
        }
    }
    diff.added = new_by_id.into_values().collect();
    diff
}

/// Relationship changes between two snapshots, keyed by (source, target, type)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipDiff {
    pub added: Vec<CandidateRelationship>,
    pub removed: Vec<CandidateRelationship>,
    /// Same key on both sides with a different fact or properties
    pub modified: Vec<CandidateRelationship>,
}

pub fn compare_relationships(
    old: &[CandidateRelationship],
    new: &[CandidateRelationship],
) -> RelationshipDiff {
    let index = |list: &[CandidateRelationship]| {
        let mut by_key = BTreeMap::new();
        for rel in list {
            match rel.key() {
                Some(key) => {
                    by_key.insert(key, rel.clone());
                }
                None => log::warn!("Skipping relationship with missing source, target or type"),
            }
        }
        by_key
    };
    let old_by_key = index(old);
    let mut new_by_key = index(new);

    let mut diff = RelationshipDiff::default();
    for (key, old_rel) in old_by_key {
        match new_by_key.remove(&key) {
            None => diff.removed.push(old_rel),
            Some(new_rel) => {
                if old_rel.fact != new_rel.fact || old_rel.properties != new_rel.properties {
                    diff.modified.push(new_rel);
                }
            }
        }
    }
    diff.added = new_by_key.into_values().collect();
    diff
}

/// Per-item results of a batch that tolerates individual failures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<T>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T: fmt::Debug> BatchOutcome<T> {
    /// File `item` under the result of its operation, passing the value on
    pub fn record<R>(&mut self, item: T, result: Result<R>) -> Option<R> {
        match result {
            Ok(value) => {
                self.succeeded.push(item);
                Some(value)
            }
            Err(e) => {
                log::debug!("Batch item {:?} failed: {}", item, e);
                self.failed.push(item);
                None
            }
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use serde_json::json;

    fn ids(list: &[CandidateEntity]) -> Vec<&str> {
        list.iter().filter_map(|e| e.entity_id.as_deref()).collect()
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(content_hash("hello"), content_hash("hello "));
    }

    #[test]
    fn test_dedupe_first_wins_properties_merge() {
        let first = CandidateEntity::new("a", "User", "First")
            .with_property("x", json!(1))
            .with_property("y", json!(1));
        let dup = CandidateEntity::new("a", "Robot", "Second")
            .with_property("y", json!(2))
            .with_property("z", json!(2));
        let other = CandidateEntity::new("b", "User", "B");
        let anonymous = CandidateEntity {
            name: Some("nobody".into()),
            ..Default::default()
        };

        let out = deduplicate_entities(vec![first, other, dup, anonymous]);
        assert_eq!(ids(&out), vec!["a", "b"]);
        assert_eq!(out[0].name.as_deref(), Some("First"));
        assert_eq!(out[0].entity_type.as_deref(), Some("User"));
        assert_eq!(out[0].properties.get("x"), Some(&json!(1)));
        assert_eq!(out[0].properties.get("y"), Some(&json!(2)));
        assert_eq!(out[0].properties.get("z"), Some(&json!(2)));
    }

    #[test]
    fn test_compare_entities_partitions() {
        let old = vec![
            CandidateEntity::new("a", "T", "A"),
            CandidateEntity::new("b", "T", "B"),
            CandidateEntity::new("c", "T", "C").with_property("k", json!(1)),
        ];
        let new = vec![
            CandidateEntity::new("a", "T", "A").with_summary("changed"),
            CandidateEntity::new("c", "T", "C").with_property("k", json!(1)),
            CandidateEntity::new("d", "T", "D"),
        ];

        let diff = compare_entities(&old, &new);
        assert_eq!(ids(&diff.added), vec!["d"]);
        assert_eq!(ids(&diff.removed), vec!["b"]);
        assert_eq!(ids(&diff.modified), vec!["a"]);
        assert_eq!(diff.modified[0].summary.as_deref(), Some("changed"));

        assert!(compare_entities(&old, &old).is_empty());
    }

    #[test]
    fn test_type_change_is_not_modification() {
        let old = vec![CandidateEntity::new("a", "T", "A")];
        let new = vec![CandidateEntity::new("a", "Other", "A")];
        assert!(compare_entities(&old, &new).is_empty());
    }

    #[test]
    fn test_compare_relationships() {
        let old = vec![
            CandidateRelationship::new("a", "b", "USES").with_fact("a uses b"),
            CandidateRelationship::new("a", "c", "OWNS"),
        ];
        let new = vec![
            CandidateRelationship::new("a", "b", "USES").with_fact("a relies on b"),
            CandidateRelationship::new("a", "c", "MAINTAINS"),
            CandidateRelationship {
                source_entity_id: Some("a".into()),
                ..Default::default()
            },
        ];

        let diff = compare_relationships(&old, &new);
        let keys = |list: &[CandidateRelationship]| {
            list.iter().filter_map(|r| r.key()).map(|k| k.2).collect::<Vec<_>>()
        };
        assert_eq!(keys(&diff.modified), vec!["USES"]);
        assert_eq!(keys(&diff.added), vec!["MAINTAINS"]);
        assert_eq!(keys(&diff.removed), vec!["OWNS"]);
    }

    #[test]
    fn test_batch_outcome_record() {
        let mut outcome = BatchOutcome::default();
        assert_eq!(outcome.record("a".to_string(), Ok(1)), Some(1));
        assert_eq!(
            outcome.record("b".to_string(), Err::<i32, _>(GraphError::validation("bad"))),
            None
        );
        assert_eq!(outcome.succeeded, vec!["a"]);
        assert_eq!(outcome.failed, vec!["b"]);
        assert_eq!(outcome.succeeded_count(), 1);
    }
}
