//! Semantic entity search
//!
//! Ranks live entities of a group against a query embedding by cosine
//! similarity. Entities that were never successfully embedded are not
//! candidates.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::embedding::VectorEngine;
use crate::entity::{Entity, EntityStore};
use crate::error::{GraphError, Result};
use crate::validation::{validate_entity_type, validate_group_id};

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const MAX_SEARCH_RESULTS: usize = 100;

/// A ranked search hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub entity: Entity,
    pub score: f32,
}

/// Cosine similarity clamped into `[0, 1]`.
///
/// Zero-norm vectors and vectors of different length score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

fn validate_max_results(max_results: Option<i64>) -> Result<usize> {
    let Some(n) = max_results else {
        return Ok(DEFAULT_MAX_RESULTS);
    };
    if n < 1 || n as u64 > MAX_SEARCH_RESULTS as u64 {
        return Err(GraphError::validation(format!(
            "max_results must be between 1 and {}, got {}",
            MAX_SEARCH_RESULTS, n
        )));
    }
    Ok(n as usize)
}

/// Vector search over stored entity embeddings
pub struct EntitySearch {
    entities: EntityStore,
    engine: Arc<VectorEngine>,
}

impl EntitySearch {
    pub fn new(entities: EntityStore, engine: Arc<VectorEngine>) -> Self {
        Self { entities, engine }
    }

    /// Rank entities against `query`, best first
    pub async fn search(
        &self,
        group_id: Option<&str>,
        query: Option<&str>,
        max_results: Option<i64>,
        entity_types: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        let query = match query.map(str::trim) {
            None => return Err(GraphError::required("query is required")),
            Some("") => return Err(GraphError::required("query cannot be empty")),
            Some(q) => q.to_string(),
        };
        let group_id = validate_group_id(group_id)?;
        let max_results = validate_max_results(max_results)?;
        let types = match entity_types {
            Some(types) if !types.is_empty() => {
                let mut set = BTreeSet::new();
                for t in types {
                    set.insert(validate_entity_type(Some(t))?);
                }
                Some(set)
            }
            _ => None,
        };

        let query_vector = self.engine.embed(&query).await?;

        let mut results = Vec::new();
        for entity in self.entities.list_live(&group_id)? {
            if let Some(types) = &types {
                if !types.contains(&entity.entity_type) {
                    continue;
                }
            }
            let Some(vector) = self.entities.vector(&group_id, &entity.entity_id)? else {
                continue;
            };
            let score = cosine_similarity(&query_vector, &vector);
            results.push(SearchResult { entity, score });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(max_results);

        log::info!(
            "Search '{}' returned {} results (group: {})",
            query,
            results.len(),
            group_id
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewEntity;
    use crate::testing::fixture;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_cosine_identical_and_symmetric() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let w = [1.0, 0.5, 0.25];
        assert_eq!(cosine_similarity(&v, &w), cosine_similarity(&w, &v));
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let fx = fixture();
        let search = EntitySearch::new(fx.entities.clone(), fx.engine.clone());
        fx.entities
            .create(Some("g"), NewEntity::new("auth", "Module", "authentication service login"))
            .await
            .unwrap();
        fx.entities
            .create(Some("g"), NewEntity::new("bill", "Module", "billing invoices"))
            .await
            .unwrap();
        fx.entities
            .create(Some("g"), NewEntity::new("ann", "User", "authentication login owner"))
            .await
            .unwrap();
        fx.entities.soft_delete(Some("g"), Some("ann")).unwrap();

        let results = search
            .search(Some("g"), Some("authentication login"), None, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].entity.entity_id, "auth");
        assert!(results[0].score >= results[1].score);

        let only_users = search
            .search(Some("g"), Some("login"), None, Some(&["User".to_string()]))
            .await
            .unwrap();
        assert!(only_users.is_empty());

        let one = search
            .search(Some("g"), Some("login"), Some(1), None)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_unembedded_entities_excluded() {
        let fx = fixture();
        let search = EntitySearch::new(fx.entities.clone(), fx.engine.clone());
        fx.embedder.fail.store(true, Ordering::SeqCst);
        fx.entities
            .create(Some("g"), NewEntity::new("e", "T", "ghost"))
            .await
            .unwrap();
        fx.embedder.fail.store(false, Ordering::SeqCst);

        let results = search
            .search(Some("g"), Some("ghost"), None, None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_argument_validation() {
        let fx = fixture();
        let search = EntitySearch::new(fx.entities.clone(), fx.engine.clone());

        let err = search.search(Some("g"), Some("  "), None, None).await.unwrap_err();
        assert_eq!(err.error_type(), "RequiredFieldError");
        for bad in [0, 101] {
            let err = search
                .search(Some("g"), Some("q"), Some(bad), None)
                .await
                .unwrap_err();
            assert_eq!(err.error_type(), "ValidationError");
        }
    }
}
