//! Lifecycle flags and validity windows
//!
//! Entities and relationships share the same tombstone model:
//! - **Active**: `_deleted == false`
//! - **Soft-deleted**: `_deleted == true` with the time of deletion
//!
//! Hard deletion is physical removal and has no representation here.
//! Relationships additionally carry a real-world validity window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Soft-delete state shared by entities and relationships
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Tombstone flag
    #[serde(rename = "_deleted", default)]
    pub deleted: bool,

    /// When the record was soft-deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lifecycle {
    /// Lifecycle of a freshly created record
    pub fn active() -> Self {
        Self::default()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Tombstone the record.
    ///
    /// Repeated calls keep the first deletion time and return it, so retried
    /// requests observe the same `deleted_at`.
    pub fn soft_delete(&mut self) -> DateTime<Utc> {
        if self.deleted {
            if let Some(at) = self.deleted_at {
                return at;
            }
        }
        let now = Utc::now();
        self.deleted = true;
        self.deleted_at = Some(now);
        now
    }

    /// Clear the tombstone. Returns false if the record was not soft-deleted.
    pub fn restore(&mut self) -> bool {
        if !self.deleted {
            return false;
        }
        self.deleted = false;
        self.deleted_at = None;
        true
    }
}

/// Result of a soft-delete request
///
/// `already_deleted` is set when the record was missing or already
/// tombstoned; neither case is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftDeleteOutcome {
    pub deleted_at: Option<DateTime<Utc>>,
    pub already_deleted: bool,
}

impl SoftDeleteOutcome {
    pub fn missing() -> Self {
        Self {
            deleted_at: None,
            already_deleted: true,
        }
    }
}

/// Real-world validity window of a relationship
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// When the fact became true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_valid: Option<DateTime<Utc>>,

    /// When the fact ceased to be true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_invalid: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// Build a window, rejecting one that ends before it starts
    pub fn new(t_valid: Option<DateTime<Utc>>, t_invalid: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(start), Some(end)) = (t_valid, t_invalid) {
            if end < start {
                return Err(GraphError::validation(format!(
                    "t_invalid ({}) is earlier than t_valid ({})",
                    end.to_rfc3339(),
                    start.to_rfc3339()
                )));
            }
        }
        Ok(Self { t_valid, t_invalid })
    }

    /// Check if the fact held at a specific point in time
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        let started = self.t_valid.map_or(true, |start| start <= time);
        let not_ended = self.t_invalid.map_or(true, |end| end > time);
        started && not_ended
    }

    pub fn is_unbounded(&self) -> bool {
        self.t_valid.is_none() && self.t_invalid.is_none()
    }
}

/// Parse an RFC 3339 timestamp supplied at the tool boundary
pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            GraphError::type_mismatch(format!(
                "{} must be an RFC 3339 timestamp, got '{}': {}",
                field, value, e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_active() {
        let life = Lifecycle::active();
        assert!(!life.is_deleted());
        assert!(life.deleted_at.is_none());
    }

    #[test]
    fn test_soft_delete_is_idempotent() {
        let mut life = Lifecycle::active();
        let first = life.soft_delete();
        let second = life.soft_delete();
        assert_eq!(first, second);
        assert!(life.is_deleted());
    }

    #[test]
    fn test_restore() {
        let mut life = Lifecycle::active();
        assert!(!life.restore());

        life.soft_delete();
        assert!(life.restore());
        assert!(!life.is_deleted());
        assert!(life.deleted_at.is_none());
    }

    #[test]
    fn test_lifecycle_wire_names() {
        let mut life = Lifecycle::active();
        life.soft_delete();
        let json = serde_json::to_value(&life).unwrap();
        assert_eq!(json["_deleted"], serde_json::json!(true));
        assert!(json.get("deleted_at").is_some());

        let active = serde_json::to_value(Lifecycle::active()).unwrap();
        assert!(active.get("deleted_at").is_none());
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let now = Utc::now();
        let err = ValidityWindow::new(Some(now), Some(now - Duration::hours(1))).unwrap_err();
        assert_eq!(err.error_type(), "ValidationError");
        assert!(ValidityWindow::new(Some(now), Some(now)).is_ok());
    }

    #[test]
    fn test_window_is_valid_at() {
        let now = Utc::now();
        let window =
            ValidityWindow::new(Some(now - Duration::hours(2)), Some(now - Duration::hours(1)))
                .unwrap();
        assert!(window.is_valid_at(now - Duration::minutes(90)));
        assert!(!window.is_valid_at(now));
        assert!(!window.is_valid_at(now - Duration::hours(3)));

        assert!(ValidityWindow::default().is_valid_at(now));
        assert!(ValidityWindow::default().is_unbounded());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("t_valid", "2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let err = parse_timestamp("t_valid", "yesterday").unwrap_err();
        assert_eq!(err.error_type(), "TypeMismatchError");
    }
}
