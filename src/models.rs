//! Entity model types for the tracker core.

use crate::error::{Error, Result};
use crate::ids::{ProjectId, RecordId, TagId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entity lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The entity is live and shows up in default queries.
    #[default]
    Active,
    /// The entity is kept as an archival record and excluded from default
    /// queries.
    Archived,
}

impl Status {
    /// Parse a status from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatus`] if the string is not a valid status.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }

    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-field update sentinel for optional fields.
///
/// Distinguishes "leave the field as-is" from "clear the field", which a
/// plain `Option` cannot express.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Leave the current value untouched.
    #[default]
    Keep,
    /// Overwrite with a new value.
    Set(T),
    /// Reset the field to absent.
    Clear,
}

impl<T> Patch<T> {
    /// Whether this patch leaves the field untouched.
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    /// Apply the patch to an optional field.
    pub fn apply(self, field: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(value) => *field = Some(value),
            Self::Clear => *field = None,
        }
    }
}

/// A user-defined label attachable to tasks, records and projects.
///
/// Names are not required to be unique; callers dedupe via tag replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique identifier.
    pub id: TagId,
    /// Display name.
    pub name: String,
}

/// A unit of work with an estimate, deadline and completion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Short summary of the work.
    pub summary: String,
    /// Longer free-form description.
    pub description: Option<String>,
    /// Estimated length in minutes.
    pub estimated_length: i64,
    /// Optional hard deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Completion ratio in `[0, 1]`.
    pub completion_ratio: f64,
    /// Lifecycle status.
    pub status: Status,
    /// Optional priority (lower is more important).
    pub priority: Option<i64>,
    /// Attached tag identifiers.
    pub tags: BTreeSet<TagId>,
    /// Optional location the task is tied to.
    pub location: Option<String>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last mutated. Always `>= created_at`; the store is
    /// the sole writer of this field.
    pub updated_at: DateTime<Utc>,
}

/// A logged time-tracking session referencing zero or more tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier.
    pub id: RecordId,
    /// Tasks this session worked on. May be empty.
    pub linked_task_ids: BTreeSet<TaskId>,
    /// Completion ratio reached during the session, in `[0, 1]`.
    pub completion_ratio: f64,
    /// Session start.
    pub begin: DateTime<Utc>,
    /// Session end; absent while the record is still open.
    pub end: Option<DateTime<Utc>>,
    /// Attached tag identifiers.
    pub tags: BTreeSet<TagId>,
    /// Where the session took place.
    pub location: Option<String>,
    /// Free-form note written when closing the session.
    pub commit_message: Option<String>,
}

impl Record {
    /// Whether the record has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

/// A time-boxed container of tasks, positioned in the project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Free-form reference strings (links, citations).
    pub references: Vec<String>,
    /// Span start.
    pub begin: DateTime<Utc>,
    /// Span end. `end - begin` must cover the summed estimates of member
    /// tasks.
    pub end: DateTime<Utc>,
    /// Lifecycle status.
    pub status: Status,
    /// Optional priority (lower is more important).
    pub priority: Option<i64>,
    /// Attached tag identifiers.
    pub tags: BTreeSet<TagId>,
    /// Member tasks, referenced by id (owned by the task store).
    pub task_ids: BTreeSet<TaskId>,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// When the project was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// The project span in whole minutes.
    #[must_use]
    pub fn span_minutes(&self) -> i64 {
        (self.end - self.begin).num_minutes()
    }
}

/// Clamp a completion ratio into `[0, 1]`.
#[must_use]
pub(crate) fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return 0.0;
    }
    ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!(Status::from_str("active").unwrap(), Status::Active);
        assert_eq!(Status::from_str("ARCHIVED").unwrap(), Status::Archived);
        assert!(Status::from_str("open").is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [Status::Active, Status::Archived] {
            assert_eq!(Status::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_patch_apply() {
        let mut field = Some("before".to_string());
        Patch::Keep.apply(&mut field);
        assert_eq!(field.as_deref(), Some("before"));

        Patch::Set("after".to_string()).apply(&mut field);
        assert_eq!(field.as_deref(), Some("after"));

        Patch::<String>::Clear.apply(&mut field);
        assert_eq!(field, None);
    }

    #[test]
    fn test_patch_default_is_keep() {
        assert!(Patch::<i64>::default().is_keep());
    }

    #[test]
    fn test_clamp_ratio() {
        assert_eq!(clamp_ratio(-0.5), 0.0);
        assert_eq!(clamp_ratio(0.5), 0.5);
        assert_eq!(clamp_ratio(1.5), 1.0);
        assert_eq!(clamp_ratio(f64::NAN), 0.0);
    }

    #[test]
    fn test_task_serialization_round_trip() {
        let now = Utc::now();
        let task = Task {
            id: TaskId::from(1),
            summary: "write spec".to_string(),
            description: None,
            estimated_length: 120,
            deadline: None,
            completion_ratio: 0.25,
            status: Status::Active,
            priority: Some(1),
            tags: BTreeSet::from([TagId::from(3)]),
            location: Some("home".to_string()),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_record_is_closed() {
        let mut record = Record {
            id: RecordId::from(1),
            linked_task_ids: BTreeSet::new(),
            completion_ratio: 0.0,
            begin: Utc::now(),
            end: None,
            tags: BTreeSet::new(),
            location: None,
            commit_message: None,
        };
        assert!(!record.is_closed());
        record.end = Some(Utc::now());
        assert!(record.is_closed());
    }

    #[test]
    fn test_project_span_minutes() {
        let begin = Utc::now();
        let project = Project {
            id: ProjectId::from(1),
            name: "p".to_string(),
            references: Vec::new(),
            begin,
            end: begin + chrono::Duration::minutes(90),
            status: Status::Active,
            priority: None,
            tags: BTreeSet::new(),
            task_ids: BTreeSet::new(),
            created_at: begin,
            updated_at: begin,
        };
        assert_eq!(project.span_minutes(), 90);
    }
}
