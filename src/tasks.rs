//! Task store: creation, partial update, cloning and idempotent deletion.

use crate::error::{Error, Result};
use crate::ids::{EntityId, IdIssuer, TagId, TaskId};
use crate::models::{clamp_ratio, Patch, Status, Task};
use crate::storage::{self, TableStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const TABLE: &str = "tasks";
const COUNTER: &str = "tasks";

/// Initial field values for a new task. Unspecified optional fields default
/// to absent/zero.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Short summary of the work.
    pub summary: String,
    /// Longer free-form description.
    pub description: Option<String>,
    /// Estimated length in minutes. Negative values are clamped to zero.
    pub estimated_length: i64,
    /// Optional hard deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Optional priority.
    pub priority: Option<i64>,
    /// Initial tag set. The caller is responsible for registering the
    /// associations with the tag registry.
    pub tags: BTreeSet<TagId>,
    /// Optional location.
    pub location: Option<String>,
}

/// Fields that can be updated on a task.
///
/// `Option` fields use `None` for "leave as-is"; optional entity fields use
/// [`Patch`] so that "clear" and "keep" stay distinguishable.
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate {
    /// New summary (if Some).
    pub summary: Option<String>,
    /// Description patch.
    pub description: Patch<String>,
    /// New estimate in minutes (if Some); negative values are clamped to
    /// zero.
    pub estimated_length: Option<i64>,
    /// Deadline patch.
    pub deadline: Patch<DateTime<Utc>>,
    /// New completion ratio (if Some); clamped to `[0, 1]`.
    pub completion_ratio: Option<f64>,
    /// New status (if Some).
    pub status: Option<Status>,
    /// Priority patch.
    pub priority: Patch<i64>,
    /// Location patch.
    pub location: Patch<String>,
}

impl TaskUpdate {
    /// Check if any fields are set for update.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.description.is_keep()
            && self.estimated_length.is_none()
            && self.deadline.is_keep()
            && self.completion_ratio.is_none()
            && self.status.is_none()
            && self.priority.is_keep()
            && self.location.is_keep()
    }
}

/// Owns all task entities. The sole writer of `updated_at`.
pub struct TaskStore {
    tasks: BTreeMap<TaskId, Task>,
    issuer: IdIssuer<TaskId>,
    store: Arc<dyn TableStore>,
}

impl TaskStore {
    /// Create a task store mirroring to the given table store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing tables cannot be created.
    pub fn new(store: Arc<dyn TableStore>) -> Result<Self> {
        store.create_table(TABLE, storage::ENTITY_COLUMNS)?;
        store.create_table(storage::COUNTERS_TABLE, storage::COUNTER_COLUMNS)?;
        Ok(Self { tasks: BTreeMap::new(), issuer: IdIssuer::new(), store })
    }

    /// Create a new task. `created_at == updated_at == now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn create(&mut self, new: NewTask) -> Result<TaskId> {
        let id = self.issuer.next();
        let now = Utc::now();
        let task = Task {
            id,
            summary: new.summary,
            description: new.description,
            estimated_length: new.estimated_length.max(0),
            deadline: new.deadline,
            completion_ratio: 0.0,
            status: Status::Active,
            priority: new.priority,
            tags: new.tags,
            location: new.location,
            created_at: now,
            updated_at: now,
        };
        self.persist(&task)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        log::debug!("created task {id} ({})", task.summary);
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Apply a partial update, then refresh `updated_at`.
    ///
    /// The mirror is written before the in-memory entity is replaced, so a
    /// failed write leaves the task unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn modify(&mut self, id: TaskId, update: TaskUpdate) -> Result<()> {
        let current = self.tasks.get(&id).ok_or(Error::not_found("task", id.raw()))?;
        if update.is_empty() {
            return Ok(());
        }
        let mut task = current.clone();

        if let Some(summary) = update.summary {
            task.summary = summary;
        }
        update.description.apply(&mut task.description);
        if let Some(estimate) = update.estimated_length {
            task.estimated_length = estimate.max(0);
        }
        update.deadline.apply(&mut task.deadline);
        if let Some(ratio) = update.completion_ratio {
            task.completion_ratio = clamp_ratio(ratio);
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        update.priority.apply(&mut task.priority);
        update.location.apply(&mut task.location);

        // Timestamp refresh is the explicit last step of every mutation.
        task.updated_at = Utc::now();
        self.persist(&task)?;
        self.tasks.insert(id, task);
        Ok(())
    }

    /// Deep-copy a task under a fresh identifier with reset timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn clone_task(&mut self, id: TaskId) -> Result<TaskId> {
        let source = self.tasks.get(&id).ok_or(Error::not_found("task", id.raw()))?.clone();
        let new_id = self.issuer.next();
        let now = Utc::now();
        let clone = Task { id: new_id, created_at: now, updated_at: now, ..source };
        self.persist(&clone)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.tasks.insert(new_id, clone);
        Ok(new_id)
    }

    /// Delete a task. Idempotent: deleting an absent task is a success, so
    /// callers can retry after partial failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn delete(&mut self, id: TaskId) -> Result<()> {
        if self.tasks.contains_key(&id) {
            storage::mark_deleted(self.store.as_ref(), TABLE, id.raw())?;
            self.tasks.remove(&id);
            log::debug!("deleted task {id}");
        }
        Ok(())
    }

    /// Get a task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Iterate all tasks in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Whether a task with this id exists.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Add tags to a task's tag set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn add_tags(&mut self, id: TaskId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| set.extend(tags.iter().copied()))
    }

    /// Remove tags from a task's tag set. Missing tags are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn remove_tags(&mut self, id: TaskId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| {
            for tag in tags {
                set.remove(tag);
            }
        })
    }

    /// Replace a task's tag set wholesale; returns the previous set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn set_tags(&mut self, id: TaskId, tags: BTreeSet<TagId>) -> Result<BTreeSet<TagId>> {
        let mut previous = BTreeSet::new();
        self.mutate_tags(id, |set| previous = std::mem::replace(set, tags))?;
        Ok(previous)
    }

    /// Re-insert a task with a trusted identifier from persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn restore(&mut self, task: Task) -> Result<()> {
        self.issuer.bump_past(task.id);
        self.persist(&task)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.tasks.insert(task.id, task);
        Ok(())
    }

    fn mutate_tags(
        &mut self,
        id: TaskId,
        mutate: impl FnOnce(&mut BTreeSet<TagId>),
    ) -> Result<()> {
        let mut task = self.tasks.get(&id).ok_or(Error::not_found("task", id.raw()))?.clone();
        mutate(&mut task.tags);
        task.updated_at = Utc::now();
        self.persist(&task)?;
        self.tasks.insert(id, task);
        Ok(())
    }

    fn persist(&self, task: &Task) -> Result<()> {
        let body = serde_json::to_string(task)?;
        storage::put_row(self.store.as_ref(), TABLE, task.id.raw(), &body)
    }
}
