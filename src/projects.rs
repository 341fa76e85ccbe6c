//! Project store: project entities plus the tree they are arranged in.
//!
//! The store owns both the entities and the [`ProjectTree`]; every tree
//! mutation goes through the store so the mirrored copy stays current.
//! Membership (`task_ids`) is kept by id only; the task entities themselves
//! live in the task store, and cross-store checks such as the span covering
//! the summed task estimates are driven by the facade, which can see both.

use crate::error::{Error, Result};
use crate::ids::{EntityId, IdIssuer, ProjectId, TagId, TaskId};
use crate::models::{Patch, Project, Status};
use crate::storage::{self, TableStore};
use crate::tree::ProjectTree;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const TABLE: &str = "projects";
const TREE_TABLE: &str = "project_tree";
const COUNTER: &str = "projects";

// The tree is mirrored as one JSON row under a fixed key.
const TREE_ROW_ID: u64 = 1;

/// Initial field values for a new project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Display name.
    pub name: String,
    /// Free-form reference strings.
    pub references: Vec<String>,
    /// Span start.
    pub begin: DateTime<Utc>,
    /// Span end.
    pub end: DateTime<Utc>,
    /// Optional priority.
    pub priority: Option<i64>,
    /// Initial tag identifiers.
    pub tags: BTreeSet<TagId>,
}

/// Field updates for an existing project. Span changes go through
/// [`ProjectStore::move_begin`] and [`ProjectStore::set_span`] instead, so
/// that the span invariant is checked.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    /// New name (if Some).
    pub name: Option<String>,
    /// New reference list (if Some).
    pub references: Option<Vec<String>>,
    /// New status (if Some).
    pub status: Option<Status>,
    /// Priority update.
    pub priority: Patch<i64>,
}

impl ProjectUpdate {
    /// Whether this update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.references.is_none()
            && self.status.is_none()
            && self.priority.is_keep()
    }
}

/// Owns all project entities and the project tree.
pub struct ProjectStore {
    projects: BTreeMap<ProjectId, Project>,
    tree: ProjectTree,
    issuer: IdIssuer<ProjectId>,
    store: Arc<dyn TableStore>,
}

impl ProjectStore {
    /// Create a project store mirroring to the given table store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing tables cannot be created.
    pub fn new(store: Arc<dyn TableStore>) -> Result<Self> {
        store.create_table(TABLE, storage::ENTITY_COLUMNS)?;
        store.create_table(TREE_TABLE, storage::ENTITY_COLUMNS)?;
        store.create_table(storage::COUNTERS_TABLE, storage::COUNTER_COLUMNS)?;
        Ok(Self {
            projects: BTreeMap::new(),
            tree: ProjectTree::new(),
            issuer: IdIssuer::new(),
            store,
        })
    }

    /// Create a project. The project starts detached from the tree; callers
    /// attach it separately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `begin > end`.
    pub fn create(&mut self, new: NewProject) -> Result<ProjectId> {
        if new.begin > new.end {
            return Err(Error::InvalidRange { begin: new.begin, end: new.end });
        }

        let id = self.issuer.next();
        let now = Utc::now();
        let project = Project {
            id,
            name: new.name,
            references: new.references,
            begin: new.begin,
            end: new.end,
            status: Status::Active,
            priority: new.priority,
            tags: new.tags,
            task_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };
        self.persist(&project)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        log::debug!("created project {id} ({})", project.name);
        self.projects.insert(id, project);
        Ok(id)
    }

    /// Apply field updates to a project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn modify(&mut self, id: ProjectId, update: ProjectUpdate) -> Result<()> {
        let mut project = self.require(id)?.clone();
        if update.is_empty() {
            return Ok(());
        }

        if let Some(name) = update.name {
            project.name = name;
        }
        if let Some(references) = update.references {
            project.references = references;
        }
        if let Some(status) = update.status {
            project.status = status;
        }
        update.priority.apply(&mut project.priority);

        project.updated_at = Utc::now();
        self.persist(&project)?;
        self.projects.insert(id, project);
        Ok(())
    }

    /// Shift the project span to a new begin, preserving its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn move_begin(&mut self, id: ProjectId, begin: DateTime<Utc>) -> Result<()> {
        let mut project = self.require(id)?.clone();
        let span = project.end - project.begin;
        project.begin = begin;
        project.end = begin + span;
        project.updated_at = Utc::now();
        self.persist(&project)?;
        self.projects.insert(id, project);
        Ok(())
    }

    /// Set a new span. `required_minutes` is the summed estimate of member
    /// tasks, computed by the caller; the new span must cover it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id,
    /// [`Error::InvalidRange`] if `begin > end`, and [`Error::SpanTooShort`]
    /// if the span does not cover `required_minutes`.
    pub fn set_span(
        &mut self,
        id: ProjectId,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        required_minutes: i64,
    ) -> Result<()> {
        if begin > end {
            return Err(Error::InvalidRange { begin, end });
        }
        let span = (end - begin).num_minutes();
        if span < required_minutes {
            return Err(Error::SpanTooShort { span, required: required_minutes });
        }

        let mut project = self.require(id)?.clone();
        project.begin = begin;
        project.end = end;
        project.updated_at = Utc::now();
        self.persist(&project)?;
        self.projects.insert(id, project);
        Ok(())
    }

    /// Add a task to the project's member set. Adding a member twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn add_task(&mut self, id: ProjectId, task_id: TaskId) -> Result<()> {
        let mut project = self.require(id)?.clone();
        if project.task_ids.insert(task_id) {
            project.updated_at = Utc::now();
            self.persist(&project)?;
            self.projects.insert(id, project);
        }
        Ok(())
    }

    /// Remove a task from the project's member set. Missing members are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn remove_task(&mut self, id: ProjectId, task_id: TaskId) -> Result<()> {
        let mut project = self.require(id)?.clone();
        if project.task_ids.remove(&task_id) {
            project.updated_at = Utc::now();
            self.persist(&project)?;
            self.projects.insert(id, project);
        }
        Ok(())
    }

    /// Delete a project entity. Idempotent. The caller must detach the
    /// project from the tree first.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn delete(&mut self, id: ProjectId) -> Result<()> {
        if self.projects.contains_key(&id) {
            storage::mark_deleted(self.store.as_ref(), TABLE, id.raw())?;
            self.projects.remove(&id);
            log::debug!("deleted project {id}");
        }
        Ok(())
    }

    /// Attach an existing project to the tree at `path` (empty path attaches
    /// a new root).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown project, plus the tree's
    /// own [`Error::DuplicateNode`] / [`Error::InvalidPath`] failures.
    pub fn attach(&mut self, id: ProjectId, path: &[ProjectId]) -> Result<()> {
        self.require(id)?;
        self.tree.attach(id, path)?;
        self.persist_tree()
    }

    /// Detach the subtree at `path`, returning the detached ids. The project
    /// entities are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn detach(&mut self, path: &[ProjectId]) -> Result<Vec<ProjectId>> {
        let ids = self.tree.detach(path)?;
        self.persist_tree()?;
        Ok(ids)
    }

    /// Move the subtree at `path` under the node at `target_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] or [`Error::CyclicMove`]; the tree is
    /// unchanged on failure.
    pub fn move_subtree(&mut self, path: &[ProjectId], target_path: &[ProjectId]) -> Result<()> {
        self.tree.move_subtree(path, target_path)?;
        self.persist_tree()
    }

    /// Render the subtree at `path` (whole forest for an empty path) as an
    /// indented listing of project names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn render_tree(&self, path: &[ProjectId], show_ids: bool) -> Result<String> {
        self.tree.render(path, show_ids, &|id| {
            self.projects.get(&id).map_or_else(|| format!("#{id}"), |p| p.name.clone())
        })
    }

    /// Whether the project is attached anywhere in the tree.
    #[must_use]
    pub fn is_attached(&self, id: ProjectId) -> bool {
        self.tree.contains(id)
    }

    /// The ids of the subtree rooted at `id` (the id itself first), or
    /// `None` when the project is not attached.
    #[must_use]
    pub fn subtree_ids(&self, id: ProjectId) -> Option<Vec<ProjectId>> {
        self.tree.subtree_ids(id)
    }

    /// Get a project by id.
    #[must_use]
    pub fn get(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    /// Iterate all projects in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// Whether a project with this id exists.
    #[must_use]
    pub fn contains(&self, id: ProjectId) -> bool {
        self.projects.contains_key(&id)
    }

    /// Find an active project by exact name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Project> {
        self.projects.values().find(|p| p.status == Status::Active && p.name == name)
    }

    /// Add tags to a project's tag set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn add_tags(&mut self, id: ProjectId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| set.extend(tags.iter().copied()))
    }

    /// Remove tags from a project's tag set. Missing tags are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn remove_tags(&mut self, id: ProjectId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| {
            for tag in tags {
                set.remove(tag);
            }
        })
    }

    /// Replace a project's tag set wholesale; returns the previous set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn set_tags(&mut self, id: ProjectId, tags: BTreeSet<TagId>) -> Result<BTreeSet<TagId>> {
        let mut previous = BTreeSet::new();
        self.mutate_tags(id, |set| previous = std::mem::replace(set, tags))?;
        Ok(previous)
    }

    /// Re-insert a project with a trusted identifier from persisted state.
    /// The tree position is restored separately via [`ProjectStore::attach`].
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn restore(&mut self, project: Project) -> Result<()> {
        self.issuer.bump_past(project.id);
        self.persist(&project)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.projects.insert(project.id, project);
        Ok(())
    }

    fn require(&self, id: ProjectId) -> Result<&Project> {
        self.projects.get(&id).ok_or(Error::not_found("project", id.raw()))
    }

    fn mutate_tags(
        &mut self,
        id: ProjectId,
        mutate: impl FnOnce(&mut BTreeSet<TagId>),
    ) -> Result<()> {
        let mut project = self.require(id)?.clone();
        mutate(&mut project.tags);
        project.updated_at = Utc::now();
        self.persist(&project)?;
        self.projects.insert(id, project);
        Ok(())
    }

    fn persist(&self, project: &Project) -> Result<()> {
        let body = serde_json::to_string(project)?;
        storage::put_row(self.store.as_ref(), TABLE, project.id.raw(), &body)
    }

    fn persist_tree(&self) -> Result<()> {
        let body = serde_json::to_string(&self.tree)?;
        storage::put_row(self.store.as_ref(), TREE_TABLE, TREE_ROW_ID, &body)
    }
}
