//! The `Secretary` facade: the single entry point for callers.
//!
//! Owns one of each manager and coordinates every cross-entity operation:
//! tag cascades, task-to-project conversion, project expiration and the
//! achievement chart. Managers never reach into each other; everything that
//! touches two of them goes through here.
//!
//! The backing table store has no transactions, so multi-step operations
//! read and validate first, write last, and compensate on a mid-sequence
//! failure by undoing the writes already made.

use crate::config::SecretaryConfig;
use crate::error::{Error, Result};
use crate::ids::{EntityId, ProjectId, RecordId, TagId, TaskId};
use crate::models::{Project, Record, Status, Tag, Task};
use crate::projects::{NewProject, ProjectStore, ProjectUpdate};
use crate::query::{self, ProjectQuery, RecordQuery, TaskQuery};
use crate::records::{NewRecord, RecordStore};
use crate::storage::{SqliteStore, TableStore};
use crate::tags::{TagRegistry, TagTarget};
use crate::tasks::{NewTask, TaskStore, TaskUpdate};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Orchestration facade over the task, record, project and tag managers.
pub struct Secretary {
    tasks: TaskStore,
    records: RecordStore,
    projects: ProjectStore,
    tags: TagRegistry,
    config: SecretaryConfig,
}

impl Secretary {
    /// Open a tracked directory: load its config, start the file logger at
    /// the configured level and open its `SQLite` store.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be parsed or the database
    /// cannot be opened.
    pub fn open(base_dir: &Path) -> Result<Self> {
        let config = SecretaryConfig::load_from(base_dir)?;
        crate::logging::init(&config.log_level, &SecretaryConfig::log_path(base_dir))?;
        let store = Arc::new(SqliteStore::new(SecretaryConfig::database_path(base_dir))?);
        Self::with_store(store, config)
    }

    /// Build a facade over an existing table store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing tables cannot be created.
    pub fn with_store(store: Arc<dyn TableStore>, config: SecretaryConfig) -> Result<Self> {
        Ok(Self {
            tasks: TaskStore::new(Arc::clone(&store))?,
            records: RecordStore::new(Arc::clone(&store))?,
            projects: ProjectStore::new(Arc::clone(&store))?,
            tags: TagRegistry::new(store)?,
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SecretaryConfig {
        &self.config
    }

    // ----- tasks -----

    /// Create a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if any initial tag is unknown.
    pub fn create_task(&mut self, new: NewTask) -> Result<TaskId> {
        let tag_ids: Vec<TagId> = new.tags.iter().copied().collect();
        self.tags.require_all(&tag_ids)?;
        let id = self.tasks.create(new)?;
        self.tags.associate(&tag_ids, TagTarget::Task(id))?;
        Ok(id)
    }

    /// Apply a partial update to a task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task is unknown.
    pub fn change_task(&mut self, id: TaskId, update: TaskUpdate) -> Result<()> {
        self.tasks.modify(id, update)
    }

    /// Clone a task into a fresh entity with a new id and fresh timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the task is unknown.
    pub fn clone_task(&mut self, id: TaskId) -> Result<TaskId> {
        let clone_id = self.tasks.clone_task(id)?;
        let tag_ids: Vec<TagId> = self
            .tasks
            .get(clone_id)
            .map(|task| task.tags.iter().copied().collect())
            .unwrap_or_default();
        self.tags.associate(&tag_ids, TagTarget::Task(clone_id))?;
        Ok(clone_id)
    }

    /// Delete a task, dropping its tag associations and removing it from
    /// every project's member set. Idempotent; records keep their historical
    /// linkage.
    ///
    /// # Errors
    ///
    /// Returns an error if a mirror write fails.
    pub fn delete_task(&mut self, id: TaskId) -> Result<()> {
        let Some(task) = self.tasks.get(id) else { return Ok(()) };
        let tag_ids: Vec<TagId> = task.tags.iter().copied().collect();
        self.tags.disassociate(&tag_ids, TagTarget::Task(id))?;

        let member_of: Vec<ProjectId> = self
            .projects
            .iter()
            .filter(|project| project.task_ids.contains(&id))
            .map(|project| project.id)
            .collect();
        for project_id in member_of {
            self.projects.remove_task(project_id, id)?;
        }
        self.tasks.delete(id)
    }

    /// Get a task by id.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Convert a task into a project attached at `tree_path` (empty path
    /// attaches a new root).
    ///
    /// The project is seeded from the task: name from the summary, tags and
    /// priority carried over, span running from now for the task's estimate.
    /// The task is then deleted. If any step after the create fails, the new
    /// project is rolled back and the task is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown task, plus the tree's
    /// attach failures.
    pub fn convert_task_to_project(
        &mut self,
        task_id: TaskId,
        tree_path: &[ProjectId],
    ) -> Result<ProjectId> {
        let task =
            self.tasks.get(task_id).cloned().ok_or(Error::not_found("task", task_id.raw()))?;
        let member_of: Vec<ProjectId> = self
            .projects
            .iter()
            .filter(|project| project.task_ids.contains(&task_id))
            .map(|project| project.id)
            .collect();

        let now = Utc::now();
        let project_id = self.projects.create(NewProject {
            name: task.summary.clone(),
            references: Vec::new(),
            begin: now,
            end: now + Duration::minutes(task.estimated_length),
            priority: task.priority,
            tags: task.tags.clone(),
        })?;
        if let Err(err) = self.projects.attach(project_id, tree_path) {
            self.discard_project(project_id, None);
            return Err(err);
        }

        if let Err(err) = self.finish_conversion(&task, project_id) {
            let mut project_path = tree_path.to_vec();
            project_path.push(project_id);
            self.unwind_conversion(&task, project_id, &project_path, &member_of);
            return Err(err);
        }
        log::info!("converted task {task_id} into project {project_id}");
        Ok(project_id)
    }

    /// The fallible tail of a conversion: re-point the tags and delete the
    /// source task.
    fn finish_conversion(&mut self, task: &Task, project_id: ProjectId) -> Result<()> {
        let tag_ids: Vec<TagId> = task.tags.iter().copied().collect();
        self.tags.disassociate(&tag_ids, TagTarget::Task(task.id))?;
        self.tags.associate(&tag_ids, TagTarget::Project(project_id))?;
        self.delete_task(task.id)
    }

    /// Best-effort rollback of a conversion whose tail failed: restore the
    /// task's tag links and project memberships, then remove the new
    /// project. The caller re-raises the original error.
    fn unwind_conversion(
        &mut self,
        task: &Task,
        project_id: ProjectId,
        project_path: &[ProjectId],
        member_of: &[ProjectId],
    ) {
        let tag_ids: Vec<TagId> = task.tags.iter().copied().collect();
        if let Err(err) = self.tags.associate(&tag_ids, TagTarget::Task(task.id)) {
            log::warn!("conversion rollback: restoring tag links of task {} failed: {err}", task.id);
        }
        for id in member_of {
            if let Err(err) = self.projects.add_task(*id, task.id) {
                log::warn!(
                    "conversion rollback: restoring membership of task {} in project {id} failed: {err}",
                    task.id
                );
            }
        }
        self.discard_project(project_id, Some(project_path));
    }

    // ----- records -----

    /// One-shot creation of a record whose session is already over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `begin > end`.
    pub fn create_record(
        &mut self,
        new: NewRecord,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RecordId> {
        self.records.create_complete(new, begin, end)
    }

    /// Start a session record now.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn start_record(
        &mut self,
        task_ids: BTreeSet<TaskId>,
        location: Option<String>,
    ) -> Result<RecordId> {
        self.records.start(task_ids, location)
    }

    /// Close an open record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`Error::AlreadyClosed`] for a record that already ended.
    pub fn end_record(
        &mut self,
        id: RecordId,
        location: Option<String>,
        commit_message: Option<String>,
    ) -> Result<()> {
        self.records.end(id, location, commit_message)
    }

    /// Delete a record and its tag associations. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a mirror write fails.
    pub fn delete_record(&mut self, id: RecordId) -> Result<()> {
        let Some(record) = self.records.get(id) else { return Ok(()) };
        let tag_ids: Vec<TagId> = record.tags.iter().copied().collect();
        self.tags.disassociate(&tag_ids, TagTarget::Record(id))?;
        self.records.delete(id)
    }

    /// Get a record by id.
    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    // ----- projects -----

    /// Create a project entity, initially detached from the tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if any initial tag is unknown, or
    /// [`Error::InvalidRange`] for an inverted span.
    pub fn create_project(&mut self, new: NewProject) -> Result<ProjectId> {
        let tag_ids: Vec<TagId> = new.tags.iter().copied().collect();
        self.tags.require_all(&tag_ids)?;
        let id = self.projects.create(new)?;
        self.tags.associate(&tag_ids, TagTarget::Project(id))?;
        Ok(id)
    }

    /// Attach an existing project to the tree at `tree_path` (empty path
    /// attaches a new root).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`], [`Error::DuplicateNode`] or
    /// [`Error::InvalidPath`].
    pub fn add_project(&mut self, id: ProjectId, tree_path: &[ProjectId]) -> Result<()> {
        self.projects.attach(id, tree_path)
    }

    /// Detach the subtree at `tree_path`, leaving the project entities
    /// untouched. Returns the detached ids; they can be re-attached later
    /// via [`Secretary::add_project`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn detach_project(&mut self, tree_path: &[ProjectId]) -> Result<Vec<ProjectId>> {
        self.projects.detach(tree_path)
    }

    /// Detach the subtree at `tree_path` and delete every project in it,
    /// dropping their tag associations. Returns the deleted ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn remove_project(&mut self, tree_path: &[ProjectId]) -> Result<Vec<ProjectId>> {
        let detached = self.projects.detach(tree_path)?;
        for id in &detached {
            if let Some(project) = self.projects.get(*id) {
                let tag_ids: Vec<TagId> = project.tags.iter().copied().collect();
                self.tags.disassociate(&tag_ids, TagTarget::Project(*id))?;
            }
            self.projects.delete(*id)?;
        }
        Ok(detached)
    }

    /// Apply field updates to a project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn change_project(&mut self, id: ProjectId, update: ProjectUpdate) -> Result<()> {
        self.projects.modify(id, update)
    }

    /// Shift a project span to a new begin, preserving its length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn move_project(&mut self, id: ProjectId, begin: DateTime<Utc>) -> Result<()> {
        self.projects.move_begin(id, begin)
    }

    /// Set a new project span. The span must cover the summed estimates of
    /// the project's member tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`], [`Error::InvalidRange`] or
    /// [`Error::SpanTooShort`]; the span is unchanged on failure.
    pub fn change_project_span(
        &mut self,
        id: ProjectId,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let project =
            self.projects.get(id).ok_or(Error::not_found("project", id.raw()))?;
        let required = self.member_estimate_minutes(project);
        self.projects.set_span(id, begin, end, required)
    }

    /// Add a task to a project's member set. The project span must cover
    /// the member estimates including the new task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown project or task, and
    /// [`Error::SpanTooShort`] when the estimate no longer fits.
    pub fn add_task_to_project(&mut self, id: ProjectId, task_id: TaskId) -> Result<()> {
        let task =
            self.tasks.get(task_id).ok_or(Error::not_found("task", task_id.raw()))?;
        let project =
            self.projects.get(id).ok_or(Error::not_found("project", id.raw()))?;
        if !project.task_ids.contains(&task_id) {
            let required = self.member_estimate_minutes(project) + task.estimated_length;
            let span = project.span_minutes();
            if span < required {
                return Err(Error::SpanTooShort { span, required });
            }
        }
        self.projects.add_task(id, task_id)
    }

    /// Remove a task from a project's member set. Missing members are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn remove_task_from_project(&mut self, id: ProjectId, task_id: TaskId) -> Result<()> {
        self.projects.remove_task(id, task_id)
    }

    /// Move the subtree at `tree_path` under the node at `target_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] or [`Error::CyclicMove`]; the tree is
    /// unchanged on failure.
    pub fn move_tree(&mut self, tree_path: &[ProjectId], target_path: &[ProjectId]) -> Result<()> {
        self.projects.move_subtree(tree_path, target_path)
    }

    /// Render the subtree at `tree_path` (whole forest for an empty path)
    /// as an indented listing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn show_tree(&self, tree_path: &[ProjectId], show_ids: bool) -> Result<String> {
        self.projects.render_tree(tree_path, show_ids)
    }

    /// Get a project by id.
    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id)
    }

    /// Expire a project: archive the original in place (it stays in the
    /// tree as an archival record) and clone it under the inbox project,
    /// with the span shifted to start now. The inbox is the configured
    /// root-level project, created on demand. Returns the clone's id.
    ///
    /// If any step after creating the clone fails, the clone is rolled back
    /// and the original is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the project is unknown.
    pub fn expire_project(&mut self, id: ProjectId) -> Result<ProjectId> {
        let original =
            self.projects.get(id).cloned().ok_or(Error::not_found("project", id.raw()))?;
        let inbox_id = self.ensure_inbox()?;

        let now = Utc::now();
        let span = original.end - original.begin;
        let clone_id = self.projects.create(NewProject {
            name: original.name.clone(),
            references: original.references.clone(),
            begin: now,
            end: now + span,
            priority: original.priority,
            tags: original.tags.clone(),
        })?;
        for task_id in &original.task_ids {
            if let Err(err) = self.projects.add_task(clone_id, *task_id) {
                self.discard_project(clone_id, None);
                return Err(err);
            }
        }
        if let Err(err) = self.projects.attach(clone_id, &[inbox_id]) {
            self.discard_project(clone_id, None);
            return Err(err);
        }

        if let Err(err) = self.finish_expiration(&original, clone_id) {
            self.discard_project(clone_id, Some(&[inbox_id, clone_id]));
            return Err(err);
        }
        log::info!("expired project {id}, rolled over as {clone_id}");
        Ok(clone_id)
    }

    /// The fallible tail of an expiration: link the clone's tags and archive
    /// the original.
    fn finish_expiration(&mut self, original: &Project, clone_id: ProjectId) -> Result<()> {
        let tag_ids: Vec<TagId> = original.tags.iter().copied().collect();
        self.tags.associate(&tag_ids, TagTarget::Project(clone_id))?;
        self.projects.modify(
            original.id,
            ProjectUpdate { status: Some(Status::Archived), ..Default::default() },
        )
    }

    // ----- tags -----

    /// Create a tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn create_tag(&mut self, name: &str) -> Result<TagId> {
        self.tags.create(name)
    }

    /// Rename a tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the tag is unknown.
    pub fn rename_tag(&mut self, id: TagId, name: &str) -> Result<()> {
        self.tags.rename(id, name)
    }

    /// Delete a tag, stripping it from every entity that carries it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the tag is unknown.
    pub fn delete_tag(&mut self, id: TagId) -> Result<()> {
        let affected = self.tags.delete(id)?;
        for target in affected {
            match target {
                TagTarget::Task(task_id) => self.tasks.remove_tags(task_id, &[id])?,
                TagTarget::Record(record_id) => self.records.remove_tags(record_id, &[id])?,
                TagTarget::Project(project_id) => self.projects.remove_tags(project_id, &[id])?,
            }
        }
        Ok(())
    }

    /// Merge `source` into `dest`: every entity that carried `source` now
    /// carries `dest`, and `source` is deleted. A no-op when the two are
    /// the same tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either tag is unknown.
    pub fn replace_tag(&mut self, source: TagId, dest: TagId) -> Result<()> {
        let moved = self.tags.replace(source, dest)?;
        for target in moved {
            match target {
                TagTarget::Task(task_id) => {
                    self.tasks.remove_tags(task_id, &[source])?;
                    self.tasks.add_tags(task_id, &[dest])?;
                }
                TagTarget::Record(record_id) => {
                    self.records.remove_tags(record_id, &[source])?;
                    self.records.add_tags(record_id, &[dest])?;
                }
                TagTarget::Project(project_id) => {
                    self.projects.remove_tags(project_id, &[source])?;
                    self.projects.add_tags(project_id, &[dest])?;
                }
            }
        }
        Ok(())
    }

    /// Add tags to exactly one of a task, record or project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousTarget`] / [`Error::MissingTarget`] for a
    /// bad target selection, and [`Error::NotFound`] for unknown tags or an
    /// unknown target entity.
    pub fn add_tag(
        &mut self,
        tag_ids: &[TagId],
        task: Option<TaskId>,
        record: Option<RecordId>,
        project: Option<ProjectId>,
    ) -> Result<()> {
        let target = resolve_target(task, record, project)?;
        self.tags.require_all(tag_ids)?;
        match target {
            TagTarget::Task(id) => self.tasks.add_tags(id, tag_ids)?,
            TagTarget::Record(id) => self.records.add_tags(id, tag_ids)?,
            TagTarget::Project(id) => self.projects.add_tags(id, tag_ids)?,
        }
        self.tags.associate(tag_ids, target)
    }

    /// Remove tags from exactly one of a task, record or project. Tags the
    /// entity does not carry are ignored.
    ///
    /// # Errors
    ///
    /// Same failures as [`Secretary::add_tag`].
    pub fn remove_tag(
        &mut self,
        tag_ids: &[TagId],
        task: Option<TaskId>,
        record: Option<RecordId>,
        project: Option<ProjectId>,
    ) -> Result<()> {
        let target = resolve_target(task, record, project)?;
        self.tags.require_all(tag_ids)?;
        match target {
            TagTarget::Task(id) => self.tasks.remove_tags(id, tag_ids)?,
            TagTarget::Record(id) => self.records.remove_tags(id, tag_ids)?,
            TagTarget::Project(id) => self.projects.remove_tags(id, tag_ids)?,
        }
        self.tags.disassociate(tag_ids, target)
    }

    /// Replace the tag set of exactly one of a task, record or project.
    ///
    /// # Errors
    ///
    /// Same failures as [`Secretary::add_tag`].
    pub fn change_tag(
        &mut self,
        tag_ids: &[TagId],
        task: Option<TaskId>,
        record: Option<RecordId>,
        project: Option<ProjectId>,
    ) -> Result<()> {
        let target = resolve_target(task, record, project)?;
        self.tags.require_all(tag_ids)?;
        let new_set: BTreeSet<TagId> = tag_ids.iter().copied().collect();
        let previous = match target {
            TagTarget::Task(id) => self.tasks.set_tags(id, new_set)?,
            TagTarget::Record(id) => self.records.set_tags(id, new_set)?,
            TagTarget::Project(id) => self.projects.set_tags(id, new_set)?,
        };
        let previous: Vec<TagId> = previous.into_iter().collect();
        self.tags.disassociate(&previous, target)?;
        self.tags.associate(tag_ids, target)
    }

    /// Get a tag by id.
    #[must_use]
    pub fn tag(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    // ----- queries -----

    /// Find tasks matching the query, ascending by id.
    #[must_use]
    pub fn find_tasks(&self, query: &TaskQuery) -> Vec<TaskId> {
        query::find_tasks(&self.tasks, &self.projects, query)
    }

    /// Find records matching the query, ascending by id.
    #[must_use]
    pub fn find_records(&self, query: &RecordQuery) -> Vec<RecordId> {
        query::find_records(&self.records, query)
    }

    /// Find projects matching the query, ascending by id.
    #[must_use]
    pub fn find_projects(&self, query: &ProjectQuery) -> Vec<ProjectId> {
        query::find_projects(&self.projects, &self.tasks, query)
    }

    // ----- reporting -----

    /// Compute per-day aggregate completion ratios for an ordered sequence
    /// of task groups (one group per calendar day). Unknown task ids are
    /// skipped; an empty group aggregates to `0.0`. Rendering the chart is
    /// the caller's concern.
    #[must_use]
    pub fn create_achievement_chart(&self, task_id_groups: &[Vec<TaskId>]) -> Vec<f64> {
        task_id_groups
            .iter()
            .map(|group| {
                let ratios: Vec<f64> = group
                    .iter()
                    .filter_map(|id| self.tasks.get(*id))
                    .map(|task| task.completion_ratio)
                    .collect();
                if ratios.is_empty() {
                    0.0
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
                    mean
                }
            })
            .collect()
    }

    // ----- rehydration -----

    /// Re-insert a tag from persisted state with its original id.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn restore_tag(&mut self, tag: Tag) -> Result<()> {
        self.tags.restore(tag)
    }

    /// Re-insert a task from persisted state with its original id. The
    /// task's tags must have been restored first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a carried tag is unknown.
    pub fn restore_task(&mut self, task: Task) -> Result<()> {
        let tag_ids: Vec<TagId> = task.tags.iter().copied().collect();
        let id = task.id;
        self.tags.require_all(&tag_ids)?;
        self.tasks.restore(task)?;
        self.tags.associate(&tag_ids, TagTarget::Task(id))
    }

    /// Re-insert a record from persisted state with its original id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a carried tag is unknown.
    pub fn restore_record(&mut self, record: Record) -> Result<()> {
        let tag_ids: Vec<TagId> = record.tags.iter().copied().collect();
        let id = record.id;
        self.tags.require_all(&tag_ids)?;
        self.records.restore(record)?;
        self.tags.associate(&tag_ids, TagTarget::Record(id))
    }

    /// Re-insert a project from persisted state with its original id. Its
    /// tree position is restored separately via [`Secretary::add_project`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a carried tag is unknown.
    pub fn restore_project(&mut self, project: Project) -> Result<()> {
        let tag_ids: Vec<TagId> = project.tags.iter().copied().collect();
        let id = project.id;
        self.tags.require_all(&tag_ids)?;
        self.projects.restore(project)?;
        self.tags.associate(&tag_ids, TagTarget::Project(id))
    }

    // ----- helpers -----

    /// The inbox project's id, creating and attaching it at the root when
    /// it does not exist yet.
    fn ensure_inbox(&mut self) -> Result<ProjectId> {
        if let Some(project) = self.projects.find_by_name(&self.config.inbox_project_name) {
            let id = project.id;
            if !self.projects.is_attached(id) {
                self.projects.attach(id, &[])?;
            }
            return Ok(id);
        }

        let now = Utc::now();
        let id = self.projects.create(NewProject {
            name: self.config.inbox_project_name.clone(),
            references: Vec::new(),
            begin: now,
            end: now,
            priority: None,
            tags: BTreeSet::new(),
        })?;
        self.projects.attach(id, &[])?;
        log::info!("created inbox project {id} ({})", self.config.inbox_project_name);
        Ok(id)
    }

    /// Best-effort removal of a project created inside a failed multi-step
    /// operation: detach it when `tree_path` is given, drop its tag links
    /// and delete the entity. Inner failures are logged and swallowed so
    /// the caller can re-raise the error that triggered the rollback.
    fn discard_project(&mut self, id: ProjectId, tree_path: Option<&[ProjectId]>) {
        if let Some(path) = tree_path {
            if let Err(err) = self.projects.detach(path) {
                log::warn!("rollback: detaching project {id} failed: {err}");
            }
        }
        if let Some(project) = self.projects.get(id) {
            let tag_ids: Vec<TagId> = project.tags.iter().copied().collect();
            if let Err(err) = self.tags.disassociate(&tag_ids, TagTarget::Project(id)) {
                log::warn!("rollback: dropping tag links of project {id} failed: {err}");
            }
        }
        if let Err(err) = self.projects.delete(id) {
            log::warn!("rollback: deleting project {id} failed: {err}");
        }
    }

    fn member_estimate_minutes(&self, project: &Project) -> i64 {
        project
            .task_ids
            .iter()
            .filter_map(|id| self.tasks.get(*id))
            .map(|task| task.estimated_length)
            .sum()
    }
}

fn resolve_target(
    task: Option<TaskId>,
    record: Option<RecordId>,
    project: Option<ProjectId>,
) -> Result<TagTarget> {
    match (task, record, project) {
        (Some(id), None, None) => Ok(TagTarget::Task(id)),
        (None, Some(id), None) => Ok(TagTarget::Record(id)),
        (None, None, Some(id)) => Ok(TagTarget::Project(id)),
        (None, None, None) => Err(Error::MissingTarget),
        _ => Err(Error::AmbiguousTarget),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FieldMap, Predicate};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn create_secretary() -> (TempDir, Secretary) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("test.db")).unwrap());
        (dir, Secretary::with_store(store, SecretaryConfig::default()).unwrap())
    }

    /// Passes everything through to a real store, except that while armed
    /// the next update on one table fails, then writes flow again.
    struct FlakyStore {
        inner: SqliteStore,
        fail_table: &'static str,
        armed: Arc<AtomicBool>,
    }

    impl TableStore for FlakyStore {
        fn create_table(&self, table: &str, column_defs: &[&str]) -> Result<()> {
            self.inner.create_table(table, column_defs)
        }

        fn drop_table(&self, table: &str) -> Result<()> {
            self.inner.drop_table(table)
        }

        fn insert(&self, table: &str, fields: &FieldMap) -> Result<i64> {
            self.inner.insert(table, fields)
        }

        fn update(&self, table: &str, fields: &FieldMap, predicate: &Predicate) -> Result<()> {
            if table == self.fail_table && self.armed.swap(false, Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::other("injected write failure")));
            }
            self.inner.update(table, fields, predicate)
        }

        fn exists(&self, table: &str, predicate: &Predicate) -> Result<bool> {
            self.inner.exists(table, predicate)
        }
    }

    fn create_flaky_secretary(fail_table: &'static str) -> (TempDir, Secretary, Arc<AtomicBool>) {
        let dir = TempDir::new().unwrap();
        let armed = Arc::new(AtomicBool::new(false));
        let store = Arc::new(FlakyStore {
            inner: SqliteStore::new(dir.path().join("test.db")).unwrap(),
            fail_table,
            armed: Arc::clone(&armed),
        });
        let s = Secretary::with_store(store, SecretaryConfig::default()).unwrap();
        (dir, s, armed)
    }

    fn quick_task(s: &mut Secretary, summary: &str, estimate: i64) -> TaskId {
        s.create_task(NewTask {
            summary: summary.to_string(),
            estimated_length: estimate,
            ..Default::default()
        })
        .unwrap()
    }

    fn quick_project(s: &mut Secretary, name: &str, span_minutes: i64) -> ProjectId {
        let begin = Utc::now();
        s.create_project(NewProject {
            name: name.to_string(),
            references: Vec::new(),
            begin,
            end: begin + Duration::minutes(span_minutes),
            priority: None,
            tags: BTreeSet::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_resolve_target_requires_exactly_one() {
        assert!(matches!(resolve_target(None, None, None), Err(Error::MissingTarget)));
        assert!(matches!(
            resolve_target(Some(TaskId::from(1)), Some(RecordId::from(1)), None),
            Err(Error::AmbiguousTarget)
        ));
        assert!(matches!(
            resolve_target(None, None, Some(ProjectId::from(1))),
            Ok(TagTarget::Project(_))
        ));
    }

    #[test]
    fn test_create_task_rejects_unknown_tags() {
        let (_dir, mut s) = create_secretary();
        let result = s.create_task(NewTask {
            summary: "x".to_string(),
            tags: BTreeSet::from([TagId::from(9)]),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::NotFound { kind: "tag", .. })));
    }

    #[test]
    fn test_delete_tag_strips_entities() {
        let (_dir, mut s) = create_secretary();
        let tag = s.create_tag("urgent").unwrap();
        let task = quick_task(&mut s, "t", 30);
        let project = quick_project(&mut s, "p", 60);
        s.add_tag(&[tag], Some(task), None, None).unwrap();
        s.add_tag(&[tag], None, None, Some(project)).unwrap();

        s.delete_tag(tag).unwrap();

        assert!(s.task(task).unwrap().tags.is_empty());
        assert!(s.project(project).unwrap().tags.is_empty());
        assert!(s.tag(tag).is_none());
    }

    #[test]
    fn test_replace_tag_repoints_entities() {
        let (_dir, mut s) = create_secretary();
        let old = s.create_tag("urgnet").unwrap();
        let new = s.create_tag("urgent").unwrap();
        let task = quick_task(&mut s, "t", 30);
        let record = s.start_record(BTreeSet::new(), None).unwrap();
        s.add_tag(&[old], Some(task), None, None).unwrap();
        s.add_tag(&[old], None, Some(record), None).unwrap();

        s.replace_tag(old, new).unwrap();

        assert_eq!(s.task(task).unwrap().tags, BTreeSet::from([new]));
        assert_eq!(s.record(record).unwrap().tags, BTreeSet::from([new]));
        assert!(s.tag(old).is_none());
    }

    #[test]
    fn test_change_tag_replaces_wholesale() {
        let (_dir, mut s) = create_secretary();
        let a = s.create_tag("a").unwrap();
        let b = s.create_tag("b").unwrap();
        let task = quick_task(&mut s, "t", 30);
        s.add_tag(&[a], Some(task), None, None).unwrap();

        s.change_tag(&[b], Some(task), None, None).unwrap();

        assert_eq!(s.task(task).unwrap().tags, BTreeSet::from([b]));
        // Deleting the old tag later must not touch this task again.
        s.delete_tag(a).unwrap();
        assert_eq!(s.task(task).unwrap().tags, BTreeSet::from([b]));
    }

    #[test]
    fn test_convert_task_to_project() {
        let (_dir, mut s) = create_secretary();
        let tag = s.create_tag("thesis").unwrap();
        let task = s
            .create_task(NewTask {
                summary: "write spec".to_string(),
                estimated_length: 120,
                tags: BTreeSet::from([tag]),
                ..Default::default()
            })
            .unwrap();

        let project = s.convert_task_to_project(task, &[]).unwrap();

        let p = s.project(project).unwrap();
        assert_eq!(p.name, "write spec");
        assert_eq!(p.tags, BTreeSet::from([tag]));
        assert_eq!(p.span_minutes(), 120);
        assert!(s.task(task).is_none());
        assert!(s.find_tasks(&TaskQuery::default()).is_empty());
    }

    #[test]
    fn test_convert_rolls_back_when_attach_fails() {
        let (_dir, mut s) = create_secretary();
        let task = quick_task(&mut s, "keep me", 30);

        let bad_path = [ProjectId::from(99)];
        let result = s.convert_task_to_project(task, &bad_path);
        assert!(matches!(result, Err(Error::InvalidPath)));

        // The task survives and no stray project is left behind.
        assert!(s.task(task).is_some());
        assert!(s.find_projects(&ProjectQuery::default()).is_empty());
    }

    #[test]
    fn test_convert_unwinds_after_post_attach_write_failure() {
        let (_dir, mut s, armed) = create_flaky_secretary("tasks");
        let parent = quick_project(&mut s, "parent", 120);
        s.add_project(parent, &[]).unwrap();
        let tag = s.create_tag("deep").unwrap();
        let task = s
            .create_task(NewTask {
                summary: "dig in".to_string(),
                estimated_length: 30,
                tags: BTreeSet::from([tag]),
                ..Default::default()
            })
            .unwrap();
        s.add_task_to_project(parent, task).unwrap();

        armed.store(true, Ordering::SeqCst);
        let result = s.convert_task_to_project(task, &[parent]);
        assert!(result.is_err());

        // The task is back as it was: entity, tags and membership intact.
        assert_eq!(s.task(task).unwrap().tags, BTreeSet::from([tag]));
        assert!(s.project(parent).unwrap().task_ids.contains(&task));
        // No stray project survived, in the store or in the tree.
        assert_eq!(s.find_projects(&ProjectQuery::default()), vec![parent]);
        assert_eq!(s.show_tree(&[], false).unwrap(), "parent\n");
        // The restored tag link still participates in cascades.
        s.delete_tag(tag).unwrap();
        assert!(s.task(task).unwrap().tags.is_empty());
    }

    #[test]
    fn test_add_task_to_project_checks_span() {
        let (_dir, mut s) = create_secretary();
        let project = quick_project(&mut s, "p", 60);
        let small = quick_task(&mut s, "small", 40);
        let big = quick_task(&mut s, "big", 40);

        s.add_task_to_project(project, small).unwrap();
        let result = s.add_task_to_project(project, big);
        assert!(matches!(result, Err(Error::SpanTooShort { span: 60, required: 80 })));
        assert!(!s.project(project).unwrap().task_ids.contains(&big));
    }

    #[test]
    fn test_change_project_span_validates_estimates() {
        let (_dir, mut s) = create_secretary();
        let project = quick_project(&mut s, "p", 240);
        let task = quick_task(&mut s, "t", 120);
        s.add_task_to_project(project, task).unwrap();

        let begin = Utc::now();
        let result = s.change_project_span(project, begin, begin + Duration::minutes(60));
        assert!(matches!(result, Err(Error::SpanTooShort { span: 60, required: 120 })));
        assert_eq!(s.project(project).unwrap().span_minutes(), 240);
    }

    #[test]
    fn test_delete_task_leaves_memberships_clean() {
        let (_dir, mut s) = create_secretary();
        let project = quick_project(&mut s, "p", 120);
        let task = quick_task(&mut s, "t", 60);
        s.add_task_to_project(project, task).unwrap();

        s.delete_task(task).unwrap();
        s.delete_task(task).unwrap();

        assert!(s.project(project).unwrap().task_ids.is_empty());
    }

    #[test]
    fn test_detach_project_keeps_entities() {
        let (_dir, mut s) = create_secretary();
        let parent = quick_project(&mut s, "parent", 60);
        let child = quick_project(&mut s, "child", 30);
        s.add_project(parent, &[]).unwrap();
        s.add_project(child, &[parent]).unwrap();

        let detached = s.detach_project(&[parent]).unwrap();
        assert_eq!(detached, vec![parent, child]);

        // The entities survive and can be re-attached.
        assert!(s.project(parent).is_some());
        assert!(s.project(child).is_some());
        s.add_project(parent, &[]).unwrap();
        s.add_project(child, &[parent]).unwrap();
        assert_eq!(s.show_tree(&[], false).unwrap(), "parent\n  child\n");
    }

    #[test]
    fn test_remove_project_deletes_subtree_entities() {
        let (_dir, mut s) = create_secretary();
        let parent = quick_project(&mut s, "parent", 60);
        let child = quick_project(&mut s, "child", 30);
        s.add_project(parent, &[]).unwrap();
        s.add_project(child, &[parent]).unwrap();

        let removed = s.remove_project(&[parent]).unwrap();
        assert_eq!(removed, vec![parent, child]);
        assert!(s.project(parent).is_none());
        assert!(s.project(child).is_none());
    }

    #[test]
    fn test_expire_project_archives_and_clones_into_inbox() {
        let (_dir, mut s) = create_secretary();
        let tag = s.create_tag("research").unwrap();
        let begin = Utc::now() - Duration::days(30);
        let project = s
            .create_project(NewProject {
                name: "q2 review".to_string(),
                references: vec!["notes.md".to_string()],
                begin,
                end: begin + Duration::minutes(300),
                priority: Some(1),
                tags: BTreeSet::from([tag]),
            })
            .unwrap();
        s.add_project(project, &[]).unwrap();
        let member = quick_task(&mut s, "t", 60);
        s.add_task_to_project(project, member).unwrap();

        let clone = s.expire_project(project).unwrap();

        let original = s.project(project).unwrap();
        assert_eq!(original.status, Status::Archived);
        assert!(s.projects.is_attached(project));

        let cloned = s.project(clone).unwrap();
        assert_eq!(cloned.name, "q2 review");
        assert_eq!(cloned.status, Status::Active);
        assert_eq!(cloned.span_minutes(), 300);
        assert_eq!(cloned.task_ids, BTreeSet::from([member]));
        assert_eq!(cloned.tags, BTreeSet::from([tag]));

        let inbox = s.projects.find_by_name("inbox").unwrap().id;
        let listing = s.show_tree(&[inbox], false).unwrap();
        assert_eq!(listing, "inbox\n  q2 review\n");
    }

    #[test]
    fn test_expire_unwinds_when_archiving_fails() {
        let (_dir, mut s, armed) = create_flaky_secretary("projects");
        let project = quick_project(&mut s, "p", 30);
        s.add_project(project, &[]).unwrap();

        armed.store(true, Ordering::SeqCst);
        let result = s.expire_project(project);
        assert!(result.is_err());

        // The original is still active and attached; the clone is gone.
        assert_eq!(s.project(project).unwrap().status, Status::Active);
        let inbox = s.projects.find_by_name("inbox").unwrap().id;
        assert_eq!(s.show_tree(&[inbox], false).unwrap(), "inbox\n");
        assert_eq!(s.find_projects(&ProjectQuery::default()), vec![project, inbox]);
    }

    #[test]
    fn test_expire_reuses_existing_inbox() {
        let (_dir, mut s) = create_secretary();
        let inbox = quick_project(&mut s, "inbox", 60);
        s.add_project(inbox, &[]).unwrap();
        let project = quick_project(&mut s, "p", 30);
        s.add_project(project, &[]).unwrap();

        s.expire_project(project).unwrap();

        // Still a single inbox.
        let named: Vec<_> =
            s.find_projects(&ProjectQuery::default())
                .into_iter()
                .filter(|id| s.project(*id).unwrap().name == "inbox")
                .collect();
        assert_eq!(named, vec![inbox]);
    }

    #[test]
    fn test_achievement_chart_aggregates_per_group() {
        let (_dir, mut s) = create_secretary();
        let a = quick_task(&mut s, "a", 10);
        let b = quick_task(&mut s, "b", 10);
        s.change_task(a, TaskUpdate { completion_ratio: Some(1.0), ..Default::default() })
            .unwrap();
        s.change_task(b, TaskUpdate { completion_ratio: Some(0.5), ..Default::default() })
            .unwrap();

        let chart = s.create_achievement_chart(&[
            vec![a, b],
            vec![b],
            Vec::new(),
            vec![TaskId::from(99)],
        ]);
        assert_eq!(chart.len(), 4);
        assert!((chart[0] - 0.75).abs() < 1e-9);
        assert!((chart[1] - 0.5).abs() < 1e-9);
        assert_eq!(chart[2], 0.0);
        assert_eq!(chart[3], 0.0);
    }

    #[test]
    fn test_restore_round_trip_keeps_ids_and_tags() {
        let (_dir, mut s) = create_secretary();
        s.restore_tag(Tag { id: TagId::from(3), name: "old".to_string() }).unwrap();

        let now = Utc::now();
        s.restore_task(Task {
            id: TaskId::from(7),
            summary: "restored".to_string(),
            description: None,
            estimated_length: 45,
            deadline: None,
            completion_ratio: 0.5,
            status: Status::Active,
            priority: None,
            tags: BTreeSet::from([TagId::from(3)]),
            location: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        assert_eq!(s.task(TaskId::from(7)).unwrap().summary, "restored");
        // New ids continue past the restored high-water mark.
        let next = quick_task(&mut s, "next", 5);
        assert_eq!(next.raw(), 8);
        // The restored association participates in cascades.
        s.delete_tag(TagId::from(3)).unwrap();
        assert!(s.task(TaskId::from(7)).unwrap().tags.is_empty());
    }

    #[test]
    fn test_open_tracked_directory() {
        let dir = TempDir::new().unwrap();
        let mut s = Secretary::open(dir.path()).unwrap();
        assert_eq!(s.config().inbox_project_name, "inbox");
        assert!(crate::logging::log_dir().is_some());
        let id = quick_task(&mut s, "works", 5);
        assert!(s.task(id).is_some());

        // Opening a second directory in the same process keeps working.
        let other = TempDir::new().unwrap();
        let s2 = Secretary::open(other.path()).unwrap();
        assert_eq!(s2.config().inbox_project_name, "inbox");
    }
}
