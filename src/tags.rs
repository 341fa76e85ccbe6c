//! Tag registry: tag entities plus association bookkeeping.
//!
//! The tag sets held on tasks, records and projects are the source of truth
//! for display; the registry keeps a reverse index (tag -> targets) so that
//! deleting or replacing a tag can cascade over every entity that carries
//! it. The facade keeps the two in step.

use crate::error::{Error, Result};
use crate::ids::{EntityId, IdIssuer, ProjectId, RecordId, TagId, TaskId};
use crate::models::Tag;
use crate::storage::{self, TableStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const TABLE: &str = "tags";
const COUNTER: &str = "tags";

/// The single entity a tag operation points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TagTarget {
    /// A task.
    Task(TaskId),
    /// A record.
    Record(RecordId),
    /// A project.
    Project(ProjectId),
}

impl TagTarget {
    /// The entity kind name, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Record(_) => "record",
            Self::Project(_) => "project",
        }
    }
}

/// Owns the set of tags and their association index.
pub struct TagRegistry {
    tags: BTreeMap<TagId, Tag>,
    links: BTreeMap<TagId, BTreeSet<TagTarget>>,
    issuer: IdIssuer<TagId>,
    store: Arc<dyn TableStore>,
}

impl TagRegistry {
    /// Create a registry mirroring to the given table store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing tables cannot be created.
    pub fn new(store: Arc<dyn TableStore>) -> Result<Self> {
        store.create_table(TABLE, storage::ENTITY_COLUMNS)?;
        store.create_table(storage::COUNTERS_TABLE, storage::COUNTER_COLUMNS)?;
        Ok(Self { tags: BTreeMap::new(), links: BTreeMap::new(), issuer: IdIssuer::new(), store })
    }

    /// Create a new tag. Always succeeds; duplicate names are allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn create(&mut self, name: &str) -> Result<TagId> {
        let id = self.issuer.next();
        let tag = Tag { id, name: name.to_string() };
        self.persist(&tag)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.tags.insert(id, tag);
        self.links.insert(id, BTreeSet::new());
        log::debug!("created tag {id} ({name})");
        Ok(id)
    }

    /// Rename a tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the tag is unknown.
    pub fn rename(&mut self, id: TagId, name: &str) -> Result<()> {
        let mut tag = self.tags.get(&id).ok_or(Error::not_found("tag", id.raw()))?.clone();
        tag.name = name.to_string();
        self.persist(&tag)?;
        self.tags.insert(id, tag);
        Ok(())
    }

    /// Delete a tag, removing every association.
    ///
    /// Returns the targets that carried the tag so the caller can strip the
    /// tag from the entities' own tag sets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the tag is unknown.
    pub fn delete(&mut self, id: TagId) -> Result<BTreeSet<TagTarget>> {
        if !self.tags.contains_key(&id) {
            return Err(Error::not_found("tag", id.raw()));
        }
        storage::mark_deleted(self.store.as_ref(), TABLE, id.raw())?;
        self.tags.remove(&id);
        let affected = self.links.remove(&id).unwrap_or_default();
        log::debug!("deleted tag {id}, {} associations dropped", affected.len());
        Ok(affected)
    }

    /// Re-point every association from `source` to `dest`, then delete
    /// `source`. A no-op when `source == dest`.
    ///
    /// Returns the targets that were re-pointed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either tag is unknown.
    pub fn replace(&mut self, source: TagId, dest: TagId) -> Result<BTreeSet<TagTarget>> {
        if !self.tags.contains_key(&source) {
            return Err(Error::not_found("tag", source.raw()));
        }
        if !self.tags.contains_key(&dest) {
            return Err(Error::not_found("tag", dest.raw()));
        }
        if source == dest {
            return Ok(BTreeSet::new());
        }

        storage::mark_deleted(self.store.as_ref(), TABLE, source.raw())?;
        let moved = self.links.remove(&source).unwrap_or_default();
        self.links.entry(dest).or_default().extend(moved.iter().copied());
        self.tags.remove(&source);
        log::debug!("replaced tag {source} with {dest} on {} targets", moved.len());
        Ok(moved)
    }

    /// Record that the given tags are attached to one target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if any tag is unknown.
    pub fn associate(&mut self, tag_ids: &[TagId], target: TagTarget) -> Result<()> {
        self.require_all(tag_ids)?;
        for id in tag_ids {
            self.links.entry(*id).or_default().insert(target);
        }
        Ok(())
    }

    /// Drop associations between the given tags and one target. Missing
    /// associations are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if any tag is unknown.
    pub fn disassociate(&mut self, tag_ids: &[TagId], target: TagTarget) -> Result<()> {
        self.require_all(tag_ids)?;
        for id in tag_ids {
            if let Some(targets) = self.links.get_mut(id) {
                targets.remove(&target);
            }
        }
        Ok(())
    }

    /// Get a tag by id.
    #[must_use]
    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(&id)
    }

    /// Iterate all tags in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    /// The targets currently associated with a tag.
    #[must_use]
    pub fn targets_of(&self, id: TagId) -> Option<&BTreeSet<TagTarget>> {
        self.links.get(&id)
    }

    /// Fail unless every listed tag exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for the first unknown tag.
    pub fn require_all(&self, tag_ids: &[TagId]) -> Result<()> {
        for id in tag_ids {
            if !self.tags.contains_key(id) {
                return Err(Error::not_found("tag", id.raw()));
            }
        }
        Ok(())
    }

    /// Re-insert a tag with a trusted identifier from persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn restore(&mut self, tag: Tag) -> Result<()> {
        self.issuer.bump_past(tag.id);
        self.persist(&tag)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.links.entry(tag.id).or_default();
        self.tags.insert(tag.id, tag);
        Ok(())
    }

    fn persist(&self, tag: &Tag) -> Result<()> {
        let body = serde_json::to_string(tag)?;
        storage::put_row(self.store.as_ref(), TABLE, tag.id.raw(), &body)
    }
}
