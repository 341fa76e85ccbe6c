//! Record store: one-shot creation plus the start/end two-phase workflow.

use crate::error::{Error, Result};
use crate::ids::{EntityId, IdIssuer, RecordId, TagId, TaskId};
use crate::models::{clamp_ratio, Record};
use crate::storage::{self, TableStore};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const TABLE: &str = "records";
const COUNTER: &str = "records";

/// Initial field values for a fully known record.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    /// Tasks the session worked on. May be empty.
    pub task_ids: BTreeSet<TaskId>,
    /// Completion ratio reached; clamped to `[0, 1]`.
    pub completion_ratio: f64,
    /// Where the session took place.
    pub location: Option<String>,
    /// Free-form closing note.
    pub commit_message: Option<String>,
}

/// Owns all record entities.
pub struct RecordStore {
    records: BTreeMap<RecordId, Record>,
    issuer: IdIssuer<RecordId>,
    store: Arc<dyn TableStore>,
}

impl RecordStore {
    /// Create a record store mirroring to the given table store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing tables cannot be created.
    pub fn new(store: Arc<dyn TableStore>) -> Result<Self> {
        store.create_table(TABLE, storage::ENTITY_COLUMNS)?;
        store.create_table(storage::COUNTERS_TABLE, storage::COUNTER_COLUMNS)?;
        Ok(Self { records: BTreeMap::new(), issuer: IdIssuer::new(), store })
    }

    /// One-shot creation of a record whose session is already over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `begin > end`.
    pub fn create_complete(
        &mut self,
        new: NewRecord,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RecordId> {
        if begin > end {
            return Err(Error::InvalidRange { begin, end });
        }

        let id = self.issuer.next();
        let record = Record {
            id,
            linked_task_ids: new.task_ids,
            completion_ratio: clamp_ratio(new.completion_ratio),
            begin,
            end: Some(end),
            tags: BTreeSet::new(),
            location: new.location,
            commit_message: new.commit_message,
        };
        self.persist(&record)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.records.insert(id, record);
        Ok(id)
    }

    /// Open a record with `begin = now` and no end.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn start(&mut self, task_ids: BTreeSet<TaskId>, location: Option<String>) -> Result<RecordId> {
        let id = self.issuer.next();
        let record = Record {
            id,
            linked_task_ids: task_ids,
            completion_ratio: 0.0,
            begin: Utc::now(),
            end: None,
            tags: BTreeSet::new(),
            location,
            commit_message: None,
        };
        self.persist(&record)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        log::debug!("started record {id}");
        self.records.insert(id, record);
        Ok(id)
    }

    /// Close an open record, setting `end = now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`Error::AlreadyClosed`] when the record already has an end.
    pub fn end(
        &mut self,
        id: RecordId,
        location: Option<String>,
        commit_message: Option<String>,
    ) -> Result<()> {
        let current = self.records.get(&id).ok_or(Error::not_found("record", id.raw()))?;
        if current.is_closed() {
            return Err(Error::AlreadyClosed(id));
        }
        let mut record = current.clone();

        record.end = Some(Utc::now());
        if location.is_some() {
            record.location = location;
        }
        if commit_message.is_some() {
            record.commit_message = commit_message;
        }
        self.persist(&record)?;
        self.records.insert(id, record);
        log::debug!("closed record {id}");
        Ok(())
    }

    /// Delete a record. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn delete(&mut self, id: RecordId) -> Result<()> {
        if self.records.contains_key(&id) {
            storage::mark_deleted(self.store.as_ref(), TABLE, id.raw())?;
            self.records.remove(&id);
        }
        Ok(())
    }

    /// Get a record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Iterate all records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Whether a record with this id exists.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Add tags to a record's tag set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn add_tags(&mut self, id: RecordId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| set.extend(tags.iter().copied()))
    }

    /// Remove tags from a record's tag set. Missing tags are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn remove_tags(&mut self, id: RecordId, tags: &[TagId]) -> Result<()> {
        self.mutate_tags(id, |set| {
            for tag in tags {
                set.remove(tag);
            }
        })
    }

    /// Replace a record's tag set wholesale; returns the previous set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown.
    pub fn set_tags(&mut self, id: RecordId, tags: BTreeSet<TagId>) -> Result<BTreeSet<TagId>> {
        let mut previous = BTreeSet::new();
        self.mutate_tags(id, |set| previous = std::mem::replace(set, tags))?;
        Ok(previous)
    }

    /// Re-insert a record with a trusted identifier from persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror write fails.
    pub fn restore(&mut self, record: Record) -> Result<()> {
        self.issuer.bump_past(record.id);
        self.persist(&record)?;
        storage::save_counter(self.store.as_ref(), COUNTER, self.issuer.last_issued())?;
        self.records.insert(record.id, record);
        Ok(())
    }

    fn mutate_tags(
        &mut self,
        id: RecordId,
        mutate: impl FnOnce(&mut BTreeSet<TagId>),
    ) -> Result<()> {
        let mut record =
            self.records.get(&id).ok_or(Error::not_found("record", id.raw()))?.clone();
        mutate(&mut record.tags);
        self.persist(&record)?;
        self.records.insert(id, record);
        Ok(())
    }

    fn persist(&self, record: &Record) -> Result<()> {
        let body = serde_json::to_string(record)?;
        storage::put_row(self.store.as_ref(), TABLE, record.id.raw(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, RecordStore) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(dir.path().join("test.db")).unwrap());
        (dir, RecordStore::new(store).unwrap())
    }

    #[test]
    fn test_create_complete() {
        let (_dir, mut records) = create_test_store();
        let begin = Utc::now();
        let end = begin + chrono::Duration::minutes(30);

        let id = records
            .create_complete(
                NewRecord {
                    task_ids: BTreeSet::from([TaskId::from(1)]),
                    completion_ratio: 0.8,
                    location: Some("office".to_string()),
                    commit_message: Some("done".to_string()),
                },
                begin,
                end,
            )
            .unwrap();

        let record = records.get(id).unwrap();
        assert_eq!(record.begin, begin);
        assert_eq!(record.end, Some(end));
        assert_eq!(record.completion_ratio, 0.8);
        assert!(record.is_closed());
    }

    #[test]
    fn test_create_complete_rejects_inverted_range() {
        let (_dir, mut records) = create_test_store();
        let begin = Utc::now();
        let end = begin - chrono::Duration::minutes(1);

        let result = records.create_complete(NewRecord::default(), begin, end);
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
        assert_eq!(records.iter().count(), 0);
    }

    #[test]
    fn test_start_then_end() {
        let (_dir, mut records) = create_test_store();
        let id = records
            .start(BTreeSet::from([TaskId::from(1)]), Some("home".to_string()))
            .unwrap();

        assert!(!records.get(id).unwrap().is_closed());

        records.end(id, Some("home".to_string()), Some("done".to_string())).unwrap();

        let record = records.get(id).unwrap();
        assert!(record.is_closed());
        assert!(record.begin <= record.end.unwrap());
        assert_eq!(record.commit_message.as_deref(), Some("done"));
    }

    #[test]
    fn test_end_twice_fails() {
        let (_dir, mut records) = create_test_store();
        let id = records.start(BTreeSet::new(), None).unwrap();
        records.end(id, None, None).unwrap();

        let result = records.end(id, None, None);
        assert!(matches!(result, Err(Error::AlreadyClosed(closed)) if closed == id));
    }

    #[test]
    fn test_end_unknown_record_fails() {
        let (_dir, mut records) = create_test_store();
        let result = records.end(RecordId::from(9), None, None);
        assert!(matches!(result, Err(Error::NotFound { kind: "record", .. })));
    }

    #[test]
    fn test_end_keeps_fields_when_not_supplied() {
        let (_dir, mut records) = create_test_store();
        let id = records.start(BTreeSet::new(), Some("home".to_string())).unwrap();
        records.end(id, None, None).unwrap();
        assert_eq!(records.get(id).unwrap().location.as_deref(), Some("home"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, mut records) = create_test_store();
        let id = records.start(BTreeSet::new(), None).unwrap();

        records.delete(id).unwrap();
        records.delete(id).unwrap();
        assert!(records.get(id).is_none());
    }

    #[test]
    fn test_linked_tasks_may_be_empty() {
        let (_dir, mut records) = create_test_store();
        let id = records.start(BTreeSet::new(), None).unwrap();
        assert!(records.get(id).unwrap().linked_task_ids.is_empty());
    }
}
