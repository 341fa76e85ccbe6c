//! Query engine: conjunctive filters over tasks, records and projects.
//!
//! Every supplied criterion must hold for an entity to match. Within
//! `tag_ids` a single shared tag suffices. Results are in ascending id
//! order, which the stores' `BTreeMap` iteration provides for free.
//!
//! Time filtering matches entities whose own interval overlaps the query
//! span: a task's interval is its deadline point (tasks without a deadline
//! never match a time filter), a record's is `[begin, end]` with `now`
//! standing in for a missing end, and a project's is `[begin, end]`.

use crate::ids::{ProjectId, RecordId, TagId, TaskId};
use crate::models::{Project, Status};
use crate::projects::ProjectStore;
use crate::records::RecordStore;
use crate::tasks::TaskStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Filter criteria. `P` is the parent type of the queried entity kind:
/// projects own tasks and other projects, tasks own records.
#[derive(Debug, Clone)]
pub struct QuerySpec<P> {
    /// Match entities whose tag set shares at least one of these tags.
    /// Empty means no tag criterion.
    pub tag_ids: BTreeSet<TagId>,
    /// Match entities whose own interval overlaps this span.
    pub time_span: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Match entities belonging to at least one of these parents. Empty
    /// means no membership criterion.
    pub belong_to: BTreeSet<P>,
    /// Match entities whose achievement ratio is at least this value.
    pub min_achievement: Option<f64>,
    /// Match entities with this status; `None` matches any status. Records
    /// carry no status and ignore this criterion.
    pub status: Option<Status>,
}

impl<P> Default for QuerySpec<P> {
    /// The default query matches every active entity.
    fn default() -> Self {
        Self {
            tag_ids: BTreeSet::new(),
            time_span: None,
            belong_to: BTreeSet::new(),
            min_achievement: None,
            status: Some(Status::Active),
        }
    }
}

/// Query over tasks; parents are projects.
pub type TaskQuery = QuerySpec<ProjectId>;
/// Query over records; parents are the linked tasks.
pub type RecordQuery = QuerySpec<TaskId>;
/// Query over projects; parents are ancestor projects in the tree.
pub type ProjectQuery = QuerySpec<ProjectId>;

/// Find tasks matching the query, ascending by id.
#[must_use]
pub fn find_tasks(tasks: &TaskStore, projects: &ProjectStore, query: &TaskQuery) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|task| {
            if query.status.is_some_and(|status| task.status != status) {
                return false;
            }
            if !tags_intersect(&query.tag_ids, &task.tags) {
                return false;
            }
            if let Some((start, end)) = query.time_span {
                let Some(deadline) = task.deadline else { return false };
                if deadline < start || deadline > end {
                    return false;
                }
            }
            if !query.belong_to.is_empty() {
                let member = query.belong_to.iter().any(|id| {
                    projects.get(*id).is_some_and(|p| p.task_ids.contains(&task.id))
                });
                if !member {
                    return false;
                }
            }
            query.min_achievement.map_or(true, |min| task.completion_ratio >= min)
        })
        .map(|task| task.id)
        .collect()
}

/// Find records matching the query, ascending by id. The status criterion
/// is ignored: records have no status.
#[must_use]
pub fn find_records(records: &RecordStore, query: &RecordQuery) -> Vec<RecordId> {
    let now = Utc::now();
    records
        .iter()
        .filter(|record| {
            if !tags_intersect(&query.tag_ids, &record.tags) {
                return false;
            }
            if let Some((start, end)) = query.time_span {
                let record_end = record.end.unwrap_or(now);
                if !overlaps(record.begin, record_end, start, end) {
                    return false;
                }
            }
            if !query.belong_to.is_empty()
                && record.linked_task_ids.is_disjoint(&query.belong_to)
            {
                return false;
            }
            query.min_achievement.map_or(true, |min| record.completion_ratio >= min)
        })
        .map(|record| record.id)
        .collect()
}

/// Find projects matching the query, ascending by id. `belong_to` matches
/// projects that sit inside the subtree of any listed project (the listed
/// project itself excluded).
#[must_use]
pub fn find_projects(
    projects: &ProjectStore,
    tasks: &TaskStore,
    query: &ProjectQuery,
) -> Vec<ProjectId> {
    projects
        .iter()
        .filter(|project| {
            if query.status.is_some_and(|status| project.status != status) {
                return false;
            }
            if !tags_intersect(&query.tag_ids, &project.tags) {
                return false;
            }
            if let Some((start, end)) = query.time_span {
                if !overlaps(project.begin, project.end, start, end) {
                    return false;
                }
            }
            if !query.belong_to.is_empty() {
                let inside = query.belong_to.iter().any(|parent| {
                    *parent != project.id
                        && projects
                            .subtree_ids(*parent)
                            .is_some_and(|ids| ids.contains(&project.id))
                });
                if !inside {
                    return false;
                }
            }
            query
                .min_achievement
                .map_or(true, |min| project_achievement(project, tasks) >= min)
        })
        .map(|project| project.id)
        .collect()
}

/// A project's achievement: the mean completion ratio of its member tasks,
/// `0.0` when it has none. Members deleted from the task store no longer
/// count.
#[must_use]
pub fn project_achievement(project: &Project, tasks: &TaskStore) -> f64 {
    let ratios: Vec<f64> = project
        .task_ids
        .iter()
        .filter_map(|id| tasks.get(*id))
        .map(|task| task.completion_ratio)
        .collect();
    if ratios.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
    mean
}

fn tags_intersect(query: &BTreeSet<TagId>, entity: &BTreeSet<TagId>) -> bool {
    query.is_empty() || !query.is_disjoint(entity)
}

fn overlaps(
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    start: DateTime<Utc>,
    span_end: DateTime<Utc>,
) -> bool {
    begin <= span_end && start <= end
}
