//! Read-only projections over the store for display.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;

use crate::model::ids::{GroupId, ListId, TagId, TaskId};
use crate::model::list::Group;
use crate::model::store::TaskStore;
use crate::model::tag::Tag;
use crate::model::task::{Priority, Task};
use crate::ops::cascade;
use crate::ops::task_ops::CompletionFilter;

/// Live tasks of one list in arena order
pub fn active_list_tasks<'a>(store: &'a TaskStore, list_id: &ListId) -> Vec<&'a Task> {
    store
        .tasks()
        .filter(|t| !t.is_deleted() && &t.list_id == list_id)
        .collect()
}

/// Live completed tasks across all lists
pub fn completed_tasks(store: &TaskStore) -> Vec<&Task> {
    store
        .tasks()
        .filter(|t| !t.is_deleted() && t.completed)
        .collect()
}

/// Criteria for narrowing a task list. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub completion: CompletionFilter,
    /// Match tasks carrying any of these tags
    pub tags: Vec<TagId>,
    pub priority: Option<Priority>,
    /// `Some(None)` selects ungrouped tasks
    pub group: Option<Option<GroupId>>,
    pub search: Option<Regex>,
}

impl TaskQuery {
    pub fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if !self.completion.matches(task, now) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| task.tags.contains(t)) {
            return false;
        }
        if self.priority.is_some_and(|p| p != task.priority) {
            return false;
        }
        if let Some(group) = &self.group
            && &task.group_id != group
        {
            return false;
        }
        if let Some(re) = &self.search {
            let in_desc = task.description.as_deref().is_some_and(|d| re.is_match(d));
            if !re.is_match(&task.title) && !in_desc {
                return false;
            }
        }
        true
    }
}

pub fn filter_tasks<'a>(tasks: &[&'a Task], query: &TaskQuery, now: DateTime<Utc>) -> Vec<&'a Task> {
    tasks.iter().copied().filter(|t| query.matches(t, now)).collect()
}

/// Pinned tasks first (most recently pinned on top), the rest in their
/// original order.
pub fn pinned_first<'a>(tasks: &[&'a Task]) -> Vec<&'a Task> {
    let mut pinned: Vec<&Task> = tasks.iter().copied().filter(|t| t.is_pinned).collect();
    pinned.sort_by(|a, b| b.pinned_at.cmp(&a.pinned_at));
    pinned.extend(tasks.iter().copied().filter(|t| !t.is_pinned));
    pinned
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// A titled run of tasks
#[derive(Debug, Clone, Serialize)]
pub struct Section<'a, K> {
    pub key: K,
    pub title: String,
    pub tasks: Vec<&'a Task>,
}

/// Split a list's tasks by group: ungrouped first, then each group of the
/// list in store order. Empty groups are kept so the UI can show them.
pub fn group_by_group<'a>(
    store: &'a TaskStore,
    tasks: &[&'a Task],
    list_id: &ListId,
) -> Vec<Section<'a, Option<GroupId>>> {
    let mut sections = vec![Section {
        key: None,
        title: "Ungrouped".to_string(),
        tasks: tasks.iter().copied().filter(|t| t.group_id.is_none()).collect(),
    }];
    let groups: Vec<&Group> = store.groups_in_list(list_id).collect();
    for group in groups {
        sections.push(Section {
            key: Some(group.id.clone()),
            title: group.name.clone(),
            tasks: tasks
                .iter()
                .copied()
                .filter(|t| t.group_id.as_ref() == Some(&group.id))
                .collect(),
        });
    }
    sections
}

/// Highest priority first; empty buckets are dropped.
pub fn group_by_priority<'a>(tasks: &[&'a Task]) -> Vec<Section<'a, Priority>> {
    [Priority::High, Priority::Medium, Priority::Low, Priority::None]
        .into_iter()
        .map(|p| Section {
            key: p,
            title: p.label().to_string(),
            tasks: tasks.iter().copied().filter(|t| t.priority == p).collect(),
        })
        .filter(|s| !s.tasks.is_empty())
        .collect()
}

/// Deadline buckets relative to "now"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineBucket {
    Overdue,
    Today,
    Tomorrow,
    NextSevenDays,
    Later,
    NoDate,
}

impl DeadlineBucket {
    pub fn of(task: &Task, now: DateTime<Utc>) -> DeadlineBucket {
        let Some(deadline) = task.deadline else {
            return DeadlineBucket::NoDate;
        };
        if deadline < now && !task.completed {
            return DeadlineBucket::Overdue;
        }
        let today = now.date_naive();
        let day = deadline.date_naive();
        if day <= today {
            DeadlineBucket::Today
        } else if day == today + Duration::days(1) {
            DeadlineBucket::Tomorrow
        } else if day <= today + Duration::days(7) {
            DeadlineBucket::NextSevenDays
        } else {
            DeadlineBucket::Later
        }
    }

    fn title(self) -> &'static str {
        match self {
            DeadlineBucket::Overdue => "Overdue",
            DeadlineBucket::Today => "Today",
            DeadlineBucket::Tomorrow => "Tomorrow",
            DeadlineBucket::NextSevenDays => "Next 7 days",
            DeadlineBucket::Later => "Later",
            DeadlineBucket::NoDate => "No date",
        }
    }
}

pub fn group_by_deadline<'a>(tasks: &[&'a Task], now: DateTime<Utc>) -> Vec<Section<'a, DeadlineBucket>> {
    let buckets = [
        DeadlineBucket::Overdue,
        DeadlineBucket::Today,
        DeadlineBucket::Tomorrow,
        DeadlineBucket::NextSevenDays,
        DeadlineBucket::Later,
        DeadlineBucket::NoDate,
    ];
    buckets
        .into_iter()
        .map(|b| Section {
            key: b,
            title: b.title().to_string(),
            tasks: tasks
                .iter()
                .copied()
                .filter(|t| DeadlineBucket::of(t, now) == b)
                .collect(),
        })
        .filter(|s| !s.tasks.is_empty())
        .collect()
}

/// One section per tag in use (a task appears under each of its tags),
/// followed by untagged tasks.
pub fn group_by_tag<'a>(store: &TaskStore, tasks: &[&'a Task]) -> Vec<Section<'a, Option<TagId>>> {
    let mut sections: Vec<Section<'a, Option<TagId>>> = Vec::new();
    let mut index: HashMap<TagId, usize> = HashMap::new();
    for task in tasks.iter().copied() {
        for tag in &task.tags {
            let slot = *index.entry(tag.clone()).or_insert_with(|| {
                let title = store.tag(tag).map_or_else(|| tag.to_string(), |t| t.name.clone());
                sections.push(Section {
                    key: Some(tag.clone()),
                    title,
                    tasks: Vec::new(),
                });
                sections.len() - 1
            });
            sections[slot].tasks.push(task);
        }
    }
    let untagged: Vec<&Task> = tasks.iter().copied().filter(|t| t.tags.is_empty()).collect();
    if !untagged.is_empty() {
        sections.push(Section {
            key: None,
            title: "Untagged".to_string(),
            tasks: untagged,
        });
    }
    sections
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

/// One visible row of a flattened task tree
#[derive(Debug, Clone, Serialize)]
pub struct TreeRow<'a> {
    pub task: &'a Task,
    /// Depth within the displayed set (a task whose parent is filtered out
    /// shows at depth 0)
    pub depth: usize,
    pub has_children: bool,
    pub collapsed: bool,
    pub effectively_complete: bool,
}

/// Lay out `tasks` as a tree in depth-first order. Roots are tasks whose
/// parent is not in the set; children follow their parent in set order.
/// Descendants of ids in `collapsed` are hidden.
pub fn flatten_hierarchy<'a>(
    store: &TaskStore,
    tasks: &[&'a Task],
    collapsed: &HashSet<TaskId>,
) -> Vec<TreeRow<'a>> {
    let present: HashSet<&TaskId> = tasks.iter().map(|t| &t.id).collect();
    let mut children: HashMap<&TaskId, Vec<&'a Task>> = HashMap::new();
    let mut roots = Vec::new();
    for task in tasks.iter().copied() {
        match &task.parent_id {
            Some(pid) if present.contains(pid) => children.entry(pid).or_default().push(task),
            _ => roots.push(task),
        }
    }

    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for root in roots {
        push_rows(store, root, 0, &children, collapsed, &mut seen, &mut rows);
    }
    rows
}

fn push_rows<'a>(
    store: &TaskStore,
    task: &'a Task,
    depth: usize,
    children: &HashMap<&TaskId, Vec<&'a Task>>,
    collapsed: &HashSet<TaskId>,
    seen: &mut HashSet<TaskId>,
    rows: &mut Vec<TreeRow<'a>>,
) {
    if !seen.insert(task.id.clone()) {
        return;
    }
    let kids = children.get(&task.id);
    let is_collapsed = collapsed.contains(&task.id);
    rows.push(TreeRow {
        task,
        depth,
        has_children: kids.is_some_and(|k| !k.is_empty()),
        collapsed: is_collapsed,
        effectively_complete: cascade::effectively_complete(store, &task.id),
    });
    if is_collapsed {
        return;
    }
    for child in kids.into_iter().flatten() {
        push_rows(store, child, depth + 1, children, collapsed, seen, rows);
    }
}

/// Tags in tree order with their depth
pub fn tag_tree(store: &TaskStore) -> Vec<(usize, &Tag)> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let roots: Vec<&Tag> = store
        .tags()
        .filter(|t| t.parent_id.as_ref().is_none_or(|p| store.tag(p).is_none()))
        .collect();
    for root in roots {
        push_tag(store, root, 0, &mut seen, &mut out);
    }
    // tags whose parents loop back on themselves have no root
    for tag in store.tags() {
        push_tag(store, tag, 0, &mut seen, &mut out);
    }
    out
}

fn push_tag<'a>(
    store: &'a TaskStore,
    tag: &'a Tag,
    depth: usize,
    seen: &mut HashSet<TagId>,
    out: &mut Vec<(usize, &'a Tag)>,
) {
    if !seen.insert(tag.id.clone()) {
        return;
    }
    out.push((depth, tag));
    for child in store.tags().filter(|t| t.parent_id.as_ref() == Some(&tag.id)) {
        push_tag(store, child, depth + 1, seen, out);
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListCounts {
    pub open: usize,
    pub completed: usize,
    pub overdue: usize,
    pub binned: usize,
}

pub fn list_counts(store: &TaskStore, list_id: &ListId, now: DateTime<Utc>) -> ListCounts {
    let mut counts = ListCounts::default();
    for task in store.tasks().filter(|t| &t.list_id == list_id) {
        if task.is_deleted() {
            counts.binned += 1;
        } else if task.completed {
            counts.completed += 1;
        } else {
            counts.open += 1;
            if task.is_overdue(now) {
                counts.overdue += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    fn task(id: &str, parent: Option<&str>, depth: u32) -> Task {
        let mut t = Task::new(id.into(), id, "L1".into());
        t.parent_id = parent.map(TaskId::from);
        t.depth = depth;
        t
    }

    fn sample_store() -> TaskStore {
        let mut store = TaskStore::from_tasks(vec![
            task("a", None, 0),
            task("b", Some("a"), 1),
            task("c", Some("b"), 2),
            task("d", None, 0),
            task("e", Some("a"), 1),
        ]);
        let mut other = task("x", None, 0);
        other.list_id = "L2".into();
        store.upsert(other);
        store.upsert_group(Group::new("g1", "Errands", "L1"));
        store
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.to_string()).collect()
    }

    #[test]
    fn active_list_excludes_other_lists_and_bin() {
        let mut store = sample_store();
        store.task_mut(&"d".into()).unwrap().deleted_at = Some(now());
        let tasks = active_list_tasks(&store, &"L1".into());
        assert_eq!(ids(&tasks), vec!["a", "b", "c", "e"]);
    }

    #[test]
    fn flatten_nests_children_and_respects_collapse() {
        let store = sample_store();
        let tasks = active_list_tasks(&store, &"L1".into());
        let rows = flatten_hierarchy(&store, &tasks, &HashSet::new());
        let layout: Vec<(String, usize)> = rows
            .iter()
            .map(|r| (r.task.id.to_string(), r.depth))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("e".to_string(), 1),
                ("d".to_string(), 0),
            ]
        );

        let collapsed: HashSet<TaskId> = [TaskId::from("b")].into_iter().collect();
        let rows = flatten_hierarchy(&store, &tasks, &collapsed);
        let visible: Vec<&str> = rows.iter().map(|r| r.task.id.as_str()).collect();
        assert_eq!(visible, vec!["a", "b", "e", "d"]);
        assert!(rows[1].collapsed && rows[1].has_children);
    }

    #[test]
    fn flatten_promotes_rows_whose_parent_is_filtered_out() {
        let mut store = sample_store();
        store.task_mut(&"c".into()).unwrap().completed = true;
        let tasks = active_list_tasks(&store, &"L1".into());
        let query = TaskQuery {
            completion: CompletionFilter::Completed,
            ..Default::default()
        };
        let done = filter_tasks(&tasks, &query, now());
        let rows = flatten_hierarchy(&store, &done, &HashSet::new());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].depth, 0);
        assert!(rows[0].effectively_complete);
    }

    #[test]
    fn query_combines_tag_search_and_group() {
        let mut store = sample_store();
        {
            let a = store.task_mut(&"a".into()).unwrap();
            a.title = "Buy milk".into();
            a.tags.insert("shop".into());
            a.group_id = Some("g1".into());
        }
        let tasks = active_list_tasks(&store, &"L1".into());
        let query = TaskQuery {
            tags: vec!["shop".into()],
            search: Some(Regex::new("(?i)milk").unwrap()),
            group: Some(Some("g1".into())),
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &query, now())), vec!["a"]);

        let ungrouped = TaskQuery {
            group: Some(None),
            ..Default::default()
        };
        assert_eq!(
            ids(&filter_tasks(&tasks, &ungrouped, now())),
            vec!["b", "c", "d", "e"]
        );
    }

    #[test]
    fn groups_keep_empty_sections() {
        let store = sample_store();
        let tasks = active_list_tasks(&store, &"L1".into());
        let sections = group_by_group(&store, &tasks, &"L1".into());
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].tasks.len(), 5);
        assert_eq!(sections[1].title, "Errands");
        assert!(sections[1].tasks.is_empty());
    }

    #[test]
    fn priority_sections_high_first() {
        let mut store = sample_store();
        store.task_mut(&"d".into()).unwrap().priority = Priority::High;
        store.task_mut(&"b".into()).unwrap().priority = Priority::Low;
        let tasks = active_list_tasks(&store, &"L1".into());
        let sections = group_by_priority(&tasks);
        let keys: Vec<Priority> = sections.iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![Priority::High, Priority::Low, Priority::None]);
    }

    #[test]
    fn deadline_buckets() {
        let mut t = task("t", None, 0);
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::NoDate);
        t.deadline = Some(now() - Duration::hours(2));
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::Overdue);
        t.completed = true;
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::Today);
        t.completed = false;
        t.deadline = Some(now() + Duration::hours(3));
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::Today);
        t.deadline = Some(now() + Duration::days(1));
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::Tomorrow);
        t.deadline = Some(now() + Duration::days(5));
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::NextSevenDays);
        t.deadline = Some(now() + Duration::days(30));
        assert_eq!(DeadlineBucket::of(&t, now()), DeadlineBucket::Later);
    }

    #[test]
    fn tag_sections_and_untagged() {
        let mut store = sample_store();
        store.upsert_tag(Tag::new("home", "Home"));
        store.task_mut(&"a".into()).unwrap().tags.insert("home".into());
        store.task_mut(&"d".into()).unwrap().tags.insert("home".into());
        store.task_mut(&"d".into()).unwrap().tags.insert("misc".into());
        let tasks = active_list_tasks(&store, &"L1".into());
        let sections = group_by_tag(&store, &tasks);
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Home", "misc", "Untagged"]);
        assert_eq!(sections[0].tasks.len(), 2);
        assert_eq!(sections[2].tasks.len(), 3);
    }

    #[test]
    fn pinned_tasks_float_to_top() {
        let mut store = sample_store();
        store.task_mut(&"d".into()).unwrap().is_pinned = true;
        store.task_mut(&"d".into()).unwrap().pinned_at = Some(now());
        store.task_mut(&"e".into()).unwrap().is_pinned = true;
        store.task_mut(&"e".into()).unwrap().pinned_at = Some(now() + Duration::minutes(5));
        let tasks = active_list_tasks(&store, &"L1".into());
        assert_eq!(ids(&pinned_first(&tasks)), vec!["e", "d", "a", "b", "c"]);
    }

    #[test]
    fn tag_tree_depths() {
        let mut store = TaskStore::new();
        store.upsert_tag(Tag::new("work", "Work"));
        store.upsert_tag(Tag::new("home", "Home"));
        store.upsert_tag(Tag::new("meet", "Meetings").with_parent("work"));
        let tree: Vec<(usize, &str)> = tag_tree(&store)
            .into_iter()
            .map(|(d, t)| (d, t.id.as_str()))
            .collect();
        assert_eq!(tree, vec![(0, "work"), (1, "meet"), (0, "home")]);
    }

    #[test]
    fn tag_tree_keeps_tags_in_a_parent_loop() {
        let mut store = TaskStore::new();
        store.upsert_tag(Tag::new("x", "X").with_parent("y"));
        store.upsert_tag(Tag::new("y", "Y").with_parent("x"));
        store.upsert_tag(Tag::new("z", "Z"));
        let tree: Vec<(usize, &str)> = tag_tree(&store)
            .into_iter()
            .map(|(d, t)| (d, t.id.as_str()))
            .collect();
        assert_eq!(tree, vec![(0, "z"), (0, "x"), (1, "y")]);
    }

    #[test]
    fn counts_per_list() {
        let mut store = sample_store();
        store.task_mut(&"a".into()).unwrap().completed = true;
        store.task_mut(&"b".into()).unwrap().deleted_at = Some(now());
        store.task_mut(&"d".into()).unwrap().deadline = Some(now() - Duration::days(1));
        let counts = list_counts(&store, &"L1".into(), now());
        assert_eq!(
            counts,
            ListCounts {
                open: 3,
                completed: 1,
                overdue: 1,
                binned: 1
            }
        );
    }
}
