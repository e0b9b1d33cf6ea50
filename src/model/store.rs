use indexmap::IndexMap;

use super::ids::{GroupId, ListId, TagId, TaskId};
use super::list::{Group, TaskList};
use super::tag::Tag;
use super::task::Task;

/// The canonical in-memory task set.
///
/// Tasks live in an ordered arena keyed by id; the arena order is the
/// user-visible ordering that drag-and-drop manipulates. Parent/child links
/// are ids, never references, so a whole-arena replacement is one move.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStore {
    tasks: IndexMap<TaskId, Task>,
    lists: IndexMap<ListId, TaskList>,
    groups: IndexMap<GroupId, Group>,
    tags: IndexMap<TagId, Tag>,
}

impl TaskStore {
    pub fn new() -> Self {
        TaskStore::default()
    }

    /// Build a store from tasks in display order. Later duplicates win.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut store = TaskStore::new();
        for task in tasks {
            store.tasks.insert(task.id.clone(), task);
        }
        store
    }

    // --- tasks ---

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks in arena order, binned ones included
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.tasks.get_index_of(id)
    }

    /// Current arena order
    pub fn order(&self) -> Vec<TaskId> {
        self.tasks.keys().cloned().collect()
    }

    /// Insert or overwrite. New tasks go to the end; existing ones keep
    /// their position.
    pub fn upsert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Insert a new task at `index` (clamped to the end).
    pub fn insert_at(&mut self, index: usize, task: Task) {
        let (pos, _) = self.tasks.insert_full(task.id.clone(), task);
        let target = index.min(self.tasks.len() - 1);
        if pos != target {
            self.tasks.move_index(pos, target);
        }
    }

    /// Remove a task, preserving the order of the rest.
    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.tasks.shift_remove(id)
    }

    /// Move the entry at `from` to `to`, shifting the entries in between.
    pub fn move_index(&mut self, from: usize, to: usize) {
        if from < self.tasks.len() && to < self.tasks.len() && from != to {
            self.tasks.move_index(from, to);
        }
    }

    /// Swap the whole task array for a new one in a single step.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
    }

    /// Reorder existing tasks to follow `order`. Ids missing from `order`
    /// keep their relative order after the named ones; unknown ids are ignored.
    pub fn apply_order(&mut self, order: &[TaskId]) {
        let mut next: IndexMap<TaskId, Task> = IndexMap::with_capacity(self.tasks.len());
        for id in order {
            if let Some(task) = self.tasks.shift_remove(id) {
                next.insert(id.clone(), task);
            }
        }
        next.extend(self.tasks.drain(..));
        self.tasks = next;
    }

    /// Give a task a new id in place, re-pointing children at it.
    /// Returns false when `old` is unknown or `new` is already taken.
    pub fn rekey(&mut self, old: &TaskId, new: &TaskId) -> bool {
        if old == new {
            return self.contains(old);
        }
        if self.contains(new) {
            return false;
        }
        let Some(index) = self.tasks.get_index_of(old) else {
            return false;
        };
        let Some(mut task) = self.tasks.shift_remove(old) else {
            return false;
        };
        task.id = new.clone();
        self.insert_at(index, task);
        for child in self.tasks.values_mut() {
            if child.parent_id.as_ref() == Some(old) {
                child.parent_id = Some(new.clone());
            }
        }
        true
    }

    /// Direct children of `id` in arena order, binned ones included
    pub fn children(&self, id: &TaskId) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.parent_id.as_ref() == Some(id))
            .collect()
    }

    pub fn child_ids(&self, id: &TaskId) -> Vec<TaskId> {
        self.children(id).into_iter().map(|t| t.id.clone()).collect()
    }

    // --- lists and groups ---

    pub fn list(&self, id: &ListId) -> Option<&TaskList> {
        self.lists.get(id)
    }

    pub fn lists(&self) -> impl Iterator<Item = &TaskList> {
        self.lists.values()
    }

    pub fn upsert_list(&mut self, list: TaskList) {
        self.lists.insert(list.id.clone(), list);
    }

    /// Remove a list together with its groups and tasks.
    pub fn remove_list(&mut self, id: &ListId) -> Option<TaskList> {
        let removed = self.lists.shift_remove(id);
        self.groups.retain(|_, g| &g.list_id != id);
        self.tasks.retain(|_, t| &t.list_id != id);
        removed
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn groups_in_list<'a>(&'a self, list_id: &'a ListId) -> impl Iterator<Item = &'a Group> {
        self.groups.values().filter(move |g| &g.list_id == list_id)
    }

    pub fn upsert_group(&mut self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Remove a group; its tasks fall back to the ungrouped part of the list.
    pub fn remove_group(&mut self, id: &GroupId) -> Option<Group> {
        let removed = self.groups.shift_remove(id);
        for task in self.tasks.values_mut() {
            if task.group_id.as_ref() == Some(id) {
                task.group_id = None;
            }
        }
        removed
    }

    // --- tags ---

    pub fn tag(&self, id: &TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn upsert_tag(&mut self, tag: Tag) {
        self.tags.insert(tag.id.clone(), tag);
    }

    /// Remove a tag and strip it from every task. Child tags move up to the
    /// removed tag's parent.
    pub fn remove_tag(&mut self, id: &TagId) -> Option<Tag> {
        let removed = self.tags.shift_remove(id)?;
        for tag in self.tags.values_mut() {
            if tag.parent_id.as_ref() == Some(id) {
                tag.parent_id = removed.parent_id.clone();
            }
        }
        for task in self.tasks.values_mut() {
            task.tags.shift_remove(id);
        }
        Some(removed)
    }
}
