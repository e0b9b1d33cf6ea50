use std::collections::HashSet;

use crate::model::ids::TaskId;
use crate::model::store::TaskStore;

/// Ids of `id`'s ancestors, nearest first. Stops at a missing parent or a
/// repeated id, so a corrupted store cannot loop forever.
pub fn ancestors(store: &TaskStore, id: &TaskId) -> Vec<TaskId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(id.clone());
    let mut current = store.task(id).and_then(|t| t.parent_id.clone());
    while let Some(pid) = current {
        if !seen.insert(pid.clone()) {
            break;
        }
        current = store.task(&pid).and_then(|t| t.parent_id.clone());
        out.push(pid);
    }
    out
}

/// True when `ancestor` appears on `id`'s parent chain.
pub fn is_ancestor(store: &TaskStore, ancestor: &TaskId, id: &TaskId) -> bool {
    ancestors(store, id).iter().any(|a| a == ancestor)
}

/// All descendants of `id` in depth-first pre-order (children in arena order).
/// `id` itself is not included.
pub fn descendants(store: &TaskStore, id: &TaskId) -> Vec<TaskId> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(id.clone());
    collect_descendants(store, id, &mut seen, &mut out);
    out
}

fn collect_descendants(
    store: &TaskStore,
    id: &TaskId,
    seen: &mut HashSet<TaskId>,
    out: &mut Vec<TaskId>,
) {
    for child in store.child_ids(id) {
        if seen.insert(child.clone()) {
            out.push(child.clone());
            collect_descendants(store, &child, seen, out);
        }
    }
}

/// `id` followed by its descendants
pub fn subtree(store: &TaskStore, id: &TaskId) -> Vec<TaskId> {
    let mut out = vec![id.clone()];
    out.extend(descendants(store, id));
    out
}

/// Depth a task would have under `parent`
pub fn depth_under(store: &TaskStore, parent: Option<&TaskId>) -> u32 {
    parent
        .and_then(|p| store.task(p))
        .map_or(0, |p| p.depth + 1)
}

/// Walk the subtree below `root` and set each descendant's depth to its
/// parent's depth + 1. `root`'s own depth is left as is.
pub fn recompute_subtree_depths(store: &mut TaskStore, root: &TaskId) {
    let mut stack = vec![root.clone()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let Some(depth) = store.task(&id).map(|t| t.depth) else {
            continue;
        };
        for child in store.child_ids(&id) {
            if let Some(c) = store.task_mut(&child) {
                c.depth = depth + 1;
            }
            stack.push(child);
        }
    }
}

/// Bring a freshly loaded store into a consistent forest: parents that are
/// missing, live in another list, or would close a cycle are dropped
/// (the task becomes a root), then every depth is recomputed from the roots.
pub fn normalize(store: &mut TaskStore) {
    for id in store.order() {
        let Some(task) = store.task(&id) else { continue };
        let Some(pid) = task.parent_id.clone() else {
            continue;
        };
        let parent_ok = store
            .task(&pid)
            .is_some_and(|p| p.list_id == task.list_id && (p.is_deleted() || !task.is_deleted()));
        // a cycle shows up as the task being its own ancestor
        let cyclic = pid == id || is_ancestor(store, &id, &pid);
        if !parent_ok || cyclic {
            if let Some(t) = store.task_mut(&id) {
                t.parent_id = None;
            }
        }
    }
    for id in store.order() {
        let is_root = store.task(&id).is_some_and(|t| t.parent_id.is_none());
        if is_root {
            if let Some(t) = store.task_mut(&id) {
                t.depth = 0;
            }
            recompute_subtree_depths(store, &id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::Task;

    fn task(id: &str, parent: Option<&str>, depth: u32) -> Task {
        let mut t = Task::new(id.into(), id, "L1".into());
        t.parent_id = parent.map(TaskId::from);
        t.depth = depth;
        t
    }

    fn sample_store() -> TaskStore {
        TaskStore::from_tasks(vec![
            task("a", None, 0),
            task("b", Some("a"), 1),
            task("c", Some("b"), 2),
            task("d", Some("a"), 1),
            task("e", None, 0),
        ])
    }

    #[test]
    fn ancestors_nearest_first() {
        let store = sample_store();
        assert_eq!(ancestors(&store, &"c".into()), vec![TaskId::from("b"), TaskId::from("a")]);
        assert!(ancestors(&store, &"e".into()).is_empty());
        assert!(is_ancestor(&store, &"a".into(), &"c".into()));
        assert!(!is_ancestor(&store, &"c".into(), &"a".into()));
    }

    #[test]
    fn descendants_pre_order() {
        let store = sample_store();
        let ids: Vec<String> = descendants(&store, &"a".into())
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn ancestors_survive_cycles() {
        let store = TaskStore::from_tasks(vec![task("x", Some("y"), 1), task("y", Some("x"), 1)]);
        assert_eq!(ancestors(&store, &"x".into()), vec![TaskId::from("y")]);
        assert_eq!(descendants(&store, &"x".into()), vec![TaskId::from("y")]);
    }

    #[test]
    fn normalize_fixes_depths_and_dangling_parents() {
        let mut store = TaskStore::from_tasks(vec![
            task("a", None, 3),
            task("b", Some("a"), 0),
            task("c", Some("b"), 7),
            task("orphan", Some("gone"), 2),
            task("x", Some("y"), 1),
            task("y", Some("x"), 1),
        ]);
        normalize(&mut store);
        assert_eq!(store.task(&"a".into()).unwrap().depth, 0);
        assert_eq!(store.task(&"b".into()).unwrap().depth, 1);
        assert_eq!(store.task(&"c".into()).unwrap().depth, 2);
        let orphan = store.task(&"orphan".into()).unwrap();
        assert!(orphan.parent_id.is_none());
        assert_eq!(orphan.depth, 0);
        // one side of the cycle is cut
        let roots = ["x", "y"]
            .iter()
            .filter(|id| store.task(&TaskId::from(**id)).unwrap().parent_id.is_none())
            .count();
        assert_eq!(roots, 1);
    }
}
