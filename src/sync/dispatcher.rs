//! The Mutation Dispatcher.
//!
//! `dispatch` applies an intent to a fresh copy of the store and swaps the
//! copy in only when the intent succeeded, so readers holding the previous
//! `Arc` never see a half-applied change. Each successful intent yields at
//! most one [`PersistCall`]. Calls that name a placeholder id still waiting
//! for its create to resolve are held back and released, rewritten to the
//! server id, once it does.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::io::api::ApiError;
use crate::model::config::RollbackPolicy;
use crate::model::ids::{IdGenerator, TaskId};
use crate::model::store::TaskStore;
use crate::model::task::{NewTask, Task, TaskPatch};
use crate::ops::task_ops::{self, TaskError};
use crate::ops::{bin, cascade, reorder};
use crate::sync::intent::{Intent, PersistCall};

pub type OpId = u64;

/// A call ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub op: OpId,
    pub call: PersistCall,
}

/// The answer to an [`Outgoing`] call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub op: OpId,
    pub result: Result<Option<Task>, ApiError>,
}

/// What a dispatch did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatched {
    /// `None` when the intent changed nothing that needs persisting
    pub op: Option<OpId>,
    /// For Add: the new task's id, a placeholder until the server answers
    pub task: Option<TaskId>,
    /// The call to issue now. `None` while it waits on a placeholder.
    pub outgoing: Option<Outgoing>,
}

/// What handling a completion did
#[derive(Debug, Default)]
pub struct Settled {
    /// Held calls that can now be issued
    pub released: Vec<Outgoing>,
    /// Ops that failed, dependents included
    pub failed: Vec<(OpId, &'static str, ApiError)>,
    pub store_changed: bool,
}

/// Pre-intent versions of every task an intent touched
#[derive(Debug, Clone, Default)]
struct Snapshot {
    /// `None` marks a task the intent created
    before: Vec<(TaskId, Option<Task>)>,
    /// Arena order, kept when the intent moved or removed tasks
    order: Option<Vec<TaskId>>,
}

impl Snapshot {
    fn capture(before: &TaskStore, after: &TaskStore, keep_order: bool) -> Snapshot {
        let mut changed: Vec<(TaskId, Option<Task>)> = before
            .tasks()
            .filter(|t| after.task(&t.id) != Some(t))
            .map(|t| (t.id.clone(), Some(t.clone())))
            .collect();
        changed.extend(
            after
                .tasks()
                .filter(|t| !before.contains(&t.id))
                .map(|t| (t.id.clone(), None)),
        );
        let order = (keep_order || after.len() < before.len()).then(|| before.order());
        Snapshot {
            before: changed,
            order,
        }
    }

    fn rename(&mut self, old: &TaskId, new: &TaskId) {
        for (id, task) in &mut self.before {
            if id == old {
                *id = new.clone();
            }
            if let Some(task) = task {
                if &task.id == old {
                    task.id = new.clone();
                }
                if task.parent_id.as_ref() == Some(old) {
                    task.parent_id = Some(new.clone());
                }
            }
        }
        for id in self.order.iter_mut().flatten() {
            if id == old {
                *id = new.clone();
            }
        }
    }

    fn restore(&self, store: &mut TaskStore) {
        for (id, before) in &self.before {
            match before {
                None => {
                    store.remove(id);
                }
                Some(task) => match store.task_mut(id) {
                    Some(slot) => *slot = task.clone(),
                    None => store.upsert(task.clone()),
                },
            }
        }
        if let Some(order) = &self.order {
            store.apply_order(order);
        }
    }
}

#[derive(Debug)]
struct PendingOp {
    intent: &'static str,
    call: PersistCall,
    snapshot: Snapshot,
    /// The placeholder an Add is waiting to swap
    placeholder: Option<TaskId>,
    /// Set once a remote create event already supplied the server id
    adopted: bool,
    issued: bool,
}

pub struct Dispatcher {
    ids: Arc<dyn IdGenerator>,
    policy: RollbackPolicy,
    next_op: OpId,
    pending: BTreeMap<OpId, PendingOp>,
    /// placeholder -> server id
    resolved: HashMap<TaskId, TaskId>,
}

impl Dispatcher {
    pub fn new(ids: Arc<dyn IdGenerator>, policy: RollbackPolicy) -> Self {
        Dispatcher {
            ids,
            policy,
            next_op: 1,
            pending: BTreeMap::new(),
            resolved: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RollbackPolicy {
        self.policy
    }

    /// Calls sent and not yet answered
    pub fn in_flight(&self) -> usize {
        self.pending.values().filter(|p| p.issued).count()
    }

    /// Calls waiting on a placeholder
    pub fn held(&self) -> usize {
        self.pending.values().filter(|p| !p.issued).count()
    }

    /// Server id a placeholder was swapped for, if it has been
    pub fn resolved_id(&self, placeholder: &TaskId) -> Option<&TaskId> {
        self.resolved.get(placeholder)
    }

    /// Apply `intent` optimistically and return the call to persist it.
    /// Validation failures leave the store untouched.
    pub fn dispatch(
        &mut self,
        store: &mut Arc<TaskStore>,
        intent: Intent,
        now: DateTime<Utc>,
    ) -> Result<Dispatched, TaskError> {
        let before = Arc::clone(store);
        let mut next = TaskStore::clone(&before);
        let (call, task) = apply_intent(&mut next, &intent, self.ids.as_ref(), now)?;
        let keep_order = matches!(intent, Intent::Reorder { .. } | Intent::SetParent { .. });
        let snapshot = Snapshot::capture(&before, &next, keep_order);
        *store = Arc::new(next);

        let Some(mut call) = call else {
            debug!(intent = intent.kind(), "nothing to persist");
            return Ok(Dispatched {
                op: None,
                task,
                outgoing: None,
            });
        };

        let mut waiting = false;
        for dep in call.placeholder_deps() {
            if let Some(real) = self.resolved.get(&dep) {
                call.rewrite_id(&dep, real);
            } else if self.owner_of(&dep).is_some() {
                waiting = true;
            } else {
                warn!(
                    intent = intent.kind(),
                    placeholder = %dep,
                    "task was never created on the server, change stays local"
                );
                return Ok(Dispatched {
                    op: None,
                    task,
                    outgoing: None,
                });
            }
        }

        let op = self.next_op;
        self.next_op += 1;
        let placeholder = match &call {
            PersistCall::Create { placeholder, .. } => Some(placeholder.clone()),
            _ => None,
        };
        let outgoing = (!waiting).then(|| Outgoing {
            op,
            call: call.clone(),
        });
        debug!(op, intent = intent.kind(), held = waiting, "dispatched");
        self.pending.insert(
            op,
            PendingOp {
                intent: intent.kind(),
                call,
                snapshot,
                placeholder,
                adopted: false,
                issued: !waiting,
            },
        );
        Ok(Dispatched {
            op: Some(op),
            task,
            outgoing,
        })
    }

    /// Pending Add that owns `placeholder`
    fn owner_of(&self, placeholder: &TaskId) -> Option<OpId> {
        self.pending
            .iter()
            .find(|(_, p)| p.placeholder.as_ref() == Some(placeholder) && !p.adopted)
            .map(|(op, _)| *op)
    }

    /// Handle the answer to an issued call.
    pub fn complete(&mut self, store: &mut Arc<TaskStore>, completion: Completion) -> Settled {
        let mut settled = Settled::default();
        let Some(op) = self.pending.remove(&completion.op) else {
            debug!(op = completion.op, "completion for unknown op");
            return settled;
        };

        match completion.result {
            Ok(echo) => match (&op.placeholder, op.adopted) {
                (Some(tmp), false) => match echo {
                    Some(server) => {
                        info!(op = completion.op, placeholder = %tmp, id = %server.id, "task created");
                        let changed = self.resolve(Arc::make_mut(store), tmp, &server.id);
                        settled.store_changed = changed;
                        settled.released = self.release();
                    }
                    None => {
                        let error = ApiError::Decode("create returned no task".to_string());
                        self.fail(store, completion.op, op, error, &mut settled);
                    }
                },
                _ => debug!(op = completion.op, intent = op.intent, "persisted"),
            },
            Err(error) if op.adopted => {
                // the server announced the task, so it exists regardless
                warn!(op = completion.op, %error, "create failed after the task was announced");
            }
            Err(error) => self.fail(store, completion.op, op, error, &mut settled),
        }
        settled
    }

    fn fail(
        &mut self,
        store: &mut Arc<TaskStore>,
        op_id: OpId,
        op: PendingOp,
        error: ApiError,
        settled: &mut Settled,
    ) {
        warn!(op = op_id, intent = op.intent, %error, policy = ?self.policy, "persistence failed");
        // held calls waiting on a placeholder that will never resolve fail too
        let mut failed = vec![(op_id, op)];
        let mut i = 0;
        while i < failed.len() {
            if let Some(tmp) = failed[i].1.placeholder.clone() {
                let dependents: Vec<OpId> = self
                    .pending
                    .iter()
                    .filter(|(_, p)| p.call.placeholder_deps().contains(&tmp))
                    .map(|(id, _)| *id)
                    .collect();
                for id in dependents {
                    if let Some(dep) = self.pending.remove(&id) {
                        failed.push((id, dep));
                    }
                }
            }
            i += 1;
        }

        if self.policy == RollbackPolicy::Revert {
            let target = Arc::make_mut(store);
            // newest first, so older snapshots win
            let mut newest_first: Vec<&(OpId, PendingOp)> = failed.iter().collect();
            newest_first.sort_by(|a, b| b.0.cmp(&a.0));
            for (id, failed_op) in newest_first {
                debug!(op = id, intent = failed_op.intent, "reverting");
                failed_op.snapshot.restore(target);
            }
            settled.store_changed = true;
        }
        settled.failed.extend(
            failed
                .into_iter()
                .map(|(id, failed_op)| (id, failed_op.intent, error.clone())),
        );
    }

    /// Swap a placeholder for the server id everywhere. Returns whether the
    /// store changed.
    fn resolve(&mut self, store: &mut TaskStore, tmp: &TaskId, real: &TaskId) -> bool {
        self.resolved.insert(tmp.clone(), real.clone());
        for op in self.pending.values_mut() {
            if !op.issued {
                op.call.rewrite_id(tmp, real);
            }
            op.snapshot.rename(tmp, real);
        }
        if !store.contains(tmp) {
            // deleted locally in the meantime
            return false;
        }
        if store.contains(real) {
            // a remote create arrived first without being matched; the
            // local copy carries the newer edits
            store.remove(real);
        }
        store.rekey(tmp, real)
    }

    /// Issue every held call whose placeholders have all resolved.
    fn release(&mut self) -> Vec<Outgoing> {
        let ready: Vec<OpId> = self
            .pending
            .iter()
            .filter(|(_, p)| !p.issued)
            .filter(|(_, p)| {
                p.call
                    .placeholder_deps()
                    .iter()
                    .all(|d| self.resolved.contains_key(d))
            })
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::new();
        for id in ready {
            if let Some(op) = self.pending.get_mut(&id) {
                op.issued = true;
                debug!(op = id, intent = op.intent, "releasing held call");
                out.push(Outgoing {
                    op: id,
                    call: op.call.clone(),
                });
            }
        }
        out
    }

    /// Match a remote create against a pending Add (same list, parent and
    /// title) and take over the server id before the create call answers.
    /// Returns the calls this releases, or `None` when nothing matched.
    pub fn adopt(&mut self, store: &mut Arc<TaskStore>, server: &Task) -> Option<Vec<Outgoing>> {
        if store.contains(&server.id) {
            return None;
        }
        let (op_id, tmp) = self.pending.iter().find_map(|(id, p)| {
            let tmp = p.placeholder.as_ref().filter(|_| !p.adopted)?;
            let local = store.task(tmp)?;
            let same = local.list_id == server.list_id
                && local.title == server.title
                && local.parent_id == server.parent_id;
            same.then(|| (*id, tmp.clone()))
        })?;
        info!(op = op_id, placeholder = %tmp, id = %server.id, "adopting server id from push event");
        if let Some(op) = self.pending.get_mut(&op_id) {
            op.adopted = true;
        }
        self.resolve(Arc::make_mut(store), &tmp, &server.id);
        Some(self.release())
    }
}

// ---------------------------------------------------------------------------
// Intent application
// ---------------------------------------------------------------------------

type Applied = (Option<PersistCall>, Option<TaskId>);

fn apply_intent(
    store: &mut TaskStore,
    intent: &Intent,
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> Result<Applied, TaskError> {
    let call = match intent {
        Intent::Add { task, position } => {
            let id = ids.placeholder_id();
            task_ops::add_task(store, id.clone(), task.clone(), position, now)?;
            let body = NewTask {
                title: task.title.trim().to_string(),
                ..task.clone()
            };
            let call = PersistCall::Create {
                placeholder: id.clone(),
                body,
            };
            return Ok((Some(call), Some(id)));
        }
        Intent::Change { id, patch } => {
            let before = task_ops::find_task(store, id)?.clone();
            if !task_ops::change_task(store, id, patch, now)? {
                None
            } else {
                let after = task_ops::find_task(store, id)?;
                let mut sent = TaskPatch::diff(&before, after);
                sent.updated_at = after.updated_at;
                Some(PersistCall::Update {
                    id: id.clone(),
                    patch: sent,
                })
            }
        }
        Intent::Toggle { id, completed } => {
            let flipped = cascade::set_completed(store, id, *completed, now)?;
            (!flipped.is_empty()).then(|| PersistCall::SetCompleted {
                id: id.clone(),
                completed: *completed,
                apply_to_children: true,
            })
        }
        Intent::Delete { id } => {
            bin::soft_delete(store, id, now)?;
            Some(PersistCall::SoftDelete { id: id.clone() })
        }
        Intent::Restore { id } => {
            bin::restore(store, id, now)?;
            Some(PersistCall::Restore { id: id.clone() })
        }
        Intent::HardDelete { id } => {
            bin::hard_delete(store, id)?;
            Some(PersistCall::Purge { id: id.clone() })
        }
        Intent::EmptyBin => {
            // purging a bin root takes its binned descendants with it
            let roots: Vec<TaskId> = bin::bin_tasks(store)
                .filter(|t| {
                    t.parent_id
                        .as_ref()
                        .and_then(|p| store.task(p))
                        .is_none_or(|p| !p.is_deleted())
                })
                .map(|t| t.id.clone())
                .collect();
            bin::empty_bin(store);
            batch(roots.into_iter().map(|id| PersistCall::Purge { id }))
        }
        Intent::Reorder { dragged, target } => {
            match reorder::plan_drop(store, dragged, target, now)? {
                None => None,
                Some(plan) => {
                    store.replace_all(plan.tasks);
                    Some(reparent_call(store, dragged))
                }
            }
        }
        Intent::SetParent { id, parent } => {
            task_ops::set_parent(store, id, parent.as_ref(), now)?;
            Some(reparent_call(store, id))
        }
        Intent::CompleteAll {
            list,
            filter,
            completed,
        } => {
            let flipped = task_ops::complete_all(store, list.as_ref(), *filter, *completed, now);
            batch(flipped.into_iter().map(|id| PersistCall::SetCompleted {
                id,
                completed: *completed,
                apply_to_children: false,
            }))
        }
        Intent::DeleteAllCompleted { list } => {
            let roots = task_ops::completed_roots(store, list.as_ref());
            for id in &roots {
                bin::soft_delete(store, id, now)?;
            }
            batch(roots.into_iter().map(|id| PersistCall::SoftDelete { id }))
        }
        Intent::MoveToGroup { id, group } => {
            task_ops::move_to_group(store, id, group.as_ref(), now)?;
            Some(PersistCall::MoveToGroup {
                id: id.clone(),
                group_id: group.clone(),
            })
        }
        Intent::MoveToList { id, list, group } => {
            task_ops::move_to_list(store, id, list, group.as_ref(), now)?;
            Some(PersistCall::MoveToList {
                id: id.clone(),
                list_id: list.clone(),
                group_id: group.clone(),
            })
        }
    };
    Ok((call, None))
}

fn batch(calls: impl Iterator<Item = PersistCall>) -> Option<PersistCall> {
    let calls: Vec<PersistCall> = calls.collect();
    (!calls.is_empty()).then_some(PersistCall::Batch(calls))
}

fn reparent_call(store: &TaskStore, id: &TaskId) -> PersistCall {
    let task = store.task(id);
    PersistCall::Reparent {
        id: id.clone(),
        parent_id: task.and_then(|t| t.parent_id.clone()),
        depth: task.map_or(0, |t| t.depth),
        position: store.index_of(id).unwrap_or(0),
    }
}
