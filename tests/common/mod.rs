//! Shared fixtures: a scripted in-memory `TodoApi`, deterministic ids and a
//! fixed clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use tasknest::io::api::{ApiError, ApiFuture, TodoApi};
use tasknest::model::config::{RollbackPolicy, SyncConfig};
use tasknest::model::ids::{IdGenerator, TaskId};
use tasknest::model::store::TaskStore;
use tasknest::model::task::Task;
use tasknest::sync::clock::FixedClock;
use tasknest::sync::intent::PersistCall;
use tasknest::sync::session::Session;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
}

pub fn task(id: &str, parent: Option<&str>, depth: u32) -> Task {
    let mut t = Task::new(id.into(), id, "L1".into());
    t.parent_id = parent.map(TaskId::from);
    t.depth = depth;
    t
}

/// Placeholders `tmp-1`, `tmp-2`, ...
#[derive(Default)]
pub struct SequentialIds(AtomicU32);

impl IdGenerator for SequentialIds {
    fn placeholder_id(&self) -> TaskId {
        TaskId::placeholder(&(self.0.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }
}

/// How the mock answers the next call
#[derive(Debug, Clone)]
pub enum Reply {
    /// Creates echo the body under `srv-N`; other calls return nothing
    Default,
    /// Echo a create under this id
    CreatedAs(String),
    Fail(ApiError),
}

#[derive(Default)]
pub struct MockTodoApi {
    pub calls: Mutex<Vec<PersistCall>>,
    replies: Mutex<VecDeque<Reply>>,
    next_server_id: AtomicU32,
    pub active: Mutex<Vec<Task>>,
    pub completed_pages: Mutex<Vec<Vec<Task>>>,
    pub bin: Mutex<Vec<Task>>,
}

impl MockTodoApi {
    pub fn new() -> Arc<Self> {
        Arc::new(MockTodoApi::default())
    }

    pub fn with_active(tasks: Vec<Task>) -> Arc<Self> {
        let api = MockTodoApi::default();
        *api.active.lock().unwrap() = tasks;
        Arc::new(api)
    }

    pub fn script(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<PersistCall> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: &PersistCall) -> Result<Option<Task>, ApiError> {
        self.calls.lock().unwrap().push(call.clone());
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Default);
        let PersistCall::Create { body, .. } = call else {
            return match reply {
                Reply::Fail(e) => Err(e),
                _ => Ok(None),
            };
        };
        let id = match reply {
            Reply::Fail(e) => return Err(e),
            Reply::CreatedAs(id) => id,
            Reply::Default => format!("srv-{}", self.next_server_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let mut task = Task::new(id.into(), body.title.clone(), body.list_id.clone());
        task.parent_id = body.parent_id.clone();
        task.group_id = body.group_id.clone();
        task.priority = body.priority;
        Ok(Some(task))
    }
}

impl TodoApi for MockTodoApi {
    fn send(&self, call: &PersistCall) -> ApiFuture<'_, Option<Task>> {
        let result = self.answer(call);
        Box::pin(async move { result })
    }

    fn fetch_active(&self) -> ApiFuture<'_, Vec<Task>> {
        let tasks = self.active.lock().unwrap().clone();
        Box::pin(async move { Ok(tasks) })
    }

    fn fetch_completed(&self, page: u32) -> ApiFuture<'_, Vec<Task>> {
        let pages = self.completed_pages.lock().unwrap();
        let tasks = pages.get(page as usize - 1).cloned().unwrap_or_default();
        Box::pin(async move { Ok(tasks) })
    }

    fn fetch_bin(&self) -> ApiFuture<'_, Vec<Task>> {
        let tasks = self.bin.lock().unwrap().clone();
        Box::pin(async move { Ok(tasks) })
    }
}

pub fn session(api: Arc<MockTodoApi>, rollback: RollbackPolicy, store: TaskStore) -> Session {
    Session::new(
        api,
        Arc::new(SequentialIds::default()),
        Arc::new(FixedClock::new(now())),
        &SyncConfig { rollback },
    )
    .with_store(store)
}
