//! The sync session: one canonical store, the dispatcher in front of it, the
//! persistence API behind it, and push events folded in as they arrive.
//!
//! All mutation happens through `&mut Session`, so the store has a single
//! writer. Readers take an `Arc` snapshot and keep it as long as they like.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::io::api::{ApiError, TodoApi};
use crate::model::config::SyncConfig;
use crate::model::ids::{IdGenerator, TaskId};
use crate::model::store::TaskStore;
use crate::model::task::Task;
use crate::ops::task_ops::TaskError;
use crate::ops::tree;
use crate::sync::bus::{EventBus, SessionEvent, Subscription, Topic};
use crate::sync::clock::Clock;
use crate::sync::dispatcher::{Completion, Dispatched, Dispatcher, Outgoing, Settled};
use crate::sync::events::RemoteEvent;
use crate::sync::intent::Intent;
use crate::sync::reconcile::{self, Merge};

/// Stop paging completed tasks after this many pages even if the server
/// keeps answering.
const MAX_COMPLETED_PAGES: u32 = 500;

pub struct Session {
    store: Arc<TaskStore>,
    dispatcher: Dispatcher,
    api: Arc<dyn TodoApi>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    revision: u64,
}

impl Session {
    pub fn new(
        api: Arc<dyn TodoApi>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Session {
            store: Arc::new(TaskStore::new()),
            dispatcher: Dispatcher::new(ids, config.rollback),
            api,
            clock,
            bus: EventBus::default(),
            completions_tx,
            completions_rx,
            revision: 0,
        }
    }

    /// Start from an already populated store instead of loading one
    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// A snapshot that stays unchanged while the session moves on
    pub fn snapshot(&self) -> Arc<TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.bus.subscribe(topic)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Calls in flight plus calls held behind a placeholder
    pub fn pending(&self) -> usize {
        self.dispatcher.in_flight() + self.dispatcher.held()
    }

    /// Server id a placeholder turned into, once known
    pub fn resolved_id(&self, placeholder: &TaskId) -> Option<&TaskId> {
        self.dispatcher.resolved_id(placeholder)
    }

    fn bump(&mut self) {
        self.revision += 1;
        self.bus.publish(SessionEvent::StoreChanged {
            revision: self.revision,
        });
    }

    // ---------------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------------

    /// Replace the store with the server's view: active tasks, every page of
    /// completed tasks, then the Bin. Returns how many tasks were loaded.
    pub async fn load(&mut self) -> Result<usize, ApiError> {
        let mut tasks = self.api.fetch_active().await?;
        let mut seen: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

        for page in 1..=MAX_COMPLETED_PAGES {
            let batch = self.api.fetch_completed(page).await?;
            let fresh: Vec<Task> = batch
                .into_iter()
                .filter(|t| seen.insert(t.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            debug!(page, count = fresh.len(), "loaded completed page");
            tasks.extend(fresh);
        }

        let binned = self.api.fetch_bin().await?;
        tasks.extend(binned.into_iter().filter(|t| seen.insert(t.id.clone())));

        let mut store = TaskStore::from_tasks(tasks);
        for list in self.store.lists() {
            store.upsert_list(list.clone());
        }
        for group in self.store.groups() {
            store.upsert_group(group.clone());
        }
        for tag in self.store.tags() {
            store.upsert_tag(tag.clone());
        }
        tree::normalize(&mut store);
        let count = store.len();
        info!(tasks = count, "store loaded");
        self.store = Arc::new(store);
        self.bump();
        Ok(count)
    }

    // ---------------------------------------------------------------------------
    // Local intents
    // ---------------------------------------------------------------------------

    /// Apply an intent locally and start persisting it in the background.
    pub fn dispatch(&mut self, intent: Intent) -> Result<Dispatched, TaskError> {
        let before = Arc::clone(&self.store);
        let dispatched = self
            .dispatcher
            .dispatch(&mut self.store, intent, self.clock.now())?;
        if *before != *self.store {
            self.bump();
        }
        if let Some(outgoing) = dispatched.outgoing.clone() {
            self.issue(outgoing);
        }
        Ok(dispatched)
    }

    fn issue(&self, outgoing: Outgoing) {
        let api = Arc::clone(&self.api);
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.send(&outgoing.call).await;
            // the session may be gone by now
            let _ = tx.send(Completion {
                op: outgoing.op,
                result,
            });
        });
    }

    fn settle_one(&mut self, completion: Completion) {
        let Settled {
            released,
            failed,
            store_changed,
        } = self.dispatcher.complete(&mut self.store, completion);
        for outgoing in released {
            self.issue(outgoing);
        }
        for (op, intent, error) in failed {
            self.bus
                .publish(SessionEvent::PersistFailed { op, intent, error });
        }
        if store_changed {
            self.bump();
        }
    }

    /// Handle every completion that has already arrived. Returns how many.
    pub fn process_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.settle_one(completion);
            handled += 1;
        }
        handled
    }

    /// Wait until no call is in flight.
    pub async fn settle(&mut self) {
        while self.dispatcher.in_flight() > 0 {
            match self.completions_rx.recv().await {
                Some(completion) => self.settle_one(completion),
                None => break,
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Remote events
    // ---------------------------------------------------------------------------

    /// Fold one push event into the store.
    pub fn apply_remote(&mut self, event: &RemoteEvent) -> Merge {
        let mut adopted = false;
        if let RemoteEvent::TaskCreated(task) = event
            && let Some(released) = self.dispatcher.adopt(&mut self.store, task)
        {
            adopted = true;
            for outgoing in released {
                self.issue(outgoing);
            }
        }
        let merge = reconcile::apply_event(Arc::make_mut(&mut self.store), event, self.clock.now());
        debug!(event = %event.label(), ?merge, "remote event");
        if adopted || merge.changed() {
            self.bump();
        }
        if adopted { Merge::Applied } else { merge }
    }

    /// Wait for the next push event or completion and handle it. Returns
    /// false once the event stream has closed.
    pub async fn pump(&mut self, events: &mut mpsc::Receiver<RemoteEvent>) -> bool {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    self.apply_remote(&event);
                    true
                }
                None => false,
            },
            Some(completion) = self.completions_rx.recv() => {
                self.settle_one(completion);
                true
            }
        }
    }
}
