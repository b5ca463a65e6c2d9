//! Global Application State Store
//!
//! Observable collections published through `tokio::sync::watch`. The sync
//! engine owns the [`AppState`] and is its only writer; hosts get a
//! [`StateReader`] that can read and subscribe.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::{Tag, Task};

/// Reactive state with one channel per field
#[derive(Debug)]
pub struct AppState {
    tasks: watch::Sender<Vec<Task>>,
    tags: watch::Sender<Vec<Tag>>,
    is_online: watch::Sender<bool>,
    is_syncing: watch::Sender<bool>,
    /// Epoch ms of the last successful cycle
    last_sync_time: watch::Sender<Option<i64>>,
    sync_error: watch::Sender<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AppState {
    pub fn new(is_online: bool) -> Self {
        Self {
            tasks: watch::Sender::new(Vec::new()),
            tags: watch::Sender::new(Vec::new()),
            is_online: watch::Sender::new(is_online),
            is_syncing: watch::Sender::new(false),
            last_sync_time: watch::Sender::new(None),
            sync_error: watch::Sender::new(None),
        }
    }

    // ========================
    // Store Helper Functions
    // ========================

    /// Insert or replace a task by id; new tasks go to the end
    pub(crate) fn upsert_task(&self, task: Task) {
        self.tasks.send_modify(|tasks| {
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task,
                None => tasks.push(task),
            }
        });
    }

    /// Swap the task stored under `old_id` for `task`, keeping its position.
    /// Any other entry already holding the new id is dropped.
    pub(crate) fn replace_task(&self, old_id: &str, task: Task) {
        self.tasks.send_modify(|tasks| {
            tasks.retain(|t| t.id == old_id || t.id != task.id);
            match tasks.iter_mut().find(|t| t.id == old_id) {
                Some(existing) => *existing = task,
                None => tasks.push(task),
            }
        });
    }

    pub(crate) fn remove_task(&self, task_id: &str) {
        self.tasks.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != task_id);
            tasks.len() != before
        });
    }

    pub(crate) fn set_tasks(&self, tasks: Vec<Task>) {
        self.tasks.send_replace(tasks);
    }

    pub(crate) fn upsert_tag(&self, tag: Tag) {
        self.tags.send_modify(|tags| {
            match tags.iter_mut().find(|t| t.id == tag.id) {
                Some(existing) => *existing = tag,
                None => tags.push(tag),
            }
        });
    }

    pub(crate) fn set_tags(&self, tags: Vec<Tag>) {
        self.tags.send_replace(tags);
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.is_online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.is_syncing.send_replace(syncing);
    }

    pub(crate) fn set_last_sync_time(&self, at: Option<i64>) {
        self.last_sync_time.send_replace(at);
    }

    pub(crate) fn set_sync_error(&self, error: Option<String>) {
        self.sync_error.send_replace(error);
    }

    /// Back to the empty, never-synced state (online flag kept)
    pub(crate) fn reset(&self) {
        self.set_tasks(Vec::new());
        self.set_tags(Vec::new());
        self.set_last_sync_time(None);
        self.set_sync_error(None);
    }

    pub fn reader(self: &Arc<Self>) -> StateReader {
        StateReader {
            state: Arc::clone(self),
        }
    }
}

/// Read-only handle on the reactive state
#[derive(Debug, Clone)]
pub struct StateReader {
    state: Arc<AppState>,
}

impl StateReader {
    pub fn tasks(&self) -> Vec<Task> {
        self.state.tasks.borrow().clone()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.state.tasks.borrow().iter().find(|t| t.id == id).cloned()
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.state.tags.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        *self.state.is_online.borrow()
    }

    pub fn is_syncing(&self) -> bool {
        *self.state.is_syncing.borrow()
    }

    pub fn last_sync_time(&self) -> Option<i64> {
        *self.state.last_sync_time.borrow()
    }

    pub fn sync_error(&self) -> Option<String> {
        self.state.sync_error.borrow().clone()
    }

    /// Open tasks, highest priority first, then earliest due date.
    /// Tasks without a due date trail their priority group.
    pub fn incomplete_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .state
            .tasks
            .borrow()
            .iter()
            .filter(|t| !t.completed)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| present_first(&a.due_date, &b.due_date, |x, y| x.cmp(y)))
        });
        tasks
    }

    /// Completed tasks, most recently completed first
    pub fn completed_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .state
            .tasks
            .borrow()
            .iter()
            .filter(|t| t.completed)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| present_first(&a.completed_at, &b.completed_at, |x, y| y.cmp(x)));
        tasks
    }

    pub fn subscribe_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.state.tasks.subscribe()
    }

    pub fn subscribe_tags(&self) -> watch::Receiver<Vec<Tag>> {
        self.state.tags.subscribe()
    }

    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.state.is_online.subscribe()
    }

    pub fn subscribe_syncing(&self) -> watch::Receiver<bool> {
        self.state.is_syncing.subscribe()
    }

    pub fn subscribe_last_sync_time(&self) -> watch::Receiver<Option<i64>> {
        self.state.last_sync_time.subscribe()
    }

    pub fn subscribe_sync_error(&self) -> watch::Receiver<Option<String>> {
        self.state.sync_error.subscribe()
    }
}

fn present_first(
    a: &Option<String>,
    b: &Option<String>,
    cmp: impl Fn(&String, &String) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
