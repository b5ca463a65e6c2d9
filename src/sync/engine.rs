//! Sync Engine
//!
//! Keeps the reactive state, the local database and the task server in step:
//!
//! - local mutations apply to state and store first, then go to the server
//!   once; failures land in the outbox
//! - a reconciliation cycle drains the outbox in FIFO order and then replaces
//!   local tasks and tags with the server's lists (server wins)
//! - push events are applied as they arrive, in wire order

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, HttpTransport, ReqwestTransport, RetryPolicy, TaskQuery};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::domain::{NewTag, NewTask, OutboxAction, OutboxEntry, Tag, Task, TaskPatch};
use crate::error::{ApiResult, PushError, Result, StoreResult, SyncError};
use crate::push::{
    PushChannel, PushControl, PushHandler, PushOptions, PushTransport, ReconnectPolicy,
    WebSocketTransport,
};
use crate::repository::{LocalStore, Repository};
use crate::store::{AppState, StateReader};
use super::env::{BackgroundSync, Connectivity, ManualConnectivity, BACKGROUND_SYNC_TAG};

/// Cheap to clone; all clones drive the same engine
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    device_id: String,
    page_size: u32,
    api: ApiClient,
    store: LocalStore,
    state: Arc<AppState>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    background: Option<Arc<dyn BackgroundSync>>,
    push_transport: Arc<dyn PushTransport>,
    push_clock: Arc<dyn Clock>,
    reconnect: ReconnectPolicy,
    push: Mutex<Option<PushChannel>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    access_token: RwLock<Option<String>>,
    syncing: AtomicBool,
}

pub struct SyncEngineBuilder {
    config: SyncConfig,
    store: LocalStore,
    http: Option<Arc<dyn HttpTransport>>,
    push: Option<Arc<dyn PushTransport>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    clock: Option<Arc<dyn Clock>>,
    push_clock: Option<Arc<dyn Clock>>,
    background: Option<Arc<dyn BackgroundSync>>,
    retry: RetryPolicy,
    reconnect: ReconnectPolicy,
}

impl SyncEngineBuilder {
    pub fn http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    pub fn push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push = Some(transport);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Time source for timestamps and request backoff
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Time source for reconnect backoff and pings; defaults to [`Self::clock`]
    pub fn push_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.push_clock = Some(clock);
        self
    }

    pub fn background_sync(mut self, background: Arc<dyn BackgroundSync>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> SyncEngine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let push_clock = self.push_clock.unwrap_or_else(|| clock.clone());
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let push_transport = self
            .push
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new(self.config.push_endpoint())));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ManualConnectivity::new(true)));

        let api = ApiClient::new(self.config.base_url.clone(), http, clock.clone())
            .with_access_token(self.config.access_token.clone())
            .with_retry_policy(self.retry);
        let state = Arc::new(AppState::new(connectivity.is_online()));

        SyncEngine {
            inner: Arc::new(EngineInner {
                device_id: self.config.device_id,
                page_size: self.config.page_size,
                api,
                store: self.store,
                state,
                clock,
                connectivity,
                background: self.background,
                push_transport,
                push_clock,
                reconnect: self.reconnect,
                push: Mutex::new(None),
                listener: Mutex::new(None),
                access_token: RwLock::new(self.config.access_token),
                syncing: AtomicBool::new(false),
            }),
        }
    }
}

impl SyncEngine {
    pub fn builder(config: SyncConfig, store: LocalStore) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            store,
            http: None,
            push: None,
            connectivity: None,
            clock: None,
            push_clock: None,
            background: None,
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn state(&self) -> StateReader {
        self.inner.state.reader()
    }

    /// Reachability as the host reports it right now. The mirrored
    /// `is_online` in [`StateReader`] follows it once the listener runs.
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    // ========================
    // Lifecycle
    // ========================

    /// Open the store, hydrate state, start listening for connectivity
    /// changes, open the push channel and run a first cycle when online.
    pub async fn start(&self) {
        let inner = &self.inner;

        match inner.store.open().await {
            Ok(()) => self.hydrate().await,
            Err(e) => {
                error!("local database unavailable, running memory-only: {}", e);
                inner.state.set_sync_error(Some(e.to_string()));
            }
        }

        let online = inner.connectivity.is_online();
        inner.state.set_online(online);
        self.spawn_connectivity_listener();

        if online {
            self.ensure_push();
            let _ = self.sync_with_server().await;
        }
    }

    async fn hydrate(&self) {
        let store = &self.inner.store;
        let state = &self.inner.state;

        if let Some(meta) = logged(store.sync_state.load().await, "load sync metadata") {
            state.set_last_sync_time((meta.last_sync > 0).then_some(meta.last_sync));
        }
        if let Some(tasks) = logged(store.tasks.get_all().await, "load cached tasks") {
            state.set_tasks(tasks);
        }
        if let Some(tags) = logged(store.tags.get_all().await, "load cached tags") {
            state.set_tags(tags);
        }
        debug!(tasks = state.reader().tasks().len(), "state hydrated from local database");
    }

    fn spawn_connectivity_listener(&self) {
        let mut changes = self.inner.connectivity.subscribe();
        let engine = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                let engine = SyncEngine { inner };
                if online {
                    engine.handle_online().await;
                } else {
                    engine.handle_offline();
                }
            }
        });

        if let Ok(mut listener) = self.inner.listener.lock() {
            if let Some(previous) = listener.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop listening for connectivity changes and close the push channel
    pub async fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().ok().and_then(|mut l| l.take()) {
            listener.abort();
        }
        if let Some(channel) = self.take_push() {
            channel.disconnect();
            channel.join().await;
        }
        info!("sync engine stopped");
    }

    // ========================
    // Connectivity
    // ========================

    pub async fn handle_online(&self) {
        info!("device is online");
        self.inner.state.set_online(true);
        self.inner.state.set_sync_error(None);
        self.ensure_push();
        let _ = self.sync_with_server().await;
    }

    /// Only the flag changes; queued work waits for the next online cycle
    pub fn handle_offline(&self) {
        info!("device is offline");
        self.inner.state.set_online(false);
    }

    /// Entry point for a host-delivered background wake-up
    pub async fn handle_background_sync(&self) -> Result<()> {
        info!(tag = BACKGROUND_SYNC_TAG, "background sync fired");
        self.sync_with_server().await
    }

    // ========================
    // Reconciliation
    // ========================

    /// Run one reconciliation cycle.
    ///
    /// Returns `Ok` without doing anything while another cycle is in flight.
    /// A failed fetch leaves state and store untouched and is recorded as the
    /// sync error.
    pub async fn sync_with_server(&self) -> Result<()> {
        let inner = &self.inner;
        if !self.is_online() {
            debug!("cannot sync: offline");
            return Err(SyncError::Offline);
        }
        if inner.syncing.swap(true, Ordering::AcqRel) {
            debug!("sync already in progress");
            return Ok(());
        }
        let _cycle = CycleGuard { inner };

        inner.state.set_syncing(true);
        inner.state.set_sync_error(None);

        self.drain_outbox().await;

        let query = TaskQuery::limit(inner.page_size);
        let (tasks, tags) = tokio::join!(inner.api.list_tasks(&query), inner.api.list_tags());
        let (tasks, tags) = match (tasks, tags) {
            (Ok(tasks), Ok(tags)) => (tasks, tags),
            (Err(e), _) | (_, Err(e)) => {
                error!("sync failed: {}", e);
                inner.state.set_sync_error(Some(e.to_string()));
                return Err(e.into());
            }
        };

        inner.state.set_tasks(tasks.clone());
        inner.state.set_tags(tags.clone());
        logged(inner.store.tasks.replace_all(&tasks).await, "save fetched tasks");
        logged(inner.store.tags.replace_all(&tags).await, "save fetched tags");

        let now = inner.clock.now_ms();
        inner.state.set_last_sync_time(Some(now));
        logged(inner.store.sync_state.set_last_sync(now).await, "save last sync time");

        info!(tasks = tasks.len(), tags = tags.len(), "sync completed");
        Ok(())
    }

    /// Replay queued mutations oldest first. Failures stay queued with their
    /// retry counter bumped; the drain moves on to the next entry.
    async fn drain_outbox(&self) {
        let outbox = &self.inner.store.outbox;
        let Some(entries) = logged(outbox.list().await, "read outbox") else {
            return;
        };
        if !entries.is_empty() {
            debug!(pending = entries.len(), "draining outbox");
        }

        for entry in entries {
            match self.deliver(&entry).await {
                Ok(()) => {
                    logged(outbox.remove(&entry.id).await, "remove delivered outbox entry");
                }
                Err(e) => {
                    warn!(
                        entry_id = %entry.id,
                        task_id = %entry.task_id,
                        action = entry.action.as_str(),
                        retries = entry.retries,
                        "outbox entry failed, keeping it: {}", e
                    );
                    logged(outbox.increment_retries(&entry.id).await, "bump outbox retries");
                }
            }
        }
    }

    async fn deliver(&self, entry: &OutboxEntry) -> ApiResult<()> {
        let api = &self.inner.api;
        let body = entry.payload.clone().unwrap_or_else(|| json!({}));
        match entry.action {
            OutboxAction::Create => api.create_task(&body).await.map(drop),
            OutboxAction::Update => api.update_task(&entry.task_id, &body).await.map(drop),
            OutboxAction::Delete => api.delete_task(&entry.task_id).await,
        }
    }

    // ========================
    // Optimistic mutations
    // ========================

    /// Create a task locally and push it to the server. Always returns a
    /// task: the server's copy on success, the local one otherwise.
    pub async fn create_task(&self, data: NewTask) -> Task {
        let inner = &self.inner;
        let now = inner.clock.now_iso();
        let task = Task::new_local(Uuid::new_v4().to_string(), &data, &inner.device_id, &now);

        self.save_local(&task).await;

        if self.is_online() {
            match inner.api.create_task(&task).await {
                Ok(created) => {
                    if created.id == task.id {
                        self.save_local(&created).await;
                    } else {
                        debug!(local_id = %task.id, task_id = %created.id, "server assigned a new id");
                        inner.state.replace_task(&task.id, created.clone());
                        logged(inner.store.tasks.delete(&task.id).await, "drop local placeholder");
                        logged(inner.store.tasks.put(&created).await, "save task locally");
                    }
                    return created;
                }
                Err(e) => warn!(task_id = %task.id, "failed to create task on server: {}", e),
            }
        }

        self.enqueue(OutboxAction::Create, &task.id, encode(&task)).await;
        task
    }

    /// Merge `patch` into the cached task. `None` if the id is unknown.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Option<Task> {
        let inner = &self.inner;
        let Some(mut task) = inner.state.reader().task(id) else {
            debug!(task_id = id, "update of unknown task ignored");
            return None;
        };

        task.apply_patch(&patch, &inner.clock.now_iso());
        self.save_local(&task).await;

        if self.is_online() {
            match inner.api.update_task(id, &patch).await {
                Ok(updated) => {
                    self.save_local(&updated).await;
                    return Some(updated);
                }
                Err(e) => warn!(task_id = id, "failed to update task on server: {}", e),
            }
        }

        self.enqueue(OutboxAction::Update, id, encode(&patch)).await;
        Some(task)
    }

    pub async fn delete_task(&self, id: &str) {
        let inner = &self.inner;
        inner.state.remove_task(id);
        logged(inner.store.tasks.delete(id).await, "delete cached task");

        if self.is_online() {
            match inner.api.delete_task(id).await {
                Ok(()) => return,
                Err(e) => warn!(task_id = id, "failed to delete task on server: {}", e),
            }
        }

        self.enqueue(OutboxAction::Delete, id, None).await;
    }

    /// Flip completion, stamping or clearing `completed_at`
    pub async fn toggle_task_complete(&self, id: &str) -> Option<Task> {
        let task = self.inner.state.reader().task(id)?;
        let completed = !task.completed;
        let patch = TaskPatch {
            completed: Some(completed),
            completed_at: Some(completed.then(|| self.inner.clock.now_iso())),
            ..Default::default()
        };
        self.update_task(id, patch).await
    }

    async fn save_local(&self, task: &Task) {
        self.inner.state.upsert_task(task.clone());
        logged(self.inner.store.tasks.put(task).await, "save task locally");
    }

    async fn enqueue(&self, action: OutboxAction, task_id: &str, payload: Option<Value>) {
        let inner = &self.inner;
        let entry = OutboxEntry::new(action, task_id, payload, inner.clock.now_ms());
        if logged(inner.store.outbox.enqueue(&entry).await, "queue mutation").is_some() {
            debug!(task_id, action = action.as_str(), "mutation queued");
        }

        if let Some(background) = &inner.background {
            if let Err(e) = background.register(BACKGROUND_SYNC_TAG).await {
                warn!("background sync registration failed: {}", e);
            }
        }
    }

    // ========================
    // Push events
    // ========================

    /// Upsert a task reported by the server. No version check; the push
    /// stream is authoritative.
    pub async fn apply_remote_upsert(&self, task: Task) {
        debug!(task_id = %task.id, version = task.version, "applying remote task");
        self.save_local(&task).await;
    }

    pub async fn apply_remote_delete(&self, task_id: &str) {
        debug!(task_id, "applying remote delete");
        self.inner.state.remove_task(task_id);
        logged(self.inner.store.tasks.delete(task_id).await, "delete cached task");
    }

    /// Open the push channel if there is a token and none is running
    fn ensure_push(&self) {
        let inner = &self.inner;
        let Some(access_token) = inner.access_token.read().ok().and_then(|t| t.clone()) else {
            return;
        };
        let Ok(mut push) = inner.push.lock() else {
            return;
        };
        if push.is_some() {
            return;
        }

        let handler = Arc::new(PushEvents {
            engine: Arc::downgrade(inner),
            device_id: inner.device_id.clone(),
        });
        let options = PushOptions {
            access_token: Some(access_token),
            policy: inner.reconnect,
            clock: inner.push_clock.clone(),
        };
        *push = Some(PushChannel::open(inner.push_transport.clone(), handler, options));
    }

    fn take_push(&self) -> Option<PushChannel> {
        self.inner.push.lock().ok().and_then(|mut push| push.take())
    }

    // ========================
    // Account and server-only operations
    // ========================

    /// Replace the bearer token for requests and reopen the push channel
    pub async fn set_access_token(&self, token: Option<String>) {
        self.inner.api.set_access_token(token.clone());
        if let Ok(mut current) = self.inner.access_token.write() {
            *current = token;
        }

        if let Some(channel) = self.take_push() {
            channel.disconnect();
            channel.join().await;
        }
        if self.is_online() {
            self.ensure_push();
        }
    }

    /// Server-side search; not cached
    pub async fn search_tasks(&self, query: &str, limit: Option<u32>) -> Result<Vec<Task>> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        Ok(self.inner.api.search_tasks(query, limit).await?)
    }

    /// Create a tag on the server and cache it
    pub async fn create_tag(&self, name: &str, color: Option<String>) -> Result<Tag> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let tag = self
            .inner
            .api
            .create_tag(&NewTag {
                name: name.to_string(),
                color,
            })
            .await?;

        self.inner.state.upsert_tag(tag.clone());
        logged(self.inner.store.tags.put(&tag).await, "save tag locally");
        Ok(tag)
    }

    /// Queued mutations, oldest first
    pub async fn pending_mutations(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.inner.store.outbox.list().await?)
    }

    /// Drop every cached record and queued mutation
    pub async fn clear_all_data(&self) -> Result<()> {
        self.inner.state.reset();
        self.inner.store.clear_all().await?;
        info!("local data cleared");
        Ok(())
    }
}

/// Resets the in-flight flag when a cycle ends, however it ends
struct CycleGuard<'a> {
    inner: &'a EngineInner,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.set_syncing(false);
        self.inner.syncing.store(false, Ordering::Release);
    }
}

/// Push channel callbacks routed back into the engine
struct PushEvents {
    engine: Weak<EngineInner>,
    device_id: String,
}

impl PushEvents {
    fn engine(&self) -> Option<SyncEngine> {
        self.engine.upgrade().map(|inner| SyncEngine { inner })
    }
}

#[async_trait]
impl PushHandler for PushEvents {
    async fn on_connected(&self, control: &PushControl) {
        info!("push channel connected");
        control.subscribe(Some(self.device_id.clone()));
    }

    async fn on_disconnected(&self) {
        info!("push channel disconnected");
    }

    async fn on_error(&self, error: &PushError) {
        match error {
            PushError::Exhausted { .. } => error!("push channel stopped: {}", error),
            _ => warn!("push channel error: {}", error),
        }
    }

    async fn on_task_created(&self, task: Task) {
        if let Some(engine) = self.engine() {
            engine.apply_remote_upsert(task).await;
        }
    }

    async fn on_task_updated(&self, task: Task) {
        if let Some(engine) = self.engine() {
            engine.apply_remote_upsert(task).await;
        }
    }

    async fn on_task_deleted(&self, task_id: String) {
        if let Some(engine) = self.engine() {
            engine.apply_remote_delete(&task_id).await;
        }
    }
}

/// Log a store failure and carry on without the result
fn logged<T>(result: StoreResult<T>, what: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{} failed: {}", what, e);
            None
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("failed to encode outbox payload: {}", e);
            None
        }
    }
}
