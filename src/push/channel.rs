//! Push channel state machine
//!
//! One spawned task owns the connection. It authenticates, relays owner
//! commands, pings while subscribed, dispatches inbound events to the
//! [`PushHandler`] in wire order, and reconnects with capped exponential
//! backoff until the attempt ceiling is hit.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Sleep, SystemClock};
use crate::domain::Task;
use crate::error::{PushError, PushResult};
use super::message::{Inbound, Outbound};
use super::transport::{PushConnection, PushTransport};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub ping_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            ping_interval: PING_INTERVAL,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Authenticated; subscription allowed
    Connected,
    Subscribed,
    Reconnecting { attempt: u32 },
    /// Gave up; only a new channel reconnects
    Exhausted,
}

/// Owner callbacks. All run on the channel task, one at a time.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn on_connected(&self, _control: &PushControl) {}

    async fn on_disconnected(&self) {}

    async fn on_error(&self, _error: &PushError) {}

    async fn on_task_created(&self, _task: Task) {}

    async fn on_task_updated(&self, _task: Task) {}

    async fn on_task_deleted(&self, _task_id: String) {}
}

#[derive(Debug)]
enum Command {
    Subscribe(Option<String>),
    Unsubscribe,
    Disconnect,
}

/// Cloneable command handle for a running channel
#[derive(Debug, Clone)]
pub struct PushControl {
    commands: mpsc::UnboundedSender<Command>,
}

impl PushControl {
    /// Ask for task events; dropped unless the channel is authenticated
    pub fn subscribe(&self, device_id: Option<String>) {
        self.send(Command::Subscribe(device_id));
    }

    pub fn unsubscribe(&self) {
        self.send(Command::Unsubscribe);
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("push channel already stopped");
        }
    }
}

pub struct PushOptions {
    pub access_token: Option<String>,
    pub policy: ReconnectPolicy,
    pub clock: Arc<dyn Clock>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            access_token: None,
            policy: ReconnectPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Handle to a running push channel. Dropping every handle stops the channel.
pub struct PushChannel {
    control: PushControl,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl PushChannel {
    /// Spawn the channel task and start connecting
    pub fn open(
        transport: Arc<dyn PushTransport>,
        handler: Arc<dyn PushHandler>,
        options: PushOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);

        let runner = Runner {
            transport,
            handler,
            access_token: options.access_token,
            policy: options.policy,
            clock: options.clock,
            commands: rx,
            control: tx.downgrade(),
            state: state_tx,
            next_id: 0,
        };
        let task = tokio::spawn(runner.run());

        Self {
            control: PushControl { commands: tx },
            state: state_rx,
            task,
        }
    }

    pub fn control(&self) -> PushControl {
        self.control.clone()
    }

    pub fn subscribe(&self, device_id: Option<String>) {
        self.control.subscribe(device_id);
    }

    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }

    pub fn disconnect(&self) {
        self.control.disconnect();
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Wait for the channel task to finish (after `disconnect` or exhaustion)
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("push channel task failed: {}", e);
        }
    }
}

enum SessionEnd {
    /// Owner asked to stop
    Stopped,
    /// Peer closed, optionally with an error
    Lost(Option<PushError>),
}

struct Runner {
    transport: Arc<dyn PushTransport>,
    handler: Arc<dyn PushHandler>,
    access_token: Option<String>,
    policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
    commands: mpsc::UnboundedReceiver<Command>,
    control: mpsc::WeakUnboundedSender<Command>,
    state: watch::Sender<ChannelState>,
    next_id: u64,
}

impl Runner {
    async fn run(mut self) {
        let mut attempt = 0u32;

        loop {
            self.set_state(ChannelState::Connecting);
            match self.transport.connect().await {
                Ok(conn) => {
                    attempt = 0;
                    match self.session(conn).await {
                        SessionEnd::Stopped => {
                            info!("push channel disconnected");
                            self.set_state(ChannelState::Disconnected);
                            return;
                        }
                        SessionEnd::Lost(err) => {
                            self.handler.on_disconnected().await;
                            if let Some(e) = err {
                                warn!("push channel error: {}", e);
                                self.handler.on_error(&e).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt, "push channel connect failed: {}", e);
                    self.handler.on_error(&e).await;
                }
            }

            if attempt >= self.policy.max_attempts {
                error!(attempts = attempt, "push channel giving up");
                self.set_state(ChannelState::Exhausted);
                self.handler
                    .on_error(&PushError::Exhausted { attempts: attempt })
                    .await;
                return;
            }

            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "push channel reconnecting");
            self.set_state(ChannelState::Reconnecting { attempt });

            if !self.wait_reconnect(self.clock.sleep(delay)).await {
                self.set_state(ChannelState::Disconnected);
                return;
            }
        }
    }

    /// Sleep out the backoff; false if the owner stopped the channel meanwhile
    async fn wait_reconnect(&mut self, mut delay: Sleep) -> bool {
        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Disconnect) => return false,
                    Some(other) => debug!(?other, "not connected, dropping command"),
                },
            }
        }
    }

    async fn session(&mut self, mut conn: Box<dyn PushConnection>) -> SessionEnd {
        match self.access_token.clone() {
            Some(access_token) => {
                self.set_state(ChannelState::Authenticating);
                if let Err(e) = self.send(conn.as_mut(), Outbound::Auth { access_token }).await {
                    return SessionEnd::Lost(Some(e));
                }
            }
            None => {
                self.set_state(ChannelState::Connected);
                self.notify_connected().await;
            }
        }

        let mut ping: Option<Sleep> = None;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(Command::Disconnect) => {
                        conn.close().await;
                        return SessionEnd::Stopped;
                    }
                    Some(Command::Subscribe(device_id)) => {
                        if !matches!(self.current(), ChannelState::Connected | ChannelState::Subscribed) {
                            warn!("push channel not authenticated, dropping subscribe");
                            continue;
                        }
                        if let Err(e) = self.send_with_id(conn.as_mut(), |id| Outbound::Subscribe { id, device_id }).await {
                            return SessionEnd::Lost(Some(e));
                        }
                        self.set_state(ChannelState::Subscribed);
                        if ping.is_none() {
                            ping = Some(self.clock.sleep(self.policy.ping_interval));
                        }
                    }
                    Some(Command::Unsubscribe) => {
                        if self.current() != ChannelState::Subscribed {
                            continue;
                        }
                        if let Err(e) = self.send_with_id(conn.as_mut(), |id| Outbound::Unsubscribe { id }).await {
                            return SessionEnd::Lost(Some(e));
                        }
                        self.set_state(ChannelState::Connected);
                        ping = None;
                    }
                },

                message = conn.recv() => match message {
                    None => return SessionEnd::Lost(None),
                    Some(Err(e)) => return SessionEnd::Lost(Some(e)),
                    Some(Ok(text)) => self.dispatch(&text).await,
                },

                _ = tick(&mut ping) => {
                    if let Err(e) = self.send_with_id(conn.as_mut(), |id| Outbound::Ping { id }).await {
                        return SessionEnd::Lost(Some(e));
                    }
                    ping = Some(self.clock.sleep(self.policy.ping_interval));
                }
            }
        }
    }

    async fn dispatch(&mut self, text: &str) {
        let message: Inbound = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed push message: {}", e);
                return;
            }
        };

        match message {
            Inbound::AuthOk => {
                if self.current() == ChannelState::Authenticating {
                    info!("push channel authenticated");
                    self.set_state(ChannelState::Connected);
                    self.notify_connected().await;
                }
            }
            Inbound::TaskCreated { task } => {
                debug!(task_id = %task.id, "push: task created");
                self.handler.on_task_created(task).await;
            }
            Inbound::TaskUpdated { task } => {
                debug!(task_id = %task.id, "push: task updated");
                self.handler.on_task_updated(task).await;
            }
            Inbound::TaskDeleted { task_id } => {
                debug!(task_id = %task_id, "push: task deleted");
                self.handler.on_task_deleted(task_id).await;
            }
            Inbound::Pong => debug!("pong"),
            Inbound::Unknown => debug!("ignoring push message"),
        }
    }

    async fn notify_connected(&self) {
        match self.control.upgrade() {
            Some(commands) => self.handler.on_connected(&PushControl { commands }).await,
            None => debug!("push channel owner gone"),
        }
    }

    async fn send_with_id(
        &mut self,
        conn: &mut dyn PushConnection,
        build: impl FnOnce(u64) -> Outbound,
    ) -> PushResult<()> {
        self.next_id += 1;
        let message = build(self.next_id);
        self.send(conn, message).await
    }

    async fn send(&self, conn: &mut dyn PushConnection, message: Outbound) -> PushResult<()> {
        let text = serde_json::to_string(&message).map_err(|e| PushError::Protocol(e.to_string()))?;
        conn.send(text).await
    }

    fn current(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_replace(state);
    }
}

/// Resolves when the ping timer fires; never while unsubscribed
async fn tick(ping: &mut Option<Sleep>) {
    match ping {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePushTransport, FrozenClock, RecordingClock};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Connected,
        Disconnected,
        Error(PushError),
        Created(String),
        Updated(String, u64),
        Deleted(String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        subscribe_on_connect: Option<String>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl PushHandler for Recorder {
        async fn on_connected(&self, control: &PushControl) {
            self.push(Event::Connected);
            if let Some(device) = &self.subscribe_on_connect {
                control.subscribe(Some(device.clone()));
            }
        }

        async fn on_disconnected(&self) {
            self.push(Event::Disconnected);
        }

        async fn on_error(&self, error: &PushError) {
            self.push(Event::Error(error.clone()));
        }

        async fn on_task_created(&self, task: Task) {
            self.push(Event::Created(task.id));
        }

        async fn on_task_updated(&self, task: Task) {
            self.push(Event::Updated(task.id, task.version));
        }

        async fn on_task_deleted(&self, task_id: String) {
            self.push(Event::Deleted(task_id));
        }
    }

    fn task_json(id: &str, version: u64) -> serde_json::Value {
        json!({
            "id": id,
            "title": "t",
            "priority": 0,
            "completed": false,
            "created_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00Z",
            "device_id": "server",
            "version": version,
            "tags": []
        })
    }

    fn options(token: Option<&str>, clock: Arc<dyn Clock>) -> PushOptions {
        PushOptions {
            access_token: token.map(str::to_string),
            policy: ReconnectPolicy::default(),
            clock,
        }
    }

    async fn wait_for(channel: &PushChannel, state: ChannelState) {
        let mut rx = channel.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[test]
    fn test_reconnect_delays_cap_at_thirty_seconds() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=7).map(|a| policy.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[tokio::test]
    async fn test_authenticates_then_subscribes() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder {
            subscribe_on_connect: Some("dev-1".to_string()),
            ..Default::default()
        });
        let channel = PushChannel::open(
            transport,
            handler.clone(),
            options(Some("tok"), Arc::new(FrozenClock)),
        );

        let mut socket = sockets.recv().await.unwrap();
        assert_eq!(
            socket.next_json().await,
            json!({"type": "auth", "access_token": "tok"})
        );
        assert_eq!(channel.state(), ChannelState::Authenticating);

        socket.send_json(json!({"type": "auth_ok"}));
        assert_eq!(
            socket.next_json().await,
            json!({"type": "subscribe", "id": 1, "device_id": "dev-1"})
        );
        wait_for(&channel, ChannelState::Subscribed).await;
        assert_eq!(handler.events(), vec![Event::Connected]);

        channel.unsubscribe();
        assert_eq!(socket.next_json().await, json!({"type": "unsubscribe", "id": 2}));
        wait_for(&channel, ChannelState::Connected).await;

        channel.disconnect();
        let state = channel.watch_state();
        channel.join().await;
        assert_eq!(*state.borrow(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscribe_before_auth_is_dropped() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder::default());
        let channel = PushChannel::open(
            transport,
            handler.clone(),
            options(Some("tok"), Arc::new(FrozenClock)),
        );

        let mut socket = sockets.recv().await.unwrap();
        socket.next_json().await; // auth

        channel.subscribe(None);
        socket.send_json(json!({"type": "auth_ok"}));
        wait_for(&channel, ChannelState::Connected).await;

        channel.subscribe(None);
        assert_eq!(socket.next_json().await, json!({"type": "subscribe", "id": 1}));
        wait_for(&channel, ChannelState::Subscribed).await;
        assert!(socket.from_client.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_without_token_connects_directly() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder::default());
        let channel = PushChannel::open(transport, handler.clone(), options(None, Arc::new(FrozenClock)));

        let _socket = sockets.recv().await.unwrap();
        wait_for(&channel, ChannelState::Connected).await;
        assert_eq!(handler.events(), vec![Event::Connected]);
    }

    #[tokio::test]
    async fn test_events_dispatch_in_wire_order() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder::default());
        let channel = PushChannel::open(transport, handler.clone(), options(None, Arc::new(FrozenClock)));

        let socket = sockets.recv().await.unwrap();
        socket.send_json(json!({"type": "task_created", "task": task_json("a", 1)}));
        socket.send_raw("{not json");
        socket.send_json(json!({"type": "task_updated", "task": task_json("a", 2)}));
        socket.send_json(json!({"type": "task_updated"}));
        socket.send_json(json!({"type": "something_new"}));
        socket.send_json(json!({"type": "pong"}));
        socket.send_json(json!({"type": "task_deleted", "task_id": "a"}));
        drop(socket);

        wait_for(&channel, ChannelState::Reconnecting { attempt: 1 }).await;
        channel.disconnect();
        channel.join().await;

        assert_eq!(
            handler.events(),
            vec![
                Event::Connected,
                Event::Created("a".to_string()),
                Event::Updated("a".to_string(), 2),
                Event::Deleted("a".to_string()),
                Event::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_ten_reconnects() {
        let (transport, _sockets) = FakePushTransport::new(false);
        let handler = Arc::new(Recorder::default());
        let clock = RecordingClock::at(0);
        let channel = PushChannel::open(transport.clone(), handler.clone(), options(None, clock.clone()));

        let state = channel.watch_state();
        channel.join().await;

        assert_eq!(*state.borrow(), ChannelState::Exhausted);
        assert_eq!(transport.attempts(), 11);
        assert_eq!(
            clock.sleeps_ms(),
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000]
        );
        assert_eq!(
            handler.events().last(),
            Some(&Event::Error(PushError::Exhausted { attempts: 10 }))
        );
    }

    #[tokio::test]
    async fn test_successful_open_resets_attempts() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder::default());
        let clock = RecordingClock::at(0);
        let channel = PushChannel::open(transport.clone(), handler.clone(), options(None, clock.clone()));

        drop(sockets.recv().await.unwrap());
        let second = sockets.recv().await.unwrap();
        wait_for(&channel, ChannelState::Connected).await;
        drop(second);
        let _third = sockets.recv().await.unwrap();
        wait_for(&channel, ChannelState::Connected).await;

        assert_eq!(clock.sleeps_ms(), vec![1000, 1000]);
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn test_pings_while_subscribed() {
        let (transport, mut sockets) = FakePushTransport::new(true);
        let handler = Arc::new(Recorder {
            subscribe_on_connect: Some("dev".to_string()),
            ..Default::default()
        });
        let clock = RecordingClock::at(0);
        let _channel = PushChannel::open(transport, handler, options(None, clock.clone()));

        let mut socket = sockets.recv().await.unwrap();
        assert_eq!(socket.next_json().await["type"], "subscribe");
        assert_eq!(socket.next_json().await, json!({"type": "ping", "id": 2}));
        assert_eq!(socket.next_json().await, json!({"type": "ping", "id": 3}));
        assert!(clock.sleeps_ms().iter().all(|ms| *ms == 30_000));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (transport, _sockets) = FakePushTransport::new(false);
        let handler = Arc::new(Recorder::default());
        let channel = PushChannel::open(transport.clone(), handler, options(None, Arc::new(FrozenClock)));

        wait_for(&channel, ChannelState::Reconnecting { attempt: 1 }).await;
        channel.disconnect();
        let state = channel.watch_state();
        channel.join().await;

        assert_eq!(*state.borrow(), ChannelState::Disconnected);
        assert_eq!(transport.attempts(), 1);
    }
}
