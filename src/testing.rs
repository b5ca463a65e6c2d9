//! Test doubles for the capability traits

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::clock::{Clock, Sleep};
use crate::error::{PushError, PushResult};
use crate::push::{PushConnection, PushTransport};
use crate::sync::BackgroundSync;

// ========================
// Clock
// ========================

/// Sleeps return immediately and are recorded
#[derive(Default)]
pub struct RecordingClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn at(now_ms: i64) -> Arc<Self> {
        let clock = Self::default();
        clock.now.store(now_ms, Ordering::SeqCst);
        Arc::new(clock)
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn sleeps_ms(&self) -> Vec<u64> {
        self.sleeps().iter().map(|d| d.as_millis() as u64).collect()
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration) -> Sleep {
        self.sleeps.lock().unwrap().push(duration);
        Box::pin(tokio::task::yield_now())
    }

    fn now_ms(&self) -> i64 {
        // Advance so successive timestamps differ
        self.now.fetch_add(1, Ordering::SeqCst)
    }
}

/// Clock whose sleeps never finish; keeps timers out of the way
#[derive(Default)]
pub struct FrozenClock;

impl Clock for FrozenClock {
    fn sleep(&self, _duration: Duration) -> Sleep {
        Box::pin(std::future::pending())
    }

    fn now_ms(&self) -> i64 {
        1_700_000_000_000
    }
}

// ========================
// HTTP
// ========================

/// Canned response for [`FakeServer`]
pub enum Reply {
    Status(u16, Value),
    NoContent,
    NetworkDown,
}

type Route = Box<dyn Fn(&HttpRequest) -> Reply + Send + Sync>;

/// HTTP transport answering from a queue of scripted replies, falling back to
/// a routing function once the queue is empty
pub struct FakeServer {
    script: Mutex<VecDeque<Reply>>,
    route: Mutex<Option<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            route: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_reply(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn route(&self, route: impl Fn(&HttpRequest) -> Reply + Send + Sync + 'static) {
        *self.route.lock().unwrap() = Some(Box::new(route));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `(method, path)` of every request, base URL stripped
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.requests()
            .into_iter()
            .map(|r| {
                let path = r
                    .url
                    .find("/api/")
                    .map(|i| r.url[i..].to_string())
                    .unwrap_or(r.url.clone());
                (r.method, path)
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.requests.lock().unwrap().push(request.clone());

        let scripted = self.script.lock().unwrap().pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => match self.route.lock().unwrap().as_ref() {
                Some(route) => route(&request),
                None => Reply::NetworkDown,
            },
        };

        match reply {
            Reply::Status(status, body) => Ok(HttpResponse {
                status,
                reason: None,
                body: body.to_string(),
            }),
            Reply::NoContent => Ok(HttpResponse {
                status: 204,
                reason: Some("No Content".to_string()),
                body: String::new(),
            }),
            Reply::NetworkDown => Err("connection refused".to_string()),
        }
    }
}

// ========================
// Push
// ========================

/// Server side of one fake push connection
pub struct FakeSocket {
    pub to_client: mpsc::UnboundedSender<PushResult<String>>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl FakeSocket {
    pub fn send_json(&self, value: Value) {
        let _ = self.to_client.send(Ok(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(text.to_string()));
    }

    pub async fn next_json(&mut self) -> Value {
        let text = self.from_client.recv().await.expect("client hung up");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }
}

struct FakeConnection {
    inbound: mpsc::UnboundedReceiver<PushResult<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn send(&mut self, text: String) -> PushResult<()> {
        self.outbound
            .send(text)
            .map_err(|_| PushError::Channel("peer closed".to_string()))
    }

    async fn recv(&mut self) -> Option<PushResult<String>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {}
}

/// Push transport whose connects either fail or hand a [`FakeSocket`] to the test
pub struct FakePushTransport {
    accept: Mutex<bool>,
    attempts: Mutex<u32>,
    sockets: mpsc::UnboundedSender<FakeSocket>,
}

impl FakePushTransport {
    pub fn new(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accept: Mutex::new(accept),
            attempts: Mutex::new(0),
            sockets: tx,
        });
        (transport, rx)
    }

    pub fn set_accept(&self, accept: bool) {
        *self.accept.lock().unwrap() = accept;
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl PushTransport for FakePushTransport {
    async fn connect(&self) -> PushResult<Box<dyn PushConnection>> {
        *self.attempts.lock().unwrap() += 1;
        if !*self.accept.lock().unwrap() {
            return Err(PushError::Channel("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.sockets.send(FakeSocket {
            to_client,
            from_client,
        });
        Ok(Box::new(FakeConnection { inbound, outbound }))
    }
}

// ========================
// Background sync
// ========================

#[derive(Default)]
pub struct RecordingBackgroundSync {
    pub tags: Mutex<Vec<String>>,
}

#[async_trait]
impl BackgroundSync for RecordingBackgroundSync {
    async fn register(&self, tag: &str) -> Result<(), String> {
        self.tags.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}
