//! Common test utilities for portmux integration tests.
//!
//! Provides an in-memory host capability: channels whose inbound events are
//! fired by the test, and a shutdown signal the test can trigger.

use async_trait::async_trait;
use parking_lot::Mutex;
use portmux::{
    Channel, ChannelHost, DisconnectCallback, EndpointId, MessageCallback, PortMuxError, Result,
    ShutdownSignal, Subscription, TransportOptions,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a tracing subscriber for tests (honors RUST_LOG).
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory channel controlled by the test.
pub struct MockChannel {
    name: String,
    endpoint: Option<EndpointId>,
    sent: Mutex<Vec<Value>>,
    message_subs: Arc<Mutex<Vec<(u64, Arc<dyn Fn(Value) + Send + Sync>)>>>,
    disconnect_subs: Arc<Mutex<Vec<(u64, Arc<dyn Fn(Option<String>) + Send + Sync>)>>>,
    next_sub: AtomicU64,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    fail_sends: AtomicBool,
}

impl MockChannel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            endpoint: None,
            sent: Mutex::new(Vec::new()),
            message_subs: Arc::new(Mutex::new(Vec::new())),
            disconnect_subs: Arc::new(Mutex::new(Vec::new())),
            next_sub: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// A channel the host attributed to a remote endpoint (server side).
    pub fn with_endpoint(name: impl Into<String>, endpoint: impl Into<EndpointId>) -> Arc<Self> {
        let mut channel = Self::new(name);
        Arc::get_mut(&mut channel).unwrap().endpoint = Some(endpoint.into());
        channel
    }

    /// Fire the message event with `payload`.
    pub fn emit_message(&self, payload: Value) {
        let subs: Vec<Arc<dyn Fn(Value) + Send + Sync>> = {
            let subs = self.message_subs.lock();
            subs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in subs {
            cb(payload.clone());
        }
    }

    /// Fire the disconnect event, optionally carrying a host-reported error.
    pub fn emit_disconnect(&self, error: Option<&str>) {
        let subs: Vec<Arc<dyn Fn(Option<String>) + Send + Sync>> = {
            let subs = self.disconnect_subs.lock();
            subs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in subs {
            cb(error.map(str::to_string));
        }
    }

    /// Make subsequent `send` calls fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Everything sent on this channel so far.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// How many times `close` was invoked.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    pub fn message_sub_count(&self) -> usize {
        self.message_subs.lock().len()
    }

    pub fn disconnect_sub_count(&self) -> usize {
        self.disconnect_subs.lock().len()
    }
}

impl Channel<Value> for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn remote_endpoint(&self) -> Option<EndpointId> {
        self.endpoint.clone()
    }

    fn send(&self, message: Value) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PortMuxError::ChannelClosed(self.name.clone()));
        }
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(PortMuxError::Channel("send refused".into()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        self.closed.store(true, Ordering::Release);
    }

    fn on_message(&self, callback: MessageCallback<Value>) -> Subscription {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<dyn Fn(Value) + Send + Sync> = Arc::from(callback);
        self.message_subs.lock().push((id, callback));
        let subs = Arc::clone(&self.message_subs);
        Subscription::new(move || {
            subs.lock().retain(|(sub_id, _)| *sub_id != id);
        })
    }

    fn on_disconnect(&self, callback: DisconnectCallback) -> Subscription {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<dyn Fn(Option<String>) + Send + Sync> = Arc::from(callback);
        self.disconnect_subs.lock().push((id, callback));
        let subs = Arc::clone(&self.disconnect_subs);
        Subscription::new(move || {
            subs.lock().retain(|(sub_id, _)| *sub_id != id);
        })
    }
}

/// In-memory host capability that records every channel it opens.
pub struct MockHost {
    available: AtomicBool,
    fail_next_open: Mutex<Option<String>>,
    opened: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            fail_next_open: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Make the next `open` call fail with `error`.
    pub fn fail_next_open(&self, error: impl Into<String>) {
        *self.fail_next_open.lock() = Some(error.into());
    }

    /// How many channels were opened so far.
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// The most recently opened channel.
    pub fn last_opened(&self) -> Arc<MockChannel> {
        self.opened.lock().last().cloned().expect("no channel opened")
    }

    /// The nth opened channel (0-based).
    pub fn opened(&self, index: usize) -> Arc<MockChannel> {
        self.opened.lock()[index].clone()
    }
}

#[async_trait]
impl ChannelHost<Value> for MockHost {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn open(
        &self,
        name: &str,
        _remote: Option<&str>,
        _options: &TransportOptions,
    ) -> Result<Arc<dyn Channel<Value>>> {
        if let Some(error) = self.fail_next_open.lock().take() {
            return Err(PortMuxError::Channel(error));
        }
        let channel = MockChannel::new(name);
        self.opened.lock().push(Arc::clone(&channel));
        Ok(channel)
    }
}

/// Shutdown signal the test fires by hand.
pub struct MockShutdown {
    subs: Arc<Mutex<Vec<(u64, Arc<dyn Fn() + Send + Sync>)>>>,
    next_sub: AtomicU64,
}

impl MockShutdown {
    pub fn new() -> Self {
        Self {
            subs: Arc::new(Mutex::new(Vec::new())),
            next_sub: AtomicU64::new(1),
        }
    }

    /// Fire the about-to-terminate event.
    pub fn fire(&self) {
        let subs: Vec<Arc<dyn Fn() + Send + Sync>> = {
            let subs = self.subs.lock();
            subs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in subs {
            cb();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().len()
    }
}

impl ShutdownSignal for MockShutdown {
    fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> Subscription {
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::from(callback);
        self.subs.lock().push((id, callback));
        let subs = Arc::clone(&self.subs);
        Subscription::new(move || {
            subs.lock().retain(|(sub_id, _)| *sub_id != id);
        })
    }
}
