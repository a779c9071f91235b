//! Client-side session: one channel, many subscribers.
//!
//! A `Session` owns at most one live [`Channel`] at a time, runs the
//! idle → open → closed state machine, fans validated inbound messages out to
//! independently registered listeners, and caches the last accepted message
//! so a subscriber that registers late can still observe it once.
//!
//! Failures never cross this API as errors: they become observable state
//! (`status`, `last_error`) and [`PostOutcome`] values.

use crate::core::config::SessionConfig;
use crate::core::listeners::{Listener, ListenerSet};
use crate::core::status::{AtomicSessionStatus, MetricsSnapshot, SessionMetrics, SessionStatus};
use crate::traits::host::{Channel, ChannelHost, ShutdownSignal, Subscription};
use crate::traits::validate::{accept_all, Validator};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity of a registered subscriber. Unique per registration, used only
/// for add/remove; delivery order across subscribers is unspecified.
pub type SubscriberId = String;

/// Context handed to session listeners alongside the payload.
#[derive(Debug, Clone)]
pub struct SessionOrigin {
    /// Name of the channel the message arrived on
    pub channel_name: String,
}

/// Lifecycle events emitted by a session, drained via
/// [`Session::try_recv_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A channel was acquired and the session is open
    Opened,
    /// The session transitioned to closed
    Closed,
    /// An automatic reconnection attempt was triggered
    Reconnecting,
    /// A fatal error was recorded
    Error(String),
}

/// Outcome of a `post` call. Never an error: callers get a synchronous,
/// non-panicking answer to "did this go out".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Forwarded to the live channel
    Sent,
    /// No live channel; the message was dropped, not queued
    NoChannel,
    /// The live channel refused the send; the session is now closed
    SendFailed(String),
}

struct ChannelSlot<M> {
    channel: Arc<dyn Channel<M>>,
    message_sub: Option<Subscription>,
    disconnect_sub: Option<Subscription>,
}

/// Client-side multiplexer over one host channel.
///
/// Cheap to clone; clones share the same underlying session state.
pub struct Session<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    inner: Arc<SessionInner<M>>,
}

impl<M> Clone for Session<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct SessionInner<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    host: Arc<dyn ChannelHost<M>>,
    config: SessionConfig<M>,
    status: AtomicSessionStatus,
    error: RwLock<Option<String>>,
    cached: RwLock<Option<M>>,
    listeners: ListenerSet<SubscriberId, M, SessionOrigin>,
    slot: Mutex<Option<ChannelSlot<M>>>,
    /// Bumped on every channel adoption; events carrying a stale epoch come
    /// from an already-replaced channel and are discarded.
    epoch: AtomicU64,
    /// Count of non-fatal closes, fed to the reconnect policy.
    closes: AtomicU64,
    /// One-shot token armed per non-fatal close, consumed by the next
    /// qualifying trigger.
    retry_armed: AtomicBool,
    establishing: AtomicBool,
    torn_down: AtomicBool,
    metrics: SessionMetrics,
    event_tx: Sender<SessionEvent>,
    event_rx: Receiver<SessionEvent>,
    shutdown_sub: Mutex<Option<Subscription>>,
}

impl<M> Session<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    /// Create a session. Prefer [`Session::builder`](crate::core::builder).
    pub fn new(host: Arc<dyn ChannelHost<M>>, config: SessionConfig<M>) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            inner: Arc::new(SessionInner {
                host,
                config,
                status: AtomicSessionStatus::new(SessionStatus::Idle),
                error: RwLock::new(None),
                cached: RwLock::new(None),
                listeners: ListenerSet::new(),
                slot: Mutex::new(None),
                epoch: AtomicU64::new(0),
                closes: AtomicU64::new(0),
                retry_armed: AtomicBool::new(false),
                establishing: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                metrics: SessionMetrics::new(),
                event_tx,
                event_rx,
                shutdown_sub: Mutex::new(None),
            }),
        }
    }

    /// Attempt to acquire a channel from the host capability.
    ///
    /// Idempotent while open. Failures do not propagate: a missing
    /// capability closes the session without an error, an acquisition
    /// failure closes it fatally. A fatally closed session refuses
    /// re-establishment; recreate the session instead.
    pub async fn establish(&self) {
        self.inner.establish().await;
    }

    /// Forward a message to the live channel.
    ///
    /// While the session is not open this is a deliberate no-op: the message
    /// is dropped, never queued, and the call never blocks or panics. A post
    /// against a non-fatally closed session consumes the armed reconnect
    /// token and triggers one background re-establish; the triggering
    /// message itself is still dropped.
    pub fn post(&self, message: M) -> PostOutcome {
        self.inner.post(message)
    }

    /// Register (or replace, for an already-used id) a listener.
    ///
    /// `validator` defaults to the accept-all validator. With `flush` set, a
    /// cached message exists, and `id` was not previously registered, the
    /// cached message is delivered to this listener exactly once on a
    /// deferred task, after this call has returned. Liveness and validator
    /// acceptance are re-checked at delivery time, so unsubscribing first
    /// cancels the flush.
    ///
    /// The returned handle unsubscribes this registration; it goes inert if
    /// the id is re-registered or removed through other means.
    pub fn subscribe(
        &self,
        id: impl Into<SubscriberId>,
        listener: impl Fn(&M, &SessionOrigin) + Send + Sync + 'static,
        validator: Option<Validator<M>>,
        flush: bool,
    ) -> Subscription {
        self.inner.subscribe(id.into(), Box::new(listener), validator, flush)
    }

    /// Remove a subscriber. Redundant calls are no-ops.
    pub fn unsubscribe(&self, id: &str) {
        if self.inner.listeners.remove(&id.to_string()) {
            debug!(subscriber = %id, "listener unsubscribed");
        }
    }

    /// Tear the session down: detach channel subscriptions, close the
    /// channel, drop the shutdown-signal subscription, disable automatic
    /// reconnection. Signaling teardown more than once closes the channel
    /// exactly once.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Subscribe to the external about-to-terminate signal, at most once per
    /// session. The signal invokes [`teardown`](Self::teardown); the
    /// subscription itself is dropped during teardown.
    pub fn bind_shutdown(&self, signal: &dyn ShutdownSignal) {
        self.inner.bind_shutdown(signal);
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.inner.status.get()
    }

    /// Whether sends will currently succeed.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.inner.status.is_open()
    }

    /// Host-reported failure detail, if the session closed fatally.
    pub fn last_error(&self) -> Option<String> {
        self.inner.error.read().clone()
    }

    /// The most recent message accepted by the cache validator.
    pub fn cached(&self) -> Option<M> {
        self.inner.cached.read().clone()
    }

    /// Drain one lifecycle event (non-blocking).
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.inner.event_rx.try_recv().ok()
    }

    /// Point-in-time delivery counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl<M> SessionInner<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    async fn establish(self: &Arc<Self>) {
        if self.torn_down.load(Ordering::Acquire) {
            debug!("establish after teardown ignored");
            return;
        }
        if let Some(error) = self.error.read().as_deref() {
            warn!(error, "session closed fatally; not re-establishing");
            return;
        }
        if self.status.get() == SessionStatus::Open {
            debug!(channel = %self.config.channel_name, "already open; establish is a no-op");
            return;
        }
        if self.establishing.swap(true, Ordering::AcqRel) {
            debug!("establish already in flight");
            return;
        }
        self.acquire_channel().await;
        self.establishing.store(false, Ordering::Release);
    }

    async fn acquire_channel(self: &Arc<Self>) {
        if !self.host.is_available() {
            info!(
                channel = %self.config.channel_name,
                "host channel capability unavailable; session closed"
            );
            self.retry_armed.store(false, Ordering::Release);
            self.status.set(SessionStatus::Closed);
            let _ = self.event_tx.send(SessionEvent::Closed);
            return;
        }

        let opened = self
            .host
            .open(
                &self.config.channel_name,
                self.config.remote_id.as_deref(),
                &self.config.transport,
            )
            .await;

        match opened {
            Ok(channel) => {
                // Exclusive ownership: fully detach and close any previous
                // channel before adopting the new one.
                self.detach_slot(true);

                let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                let weak = Arc::downgrade(self);
                let message_sub = channel.on_message(Box::new(move |message| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_message(epoch, message);
                    }
                }));
                let weak = Arc::downgrade(self);
                let disconnect_sub = channel.on_disconnect(Box::new(move |error| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_disconnect(epoch, error);
                    }
                }));

                *self.slot.lock() = Some(ChannelSlot {
                    channel,
                    message_sub: Some(message_sub),
                    disconnect_sub: Some(disconnect_sub),
                });
                self.status.set(SessionStatus::Open);
                info!(channel = %self.config.channel_name, epoch, "session open");
                let _ = self.event_tx.send(SessionEvent::Opened);
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    channel = %self.config.channel_name,
                    error = %message,
                    "failed to open channel; session closed fatally"
                );
                *self.error.write() = Some(message.clone());
                self.retry_armed.store(false, Ordering::Release);
                self.status.set(SessionStatus::Closed);
                let _ = self.event_tx.send(SessionEvent::Error(message));
                let _ = self.event_tx.send(SessionEvent::Closed);
            }
        }
    }

    fn post(self: &Arc<Self>, message: M) -> PostOutcome {
        if self.status.is_open() {
            let channel = self.slot.lock().as_ref().map(|slot| Arc::clone(&slot.channel));
            if let Some(channel) = channel {
                match channel.send(message) {
                    Ok(()) => {
                        self.metrics.increment_posted();
                        return PostOutcome::Sent;
                    }
                    Err(e) => {
                        let detail = e.to_string();
                        warn!(error = %detail, "send failed; closing session");
                        let epoch = self.epoch.load(Ordering::Acquire);
                        // The channel may still be live on the host side;
                        // close it rather than abandoning it.
                        self.detach_slot(true);
                        self.handle_disconnect(epoch, None);
                        self.metrics.increment_dropped();
                        return PostOutcome::SendFailed(detail);
                    }
                }
            }
        }

        self.metrics.increment_dropped();
        debug!(status = ?self.status.get(), "post with no open channel dropped");
        self.maybe_reconnect();
        PostOutcome::NoChannel
    }

    /// Consume the armed token, if any, and re-establish in the background.
    fn maybe_reconnect(self: &Arc<Self>) {
        if self.torn_down.load(Ordering::Acquire) || self.error.read().is_some() {
            return;
        }
        if !self.retry_armed.swap(false, Ordering::AcqRel) {
            return;
        }
        self.metrics.increment_reconnects();
        info!(channel = %self.config.channel_name, "attempting reconnection");
        let _ = self.event_tx.send(SessionEvent::Reconnecting);
        let inner = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    inner.establish().await;
                });
            }
            Err(_) => {
                warn!("no async runtime available; reconnection attempt skipped");
            }
        }
    }

    fn subscribe(
        self: &Arc<Self>,
        id: SubscriberId,
        listener: Listener<M, SessionOrigin>,
        validator: Option<Validator<M>>,
        flush: bool,
    ) -> Subscription {
        let validator = validator.unwrap_or_else(accept_all);
        let was_registered = self.listeners.contains(&id);
        let token = self.listeners.insert(id.clone(), listener, validator);
        debug!(subscriber = %id, replaced = was_registered, "listener registered");

        if flush && !was_registered {
            let cached = self.cached.read().clone();
            if let Some(cached) = cached {
                self.schedule_flush(id.clone(), token, cached);
            }
        }

        let weak = Arc::downgrade(self);
        let key = id;
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.remove_token(&key, token);
            }
        })
    }

    /// One-shot delivery of the cached message to a late subscriber,
    /// scheduled so it runs only after the registering call has unwound.
    fn schedule_flush(self: &Arc<Self>, id: SubscriberId, token: u64, cached: M) {
        let weak = Arc::downgrade(self);
        let task_id = id.clone();
        let task = async move {
            let id = task_id;
            let inner = match weak.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            if inner.torn_down.load(Ordering::Acquire) {
                debug!(subscriber = %id, "flush skipped; session torn down");
                return;
            }
            let origin = SessionOrigin {
                channel_name: inner.config.channel_name.clone(),
            };
            if inner.listeners.dispatch_token(&id, token, &cached, &origin) {
                inner.metrics.add_delivered(1);
                debug!(subscriber = %id, "cached message flushed");
            } else {
                debug!(subscriber = %id, "flush skipped; listener gone or payload rejected");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => {
                warn!(subscriber = %id, "no async runtime available; cached-message flush skipped");
            }
        }
    }

    fn handle_message(&self, epoch: u64, message: M) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(epoch, "message from replaced channel discarded");
            return;
        }
        if (self.config.cache_validator)(&message) {
            *self.cached.write() = Some(message.clone());
        }
        let origin = SessionOrigin {
            channel_name: self.config.channel_name.clone(),
        };
        let delivered = self.listeners.dispatch_all(&message, &origin);
        self.metrics.add_delivered(delivered as u64);
        debug!(delivered, message = ?message, "inbound message dispatched");
    }

    fn handle_disconnect(&self, epoch: u64, error: Option<String>) {
        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!(epoch, "disconnect from replaced channel discarded");
            return;
        }
        // The host already considers the channel dead; detach without
        // issuing another close.
        self.detach_slot(false);

        match error {
            Some(detail) => {
                warn!(error = %detail, "channel disconnected with host-reported error");
                *self.error.write() = Some(detail.clone());
                self.retry_armed.store(false, Ordering::Release);
                self.status.set(SessionStatus::Closed);
                let _ = self.event_tx.send(SessionEvent::Error(detail));
                let _ = self.event_tx.send(SessionEvent::Closed);
            }
            None => {
                let closes = self.closes.fetch_add(1, Ordering::AcqRel) + 1;
                let armed = !self.torn_down.load(Ordering::Acquire)
                    && self.config.reconnect.arm_on_close(closes);
                self.retry_armed.store(armed, Ordering::Release);
                self.status.set(SessionStatus::Closed);
                debug!(closes, reconnect_armed = armed, "channel disconnected");
                let _ = self.event_tx.send(SessionEvent::Closed);
            }
        }
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("teardown already performed");
            return;
        }
        if let Some(sub) = self.shutdown_sub.lock().take() {
            sub.unsubscribe();
        }
        self.retry_armed.store(false, Ordering::Release);
        self.detach_slot(true);
        self.status.set(SessionStatus::Closed);
        info!(channel = %self.config.channel_name, "session torn down");
        let _ = self.event_tx.send(SessionEvent::Closed);
    }

    /// Take the current channel slot, cancel its event subscriptions and,
    /// when asked, close the channel. Taking the slot is what makes the
    /// close exactly-once: a second teardown or a late disconnect finds no
    /// slot and does nothing.
    fn detach_slot(&self, close_channel: bool) {
        let taken = self.slot.lock().take();
        if let Some(mut slot) = taken {
            if let Some(sub) = slot.message_sub.take() {
                sub.unsubscribe();
            }
            if let Some(sub) = slot.disconnect_sub.take() {
                sub.unsubscribe();
            }
            if close_channel {
                slot.channel.close();
            }
        }
    }

    fn bind_shutdown(self: &Arc<Self>, signal: &dyn ShutdownSignal) {
        let mut sub = self.shutdown_sub.lock();
        if sub.is_some() {
            debug!("shutdown signal already bound");
            return;
        }
        let weak = Arc::downgrade(self);
        *sub = Some(signal.subscribe(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.teardown();
            }
        })));
    }
}
