//! Server-side multiplexer: many channels keyed by remote endpoint identity.
//!
//! An `EndpointRegistry` accepts channels the host hands it (one per
//! connecting client), tracks each by the endpoint identity the host
//! resolved at accept time, and routes three event kinds (connect,
//! disconnect, message) to listener sets registered against those kinds,
//! each listener carrying its own validator.

use crate::core::listeners::{Listener, ListenerSet};
use crate::core::session::PostOutcome;
use crate::traits::host::{Channel, EndpointId, ShutdownSignal, Subscription};
use crate::traits::validate::{accept_all, Validator};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Event kinds routed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Message,
}

/// Payload handed to endpoint listeners. Connect and disconnect carry no
/// message, so listener validators only ever gate `Message` events.
#[derive(Debug)]
pub enum EndpointEvent<M> {
    Connected,
    Disconnected,
    Message(M),
}

impl<M> EndpointEvent<M> {
    pub fn kind(&self) -> EventKind {
        match self {
            EndpointEvent::Connected => EventKind::Connect,
            EndpointEvent::Disconnected => EventKind::Disconnect,
            EndpointEvent::Message(_) => EventKind::Message,
        }
    }

    pub fn message(&self) -> Option<&M> {
        match self {
            EndpointEvent::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Context handed to endpoint listeners: which endpoint the event came from
/// and the channel to reply on.
pub struct EndpointOrigin<M> {
    pub endpoint: EndpointId,
    pub channel: Arc<dyn Channel<M>>,
}

impl<M> Clone for EndpointOrigin<M> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<M> fmt::Debug for EndpointOrigin<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointOrigin")
            .field("endpoint", &self.endpoint)
            .field("channel", &self.channel.name())
            .finish()
    }
}

/// Listener registered against an event kind.
pub type EndpointListener<M> = Listener<EndpointEvent<M>, EndpointOrigin<M>>;

/// Outcome of handing a channel to [`EndpointRegistry::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Tracked under this endpoint identity
    Tracked(EndpointId),
    /// No resolvable endpoint identity; the channel is left open but cannot
    /// be addressed later
    Untracked,
    /// The registry has shut down; the channel was closed immediately
    Rejected,
}

struct EndpointSlot<M> {
    channel: Arc<dyn Channel<M>>,
    token: u64,
    message_sub: Option<Subscription>,
    disconnect_sub: Option<Subscription>,
}

impl<M> EndpointSlot<M> {
    fn detach(&mut self) {
        if let Some(sub) = self.message_sub.take() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.disconnect_sub.take() {
            sub.unsubscribe();
        }
    }
}

/// Server-side owner of many channels keyed by remote identity.
///
/// Cheap to clone; clones share the same underlying registry state.
pub struct EndpointRegistry<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    inner: Arc<RegistryInner<M>>,
}

impl<M> Clone for EndpointRegistry<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RegistryInner<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    channels: RwLock<HashMap<EndpointId, EndpointSlot<M>>>,
    listeners: ListenerSet<EventKind, EndpointEvent<M>, EndpointOrigin<M>>,
    next_token: AtomicU64,
    /// Set under the channels write lock by `close_all`, checked under the
    /// same lock by `accept`, so no channel accepted during shutdown can be
    /// left open and untracked.
    shut_down: AtomicBool,
    shutdown_sub: Mutex<Option<Subscription>>,
}

impl<M> EndpointRegistry<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                channels: RwLock::new(HashMap::new()),
                listeners: ListenerSet::new(),
                next_token: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                shutdown_sub: Mutex::new(None),
            }),
        }
    }

    /// Construct with an initial set of event-kind listeners.
    pub fn with_listeners<I>(listeners: I) -> Self
    where
        I: IntoIterator<
            Item = (
                EventKind,
                EndpointListener<M>,
                Option<Validator<EndpointEvent<M>>>,
            ),
        >,
    {
        let registry = Self::new();
        for (kind, listener, validator) in listeners {
            registry
                .inner
                .listeners
                .push(kind, listener, validator.unwrap_or_else(accept_all));
        }
        registry
    }

    /// Append a listener for an event kind. `validator` defaults to the
    /// accept-all validator.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&EndpointEvent<M>, &EndpointOrigin<M>) + Send + Sync + 'static,
        validator: Option<Validator<EndpointEvent<M>>>,
    ) {
        self.inner
            .listeners
            .push(kind, Box::new(listener), validator.unwrap_or_else(accept_all));
    }

    /// Take ownership of a channel the host accepted.
    ///
    /// A channel with a resolvable endpoint identity is tracked (replacing
    /// and closing any previous channel under the same identity) and its
    /// message and disconnect events are wired up. A channel without one is
    /// left alone and reported as [`AcceptOutcome::Untracked`].
    pub fn accept(&self, channel: Arc<dyn Channel<M>>) -> AcceptOutcome {
        self.inner.accept(channel)
    }

    /// Forward a message to one endpoint's channel. Dropped with an
    /// observable outcome when no channel is tracked for the endpoint.
    pub fn post(&self, endpoint: &EndpointId, message: M) -> PostOutcome {
        let channel = {
            let channels = self.inner.channels.read();
            channels.get(endpoint).map(|slot| Arc::clone(&slot.channel))
        };
        match channel {
            Some(channel) => match channel.send(message) {
                Ok(()) => PostOutcome::Sent,
                Err(e) => {
                    let detail = e.to_string();
                    warn!(endpoint = %endpoint, error = %detail, "send to endpoint failed");
                    PostOutcome::SendFailed(detail)
                }
            },
            None => {
                debug!(endpoint = %endpoint, "no channel for endpoint; message dropped");
                PostOutcome::NoChannel
            }
        }
    }

    /// The live channel for an endpoint, if one is tracked.
    pub fn channel(&self, endpoint: &EndpointId) -> Option<Arc<dyn Channel<M>>> {
        let channels = self.inner.channels.read();
        channels.get(endpoint).map(|slot| Arc::clone(&slot.channel))
    }

    /// Identities of all tracked endpoints.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.inner.channels.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.channels.read().is_empty()
    }

    /// Close every tracked channel and clear the table. Serialized with
    /// concurrent `accept` calls; channels arriving afterwards are rejected
    /// and closed.
    pub fn close_all(&self) {
        self.inner.close_all();
    }

    /// Subscribe to the external about-to-terminate signal, at most once.
    /// The signal invokes [`close_all`](Self::close_all).
    pub fn bind_shutdown(&self, signal: &dyn ShutdownSignal) {
        let mut sub = self.inner.shutdown_sub.lock();
        if sub.is_some() {
            debug!("shutdown signal already bound");
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        *sub = Some(signal.subscribe(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.close_all();
            }
        })));
    }
}

impl<M> Default for EndpointRegistry<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> RegistryInner<M>
where
    M: Send + Sync + fmt::Debug + 'static,
{
    fn accept(self: &Arc<Self>, channel: Arc<dyn Channel<M>>) -> AcceptOutcome {
        let endpoint = match channel.remote_endpoint() {
            Some(endpoint) => endpoint,
            None => {
                warn!(
                    channel = %channel.name(),
                    "accepted channel has no resolvable endpoint identity; not tracked"
                );
                return AcceptOutcome::Untracked;
            }
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut channels = self.channels.write();
            if self.shut_down.load(Ordering::Acquire) {
                info!(channel = %channel.name(), "registry shut down; rejecting channel");
                channel.close();
                return AcceptOutcome::Rejected;
            }

            if let Some(mut previous) = channels.remove(&endpoint) {
                warn!(endpoint = %endpoint, "replacing existing channel for endpoint");
                previous.detach();
                previous.channel.close();
            }

            let weak = Arc::downgrade(self);
            let ep = endpoint.clone();
            let message_sub = channel.on_message(Box::new(move |message| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_message(&ep, token, message);
                }
            }));
            let weak = Arc::downgrade(self);
            let ep = endpoint.clone();
            let disconnect_sub = channel.on_disconnect(Box::new(move |_error| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_disconnect(&ep, token);
                }
            }));

            channels.insert(
                endpoint.clone(),
                EndpointSlot {
                    channel: Arc::clone(&channel),
                    token,
                    message_sub: Some(message_sub),
                    disconnect_sub: Some(disconnect_sub),
                },
            );
        }

        info!(endpoint = %endpoint, channel = %channel.name(), "endpoint connected");
        let origin = EndpointOrigin {
            endpoint: endpoint.clone(),
            channel,
        };
        self.listeners
            .dispatch(&EventKind::Connect, &EndpointEvent::Connected, &origin);
        AcceptOutcome::Tracked(endpoint)
    }

    fn handle_message(&self, endpoint: &EndpointId, token: u64, message: M) {
        let channel = {
            let channels = self.channels.read();
            match channels.get(endpoint) {
                Some(slot) if slot.token == token => Some(Arc::clone(&slot.channel)),
                _ => None,
            }
        };
        let channel = match channel {
            Some(channel) => channel,
            None => {
                debug!(endpoint = %endpoint, "message from untracked or replaced channel dropped");
                return;
            }
        };
        let origin = EndpointOrigin {
            endpoint: endpoint.clone(),
            channel,
        };
        let event = EndpointEvent::Message(message);
        let delivered = self.listeners.dispatch(&EventKind::Message, &event, &origin);
        debug!(endpoint = %endpoint, delivered, "endpoint message dispatched");
    }

    fn handle_disconnect(&self, endpoint: &EndpointId, token: u64) {
        let removed = {
            let mut channels = self.channels.write();
            match channels.get(endpoint) {
                Some(slot) if slot.token == token => channels.remove(endpoint),
                _ => None,
            }
        };
        let mut slot = match removed {
            Some(slot) => slot,
            None => {
                debug!(endpoint = %endpoint, "disconnect for untracked or replaced channel");
                return;
            }
        };
        slot.detach();
        info!(endpoint = %endpoint, "endpoint disconnected");
        let origin = EndpointOrigin {
            endpoint: endpoint.clone(),
            channel: slot.channel,
        };
        self.listeners
            .dispatch(&EventKind::Disconnect, &EndpointEvent::Disconnected, &origin);
    }

    fn close_all(&self) {
        let drained: Vec<(EndpointId, EndpointSlot<M>)> = {
            let mut channels = self.channels.write();
            self.shut_down.store(true, Ordering::Release);
            channels.drain().collect()
        };
        info!(count = drained.len(), "closing all endpoint channels");
        for (endpoint, mut slot) in drained {
            slot.detach();
            slot.channel.close();
            debug!(endpoint = %endpoint, "channel closed");
        }
    }
}
