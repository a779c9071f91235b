//! Host channel capability seam.
//!
//! The concrete transport is provided by a host environment and consumed
//! through these traits. The core never implements a transport itself; it
//! opens channels via [`ChannelHost`], sends and closes via [`Channel`], and
//! observes inbound traffic and disconnects through the subscription points.

use crate::traits::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opaque identity the host assigns to a remote endpoint when it accepts a
/// connection. Some hosts hand out integers, others strings; both are keys,
/// never inspected beyond equality and hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointId {
    Index(u64),
    Name(String),
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointId::Index(n) => write!(f, "{}", n),
            EndpointId::Name(s) => f.write_str(s),
        }
    }
}

impl From<u64> for EndpointId {
    fn from(n: u64) -> Self {
        EndpointId::Index(n)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        EndpointId::Name(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        EndpointId::Name(s)
    }
}

/// Options forwarded verbatim to the host when opening a channel.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Ask the host to attach channel credentials to the open request.
    pub include_channel_credentials: bool,
}

/// Handle returned by every subscription point.
///
/// Unsubscribing is explicit and idempotent. Dropping the handle does NOT
/// detach the listener: a registration outlives an ignored handle, matching
/// the add/remove listener model of the host environments this targets. The
/// owning `Session`/`EndpointRegistry` keep their handles and cancel them
/// deterministically at teardown.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle that detaches nothing. Returned by hosts that have no
    /// matching subscription point.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    /// Detach the underlying listener. Safe to call on an inert handle.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

/// Callback invoked for each inbound message on a channel.
pub type MessageCallback<M> = Box<dyn Fn(M) + Send + Sync>;

/// Callback invoked when a channel disconnects. Carries the host-reported
/// last error, surfaced only at disconnect time.
pub type DisconnectCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

/// A named bidirectional pipe to a remote process or endpoint.
///
/// Exclusively owned by one `Session` or one `EndpointRegistry` entry at a
/// time; two logical owners must never hold the same channel simultaneously.
pub trait Channel<M>: Send + Sync {
    /// Channel name agreed with the peer at open/accept time.
    fn name(&self) -> &str;

    /// Remote endpoint identity, assigned by the host when the channel was
    /// accepted on the server side. `None` on the connecting side and for
    /// channels the host could not attribute.
    fn remote_endpoint(&self) -> Option<EndpointId> {
        None
    }

    /// Forward a message to the peer.
    fn send(&self, message: M) -> Result<()>;

    /// Close the channel. Closing an already-closed channel is a no-op.
    fn close(&self);

    /// Subscribe to inbound messages.
    fn on_message(&self, callback: MessageCallback<M>) -> Subscription;

    /// Subscribe to the disconnect event.
    fn on_disconnect(&self, callback: DisconnectCallback) -> Subscription;
}

/// The host capability that opens channels.
#[async_trait]
pub trait ChannelHost<M>: Send + Sync {
    /// Whether the channel capability exists in this environment at all.
    /// When `false`, no amount of retrying can help.
    fn is_available(&self) -> bool {
        true
    }

    /// Open a channel named `name`, optionally addressed at a remote peer.
    /// Connection-level failures the host only detects later are reported
    /// asynchronously through the channel's disconnect event instead.
    async fn open(
        &self,
        name: &str,
        remote: Option<&str>,
        options: &TransportOptions,
    ) -> Result<Arc<dyn Channel<M>>>;
}

/// External "about to terminate" event.
///
/// A `Session` or `EndpointRegistry` subscribes to this exactly once and
/// drops the subscription as part of its own teardown, so the subscription
/// itself never leaks past the owner.
pub trait ShutdownSignal: Send + Sync {
    fn subscribe(&self, callback: Box<dyn Fn() + Send + Sync>) -> Subscription;
}
