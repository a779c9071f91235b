//! Session configuration.

use crate::traits::host::TransportOptions;
use crate::traits::reconnect::{ReconnectOnce, ReconnectPolicy};
use crate::traits::validate::{accept_all, Validator};

/// Configuration for a [`Session`](crate::core::session::Session).
///
/// Built by the [`SessionBuilder`](crate::core::builder::SessionBuilder);
/// held by the session for its whole lifetime, reused verbatim on
/// reconnection (same channel name, same remote peer).
pub struct SessionConfig<M> {
    /// Channel name agreed with the peer
    pub(crate) channel_name: String,

    /// Optional remote peer identity to address at open time
    pub(crate) remote_id: Option<String>,

    /// Options forwarded to the host when opening
    pub(crate) transport: TransportOptions,

    /// Gate for the last-message cache. Per-listener validators only gate
    /// delivery; this one decides what late subscribers can catch up on.
    pub(crate) cache_validator: Validator<M>,

    /// Policy consulted on each close without a fatal error
    pub(crate) reconnect: Box<dyn ReconnectPolicy>,
}

impl<M> SessionConfig<M> {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            remote_id: None,
            transport: TransportOptions::default(),
            cache_validator: accept_all(),
            reconnect: Box::new(ReconnectOnce),
        }
    }

    /// The channel name this session connects under.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// The remote peer identity, if one is addressed.
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }
}
