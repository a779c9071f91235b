//! Type-state builder for [`Session`].
//!
//! The host capability and the channel name are required; leaving either out
//! is a compile error rather than a runtime one.

use crate::core::config::SessionConfig;
use crate::core::session::Session;
use crate::traits::host::{ChannelHost, TransportOptions};
use crate::traits::reconnect::{ReconnectOnce, ReconnectPolicy};
use crate::traits::validate::{accept_all, Validator};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker states for the builder.
pub mod states {
    pub struct NoHost;
    pub struct HasHost;
    pub struct NoName;
    pub struct HasName;
}

use states::{HasHost, HasName, NoHost, NoName};

/// Builder for [`Session`]; start from [`Session::builder`] or
/// [`SessionBuilder::new`].
pub struct SessionBuilder<M, H, N> {
    host: Option<Arc<dyn ChannelHost<M>>>,
    channel_name: Option<String>,
    remote_id: Option<String>,
    transport: TransportOptions,
    cache_validator: Validator<M>,
    reconnect: Box<dyn ReconnectPolicy>,
    _state: PhantomData<(H, N)>,
}

impl<M> Session<M>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    pub fn builder() -> SessionBuilder<M, NoHost, NoName> {
        SessionBuilder::new()
    }
}

impl<M> SessionBuilder<M, NoHost, NoName> {
    pub fn new() -> Self {
        Self {
            host: None,
            channel_name: None,
            remote_id: None,
            transport: TransportOptions::default(),
            cache_validator: accept_all(),
            reconnect: Box::new(ReconnectOnce),
            _state: PhantomData,
        }
    }
}

impl<M> Default for SessionBuilder<M, NoHost, NoName> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, H, N> SessionBuilder<M, H, N> {
    /// The host capability that opens channels. Required.
    pub fn host(self, host: Arc<dyn ChannelHost<M>>) -> SessionBuilder<M, HasHost, N> {
        SessionBuilder {
            host: Some(host),
            channel_name: self.channel_name,
            remote_id: self.remote_id,
            transport: self.transport,
            cache_validator: self.cache_validator,
            reconnect: self.reconnect,
            _state: PhantomData,
        }
    }

    /// The channel name to connect under. Required.
    pub fn channel_name(self, name: impl Into<String>) -> SessionBuilder<M, H, HasName> {
        SessionBuilder {
            host: self.host,
            channel_name: Some(name.into()),
            remote_id: self.remote_id,
            transport: self.transport,
            cache_validator: self.cache_validator,
            reconnect: self.reconnect,
            _state: PhantomData,
        }
    }

    /// Remote peer identity to address at open time.
    pub fn remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Gate for the last-message cache (default: accept all).
    pub fn cache_validator(mut self, validator: Validator<M>) -> Self {
        self.cache_validator = validator;
        self
    }

    /// Policy consulted after each non-fatal close (default:
    /// [`ReconnectOnce`]).
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect = Box::new(policy);
        self
    }
}

impl<M> SessionBuilder<M, HasHost, HasName>
where
    M: Clone + Send + Sync + fmt::Debug + 'static,
{
    /// Build the session. The session starts idle; call
    /// [`Session::establish`] to open the channel.
    pub fn build(self) -> Session<M> {
        let host = self.host.expect("type-state guarantees a host");
        let config = SessionConfig {
            channel_name: self.channel_name.expect("type-state guarantees a name"),
            remote_id: self.remote_id,
            transport: self.transport,
            cache_validator: self.cache_validator,
            reconnect: self.reconnect,
        };
        Session::new(host, config)
    }
}
