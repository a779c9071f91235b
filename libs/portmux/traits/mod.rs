//! # portmux traits
//!
//! Trait seams and leaf types shared across the crate:
//!
//! - **ChannelHost / Channel**: the external transport capability
//! - **ShutdownSignal**: the external about-to-terminate event
//! - **Validator**: per-listener payload predicates
//! - **ReconnectPolicy**: self-healing decisions after non-fatal closes

pub mod error;
pub mod host;
pub mod reconnect;
pub mod validate;

// Re-export commonly used types
pub use error::{PortMuxError, Result};
pub use host::{
    Channel, ChannelHost, DisconnectCallback, EndpointId, MessageCallback, ShutdownSignal,
    Subscription, TransportOptions,
};
pub use reconnect::{BoundedReconnect, NeverReconnect, ReconnectOnce, ReconnectPolicy};
pub use validate::{accept_all, truthy, Validator};
