//! # portmux
//!
//! Typed, many-to-one message delivery between one long-lived process and a
//! variable set of logical subscribers, multiplexed over a single
//! bidirectional named channel, plus the server-side counterpart that fans
//! the same channel abstraction out across many connected remote endpoints.
//!
//! ## Components
//!
//! - **[`Session`]**: client side. Owns one host channel at a time, runs the
//!   idle → open → closed state machine, fans validated messages out to
//!   registered listeners and caches the last accepted message for late
//!   subscribers.
//! - **[`EndpointRegistry`]**: server side. Tracks many channels keyed by
//!   remote endpoint identity and routes connect/disconnect/message events
//!   to per-kind listener sets.
//! - **[`ReconnectPolicy`]**: decides whether a non-fatal close arms one
//!   automatic reattempt.
//! - **[`ChannelHost`] / [`Channel`]**: the trait seam to the host
//!   environment that actually implements the transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! use portmux::{Session, PostOutcome};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session: Session<Value> = Session::builder()
//!         .host(host)
//!         .channel_name("c1")
//!         .remote_id("ext-1")
//!         .build();
//!
//!     session.establish().await;
//!     let _sub = session.subscribe(
//!         "ui",
//!         |message, _origin| println!("got {message}"),
//!         None,
//!         true, // flush the cached message if one already arrived
//!     );
//!
//!     match session.post(json!({"type": "ping"})) {
//!         PostOutcome::Sent => {}
//!         outcome => eprintln!("dropped: {outcome:?}"),
//!     }
//! }
//! ```

pub mod core;
pub mod manager;
pub mod traits;

// Re-export all traits
pub use crate::traits::*;

// Re-export core session functionality
pub use crate::core::{
    builder,
    builder::{states, SessionBuilder},
    config::SessionConfig,
    listeners::{Listener, ListenerSet},
    session::{PostOutcome, Session, SessionEvent, SessionOrigin, SubscriberId},
    status::{AtomicSessionStatus, MetricsSnapshot, SessionMetrics, SessionStatus},
};

// Re-export the server-side registry
pub use crate::manager::{
    AcceptOutcome, EndpointEvent, EndpointListener, EndpointOrigin, EndpointRegistry, EventKind,
};
