//! Client-side core: the session state machine and its supporting pieces.

pub mod builder;
pub mod config;
pub mod listeners;
pub mod session;
pub mod status;

// Re-export main types
pub use builder::{states, SessionBuilder};
pub use config::SessionConfig;
pub use listeners::{Listener, ListenerSet};
pub use session::{PostOutcome, Session, SessionEvent, SessionOrigin, SubscriberId};
pub use status::{AtomicSessionStatus, MetricsSnapshot, SessionMetrics, SessionStatus};
