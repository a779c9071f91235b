//! Server-side multiplexing.

pub mod endpoints;

pub use endpoints::{
    AcceptOutcome, EndpointEvent, EndpointListener, EndpointOrigin, EndpointRegistry, EventKind,
};
