//! # GRBLLink Core
//!
//! Core types, errors, and utilities for GRBLLink.
//! Provides the error taxonomy shared by every layer, the type aliases used
//! for cross-thread state, and the application event bus through which the
//! protocol layer reports status, progress, and jog session changes.

pub mod error;
pub mod event_bus;
pub mod types;

pub use error::{ConnectionError, Error, ProtocolError, Result};

// Re-export event bus for convenience
pub use event_bus::{
    event_bus, AppEvent, BatchEvent, CommunicationEvent, ConnectionEvent, EventBus,
    EventBusConfig, EventCategory, EventFilter, JogEvent, MachineEvent, SubscriptionId,
};

// Re-export type aliases for convenience
pub use types::{thread_safe_rw, ProgressCallback, ThreadSafeRw};
