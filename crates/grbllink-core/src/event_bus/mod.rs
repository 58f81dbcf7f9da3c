//! # Event Bus Module
//!
//! Publish/subscribe channel between the protocol layer and whatever drives
//! it (a GUI, the CLI, or a test). Protocol workers publish status updates,
//! batch progress and jog session transitions; observers subscribe by
//! category instead of owning protocol logic.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grbllink_core::event_bus::{event_bus, AppEvent, EventCategory, EventFilter};
//!
//! let subscription = event_bus().subscribe(
//!     EventFilter::Categories(vec![EventCategory::Machine]),
//!     |event| println!("{}", event.description()),
//! );
//!
//! event_bus().unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
