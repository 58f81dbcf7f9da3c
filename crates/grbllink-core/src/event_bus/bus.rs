//! Event Bus implementation.
//!
//! Provides the core EventBus struct and the global instance used by the
//! CLI. Protocol workers hold an `Arc<EventBus>` so tests can observe a
//! private bus.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific event types
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events matching any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Arc<dyn Fn(AppEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
    /// Log every published event at trace level.
    pub trace_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            trace_events: false,
        }
    }
}

/// Central event bus for application-wide event distribution
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of handlers and async receivers reached. Having no
    /// subscribers is not an error: protocol workers publish unconditionally.
    pub fn publish(&self, event: AppEvent) -> usize {
        if self.config.trace_events {
            tracing::trace!("event: {}", event.description());
        }

        // Snapshot so a handler may subscribe/unsubscribe without deadlocking
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .values()
            .filter(|(filter, _)| filter.matches(&event))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &handlers {
            handler(event.clone());
        }

        handlers.len() + self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events with a synchronous handler
    ///
    /// The handler runs on the publishing thread, which is often a protocol
    /// worker or a transport reader; it must return quickly.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, (filter, Arc::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for async event polling
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe from events
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Get the number of active handler subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

static EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Get or initialize the global event bus
pub fn event_bus() -> Arc<EventBus> {
    EVENT_BUS.get_or_init(|| Arc::new(EventBus::new())).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{BatchEvent, JogEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new();

        let id = bus.subscribe(EventFilter::All, |_| {});
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(AppEvent::Jog(JogEvent::Releasing)), 0);
    }

    #[test]
    fn test_event_filtering() {
        let bus = EventBus::new();
        let batch_count = Arc::new(AtomicUsize::new(0));
        let jog_count = Arc::new(AtomicUsize::new(0));

        let bc = batch_count.clone();
        bus.subscribe(
            EventFilter::Categories(vec![EventCategory::Batch]),
            move |_| {
                bc.fetch_add(1, Ordering::SeqCst);
            },
        );

        let jc = jog_count.clone();
        bus.subscribe(EventFilter::Categories(vec![EventCategory::Jog]), move |_| {
            jc.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(AppEvent::Batch(BatchEvent::Started { total: 2 }));
        bus.publish(AppEvent::Batch(BatchEvent::Progress { index: 0, total: 2 }));
        bus.publish(AppEvent::Jog(JogEvent::Releasing));

        assert_eq!(batch_count.load(Ordering::SeqCst), 2);
        assert_eq!(jog_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot = Arc::new(parking_lot::Mutex::new(None));

        let bus_clone = bus.clone();
        let slot_clone = slot.clone();
        let id = bus.subscribe(EventFilter::All, move |_| {
            if let Some(id) = slot_clone.lock().take() {
                bus_clone.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        bus.publish(AppEvent::Jog(JogEvent::Releasing));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_async_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();

        bus.publish(AppEvent::Jog(JogEvent::Stopped { moves: 4 }));

        match receiver.try_recv() {
            Ok(AppEvent::Jog(JogEvent::Stopped { moves })) => assert_eq!(moves, 4),
            other => panic!("Wrong event received: {:?}", other),
        }
    }
}
