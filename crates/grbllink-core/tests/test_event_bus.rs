use grbllink_core::{
    event_bus, AppEvent, BatchEvent, EventBus, EventCategory, EventFilter, JogEvent, MachineEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_category_filter_only_delivers_matching_events() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(
        EventFilter::Categories(vec![EventCategory::Jog]),
        move |event| sink.lock().push(event),
    );

    bus.publish(AppEvent::Batch(BatchEvent::Started { total: 2 }));
    bus.publish(AppEvent::Jog(JogEvent::Releasing));

    assert_eq!(*seen.lock(), vec![AppEvent::Jog(JogEvent::Releasing)]);
}

#[test]
fn test_unsubscribed_handler_is_not_called() {
    let bus = EventBus::new();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let id = bus.subscribe(EventFilter::All, move |_| *counter.lock() += 1);

    assert_eq!(bus.publish(AppEvent::Jog(JogEvent::Stopped { moves: 1 })), 1);
    assert!(bus.unsubscribe(id));
    assert!(!bus.unsubscribe(id));
    assert_eq!(bus.publish(AppEvent::Jog(JogEvent::Stopped { moves: 2 })), 0);
    assert_eq!(*count.lock(), 1);
}

#[test]
fn test_handler_may_unsubscribe_itself() {
    let bus = Arc::new(EventBus::new());
    let slot = Arc::new(Mutex::new(None));
    let (inner_bus, inner_slot) = (bus.clone(), slot.clone());
    let id = bus.subscribe(EventFilter::All, move |_| {
        if let Some(id) = inner_slot.lock().take() {
            inner_bus.unsubscribe(id);
        }
    });
    *slot.lock() = Some(id);

    bus.publish(AppEvent::Jog(JogEvent::Releasing));
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_async_receiver_sees_published_events() {
    let bus = EventBus::new();
    let mut rx = bus.receiver();

    bus.publish(AppEvent::Batch(BatchEvent::Finished {
        sent: 3,
        aborted: false,
    }));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.category(), EventCategory::Batch);
}

#[test]
fn test_global_bus_is_shared() {
    assert!(Arc::ptr_eq(&event_bus(), &event_bus()));
}

#[test]
fn test_events_serialize_to_json() {
    let event = AppEvent::Machine(MachineEvent::StatusUpdated {
        state: "Jog".to_string(),
        x: Some(0.1),
        y: None,
        z: Some(-1.25),
    });

    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("StatusUpdated"));
    let back: AppEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}
