//! Transport layer
//!
//! A transport is a byte sink with exactly one receive-handler slot. The
//! protocol layer binds a handler for the duration of one operation (a single
//! command, a batch run, a jog session) and releases it afterwards; a second
//! concurrent binding is rejected rather than silently replacing the first.

pub mod serial;
pub mod simulated;

use grbllink_core::{ConnectionError, ProtocolError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback receiving every byte that arrives on the transport.
pub type ReceiveHandler = Arc<dyn Fn(u8) + Send + Sync>;

/// Identifies one registration of a receive handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Parameters used to open a serial transport
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Read timeout of the reader thread in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 10,
        }
    }
}

impl ConnectionParams {
    /// Parameters for `port` at `baud_rate`, 8N1.
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Check the parameters before opening a port.
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "port name is empty".to_string(),
            }
            .into());
        }
        if self.baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "baud rate must be positive".to_string(),
            }
            .into());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConnectionError::InvalidParameters {
                reason: format!("invalid data bits: {}", self.data_bits),
            }
            .into());
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConnectionError::InvalidParameters {
                reason: format!("invalid stop bits: {}", self.stop_bits),
            }
            .into());
        }
        Ok(())
    }
}

/// A byte-oriented connection to the device
///
/// Implementations deliver received bytes, one at a time and in arrival
/// order, to whichever handler currently occupies the single receive slot.
pub trait Transport: Send + Sync {
    /// Human readable name (port path or "simulator").
    fn name(&self) -> String;

    /// Write text as-is. Line terminators are the caller's business.
    fn send_text(&self, text: &str) -> Result<()>;

    /// Write one raw byte (realtime commands).
    fn send_byte(&self, byte: u8) -> Result<()>;

    /// Occupy the receive slot. Fails with `SubscriberBusy` if it is taken.
    fn set_receive_handler(&self, label: &str, handler: ReceiveHandler) -> Result<HandlerId>;

    /// Release the slot if `id` still holds it.
    fn clear_receive_handler(&self, id: HandlerId);

    /// Whether the underlying link is still usable.
    fn is_connected(&self) -> bool;
}

struct SlotEntry {
    id: HandlerId,
    label: String,
    handler: ReceiveHandler,
}

/// Single-occupancy receive-handler registry shared by transport impls
#[derive(Default)]
pub struct SubscriberSlot {
    entry: Mutex<Option<SlotEntry>>,
    next_id: AtomicU64,
}

impl SubscriberSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `label`.
    pub fn register(&self, label: &str, handler: ReceiveHandler) -> Result<HandlerId> {
        let mut entry = self.entry.lock();
        if let Some(current) = entry.as_ref() {
            return Err(ProtocolError::SubscriberBusy {
                holder: current.label.clone(),
            }
            .into());
        }
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        *entry = Some(SlotEntry {
            id,
            label: label.to_string(),
            handler,
        });
        Ok(id)
    }

    /// Clear the slot. A stale id (already cleared or replaced) is ignored.
    pub fn clear(&self, id: HandlerId) {
        let mut entry = self.entry.lock();
        if entry.as_ref().is_some_and(|current| current.id == id) {
            *entry = None;
        }
    }

    /// Deliver a byte to the current handler, if any.
    ///
    /// The handler runs outside the slot lock so it may send on the
    /// transport or release its own registration.
    pub fn dispatch(&self, byte: u8) -> bool {
        let handler = self.entry.lock().as_ref().map(|e| e.handler.clone());
        match handler {
            Some(handler) => {
                handler(byte);
                true
            }
            None => false,
        }
    }

    /// Label of the current holder
    pub fn holder(&self) -> Option<String> {
        self.entry.lock().as_ref().map(|e| e.label.clone())
    }

    /// Whether a handler is registered
    pub fn is_occupied(&self) -> bool {
        self.entry.lock().is_some()
    }
}

impl std::fmt::Debug for SubscriberSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSlot")
            .field("holder", &self.holder())
            .finish()
    }
}

/// Scoped registration of a receive handler
///
/// Registers on creation and releases the slot when dropped, so every exit
/// path of an operation (normal, error, cancellation) deregisters.
pub struct Subscription {
    transport: Arc<dyn Transport>,
    id: HandlerId,
    label: String,
}

impl Subscription {
    /// Bind `handler` to `transport` for the lifetime of the returned guard.
    pub fn bind(
        transport: Arc<dyn Transport>,
        label: &str,
        handler: ReceiveHandler,
    ) -> Result<Self> {
        let id = transport.set_receive_handler(label, handler)?;
        tracing::debug!("{} bound to {} as {}", label, transport.name(), id);
        Ok(Self {
            transport,
            id,
            label: label.to_string(),
        })
    }

    /// Registration id
    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.transport.clear_receive_handler(self.id);
        tracing::debug!("{} released {}", self.label, self.transport.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_slot_rejects_second_handler() {
        let slot = SubscriberSlot::new();
        let first = slot.register("batch", Arc::new(|_| {})).unwrap();

        let err = slot.register("jog", Arc::new(|_| {})).unwrap_err();
        assert!(err.to_string().contains("batch"));
        assert!(slot.is_occupied());

        slot.clear(first);
        assert!(!slot.is_occupied());
        assert!(slot.register("jog", Arc::new(|_| {})).is_ok());
    }

    #[test]
    fn test_stale_clear_is_ignored() {
        let slot = SubscriberSlot::new();
        let first = slot.register("one", Arc::new(|_| {})).unwrap();
        slot.clear(first);
        let _second = slot.register("two", Arc::new(|_| {})).unwrap();

        slot.clear(first);
        assert_eq!(slot.holder().as_deref(), Some("two"));
    }

    #[test]
    fn test_dispatch_reaches_handler() {
        let slot = SubscriberSlot::new();
        assert!(!slot.dispatch(b'x'));

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        slot.register(
            "counter",
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert!(slot.dispatch(b'o'));
        assert!(slot.dispatch(b'k'));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let device: Arc<dyn Transport> = Arc::new(simulated::SimulatedDevice::new());

        let subscription = Subscription::bind(device.clone(), "scoped", Arc::new(|_| {})).unwrap();
        let stale = subscription.id();
        assert!(Subscription::bind(device.clone(), "other", Arc::new(|_| {})).is_err());
        drop(subscription);

        let next = Subscription::bind(device.clone(), "other", Arc::new(|_| {})).unwrap();
        assert_ne!(next.id(), stale);
        // Clearing with the old id leaves the new holder in place.
        device.clear_receive_handler(stale);
        assert!(Subscription::bind(device, "third", Arc::new(|_| {})).is_err());
    }

    #[test]
    fn test_params_validation() {
        assert!(ConnectionParams::serial("/dev/ttyUSB0", 115_200)
            .validate()
            .is_ok());
        assert!(ConnectionParams::default().validate().is_err());

        let mut params = ConnectionParams::serial("COM3", 9600);
        params.data_bits = 9;
        assert!(params.validate().is_err());
    }
}
