//! Shared fixtures for protocol tests

#![allow(dead_code)]

use grbllink_communication::{
    DeviceStatusModel, HandlerId, ReceiveHandler, SubscriberSlot, Transport,
};
use grbllink_core::{ConnectionError, EventBus, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const IDLE: &str = "<Idle|MPos:0.000,0.000,0.000|FS:0,0>";

type LineReply = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Transport that answers from a script, synchronously.
///
/// Each line gets the reply function's output; each `?` gets the next queued
/// status report (the last one repeats).
pub struct ScriptedTransport {
    slot: SubscriberSlot,
    connected: AtomicBool,
    partial: Mutex<String>,
    lines: Mutex<Vec<String>>,
    bytes: Mutex<Vec<u8>>,
    statuses: Mutex<VecDeque<String>>,
    reply: LineReply,
    cancel_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedTransport {
    /// Acknowledge every line, report Idle
    pub fn echo_ok() -> Self {
        Self::with_reply(|_| "ok\n".to_string())
    }

    pub fn with_reply(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            slot: SubscriberSlot::new(),
            connected: AtomicBool::new(true),
            partial: Mutex::new(String::new()),
            lines: Mutex::new(Vec::new()),
            bytes: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::from([IDLE.to_string()])),
            reply: Box::new(reply),
            cancel_at: Mutex::new(None),
        }
    }

    /// Status reports answered in order; the last one repeats.
    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        *self.statuses.lock() = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Cancel `token` when the `count`-th line arrives.
    pub fn cancel_after(&self, count: usize, token: CancellationToken) {
        *self.cancel_at.lock() = Some((count, token));
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn next_status(&self) -> String {
        let mut statuses = self.statuses.lock();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        format!("{}\n", status.unwrap_or_else(|| IDLE.to_string()))
    }

    fn on_line(&self, line: String) -> String {
        let count = {
            let mut lines = self.lines.lock();
            lines.push(line.clone());
            lines.len()
        };
        if let Some((at, token)) = self.cancel_at.lock().as_ref() {
            if *at == count {
                token.cancel();
            }
        }
        (self.reply)(&line)
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        let mut reply = String::new();
        for c in text.chars() {
            match c {
                '?' => reply.push_str(&self.next_status()),
                '\n' => {
                    let line = std::mem::take(&mut *self.partial.lock());
                    reply.push_str(&self.on_line(line));
                }
                c => self.partial.lock().push(c),
            }
        }
        for byte in reply.bytes() {
            self.slot.dispatch(byte);
        }
        Ok(())
    }

    fn send_byte(&self, byte: u8) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        self.bytes.lock().push(byte);
        Ok(())
    }

    fn set_receive_handler(&self, label: &str, handler: ReceiveHandler) -> Result<HandlerId> {
        self.slot.register(label, handler)
    }

    fn clear_receive_handler(&self, id: HandlerId) {
        self.slot.clear(id);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Fresh bus and status model, private to the calling test
pub fn status_model() -> (Arc<EventBus>, DeviceStatusModel) {
    let bus = Arc::new(EventBus::new());
    let status = DeviceStatusModel::new(bus.clone());
    (bus, status)
}

/// Collect whatever the receiver has buffered
pub fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
