//! Per-operation binding of assembler and gate to a transport
//!
//! An [`Exchange`] owns the transport's receive slot for as long as it lives.
//! Received lines are classified as they complete: an `ok` advances the gate,
//! a status report updates the shared model and answers a pending `?`,
//! anything else is appended to the response text.
//!
//! Batch and jog exchanges also let an `error:`/`ALARM:` line complete the
//! outstanding command, since GRBL sends no `ok` for a rejected line. The
//! rejection is kept for the operation to pick up after its wait.

use grbllink_core::{
    AppEvent, CommunicationEvent, ConnectionError, EventBus, ProtocolError, Result,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ack_gate::AckGate;
use super::assembler::ResponseAssembler;
use super::status_parser::{state_of, DeviceStatusModel, MachineState};
use super::utils::{self, LINE_TERMINATOR, STATUS_QUERY};
use crate::communication::{Subscription, Transport};

#[derive(Default)]
struct Received {
    text: String,
    last_state: Option<MachineState>,
    rejection: Option<String>,
}

struct ExchangeState {
    assembler: Mutex<ResponseAssembler>,
    gate: AckGate,
    received: Mutex<Received>,
    status_query_pending: AtomicBool,
    rejections_complete: AtomicBool,
    status: DeviceStatusModel,
    bus: Arc<EventBus>,
}

impl ExchangeState {
    fn on_byte(&self, byte: u8) {
        let line = self.assembler.lock().push(byte);
        if let Some(line) = line {
            self.on_line(line);
        }
    }

    fn on_line(&self, line: String) {
        tracing::debug!("RX: {}", line);

        if utils::is_acknowledgment(&line) {
            self.gate.complete();
            return;
        }

        if utils::is_status_report(&line) {
            self.status.apply_line(&line);
            if let Some(state) = state_of(&line) {
                self.received.lock().last_state = Some(state);
            }
            // GRBL answers `?` with the report alone, no `ok`.
            if self.status_query_pending.swap(false, Ordering::SeqCst) {
                self.gate.complete();
                return;
            }
        }

        if utils::is_command_error(&line) {
            tracing::warn!("Device reported: {}", line);
            if self.rejections_complete.load(Ordering::SeqCst) && !self.gate.is_settled() {
                self.received.lock().rejection = Some(line.trim().to_string());
                self.gate.complete();
            }
        }
        let mut received = self.received.lock();
        received.text.push_str(&line);
        received.text.push(LINE_TERMINATOR);
        drop(received);
        self.bus.publish(AppEvent::Communication(CommunicationEvent::LineReceived { line }));
    }
}

/// Receive-slot holder for one operation
pub(crate) struct Exchange {
    transport: Arc<dyn Transport>,
    state: Arc<ExchangeState>,
    // Dropped last: releasing the slot ends the exchange.
    _subscription: Subscription,
}

impl Exchange {
    /// Take the transport's receive slot under `label`.
    pub(crate) fn open(
        transport: Arc<dyn Transport>,
        label: &str,
        status: DeviceStatusModel,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let state = Arc::new(ExchangeState {
            assembler: Mutex::new(ResponseAssembler::new()),
            gate: AckGate::new(),
            received: Mutex::new(Received::default()),
            status_query_pending: AtomicBool::new(false),
            rejections_complete: AtomicBool::new(false),
            status,
            bus,
        });

        let handler_state = state.clone();
        let subscription = Subscription::bind(
            transport.clone(),
            label,
            Arc::new(move |byte| handler_state.on_byte(byte)),
        )?;

        Ok(Self {
            transport,
            state,
            _subscription: subscription,
        })
    }

    pub(crate) fn gate(&self) -> &AckGate {
        &self.state.gate
    }

    /// Let `error:`/`ALARM:` lines answer the outstanding command.
    pub(crate) fn complete_on_rejection(&self) {
        self.state.rejections_complete.store(true, Ordering::SeqCst);
    }

    /// Rejection that answered the last command, if any
    pub(crate) fn take_rejection(&self) -> Option<String> {
        self.state.received.lock().rejection.take()
    }

    /// Send one command line under the gate.
    ///
    /// The gate is advanced before the bytes go out so an acknowledgment
    /// delivered during the write is never lost.
    pub(crate) fn send_line(&self, command: &str) -> Result<()> {
        utils::validate_command(command)
            .map_err(|reason| ProtocolError::InvalidCommand { reason })?;
        self.state.gate.issue()?;
        tracing::debug!("TX: {}", command);
        self.state.bus.publish(AppEvent::Communication(CommunicationEvent::LineSent {
            line: command.to_string(),
        }));
        self.transport.send_text(&format!("{}{}", command, LINE_TERMINATOR))
    }

    /// Send `?` under the gate; the next status report completes it.
    ///
    /// Clears the recorded state so [`Exchange::last_state`] reflects this
    /// query's answer only.
    pub(crate) fn query_status(&self) -> Result<()> {
        self.state.gate.issue()?;
        self.state.received.lock().last_state = None;
        self.state.status_query_pending.store(true, Ordering::SeqCst);
        if let Err(e) = self.transport.send_text(STATUS_QUERY) {
            self.state.status_query_pending.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Send a realtime byte outside the gate.
    pub(crate) fn send_realtime(&self, byte: u8) -> Result<()> {
        tracing::debug!("TX: 0x{:02x}", byte);
        self.transport.send_byte(byte)
    }

    /// Wait for the outstanding acknowledgment.
    ///
    /// Gives up with `AckTimeout` after `max_polls` intervals (if bounded)
    /// and with `NotConnected` if the transport goes away. Cancellation is
    /// the caller's business between commands, never mid-handshake.
    pub(crate) async fn wait(&self, poll_interval: Duration, max_polls: Option<u32>) -> Result<()> {
        let mut polls: u32 = 0;
        self.state
            .gate
            .await_completion(poll_interval, || {
                if !self.transport.is_connected() {
                    return Err(ConnectionError::NotConnected.into());
                }
                if let Some(max) = max_polls {
                    if polls >= max {
                        let timeout_ms = poll_interval.as_millis() as u64 * u64::from(max);
                        return Err(ProtocolError::AckTimeout { timeout_ms }.into());
                    }
                }
                polls += 1;
                Ok(())
            })
            .await
    }

    /// State of the latest status report seen since the last query
    pub(crate) fn last_state(&self) -> Option<MachineState> {
        self.state.received.lock().last_state
    }

    /// Every line except acknowledgments and answers to `?`, newline-terminated
    pub(crate) fn response_text(&self) -> String {
        self.state.received.lock().text.clone()
    }
}
