//! In-memory GRBL-like device
//!
//! Answers synchronously from inside `send_text`/`send_byte`: every line gets
//! `ok`, `?` gets a status report, `$I` and `$$` get canned banners, and `$J=`
//! moves put the device in the Jog state for a few status polls (or until
//! the jog-cancel byte arrives). Used by the CLI's simulate mode and tests.
//!
//! With a latency set, replies are delivered in order from a background
//! thread instead, which paces callers the way a serial link does.

use super::{HandlerId, ReceiveHandler, SubscriberSlot, Transport};
use crate::firmware::grbl::settings::SettingsTable;
use crate::firmware::grbl::utils::{format_position, JOG_CANCEL, SOFT_RESET};
use grbllink_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_SETTINGS: &str = "$0=10\n$1=25\n$2=0\n$3=0\n$4=0\n$5=0\n$6=0\n$10=1\n\
$11=0.010\n$12=0.002\n$13=0\n$20=0\n$21=0\n$22=0\n$23=0\n$24=25.000\n$25=500.000\n\
$26=250\n$27=1.000\n$30=1000\n$31=0\n$32=0\n$100=250.000\n$101=250.000\n$102=250.000\n\
$110=500.000\n$111=500.000\n$112=500.000\n$120=10.000\n$121=10.000\n$122=10.000\n\
$130=200.000\n$131=200.000\n$132=200.000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Idle,
    Jog,
}

struct Device {
    state: SimState,
    position: [f64; 3],
    origin: [f64; 3],
    feed: f64,
    jog_polls_left: u32,
    jog_polls: u32,
    line: String,
    settings: SettingsTable,
    responding: bool,
    sent_lines: Vec<String>,
    realtime: Vec<u8>,
    status_queries: usize,
}

impl Device {
    fn status_report(&mut self) -> String {
        self.status_queries += 1;
        let state = match self.state {
            SimState::Idle => "Idle",
            SimState::Jog => "Jog",
        };
        let feed = if self.state == SimState::Jog { self.feed } else { 0.0 };
        let report = format!(
            "<{}|MPos:{},{},{}|FS:{},0>\n",
            state,
            format_position(self.position[0]),
            format_position(self.position[1]),
            format_position(self.position[2]),
            feed
        );
        if self.state == SimState::Jog {
            self.jog_polls_left = self.jog_polls_left.saturating_sub(1);
            if self.jog_polls_left == 0 {
                self.state = SimState::Idle;
            }
        }
        report
    }

    fn execute_line(&mut self, line: &str) -> String {
        let line = line.trim();
        self.sent_lines.push(line.to_string());

        if line.eq_ignore_ascii_case("$I") {
            return "[VER:1.1h.20190825:]\n[OPT:V,15,128]\nok\n".to_string();
        }
        if line == "$$" {
            let mut out: String = self
                .settings
                .iter()
                .map(|(k, v)| format!("{}={}\n", k, v))
                .collect();
            out.push_str("ok\n");
            return out;
        }
        if let Some(jog) = line.strip_prefix("$J=") {
            let words = axis_words(jog);
            for (axis, value) in words {
                self.position[axis] += value;
            }
            if let Some(feed) = word_value(jog, 'F') {
                self.feed = feed;
            }
            self.state = SimState::Jog;
            self.jog_polls_left = self.jog_polls.max(1);
            return "ok\n".to_string();
        }
        if line.starts_with('$') {
            if let Some((key, value)) = line.split_once('=') {
                self.settings.set(key.trim(), value.trim());
            }
            return "ok\n".to_string();
        }

        let upper = line.to_ascii_uppercase();
        if upper.starts_with("G92") {
            self.origin = self.position;
        } else if upper.starts_with("G0") || upper.starts_with("G1") {
            for (axis, value) in axis_words(&upper) {
                self.position[axis] = self.origin[axis] + value;
            }
        }
        "ok\n".to_string()
    }

    fn receive_text(&mut self, text: &str) -> String {
        let mut out = String::new();
        for c in text.chars() {
            match c {
                '?' => out.push_str(&self.status_report()),
                '\n' => {
                    let line = std::mem::take(&mut self.line);
                    out.push_str(&self.execute_line(&line));
                }
                '\r' => {}
                c => self.line.push(c),
            }
        }
        out
    }

    fn receive_byte(&mut self, byte: u8) -> String {
        match byte {
            JOG_CANCEL => {
                self.realtime.push(byte);
                self.state = SimState::Idle;
                self.jog_polls_left = 0;
                String::new()
            }
            SOFT_RESET => {
                self.realtime.push(byte);
                self.state = SimState::Idle;
                self.line.clear();
                "Grbl 1.1h ['$' for help]\n".to_string()
            }
            b'?' => self.status_report(),
            b'\n' => self.receive_text("\n"),
            other => {
                self.realtime.push(other);
                String::new()
            }
        }
    }
}

fn word_value(text: &str, letter: char) -> Option<f64> {
    text.split_whitespace()
        .find_map(|word| word.strip_prefix(letter))
        .and_then(|value| value.parse().ok())
}

fn axis_words(text: &str) -> Vec<(usize, f64)> {
    text.split_whitespace()
        .filter_map(|word| {
            let mut chars = word.chars();
            let axis = match chars.next()? {
                'X' | 'x' => 0,
                'Y' | 'y' => 1,
                'Z' | 'z' => 2,
                _ => return None,
            };
            Some((axis, chars.as_str().parse().ok()?))
        })
        .collect()
}

/// Simulated GRBL device implementing [`Transport`]
pub struct SimulatedDevice {
    device: Mutex<Device>,
    slot: Arc<SubscriberSlot>,
    connected: AtomicBool,
    delayed: Option<Sender<String>>,
}

impl SimulatedDevice {
    /// An Idle device at the origin
    pub fn new() -> Self {
        Self {
            device: Mutex::new(Device {
                state: SimState::Idle,
                position: [0.0; 3],
                origin: [0.0; 3],
                feed: 0.0,
                jog_polls_left: 0,
                jog_polls: 2,
                line: String::new(),
                settings: SettingsTable::parse(DEFAULT_SETTINGS),
                responding: true,
                sent_lines: Vec::new(),
                realtime: Vec::new(),
                status_queries: 0,
            }),
            slot: Arc::new(SubscriberSlot::new()),
            connected: AtomicBool::new(true),
            delayed: None,
        }
    }

    /// Deliver each reply `latency` after the data that caused it.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        if latency.is_zero() {
            self.delayed = None;
            return self;
        }
        let (tx, rx) = mpsc::channel::<String>();
        let slot = self.slot.clone();
        // Exits once the device (and with it the sender) is dropped.
        let spawned = std::thread::Builder::new()
            .name("grbllink-sim-rx".to_string())
            .spawn(move || {
                for reply in rx {
                    std::thread::sleep(latency);
                    for byte in reply.bytes() {
                        slot.dispatch(byte);
                    }
                }
            });
        match spawned {
            Ok(_) => self.delayed = Some(tx),
            Err(e) => tracing::warn!("Simulator latency disabled: {}", e),
        }
        self
    }

    /// Status polls a jog move stays in the Jog state
    pub fn with_jog_polls(self, polls: u32) -> Self {
        self.device.lock().jog_polls = polls;
        self
    }

    /// Stop (or resume) answering; received data is still recorded.
    pub fn set_responding(&self, responding: bool) {
        self.device.lock().responding = responding;
    }

    /// Simulate losing (or regaining) the link
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Lines received so far, without terminators
    pub fn sent_lines(&self) -> Vec<String> {
        self.device.lock().sent_lines.clone()
    }

    /// Realtime bytes received so far
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.device.lock().realtime.clone()
    }

    /// Status reports produced so far
    pub fn status_queries(&self) -> usize {
        self.device.lock().status_queries
    }

    /// Machine position
    pub fn position(&self) -> (f64, f64, f64) {
        let [x, y, z] = self.device.lock().position;
        (x, y, z)
    }

    /// Whether the device is in the Jog state
    pub fn is_jogging(&self) -> bool {
        self.device.lock().state == SimState::Jog
    }

    /// Current value of a setting
    pub fn setting(&self, key: &str) -> Option<String> {
        self.device.lock().settings.get(key).map(str::to_string)
    }

    fn deliver(&self, reply: String) {
        if reply.is_empty() {
            return;
        }
        if let Some(delayed) = &self.delayed {
            if delayed.send(reply).is_err() {
                tracing::warn!("Simulator reply thread is gone");
            }
            return;
        }
        for byte in reply.bytes() {
            self.slot.dispatch(byte);
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDevice {
    fn name(&self) -> String {
        "simulator".to_string()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.check_connected()?;
        // Reply after the device lock is released; the handler may send again.
        let reply = {
            let mut device = self.device.lock();
            let reply = device.receive_text(text);
            if device.responding {
                reply
            } else {
                String::new()
            }
        };
        self.deliver(reply);
        Ok(())
    }

    fn send_byte(&self, byte: u8) -> Result<()> {
        self.check_connected()?;
        let reply = {
            let mut device = self.device.lock();
            let reply = device.receive_byte(byte);
            if device.responding {
                reply
            } else {
                String::new()
            }
        };
        self.deliver(reply);
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

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("position", &self.position())
            .field("jogging", &self.is_jogging())
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(device: &SimulatedDevice) -> (HandlerId, Arc<Mutex<Vec<u8>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let id = device
            .set_receive_handler("test", Arc::new(move |b| sink.lock().push(b)))
            .unwrap();
        (id, received)
    }

    fn text(received: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(received.lock().clone()).unwrap()
    }

    #[test]
    fn test_every_line_is_acknowledged() {
        let device = SimulatedDevice::new();
        let (_, received) = capture(&device);

        device.send_text("G21\nG90\n").unwrap();
        assert_eq!(text(&received), "ok\nok\n");
        assert_eq!(device.sent_lines(), vec!["G21", "G90"]);
    }

    #[test]
    fn test_jog_moves_and_reports_jog_state() {
        let device = SimulatedDevice::new().with_jog_polls(2);
        let (_, received) = capture(&device);

        device.send_text("$J=G91 G20 F75 Y-0.1 X+0.1\n").unwrap();
        assert_eq!(device.position(), (0.1, -0.1, 0.0));

        device.send_text("?").unwrap();
        device.send_text("?").unwrap();
        device.send_text("?").unwrap();
        let out = text(&received);
        let reports: Vec<&str> = out.lines().filter(|l| l.starts_with('<')).collect();
        assert!(reports[0].starts_with("<Jog|MPos:0.100,-0.100,0.000|FS:75"));
        assert!(reports[1].starts_with("<Jog"));
        assert!(reports[2].starts_with("<Idle"));
    }

    #[test]
    fn test_jog_cancel_stops_motion() {
        let device = SimulatedDevice::new().with_jog_polls(100);
        device.send_text("$J=G91 G20 F75 Z+0.1\n").unwrap();
        assert!(device.is_jogging());

        device.send_byte(JOG_CANCEL).unwrap();
        assert!(!device.is_jogging());
        assert_eq!(device.realtime_bytes(), vec![JOG_CANCEL]);
    }

    #[test]
    fn test_origin_and_return() {
        let device = SimulatedDevice::new();
        device.send_text("$J=G91 G20 F75 X+1 Y+2\n").unwrap();
        device.send_text("G92 X0 Y0 Z0\n").unwrap();
        device.send_text("$J=G91 G20 F75 X+0.5\n").unwrap();
        device.send_text("G00 X0 Y0 Z0\n").unwrap();
        assert_eq!(device.position(), (1.0, 2.0, 0.0));
    }

    #[test]
    fn test_setting_update() {
        let device = SimulatedDevice::new();
        device.send_text("$110=600.000\n").unwrap();
        assert_eq!(device.setting("$110").as_deref(), Some("600.000"));
    }

    #[test]
    fn test_silent_and_disconnected() {
        let device = SimulatedDevice::new();
        let (_, received) = capture(&device);

        device.set_responding(false);
        device.send_text("G0 X1\n").unwrap();
        assert!(received.lock().is_empty());

        device.set_connected(false);
        assert!(device.send_text("G0 X1\n").is_err());
    }

    #[test]
    fn test_latency_delivers_in_order() {
        let device = SimulatedDevice::new().with_latency(Duration::from_millis(5));
        let (_, received) = capture(&device);

        device.send_text("G21\n?").unwrap();
        assert!(received.lock().is_empty());

        std::thread::sleep(Duration::from_millis(100));
        let out = text(&received);
        assert!(out.starts_with("ok\n<Idle|"));
    }
}
