//! Serial port transport
//!
//! Opens a port through the `serialport` crate and runs a dedicated reader
//! thread that hands every received byte to the transport's receive slot.
//! Writes happen on the caller's thread under a mutex.

use super::{ConnectionParams, HandlerId, ReceiveHandler, SerialParity, SubscriberSlot, Transport};
use grbllink_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A port offered by `list_ports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Path or name to open
    pub port_name: String,
    /// What the OS says is behind it
    pub description: String,
}

/// Name prefixes of the devices GRBL boards show up as.
///
/// USB-serial bridges and CDC-ACM boards on Linux and macOS, plus the pty
/// the grblHAL simulator creates. Windows `COMn` names are matched apart.
const CNC_PORT_PREFIXES: &[&str] = &[
    "/dev/ttyUSB",
    "/dev/ttyACM",
    "/dev/ttyGRBL",
    "/dev/cu.usbserial-",
    "/dev/cu.usbmodem",
];

/// Enumerate serial ports that could be a GRBL controller.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Port enumeration failed: {}", e);
        ConnectionError::SerialError {
            reason: format!("failed to enumerate ports: {}", e),
        }
    })?;

    Ok(ports
        .into_iter()
        .filter(|port| is_valid_cnc_port(&port.port_name))
        .map(|port| SerialPortInfo {
            description: describe_port(&port.port_type),
            port_name: port.port_name,
        })
        .collect())
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit());
    }
    CNC_PORT_PREFIXES
        .iter()
        .any(|prefix| port_name.starts_with(prefix))
}

fn describe_port(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let name = usb.product.as_deref().or(usb.manufacturer.as_deref());
            match name {
                Some(name) => format!("{} (USB {:04x}:{:04x})", name, usb.vid, usb.pid),
                None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
            }
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::Unknown => "serial".to_string(),
    }
}

/// Convert a parity setting to serialport format
fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("invalid data bits: {}", bits),
        }
        .into()),
    }
}

fn stop_bits(bits: u8) -> Result<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        _ => Err(ConnectionError::InvalidParameters {
            reason: format!("invalid stop bits: {}", bits),
        }
        .into()),
    }
}

struct Shared {
    slot: SubscriberSlot,
    connected: AtomicBool,
    stop: AtomicBool,
}

/// Serial transport backed by a native port and a reader thread
pub struct SerialTransport {
    name: String,
    writer: Mutex<Box<dyn serialport::SerialPort>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    /// Open the port described by `params` and start the reader thread.
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        params.validate()?;

        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms.max(1)))
            .data_bits(data_bits(params.data_bits)?)
            .stop_bits(stop_bits(params.stop_bits)?)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            });

        let port = builder.open().map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            match e.kind {
                serialport::ErrorKind::NoDevice => ConnectionError::PortNotFound {
                    port: params.port.clone(),
                },
                _ => ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                },
            }
        })?;

        let reader_port = port.try_clone().map_err(|e| ConnectionError::FailedToOpen {
            port: params.port.clone(),
            reason: format!("cannot clone port for reading: {}", e),
        })?;

        let shared = Arc::new(Shared {
            slot: SubscriberSlot::new(),
            connected: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });

        let reader = std::thread::Builder::new()
            .name("grbllink-serial-rx".to_string())
            .spawn({
                let shared = shared.clone();
                let name = params.port.clone();
                move || reader_loop(reader_port, shared, name)
            })?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);

        Ok(Self {
            name: params.port.clone(),
            writer: Mutex::new(port),
            shared,
            reader: Mutex::new(Some(reader)),
        })
    }

    fn write_all(&self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        let mut port = self.writer.lock();
        let result = port.write_all(data).and_then(|_| port.flush());
        if let Err(e) = result {
            self.shared.connected.store(false, Ordering::SeqCst);
            tracing::error!("Write to {} failed: {}", self.name, e);
            return Err(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn reader_loop(mut port: Box<dyn serialport::SerialPort>, shared: Arc<Shared>, name: String) {
    let mut buf = [0u8; 256];
    while !shared.stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for &byte in &buf[..n] {
                    shared.slot.dispatch(byte);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!("Read from {} failed: {}", name, e);
                shared.connected.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    tracing::debug!("Reader thread for {} exiting", name);
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.write_all(text.as_bytes())
    }

    fn send_byte(&self, byte: u8) -> Result<()> {
        self.write_all(&[byte])
    }

    fn set_receive_handler(&self, label: &str, handler: ReceiveHandler) -> Result<HandlerId> {
        self.shared.slot.register(label, handler)
    }

    fn clear_receive_handler(&self, id: HandlerId) {
        self.shared.slot.clear(id);
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("Reader thread for {} panicked", self.name);
            }
        }
        tracing::info!("Closed {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cnc_port_patterns() {
        assert!(is_valid_cnc_port("COM3"));
        assert!(is_valid_cnc_port("/dev/ttyUSB0"));
        assert!(is_valid_cnc_port("/dev/ttyACM1"));
        assert!(is_valid_cnc_port("/dev/cu.usbmodem14101"));
        assert!(is_valid_cnc_port("/dev/ttyGRBL"));
        assert!(!is_valid_cnc_port("/dev/ttyS0"));
        assert!(!is_valid_cnc_port("COMX"));
        assert!(!is_valid_cnc_port("COM"));
    }

    #[test]
    fn test_port_descriptions() {
        use serialport::SerialPortType;
        assert_eq!(describe_port(&SerialPortType::PciPort), "PCI");
        assert_eq!(describe_port(&SerialPortType::BluetoothPort), "Bluetooth");
        assert_eq!(describe_port(&SerialPortType::Unknown), "serial");
    }

    #[test]
    fn test_bits_conversion() {
        assert!(data_bits(8).is_ok());
        assert!(data_bits(4).is_err());
        assert!(stop_bits(2).is_ok());
        assert!(stop_bits(3).is_err());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let params = ConnectionParams::serial("/dev/ttyUSB-grbllink-missing", 115_200);
        assert!(SerialTransport::open(&params).is_err());
    }
}
