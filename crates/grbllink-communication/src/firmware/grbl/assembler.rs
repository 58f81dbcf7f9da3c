//! Response line assembly
//!
//! Bytes accumulate until a newline; the buffer (minus one trailing carriage
//! return) is then emitted as a completed line and reset. Any byte sequence
//! is accepted.

/// Byte-to-line state machine
#[derive(Debug, Default, Clone)]
pub struct ResponseAssembler {
    buffer: Vec<u8>,
}

impl ResponseAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns the completed line when `byte` is a newline.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte != b'\n' {
            self.buffer.push(byte);
            return None;
        }

        let mut raw = std::mem::take(&mut self.buffer);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Feed a slice; returns every line it completes, in order.
    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Bytes received since the last completed line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard a partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
