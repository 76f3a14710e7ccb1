// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::time::Duration;
use log::info;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte-level link operations needed by the transfer session.
///
/// The link is closed when the value is dropped.
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Blocks for at most `timeout`. A timeout surfaces as
    /// `io::ErrorKind::TimedOut`.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Bytes already received and waiting to be read
    fn bytes_pending(&mut self) -> std::io::Result<usize>;
}

/// Reads and throws away whatever is currently buffered on the link.
/// Returns the number of bytes discarded.
pub fn drain(port: &mut dyn SerialPort) -> std::io::Result<usize> {
    let mut discarded = 0;
    let mut buf = [0u8; 64];
    loop {
        let pending = port.bytes_pending()?;
        if pending == 0 {
            return Ok(discarded);
        }
        let want = pending.min(buf.len());
        match port.read_timeout(&mut buf[..want], Duration::ZERO) {
            Ok(0) => return Ok(discarded),
            Ok(n) => discarded += n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(discarded),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
    name: String,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        info!("Opened serial port '{}' at {} baud", port_name, baud_rate);
        Ok(RealSerialPort { port, name: port_name.to_string() })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        // serialport rejects a zero timeout on some platforms
        let timeout = timeout.max(Duration::from_millis(1));
        self.port.set_timeout(timeout)
            .map_err(std::io::Error::other)?;
        self.port.read(buf)
    }

    fn bytes_pending(&mut self) -> std::io::Result<usize> {
        let pending = self.port.bytes_to_read()
            .map_err(std::io::Error::other)?;
        Ok(pending as usize)
    }
}

impl Drop for RealSerialPort {
    fn drop(&mut self) {
        info!("Serial port '{}' closed", self.name);
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Bytes that arrive right behind a reply: (reply index, bytes)
    stray_after: Vec<(usize, Vec<u8>)>,
    // Stray bytes currently buffered
    pending: std::collections::VecDeque<u8>,
    // Timeout passed to each read, in order
    timeouts: std::sync::Arc<std::sync::Mutex<Vec<Duration>>>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            stray_after: Vec::new(),
            pending: Default::default(),
            timeouts: Default::default(),
        }
    }

    /// Queues `bytes` as buffered line noise once reply `index` has been read
    pub fn with_stray_after(mut self, index: usize, bytes: &[u8]) -> Self {
        self.stray_after.push((index, bytes.to_vec()));
        self
    }

    /// Shared log of read timeouts, readable after the mock is moved away
    pub fn timeout_log(&self) -> std::sync::Arc<std::sync::Mutex<Vec<Duration>>> {
        self.timeouts.clone()
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.timeouts.lock().unwrap().push(timeout);

        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap();
            }
            return Ok(n);
        }

        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    let index = self.read_pos;
                    self.read_pos += 1;
                    if let Some(pos) = self.stray_after.iter().position(|(i, _)| *i == index) {
                        let (_, bytes) = self.stray_after.remove(pos);
                        self.pending.extend(bytes);
                        break;
                    }
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }

    fn bytes_pending(&mut self) -> std::io::Result<usize> {
        Ok(self.pending.len())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert!(
            self.pending.is_empty() && self.stray_after.is_empty(),
            "MockSerialPort dropped with undrained stray bytes"
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
