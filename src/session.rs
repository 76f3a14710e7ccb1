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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use crate::checksum::ChecksumMode;
use crate::config::{MAX_HANDSHAKE_TIMEOUT, SessionConfig};
use crate::packet::{self, Block, Packet};
use crate::progress::{NullReporter, Outcome, ProgressEvent, ProgressReporter};
use crate::protocol::*;
use crate::serial::{self, SerialPort};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("receiver did not request a transfer (no NAK or 'C' within the handshake window)")]
    HandshakeTimeout,

    #[error("packet {sequence} was rejected {attempts} times in a row")]
    TooManyRetries { sequence: u8, attempts: u32 },

    #[error("receiver cancelled the transfer")]
    ReceiverCancelled,

    #[error("receiver did not acknowledge EOT after {attempts} attempts")]
    EotNotAcknowledged { attempts: u32 },

    #[error("link error: {0}")]
    Link(#[from] std::io::Error),

    #[error("transfer interrupted")]
    Interrupted,
}

impl TransferError {
    /// Process exit status reported for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::Link(_) => 2,
            TransferError::HandshakeTimeout => 3,
            TransferError::ReceiverCancelled => 4,
            TransferError::TooManyRetries { .. } => 5,
            TransferError::EotNotAcknowledged { .. } => 6,
            TransferError::Interrupted => 130,
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Idle;

pub struct AwaitingHandshake {
    deadline: Instant,
}

pub struct Transferring {
    mode: ChecksumMode,
}

pub struct Finishing {
    mode: ChecksumMode,
    attempts: u32,
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingHandshake,
    Transferring,
    Finishing,
    Closed,
    Aborted,
}

/// Summary of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub packets_sent: usize,
    pub retransmissions: usize,
    pub mode: ChecksumMode,
    pub eot_attempts: u32,
}

// ============================================================================
// FSM Structure
// ============================================================================

/// One file transfer over an exclusively owned link.
///
/// `cursor` counts acknowledged packets; `sequence_counter` is the on-wire
/// number, which wraps 255 -> 1. The two are never derived from each other.
pub struct TransferSession<State> {
    state: State,
    link: Box<dyn SerialPort>,
    image: Vec<u8>,
    packets: Vec<Block>,
    cursor: usize,
    sequence_counter: u8,
    consecutive_failures: u32,
    retransmissions: usize,
    config: SessionConfig,
    reporter: Box<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

pub enum Step {
    Continue(Box<dyn SessionStep>),
    Closed(TransferReport),
}

// ============================================================================
// Trait
// ============================================================================

/// Advances a session by one protocol exchange.
///
/// Returning an error means the session is aborted; the link has already
/// been released by then.
pub trait SessionStep: Send {
    fn state(&self) -> SessionState;

    fn step(self: Box<Self>) -> Result<Step, TransferError>;
}

// ============================================================================
// Shared helpers
// ============================================================================

impl<S> TransferSession<S> {
    fn transition<T>(self, state: T) -> Box<TransferSession<T>> {
        Box::new(TransferSession {
            state,
            link: self.link,
            image: self.image,
            packets: self.packets,
            cursor: self.cursor,
            sequence_counter: self.sequence_counter,
            consecutive_failures: self.consecutive_failures,
            retransmissions: self.retransmissions,
            config: self.config,
            reporter: self.reporter,
            cancel: self.cancel,
        })
    }

    fn io_error(&self, e: std::io::Error) -> TransferError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        TransferError::Link(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn interrupted(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.link.write_all(bytes).map_err(|e| self.io_error(e))
    }

    /// Sends a frame, pausing after each byte when a delay is configured
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransferError> {
        if self.config.byte_delay.is_zero() {
            return self.write(frame);
        }
        for &byte in frame {
            self.write(&[byte])?;
            std::thread::sleep(self.config.byte_delay);
        }
        Ok(())
    }

    /// One reply byte, or `None` if nothing arrived in time
    fn read_reply(&mut self, timeout: Duration) -> Result<Option<u8>, TransferError> {
        let mut buf = [0u8; 1];
        match self.link.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => {
                debug!("Received: {}", control_name(buf[0]));
                Ok(Some(buf[0]))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                debug!("No reply within {:?}", timeout);
                Ok(None)
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn drain_link(&mut self) -> Result<(), TransferError> {
        let discarded = serial::drain(self.link.as_mut()).map_err(|e| self.io_error(e))?;
        if discarded > 0 {
            debug!("Discarded {} stray bytes", discarded);
        }
        Ok(())
    }

    fn report(&mut self, last_outcome: Outcome) {
        let event = ProgressEvent {
            packets_total: self.packets.len(),
            packets_sent: self.cursor,
            last_outcome,
        };
        self.reporter.report(&event);
    }

    /// Tells the receiver to stop, then gives up the session
    fn cancel_transfer(mut self) -> TransferError {
        warn!("Interrupted, sending CAN");
        if let Err(e) = self.write(&[CAN]) {
            warn!("Could not send CAN: {}", e);
        }
        TransferError::Interrupted
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SessionStep for TransferSession<Idle> {
    fn state(&self) -> SessionState {
        SessionState::Idle
    }

    fn step(self: Box<Self>) -> Result<Step, TransferError> {
        Ok(Step::Continue(self.start()))
    }
}

impl SessionStep for TransferSession<AwaitingHandshake> {
    fn state(&self) -> SessionState {
        SessionState::AwaitingHandshake
    }

    fn step(self: Box<Self>) -> Result<Step, TransferError> {
        let mut fsm = *self;
        if fsm.interrupted() {
            return Err(TransferError::Interrupted);
        }

        let remaining = fsm.state.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            error!("Timeout, did not receive NAK or 'C'");
            return Err(TransferError::HandshakeTimeout);
        }

        let mut buf = [0u8; 1];
        match fsm.link.read_timeout(&mut buf, remaining) {
            Ok(0) => Ok(Step::Continue(Box::new(fsm))),
            Ok(_) if buf[0] == NAK => fsm.begin_transfer(ChecksumMode::Algebraic),
            Ok(_) if buf[0] == CRC_REQUEST => fsm.begin_transfer(ChecksumMode::Crc16),
            Ok(_) => {
                debug!("Ignoring {} while waiting for receiver", control_name(buf[0]));
                Ok(Step::Continue(Box::new(fsm)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                error!("Timeout, did not receive NAK or 'C'");
                Err(TransferError::HandshakeTimeout)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl TransferSession<AwaitingHandshake> {
    fn begin_transfer(mut self, mode: ChecksumMode) -> Result<Step, TransferError> {
        // receivers keep repeating the start byte until the first packet lands
        self.drain_link()?;
        info!("Starting transfer [checksum type: {}]", mode);
        let next = self.transition(Transferring { mode });
        Ok(Step::Continue(next))
    }
}

impl SessionStep for TransferSession<Transferring> {
    fn state(&self) -> SessionState {
        SessionState::Transferring
    }

    fn step(self: Box<Self>) -> Result<Step, TransferError> {
        let mut fsm = *self;
        if fsm.interrupted() {
            return Err(fsm.cancel_transfer());
        }

        let mode = fsm.state.mode;
        let packet = Packet::new(fsm.sequence_counter, fsm.packets[fsm.cursor], mode);
        trace!("{}", packet.dump());
        fsm.send_frame(&packet.to_frame())?;
        debug!(
            "Sent: packet {}/{} (seq {})",
            fsm.cursor + 1,
            fsm.packets.len(),
            packet.sequence()
        );

        let reply = fsm.read_reply(fsm.config.reply_timeout)?;
        match reply {
            Some(ACK) => {
                fsm.cursor += 1;
                fsm.sequence_counter = packet::next_sequence(fsm.sequence_counter);
                fsm.consecutive_failures = 0;
                fsm.report(Outcome::Ack);
                fsm.drain_link()?;

                if fsm.cursor == fsm.packets.len() {
                    info!("Finished transfer!");
                    let next = fsm.transition(Finishing { mode, attempts: 0 });
                    Ok(Step::Continue(next))
                } else {
                    Ok(Step::Continue(Box::new(fsm)))
                }
            }
            Some(CAN) => {
                fsm.report(Outcome::Cancelled);
                error!("Received CAN, aborting");
                Err(TransferError::ReceiverCancelled)
            }
            other => {
                fsm.consecutive_failures += 1;
                fsm.report(Outcome::Nak);
                if other.is_some_and(|b| b != NAK) {
                    debug!("Unexpected reply treated as NAK");
                }

                if fsm.consecutive_failures >= fsm.config.retry_limit {
                    error!("Failed to send packet {} too many times", packet.sequence());
                    return Err(TransferError::TooManyRetries {
                        sequence: packet.sequence(),
                        attempts: fsm.consecutive_failures,
                    });
                }

                fsm.retransmissions += 1;
                fsm.drain_link()?;
                Ok(Step::Continue(Box::new(fsm)))
            }
        }
    }
}

impl SessionStep for TransferSession<Finishing> {
    fn state(&self) -> SessionState {
        SessionState::Finishing
    }

    fn step(self: Box<Self>) -> Result<Step, TransferError> {
        let mut fsm = *self;
        if fsm.interrupted() {
            return Err(fsm.cancel_transfer());
        }

        if fsm.state.attempts >= fsm.config.eot_retry_limit {
            error!("EOT was never acknowledged");
            return Err(TransferError::EotNotAcknowledged { attempts: fsm.state.attempts });
        }

        fsm.write(&[EOT])?;
        fsm.state.attempts += 1;
        debug!("Sent: EOT");

        match fsm.read_reply(fsm.config.reply_timeout)? {
            Some(ACK) => {
                fsm.reporter.finish();
                Ok(Step::Closed(TransferReport {
                    packets_sent: fsm.cursor,
                    retransmissions: fsm.retransmissions,
                    mode: fsm.state.mode,
                    eot_attempts: fsm.state.attempts,
                }))
            }
            Some(CAN) => {
                error!("Received CAN after EOT");
                Err(TransferError::ReceiverCancelled)
            }
            _ => {
                warn!("EOT not acknowledged, resending");
                fsm.drain_link()?;
                Ok(Step::Continue(Box::new(fsm)))
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl TransferSession<Idle> {
    pub fn new(link: Box<dyn SerialPort>, image: Vec<u8>, config: SessionConfig) -> Self {
        TransferSession {
            state: Idle,
            link,
            image,
            packets: Vec::new(),
            cursor: 0,
            sequence_counter: 1,
            consecutive_failures: 0,
            retransmissions: 0,
            config,
            reporter: Box::new(NullReporter),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Once `cancel` is set the session stops after the current exchange
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Splits the image into packets and starts the handshake clock
    pub fn start(mut self) -> Box<TransferSession<AwaitingHandshake>> {
        let image = std::mem::take(&mut self.image);
        self.packets = packet::blocks(&image).collect();
        info!("size:    {} bytes", image.len());
        info!("packets: {}", self.packets.len());
        info!("Waiting for receiver ping...");

        let window = self.config.handshake_timeout.min(MAX_HANDSHAKE_TIMEOUT);
        let now = Instant::now();
        let deadline = now.checked_add(window).unwrap_or(now);
        self.transition(AwaitingHandshake { deadline })
    }
}

/// Drives a session until it closes or aborts
pub fn run(mut session: Box<dyn SessionStep>) -> Result<TransferReport, TransferError> {
    loop {
        let from = session.state();
        match session.step() {
            Ok(Step::Continue(next)) => {
                if next.state() != from {
                    debug!("{:?} -> {:?}", from, next.state());
                }
                session = next;
            }
            Ok(Step::Closed(report)) => {
                debug!("{:?} -> {:?}", from, SessionState::Closed);
                return Ok(report);
            }
            Err(e) => {
                debug!("{:?} -> {:?}: {}", from, SessionState::Aborted, e);
                return Err(e);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
