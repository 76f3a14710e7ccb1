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

//! Session timing and retry settings

use std::time::Duration;
use clap::ValueEnum;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest handshake window a session will wait, whatever it is configured with
pub const MAX_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_LIMIT: u32 = 10;
pub const DEFAULT_EOT_RETRY_LIMIT: u32 = 10;

/// Timing and retry settings handed to a transfer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Window for the receiver's NAK/'C' start byte
    pub handshake_timeout: Duration,
    /// Wait for each packet reply and each EOT reply
    pub reply_timeout: Duration,
    /// Pause after every byte of a frame, for receivers that can't keep up
    pub byte_delay: Duration,
    /// Maximum transmissions of one packet before giving up
    pub retry_limit: u32,
    /// Maximum EOT transmissions before giving up
    pub eot_retry_limit: u32,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            byte_delay: Duration::ZERO,
            retry_limit: DEFAULT_RETRY_LIMIT,
            eot_retry_limit: DEFAULT_EOT_RETRY_LIMIT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_byte_delay(mut self, delay: Duration) -> Self {
        self.byte_delay = delay;
        self
    }

    /// Zero is treated as one: a packet is always sent at least once.
    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    pub fn with_eot_retry_limit(mut self, limit: u32) -> Self {
        self.eot_retry_limit = limit.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What sits on the other end of the link, which decides the
/// default inter-byte delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Target {
    /// Real hardware, no delay
    Fpga,
    /// RTL simulation
    Sim,
    /// RTL simulation with waveform tracing enabled
    SimTrace,
}

impl Target {
    pub fn byte_delay(self) -> Duration {
        match self {
            Target::Fpga => Duration::ZERO,
            Target::Sim => Duration::from_millis(5),
            Target::SimTrace => Duration::from_millis(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.reply_timeout, Duration::from_secs(2));
        assert_eq!(config.byte_delay, Duration::ZERO);
        assert_eq!(config.retry_limit, 10);
        assert_eq!(config.eot_retry_limit, 10);
    }

    #[test]
    fn test_builder_setters() {
        let config = SessionConfig::new()
            .with_handshake_timeout(Duration::from_secs(30))
            .with_reply_timeout(Duration::from_millis(500))
            .with_byte_delay(Target::Sim.byte_delay())
            .with_retry_limit(5)
            .with_eot_retry_limit(0);

        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
        assert_eq!(config.reply_timeout, Duration::from_millis(500));
        assert_eq!(config.byte_delay, Duration::from_millis(5));
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.eot_retry_limit, 1);
    }

    #[test]
    fn test_target_delays() {
        assert_eq!(Target::Fpga.byte_delay(), Duration::ZERO);
        assert_eq!(Target::SimTrace.byte_delay(), Duration::from_millis(200));
    }
}
