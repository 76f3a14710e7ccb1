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

//! Transfer progress notifications

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

/// How the receiver answered the last packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    /// NAK, a stray byte, or no reply at all
    Nak,
    Cancelled,
}

/// Emitted after every packet round-trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub packets_total: usize,
    pub packets_sent: usize,
    pub last_outcome: Outcome,
}

pub trait ProgressReporter: Send {
    fn report(&mut self, event: &ProgressEvent);

    /// Called once the EOT has been acknowledged
    fn finish(&mut self) {}
}

/// Discards every event
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&mut self, _event: &ProgressEvent) {}
}

/// Writes one log line per packet outcome
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&mut self, event: &ProgressEvent) {
        match event.last_outcome {
            Outcome::Ack => info!("Sent packet {}/{}", event.packets_sent, event.packets_total),
            Outcome::Nak => warn!(
                "Packet {}/{} failed to send",
                event.packets_sent + 1,
                event.packets_total
            ),
            Outcome::Cancelled => warn!(
                "Transfer cancelled after {}/{} packets",
                event.packets_sent,
                event.packets_total
            ),
        }
    }
}

/// Console progress bar
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(packets_total: usize) -> Self {
        let bar = ProgressBar::new(packets_total as u64);
        let style = ProgressStyle::with_template("sending: [{bar:20}] {percent:>3}% ({pos}/{len}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#-");
        bar.set_style(style);
        BarReporter { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn report(&mut self, event: &ProgressEvent) {
        self.bar.set_position(event.packets_sent as u64);
        match event.last_outcome {
            Outcome::Ack => self.bar.set_message(""),
            Outcome::Nak => self.bar.set_message("retrying"),
            Outcome::Cancelled => self.bar.abandon_with_message("cancelled"),
        }
    }

    fn finish(&mut self) {
        self.bar.finish_with_message("done");
    }
}

impl Drop for BarReporter {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}
