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

//! Splitting an image into 128-byte blocks and framing them for the wire

use std::iter::FusedIterator;
use crate::checksum::{Checksum, ChecksumMode};
use crate::protocol::{BLOCK_SIZE, SOH, SUB};

pub type Block = [u8; BLOCK_SIZE];

// ============================================================================
// Packetizer
// ============================================================================

/// Iterator over the 128-byte blocks of a buffer.
///
/// The final short block is padded with SUB. An empty buffer still yields a
/// single all-SUB block, since every transfer sends at least one packet.
/// A clone taken before iterating replays the same blocks.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    remaining: &'a [u8],
    done: bool,
}

pub fn blocks(data: &[u8]) -> Blocks<'_> {
    Blocks { remaining: data, done: false }
}

/// Number of blocks `blocks(data)` yields for a buffer of `len` bytes
pub fn block_count(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE).max(1)
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.done {
            return None;
        }

        let take = self.remaining.len().min(BLOCK_SIZE);
        let mut block = [SUB; BLOCK_SIZE];
        block[..take].copy_from_slice(&self.remaining[..take]);
        self.remaining = &self.remaining[take..];

        if self.remaining.is_empty() {
            self.done = true;
        }
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.done { 0 } else { block_count(self.remaining.len()) };
        (n, Some(n))
    }
}

impl ExactSizeIterator for Blocks<'_> {}

impl FusedIterator for Blocks<'_> {}

// ============================================================================
// Packet
// ============================================================================

/// One framed data packet, ready to transmit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sequence: u8,
    payload: Block,
    checksum: Checksum,
}

impl Packet {
    pub fn new(sequence: u8, payload: Block, mode: ChecksumMode) -> Self {
        debug_assert!(sequence != 0, "sequence 0 is never used for data packets");
        Packet {
            sequence,
            payload,
            checksum: mode.compute(&payload),
        }
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// `[SOH][seq][255-seq][payload][checksum]`
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(3 + BLOCK_SIZE + self.checksum.mode().width());
        frame.push(SOH);
        frame.push(self.sequence);
        frame.push(255 - self.sequence);
        frame.extend_from_slice(&self.payload);
        self.checksum.write_to(&mut frame);
        frame
    }

    /// Multi-line hex dump of the frame for trace output
    pub fn dump(&self) -> String {
        let mut out = format!("[SOH, n={}, ~n={},", self.sequence, 255 - self.sequence);
        for row in self.payload.chunks(16) {
            out.push_str("\n  ");
            let hex: Vec<String> = row.iter().map(|b| format!("{:02x}", b)).collect();
            out.push_str(&hex.join(" "));
        }
        out.push_str(&format!("\n  chksum={}]", self.checksum));
        out
    }
}

/// Next sequence number after `sequence`: 1..=255, wrapping 255 -> 1
pub fn next_sequence(sequence: u8) -> u8 {
    if sequence == u8::MAX { 1 } else { sequence + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{algebraic, crc16};

    fn collect(data: &[u8]) -> Vec<Block> {
        blocks(data).collect()
    }

    #[test]
    fn test_empty_input_yields_one_padding_block() {
        let out = collect(&[]);
        assert_eq!(out.len(), 1);
        assert!(out[0].iter().all(|&b| b == SUB));
        assert_eq!(block_count(0), 1);
    }

    #[test]
    fn test_block_counts() {
        for n in [1usize, 127, 128, 129, 255, 256, 257, 300, 1024, 1025] {
            let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            let out = collect(&data);
            assert_eq!(out.len(), n.div_ceil(128), "length {}", n);
            assert_eq!(out.len(), block_count(n));
            assert_eq!(blocks(&data).len(), out.len());
        }
    }

    #[test]
    fn test_padding_only_in_last_block() {
        let data: Vec<u8> = (0..300).map(|i| (i % 7) as u8).collect();
        let out = collect(&data);

        assert_eq!(&out[0][..], &data[..128]);
        assert_eq!(&out[1][..], &data[128..256]);
        assert_eq!(&out[2][..44], &data[256..]);
        assert!(out[2][44..].iter().all(|&b| b == SUB));
    }

    #[test]
    fn test_exact_multiple_has_no_padding_block() {
        let data = vec![0x55u8; 256];
        let out = collect(&data);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.iter().all(|&x| x == 0x55)));
    }

    #[test]
    fn test_blocks_restartable() {
        let data = b"restartable sequence";
        let first: Vec<Block> = blocks(data).collect();
        let second: Vec<Block> = blocks(data).collect();
        assert_eq!(first, second);

        let mut it = blocks(data);
        assert!(it.next().is_some());
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn test_frame_layout_crc() {
        let mut payload = [SUB; BLOCK_SIZE];
        payload[..5].copy_from_slice(b"hello");
        let packet = Packet::new(3, payload, ChecksumMode::Crc16);
        let frame = packet.to_frame();

        assert_eq!(frame.len(), 133);
        assert_eq!(&frame[..3], &[SOH, 3, 252]);
        assert_eq!(&frame[3..131], &payload[..]);
        assert_eq!(&frame[131..], &crc16(&payload).to_be_bytes());
    }

    #[test]
    fn test_frame_layout_algebraic() {
        let payload = [0x42u8; BLOCK_SIZE];
        let packet = Packet::new(255, payload, ChecksumMode::Algebraic);
        let frame = packet.to_frame();

        assert_eq!(frame.len(), 132);
        assert_eq!(&frame[..3], &[SOH, 255, 0]);
        assert_eq!(frame[131], algebraic(&payload));
    }

    #[test]
    fn test_next_sequence_wraps_past_zero() {
        assert_eq!(next_sequence(1), 2);
        assert_eq!(next_sequence(254), 255);
        assert_eq!(next_sequence(255), 1);

        let mut seq = 1u8;
        for _ in 0..255 {
            seq = next_sequence(seq);
            assert_ne!(seq, 0);
        }
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_dump_contains_header_and_checksum() {
        let packet = Packet::new(7, [0u8; BLOCK_SIZE], ChecksumMode::Crc16);
        let dump = packet.dump();
        assert!(dump.starts_with("[SOH, n=7, ~n=248,"));
        assert!(dump.ends_with("chksum=0x0000]"));
        assert_eq!(dump.lines().count(), 10);
    }
}
