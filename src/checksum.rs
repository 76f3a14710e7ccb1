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

//! Packet error detection: 8-bit algebraic sum or CRC-16/XMODEM

use std::fmt;

const CRC16_POLY: u16 = 0x1021;

/// CRC-16/XMODEM lookup table, built at compile time
static CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Modulo-256 sum of every byte
pub fn algebraic(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM: poly 0x1021, init 0, MSB first, no reflection
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &b| {
        (crc << 8) ^ CRC16_TABLE[usize::from((crc >> 8) as u8 ^ b)]
    })
}

/// Error detection scheme picked by the receiver during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    Algebraic,
    Crc16,
}

impl ChecksumMode {
    /// Bytes the checksum occupies on the wire
    pub fn width(self) -> usize {
        match self {
            ChecksumMode::Algebraic => 1,
            ChecksumMode::Crc16 => 2,
        }
    }

    pub fn compute(self, payload: &[u8]) -> Checksum {
        match self {
            ChecksumMode::Algebraic => Checksum::Algebraic(algebraic(payload)),
            ChecksumMode::Crc16 => Checksum::Crc16(crc16(payload)),
        }
    }
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumMode::Algebraic => write!(f, "algebraic"),
            ChecksumMode::Crc16 => write!(f, "CRC-16"),
        }
    }
}

/// A computed checksum, carrying its own width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    Algebraic(u8),
    Crc16(u16),
}

impl Checksum {
    pub fn mode(&self) -> ChecksumMode {
        match self {
            Checksum::Algebraic(_) => ChecksumMode::Algebraic,
            Checksum::Crc16(_) => ChecksumMode::Crc16,
        }
    }

    /// Appends the checksum in wire order (big-endian for CRC-16)
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match *self {
            Checksum::Algebraic(sum) => out.push(sum),
            Checksum::Crc16(crc) => out.extend_from_slice(&crc.to_be_bytes()),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Algebraic(sum) => write!(f, "0x{:02X}", sum),
            Checksum::Crc16(crc) => write!(f, "0x{:04X}", crc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BLOCK_SIZE, SUB};

    #[test]
    fn test_crc16_table_entries() {
        assert_eq!(CRC16_TABLE[0], 0x0000);
        assert_eq!(CRC16_TABLE[1], 0x1021);
        assert_eq!(CRC16_TABLE[2], 0x2042);
        assert_eq!(CRC16_TABLE[16], 0x1231);
        assert_eq!(CRC16_TABLE[128], 0x9188);
        assert_eq!(CRC16_TABLE[255], 0x1EF0);
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[]), 0x0000);
    }

    #[test]
    fn test_crc16_padding_block_golden() {
        let block = [SUB; BLOCK_SIZE];
        assert_eq!(crc16(&block), 0xF8B0);
        assert_eq!(crc16(&[0u8; BLOCK_SIZE]), 0x0000);
    }

    #[test]
    fn test_algebraic_sum() {
        assert_eq!(algebraic(&[1, 2, 3]), 6);
        assert_eq!(algebraic(&[0xFF, 0x02]), 0x01);
        assert_eq!(algebraic(&[SUB; BLOCK_SIZE]), 0x00);

        let mut block = b"Hello, XMODEM!".to_vec();
        block.resize(BLOCK_SIZE, SUB);
        assert_eq!(algebraic(&block), 191);
    }

    #[test]
    fn test_algebraic_order_independent() {
        let block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 37 % 256) as u8).collect();
        let mut reversed = block.clone();
        reversed.reverse();
        let mut rotated = block.clone();
        rotated.rotate_left(45);

        assert_eq!(algebraic(&block), algebraic(&reversed));
        assert_eq!(algebraic(&block), algebraic(&rotated));
    }

    #[test]
    fn test_checksum_wire_bytes() {
        let mut out = Vec::new();
        Checksum::Crc16(0xAA0D).write_to(&mut out);
        Checksum::Algebraic(0xBF).write_to(&mut out);
        assert_eq!(out, vec![0xAA, 0x0D, 0xBF]);
    }

    #[test]
    fn test_mode_width_matches_checksum() {
        for mode in [ChecksumMode::Algebraic, ChecksumMode::Crc16] {
            let checksum = mode.compute(&[SUB; BLOCK_SIZE]);
            let mut out = Vec::new();
            checksum.write_to(&mut out);
            assert_eq!(out.len(), mode.width());
            assert_eq!(checksum.mode(), mode);
        }
    }
}
