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

//! XMODEM protocol constants

use std::borrow::Cow;

/// Start of header - begins a 128-byte data packet
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more packets
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the packet (or the EOT)
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver rejected the packet, or requests
/// algebraic checksum mode during the handshake
pub const NAK: u8 = 0x15;

/// Cancel - either side aborts the transfer
pub const CAN: u8 = 0x18;

/// CRC request - receiver asks for CRC-16 mode during the handshake
pub const CRC_REQUEST: u8 = b'C';

/// Substitute - pads the final block out to 128 bytes
pub const SUB: u8 = 0x1A;

/// Payload bytes carried by every packet
pub const BLOCK_SIZE: usize = 128;

/// Human readable name for a control byte, used in debug output
pub fn control_name(byte: u8) -> Cow<'static, str> {
    match byte {
        SOH => Cow::Borrowed("SOH"),
        EOT => Cow::Borrowed("EOT"),
        ACK => Cow::Borrowed("ACK"),
        NAK => Cow::Borrowed("NAK"),
        CAN => Cow::Borrowed("CAN"),
        CRC_REQUEST => Cow::Borrowed("'C'"),
        other => Cow::Owned(format!("0x{:02X}", other)),
    }
}
