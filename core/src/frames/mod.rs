/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a scriptable HTTP/2 client.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Staffetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Staffetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP/2 framing layer (RFC 7540 §4, §6): wire constants, the `Frame` sum
//! type, and the codec between frames and wire bytes.

mod decode;
mod encode;
mod frame;

pub use decode::{decode_frame, decode_header, DecodeError, FrameHeader};
pub use encode::encode_frame;
pub use frame::{
    ContinuationFrame, DataFrame, Frame, GoAwayFrame, HeadersFrame, PingFrame, PriorityFrame,
    PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};

/// Inspect-and-substitute hook on the frame paths: inbound post-decode,
/// outbound pre-encode. Applied in registration order.
pub type FrameFilter = Box<dyn Fn(Frame) -> Frame + Send>;

/// HTTP/2 connection preface (PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Frame types
pub const TYPE_DATA: u8 = 0x0;
pub const TYPE_HEADERS: u8 = 0x1;
pub const TYPE_PRIORITY: u8 = 0x2;
pub const TYPE_RST_STREAM: u8 = 0x3;
pub const TYPE_SETTINGS: u8 = 0x4;
pub const TYPE_PUSH_PROMISE: u8 = 0x5;
pub const TYPE_PING: u8 = 0x6;
pub const TYPE_GOAWAY: u8 = 0x7;
pub const TYPE_WINDOW_UPDATE: u8 = 0x8;
pub const TYPE_CONTINUATION: u8 = 0x9;

// Flags
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

// Error codes (RFC 7540 §7)
pub const ERROR_NO_ERROR: u32 = 0x0;
pub const ERROR_PROTOCOL_ERROR: u32 = 0x1;
pub const ERROR_INTERNAL_ERROR: u32 = 0x2;
pub const ERROR_FLOW_CONTROL_ERROR: u32 = 0x3;
pub const ERROR_SETTINGS_TIMEOUT: u32 = 0x4;
pub const ERROR_STREAM_CLOSED: u32 = 0x5;
pub const ERROR_FRAME_SIZE_ERROR: u32 = 0x6;
pub const ERROR_REFUSED_STREAM: u32 = 0x7;
pub const ERROR_CANCEL: u32 = 0x8;
pub const ERROR_COMPRESSION_ERROR: u32 = 0x9;

// SETTINGS identifiers
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

pub const FRAME_HEADER_LENGTH: usize = 9;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const DEFAULT_INITIAL_WINDOW_SIZE: i64 = 65_535;
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

pub fn error_code_to_string(code: u32) -> &'static str {
    match code {
        ERROR_NO_ERROR => "NO_ERROR",
        ERROR_PROTOCOL_ERROR => "PROTOCOL_ERROR",
        ERROR_INTERNAL_ERROR => "INTERNAL_ERROR",
        ERROR_FLOW_CONTROL_ERROR => "FLOW_CONTROL_ERROR",
        ERROR_SETTINGS_TIMEOUT => "SETTINGS_TIMEOUT",
        ERROR_STREAM_CLOSED => "STREAM_CLOSED",
        ERROR_FRAME_SIZE_ERROR => "FRAME_SIZE_ERROR",
        ERROR_REFUSED_STREAM => "REFUSED_STREAM",
        ERROR_CANCEL => "CANCEL",
        ERROR_COMPRESSION_ERROR => "COMPRESSION_ERROR",
        _ => "UNKNOWN",
    }
}
