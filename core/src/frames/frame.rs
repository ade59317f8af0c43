/*
 * frame.rs
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

//! One struct per RFC 7540 frame type and the `Frame` sum over them.
//! Header-bearing frames carry decoded header lists, not raw block bytes;
//! the HPACK context is applied at codec time, in wire order.

use bytes::Bytes;

use super::{FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM};
use crate::hpack::Header;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: u32,
    pub end_stream: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: u32,
    pub end_stream: bool,
    pub end_headers: bool,
    pub headers: Vec<Header>,
}

/// Accepted on decode; carries no effect on stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: u32,
    pub stream_dependency: u32,
    pub exclusive: bool,
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub error_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Vec<(u16, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    /// Associated (parent) stream the promise arrived on.
    pub stream_id: u32,
    pub promised_stream_id: u32,
    pub end_headers: bool,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub ack: bool,
    pub payload: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoAwayFrame {
    pub last_stream_id: u32,
    pub error_code: u32,
    pub debug_data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// 0 replenishes the connection-level window.
    pub stream_id: u32,
    pub increment: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    pub stream_id: u32,
    pub end_headers: bool,
    pub headers: Vec<Header>,
}

/// Every supported frame variant. Dispatch is exhaustive matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    GoAway(GoAwayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
}

impl Frame {
    /// Stream the frame belongs to; 0 for connection-scoped frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::Priority(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Settings(_) => 0,
            Frame::PushPromise(f) => f.stream_id,
            Frame::Ping(_) => 0,
            Frame::GoAway(_) => 0,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Continuation(f) => f.stream_id,
        }
    }

    /// Wire flags byte this frame encodes with.
    pub fn flags(&self) -> u8 {
        match self {
            Frame::Data(f) => {
                if f.end_stream {
                    FLAG_END_STREAM
                } else {
                    0
                }
            }
            Frame::Headers(f) => {
                let mut flags = 0;
                if f.end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if f.end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                flags
            }
            Frame::Priority(_) => 0,
            Frame::RstStream(_) => 0,
            Frame::Settings(f) => {
                if f.ack {
                    FLAG_ACK
                } else {
                    0
                }
            }
            Frame::PushPromise(f) => {
                if f.end_headers {
                    FLAG_END_HEADERS
                } else {
                    0
                }
            }
            Frame::Ping(f) => {
                if f.ack {
                    FLAG_ACK
                } else {
                    0
                }
            }
            Frame::GoAway(_) => 0,
            Frame::WindowUpdate(_) => 0,
            Frame::Continuation(f) => {
                if f.end_headers {
                    FLAG_END_HEADERS
                } else {
                    0
                }
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Data(_) => "DATA",
            Frame::Headers(_) => "HEADERS",
            Frame::Priority(_) => "PRIORITY",
            Frame::RstStream(_) => "RST_STREAM",
            Frame::Settings(_) => "SETTINGS",
            Frame::PushPromise(_) => "PUSH_PROMISE",
            Frame::Ping(_) => "PING",
            Frame::GoAway(_) => "GOAWAY",
            Frame::WindowUpdate(_) => "WINDOW_UPDATE",
            Frame::Continuation(_) => "CONTINUATION",
        }
    }
}
