/*
 * encode.rs
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

//! Frame-to-wire encoding. Header-bearing frames run their header list
//! through the HPACK encoding context, so frames must be encoded in the
//! exact order they are written.
//!
//! Emitted frames never use padding, and HEADERS never carries the
//! priority segment.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::*;
use super::*;
use crate::hpack::Encoder;

/// Encode one frame, header included, ready for the wire.
pub fn encode_frame(frame: &Frame, encoder: &mut Encoder) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LENGTH + 64);
    match frame {
        Frame::Data(f) => {
            put_frame_header(&mut buf, f.data.len(), TYPE_DATA, frame.flags(), f.stream_id);
            buf.extend_from_slice(&f.data);
        }
        Frame::Headers(f) => {
            let mut block = BytesMut::new();
            encoder.encode(&f.headers, &mut block);
            put_frame_header(&mut buf, block.len(), TYPE_HEADERS, frame.flags(), f.stream_id);
            buf.extend_from_slice(&block);
        }
        Frame::Priority(f) => {
            put_frame_header(&mut buf, 5, TYPE_PRIORITY, 0, f.stream_id);
            let dep = if f.exclusive {
                f.stream_dependency | 0x8000_0000
            } else {
                f.stream_dependency
            };
            buf.put_u32(dep);
            buf.put_u8(f.weight.saturating_sub(1));
        }
        Frame::RstStream(f) => {
            put_frame_header(&mut buf, 4, TYPE_RST_STREAM, 0, f.stream_id);
            buf.put_u32(f.error_code);
        }
        Frame::Settings(f) => {
            put_frame_header(&mut buf, f.settings.len() * 6, TYPE_SETTINGS, frame.flags(), 0);
            for (id, value) in &f.settings {
                buf.put_u16(*id);
                buf.put_u32(*value);
            }
        }
        Frame::PushPromise(f) => {
            let mut block = BytesMut::new();
            encoder.encode(&f.headers, &mut block);
            put_frame_header(
                &mut buf,
                4 + block.len(),
                TYPE_PUSH_PROMISE,
                frame.flags(),
                f.stream_id,
            );
            buf.put_u32(f.promised_stream_id & 0x7fff_ffff);
            buf.extend_from_slice(&block);
        }
        Frame::Ping(f) => {
            put_frame_header(&mut buf, 8, TYPE_PING, frame.flags(), 0);
            buf.put_u64(f.payload);
        }
        Frame::GoAway(f) => {
            put_frame_header(&mut buf, 8 + f.debug_data.len(), TYPE_GOAWAY, 0, 0);
            buf.put_u32(f.last_stream_id & 0x7fff_ffff);
            buf.put_u32(f.error_code);
            buf.extend_from_slice(&f.debug_data);
        }
        Frame::WindowUpdate(f) => {
            put_frame_header(&mut buf, 4, TYPE_WINDOW_UPDATE, 0, f.stream_id);
            buf.put_u32(f.increment & 0x7fff_ffff);
        }
        Frame::Continuation(f) => {
            let mut block = BytesMut::new();
            encoder.encode(&f.headers, &mut block);
            put_frame_header(
                &mut buf,
                block.len(),
                TYPE_CONTINUATION,
                frame.flags(),
                f.stream_id,
            );
            buf.extend_from_slice(&block);
        }
    }
    buf.freeze()
}

fn put_frame_header(buf: &mut BytesMut, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    buf.put_u8((length >> 16) as u8);
    buf.put_u8((length >> 8) as u8);
    buf.put_u8(length as u8);
    buf.put_u8(frame_type);
    buf.put_u8(flags);
    buf.put_u32(stream_id & 0x7fff_ffff);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_wire_layout() {
        let mut encoder = Encoder::new();
        let wire = encode_frame(
            &Frame::Ping(PingFrame {
                ack: false,
                payload: 0x0102030405060708,
            }),
            &mut encoder,
        );
        assert_eq!(
            &wire[..],
            &[
                0, 0, 8, TYPE_PING, 0, 0, 0, 0, 0, // header
                1, 2, 3, 4, 5, 6, 7, 8, // opaque payload
            ]
        );
    }

    #[test]
    fn empty_settings_wire_layout() {
        let mut encoder = Encoder::new();
        let wire = encode_frame(
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings: vec![],
            }),
            &mut encoder,
        );
        assert_eq!(&wire[..], &[0, 0, 0, TYPE_SETTINGS, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn settings_ack_sets_the_ack_flag() {
        let mut encoder = Encoder::new();
        let wire = encode_frame(
            &Frame::Settings(SettingsFrame {
                ack: true,
                settings: vec![],
            }),
            &mut encoder,
        );
        assert_eq!(wire[4], FLAG_ACK);
    }

    #[test]
    fn data_end_stream_flag() {
        let mut encoder = Encoder::new();
        let wire = encode_frame(
            &Frame::Data(DataFrame {
                stream_id: 1,
                end_stream: true,
                data: Bytes::from_static(b"fin"),
            }),
            &mut encoder,
        );
        assert_eq!(wire[3], TYPE_DATA);
        assert_eq!(wire[4], FLAG_END_STREAM);
        assert_eq!(&wire[FRAME_HEADER_LENGTH..], b"fin");
    }

    #[test]
    fn reserved_bit_is_masked() {
        let mut encoder = Encoder::new();
        let wire = encode_frame(
            &Frame::GoAway(GoAwayFrame {
                last_stream_id: 0xffff_ffff,
                error_code: 0,
                debug_data: Bytes::new(),
            }),
            &mut encoder,
        );
        assert_eq!(wire[FRAME_HEADER_LENGTH] & 0x80, 0);
    }
}
