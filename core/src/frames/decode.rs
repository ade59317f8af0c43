/*
 * decode.rs
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

//! Wire-to-frame decoding. The caller reads a 9-byte header, then `length`
//! payload bytes, then hands both here together with the HPACK decoding
//! context. Header block fragments are decoded immediately so the context
//! advances in wire order.

use bytes::{Buf, Bytes};

use super::frame::*;
use super::*;
use crate::hpack::Decoder;

/// Fixed 9-byte frame header (RFC 7540 §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

/// A decode failure and the connection error code it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub error_code: u32,
    pub message: String,
}

impl DecodeError {
    fn new(error_code: u32, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }
}

pub fn decode_header(buf: &[u8; FRAME_HEADER_LENGTH]) -> FrameHeader {
    FrameHeader {
        length: (buf[0] as usize) << 16 | (buf[1] as usize) << 8 | (buf[2] as usize),
        frame_type: buf[3],
        flags: buf[4],
        stream_id: ((buf[5] & 0x7f) as u32) << 24
            | (buf[6] as u32) << 16
            | (buf[7] as u32) << 8
            | (buf[8] as u32),
    }
}

/// Decode one frame. Returns None for unknown frame types (the payload has
/// already been consumed from the wire, so skipping is a no-op).
pub fn decode_frame(
    header: &FrameHeader,
    payload: Bytes,
    decoder: &mut Decoder,
) -> Result<Option<Frame>, DecodeError> {
    debug_assert_eq!(header.length, payload.len());
    let frame = match header.frame_type {
        TYPE_DATA => decode_data(header, payload)?,
        TYPE_HEADERS => decode_headers(header, payload, decoder)?,
        TYPE_PRIORITY => decode_priority(header, payload)?,
        TYPE_RST_STREAM => decode_rst_stream(header, payload)?,
        TYPE_SETTINGS => decode_settings(header, payload)?,
        TYPE_PUSH_PROMISE => decode_push_promise(header, payload, decoder)?,
        TYPE_PING => decode_ping(header, payload)?,
        TYPE_GOAWAY => decode_goaway(header, payload)?,
        TYPE_WINDOW_UPDATE => decode_window_update(header, payload)?,
        TYPE_CONTINUATION => decode_continuation(header, payload, decoder)?,
        _ => return Ok(None),
    };
    Ok(Some(frame))
}

fn require_stream(header: &FrameHeader, name: &str) -> Result<(), DecodeError> {
    if header.stream_id == 0 {
        return Err(DecodeError::new(
            ERROR_PROTOCOL_ERROR,
            format!("{} frame with stream identifier 0x00", name),
        ));
    }
    Ok(())
}

fn require_connection(header: &FrameHeader, name: &str) -> Result<(), DecodeError> {
    if header.stream_id != 0 {
        return Err(DecodeError::new(
            ERROR_PROTOCOL_ERROR,
            format!("{} frame with non-zero stream identifier", name),
        ));
    }
    Ok(())
}

/// Strip the trailing padding the PADDED flag announces.
fn strip_padding(name: &str, header: &FrameHeader, payload: &mut Bytes) -> Result<(), DecodeError> {
    if (header.flags & FLAG_PADDED) == 0 {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(DecodeError::new(
            ERROR_PROTOCOL_ERROR,
            format!("{} frame PADDED but no pad length", name),
        ));
    }
    let pad_len = payload.get_u8() as usize;
    if payload.len() < pad_len {
        return Err(DecodeError::new(
            ERROR_PROTOCOL_ERROR,
            format!("{} frame padding exceeds payload", name),
        ));
    }
    payload.truncate(payload.len() - pad_len);
    Ok(())
}

fn decode_header_block(
    fragment: Bytes,
    decoder: &mut Decoder,
) -> Result<Vec<crate::hpack::Header>, DecodeError> {
    decoder
        .decode(fragment)
        .map_err(|e| DecodeError::new(ERROR_COMPRESSION_ERROR, e.to_string()))
}

fn decode_data(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_stream(header, "DATA")?;
    strip_padding("DATA", header, &mut payload)?;
    Ok(Frame::Data(DataFrame {
        stream_id: header.stream_id,
        end_stream: (header.flags & FLAG_END_STREAM) != 0,
        data: payload,
    }))
}

fn decode_headers(
    header: &FrameHeader,
    mut payload: Bytes,
    decoder: &mut Decoder,
) -> Result<Frame, DecodeError> {
    require_stream(header, "HEADERS")?;
    strip_padding("HEADERS", header, &mut payload)?;
    if (header.flags & FLAG_PRIORITY) != 0 {
        if payload.len() < 5 {
            return Err(DecodeError::new(
                ERROR_FRAME_SIZE_ERROR,
                "HEADERS frame with PRIORITY too short",
            ));
        }
        payload.advance(5); // dependency + weight carry no state here
    }
    Ok(Frame::Headers(HeadersFrame {
        stream_id: header.stream_id,
        end_stream: (header.flags & FLAG_END_STREAM) != 0,
        end_headers: (header.flags & FLAG_END_HEADERS) != 0,
        headers: decode_header_block(payload, decoder)?,
    }))
}

fn decode_priority(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_stream(header, "PRIORITY")?;
    if payload.len() != 5 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "PRIORITY frame must be 5 bytes",
        ));
    }
    let word = payload.get_u32();
    Ok(Frame::Priority(PriorityFrame {
        stream_id: header.stream_id,
        exclusive: (word & 0x8000_0000) != 0,
        stream_dependency: word & 0x7fff_ffff,
        weight: payload.get_u8().saturating_add(1),
    }))
}

fn decode_rst_stream(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_stream(header, "RST_STREAM")?;
    if payload.len() != 4 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "RST_STREAM frame must be 4 bytes",
        ));
    }
    Ok(Frame::RstStream(RstStreamFrame {
        stream_id: header.stream_id,
        error_code: payload.get_u32(),
    }))
}

fn decode_settings(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_connection(header, "SETTINGS")?;
    let ack = (header.flags & FLAG_ACK) != 0;
    if ack && !payload.is_empty() {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "SETTINGS ACK frame must be empty",
        ));
    }
    if payload.len() % 6 != 0 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "SETTINGS frame size must be a multiple of 6",
        ));
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        settings.push((payload.get_u16(), payload.get_u32()));
    }
    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

fn decode_push_promise(
    header: &FrameHeader,
    mut payload: Bytes,
    decoder: &mut Decoder,
) -> Result<Frame, DecodeError> {
    require_stream(header, "PUSH_PROMISE")?;
    strip_padding("PUSH_PROMISE", header, &mut payload)?;
    if payload.len() < 4 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "PUSH_PROMISE frame too short",
        ));
    }
    let promised_stream_id = payload.get_u32() & 0x7fff_ffff;
    Ok(Frame::PushPromise(PushPromiseFrame {
        stream_id: header.stream_id,
        promised_stream_id,
        end_headers: (header.flags & FLAG_END_HEADERS) != 0,
        headers: decode_header_block(payload, decoder)?,
    }))
}

fn decode_ping(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_connection(header, "PING")?;
    if payload.len() != 8 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "PING frame must be 8 bytes",
        ));
    }
    Ok(Frame::Ping(PingFrame {
        ack: (header.flags & FLAG_ACK) != 0,
        payload: payload.get_u64(),
    }))
}

fn decode_goaway(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    require_connection(header, "GOAWAY")?;
    if payload.len() < 8 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "GOAWAY frame must be at least 8 bytes",
        ));
    }
    Ok(Frame::GoAway(GoAwayFrame {
        last_stream_id: payload.get_u32() & 0x7fff_ffff,
        error_code: payload.get_u32(),
        debug_data: payload,
    }))
}

fn decode_window_update(header: &FrameHeader, mut payload: Bytes) -> Result<Frame, DecodeError> {
    if payload.len() != 4 {
        return Err(DecodeError::new(
            ERROR_FRAME_SIZE_ERROR,
            "WINDOW_UPDATE frame must be 4 bytes",
        ));
    }
    let increment = payload.get_u32() & 0x7fff_ffff;
    if increment == 0 {
        return Err(DecodeError::new(
            ERROR_PROTOCOL_ERROR,
            "WINDOW_UPDATE increment must be non-zero",
        ));
    }
    Ok(Frame::WindowUpdate(WindowUpdateFrame {
        stream_id: header.stream_id,
        increment,
    }))
}

fn decode_continuation(
    header: &FrameHeader,
    payload: Bytes,
    decoder: &mut Decoder,
) -> Result<Frame, DecodeError> {
    require_stream(header, "CONTINUATION")?;
    Ok(Frame::Continuation(ContinuationFrame {
        stream_id: header.stream_id,
        end_headers: (header.flags & FLAG_END_HEADERS) != 0,
        headers: decode_header_block(payload, decoder)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::encode_frame;
    use super::*;
    use crate::hpack::{Decoder, Encoder, Header};

    fn roundtrip(frame: Frame) -> Frame {
        let mut encoder = Encoder::new();
        let mut decoder = Decoder::new(4096);
        let wire = encode_frame(&frame, &mut encoder);
        let mut header_buf = [0u8; FRAME_HEADER_LENGTH];
        header_buf.copy_from_slice(&wire[..FRAME_HEADER_LENGTH]);
        let header = decode_header(&header_buf);
        assert_eq!(header.length, wire.len() - FRAME_HEADER_LENGTH);
        decode_frame(&header, wire.slice(FRAME_HEADER_LENGTH..), &mut decoder)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn roundtrip_data() {
        let frame = Frame::Data(DataFrame {
            stream_id: 5,
            end_stream: true,
            data: Bytes::from_static(b"Hello, HTTP/2!"),
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_headers() {
        let frame = Frame::Headers(HeadersFrame {
            stream_id: 1,
            end_stream: false,
            end_headers: true,
            headers: vec![
                Header::new(":method", "GET"),
                Header::new(":scheme", "https"),
                Header::new(":authority", "example.com"),
                Header::new(":path", "/hello"),
                Header::new("accept", "*/*"),
            ],
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_priority() {
        let frame = Frame::Priority(PriorityFrame {
            stream_id: 3,
            stream_dependency: 1,
            exclusive: true,
            weight: 42,
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_rst_stream() {
        let frame = Frame::RstStream(RstStreamFrame {
            stream_id: 7,
            error_code: ERROR_CANCEL,
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_settings() {
        let frame = Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![
                (SETTINGS_MAX_FRAME_SIZE, 32_768),
                (SETTINGS_INITIAL_WINDOW_SIZE, 131_070),
            ],
        });
        assert_eq!(roundtrip(frame.clone()), frame);
        let ack = Frame::Settings(SettingsFrame {
            ack: true,
            settings: vec![],
        });
        assert_eq!(roundtrip(ack.clone()), ack);
    }

    #[test]
    fn roundtrip_push_promise() {
        let frame = Frame::PushPromise(PushPromiseFrame {
            stream_id: 1,
            promised_stream_id: 2,
            end_headers: true,
            headers: vec![
                Header::new(":method", "GET"),
                Header::new(":path", "/style.css"),
            ],
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_ping() {
        let frame = Frame::Ping(PingFrame {
            ack: true,
            payload: 0x0102_0304_0506_0708,
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_goaway() {
        let frame = Frame::GoAway(GoAwayFrame {
            last_stream_id: 9,
            error_code: ERROR_PROTOCOL_ERROR,
            debug_data: Bytes::from_static(b"received HEADERS on stream 0"),
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_window_update() {
        let frame = Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: 0,
            increment: 40_000,
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn roundtrip_continuation() {
        let frame = Frame::Continuation(ContinuationFrame {
            stream_id: 1,
            end_headers: true,
            headers: vec![Header::new("x-trailing", "yes")],
        });
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn unknown_frame_type_is_skipped() {
        let header = FrameHeader {
            length: 3,
            frame_type: 0xaa,
            flags: 0,
            stream_id: 1,
        };
        let mut decoder = Decoder::new(4096);
        let result = decode_frame(&header, Bytes::from_static(b"abc"), &mut decoder).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn headers_on_stream_zero_is_a_protocol_error() {
        let header = FrameHeader {
            length: 0,
            frame_type: TYPE_HEADERS,
            flags: FLAG_END_HEADERS,
            stream_id: 0,
        };
        let mut decoder = Decoder::new(4096);
        let err = decode_frame(&header, Bytes::new(), &mut decoder).unwrap_err();
        assert_eq!(err.error_code, ERROR_PROTOCOL_ERROR);
    }

    #[test]
    fn settings_ack_with_payload_is_a_frame_size_error() {
        let header = FrameHeader {
            length: 6,
            frame_type: TYPE_SETTINGS,
            flags: FLAG_ACK,
            stream_id: 0,
        };
        let mut decoder = Decoder::new(4096);
        let err = decode_frame(&header, Bytes::from_static(&[0; 6]), &mut decoder).unwrap_err();
        assert_eq!(err.error_code, ERROR_FRAME_SIZE_ERROR);
    }

    #[test]
    fn zero_window_increment_is_a_protocol_error() {
        let header = FrameHeader {
            length: 4,
            frame_type: TYPE_WINDOW_UPDATE,
            flags: 0,
            stream_id: 0,
        };
        let mut decoder = Decoder::new(4096);
        let err = decode_frame(&header, Bytes::from_static(&[0; 4]), &mut decoder).unwrap_err();
        assert_eq!(err.error_code, ERROR_PROTOCOL_ERROR);
    }

    #[test]
    fn padded_data_is_stripped() {
        // length 6: pad_len byte (2) + "abc" + 2 pad bytes
        let header = FrameHeader {
            length: 6,
            frame_type: TYPE_DATA,
            flags: FLAG_PADDED | FLAG_END_STREAM,
            stream_id: 3,
        };
        let mut decoder = Decoder::new(4096);
        let payload = Bytes::from_static(&[2, b'a', b'b', b'c', 0, 0]);
        let frame = decode_frame(&header, payload, &mut decoder).unwrap().unwrap();
        match frame {
            Frame::Data(d) => {
                assert_eq!(&d.data[..], b"abc");
                assert!(d.end_stream);
            }
            other => panic!("expected DATA, got {}", other.type_name()),
        }
    }
}
