/*
 * stream.rs
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

//! Per-stream state machine (RFC 7540 §5.1): lifecycle, send/receive
//! windows, the pending-DATA queue, and response accumulation.
//!
//! The state is authoritative for accepting or rejecting frame types; a
//! forbidden frame escalates to a connection-level PROTOCOL_ERROR.

use std::collections::VecDeque;
use std::fmt;

use crate::command::{HttpCommand, HttpResponse, Method, StreamSnapshot};
use crate::error::ClientError;
use crate::frames::{DataFrame, Frame, HeadersFrame, RstStreamFrame, WindowUpdateFrame};
use crate::frames::ERROR_PROTOCOL_ERROR;
use crate::hpack::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::ReservedLocal => "reserved (local)",
            StreamState::ReservedRemote => "reserved (remote)",
            StreamState::Open => "open",
            StreamState::HalfClosedLocal => "half closed (local)",
            StreamState::HalfClosedRemote => "half closed (remote)",
            StreamState::Closed => "closed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame arrived that the current state forbids. The connection engine
/// turns this into GOAWAY + shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolViolation {
    pub error_code: u32,
    pub message: String,
}

impl ProtocolViolation {
    fn new(message: String) -> Self {
        Self {
            error_code: ERROR_PROTOCOL_ERROR,
            message,
        }
    }
}

pub struct Stream {
    id: u32,
    state: StreamState,
    /// Created by a server PUSH_PROMISE rather than a client request.
    promised: bool,
    command: Option<HttpCommand>,
    method: Option<Method>,
    path: Option<String>,
    send_window: i64,
    receive_window: i64,
    initial_receive_window: i64,
    pending_data: VecDeque<DataFrame>,
    response_headers: Vec<Header>,
    response_body: Vec<u8>,
    /// A header block is open (HEADERS without END_HEADERS; CONTINUATION expected).
    header_block_open: bool,
    /// END_STREAM seen on HEADERS, deferred until the block completes.
    end_stream_pending: bool,
    response_complete: bool,
    error_code: Option<u32>,
}

impl Stream {
    pub fn new(id: u32, send_window: i64, receive_window: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            promised: false,
            command: None,
            method: None,
            path: None,
            send_window,
            receive_window,
            initial_receive_window: receive_window,
            pending_data: VecDeque::new(),
            response_headers: Vec::new(),
            response_body: Vec::new(),
            header_block_open: false,
            end_stream_pending: false,
            response_complete: false,
            error_code: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Bind the originating request command. Also records method and path
    /// for the monitoring surface.
    pub fn set_command(&mut self, command: HttpCommand) {
        self.method = Some(command.request.method);
        self.path = Some(command.request.path.clone());
        self.command = Some(command);
    }

    /// Transition for a server push: the promised stream reserves itself
    /// before any request of ours exists.
    pub fn reserve_remote(
        &mut self,
        method: Option<Method>,
        path: Option<String>,
    ) -> Result<(), ProtocolViolation> {
        if self.state != StreamState::Idle {
            return Err(ProtocolViolation::new(format!(
                "received PUSH_PROMISE for stream {} in state {}",
                self.id,
                self.state.as_str()
            )));
        }
        self.state = StreamState::ReservedRemote;
        self.promised = true;
        self.method = method;
        self.path = path;
        Ok(())
    }

    pub fn is_promised(&self) -> bool {
        self.promised
    }

    /// Adopt a promised stream for a client request. If the pushed response
    /// already completed (or the stream was reset), the command is finalized
    /// immediately.
    pub fn associate_request(&mut self, mut command: HttpCommand) {
        if let Some(error_code) = self.error_code {
            command
                .completion
                .complete_with_error(ClientError::StreamReset { error_code });
        }
        self.command = Some(command);
        self.deliver_response();
    }

    /// Validate and emit a request HEADERS frame.
    pub fn send_headers(&mut self, frame: HeadersFrame) -> Result<Frame, ProtocolViolation> {
        if self.state != StreamState::Idle {
            return Err(ProtocolViolation::new(format!(
                "cannot send HEADERS for stream {} in state {}",
                self.id,
                self.state.as_str()
            )));
        }
        self.state = if frame.end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
        Ok(Frame::Headers(frame))
    }

    /// Enqueue outbound DATA; emission happens under flow control via
    /// `process_pending_data_frames`.
    pub fn queue_data(&mut self, frame: DataFrame) -> Result<(), ProtocolViolation> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedRemote => {
                self.pending_data.push_back(frame);
                Ok(())
            }
            _ => Err(ProtocolViolation::new(format!(
                "cannot send DATA for stream {} in state {}",
                self.id,
                self.state.as_str()
            ))),
        }
    }

    /// Drain queued DATA as far as the stream and connection send windows
    /// allow. A frame larger than the available window is split; the
    /// remainder (keeping any END_STREAM flag) stays queued.
    pub fn process_pending_data_frames(&mut self, connection_send_window: &mut i64) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(front) = self.pending_data.front_mut() {
            let available = self.send_window.min(*connection_send_window);
            if available <= 0 {
                break;
            }
            let frame_len = front.data.len() as i64;
            if frame_len <= available {
                let frame = match self.pending_data.pop_front() {
                    Some(frame) => frame,
                    None => break,
                };
                self.send_window -= frame_len;
                *connection_send_window -= frame_len;
                if frame.end_stream {
                    self.close_local();
                }
                out.push(Frame::Data(frame));
            } else {
                let prefix = front.data.split_to(available as usize);
                self.send_window -= available;
                *connection_send_window -= available;
                out.push(Frame::Data(DataFrame {
                    stream_id: self.id,
                    end_stream: false,
                    data: prefix,
                }));
                break;
            }
        }
        out
    }

    pub fn has_pending_data(&self) -> bool {
        !self.pending_data.is_empty()
    }

    /// Validate and ingest an inbound frame.
    pub fn receive_frame(&mut self, frame: Frame) -> Result<(), ProtocolViolation> {
        match frame {
            Frame::Headers(h) => self.receive_headers(h.headers, h.end_headers, h.end_stream),
            Frame::Continuation(c) => self.receive_continuation(c.headers, c.end_headers),
            Frame::Data(d) => self.receive_data(&d.data, d.end_stream),
            Frame::RstStream(r) => self.receive_rst_stream(r.error_code),
            Frame::WindowUpdate(w) => {
                // Permitted in any state, including a grace window after close.
                self.send_window += w.increment as i64;
                Ok(())
            }
            Frame::Priority(_) => Ok(()),
            other => Err(ProtocolViolation::new(format!(
                "received {} frame for stream {}",
                other.type_name(),
                self.id
            ))),
        }
    }

    fn receive_headers(
        &mut self,
        headers: Vec<Header>,
        end_headers: bool,
        end_stream: bool,
    ) -> Result<(), ProtocolViolation> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::ReservedRemote => self.state = StreamState::HalfClosedLocal,
            _ => {
                return Err(ProtocolViolation::new(format!(
                    "received HEADERS for stream {} in state {}",
                    self.id,
                    self.state.as_str()
                )))
            }
        }
        self.response_headers.extend(headers);
        self.header_block_open = !end_headers;
        if end_stream {
            if end_headers {
                self.close_remote();
                self.finish_response();
            } else {
                self.end_stream_pending = true;
            }
        }
        Ok(())
    }

    fn receive_continuation(
        &mut self,
        headers: Vec<Header>,
        end_headers: bool,
    ) -> Result<(), ProtocolViolation> {
        if !self.header_block_open {
            return Err(ProtocolViolation::new(format!(
                "received CONTINUATION for stream {} without an open header block",
                self.id
            )));
        }
        self.response_headers.extend(headers);
        if end_headers {
            self.header_block_open = false;
            if self.end_stream_pending {
                self.end_stream_pending = false;
                self.close_remote();
                self.finish_response();
            }
        }
        Ok(())
    }

    fn receive_data(&mut self, data: &[u8], end_stream: bool) -> Result<(), ProtocolViolation> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            _ => {
                return Err(ProtocolViolation::new(format!(
                    "received DATA for stream {} in state {}",
                    self.id,
                    self.state.as_str()
                )))
            }
        }
        self.receive_window -= data.len() as i64;
        self.response_body.extend_from_slice(data);
        if end_stream {
            self.close_remote();
            self.finish_response();
        }
        Ok(())
    }

    fn receive_rst_stream(&mut self, error_code: u32) -> Result<(), ProtocolViolation> {
        if self.state == StreamState::Idle {
            return Err(ProtocolViolation::new(format!(
                "received RST_STREAM for stream {} in idle state",
                self.id
            )));
        }
        self.state = StreamState::Closed;
        self.error_code = Some(error_code);
        self.pending_data.clear();
        self.fail(ClientError::StreamReset { error_code });
        Ok(())
    }

    /// Reset the stream from our side. Returns the RST_STREAM to write, if
    /// the state still permits sending one.
    pub fn close_with_error(&mut self, error_code: u32) -> Option<Frame> {
        if matches!(self.state, StreamState::Idle | StreamState::Closed) {
            return None;
        }
        self.state = StreamState::Closed;
        self.error_code = Some(error_code);
        self.pending_data.clear();
        self.fail(ClientError::StreamReset { error_code });
        Some(Frame::RstStream(RstStreamFrame {
            stream_id: self.id,
            error_code,
        }))
    }

    /// Fail the owning command, if any and not yet delivered.
    pub fn fail(&mut self, err: ClientError) {
        if let Some(cmd) = self.command.as_mut() {
            cmd.completion.complete_with_error(err);
        }
    }

    /// Replenishment for the stream-level receive window: once it drops
    /// below the low-water mark, restore it to its initial value.
    pub fn maybe_window_update(&mut self, low_water: i64) -> Option<Frame> {
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal) {
            return None;
        }
        if self.receive_window >= low_water {
            return None;
        }
        let increment = self.initial_receive_window - self.receive_window;
        self.receive_window += increment;
        Some(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: self.id,
            increment: increment as u32,
        }))
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE renegotiation: apply the delta to the
    /// send window (may go transiently negative).
    pub fn adjust_send_window(&mut self, delta: i64) {
        self.send_window += delta;
    }

    pub fn send_window(&self) -> i64 {
        self.send_window
    }

    /// True once nothing remains to do: closed, drained, delivered. An
    /// unadopted push stream keeps its cached response and is not finished.
    pub fn is_finished(&self) -> bool {
        if self.state != StreamState::Closed || !self.pending_data.is_empty() {
            return false;
        }
        match &self.command {
            Some(cmd) => cmd.completion.is_completed(),
            None => !self.promised || self.error_code.is_some(),
        }
    }

    pub fn snapshot(&self, is_cached_push_promise: bool) -> StreamSnapshot {
        StreamSnapshot {
            stream_id: self.id,
            method: self.method,
            path: self.path.clone(),
            state: self.state,
            is_cached_push_promise,
        }
    }

    fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    fn close_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::ReservedRemote => StreamState::Closed,
            other => other,
        };
    }

    fn finish_response(&mut self) {
        self.response_complete = true;
        self.deliver_response();
    }

    fn deliver_response(&mut self) {
        if !self.response_complete {
            return;
        }
        if let Some(cmd) = self.command.as_mut() {
            if !cmd.completion.is_completed() {
                let response = HttpResponse {
                    headers: self.response_headers.clone(),
                    body: std::mem::take(&mut self.response_body),
                };
                cmd.completion.complete_successfully(response);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::HttpRequest;
    use bytes::Bytes;
    use std::time::Duration;

    fn get_request(path: &str) -> HttpRequest {
        HttpRequest::new(Method::Get, "https", "example.com", path)
    }

    fn response_headers_frame(end_stream: bool) -> Frame {
        Frame::Headers(HeadersFrame {
            stream_id: 1,
            end_stream,
            end_headers: true,
            headers: vec![Header::new(":status", "200")],
        })
    }

    fn data(stream_id: u32, payload: &'static [u8], end_stream: bool) -> DataFrame {
        DataFrame {
            stream_id,
            end_stream,
            data: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn get_lifecycle_idle_open_halfclosed_closed() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, handle) = HttpCommand::new(get_request("/hello"));
        stream.set_command(cmd);
        assert_eq!(stream.state(), StreamState::Idle);

        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);

        stream.receive_frame(response_headers_frame(true)).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.is_finished());

        let response = handle.await_completion(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.status(), Some(200));
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn post_body_closes_local_side_on_last_fragment() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, _handle) = HttpCommand::new(get_request("/upload"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: false,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        assert_eq!(stream.state(), StreamState::Open);

        stream.queue_data(data(1, b"ABCD", false)).unwrap();
        stream.queue_data(data(1, b"EFGH", true)).unwrap();
        let mut conn_window = 65_535i64;
        let frames = stream.process_pending_data_frames(&mut conn_window);
        assert_eq!(frames.len(), 2);
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
        assert_eq!(conn_window, 65_535 - 8);
        assert_eq!(stream.send_window(), 65_535 - 8);
    }

    #[test]
    fn data_larger_than_window_is_split() {
        let mut stream = Stream::new(1, 5, 65_535);
        let (cmd, _handle) = HttpCommand::new(get_request("/upload"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: false,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream.queue_data(data(1, b"ABCDEFGH", true)).unwrap();

        let mut conn_window = 65_535i64;
        let frames = stream.process_pending_data_frames(&mut conn_window);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Data(d) => {
                assert_eq!(&d.data[..], b"ABCDE");
                assert!(!d.end_stream);
            }
            other => panic!("expected DATA, got {}", other.type_name()),
        }
        assert_eq!(stream.send_window(), 0);
        assert!(stream.has_pending_data());
        // Still open: END_STREAM has not gone out yet.
        assert_eq!(stream.state(), StreamState::Open);

        // Replenish and drain the remainder.
        stream
            .receive_frame(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: 1,
                increment: 100,
            }))
            .unwrap();
        let frames = stream.process_pending_data_frames(&mut conn_window);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Data(d) => {
                assert_eq!(&d.data[..], b"FGH");
                assert!(d.end_stream);
            }
            other => panic!("expected DATA, got {}", other.type_name()),
        }
        assert!(!stream.has_pending_data());
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn connection_window_gates_emission_too() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, _handle) = HttpCommand::new(get_request("/upload"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: false,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream.queue_data(data(1, b"ABCDEFGH", true)).unwrap();
        let mut conn_window = 3i64;
        let frames = stream.process_pending_data_frames(&mut conn_window);
        assert_eq!(frames.len(), 1);
        assert_eq!(conn_window, 0);
        assert!(stream.has_pending_data());
    }

    #[test]
    fn data_in_idle_is_a_protocol_violation() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let err = stream
            .receive_frame(Frame::Data(data(1, b"x", false)))
            .unwrap_err();
        assert_eq!(err.error_code, ERROR_PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn rst_stream_fails_the_command() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, handle) = HttpCommand::new(get_request("/hello"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream
            .receive_frame(Frame::RstStream(RstStreamFrame {
                stream_id: 1,
                error_code: 0x8,
            }))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        let err = handle.await_completion(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, ClientError::StreamReset { error_code: 0x8 });
    }

    #[test]
    fn rst_stream_in_idle_is_a_protocol_violation() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let err = stream
            .receive_frame(Frame::RstStream(RstStreamFrame {
                stream_id: 1,
                error_code: 0,
            }))
            .unwrap_err();
        assert_eq!(err.error_code, ERROR_PROTOCOL_ERROR);
    }

    #[test]
    fn window_update_is_tolerated_after_close() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, _handle) = HttpCommand::new(get_request("/hello"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream.receive_frame(response_headers_frame(true)).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        stream
            .receive_frame(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: 1,
                increment: 10,
            }))
            .unwrap();
        stream
            .receive_frame(Frame::Priority(crate::frames::PriorityFrame {
                stream_id: 1,
                stream_dependency: 0,
                exclusive: false,
                weight: 16,
            }))
            .unwrap();
    }

    #[tokio::test]
    async fn continuation_completes_a_deferred_end_stream() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, handle) = HttpCommand::new(get_request("/hello"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream
            .receive_frame(Frame::Headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: false,
                headers: vec![Header::new(":status", "200")],
            }))
            .unwrap();
        assert_ne!(stream.state(), StreamState::Closed);
        stream
            .receive_frame(Frame::Continuation(crate::frames::ContinuationFrame {
                stream_id: 1,
                end_headers: true,
                headers: vec![Header::new("content-type", "text/plain")],
            }))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        let response = handle.await_completion(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.headers.len(), 2);
    }

    #[test]
    fn receive_window_replenishes_below_low_water() {
        let mut stream = Stream::new(1, 65_535, 65_535);
        let (cmd, _handle) = HttpCommand::new(get_request("/big"));
        stream.set_command(cmd);
        stream
            .send_headers(HeadersFrame {
                stream_id: 1,
                end_stream: true,
                end_headers: true,
                headers: vec![],
            })
            .unwrap();
        stream.receive_frame(response_headers_frame(false)).unwrap();

        let chunk: Vec<u8> = vec![0u8; 60_000];
        stream
            .receive_frame(Frame::Data(DataFrame {
                stream_id: 1,
                end_stream: false,
                data: Bytes::from(chunk),
            }))
            .unwrap();
        let update = stream.maybe_window_update(16_384).expect("window update due");
        match update {
            Frame::WindowUpdate(w) => {
                assert_eq!(w.stream_id, 1);
                assert_eq!(w.increment, 60_000);
            }
            other => panic!("expected WINDOW_UPDATE, got {}", other.type_name()),
        }
        assert!(stream.maybe_window_update(16_384).is_none());
    }

    #[tokio::test]
    async fn promised_stream_serves_a_late_adopter() {
        let mut stream = Stream::new(2, 65_535, 65_535);
        stream
            .reserve_remote(Some(Method::Get), Some("/style.css".into()))
            .unwrap();
        assert_eq!(stream.state(), StreamState::ReservedRemote);

        stream.receive_frame(response_headers_frame(false)).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);
        stream
            .receive_frame(Frame::Data(data(2, b"body{}", true)))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        // Unadopted: the cached response keeps the stream alive.
        assert!(!stream.is_finished());

        let (cmd, handle) = HttpCommand::new(get_request("/style.css"));
        stream.associate_request(cmd);
        let response = handle.await_completion(Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.body, b"body{}");
        assert!(stream.is_finished());
    }
}
