/*
 * connection.rs
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

//! Connection engine: owns the streams map, negotiated settings, ping
//! correlation, the push-promise cache, connection-level flow control and
//! the write half of the transport.
//!
//! Every method here runs on the event-loop task; the engine is the single
//! writer and the HPACK encoding context advances in write order.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::command::{
    HttpCommand, Method, MonitoringCommand, MonitoringResponse, PingCommand,
};
use crate::error::ClientError;
use crate::frames::{
    encode_frame, DataFrame, Frame, FrameFilter, GoAwayFrame, HeadersFrame, PingFrame,
    PushPromiseFrame, SettingsFrame, WindowUpdateFrame, CONNECTION_PREFACE,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, ERROR_PROTOCOL_ERROR,
    ERROR_REFUSED_STREAM, MAX_STREAM_ID, SETTINGS_INITIAL_WINDOW_SIZE, SETTINGS_MAX_FRAME_SIZE,
};
use crate::hpack::Encoder;
use crate::stream::{Stream, StreamState};

/// Our view of the peer's settings, plus our own advertised values.
struct Settings {
    /// Largest DATA payload the server accepts (SETTINGS_MAX_FRAME_SIZE).
    peer_max_frame_size: u32,
    /// Send window for new streams (peer SETTINGS_INITIAL_WINDOW_SIZE).
    initial_send_window: i64,
    /// Receive window we grant new streams.
    initial_receive_window: i64,
}

impl Settings {
    fn new() -> Self {
        Self {
            peer_max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            initial_send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            initial_receive_window: DEFAULT_INITIAL_WINDOW_SIZE,
        }
    }
}

pub(crate) struct Connection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    settings: Settings,
    streams: BTreeMap<u32, Stream>,
    /// Monotonic odd allocator for client-initiated streams.
    next_stream_id: u32,
    next_ping_id: u64,
    pending_pings: HashMap<u64, PingCommand>,
    /// Promised `:path` -> promised stream id, consumed at most once.
    promised_paths: HashMap<String, u32>,
    encoder: Encoder,
    send_window: i64,
    receive_window: i64,
    outgoing_filters: Vec<FrameFilter>,
    shutdown: bool,
    /// Set when the peer sent GOAWAY: no new streams.
    goaway_received: bool,
    /// Highest server-promised (even) stream id seen.
    highest_promised_stream_id: u32,
    /// Highest inbound stream id we processed; reported in our GOAWAY.
    highest_processed_stream_id: u32,
}

impl Connection {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>, outgoing_filters: Vec<FrameFilter>) -> Self {
        Self {
            writer,
            settings: Settings::new(),
            streams: BTreeMap::new(),
            next_stream_id: 1,
            next_ping_id: 0,
            pending_pings: HashMap::new(),
            promised_paths: HashMap::new(),
            encoder: Encoder::new(),
            send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            receive_window: DEFAULT_INITIAL_WINDOW_SIZE,
            outgoing_filters,
            shutdown: false,
            goaway_received: false,
            highest_promised_stream_id: 0,
            highest_processed_stream_id: 0,
        }
    }

    /// 24-byte client preface followed by our (empty) SETTINGS frame.
    pub async fn send_preface(&mut self) -> Result<(), ClientError> {
        if let Err(e) = self.writer.write_all(CONNECTION_PREFACE).await {
            return Err(ClientError::Connect(format!(
                "failed to write connection preface: {}",
                e
            )));
        }
        self.write_frame(Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![],
        }))
        .await;
        if self.shutdown {
            return Err(ClientError::Connect("failed to write SETTINGS frame".into()));
        }
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Outbound path: filters in registration order, then encode, then write.
    /// A write failure flips the shutdown flag; the loop notices after the tick.
    async fn write_frame(&mut self, mut frame: Frame) {
        if self.shutdown {
            return;
        }
        for filter in &self.outgoing_filters {
            frame = filter(frame);
        }
        let wire = encode_frame(&frame, &mut self.encoder);
        if self.writer.write_all(&wire).await.is_err() || self.writer.flush().await.is_err() {
            self.shutdown = true;
        }
    }

    // ── Command handling ──────────────────────────────────────────────

    pub async fn handle_http_request(&mut self, cmd: HttpCommand) {
        if self.shutdown || self.goaway_received {
            let mut cmd = cmd;
            cmd.completion.complete_with_error(ClientError::ConnectionClosed);
            return;
        }
        match cmd.request.method {
            Method::Get => {
                // A matching push promise means the response is already on
                // its way (or here); adopt the promised stream instead of
                // opening a new one.
                if let Some(stream_id) = self.promised_paths.remove(&cmd.request.path) {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.associate_request(cmd);
                        self.cleanup_stream(stream_id);
                        return;
                    }
                }
                self.do_request(cmd).await;
            }
            Method::Put | Method::Post => self.do_request(cmd).await,
        }
    }

    async fn do_request(&mut self, mut cmd: HttpCommand) {
        let stream_id = match self.allocate_stream_id() {
            Some(id) => id,
            None => {
                cmd.completion.complete_with_error(ClientError::StreamIdsExhausted);
                return;
            }
        };
        let headers = cmd.request.to_header_list();
        let body = cmd.request.body.take();

        let mut stream = Stream::new(
            stream_id,
            self.settings.initial_send_window,
            self.settings.initial_receive_window,
        );
        stream.set_command(cmd);
        self.streams.insert(stream_id, stream);

        let headers_frame = HeadersFrame {
            stream_id,
            end_stream: body.is_none(),
            end_headers: true,
            headers,
        };
        let mut to_write = Vec::new();
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Ok(frame) = stream.send_headers(headers_frame) {
                to_write.push(frame);
            }
            if let Some(body) = body {
                for chunk in fragment_body(stream_id, body, self.settings.peer_max_frame_size) {
                    if stream.queue_data(chunk).is_err() {
                        break;
                    }
                }
                to_write.extend(stream.process_pending_data_frames(&mut self.send_window));
            }
        }
        for frame in to_write {
            self.write_frame(frame).await;
        }
    }

    fn allocate_stream_id(&mut self) -> Option<u32> {
        if self.next_stream_id > MAX_STREAM_ID {
            return None;
        }
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        Some(id)
    }

    pub async fn handle_ping_request(&mut self, cmd: PingCommand) {
        if self.shutdown {
            let mut cmd = cmd;
            cmd.completion.complete_with_error(ClientError::ConnectionClosed);
            return;
        }
        let payload = self.next_ping_id;
        self.next_ping_id += 1;
        self.pending_pings.insert(payload, cmd);
        self.write_frame(Frame::Ping(PingFrame { ack: false, payload })).await;
    }

    pub fn handle_monitoring_request(&mut self, mut cmd: MonitoringCommand) {
        let mut response = MonitoringResponse::default();
        for (id, stream) in &self.streams {
            let cached = self.promised_paths.values().any(|promised| promised == id);
            response.streams.push(stream.snapshot(cached));
        }
        cmd.completion.complete_successfully(response);
    }

    // ── Inbound frame routing ─────────────────────────────────────────

    pub async fn handle_incoming_frame(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        if stream_id == 0 {
            self.handle_frame_for_connection(frame).await;
        } else {
            self.handle_frame_for_stream(frame).await;
            if !self.shutdown && stream_id > self.highest_processed_stream_id {
                self.highest_processed_stream_id = stream_id;
            }
        }
    }

    async fn handle_frame_for_connection(&mut self, frame: Frame) {
        match frame {
            Frame::Settings(frame) => self.handle_settings_frame(frame).await,
            Frame::Ping(frame) => {
                if frame.ack {
                    if let Some(mut pending) = self.pending_pings.remove(&frame.payload) {
                        pending.completion.complete_successfully(());
                    }
                } else {
                    self.write_frame(Frame::Ping(PingFrame {
                        ack: true,
                        payload: frame.payload,
                    }))
                    .await;
                }
            }
            Frame::WindowUpdate(frame) => {
                self.send_window += frame.increment as i64;
                self.process_pending_data_frames().await;
            }
            Frame::GoAway(frame) => self.handle_goaway_frame(frame),
            other => {
                self.connection_error(
                    ERROR_PROTOCOL_ERROR,
                    &format!("received {} frame with stream identifier 0x00", other.type_name()),
                )
                .await;
            }
        }
    }

    async fn handle_settings_frame(&mut self, frame: SettingsFrame) {
        if frame.ack {
            // Empty by codec guarantee; nothing to apply.
            return;
        }
        for (id, value) in &frame.settings {
            match *id {
                SETTINGS_MAX_FRAME_SIZE => self.settings.peer_max_frame_size = *value,
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    // The delta applies retroactively to every open stream
                    // (RFC 7540 §6.9.2); windows may go transiently negative.
                    let delta = *value as i64 - self.settings.initial_send_window;
                    self.settings.initial_send_window = *value as i64;
                    for stream in self.streams.values_mut() {
                        stream.adjust_send_window(delta);
                    }
                }
                _ => {}
            }
        }
        self.write_frame(Frame::Settings(SettingsFrame {
            ack: true,
            settings: vec![],
        }))
        .await;
        self.process_pending_data_frames().await;
    }

    fn handle_goaway_frame(&mut self, frame: GoAwayFrame) {
        self.goaway_received = true;
        // Streams past the peer's high-water mark will never be processed.
        let rejected: Vec<u32> = self
            .streams
            .iter()
            .filter(|(id, _)| **id % 2 == 1 && **id > frame.last_stream_id)
            .map(|(id, _)| *id)
            .collect();
        for id in rejected {
            if let Some(mut stream) = self.streams.remove(&id) {
                stream.fail(ClientError::ConnectionClosed);
            }
            self.promised_paths.retain(|_, promised| *promised != id);
        }
        if self.streams.is_empty() {
            self.shutdown = true;
        }
    }

    async fn handle_frame_for_stream(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        match frame {
            Frame::PushPromise(frame) => self.handle_push_promise_frame(frame).await,
            Frame::Data(frame) => self.handle_data_frame(frame).await,
            Frame::RstStream(frame) => {
                if !self.streams.contains_key(&stream_id) {
                    if !self.stream_was_closed(stream_id) {
                        self.connection_error(
                            ERROR_PROTOCOL_ERROR,
                            &format!("received RST_STREAM for stream {} in idle state", stream_id),
                        )
                        .await;
                    }
                    return;
                }
                self.deliver_to_stream(Frame::RstStream(frame)).await;
            }
            Frame::WindowUpdate(frame) => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    let _ = stream.receive_frame(Frame::WindowUpdate(frame));
                    let ready = stream.process_pending_data_frames(&mut self.send_window);
                    for ready_frame in ready {
                        self.write_frame(ready_frame).await;
                    }
                    self.cleanup_stream(stream_id);
                }
                // Unknown stream: grace for recently closed streams.
            }
            Frame::Priority(_) => {}
            other => {
                if !self.streams.contains_key(&stream_id) {
                    if self.stream_was_closed(stream_id) {
                        return;
                    }
                    self.connection_error(
                        ERROR_PROTOCOL_ERROR,
                        &format!(
                            "received {} frame for idle stream {}",
                            other.type_name(),
                            stream_id
                        ),
                    )
                    .await;
                    return;
                }
                self.deliver_to_stream(other).await;
            }
        }
    }

    /// Connection-level receive accounting runs before the stream sees the
    /// payload; both levels replenish with the same hysteresis. The
    /// low-water mark is one frame of our own advertised inbound limit
    /// (we never renegotiate SETTINGS_MAX_FRAME_SIZE), not the peer's.
    async fn handle_data_frame(&mut self, frame: DataFrame) {
        let low_water = DEFAULT_MAX_FRAME_SIZE as i64;
        self.receive_window -= frame.data.len() as i64;
        if self.receive_window < low_water {
            let increment = DEFAULT_INITIAL_WINDOW_SIZE - self.receive_window;
            self.receive_window += increment;
            self.write_frame(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: 0,
                increment: increment as u32,
            }))
            .await;
        }
        let stream_id = frame.stream_id;
        if !self.streams.contains_key(&stream_id) {
            if !self.stream_was_closed(stream_id) {
                self.connection_error(
                    ERROR_PROTOCOL_ERROR,
                    &format!("received DATA frame for idle stream {}", stream_id),
                )
                .await;
            }
            return;
        }
        self.deliver_to_stream(Frame::Data(frame)).await;
    }

    async fn handle_push_promise_frame(&mut self, frame: PushPromiseFrame) {
        let parent_issue = match self.streams.get(&frame.stream_id) {
            None => Some(format!(
                "received PUSH_PROMISE frame for non-existing stream {}",
                frame.stream_id
            )),
            // The RFC permits PUSH_PROMISE on a stream that is open or
            // half-closed (remote) from the sender's side; seen from here
            // that is open or half-closed (local).
            Some(parent)
                if !matches!(
                    parent.state(),
                    StreamState::Open | StreamState::HalfClosedLocal
                ) =>
            {
                Some(format!(
                    "received PUSH_PROMISE frame for stream {} in state {}",
                    frame.stream_id,
                    parent.state().as_str()
                ))
            }
            Some(_) => None,
        };
        if let Some(message) = parent_issue {
            self.connection_error(ERROR_PROTOCOL_ERROR, &message).await;
            return;
        }
        // Server-initiated stream ids must be even and strictly increasing
        // (RFC 7540 §5.1.1); a violation is a connection error.
        if frame.promised_stream_id % 2 != 0 {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                &format!(
                    "received PUSH_PROMISE with odd promised stream {}",
                    frame.promised_stream_id
                ),
            )
            .await;
            return;
        }
        if frame.promised_stream_id <= self.highest_promised_stream_id {
            self.connection_error(
                ERROR_PROTOCOL_ERROR,
                &format!(
                    "received PUSH_PROMISE with non-increasing promised stream {}",
                    frame.promised_stream_id
                ),
            )
            .await;
            return;
        }

        let method = find_header(&frame.headers, ":method");
        let path = find_header(&frame.headers, ":path");
        let mut promised = Stream::new(
            frame.promised_stream_id,
            self.settings.initial_send_window,
            self.settings.initial_receive_window,
        );
        let reserve = promised.reserve_remote(
            method.as_deref().and_then(Method::parse),
            path.clone(),
        );
        debug_assert!(reserve.is_ok(), "new stream starts idle");
        self.streams.insert(frame.promised_stream_id, promised);
        self.highest_promised_stream_id = frame.promised_stream_id;

        if method.as_deref() != Some("GET") {
            let reset = self
                .streams
                .get_mut(&frame.promised_stream_id)
                .and_then(|stream| stream.close_with_error(ERROR_REFUSED_STREAM));
            if let Some(reset) = reset {
                self.write_frame(reset).await;
            }
            self.cleanup_stream(frame.promised_stream_id);
            return;
        }
        if let Some(path) = path {
            self.promised_paths.insert(path, frame.promised_stream_id);
        }
    }

    async fn deliver_to_stream(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let low_water = DEFAULT_MAX_FRAME_SIZE as i64;
        let mut violation = None;
        let mut window_update = None;
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Err(v) = stream.receive_frame(frame) {
                violation = Some(v);
            } else {
                window_update = stream.maybe_window_update(low_water);
            }
        }
        if let Some(v) = violation {
            self.connection_error(v.error_code, &v.message).await;
            return;
        }
        if let Some(update) = window_update {
            self.write_frame(update).await;
        }
        self.cleanup_stream(stream_id);
    }

    /// True if the id belongs to a stream we once had and already dropped;
    /// frames racing our close get a grace pass instead of an error.
    fn stream_was_closed(&self, stream_id: u32) -> bool {
        if stream_id % 2 == 1 {
            stream_id < self.next_stream_id
        } else {
            stream_id <= self.highest_promised_stream_id
        }
    }

    // ── Flow control and housekeeping ─────────────────────────────────

    /// Re-check every stream's pending DATA queue. Invoked once per loop
    /// tick and whenever a window is replenished.
    pub async fn process_pending_data_frames(&mut self) {
        let ids: Vec<u32> = self.streams.keys().copied().collect();
        for id in ids {
            let ready = match self.streams.get_mut(&id) {
                Some(stream) if stream.has_pending_data() => {
                    stream.process_pending_data_frames(&mut self.send_window)
                }
                _ => continue,
            };
            for frame in ready {
                self.write_frame(frame).await;
            }
            self.cleanup_stream(id);
        }
    }

    /// Drop a stream once it is closed, drained and delivered. Cached push
    /// streams stay; their eviction happens on adoption or reset.
    fn cleanup_stream(&mut self, stream_id: u32) {
        let finished = self
            .streams
            .get(&stream_id)
            .map(|stream| stream.is_finished())
            .unwrap_or(false);
        if finished {
            self.streams.remove(&stream_id);
            self.promised_paths.retain(|_, promised| *promised != stream_id);
        }
        if self.goaway_received && self.streams.is_empty() {
            self.shutdown = true;
        }
    }

    /// Connection-fatal: report the highest processed inbound stream in a
    /// GOAWAY, then stop writing. The loop fails outstanding work.
    pub async fn connection_error(&mut self, error_code: u32, message: &str) {
        self.write_frame(Frame::GoAway(GoAwayFrame {
            last_stream_id: self.highest_processed_stream_id,
            error_code,
            debug_data: Bytes::copy_from_slice(message.as_bytes()),
        }))
        .await;
        self.shutdown = true;
    }

    /// Terminal sweep: every stream command and pending ping fails.
    pub fn fail_all_outstanding(&mut self, err: ClientError) {
        for (_, mut stream) in std::mem::take(&mut self.streams) {
            stream.fail(err.clone());
        }
        for (_, mut ping) in self.pending_pings.drain() {
            ping.completion.complete_with_error(err.clone());
        }
        self.promised_paths.clear();
    }
}

/// Split a request body into DATA frames no larger than the peer's
/// MAX_FRAME_SIZE; END_STREAM rides only on the last fragment.
fn fragment_body(stream_id: u32, body: Vec<u8>, max_frame_size: u32) -> Vec<DataFrame> {
    let chunk_size = (max_frame_size as usize).max(1);
    let mut data = Bytes::from(body);
    let mut frames = Vec::new();
    loop {
        if data.len() <= chunk_size {
            frames.push(DataFrame {
                stream_id,
                end_stream: true,
                data,
            });
            return frames;
        }
        frames.push(DataFrame {
            stream_id,
            end_stream: false,
            data: data.split_to(chunk_size),
        });
    }
}

fn find_header(headers: &[crate::hpack::Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_respects_max_frame_size() {
        let frames = fragment_body(1, b"ABCDEFGH".to_vec(), 4);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0].data[..], b"ABCD");
        assert!(!frames[0].end_stream);
        assert_eq!(&frames[1].data[..], b"EFGH");
        assert!(frames[1].end_stream);
    }

    #[test]
    fn short_body_is_a_single_final_frame() {
        let frames = fragment_body(1, b"hi".to_vec(), 16_384);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].end_stream);
    }

    #[test]
    fn empty_body_still_carries_end_stream() {
        let frames = fragment_body(1, Vec::new(), 16_384);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.is_empty());
        assert!(frames[0].end_stream);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let frames = fragment_body(1, b"ABCDEFGH".to_vec(), 8);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].end_stream);
    }
}
