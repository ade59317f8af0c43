/*
 * eventloop.rs
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

//! Event loop: the single serialization point for all connection state.
//!
//! Two tasks per connection. The loop task owns the engine (streams,
//! windows, push cache, HPACK encoder) and is the only writer. The reader
//! task owns the read half and the HPACK decoder: frames are decoded before
//! they reach the loop, so decode order matches wire order by construction.
//!
//! All interaction goes through the `Loop` handle's channels, in priority
//! order: shutdown, inbound frames, HTTP commands, ping/monitoring.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;

use crate::command::{HttpCommand, MonitoringCommand, PingCommand};
use crate::connection::Connection;
use crate::error::ClientError;
use crate::frames::{
    decode_frame, decode_header, Frame, FrameFilter, DEFAULT_MAX_FRAME_SIZE, ERROR_FRAME_SIZE_ERROR,
    FRAME_HEADER_LENGTH,
};
use crate::hpack::{Decoder, DEFAULT_HEADER_TABLE_SIZE};
use crate::net;

/// What the reader hands the loop: a decoded frame, or a decode failure
/// with the connection error code to report.
enum InboundEvent {
    Frame(Frame),
    Malformed { error_code: u32, message: String },
}

/// Handle to a running connection. All interaction is through channels;
/// liveness is probed via channel closure, like the other pipeline handles.
pub struct Loop {
    pub host: String,
    pub port: u16,
    http_tx: mpsc::UnboundedSender<HttpCommand>,
    ping_tx: mpsc::UnboundedSender<PingCommand>,
    monitoring_tx: mpsc::UnboundedSender<MonitoringCommand>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl Loop {
    pub fn is_terminated(&self) -> bool {
        self.http_tx.is_closed()
    }

    pub fn submit_http(&self, cmd: HttpCommand) -> Result<(), ClientError> {
        self.http_tx.send(cmd).map_err(|_| ClientError::NotConnected)
    }

    pub fn submit_ping(&self, cmd: PingCommand) -> Result<(), ClientError> {
        self.ping_tx.send(cmd).map_err(|_| ClientError::NotConnected)
    }

    pub fn submit_monitoring(&self, cmd: MonitoringCommand) -> Result<(), ClientError> {
        self.monitoring_tx
            .send(cmd)
            .map_err(|_| ClientError::NotConnected)
    }

    /// Ask the loop to stop. Outstanding commands fail with ConnectionClosed.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Connect over TLS (ALPN h2) and start the connection tasks.
pub async fn start(
    host: &str,
    port: u16,
    incoming_filters: Vec<FrameFilter>,
    outgoing_filters: Vec<FrameFilter>,
) -> Result<Loop, ClientError> {
    let tls = net::connect(host, port).await?;
    start_with_stream(tls, host, port, incoming_filters, outgoing_filters).await
}

/// Start the connection tasks over an already-established transport.
/// Writes the connection preface before returning.
pub async fn start_with_stream<S>(
    stream: S,
    host: &str,
    port: u16,
    incoming_filters: Vec<FrameFilter>,
    outgoing_filters: Vec<FrameFilter>,
) -> Result<Loop, ClientError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut connection = Connection::new(Box::new(write_half), outgoing_filters);
    connection.send_preface().await?;

    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (http_tx, http_rx) = mpsc::unbounded_channel();
    let (ping_tx, ping_rx) = mpsc::unbounded_channel();
    let (monitoring_tx, monitoring_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_loop(read_half, frame_tx, incoming_filters));
    tokio::spawn(run(
        connection,
        frame_rx,
        http_rx,
        ping_rx,
        monitoring_rx,
        shutdown_rx,
    ));

    Ok(Loop {
        host: host.to_string(),
        port,
        http_tx,
        ping_tx,
        monitoring_tx,
        shutdown_tx,
    })
}

/// Reader task: blocking reads of 9-byte headers and length-prefixed
/// payloads, decoded via the codec with the connection's HPACK decoding
/// context. Terminates on any read error, which closes the frame channel
/// and thereby shuts the loop down.
async fn read_loop<R>(
    mut reader: R,
    frame_tx: mpsc::UnboundedSender<InboundEvent>,
    incoming_filters: Vec<FrameFilter>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut decoder = Decoder::new(DEFAULT_HEADER_TABLE_SIZE);
    loop {
        let mut header_buf = [0u8; FRAME_HEADER_LENGTH];
        if reader.read_exact(&mut header_buf).await.is_err() {
            return;
        }
        let header = decode_header(&header_buf);
        if header.length > DEFAULT_MAX_FRAME_SIZE as usize {
            let _ = frame_tx.send(InboundEvent::Malformed {
                error_code: ERROR_FRAME_SIZE_ERROR,
                message: format!(
                    "frame size {} exceeds maximum {}",
                    header.length, DEFAULT_MAX_FRAME_SIZE
                ),
            });
            return;
        }
        let mut payload = vec![0u8; header.length];
        if reader.read_exact(&mut payload).await.is_err() {
            return;
        }
        match decode_frame(&header, Bytes::from(payload), &mut decoder) {
            Ok(Some(mut frame)) => {
                for filter in &incoming_filters {
                    frame = filter(frame);
                }
                if frame_tx.send(InboundEvent::Frame(frame)).is_err() {
                    return;
                }
            }
            // Unknown frame type: the cursor already advanced past the
            // payload, so skipping it is a no-op.
            Ok(None) => {}
            Err(e) => {
                let _ = frame_tx.send(InboundEvent::Malformed {
                    error_code: e.error_code,
                    message: e.message,
                });
                return;
            }
        }
    }
}

/// Loop task: one event per tick, then a pass over all pending DATA queues
/// (a WINDOW_UPDATE or SETTINGS may have unblocked another stream).
async fn run(
    mut connection: Connection,
    mut frame_rx: mpsc::UnboundedReceiver<InboundEvent>,
    mut http_rx: mpsc::UnboundedReceiver<HttpCommand>,
    mut ping_rx: mpsc::UnboundedReceiver<PingCommand>,
    mut monitoring_rx: mpsc::UnboundedReceiver<MonitoringCommand>,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = frame_rx.recv() => match event {
                Some(InboundEvent::Frame(frame)) => connection.handle_incoming_frame(frame).await,
                Some(InboundEvent::Malformed { error_code, message }) => {
                    connection.connection_error(error_code, &message).await;
                }
                // Reader gone: transport read error or EOF.
                None => break,
            },
            cmd = http_rx.recv() => match cmd {
                Some(cmd) => connection.handle_http_request(cmd).await,
                None => break,
            },
            cmd = ping_rx.recv() => match cmd {
                Some(cmd) => connection.handle_ping_request(cmd).await,
                None => break,
            },
            cmd = monitoring_rx.recv() => match cmd {
                Some(cmd) => connection.handle_monitoring_request(cmd),
                None => break,
            },
        }
        connection.process_pending_data_frames().await;
        if connection.is_shutdown() {
            break;
        }
    }
    connection.shutdown();
    connection.fail_all_outstanding(ClientError::ConnectionClosed);
}
