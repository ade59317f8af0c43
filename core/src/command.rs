/*
 * command.rs
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

//! Commands submitted to the event loop, and the one-shot completion latch
//! that carries the result back to the submitter.
//!
//! Completion is writer-wins: the first `complete_*` call delivers, later
//! calls are silently ignored. A submitter timeout only detaches the wait;
//! the engine can still finalize the latch afterwards.

use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

use crate::error::ClientError;
use crate::hpack::Header;
use crate::stream::StreamState;

/// Engine-side half of a one-shot completion latch.
pub struct Completion<T> {
    tx: Option<oneshot::Sender<Result<T, ClientError>>>,
}

/// Submitter-side half: a single awaitable result slot.
pub struct CompletionHandle<T> {
    rx: oneshot::Receiver<Result<T, ClientError>>,
}

impl<T> Completion<T> {
    pub fn new() -> (Completion<T>, CompletionHandle<T>) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx: Some(tx) }, CompletionHandle { rx })
    }

    pub fn complete_successfully(&mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(value));
        }
    }

    pub fn complete_with_error(&mut self, err: ClientError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// True once either completion has been delivered.
    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

impl<T> CompletionHandle<T> {
    /// Block the submitter up to `wait`. On timeout the command may still
    /// complete later; the engine-side slot is unaffected.
    pub async fn await_completion(self, wait: Duration) -> Result<T, ClientError> {
        match timeout(wait, self.rx).await {
            Err(_) => Err(ClientError::Timeout),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Ok(Ok(result)) => result,
        }
    }
}

/// HTTP request method. GET, PUT and POST are the supported subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "PUT" => Some(Method::Put),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }
}

/// A composed request: pseudo-header inputs, custom headers (lower-cased
/// names), optional body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub headers: Vec<Header>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(
        method: Method,
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method,
            scheme: scheme.into(),
            authority: authority.into(),
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    pub fn set_body(&mut self, data: Vec<u8>) {
        self.body = Some(data);
    }

    /// Header list for the wire: pseudo-headers first, then custom headers.
    pub fn to_header_list(&self) -> Vec<Header> {
        let mut headers = vec![
            Header::new(":method", self.method.as_str()),
            Header::new(":scheme", self.scheme.as_str()),
            Header::new(":authority", self.authority.as_str()),
            Header::new(":path", self.path.as_str()),
        ];
        headers.extend(self.headers.iter().cloned());
        headers
    }
}

/// A received response: ordered headers (duplicates preserved) and body.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Status from the `:status` pseudo-header, if present and numeric.
    pub fn status(&self) -> Option<u16> {
        self.header(":status").and_then(|v| v.parse().ok())
    }

    /// First value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }
}

pub struct HttpCommand {
    pub request: HttpRequest,
    pub completion: Completion<HttpResponse>,
}

impl HttpCommand {
    pub fn new(request: HttpRequest) -> (Self, CompletionHandle<HttpResponse>) {
        let (completion, handle) = Completion::new();
        (Self { request, completion }, handle)
    }
}

pub struct PingCommand {
    pub completion: Completion<()>,
}

impl PingCommand {
    pub fn new() -> (Self, CompletionHandle<()>) {
        let (completion, handle) = Completion::new();
        (Self { completion }, handle)
    }
}

/// Point-in-time view of one stream, for the monitoring surface.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub stream_id: u32,
    pub method: Option<Method>,
    pub path: Option<String>,
    pub state: StreamState,
    pub is_cached_push_promise: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MonitoringResponse {
    pub streams: Vec<StreamSnapshot>,
}

pub struct MonitoringCommand {
    pub completion: Completion<MonitoringResponse>,
}

impl MonitoringCommand {
    pub fn new() -> (Self, CompletionHandle<MonitoringResponse>) {
        let (completion, handle) = Completion::new();
        (Self { completion }, handle)
    }
}
