/*
 * client.rs
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

//! Client facade: holds the loop handle and the user's custom header set,
//! completes request paths against the current connection, and renders
//! responses and monitoring snapshots as text.

use std::time::Duration;

use url::Url;

use crate::command::{
    HttpCommand, HttpRequest, Method, MonitoringCommand, MonitoringResponse, PingCommand,
};
use crate::error::ClientError;
use crate::eventloop::{self, Loop};
use crate::frames::{Frame, FrameFilter};
use crate::hpack::Header;
use crate::stream::StreamState;

/// Timeout for the short administrative commands (ping, monitoring).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// One HTTP/2 client, driving at most one server connection at a time.
///
/// Frame filters must be registered before `connect`; they are handed to
/// the connection tasks at establishment.
pub struct Http2Client {
    loop_handle: Option<Loop>,
    custom_headers: Vec<Header>,
    incoming_filters: Vec<FrameFilter>,
    outgoing_filters: Vec<FrameFilter>,
}

impl Http2Client {
    pub fn new() -> Self {
        Self {
            loop_handle: None,
            custom_headers: Vec::new(),
            incoming_filters: Vec::new(),
            outgoing_filters: Vec::new(),
        }
    }

    /// The filter runs on the reader task immediately after a frame is
    /// decoded. It can inspect or substitute the frame.
    pub fn add_filter_for_incoming_frames(
        &mut self,
        filter: impl Fn(Frame) -> Frame + Send + 'static,
    ) {
        self.incoming_filters.push(Box::new(filter));
    }

    /// The filter runs on the loop task immediately before a frame is
    /// encoded. It can inspect or substitute the frame.
    pub fn add_filter_for_outgoing_frames(
        &mut self,
        filter: impl Fn(Frame) -> Frame + Send + 'static,
    ) {
        self.outgoing_filters.push(Box::new(filter));
    }

    pub fn is_connected(&self) -> bool {
        self.loop_handle
            .as_ref()
            .map(|l| !l.is_terminated())
            .unwrap_or(false)
    }

    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        if let Some(l) = self.loop_handle.as_ref() {
            if !l.is_terminated() {
                return Err(ClientError::AlreadyConnected {
                    host: l.host.clone(),
                    port: l.port,
                });
            }
        }
        let incoming = std::mem::take(&mut self.incoming_filters);
        let outgoing = std::mem::take(&mut self.outgoing_filters);
        let loop_handle = eventloop::start(host, port, incoming, outgoing).await?;
        self.loop_handle = Some(loop_handle);
        Ok(())
    }

    /// Stop the event loop. Outstanding commands fail with ConnectionClosed.
    pub fn disconnect(&mut self) {
        if let Some(l) = self.loop_handle.take() {
            l.shutdown();
        }
    }

    pub async fn get(
        &mut self,
        path: &str,
        include_headers: bool,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.request(Method::Get, path, None, include_headers, timeout)
            .await
    }

    pub async fn put(
        &mut self,
        path: &str,
        data: Vec<u8>,
        include_headers: bool,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.request(Method::Put, path, Some(data), include_headers, timeout)
            .await
    }

    pub async fn post(
        &mut self,
        path: &str,
        data: Vec<u8>,
        include_headers: bool,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.request(Method::Post, path, Some(data), include_headers, timeout)
            .await
    }

    async fn request(
        &mut self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        include_headers: bool,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let url = self.complete_url(path)?;
        if !self.is_connected() {
            let host = url
                .host_str()
                .ok_or_else(|| ClientError::NotConnected)?
                .to_string();
            let port = url.port().unwrap_or(443);
            self.connect(&host, port).await?;
        }
        self.check_url_matches_connection(&url)?;

        let loop_handle = self.loop_handle.as_ref().ok_or(ClientError::NotConnected)?;
        let mut request = HttpRequest::new(
            method,
            "https",
            authority_string(&url_host(&url)?, url.port().unwrap_or(443)),
            path_and_query(&url),
        );
        for header in &self.custom_headers {
            request.add_header(header.name.clone(), header.value.clone());
        }
        if let Some(body) = body {
            request.set_body(body);
        }

        let (cmd, handle) = HttpCommand::new(request);
        loop_handle.submit_http(cmd)?;
        let response = handle.await_completion(timeout).await?;

        let mut result = String::new();
        if include_headers {
            for header in &response.headers {
                result.push_str(&header.name);
                result.push_str(": ");
                result.push_str(&header.value);
                result.push('\n');
            }
        }
        result.push_str(&String::from_utf8_lossy(&response.body));
        Ok(result)
    }

    pub async fn ping_once(&mut self) -> Result<(), ClientError> {
        let loop_handle = self.connected_loop()?;
        let (cmd, handle) = PingCommand::new();
        loop_handle.submit_ping(cmd)?;
        handle.await_completion(CONTROL_TIMEOUT).await
    }

    /// One line per active stream: `id: METHOD path state`.
    pub async fn stream_info(&mut self, include_closed: bool) -> Result<String, ClientError> {
        let snapshot = self.monitoring_snapshot().await?;
        let mut lines = Vec::new();
        for info in &snapshot.streams {
            if info.state == StreamState::Closed && !include_closed {
                continue;
            }
            let mut line = format!(
                "{}: {} {} {}",
                info.stream_id,
                info.method.map(|m| m.as_str()).unwrap_or(""),
                info.path.as_deref().unwrap_or(""),
                info.state.as_str()
            );
            if info.is_cached_push_promise {
                line.push_str(" (cached push promise)");
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// The paths with an unconsumed push-promise commitment.
    pub async fn push_list(&mut self) -> Result<String, ClientError> {
        let snapshot = self.monitoring_snapshot().await?;
        let lines: Vec<String> = snapshot
            .streams
            .iter()
            .filter(|info| info.is_cached_push_promise)
            .filter_map(|info| info.path.clone())
            .collect();
        Ok(lines.join("\n"))
    }

    async fn monitoring_snapshot(&mut self) -> Result<MonitoringResponse, ClientError> {
        let loop_handle = self.connected_loop()?;
        let (cmd, handle) = MonitoringCommand::new();
        loop_handle.submit_monitoring(cmd)?;
        handle.await_completion(CONTROL_TIMEOUT).await
    }

    /// Add a header sent with every subsequent request. `"Content-Type:"`
    /// becomes `content-type`.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.custom_headers
            .push(Header::new(normalize_header_name(name), value));
    }

    /// Remove custom headers by name, or by name and value.
    pub fn unset_header(&mut self, name: &str, value: Option<&str>) {
        let name = normalize_header_name(name);
        self.custom_headers.retain(|h| {
            h.name != name || value.map(|v| h.value != v).unwrap_or(false)
        });
    }

    fn connected_loop(&self) -> Result<&Loop, ClientError> {
        match self.loop_handle.as_ref() {
            Some(l) if !l.is_terminated() => Ok(l),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// A bare path is completed against the current connection; an absolute
    /// URL stands alone.
    fn complete_url(&self, path: &str) -> Result<Url, ClientError> {
        if path.contains("://") {
            let url = Url::parse(path).map_err(|_| ClientError::InvalidUrl(path.to_string()))?;
            if url.scheme() != "https" {
                return Err(ClientError::InvalidUrl(path.to_string()));
            }
            return Ok(url);
        }
        let loop_handle = self.connected_loop()?;
        let base = Url::parse(&format!(
            "https://{}",
            authority_string(&loop_handle.host, loop_handle.port)
        ))
        .map_err(|_| ClientError::InvalidUrl(path.to_string()))?;
        base.join(path)
            .map_err(|_| ClientError::InvalidUrl(path.to_string()))
    }

    fn check_url_matches_connection(&self, url: &Url) -> Result<(), ClientError> {
        let loop_handle = self.connected_loop()?;
        let host = url_host(url)?;
        if host != loop_handle.host || url.port().unwrap_or(443) != loop_handle.port {
            return Err(ClientError::UrlMismatch {
                requested: format!("https://{}", authority_string(&host, url.port().unwrap_or(443))),
                connected: format!(
                    "https://{}",
                    authority_string(&loop_handle.host, loop_handle.port)
                ),
            });
        }
        Ok(())
    }
}

impl Default for Http2Client {
    fn default() -> Self {
        Self::new()
    }
}

fn url_host(url: &Url) -> Result<String, ClientError> {
    url.host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| ClientError::InvalidUrl(url.to_string()))
}

/// `host` or `host:port` when the port is not the https default.
fn authority_string(host: &str, port: u16) -> String {
    if port == 443 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// `"Content-Type:"` -> `content-type`.
fn normalize_header_name(name: &str) -> String {
    name.trim_end_matches(':').to_ascii_lowercase()
}
