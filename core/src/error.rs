/*
 * error.rs
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

//! Errors observable by command submitters and the client facade.

use std::fmt;

use crate::frames::error_code_to_string;

/// Everything a submitter can see go wrong: submission-time validation,
/// per-request failures, and connection teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No connection established, or the event loop has terminated.
    NotConnected,
    /// connect() called while a connection to another endpoint is live.
    AlreadyConnected { host: String, port: u16 },
    /// The connection was torn down before the command completed.
    ConnectionClosed,
    /// The submitter's wait elapsed. The command may still complete later.
    Timeout,
    /// The stream carrying this request was reset (sent or received RST_STREAM).
    StreamReset { error_code: u32 },
    /// Request method outside GET, PUT, POST.
    UnsupportedMethod(String),
    InvalidUrl(String),
    /// Absolute URL does not match the endpoint this connection talks to.
    UrlMismatch { requested: String, connected: String },
    /// Client-initiated stream ids ran past 2^31-1.
    StreamIdsExhausted,
    /// TCP/TLS/ALPN establishment failure.
    Connect(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "Not connected. Call connect() first."),
            ClientError::AlreadyConnected { host, port } => {
                write!(f, "Already connected to {}:{}.", host, port)
            }
            ClientError::ConnectionClosed => write!(f, "Connection closed."),
            ClientError::Timeout => write!(f, "Timeout while waiting for response."),
            ClientError::StreamReset { error_code } => {
                write!(f, "Stream reset with error {}.", error_code_to_string(*error_code))
            }
            ClientError::UnsupportedMethod(method) => {
                write!(f, "Request method '{}' not supported.", method)
            }
            ClientError::InvalidUrl(url) => write!(f, "{}: invalid URL.", url),
            ClientError::UrlMismatch { requested, connected } => {
                write!(f, "Cannot query {} while connected to {}.", requested, connected)
            }
            ClientError::StreamIdsExhausted => {
                write!(f, "Client stream identifiers exhausted.")
            }
            ClientError::Connect(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_reset_names_the_code() {
        let err = ClientError::StreamReset { error_code: 0x7 };
        assert_eq!(err.to_string(), "Stream reset with error REFUSED_STREAM.");
    }

    #[test]
    fn url_mismatch_mentions_both_endpoints() {
        let err = ClientError::UrlMismatch {
            requested: "https://other:8443".into(),
            connected: "https://example:443".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("other:8443"));
        assert!(msg.contains("example:443"));
    }
}
