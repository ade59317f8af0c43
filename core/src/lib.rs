/*
 * lib.rs
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

//! Staffetta: a scriptable HTTP/2 client.
//!
//! One connection per client, driven by an event loop that owns all
//! connection state, with a dedicated reader task feeding it decoded
//! frames. Our own framing and HPACK (no external h2 crate); TLS via
//! tokio-rustls with ALPN `h2`, certificate verification deliberately
//! disabled (development/test tool).
//!
//! - [`client::Http2Client`] — connect, GET/PUT/POST, ping, monitoring.
//! - [`eventloop`] — the loop and reader tasks behind a [`eventloop::Loop`] handle.
//! - [`frames`] / [`hpack`] — wire codec and compression contexts.
//! - [`stream`] — per-stream state machine and flow control.

pub mod client;
pub mod command;
mod connection;
pub mod error;
pub mod eventloop;
pub mod frames;
pub mod hpack;
mod net;
pub mod stream;

pub use client::Http2Client;
pub use command::{HttpRequest, HttpResponse, Method};
pub use error::ClientError;
pub use hpack::Header;
