/*
 * encoder.rs
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

//! HPACK encoder (RFC 7541). Stateful context with its own dynamic table,
//! mirroring the table the peer's decoder builds from our output.
//!
//! Strategy: indexed field for full matches (static, then dynamic), literal
//! with incremental indexing otherwise. String literals use Huffman coding
//! whenever it is shorter than the raw octets.

use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;

use super::huffman;
use super::static_table;
use super::static_table::STATIC_TABLE_SIZE;
use super::{entry_size, Header};

/// HPACK encoding context. One per connection, advanced in write order.
pub struct Encoder {
    dynamic_table: VecDeque<Header>,
    max_size: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            dynamic_table: VecDeque::new(),
            max_size: 4096,
        }
    }

    /// Encode a header list as one header block.
    pub fn encode(&mut self, headers: &[Header], out: &mut BytesMut) {
        for header in headers {
            self.encode_header(header, out);
        }
    }

    fn encode_header(&mut self, header: &Header, out: &mut BytesMut) {
        if let Some(index) = self.find_full(header) {
            // Indexed header field (RFC 7541 6.1)
            encode_integer(index as u64, 7, 0x80, out);
            return;
        }
        // Literal with incremental indexing (RFC 7541 6.2.1)
        match self.find_name(&header.name) {
            Some(index) => {
                encode_integer(index as u64, 6, 0x40, out);
            }
            None => {
                out.put_u8(0x40);
                encode_string(header.name.as_bytes(), out);
            }
        }
        encode_string(header.value.as_bytes(), out);
        self.add_to_dynamic(header.clone());
    }

    fn find_full(&self, header: &Header) -> Option<usize> {
        static_table::find(&header.name, &header.value).or_else(|| {
            self.dynamic_table
                .iter()
                .position(|h| h == header)
                .map(|pos| STATIC_TABLE_SIZE + pos)
        })
    }

    fn find_name(&self, name: &str) -> Option<usize> {
        static_table::find_name(name).or_else(|| {
            self.dynamic_table
                .iter()
                .position(|h| h.name == name)
                .map(|pos| STATIC_TABLE_SIZE + pos)
        })
    }

    fn add_to_dynamic(&mut self, header: Header) {
        let size = entry_size(&header);
        while self.dynamic_size() + size > self.max_size && !self.dynamic_table.is_empty() {
            self.dynamic_table.pop_back();
        }
        if self.dynamic_size() + size <= self.max_size {
            self.dynamic_table.push_front(header);
        }
    }

    fn dynamic_size(&self) -> usize {
        self.dynamic_table.iter().map(entry_size).sum()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_string(s: &[u8], out: &mut impl BufMut) {
    if huffman::encoded_length(s) < s.len() {
        let coded = huffman::encode(s);
        encode_integer(coded.len() as u64, 7, 0x80, out);
        out.put_slice(&coded);
    } else {
        encode_integer(s.len() as u64, 7, 0, out);
        out.put_slice(s);
    }
}

fn encode_integer(mut value: u64, nbits: u8, prefix: u8, out: &mut impl BufMut) {
    let max_prefix = (1u64 << nbits) - 1;
    if value < max_prefix {
        out.put_u8(prefix | value as u8);
        return;
    }
    out.put_u8(prefix | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        out.put_u8(0x80 | (value % 128) as u8);
        value /= 128;
    }
    out.put_u8(value as u8);
}
