/*
 * decoder.rs
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

//! HPACK decoder (RFC 7541). Decodes header block fragments into header
//! lists, maintaining the connection-global dynamic table.
//!
//! The decoding context is stateful and must see fragments in the exact
//! order they crossed the wire, across all streams.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io;

use super::huffman;
use super::static_table::{STATIC_TABLE, STATIC_TABLE_SIZE};
use super::{entry_size, Header};

/// HPACK decoding context: static table plus one dynamic table.
pub struct Decoder {
    /// Upper bound from our SETTINGS_HEADER_TABLE_SIZE; a table size update
    /// above this is a compression error.
    header_table_size: usize,
    dynamic_table: VecDeque<Header>,
    max_size: usize,
}

impl Decoder {
    pub fn new(header_table_size: usize) -> Self {
        Self {
            header_table_size,
            dynamic_table: VecDeque::new(),
            max_size: header_table_size,
        }
    }

    /// Decode one header block fragment.
    pub fn decode(&mut self, mut buf: Bytes) -> io::Result<Vec<Header>> {
        let mut headers = Vec::new();
        while buf.has_remaining() {
            let b = buf.get_u8();
            if (b & 0x80) != 0 {
                // Indexed header field (7-bit index)
                let index = decode_integer(&mut buf, b, 7)?;
                if index == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "HPACK indexed header index 0",
                    ));
                }
                headers.push(self.get_indexed(index)?);
            } else if (b & 0x40) != 0 {
                // Literal with incremental indexing (6-bit index)
                let header = self.get_literal(&mut buf, b, 6)?;
                self.add_to_dynamic(header.clone());
                headers.push(header);
            } else if (b & 0x20) != 0 {
                // Dynamic table size update (5-bit)
                let max_size = decode_integer(&mut buf, b, 5)? as usize;
                if max_size > self.header_table_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "HPACK dynamic table size exceeds SETTINGS",
                    ));
                }
                self.evict_to(max_size);
                self.max_size = max_size;
            } else {
                // Literal without indexing (0x0) or never indexed (0x1), 4-bit index
                headers.push(self.get_literal(&mut buf, b, 4)?);
            }
        }
        Ok(headers)
    }

    fn get_indexed(&self, index: u64) -> io::Result<Header> {
        if index < STATIC_TABLE_SIZE as u64 {
            let (name, value) = STATIC_TABLE[index as usize];
            Ok(Header::new(name, value.unwrap_or("")))
        } else {
            let dyn_index = (index - STATIC_TABLE_SIZE as u64) as usize;
            self.dynamic_table.get(dyn_index).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "HPACK index out of range")
            })
        }
    }

    fn get_literal(&self, buf: &mut Bytes, opcode: u8, nbits: u8) -> io::Result<Header> {
        let index = decode_integer(buf, opcode, nbits)?;
        let name = if index == 0 {
            decode_string(buf)?
        } else {
            self.get_indexed(index)?.name
        };
        let value = decode_string(buf)?;
        Ok(Header { name, value })
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

    fn evict_to(&mut self, max: usize) {
        while self.dynamic_size() > max && !self.dynamic_table.is_empty() {
            self.dynamic_table.pop_back();
        }
    }
}

fn decode_integer(buf: &mut Bytes, opcode: u8, nbits: u8) -> io::Result<u64> {
    let nmask = (1u64 << nbits) - 1;
    let mut value = (opcode & (nmask as u8)) as u64;
    if value < nmask {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "HPACK integer truncated",
            ));
        }
        let b = buf.get_u8();
        value += ((b & 0x7f) as u64) << shift;
        if (b & 0x80) == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "HPACK integer too large",
            ));
        }
    }
    Ok(value)
}

fn decode_string(buf: &mut Bytes) -> io::Result<String> {
    if !buf.has_remaining() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "HPACK string length truncated",
        ));
    }
    let b = buf.get_u8();
    let huffman_coded = (b & 0x80) != 0;
    let len = decode_integer(buf, b, 7)? as usize;
    if buf.remaining() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "HPACK string truncated",
        ));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    if huffman_coded {
        bytes = huffman::decode(&bytes)?;
    }
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "HPACK string not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    #[test]
    fn indexed_static_fields() {
        // :method GET (2), :path / (4), :scheme https (7)
        let mut decoder = Decoder::new(4096);
        let headers = decoder.decode(bytes(&[0x82, 0x84, 0x87])).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], Header::new(":method", "GET"));
        assert_eq!(headers[1], Header::new(":path", "/"));
        assert_eq!(headers[2], Header::new(":scheme", "https"));
    }

    #[test]
    fn literal_with_incremental_indexing_enters_dynamic_table() {
        // RFC 7541 C.2.1: custom-key: custom-header
        let mut decoder = Decoder::new(4096);
        let block: &[u8] = &[
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c',
            b'u', b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
        ];
        let headers = decoder.decode(bytes(block)).unwrap();
        assert_eq!(headers, vec![Header::new("custom-key", "custom-header")]);
        // Index 62 now refers to the new entry.
        let headers = decoder.decode(bytes(&[0xbe])).unwrap();
        assert_eq!(headers, vec![Header::new("custom-key", "custom-header")]);
    }

    #[test]
    fn literal_without_indexing_is_not_remembered() {
        // RFC 7541 C.2.2: :path /sample/path, literal without indexing
        let mut decoder = Decoder::new(4096);
        let block: &[u8] = &[
            0x04, 0x0c, b'/', b's', b'a', b'm', b'p', b'l', b'e', b'/', b'p', b'a', b't', b'h',
        ];
        let headers = decoder.decode(bytes(block)).unwrap();
        assert_eq!(headers, vec![Header::new(":path", "/sample/path")]);
        // Nothing was indexed: 62 is out of range.
        assert!(decoder.decode(bytes(&[0xbe])).is_err());
    }

    #[test]
    fn huffman_coded_literal() {
        // RFC 7541 C.4.1: :authority www.example.com (Huffman)
        let mut decoder = Decoder::new(4096);
        let block: &[u8] = &[
            0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        let headers = decoder.decode(bytes(block)).unwrap();
        assert_eq!(headers, vec![Header::new(":authority", "www.example.com")]);
    }

    #[test]
    fn table_size_update_above_settings_is_rejected() {
        let mut decoder = Decoder::new(4096);
        // 0x3f + continuation: update to 4097
        let err = decoder.decode(bytes(&[0x3f, 0xe2, 0x1f])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn index_zero_is_rejected() {
        let mut decoder = Decoder::new(4096);
        assert!(decoder.decode(bytes(&[0x80])).is_err());
    }

    #[test]
    fn multi_byte_integer() {
        // RFC 7541 C.1.2: 1337 with a 5-bit prefix encodes as 1f 9a 0a.
        let mut buf = bytes(&[0x9a, 0x0a]);
        assert_eq!(decode_integer(&mut buf, 0x1f, 5).unwrap(), 1337);
        // A value that fits the prefix consumes nothing further.
        let mut buf = bytes(&[0xff]);
        assert_eq!(decode_integer(&mut buf, 0x0a, 5).unwrap(), 10);
        assert_eq!(buf.remaining(), 1);
    }
}
