//! Shared test support: a minimal MMDB reader
//!
//! Just enough of the read side to verify what the writer produced:
//! locate the metadata, walk the search tree for an address, and decode
//! data-section values following pointers. Panics on malformed input, as
//! test support should.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;

use mmdb_writer::DataValue;

const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// A parsed MMDB image
pub struct Mmdb {
    buf: Vec<u8>,
    pub node_count: u32,
    pub record_size: u16,
    pub ip_version: u16,
    pub metadata: HashMap<String, DataValue>,
    /// Absolute offset of the data section (after tree + separator)
    data_start: usize,
}

impl Mmdb {
    pub fn open(buf: Vec<u8>) -> Self {
        let marker_pos = find_marker(&buf);
        let mut cursor = marker_pos + METADATA_MARKER.len();
        // Metadata contains no pointers, so the data-section base is
        // irrelevant while decoding it.
        let metadata = match decode_at(&buf, &mut cursor, 0) {
            DataValue::Map(m) => m,
            other => panic!("metadata is not a map: {:?}", other),
        };

        let node_count = match metadata["node_count"] {
            DataValue::Uint32(n) => n,
            ref other => panic!("bad node_count: {:?}", other),
        };
        let record_size = match metadata["record_size"] {
            DataValue::Uint16(n) => n,
            ref other => panic!("bad record_size: {:?}", other),
        };
        let ip_version = match metadata["ip_version"] {
            DataValue::Uint16(n) => n,
            ref other => panic!("bad ip_version: {:?}", other),
        };

        let tree_size = node_count as usize * record_size as usize * 2 / 8;
        Self {
            buf,
            node_count,
            record_size,
            ip_version,
            metadata,
            data_start: tree_size + 16,
        }
    }

    pub fn open_file(path: &std::path::Path) -> Self {
        Self::open(std::fs::read(path).unwrap())
    }

    /// Longest-prefix-match lookup, decoding the record if one is found
    pub fn get(&self, addr: &str) -> Option<DataValue> {
        let addr: IpAddr = addr.parse().unwrap();
        let (bits, bit_len): (u128, u32) = match addr {
            IpAddr::V4(v4) => {
                if self.ip_version == 6 {
                    // IPv4 data lives under ::/96 in an IPv6 tree.
                    (u32::from(v4) as u128, 128)
                } else {
                    (u32::from(v4) as u128, 32)
                }
            }
            IpAddr::V6(v6) => {
                assert_eq!(self.ip_version, 6, "IPv6 lookup in an IPv4 database");
                (u128::from(v6), 128)
            }
        };

        let mut node = 0u32;
        for i in 0..bit_len {
            let bit = ((bits >> (bit_len - 1 - i)) & 1) as usize;
            let record = self.read_record(node, bit);
            if record == self.node_count {
                return None;
            }
            if record > self.node_count {
                let offset = (record - self.node_count - 16) as usize;
                let mut cursor = self.data_start + offset;
                return Some(decode_at(&self.buf, &mut cursor, self.data_start));
            }
            node = record;
        }
        None
    }

    fn read_record(&self, node: u32, bit: usize) -> u32 {
        let node = node as usize;
        match self.record_size {
            24 => {
                let base = node * 6 + bit * 3;
                be_u32(&self.buf[base..base + 3])
            }
            28 => {
                let base = node * 7;
                let middle = self.buf[base + 3] as u32;
                if bit == 0 {
                    ((middle >> 4) << 24) | be_u32(&self.buf[base..base + 3])
                } else {
                    ((middle & 0x0F) << 24) | be_u32(&self.buf[base + 4..base + 7])
                }
            }
            32 => {
                let base = node * 8 + bit * 4;
                be_u32(&self.buf[base..base + 4])
            }
            other => panic!("unsupported record size {}", other),
        }
    }
}

fn find_marker(buf: &[u8]) -> usize {
    let window_start = buf.len().saturating_sub(128 * 1024);
    (window_start..buf.len() - METADATA_MARKER.len() + 1)
        .rev()
        .find(|&i| &buf[i..i + METADATA_MARKER.len()] == METADATA_MARKER)
        .expect("metadata marker not found")
}

fn be_u32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Decode the value at `cursor`, resolving pointers against `data_start`
fn decode_at(buf: &[u8], cursor: &mut usize, data_start: usize) -> DataValue {
    let ctrl = buf[*cursor];
    *cursor += 1;
    let type_id = ctrl >> 5;
    let payload = ctrl & 0x1F;

    match type_id {
        0 => {
            let ext_type = 7 + buf[*cursor];
            *cursor += 1;
            decode_extended(buf, cursor, data_start, ext_type, payload)
        }
        1 => {
            let offset = decode_pointer_offset(buf, cursor, payload);
            let mut target = data_start + offset as usize;
            decode_at(buf, &mut target, data_start)
        }
        2 => {
            let len = decode_size(buf, cursor, payload);
            let s = std::str::from_utf8(&buf[*cursor..*cursor + len]).unwrap();
            *cursor += len;
            DataValue::String(s.to_string())
        }
        3 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[*cursor..*cursor + 8]);
            *cursor += 8;
            DataValue::Double(f64::from_be_bytes(bytes))
        }
        4 => {
            let len = decode_size(buf, cursor, payload);
            let b = buf[*cursor..*cursor + len].to_vec();
            *cursor += len;
            DataValue::Bytes(b)
        }
        5 => {
            let len = decode_size(buf, cursor, payload);
            DataValue::Uint16(decode_uint(buf, cursor, len) as u16)
        }
        6 => {
            let len = decode_size(buf, cursor, payload);
            DataValue::Uint32(decode_uint(buf, cursor, len) as u32)
        }
        7 => {
            let count = decode_size(buf, cursor, payload);
            let mut map = HashMap::new();
            for _ in 0..count {
                let key = match decode_at(buf, cursor, data_start) {
                    DataValue::String(s) => s,
                    other => panic!("map key is not a string: {:?}", other),
                };
                let value = decode_at(buf, cursor, data_start);
                map.insert(key, value);
            }
            DataValue::Map(map)
        }
        _ => unreachable!(),
    }
}

fn decode_extended(
    buf: &[u8],
    cursor: &mut usize,
    data_start: usize,
    type_id: u8,
    payload: u8,
) -> DataValue {
    match type_id {
        // Int32: sign-extended from however many bytes were written
        8 => {
            let len = decode_size(buf, cursor, payload);
            let mut value = if len > 0 && buf[*cursor] & 0x80 != 0 {
                -1i32
            } else {
                0
            };
            for i in 0..len {
                value = (value << 8) | buf[*cursor + i] as i32;
            }
            *cursor += len;
            DataValue::Int32(value)
        }
        9 => {
            let len = decode_size(buf, cursor, payload);
            DataValue::Uint64(decode_uint(buf, cursor, len) as u64)
        }
        10 => {
            let len = decode_size(buf, cursor, payload);
            DataValue::Uint128(decode_uint(buf, cursor, len))
        }
        11 => {
            let count = decode_size(buf, cursor, payload);
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_at(buf, cursor, data_start));
            }
            DataValue::Array(items)
        }
        // Boolean carries its value in the length field, no payload.
        14 => DataValue::Bool(payload != 0),
        15 => {
            assert_eq!(decode_size(buf, cursor, payload), 4);
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[*cursor..*cursor + 4]);
            *cursor += 4;
            DataValue::Float32(f32::from_be_bytes(bytes))
        }
        other => panic!("unknown extended type {}", other),
    }
}

fn decode_pointer_offset(buf: &[u8], cursor: &mut usize, payload: u8) -> u32 {
    let size_bits = (payload >> 3) & 0x3;
    let low = (payload & 0x7) as u32;
    match size_bits {
        0 => {
            let b = buf[*cursor] as u32;
            *cursor += 1;
            (low << 8) | b
        }
        1 => {
            let b0 = buf[*cursor] as u32;
            let b1 = buf[*cursor + 1] as u32;
            *cursor += 2;
            2048 + ((low << 16) | (b0 << 8) | b1)
        }
        2 => {
            let b0 = buf[*cursor] as u32;
            let b1 = buf[*cursor + 1] as u32;
            let b2 = buf[*cursor + 2] as u32;
            *cursor += 3;
            526_336 + ((low << 24) | (b0 << 16) | (b1 << 8) | b2)
        }
        _ => {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[*cursor..*cursor + 4]);
            *cursor += 4;
            u32::from_be_bytes(bytes)
        }
    }
}

fn decode_uint(buf: &[u8], cursor: &mut usize, len: usize) -> u128 {
    let mut value = 0u128;
    for i in 0..len {
        value = (value << 8) | buf[*cursor + i] as u128;
    }
    *cursor += len;
    value
}

fn decode_size(buf: &[u8], cursor: &mut usize, size_bits: u8) -> usize {
    match size_bits {
        0..=28 => size_bits as usize,
        29 => {
            let size = buf[*cursor] as usize;
            *cursor += 1;
            29 + size
        }
        30 => {
            let b0 = buf[*cursor] as usize;
            let b1 = buf[*cursor + 1] as usize;
            *cursor += 2;
            285 + ((b0 << 8) | b1)
        }
        _ => {
            let b0 = buf[*cursor] as usize;
            let b1 = buf[*cursor + 1] as usize;
            let b2 = buf[*cursor + 2] as usize;
            *cursor += 3;
            65_821 + ((b0 << 16) | (b1 << 8) | b2)
        }
    }
}

/// Pull a string field out of a decoded map record
pub fn map_str<'a>(value: &'a DataValue, key: &str) -> &'a str {
    match value {
        DataValue::Map(m) => match m.get(key) {
            Some(DataValue::String(s)) => s,
            other => panic!("field {} is not a string: {:?}", key, other),
        },
        other => panic!("expected map, got {:?}", other),
    }
}
