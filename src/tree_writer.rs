//! Tree serialization to the MMDB file layout
//!
//! Walks the trie once to number nodes and encode leaf records, picks the
//! narrowest record size that can address every node and data offset, and
//! assembles the final image: node records, 16-byte separator, data
//! section, metadata marker, metadata map.

use std::collections::HashMap;

use log::debug;
use rustc_hash::FxHashMap;

use crate::data_section::{DataEncoder, DataValue, FloatKind, IntKind};
use crate::error::{Result, WriterError};
use crate::tree::{PrefixTree, Slot};

/// MMDB metadata marker: `"\xAB\xCD\xEFMaxMind.com"`
///
/// Readers find the metadata map by scanning backward from end of file for
/// this sequence.
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// 24-bit records (6 bytes per node)
    Bits24,
    /// 28-bit records (7 bytes per node)
    Bits28,
    /// 32-bit records (8 bytes per node)
    Bits32,
}

impl RecordSize {
    /// Size of a node (two records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits, as stored in metadata
    pub fn bits(self) -> u16 {
        match self {
            RecordSize::Bits24 => 24,
            RecordSize::Bits28 => 28,
            RecordSize::Bits32 => 32,
        }
    }

    /// Narrowest size whose records can represent every value below
    /// `max_id`
    pub fn for_max_id(max_id: u64) -> Result<Self> {
        let bit_count = 64 - (max_id.saturating_sub(1)).leading_zeros();
        if bit_count <= 24 {
            Ok(RecordSize::Bits24)
        } else if bit_count <= 28 {
            Ok(RecordSize::Bits28)
        } else if bit_count <= 32 {
            Ok(RecordSize::Bits32)
        } else {
            Err(WriterError::Capacity(format!(
                "tree requires {}-bit records, the format stops at 32",
                bit_count
            )))
        }
    }
}

/// One-shot serializer for a prefix tree plus caller metadata
///
/// `node_count` and `record_size` are computed here and injected into the
/// metadata map before it is encoded.
pub(crate) struct TreeSerializer<'a> {
    tree: &'a PrefixTree,
    meta: HashMap<String, DataValue>,
    encoder: DataEncoder,
    /// Arena node id -> enumeration index (root first, left before right)
    node_idx: FxHashMap<u32, u32>,
    /// Leaf id -> separator-relative offset of its record bytes
    leaf_offset: FxHashMap<u32, u32>,
    /// Arena node ids in enumeration order
    node_list: Vec<u32>,
}

impl<'a> TreeSerializer<'a> {
    pub(crate) fn new(
        tree: &'a PrefixTree,
        meta: HashMap<String, DataValue>,
        int_type: IntKind,
        float_type: FloatKind,
    ) -> Self {
        Self {
            tree,
            meta,
            encoder: DataEncoder::new(int_type, float_type),
            node_idx: FxHashMap::default(),
            leaf_offset: FxHashMap::default(),
            node_list: Vec::new(),
        }
    }

    /// Serialize to a complete MMDB file image
    pub(crate) fn to_vec(mut self) -> Result<Vec<u8>> {
        self.enumerate(Slot::Node(PrefixTree::ROOT))?;

        let node_count = self.node_list.len() as u32;
        let data_len = self.encoder.len() as u64;
        let max_id = node_count as u64 + data_len + 16 + 1;
        let record_size = RecordSize::for_max_id(max_id)?;
        debug!(
            "serializing tree: {} nodes, {}-bit records, {} data bytes",
            node_count,
            record_size.bits(),
            data_len
        );

        let mut out =
            Vec::with_capacity(self.node_list.len() * record_size.node_bytes() + data_len as usize);
        for &node_id in &self.node_list {
            let node = self.tree.node(node_id);
            let left = self.record_value(node.children[0], node_count);
            let right = self.record_value(node.children[1], node_count);
            match record_size {
                RecordSize::Bits24 => write_node_24(&mut out, left, right),
                RecordSize::Bits28 => write_node_28(&mut out, left, right),
                RecordSize::Bits32 => write_node_32(&mut out, left, right),
            }
        }

        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(self.encoder.bytes());
        out.extend_from_slice(METADATA_MARKER);

        self.meta
            .insert("node_count".to_string(), DataValue::Int(node_count as i128));
        self.meta.insert(
            "record_size".to_string(),
            DataValue::Int(record_size.bits() as i128),
        );
        out.extend_from_slice(&DataEncoder::encode_meta(&self.meta)?);
        Ok(out)
    }

    /// Pre-order walk: number nodes on first visit, encode each distinct
    /// leaf's record and remember where its bytes begin
    fn enumerate(&mut self, slot: Slot) -> Result<()> {
        match slot {
            Slot::Node(id) => {
                if !self.node_idx.contains_key(&id) {
                    self.node_idx.insert(id, self.node_list.len() as u32);
                    self.node_list.push(id);
                    let node = self.tree.node(id);
                    let (left, right) = (node.children[0], node.children[1]);
                    self.enumerate(left)?;
                    self.enumerate(right)?;
                }
            }
            Slot::Leaf(id) => {
                if !self.leaf_offset.contains_key(&id) {
                    let entry = self.encoder.encode(self.tree.leaf_value(id))?;
                    // Offsets in node records are relative to the start of
                    // the 16-byte separator.
                    self.leaf_offset.insert(id, entry.offset + 16);
                }
            }
            Slot::Empty => {}
        }
        Ok(())
    }

    /// Record value for a child slot: the empty sentinel, a node index, or
    /// a data-section offset biased past the node range
    fn record_value(&self, slot: Slot, node_count: u32) -> u32 {
        match slot {
            Slot::Empty => node_count,
            Slot::Node(id) => self.node_idx[&id],
            Slot::Leaf(id) => node_count + self.leaf_offset[&id],
        }
    }
}

/// 24-bit node: left and right as 3 bytes big-endian each
fn write_node_24(out: &mut Vec<u8>, left: u32, right: u32) {
    out.extend_from_slice(&left.to_be_bytes()[1..]);
    out.extend_from_slice(&right.to_be_bytes()[1..]);
}

/// 28-bit node: low 24 bits of left, a byte packing both high nibbles,
/// low 24 bits of right
fn write_node_28(out: &mut Vec<u8>, left: u32, right: u32) {
    out.extend_from_slice(&left.to_be_bytes()[1..]);
    out.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
    out.extend_from_slice(&right.to_be_bytes()[1..]);
}

/// 32-bit node: left and right as 4 bytes big-endian each
fn write_node_32(out: &mut Vec<u8>, left: u32, right: u32) {
    out.extend_from_slice(&left.to_be_bytes());
    out.extend_from_slice(&right.to_be_bytes());
}
