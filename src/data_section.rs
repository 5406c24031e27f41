//! Data section encoding for the MMDB format
//!
//! Serializes records into the MaxMind DB type-tagged byte stream and
//! maintains the pointer cache that turns repeated values into back
//! references instead of duplicated bytes.
//!
//! # Supported Types
//!
//! Complete MMDB type support:
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: Raw byte arrays
//! - **Uint16/Uint32/Uint64/Uint128**: Unsigned integers, leading-zero
//!   bytes stripped on the wire
//! - **Map**: Key-value pairs (string keys)
//! - **Int32**: Signed 32-bit integers
//! - **Array**: Ordered lists of values
//! - **Bool**: Boolean values (carried in the length field)
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! Untyped integers and floats pick their wire width through the writer's
//! [`IntKind`]/[`FloatKind`] policies.
//!
//! # Format
//!
//! Every value starts with a control byte: type (3 bits) and size/payload
//! (5 bits). Types above 7 add a second type byte, then any extra size
//! bytes follow.
//!
//! See: <https://maxmind.github.io/MaxMind-DB/>

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::error::{Result, WriterError};

/// Values with an encoded length at or above this cannot be represented by
/// the MMDB length header.
const MAX_HEADER_LENGTH: usize = 16_843_036;

/// MMDB data type identifiers
///
/// IDs 12 (data cache container) and 13 (end marker) are reserved by the
/// format and never written by this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeId {
    /// Back reference into the data section
    Pointer = 1,
    /// UTF-8 string
    String = 2,
    /// IEEE 754 double
    Double = 3,
    /// Raw bytes
    Bytes = 4,
    /// Unsigned 16-bit integer
    Uint16 = 5,
    /// Unsigned 32-bit integer
    Uint32 = 6,
    /// String-keyed map
    Map = 7,
    /// Signed 32-bit integer
    Int32 = 8,
    /// Unsigned 64-bit integer
    Uint64 = 9,
    /// Unsigned 128-bit integer
    Uint128 = 10,
    /// Ordered list
    Array = 11,
    /// Boolean, value carried in the length field
    Boolean = 14,
    /// IEEE 754 single
    Float = 15,
}

/// Wire width policy for untyped integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntKind {
    /// Narrowest unsigned type that fits; negatives become INT32
    #[default]
    Auto,
    /// Force UINT16, reject out-of-range values
    U16,
    /// Force UINT32, reject out-of-range values
    U32,
    /// Force UINT64, reject out-of-range values
    U64,
    /// Force UINT128, reject out-of-range values
    U128,
    /// Force INT32, reject out-of-range values
    I32,
}

/// Wire width policy for untyped floats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatKind {
    /// IEEE 754 single precision
    F32,
    /// IEEE 754 double precision
    #[default]
    F64,
}

/// A record value storable in the data section
///
/// `Int` and `Float` defer their wire width to the writer's policies; the
/// remaining numeric variants encode at exactly their declared width.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Boolean value
    Bool(bool),
    /// Untyped integer, width chosen by the writer's `IntKind` policy
    Int(i128),
    /// Untyped float, width chosen by the writer's `FloatKind` policy
    Float(f64),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Signed 32-bit integer
    Int32(i32),
    /// IEEE 754 single precision float
    Float32(f32),
    /// IEEE 754 double precision float
    Double(f64),
    /// Key-value map (string keys only per MMDB spec)
    Map(HashMap<String, DataValue>),
    /// Array of values
    Array(Vec<DataValue>),
}

impl serde::Serialize for DataValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Bytes(b) => serializer.serialize_bytes(b),
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Int(n) => serializer.serialize_i128(*n),
            DataValue::Float(f) => serializer.serialize_f64(*f),
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_u128(*n),
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Float32(f) => serializer.serialize_f32(*f),
            DataValue::Double(f) => serializer.serialize_f64(*f),
            DataValue::Map(m) => m.serialize(serializer),
            DataValue::Array(a) => a.serialize(serializer),
        }
    }
}

impl<'de> serde::Deserialize<'de> for DataValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct DataValueVisitor;

        impl<'de> serde::de::Visitor<'de> for DataValueVisitor {
            type Value = DataValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a valid MMDB data value")
            }

            fn visit_bool<E>(self, v: bool) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Int(v as i128))
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Int(v as i128))
            }

            fn visit_i128<E>(self, v: i128) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Int(v))
            }

            fn visit_u128<E>(self, v: u128) -> std::result::Result<DataValue, E>
            where
                E: serde::de::Error,
            {
                if v > i128::MAX as u128 {
                    Ok(DataValue::Uint128(v))
                } else {
                    Ok(DataValue::Int(v as i128))
                }
            }

            fn visit_f64<E>(self, v: f64) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Float(v))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<DataValue, E> {
                Ok(DataValue::String(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> std::result::Result<DataValue, E> {
                Ok(DataValue::String(v))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Bytes(v.to_vec()))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<DataValue, E> {
                Ok(DataValue::Bytes(v))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<DataValue, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut array = Vec::new();
                while let Some(value) = seq.next_element()? {
                    array.push(value);
                }
                Ok(DataValue::Array(array))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<DataValue, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut hash_map = HashMap::new();
                while let Some((key, value)) = map.next_entry()? {
                    hash_map.insert(key, value);
                }
                Ok(DataValue::Map(hash_map))
            }
        }

        deserializer.deserialize_any(DataValueVisitor)
    }
}

/// Location of an encoded value in the data section
///
/// `offset` is where the value's own bytes begin; `pointer` is the POINTER
/// encoding of that offset, ready for embedding in a container payload.
#[derive(Debug, Clone)]
pub struct EncodedRef {
    /// Byte offset of the value within the data section
    pub offset: u32,
    /// Encoded POINTER referencing `offset`
    pub pointer: Vec<u8>,
}

/// Data section encoder
///
/// Builds the data section by encoding values and tracking their offsets.
/// Structurally equal values are deduplicated: the first occurrence lands
/// in the buffer followed by a pointer entry referencing it (the MaxMind
/// writer cache convention), later occurrences reuse the cached pointer
/// without growing the buffer. Container payloads hold pointers to their
/// elements, so shared strings and sub-records are stored once.
pub struct DataEncoder {
    /// Encoded data section bytes
    buffer: Vec<u8>,
    /// Canonical encoding of a value -> its location in the buffer
    cache: FxHashMap<Vec<u8>, EncodedRef>,
    int_type: IntKind,
    float_type: FloatKind,
}

impl DataEncoder {
    /// Create an encoder with the given integer and float width policies
    pub fn new(int_type: IntKind, float_type: FloatKind) -> Self {
        Self {
            buffer: Vec::new(),
            cache: FxHashMap::default(),
            int_type,
            float_type,
        }
    }

    /// Current data section length in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been encoded yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrow the data section bytes accumulated so far
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the encoder, yielding the data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Encode a value, returning its location in the data section
    ///
    /// A value seen before (by structural equality, after width policy
    /// resolution) is not re-encoded; the original location is returned.
    pub fn encode(&mut self, value: &DataValue) -> Result<EncodedRef> {
        let mut canonical = Vec::new();
        canonical_value(value, None, self.int_type, self.float_type, &mut canonical)?;
        if let Some(entry) = self.cache.get(&canonical) {
            return Ok(entry.clone());
        }

        let encoded = match value {
            DataValue::Map(m) => {
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                let mut refs = Vec::with_capacity(pairs.len() * 2);
                for (key, val) in pairs {
                    refs.push(self.encode_key(key)?);
                    refs.push(self.encode(val)?.pointer);
                }
                let mut out = Vec::new();
                write_header(TypeId::Map, m.len(), &mut out)?;
                for r in &refs {
                    out.extend_from_slice(r);
                }
                out
            }
            DataValue::Array(items) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    refs.push(self.encode(item)?.pointer);
                }
                let mut out = Vec::new();
                write_header(TypeId::Array, items.len(), &mut out)?;
                for r in &refs {
                    out.extend_from_slice(r);
                }
                out
            }
            // Scalars have no internal pointers, the canonical form is the
            // wire form.
            _ => canonical.clone(),
        };

        self.append_cached(canonical, &encoded)
    }

    /// Encode a map key, returning the pointer bytes for the map payload
    ///
    /// Keys share the cache with string values, so a key repeated across
    /// records is stored once.
    fn encode_key(&mut self, key: &str) -> Result<Vec<u8>> {
        let mut canonical = Vec::new();
        write_header(TypeId::String, key.len(), &mut canonical)?;
        canonical.extend_from_slice(key.as_bytes());
        if let Some(entry) = self.cache.get(&canonical) {
            return Ok(entry.pointer.clone());
        }
        let entry = self.append_cached(canonical.clone(), &canonical)?;
        Ok(entry.pointer)
    }

    /// Append `[value bytes][pointer bytes]` and record the cache entry
    fn append_cached(&mut self, canonical: Vec<u8>, encoded: &[u8]) -> Result<EncodedRef> {
        let offset = u32::try_from(self.buffer.len()).map_err(|_| {
            WriterError::Capacity("data section exceeds 4 GiB".to_string())
        })?;
        self.buffer.extend_from_slice(encoded);
        let pointer = encode_pointer(offset);
        self.buffer.extend_from_slice(&pointer);
        let entry = EncodedRef { offset, pointer };
        self.cache.insert(canonical, entry.clone());
        Ok(entry)
    }

    /// Encode the metadata map written at the file tail
    ///
    /// Uses no cache (metadata pointers would be resolved against the data
    /// section, so none may appear) and forces the numeric widths the MMDB
    /// spec mandates for the well-known keys.
    pub fn encode_meta(meta: &HashMap<String, DataValue>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_header(TypeId::Map, meta.len(), &mut out)?;
        let mut pairs: Vec<_> = meta.iter().collect();
        pairs.sort_by_key(|(k, _)| *k);
        for (key, val) in pairs {
            write_header(TypeId::String, key.len(), &mut out)?;
            out.extend_from_slice(key.as_bytes());
            canonical_value(
                val,
                meta_forced_type(key),
                IntKind::Auto,
                FloatKind::F64,
                &mut out,
            )?;
        }
        Ok(out)
    }
}

/// Mandated wire type for well-known metadata keys
fn meta_forced_type(key: &str) -> Option<TypeId> {
    match key {
        "node_count" => Some(TypeId::Uint32),
        "record_size" | "ip_version" | "binary_format_major_version"
        | "binary_format_minor_version" => Some(TypeId::Uint16),
        "build_epoch" => Some(TypeId::Uint64),
        _ => None,
    }
}

/// Encode a POINTER referencing an absolute data-section offset
///
/// Four size classes per the MMDB spec; the 3-, 4- and 5-byte forms bias
/// the payload by the capacity of the smaller classes.
pub fn encode_pointer(pointer: u32) -> Vec<u8> {
    if pointer >= 134_744_064 {
        let mut out = vec![0x38];
        out.extend_from_slice(&pointer.to_be_bytes());
        out
    } else if pointer >= 526_336 {
        let p = pointer - 526_336;
        vec![
            0x30 | ((p >> 24) & 0x07) as u8,
            ((p >> 16) & 0xFF) as u8,
            ((p >> 8) & 0xFF) as u8,
            (p & 0xFF) as u8,
        ]
    } else if pointer >= 2048 {
        let p = pointer - 2048;
        vec![
            0x28 | ((p >> 16) & 0x07) as u8,
            ((p >> 8) & 0xFF) as u8,
            (p & 0xFF) as u8,
        ]
    } else {
        vec![0x20 | ((pointer >> 8) & 0x07) as u8, (pointer & 0xFF) as u8]
    }
}

/// Write the control byte(s) and any extra length bytes for a value header
///
/// Types above 7 get a second type byte between the control byte and the
/// length bytes.
fn write_header(type_id: TypeId, length: usize, out: &mut Vec<u8>) -> Result<()> {
    if length >= MAX_HEADER_LENGTH {
        return Err(WriterError::Capacity(format!(
            "value length {} exceeds the {} limit",
            length,
            MAX_HEADER_LENGTH - 1
        )));
    }

    let mut extra = [0u8; 3];
    let (five_bits, extra_len) = if length >= 65_821 {
        let adjusted = (length - 65_821) as u32;
        extra.copy_from_slice(&adjusted.to_be_bytes()[1..]);
        (31u8, 3)
    } else if length >= 285 {
        let adjusted = (length - 285) as u16;
        extra[..2].copy_from_slice(&adjusted.to_be_bytes());
        (30, 2)
    } else if length >= 29 {
        extra[0] = (length - 29) as u8;
        (29, 1)
    } else {
        (length as u8, 0)
    };

    let id = type_id as u8;
    if id <= 7 {
        out.push((id << 5) | five_bits);
    } else {
        out.push(five_bits);
        out.push(id - 7);
    }
    out.extend_from_slice(&extra[..extra_len]);
    Ok(())
}

/// Encode a value inline with no cache and no pointers
///
/// This is both the dedup-cache key (it is deterministic: map keys are
/// sorted) and the wire form for scalars and metadata. Width validation
/// happens here.
fn canonical_value(
    value: &DataValue,
    forced: Option<TypeId>,
    int_type: IntKind,
    float_type: FloatKind,
    out: &mut Vec<u8>,
) -> Result<()> {
    match value {
        DataValue::String(s) => {
            write_header(TypeId::String, s.len(), out)?;
            out.extend_from_slice(s.as_bytes());
        }
        DataValue::Bytes(b) => {
            write_header(TypeId::Bytes, b.len(), out)?;
            out.extend_from_slice(b);
        }
        // The length field carries the boolean value; there is no payload.
        DataValue::Bool(b) => {
            write_header(TypeId::Boolean, *b as usize, out)?;
        }
        DataValue::Int(v) => {
            let type_id = match forced {
                Some(id) => id,
                None => int_type_id(*v, int_type)?,
            };
            canonical_int(*v, type_id, out)?;
        }
        DataValue::Float(v) => match float_type {
            FloatKind::F32 => canonical_f32(*v as f32, out)?,
            FloatKind::F64 => canonical_f64(*v, out)?,
        },
        DataValue::Uint16(v) => canonical_uint(*v as u128, TypeId::Uint16, out)?,
        DataValue::Uint32(v) => canonical_uint(*v as u128, TypeId::Uint32, out)?,
        DataValue::Uint64(v) => canonical_uint(*v as u128, TypeId::Uint64, out)?,
        DataValue::Uint128(v) => canonical_uint(*v, TypeId::Uint128, out)?,
        DataValue::Int32(v) => canonical_i32(*v, out)?,
        DataValue::Float32(v) => canonical_f32(*v, out)?,
        DataValue::Double(v) => canonical_f64(*v, out)?,
        DataValue::Map(m) => {
            write_header(TypeId::Map, m.len(), out)?;
            let mut pairs: Vec<_> = m.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            for (key, val) in pairs {
                write_header(TypeId::String, key.len(), out)?;
                out.extend_from_slice(key.as_bytes());
                canonical_value(val, None, int_type, float_type, out)?;
            }
        }
        DataValue::Array(items) => {
            write_header(TypeId::Array, items.len(), out)?;
            for item in items {
                canonical_value(item, None, int_type, float_type, out)?;
            }
        }
    }
    Ok(())
}

/// Pick the wire type for an untyped integer under the active policy
fn int_type_id(value: i128, int_type: IntKind) -> Result<TypeId> {
    match int_type {
        IntKind::Auto => Ok(if value < 0 {
            TypeId::Int32
        } else if value > u64::MAX as i128 {
            TypeId::Uint128
        } else if value > u32::MAX as i128 {
            TypeId::Uint64
        } else if value > u16::MAX as i128 {
            TypeId::Uint32
        } else {
            TypeId::Uint16
        }),
        IntKind::U16 => Ok(TypeId::Uint16),
        IntKind::U32 => Ok(TypeId::Uint32),
        IntKind::U64 => Ok(TypeId::Uint64),
        IntKind::U128 => Ok(TypeId::Uint128),
        IntKind::I32 => Ok(TypeId::Int32),
    }
}

/// Encode an untyped integer at the resolved width, rejecting overflow
fn canonical_int(value: i128, type_id: TypeId, out: &mut Vec<u8>) -> Result<()> {
    let unsigned_max: u128 = match type_id {
        TypeId::Uint16 => u16::MAX as u128,
        TypeId::Uint32 => u32::MAX as u128,
        TypeId::Uint64 => u64::MAX as u128,
        TypeId::Uint128 => u128::MAX,
        TypeId::Int32 => {
            let v = i32::try_from(value).map_err(|_| {
                WriterError::Value(format!("{} out of range for int32", value))
            })?;
            return canonical_i32(v, out);
        }
        _ => {
            return Err(WriterError::Value(format!(
                "{:?} is not an integer type",
                type_id
            )))
        }
    };
    if value < 0 || value as u128 > unsigned_max {
        return Err(WriterError::Value(format!(
            "{} out of range for {:?}",
            value, type_id
        )));
    }
    canonical_uint(value as u128, type_id, out)
}

/// Unsigned integers travel big-endian with leading-zero bytes stripped;
/// zero has an empty payload
fn canonical_uint(value: u128, type_id: TypeId, out: &mut Vec<u8>) -> Result<()> {
    let be = value.to_be_bytes();
    let start = be.iter().position(|&b| b != 0).unwrap_or(be.len());
    let payload = &be[start..];
    write_header(type_id, payload.len(), out)?;
    out.extend_from_slice(payload);
    Ok(())
}

/// INT32 is always 4 bytes, two's complement big-endian
fn canonical_i32(value: i32, out: &mut Vec<u8>) -> Result<()> {
    write_header(TypeId::Int32, 4, out)?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn canonical_f32(value: f32, out: &mut Vec<u8>) -> Result<()> {
    write_header(TypeId::Float, 4, out)?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn canonical_f64(value: f64, out: &mut Vec<u8>) -> Result<()> {
    write_header(TypeId::Double, 8, out)?;
    out.extend_from_slice(&value.to_be_bytes());
    Ok(())
}
