//! mmdb-writer - MaxMind DB File Writer
//!
//! Builds MaxMind DB (MMDB) files: read-optimized, immutable databases
//! mapping IP prefixes (IPv4 or IPv6) to rich typed records, readable by
//! the standard MaxMind readers in every language.
//!
//! # Quick Start
//!
//! ```rust
//! use mmdb_writer::{DataValue, IpVersion, MmdbWriter, WriterOptions};
//! use std::collections::HashMap;
//!
//! let mut writer = MmdbWriter::new(
//!     WriterOptions::new(IpVersion::V4).with_database_type("My-GeoIP"),
//! )?;
//!
//! // Map a CIDR block to a record
//! let mut record = HashMap::new();
//! record.insert("country".to_string(), DataValue::String("US".to_string()));
//! record.insert("asn".to_string(), DataValue::Int(13335));
//! writer.insert("1.1.1.0/24", DataValue::Map(record))?;
//!
//! // Serialize to an MMDB file image
//! let db_bytes = writer.to_bytes()?;
//! # let tmp_path = std::env::temp_dir().join("mmdb_writer_doctest.mmdb");
//! # std::fs::write(&tmp_path, db_bytes).unwrap();
//! # let _ = std::fs::remove_file(&tmp_path);
//! # Ok::<(), mmdb_writer::WriterError>(())
//! ```
//!
//! # Key Features
//!
//! - **Longest-prefix-match semantics**: inserting a subnet inside a
//!   covering network keeps the covering record for every address the
//!   subnet does not claim
//! - **Rich Data**: maps, arrays, strings, bytes, booleans, floats and the
//!   full MMDB integer menagerie, with automatic or forced widths
//! - **Deduplicated output**: repeated records, sub-records and strings
//!   are written once and referenced by pointers
//! - **MMDB Compatible**: output is accepted by libmaxminddb and the
//!   official readers
//!
//! # File layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  1. Search tree (binary trie)        │
//! │  2. 16-byte separator                │
//! │  3. Data section (deduplicated)      │
//! │  4. Metadata marker + metadata map   │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Data section encoding (MMDB typed values)
pub mod data_section;
/// Error types for writer operations
pub mod error;
/// IP network (CIDR) handling
pub mod network;
/// Prefix tree mutated by insertions (internal)
mod tree;
/// Tree serialization to the on-disk layout (internal)
mod tree_writer;
/// Caller-facing writer API
pub mod writer;

// Re-exports for consumers

pub use crate::data_section::{DataEncoder, DataValue, FloatKind, IntKind, TypeId};
pub use crate::error::{Result, WriterError};
pub use crate::network::{IpVersion, Network};
pub use crate::tree_writer::{RecordSize, METADATA_MARKER};
pub use crate::writer::{MmdbWriter, WriterOptions};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
