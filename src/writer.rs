//! Caller-facing MMDB writer
//!
//! Holds the database configuration and the prefix tree, converts and
//! validates inserted networks, and drives serialization.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::data_section::{DataValue, FloatKind, IntKind};
use crate::error::{Result, WriterError};
use crate::network::{IpVersion, Network};
use crate::tree::PrefixTree;
use crate::tree_writer::TreeSerializer;

/// Configuration for a new [`MmdbWriter`]
///
/// # Example
/// ```
/// use mmdb_writer::{IpVersion, WriterOptions};
///
/// let options = WriterOptions::new(IpVersion::V6)
///     .with_database_type("My-ThreatIntel")
///     .with_languages(["en"])
///     .with_description("en", "threat intel feed")
///     .with_ipv4_compatible(true);
/// ```
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// IP version of the search tree (4 or 6)
    pub ip_version: IpVersion,
    /// Database type string stored in metadata
    pub database_type: String,
    /// Languages the description is available in
    pub languages: Vec<String>,
    /// Description per language; every declared language needs an entry
    pub description: HashMap<String, String>,
    /// Accept IPv4 networks into an IPv6 database by embedding them under
    /// `::/96`; only valid with [`IpVersion::V6`]
    pub ipv4_compatible: bool,
    /// Wire width policy for untyped integers
    pub int_type: IntKind,
    /// Wire width policy for untyped floats
    pub float_type: FloatKind,
}

impl WriterOptions {
    /// Options for the given IP version with defaults for everything else
    pub fn new(ip_version: IpVersion) -> Self {
        Self {
            ip_version,
            database_type: "GeoIP".to_string(),
            languages: Vec::new(),
            description: HashMap::new(),
            ipv4_compatible: false,
            int_type: IntKind::Auto,
            float_type: FloatKind::F64,
        }
    }

    /// Set the database type stored in metadata
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = db_type.into();
        self
    }

    /// Declare the languages the description covers
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Add a description in a specific language
    ///
    /// Can be called multiple times for different languages.
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Use one description text for every declared language
    pub fn with_description_for_all(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.description = self
            .languages
            .iter()
            .map(|lang| (lang.clone(), text.clone()))
            .collect();
        self
    }

    /// Allow IPv4 networks in an IPv6 database (embedded under `::/96`)
    pub fn with_ipv4_compatible(mut self, enabled: bool) -> Self {
        self.ipv4_compatible = enabled;
        self
    }

    /// Set the wire width policy for untyped integers
    pub fn with_int_type(mut self, int_type: IntKind) -> Self {
        self.int_type = int_type;
        self
    }

    /// Set the wire width policy for untyped floats
    pub fn with_float_type(mut self, float_type: FloatKind) -> Self {
        self.float_type = float_type;
        self
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::new(IpVersion::V4)
    }
}

/// Writer for MaxMind DB files
///
/// Collects CIDR-to-record mappings in an in-memory prefix tree and
/// serializes them into a file readable by the standard MMDB readers.
/// Serialization may be repeated; corrective inserts between attempts
/// carry forward.
///
/// # Example
/// ```no_run
/// use mmdb_writer::{DataValue, IpVersion, MmdbWriter, WriterOptions};
/// use std::collections::HashMap;
///
/// let mut writer = MmdbWriter::new(WriterOptions::new(IpVersion::V4))?;
/// let mut record = HashMap::new();
/// record.insert("country".to_string(), DataValue::String("US".to_string()));
/// writer.insert("10.0.0.0/8", DataValue::Map(record))?;
/// writer.to_db_file("out.mmdb")?;
/// # Ok::<(), mmdb_writer::WriterError>(())
/// ```
#[derive(Debug)]
pub struct MmdbWriter {
    tree: PrefixTree,
    options: WriterOptions,
    build_epoch: Option<u64>,
}

impl MmdbWriter {
    /// MMDB binary format major version written to metadata
    pub const BINARY_FORMAT_MAJOR_VERSION: u16 = 2;
    /// MMDB binary format minor version written to metadata
    pub const BINARY_FORMAT_MINOR_VERSION: u16 = 0;

    /// Create a writer, validating the configuration
    pub fn new(options: WriterOptions) -> Result<Self> {
        if options.ipv4_compatible && options.ip_version == IpVersion::V4 {
            return Err(WriterError::Config(
                "ipv4_compatible can only be set when ip_version is 6".to_string(),
            ));
        }
        for language in &options.languages {
            if !options.description.contains_key(language) {
                return Err(WriterError::Config(format!(
                    "language {} must have a description",
                    language
                )));
            }
        }
        Ok(Self {
            tree: PrefixTree::new(options.ip_version),
            options,
            build_epoch: None,
        })
    }

    /// Pin `build_epoch` instead of sampling the clock at serialization
    ///
    /// With a pinned epoch, identical writer state serializes to
    /// byte-identical files.
    pub fn with_build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = Some(epoch);
        self
    }

    /// Insert a set of networks all mapping to one record
    ///
    /// IPv4 networks in an IPv6 database are embedded under `::/96` when
    /// `ipv4_compatible` is set and rejected otherwise; IPv6 networks
    /// never fit an IPv4 database. Record width validation happens at
    /// serialization, not here.
    pub fn insert_network(&mut self, networks: &[Network], record: DataValue) -> Result<()> {
        let leaf = self.tree.new_leaf(record);
        for network in networks {
            let network = match (network.version(), self.options.ip_version) {
                (IpVersion::V6, IpVersion::V4) => {
                    return Err(WriterError::Prefix(format!(
                        "cannot insert IPv6 network {} into an IPv4 database",
                        network
                    )));
                }
                (IpVersion::V4, IpVersion::V6) => {
                    if !self.options.ipv4_compatible {
                        return Err(WriterError::Prefix(format!(
                            "cannot insert IPv4 network {} into an IPv6 database; \
                             set ipv4_compatible to store it under ::/96",
                            network
                        )));
                    }
                    network.to_ipv6()
                }
                _ => *network,
            };
            self.tree.insert(&network, leaf)?;
        }
        Ok(())
    }

    /// Insert a single network given in CIDR notation
    pub fn insert(&mut self, cidr: &str, record: DataValue) -> Result<()> {
        let network = Network::parse(cidr)?;
        self.insert_network(&[network], record)
    }

    /// Serialize the database to a byte vector
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        TreeSerializer::new(
            &self.tree,
            self.build_meta(),
            self.options.int_type,
            self.options.float_type,
        )
        .to_vec()
    }

    /// Serialize the database to a file
    pub fn to_db_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Metadata map minus the fields only the serializer knows
    /// (`node_count`, `record_size`)
    fn build_meta(&self) -> HashMap<String, DataValue> {
        let build_epoch = self.build_epoch.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs()
        });

        let mut meta = HashMap::new();
        meta.insert(
            "ip_version".to_string(),
            DataValue::Int(self.options.ip_version.as_u16() as i128),
        );
        meta.insert(
            "database_type".to_string(),
            DataValue::String(self.options.database_type.clone()),
        );
        meta.insert(
            "languages".to_string(),
            DataValue::Array(
                self.options
                    .languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        meta.insert(
            "binary_format_major_version".to_string(),
            DataValue::Int(Self::BINARY_FORMAT_MAJOR_VERSION as i128),
        );
        meta.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Int(Self::BINARY_FORMAT_MINOR_VERSION as i128),
        );
        meta.insert(
            "build_epoch".to_string(),
            DataValue::Int(build_epoch as i128),
        );
        meta.insert(
            "description".to_string(),
            DataValue::Map(
                self.options
                    .description
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                    .collect(),
            ),
        );
        meta
    }
}
