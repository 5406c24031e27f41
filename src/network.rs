//! IP network (CIDR) handling for the tree builder
//!
//! Provides the small address-math surface the writer needs: CIDR parsing,
//! MSB-first bit extraction, IPv4-in-IPv6 placement, and summarization of
//! arbitrary address ranges into disjoint CIDR blocks.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Result, WriterError};

/// IP version of a network or database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only (32-bit search tree)
    V4,
    /// IPv6 (128-bit search tree, may embed IPv4)
    V6,
}

impl IpVersion {
    /// Search tree depth for this version
    pub fn bit_len(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Numeric version as stored in metadata
    pub fn as_u16(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// An IP network in CIDR form
///
/// The address is held as an integer with the IPv4 space occupying the low
/// 32 bits. Host bits beyond the prefix length are zeroed on construction,
/// so `1.2.3.4/8` and `1.0.0.0/8` are the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network {
    addr: u128,
    prefix_len: u8,
    version: IpVersion,
}

impl Network {
    /// Create a network from an address and prefix length
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let version = match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        };
        if prefix_len > version.bit_len() {
            return Err(WriterError::Prefix(format!(
                "prefix length {} exceeds {} for {}",
                prefix_len,
                version.bit_len(),
                addr
            )));
        }
        let value = match addr {
            IpAddr::V4(v4) => u32::from(v4) as u128,
            IpAddr::V6(v6) => u128::from(v6),
        };
        Ok(Self {
            addr: mask_host_bits(value, prefix_len, version.bit_len()),
            prefix_len,
            version,
        })
    }

    /// Parse CIDR notation (`"10.0.0.0/8"`, `"2001:db8::/32"`) or a bare
    /// address, which gets the full prefix length for its version
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(slash_pos) = s.find('/') {
            let addr_str = &s[..slash_pos];
            let prefix_str = &s[slash_pos + 1..];
            let addr = addr_str.parse::<IpAddr>().map_err(|_| {
                WriterError::Prefix(format!("invalid address in CIDR: {}", s))
            })?;
            let prefix_len = prefix_str.parse::<u8>().map_err(|_| {
                WriterError::Prefix(format!("invalid prefix length in CIDR: {}", s))
            })?;
            Self::new(addr, prefix_len)
        } else {
            let addr = s
                .parse::<IpAddr>()
                .map_err(|_| WriterError::Prefix(format!("invalid address or CIDR: {}", s)))?;
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Self::new(addr, prefix_len)
        }
    }

    /// Construct from pre-validated parts (host bits are masked off)
    pub(crate) fn from_parts(addr: u128, prefix_len: u8, version: IpVersion) -> Self {
        Self {
            addr: mask_host_bits(addr, prefix_len, version.bit_len()),
            prefix_len,
            version,
        }
    }

    /// Numeric address value (IPv4 in the low 32 bits)
    pub fn addr(&self) -> u128 {
        self.addr
    }

    /// Network mask length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// IP version of this network
    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// Bit `i` of the address, MSB first within the version's bit length
    pub fn bit(&self, i: u8) -> u8 {
        ((self.addr >> (self.version.bit_len() - 1 - i)) & 1) as u8
    }

    /// Re-root an IPv4 network under `::/96` in the IPv6 tree
    ///
    /// The address keeps its low 32 bits and the prefix grows by 96, which
    /// is where standard readers locate IPv4 data in an IPv6 database.
    pub fn to_ipv6(self) -> Self {
        match self.version {
            IpVersion::V6 => self,
            IpVersion::V4 => Self {
                addr: self.addr,
                prefix_len: self.prefix_len + 96,
                version: IpVersion::V6,
            },
        }
    }

    /// Summarize an inclusive address range as disjoint CIDR blocks in
    /// ascending order
    ///
    /// Both endpoints must share an IP version. This mirrors what CIDR-set
    /// libraries produce when iterating a range.
    pub fn summarize_range(start: IpAddr, end: IpAddr) -> Result<Vec<Self>> {
        let (start_val, end_val, version) = match (start, end) {
            (IpAddr::V4(s), IpAddr::V4(e)) => {
                (u32::from(s) as u128, u32::from(e) as u128, IpVersion::V4)
            }
            (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(s), u128::from(e), IpVersion::V6),
            _ => {
                return Err(WriterError::Prefix(format!(
                    "mixed IP versions in range {} - {}",
                    start, end
                )))
            }
        };
        if start_val > end_val {
            return Err(WriterError::Prefix(format!(
                "range start {} is after end {}",
                start, end
            )));
        }

        let bit_len = version.bit_len() as u32;
        let mut blocks = Vec::new();
        let mut cur = start_val;
        loop {
            // Largest block that is aligned at `cur` and fits in the range.
            let align = if cur == 0 {
                bit_len
            } else {
                cur.trailing_zeros().min(bit_len)
            };
            let span = end_val - cur;
            let fit = if span == u128::MAX {
                bit_len
            } else {
                (127 - (span + 1).leading_zeros()).min(bit_len)
            };
            let size = align.min(fit);

            blocks.push(Self {
                addr: cur,
                prefix_len: (bit_len - size) as u8,
                version,
            });

            let step = match 1u128.checked_shl(size) {
                Some(step) => step,
                None => break,
            };
            match cur.checked_add(step) {
                Some(next) if next <= end_val => cur = next,
                _ => break,
            }
        }
        Ok(blocks)
    }
}

impl FromStr for Network {
    type Err = WriterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            IpVersion::V4 => {
                write!(f, "{}/{}", Ipv4Addr::from(self.addr as u32), self.prefix_len)
            }
            IpVersion::V6 => write!(f, "{}/{}", Ipv6Addr::from(self.addr), self.prefix_len),
        }
    }
}

fn mask_host_bits(value: u128, prefix_len: u8, bit_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        let host_bits = (bit_len - prefix_len) as u32;
        (value >> host_bits) << host_bits
    }
}
