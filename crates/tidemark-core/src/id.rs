//! Opaque 64-bit identifiers used across the node.
//!
//! Every identifier renders in a canonical 16-digit lower-hex text form and
//! parses back from it. The canonical form is what appears in API payloads,
//! queue directory names, metric labels, and log fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing an identifier's canonical text form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    /// The input was not exactly 16 characters long.
    #[error("id must be 16 hex characters, got {got}")]
    InvalidLength {
        /// Length of the rejected input.
        got: usize,
    },
    /// The input contained a non-hex character.
    #[error("id must be a hex string")]
    InvalidDigit,
    /// The all-zero id is reserved as invalid.
    #[error("id cannot be zero")]
    Zero,
}

fn parse_canonical(s: &str) -> Result<u64, IdParseError> {
    if s.len() != 16 {
        return Err(IdParseError::InvalidLength { got: s.len() });
    }
    let raw = u64::from_str_radix(s, 16).map_err(|_| IdParseError::InvalidDigit)?;
    if raw == 0 {
        return Err(IdParseError::Zero);
    }
    Ok(raw)
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Creates an identifier from a raw u64 value.
            pub const fn new(id: u64) -> Self {
                $name(id)
            }

            /// Returns the raw u64 value of this identifier.
            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_canonical(s).map($name)
            }
        }
    };
}

define_id!(
    /// Identifies an organization.
    OrgId
);
define_id!(
    /// Identifies a bucket local to this node.
    BucketId
);
define_id!(
    /// Identifies a configured remote endpoint.
    RemoteId
);
define_id!(
    /// Identifies a replication: the binding from a local bucket to a
    /// remote endpoint's bucket, with its durable queue.
    ReplicationId
);
