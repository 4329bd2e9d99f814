//! Global transaction identifier
//!
//! An xid has the textual form `<ip>:<port>:<transaction-id>`: the address of
//! the coordinator that began the transaction followed by a numeric id that is
//! unique across the cluster.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an xid string is malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid xid {xid:?}: {reason}")]
pub struct XidParseError {
    pub xid: String,
    pub reason: &'static str,
}

/// Global transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Xid {
    host: String,
    port: u16,
    transaction_id: u64,
}

impl Xid {
    /// Build an xid for a transaction begun on `host:port`
    pub fn new(host: impl Into<String>, port: u16, transaction_id: u64) -> Self {
        Self {
            host: host.into(),
            port,
            transaction_id,
        }
    }

    /// Parse from the `<ip>:<port>:<transaction-id>` form
    pub fn parse(s: &str) -> Result<Self, XidParseError> {
        let err = |reason| XidParseError {
            xid: s.to_string(),
            reason,
        };

        // The host may itself contain ':' (IPv6), so split from the right.
        let (rest, tid) = s.rsplit_once(':').ok_or_else(|| err("missing transaction id"))?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| err("missing port"))?;

        if host.is_empty() {
            return Err(err("empty host"));
        }
        let port = port.parse::<u16>().map_err(|_| err("port is not a u16"))?;
        let transaction_id = tid
            .parse::<u64>()
            .map_err(|_| err("transaction id is not a u64"))?;

        Ok(Self::new(host, port, transaction_id))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Numeric transaction id embedded in the xid
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.transaction_id)
    }
}

impl FromStr for Xid {
    type Err = XidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Xid {
    type Error = XidParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Xid> for String {
    fn from(xid: Xid) -> Self {
        xid.to_string()
    }
}
