//! Key layout and value encoding

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tc_common::{GlobalStatus, Xid};

/// Terminates an xid inside a composite key, so `..:1` never prefixes `..:10`
const XID_TERMINATOR: u8 = 0;

pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn global_key(xid: &Xid) -> Vec<u8> {
    xid.to_string().into_bytes()
}

/// Prefix of every key scoped to one xid
pub fn xid_prefix(xid: &Xid) -> Vec<u8> {
    let mut key = xid.to_string().into_bytes();
    key.push(XID_TERMINATOR);
    key
}

pub fn branch_key(xid: &Xid, branch_id: u64) -> Vec<u8> {
    let mut key = xid_prefix(xid);
    key.extend_from_slice(&branch_id.to_be_bytes());
    key
}

pub fn status_key(status: GlobalStatus, xid: &Xid) -> Vec<u8> {
    let mut key = vec![status.code()];
    key.extend_from_slice(xid.to_string().as_bytes());
    key
}

/// Recover the xid from a status index key
pub fn xid_from_status_key(key: &[u8]) -> Result<Xid> {
    let raw = key
        .get(1..)
        .ok_or_else(|| Error::Encoding("empty status key".to_string()))?;
    let raw = std::str::from_utf8(raw).map_err(|e| Error::Encoding(e.to_string()))?;
    Xid::parse(raw).map_err(|e| Error::Encoding(e.to_string()))
}

pub fn xid_lock_key(xid: &Xid, row_key: &str) -> Vec<u8> {
    let mut key = xid_prefix(xid);
    key.extend_from_slice(row_key.as_bytes());
    key
}

/// Recover the row key from an `xid_lock` key
pub fn row_key_from_xid_lock_key(xid: &Xid, key: &[u8]) -> Result<String> {
    let prefix_len = xid_prefix(xid).len();
    let raw = key
        .get(prefix_len..)
        .ok_or_else(|| Error::Encoding("truncated lock key".to_string()))?;
    String::from_utf8(raw.to_vec()).map_err(|e| Error::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_prefix_is_terminated() {
        let short = Xid::new("10.0.0.1", 8091, 1);
        let long = Xid::new("10.0.0.1", 8091, 10);
        assert!(!branch_key(&long, 5).starts_with(&xid_prefix(&short)));
        assert!(branch_key(&short, 5).starts_with(&xid_prefix(&short)));
    }

    #[test]
    fn test_branch_keys_sort_by_id() {
        let xid = Xid::new("10.0.0.1", 8091, 1);
        assert!(branch_key(&xid, 2) < branch_key(&xid, 256));
    }

    #[test]
    fn test_status_key_roundtrip() {
        let xid = Xid::new("fe80::1", 8091, 42);
        let key = status_key(GlobalStatus::CommitRetrying, &xid);
        assert_eq!(key[0], GlobalStatus::CommitRetrying.code());
        assert_eq!(xid_from_status_key(&key).unwrap(), xid);
    }
}
