//! Lock-key descriptor parsing

use crate::error::{LockError, Result};
use tc_common::Xid;
use tc_store::RowLock;

const TABLE_SEPARATOR: char = ';';
const TABLE_PK_SEPARATOR: char = ':';
const PK_SEPARATOR: char = ',';

/// Expand a lock-key descriptor into one row lock per `(table, pk)`
///
/// The descriptor has the form `table:pk1,pk2;table2:pk3`. Primary key values
/// are opaque (they may contain `=`); an empty descriptor yields no locks.
pub fn parse_lock_key(
    xid: &Xid,
    branch_id: u64,
    resource_id: &str,
    lock_key: &str,
) -> Result<Vec<RowLock>> {
    let invalid = |reason| LockError::InvalidLockKey {
        lock_key: lock_key.to_string(),
        reason,
    };

    let mut locks = Vec::new();
    for table_part in lock_key.split(TABLE_SEPARATOR) {
        let table_part = table_part.trim();
        if table_part.is_empty() {
            continue;
        }

        let (table, pks) = table_part
            .split_once(TABLE_PK_SEPARATOR)
            .ok_or_else(|| invalid("missing ':' between table and primary keys"))?;
        let table = table.trim();
        if table.is_empty() {
            return Err(invalid("empty table name"));
        }

        for pk in pks.split(PK_SEPARATOR).map(str::trim) {
            if pk.is_empty() {
                return Err(invalid("empty primary key"));
            }
            locks.push(RowLock {
                xid: xid.clone(),
                transaction_id: xid.transaction_id(),
                branch_id,
                resource_id: resource_id.to_string(),
                table: table.to_string(),
                pk: pk.to_string(),
            });
        }
    }
    Ok(locks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xid() -> Xid {
        Xid::new("10.0.0.1", 8091, 12345)
    }

    #[test]
    fn test_single_row() {
        let locks = parse_lock_key(&xid(), 1, "jdbc:orders", "order_tbl:pk=7").unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].table, "order_tbl");
        assert_eq!(locks[0].pk, "pk=7");
        assert_eq!(locks[0].transaction_id, 12345);
    }

    #[test]
    fn test_multiple_tables_and_keys() {
        let locks =
            parse_lock_key(&xid(), 1, "jdbc:orders", "order_tbl:1,2;stock_tbl:9;").unwrap();
        let rows: Vec<_> = locks
            .iter()
            .map(|l| (l.table.as_str(), l.pk.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![("order_tbl", "1"), ("order_tbl", "2"), ("stock_tbl", "9")]
        );
    }

    #[test]
    fn test_empty_descriptor() {
        assert!(parse_lock_key(&xid(), 1, "r", "").unwrap().is_empty());
        assert!(parse_lock_key(&xid(), 1, "r", " ; ").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_descriptor() {
        assert!(matches!(
            parse_lock_key(&xid(), 1, "r", "order_tbl"),
            Err(LockError::InvalidLockKey { .. })
        ));
        assert!(parse_lock_key(&xid(), 1, "r", ":1").is_err());
        assert!(parse_lock_key(&xid(), 1, "r", "order_tbl:1,,2").is_err());
    }
}
