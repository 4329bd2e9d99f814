//! Query predicates over stored sessions

use crate::record::GlobalRecord;
use tc_common::{GlobalStatus, Xid};

/// Predicate used to look up sessions
///
/// Either a single-xid lookup or a status set (a queue's working set),
/// optionally narrowed to sessions that have been alive for a minimum time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCondition {
    pub xid: Option<Xid>,
    pub statuses: Vec<GlobalStatus>,
    /// Only sessions begun at least this many milliseconds ago
    pub overtime_alive_ms: Option<u64>,
    pub with_branches: bool,
}

impl SessionCondition {
    pub fn by_xid(xid: Xid) -> Self {
        Self {
            xid: Some(xid),
            statuses: Vec::new(),
            overtime_alive_ms: None,
            with_branches: true,
        }
    }

    pub fn by_statuses(statuses: impl Into<Vec<GlobalStatus>>) -> Self {
        Self {
            xid: None,
            statuses: statuses.into(),
            overtime_alive_ms: None,
            with_branches: true,
        }
    }

    pub fn with_overtime_alive_ms(mut self, ms: u64) -> Self {
        self.overtime_alive_ms = Some(ms);
        self
    }

    pub fn without_branches(mut self) -> Self {
        self.with_branches = false;
        self
    }

    /// Evaluate the predicate against a record at wall-clock time `now_ms`
    pub fn matches(&self, record: &GlobalRecord, now_ms: u64) -> bool {
        if let Some(xid) = &self.xid
            && xid != &record.xid
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(min_age) = self.overtime_alive_ms
            && now_ms.saturating_sub(record.begin_time_ms) < min_age
        {
            return false;
        }
        true
    }
}
