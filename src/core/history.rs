use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::set_history_entries;

/// How one recorded request ended
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Routed,
    Blocked { policy: String, message: String },
    Failed { reason: String },
}

impl RequestOutcome {
    pub fn is_routed(&self) -> bool {
        matches!(self, RequestOutcome::Routed)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RequestOutcome::Blocked { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RequestOutcome::Failed { .. })
    }
}

/// Finalized record of one inbound call. Never mutated after being recorded.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub route_id: Option<Uuid>,
    pub route_name: Option<String>,
    pub target_id: Option<Uuid>,
    pub target_url: Option<String>,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
    /// Routing pipeline processing time
    pub duration_us: u64,
}

/// Bounded in-memory ring of request records.
///
/// Push evicts the oldest entries beyond `max_entries`; the periodic sweep
/// drops entries older than `retention`. Rate-condition lookups scan the whole
/// ring, an O(n) cost bounded by the cap.
pub struct RequestHistory {
    max_entries: usize,
    retention: Duration,
    inner: Mutex<VecDeque<Arc<RequestRecord>>>,
}

impl RequestHistory {
    pub fn new(max_entries: usize, retention: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            retention,
            inner: Mutex::new(VecDeque::with_capacity(max_entries.clamp(1, 4096))),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, VecDeque<Arc<RequestRecord>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one finalized record, evicting the oldest past the cap
    pub fn record(&self, record: RequestRecord) {
        let mut ring = self.lock_inner();
        ring.push_back(Arc::new(record));
        while ring.len() > self.max_entries {
            ring.pop_front();
        }
        set_history_entries(ring.len());
    }

    pub fn len(&self) -> usize {
        self.lock_inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().is_empty()
    }

    /// The most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<Arc<RequestRecord>> {
        let ring = self.lock_inner();
        ring.iter().rev().take(limit).cloned().collect()
    }

    /// Cheap full copy of the ring for offline aggregation
    pub fn snapshot(&self) -> Vec<Arc<RequestRecord>> {
        self.lock_inner().iter().cloned().collect()
    }

    /// Count requests seen from `client_ip` at or after `since`.
    /// Linear scan over the ring.
    pub fn count_from_ip_since(&self, client_ip: &str, since: DateTime<Utc>) -> usize {
        let ring = self.lock_inner();
        ring.iter()
            .filter(|r| r.client_ip == client_ip && r.timestamp >= since)
            .count()
    }

    /// Drop records older than the retention window; returns how many were
    /// removed
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now
            - chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut ring = self.lock_inner();
        let before = ring.len();
        ring.retain(|r| r.timestamp >= cutoff);
        let removed = before - ring.len();
        if removed > 0 {
            set_history_entries(ring.len());
        }
        removed
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(client_ip: &str, timestamp: DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            id: Uuid::new_v4(),
            timestamp,
            method: "GET".to_string(),
            path: "/api/test".to_string(),
            client_ip: client_ip.to_string(),
            user_agent: None,
            route_id: None,
            route_name: None,
            target_id: None,
            target_url: None,
            outcome: RequestOutcome::Routed,
            duration_us: 42,
        }
    }

    #[test]
    fn test_cap_evicts_oldest_first() {
        let history = RequestHistory::new(5, Duration::from_secs(3600));
        let base = Utc::now();
        for i in 0..7 {
            let mut r = record_at("10.0.0.1", base);
            r.path = format!("/req/{i}");
            history.record(r);
        }

        assert_eq!(history.len(), 5);
        let snapshot = history.snapshot();
        assert_eq!(snapshot.first().map(|r| r.path.clone()), Some("/req/2".to_string()));
        assert_eq!(snapshot.last().map(|r| r.path.clone()), Some("/req/6".to_string()));
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let history = RequestHistory::new(100, Duration::from_secs(3600));
        let base = Utc::now();
        for i in 0..10 {
            let mut r = record_at("10.0.0.1", base);
            r.path = format!("/req/{i}");
            history.record(r);
        }

        let recent = history.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].path, "/req/9");
        assert_eq!(recent[2].path, "/req/7");
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let history = RequestHistory::new(100, Duration::from_secs(7 * 24 * 3600));
        let now = Utc::now();
        history.record(record_at("10.0.0.1", now - chrono::Duration::days(8)));
        history.record(record_at("10.0.0.1", now - chrono::Duration::days(6)));
        history.record(record_at("10.0.0.1", now));

        let removed = history.sweep_expired(now);
        assert_eq!(removed, 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_count_from_ip_filters_ip_and_window() {
        let history = RequestHistory::new(100, Duration::from_secs(3600));
        let now = Utc::now();
        history.record(record_at("10.0.0.1", now - chrono::Duration::seconds(120)));
        history.record(record_at("10.0.0.1", now - chrono::Duration::seconds(30)));
        history.record(record_at("10.0.0.1", now - chrono::Duration::seconds(10)));
        history.record(record_at("10.0.0.2", now - chrono::Duration::seconds(5)));

        let since = now - chrono::Duration::seconds(60);
        assert_eq!(history.count_from_ip_since("10.0.0.1", since), 2);
        assert_eq!(history.count_from_ip_since("10.0.0.2", since), 1);
        assert_eq!(history.count_from_ip_since("10.0.0.3", since), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let history = RequestHistory::new(0, Duration::from_secs(60));
        history.record(record_at("10.0.0.1", Utc::now()));
        assert_eq!(history.len(), 1);
    }
}
