//! In-flight request bookkeeping.
//!
//! The [`PendingRequestTable`] maps each outstanding serial to its
//! [`RequestRecord`]. It is owned by the event loop and never shared, so it
//! needs no locking. Records leave the table exactly once: on a matching
//! response, on a fallback (re-keyed under a new serial), on age-out, or
//! when the channel goes away.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use radiobridge_protocol::Serial;

use crate::request::RequestRecord;

/// Outstanding requests keyed by serial.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    records: HashMap<Serial, RequestRecord>,
}

impl PendingRequestTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new in-flight request.
    ///
    /// # Panics
    ///
    /// Panics if the serial is already pending. The allocator never hands
    /// out a live serial twice, so a duplicate means the caller broke the
    /// correlation invariant.
    pub fn insert(&mut self, record: RequestRecord) {
        let serial = record.serial;
        let previous = self.records.insert(serial, record);
        assert!(previous.is_none(), "serial {} inserted twice", serial);
    }

    /// Take the record for `serial`. `None` if it is not pending.
    pub fn remove(&mut self, serial: Serial) -> Option<RequestRecord> {
        self.records.remove(&serial)
    }

    /// Look up a pending record.
    pub fn get(&self, serial: Serial) -> Option<&RequestRecord> {
        self.records.get(&serial)
    }

    /// Look up a pending record mutably.
    pub fn get_mut(&mut self, serial: Serial) -> Option<&mut RequestRecord> {
        self.records.get_mut(&serial)
    }

    /// Whether `serial` is pending.
    pub fn contains(&self, serial: Serial) -> bool {
        self.records.contains_key(&serial)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over outstanding requests in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &RequestRecord> {
        self.records.values()
    }

    /// Submission time of the oldest outstanding attempt.
    pub fn oldest_submission(&self) -> Option<Instant> {
        self.records.values().map(|record| record.submitted_at).min()
    }

    /// Remove every record whose attempt is older than `max_age`.
    ///
    /// A record exactly `max_age` old stays.
    ///
    /// Returned records are ordered oldest first so callbacks fire in
    /// submission order.
    pub fn age_out(&mut self, now: Instant, max_age: Duration) -> Vec<RequestRecord> {
        let expired: Vec<Serial> = self
            .records
            .values()
            .filter(|record| record.age(now) > max_age)
            .map(|record| record.serial)
            .collect();

        let mut removed: Vec<RequestRecord> = expired
            .into_iter()
            .filter_map(|serial| self.records.remove(&serial))
            .collect();
        sort_oldest_first(&mut removed);
        removed
    }

    /// Remove every record, oldest first.
    pub fn drain(&mut self) -> Vec<RequestRecord> {
        let mut removed: Vec<RequestRecord> = self.records.drain().map(|(_, record)| record).collect();
        sort_oldest_first(&mut removed);
        removed
    }

    /// Clear the wake lock reference of every record.
    ///
    /// Used after the lock was forcibly released so that late completions
    /// do not release it a second time. Returns how many records changed.
    pub fn detach_wake_locks(&mut self) -> usize {
        let mut detached = 0;
        for record in self.records.values_mut() {
            if record.holds_wake_lock {
                record.holds_wake_lock = false;
                detached += 1;
            }
        }
        detached
    }

    /// Number of records that still hold a wake lock reference.
    pub fn wake_lock_holders(&self) -> usize {
        self.records.values().filter(|record| record.holds_wake_lock).count()
    }
}

fn sort_oldest_first(records: &mut [RequestRecord]) {
    records.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.serial.cmp(&b.serial))
    });
}
