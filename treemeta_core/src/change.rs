//! The `Change` record queued for asynchronous propagation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use minicbor::{Decode, Encode};

use crate::error::{Error, Result};

/// A pending adjustment of a node's aggregate metadata.
///
/// Changes for the same node fold together commutatively: size diffs add
/// up and the sync time is the latest one seen, so the order in which
/// records are applied never matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub sync_time: DateTime<Utc>,
    pub size_diff: i64,
}

/// Signed difference between two sizes, saturating at the `i64` range.
pub fn size_diff(old: u64, new: u64) -> i64 {
    if new >= old {
        i64::try_from(new - old).unwrap_or(i64::MAX)
    } else {
        i64::try_from(old - new).map_or(i64::MIN, |d| -d)
    }
}

/// Wire form: `[secs, nanos, size_diff]`.
#[derive(Encode, Decode)]
#[cbor(array)]
struct ChangeRecord {
    #[n(0)]
    secs: i64,
    #[n(1)]
    nanos: u32,
    #[n(2)]
    size_diff: i64,
}

impl Default for Change {
    fn default() -> Self {
        Self::empty()
    }
}

impl Change {
    pub fn new(sync_time: DateTime<Utc>, size_diff: i64) -> Self {
        Self {
            sync_time,
            size_diff,
        }
    }

    /// A change stamped with the current time.
    pub fn now(size_diff: i64) -> Self {
        Self::new(Utc::now(), size_diff)
    }

    /// The neutral element of [`Change::merge`].
    pub fn empty() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, 0)
    }

    pub fn merge(&mut self, other: &Change) {
        if other.sync_time > self.sync_time {
            self.sync_time = other.sync_time;
        }
        self.size_diff = self.size_diff.saturating_add(other.size_diff);
    }

    /// Folds any number of changes into one.
    pub fn aggregate<'a>(changes: impl IntoIterator<Item = &'a Change>) -> Change {
        changes.into_iter().fold(Change::empty(), |mut acc, c| {
            acc.merge(c);
            acc
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let record = ChangeRecord {
            secs: self.sync_time.timestamp(),
            nanos: self.sync_time.timestamp_subsec_nanos(),
            size_diff: self.size_diff,
        };
        let bytes = minicbor::to_vec(&record).map_err(|e| Error::decode("change", e))?;
        Ok(Bytes::from(bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Change> {
        let record: ChangeRecord = minicbor::decode(bytes).map_err(|e| Error::decode("change", e))?;
        let sync_time = DateTime::from_timestamp(record.secs, record.nanos)
            .ok_or_else(|| Error::decode("change", "sync time out of range"))?;
        Ok(Change::new(sync_time, record.size_diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn merge_sums_sizes_and_keeps_latest_time() {
        let mut pc = Change::empty();
        pc.merge(&Change::new(at(20), 3));
        pc.merge(&Change::new(at(10), -1));
        assert_eq!(pc, Change::new(at(20), 2));
    }

    #[test]
    fn aggregation_is_order_independent() {
        let changes = [
            Change::new(at(5), 7),
            Change::new(at(9), -3),
            Change::new(at(1), 11),
        ];
        let expected = Change::new(at(9), 15);
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let permuted: Vec<Change> = order.iter().map(|i| changes[*i]).collect();
            assert_eq!(Change::aggregate(&permuted), expected, "order {order:?}");
        }
    }

    #[test]
    fn empty_aggregate_is_neutral() {
        assert_eq!(Change::aggregate(&[]), Change::empty());
    }

    #[test]
    fn record_keeps_nanoseconds() {
        let change = Change::new(Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(), -42);
        let bytes = change.to_bytes().unwrap();
        assert_eq!(Change::from_bytes(&bytes).unwrap(), change);
    }

    #[test]
    fn record_is_a_three_element_array() {
        let change = Change::new(Utc.timestamp_opt(1_700_000_000, 5).unwrap(), -42);
        let bytes = change.to_bytes().unwrap();
        let fields: (i64, u32, i64) = minicbor::decode(&bytes).unwrap();
        assert_eq!(fields, (1_700_000_000, 5, -42));
    }

    #[test]
    fn size_diffs_saturate() {
        assert_eq!(size_diff(10, 4), -6);
        assert_eq!(size_diff(4, 10), 6);
        assert_eq!(size_diff(0, u64::MAX), i64::MAX);
        assert_eq!(size_diff(u64::MAX, 0), i64::MIN);
        assert_eq!(size_diff(u64::MAX, u64::MAX - 1), -1);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = Change::from_bytes(b"\xff\x00garbage").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
