use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Why an input row did not become an accepted reading.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRejection {
    #[error("parameter is not PM2.5")]
    ParameterMismatch,

    #[error("location is missing or empty")]
    MissingStation,

    #[error("datetime matches no known format")]
    UnparsableTimestamp,

    #[error("value is missing or not numeric")]
    InvalidValue,

    #[error("value outside plausible range")]
    OutOfRange,
}

impl RowRejection {
    pub const ALL: [RowRejection; 5] = [
        RowRejection::ParameterMismatch,
        RowRejection::MissingStation,
        RowRejection::UnparsableTimestamp,
        RowRejection::InvalidValue,
        RowRejection::OutOfRange,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            RowRejection::ParameterMismatch => "parameter_mismatch",
            RowRejection::MissingStation => "missing_station",
            RowRejection::UnparsableTimestamp => "unparsable_timestamp",
            RowRejection::InvalidValue => "invalid_value",
            RowRejection::OutOfRange => "out_of_range",
        }
    }
}

/// Per-reason rejection tallies. Adding two tallies is associative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    counts: [u64; 5],
}

impl RejectionCounts {
    pub fn record(&mut self, reason: RowRejection) {
        self.counts[reason.index()] += 1;
    }

    pub fn get(&self, reason: RowRejection) -> u64 {
        self.counts[reason.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn merge(&mut self, other: &RejectionCounts) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowRejection, u64)> + '_ {
        RowRejection::ALL.iter().map(|reason| (*reason, self.get(*reason)))
    }
}

impl Serialize for RejectionCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(RowRejection::ALL.len()))?;
        for (reason, count) in self.iter() {
            map.serialize_entry(reason.label(), &count)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_merge() {
        let mut a = RejectionCounts::default();
        a.record(RowRejection::OutOfRange);
        a.record(RowRejection::ParameterMismatch);

        let mut b = RejectionCounts::default();
        b.record(RowRejection::OutOfRange);

        a.merge(&b);
        assert_eq!(a.get(RowRejection::OutOfRange), 2);
        assert_eq!(a.get(RowRejection::ParameterMismatch), 1);
        assert_eq!(a.get(RowRejection::InvalidValue), 0);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_counts_serialize_by_label() {
        let mut counts = RejectionCounts::default();
        counts.record(RowRejection::InvalidValue);

        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["invalid_value"], 1);
        assert_eq!(json["out_of_range"], 0);
    }

    #[test]
    fn test_indices_match_all_order() {
        for (i, reason) in RowRejection::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }
}
