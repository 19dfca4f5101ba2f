use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A delegation as persisted by the store. `timestamp` is its identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationRecord {
    pub timestamp: DateTime<Utc>,
    pub amount: u64,
    pub delegator: String,
    pub block: String,
}

impl DelegationRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        amount: u64,
        delegator: impl Into<String>,
        block: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            amount,
            delegator: delegator.into(),
            block: block.into(),
        }
    }
}

/// Optional UTC calendar-year restriction shared by paged reads and counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearFilter(Option<i32>);

impl YearFilter {
    pub const ALL: YearFilter = YearFilter(None);

    /// Zero means "no filter".
    pub fn from_param(year: i64) -> Self {
        if year == 0 {
            return Self::ALL;
        }
        // Years outside i32 can never match, keep them as an unmatchable filter.
        Self(Some(i32::try_from(year).unwrap_or(i32::MAX)))
    }

    pub fn year(&self) -> Option<i32> {
        self.0
    }

    /// Half-open `[start, end)` bounds for the filtered year. `None` inside
    /// `Some` means the year is set but not representable, so nothing matches.
    pub fn bounds(&self) -> Option<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let year = self.0?;
        Some(year_start(year).zip(year.checked_add(1).and_then(year_start)))
    }

    #[cfg(test)]
    pub fn matches(&self, timestamp: &DateTime<Utc>) -> bool {
        match self.bounds() {
            None => true,
            Some(None) => false,
            Some(Some((start, end))) => *timestamp >= start && *timestamp < end,
        }
    }
}

impl From<Option<i32>> for YearFilter {
    fn from(value: Option<i32>) -> Self {
        match value {
            Some(0) | None => Self::ALL,
            Some(year) => Self(Some(year)),
        }
    }
}

fn year_start(year: i32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
