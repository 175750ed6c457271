//! crates/reading_log_core/src/streak.rs
//!
//! Consecutive-day streak computation over a set of reading days.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;

/// Maps timestamps onto the local calendar the school reads in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingCalendar {
    offset: FixedOffset,
}

impl Default for ReadingCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl ReadingCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// Builds a calendar from an offset in minutes east of UTC.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    /// The local calendar day a timestamp falls on.
    pub fn day_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.offset).date_naive()
    }

    pub fn hour_of(&self, timestamp: DateTime<Utc>) -> u32 {
        timestamp.with_timezone(&self.offset).hour()
    }

    /// Local midnight at the start of `day`, as a UTC instant.
    pub fn start_of_day(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_time(NaiveTime::default());
        match self.offset.from_local_datetime(&midnight).single() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&midnight),
        }
    }
}

/// Streak figures derived from the set of days with at least one qualifying log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Streaks {
    pub current: u32,
    pub longest: u32,
    pub reading_days: u32,
}

/// Computes current and longest streaks.
///
/// The current streak counts back from `today` and must include `today`
/// itself: a student who last read yesterday has a current streak of zero.
/// The longest streak is the longest run of adjacent days in the set and is
/// never reported below the current streak.
pub fn compute_streaks(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> Streaks {
    if days.is_empty() {
        return Streaks::default();
    }

    let mut current = 0u32;
    let mut expected = Some(today);
    while let Some(day) = expected {
        if !days.contains(&day) {
            break;
        }
        current += 1;
        expected = day.checked_sub_days(Days::new(1));
    }

    let mut longest = 1u32;
    let mut run = 1u32;
    let descending: Vec<&NaiveDate> = days.iter().rev().collect();
    for pair in descending.windows(2) {
        if (*pair[0] - *pair[1]).num_days() == 1 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
    }

    Streaks {
        current,
        longest: longest.max(current),
        reading_days: days.len() as u32,
    }
}
