//! Active time windows for scheduled cadences.
//!
//! A cadence only acts inside its window: a weekday check plus an
//! `[start_hour, end_hour)` range in the market's local time, expressed as a
//! fixed UTC offset from config.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub utc_offset_hours: i32,
    pub weekdays_only: bool,
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32, utc_offset_hours: i32) -> Self {
        Self {
            start_hour,
            end_hour,
            utc_offset_hours,
            weekdays_only: true,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset());
        if self.weekdays_only && local.weekday().number_from_monday() > 5 {
            return false;
        }
        let hour = local.hour();
        self.start_hour <= hour && hour < self.end_hour
    }
}
