//! Day keys for daily counters
//!
//! Daily boundaries follow the user's local time, so limits reset at local
//! midnight. The day is part of every counter key; nothing is ever "reset".

use std::sync::Mutex;

use chrono::{Local, NaiveDate};

/// Format of the day component of counter keys
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Render a date as a counter day key (`YYYY-MM-DD`)
pub fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Source of "today"
pub trait DayClock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock in the local timezone
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl DayClock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.day.lock().unwrap_or_else(|p| p.into_inner()) = day;
    }

    pub fn advance_days(&self, days: u64) {
        let mut day = self.day.lock().unwrap_or_else(|p| p.into_inner());
        *day = *day + chrono::Days::new(days);
    }
}

impl DayClock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.day.lock().unwrap_or_else(|p| p.into_inner())
    }
}
