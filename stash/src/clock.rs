//! Time source.

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Supplies "now" to query building and index selection.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Today's date in the local time zone.
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&Local).date_naive()
    }
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
