use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock whose time only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut current) => *current = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        match self.now.lock() {
            Ok(mut current) => *current += by,
            Err(poisoned) => *poisoned.into_inner() += by,
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InMemoryHolidayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl InMemoryHolidayCalendar {
    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self { holidays: holidays.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holidays.is_empty()
    }
}

impl HolidayCalendar for InMemoryHolidayCalendar {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

#[derive(Clone)]
pub struct BusinessCalendar {
    holidays: Arc<dyn HolidayCalendar>,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryHolidayCalendar::default()))
    }
}

impl std::fmt::Debug for BusinessCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusinessCalendar").finish_non_exhaustive()
    }
}

impl BusinessCalendar {
    pub fn new(holidays: Arc<dyn HolidayCalendar>) -> Self {
        Self { holidays }
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.is_holiday(date)
    }

    /// Moves `start` forward by `days` business days, keeping the time of day.
    ///
    /// Zero days returns `start` untouched, even when it falls on a weekend or
    /// holiday: a zero-day SLA means the work is due immediately.
    pub fn add_business_days(&self, start: DateTime<Utc>, days: u32) -> DateTime<Utc> {
        let mut current = start;
        let mut remaining = days;
        while remaining > 0 {
            current += Duration::days(1);
            if self.is_business_day(current.date_naive()) {
                remaining -= 1;
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use super::{BusinessCalendar, Clock, InMemoryHolidayCalendar, ManualClock};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn three_business_days_from_friday_lands_on_wednesday() {
        let calendar = BusinessCalendar::default();
        // 2026-10-16 is a Friday.
        let friday = Utc.with_ymd_and_hms(2026, 10, 16, 14, 30, 0).single().expect("timestamp");

        let due = calendar.add_business_days(friday, 3);

        assert_eq!(due, Utc.with_ymd_and_hms(2026, 10, 21, 14, 30, 0).single().expect("ts"));
    }

    #[test]
    fn holidays_are_skipped() {
        // 2026-11-02 (Monday) is Finados.
        let calendar = BusinessCalendar::new(Arc::new(InMemoryHolidayCalendar::with_holidays([
            date(2026, 11, 2),
        ])));
        let friday = Utc.with_ymd_and_hms(2026, 10, 30, 9, 0, 0).single().expect("timestamp");

        let due = calendar.add_business_days(friday, 1);

        assert_eq!(due.date_naive(), date(2026, 11, 3));
        assert!(!calendar.is_business_day(date(2026, 11, 2)));
    }

    #[test]
    fn zero_days_returns_start_even_on_weekend() {
        let calendar = BusinessCalendar::default();
        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 8, 0, 0).single().expect("timestamp");

        assert_eq!(calendar.add_business_days(saturday, 0), saturday);
    }

    #[test]
    fn starting_on_weekend_counts_from_next_business_day() {
        let calendar = BusinessCalendar::default();
        let sunday = Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).single().expect("timestamp");

        let due = calendar.add_business_days(sunday, 1);

        assert_eq!(due.date_naive(), date(2026, 10, 19));
    }

    #[test]
    fn manual_clock_advances_only_when_told() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).single().expect("timestamp");
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);
        clock.advance(Duration::hours(5));
        assert_eq!(clock.now(), start + Duration::hours(5));
    }
}
