use chrono::{DateTime, Duration, Months, Utc};
use time::OffsetDateTime;

use crate::services::stripe::{BillingInterval, RecurringInfo};
use crate::utils::epoch::utc_to_offset;

/// End of the first billing period, derived from the subscription's creation
/// time and its price's recurrence. Months and years use calendar arithmetic,
/// clamping to the last day of shorter months.
pub fn compute_period_end(created: i64, recurring: RecurringInfo) -> Option<OffsetDateTime> {
    let start = DateTime::<Utc>::from_timestamp(created, 0)?;
    let count = recurring.interval_count.max(1);

    let end = match recurring.interval {
        BillingInterval::Day => start.checked_add_signed(Duration::days(i64::from(count)))?,
        BillingInterval::Week => start.checked_add_signed(Duration::weeks(i64::from(count)))?,
        BillingInterval::Month => start.checked_add_months(Months::new(count))?,
        BillingInterval::Year => start.checked_add_months(Months::new(count.checked_mul(12)?))?,
    };

    utc_to_offset(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 12, 30, 0).unwrap().timestamp()
    }

    fn every(interval: BillingInterval, interval_count: u32) -> RecurringInfo {
        RecurringInfo {
            interval,
            interval_count,
        }
    }

    #[test]
    fn one_month_lands_on_same_day_next_month() {
        let end = compute_period_end(ts(2025, 1, 15), every(BillingInterval::Month, 1)).unwrap();
        assert_eq!(end.unix_timestamp(), ts(2025, 2, 15));
    }

    #[test]
    fn month_end_clamps_to_shorter_month() {
        let end = compute_period_end(ts(2024, 1, 31), every(BillingInterval::Month, 1)).unwrap();
        assert_eq!(end.unix_timestamp(), ts(2024, 2, 29));
        let end = compute_period_end(ts(2025, 1, 31), every(BillingInterval::Month, 1)).unwrap();
        assert_eq!(end.unix_timestamp(), ts(2025, 2, 28));
    }

    #[test]
    fn interval_count_multiplies() {
        let start = ts(2025, 3, 1);
        assert_eq!(
            compute_period_end(start, every(BillingInterval::Day, 10))
                .unwrap()
                .unix_timestamp(),
            start + 10 * 86_400
        );
        assert_eq!(
            compute_period_end(start, every(BillingInterval::Week, 2))
                .unwrap()
                .unix_timestamp(),
            start + 14 * 86_400
        );
        assert_eq!(
            compute_period_end(start, every(BillingInterval::Month, 3))
                .unwrap()
                .unix_timestamp(),
            ts(2025, 6, 1)
        );
        assert_eq!(
            compute_period_end(ts(2024, 2, 29), every(BillingInterval::Year, 1))
                .unwrap()
                .unix_timestamp(),
            ts(2025, 2, 28)
        );
    }
}
