//! Calendar arithmetic and deterministic jitter
//!
//! Everything here is a pure function of its inputs. The jitter and spread
//! helpers in particular must return the same value for the same seed on
//! every run and every platform, since redistribution is expected to be
//! reproducible.

use chrono::{Datelike, Duration, NaiveDate};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Build `year-month-day`, falling back to Feb 28 for Feb 29 in non-leap years
pub fn anniversary_in_year(anchor: NaiveDate, year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, anchor.month(), anchor.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, anchor.month(), 28))
        .unwrap_or(anchor)
}

/// Next occurrence of `anchor`'s month/day at or after `today`
pub fn next_anniversary(today: NaiveDate, anchor: NaiveDate) -> NaiveDate {
    let this_year = anniversary_in_year(anchor, today.year());
    if this_year >= today {
        this_year
    } else {
        anniversary_in_year(anchor, today.year() + 1)
    }
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// `a - b` in days
pub fn diff_days(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days()
}

pub fn compare_dates(a: NaiveDate, b: NaiveDate) -> Ordering {
    a.cmp(&b)
}

/// Whole calendar months elapsed from `from` to `to` (0 if `to` is earlier)
pub fn months_since(from: NaiveDate, to: NaiveDate) -> i64 {
    if to <= from {
        return 0;
    }
    let mut months = (to.year() - from.year()) as i64 * 12 + to.month() as i64 - from.month() as i64;
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

/// First day of `date`'s month
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Stable 64-bit hash of a seed string
///
/// The first eight bytes of SHA-256, read big-endian. Independent of the
/// standard library's randomized hasher.
pub fn stable_hash(seed: &str) -> u64 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Deterministic offset in `[-window_days/2, window_days/2)`
///
/// Seeded by `"{seed_id}_{event_type}_{year}"`. A window of 0 or 1 yields 0.
pub fn jitter(seed_id: i64, event_type: &str, year: i32, window_days: i64) -> i64 {
    if window_days <= 1 {
        return 0;
    }
    let hash = stable_hash(&format!("{seed_id}_{event_type}_{year}"));
    (hash % window_days as u64) as i64 - window_days / 2
}

/// Deterministic date in `[start, end]` keyed by contact id
///
/// Returns `start` when the range is empty or inverted.
pub fn spread_date(contact_id: i64, start: NaiveDate, end: NaiveDate) -> NaiveDate {
    let total_days = diff_days(end, start) + 1;
    if total_days <= 1 {
        return start;
    }
    add_days(start, contact_id.rem_euclid(total_days))
}
