//! Expiry evaluation
//!
//! Pure functions that turn an inventory row into a calendar "days left"
//! value and decide whether the item gets an alert today. Calendar days are
//! taken in a fixed UTC offset so a run at 09:00 and a run at 23:00 agree.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::fmt;

use expiry_countdown_store::ItemRecord;

/// Days-left values that produce an alert
pub const ALERT_DAYS: [i64; 3] = [1, 2, 3];

/// Width of the typed-expiry range query, counted from the start of today
pub const ALERT_WINDOW_DAYS: i64 = 3;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Coarse severity tag stored on a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationLevel {
    Today,
    In1,
    In2,
    In3,
    Info,
}

impl NotificationLevel {
    pub fn from_days_left(days_left: i64) -> Self {
        match days_left {
            0 => NotificationLevel::Today,
            1 => NotificationLevel::In1,
            2 => NotificationLevel::In2,
            3 => NotificationLevel::In3,
            _ => NotificationLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Today => "today",
            NotificationLevel::In1 => "in_1",
            NotificationLevel::In2 => "in_2",
            NotificationLevel::In3 => "in_3",
            NotificationLevel::Info => "info",
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar date of `instant` at `offset`
pub fn calendar_date(instant: DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    instant.with_timezone(offset).date_naive()
}

/// Midnight at `offset` of the day containing `instant`
pub fn start_of_day(instant: DateTime<Utc>, offset: &FixedOffset) -> DateTime<Utc> {
    local_to_utc(calendar_date(instant, offset).and_time(NaiveTime::MIN), offset)
}

pub(crate) fn local_to_utc(local: NaiveDateTime, offset: &FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(offset.local_minus_utc()))))
}

/// Whole calendar days from today to the expiry day. Time of day is ignored,
/// so an item expiring at 23:59 today has 0 days left even at 00:01.
pub fn days_left(expiry: DateTime<Utc>, now: DateTime<Utc>, offset: &FixedOffset) -> i64 {
    (calendar_date(expiry, offset) - calendar_date(now, offset)).num_days()
}

pub fn is_alert_day(days_left: i64) -> bool {
    ALERT_DAYS.contains(&days_left)
}

/// Parse a legacy `expiry_date` string.
///
/// Accepts RFC 3339 and RFC 2822 instants, `YYYY-MM-DD` dates and naive
/// `YYYY-MM-DD HH:MM[:SS]` timestamps. Dates and naive timestamps are read
/// at `offset`.
pub fn parse_legacy_expiry(raw: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(local_to_utc(date.and_time(NaiveTime::MIN), offset));
    }
    if let Some(local) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Some(local_to_utc(local, offset));
    }
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|instant| instant.with_timezone(&Utc))
}

/// The item's expiry instant, preferring the typed field
pub fn extract_expiry(item: &ItemRecord, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    match (item.expiry_ts, item.expiry_date.as_deref()) {
        (Some(typed), _) => Some(typed),
        (None, Some(raw)) => parse_legacy_expiry(raw, offset),
        (None, None) => None,
    }
}

/// An item that gets an alert today
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleItem {
    pub path: String,
    pub family_id: String,
    pub name: String,
    pub days_left: i64,
    pub expiry: DateTime<Utc>,
    pub level: NotificationLevel,
}

/// Why an item was filtered out. Skipping is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoExpiry,
    OutsideAlertDays(i64),
    NoQuantity,
    AlreadyExpired,
    MissingFamily,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Eligible(EligibleItem),
    Skip(SkipReason),
}

/// Applies the alert rules to candidate rows
#[derive(Debug, Clone)]
pub struct ExpiryEvaluator {
    offset: FixedOffset,
    default_item_name: String,
}

impl ExpiryEvaluator {
    pub fn new(offset: FixedOffset, default_item_name: &str) -> Self {
        Self {
            offset,
            default_item_name: default_item_name.to_string(),
        }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    /// Eligible iff days left is 1, 2 or 3, quantity is positive, the expiry
    /// day is not before today and the item belongs to a household.
    pub fn evaluate(&self, item: &ItemRecord, now: DateTime<Utc>) -> Verdict {
        let expiry = match extract_expiry(item, &self.offset) {
            Some(expiry) => expiry,
            None => return Verdict::Skip(SkipReason::NoExpiry),
        };

        let days = days_left(expiry, now, &self.offset);
        if !is_alert_day(days) {
            return Verdict::Skip(SkipReason::OutsideAlertDays(days));
        }

        if item.quantity.filter(|q| *q > 0.0).is_none() {
            return Verdict::Skip(SkipReason::NoQuantity);
        }

        if calendar_date(expiry, &self.offset) < calendar_date(now, &self.offset) {
            return Verdict::Skip(SkipReason::AlreadyExpired);
        }

        let family_id = match item.family_id.as_deref().map(str::trim) {
            Some(family_id) if !family_id.is_empty() => family_id.to_string(),
            _ => return Verdict::Skip(SkipReason::MissingFamily),
        };

        let name = [item.name.as_deref(), item.name_key.as_deref()]
            .into_iter()
            .flatten()
            .find(|n| !n.is_empty())
            .unwrap_or(self.default_item_name.as_str())
            .to_string();

        Verdict::Eligible(EligibleItem {
            path: item.path.clone(),
            family_id,
            name,
            days_left: days,
            expiry,
            level: NotificationLevel::from_days_left(days),
        })
    }
}
