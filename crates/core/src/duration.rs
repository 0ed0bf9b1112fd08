//! Punishment durations.
//!
//! A [`PunishmentDuration`] is either permanent or ends at an absolute instant.
//! Values are immutable; revising a punishment creates a new duration.
//!
//! Three textual forms exist:
//!
//! - compact input such as `10m` or `7d` ([`PunishmentDuration::parse`]),
//! - an absolute timestamp for storage ([`PunishmentDuration::expiration_as_timestamp`]),
//! - epoch milliseconds for mute sync messages ([`PunishmentDuration::expiration_millis`]).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use warden_common::{AppError, AppResult};

/// Expirations at or after 9999-12-31T23:59:59Z are treated as permanent.
pub const MAX_EXPIRATION_MILLIS: i64 = 253_402_300_799_000;

/// Marker returned by [`PunishmentDuration::remaining_duration`] for permanent durations.
pub const PERMANENT_MARKER: &str = "permanent";

const SECOND_MILLIS: i64 = 1_000;
const MINUTE_MILLIS: i64 = 60 * SECOND_MILLIS;
const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// How a remaining duration is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringRepresentation {
    /// Every unit, e.g. `0d02h03m04s`.
    Full,
    /// Leading zero units dropped, e.g. `2h03m04s`.
    #[default]
    Long,
    /// Every zero unit dropped, e.g. `2h4s`.
    Short,
}

/// How long a punishment lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunishmentDuration {
    /// Never expires.
    Permanent,
    /// Expires at the given instant.
    Until(DateTime<Utc>),
}

impl PunishmentDuration {
    /// A duration that never ends.
    #[must_use]
    pub const fn permanent() -> Self {
        Self::Permanent
    }

    /// Parse a compact duration such as `30s`, `10m`, `2h` or `7d`.
    ///
    /// The duration starts now.
    pub fn parse(text: &str) -> AppResult<Self> {
        Ok(Self::of_millis(parse_millis(text)?))
    }

    /// A duration ending `millis` milliseconds from now.
    ///
    /// Zero or negative values produce an already elapsed duration. Offsets past
    /// the representable range collapse to permanent.
    #[must_use]
    pub fn of_millis(millis: i64) -> Self {
        Self::of_millis_from(Utc::now(), millis)
    }

    /// A duration ending `millis` milliseconds after `start`.
    #[must_use]
    pub fn of_millis_from(start: DateTime<Utc>, millis: i64) -> Self {
        TimeDelta::try_milliseconds(millis)
            .and_then(|delta| start.checked_add_signed(delta))
            .map_or(Self::Permanent, Self::from)
    }

    /// A duration ending at `expiration`, read back from storage or a log.
    ///
    /// Expirations at or after [`MAX_EXPIRATION_MILLIS`] become permanent.
    #[must_use]
    pub fn from_timestamp(expiration: Option<DateTime<Utc>>) -> Self {
        expiration.map_or(Self::Permanent, Self::from)
    }

    /// A duration ending at the given epoch milliseconds, as carried on the wire.
    pub fn from_timestamp_millis(millis: i64) -> AppResult<Self> {
        if millis >= MAX_EXPIRATION_MILLIS {
            return Ok(Self::Permanent);
        }

        DateTime::from_timestamp_millis(millis)
            .map(Self::Until)
            .ok_or_else(|| AppError::InvalidFormat(format!("timestamp {millis} is out of range")))
    }

    /// Whether this duration never ends.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Whether the duration has not yet elapsed. Evaluated against the clock on every call.
    #[must_use]
    pub fn is_ongoing(&self) -> bool {
        self.is_ongoing_at(Utc::now())
    }

    /// Whether the duration has not elapsed at `now`.
    #[must_use]
    pub fn is_ongoing_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Permanent => true,
            Self::Until(expiration) => *expiration > now,
        }
    }

    /// The expiration instant, `None` when permanent.
    #[must_use]
    pub const fn expiration(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Permanent => None,
            Self::Until(expiration) => Some(*expiration),
        }
    }

    /// Time left at `now`, floored at zero. `None` when permanent.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.expiration()
            .map(|expiration| (expiration - now).max(TimeDelta::zero()))
    }

    /// Human readable time left, e.g. `2h03m04s` or `permanent`.
    #[must_use]
    pub fn remaining_duration(&self) -> String {
        self.remaining_duration_with(StringRepresentation::default())
    }

    /// Human readable time left in the given representation.
    #[must_use]
    pub fn remaining_duration_with(&self, representation: StringRepresentation) -> String {
        self.remaining_duration_at(Utc::now(), representation)
    }

    /// Human readable time left at `now` in the given representation.
    #[must_use]
    pub fn remaining_duration_at(
        &self,
        now: DateTime<Utc>,
        representation: StringRepresentation,
    ) -> String {
        match self.remaining_at(now) {
            None => PERMANENT_MARKER.to_string(),
            Some(remaining) => format_remaining(remaining, representation),
        }
    }

    /// Expiration for storage, `None` when permanent.
    #[must_use]
    pub const fn expiration_as_timestamp(&self) -> Option<DateTime<Utc>> {
        self.expiration()
    }

    /// Expiration for display, `dd/MM/yyyy HH:mm:ss` in UTC or `Permanent`.
    #[must_use]
    pub fn expiration_as_string(&self) -> String {
        match self {
            Self::Permanent => "Permanent".to_string(),
            Self::Until(expiration) => expiration.format("%d/%m/%Y %H:%M:%S").to_string(),
        }
    }

    /// Expiration in epoch milliseconds for the wire, `None` when permanent.
    #[must_use]
    pub fn expiration_millis(&self) -> Option<i64> {
        self.expiration().map(|expiration| expiration.timestamp_millis())
    }
}

impl From<DateTime<Utc>> for PunishmentDuration {
    fn from(expiration: DateTime<Utc>) -> Self {
        if expiration.timestamp_millis() >= MAX_EXPIRATION_MILLIS {
            Self::Permanent
        } else {
            Self::Until(expiration)
        }
    }
}

impl FromStr for PunishmentDuration {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PunishmentDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expiration_as_string())
    }
}

// Soonest expiration first, permanent last.
impl Ord for PunishmentDuration {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Permanent, Self::Permanent) => Ordering::Equal,
            (Self::Permanent, Self::Until(_)) => Ordering::Greater,
            (Self::Until(_), Self::Permanent) => Ordering::Less,
            (Self::Until(a), Self::Until(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PunishmentDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parse a compact duration into milliseconds.
///
/// Accepts exactly one base-10 integer in `0..=i64::MAX` immediately followed by
/// one of `s`, `m`, `h` or `d`. Signs, whitespace, missing or unknown units,
/// several components and overflow are rejected.
pub fn parse_millis(text: &str) -> AppResult<i64> {
    let invalid = |why: &str| AppError::InvalidFormat(format!("'{text}': {why}"));

    let Some(unit) = text.chars().last() else {
        return Err(invalid("empty duration"));
    };
    let digits = &text[..text.len() - unit.len_utf8()];

    let unit_millis = match unit {
        's' => SECOND_MILLIS,
        'm' => MINUTE_MILLIS,
        'h' => HOUR_MILLIS,
        'd' => DAY_MILLIS,
        c if c.is_ascii_digit() => return Err(invalid("missing unit")),
        _ => return Err(invalid("unknown unit")),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected a non-negative integer before the unit"));
    }

    let amount: i64 = digits.parse().map_err(|_| invalid("number too large"))?;
    amount
        .checked_mul(unit_millis)
        .ok_or_else(|| invalid("number too large"))
}

fn format_remaining(remaining: TimeDelta, representation: StringRepresentation) -> String {
    let total = remaining.num_seconds();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    match representation {
        StringRepresentation::Full => format!("{days}d{hours:02}h{minutes:02}m{seconds:02}s"),
        StringRepresentation::Long => {
            if days > 0 {
                format!("{days}d{hours:02}h{minutes:02}m{seconds:02}s")
            } else if hours > 0 {
                format!("{hours}h{minutes:02}m{seconds:02}s")
            } else if minutes > 0 {
                format!("{minutes}m{seconds:02}s")
            } else {
                format!("{seconds}s")
            }
        }
        StringRepresentation::Short => {
            let parts = [(days, 'd'), (hours, 'h'), (minutes, 'm'), (seconds, 's')];
            let text: String = parts
                .iter()
                .filter(|(value, _)| *value > 0)
                .map(|(value, unit)| format!("{value}{unit}"))
                .collect();
            if text.is_empty() {
                "0s".to_string()
            } else {
                text
            }
        }
    }
}
