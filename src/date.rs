//! Date literal parser using nom.
//!
//! Two literal shapes are understood:
//!
//! ```text
//! $now                  now, day precision
//! $now(M:-3,d:1)        now minus 3 months plus 1 day, day precision
//! $now(h:-2)            two hours ago, hour precision
//! $now(M:-1)            a month ago, month precision
//! 2024-03               March 2024, month precision
//! 2024-03-02T10:00      minute precision
//! 2024-03-02T10:00:00Z  second precision
//! ```
//!
//! The precision ("min unit") is the finest component the literal spelled
//! out. Range operators use it to widen a literal into `[start, end)`.

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, TimeDelta, TimeZone, Timelike, Utc,
};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_opt, map_res, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, separated_pair, terminated},
};
use std::fmt;
use thiserror::Error;

/// Precision of a date literal, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl DateUnit {
    /// Short form used in `$now(...)` adjustments.
    pub fn as_char(&self) -> char {
        match self {
            DateUnit::Second => 's',
            DateUnit::Minute => 'm',
            DateUnit::Hour => 'h',
            DateUnit::Day => 'd',
            DateUnit::Month => 'M',
            DateUnit::Year => 'y',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(DateUnit::Second),
            'm' => Some(DateUnit::Minute),
            'h' => Some(DateUnit::Hour),
            'd' => Some(DateUnit::Day),
            'M' => Some(DateUnit::Month),
            'y' => Some(DateUnit::Year),
            _ => None,
        }
    }

    /// Floor `date` to the start of this unit.
    pub fn start_of(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let (mo, d, h, mi, s) = match self {
            DateUnit::Year => (1, 1, 0, 0, 0),
            DateUnit::Month => (date.month(), 1, 0, 0, 0),
            DateUnit::Day => (date.month(), date.day(), 0, 0, 0),
            DateUnit::Hour => (date.month(), date.day(), date.hour(), 0, 0),
            DateUnit::Minute => (date.month(), date.day(), date.hour(), date.minute(), 0),
            DateUnit::Second => (
                date.month(),
                date.day(),
                date.hour(),
                date.minute(),
                date.second(),
            ),
        };
        NaiveDate::from_ymd_opt(date.year(), mo, d)
            .and_then(|day| day.and_hms_opt(h, mi, s))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or(date)
    }

    /// Add `amount` of this unit, `None` on overflow.
    ///
    /// Month and year steps clamp to the end of the month, so
    /// January 31st plus one month is the last day of February.
    pub fn add(&self, date: DateTime<Utc>, amount: i64) -> Option<DateTime<Utc>> {
        match self {
            DateUnit::Year => add_months(date, amount.checked_mul(12)?),
            DateUnit::Month => add_months(date, amount),
            DateUnit::Day => date.checked_add_signed(TimeDelta::try_days(amount)?),
            DateUnit::Hour => date.checked_add_signed(TimeDelta::try_hours(amount)?),
            DateUnit::Minute => date.checked_add_signed(TimeDelta::try_minutes(amount)?),
            DateUnit::Second => date.checked_add_signed(TimeDelta::try_seconds(amount)?),
        }
    }
}

fn add_months(date: DateTime<Utc>, amount: i64) -> Option<DateTime<Utc>> {
    let months = Months::new(u32::try_from(amount.unsigned_abs()).ok()?);
    if amount >= 0 {
        date.checked_add_months(months)
    } else {
        date.checked_sub_months(months)
    }
}

impl fmt::Display for DateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A resolved date literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    /// The instant the literal resolved to.
    pub date: DateTime<Utc>,
    /// Finest unit the literal specified.
    pub unit: DateUnit,
}

impl ParsedDate {
    /// Inclusive lower bound: the instant floored to its unit.
    pub fn start(&self) -> DateTime<Utc> {
        self.unit.start_of(self.date)
    }

    /// Exclusive upper bound: one unit after [`ParsedDate::start`].
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.unit.add(self.start(), 1)
    }
}

/// The literal matched neither the relative nor the absolute shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse date '{0}'")]
pub struct DateParseError(pub String);

/// Parse a date literal relative to the current time.
pub fn parse_date(literal: &str) -> Result<ParsedDate, DateParseError> {
    parse_date_at(literal, Utc::now())
}

/// Parse a date literal with an explicit reference time for `$now`.
pub fn parse_date_at(literal: &str, now: DateTime<Utc>) -> Result<ParsedDate, DateParseError> {
    let literal = literal.trim();
    let error = || DateParseError(literal.to_string());

    if let Ok((_, adjustments)) = all_consuming(relative)(literal) {
        // Finest adjusted unit; bare $now is day precision
        let unit = adjustments
            .iter()
            .map(|(unit, _)| *unit)
            .min()
            .unwrap_or(DateUnit::Day);
        let mut date = now;
        for (adj_unit, amount) in adjustments {
            date = adj_unit.add(date, amount).ok_or_else(error)?;
        }
        return Ok(ParsedDate { date, unit });
    }

    if let Ok((_, parts)) = all_consuming(absolute)(literal) {
        return parts.resolve().ok_or_else(error);
    }

    // Best effort for anything ISO-ish the grammar above doesn't cover
    DateTime::parse_from_rfc3339(literal)
        .map(|date| ParsedDate {
            date: date.with_timezone(&Utc),
            unit: DateUnit::Second,
        })
        .map_err(|_| error())
}

/// Parse `$now` with an optional `(unit:amount, ...)` list.
fn relative(input: &str) -> IResult<&str, Vec<(DateUnit, i64)>> {
    let (input, _) = tag("$now")(input)?;
    let (input, adjustments) = opt(delimited(
        char('('),
        terminated(separated_list1(char(','), adjustment), opt(char(','))),
        char(')'),
    ))(input)?;
    Ok((input, adjustments.unwrap_or_default()))
}

/// Parse a single `d:-28` adjustment.
fn adjustment(input: &str) -> IResult<&str, (DateUnit, i64)> {
    separated_pair(
        map_opt(one_of("yMdhms"), DateUnit::from_char),
        char(':'),
        map_res(recognize(pair(opt(one_of("+-")), digit1)), str::parse::<i64>),
    )(input)
}

#[derive(Debug, Default)]
struct DateParts {
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
    nanos: u32,
    offset_secs: Option<i32>,
}

impl DateParts {
    fn unit(&self) -> DateUnit {
        if self.second.is_some() {
            DateUnit::Second
        } else if self.minute.is_some() {
            DateUnit::Minute
        } else if self.hour.is_some() {
            DateUnit::Hour
        } else if self.day.is_some() {
            DateUnit::Day
        } else if self.month.is_some() {
            DateUnit::Month
        } else {
            DateUnit::Year
        }
    }

    fn resolve(&self) -> Option<ParsedDate> {
        let naive = NaiveDate::from_ymd_opt(
            self.year,
            self.month.unwrap_or(1),
            self.day.unwrap_or(1),
        )?
        .and_hms_nano_opt(
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
            self.nanos,
        )?;

        let date = match self.offset_secs {
            Some(secs) => FixedOffset::east_opt(secs)?
                .from_local_datetime(&naive)
                .single()?
                .with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        };

        Some(ParsedDate {
            date,
            unit: self.unit(),
        })
    }
}

fn digits(n: usize) -> impl Fn(&str) -> IResult<&str, u32> {
    move |input| {
        map_res(take_while_m_n(n, n, |c: char| c.is_ascii_digit()), str::parse::<u32>)(input)
    }
}

/// Parse `YYYY[-MM[-DD[(T| )HH[:MM[:SS[.fff]]][offset]]]]`.
fn absolute(input: &str) -> IResult<&str, DateParts> {
    let (input, year) = digits(4)(input)?;
    let mut parts = DateParts {
        year: year as i32,
        ..Default::default()
    };

    let (input, month) = opt(preceded(char('-'), digits(2)))(input)?;
    parts.month = month;
    if month.is_none() {
        return Ok((input, parts));
    }

    let (input, day) = opt(preceded(char('-'), digits(2)))(input)?;
    parts.day = day;
    if day.is_none() {
        return Ok((input, parts));
    }

    let (input, hour) = opt(preceded(one_of("T "), digits(2)))(input)?;
    parts.hour = hour;
    if hour.is_none() {
        return Ok((input, parts));
    }

    let (input, minute) = opt(preceded(char(':'), digits(2)))(input)?;
    parts.minute = minute;
    let input = if minute.is_some() {
        let (input, second) = opt(preceded(char(':'), digits(2)))(input)?;
        parts.second = second;
        if second.is_some() {
            let (input, frac) = opt(preceded(char('.'), digit1))(input)?;
            parts.nanos = frac.map(fraction_to_nanos).unwrap_or(0);
            input
        } else {
            input
        }
    } else {
        input
    };

    let (input, offset) = opt(utc_offset)(input)?;
    parts.offset_secs = offset;
    Ok((input, parts))
}

/// Parse `Z`, `+HH:MM`, `-HHMM` into seconds east of UTC.
fn utc_offset(input: &str) -> IResult<&str, i32> {
    alt((
        map(char('Z'), |_| 0),
        map(
            pair(
                one_of("+-"),
                pair(digits(2), preceded(opt(char(':')), digits(2))),
            ),
            |(sign, (h, m))| {
                let secs = (h * 3600 + m * 60) as i32;
                if sign == '-' { -secs } else { secs }
            },
        ),
    ))(input)
}

fn fraction_to_nanos(frac: &str) -> u32 {
    let mut padded: String = frac.chars().take(9).collect();
    while padded.len() < 9 {
        padded.push('0');
    }
    padded.parse().unwrap_or(0)
}
