//! Date/time values in both the WS-Management and native CIM dialects.
//!
//! The WS-Management dialect accepts ISO-8601 intervals (`P1DT2H3M4.5S`),
//! full timestamps (`2024-05-01T10:00:00.000250+02:00`) and date-only
//! values (`2024-05-01Z`). The native CIM form is the fixed 25-character
//! string `yyyymmddhhmmss.mmmmmmsutc`, or `ddddddddhhmmss.mmmmmm:000` for
//! intervals, where a date-only timestamp wildcards its time with `*`.

use std::time::{Duration, SystemTime};

use thiserror::Error;

/// Errors raised while parsing a date/time value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DateTimeError {
    /// The text does not follow any supported layout.
    #[error("malformed datetime value {0:?}")]
    Malformed(String),
    /// A field is outside its permitted range.
    #[error("datetime field {field} out of range in {value:?}")]
    OutOfRange { field: &'static str, value: String },
}

/// Elapsed time, normalised so that hours < 24, minutes < 60 and seconds < 60.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

impl Interval {
    /// Equivalent standard duration.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        let secs = u64::from(self.days) * 86_400
            + u64::from(self.hours) * 3_600
            + u64::from(self.minutes) * 60
            + u64::from(self.seconds);
        Duration::from_secs(secs) + Duration::from_micros(u64::from(self.microseconds))
    }

    /// Interval from a duration, truncated to whole microseconds.
    ///
    /// Returns `None` if the day count does not fit in 32 bits.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Option<Self> {
        let secs = duration.as_secs();
        let days = u32::try_from(secs / 86_400).ok()?;
        let rem = secs % 86_400;
        Some(Self {
            days,
            hours: narrow(rem / 3_600),
            minutes: narrow(rem % 3_600 / 60),
            seconds: narrow(rem % 60),
            microseconds: duration.subsec_micros(),
        })
    }
}

/// Wall-clock portion of a timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microseconds: u32,
}

/// Calendar timestamp; `time` is `None` for the wildcarded date-only form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub time: Option<TimeOfDay>,
    /// Offset from UTC in minutes.
    pub utc_offset: i16,
}

impl Timestamp {
    /// Point in time denoted by a full timestamp.
    ///
    /// Date-only timestamps do not denote a single instant and yield `None`.
    #[must_use]
    pub fn to_system_time(&self) -> Option<SystemTime> {
        let time = self.time?;
        let days = days_from_civil(
            i64::from(self.year),
            i64::from(self.month),
            i64::from(self.day),
        );
        let secs = days * 86_400
            + i64::from(time.hour) * 3_600
            + i64::from(time.minute) * 60
            + i64::from(time.second)
            - i64::from(self.utc_offset) * 60;
        let micros = Duration::from_micros(u64::from(time.microseconds));
        if secs >= 0 {
            SystemTime::UNIX_EPOCH
                .checked_add(Duration::from_secs(secs.unsigned_abs()))?
                .checked_add(micros)
        } else {
            SystemTime::UNIX_EPOCH
                .checked_sub(Duration::from_secs(secs.unsigned_abs()))?
                .checked_add(micros)
        }
    }
}

/// A CIM date/time value: an interval or a timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CimDateTime {
    Interval(Interval),
    Timestamp(Timestamp),
}

impl CimDateTime {
    /// Parse the WS-Management dialect, falling back to the native CIM form.
    ///
    /// # Errors
    ///
    /// Returns [`DateTimeError`] when the value matches no supported layout
    /// or a field is out of range.
    pub fn parse_wsm(text: &str) -> Result<Self, DateTimeError> {
        if text.len() < 3 || !text.is_ascii() || text.starts_with('-') {
            return Err(malformed(text));
        }
        if text.starts_with('P') {
            parse_interval(text).map(Self::Interval)
        } else if text.contains('T') {
            parse_timestamp(text).map(Self::Timestamp)
        } else if text.matches('-').count() >= 2 {
            parse_date(text).map(Self::Timestamp)
        } else {
            Self::parse_cim(text)
        }
    }

    /// Parse the native 25-character CIM form.
    ///
    /// # Errors
    ///
    /// Returns [`DateTimeError`] when the layout or a field is invalid.
    pub fn parse_cim(text: &str) -> Result<Self, DateTimeError> {
        let bytes = text.as_bytes();
        if bytes.len() != 25 || !text.is_ascii() || bytes[14] != b'.' {
            return Err(malformed(text));
        }
        if bytes[21] == b':' {
            if &text[22..] != "000" {
                return Err(malformed(text));
            }
            let interval = Interval {
                days: fixed_digits(text, 0, 8)?,
                hours: bounded(text, 8, 2, 23, "hours")?,
                minutes: bounded(text, 10, 2, 59, "minutes")?,
                seconds: bounded(text, 12, 2, 59, "seconds")?,
                microseconds: fixed_digits(text, 15, 6)?,
            };
            return Ok(Self::Interval(interval));
        }
        let utc_offset = match bytes[21] {
            b'+' => offset_minutes(fixed_digits(text, 22, 3)?, text)?,
            b'-' => -offset_minutes(fixed_digits(text, 22, 3)?, text)?,
            _ => return Err(malformed(text)),
        };
        let time = if &text[8..21] == "******.******" {
            None
        } else {
            Some(TimeOfDay {
                hour: bounded(text, 8, 2, 23, "hour")?,
                minute: bounded(text, 10, 2, 59, "minute")?,
                second: bounded(text, 12, 2, 59, "second")?,
                microseconds: fixed_digits(text, 15, 6)?,
            })
        };
        let timestamp = Timestamp {
            year: fixed_digits(text, 0, 4)?.try_into().map_err(|_| malformed(text))?,
            month: bounded(text, 4, 2, 12, "month")?,
            day: bounded(text, 6, 2, 31, "day")?,
            time,
            utc_offset,
        };
        check_calendar(&timestamp, text)?;
        Ok(Self::Timestamp(timestamp))
    }

    /// Render in the WS-Management dialect.
    #[must_use]
    pub fn to_wsm_string(&self) -> String {
        match self {
            Self::Interval(interval) => format_interval(interval),
            Self::Timestamp(ts) => {
                let mut out = format!("{:04}-{:02}-{:02}", ts.year, ts.month, ts.day);
                if let Some(time) = ts.time {
                    out.push_str(&format!(
                        "T{:02}:{:02}:{:02}",
                        time.hour, time.minute, time.second
                    ));
                    if time.microseconds != 0 {
                        out.push_str(&format!(".{:06}", time.microseconds));
                    }
                }
                push_offset(&mut out, ts.utc_offset);
                out
            }
        }
    }

    /// Render in the native 25-character CIM form.
    #[must_use]
    pub fn to_cim_string(&self) -> String {
        match self {
            Self::Interval(i) => format!(
                "{:08}{:02}{:02}{:02}.{:06}:000",
                i.days, i.hours, i.minutes, i.seconds, i.microseconds
            ),
            Self::Timestamp(ts) => {
                let time = ts.time.map_or_else(
                    || "******.******".to_owned(),
                    |t| {
                        format!(
                            "{:02}{:02}{:02}.{:06}",
                            t.hour, t.minute, t.second, t.microseconds
                        )
                    },
                );
                let sign = if ts.utc_offset < 0 { '-' } else { '+' };
                format!(
                    "{:04}{:02}{:02}{time}{sign}{:03}",
                    ts.year,
                    ts.month,
                    ts.day,
                    ts.utc_offset.unsigned_abs()
                )
            }
        }
    }
}

fn malformed(text: &str) -> DateTimeError { DateTimeError::Malformed(text.to_owned()) }

fn narrow(value: u64) -> u8 { u8::try_from(value).unwrap_or(u8::MAX) }

/// Parse `PnYnMnDTnHnMnS`. Units appear in order and may be skipped; years
/// count as 365 days plus one per four, months as 30 days plus one per two.
fn parse_interval(text: &str) -> Result<Interval, DateTimeError> {
    let body = &text[1..];
    let (date_part, time_part) = match body.split_once('T') {
        Some((_, "")) => return Err(malformed(text)),
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut date_fields = [0_u64; 3];
    parse_units(date_part, &['Y', 'M', 'D'], &mut date_fields, None, text)?;
    let mut time_fields = [0_u64; 3];
    let mut micros = 0_u32;
    if let Some(time) = time_part {
        parse_units(time, &['H', 'M', 'S'], &mut time_fields, Some(&mut micros), text)?;
    }

    let [years, months, days] = date_fields;
    let [hours, minutes, seconds] = time_fields;
    let minutes = minutes + seconds / 60;
    let hours = hours + minutes / 60;
    let days = years * 365 + years / 4 + months * 30 + months / 2 + days + hours / 24;
    let days = u32::try_from(days).map_err(|_| DateTimeError::OutOfRange {
        field: "days",
        value: text.to_owned(),
    })?;
    Ok(Interval {
        days,
        hours: narrow(hours % 24),
        minutes: narrow(minutes % 60),
        seconds: narrow(seconds % 60),
        microseconds: micros,
    })
}

fn parse_units(
    mut rest: &str,
    units: &[char; 3],
    fields: &mut [u64; 3],
    mut fraction: Option<&mut u32>,
    text: &str,
) -> Result<(), DateTimeError> {
    let mut next_unit = 0;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits > 9 {
            return Err(malformed(text));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| malformed(text))?;
        rest = &rest[digits..];
        let mut marker = rest.chars().next().ok_or_else(|| malformed(text))?;

        if marker == '.' {
            let Some(micros) = fraction.as_deref_mut() else {
                return Err(malformed(text));
            };
            let frac_digits = rest[1..].bytes().take_while(u8::is_ascii_digit).count();
            if frac_digits == 0 {
                return Err(malformed(text));
            }
            *micros = fraction_to_micros(&rest[1..=frac_digits]);
            rest = &rest[1 + frac_digits..];
            marker = rest.chars().next().ok_or_else(|| malformed(text))?;
            if marker != 'S' {
                return Err(malformed(text));
            }
        }

        let position = units[next_unit..]
            .iter()
            .position(|unit| *unit == marker)
            .ok_or_else(|| malformed(text))?;
        fields[next_unit + position] = value;
        next_unit += position + 1;
        rest = &rest[1..];
        if next_unit == units.len() && !rest.is_empty() {
            return Err(malformed(text));
        }
    }
    Ok(())
}

fn fraction_to_micros(digits: &str) -> u32 {
    digits
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(6)
        .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
}

/// Parse `YYYY-MM-DDThh:mm:ss[.f+][Z|+hh:mm|-hh:mm]`.
fn parse_timestamp(text: &str) -> Result<Timestamp, DateTimeError> {
    let bytes = text.as_bytes();
    if bytes.len() < 19
        || bytes[4] != b'-'
        || bytes[7] != b'-'
        || bytes[10] != b'T'
        || bytes[13] != b':'
        || bytes[16] != b':'
    {
        return Err(malformed(text));
    }
    let mut time = TimeOfDay {
        hour: bounded(text, 11, 2, 23, "hour")?,
        minute: bounded(text, 14, 2, 59, "minute")?,
        second: bounded(text, 17, 2, 59, "second")?,
        microseconds: 0,
    };
    let mut rest = &text[19..];
    if let Some(fraction) = rest.strip_prefix('.') {
        let digits = fraction.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(malformed(text));
        }
        time.microseconds = fraction_to_micros(&fraction[..digits]);
        rest = &fraction[digits..];
    }
    let timestamp = Timestamp {
        year: fixed_digits(text, 0, 4)?.try_into().map_err(|_| malformed(text))?,
        month: bounded(text, 5, 2, 12, "month")?,
        day: bounded(text, 8, 2, 31, "day")?,
        time: Some(time),
        utc_offset: parse_offset(rest, text)?,
    };
    check_calendar(&timestamp, text)?;
    Ok(timestamp)
}

/// Parse `YYYY-MM-DD[Z|+hh:mm|-hh:mm]`.
fn parse_date(text: &str) -> Result<Timestamp, DateTimeError> {
    let bytes = text.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return Err(malformed(text));
    }
    let timestamp = Timestamp {
        year: fixed_digits(text, 0, 4)?.try_into().map_err(|_| malformed(text))?,
        month: bounded(text, 5, 2, 12, "month")?,
        day: bounded(text, 8, 2, 31, "day")?,
        time: None,
        utc_offset: parse_offset(&text[10..], text)?,
    };
    check_calendar(&timestamp, text)?;
    Ok(timestamp)
}

fn parse_offset(rest: &str, text: &str) -> Result<i16, DateTimeError> {
    match rest.as_bytes() {
        [] | [b'Z'] => Ok(0),
        [sign @ (b'+' | b'-'), _, _, b':', _, _] => {
            let hours = bounded(rest, 1, 2, 23, "utc offset hours")?;
            let minutes = bounded(rest, 4, 2, 59, "utc offset minutes")?;
            let total = i16::from(hours) * 60 + i16::from(minutes);
            Ok(if *sign == b'-' { -total } else { total })
        }
        _ => Err(malformed(text)),
    }
}

fn offset_minutes(value: u32, text: &str) -> Result<i16, DateTimeError> {
    i16::try_from(value).map_err(|_| malformed(text))
}

fn fixed_digits(text: &str, start: usize, len: usize) -> Result<u32, DateTimeError> {
    let field = text.get(start..start + len).ok_or_else(|| malformed(text))?;
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(text));
    }
    field.parse().map_err(|_| malformed(text))
}

fn bounded(
    text: &str,
    start: usize,
    len: usize,
    max: u32,
    field: &'static str,
) -> Result<u8, DateTimeError> {
    let value = fixed_digits(text, start, len)?;
    if value > max {
        return Err(DateTimeError::OutOfRange {
            field,
            value: text.to_owned(),
        });
    }
    Ok(narrow(u64::from(value)))
}

fn check_calendar(ts: &Timestamp, text: &str) -> Result<(), DateTimeError> {
    if ts.month == 0 || ts.day == 0 {
        return Err(DateTimeError::OutOfRange {
            field: if ts.month == 0 { "month" } else { "day" },
            value: text.to_owned(),
        });
    }
    Ok(())
}

fn push_offset(out: &mut String, offset: i16) {
    if offset == 0 {
        out.push('Z');
    } else {
        let sign = if offset < 0 { '-' } else { '+' };
        let abs = offset.unsigned_abs();
        out.push_str(&format!("{sign}{:02}:{:02}", abs / 60, abs % 60));
    }
}

fn format_interval(i: &Interval) -> String {
    let mut out = String::from("P");
    if i.days != 0 {
        out.push_str(&format!("{}D", i.days));
    }
    if i.hours != 0 || i.minutes != 0 || i.seconds != 0 || i.microseconds != 0 {
        out.push('T');
        if i.hours != 0 {
            out.push_str(&format!("{}H", i.hours));
        }
        if i.minutes != 0 {
            out.push_str(&format!("{}M", i.minutes));
        }
        if i.seconds != 0 || i.microseconds != 0 {
            out.push_str(&i.seconds.to_string());
            if i.microseconds != 0 {
                let fraction = format!("{:06}", i.microseconds);
                out.push('.');
                out.push_str(fraction.trim_end_matches('0'));
            }
            out.push('S');
        }
    }
    if out == "P" {
        out.push_str("T0S");
    }
    out
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
