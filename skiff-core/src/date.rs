//! Front-matter date parsing for collection sorting.
//!
//! Dates arrive as loosely formatted strings (or epoch numbers) and the
//! collection rule says which layout to expect:
//!
//! | format            | example              |
//! |-------------------|----------------------|
//! | `mmddyyyy`        | `01-15-2023`, `01152023` |
//! | `ddmmyyyy`        | `15/01/2023`         |
//! | `yyyymmdd`        | `2023-01-15`, `20230115` |
//! | `month day, year` | `January 15, 2023`   |
//! | `unix`            | `1673740800`         |

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("unknown date format: {0}")]
    UnknownFormat(String),
    #[error("`{input}` does not match {format}")]
    Invalid { input: String, format: DateFormat },
    #[error("`{0}` is not a calendar date")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFormat {
    #[default]
    MonthDayYear,
    DayMonthYear,
    YearMonthDay,
    LongMonth,
    Unix,
}

impl std::fmt::Display for DateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DateFormat::MonthDayYear => "mmddyyyy",
            DateFormat::DayMonthYear => "ddmmyyyy",
            DateFormat::YearMonthDay => "yyyymmdd",
            DateFormat::LongMonth => "month day, year",
            DateFormat::Unix => "unix",
        };
        f.write_str(name)
    }
}

impl FromStr for DateFormat {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "mmddyyyy" => Ok(DateFormat::MonthDayYear),
            "ddmmyyyy" => Ok(DateFormat::DayMonthYear),
            "yyyymmdd" => Ok(DateFormat::YearMonthDay),
            "monthdayyear" | "long" => Ok(DateFormat::LongMonth),
            "unix" | "epoch" => Ok(DateFormat::Unix),
            _ => Err(DateError::UnknownFormat(s.to_string())),
        }
    }
}

/// Parse a front-matter value. Numbers are accepted for `unix` and for the
/// undelimited numeric formats (`20230115`).
pub fn parse_date(value: &Value, format: DateFormat) -> Result<NaiveDateTime, DateError> {
    match value {
        Value::String(s) => parse_date_str(s, format),
        Value::Number(n) => parse_date_str(&n.to_string(), format),
        other => Err(DateError::Invalid {
            input: other.to_string(),
            format,
        }),
    }
}

pub fn parse_date_str(input: &str, format: DateFormat) -> Result<NaiveDateTime, DateError> {
    let input = input.trim();
    let invalid = || DateError::Invalid {
        input: input.to_string(),
        format,
    };

    let (year, month, day) = match format {
        DateFormat::Unix => {
            let secs: i64 = input.parse().map_err(|_| invalid())?;
            return DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| DateError::OutOfRange(input.to_string()));
        }
        DateFormat::LongMonth => parse_long(input).ok_or_else(invalid)?,
        numeric => {
            let [a, b, c] = split_numeric(input, numeric).ok_or_else(invalid)?;
            match numeric {
                DateFormat::MonthDayYear => (c, a, b),
                DateFormat::DayMonthYear => (c, b, a),
                _ => (a, b, c),
            }
        }
    };

    let year = i32::try_from(year).map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| date.and_time(NaiveTime::MIN))
        .ok_or_else(|| DateError::OutOfRange(input.to_string()))
}

/// Split a numeric date into its three parts in input order, either on
/// `-`/`/` or by fixed width when the input is eight bare digits.
fn split_numeric(input: &str, format: DateFormat) -> Option<[u32; 3]> {
    let parts: Vec<&str> = if input.contains(['-', '/']) {
        input.split(['-', '/']).collect()
    } else if input.len() == 8 && input.bytes().all(|b| b.is_ascii_digit()) {
        match format {
            DateFormat::YearMonthDay => vec![&input[0..4], &input[4..6], &input[6..8]],
            _ => vec![&input[0..2], &input[2..4], &input[4..8]],
        }
    } else {
        return None;
    };

    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    Some([a.parse().ok()?, b.parse().ok()?, c.parse().ok()?])
}

fn parse_long(input: &str) -> Option<(u32, u32, u32)> {
    let cleaned = input.replace(',', " ");
    let mut words = cleaned.split_whitespace();
    let month = month_number(words.next()?)?;
    let day = words.next()?.parse().ok()?;
    let year = words.next()?.parse().ok()?;
    if words.next().is_some() {
        return None;
    }
    Some((year, month, day))
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&name))
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_time(NaiveTime::MIN)
    }

    #[test]
    fn test_yyyymmdd_fixed_width() {
        assert_eq!(
            parse_date_str("20230115", DateFormat::YearMonthDay).unwrap(),
            ymd(2023, 1, 15)
        );
    }

    #[test]
    fn test_mmddyyyy_delimited() {
        assert_eq!(
            parse_date_str("01-15-2023", DateFormat::MonthDayYear).unwrap(),
            ymd(2023, 1, 15)
        );
        assert_eq!(
            parse_date_str("1/5/2023", DateFormat::MonthDayYear).unwrap(),
            ymd(2023, 1, 5)
        );
        assert_eq!(
            parse_date_str("01152023", DateFormat::MonthDayYear).unwrap(),
            ymd(2023, 1, 15)
        );
    }

    #[test]
    fn test_ddmmyyyy_and_iso() {
        assert_eq!(
            parse_date_str("15/01/2023", DateFormat::DayMonthYear).unwrap(),
            ymd(2023, 1, 15)
        );
        assert_eq!(
            parse_date_str("2023-01-15", DateFormat::YearMonthDay).unwrap(),
            ymd(2023, 1, 15)
        );
    }

    #[test]
    fn test_long_month() {
        assert_eq!(
            parse_date_str("January 15, 2023", DateFormat::LongMonth).unwrap(),
            ymd(2023, 1, 15)
        );
        assert_eq!(
            parse_date_str("Sept 3, 2021", DateFormat::LongMonth).unwrap(),
            ymd(2021, 9, 3)
        );
        assert!(parse_date_str("Ja 15, 2023", DateFormat::LongMonth).is_err());
    }

    #[test]
    fn test_unix_seconds() {
        assert_eq!(
            parse_date(&json!(1673740800), DateFormat::Unix).unwrap(),
            ymd(2023, 1, 15)
        );
        assert_eq!(
            parse_date(&json!("1673740800"), DateFormat::Unix).unwrap(),
            ymd(2023, 1, 15)
        );
    }

    #[test]
    fn test_numeric_value_for_fixed_width() {
        assert_eq!(
            parse_date(&json!(20230115), DateFormat::YearMonthDay).unwrap(),
            ymd(2023, 1, 15)
        );
    }

    #[test]
    fn test_rejects_garbage_and_impossible_dates() {
        assert!(matches!(
            parse_date_str("not a date", DateFormat::MonthDayYear),
            Err(DateError::Invalid { .. })
        ));
        assert!(matches!(
            parse_date_str("02-30-2023", DateFormat::MonthDayYear),
            Err(DateError::OutOfRange(_))
        ));
        assert!(parse_date(&json!(true), DateFormat::Unix).is_err());
    }

    #[test]
    fn test_format_names() {
        assert_eq!("mmddyyyy".parse::<DateFormat>(), Ok(DateFormat::MonthDayYear));
        assert_eq!("YYYY-MM-DD".parse::<DateFormat>(), Ok(DateFormat::YearMonthDay));
        assert_eq!("Month Day, Year".parse::<DateFormat>(), Ok(DateFormat::LongMonth));
        assert!(matches!(
            "julian".parse::<DateFormat>(),
            Err(DateError::UnknownFormat(_))
        ));
    }
}
