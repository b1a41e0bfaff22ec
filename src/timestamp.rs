//! Reconstruction of admission timestamps and parsing of discharge timestamps.
//!
//! The admission date is never stored on its own in the exports: it is encoded in the IP number
//! (`IP` + `YYMMDD` + sequence), and the time of day is kept in a separate column.
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Where the admission date lives inside an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentifierLayout {
    pub prefix: String,
    /// Identifiers shorter than this (in characters) are rejected.
    pub min_len: usize,
    pub year_offset: usize,
    pub month_offset: usize,
    pub day_offset: usize,
    /// Added to the two-digit year.
    pub century: i32,
}

impl Default for IdentifierLayout {
    fn default() -> Self {
        IdentifierLayout {
            prefix: "IP".into(),
            min_len: 9,
            year_offset: 2,
            month_offset: 4,
            day_offset: 6,
            century: 2000,
        }
    }
}

impl IdentifierLayout {
    /// The calendar date encoded in `identifier`, if it has one.
    pub fn date_of(&self, identifier: &str) -> Option<NaiveDate> {
        let identifier = identifier.trim();
        if identifier.chars().count() < self.min_len || !identifier.starts_with(&self.prefix) {
            return None;
        }
        let year = two_digits(identifier, self.year_offset)?;
        let month = two_digits(identifier, self.month_offset)?;
        let day = two_digits(identifier, self.day_offset)?;
        NaiveDate::from_ymd_opt(self.century + year as i32, month, day)
    }
}

fn two_digits(s: &str, offset: usize) -> Option<u32> {
    let digits = s.get(offset..offset + 2)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Combine the date in `identifier` with the time of day in `raw_time`.
///
/// `None` unless both parts parse. `order` only matters when `raw_time` is a full timestamp.
pub fn reconstruct_admission(
    identifier: &str,
    raw_time: &str,
    layout: &IdentifierLayout,
    order: DateOrder,
) -> Option<NaiveDateTime> {
    let date = layout.date_of(identifier)?;
    let time = parse_time_of_day(raw_time, order)?;
    Some(date.and_time(time))
}

const TIME_FORMATS: &[&str] = &[
    "%H:%M:%S",
    "%H:%M:%S%.f",
    "%H:%M",
    "%I:%M:%S %p",
    "%I:%M %p",
    "%I:%M:%S%p",
    "%I:%M%p",
];

/// Parse a time of day. Full timestamps are accepted too, and their time part is used.
pub fn parse_time_of_day(raw: &str, order: DateOrder) -> Option<NaiveTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_timestamp(raw, order).map(|dt| dt.time()))
}

/// How to read ambiguous numeric dates like `03/04/2025`.
///
/// Month-first unless configured otherwise, matching how the existing reports read the exports.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    DayFirst,
    #[default]
    MonthFirst,
}

impl DateOrder {
    fn other(self) -> Self {
        match self {
            DateOrder::DayFirst => DateOrder::MonthFirst,
            DateOrder::MonthFirst => DateOrder::DayFirst,
        }
    }
}

// Formats that aren't ambiguous, tried before the day/month ones.
const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d-%b-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
];

const ISO_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%b-%Y", "%d %b %Y"];

const TIME_SUFFIXES: &[&str] = &[
    " %H:%M:%S",
    " %H:%M:%S%.f",
    " %H:%M",
    " %I:%M:%S %p",
    " %I:%M %p",
];

fn ordered_formats(order: DateOrder) -> Vec<String> {
    ordered_date_formats(order)
        .iter()
        .flat_map(|date| TIME_SUFFIXES.iter().map(move |time| format!("{}{}", date, time)))
        .collect()
}

fn ordered_date_formats(order: DateOrder) -> &'static [&'static str] {
    match order {
        DateOrder::DayFirst => &[
            "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y", "%d.%m.%y",
        ],
        DateOrder::MonthFirst => &[
            "%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y", "%m/%d/%y", "%m-%d-%y", "%m.%d.%y",
        ],
    }
}

/// `%Y` happily reads `25` as the year 25, which is never a real discharge.
fn plausible(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    (dt.year() >= 1000).then_some(dt)
}

static DAY_FIRST_FORMATS: Lazy<Vec<String>> = Lazy::new(|| ordered_formats(DateOrder::DayFirst));
static MONTH_FIRST_FORMATS: Lazy<Vec<String>> =
    Lazy::new(|| ordered_formats(DateOrder::MonthFirst));

fn datetime_formats(order: DateOrder) -> &'static [String] {
    match order {
        DateOrder::DayFirst => DAY_FIRST_FORMATS.as_slice(),
        DateOrder::MonthFirst => MONTH_FIRST_FORMATS.as_slice(),
    }
}

fn parse_timestamp(raw: &str, order: DateOrder) -> Option<NaiveDateTime> {
    let with_time = ISO_DATETIME_FORMATS
        .iter()
        .copied()
        .chain(datetime_formats(order).iter().map(String::as_str))
        .chain(datetime_formats(order.other()).iter().map(String::as_str))
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok().and_then(plausible));
    if with_time.is_some() {
        return with_time;
    }
    ISO_DATE_FORMATS
        .iter()
        .chain(ordered_date_formats(order))
        .chain(ordered_date_formats(order.other()))
        .find_map(|fmt| {
            NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .and_then(plausible)
        })
}

/// Best-effort parse of a discharge timestamp. Unparseable values are `None`.
///
/// Date-only values are taken as midnight.
pub fn parse_discharge(raw: &str, order: DateOrder) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    parse_timestamp(raw, order)
}

#[cfg(test)]
mod test {
    use super::*;

    const ORDER: DateOrder = DateOrder::MonthFirst;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn admission_from_identifier() {
        let layout = IdentifierLayout::default();
        assert_eq!(
            reconstruct_admission("IP25081500123", "14:30:00", &layout, ORDER),
            Some(dt(2025, 8, 15, 14, 30, 0))
        );
        assert_eq!(
            reconstruct_admission("IP240229001", "08:05", &layout, ORDER),
            Some(dt(2024, 2, 29, 8, 5, 0))
        );
    }

    #[test]
    fn malformed_identifiers() {
        let layout = IdentifierLayout::default();
        // too short
        assert_eq!(reconstruct_admission("IP250815", "14:30:00", &layout, ORDER), None);
        // wrong prefix
        assert_eq!(reconstruct_admission("OP25081500123", "14:30:00", &layout, ORDER), None);
        // not a calendar date
        assert_eq!(reconstruct_admission("IP25133200123", "14:30:00", &layout, ORDER), None);
        assert_eq!(reconstruct_admission("IP230229001", "14:30:00", &layout, ORDER), None);
        // non-digits in the date part
        assert_eq!(reconstruct_admission("IP25A81500123", "14:30:00", &layout, ORDER), None);
        assert_eq!(reconstruct_admission("", "14:30:00", &layout, ORDER), None);
    }

    #[test]
    fn valid_identifier_bad_time() {
        let layout = IdentifierLayout::default();
        assert_eq!(reconstruct_admission("IP25081500123", "", &layout, ORDER), None);
        assert_eq!(reconstruct_admission("IP25081500123", "teatime", &layout, ORDER), None);
        assert_eq!(reconstruct_admission("IP25081500123", "25:00:00", &layout, ORDER), None);
    }

    #[test]
    fn custom_layout() {
        let layout = IdentifierLayout {
            prefix: "ADM".into(),
            min_len: 10,
            year_offset: 3,
            month_offset: 5,
            day_offset: 7,
            century: 1900,
        };
        assert_eq!(
            layout.date_of("ADM9912310042"),
            NaiveDate::from_ymd_opt(1999, 12, 31)
        );
        assert_eq!(layout.date_of("IP25081500123"), None);
    }

    #[test]
    fn times_of_day() {
        let t = |h, m, s| NaiveTime::from_hms_opt(h, m, s).unwrap();
        assert_eq!(parse_time_of_day("14:30:00", ORDER), Some(t(14, 30, 0)));
        assert_eq!(parse_time_of_day(" 14:30 ", ORDER), Some(t(14, 30, 0)));
        assert_eq!(parse_time_of_day("2:30 PM", ORDER), Some(t(14, 30, 0)));
        assert_eq!(parse_time_of_day("12:15 AM", ORDER), Some(t(0, 15, 0)));
        assert_eq!(
            parse_time_of_day("14:30:00.250", ORDER),
            NaiveTime::from_hms_milli_opt(14, 30, 0, 250)
        );
        assert_eq!(parse_time_of_day("2025-08-15 09:10:11", ORDER), Some(t(9, 10, 11)));
        assert_eq!(parse_time_of_day("nonsense", ORDER), None);
    }

    #[test]
    fn discharge_formats() {
        let order = DateOrder::DayFirst;
        assert_eq!(
            parse_discharge("2025-08-18 11:00:00", order),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("2025-08-18T11:00", order),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("18/08/2025 11:00", order),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("18-Aug-2025 11:00", order),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("18/08/2025 11:00 AM", order),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(parse_discharge("2025-08-18", order), Some(dt(2025, 8, 18, 0, 0, 0)));
        assert_eq!(parse_discharge("", order), None);
        assert_eq!(parse_discharge("not a date", order), None);
    }

    #[test]
    fn ambiguous_dates_follow_order() {
        assert_eq!(
            parse_discharge("03/04/2025 10:00", DateOrder::DayFirst),
            Some(dt(2025, 4, 3, 10, 0, 0))
        );
        assert_eq!(
            parse_discharge("03/04/2025 10:00", DateOrder::MonthFirst),
            Some(dt(2025, 3, 4, 10, 0, 0))
        );
        assert_eq!(DateOrder::default(), DateOrder::MonthFirst);
        assert_eq!(
            parse_discharge("03/04/2025 10:00", DateOrder::default()),
            Some(dt(2025, 3, 4, 10, 0, 0))
        );
        // falls back to the other order when the preferred one can't be a date
        assert_eq!(
            parse_discharge("08/18/2025 10:00", DateOrder::DayFirst),
            Some(dt(2025, 8, 18, 10, 0, 0))
        );
        assert_eq!(
            parse_discharge("18/08/2025 10:00", DateOrder::MonthFirst),
            Some(dt(2025, 8, 18, 10, 0, 0))
        );
    }

    #[test]
    fn two_digit_years() {
        assert_eq!(
            parse_discharge("18/08/25 11:00", DateOrder::DayFirst),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("18/08/25 11:00", DateOrder::MonthFirst),
            Some(dt(2025, 8, 18, 11, 0, 0))
        );
        assert_eq!(
            parse_discharge("08/18/25", DateOrder::MonthFirst),
            Some(dt(2025, 8, 18, 0, 0, 0))
        );
        // never a year-25 timestamp
        assert_eq!(parse_discharge("0025-08-18 11:00:00", DateOrder::DayFirst), None);
    }

    #[test]
    fn time_from_full_timestamp_uses_order() {
        let t = NaiveTime::from_hms_opt(10, 15, 0);
        assert_eq!(parse_time_of_day("03/04/2025 10:15", DateOrder::DayFirst), t);
        assert_eq!(parse_time_of_day("03/04/2025 10:15", DateOrder::MonthFirst), t);
        let layout = IdentifierLayout::default();
        assert_eq!(
            reconstruct_admission(
                "IP25081500123",
                "18/08/25 10:15",
                &layout,
                DateOrder::DayFirst
            ),
            Some(dt(2025, 8, 15, 10, 15, 0))
        );
    }
}
