use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());
static SEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"/([MF])").unwrap());

/// Split an "A/S" code like `47Y/F` into age in years and sex.
///
/// Both parts are extracted independently, so `/M` gives a sex but no age. The sex letter must be
/// upper case and directly follow the `/`.
pub fn parse_demographics(code: &str) -> (Option<u32>, Option<Sex>) {
    (parse_age(code), parse_sex(code))
}

/// The first run of digits in `code`. Runs too big for a `u32` are treated as missing.
pub fn parse_age(code: &str) -> Option<u32> {
    AGE.find(code)?.as_str().parse().ok()
}

pub fn parse_sex(code: &str) -> Option<Sex> {
    let caps = SEX.captures(code)?;
    match &caps[1] {
        "M" => Some(Sex::Male),
        "F" => Some(Sex::Female),
        _ => None,
    }
}

/// Sex is encoded 'M' or 'F'. Anything else in the source is missing rather than a third value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// The single-letter code used in the source data.
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("Male"),
            Sex::Female => f.write_str("Female"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn typical_codes() {
        assert_eq!(parse_demographics("47Y/F"), (Some(47), Some(Sex::Female)));
        assert_eq!(parse_demographics("3Y/M"), (Some(3), Some(Sex::Male)));
        assert_eq!(parse_demographics(" 65 Y / M"), (Some(65), None));
    }

    #[test]
    fn parts_are_independent() {
        assert_eq!(parse_demographics("/M"), (None, Some(Sex::Male)));
        assert_eq!(parse_demographics("25Y"), (Some(25), None));
        assert_eq!(parse_demographics("unknown"), (None, None));
        assert_eq!(parse_demographics(""), (None, None));
    }

    #[test]
    fn first_digit_run_wins() {
        assert_eq!(parse_age("2Y 6M/F"), Some(2));
        assert_eq!(parse_age("age 81/M"), Some(81));
    }

    #[test]
    fn sex_is_case_sensitive() {
        assert_eq!(parse_sex("25Y/f"), None);
        assert_eq!(parse_sex("25Y/X/F"), Some(Sex::Female));
    }
}
