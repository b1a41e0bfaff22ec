//! Length of stay, and the windows used to decide which stays are plausible.
use crate::{
    stats::{central_tendency, Proportion, Summary},
    Error, Result,
};
use chrono::NaiveDateTime;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::fmt;

const MILLIS_PER_DAY: f64 = 86_400_000.;

/// `discharge - admission` in fractional days.
///
/// The sign is kept: negative stays are data errors that callers filter with a `LosWindow`.
pub fn compute_los(
    admission: Option<NaiveDateTime>,
    discharge: Option<NaiveDateTime>,
) -> Option<f64> {
    let (admission, discharge) = (admission?, discharge?);
    Some((discharge - admission).num_milliseconds() as f64 / MILLIS_PER_DAY)
}

/// An inclusive range of stay lengths (in days) considered valid for an analysis.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LosWindowRaw")]
pub struct LosWindow {
    min: f64,
    max: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LosWindowRaw {
    min: f64,
    max: f64,
}

impl TryFrom<LosWindowRaw> for LosWindow {
    type Error = Error;
    fn try_from(raw: LosWindowRaw) -> Result<Self> {
        LosWindow::new(raw.min, raw.max)
    }
}

impl LosWindow {
    /// The window used for dashboards.
    pub const STANDARD: LosWindow = LosWindow { min: 0., max: 365. };
    /// The window used for publication tables.
    pub const PUBLICATION: LosWindow = LosWindow { min: 0., max: 200. };
    /// The window used for the respiratory LOS distribution.
    pub const RESPIRATORY: LosWindow = LosWindow { min: 0., max: 50. };

    pub fn new(min: f64, max: f64) -> Result<Self> {
        ensure!(
            min.is_finite() && max.is_finite(),
            "LOS window bounds must be finite"
        );
        ensure!(
            min <= max,
            "LOS window minimum ({}) is larger than its maximum ({})",
            min,
            max
        );
        Ok(LosWindow { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, los: f64) -> bool {
        los >= self.min && los <= self.max
    }

    /// Keep the values inside the window, recording how many were offered.
    pub fn filter(&self, values: impl IntoIterator<Item = Option<f64>>) -> ValidLos {
        let mut valid = ValidLos {
            window: *self,
            values: vec![],
            offered: 0,
            missing: 0,
            outside: 0,
        };
        for value in values {
            valid.offered += 1;
            match value {
                Some(v) if self.contains(v) => valid.values.push(v),
                Some(_) => valid.outside += 1,
                None => valid.missing += 1,
            }
        }
        valid
    }
}

impl fmt::Display for LosWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{} days", self.min, self.max)
    }
}

/// The stay lengths that passed a `LosWindow`, along with what was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidLos {
    pub window: LosWindow,
    pub values: Vec<f64>,
    /// Every record looked at, with or without a LOS.
    pub offered: usize,
    /// Records with no LOS at all.
    pub missing: usize,
    /// Records with a LOS outside the window.
    pub outside: usize,
}

impl ValidLos {
    pub fn kept(&self) -> usize {
        self.values.len()
    }

    pub fn proportion(&self) -> Proportion {
        Proportion::new(self.kept(), self.offered)
    }

    pub fn summary(&self) -> Summary {
        central_tendency(self.values.iter().copied().map(Some))
    }
}

impl fmt::Display for ValidLos {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} of {} records had valid LOS ({})",
            self.kept(),
            self.offered,
            self.window
        )
    }
}
