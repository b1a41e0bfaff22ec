use crate::{util::ReportTable, ArcStr, Result};
use itertools::Itertools;
use qu::ick_use::*;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{borrow::Borrow, fmt};

/// Range where lower bound is inclusive, upper bound is exclusive or unbounded.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Range<T>(T, Option<T>);

impl<T> Range<T>
where
    T: PartialOrd,
{
    pub fn new(from: T, to: Option<T>) -> Result<Self> {
        if let Some(ref to) = to {
            ensure!(from < *to, "ranges must go from low to high");
        }
        Ok(Range(from, to))
    }

    pub fn contains(&self, val: &T) -> bool {
        if let Some(end) = &self.1 {
            val >= &self.0 && val < end
        } else {
            val >= &self.0
        }
    }
}

impl<T> Range<T> {
    pub fn start(&self) -> &T {
        &self.0
    }

    /// `None` if the range is unbounded above.
    pub fn end(&self) -> Option<&T> {
        self.1.as_ref()
    }
}

impl<T> fmt::Display for Range<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(end) = &self.1 {
            write!(f, "{} - {}", self.0, end)
        } else {
            write!(f, "{}+", self.0)
        }
    }
}

/// A set of contiguous, labelled buckets.
///
/// Built from a list of boundaries `b0 < b1 < ... < bn` and `n` labels. Bucket `i` covers
/// `[b(i), b(i+1))`, except the last bucket, which covers `[b(n-1), ∞)`: the final boundary only
/// documents the expected upper end of the data (e.g. 100 for ages) and is not enforced.
#[derive(Debug, Clone)]
pub struct RangeSet<T> {
    ranges: Vec<Range<T>>,
    labels: Vec<ArcStr>,
}

impl<T> RangeSet<T>
where
    T: PartialOrd + Clone,
{
    pub fn from_boundaries(
        boundaries: impl IntoIterator<Item = T>,
        labels: impl IntoIterator<Item = impl Into<ArcStr>>,
    ) -> Result<Self> {
        let boundaries: Vec<T> = boundaries.into_iter().collect();
        let labels: Vec<ArcStr> = labels.into_iter().map(Into::into).collect();
        ensure!(
            boundaries.len() >= 2,
            "a bucket set needs at least 2 boundaries, found {}",
            boundaries.len()
        );
        ensure!(
            labels.len() + 1 == boundaries.len(),
            "{} boundaries need {} labels, found {}",
            boundaries.len(),
            boundaries.len() - 1,
            labels.len()
        );

        let last = boundaries.len() - 2;
        let ranges = boundaries
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(idx, (from, to))| {
                // the upper bound of the last bucket is still checked for ordering.
                let range = Range::new(from.clone(), Some(to.clone()))?;
                Ok(if idx == last {
                    Range(range.0, None)
                } else {
                    range
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { ranges, labels })
    }
}

impl<T> RangeSet<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &Range<T>)> + '_ {
        self.labels.iter().zip_eq(self.ranges.iter())
    }

    pub fn labels(&self) -> &[ArcStr] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl<T> RangeSet<T>
where
    T: PartialOrd,
{
    /// Index of the bucket containing `val`, if any.
    ///
    /// Only values below the first boundary (or incomparable values like NaN) have no bucket.
    pub fn bucket_of(&self, val: &T) -> Option<usize> {
        self.ranges.iter().position(|range| range.contains(val))
    }

    pub fn label_of(&self, val: &T) -> Option<&ArcStr> {
        self.bucket_of(val).map(|idx| &self.labels[idx])
    }

    /// Count values per bucket, keeping track of missing values and values outside all buckets.
    pub fn bucket_values<I, B>(&self, values: I) -> BucketCounts
    where
        I: IntoIterator<Item = Option<B>>,
        B: Borrow<T>,
    {
        let mut counts = vec![0usize; self.ranges.len()];
        let mut missing = 0;
        let mut out_of_range = 0;
        for value in values {
            match value {
                Some(value) => match self.bucket_of(value.borrow()) {
                    Some(idx) => counts[idx] += 1,
                    None => out_of_range += 1,
                },
                None => missing += 1,
            }
        }
        BucketCounts {
            labels: self.labels.clone(),
            counts,
            missing,
            out_of_range,
        }
    }
}

/// Count `values` into the buckets of `set`.
pub fn bucketize<T, I, B>(values: I, set: &RangeSet<T>) -> BucketCounts
where
    T: PartialOrd,
    I: IntoIterator<Item = Option<B>>,
    B: Borrow<T>,
{
    set.bucket_values(values)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeSetDef<T> {
    boundaries: Vec<T>,
    labels: Vec<String>,
}

// manually deserialize so that boundaries are validated on load.
impl<'de, T> Deserialize<'de> for RangeSet<T>
where
    T: Deserialize<'de> + PartialOrd + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let def = RangeSetDef::<T>::deserialize(deserializer)?;
        RangeSet::from_boundaries(def.boundaries, def.labels).map_err(de::Error::custom)
    }
}

/// A range set with values bucketed, and bucket sizes recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCounts {
    labels: Vec<ArcStr>,
    counts: Vec<usize>,
    missing: usize,
    out_of_range: usize,
}

impl BucketCounts {
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, usize)> {
        self.labels.iter().zip_eq(self.counts.iter().copied())
    }

    pub fn get(&self, label: &str) -> Option<usize> {
        let idx = self.labels.iter().position(|l| &**l == label)?;
        Some(self.counts[idx])
    }

    /// Values that were present and fell into a bucket.
    pub fn bucketed(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    pub fn out_of_range(&self) -> usize {
        self.out_of_range
    }

    /// All values offered, including missing ones.
    pub fn total(&self) -> usize {
        self.bucketed() + self.missing + self.out_of_range
    }

    /// Buckets with their counts, followed by rows for missing and out-of-range values when
    /// there are any.
    pub fn for_display(&self) -> impl Iterator<Item = (&dyn fmt::Display, usize)> {
        let missing = (self.missing > 0)
            .then(|| (&"missing data" as &dyn fmt::Display, self.missing));
        let out_of_range = (self.out_of_range > 0)
            .then(|| (&"out of range" as &dyn fmt::Display, self.out_of_range));
        self.iter()
            .map(|(label, count)| (label as &dyn fmt::Display, count))
            .chain(missing)
            .chain(out_of_range)
    }

    /// Percentages use `denominator`, which the caller must state explicitly.
    pub fn report_table(
        &self,
        title: &str,
        bucket_header: &str,
        denominator: usize,
    ) -> ReportTable {
        let mut table = ReportTable::new([bucket_header, "Count", "Percentage"])
            .with_title(title.to_owned());
        for (label, count) in self.for_display() {
            table.push_row([
                label.to_string(),
                count.to_string(),
                crate::util::percentage(count, denominator),
            ]);
        }
        table
    }
}
