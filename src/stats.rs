//! Descriptive statistics over admissions.
//!
//! Nothing here fails on empty input: statistics that can't be computed are `None`, and every
//! count carries the denominator it was taken from.
use crate::util::{opt_float, percentage, ReportTable};
use chrono::{Datelike, NaiveDateTime, Weekday};
use noisy_float::prelude::*;
use statrs::statistics::Statistics;
use std::{collections::HashMap, fmt, hash::Hash};

/// `n` out of `total`, with the percentage if `total` isn't zero.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Proportion {
    pub n: usize,
    pub total: usize,
    pub pct: Option<f64>,
}

impl Proportion {
    pub fn new(n: usize, total: usize) -> Self {
        let pct = if total == 0 {
            None
        } else {
            Some(n as f64 / total as f64 * 100.)
        };
        Proportion { n, total, pct }
    }
}

impl fmt::Display for Proportion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.pct {
            Some(pct) => write!(f, "{} of {} ({:.1}%)", self.n, self.total, pct),
            None => write!(f, "{} of {} (-)", self.n, self.total),
        }
    }
}

/// How many of `records` satisfy `predicate`.
pub fn count_and_percentage<T>(
    records: impl IntoIterator<Item = T>,
    mut predicate: impl FnMut(&T) -> bool,
) -> Proportion {
    let (mut n, mut total) = (0, 0);
    for record in records {
        total += 1;
        if predicate(&record) {
            n += 1;
        }
    }
    Proportion::new(n, total)
}

/// Counts per group, in the order groups were first seen.
#[derive(Debug, Clone)]
pub struct GroupCounts<K> {
    groups: Vec<(K, usize)>,
    index: HashMap<K, usize>,
    missing: usize,
}

impl<K> GroupCounts<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        GroupCounts {
            groups: vec![],
            index: HashMap::new(),
            missing: 0,
        }
    }

    /// Start with these groups at zero so they are reported even when nothing falls in them.
    pub fn with_groups(groups: impl IntoIterator<Item = K>) -> Self {
        let mut this = Self::new();
        for group in groups {
            this.add_n(group, 0);
        }
        this
    }

    pub fn add(&mut self, key: Option<K>) {
        match key {
            Some(key) => self.add_n(key, 1),
            None => self.missing += 1,
        }
    }

    fn add_n(&mut self, key: K, n: usize) {
        match self.index.get(&key) {
            Some(&idx) => self.groups[idx].1 += n,
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, n));
            }
        }
    }

    pub fn get(&self, key: &K) -> usize {
        self.index.get(key).map(|&idx| self.groups[idx].1).unwrap_or(0)
    }

    /// Percentage of the counted (non-missing) total.
    pub fn percentage_of(&self, key: &K) -> Proportion {
        Proportion::new(self.get(key), self.total())
    }

    /// Largest groups first. Groups with equal counts keep their existing order.
    pub fn sort_by_count(&mut self) {
        self.groups.sort_by(|a, b| b.1.cmp(&a.1));
        self.rebuild_index();
    }

    /// The `n` largest groups. The missing count is kept.
    pub fn top(&self, n: usize) -> Self {
        let mut this = self.clone();
        this.sort_by_count();
        this.groups.truncate(n);
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (idx, (key, _)) in self.groups.iter().enumerate() {
            self.index.insert(key.clone(), idx);
        }
    }
}

impl<K> GroupCounts<K>
where
    K: Hash + Eq + Clone + Ord,
{
    pub fn sort_by_key(&mut self) {
        self.groups.sort_by(|a, b| a.0.cmp(&b.0));
        self.rebuild_index();
    }
}

impl<K> GroupCounts<K> {
    pub fn iter(&self) -> impl Iterator<Item = (&K, usize)> + '_ {
        self.groups.iter().map(|(k, n)| (k, *n))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Sum over all groups, not including missing keys.
    pub fn total(&self) -> usize {
        self.groups.iter().map(|(_, n)| n).sum()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }
}

impl<K> GroupCounts<K>
where
    K: fmt::Display,
{
    /// Percentages use `denominator`: reports differ on whether that is the records counted, the
    /// cohort, or the whole dataset.
    pub fn report_table(&self, title: &str, key_header: &str, denominator: usize) -> ReportTable {
        let mut table = ReportTable::new([key_header, "Count", "Percentage"])
            .with_title(title.to_owned());
        for (key, count) in self.iter() {
            table.push_row([
                key.to_string(),
                count.to_string(),
                percentage(count, denominator),
            ]);
        }
        if self.missing > 0 {
            table.push_row([
                "missing data".to_string(),
                self.missing.to_string(),
                percentage(self.missing, denominator),
            ]);
        }
        table
    }
}

impl<K> Default for GroupCounts<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Count `items` grouped by `key_fn`. `None` keys are counted as missing.
pub fn group_counts<T, K>(
    items: impl IntoIterator<Item = T>,
    mut key_fn: impl FnMut(&T) -> Option<K>,
) -> GroupCounts<K>
where
    K: Hash + Eq + Clone,
{
    let mut counts = GroupCounts::new();
    for item in items {
        counts.add(key_fn(&item));
    }
    counts
}

/// Central tendency and spread of the present values.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Summary {
    pub count: usize,
    pub missing: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Sample standard deviation, needs at least 2 values.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
}

/// Summarise `values`, ignoring missing ones (NaN counts as missing).
pub fn central_tendency(values: impl IntoIterator<Item = Option<f64>>) -> Summary {
    let mut missing = 0;
    let mut sorted: Vec<R64> = vec![];
    for value in values {
        match value.and_then(R64::try_new) {
            Some(v) => sorted.push(v),
            None => missing += 1,
        }
    }
    sorted.sort();
    let sorted: Vec<f64> = sorted.into_iter().map(|v| v.raw()).collect();

    let count = sorted.len();
    if count == 0 {
        return Summary {
            missing,
            ..Summary::default()
        };
    }
    Summary {
        count,
        missing,
        mean: Some(sorted.iter().mean()),
        median: quantile(&sorted, 0.5),
        std: if count > 1 {
            Some(sorted.iter().std_dev())
        } else {
            None
        },
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        q1: quantile(&sorted, 0.25),
        q3: quantile(&sorted, 0.75),
    }
}

/// Quantile of sorted data, interpolating linearly between the closest ranks.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

impl Summary {
    /// Rows of statistic name and value.
    pub fn report_table(&self, title: &str, precision: usize) -> ReportTable {
        let mut table = ReportTable::new(["Statistic", "Value"]).with_title(title.to_owned());
        table.push_row(["Count".to_string(), self.count.to_string()]);
        table.push_row(["Missing".to_string(), self.missing.to_string()]);
        for (name, value) in [
            ("Mean", self.mean),
            ("SD", self.std),
            ("Median", self.median),
            ("Q1", self.q1),
            ("Q3", self.q3),
            ("Min", self.min),
            ("Max", self.max),
        ] {
            table.push_row([name.to_string(), opt_float(value, precision)]);
        }
        table
    }

    /// `mean (sd)`, as used in the summary tables.
    pub fn mean_sd(&self, precision: usize) -> String {
        format!(
            "{} ({})",
            opt_float(self.mean, precision),
            opt_float(self.std, precision)
        )
    }
}

/// Counts by a row key and a column key, with margins.
#[derive(Debug, Clone)]
pub struct CrossTab<R, C> {
    rows: Vec<R>,
    row_index: HashMap<R, usize>,
    cols: Vec<C>,
    col_index: HashMap<C, usize>,
    /// `counts[row][col]`
    counts: Vec<Vec<usize>>,
    /// Items where either key was missing.
    missing: usize,
}

impl<R, C> CrossTab<R, C>
where
    R: Hash + Eq + Clone,
    C: Hash + Eq + Clone,
{
    /// Start with the given rows and columns (in that order), so empty ones are still shown.
    pub fn with_keys(rows: impl IntoIterator<Item = R>, cols: impl IntoIterator<Item = C>) -> Self {
        let mut this = CrossTab {
            rows: vec![],
            row_index: HashMap::new(),
            cols: vec![],
            col_index: HashMap::new(),
            counts: vec![],
            missing: 0,
        };
        for row in rows {
            this.row_idx(row);
        }
        for col in cols {
            this.col_idx(col);
        }
        this
    }

    pub fn add(&mut self, row: Option<R>, col: Option<C>) {
        match (row, col) {
            (Some(row), Some(col)) => {
                let r = self.row_idx(row);
                let c = self.col_idx(col);
                self.counts[r][c] += 1;
            }
            _ => self.missing += 1,
        }
    }

    fn row_idx(&mut self, row: R) -> usize {
        if let Some(&idx) = self.row_index.get(&row) {
            return idx;
        }
        let idx = self.rows.len();
        self.row_index.insert(row.clone(), idx);
        self.rows.push(row);
        self.counts.push(vec![0; self.cols.len()]);
        idx
    }

    fn col_idx(&mut self, col: C) -> usize {
        if let Some(&idx) = self.col_index.get(&col) {
            return idx;
        }
        let idx = self.cols.len();
        self.col_index.insert(col.clone(), idx);
        self.cols.push(col);
        for row in self.counts.iter_mut() {
            row.push(0);
        }
        idx
    }

    pub fn get(&self, row: &R, col: &C) -> usize {
        match (self.row_index.get(row), self.col_index.get(col)) {
            (Some(&r), Some(&c)) => self.counts[r][c],
            _ => 0,
        }
    }

    pub fn row_total(&self, row: &R) -> usize {
        self.row_index
            .get(row)
            .map(|&r| self.counts[r].iter().sum())
            .unwrap_or(0)
    }

    pub fn col_total(&self, col: &C) -> usize {
        self.col_index
            .get(col)
            .map(|&c| self.counts.iter().map(|row| row[c]).sum())
            .unwrap_or(0)
    }
}

impl<R, C> CrossTab<R, C> {
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn cols(&self) -> &[C] {
        &self.cols
    }

    /// Items with both keys present.
    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }
}

impl<R, C> CrossTab<R, C>
where
    R: fmt::Display,
    C: fmt::Display,
{
    /// The table with an "All" column and row holding the margins.
    pub fn report_table(&self, title: &str, row_header: &str) -> ReportTable {
        let headers = std::iter::once(row_header.to_string())
            .chain(self.cols.iter().map(|c| c.to_string()))
            .chain(std::iter::once("All".to_string()));
        let mut table = ReportTable::new(headers).with_title(title.to_owned());
        for (row, counts) in self.rows.iter().zip(self.counts.iter()) {
            let cells = std::iter::once(row.to_string())
                .chain(counts.iter().map(|n| n.to_string()))
                .chain(std::iter::once(counts.iter().sum::<usize>().to_string()));
            table.push_row(cells);
        }
        let col_totals = (0..self.cols.len())
            .map(|c| self.counts.iter().map(|row| row[c]).sum::<usize>());
        let margin = std::iter::once("All".to_string())
            .chain(col_totals.map(|n| n.to_string()))
            .chain(std::iter::once(self.total().to_string()));
        table.push_row(margin);
        table
    }
}

/// Cross-tabulate `items` by two keys, rows and columns in first-seen order.
pub fn crosstab<T, R, C>(
    items: impl IntoIterator<Item = T>,
    mut row_fn: impl FnMut(&T) -> Option<R>,
    mut col_fn: impl FnMut(&T) -> Option<C>,
) -> CrossTab<R, C>
where
    R: Hash + Eq + Clone,
    C: Hash + Eq + Clone,
{
    let mut tab = CrossTab::with_keys(None, None);
    for item in items {
        tab.add(row_fn(&item), col_fn(&item));
    }
    tab
}

/// A `Summary` for each group, in first-seen order.
#[derive(Debug, Clone)]
pub struct GroupSummaries<K> {
    groups: Vec<(K, Summary)>,
    /// Items without a group.
    missing: usize,
}

impl<K> GroupSummaries<K> {
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Summary)> + '_ {
        self.groups.iter().map(|(k, s)| (k, s))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    /// Largest groups (by values present) first.
    pub fn sort_by_count(&mut self) {
        self.groups.sort_by(|a, b| b.1.count.cmp(&a.1.count));
    }
}

impl<K: Ord> GroupSummaries<K> {
    pub fn sort_by_key(&mut self) {
        self.groups.sort_by(|a, b| a.0.cmp(&b.0));
    }

    /// Put groups in the order given by `order`. Groups not in `order` go last.
    pub fn sort_by_order(&mut self, order: &[K]) {
        self.groups.sort_by_key(|(k, _)| {
            order
                .iter()
                .position(|o| o == k)
                .unwrap_or(order.len())
        });
    }

    pub fn get(&self, key: &K) -> Option<&Summary> {
        self.groups.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }
}

impl<K: fmt::Display> GroupSummaries<K> {
    pub fn report_table(&self, title: &str, key_header: &str, precision: usize) -> ReportTable {
        let mut table =
            ReportTable::new([key_header, "Count", "Mean", "SD", "Median", "Min", "Max"])
                .with_title(title.to_owned());
        for (key, s) in self.iter() {
            table.push_row([
                key.to_string(),
                s.count.to_string(),
                opt_float(s.mean, precision),
                opt_float(s.std, precision),
                opt_float(s.median, precision),
                opt_float(s.min, precision),
                opt_float(s.max, precision),
            ]);
        }
        table
    }
}

/// Summarise `value_fn` for each group given by `key_fn`.
pub fn group_summaries<T, K>(
    items: impl IntoIterator<Item = T>,
    mut key_fn: impl FnMut(&T) -> Option<K>,
    mut value_fn: impl FnMut(&T) -> Option<f64>,
) -> GroupSummaries<K>
where
    K: Hash + Eq + Clone,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<Option<f64>>)> = vec![];
    let mut missing = 0;
    for item in items {
        let Some(key) = key_fn(&item) else {
            missing += 1;
            continue;
        };
        let value = value_fn(&item);
        match index.get(&key) {
            Some(&idx) => groups[idx].1.push(value),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![value]));
            }
        }
    }
    GroupSummaries {
        groups: groups
            .into_iter()
            .map(|(k, values)| (k, central_tendency(values)))
            .collect(),
        missing,
    }
}

/// A calendar month.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: impl Datelike) -> Self {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// A weekday that displays as its full English name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DayOfWeek(pub Weekday);

impl DayOfWeek {
    /// Monday to Sunday.
    pub fn all() -> impl Iterator<Item = DayOfWeek> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .map(DayOfWeek)
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self.0 {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        })
    }
}

/// Admissions per calendar month, in chronological order.
pub fn monthly_counts(
    timestamps: impl IntoIterator<Item = Option<NaiveDateTime>>,
) -> GroupCounts<YearMonth> {
    let mut counts = group_counts(timestamps, |ts| ts.map(YearMonth::of));
    counts.sort_by_key();
    counts
}

/// Admissions per day of the week, Monday first. All seven days are always present.
pub fn weekday_counts(
    timestamps: impl IntoIterator<Item = Option<NaiveDateTime>>,
) -> GroupCounts<DayOfWeek> {
    let mut counts = GroupCounts::with_groups(DayOfWeek::all());
    for ts in timestamps {
        counts.add(ts.map(|ts| DayOfWeek(ts.weekday())));
    }
    counts
}

/// How complete the dataset is.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuality {
    pub total: usize,
    pub admission_time: Proportion,
    pub discharge_time: Proportion,
    pub length_of_stay: Proportion,
    pub age: Proportion,
    pub sex: Proportion,
    pub diagnosis: Proportion,
    pub first_admission: Option<NaiveDateTime>,
    pub last_admission: Option<NaiveDateTime>,
    pub departments: usize,
    pub wards: usize,
}

impl DataQuality {
    pub fn report_table(&self) -> ReportTable {
        let mut table = ReportTable::new(["Field", "Records with value", "Percentage"])
            .with_title("Data completeness");
        for (name, prop) in [
            ("Admission timestamp", &self.admission_time),
            ("Discharge timestamp", &self.discharge_time),
            ("Length of stay", &self.length_of_stay),
            ("Age", &self.age),
            ("Sex", &self.sex),
            ("Diagnosis", &self.diagnosis),
        ] {
            table.push_row([
                name.to_string(),
                prop.n.to_string(),
                percentage(prop.n, prop.total),
            ]);
        }
        let fmt_ts = |ts: Option<NaiveDateTime>| {
            ts.map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".into())
        };
        table.push_row(["Total records".to_string(), self.total.to_string()]);
        table.push_row(["First admission".to_string(), fmt_ts(self.first_admission)]);
        table.push_row(["Last admission".to_string(), fmt_ts(self.last_admission)]);
        table.push_row(["Departments".to_string(), self.departments.to_string()]);
        table.push_row(["Wards/beds".to_string(), self.wards.to_string()]);
        table
    }
}
