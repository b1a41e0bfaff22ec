pub mod cohort;
pub mod config;
pub mod demographics;
pub mod load;
pub mod los;
mod range;
pub mod stats;
pub mod timestamp;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDateTime;
use qu::ick_use::*;
use std::{
    collections::{BTreeSet, HashSet},
    io,
    ops::Deref,
    path::Path,
    sync::Arc,
};

pub use crate::{
    cohort::{Cohort, CohortDefinitions, CohortMatcher},
    config::Config,
    demographics::{parse_demographics, Sex},
    load::{ColumnNames, LoadError, RawTable},
    los::{compute_los, LosWindow, ValidLos},
    range::{bucketize, BucketCounts, Range, RangeSet},
    stats::{
        central_tendency, count_and_percentage, crosstab, group_counts, group_summaries,
        CrossTab, DataQuality, DayOfWeek, GroupCounts, GroupSummaries, Proportion, Summary,
        YearMonth,
    },
    timestamp::{
        parse_discharge, parse_time_of_day, reconstruct_admission, DateOrder, IdentifierLayout,
    },
    util::{header, output_dir, ReportTable},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A row of the admissions export, before anything is parsed.
///
/// Every field is optional: missing cells and the usual missing markers (`nan`, `NaT`, ...) are
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionRaw {
    pub ip_number: Option<ArcStr>,
    pub admission_time: Option<ArcStr>,
    pub discharge_time: Option<ArcStr>,
    /// The "A/S" column, e.g. `47Y/F`.
    pub demographic_code: Option<ArcStr>,
    pub diagnosis: Option<ArcStr>,
    pub department: Option<ArcStr>,
    pub ward_bed: Option<ArcStr>,
}

/// An admission with its derived fields.
///
/// Derived fields are `None` whenever the source data doesn't support them, so a bad identifier
/// gives no admission time (and so no length of stay) rather than an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub raw: AdmissionRaw,
    pub admitted_at: Option<NaiveDateTime>,
    pub discharged_at: Option<NaiveDateTime>,
    /// Fractional days, possibly negative.
    pub length_of_stay: Option<f64>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    /// Label from the config's `record_age_groups` set.
    pub age_group: Option<ArcStr>,
    pub cohorts: BTreeSet<ArcStr>,
}

impl Admission {
    fn derive(
        raw: AdmissionRaw,
        config: &Config,
        matcher: &CohortMatcher,
        age_groups: &RangeSet<u32>,
    ) -> Self {
        let admitted_at = match (&raw.ip_number, &raw.admission_time) {
            (Some(id), Some(time)) => {
                reconstruct_admission(id, time, &config.identifier, config.date_order)
            }
            _ => None,
        };
        let discharged_at = raw
            .discharge_time
            .as_deref()
            .and_then(|raw| parse_discharge(raw, config.date_order));
        let (age, sex) = match raw.demographic_code.as_deref() {
            Some(code) => parse_demographics(code),
            None => (None, None),
        };
        let age_group = age.and_then(|age| age_groups.label_of(&age).cloned());
        let cohorts = matcher.classify(raw.diagnosis.as_deref());
        Admission {
            admitted_at,
            discharged_at,
            length_of_stay: compute_los(admitted_at, discharged_at),
            age,
            sex,
            age_group,
            cohorts,
            raw,
        }
    }

    pub fn ip_number(&self) -> Option<&str> {
        self.raw.ip_number.as_deref()
    }

    pub fn diagnosis(&self) -> Option<&str> {
        self.raw.diagnosis.as_deref()
    }

    pub fn department(&self) -> Option<&str> {
        self.raw.department.as_deref()
    }

    pub fn ward_bed(&self) -> Option<&str> {
        self.raw.ward_bed.as_deref()
    }

    pub fn in_cohort(&self, cohort: &str) -> bool {
        self.cohorts.contains(cohort)
    }

    /// Length of stay, if it falls within `window`.
    pub fn valid_los(&self, window: &LosWindow) -> Option<f64> {
        self.length_of_stay.filter(|los| window.contains(*los))
    }

    fn csv_row(&self) -> [String; 14] {
        let text = |v: &Option<ArcStr>| v.as_deref().unwrap_or_default().to_string();
        let ts = |v: Option<NaiveDateTime>| {
            v.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default()
        };
        [
            text(&self.raw.ip_number),
            text(&self.raw.admission_time),
            text(&self.raw.discharge_time),
            text(&self.raw.demographic_code),
            text(&self.raw.diagnosis),
            text(&self.raw.department),
            text(&self.raw.ward_bed),
            ts(self.admitted_at),
            ts(self.discharged_at),
            self.length_of_stay.map(|v| v.to_string()).unwrap_or_default(),
            self.age.map(|v| v.to_string()).unwrap_or_default(),
            self.sex.map(|v| v.code().to_string()).unwrap_or_default(),
            text(&self.age_group),
            self.cohorts.iter().map(|c| &**c).collect::<Vec<_>>().join(";"),
        ]
    }
}

const CSV_HEADERS: [&str; 14] = [
    "ip_number",
    "admission_time",
    "discharge_time",
    "a/s",
    "diagnosis",
    "department",
    "ward/bed",
    "admission_timestamp",
    "discharge_timestamp",
    "length_of_stay_days",
    "age",
    "sex",
    "age_group",
    "cohorts",
];

/// The classified admissions, sharing their storage between filtered copies.
#[derive(Debug, Clone)]
pub struct Admissions {
    els: Arc<Vec<Admission>>,
    cohorts: CohortDefinitions,
    age_groups: RangeSet<u32>,
}

impl Admissions {
    /// Load an export and derive every admission field.
    pub fn load(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let raw = RawTable::load(path)?.admissions(&config.columns)?;
        Self::from_raw(raw, config)
            .with_context(|| format!("while processing \"{}\"", path.display()))
    }

    /// Derive fields for already-read rows, in a single pass.
    pub fn from_raw(raw: Vec<AdmissionRaw>, config: &Config) -> Result<Self> {
        let age_groups = config.record_age_groups()?.clone();
        let matcher = config.cohorts.matcher();
        let els: Vec<Admission> = raw
            .into_iter()
            .map(|raw| Admission::derive(raw, config, &matcher, &age_groups))
            .collect();
        let this = Admissions::new(els, config.cohorts.clone(), age_groups);
        this.log_quality();
        Ok(this)
    }

    fn log_quality(&self) {
        let total = self.len();
        let no_admission = self.iter_ref().filter(|a| a.admitted_at.is_none()).count();
        let no_discharge = self.iter_ref().filter(|a| a.discharged_at.is_none()).count();
        let no_age = self.iter_ref().filter(|a| a.age.is_none()).count();
        let no_sex = self.iter_ref().filter(|a| a.sex.is_none()).count();
        for (count, what) in [
            (no_admission, "admission timestamp"),
            (no_discharge, "discharge timestamp"),
            (no_age, "age"),
            (no_sex, "sex"),
        ] {
            if count > 0 {
                event!(
                    Level::WARN,
                    "{} of {} admissions have no {}",
                    count,
                    total,
                    what
                );
            }
        }
        for (name, size) in self.cohort_sizes() {
            event!(Level::INFO, "cohort {}: {}", name, size);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Admission> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &Admission> + '_ {
        self.els.iter()
    }

    pub fn filter(&self, f: impl Fn(&Admission) -> bool) -> Self {
        self.with_els(self.iter().filter(f).collect())
    }

    /// Admissions belonging to the named cohort.
    pub fn in_cohort(&self, cohort: &str) -> Result<Self> {
        ensure!(
            self.cohorts.get(cohort).is_some(),
            "no cohort called \"{}\" (have: {})",
            cohort,
            self.cohorts.names().map(|n| &**n).collect::<Vec<_>>().join(", ")
        );
        Ok(self.filter(|a| a.in_cohort(cohort)))
    }

    pub fn cohorts(&self) -> &CohortDefinitions {
        &self.cohorts
    }

    /// The age groups each admission's `age_group` comes from.
    pub fn age_groups(&self) -> &RangeSet<u32> {
        &self.age_groups
    }

    /// Size of each cohort, against all admissions, in definition order.
    pub fn cohort_sizes(&self) -> Vec<(ArcStr, Proportion)> {
        self.cohorts
            .names()
            .map(|name| {
                let size = count_and_percentage(self.iter_ref(), |a| a.in_cohort(name));
                (name.clone(), size)
            })
            .collect()
    }

    pub fn count_sexes(&self) -> GroupCounts<Sex> {
        // Manually insert to make sure all categories are included.
        let mut counts = GroupCounts::with_groups([Sex::Male, Sex::Female]);
        for el in self.els.iter() {
            counts.add(el.sex);
        }
        counts
    }

    pub fn bucket_ages(&self, ranges: &RangeSet<u32>) -> BucketCounts {
        ranges.bucket_values(self.iter_ref().map(|a| a.age))
    }

    pub fn ages(&self) -> Summary {
        central_tendency(self.iter_ref().map(|a| a.age.map(f64::from)))
    }

    pub fn valid_los(&self, window: &LosWindow) -> ValidLos {
        window.filter(self.iter_ref().map(|a| a.length_of_stay))
    }

    /// Valid stays bucketed into LOS categories.
    pub fn los_categories(&self, categories: &RangeSet<f64>, window: &LosWindow) -> BucketCounts {
        categories.bucket_values(self.valid_los(window).values.into_iter().map(Some))
    }

    /// LOS summaries per group, for admissions with a valid stay only.
    pub fn los_by<K>(
        &self,
        window: &LosWindow,
        key_fn: impl FnMut(&&Admission) -> Option<K>,
    ) -> GroupSummaries<K>
    where
        K: std::hash::Hash + Eq + Clone,
    {
        group_summaries(
            self.iter_ref().filter(|a| a.valid_los(window).is_some()),
            key_fn,
            |a| a.valid_los(window),
        )
    }

    /// LOS per age group, in age group order.
    pub fn los_by_age_group(&self, window: &LosWindow) -> GroupSummaries<ArcStr> {
        let mut groups = self.los_by(window, |a| a.age_group.clone());
        groups.sort_by_order(self.age_groups.labels());
        groups
    }

    pub fn departments(&self) -> GroupCounts<ArcStr> {
        group_counts(self.iter_ref(), |a| a.raw.department.clone())
    }

    pub fn diagnoses(&self) -> GroupCounts<ArcStr> {
        group_counts(self.iter_ref(), |a| a.raw.diagnosis.clone())
    }

    pub fn wards(&self) -> GroupCounts<ArcStr> {
        group_counts(self.iter_ref(), |a| a.raw.ward_bed.clone())
    }

    /// Age group (rows, in age order) by sex (columns).
    pub fn age_sex_crosstab(&self) -> CrossTab<ArcStr, Sex> {
        let mut tab = CrossTab::with_keys(
            self.age_groups.labels().iter().cloned(),
            [Sex::Male, Sex::Female],
        );
        for el in self.els.iter() {
            tab.add(el.age_group.clone(), el.sex);
        }
        tab
    }

    /// Earliest and latest admission timestamps.
    pub fn admission_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let mut stamps = self.iter_ref().filter_map(|a| a.admitted_at);
        let first = stamps.next()?;
        Some(stamps.fold((first, first), |(min, max), ts| (min.min(ts), max.max(ts))))
    }

    pub fn monthly_admissions(&self) -> GroupCounts<YearMonth> {
        stats::monthly_counts(self.iter_ref().map(|a| a.admitted_at))
    }

    pub fn weekday_admissions(&self) -> GroupCounts<DayOfWeek> {
        stats::weekday_counts(self.iter_ref().map(|a| a.admitted_at))
    }

    pub fn quality(&self) -> DataQuality {
        let total = self.len();
        let present = |f: fn(&Admission) -> bool| {
            Proportion::new(self.iter_ref().filter(|a| f(*a)).count(), total)
        };
        let distinct = |f: fn(&Admission) -> Option<&str>| {
            self.iter_ref().filter_map(f).collect::<HashSet<_>>().len()
        };
        let range = self.admission_range();
        DataQuality {
            total,
            admission_time: present(|a| a.admitted_at.is_some()),
            discharge_time: present(|a| a.discharged_at.is_some()),
            length_of_stay: present(|a| a.length_of_stay.is_some()),
            age: present(|a| a.age.is_some()),
            sex: present(|a| a.sex.is_some()),
            diagnosis: present(|a| a.raw.diagnosis.is_some()),
            first_admission: range.map(|r| r.0),
            last_admission: range.map(|r| r.1),
            departments: distinct(Admission::department),
            wards: distinct(Admission::ward_bed),
        }
    }

    /// Headline characteristics: size (against `total`), age and sex.
    pub fn characteristics(&self, title: &str, total: usize) -> ReportTable {
        let ages = self.ages();
        let sexes = self.count_sexes();
        let mut table =
            ReportTable::new(["Characteristic", "Value"]).with_title(title.to_owned());
        table.push_row([
            "Admissions".to_string(),
            Proportion::new(self.len(), total).to_string(),
        ]);
        table.push_row(["Mean age (SD)".to_string(), ages.mean_sd(1)]);
        table.push_row([
            "Median age".to_string(),
            util::opt_float(ages.median, 1),
        ]);
        for sex in [Sex::Male, Sex::Female] {
            table.push_row([
                sex.to_string(),
                Proportion::new(sexes.get(&sex), self.len()).to_string(),
            ]);
        }
        table
    }

    /// The input columns followed by the derived ones. Cohorts are joined with `;`.
    pub fn report_table(&self) -> ReportTable {
        self.iter_ref()
            .fold(ReportTable::new(CSV_HEADERS), |table, el| table.with_row(el.csv_row()))
    }

    pub fn write_csv_to(&self, out: impl io::Write) -> Result {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(CSV_HEADERS)?;
        for el in self.els.iter() {
            writer.write_record(el.csv_row())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Save the classified table as csv.
    pub fn write_csv(&self, path: impl AsRef<Path>, overwrite: bool) -> Result {
        fn inner(this: &Admissions, path: &Path, overwrite: bool) -> Result {
            ensure!(
                !util::path_exists(path)? || overwrite,
                "file already exists"
            );
            let file = util::create_output(path)?;
            this.write_csv_to(io::BufWriter::new(file))
        }
        let path = path.as_ref();
        util::check_extension(path, "csv")?;
        inner(self, path, overwrite)
            .with_context(|| format!("unable to save admissions to \"{}\"", path.display()))
    }

    fn new(els: Vec<Admission>, cohorts: CohortDefinitions, age_groups: RangeSet<u32>) -> Self {
        Admissions {
            els: Arc::new(els),
            cohorts,
            age_groups,
        }
    }

    fn with_els(&self, els: Vec<Admission>) -> Self {
        Admissions::new(els, self.cohorts.clone(), self.age_groups.clone())
    }
}

impl Deref for Admissions {
    type Target = [Admission];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl<'a> IntoIterator for &'a Admissions {
    type IntoIter = <&'a [Admission] as IntoIterator>::IntoIter;
    type Item = &'a Admission;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    fn raw(
        ip: &str,
        time: &str,
        discharge: &str,
        code: &str,
        diagnosis: &str,
        department: &str,
    ) -> AdmissionRaw {
        let cell = |s: &str| (!s.is_empty()).then(|| ArcStr::from(s));
        AdmissionRaw {
            ip_number: cell(ip),
            admission_time: cell(time),
            discharge_time: cell(discharge),
            demographic_code: cell(code),
            diagnosis: cell(diagnosis),
            department: cell(department),
            ward_bed: None,
        }
    }

    fn admissions() -> Admissions {
        let config = Config::builtin().unwrap();
        Admissions::from_raw(
            vec![
                raw(
                    "IP25081500123",
                    "14:30:00",
                    "2025-08-18 14:30:00",
                    "47Y/F",
                    "Acute Gastroenteritis with severe dehydration",
                    "Medicine",
                ),
                raw(
                    "IP25080400001",
                    "10:00",
                    "2025-08-05 10:00:00",
                    "3Y/M",
                    "Viral fever with loose motions",
                    "Paediatrics",
                ),
                raw(
                    "IP25090100002",
                    "08:00",
                    "",
                    "72Y/M",
                    "Congestive heart failure",
                    "Medicine",
                ),
                raw("BAD", "08:00", "2025-09-03 08:00:00", "", "", ""),
            ],
            &config,
        )
        .unwrap()
    }

    #[test]
    fn derived_fields() {
        let adm = admissions();
        let first = &adm[0];
        assert_eq!(
            first.admitted_at,
            NaiveDate::from_ymd_opt(2025, 8, 15)
                .unwrap()
                .and_hms_opt(14, 30, 0)
        );
        assert_eq!(first.length_of_stay, Some(3.0));
        assert_eq!((first.age, first.sex), (Some(47), Some(Sex::Female)));
        assert_eq!(first.age_group.as_deref(), Some("36-50"));
        assert!(first.in_cohort("gastroenteritis"));
        assert!(!first.in_cohort("respiratory"));

        // both cohorts
        assert!(adm[1].in_cohort("gastroenteritis") && adm[1].in_cohort("respiratory"));

        // no discharge, so no LOS
        assert_eq!(adm[2].length_of_stay, None);
        assert!(adm[2].in_cohort("cardiovascular"));

        // bad identifier: discharge parsed, but nothing else
        let bad = &adm[3];
        assert_eq!(bad.admitted_at, None);
        assert!(bad.discharged_at.is_some());
        assert_eq!(bad.length_of_stay, None);
        assert!(bad.cohorts.is_empty());
    }

    #[test]
    fn cohort_views() {
        let adm = admissions();
        let sizes = adm.cohort_sizes();
        assert_eq!(&*sizes[0].0, "gastroenteritis");
        assert_eq!((sizes[0].1.n, sizes[0].1.total), (2, 4));
        let gastro = adm.in_cohort("gastroenteritis").unwrap();
        assert_eq!(gastro.len(), 2);
        // filtered views keep the source intact
        assert_eq!(adm.len(), 4);
        assert!(adm.in_cohort("dermatology").is_err());
    }

    #[test]
    fn aggregates() {
        let adm = admissions();
        let sexes = adm.count_sexes();
        assert_eq!(sexes.get(&Sex::Male), 2);
        assert_eq!(sexes.get(&Sex::Female), 1);
        assert_eq!(sexes.missing(), 1);

        let ages = adm.ages();
        assert_eq!((ages.count, ages.missing), (3, 1));
        assert_eq!(ages.median, Some(47.));

        let los = adm.valid_los(&LosWindow::STANDARD);
        assert_eq!(los.values, vec![3., 1.]);
        assert_eq!(los.offered, 4);

        let tab = adm.age_sex_crosstab();
        assert_eq!(tab.get(&ArcStr::from("0-18"), &Sex::Male), 1);
        assert_eq!(tab.rows().len(), 5);

        let months = adm.monthly_admissions();
        assert_eq!(months.len(), 2);
        assert_eq!(adm.weekday_admissions().len(), 7);

        let quality = adm.quality();
        assert_eq!(quality.admission_time.n, 3);
        assert_eq!(quality.diagnosis.n, 3);
        assert_eq!(quality.departments, 2);
        assert_eq!(quality.wards, 0);

        let by_age = adm.los_by_age_group(&LosWindow::STANDARD);
        assert_eq!(by_age.iter().next().map(|(k, _)| &**k), Some("0-18"));
    }

    #[test]
    fn write_classified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classified.csv");
        let adm = admissions();
        adm.write_csv(&path, false).unwrap();
        assert!(adm.write_csv(&path, false).is_err());
        adm.write_csv(&path, true).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().ends_with("age_group,cohorts"));
        let second = lines.nth(1).unwrap();
        assert!(second.ends_with("0-18,gastroenteritis;respiratory"), "{}", second);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipd.csv");
        fs::write(
            &path,
            "IP Number,Admission Time,Discharge Time,A/S,Diagnosis,Department\n\
             IP25081500123,14:30:00,18/08/2025 14:30,47Y/F,Pneumonia,Medicine\n\
             IP25030100001,10:00,03/04/2025 10:00,60Y/M,Chest pain,Cardiology\n",
        )
        .unwrap();
        let adm = Admissions::load(&path, &Config::builtin().unwrap()).unwrap();
        assert_eq!(adm.len(), 2);
        // 18 can't be a month, so this one is read day-first
        assert_eq!(adm[0].length_of_stay, Some(3.0));
        assert!(adm[0].in_cohort("respiratory"));
        // ambiguous, read month-first
        assert_eq!(adm[1].length_of_stay, Some(3.0));
    }
}
