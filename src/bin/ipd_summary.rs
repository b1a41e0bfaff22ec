//! Whole-population tables for an IPD admissions export.
use clap::Parser;
use ipd_cohort_analysis::{header, output_dir, Admissions, Config, ReportTable};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Opt {
    /// The admissions export (csv or spreadsheet).
    input: PathBuf,
    /// Settings to use instead of the built-in ones.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Also write each table as csv into this directory.
    #[clap(long, short)]
    out_dir: Option<PathBuf>,
    /// The LOS window (from the config) applied before any LOS statistics.
    #[clap(long, short = 'w', default_value = "publication")]
    los_window: String,
    /// How many diagnoses and wards to list.
    #[clap(long, short, default_value_t = 10)]
    top: usize,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_builtin(opt.config.as_ref())?;
    let window = config.los_window(&opt.los_window)?;
    let out_dir = output_dir(opt.out_dir.as_ref())?;
    let admissions = Admissions::load(&opt.input, &config)?;
    let total = admissions.len();

    header("Data stats");
    println!("total admissions: {}", total);
    if let Some((first, last)) = admissions.admission_range() {
        println!("admissions from {} to {}", first, last);
    }

    admissions
        .characteristics("Demographics", total)
        .emit(out_dir, "demographics.csv")?;
    admissions
        .bucket_ages(admissions.age_groups())
        .report_table("Age groups", "Age group", total)
        .emit(out_dir, "age_groups.csv")?;
    admissions
        .count_sexes()
        .report_table("Sex", "Sex", total)
        .emit(out_dir, "sex.csv")?;
    admissions
        .age_sex_crosstab()
        .report_table("Age group by sex", "Age group")
        .emit(out_dir, "age_by_sex.csv")?;

    let mut departments = admissions.departments();
    departments.sort_by_count();
    departments
        .report_table("Departments", "Department", total)
        .emit(out_dir, "departments.csv")?;
    admissions
        .diagnoses()
        .top(opt.top)
        .report_table(&format!("Top {} diagnoses", opt.top), "Diagnosis", total)
        .emit(out_dir, "top_diagnoses.csv")?;

    admissions
        .monthly_admissions()
        .report_table("Admissions by month", "Month", total)
        .emit(out_dir, "monthly_admissions.csv")?;
    admissions
        .weekday_admissions()
        .report_table("Admissions by day of week", "Day", total)
        .emit(out_dir, "weekday_admissions.csv")?;

    let cohorts = admissions.cohort_sizes().into_iter().fold(
        ReportTable::new(["Cohort", "Admissions"]).with_title("Cohorts"),
        |table, (name, size)| table.with_row([name.to_string(), size.to_string()]),
    );
    cohorts.emit(out_dir, "cohorts.csv")?;

    let valid = admissions.valid_los(&window);
    header("Length of stay");
    println!("{}", valid);
    valid
        .summary()
        .report_table("LOS statistics (days)", 2)
        .emit(out_dir, "los_statistics.csv")?;
    admissions
        .los_categories(&config.los_categories, &window)
        .report_table("LOS categories", "Length of stay", valid.kept())
        .emit(out_dir, "los_categories.csv")?;
    admissions
        .los_by_age_group(&window)
        .report_table("LOS by age group", "Age group", 2)
        .emit(out_dir, "los_by_age_group.csv")?;
    admissions
        .los_by(&window, |a| a.sex)
        .report_table("LOS by sex", "Sex", 2)
        .emit(out_dir, "los_by_sex.csv")?;
    let mut by_department = admissions.los_by(&window, |a| a.raw.department.clone());
    by_department.sort_by_count();
    by_department
        .report_table("LOS by department", "Department", 2)
        .emit(out_dir, "los_by_department.csv")?;
    let mut by_month = admissions.los_by(&window, |a| {
        a.admitted_at.map(ipd_cohort_analysis::YearMonth::of)
    });
    by_month.sort_by_key();
    by_month
        .report_table("LOS by month", "Month", 2)
        .emit(out_dir, "los_by_month.csv")?;

    let wards = admissions.wards();
    if wards.is_empty() {
        event!(Level::INFO, "no ward/bed data, skipping ward utilisation");
    } else {
        wards
            .top(opt.top)
            .report_table("Ward/bed utilisation", "Ward/bed", total)
            .emit(out_dir, "wards.csv")?;
    }

    admissions
        .quality()
        .report_table()
        .emit(out_dir, "data_quality.csv")?;
    Ok(())
}
