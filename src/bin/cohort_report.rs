//! Per-cohort tables: size, demographics, diagnoses and length of stay.
use clap::Parser;
use ipd_cohort_analysis::{
    group_summaries, header, output_dir, Admissions, Config, ReportTable, YearMonth,
};
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
    /// Cohorts to report on. Defaults to all of them.
    #[clap(long = "cohort")]
    cohorts: Vec<String>,
    /// The age group set (from the config) used for cohort tables.
    #[clap(long, short, default_value = "cohort")]
    age_groups: String,
    /// The LOS window (from the config) applied before any LOS statistics.
    #[clap(long, short = 'w', default_value = "standard")]
    los_window: String,
    /// How many diagnoses to list. 0 lists all of them.
    #[clap(long, short, default_value_t = 0)]
    top: usize,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_builtin(opt.config.as_ref())?;
    let window = config.los_window(&opt.los_window)?;
    let age_groups = config.age_groups(&opt.age_groups)?;
    let out_dir = output_dir(opt.out_dir.as_ref())?;
    let admissions = Admissions::load(&opt.input, &config)?;
    let total = admissions.len();

    let names: Vec<String> = if opt.cohorts.is_empty() {
        admissions.cohorts().names().map(|n| n.to_string()).collect()
    } else {
        opt.cohorts.clone()
    };

    for name in &names {
        let cohort = admissions.in_cohort(name)?;
        let size = cohort.len();
        let file = |table: &str| format!("{}_{}.csv", name, table);

        header(&format!("Cohort: {}", name));
        if let Some(description) = admissions.cohorts().get(name).and_then(|c| c.description()) {
            println!("{}", description);
        }
        if size == 0 {
            event!(Level::WARN, "no admissions in cohort {}", name);
            continue;
        }

        cohort
            .characteristics("Demographics", total)
            .emit(out_dir, &file("demographics"))?;
        cohort
            .ages()
            .report_table("Age (years)", 1)
            .emit(out_dir, &file("age"))?;
        cohort
            .bucket_ages(age_groups)
            .report_table("Age groups", "Age group", size)
            .emit(out_dir, &file("age_groups"))?;
        cohort
            .count_sexes()
            .report_table("Sex", "Sex", size)
            .emit(out_dir, &file("sex"))?;

        let diagnoses = if opt.top == 0 {
            let mut diagnoses = cohort.diagnoses();
            diagnoses.sort_by_count();
            diagnoses
        } else {
            cohort.diagnoses().top(opt.top)
        };
        diagnoses
            .report_table("Diagnoses", "Diagnosis", size)
            .emit(out_dir, &file("diagnoses"))?;
        let mut departments = cohort.departments();
        departments.sort_by_count();
        departments
            .report_table("Departments", "Department", size)
            .emit(out_dir, &file("departments"))?;
        cohort
            .monthly_admissions()
            .report_table("Admissions by month", "Month", size)
            .emit(out_dir, &file("monthly"))?;

        let valid = cohort.valid_los(&window);
        println!("\n{}", valid);
        valid
            .summary()
            .report_table("LOS statistics (days)", 2)
            .emit(out_dir, &file("los_statistics"))?;
        cohort
            .los_categories(&config.los_categories, &window)
            .report_table("LOS categories", "Length of stay", valid.kept())
            .emit(out_dir, &file("los_categories"))?;

        let mut by_age = group_summaries(
            cohort.iter_ref().filter(|a| a.valid_los(&window).is_some()),
            |a| a.age.and_then(|age| age_groups.label_of(&age).cloned()),
            |a| a.valid_los(&window),
        );
        by_age.sort_by_order(age_groups.labels());
        by_age
            .report_table("LOS by age group", "Age group", 2)
            .emit(out_dir, &file("los_by_age_group"))?;

        let mut by_month = cohort.los_by(&window, |a| a.admitted_at.map(YearMonth::of));
        by_month.sort_by_key();
        by_month
            .report_table("Mean LOS by month", "Month", 2)
            .emit(out_dir, &file("los_by_month"))?;
    }

    // overlap between cohorts, since membership isn't exclusive
    let mut overlap = ReportTable::new(
        std::iter::once("Cohort".to_string()).chain(names.iter().cloned()),
    )
    .with_title("Cohort overlap");
    for row in &names {
        let cells = std::iter::once(row.clone()).chain(names.iter().map(|col| {
            admissions
                .iter_ref()
                .filter(|a| a.in_cohort(row) && a.in_cohort(col))
                .count()
                .to_string()
        }));
        overlap.push_row(cells);
    }
    overlap.emit(out_dir, "cohort_overlap.csv")?;
    Ok(())
}
