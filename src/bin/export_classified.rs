//! Write the admissions export back out with derived fields and cohort memberships.
use clap::Parser;
use ipd_cohort_analysis::{Admissions, Config};
use qu::ick_use::*;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Opt {
    /// The admissions export (csv or spreadsheet).
    input: PathBuf,
    /// Where to write the classified csv.
    output: PathBuf,
    /// Settings to use instead of the built-in ones.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// Only export admissions in this cohort.
    #[clap(long)]
    cohort: Option<String>,
    /// Replace the output file if it exists.
    #[clap(long, short)]
    force: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = Config::load_or_builtin(opt.config.as_ref())?;
    let mut admissions = Admissions::load(&opt.input, &config)?;
    for (name, size) in admissions.cohort_sizes() {
        println!("{}: {}", name, size);
    }
    if let Some(cohort) = &opt.cohort {
        admissions = admissions.in_cohort(cohort)?;
    }
    admissions.write_csv(&opt.output, opt.force)?;
    event!(
        Level::INFO,
        "wrote {} admissions to \"{}\"",
        admissions.len(),
        opt.output.display()
    );
    Ok(())
}
