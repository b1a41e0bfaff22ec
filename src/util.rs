use crate::Result;
use qu::ick_use::*;
use std::{
    borrow::Cow,
    fmt, fs, io,
    path::{Path, PathBuf},
};
use term_data_table as tdt;

/// Cell contents that mean "no value" in the exports we receive.
pub const MISSING_MARKERS: &[&str] = &["", "nan", "NaN", "null", "NULL", "NaT"];

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Trim a cell and map the missing markers to `None`.
pub fn non_missing(cell: &str) -> Option<&str> {
    let cell = cell.trim();
    if MISSING_MARKERS.contains(&cell) {
        None
    } else {
        Some(cell)
    }
}

/// Format `count / denominator` as a percentage with one decimal place.
///
/// An empty denominator gives "-" rather than `NaN%`.
pub fn percentage(count: usize, denominator: usize) -> String {
    if denominator == 0 {
        "-".into()
    } else {
        format!("{:.1}%", count as f64 / denominator as f64 * 100.)
    }
}

/// Format an optional statistic, with missing values shown as "-".
pub fn opt_float(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".into(),
    }
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

// A table of pre-formatted cells that can go to the terminal or to a csv file.

/// An aggregate rendered as strings, ready for display or export.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    title: Option<Cow<'static, str>>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ReportTable {
            title: None,
            headers: headers.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }

    pub fn with_title(mut self, title: impl Into<Cow<'static, str>>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Short rows are padded with empty cells, long rows are truncated to the header width.
    pub fn push_row(&mut self, row: impl IntoIterator<Item = impl Into<String>>) {
        let mut row: Vec<String> = row.into_iter().map(Into::into).collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.push_row(row);
        self
    }

    pub fn term_table(&self) -> tdt::Table<'static> {
        use tdt::{Cell, Row, Table};

        let header_row = self
            .headers
            .iter()
            .fold(Row::new(), |row, header| row.with_cell(Cell::from(header.clone())));
        self.rows.iter().fold(Table::new().with_row(header_row), |tbl, row| {
            tbl.with_row(
                row.iter()
                    .fold(Row::new(), |r, cell| r.with_cell(Cell::from(cell.clone()))),
            )
        })
    }

    /// Write the header row and all rows as csv.
    pub fn write_csv(&self, out: impl io::Write) -> Result {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Print the table and, if `out_dir` is given, save it as `<out_dir>/<file_name>`.
    pub fn emit(&self, out_dir: Option<&Path>, file_name: &str) -> Result {
        if let Some(title) = &self.title {
            header(title);
        }
        println!("{}", self.term_table());
        if let Some(out_dir) = out_dir {
            self.save(out_dir.join(file_name))?;
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        fn inner(table: &ReportTable, path: &Path) -> Result {
            let file = create_output(path)?;
            table.write_csv(io::BufWriter::new(file))
        }
        let path = path.as_ref();
        check_extension(path, "csv")?;
        inner(self, path).with_context(|| format!("unable to save table to \"{}\"", path.display()))
    }
}

impl fmt::Display for ReportTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(title) = &self.title {
            writeln!(f, "{}", title)?;
        }
        write!(f, "{}", self.term_table())
    }
}

/// Create a file for output, making parent directories and warning if the file already exists.
pub fn create_output(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("could not create parent")?;
    }
    // check rather than `create_new` so we can still overwrite, but say so.
    if path_exists(path)? {
        event!(
            Level::WARN,
            "overwriting existing file at \"{}\"",
            path.display()
        );
    }
    Ok(fs::File::create(path)?)
}

/// Where a binary should put its csv tables, if anywhere.
pub fn output_dir(dir: Option<&PathBuf>) -> Result<Option<&Path>> {
    match dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create \"{}\"", dir.display()))?;
            Ok(Some(dir.as_path()))
        }
        None => Ok(None),
    }
}

pub fn header(header: &str) {
    let len = header.chars().count();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_markers() {
        assert_eq!(non_missing("  nan "), None);
        assert_eq!(non_missing("NaT"), None);
        assert_eq!(non_missing(""), None);
        assert_eq!(non_missing(" Fever "), Some("Fever"));
        // only the exact markers count
        assert_eq!(non_missing("Nancy"), Some("Nancy"));
    }

    #[test]
    fn percentages() {
        assert_eq!(percentage(1, 3), "33.3%");
        assert_eq!(percentage(0, 0), "-");
        assert_eq!(opt_float(Some(2.), 2), "2.00");
        assert_eq!(opt_float(None, 2), "-");
    }

    #[test]
    fn table_csv() {
        let mut table = ReportTable::new(["Department", "Count"]).with_title("Departments");
        table.push_row(["Medicine", "3"]);
        table.push_row(["Surgery"]);
        let mut out = vec![];
        table.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Department,Count\nMedicine,3\nSurgery,\n"
        );
        assert_eq!(table.title(), Some("Departments"));
    }

    #[test]
    fn save_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = ReportTable::new(["a"]).with_row(["1"]);
        let path = dir.path().join("nested").join("table.csv");
        table.save(&path).unwrap();
        // saving again overwrites
        table.save(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n1\n");
        assert!(table.save(dir.path().join("table.txt")).is_err());
    }
}
