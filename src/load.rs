//! Reading the raw admissions export.
//!
//! Exports arrive either as csv or as a spreadsheet. Either way we end up with a grid of optional
//! text cells under normalized headers, and only then pick out the columns we need.
use crate::{util, AdmissionRaw, ArcStr, Result};
use calamine::{DataType, Reader};
use chrono::{Duration, NaiveDate};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Structural problems that stop a file being used at all.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read csv {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read workbook {path}: {source}")]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("workbook has no worksheets: {path}")]
    NoWorksheet { path: PathBuf },

    #[error("unsupported input format (expected csv, xls, xlsx, xlsb or ods): {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("no data rows in {path}")]
    Empty { path: PathBuf },

    /// Every absent column is listed, not just the first.
    #[error("required columns missing from {path}: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String>, path: PathBuf },
}

/// Lower case, trimmed, with spaces replaced by underscores.
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

/// The source column for each field of an admission. Names are normalized before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    pub ip_number: String,
    pub admission_time: String,
    pub discharge_time: String,
    pub demographics: String,
    pub diagnosis: String,
    pub department: String,
    /// Not required to be present.
    pub ward_bed: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        ColumnNames {
            ip_number: "ip_number".into(),
            admission_time: "admission_time".into(),
            discharge_time: "discharge_time".into(),
            demographics: "a/s".into(),
            diagnosis: "diagnosis".into(),
            department: "department".into(),
            ward_bed: Some("ward/bed".into()),
        }
    }
}

impl ColumnNames {
    fn required(&self) -> [&str; 6] {
        [
            &self.ip_number,
            &self.admission_time,
            &self.discharge_time,
            &self.demographics,
            &self.diagnosis,
            &self.department,
        ]
    }
}

/// The cells of an export, under normalized headers.
#[derive(Debug, Clone)]
pub struct RawTable {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<Option<ArcStr>>>,
}

impl RawTable {
    /// Read a csv or spreadsheet, chosen by file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let table = match ext.as_deref() {
            Some("csv") => Self::load_csv(path)?,
            Some("xls" | "xlsx" | "xlsm" | "xlsb" | "ods") => Self::load_workbook(path)?,
            _ => {
                return Err(LoadError::UnsupportedFormat {
                    path: path.to_owned(),
                })
            }
        };
        if table.rows.is_empty() {
            return Err(LoadError::Empty {
                path: path.to_owned(),
            });
        }
        event!(
            Level::INFO,
            "read {} rows and {} columns from \"{}\"",
            table.rows.len(),
            table.headers.len(),
            path.display()
        );
        Ok(table)
    }

    fn load_csv(path: &Path) -> Result<Self, LoadError> {
        let csv_err = |source| LoadError::Csv {
            path: path.to_owned(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;
        let headers = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(normalize_header)
            .collect();
        let mut rows = vec![];
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(cell_text).collect());
        }
        Ok(Self::new(path, headers, rows))
    }

    fn load_workbook(path: &Path) -> Result<Self, LoadError> {
        let workbook_err = |source| LoadError::Workbook {
            path: path.to_owned(),
            source,
        };
        let mut workbook = calamine::open_workbook_auto(path).map_err(workbook_err)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| LoadError::NoWorksheet {
                path: path.to_owned(),
            })?
            .map_err(workbook_err)?;
        let mut grid = range.rows();
        let headers = match grid.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| normalize_header(&cell.to_string()))
                .collect(),
            None => vec![],
        };
        let rows = grid.map(|row| row.iter().map(workbook_cell).collect()).collect();
        Ok(Self::new(path, headers, rows))
    }

    fn new(path: &Path, headers: Vec<String>, rows: Vec<Vec<Option<ArcStr>>>) -> Self {
        // exports often end with blank lines
        let rows = rows
            .into_iter()
            .filter(|row: &Vec<Option<ArcStr>>| row.iter().any(Option::is_some))
            .collect();
        RawTable {
            path: path.to_owned(),
            headers,
            rows,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, looked up by its normalized name.
    pub fn column(&self, name: &str) -> Option<usize> {
        let name = normalize_header(name);
        self.headers.iter().position(|h| *h == name)
    }

    /// Pull out the admission fields, failing if any required column is absent.
    pub fn admissions(&self, columns: &ColumnNames) -> Result<Vec<AdmissionRaw>, LoadError> {
        let missing: Vec<String> = columns
            .required()
            .iter()
            .filter(|name| self.column(name).is_none())
            .map(|name| normalize_header(name))
            .collect();
        if !missing.is_empty() {
            return Err(LoadError::MissingColumns {
                columns: missing,
                path: self.path.clone(),
            });
        }
        // checked above
        let idx = |name: &str| self.column(name).unwrap_or_default();
        let ip_number = idx(columns.ip_number.as_str());
        let admission_time = idx(columns.admission_time.as_str());
        let discharge_time = idx(columns.discharge_time.as_str());
        let demographics = idx(columns.demographics.as_str());
        let diagnosis = idx(columns.diagnosis.as_str());
        let department = idx(columns.department.as_str());
        let ward_bed = columns.ward_bed.as_deref().and_then(|name| self.column(name));
        if ward_bed.is_none() {
            event!(Level::DEBUG, "no ward/bed column in \"{}\"", self.path.display());
        }

        fn get(row: &[Option<ArcStr>], idx: usize) -> Option<ArcStr> {
            row.get(idx).cloned().flatten()
        }
        Ok(self
            .rows
            .iter()
            .map(|row| AdmissionRaw {
                ip_number: get(row, ip_number),
                admission_time: get(row, admission_time),
                discharge_time: get(row, discharge_time),
                demographic_code: get(row, demographics),
                diagnosis: get(row, diagnosis),
                department: get(row, department),
                ward_bed: ward_bed.and_then(|idx| get(row, idx)),
            })
            .collect())
    }
}

fn cell_text(cell: &str) -> Option<ArcStr> {
    util::non_missing(cell).map(Into::into)
}

/// Spreadsheet cells as the text a csv export would have held.
fn workbook_cell(cell: &DataType) -> Option<ArcStr> {
    #[allow(unreachable_patterns)]
    match cell {
        DataType::Empty | DataType::Error(_) => None,
        DataType::String(s) => cell_text(s),
        DataType::Int(v) => Some(v.to_string().into()),
        DataType::Float(v) => Some(float_text(*v).into()),
        DataType::Bool(v) => Some(v.to_string().into()),
        DataType::DateTime(serial) => excel_datetime_text(*serial).map(Into::into),
        other => cell_text(&other.to_string()),
    }
}

fn float_text(v: f64) -> String {
    if v.fract() == 0. && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Excel stores date/times as days since 1899-12-30. Serials below one day are times of day.
fn excel_datetime_text(serial: f64) -> Option<String> {
    if !serial.is_finite() || serial < 0. {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.).round() as i64;
    let datetime = epoch.checked_add_signed(Duration::milliseconds(millis))?;
    Some(if serial < 1. {
        datetime.format("%H:%M:%S").to_string()
    } else {
        datetime.format("%Y-%m-%d %H:%M:%S").to_string()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    const CSV: &str = "\
IP Number,Admission Time,Discharge Time,A/S,Diagnosis,Department,Ward/Bed
IP25081500123,14:30:00,2025-08-18 11:00:00,47Y/F,Acute Gastroenteritis,Medicine,W1/12
IP25081600007,09:00,,3Y/M,nan,Paediatrics
,,,,,,
IP2508,10:00,2025-08-20 10:00:00,,Fever,Medicine,NULL
";

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn headers_normalized() {
        assert_eq!(normalize_header(" IP Number "), "ip_number");
        assert_eq!(normalize_header("A/S"), "a/s");
        assert_eq!(normalize_header("Ward/Bed"), "ward/bed");
    }

    #[test]
    fn load_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "ipd.csv", CSV);
        let table = RawTable::load(&path).unwrap();
        // the blank row is dropped
        assert_eq!(table.len(), 3);
        assert_eq!(table.column("Discharge Time"), Some(2));

        let raw = table.admissions(&ColumnNames::default()).unwrap();
        assert_eq!(raw[0].ip_number.as_deref(), Some("IP25081500123"));
        assert_eq!(raw[0].ward_bed.as_deref(), Some("W1/12"));
        // short row and missing markers
        assert_eq!(raw[1].discharge_time, None);
        assert_eq!(raw[1].diagnosis, None);
        assert_eq!(raw[1].ward_bed, None);
        assert_eq!(raw[2].demographic_code, None);
        assert_eq!(raw[2].ward_bed, None);
    }

    #[test]
    fn ward_bed_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "ipd.csv",
            "ip_number,admission_time,discharge_time,a/s,diagnosis,department\n\
             IP25081500123,14:30,,47Y/F,Fever,Medicine\n",
        );
        let raw = RawTable::load(&path)
            .unwrap()
            .admissions(&ColumnNames::default())
            .unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].ward_bed, None);
    }

    #[test]
    fn all_missing_columns_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "ipd.csv", "ip_number,diagnosis,department\nIP1,x,y\n");
        let err = RawTable::load(&path)
            .unwrap()
            .admissions(&ColumnNames::default())
            .unwrap_err();
        match err {
            LoadError::MissingColumns { columns, .. } => {
                assert_eq!(columns, ["admission_time", "discharge_time", "a/s"])
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn structural_errors() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(dir.path(), "empty.csv", "ip_number,diagnosis\n");
        assert!(matches!(RawTable::load(&empty), Err(LoadError::Empty { .. })));
        let txt = write(dir.path(), "ipd.txt", CSV);
        assert!(matches!(
            RawTable::load(&txt),
            Err(LoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            RawTable::load(dir.path().join("absent.csv")),
            Err(LoadError::Csv { .. })
        ));
        assert!(matches!(
            RawTable::load(dir.path().join("absent.xlsx")),
            Err(LoadError::Workbook { .. })
        ));
    }

    #[test]
    fn spreadsheet_cells() {
        assert_eq!(float_text(47.), "47");
        assert_eq!(float_text(2.5), "2.5");
        // 2025-08-15 14:30
        assert_eq!(
            excel_datetime_text(45884.604166666664).as_deref(),
            Some("2025-08-15 14:30:00")
        );
        assert_eq!(excel_datetime_text(0.75).as_deref(), Some("18:00:00"));
        assert_eq!(workbook_cell(&DataType::Empty), None);
        assert_eq!(
            workbook_cell(&DataType::String(" NaT ".into())),
            None
        );
    }
}
