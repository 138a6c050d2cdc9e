//! # Dataset
//!
//! An in-memory tabular dataset: an ordered list of uniquely named columns and
//! an ordered list of rows, each holding one [Cell] per column. The processing
//! engine never mutates a dataset it was given; derived columns are produced
//! with [Dataset::with_column], which returns an independent copy.
//!
//! The CSV codec here mirrors what the surrounding application needs to get
//! data in and out. Cells read from CSV are parsed as integer, then float,
//! then kept as text; an empty field becomes [Cell::Null].

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::dataset::errors::{DatasetError, ShapeMismatch};

/// One cell of a dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// String coercion used when a cell value is substituted into a prompt.
    /// Null becomes the empty string, never a textual "null" or "NaN".
    pub fn to_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    fn parse_csv_field(field: &str) -> Cell {
        if field.is_empty() {
            Cell::Null
        } else if let Ok(i) = field.parse::<i64>() {
            Cell::Int(i)
        } else if let Ok(f) = field.parse::<f64>() {
            Cell::Float(f)
        } else {
            Cell::Text(field.to_string())
        }
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

/// An ordered tabular dataset. Every row has exactly one cell per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Create an empty dataset with the given column names.
    /// Returns an error if a column name repeats.
    pub fn new(columns: Vec<String>) -> Result<Self, DatasetError> {
        for (idx, name) in columns.iter().enumerate() {
            if columns[..idx].contains(name) {
                return Err(DatasetError::DuplicateColumn(name.clone()));
            }
        }
        Ok(Self { columns, rows: Vec::new() })
    }

    /// Append one row. The row must have exactly one cell per column.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), ShapeMismatch> {
        if row.len() != self.columns.len() {
            return Err(ShapeMismatch {
                expected: self.columns.len(),
                actual: row.len(),
                row_index: self.rows.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Get the cell at `row` for the named column.
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// Produce a new dataset with the named column set to `values`, aligned by
    /// row position. An existing column of the same name is replaced, otherwise
    /// the column is appended after the existing ones. `self` is untouched.
    pub fn with_column(&self, name: impl Into<String>, values: Vec<Cell>) -> Result<Dataset, ShapeMismatch> {
        if values.len() != self.rows.len() {
            return Err(ShapeMismatch {
                expected: self.rows.len(),
                actual: values.len(),
                row_index: 0,
            });
        }
        let name = name.into();
        let mut out = self.clone();
        match out.column_index(&name) {
            Some(col) => {
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row[col] = value;
                }
            }
            None => {
                out.columns.push(name);
                for (row, value) in out.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Read a dataset from CSV with a header row.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Dataset, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let columns = reader.headers()
            .map_err(DatasetError::Csv)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut dataset = Dataset::new(columns)?;
        for record in reader.records() {
            let record = record.map_err(DatasetError::Csv)?;
            let row = record.iter().map(Cell::parse_csv_field).collect();
            dataset.push_row(row).map_err(DatasetError::Shape)?;
        }
        Ok(dataset)
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Dataset, DatasetError> {
        let file = File::open(path).map_err(DatasetError::Io)?;
        Self::from_csv_reader(file)
    }

    /// Write the dataset as CSV with a header row. Null cells are written as
    /// empty fields.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns).map_err(DatasetError::Csv)?;
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(Cell::to_text).collect();
            writer.write_record(&fields).map_err(DatasetError::Csv)?;
        }
        writer.flush().map_err(DatasetError::Io)?;
        Ok(())
    }

    pub fn to_csv_path(&self, path: impl AsRef<Path>) -> Result<(), DatasetError> {
        let file = File::create(path).map_err(DatasetError::Io)?;
        self.to_csv_writer(file)
    }
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;

    /// A row or column value list whose length does not match the dataset.
    #[derive(Debug)]
    pub struct ShapeMismatch {
        pub expected: usize,
        pub actual: usize,
        pub row_index: usize,
    }

    impl fmt::Display for ShapeMismatch {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "ShapeMismatch: expected {} values, got {} (at row {})",
                   self.expected, self.actual, self.row_index)
        }
    }

    impl Error for ShapeMismatch {}

    #[derive(Debug)]
    pub enum DatasetError {
        DuplicateColumn(String),
        Shape(ShapeMismatch),
        Csv(csv::Error),
        Io(std::io::Error),
    }

    impl fmt::Display for DatasetError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                DatasetError::DuplicateColumn(name) => write!(f, "duplicate column name: {}", name),
                DatasetError::Shape(e) => write!(f, "{}", e),
                DatasetError::Csv(e) => write!(f, "CSV error: {}", e),
                DatasetError::Io(e) => write!(f, "IO error: {}", e),
            }
        }
    }

    impl Error for DatasetError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                DatasetError::DuplicateColumn(_) => None,
                DatasetError::Shape(e) => Some(e),
                DatasetError::Csv(e) => Some(e),
                DatasetError::Io(e) => Some(e),
            }
        }
    }
}
