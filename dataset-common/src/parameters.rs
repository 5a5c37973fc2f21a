//! Parameter range tables (inputs to sampling) and per-dataset parameter tables (one row per
//! sample index, written once at generation time).

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{DatasetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Int,
    #[serde(alias = "real")]
    Float,
}

/// One row of the range table: how a parameter is defaulted and where it may be drawn from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterRange {
    #[serde(rename = "Parameter", alias = "")]
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: ParameterKind,
    #[serde(rename = "Default Value")]
    pub default: f64,
    #[serde(rename = "Minimum")]
    pub minimum: f64,
    #[serde(rename = "Maximum")]
    pub maximum: f64,
}

impl ParameterRange {
    fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(DatasetError::MalformedRangeTable(msg));
        if self.name.trim().is_empty() {
            return malformed("empty parameter name".into());
        }
        if ![self.default, self.minimum, self.maximum].iter().all(|v| v.is_finite()) {
            return malformed(format!("'{}' has non-finite bounds", self.name));
        }
        if self.minimum > self.maximum {
            return malformed(format!(
                "'{}' minimum {} exceeds maximum {}",
                self.name, self.minimum, self.maximum
            ));
        }
        if self.kind == ParameterKind::Int
            && [self.default, self.minimum, self.maximum].iter().any(|v| v.fract() != 0.0)
        {
            return malformed(format!("integer parameter '{}' has fractional bounds", self.name));
        }
        Ok(())
    }
}

/// The full parameter-range table, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRanges {
    ranges: Vec<ParameterRange>,
}

impl ParameterRanges {
    /// Loads a range table CSV with columns `Parameter,Type,Default Value,Minimum,Maximum`.
    /// Extra columns are ignored; missing columns or non-numeric bounds are fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = std::fs::File::open(path_ref).map_err(|e| {
            DatasetError::MalformedRangeTable(format!("cannot open '{}': {}", path_ref.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut ranges = Vec::new();
        let mut seen = HashSet::new();
        for record in csv_reader.deserialize::<ParameterRange>() {
            let range = record.map_err(|e| DatasetError::MalformedRangeTable(e.to_string()))?;
            range.validate()?;
            if !seen.insert(range.name.clone()) {
                return Err(DatasetError::MalformedRangeTable(format!(
                    "duplicate parameter '{}'",
                    range.name
                )));
            }
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(DatasetError::MalformedRangeTable("no parameters".into()));
        }
        Ok(Self { ranges })
    }

    pub fn from_ranges(ranges: Vec<ParameterRange>) -> Result<Self> {
        for range in &ranges {
            range.validate()?;
        }
        Ok(Self { ranges })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterRange> {
        self.ranges.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterRange> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// A single scalar parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Int(i64),
    Real(f64),
}

impl ParameterValue {
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            ParameterValue::Int(v) => v as f64,
            ParameterValue::Real(v) => v,
        }
    }

    fn parse(cell: &str) -> Option<Self> {
        let cell = cell.trim();
        if let Ok(v) = cell.parse::<i64>() {
            return Some(ParameterValue::Int(v));
        }
        cell.parse::<f64>().ok().map(ParameterValue::Real)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{}", v),
            // Debug keeps the trailing ".0" so reals read back as reals.
            ParameterValue::Real(v) => write!(f, "{:?}", v),
        }
    }
}

/// Borrowed view of one sample's parameters.
#[derive(Debug, Clone, Copy)]
pub struct ParameterRow<'a> {
    names: &'a [String],
    values: &'a [ParameterValue],
}

impl<'a> ParameterRow<'a> {
    pub fn get(&self, name: &str) -> Option<ParameterValue> {
        self.names.iter().position(|n| n == name).map(|i| self.values[i])
    }

    /// Value of `name` as `f64`, or an `UnknownParameter` error.
    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .map(ParameterValue::as_f64)
            .ok_or_else(|| DatasetError::UnknownParameter(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, ParameterValue)> + 'a {
        let (names, values) = (self.names, self.values);
        names.iter().map(String::as_str).zip(values.iter().copied())
    }
}

/// Rectangular parameter table: columns are parameters, rows are sample indices `0..n`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable {
    names: Vec<String>,
    rows: Vec<Vec<ParameterValue>>,
}

impl ParameterTable {
    pub fn new(names: Vec<String>, rows: Vec<Vec<ParameterValue>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != names.len()) {
            return Err(DatasetError::ShapeMismatch {
                left: (rows.len(), names.len()),
                right: (bad, rows[bad].len()),
            });
        }
        Ok(Self { names, rows })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, sample: usize) -> Option<ParameterRow<'_>> {
        self.rows.get(sample).map(|values| ParameterRow {
            names: &self.names,
            values,
        })
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DatasetError::UnknownParameter(name.to_string()))
    }

    /// All per-sample values of one parameter, by sample index.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }

    /// Distinct values of one parameter, ascending.
    pub fn distinct_values(&self, name: &str) -> Result<Vec<f64>> {
        let mut values = self.column(name)?;
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(values)
    }

    /// Sample indices whose value of `name` equals `value` exactly.
    pub fn indices_with_value(&self, name: &str, value: f64) -> Result<Vec<usize>> {
        let idx = self.column_index(name)?;
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r[idx].as_f64() == value)
            .map(|(i, _)| i)
            .collect())
    }

    /// `(min, max)` of one parameter over the dataset.
    pub fn value_range(&self, name: &str) -> Result<(f64, f64)> {
        let values = self.column(name)?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok((min, max))
    }

    /// Writes `sample,<names...>` followed by one row per sample.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let to_err = |e: csv::Error| DatasetError::TableIo(e.to_string());
        let mut header = vec!["sample".to_string()];
        header.extend(self.names.iter().cloned());
        csv_writer.write_record(&header).map_err(to_err)?;
        for (i, row) in self.rows.iter().enumerate() {
            let mut record = vec![i.to_string()];
            record.extend(row.iter().map(|v| v.to_string()));
            csv_writer.write_record(&record).map_err(to_err)?;
        }
        csv_writer
            .flush()
            .map_err(|e| DatasetError::TableIo(e.to_string()))?;
        Ok(())
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let malformed = |msg: String| DatasetError::MalformedParameterTable(msg);
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers().map_err(|e| malformed(e.to_string()))?.clone();
        let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let mut rows = Vec::new();
        for (expected, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| malformed(e.to_string()))?;
            let sample: usize = record
                .get(0)
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| malformed(format!("row {} has no sample index", expected)))?;
            if sample != expected {
                return Err(malformed(format!(
                    "sample indices are not contiguous: expected {}, found {}",
                    expected, sample
                )));
            }
            let values = record
                .iter()
                .skip(1)
                .map(|cell| {
                    ParameterValue::parse(cell)
                        .ok_or_else(|| malformed(format!("non-numeric value '{}' in row {}", cell, sample)))
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(values);
        }
        Self::new(names, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGES: &str = "\
Parameter,Type,Default Value,Minimum,Maximum,Unit
cell_cycle,int,24,12,36,h
average_healthy_glucose_absorption,float,0.36,0.216,0.648,
";

    #[test]
    fn test_load_ranges() {
        let ranges = ParameterRanges::from_reader(RANGES.as_bytes()).unwrap();
        assert_eq!(ranges.len(), 2);
        let cycle = ranges.get("cell_cycle").unwrap();
        assert_eq!(cycle.kind, ParameterKind::Int);
        assert_eq!(cycle.maximum, 36.0);
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "Parameter,Type,Default Value,Minimum\ncell_cycle,int,24,12\n";
        assert!(matches!(
            ParameterRanges::from_reader(csv.as_bytes()),
            Err(DatasetError::MalformedRangeTable(_))
        ));
    }

    #[test]
    fn test_non_numeric_bound_is_fatal() {
        let csv = "Parameter,Type,Default Value,Minimum,Maximum\ncell_cycle,int,24,low,36\n";
        assert!(ParameterRanges::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_inverted_bounds_are_fatal() {
        let csv = "Parameter,Type,Default Value,Minimum,Maximum\ncell_cycle,int,24,36,12\n";
        assert!(ParameterRanges::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_table_csv_round_trip_keeps_kinds() {
        let table = ParameterTable::new(
            vec!["cell_cycle".into(), "rate".into()],
            vec![
                vec![ParameterValue::Int(24), ParameterValue::Real(2.0)],
                vec![ParameterValue::Int(30), ParameterValue::Real(0.125)],
            ],
        )
        .unwrap();
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("sample,cell_cycle,rate\n0,24,2.0\n"));
        let back = ParameterTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_column_queries() {
        let table = ParameterTable::new(
            vec!["p".into()],
            vec![
                vec![ParameterValue::Real(1.5)],
                vec![ParameterValue::Real(1.0)],
                vec![ParameterValue::Real(1.5)],
            ],
        )
        .unwrap();
        assert_eq!(table.distinct_values("p").unwrap(), vec![1.0, 1.5]);
        assert_eq!(table.indices_with_value("p", 1.5).unwrap(), vec![0, 2]);
        assert_eq!(table.value_range("p").unwrap(), (1.0, 1.5));
        assert!(matches!(table.column("q"), Err(DatasetError::UnknownParameter(_))));
        assert_eq!(table.row(1).unwrap().require("p").unwrap(), 1.0);
    }

    #[test]
    fn test_gapped_parameter_table_is_malformed() {
        let csv = "sample,cell_cycle\n0,24\n2,30\n";
        assert!(matches!(
            ParameterTable::read_csv(csv.as_bytes()),
            Err(DatasetError::MalformedParameterTable(_))
        ));
    }
}
