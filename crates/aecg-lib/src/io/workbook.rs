//! Study workbook persistence: the `Info`, `Index` and `Stats` sheets, plus
//! `Intervals` when per-beat intervals were collected.

use crate::index::info::StudyInfo;
use crate::index::stats::StudyStats;
use crate::index::{BeatInterval, IndexRow, INDEX_COLUMNS, INTERVAL_COLUMNS};
use crate::{Error, Result};
use calamine::{open_workbook_auto, Data, Reader};
use log::info;
use rust_xlsxwriter::{Workbook, Worksheet};
use std::collections::BTreeMap;
use std::path::Path;

pub const INFO_SHEET: &str = "Info";
pub const INDEX_SHEET: &str = "Index";
pub const STATS_SHEET: &str = "Stats";
pub const INTERVALS_SHEET: &str = "Intervals";

const PROPERTY_HEADER: &str = "Property";
const VALUE_HEADER: &str = "Value";

/// Value written to a single worksheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn count(value: usize) -> Self {
        CellValue::Number(value as f64)
    }

    pub fn optional(value: Option<u32>) -> Self {
        match value {
            Some(v) => CellValue::Number(v as f64),
            None => CellValue::Text(String::new()),
        }
    }
}

/// A sheet read as text: the header row plus the remaining rows.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Cell text, empty when the row is shorter than the header.
    pub fn cell<'a>(&'a self, row: &'a [String], column: Option<usize>) -> &'a str {
        column
            .and_then(|idx| row.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook = open_workbook_auto(path)?;
    Ok(workbook.sheet_names())
}

pub fn read_sheet(path: &Path, name: &str) -> Result<Sheet> {
    let mut workbook = open_workbook_auto(path)?;
    if !workbook.sheet_names().iter().any(|sheet| sheet == name) {
        return Err(Error::MissingSheet(name.to_string()));
    }
    let range = workbook.worksheet_range(name)?;
    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|row| row.iter().map(|c| cell_text(c).trim().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Sheet { headers, rows })
}

/// Read a two-column `Property` / `Value` sheet.
pub fn read_properties(path: &Path, name: &str) -> Result<BTreeMap<String, String>> {
    let sheet = read_sheet(path, name)?;
    let property = sheet.column(PROPERTY_HEADER).ok_or_else(|| Error::MissingColumn {
        sheet: name.to_string(),
        column: PROPERTY_HEADER.to_string(),
    })?;
    let value = sheet.column(VALUE_HEADER).ok_or_else(|| Error::MissingColumn {
        sheet: name.to_string(),
        column: VALUE_HEADER.to_string(),
    })?;
    let mut out = BTreeMap::new();
    for row in &sheet.rows {
        let key = sheet.cell(row, Some(property)).trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), sheet.cell(row, Some(value)).to_string());
    }
    Ok(out)
}

/// Write the study index workbook (Info, Index and Stats sheets).
pub fn save_study_index(
    path: &Path,
    study_info: &StudyInfo,
    rows: &[IndexRow],
    stats: &StudyStats,
) -> Result<()> {
    save_study_index_with_intervals(path, study_info, rows, stats, &[])
}

/// Like [`save_study_index`]; a non-empty `intervals` adds the `Intervals` sheet.
pub fn save_study_index_with_intervals(
    path: &Path,
    study_info: &StudyInfo,
    rows: &[IndexRow],
    stats: &StudyStats,
    intervals: &[BeatInterval],
) -> Result<()> {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name(INFO_SHEET)?;
    write_properties(sheet, &study_info.to_properties())?;

    let sheet = workbook.add_worksheet();
    sheet.set_name(INDEX_SHEET)?;
    for (col, header) in INDEX_COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    for (i, row) in rows.iter().enumerate() {
        for (col, value) in row.to_record().iter().enumerate() {
            write_cell(sheet, i as u32 + 1, col as u16, value)?;
        }
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name(STATS_SHEET)?;
    write_properties(sheet, &stats.to_properties())?;

    if !intervals.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(INTERVALS_SHEET)?;
        for (col, header) in INTERVAL_COLUMNS.iter().enumerate() {
            sheet.write_string(0, col as u16, *header)?;
        }
        for (i, interval) in intervals.iter().enumerate() {
            for (col, value) in interval.to_record().iter().enumerate() {
                write_cell(sheet, i as u32 + 1, col as u16, value)?;
            }
        }
    }

    workbook.save(path)?;
    info!("saved study index with {} rows to {}", rows.len(), path.display());
    Ok(())
}

fn write_properties(sheet: &mut Worksheet, properties: &[(&str, CellValue)]) -> Result<()> {
    sheet.write_string(0, 0, PROPERTY_HEADER)?;
    sheet.write_string(0, 1, VALUE_HEADER)?;
    for (i, (key, value)) in properties.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, *key)?;
        write_cell(sheet, row, 1, value)?;
    }
    Ok(())
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, value: &CellValue) -> Result<()> {
    match value {
        CellValue::Text(text) if text.is_empty() => {}
        CellValue::Text(text) => {
            sheet.write_string(row, col, text.as_str())?;
        }
        CellValue::Number(number) => {
            sheet.write_number(row, col, *number)?;
        }
    }
    Ok(())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn properties_round_trip_through_sheet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Info").unwrap();
        write_properties(
            sheet,
            &[
                ("StudyID", CellValue::text("STUDY-9")),
                ("NumSubj", CellValue::count(12)),
                ("Ratio", CellValue::Number(1.5)),
                ("Empty", CellValue::text("")),
            ],
        )
        .unwrap();
        workbook.save(&path).unwrap();

        assert_eq!(sheet_names(&path).unwrap(), vec!["Info".to_string()]);
        let props = read_properties(&path, "Info").unwrap();
        assert_eq!(props["StudyID"], "STUDY-9");
        assert_eq!(props["NumSubj"], "12");
        assert_eq!(props["Ratio"], "1.5");
        assert_eq!(props.get("Empty").map(String::as_str), Some(""));
    }

    #[test]
    fn missing_sheet_is_a_typed_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.xlsx");
        let mut workbook = Workbook::new();
        workbook.add_worksheet().set_name("Index").unwrap();
        workbook.save(&path).unwrap();
        match read_sheet(&path, "Stats") {
            Err(Error::MissingSheet(name)) => assert_eq!(name, "Stats"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
