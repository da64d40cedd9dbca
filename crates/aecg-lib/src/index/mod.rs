//! Study index: one row per waveform found in a study's aECG files.

pub mod indexer;
pub mod info;
pub mod stats;

use crate::io::workbook::{read_sheet, CellValue, Sheet, INDEX_SHEET};
use crate::signal::WaveformType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const USUBJID: &str = "USUBJID";
pub const EGTPTREF: &str = "EGTPTREF";
pub const EGDTC: &str = "EGDTC";
pub const ZIPFILE: &str = "ZIPFILE";
pub const AECGXML: &str = "AECGXML";
pub const EGREFID: &str = "EGREFID";
pub const WFTYPE: &str = "WFTYPE";
pub const ANNS: &str = "ANNS";
pub const ANNLEADS: &str = "ANNLEADS";
pub const ANNSPRIMARY: &str = "ANNSPRIMARY";
pub const QTS: &str = "QTS";
pub const QTSPRIMARY: &str = "QTSPRIMARY";
pub const DIGITIZED: &str = "DIGITIZED";
pub const ERRORS: &str = "ERRORS";

/// Columns that must be present in an `Index` sheet. `EGREFID` is checked
/// separately because its absence only disables the tree.
pub const REQUIRED_COLUMNS: [&str; 6] = [USUBJID, EGTPTREF, EGDTC, ZIPFILE, AECGXML, WFTYPE];

/// Column order used when writing the `Index` sheet.
pub const INDEX_COLUMNS: [&str; 14] = [
    USUBJID,
    EGTPTREF,
    EGDTC,
    ZIPFILE,
    AECGXML,
    EGREFID,
    WFTYPE,
    ANNS,
    ANNLEADS,
    ANNSPRIMARY,
    QTS,
    QTSPRIMARY,
    DIGITIZED,
    ERRORS,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub subject_id: String,
    pub timepoint: String,
    /// HL7 timestamp of the waveform (EGDTC)
    pub timestamp: String,
    /// Archive holding the XML, relative to the study directory; empty for plain files
    pub zip_file: String,
    /// XML file, relative to the archive or to the study directory
    pub xml_file: String,
    pub ref_id: String,
    pub waveform_type: WaveformType,
    pub annotations: usize,
    pub annotated_leads: usize,
    pub primary_lead_annotations: usize,
    pub qts: usize,
    pub qts_primary_lead: usize,
    pub potentially_digitized: bool,
    /// Empty when the file was parsed without errors
    pub error: String,
}

impl IndexRow {
    /// Row recorded for a file that could not be indexed.
    pub fn with_error(zip_file: &str, xml_file: &str, message: impl Into<String>) -> Self {
        Self {
            zip_file: zip_file.to_string(),
            xml_file: xml_file.to_string(),
            error: message.into(),
            ..Default::default()
        }
    }

    /// Identifies the aECG file (and waveform set) the row belongs to.
    pub fn aecg_key(&self) -> (&str, &str, &str) {
        (&self.zip_file, &self.xml_file, &self.ref_id)
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn to_record(&self) -> Vec<CellValue> {
        vec![
            CellValue::text(&self.subject_id),
            CellValue::text(&self.timepoint),
            CellValue::text(&self.timestamp),
            CellValue::text(&self.zip_file),
            CellValue::text(&self.xml_file),
            CellValue::text(&self.ref_id),
            // no waveform was read from a file with errors
            CellValue::text(if self.has_error() { "" } else { self.waveform_type.as_str() }),
            CellValue::count(self.annotations),
            CellValue::count(self.annotated_leads),
            CellValue::count(self.primary_lead_annotations),
            CellValue::count(self.qts),
            CellValue::count(self.qts_primary_lead),
            CellValue::text(if self.potentially_digitized { "TRUE" } else { "FALSE" }),
            CellValue::text(&self.error),
        ]
    }
}

/// Header of the optional `Intervals` sheet.
pub const INTERVAL_COLUMNS: [&str; 9] = [
    ZIPFILE, AECGXML, EGREFID, WFTYPE, "LEAD", "ANNCODE", "START", "END", "DURATION",
];

/// One timed annotation of a waveform, times in ms from the first sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatInterval {
    pub zip_file: String,
    pub xml_file: String,
    pub ref_id: String,
    pub waveform_type: WaveformType,
    /// Empty for global annotations
    pub lead: String,
    pub code: String,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl BeatInterval {
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }

    pub fn to_record(&self) -> Vec<CellValue> {
        vec![
            CellValue::text(&self.zip_file),
            CellValue::text(&self.xml_file),
            CellValue::text(&self.ref_id),
            CellValue::text(self.waveform_type.as_str()),
            CellValue::text(&self.lead),
            CellValue::text(&self.code),
            CellValue::Number(self.start_ms),
            CellValue::Number(self.end_ms),
            CellValue::Number(self.duration_ms()),
        ]
    }
}

/// Rows read from an `Index` sheet.
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    pub rows: Vec<IndexRow>,
    /// False when the sheet has no `EGREFID` column
    pub has_ref_id: bool,
}

impl IndexTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct (ZIPFILE, AECGXML, EGREFID, WFTYPE) combinations.
    pub fn waveform_count(&self) -> usize {
        let mut keys: Vec<_> = self
            .rows
            .iter()
            .map(|row| (row.aecg_key(), row.waveform_type))
            .collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}

pub fn load_index(path: &Path) -> Result<IndexTable> {
    let sheet = read_sheet(path, INDEX_SHEET)?;
    index_from_sheet(&sheet)
}

pub fn index_from_sheet(sheet: &Sheet) -> Result<IndexTable> {
    for column in REQUIRED_COLUMNS {
        if !sheet.has_column(column) {
            return Err(Error::MissingColumn {
                sheet: INDEX_SHEET.to_string(),
                column: column.to_string(),
            });
        }
    }
    let col = |name: &str| sheet.column(name);
    let (subject, timepoint, timestamp) = (col(USUBJID), col(EGTPTREF), col(EGDTC));
    let (zip_file, xml_file, ref_id, wftype) =
        (col(ZIPFILE), col(AECGXML), col(EGREFID), col(WFTYPE));
    let (anns, ann_leads, anns_primary) = (col(ANNS), col(ANNLEADS), col(ANNSPRIMARY));
    let (qts, qts_primary, digitized, errors) =
        (col(QTS), col(QTSPRIMARY), col(DIGITIZED), col(ERRORS));

    let mut rows = Vec::with_capacity(sheet.rows.len());
    for record in &sheet.rows {
        let count = |column: Option<usize>| -> Result<usize> {
            let text = sheet.cell(record, column).trim();
            if text.is_empty() {
                return Ok(0);
            }
            text.parse::<f64>()
                .map(|v| v.max(0.0) as usize)
                .map_err(|_| Error::InvalidValue {
                    field: column
                        .and_then(|idx| sheet.headers.get(idx))
                        .cloned()
                        .unwrap_or_default(),
                    value: text.to_string(),
                })
        };
        let error = sheet.cell(record, errors).to_string();
        let kind = sheet.cell(record, wftype);
        let waveform_type = if kind.trim().is_empty() && !error.trim().is_empty() {
            WaveformType::default()
        } else {
            kind.parse()?
        };
        rows.push(IndexRow {
            subject_id: sheet.cell(record, subject).to_string(),
            timepoint: sheet.cell(record, timepoint).to_string(),
            timestamp: sheet.cell(record, timestamp).to_string(),
            zip_file: sheet.cell(record, zip_file).to_string(),
            xml_file: sheet.cell(record, xml_file).to_string(),
            ref_id: sheet.cell(record, ref_id).to_string(),
            waveform_type,
            annotations: count(anns)?,
            annotated_leads: count(ann_leads)?,
            primary_lead_annotations: count(anns_primary)?,
            qts: count(qts)?,
            qts_primary_lead: count(qts_primary)?,
            potentially_digitized: matches!(
                sheet.cell(record, digitized).trim().to_ascii_uppercase().as_str(),
                "TRUE" | "1"
            ),
            error,
        });
    }
    Ok(IndexTable {
        rows,
        has_ref_id: ref_id.is_some(),
    })
}
