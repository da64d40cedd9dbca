//! Study information stored in the `Info` sheet of a study index.

use crate::io::workbook::{read_properties, CellValue, INFO_SHEET};
use crate::signal::{lead_short_name, WaveformType, STANDARD_LEADS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Waveform on which a study's annotations were placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationMethod {
    #[default]
    Rhythm,
    Derived,
    HolterRhythm,
    HolterMedianBeat,
}

impl AnnotationMethod {
    pub const ALL: [AnnotationMethod; 4] = [
        AnnotationMethod::Rhythm,
        AnnotationMethod::Derived,
        AnnotationMethod::HolterRhythm,
        AnnotationMethod::HolterMedianBeat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnnotationMethod::Rhythm => "RHYTHM",
            AnnotationMethod::Derived => "DERIVED",
            AnnotationMethod::HolterRhythm => "HOLTER_RHYTHM",
            AnnotationMethod::HolterMedianBeat => "HOLTER_MEDIAN_BEAT",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnnotationMethod::Rhythm => "Rhythm",
            AnnotationMethod::Derived => "Derived",
            AnnotationMethod::HolterRhythm => "Holter-rhythm",
            AnnotationMethod::HolterMedianBeat => "Holter-median beat",
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|m| m == self).unwrap_or(0)
    }

    /// Waveform whose annotations count towards the study statistics.
    pub fn waveform_type(&self) -> WaveformType {
        match self {
            AnnotationMethod::Rhythm | AnnotationMethod::HolterRhythm => WaveformType::Rhythm,
            AnnotationMethod::Derived | AnnotationMethod::HolterMedianBeat => {
                WaveformType::Derived
            }
        }
    }
}

impl fmt::Display for AnnotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnnotationMethod {
    type Err = Error;

    /// Accepts the method name or its 1-based position.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value = s.trim().to_ascii_uppercase();
        if let Some(method) = Self::ALL.iter().find(|m| m.name() == value) {
            return Ok(*method);
        }
        value
            .parse::<f64>()
            .ok()
            .filter(|n| n.fract() == 0.0 && *n >= 1.0 && *n <= Self::ALL.len() as f64)
            .map(|n| Self::ALL[n as usize - 1])
            .ok_or_else(|| Error::InvalidValue {
                field: "AnMethod".into(),
                value: s.to_string(),
            })
    }
}

pub const APP_TYPE: &str = "AppType";
pub const APP_NUM: &str = "AppNum";
pub const STUDY_ID: &str = "StudyID";
pub const SPONSOR: &str = "Sponsor";
pub const DESCRIPTION: &str = "Description";
pub const NUM_SUBJ: &str = "NumSubj";
pub const NECG_SUBJ: &str = "NECGSubj";
pub const TOTAL_ECGS: &str = "TotalECGs";
pub const AN_METHOD: &str = "AnMethod";
pub const AN_LEAD: &str = "AnLead";
pub const AN_NBEATS: &str = "AnNbeats";
pub const STUDY_DIR: &str = "StudyDir";
pub const INDEX_FILE: &str = "IndexFile";
pub const DATE: &str = "Date";
pub const END_DATE: &str = "End_date";
pub const VERSION: &str = "Version";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyInfo {
    /// Application type (e.g. IND, NDA)
    pub app_type: String,
    /// Application number, zero-padded to six digits when written
    pub app_num: String,
    pub study_id: String,
    pub sponsor: String,
    pub description: String,
    pub num_subjects: Option<u32>,
    pub ecgs_per_subject: Option<u32>,
    pub total_ecgs: Option<u32>,
    pub annotation_method: AnnotationMethod,
    /// Primary lead, either a full HL7 code or its short name
    pub annotation_lead: String,
    /// Beats expected to be annotated per aECG
    pub annotation_beats: Option<u32>,
    pub study_dir: String,
    pub index_file: String,
    /// Start of the last indexing run (ISO 8601)
    pub date: String,
    pub end_date: String,
    pub version: String,
}

impl StudyInfo {
    /// HL7 code of the primary lead. Accepts a code, a short name or a
    /// 0-based position in the standard lead list.
    pub fn primary_lead_code(&self) -> String {
        let lead = self.annotation_lead.trim();
        if lead.is_empty() {
            return String::new();
        }
        if lead.starts_with("MDC_ECG_LEAD_") {
            return lead.to_string();
        }
        if let Some(code) = STANDARD_LEADS
            .iter()
            .find(|code| lead_short_name(code).eq_ignore_ascii_case(lead))
        {
            return code.to_string();
        }
        if let Ok(idx) = lead.parse::<usize>() {
            if let Some(code) = STANDARD_LEADS.get(idx) {
                return code.to_string();
            }
        }
        format!("MDC_ECG_LEAD_{lead}")
    }

    pub fn formatted_app_num(&self) -> String {
        let num = self.app_num.trim();
        match num.parse::<f64>() {
            Ok(n) if n.fract() == 0.0 && n >= 0.0 => format!("{:06}", n as u64),
            _ => num.to_string(),
        }
    }

    pub fn to_properties(&self) -> Vec<(&'static str, CellValue)> {
        vec![
            (APP_TYPE, CellValue::text(&self.app_type)),
            (APP_NUM, CellValue::text(self.formatted_app_num())),
            (STUDY_ID, CellValue::text(&self.study_id)),
            (SPONSOR, CellValue::text(&self.sponsor)),
            (DESCRIPTION, CellValue::text(&self.description)),
            (NUM_SUBJ, CellValue::optional(self.num_subjects)),
            (NECG_SUBJ, CellValue::optional(self.ecgs_per_subject)),
            (TOTAL_ECGS, CellValue::optional(self.total_ecgs)),
            (AN_METHOD, CellValue::text(self.annotation_method.name())),
            (AN_LEAD, CellValue::text(&self.annotation_lead)),
            (AN_NBEATS, CellValue::optional(self.annotation_beats)),
            (STUDY_DIR, CellValue::text(&self.study_dir)),
            (INDEX_FILE, CellValue::text(&self.index_file)),
            (DATE, CellValue::text(&self.date)),
            (END_DATE, CellValue::text(&self.end_date)),
            (VERSION, CellValue::text(&self.version)),
        ]
    }

    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self> {
        let text = |key: &str| props.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let number = |key: &str| -> Result<Option<u32>> {
            let value = text(key);
            if value.is_empty() {
                return Ok(None);
            }
            value
                .parse::<f64>()
                .ok()
                .filter(|n| *n >= 0.0)
                .map(|n| Some(n as u32))
                .ok_or_else(|| Error::InvalidValue {
                    field: key.to_string(),
                    value,
                })
        };
        let method = text(AN_METHOD);
        Ok(Self {
            app_type: text(APP_TYPE),
            app_num: text(APP_NUM),
            study_id: text(STUDY_ID),
            sponsor: text(SPONSOR),
            description: text(DESCRIPTION),
            num_subjects: number(NUM_SUBJ)?,
            ecgs_per_subject: number(NECG_SUBJ)?,
            total_ecgs: number(TOTAL_ECGS)?,
            annotation_method: if method.is_empty() {
                AnnotationMethod::default()
            } else {
                method.parse()?
            },
            annotation_lead: text(AN_LEAD),
            annotation_beats: number(AN_NBEATS)?,
            study_dir: text(STUDY_DIR),
            index_file: text(INDEX_FILE),
            date: text(DATE),
            end_date: text(END_DATE),
            version: text(VERSION),
        })
    }
}

/// Read the `Info` sheet. An empty `StudyDir` defaults to the directory
/// holding the workbook.
pub fn load_study_info(path: &Path) -> Result<StudyInfo> {
    let props = read_properties(path, INFO_SHEET)?;
    let mut info = StudyInfo::from_properties(&props)?;
    if info.study_dir.is_empty() {
        info.study_dir = path
            .parent()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
    }
    Ok(info)
}
