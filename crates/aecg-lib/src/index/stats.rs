//! Aggregate counters over a study index, stored in the `Stats` sheet.

use super::info::StudyInfo;
use super::IndexRow;
use crate::io::workbook::{read_properties, CellValue, STATS_SHEET};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyStats {
    pub num_subjects: usize,
    pub num_aecgs: usize,
    pub avg_aecgs_subject: f64,
    /// Subjects with fewer aECGs than expected per subject
    pub subjects_less_aecgs: usize,
    pub subjects_more_aecgs: usize,
    pub aecgs_no_annotations: usize,
    /// aECGs with fewer QT intervals in the primary lead than the expected beats
    pub aecgs_less_qt_in_primary_lead: usize,
    pub aecgs_less_qts: usize,
    pub aecgs_annotations_multiple_leads: usize,
    pub aecgs_annotations_no_primary_lead: usize,
    pub aecgs_with_errors: usize,
    pub aecgs_potentially_digitized: usize,
}

const NUM_SUBJECTS: &str = "num_subjects";
const NUM_AECGS: &str = "num_aecgs";
const AVG_AECGS_SUBJECT: &str = "avg_aecgs_subject";
const SUBJECTS_LESS_AECGS: &str = "subjects_less_aecgs";
const SUBJECTS_MORE_AECGS: &str = "subjects_more_aecgs";
const AECGS_NO_ANNOTATIONS: &str = "aecgs_no_annotations";
const AECGS_LESS_QT_IN_PRIMARY_LEAD: &str = "aecgs_less_qt_in_primary_lead";
const AECGS_LESS_QTS: &str = "aecgs_less_qts";
const AECGS_ANNOTATIONS_MULTIPLE_LEADS: &str = "aecgs_annotations_multiple_leads";
const AECGS_ANNOTATIONS_NO_PRIMARY_LEAD: &str = "aecgs_annotations_no_primary_lead";
const AECGS_WITH_ERRORS: &str = "aecgs_with_errors";
const AECGS_POTENTIALLY_DIGITIZED: &str = "aecgs_potentially_digitized";

impl StudyStats {
    /// Compute statistics over the rows of the annotated waveform type.
    ///
    /// An aECG is a distinct (ZIPFILE, AECGXML, EGREFID). Rows with errors
    /// only count towards `aecgs_with_errors`.
    pub fn compute(info: &StudyInfo, rows: &[IndexRow]) -> Self {
        let kind = info.annotation_method.waveform_type();
        let expected_beats = info.annotation_beats.unwrap_or(0) as usize;

        let mut aecgs: BTreeMap<(&str, &str, &str), &IndexRow> = BTreeMap::new();
        let mut per_subject: BTreeMap<&str, BTreeSet<(&str, &str, &str)>> = BTreeMap::new();
        let mut errors = BTreeSet::new();
        let mut digitized = BTreeSet::new();
        for row in rows {
            if row.has_error() {
                errors.insert(row.aecg_key());
                continue;
            }
            if row.potentially_digitized {
                digitized.insert(row.aecg_key());
            }
            if row.waveform_type != kind {
                continue;
            }
            aecgs.entry(row.aecg_key()).or_insert(row);
            per_subject
                .entry(row.subject_id.as_str())
                .or_default()
                .insert(row.aecg_key());
        }

        let num_subjects = per_subject.len();
        let num_aecgs = aecgs.len();
        let (subjects_less_aecgs, subjects_more_aecgs) = match info.ecgs_per_subject {
            Some(expected) => {
                let expected = expected as usize;
                (
                    per_subject.values().filter(|s| s.len() < expected).count(),
                    per_subject.values().filter(|s| s.len() > expected).count(),
                )
            }
            None => (0, 0),
        };
        let count = |pred: &dyn Fn(&IndexRow) -> bool| aecgs.values().filter(|&&r| pred(r)).count();

        Self {
            num_subjects,
            num_aecgs,
            avg_aecgs_subject: if num_subjects > 0 {
                num_aecgs as f64 / num_subjects as f64
            } else {
                0.0
            },
            subjects_less_aecgs,
            subjects_more_aecgs,
            aecgs_no_annotations: count(&|r: &IndexRow| r.annotations == 0),
            aecgs_less_qt_in_primary_lead: count(&|r: &IndexRow| r.qts_primary_lead < expected_beats),
            aecgs_less_qts: count(&|r: &IndexRow| r.qts < expected_beats),
            aecgs_annotations_multiple_leads: count(&|r: &IndexRow| r.annotated_leads > 1),
            aecgs_annotations_no_primary_lead: count(&|r: &IndexRow| {
                r.annotations > 0 && r.primary_lead_annotations == 0
            }),
            aecgs_with_errors: errors.len(),
            aecgs_potentially_digitized: digitized.len(),
        }
    }

    /// Percentage of subjects, blank when there are none.
    pub fn subject_percent(&self, value: usize) -> String {
        percent(value, self.num_subjects)
    }

    /// Percentage of aECGs, blank when there are none.
    pub fn aecg_percent(&self, value: usize) -> String {
        percent(value, self.num_aecgs)
    }

    pub fn to_properties(&self) -> Vec<(&'static str, CellValue)> {
        vec![
            (NUM_SUBJECTS, CellValue::count(self.num_subjects)),
            (NUM_AECGS, CellValue::count(self.num_aecgs)),
            (AVG_AECGS_SUBJECT, CellValue::Number(self.avg_aecgs_subject)),
            (SUBJECTS_LESS_AECGS, CellValue::count(self.subjects_less_aecgs)),
            (SUBJECTS_MORE_AECGS, CellValue::count(self.subjects_more_aecgs)),
            (AECGS_NO_ANNOTATIONS, CellValue::count(self.aecgs_no_annotations)),
            (
                AECGS_LESS_QT_IN_PRIMARY_LEAD,
                CellValue::count(self.aecgs_less_qt_in_primary_lead),
            ),
            (AECGS_LESS_QTS, CellValue::count(self.aecgs_less_qts)),
            (
                AECGS_ANNOTATIONS_MULTIPLE_LEADS,
                CellValue::count(self.aecgs_annotations_multiple_leads),
            ),
            (
                AECGS_ANNOTATIONS_NO_PRIMARY_LEAD,
                CellValue::count(self.aecgs_annotations_no_primary_lead),
            ),
            (AECGS_WITH_ERRORS, CellValue::count(self.aecgs_with_errors)),
            (
                AECGS_POTENTIALLY_DIGITIZED,
                CellValue::count(self.aecgs_potentially_digitized),
            ),
        ]
    }

    /// Missing keys keep their default value.
    pub fn from_properties(props: &BTreeMap<String, String>) -> Result<Self> {
        let number = |key: &str| -> Result<f64> {
            match props.get(key).map(|v| v.trim()) {
                None | Some("") => Ok(0.0),
                Some(value) => value.parse::<f64>().map_err(|_| Error::InvalidValue {
                    field: key.to_string(),
                    value: value.to_string(),
                }),
            }
        };
        let count = |key: &str| number(key).map(|n| n.max(0.0) as usize);
        Ok(Self {
            num_subjects: count(NUM_SUBJECTS)?,
            num_aecgs: count(NUM_AECGS)?,
            avg_aecgs_subject: number(AVG_AECGS_SUBJECT)?,
            subjects_less_aecgs: count(SUBJECTS_LESS_AECGS)?,
            subjects_more_aecgs: count(SUBJECTS_MORE_AECGS)?,
            aecgs_no_annotations: count(AECGS_NO_ANNOTATIONS)?,
            aecgs_less_qt_in_primary_lead: count(AECGS_LESS_QT_IN_PRIMARY_LEAD)?,
            aecgs_less_qts: count(AECGS_LESS_QTS)?,
            aecgs_annotations_multiple_leads: count(AECGS_ANNOTATIONS_MULTIPLE_LEADS)?,
            aecgs_annotations_no_primary_lead: count(AECGS_ANNOTATIONS_NO_PRIMARY_LEAD)?,
            aecgs_with_errors: count(AECGS_WITH_ERRORS)?,
            aecgs_potentially_digitized: count(AECGS_POTENTIALLY_DIGITIZED)?,
        })
    }
}

fn percent(value: usize, total: usize) -> String {
    if total == 0 {
        return String::new();
    }
    format!("{:.2} %", value as f64 / total as f64 * 100.0)
}

pub fn load_study_stats(path: &Path) -> Result<StudyStats> {
    let props = read_properties(path, STATS_SHEET)?;
    StudyStats::from_properties(&props)
}
