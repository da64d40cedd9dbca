//! State behind the Validator tab: the study information form, the statistics
//! table and the indexing progress line.

use aecg_lib::index::info::{AnnotationMethod, StudyInfo};
use aecg_lib::index::stats::StudyStats;
use aecg_lib::signal::{lead_short_name, STANDARD_LEADS};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const APP_TYPES: [&str; 4] = ["IND", "NDA", "ANDA", "BLA"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Editable copy of [`StudyInfo`]; numbers stay text until validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyInfoForm {
    pub app_type: String,
    pub app_num: String,
    pub study_id: String,
    pub sponsor: String,
    pub description: String,
    pub annotation_method: AnnotationMethod,
    pub annotation_lead: String,
    pub annotation_beats: String,
    pub num_subjects: String,
    pub ecgs_per_subject: String,
    pub total_ecgs: String,
    pub study_dir: String,
    pub index_file: String,
    /// Carried through unchanged
    pub version: String,
}

fn number_text(value: Option<u32>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

fn parse_number(label: &str, text: &str) -> Result<Option<u32>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u32>()
        .map(Some)
        .with_context(|| format!("{label} must be a whole number, got '{text}'"))
}

impl StudyInfoForm {
    pub fn from_info(info: &StudyInfo) -> Self {
        Self {
            app_type: info.app_type.clone(),
            app_num: info.app_num.clone(),
            study_id: info.study_id.clone(),
            sponsor: info.sponsor.clone(),
            description: info.description.clone(),
            annotation_method: info.annotation_method,
            annotation_lead: if info.annotation_lead.is_empty() {
                String::new()
            } else {
                lead_short_name(&info.primary_lead_code()).to_string()
            },
            annotation_beats: number_text(info.annotation_beats),
            num_subjects: number_text(info.num_subjects),
            ecgs_per_subject: number_text(info.ecgs_per_subject),
            total_ecgs: number_text(info.total_ecgs),
            study_dir: info.study_dir.clone(),
            index_file: info.index_file.clone(),
            version: info.version.clone(),
        }
    }

    /// Validate the form into study information.
    pub fn to_info(&self) -> Result<StudyInfo> {
        let app_num = self.app_num.trim();
        if !app_num.is_empty() && !app_num.chars().all(|c| c.is_ascii_digit()) {
            bail!("application number must contain digits only, got '{app_num}'");
        }
        let lead = self.annotation_lead.trim();
        if !lead.is_empty() && !STANDARD_LEADS.iter().any(|code| lead_short_name(code) == lead) {
            bail!("unknown primary lead '{lead}'");
        }
        Ok(StudyInfo {
            app_type: self.app_type.trim().to_string(),
            app_num: app_num.to_string(),
            study_id: self.study_id.trim().to_string(),
            sponsor: self.sponsor.trim().to_string(),
            description: self.description.trim().to_string(),
            num_subjects: parse_number("number of subjects", &self.num_subjects)?,
            ecgs_per_subject: parse_number("aECGs per subject", &self.ecgs_per_subject)?,
            total_ecgs: parse_number("total aECGs", &self.total_ecgs)?,
            annotation_method: self.annotation_method,
            annotation_lead: lead.to_string(),
            annotation_beats: parse_number("beats per aECG", &self.annotation_beats)?,
            study_dir: self.study_dir.trim().to_string(),
            index_file: self.index_file.trim().to_string(),
            version: self.version.clone(),
            ..Default::default()
        })
    }

    /// Check the paths needed before (re)generating the index.
    pub fn indexing_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let study_dir = PathBuf::from(self.study_dir.trim());
        if self.study_dir.trim().is_empty() || !study_dir.is_dir() {
            bail!("study directory not found: '{}'", study_dir.display());
        }
        let index_file = self.index_file.trim();
        if index_file.is_empty() {
            bail!("no index file selected");
        }
        let index_file = PathBuf::from(index_file);
        if let Some(parent) = index_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("index file directory not found: '{}'", parent.display());
            }
        }
        Ok((study_dir, index_file))
    }

    /// Default index file location inside a chosen study directory.
    pub fn suggest_index_file(&mut self, study_dir: &Path) {
        if self.index_file.trim().is_empty() {
            self.index_file = study_dir.join("study_index.xlsx").display().to_string();
        }
    }
}

/// One line of the "found in aECG files" table.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    pub label: &'static str,
    pub value: String,
    pub percent: String,
}

pub fn stats_rows(stats: &StudyStats) -> Vec<StatsRow> {
    let row = |label: &'static str, value: usize, percent: String| StatsRow {
        label,
        value: value.to_string(),
        percent,
    };
    vec![
        row("Number of subjects", stats.num_subjects, String::new()),
        row("Number of aECGs", stats.num_aecgs, String::new()),
        StatsRow {
            label: "Average aECGs per subject",
            value: if stats.num_subjects > 0 {
                format!("{:.2}", stats.avg_aecgs_subject)
            } else {
                String::new()
            },
            percent: String::new(),
        },
        row(
            "Subjects with fewer aECGs than expected",
            stats.subjects_less_aecgs,
            stats.subject_percent(stats.subjects_less_aecgs),
        ),
        row(
            "Subjects with more aECGs than expected",
            stats.subjects_more_aecgs,
            stats.subject_percent(stats.subjects_more_aecgs),
        ),
        row(
            "aECGs without annotations",
            stats.aecgs_no_annotations,
            stats.aecg_percent(stats.aecgs_no_annotations),
        ),
        row(
            "aECGs with fewer QTs in the primary lead than expected",
            stats.aecgs_less_qt_in_primary_lead,
            stats.aecg_percent(stats.aecgs_less_qt_in_primary_lead),
        ),
        row(
            "aECGs with fewer QTs than expected",
            stats.aecgs_less_qts,
            stats.aecg_percent(stats.aecgs_less_qts),
        ),
        row(
            "aECGs annotated in multiple leads",
            stats.aecgs_annotations_multiple_leads,
            stats.aecg_percent(stats.aecgs_annotations_multiple_leads),
        ),
        row(
            "aECGs with annotations outside the primary lead",
            stats.aecgs_annotations_no_primary_lead,
            stats.aecg_percent(stats.aecgs_annotations_no_primary_lead),
        ),
        row(
            "aECGs potentially digitized",
            stats.aecgs_potentially_digitized,
            stats.aecg_percent(stats.aecgs_potentially_digitized),
        ),
        row("aECG files with errors", stats.aecgs_with_errors, String::new()),
    ]
}

/// Timing of an indexing run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressClock {
    started: DateTime<Local>,
}

impl ProgressClock {
    pub fn start() -> Self {
        Self::started_at(Local::now())
    }

    pub fn started_at(started: DateTime<Local>) -> Self {
        Self { started }
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn timestamp(time: DateTime<Local>) -> String {
        time.format(TIMESTAMP_FORMAT).to_string()
    }

    /// `Validating aECG j/m | Execution time: H:MM:SS | r aECGs per second | ETA: t`
    pub fn label(&self, current: usize, total: usize, now: DateTime<Local>) -> String {
        let elapsed = (now - self.started).num_milliseconds().max(0) as f64 / 1000.0;
        let rate = if elapsed > 0.0 { current as f64 / elapsed } else { 0.0 };
        let eta = if rate > 0.0 {
            let remaining = total.saturating_sub(current) as f64 / rate;
            Self::timestamp(now + chrono::Duration::milliseconds((remaining * 1000.0) as i64))
        } else {
            "--".to_string()
        };
        format!(
            "Validating aECG {current}/{total} | Execution time: {} | {rate:.2} aECGs per second | ETA: {eta}",
            format_elapsed(elapsed)
        )
    }

    pub fn completed_label(&self, current: usize, total: usize, now: DateTime<Local>) -> String {
        let label = self.label(current, total, now);
        let head = label.split(" | ETA:").next().unwrap_or_default();
        format!(
            "{} | Completed: {}",
            head.replacen("Validating", "Validated", 1),
            Self::timestamp(now)
        )
    }
}

/// `H:MM:SS`, hours unpadded.
pub fn format_elapsed(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn form_round_trips_study_info() {
        let info = StudyInfo {
            app_type: "IND".into(),
            app_num: "000123".into(),
            study_id: "STUDY-1".into(),
            annotation_method: AnnotationMethod::Derived,
            annotation_lead: "MDC_ECG_LEAD_V2".into(),
            annotation_beats: Some(3),
            num_subjects: Some(40),
            ..Default::default()
        };
        let form = StudyInfoForm::from_info(&info);
        assert_eq!(form.annotation_lead, "V2");
        assert_eq!(form.annotation_beats, "3");
        assert_eq!(form.total_ecgs, "");

        let back = form.to_info().unwrap();
        assert_eq!(back.primary_lead_code(), "MDC_ECG_LEAD_V2");
        assert_eq!(back.num_subjects, Some(40));
        assert_eq!(back.total_ecgs, None);
        assert_eq!(back.annotation_method, AnnotationMethod::Derived);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let form = StudyInfoForm {
            num_subjects: "forty".into(),
            ..Default::default()
        };
        let err = form.to_info().unwrap_err().to_string();
        assert!(err.contains("number of subjects"), "{err}");

        let form = StudyInfoForm {
            app_num: "12a".into(),
            ..Default::default()
        };
        assert!(form.to_info().is_err());

        let form = StudyInfoForm {
            annotation_lead: "V9".into(),
            ..Default::default()
        };
        assert!(form.to_info().is_err());
    }

    #[test]
    fn indexing_paths_require_existing_directory() {
        let dir = tempdir().unwrap();
        let mut form = StudyInfoForm {
            study_dir: dir.path().join("absent").display().to_string(),
            ..Default::default()
        };
        assert!(form.indexing_paths().is_err());

        form.study_dir = dir.path().display().to_string();
        assert!(form.indexing_paths().is_err());
        form.suggest_index_file(dir.path());
        let (study, index) = form.indexing_paths().unwrap();
        assert_eq!(study, dir.path());
        assert_eq!(index, dir.path().join("study_index.xlsx"));
    }

    #[test]
    fn stats_table_shows_blank_percentages_for_empty_study() {
        let rows = stats_rows(&StudyStats::default());
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.percent.is_empty()));
        assert_eq!(rows[2].value, "");
        assert_eq!(rows[0].value, "0");

        let stats = StudyStats {
            num_subjects: 4,
            num_aecgs: 8,
            avg_aecgs_subject: 2.0,
            subjects_less_aecgs: 1,
            aecgs_no_annotations: 2,
            ..Default::default()
        };
        let rows = stats_rows(&stats);
        assert_eq!(rows[2].value, "2.00");
        assert_eq!(rows[3].percent, "25.00 %");
        assert_eq!(rows[5].percent, "25.00 %");
    }

    #[test]
    fn progress_label_reports_rate_and_eta() {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let clock = ProgressClock::started_at(start);
        let now = start + chrono::Duration::seconds(65);
        let label = clock.label(13, 26, now);
        assert_eq!(
            label,
            "Validating aECG 13/26 | Execution time: 0:01:05 | 0.20 aECGs per second | ETA: 2024-03-01T10:02:10"
        );
        let done = clock.completed_label(26, 26, now);
        assert!(done.starts_with("Validated aECG 26/26 | Execution time: 0:01:05"), "{done}");
        assert!(done.ends_with("| Completed: 2024-03-01T10:01:05"), "{done}");
    }

    #[test]
    fn progress_label_before_any_file() {
        let start = Local.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let clock = ProgressClock::started_at(start);
        assert!(clock.label(0, 10, start).ends_with("0.00 aECGs per second | ETA: --"));
        assert_eq!(format_elapsed(3725.9), "1:02:05");
    }
}
