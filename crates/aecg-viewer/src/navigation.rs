//! Owns the loaded study index and turns tree selections into aECG documents.

use crate::tree::{BuildProgress, IndexTree, NodeId, DERIVED_COLUMN, RHYTHM_COLUMN, XML_COLUMN, ZIP_COLUMN};
use aecg_lib::index::info::{load_study_info, StudyInfo};
use aecg_lib::index::stats::{load_study_stats, StudyStats};
use aecg_lib::index::{load_index, IndexTable, EGREFID};
use aecg_lib::io::aecg::{read_aecg, AecgDocument};
use aecg_lib::WaveformType;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("index file not found: {0}")]
    IndexNotFound(PathBuf),

    #[error("could not load study index {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: aecg_lib::Error,
    },

    #[error("aECG file not found: {0}")]
    NotFound(PathBuf),

    #[error("{0}")]
    NoWaveform(String),

    #[error("could not read aECG {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: aecg_lib::Error,
    },

    #[error("no study index loaded")]
    NoIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    NoIndexLoaded,
    IndexLoaded,
    WaveformLoaded,
}

/// Directory the index's file names are relative to.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveDir {
    pub dir: PathBuf,
    /// False when no candidate holds the probe file; `dir` is then the first candidate
    pub found: bool,
    pub candidates: Vec<PathBuf>,
}

/// Pick the first candidate directory containing `probe`.
pub fn resolve_effective_dir(candidates: Vec<PathBuf>, probe: Option<&str>) -> EffectiveDir {
    let hit = probe.and_then(|probe| candidates.iter().find(|dir| dir.join(probe).exists()).cloned());
    let found = hit.is_some();
    let dir = hit
        .or_else(|| candidates.first().cloned())
        .unwrap_or_default();
    EffectiveDir { dir, found, candidates }
}

/// A waveform loaded from the tree.
#[derive(Debug, Clone)]
pub struct Selection {
    pub node: NodeId,
    pub kind: WaveformType,
    pub document: AecgDocument,
}

pub struct NavigationController {
    state: NavState,
    index_path: Option<PathBuf>,
    table: IndexTable,
    tree: IndexTree,
    info: StudyInfo,
    stats: Option<StudyStats>,
    user_dir: Option<PathBuf>,
    selected: Option<NodeId>,
}

impl Default for NavigationController {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationController {
    pub fn new() -> Self {
        Self {
            state: NavState::NoIndexLoaded,
            index_path: None,
            table: IndexTable::default(),
            tree: IndexTree::empty(),
            info: StudyInfo::default(),
            stats: None,
            user_dir: None,
            selected: None,
        }
    }

    pub fn load(&mut self, path: &Path) -> Result<Vec<String>, NavError> {
        self.load_with_progress(path, None)
    }

    /// Load a study index workbook and rebuild the tree.
    ///
    /// Returns non-fatal warnings. On error the previous index stays loaded.
    pub fn load_with_progress(
        &mut self,
        path: &Path,
        progress: Option<&mut dyn BuildProgress>,
    ) -> Result<Vec<String>, NavError> {
        if !path.is_file() {
            return Err(NavError::IndexNotFound(path.to_path_buf()));
        }
        let table = load_index(path).map_err(|source| NavError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let mut warnings = Vec::new();

        let tree = if table.has_ref_id {
            IndexTree::build(&table.rows, progress)
        } else {
            warnings.push(format!(
                "{EGREFID} column missing in the index: waveforms cannot be listed"
            ));
            IndexTree::empty()
        };

        let info = match load_study_info(path) {
            Ok(info) => info,
            Err(err) => {
                warnings.push(format!("study information not loaded: {err}"));
                StudyInfo {
                    study_dir: path
                        .parent()
                        .map(|dir| dir.display().to_string())
                        .unwrap_or_default(),
                    ..Default::default()
                }
            }
        };
        let stats = match load_study_stats(path) {
            Ok(stats) => Some(stats),
            Err(err) => {
                warnings.push(format!("study statistics not loaded: {err}"));
                None
            }
        };
        for warning in &warnings {
            warn!("{warning}");
        }
        info!(
            "loaded {} index rows from {} ({} tree nodes)",
            table.rows.len(),
            path.display(),
            tree.len()
        );

        self.index_path = Some(path.to_path_buf());
        self.table = table;
        self.tree = tree;
        self.info = info;
        self.stats = stats;
        self.selected = None;
        self.state = NavState::IndexLoaded;
        Ok(warnings)
    }

    fn index_dir(&self) -> PathBuf {
        self.index_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Resolve the directory holding the study's aECG files.
    pub fn effective_dir(&self) -> EffectiveDir {
        let index_dir = self.index_dir();
        let study_dir = PathBuf::from(&self.info.study_dir);
        let candidates = vec![
            self.user_dir.clone().unwrap_or_default(),
            study_dir.clone(),
            index_dir.join(&study_dir),
            index_dir,
        ];
        let probe = self.table.rows.first().map(|row| {
            if row.zip_file.is_empty() {
                row.xml_file.as_str()
            } else {
                row.zip_file.as_str()
            }
        });
        resolve_effective_dir(candidates, probe)
    }

    /// Load the waveform behind a tree node.
    pub fn select(&mut self, node: NodeId) -> Result<Selection, NavError> {
        if self.state == NavState::NoIndexLoaded {
            return Err(NavError::NoIndex);
        }
        let value = |column| self.tree.value_at(node, column).unwrap_or_default();
        let kind = if !value(RHYTHM_COLUMN).is_empty() {
            WaveformType::Rhythm
        } else if !value(DERIVED_COLUMN).is_empty() {
            WaveformType::Derived
        } else {
            return Err(NavError::NoWaveform("the selected row is not a waveform".into()));
        };
        let zip = value(ZIP_COLUMN).to_string();
        let xml = value(XML_COLUMN).to_string();

        let dir = self.effective_dir().dir;
        let (xml_path, zip_path) = if zip.is_empty() {
            (dir.join(&xml), None)
        } else {
            (PathBuf::from(&xml), Some(dir.join(&zip)))
        };
        let shown = zip_path.clone().unwrap_or_else(|| xml_path.clone());
        debug!("loading {kind} waveform from {}", shown.display());

        self.state = NavState::IndexLoaded;
        self.selected = None;
        let document = read_aecg(&xml_path, zip_path.as_deref()).map_err(|source| NavError::Parse {
            path: shown.clone(),
            source,
        })?;
        if !document.xml_found {
            warn!("aECG not found: {}", shown.display());
            return Err(NavError::NotFound(shown));
        }
        if document.waveform(kind).is_none() {
            return Err(NavError::NoWaveform(format!(
                "no {kind} waveform in {}",
                shown.display()
            )));
        }
        self.state = NavState::WaveformLoaded;
        self.selected = Some(node);
        Ok(Selection { node, kind, document })
    }

    /// Forget the selected waveform.
    pub fn clear_selection(&mut self) {
        self.selected = None;
        if self.state == NavState::WaveformLoaded {
            self.state = NavState::IndexLoaded;
        }
    }

    pub fn set_user_dir(&mut self, dir: Option<PathBuf>) {
        self.user_dir = dir.filter(|d| !d.as_os_str().is_empty());
    }

    pub fn user_dir(&self) -> Option<&Path> {
        self.user_dir.as_deref()
    }

    /// Replace the study information, e.g. from another workbook.
    pub fn set_info(&mut self, info: StudyInfo) {
        self.info = info;
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    pub fn table(&self) -> &IndexTable {
        &self.table
    }

    pub fn info(&self) -> &StudyInfo {
        &self.info
    }

    pub fn stats(&self) -> Option<&StudyStats> {
        self.stats.as_ref()
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, ROOT};
    use aecg_lib::index::IndexRow;
    use aecg_lib::io::workbook::save_study_index;
    use std::fs;
    use tempfile::tempdir;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../test_data/study")
            .join(name)
    }

    fn baseline_rows(xml: &str) -> Vec<IndexRow> {
        [WaveformType::Rhythm, WaveformType::Derived]
            .into_iter()
            .map(|kind| IndexRow {
                subject_id: "SUBJ-001".into(),
                timepoint: "BASELINE".into(),
                timestamp: "20210101120000".into(),
                xml_file: xml.into(),
                ref_id: "61d1a24f".into(),
                waveform_type: kind,
                ..Default::default()
            })
            .collect()
    }

    /// Workbook in `root` whose study directory is `root/study`, stored relative.
    fn write_study(root: &Path, xml: &str) -> PathBuf {
        let study = root.join("study");
        fs::create_dir_all(&study).unwrap();
        fs::copy(fixture("subj001_baseline.xml"), study.join("subj001_baseline.xml")).unwrap();
        let info = StudyInfo {
            study_dir: "study".into(),
            ..Default::default()
        };
        let path = root.join("index.xlsx");
        save_study_index(&path, &info, &baseline_rows(xml), &StudyStats::default()).unwrap();
        path
    }

    fn first_waveform(tree: &IndexTree) -> NodeId {
        tree.depth_first()
            .into_iter()
            .find(|&n| tree.kind(n) == Some(NodeKind::Rhythm))
            .expect("rhythm node")
    }

    #[test]
    fn third_candidate_wins() {
        let dir = tempdir().unwrap();
        let candidates: Vec<PathBuf> = (1..=4).map(|i| dir.path().join(format!("c{i}"))).collect();
        for c in &candidates {
            fs::create_dir_all(c).unwrap();
        }
        fs::write(candidates[2].join("a.xml"), "<x/>").unwrap();

        let resolved = resolve_effective_dir(candidates.clone(), Some("a.xml"));
        assert!(resolved.found);
        assert_eq!(resolved.dir, candidates[2]);
    }

    #[test]
    fn no_candidate_falls_back_to_first() {
        let dir = tempdir().unwrap();
        let candidates: Vec<PathBuf> = (1..=4).map(|i| dir.path().join(format!("c{i}"))).collect();
        let resolved = resolve_effective_dir(candidates.clone(), Some("a.xml"));
        assert!(!resolved.found);
        assert_eq!(resolved.dir, candidates[0]);

        let resolved = resolve_effective_dir(candidates.clone(), None);
        assert!(!resolved.found);
        assert_eq!(resolved.dir, candidates[0]);
    }

    #[test]
    fn load_and_select_waveform() {
        let dir = tempdir().unwrap();
        let path = write_study(dir.path(), "subj001_baseline.xml");

        let mut nav = NavigationController::new();
        assert_eq!(nav.state(), NavState::NoIndexLoaded);
        let warnings = nav.load(&path).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(nav.state(), NavState::IndexLoaded);
        assert!(nav.stats().is_some());

        let resolved = nav.effective_dir();
        assert!(resolved.found);
        assert_eq!(resolved.dir, dir.path().join("study"));

        let tree = nav.tree().clone();
        let subject = tree.child_at(ROOT, 0).unwrap();
        assert!(matches!(nav.select(subject), Err(NavError::NoWaveform(_))));

        let rhythm = first_waveform(&tree);
        let selection = nav.select(rhythm).unwrap();
        assert_eq!(selection.kind, WaveformType::Rhythm);
        assert_eq!(selection.document.subject_id, "SUBJ-001");
        assert_eq!(nav.state(), NavState::WaveformLoaded);
        assert_eq!(nav.selected(), Some(rhythm));

        let derived = tree.child_at(rhythm, 0).unwrap();
        let selection = nav.select(derived).unwrap();
        assert_eq!(selection.kind, WaveformType::Derived);
    }

    #[test]
    fn missing_file_reports_not_found() {
        let dir = tempdir().unwrap();
        let path = write_study(dir.path(), "missing.xml");
        let mut nav = NavigationController::new();
        nav.load(&path).unwrap();
        let rhythm = first_waveform(nav.tree());
        assert!(matches!(nav.select(rhythm), Err(NavError::NotFound(_))));
        assert_eq!(nav.state(), NavState::IndexLoaded);
        assert_eq!(nav.selected(), None);
    }

    #[test]
    fn user_dir_takes_precedence() {
        let dir = tempdir().unwrap();
        let path = write_study(dir.path(), "subj001_baseline.xml");
        let other = dir.path().join("copy");
        fs::create_dir_all(&other).unwrap();
        fs::copy(fixture("subj001_baseline.xml"), other.join("subj001_baseline.xml")).unwrap();

        let mut nav = NavigationController::new();
        nav.load(&path).unwrap();
        nav.set_user_dir(Some(other.clone()));
        assert_eq!(nav.effective_dir().dir, other);
        nav.set_user_dir(Some(PathBuf::new()));
        assert_eq!(nav.user_dir(), None);
    }

    #[test]
    fn missing_ref_id_gives_empty_tree_with_warning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("legacy.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Index").unwrap();
        let headers = ["USUBJID", "EGTPTREF", "EGDTC", "ZIPFILE", "AECGXML", "WFTYPE"];
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        let values = ["S1", "T1", "20200101", "", "a.xml", "RHYTHM"];
        for (col, value) in values.iter().enumerate() {
            sheet.write_string(1, col as u16, *value).unwrap();
        }
        workbook.save(&path).unwrap();

        let mut nav = NavigationController::new();
        let warnings = nav.load(&path).unwrap();
        assert!(nav.tree().is_empty());
        assert!(warnings.iter().any(|w| w.contains("EGREFID")));
        assert!(warnings.iter().any(|w| w.contains("statistics")));
        assert!(nav.stats().is_none());
        assert_eq!(nav.info().study_dir, dir.path().display().to_string());
    }

    #[test]
    fn failed_load_keeps_previous_index() {
        let dir = tempdir().unwrap();
        let path = write_study(dir.path(), "subj001_baseline.xml");
        let mut nav = NavigationController::new();
        nav.load(&path).unwrap();

        let bogus = dir.path().join("bogus.xlsx");
        fs::write(&bogus, "not a workbook").unwrap();
        assert!(matches!(nav.load(&bogus), Err(NavError::Load { .. })));
        assert!(matches!(
            nav.load(&dir.path().join("absent.xlsx")),
            Err(NavError::IndexNotFound(_))
        ));
        assert_eq!(nav.index_path(), Some(path.as_path()));
        assert_eq!(nav.table().rows.len(), 2);
    }
}
