//! Study index generation, run as a background task.

use crate::task::Progress;
use crate::validator::ProgressClock;
use aecg_lib::index::indexer::{DirectoryIndexer, IndexerOptions};
use aecg_lib::index::info::StudyInfo;
use aecg_lib::index::stats::StudyStats;
use aecg_lib::index::IndexRow;
use aecg_lib::io::workbook::save_study_index_with_intervals;
use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct IndexingRequest {
    pub study_dir: PathBuf,
    pub index_file: PathBuf,
    pub info: StudyInfo,
    pub options: IndexerOptions,
    pub threads: usize,
    pub cancel: Arc<AtomicBool>,
    pub clock: ProgressClock,
}

#[derive(Debug, Clone)]
pub struct IndexingOutcome {
    pub index_file: PathBuf,
    pub files: usize,
    pub rows: usize,
    pub errors: usize,
    /// Beat intervals written to the workbook, 0 unless requested
    pub intervals: usize,
    pub cancelled: bool,
    pub stats: StudyStats,
}

/// Scan, index and save the study workbook. Rows collected so far are
/// written every `checkpoint_every` files and once more at the end, also
/// when cancelled.
pub fn run_indexing(request: IndexingRequest, progress: &Progress<IndexingOutcome>) -> Result<IndexingOutcome> {
    let IndexingRequest {
        study_dir,
        index_file,
        mut info,
        options,
        threads,
        cancel,
        clock,
    } = request;
    info.study_dir = study_dir.display().to_string();
    info.index_file = index_file.display().to_string();
    info.date = ProgressClock::timestamp(clock.started());
    info.version = env!("CARGO_PKG_VERSION").to_string();

    let mut indexer = DirectoryIndexer::new(&study_dir).with_cancel_flag(cancel.clone());
    let files = indexer
        .scan(&mut |found| progress.report(0, found))
        .with_context(|| format!("scanning {}", study_dir.display()))?;
    progress.report(0, files);

    let save = |info: &mut StudyInfo, rows: &[IndexRow]| -> aecg_lib::Result<StudyStats> {
        info.end_date = ProgressClock::timestamp(Local::now());
        let stats = StudyStats::compute(info, rows);
        let intervals = indexer.intervals();
        save_study_index_with_intervals(&index_file, info, rows, &stats, &intervals)?;
        debug!(
            "saved {} rows and {} intervals to {}",
            rows.len(),
            intervals.len(),
            index_file.display()
        );
        Ok(stats)
    };

    let report = |done: usize, total: usize| progress.report(done, total);
    let rows = indexer
        .index(&options, threads, &report, &mut |rows| save(&mut info, rows).map(|_| ()))
        .context("indexing study")?;
    let stats = save(&mut info, &rows).with_context(|| format!("saving {}", index_file.display()))?;

    let outcome = IndexingOutcome {
        index_file,
        files,
        rows: rows.len(),
        errors: rows.iter().filter(|r| r.has_error()).count(),
        intervals: indexer.intervals().len(),
        cancelled: cancel.load(Ordering::Relaxed),
        stats,
    };
    info!(
        "indexed {} files into {} rows ({} errors{})",
        outcome.files,
        outcome.rows,
        outcome.errors,
        if outcome.cancelled { ", cancelled" } else { "" }
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::NavigationController;
    use crate::task::{TaskEvent, TaskRunner};
    use crate::tree::SUBJECT_COLUMN;
    use aecg_lib::index::info::load_study_info;
    use aecg_lib::index::load_index;
    use aecg_lib::io::workbook::{read_sheet, sheet_names, INTERVALS_SHEET};
    use std::time::Duration;
    use tempfile::tempdir;

    fn study_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../test_data/study")
    }

    fn request(index_file: PathBuf, cancel: Arc<AtomicBool>) -> IndexingRequest {
        IndexingRequest {
            study_dir: study_dir(),
            index_file,
            info: StudyInfo {
                app_num: "7".into(),
                annotation_lead: "II".into(),
                ..Default::default()
            },
            options: IndexerOptions {
                primary_lead: "MDC_ECG_LEAD_II".into(),
                checkpoint_every: 1,
                parallel: false,
                save_intervals: false,
            },
            threads: 1,
            cancel,
            clock: ProgressClock::start(),
        }
    }

    #[test]
    fn indexing_task_saves_workbook() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.xlsx");
        let runner = TaskRunner::new(2);
        let req = request(path.clone(), Arc::new(AtomicBool::new(false)));
        let mut handle = runner.submit(move |progress| run_indexing(req, progress));
        assert!(handle.wait_finished(Duration::from_secs(30)));

        let events = handle.poll();
        let outcome = events
            .iter()
            .find_map(|e| match e {
                TaskEvent::Result(outcome) => Some(outcome.clone()),
                _ => None,
            })
            .expect("result event");
        assert_eq!(outcome.files, 3);
        assert_eq!(outcome.rows, 5);
        assert_eq!(outcome.errors, 1);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.stats.num_subjects, 2);

        let done: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Progress { current, total } if *current > 0 => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(done, vec![(1, 3), (2, 3), (3, 3)]);

        assert_eq!(load_index(&path).unwrap().rows.len(), 5);
        let mut nav = NavigationController::new();
        nav.load(&path).unwrap();
        let tree = nav.tree();
        let subjects: Vec<&str> = tree
            .children(tree.root())
            .iter()
            .map(|&node| tree.value_at(node, SUBJECT_COLUMN).unwrap())
            .collect();
        assert_eq!(subjects, vec!["SUBJ-001", "SUBJ-002"]);
        let info = load_study_info(&path).unwrap();
        assert_eq!(info.app_num, "000007");
        assert_eq!(info.index_file, path.display().to_string());
        assert!(!info.end_date.is_empty());
    }

    #[test]
    fn beat_intervals_are_saved_when_requested() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.xlsx");
        let mut req = request(path.clone(), Arc::new(AtomicBool::new(false)));
        req.options.save_intervals = true;
        let runner = TaskRunner::new(1);
        let mut handle = runner.submit(move |progress| run_indexing(req, progress));
        assert!(handle.wait_finished(Duration::from_secs(30)));
        let outcome = handle
            .poll()
            .into_iter()
            .find_map(|e| match e {
                TaskEvent::Result(outcome) => Some(outcome),
                _ => None,
            })
            .expect("result event");
        assert!(outcome.intervals >= 2);

        assert_eq!(sheet_names(&path).unwrap(), vec!["Info", "Index", "Stats", INTERVALS_SHEET]);
        let sheet = read_sheet(&path, INTERVALS_SHEET).unwrap();
        assert_eq!(sheet.rows.len(), outcome.intervals);
        assert_eq!(sheet.headers.last().map(String::as_str), Some("DURATION"));
    }

    #[test]
    fn cancelled_run_still_saves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.xlsx");
        let cancel = Arc::new(AtomicBool::new(true));
        let runner = TaskRunner::new(1);
        let req = request(path.clone(), cancel);
        let mut handle = runner.submit(move |progress| run_indexing(req, progress));
        assert!(handle.wait_finished(Duration::from_secs(30)));
        let outcome = handle
            .poll()
            .into_iter()
            .find_map(|e| match e {
                TaskEvent::Result(outcome) => Some(outcome),
                _ => None,
            })
            .expect("result event");
        assert!(outcome.cancelled);
        assert_eq!(outcome.rows, 0);
        assert!(path.is_file());
    }

    #[test]
    fn missing_study_dir_is_an_io_error() {
        let dir = tempdir().unwrap();
        let mut req = request(dir.path().join("index.xlsx"), Arc::new(AtomicBool::new(false)));
        req.study_dir = dir.path().join("absent");
        let runner = TaskRunner::new(1);
        let mut handle = runner.submit(move |progress| run_indexing(req, progress));
        assert!(handle.wait_finished(Duration::from_secs(10)));
        let events = handle.poll();
        assert!(matches!(
            &events[0],
            TaskEvent::Error(err) if err.kind == crate::task::ErrorKind::Io
        ));
    }
}
