//! Builds a study index by scanning a directory of aECG files.
//!
//! Plain `.xml` files and `.xml` entries inside `.zip` archives are indexed.
//! Every file yields one row per waveform type it contains, or a single row
//! carrying the error when it cannot be read.

use super::{BeatInterval, IndexRow};
use crate::io::aecg::{read_aecg, zip_entry_name, AecgDocument};
use crate::signal::{count_qt, Annotation, WaveformType};
use crate::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Above this fraction of absent samples a waveform is flagged as potentially
/// digitized from paper.
pub const DIGITIZED_MISSING_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Default)]
pub struct IndexerOptions {
    /// HL7 code of the lead used for the primary-lead counters
    pub primary_lead: String,
    /// Call the checkpoint callback every N files; 0 only at the end
    pub checkpoint_every: usize,
    pub parallel: bool,
    /// Collect every timed annotation as a [`BeatInterval`]
    pub save_intervals: bool,
}

/// An aECG file found in the study directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AecgEntry {
    /// Archive path relative to the study directory, empty for plain files
    pub zip_file: String,
    /// XML path relative to the archive or to the study directory
    pub xml_file: String,
}

impl AecgEntry {
    /// Paths to hand to [`read_aecg`].
    pub fn locate(&self, root: &Path) -> (PathBuf, Option<PathBuf>) {
        if self.zip_file.is_empty() {
            (root.join(&self.xml_file), None)
        } else {
            (PathBuf::from(&self.xml_file), Some(root.join(&self.zip_file)))
        }
    }
}

pub struct DirectoryIndexer {
    root: PathBuf,
    entries: Vec<AecgEntry>,
    cancel: Arc<AtomicBool>,
    intervals: Mutex<Vec<BeatInterval>>,
}

impl DirectoryIndexer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            intervals: Mutex::new(Vec::new()),
        }
    }

    /// Share a cancellation flag owned by the caller.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared flag; setting it stops [`DirectoryIndexer::index`] before the next file.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn num_files(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[AecgEntry] {
        &self.entries
    }

    /// Intervals collected by the last [`DirectoryIndexer::index`] run with
    /// `save_intervals` set, sorted by file.
    pub fn intervals(&self) -> Vec<BeatInterval> {
        let mut intervals = self.intervals.lock().unwrap_or_else(|e| e.into_inner()).clone();
        intervals.sort_by(|a, b| {
            (&a.zip_file, &a.xml_file, &a.ref_id, a.waveform_type)
                .cmp(&(&b.zip_file, &b.xml_file, &b.ref_id, b.waveform_type))
                .then(a.start_ms.total_cmp(&b.start_ms))
        });
        intervals
    }

    /// Walk the study directory collecting aECG files. `progress` receives
    /// the running count of files found.
    pub fn scan(&mut self, progress: &mut dyn FnMut(usize)) -> Result<usize> {
        if !self.root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("study directory not found: {}", self.root.display()),
            )
            .into());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            if self.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = zip_entry_name(path.strip_prefix(&self.root).unwrap_or(path));
            if has_extension(path, "xml") {
                entries.push(AecgEntry {
                    zip_file: String::new(),
                    xml_file: relative,
                });
                progress(entries.len());
            } else if has_extension(path, "zip") {
                match zip_xml_entries(path) {
                    Ok(names) => {
                        for xml_file in names {
                            entries.push(AecgEntry {
                                zip_file: relative.clone(),
                                xml_file,
                            });
                            progress(entries.len());
                        }
                    }
                    Err(err) => warn!("skipping archive {}: {err}", path.display()),
                }
            }
        }
        entries.sort();
        info!("found {} aECG files in {}", entries.len(), self.root.display());
        self.entries = entries;
        Ok(self.entries.len())
    }

    /// Index every scanned file.
    ///
    /// `progress` gets (files done, total) with a non-decreasing count.
    /// `checkpoint` receives all rows collected so far every
    /// `checkpoint_every` files. On cancellation the rows indexed so far are
    /// returned.
    pub fn index(
        &self,
        options: &IndexerOptions,
        threads: usize,
        progress: &(dyn Fn(usize, usize) + Sync),
        checkpoint: &mut dyn FnMut(&[IndexRow]) -> Result<()>,
    ) -> Result<Vec<IndexRow>> {
        let threads = if options.parallel { threads.max(1) } else { 1 };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(io::Error::other)?;
        let total = self.entries.len();
        let chunk_size = match options.checkpoint_every {
            0 => total.max(1),
            n => n,
        };
        let done = Mutex::new(0usize);
        let mut rows = Vec::new();
        self.intervals.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("indexing {total} files on {threads} threads");

        for chunk in self.entries.chunks(chunk_size) {
            if self.is_cancelled() {
                break;
            }
            let chunk_rows: Vec<Vec<IndexRow>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|entry| {
                        if self.is_cancelled() {
                            return Vec::new();
                        }
                        let (rows, intervals) =
                            index_file(&self.root, entry, &options.primary_lead, options.save_intervals);
                        if !intervals.is_empty() {
                            self.intervals
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .extend(intervals);
                        }
                        let mut done = done.lock().unwrap_or_else(|e| e.into_inner());
                        *done += 1;
                        progress(*done, total);
                        rows
                    })
                    .collect()
            });
            rows.extend(chunk_rows.into_iter().flatten());
            if options.checkpoint_every > 0 && !self.is_cancelled() {
                checkpoint(&rows)?;
            }
        }
        if self.is_cancelled() {
            info!("indexing cancelled after {} rows", rows.len());
        }
        Ok(rows)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn zip_xml_entries(path: &Path) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(fs::File::open(path)?)?;
    Ok(archive
        .file_names()
        .filter(|name| !name.ends_with('/') && has_extension(Path::new(name), "xml"))
        .map(str::to_string)
        .collect())
}

/// Rows for one file; read failures become a single error row.
pub fn index_entry(root: &Path, entry: &AecgEntry, primary_lead: &str) -> Vec<IndexRow> {
    index_file(root, entry, primary_lead, false).0
}

fn index_file(
    root: &Path,
    entry: &AecgEntry,
    primary_lead: &str,
    with_intervals: bool,
) -> (Vec<IndexRow>, Vec<BeatInterval>) {
    let (xml_path, zip_path) = entry.locate(root);
    match read_aecg(&xml_path, zip_path.as_deref()) {
        Ok(doc) if !doc.xml_found => (
            vec![IndexRow::with_error(&entry.zip_file, &entry.xml_file, "file not found")],
            Vec::new(),
        ),
        Ok(doc) => {
            let rows = rows_for_document(&doc, entry, primary_lead);
            if rows.is_empty() {
                let row = IndexRow::with_error(&entry.zip_file, &entry.xml_file, "no waveforms found");
                return (vec![row], Vec::new());
            }
            let intervals = if with_intervals {
                intervals_for_document(&doc, entry)
            } else {
                Vec::new()
            };
            (rows, intervals)
        }
        Err(err) => {
            warn!("failed to index {}: {err}", entry.xml_file);
            (
                vec![IndexRow::with_error(&entry.zip_file, &entry.xml_file, err.to_string())],
                Vec::new(),
            )
        }
    }
}

/// Annotations with both a start and an end, for every waveform of the file.
pub fn intervals_for_document(doc: &AecgDocument, entry: &AecgEntry) -> Vec<BeatInterval> {
    [WaveformType::Rhythm, WaveformType::Derived]
        .into_iter()
        .flat_map(move |kind| {
            doc.annotations(kind).iter().filter_map(move |ann| {
                let (start_ms, end_ms) = (ann.start_ms?, ann.end_ms?);
                Some(BeatInterval {
                    zip_file: entry.zip_file.clone(),
                    xml_file: entry.xml_file.clone(),
                    ref_id: doc.id.clone(),
                    waveform_type: kind,
                    lead: ann.lead.clone().unwrap_or_default(),
                    code: ann.code.clone(),
                    start_ms,
                    end_ms,
                })
            })
        })
        .collect()
}

pub fn rows_for_document(doc: &AecgDocument, entry: &AecgEntry, primary_lead: &str) -> Vec<IndexRow> {
    [WaveformType::Rhythm, WaveformType::Derived]
        .into_iter()
        .filter_map(|kind| {
            let waveform = doc.waveform(kind)?;
            let annotations = doc.annotations(kind);
            let all: Vec<&Annotation> = annotations.iter().collect();
            let primary: Vec<&Annotation> = annotations
                .iter()
                .filter(|ann| !primary_lead.is_empty() && ann.on_lead(primary_lead))
                .collect();
            let leads: BTreeSet<&str> = annotations
                .iter()
                .filter_map(|ann| ann.lead.as_deref())
                .collect();
            let timestamp = if waveform.effective_time.is_empty() {
                doc.effective_time.clone()
            } else {
                waveform.effective_time.clone()
            };
            Some(IndexRow {
                subject_id: doc.subject_id.clone(),
                timepoint: doc.timepoint.clone(),
                timestamp,
                zip_file: entry.zip_file.clone(),
                xml_file: entry.xml_file.clone(),
                ref_id: doc.id.clone(),
                waveform_type: kind,
                annotations: annotations.len(),
                annotated_leads: leads.len(),
                primary_lead_annotations: primary.len(),
                qts: count_qt(&all),
                qts_primary_lead: count_qt(&primary),
                potentially_digitized: waveform.missing_fraction() > DIGITIZED_MISSING_FRACTION,
                error: String::new(),
            })
        })
        .collect()
}
