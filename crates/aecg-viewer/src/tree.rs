//! Navigation tree over a study index: Subject → Time-point → Rhythm [→ Derived].
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. The tree is
//! immutable once built; loading another index builds a new one.

use aecg_lib::index::IndexRow;
use aecg_lib::WaveformType;
use std::collections::BTreeMap;

pub type NodeId = usize;

pub const ROOT: NodeId = 0;

pub const HEADERS: [&str; 6] = ["Subject", "Time-point", "Rhythm", "Derived", "ZIPFILE", "AECGXML"];

pub const SUBJECT_COLUMN: usize = 0;
pub const TIMEPOINT_COLUMN: usize = 1;
pub const RHYTHM_COLUMN: usize = 2;
pub const DERIVED_COLUMN: usize = 3;
pub const ZIP_COLUMN: usize = 4;
pub const XML_COLUMN: usize = 5;

/// Columns reported by the model: the six headers plus the extra slot carried
/// by subject and time-point rows.
pub const COLUMN_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Subject,
    Timepoint,
    Rhythm,
    Derived,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    values: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Receives build progress and may stop the build between subjects.
pub trait BuildProgress {
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Number of waveform nodes created so far.
    fn set_value(&mut self, _value: usize) {}
}

#[derive(Debug, Clone)]
pub struct IndexTree {
    nodes: Vec<Node>,
}

impl Default for IndexTree {
    fn default() -> Self {
        Self::empty()
    }
}

type WaveformGroup<'a> = BTreeMap<(&'a str, &'a str, &'a str), Vec<&'a IndexRow>>;

impl IndexTree {
    pub fn empty() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                values: HEADERS.iter().map(|h| h.to_string()).collect(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Build the tree from index rows.
    ///
    /// Rows are ordered by (subject, time-point, timestamp) and grouped by
    /// subject, time-point and (timestamp, xml file, ref id). In each group
    /// the first RHYTHM row and the first DERIVED row become nodes; the
    /// derived node hangs under the rhythm node when both exist. A cancelled
    /// build returns the subjects added so far. Rows of files that could not
    /// be indexed carry no subject and are left out.
    pub fn build(rows: &[IndexRow], mut progress: Option<&mut dyn BuildProgress>) -> Self {
        let mut tree = Self::empty();
        let mut sorted: Vec<&IndexRow> = rows
            .iter()
            .filter(|row| !row.has_error() && !row.subject_id.is_empty())
            .collect();
        sorted.sort_by(|a, b| {
            (&a.subject_id, &a.timepoint, &a.timestamp).cmp(&(&b.subject_id, &b.timepoint, &b.timestamp))
        });

        let mut subjects: BTreeMap<&str, BTreeMap<&str, WaveformGroup>> = BTreeMap::new();
        for row in sorted {
            subjects
                .entry(row.subject_id.as_str())
                .or_default()
                .entry(row.timepoint.as_str())
                .or_default()
                .entry((row.timestamp.as_str(), row.xml_file.as_str(), row.ref_id.as_str()))
                .or_default()
                .push(row);
        }

        let mut waveforms = 0;
        for (subject, timepoints) in subjects {
            if progress.as_ref().is_some_and(|p| p.is_cancelled()) {
                break;
            }
            let subject_node = tree.push(
                ROOT,
                NodeKind::Subject,
                vec![subject.to_string(), String::new(), String::new(), String::new(), String::new(), String::new(), String::new()],
            );
            for (timepoint, groups) in timepoints {
                let timepoint_node = tree.push(
                    subject_node,
                    NodeKind::Timepoint,
                    vec![String::new(), timepoint.to_string(), String::new(), String::new(), String::new(), String::new(), String::new()],
                );
                for group in groups.values() {
                    let rhythm = group.iter().find(|r| r.waveform_type == WaveformType::Rhythm);
                    let derived = group.iter().find(|r| r.waveform_type == WaveformType::Derived);
                    let mut derived_parent = timepoint_node;
                    if let Some(row) = rhythm {
                        derived_parent = tree.push(
                            timepoint_node,
                            NodeKind::Rhythm,
                            vec![
                                String::new(),
                                String::new(),
                                row.timestamp.clone(),
                                String::new(),
                                row.zip_file.clone(),
                                row.xml_file.clone(),
                            ],
                        );
                        waveforms += 1;
                        if let Some(p) = progress.as_mut() {
                            p.set_value(waveforms);
                        }
                    }
                    if let Some(row) = derived {
                        tree.push(
                            derived_parent,
                            NodeKind::Derived,
                            vec![
                                String::new(),
                                String::new(),
                                String::new(),
                                row.timestamp.clone(),
                                row.zip_file.clone(),
                                row.xml_file.clone(),
                            ],
                        );
                        waveforms += 1;
                        if let Some(p) = progress.as_mut() {
                            p.set_value(waveforms);
                        }
                    }
                }
            }
        }
        if let Some(p) = progress.as_mut() {
            p.set_value(rows.len());
        }
        tree
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind, values: Vec<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            values,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn column_count(&self) -> usize {
        COLUMN_COUNT
    }

    /// Number of values stored on `node`.
    pub fn column_count_of(&self, node: NodeId) -> usize {
        self.nodes.get(node).map(|n| n.values.len()).unwrap_or(0)
    }

    pub fn header(&self, column: usize) -> Option<&str> {
        self.value_at(ROOT, column)
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(node).map(|n| n.kind)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn child_count(&self, node: NodeId) -> usize {
        self.children(node).len()
    }

    pub fn child_at(&self, node: NodeId, row: usize) -> Option<NodeId> {
        self.children(node).get(row).copied()
    }

    pub fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    /// Position of `node` among its siblings; 0 for the root.
    pub fn row_index_of(&self, node: NodeId) -> usize {
        self.parent_of(node)
            .and_then(|parent| self.children(parent).iter().position(|&c| c == node))
            .unwrap_or(0)
    }

    /// Column value, `None` past the node's arity.
    pub fn value_at(&self, node: NodeId, column: usize) -> Option<&str> {
        self.nodes
            .get(node)
            .and_then(|n| n.values.get(column))
            .map(String::as_str)
    }

    /// Depth-first traversal in child order, root excluded.
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut stack: Vec<NodeId> = self.children(ROOT).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, timepoint: &str, ts: &str, xml: &str, kind: WaveformType) -> IndexRow {
        IndexRow {
            subject_id: subject.into(),
            timepoint: timepoint.into(),
            timestamp: ts.into(),
            xml_file: xml.into(),
            ref_id: format!("{xml}-ref"),
            waveform_type: kind,
            ..Default::default()
        }
    }

    struct Recorder {
        values: Vec<usize>,
        cancel_after: Option<usize>,
    }

    impl BuildProgress for Recorder {
        fn is_cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.values.len() >= n)
        }

        fn set_value(&mut self, value: usize) {
            self.values.push(value);
        }
    }

    #[test]
    fn empty_index_has_bare_root() {
        let tree = IndexTree::build(&[], None);
        assert!(tree.is_empty());
        assert_eq!(tree.child_count(ROOT), 0);
        assert_eq!(tree.column_count(), 7);
        assert_eq!(tree.header(RHYTHM_COLUMN), Some("Rhythm"));
        assert_eq!(tree.value_at(ROOT, 6), None);
        assert_eq!(tree.column_count_of(ROOT), 6);
    }

    #[test]
    fn unreadable_files_do_not_become_subjects() {
        let rows = vec![
            IndexRow::with_error("", "broken.xml", "XML error: invalid name token at 4:1"),
            row("S1", "BASELINE", "20200101", "a.xml", WaveformType::Rhythm),
            row("S2", "DAY1", "20200102", "b.xml", WaveformType::Rhythm),
        ];
        let tree = IndexTree::build(&rows, None);
        let subjects: Vec<_> = tree
            .children(ROOT)
            .iter()
            .map(|&node| tree.value_at(node, SUBJECT_COLUMN).unwrap())
            .collect();
        assert_eq!(subjects, vec!["S1", "S2"]);
    }

    #[test]
    fn baseline_and_day1_scenario() {
        let rows = vec![
            row("S2", "DAY1", "20200102", "b.xml", WaveformType::Derived),
            row("S2", "DAY1", "20200102", "b.xml", WaveformType::Rhythm),
            row("S1", "BASELINE", "20200101", "a.xml", WaveformType::Rhythm),
        ];
        let tree = IndexTree::build(&rows, None);
        assert_eq!(tree.child_count(ROOT), 2);

        let s1 = tree.child_at(ROOT, 0).unwrap();
        assert_eq!(tree.value_at(s1, SUBJECT_COLUMN), Some("S1"));
        assert_eq!(tree.column_count_of(s1), 7);
        let tp1 = tree.child_at(s1, 0).unwrap();
        assert_eq!(tree.value_at(tp1, TIMEPOINT_COLUMN), Some("BASELINE"));
        let rhythm1 = tree.child_at(tp1, 0).unwrap();
        assert_eq!(tree.kind(rhythm1), Some(NodeKind::Rhythm));
        assert_eq!(tree.child_count(rhythm1), 0);
        assert_eq!(tree.child_count(tp1), 1);

        let s2 = tree.child_at(ROOT, 1).unwrap();
        let tp2 = tree.child_at(s2, 0).unwrap();
        assert_eq!(tree.child_count(tp2), 1);
        let rhythm2 = tree.child_at(tp2, 0).unwrap();
        let derived2 = tree.child_at(rhythm2, 0).unwrap();
        assert_eq!(tree.kind(derived2), Some(NodeKind::Derived));
        assert_eq!(tree.value_at(derived2, DERIVED_COLUMN), Some("20200102"));
        assert_eq!(tree.value_at(derived2, RHYTHM_COLUMN), Some(""));
        assert_eq!(tree.value_at(derived2, XML_COLUMN), Some("b.xml"));
        assert_eq!(tree.parent_of(derived2), Some(rhythm2));
    }

    #[test]
    fn derived_without_rhythm_hangs_from_timepoint() {
        let rows = vec![row("S1", "T1", "1", "a.xml", WaveformType::Derived)];
        let tree = IndexTree::build(&rows, None);
        let tp = tree.child_at(tree.child_at(ROOT, 0).unwrap(), 0).unwrap();
        let derived = tree.child_at(tp, 0).unwrap();
        assert_eq!(tree.kind(derived), Some(NodeKind::Derived));
        assert_eq!(tree.parent_of(derived), Some(tp));
    }

    #[test]
    fn first_rhythm_row_wins_within_group() {
        let mut second = row("S1", "T1", "1", "a.xml", WaveformType::Rhythm);
        second.zip_file = "other.zip".into();
        let rows = vec![row("S1", "T1", "1", "a.xml", WaveformType::Rhythm), second];
        let tree = IndexTree::build(&rows, None);
        let tp = tree.child_at(tree.child_at(ROOT, 0).unwrap(), 0).unwrap();
        assert_eq!(tree.child_count(tp), 1);
        let rhythm = tree.child_at(tp, 0).unwrap();
        assert_eq!(tree.value_at(rhythm, ZIP_COLUMN), Some(""));
    }

    #[test]
    fn traversal_is_sorted_by_subject_then_timepoint() {
        let rows = vec![
            row("S3", "T2", "5", "e.xml", WaveformType::Rhythm),
            row("S1", "T2", "3", "c.xml", WaveformType::Rhythm),
            row("S3", "T1", "4", "d.xml", WaveformType::Rhythm),
            row("S1", "T1", "2", "b.xml", WaveformType::Rhythm),
            row("S1", "T1", "1", "a.xml", WaveformType::Rhythm),
        ];
        let tree = IndexTree::build(&rows, None);
        let labels: Vec<String> = tree
            .depth_first()
            .into_iter()
            .map(|node| {
                (0..HEADERS.len())
                    .filter_map(|c| tree.value_at(node, c))
                    .find(|v| !v.is_empty() && !v.ends_with(".xml"))
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        assert_eq!(
            labels,
            vec!["S1", "T1", "1", "2", "T2", "3", "S3", "T1", "4", "T2", "5"]
        );
        let second_tp = tree.child_at(tree.child_at(ROOT, 0).unwrap(), 1).unwrap();
        assert_eq!(tree.row_index_of(second_tp), 1);
        assert_eq!(tree.row_index_of(ROOT), 0);
    }

    #[test]
    fn cancellation_keeps_processed_subjects() {
        let rows = vec![
            row("S1", "T1", "1", "a.xml", WaveformType::Rhythm),
            row("S1", "T1", "1", "a.xml", WaveformType::Derived),
            row("S2", "T1", "1", "b.xml", WaveformType::Rhythm),
        ];
        let mut recorder = Recorder {
            values: Vec::new(),
            cancel_after: Some(1),
        };
        let tree = IndexTree::build(&rows, Some(&mut recorder));
        assert_eq!(tree.child_count(ROOT), 1);
        assert_eq!(recorder.values, vec![1, 2, 3]);

        let mut recorder = Recorder {
            values: Vec::new(),
            cancel_after: None,
        };
        let tree = IndexTree::build(&rows, Some(&mut recorder));
        assert_eq!(tree.child_count(ROOT), 2);
        assert_eq!(recorder.values.last(), Some(&3));
    }
}
