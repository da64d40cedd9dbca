use crate::signal::{Annotation, Lead, Waveform, WaveformType};
use crate::{Error, Result};
use chrono::NaiveDateTime;
use log::debug;
use roxmltree::{Document, Node, ParsingOptions};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Contents of one HL7 aECG file.
#[derive(Debug, Clone, Default)]
pub struct AecgDocument {
    /// XML file name, relative to the archive when `zip_path` is set
    pub xml_path: PathBuf,
    pub zip_path: Option<PathBuf>,
    /// False when the XML file (or the archive entry) does not exist
    pub xml_found: bool,
    /// `AnnotatedECG/id/@root`
    pub id: String,
    pub subject_id: String,
    pub timepoint: String,
    pub effective_time: String,
    pub rhythm: Option<Waveform>,
    pub rhythm_annotations: Vec<Annotation>,
    pub derived: Option<Waveform>,
    pub derived_annotations: Vec<Annotation>,
    /// Raw XML text
    pub xml: String,
}

impl AecgDocument {
    pub fn waveform(&self, kind: WaveformType) -> Option<&Waveform> {
        match kind {
            WaveformType::Rhythm => self.rhythm.as_ref(),
            WaveformType::Derived => self.derived.as_ref(),
        }
    }

    pub fn annotations(&self, kind: WaveformType) -> &[Annotation] {
        match kind {
            WaveformType::Rhythm => &self.rhythm_annotations,
            WaveformType::Derived => &self.derived_annotations,
        }
    }

    fn not_found(xml_path: &Path, zip_path: Option<&Path>) -> Self {
        Self {
            xml_path: xml_path.to_path_buf(),
            zip_path: zip_path.map(Path::to_path_buf),
            ..Default::default()
        }
    }
}

/// Read an aECG file from disk, or from inside `zip_path` when given.
///
/// A missing file or archive entry is not an error: the returned document has
/// `xml_found == false`. Malformed XML is.
pub fn read_aecg(xml_path: &Path, zip_path: Option<&Path>) -> Result<AecgDocument> {
    let text = match zip_path {
        Some(zip) => {
            if !zip.is_file() {
                return Ok(AecgDocument::not_found(xml_path, zip_path));
            }
            match read_zip_entry(zip, xml_path)? {
                Some(text) => text,
                None => return Ok(AecgDocument::not_found(xml_path, zip_path)),
            }
        }
        None => {
            if !xml_path.is_file() {
                return Ok(AecgDocument::not_found(xml_path, zip_path));
            }
            fs::read_to_string(xml_path)?
        }
    };
    let mut doc = parse_aecg(&text)?;
    doc.xml_path = xml_path.to_path_buf();
    doc.zip_path = zip_path.map(Path::to_path_buf);
    debug!(
        "parsed aECG {} (rhythm leads: {}, derived leads: {})",
        xml_path.display(),
        doc.rhythm.as_ref().map(|w| w.leads.len()).unwrap_or(0),
        doc.derived.as_ref().map(|w| w.leads.len()).unwrap_or(0)
    );
    Ok(doc)
}

/// Name of an archive entry as stored in the zip directory (forward slashes).
pub fn zip_entry_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_zip_entry(zip: &Path, entry: &Path) -> Result<Option<String>> {
    let file = fs::File::open(zip)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let name = zip_entry_name(entry);
    let mut zipped = match archive.by_name(&name) {
        Ok(zipped) => zipped,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut text = String::new();
    zipped.read_to_string(&mut text)?;
    Ok(Some(text))
}

/// Parse aECG XML text.
pub fn parse_aecg(text: &str) -> Result<AecgDocument> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(text, options)?;
    let root = doc.root_element();
    if root.tag_name().name() != "AnnotatedECG" {
        return Err(Error::InvalidValue {
            field: "root element".into(),
            value: root.tag_name().name().to_string(),
        });
    }

    let mut out = AecgDocument {
        xml_found: true,
        id: child(root, "id")
            .and_then(|n| n.attribute("root"))
            .unwrap_or_default()
            .to_string(),
        effective_time: low_value(root).unwrap_or_default().to_string(),
        subject_id: descendant(root, "trialSubject")
            .and_then(|n| child(n, "id"))
            .and_then(|n| n.attribute("extension").or_else(|| n.attribute("root")))
            .unwrap_or_default()
            .to_string(),
        timepoint: descendant(root, "timepointEvent")
            .and_then(|n| child(n, "code"))
            .and_then(|n| n.attribute("code"))
            .unwrap_or_default()
            .to_string(),
        xml: text.to_string(),
        ..Default::default()
    };

    for series in children(root, "component").filter_map(|c| child(c, "series")) {
        read_series(series, &mut out);
    }
    Ok(out)
}

fn read_series(series: Node, out: &mut AecgDocument) {
    let code = code_of(series).unwrap_or("RHYTHM");
    let kind = if series.tag_name().name() == "derivedSeries"
        || code.contains("REPRESENTATIVE_BEAT")
        || code.contains("MEDIAN")
    {
        WaveformType::Derived
    } else {
        WaveformType::Rhythm
    };

    let (waveform, head) = read_sequences(series, kind);
    let annotations = read_annotations(series, head);
    // first series of each kind wins
    match kind {
        WaveformType::Rhythm if out.rhythm.is_none() => {
            out.rhythm = Some(waveform);
            out.rhythm_annotations = annotations;
        }
        WaveformType::Derived if out.derived.is_none() => {
            out.derived = Some(waveform);
            out.derived_annotations = annotations;
        }
        _ => {}
    }

    for derived in children(series, "derivation").filter_map(|d| child(d, "derivedSeries")) {
        read_series(derived, out);
    }
}

fn read_sequences(series: Node, kind: WaveformType) -> (Waveform, Option<NaiveDateTime>) {
    let effective_time = low_value(series).unwrap_or_default().to_string();
    let mut head = parse_hl7_ts(&effective_time);
    let mut sample_interval_ms = 0.0;
    let mut leads = Vec::new();

    let sequence_set = children(series, "component").find_map(|c| child(c, "sequenceSet"));
    if let Some(set) = sequence_set {
        for sequence in children(set, "component").filter_map(|c| child(c, "sequence")) {
            let code = code_of(sequence).unwrap_or_default();
            let value = match child(sequence, "value") {
                Some(value) => value,
                None => continue,
            };
            if code.starts_with("TIME_") {
                if let Some(increment) = child(value, "increment") {
                    sample_interval_ms =
                        to_ms(increment.attribute("value"), increment.attribute("unit"))
                            .unwrap_or(0.0);
                }
                if code == "TIME_ABSOLUTE" {
                    if let Some(ts) = child(value, "head")
                        .and_then(|h| h.attribute("value"))
                        .and_then(parse_hl7_ts)
                    {
                        head = Some(ts);
                    }
                }
            } else {
                leads.push(Lead {
                    code: code.to_string(),
                    samples: read_digits(value),
                });
            }
        }
    }

    let waveform = Waveform {
        kind,
        effective_time,
        sample_interval_ms,
        leads,
    };
    (waveform, head)
}

fn read_digits(value: Node) -> Vec<f64> {
    let origin = child(value, "origin")
        .map(|n| scaled(n.attribute("value"), n.attribute("unit"), 0.0))
        .unwrap_or(0.0);
    let scale = child(value, "scale")
        .map(|n| scaled(n.attribute("value"), n.attribute("unit"), 1.0))
        .unwrap_or(0.001);
    let digits = child(value, "digits").and_then(|n| n.text()).unwrap_or("");
    digits
        .split_whitespace()
        .map(|d| d.parse::<f64>().map(|v| origin + v * scale).unwrap_or(f64::NAN))
        .collect()
}

/// Physical quantity converted to millivolts.
fn scaled(value: Option<&str>, unit: Option<&str>, default: f64) -> f64 {
    let value = value.and_then(|v| v.trim().parse::<f64>().ok());
    let factor = match unit.unwrap_or("uV") {
        "mV" => 1.0,
        "V" => 1000.0,
        "nV" => 1e-6,
        _ => 0.001,
    };
    match value {
        Some(v) => v * factor,
        None => default * factor,
    }
}

fn read_annotations(series: Node, head: Option<NaiveDateTime>) -> Vec<Annotation> {
    let mut out = Vec::new();
    for set in children(series, "subjectOf").filter_map(|s| child(s, "annotationSet")) {
        for annotation in children(set, "component").filter_map(|c| child(c, "annotation")) {
            collect_annotation(annotation, None, head, &mut out);
        }
    }
    out
}

fn collect_annotation(
    node: Node,
    inherited_lead: Option<&str>,
    head: Option<NaiveDateTime>,
    out: &mut Vec<Annotation>,
) {
    let code = code_of(node).unwrap_or_default();
    let mut lead = inherited_lead.map(str::to_string);
    let mut start_ms = None;
    let mut end_ms = None;

    let roi = child(node, "support").and_then(|s| child(s, "supportingROI"));
    if let Some(roi) = roi {
        for boundary in children(roi, "component").filter_map(|c| child(c, "boundary")) {
            let boundary_code = code_of(boundary).unwrap_or_default();
            if boundary_code.starts_with("MDC_ECG_LEAD_") {
                lead = Some(boundary_code.to_string());
            } else if boundary_code.starts_with("TIME_") {
                if let Some(value) = child(boundary, "value") {
                    let relative = boundary_code == "TIME_RELATIVE";
                    start_ms = child(value, "low").and_then(|n| boundary_ms(n, relative, head));
                    end_ms = child(value, "high").and_then(|n| boundary_ms(n, relative, head));
                }
            }
        }
    }

    if !code.is_empty() {
        out.push(Annotation {
            code: code.to_string(),
            lead: lead.clone(),
            start_ms,
            end_ms,
        });
    }
    for nested in children(node, "component").filter_map(|c| child(c, "annotation")) {
        collect_annotation(nested, lead.as_deref(), head, out);
    }
}

fn boundary_ms(node: Node, relative: bool, head: Option<NaiveDateTime>) -> Option<f64> {
    let value = node.attribute("value")?;
    if relative {
        to_ms(Some(value), node.attribute("unit"))
    } else {
        let ts = parse_hl7_ts(value)?;
        let base = head?;
        (ts - base)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0)
    }
}

fn to_ms(value: Option<&str>, unit: Option<&str>) -> Option<f64> {
    let value = value?.trim().parse::<f64>().ok()?;
    let factor = match unit.unwrap_or("ms") {
        "s" => 1000.0,
        "us" => 0.001,
        _ => 1.0,
    };
    Some(value * factor)
}

/// Parse an HL7 TS value (`YYYYMMDDHHMMSS[.fff][+ZZZZ]`); missing trailing
/// fields are taken as zero and the timezone offset is ignored.
pub fn parse_hl7_ts(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    let end = value.find(['+', '-']).unwrap_or(value.len());
    let value = &value[..end];
    let (int_part, frac) = value.split_once('.').unwrap_or((value, ""));
    if int_part.len() < 8 || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut padded: String = int_part.chars().take(14).collect();
    while padded.len() < 14 {
        padded.push('0');
    }
    let ts = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S").ok()?;
    if frac.is_empty() {
        return Some(ts);
    }
    let seconds = format!("0.{frac}").parse::<f64>().ok()?;
    Some(ts + chrono::Duration::microseconds((seconds * 1e6).round() as i64))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn descendant<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn code_of<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    child(node, "code").and_then(|n| n.attribute("code"))
}

fn low_value<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    child(node, "effectiveTime")
        .and_then(|n| child(n, "low"))
        .and_then(|n| n.attribute("value"))
}
