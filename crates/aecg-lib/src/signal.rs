use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of waveform stored in an aECG series.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum WaveformType {
    /// Continuous rhythm strip
    #[default]
    Rhythm,
    /// Representative (median/averaged) beat derived from the rhythm strip
    Derived,
}

impl WaveformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaveformType::Rhythm => "RHYTHM",
            WaveformType::Derived => "DERIVED",
        }
    }
}

impl fmt::Display for WaveformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaveformType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RHYTHM" => Ok(WaveformType::Rhythm),
            "DERIVED" => Ok(WaveformType::Derived),
            other => Err(crate::Error::InvalidValue {
                field: "WFTYPE".into(),
                value: other.to_string(),
            }),
        }
    }
}

/// One lead of a waveform, samples in millivolts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    /// HL7 lead code, e.g. `MDC_ECG_LEAD_II`
    pub code: String,
    pub samples: Vec<f64>,
}

impl Lead {
    /// Lead name without the `MDC_ECG_LEAD_` prefix.
    pub fn name(&self) -> &str {
        lead_short_name(&self.code)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples that are not finite numbers.
    pub fn missing(&self) -> usize {
        self.samples.iter().filter(|v| !v.is_finite()).count()
    }
}

/// Standard 12-lead codes in display order.
pub const STANDARD_LEADS: [&str; 12] = [
    "MDC_ECG_LEAD_I",
    "MDC_ECG_LEAD_II",
    "MDC_ECG_LEAD_III",
    "MDC_ECG_LEAD_AVR",
    "MDC_ECG_LEAD_AVL",
    "MDC_ECG_LEAD_AVF",
    "MDC_ECG_LEAD_V1",
    "MDC_ECG_LEAD_V2",
    "MDC_ECG_LEAD_V3",
    "MDC_ECG_LEAD_V4",
    "MDC_ECG_LEAD_V5",
    "MDC_ECG_LEAD_V6",
];

pub fn lead_short_name(code: &str) -> &str {
    code.strip_prefix("MDC_ECG_LEAD_").unwrap_or(code)
}

/// Uniformly sampled multi-lead waveform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waveform {
    pub kind: WaveformType,
    /// HL7 timestamp of the first sample as written in the file
    pub effective_time: String,
    /// Sampling interval in milliseconds
    pub sample_interval_ms: f64,
    pub leads: Vec<Lead>,
}

impl Waveform {
    pub fn fs(&self) -> f64 {
        if self.sample_interval_ms > 0.0 {
            1000.0 / self.sample_interval_ms
        } else {
            0.0
        }
    }

    pub fn max_len(&self) -> usize {
        self.leads.iter().map(Lead::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.max_len() == 0
    }

    pub fn duration_ms(&self) -> f64 {
        self.max_len() as f64 * self.sample_interval_ms
    }

    pub fn time_ms(&self, index: usize) -> f64 {
        index as f64 * self.sample_interval_ms
    }

    pub fn lead(&self, name: &str) -> Option<&Lead> {
        self.leads
            .iter()
            .find(|lead| lead.code == name || lead.name().eq_ignore_ascii_case(name))
    }

    /// Fraction of expected samples (leads x longest lead) that are absent or non-finite.
    pub fn missing_fraction(&self) -> f64 {
        let max_len = self.max_len();
        if max_len == 0 || self.leads.is_empty() {
            return 0.0;
        }
        let expected = max_len * self.leads.len();
        let missing: usize = self
            .leads
            .iter()
            .map(|lead| (max_len - lead.len()) + lead.missing())
            .sum();
        missing as f64 / expected as f64
    }
}

/// Annotation attached to a waveform; times are relative to the first sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// HL7 annotation code, e.g. `MDC_ECG_WAVC_QRSWAVE`
    pub code: String,
    /// Lead code the annotation was placed on, `None` for global annotations
    pub lead: Option<String>,
    pub start_ms: Option<f64>,
    pub end_ms: Option<f64>,
}

impl Annotation {
    pub fn name(&self) -> &str {
        self.code
            .strip_prefix("MDC_ECG_WAVC_")
            .or_else(|| self.code.strip_prefix("MDC_ECG_"))
            .unwrap_or(&self.code)
    }

    pub fn is_qrs(&self) -> bool {
        self.code.ends_with("QRSWAVE")
    }

    pub fn is_twave(&self) -> bool {
        self.code.ends_with("TWAVE")
    }

    pub fn on_lead(&self, lead: &str) -> bool {
        match self.lead.as_deref() {
            Some(code) => code == lead || lead_short_name(code).eq_ignore_ascii_case(lead),
            None => false,
        }
    }
}

/// Number of QT intervals in a set of annotations: a QRS onset paired with a T-wave offset.
pub fn count_qt(annotations: &[&Annotation]) -> usize {
    let onsets = annotations
        .iter()
        .filter(|ann| ann.is_qrs() && ann.start_ms.is_some())
        .count();
    let offsets = annotations
        .iter()
        .filter(|ann| ann.is_twave() && ann.end_ms.is_some())
        .count();
    onsets.min(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(code: &str, lead: Option<&str>, start: Option<f64>, end: Option<f64>) -> Annotation {
        Annotation {
            code: code.into(),
            lead: lead.map(Into::into),
            start_ms: start,
            end_ms: end,
        }
    }

    #[test]
    fn waveform_type_parses_case_insensitive() {
        assert_eq!("rhythm".parse::<WaveformType>().unwrap(), WaveformType::Rhythm);
        assert_eq!(" DERIVED ".parse::<WaveformType>().unwrap(), WaveformType::Derived);
        assert!("MEDIAN".parse::<WaveformType>().is_err());
    }

    #[test]
    fn missing_fraction_counts_short_leads_and_nan() {
        let wf = Waveform {
            kind: WaveformType::Rhythm,
            effective_time: String::new(),
            sample_interval_ms: 2.0,
            leads: vec![
                Lead {
                    code: "MDC_ECG_LEAD_I".into(),
                    samples: vec![0.0, 0.1, 0.2, 0.3],
                },
                Lead {
                    code: "MDC_ECG_LEAD_II".into(),
                    samples: vec![0.0, f64::NAN],
                },
            ],
        };
        assert_eq!(wf.max_len(), 4);
        assert!((wf.missing_fraction() - 3.0 / 8.0).abs() < 1e-12);
        assert!((wf.fs() - 500.0).abs() < 1e-9);
        assert_eq!(wf.lead("II").map(|l| l.len()), Some(2));
    }

    #[test]
    fn qt_count_pairs_onsets_and_offsets() {
        let anns = vec![
            ann("MDC_ECG_WAVC_QRSWAVE", Some("MDC_ECG_LEAD_II"), Some(10.0), Some(100.0)),
            ann("MDC_ECG_WAVC_TWAVE", Some("MDC_ECG_LEAD_II"), Some(200.0), Some(400.0)),
            ann("MDC_ECG_WAVC_QRSWAVE", Some("MDC_ECG_LEAD_II"), Some(810.0), None),
            ann("MDC_ECG_WAVC_PWAVE", Some("MDC_ECG_LEAD_II"), Some(700.0), Some(780.0)),
        ];
        let refs: Vec<&Annotation> = anns.iter().collect();
        assert_eq!(count_qt(&refs), 1);
        assert!(anns[0].on_lead("II"));
        assert_eq!(anns[3].name(), "PWAVE");
    }
}
