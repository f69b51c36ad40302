/// Crash signatures: symptom-based matching rules owned by buckets
///
/// A signature is an ordered list of symptoms. The distance between a
/// signature and a normalized crash is the sum of the per-symptom
/// distances; a crash matches when that sum is zero.

pub mod frames;
pub mod pattern;

pub use frames::{AlignOp, FrameAlignment};
pub use pattern::{FramePattern, StringMatch};

use crate::error::{AppError, Result};
use crate::normalizer::NormalizedCrash;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building signature patterns
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("empty stack frame pattern")]
    EmptyFrame,

    #[error("crash address range is inverted ({low:#x} > {high:#x})")]
    InvalidAddressRange { low: u64, high: u64 },

    #[error("signature has no symptoms")]
    NoSymptoms,

    #[error("stack frame symptom has no function names")]
    EmptyFrameList,

    #[error("signature only contains wildcards and would match every crash")]
    NoConcreteConstraint,
}

/// How the frame symptom measures the difference count
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Wildcard-aware edit distance against a prefix of the crash frames
    #[default]
    EditDistance,

    /// Symmetric set difference between pattern elements and frames
    SymmetricDifference,
}

/// A single matching criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Symptom {
    /// Top of the stack must follow this pattern
    StackFrames {
        #[serde(rename = "functionNames")]
        function_names: Vec<FramePattern>,
    },

    /// Crash address must lie in `low..=high`
    CrashAddress { low: u64, high: u64 },

    /// Some output line must match
    Output { value: StringMatch },
}

impl Symptom {
    pub fn distance(&self, crash: &NormalizedCrash, metric: DistanceMetric) -> u32 {
        match self {
            Symptom::StackFrames { function_names } => match metric {
                DistanceMetric::EditDistance => {
                    frames::edit_distance(function_names, &crash.frames)
                }
                DistanceMetric::SymmetricDifference => {
                    frames::symmetric_difference(function_names, &crash.frames)
                }
            },
            Symptom::CrashAddress { low, high } => match crash.crash_address {
                Some(address) if (*low..=*high).contains(&address) => 0,
                _ => 1,
            },
            Symptom::Output { value } => {
                if crash.output.iter().any(|line| value.found_in(line)) {
                    0
                } else {
                    1
                }
            }
        }
    }

    /// Whether the symptom restricts anything at all
    fn is_concrete(&self) -> bool {
        match self {
            Symptom::StackFrames { function_names } => {
                function_names.iter().any(|p| !p.is_wildcard())
            }
            Symptom::CrashAddress { .. } | Symptom::Output { .. } => true,
        }
    }

    fn validate(&self) -> std::result::Result<(), PatternError> {
        match self {
            Symptom::CrashAddress { low, high } if low > high => {
                Err(PatternError::InvalidAddressRange {
                    low: *low,
                    high: *high,
                })
            }
            Symptom::StackFrames { function_names } if function_names.is_empty() => {
                Err(PatternError::EmptyFrameList)
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Symptom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symptom::StackFrames { function_names } => {
                let names: Vec<String> = function_names.iter().map(|p| p.to_string()).collect();
                write!(f, "stackFrames [{}]", names.join(", "))
            }
            Symptom::CrashAddress { low, high } if low == high => {
                write!(f, "crashAddress == {:#x}", low)
            }
            Symptom::CrashAddress { low, high } => {
                write!(f, "crashAddress in {:#x}..={:#x}", low, high)
            }
            Symptom::Output { value } => write!(f, "output contains {}", value),
        }
    }
}

/// Per-symptom comparison between a signature and a crash
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SymptomDiff {
    pub symptom: String,
    pub distance: u32,
    pub details: Vec<String>,
}

/// Comparison between a signature and a crash
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SignatureDiff {
    pub total: u32,
    pub symptoms: Vec<SymptomDiff>,
}

/// Matching rule of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub symptoms: Vec<Symptom>,
}

impl Signature {
    pub fn new(symptoms: Vec<Symptom>) -> Self {
        Self { symptoms }
    }

    /// Parse and validate a JSON signature
    pub fn from_json(json: &str) -> Result<Self> {
        let signature: Signature = serde_json::from_str(json)?;
        signature.validate()?;
        Ok(signature)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }

    pub fn validate(&self) -> std::result::Result<(), PatternError> {
        if self.symptoms.is_empty() {
            return Err(PatternError::NoSymptoms);
        }
        self.symptoms.iter().try_for_each(Symptom::validate)?;
        if !self.has_concrete_constraint() {
            return Err(PatternError::NoConcreteConstraint);
        }
        Ok(())
    }

    /// Canonical signature of a crash: its top frames verbatim plus the
    /// exact crash address
    pub fn from_crash(crash: &NormalizedCrash, frame_limit: usize) -> Self {
        let mut symptoms = Vec::new();

        let function_names: Vec<FramePattern> = crash
            .frames
            .iter()
            .take(frame_limit)
            .map(|frame| FramePattern::exact(&frame.function))
            .collect();

        if !function_names.is_empty() {
            symptoms.push(Symptom::StackFrames { function_names });
        }

        if let Some(address) = crash.crash_address {
            symptoms.push(Symptom::CrashAddress {
                low: address,
                high: address,
            });
        }

        Self { symptoms }
    }

    /// Difference count between this signature and a crash
    pub fn distance(&self, crash: &NormalizedCrash, metric: DistanceMetric) -> u32 {
        self.symptoms.iter().map(|s| s.distance(crash, metric)).sum()
    }

    pub fn matches(&self, crash: &NormalizedCrash) -> bool {
        self.symptoms
            .iter()
            .all(|s| s.distance(crash, DistanceMetric::EditDistance) == 0)
    }

    /// Stack frame patterns, if the signature has a frame symptom
    pub fn stack_frames(&self) -> Option<&[FramePattern]> {
        self.symptoms.iter().find_map(|s| match s {
            Symptom::StackFrames { function_names } => Some(function_names.as_slice()),
            _ => None,
        })
    }

    /// Lower bound of the edit distance given only the crash frame count
    pub fn distance_lower_bound(&self, frame_count: usize) -> u32 {
        self.symptoms
            .iter()
            .map(|s| match s {
                Symptom::StackFrames { function_names } => {
                    frames::edit_distance_lower_bound(function_names, frame_count)
                }
                _ => 0,
            })
            .sum()
    }

    pub fn has_concrete_constraint(&self) -> bool {
        self.symptoms.iter().any(Symptom::is_concrete)
    }

    /// Minimal generalization of this signature that matches `crash`.
    ///
    /// Returns `None` when nothing concrete would be left.
    pub fn fit(&self, crash: &NormalizedCrash) -> Option<Signature> {
        let mut symptoms = Vec::with_capacity(self.symptoms.len());

        for symptom in &self.symptoms {
            match symptom {
                Symptom::StackFrames { function_names } => {
                    let fitted = frames::fit(function_names, &crash.frames);
                    if !fitted.is_empty() {
                        symptoms.push(Symptom::StackFrames {
                            function_names: fitted,
                        });
                    }
                }
                Symptom::CrashAddress { low, high } => {
                    if let Some(address) = crash.crash_address {
                        symptoms.push(Symptom::CrashAddress {
                            low: (*low).min(address),
                            high: (*high).max(address),
                        });
                    }
                }
                Symptom::Output { .. } => {
                    if symptom.distance(crash, DistanceMetric::EditDistance) == 0 {
                        symptoms.push(symptom.clone());
                    }
                }
            }
        }

        let fitted = Signature { symptoms };
        if fitted.has_concrete_constraint() {
            Some(fitted)
        } else {
            None
        }
    }

    /// Symptom by symptom explanation of the difference count
    pub fn diff(&self, crash: &NormalizedCrash, metric: DistanceMetric) -> SignatureDiff {
        let symptoms: Vec<SymptomDiff> = self
            .symptoms
            .iter()
            .map(|symptom| {
                let distance = symptom.distance(crash, metric);
                let details = match symptom {
                    Symptom::StackFrames { function_names } => {
                        describe_alignment(function_names, crash)
                    }
                    Symptom::CrashAddress { .. } => vec![match crash.crash_address {
                        Some(address) => format!("crash address {:#x}", address),
                        None => "crash has no address".to_string(),
                    }],
                    Symptom::Output { .. } => {
                        if distance == 0 {
                            vec!["output line matched".to_string()]
                        } else {
                            vec![format!("none of {} output lines matched", crash.output.len())]
                        }
                    }
                };

                SymptomDiff {
                    symptom: symptom.to_string(),
                    distance,
                    details,
                }
            })
            .collect();

        SignatureDiff {
            total: symptoms.iter().map(|s| s.distance).sum(),
            symptoms,
        }
    }
}

fn describe_alignment(pattern: &[FramePattern], crash: &NormalizedCrash) -> Vec<String> {
    let alignment = frames::align(pattern, &crash.frames);
    alignment
        .ops
        .iter()
        .filter_map(|op| match *op {
            AlignOp::Match { pattern: p, frame } => {
                Some(format!("  {} = {}", pattern[p], crash.frames[frame].function))
            }
            AlignOp::Substitute { pattern: p, frame } => {
                Some(format!("~ {} != {}", pattern[p], crash.frames[frame].function))
            }
            AlignOp::SkipPattern { pattern: p } => Some(format!("- {}", pattern[p])),
            AlignOp::ExtraFrame { frame } => Some(format!("+ {}", crash.frames[frame].function)),
            AlignOp::Star { .. } => Some("  *".to_string()),
            AlignOp::Absorb { .. } => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::StackFrame;

    fn crash(names: &[&str], address: Option<u64>, output: &[&str]) -> NormalizedCrash {
        NormalizedCrash {
            crash_id: 1,
            frames: names.iter().map(|n| StackFrame::new(*n)).collect(),
            crash_address: address,
            output: output.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_json_signature() {
        let signature = Signature::from_json(
            r#"{"symptoms":[
                {"stackFrames":{"functionNames":["js::gc::Mark","?","/^JS_/"]}},
                {"crashAddress":{"low":0,"high":4096}},
                {"output":{"value":"Assertion failure"}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(signature.symptoms.len(), 3);
        assert_eq!(signature.stack_frames().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_signatures_rejected() {
        assert!(Signature::from_json(r#"{"symptoms":[]}"#).is_err());
        assert!(
            Signature::from_json(r#"{"symptoms":[{"crashAddress":{"low":10,"high":1}}]}"#).is_err()
        );
        assert!(Signature::from_json(
            r#"{"symptoms":[{"stackFrames":{"functionNames":["/(/"]}}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_unconstrained_signatures_rejected() {
        let empty = Signature::from_json(r#"{"symptoms":[{"stackFrames":{"functionNames":[]}}]}"#);
        assert!(matches!(
            empty,
            Err(AppError::Pattern(PatternError::EmptyFrameList))
        ));

        for frames in [r#"["*"]"#, r#"["?","*"]"#] {
            let json = format!(
                r#"{{"symptoms":[{{"stackFrames":{{"functionNames":{}}}}}]}}"#,
                frames
            );
            assert!(matches!(
                Signature::from_json(&json),
                Err(AppError::Pattern(PatternError::NoConcreteConstraint))
            ));
        }

        // A wildcard frame list is fine next to a concrete symptom
        let anchored = Signature::from_json(
            r#"{"symptoms":[
                {"stackFrames":{"functionNames":["*"]}},
                {"crashAddress":{"low":0,"high":16}}
            ]}"#,
        );
        assert!(anchored.is_ok());
    }

    #[test]
    fn test_distance_sums_symptoms() {
        let signature = Signature::new(vec![
            Symptom::StackFrames {
                function_names: vec![
                    FramePattern::parse("a").unwrap(),
                    FramePattern::parse("b").unwrap(),
                ],
            },
            Symptom::CrashAddress { low: 0, high: 0xff },
            Symptom::Output {
                value: StringMatch::parse("MOZ_CRASH").unwrap(),
            },
        ]);

        let exact = crash(&["a", "b"], Some(0x10), &["Hit MOZ_CRASH(oops)"]);
        assert_eq!(signature.distance(&exact, DistanceMetric::EditDistance), 0);
        assert!(signature.matches(&exact));

        let off = crash(&["a", "x"], Some(0x1000), &[]);
        assert_eq!(signature.distance(&off, DistanceMetric::EditDistance), 3);
        assert!(!signature.matches(&off));
    }

    #[test]
    fn test_from_crash_matches_its_crash() {
        let c = crash(&["a", "?", "*", "/x/"], Some(0x42), &[]);
        let signature = Signature::from_crash(&c, 8);
        assert_eq!(signature.distance(&c, DistanceMetric::EditDistance), 0);
        assert_eq!(signature.distance(&c, DistanceMetric::SymmetricDifference), 0);
        assert!(signature.has_concrete_constraint());
    }

    #[test]
    fn test_fit_widens_address_and_drops_output() {
        let signature = Signature::new(vec![
            Symptom::StackFrames {
                function_names: vec![FramePattern::parse("a").unwrap()],
            },
            Symptom::CrashAddress {
                low: 0x100,
                high: 0x100,
            },
            Symptom::Output {
                value: StringMatch::parse("never").unwrap(),
            },
        ]);

        let c = crash(&["a"], Some(0x180), &["something else"]);
        let fitted = signature.fit(&c).unwrap();

        assert!(fitted.matches(&c));
        assert_eq!(fitted.symptoms.len(), 2);
        assert!(fitted.symptoms.contains(&Symptom::CrashAddress {
            low: 0x100,
            high: 0x180
        }));
    }

    #[test]
    fn test_fit_without_constraint_is_none() {
        let signature = Signature::new(vec![Symptom::StackFrames {
            function_names: vec![FramePattern::parse("a").unwrap()],
        }]);
        let c = crash(&["b"], None, &[]);
        assert!(signature.fit(&c).is_none());
    }

    #[test]
    fn test_diff_explains_each_symptom() {
        let signature = Signature::new(vec![
            Symptom::StackFrames {
                function_names: vec![
                    FramePattern::parse("a").unwrap(),
                    FramePattern::parse("b").unwrap(),
                ],
            },
            Symptom::CrashAddress { low: 0, high: 0 },
        ]);
        let c = crash(&["a", "c"], None, &[]);
        let diff = signature.diff(&c, DistanceMetric::EditDistance);

        assert_eq!(diff.total, 2);
        assert_eq!(diff.symptoms[0].details, vec!["  a = a", "~ b != c"]);
        assert_eq!(diff.symptoms[1].details, vec!["crash has no address"]);
    }
}
