/// Crash normalization
///
/// Turns raw crash trace text into a canonical, ordered frame sequence
/// that signatures can be compared against:
/// - recognises sanitizer/gdb numbered frames, `symbol+0xOFF`, bare
///   symbols and unsymbolized addresses
/// - strips argument lists, drops noise frames, collapses recursion
/// - truncates to the configured depth

mod parse;

pub use parse::parse_frame_line;

use crate::models::{CrashEntry, RawCrash};
use crate::signature::PatternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that make a crash unbucketable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    /// Trace text is empty
    #[error("crash has no trace data")]
    MissingTrace,

    /// A trace line could not be understood
    #[error("corrupt trace at line {line}: {reason}")]
    CorruptTrace { line: usize, reason: String },

    /// Every frame was filtered as noise
    #[error("no usable frames left after filtering")]
    NoUsableFrames,
}

/// One frame of a normalized trace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name, `??` when unsymbolized
    pub function: String,

    /// Offset into the function (or module address when unsymbolized)
    pub offset: Option<u64>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            offset: None,
        }
    }

    pub fn with_offset(function: impl Into<String>, offset: u64) -> Self {
        Self {
            function: function.into(),
            offset: Some(offset),
        }
    }
}

/// Canonical comparable representation of a crash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedCrash {
    pub crash_id: u64,
    pub frames: Vec<StackFrame>,
    pub crash_address: Option<u64>,
    pub output: Vec<String>,
}

impl NormalizedCrash {
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.first()
    }
}

/// Configuration for crash normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Maximum number of frames kept after filtering
    pub max_frames: usize,

    /// Regular expressions for frames that never carry signal
    pub noise_patterns: Vec<String>,

    /// Collapse consecutive identical frames (recursion)
    pub collapse_duplicates: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_frames: 8,
            noise_patterns: vec![
                "^__libc_start_main".to_string(),
                "^_start$".to_string(),
                "^(__GI_)?raise$".to_string(),
                "^(__GI_)?abort$".to_string(),
                "^__assert_fail".to_string(),
                "^__sanitizer::".to_string(),
                "^__asan::".to_string(),
                "^__interceptor_".to_string(),
            ],
            collapse_duplicates: true,
        }
    }
}

/// Normalizes raw crashes into comparable frame sequences
#[derive(Debug, Clone)]
pub struct CrashNormalizer {
    max_frames: usize,
    collapse_duplicates: bool,
    noise: Vec<Regex>,
}

impl CrashNormalizer {
    /// Create a normalizer, compiling the noise patterns
    pub fn new(config: &NormalizerConfig) -> Result<Self, PatternError> {
        let noise = config
            .noise_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| PatternError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_frames: config.max_frames.max(1),
            collapse_duplicates: config.collapse_duplicates,
            noise,
        })
    }

    pub fn normalize(&self, crash: &CrashEntry) -> Result<NormalizedCrash, NormalizationError> {
        self.normalize_raw(crash.id, &crash.raw)
    }

    pub fn normalize_raw(
        &self,
        crash_id: u64,
        raw: &RawCrash,
    ) -> Result<NormalizedCrash, NormalizationError> {
        if raw.trace.trim().is_empty() {
            return Err(NormalizationError::MissingTrace);
        }

        let mut frames: Vec<StackFrame> = Vec::new();
        let mut parsed = 0usize;

        for (index, line) in raw.trace.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let frame = parse_frame_line(line).map_err(|reason| NormalizationError::CorruptTrace {
                line: index + 1,
                reason,
            })?;
            parsed += 1;

            if self.is_noise(&frame.function) {
                continue;
            }

            if self.collapse_duplicates
                && frames.last().map(|f| f.function == frame.function).unwrap_or(false)
            {
                continue;
            }

            frames.push(frame);
        }

        if frames.is_empty() {
            return Err(NormalizationError::NoUsableFrames);
        }

        frames.truncate(self.max_frames);

        debug!(
            crash_id = crash_id,
            parsed_frames = parsed,
            kept_frames = frames.len(),
            "Crash normalized"
        );

        Ok(NormalizedCrash {
            crash_id,
            frames,
            crash_address: raw.crash_address,
            output: raw.output.clone(),
        })
    }

    fn is_noise(&self, function: &str) -> bool {
        self.noise.iter().any(|re| re.is_match(function))
    }
}
