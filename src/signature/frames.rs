//! Stack frame pattern distance and alignment
//!
//! The pattern is aligned against a *prefix* of the crash frames: frames
//! below the last aligned one are free. `?` consumes exactly one frame at
//! no cost, `*` consumes any run of frames at no cost, function matchers
//! cost 0 on match and 1 on substitution. Unmatched pattern elements and
//! extra crash frames inside the aligned prefix cost 1 each.

use super::pattern::FramePattern;
use crate::normalizer::StackFrame;
use std::cmp::Reverse;

/// A single step of a pattern/frames alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    /// Pattern element accepted the frame
    Match { pattern: usize, frame: usize },

    /// Pattern element rejected the frame it was aligned with
    Substitute { pattern: usize, frame: usize },

    /// Pattern element has no counterpart in the crash
    SkipPattern { pattern: usize },

    /// Crash frame has no counterpart in the pattern
    ExtraFrame { frame: usize },

    /// `*` element, possibly absorbing frames (see `Absorb`)
    Star { pattern: usize },

    /// Frame absorbed by a `*` element
    Absorb { pattern: usize, frame: usize },
}

/// Result of aligning a pattern with crash frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAlignment {
    pub distance: u32,
    /// Number of crash frames covered by the alignment
    pub consumed: usize,
    pub ops: Vec<AlignOp>,
}

fn build_table(pattern: &[FramePattern], frames: &[StackFrame]) -> Vec<Vec<u32>> {
    let n = pattern.len();
    let m = frames.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];

    for (j, cell) in dp[0].iter_mut().enumerate() {
        *cell = j as u32;
    }

    for i in 1..=n {
        let element = &pattern[i - 1];
        dp[i][0] = match element {
            FramePattern::AnyMany => dp[i - 1][0],
            _ => dp[i - 1][0] + 1,
        };

        for j in 1..=m {
            dp[i][j] = match element {
                FramePattern::AnyMany => dp[i - 1][j].min(dp[i][j - 1]),
                _ => {
                    let cost = if element.accepts(&frames[j - 1].function) { 0 } else { 1 };
                    (dp[i - 1][j - 1] + cost)
                        .min(dp[i - 1][j] + 1)
                        .min(dp[i][j - 1] + 1)
                }
            };
        }
    }

    dp
}

/// Column of the last row with the lowest cost; on ties the alignment
/// covering more crash frames wins
fn best_column(last_row: &[u32]) -> (usize, u32) {
    last_row
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|&(j, cost)| (cost, Reverse(j)))
        .unwrap_or((0, 0))
}

/// Edit distance between a frame pattern and the crash frames
pub fn edit_distance(pattern: &[FramePattern], frames: &[StackFrame]) -> u32 {
    if pattern.is_empty() {
        return 0;
    }

    let dp = build_table(pattern, frames);
    best_column(&dp[pattern.len()]).1
}

/// Full alignment including the operations, used for fitting and diffs
pub fn align(pattern: &[FramePattern], frames: &[StackFrame]) -> FrameAlignment {
    if pattern.is_empty() {
        return FrameAlignment {
            distance: 0,
            consumed: 0,
            ops: Vec::new(),
        };
    }

    let dp = build_table(pattern, frames);
    let (consumed, distance) = best_column(&dp[pattern.len()]);

    let mut ops = Vec::new();
    let mut i = pattern.len();
    let mut j = consumed;

    while i > 0 || j > 0 {
        if i == 0 {
            ops.push(AlignOp::ExtraFrame { frame: j - 1 });
            j -= 1;
            continue;
        }

        let element = &pattern[i - 1];

        if let FramePattern::AnyMany = element {
            if j > 0 && dp[i][j] == dp[i][j - 1] {
                ops.push(AlignOp::Absorb {
                    pattern: i - 1,
                    frame: j - 1,
                });
                j -= 1;
            } else {
                ops.push(AlignOp::Star { pattern: i - 1 });
                i -= 1;
            }
            continue;
        }

        if j > 0 {
            let accepted = element.accepts(&frames[j - 1].function);
            let cost = if accepted { 0 } else { 1 };
            if dp[i][j] == dp[i - 1][j - 1] + cost {
                ops.push(if accepted {
                    AlignOp::Match {
                        pattern: i - 1,
                        frame: j - 1,
                    }
                } else {
                    AlignOp::Substitute {
                        pattern: i - 1,
                        frame: j - 1,
                    }
                });
                i -= 1;
                j -= 1;
                continue;
            }
        }

        if dp[i][j] == dp[i - 1][j] + 1 {
            ops.push(AlignOp::SkipPattern { pattern: i - 1 });
            i -= 1;
        } else {
            ops.push(AlignOp::ExtraFrame { frame: j - 1 });
            j -= 1;
        }
    }

    ops.reverse();

    FrameAlignment {
        distance,
        consumed,
        ops,
    }
}

/// Symmetric set difference between concrete pattern elements and the
/// compared crash frames, less what wildcards cover
pub fn symmetric_difference(pattern: &[FramePattern], frames: &[StackFrame]) -> u32 {
    if pattern.is_empty() {
        return 0;
    }

    let has_star = pattern.iter().any(|p| matches!(p, FramePattern::AnyMany));
    let window = if has_star {
        frames
    } else {
        &frames[..pattern.len().min(frames.len())]
    };

    let concrete: Vec<&FramePattern> = pattern.iter().filter(|p| !p.is_wildcard()).collect();
    let single_wildcards = pattern
        .iter()
        .filter(|p| matches!(p, FramePattern::AnyOne))
        .count();

    let unmatched_pattern = concrete
        .iter()
        .filter(|p| !window.iter().any(|f| p.accepts(&f.function)))
        .count();

    let unmatched_frames = if has_star {
        0
    } else {
        window
            .iter()
            .filter(|f| !concrete.iter().any(|p| p.accepts(&f.function)))
            .count()
            .saturating_sub(single_wildcards)
    };

    (unmatched_pattern + unmatched_frames) as u32
}

/// Cheapest possible edit distance, used to skip hopeless signatures
pub fn edit_distance_lower_bound(pattern: &[FramePattern], frame_count: usize) -> u32 {
    if pattern.iter().any(|p| matches!(p, FramePattern::AnyMany)) {
        0
    } else {
        pattern.len().saturating_sub(frame_count) as u32
    }
}

/// Generalize `pattern` so that it aligns with `frames` at distance 0
pub fn fit(pattern: &[FramePattern], frames: &[StackFrame]) -> Vec<FramePattern> {
    let alignment = align(pattern, frames);
    let mut fitted = Vec::with_capacity(alignment.ops.len());

    for op in alignment.ops {
        match op {
            AlignOp::Match { pattern: p, .. } => fitted.push(pattern[p].clone()),
            AlignOp::Substitute { .. } | AlignOp::ExtraFrame { .. } => {
                fitted.push(FramePattern::AnyOne)
            }
            AlignOp::Star { .. } => fitted.push(FramePattern::AnyMany),
            AlignOp::SkipPattern { .. } | AlignOp::Absorb { .. } => {}
        }
    }

    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(names: &[&str]) -> Vec<StackFrame> {
        names.iter().map(|n| StackFrame::new(*n)).collect()
    }

    fn pattern(items: &[&str]) -> Vec<FramePattern> {
        items.iter().map(|p| FramePattern::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_identical_frames_have_zero_distance() {
        let crash = frames(&["a", "b", "c"]);
        assert_eq!(edit_distance(&pattern(&["a", "b", "c"]), &crash), 0);
    }

    #[test]
    fn test_trailing_crash_frames_are_free() {
        let crash = frames(&["a", "b", "c", "d", "e"]);
        assert_eq!(edit_distance(&pattern(&["a", "b"]), &crash), 0);
    }

    #[test]
    fn test_substitution_and_missing_frames() {
        let crash = frames(&["a", "x", "c"]);
        assert_eq!(edit_distance(&pattern(&["a", "b", "c"]), &crash), 1);

        let crash = frames(&["a"]);
        assert_eq!(edit_distance(&pattern(&["a", "b", "c"]), &crash), 2);
    }

    #[test]
    fn test_leading_extra_frame_costs_one() {
        let crash = frames(&["inlined", "a", "b"]);
        assert_eq!(edit_distance(&pattern(&["a", "b"]), &crash), 1);
    }

    #[test]
    fn test_wildcards() {
        let crash = frames(&["a", "x", "y", "z", "b"]);
        assert_eq!(edit_distance(&pattern(&["a", "*", "b"]), &crash), 0);
        assert_eq!(edit_distance(&pattern(&["a", "?", "y"]), &crash), 0);
        assert_eq!(edit_distance(&pattern(&["*"]), &frames(&[])), 0);
        assert_eq!(edit_distance(&pattern(&["?"]), &frames(&[])), 1);
    }

    #[test]
    fn test_fit_produces_matching_pattern() {
        let crash = frames(&["a", "x", "c", "d"]);
        let original = pattern(&["a", "b", "c", "q"]);
        let fitted = fit(&original, &crash);

        assert_eq!(edit_distance(&fitted, &crash), 0);
        assert_eq!(fitted, pattern(&["a", "?", "c", "?"]));
    }

    #[test]
    fn test_fit_drops_unmatched_pattern_elements() {
        let crash = frames(&["a", "c"]);
        let fitted = fit(&pattern(&["a", "b", "c"]), &crash);
        assert_eq!(edit_distance(&fitted, &crash), 0);
        assert_eq!(fitted, pattern(&["a", "c"]));
    }

    #[test]
    fn test_fit_keeps_stars() {
        let crash = frames(&["a", "x", "y", "b"]);
        let fitted = fit(&pattern(&["a", "*", "b"]), &crash);
        assert_eq!(fitted, pattern(&["a", "*", "b"]));
    }

    #[test]
    fn test_symmetric_difference() {
        let crash = frames(&["a", "b", "c"]);
        assert_eq!(symmetric_difference(&pattern(&["a", "b", "c"]), &crash), 0);
        assert_eq!(symmetric_difference(&pattern(&["c", "b", "a"]), &crash), 0);
        assert_eq!(symmetric_difference(&pattern(&["a", "b", "z"]), &crash), 2);
        assert_eq!(symmetric_difference(&pattern(&["a", "?", "z"]), &crash), 2);
        assert_eq!(symmetric_difference(&pattern(&["a", "?", "c"]), &crash), 0);
    }

    #[test]
    fn test_lower_bound_never_exceeds_distance() {
        let crash = frames(&["a"]);
        let p = pattern(&["a", "b", "c"]);
        assert!(edit_distance_lower_bound(&p, crash.len()) <= edit_distance(&p, &crash));
        assert_eq!(edit_distance_lower_bound(&pattern(&["a", "*"]), 0), 0);
    }
}
