//! Missed-block severity groups.
//!
//! A validator's missed-block count over the window is bucketed into one
//! of a small number of contiguous, named ranges. Group lists are either
//! configured explicitly or generated from percentage breakpoints of the
//! window, and are validated once at startup so that a gap or overlap is
//! reported as a configuration problem rather than at classification time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default percentage breakpoints used when groups are generated.
pub const DEFAULT_BREAKPOINTS: [f64; 10] = [0.0, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 100.0];

const EMOJIS: [&str; 9] = ["🟢", "🟡", "🟡", "🟠", "🟠", "🔴", "🔴", "🔴", "⛔"];

/// Errors produced by group validation and classification.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ClassifierError {
    /// The configured group list is malformed for the window.
    #[error("invalid missed blocks groups: {0}")]
    Config(String),

    /// No configured group covers this missed-block count.
    #[error("no missed blocks group covers {missed} missed blocks")]
    NoGroup { missed: i64 },
}

/// One contiguous range `[start, end]` of missed-block counts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MissedBlocksGroup {
    pub start: i64,
    pub end: i64,
    /// Shown when a validator enters this group from below.
    pub emoji_start: String,
    pub desc_start: String,
    /// Shown when a validator recovers into this group from above.
    pub emoji_end: String,
    pub desc_end: String,
}

impl MissedBlocksGroup {
    pub fn contains(&self, missed: i64) -> bool {
        missed >= self.start && missed <= self.end
    }
}

/// Ordered, gap-free list of [`MissedBlocksGroup`]s.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissedBlocksGroups(pub Vec<MissedBlocksGroup>);

impl MissedBlocksGroups {
    /// Generates groups from [`DEFAULT_BREAKPOINTS`] for `window` blocks.
    pub fn generate(window: i64) -> Self {
        Self::from_breakpoints(window, &DEFAULT_BREAKPOINTS)
    }

    /// Generates groups from ascending percentage breakpoints.
    ///
    /// Group `i` covers `floor((window + 1) * p[i] / 100)` up to
    /// `floor((window + 1) * p[i + 1] / 100) - 1`. Ranges that come out
    /// empty for small windows are dropped; the remaining groups stay
    /// contiguous because an empty range starts where the next one does.
    pub fn from_breakpoints(window: i64, breakpoints: &[f64]) -> Self {
        let window_plus_one = (window + 1) as f64;
        let bound = |pct: f64| (window_plus_one * pct / 100.0).floor() as i64;

        let mut groups: Vec<MissedBlocksGroup> = breakpoints
            .windows(2)
            .enumerate()
            .filter_map(|(index, pair)| {
                let start = bound(pair[0]);
                let end = bound(pair[1]) - 1;
                if end < start {
                    return None;
                }

                let emoji = EMOJIS.get(index).copied().unwrap_or("⛔");
                Some(MissedBlocksGroup {
                    start,
                    end,
                    emoji_start: emoji.to_string(),
                    desc_start: format!("is skipping blocks (> {}%)", pair[0]),
                    emoji_end: emoji.to_string(),
                    desc_end: format!("is recovering (< {}%)", pair[1]),
                })
            })
            .collect();

        if let Some(first) = groups.first_mut() {
            first.desc_end = "is recovered".to_string();
        }

        MissedBlocksGroups(groups)
    }

    /// Checks that the groups start at 0, cover `window`, and have no gaps
    /// or overlaps.
    pub fn validate(&self, window: i64) -> Result<(), ClassifierError> {
        let first = self
            .0
            .first()
            .ok_or_else(|| ClassifierError::Config("group list is empty".to_string()))?;

        if first.start != 0 {
            return Err(ClassifierError::Config(format!(
                "first group starts at {}, expected 0",
                first.start
            )));
        }

        for (index, group) in self.0.iter().enumerate() {
            if group.end < group.start {
                return Err(ClassifierError::Config(format!(
                    "group #{index} ends at {} before it starts at {}",
                    group.end, group.start
                )));
            }
        }

        for (index, pair) in self.0.windows(2).enumerate() {
            if pair[1].start != pair[0].end + 1 {
                return Err(ClassifierError::Config(format!(
                    "group #{} starts at {}, expected {} (previous group ends at {})",
                    index + 1,
                    pair[1].start,
                    pair[0].end + 1,
                    pair[0].end
                )));
            }
        }

        // `first` exists, so `last` does too.
        let last_end = self.0.last().map(|g| g.end).unwrap_or(first.end);
        if last_end < window {
            return Err(ClassifierError::Config(format!(
                "last group ends at {last_end}, window is {window} blocks"
            )));
        }

        Ok(())
    }

    /// Returns the group whose range contains `missed`.
    pub fn get_group(&self, missed: i64) -> Result<&MissedBlocksGroup, ClassifierError> {
        self.0
            .iter()
            .find(|group| group.contains(missed))
            .ok_or(ClassifierError::NoGroup { missed })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
