use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::work_item::{CapturedImage, WorkItemChange, WorkItemStatus};

/// The single resolved result of a correlation wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The worker found an acceptable number of detections. Carries the
    /// payload the caller submitted; the worker never echoes it back.
    Matched {
        payload: CapturedImage,
        match_count: u32,
    },
    NotMatched { match_count: u32 },
    Errored,
    TimedOut,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Matched { .. } => OutcomeKind::Matched,
            Outcome::NotMatched { .. } => OutcomeKind::NotMatched,
            Outcome::Errored => OutcomeKind::Errored,
            Outcome::TimedOut => OutcomeKind::TimedOut,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Outcome::Matched { .. })
    }
}

/// Payload-free discriminant of [`Outcome`], used for state and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Matched,
    NotMatched,
    Errored,
    TimedOut,
}

/// Decides whether a processed work item counts as a match.
///
/// The detection worker reports how many detections it found. `min_matches`
/// and `max_matches` bound the accepted range; the default (`1..`) accepts
/// any positive count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub min_matches: u32,
    pub max_matches: Option<u32>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_matches: 1,
            max_matches: None,
        }
    }
}

impl MatchPolicy {
    pub fn accepts(&self, match_count: u32) -> bool {
        match_count >= self.min_matches && self.max_matches.map_or(true, |max| match_count <= max)
    }

    /// Classify a delivered change. Returns `None` while the item is still pending.
    pub fn classify(&self, change: &WorkItemChange) -> Option<(OutcomeKind, u32)> {
        match change.status {
            WorkItemStatus::Pending => None,
            WorkItemStatus::Error => Some((OutcomeKind::Errored, 0)),
            WorkItemStatus::Processed => {
                let count = change.match_count.unwrap_or(0);
                if self.accepts(count) {
                    Some((OutcomeKind::Matched, count))
                } else {
                    Some((OutcomeKind::NotMatched, count))
                }
            }
        }
    }
}
