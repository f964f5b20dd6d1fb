//! # Conflict Resolver
//!
//! Pure timestamp arbitration between a queued change and the row it would
//! overwrite. The policy is last-writer-wins on the per-row sync timestamp:
//! whichever side wrote most recently keeps its data, and a tie goes to the
//! side whose change is being propagated. The resolver never touches a
//! database; callers hand it two timestamps and act on the verdict.

use serde::{Deserialize, Serialize};

/// Verdict of comparing a propagated change against the destination row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Winner {
    /// The propagated change is newer (or ties); apply it
    Source,
    /// The destination row is newer; skip the change
    Destination,
    /// Timestamps are equal
    Tie,
}

impl Winner {
    /// Whether the propagated change should be applied.
    ///
    /// Ties count as source wins: the side that queued the change is the one
    /// driving this direction of the pass, and dropping its change on a tie
    /// would lose data while applying it merely rewrites equal values.
    pub fn source_wins(&self) -> bool {
        matches!(self, Self::Source | Self::Tie)
    }
}

/// Compare a propagated change's timestamp against the destination row's.
///
/// Timestamps are Unix seconds. A missing timestamp counts as zero, so a row
/// that has never been stamped always loses to one that has, and two unstamped
/// rows tie.
pub fn resolve(source_ts: Option<i64>, destination_ts: Option<i64>) -> Winner {
    let source = source_ts.unwrap_or(0);
    let destination = destination_ts.unwrap_or(0);

    match source.cmp(&destination) {
        std::cmp::Ordering::Greater => Winner::Source,
        std::cmp::Ordering::Less => Winner::Destination,
        std::cmp::Ordering::Equal => Winner::Tie,
    }
}
