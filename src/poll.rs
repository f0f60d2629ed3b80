// src/poll.rs
//! Vote tallying for a single poll.
//!
//! Everything here is a pure function of the option list, the raw vote rows and
//! the viewer. The one-vote-per-voter rule lives in the store; the tally only
//! reflects what was already recorded so the caller can gate the vote button.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::identity::ResolvedVoter;
use crate::models::{PollOption, Vote};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollTally {
    /// Every option of the poll, including the ones nobody picked.
    pub option_counts: BTreeMap<Uuid, u64>,
    pub total_votes: u64,
    pub viewer_vote_option_id: Option<Uuid>,
    /// Rounded per option. The values are not adjusted to add up to 100:
    /// three options at one vote each show 33/33/33.
    pub percentages: BTreeMap<Uuid, u8>,
}

/// A viewer can only move from `NotVoted` to `Voted`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    NotVoted,
    Voted(Uuid),
}

pub fn aggregate(options: &[PollOption], votes: &[Vote], viewer: &ResolvedVoter) -> PollTally {
    let mut option_counts: BTreeMap<Uuid, u64> =
        options.iter().map(|option| (option.id, 0)).collect();

    for vote in votes {
        if let Some(count) = option_counts.get_mut(&vote.option_id) {
            *count += 1;
        }
    }

    let total_votes = votes.len() as u64;

    let viewer_vote_option_id = viewer.identity().and_then(|identity| {
        votes
            .iter()
            .find(|vote| vote.voter == identity)
            .map(|vote| vote.option_id)
    });

    let percentages = option_counts
        .iter()
        .map(|(id, count)| (*id, percentage(*count, total_votes)))
        .collect();

    PollTally {
        option_counts,
        total_votes,
        viewer_vote_option_id,
        percentages,
    }
}

/// `round(100 * count / total)` with halves rounded up, 0 for an empty poll.
pub fn percentage(count: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((200 * count + total) / (2 * total)).min(100) as u8
}

impl PollTally {
    pub fn state(&self) -> VoteState {
        match self.viewer_vote_option_id {
            Some(option_id) => VoteState::Voted(option_id),
            None => VoteState::NotVoted,
        }
    }

    pub fn count(&self, option_id: &Uuid) -> u64 {
        self.option_counts.get(option_id).copied().unwrap_or(0)
    }

    pub fn percentage_of(&self, option_id: &Uuid) -> u8 {
        self.percentages.get(option_id).copied().unwrap_or(0)
    }

    /// Voting is open only to a resolved viewer who has not voted yet.
    pub fn can_vote(&self, viewer: &ResolvedVoter) -> bool {
        viewer.identity().is_some() && self.state() == VoteState::NotVoted
    }
}
