use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::*;
use crate::store::{ElectionStore, StoreError};

/// Maps a storage failure to the error reported to callers.
pub(crate) fn store_error(e: StoreError) -> VotingError {
    match e {
        StoreError::UnknownRound { round_id } => VotingError::NotFound {
            entity: Entity::Round(round_id),
        },
        StoreError::DuplicateVotingStatus { .. } => VotingError::Rejected {
            reason: Rejection::AlreadyVoted,
        },
        StoreError::RoundIsLocked { .. } => VotingError::Rejected {
            reason: Rejection::RoundLocked,
        },
        StoreError::LockUnchanged { locked: true, .. } => VotingError::Rejected {
            reason: Rejection::AlreadyLocked,
        },
        StoreError::LockUnchanged { locked: false, .. } => VotingError::Rejected {
            reason: Rejection::NotLocked,
        },
        StoreError::DefinitionStarted { .. } => VotingError::Rejected {
            reason: Rejection::RoundStarted,
        },
        StoreError::DefinitionHasBallots { .. } => VotingError::Rejected {
            reason: Rejection::BallotsRecorded,
        },
    }
}

/// Audit digest of a captured signature. The signature itself is never interpreted.
pub fn signature_digest(signature: &str) -> String {
    sha256::digest(signature)
}

/// The append-only record of ballots and voting statuses.
#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn ElectionStore>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn ElectionStore>) -> VoteLedger {
        VoteLedger { store }
    }

    /// Records one ballot: all the selections and the voting status of the member.
    pub fn record_ballot(
        &self,
        round_id: RoundId,
        member_id: MemberId,
        votes: Vec<Vote>,
        signature: &str,
        at: DateTime<Utc>,
    ) -> VotingResult<VotingStatus> {
        let status = VotingStatus {
            round_id,
            member_id,
            voted_at: at,
            signature: signature.to_string(),
        };
        let num_votes = votes.len();
        self.store
            .commit_ballot(status.clone(), votes)
            .map_err(store_error)?;
        info!(
            "record_ballot: {} voted in {} ({} selections, signature {})",
            member_id,
            round_id,
            num_votes,
            signature_digest(signature)
        );
        Ok(status)
    }

    pub fn has_voted(&self, round_id: RoundId, member_id: MemberId) -> bool {
        self.store.has_voted(round_id, member_id)
    }

    pub fn voted_members(&self, round_id: RoundId) -> Vec<VotingStatus> {
        self.store.voting_statuses(round_id)
    }

    pub fn votes(&self, round_id: RoundId) -> Vec<Vote> {
        self.store.votes(round_id)
    }

    /// The denominator of the winning threshold for the round.
    pub fn participant_count(&self, round: &Round, source: ParticipantCountSource) -> u64 {
        let count = count_participants(
            round,
            &self.store.members(),
            &self.store.voting_statuses(round.id),
            source,
        );
        debug!(
            "participant_count: {}: {} ({:?})",
            round.id, count, source
        );
        count
    }
}

/// Counts the participants of a round from the registered members and the voting statuses.
///
/// Statuses of other rounds are skipped.
pub fn count_participants(
    round: &Round,
    members: &[Member],
    statuses: &[VotingStatus],
    source: ParticipantCountSource,
) -> u64 {
    let count = match source {
        ParticipantCountSource::VotedMembers => statuses
            .iter()
            .filter(|s| s.round_id == round.id)
            .map(|s| s.member_id)
            .collect::<HashSet<MemberId>>()
            .len(),
        ParticipantCountSource::PresentMembers => {
            let allowed: HashSet<MemberId> = round.allowed_members.iter().map(|m| m.id).collect();
            members
                .iter()
                .filter(|m| m.is_present && (allowed.is_empty() || allowed.contains(&m.id)))
                .count()
        }
    };
    count as u64
}
