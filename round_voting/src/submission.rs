use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};

use crate::config::*;
use crate::ledger::VoteLedger;
use crate::lifecycle::RoundManager;
use crate::pairing::StandCoordinator;
use crate::store::ElectionStore;

/// A ballot as sent by a stand.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BallotRequest {
    #[serde(rename = "roundId")]
    pub round_id: RoundId,
    #[serde(rename = "memberId")]
    pub member_id: MemberId,
    #[serde(rename = "standId")]
    pub stand_id: StandId,
    #[serde(rename = "votesByRole")]
    pub votes_by_role: BTreeMap<String, Vec<ContestantId>>,
    /// Opaque trace captured by the stand.
    #[serde(default)]
    pub signature: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub status: VotingStatus,
    #[serde(rename = "numVotes")]
    pub num_votes: usize,
    /// False when the stand was already holding another member.
    #[serde(rename = "standReleased")]
    pub stand_released: bool,
}

// Shape checks for one role: at least one selection, not more than allowed, no duplicate.
fn check_selections(role: &RoleConfig, selections: Option<&Vec<ContestantId>>) -> VotingResult<()> {
    let selections = match selections {
        Some(s) if !s.is_empty() => s,
        _ => {
            return InvalidBallotSnafu {
                role: role.role.clone(),
                problem: BallotProblem::MissingSelection,
            }
            .fail()
        }
    };
    ensure!(
        selections.len() <= role.max_votes as usize,
        InvalidBallotSnafu {
            role: role.role.clone(),
            problem: BallotProblem::TooManySelections {
                max: role.max_votes,
                got: selections.len(),
            },
        }
    );
    let mut seen: HashSet<ContestantId> = HashSet::new();
    for cid in selections.iter() {
        ensure!(
            seen.insert(*cid),
            InvalidBallotSnafu {
                role: role.role.clone(),
                problem: BallotProblem::DuplicateSelection(*cid),
            }
        );
    }
    Ok(())
}

// White votes are resolved from the role definition alone.
fn resolve_contestant(role: &RoleConfig, cid: ContestantId) -> VotingResult<()> {
    let known = match cid {
        ContestantId::WhiteVote(index) => index < role.num_white_votes,
        ContestantId::Member(_) => role.has_contestant(cid),
    };
    ensure!(
        known,
        NotFoundSnafu {
            entity: Entity::Contestant {
                role: role.role.clone(),
                id: cid,
            }
        }
    );
    Ok(())
}

/// Validates the selections of a ballot against the round and returns the vote rows.
///
/// All the roles are checked for shape before any contestant is resolved. Nothing is
/// returned unless the whole ballot is valid.
pub fn validate_ballot(
    round: &Round,
    votes_by_role: &BTreeMap<String, Vec<ContestantId>>,
) -> VotingResult<Vec<Vote>> {
    for role_name in votes_by_role.keys() {
        ensure!(
            round.role(role_name).is_some(),
            InvalidBallotSnafu {
                role: role_name.clone(),
                problem: BallotProblem::UnknownRole,
            }
        );
    }
    for role in round.roles.iter() {
        check_selections(role, votes_by_role.get(&role.role))?;
    }

    let mut votes: Vec<Vote> = Vec::new();
    for role in round.roles.iter() {
        let selections = votes_by_role.get(&role.role).cloned().unwrap_or_default();
        for cid in selections {
            resolve_contestant(role, cid)?;
            votes.push(Vote {
                round_id: round.id,
                role: role.role.clone(),
                contestant: cid,
            });
        }
    }
    Ok(votes)
}

/// Validates and commits ballots, then frees the stand for the next voter.
pub struct VoteProcessor {
    store: Arc<dyn ElectionStore>,
    rounds: Arc<RoundManager>,
    ledger: VoteLedger,
    stands: Arc<StandCoordinator>,
    require_presence: bool,
}

impl VoteProcessor {
    pub fn new(
        store: Arc<dyn ElectionStore>,
        rounds: Arc<RoundManager>,
        ledger: VoteLedger,
        stands: Arc<StandCoordinator>,
        require_presence: bool,
    ) -> VoteProcessor {
        VoteProcessor {
            store,
            rounds,
            ledger,
            stands,
            require_presence,
        }
    }

    pub fn submit_vote(&self, request: &BallotRequest) -> VotingResult<Receipt> {
        let round_id = request.round_id;
        let member_id = request.member_id;
        debug!(
            "submit_vote: {} for {} at {}",
            member_id, round_id, request.stand_id
        );

        let round = self.rounds.round(round_id)?;
        let member = self
            .store
            .member(member_id)
            .filter(|m| m.is_present || !self.require_presence)
            .context(NotFoundSnafu {
                entity: Entity::Member(member_id),
            })?;
        ensure!(
            round.allows(member.id),
            RejectedSnafu {
                reason: Rejection::NotEligible
            }
        );
        ensure!(
            !round.is_locked,
            RejectedSnafu {
                reason: Rejection::RoundLocked
            }
        );
        // A draft round was never opened to the stands.
        ensure!(
            round.start_time.is_some(),
            RejectedSnafu {
                reason: Rejection::NoActiveRound
            }
        );
        // Fast path only: the store key decides.
        ensure!(
            !self.ledger.has_voted(round_id, member_id),
            RejectedSnafu {
                reason: Rejection::AlreadyVoted
            }
        );

        let votes = validate_ballot(&round, &request.votes_by_role)?;
        let num_votes = votes.len();
        let status = match self.ledger.record_ballot(
            round_id,
            member_id,
            votes,
            &request.signature,
            Utc::now(),
        ) {
            Ok(s) => s,
            Err(e) => {
                warn!("submit_vote: {} in {}: {}", member_id, round_id, e);
                return Err(e);
            }
        };

        let stand_released = self.stands.release_stand(request.stand_id, member_id);
        info!(
            "submit_vote: ballot of {} recorded in {} ({} votes)",
            member_id, round_id, num_votes
        );
        Ok(Receipt {
            status,
            num_votes,
            stand_released,
        })
    }
}
