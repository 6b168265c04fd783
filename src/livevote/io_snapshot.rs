use crate::livevote::*;
use round_voting::ledger::count_participants;
use std::collections::HashSet;

/// Tallies an exported round.
///
/// The export must come from a locked round unless provisional results are allowed.
pub fn tally_snapshot(
    input: &SnapshotInput,
    settings: &ElectionSettings,
) -> LiveVoteResult<RoundTally> {
    let round = &input.round;
    if !round.is_locked {
        if !settings.allow_provisional_results {
            return Err(VotingError::Rejected {
                reason: Rejection::ResultsNotFinal,
            })
            .context(VotingSnafu {
                step: format!("tally of {}", round.id),
            });
        }
        warn!("tally_snapshot: {} is not locked, results are provisional", round.id);
    }

    let mut voters: HashSet<MemberId> = HashSet::new();
    for s in input.voting_statuses.iter().filter(|s| s.round_id == round.id) {
        if !voters.insert(s.member_id) {
            whatever!("{} holds two voting statuses in {}", s.member_id, round.id)
        }
    }

    let votes: Vec<Vote> = input
        .votes
        .iter()
        .filter(|v| v.round_id == round.id)
        .cloned()
        .collect();
    if votes.len() < input.votes.len() {
        warn!(
            "tally_snapshot: skipping {} votes of other rounds",
            input.votes.len() - votes.len()
        );
    }
    let unknown_roles = votes.iter().filter(|v| round.role(&v.role).is_none()).count();
    if unknown_roles > 0 {
        warn!(
            "tally_snapshot: {} votes refer to roles that {} does not define",
            unknown_roles, round.id
        );
    }

    let participants = count_participants(
        round,
        &input.members,
        &input.voting_statuses,
        settings.participant_count,
    );
    info!(
        "tally_snapshot: {}: {} votes from {} voters, {} participants",
        round.id,
        votes.len(),
        voters.len(),
        participants
    );
    Ok(tally_round(round, &votes, participants))
}
