use crate::livevote::*;
use round_voting::builder::{RoleDraft, RoundDraft};
use round_voting::election::Election;
use round_voting::pairing::{StandTerminal, TerminalAction};
use round_voting::submission::{BallotRequest, Receipt};
use std::collections::{BTreeMap, HashMap};

const MANAGER: Caller = Caller::ElectionManager;

/// A ballot of the script that the system refused.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RejectedBallot {
    pub member_id: MemberId,
    pub stand_id: StandId,
    pub error: String,
}

#[derive(PartialEq, Debug, Clone)]
pub struct ReplayOutcome {
    pub round_id: RoundId,
    pub round_name: String,
    /// None when the round was left open and provisional results are not allowed.
    pub tally: Option<RoundTally>,
    pub rejected: Vec<RejectedBallot>,
}

fn round_draft(rr: &ReplayRound, members: &HashMap<MemberId, Member>) -> LiveVoteResult<RoundDraft> {
    let lookup = |mid: &MemberId| -> LiveVoteResult<Member> {
        members.get(mid).cloned().context(UnknownMemberSnafu {
            round: rr.name.clone(),
            member_id: *mid,
        })
    };
    let mut draft = RoundDraft::new(&rr.name);
    for role in rr.roles.iter() {
        let candidates: Vec<Member> = role
            .candidates
            .iter()
            .map(&lookup)
            .collect::<LiveVoteResult<Vec<Member>>>()?;
        draft = draft.role(
            RoleDraft::new(&role.role, &candidates)
                .max_votes(role.max_votes)
                .white_votes(role.num_white_votes)
                .winners(role.num_winners),
        );
    }
    let allowed: Vec<Member> = rr
        .allowed_members
        .iter()
        .map(&lookup)
        .collect::<LiveVoteResult<Vec<Member>>>()?;
    Ok(draft.allowed_members(&allowed))
}

// Applies the pending events on every terminal, resynchronizing the ones that fell behind.
fn drain_terminals(
    election: &Election,
    terminals: &mut BTreeMap<StandId, StandTerminal>,
) -> VotingResult<()> {
    for (sid, terminal) in terminals.iter_mut() {
        for action in terminal.poll()? {
            match action {
                TerminalAction::Resync { missed } => {
                    debug!("drain_terminals: {} missed {} events", sid, missed);
                    election.sync_terminal(Caller::VotingStand(*sid), terminal)?;
                }
                TerminalAction::Ignored => {}
                other => debug!("drain_terminals: {}: {:?}", sid, other),
            }
        }
    }
    Ok(())
}

// The full path of one voter: pairing, rendering on the stand, acknowledgement, submission.
fn cast_ballot(
    election: &Election,
    round_id: RoundId,
    ballot: &ReplayBallot,
    terminals: &mut BTreeMap<StandId, StandTerminal>,
) -> VotingResult<Receipt> {
    let stand = Caller::VotingStand(ballot.stand);
    let pairing = election.load_member(MANAGER, ballot.member, ballot.stand)?;
    if !terminals.contains_key(&ballot.stand) {
        let terminal = election.connect_terminal(stand, ballot.stand)?;
        terminals.insert(ballot.stand, terminal);
    }
    drain_terminals(election, terminals)?;

    let shown = terminals
        .get(&ballot.stand)
        .and_then(|t| t.ballot())
        .map(|(m, seq)| (m.id, seq));
    if shown != Some((ballot.member, pairing.sequence)) {
        warn!(
            "cast_ballot: {} shows {:?} instead of {}",
            ballot.stand, shown, ballot.member
        );
        return Err(VotingError::Rejected {
            reason: Rejection::StaleAssignment,
        });
    }
    election.acknowledge(stand, ballot.stand, pairing.sequence)?;

    let request = BallotRequest {
        round_id,
        member_id: ballot.member,
        stand_id: ballot.stand,
        votes_by_role: ballot.votes.clone(),
        signature: ballot.signature.clone(),
    };
    election.submit_vote(stand, &request)
}

fn replay_round(
    election: &Election,
    rr: &ReplayRound,
    members: &HashMap<MemberId, Member>,
    terminals: &mut BTreeMap<StandId, StandTerminal>,
) -> LiveVoteResult<ReplayOutcome> {
    let step = |what: &str| format!("{} of round {:?}", what, rr.name);

    let draft = round_draft(rr, members)?;
    let round = election
        .create_round(Caller::Admin, &draft)
        .context(VotingSnafu {
            step: step("creation"),
        })?;
    let ack = election
        .load_round(MANAGER, Some(round.id))
        .context(VotingSnafu {
            step: step("activation"),
        })?;
    info!(
        "replay_round: {} active (version {}, {} terminals)",
        round.id, ack.active.version, ack.receivers
    );
    drain_terminals(election, terminals).context(VotingSnafu {
        step: step("activation"),
    })?;

    let mut rejected: Vec<RejectedBallot> = Vec::new();
    for ballot in rr.ballots.iter() {
        match cast_ballot(election, round.id, ballot, terminals) {
            Ok(receipt) => debug!(
                "replay_round: {} voted at {} ({} votes)",
                ballot.member, ballot.stand, receipt.num_votes
            ),
            Err(e) => {
                warn!(
                    "replay_round: ballot of {} at {} refused: {}",
                    ballot.member, ballot.stand, e
                );
                rejected.push(RejectedBallot {
                    member_id: ballot.member,
                    stand_id: ballot.stand,
                    error: e.to_string(),
                });
            }
        }
    }

    if rr.lock {
        election
            .lock_round(MANAGER, round.id)
            .context(VotingSnafu { step: step("lock") })?;
    }
    drain_terminals(election, terminals).context(VotingSnafu { step: step("lock") })?;

    let tally = match election.get_results(MANAGER, round.id) {
        Ok(t) => Some(t),
        Err(e) if e.rejection() == Some(Rejection::ResultsNotFinal) => {
            warn!("replay_round: {} left open, no results", round.id);
            None
        }
        Err(e) => {
            return Err(e).context(VotingSnafu {
                step: step("tally"),
            })
        }
    };
    Ok(ReplayOutcome {
        round_id: round.id,
        round_name: round.name,
        tally,
        rejected,
    })
}

/// Plays the session through a fresh election and returns the outcome of every round.
pub fn replay(input: &ReplayInput, settings: ElectionSettings) -> LiveVoteResult<Vec<ReplayOutcome>> {
    let election = Election::new(settings);
    for m in input.members.iter() {
        election
            .register_member(Caller::Admin, m.clone())
            .context(VotingSnafu {
                step: "registration".to_string(),
            })?;
    }
    let members: HashMap<MemberId, Member> = election
        .members()
        .into_iter()
        .map(|m| (m.id, m))
        .collect();
    info!(
        "replay: {} members, {} rounds",
        members.len(),
        input.rounds.len()
    );

    let mut terminals: BTreeMap<StandId, StandTerminal> = BTreeMap::new();
    let mut outcomes: Vec<ReplayOutcome> = Vec::new();
    for rr in input.rounds.iter() {
        outcomes.push(replay_round(&election, rr, &members, &mut terminals)?);
    }
    Ok(outcomes)
}
