/*!
The core of a live, in-person election: rounds are opened and locked by an
election manager, members are paired with voting stands, ballots are recorded at
most once per member and round, and the results are computed with a threshold
that depends on the number of contestants.

The main entry point is [`election::Election`]. The tally itself is a pure
function, [`tally_round`], that can be run on exported data.

See the [`manual`] for the rules of the tally and the life cycle of a round.
*/

mod config;
pub mod builder;
pub mod election;
pub mod ledger;
pub mod lifecycle;
pub mod manual;
pub mod pairing;
pub mod store;
pub mod submission;

use log::{debug, info, warn};

use std::{
    collections::HashMap,
    ops::{Add, AddAssign},
};

pub use crate::config::*;

// **** Private structures ****

#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash)]
struct VoteCount(u64);

impl VoteCount {
    const EMPTY: VoteCount = VoteCount(0);
}

impl std::iter::Sum for VoteCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        VoteCount(iter.map(|vc| vc.0).sum())
    }
}

impl AddAssign for VoteCount {
    fn add_assign(&mut self, rhs: VoteCount) {
        self.0 += rhs.0;
    }
}

impl Add for VoteCount {
    type Output = VoteCount;
    fn add(self: VoteCount, rhs: VoteCount) -> VoteCount {
        VoteCount(self.0 + rhs.0)
    }
}

// One line of the ranking. All the white votes of a role are merged in a single line.
#[derive(Eq, PartialEq, Debug, Clone)]
struct Tallied {
    subject: TallySubject,
    count: VoteCount,
    is_white: bool,
}

/// The rule that applies to a role with the given number of real contestants.
pub fn threshold_rule(num_real_contestants: usize) -> ThresholdRule {
    if num_real_contestants <= 2 {
        ThresholdRule::Qualified
    } else {
        ThresholdRule::Majority
    }
}

/// The minimum number of votes to win a seat. Never less than 1.
///
/// ```
/// use round_voting::{votes_needed, ThresholdRule};
///
/// assert_eq!(votes_needed(ThresholdRule::Qualified, 10), 7);
/// assert_eq!(votes_needed(ThresholdRule::Majority, 11), 6);
/// assert_eq!(votes_needed(ThresholdRule::Majority, 0), 1);
/// ```
pub fn votes_needed(rule: ThresholdRule, participant_count: u64) -> u64 {
    let needed = match rule {
        // ceil(0.66 * n) without floating point
        ThresholdRule::Qualified => (66 * participant_count + 99) / 100,
        ThresholdRule::Majority => participant_count / 2 + 1,
    };
    needed.max(1)
}

fn compute_tally(role: &RoleConfig, votes: &[Vote]) -> Vec<Tallied> {
    let mut counts: HashMap<ContestantId, VoteCount> = role
        .contestants
        .iter()
        .map(|c| (c.id(), VoteCount::EMPTY))
        .collect();
    for v in votes.iter().filter(|v| v.role == role.role) {
        match counts.get_mut(&v.contestant) {
            Some(vc) => *vc += VoteCount(1),
            None => warn!(
                "compute_tally: role {:?}: ignoring vote for unknown {}",
                role.role, v.contestant
            ),
        }
    }

    let mut res: Vec<Tallied> = role
        .real_contestants()
        .map(|m| Tallied {
            subject: TallySubject::Member {
                id: m.id,
                display_name: m.display_member().name.clone(),
            },
            count: counts
                .get(&ContestantId::Member(m.id))
                .cloned()
                .unwrap_or(VoteCount::EMPTY),
            is_white: false,
        })
        .collect();
    if role.num_white_votes > 0 {
        let white: VoteCount = (0..role.num_white_votes)
            .filter_map(|idx| counts.get(&ContestantId::WhiteVote(idx)).cloned())
            .sum();
        res.push(Tallied {
            subject: TallySubject::WhiteVote,
            count: white,
            is_white: true,
        });
    }
    res
}

/// Computes the ranking and the winners of one role.
///
/// Arguments:
/// * `role` the definition of the role
/// * `votes` the votes recorded for the round. Votes for other roles are skipped.
/// * `participant_count` the denominator of the threshold and of the percentages
pub fn tally_role(role: &RoleConfig, votes: &[Vote], participant_count: u64) -> RoleTally {
    let mut ranking = compute_tally(role, votes);
    // Stable: equal counts keep the definition order, the white vote comes last.
    ranking.sort_by(|a, b| b.count.cmp(&a.count).then(a.is_white.cmp(&b.is_white)));

    let num_real = role.real_contestants().count();
    let rule = threshold_rule(num_real);
    let needed = VoteCount(votes_needed(rule, participant_count));
    debug!(
        "tally_role: role {:?}: {} real contestants, {:?}, {} needed out of {}",
        role.role, num_real, rule, needed.0, participant_count
    );

    // Sorted in descending order, so the contestants above the threshold form a prefix.
    let eligible = ranking.iter().take_while(|t| t.count >= needed).count();
    let num_seats = (role.num_winners as usize).min(eligible);

    let tie: Option<VoteCount> = match (
        num_seats.checked_sub(1).and_then(|i| ranking.get(i)),
        ranking.get(num_seats),
    ) {
        (Some(last_in), Some(first_out)) if last_in.count == first_out.count => Some(last_in.count),
        _ => None,
    };

    let mut entries: Vec<TallyEntry> = Vec::new();
    let mut elected: Vec<MemberId> = Vec::new();
    let mut unfilled_seats: u32 = 0;
    for (idx, t) in ranking.iter().enumerate() {
        let status = if Some(t.count) == tie {
            EntryStatus::Tied
        } else if idx < num_seats {
            match &t.subject {
                TallySubject::Member { id, .. } => {
                    elected.push(*id);
                    EntryStatus::Elected
                }
                TallySubject::WhiteVote => {
                    unfilled_seats += 1;
                    EntryStatus::SeatUnfilled
                }
            }
        } else {
            EntryStatus::NotElected
        };
        let percentage = if participant_count == 0 {
            0.0
        } else {
            (t.count.0 as f64) * 100.0 / (participant_count as f64)
        };
        entries.push(TallyEntry {
            subject: t.subject.clone(),
            count: t.count.0,
            percentage,
            passes_threshold: t.count >= needed,
            status,
        });
    }

    let tie_report = tie.map(|count| {
        let above = ranking.iter().filter(|t| t.count > count).count();
        TieReport {
            count: count.0,
            seats: (num_seats - above) as u32,
            contenders: ranking
                .iter()
                .filter(|t| t.count == count)
                .map(|t| t.subject.clone())
                .collect(),
        }
    });

    for e in entries.iter() {
        info!(
            "role {:?}: {:>5} {} -> {:?}",
            role.role,
            e.count,
            e.subject.label(),
            e.status
        );
    }
    if let Some(t) = tie_report.as_ref() {
        warn!(
            "role {:?}: tie at {} votes between {} contestants for {} seats",
            role.role,
            t.count,
            t.contenders.len(),
            t.seats
        );
    }

    RoleTally {
        role: role.role.clone(),
        threshold_rule: rule,
        participant_count,
        votes_needed: needed.0,
        num_winners: role.num_winners,
        entries,
        elected,
        unfilled_seats,
        tie: tie_report,
    }
}

/// Runs the tally for every role of a round.
///
/// This is a pure function: the caller decides which votes and which
/// participant count to use, and whether the round must be locked.
pub fn tally_round(round: &Round, votes: &[Vote], participant_count: u64) -> RoundTally {
    info!(
        "tally_round: {} '{}': {} votes, {} participants",
        round.id,
        round.name,
        votes.len(),
        participant_count
    );
    let roles = round
        .roles
        .iter()
        .map(|r| tally_role(r, votes, participant_count))
        .collect();
    RoundTally {
        round_id: round.id,
        round_name: round.name.clone(),
        participant_count,
        roles,
    }
}
