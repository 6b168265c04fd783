use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ensure;

pub use crate::config::*;

/// The definition of one role, before validation.
///
/// ```
/// use round_voting::builder::{RoleDraft, RoundDraft};
/// use round_voting::{Member, RoundId};
/// # use round_voting::VotingError;
///
/// let anna = Member::new(1, "Anna", "Turin");
/// let round = RoundDraft::new("Board")
///     .role(RoleDraft::new("President", &[anna]).white_votes(1))
///     .build(RoundId(1))?;
///
/// assert_eq!(round.roles[0].contestants.len(), 2);
/// # Ok::<(), VotingError>(())
/// ```
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoleDraft {
    pub role: String,
    pub candidates: Vec<Member>,
    #[serde(rename = "maxVotes", default = "one")]
    pub max_votes: u32,
    #[serde(rename = "numWhiteVotes", default)]
    pub num_white_votes: u32,
    #[serde(rename = "numWinners", default = "one")]
    pub num_winners: u32,
}

fn one() -> u32 {
    1
}

impl RoleDraft {
    pub fn new(role: &str, candidates: &[Member]) -> RoleDraft {
        RoleDraft {
            role: role.to_string(),
            candidates: candidates.to_vec(),
            max_votes: 1,
            num_white_votes: 0,
            num_winners: 1,
        }
    }

    pub fn max_votes(self, max_votes: u32) -> RoleDraft {
        RoleDraft { max_votes, ..self }
    }

    pub fn white_votes(self, num_white_votes: u32) -> RoleDraft {
        RoleDraft {
            num_white_votes,
            ..self
        }
    }

    pub fn winners(self, num_winners: u32) -> RoleDraft {
        RoleDraft {
            num_winners,
            ..self
        }
    }

    /// Validates the role and generates its white vote placeholders.
    ///
    /// The placeholders come after the real contestants, with indices `0..num_white_votes`.
    pub fn build(&self) -> VotingResult<RoleConfig> {
        let role = self.role.clone();
        ensure!(
            !self.candidates.is_empty(),
            InvalidRoundSnafu {
                problem: RoundProblem::NoContestants(role.clone())
            }
        );
        let mut seen: HashSet<MemberId> = HashSet::new();
        for m in self.candidates.iter() {
            ensure!(
                seen.insert(m.id),
                InvalidRoundSnafu {
                    problem: RoundProblem::DuplicateContestant {
                        role: role.clone(),
                        member: m.id,
                    }
                }
            );
        }
        ensure!(
            self.candidates.len() != 1 || self.num_white_votes >= 1,
            InvalidRoundSnafu {
                problem: RoundProblem::SingleContestantWithoutWhiteVote(role.clone())
            }
        );
        ensure!(
            self.num_winners >= 1,
            InvalidRoundSnafu {
                problem: RoundProblem::NoWinners(role.clone())
            }
        );
        ensure!(
            self.max_votes >= 1,
            InvalidRoundSnafu {
                problem: RoundProblem::NoSelections(role.clone())
            }
        );

        let mut contestants: Vec<Contestant> = self
            .candidates
            .iter()
            .map(|m| Contestant::Member(m.clone()))
            .collect();
        contestants.extend((0..self.num_white_votes).map(|index| Contestant::WhiteVote { index }));

        ensure!(
            self.num_winners as usize <= contestants.len(),
            InvalidRoundSnafu {
                problem: RoundProblem::TooManyWinners {
                    role: role.clone(),
                    winners: self.num_winners,
                    contestants: contestants.len(),
                }
            }
        );

        debug!(
            "RoleDraft::build: role {:?}: {} contestants, {} white votes",
            role,
            self.candidates.len(),
            self.num_white_votes
        );
        Ok(RoleConfig {
            role,
            contestants,
            max_votes: self.max_votes,
            num_white_votes: self.num_white_votes,
            num_winners: self.num_winners,
        })
    }
}

/// The editable part of a round: name, roles and who may vote.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundDraft {
    pub name: String,
    pub roles: Vec<RoleDraft>,
    #[serde(rename = "allowedMembers", default)]
    pub allowed_members: Vec<Member>,
}

impl RoundDraft {
    pub fn new(name: &str) -> RoundDraft {
        RoundDraft {
            name: name.to_string(),
            roles: Vec::new(),
            allowed_members: Vec::new(),
        }
    }

    pub fn role(mut self, role: RoleDraft) -> RoundDraft {
        self.roles.push(role);
        self
    }

    pub fn allowed_members(mut self, members: &[Member]) -> RoundDraft {
        self.allowed_members = members.to_vec();
        self
    }

    /// Builds a fresh, never started and unlocked round.
    pub fn build(&self, id: RoundId) -> VotingResult<Round> {
        ensure!(
            !self.roles.is_empty(),
            InvalidRoundSnafu {
                problem: RoundProblem::NoRoles
            }
        );
        let mut names: HashSet<&str> = HashSet::new();
        let mut roles: Vec<RoleConfig> = Vec::new();
        for rd in self.roles.iter() {
            ensure!(
                names.insert(rd.role.as_str()),
                InvalidRoundSnafu {
                    problem: RoundProblem::DuplicateRole(rd.role.clone())
                }
            );
            roles.push(rd.build()?);
        }
        Ok(Round {
            id,
            name: self.name.clone(),
            roles,
            allowed_members: self.allowed_members.clone(),
            start_time: None,
            end_time: None,
            is_locked: false,
        })
    }
}
