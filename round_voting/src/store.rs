//! Persistence for members, rounds, votes and voting statuses.
//!
//! Every operation that must be exactly-once (ballot commit, lock, unlock) is a
//! single call on the store, so an implementation only needs to make each call atomic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::RwLock;
use snafu::{ensure, OptionExt, Snafu};

use crate::config::*;

#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("unknown {round_id}"))]
    UnknownRound { round_id: RoundId },

    #[snafu(display("{member_id} already holds a voting status in {round_id}"))]
    DuplicateVotingStatus {
        round_id: RoundId,
        member_id: MemberId,
    },

    #[snafu(display("{round_id} is locked"))]
    RoundIsLocked { round_id: RoundId },

    #[snafu(display("{round_id}: lock flag is already {locked}"))]
    LockUnchanged { round_id: RoundId, locked: bool },

    #[snafu(display("{round_id} was started"))]
    DefinitionStarted { round_id: RoundId },

    #[snafu(display("{round_id} has {count} voting statuses"))]
    DefinitionHasBallots { round_id: RoundId, count: usize },
}

/// The persistence collaborator.
pub trait ElectionStore: Send + Sync {
    fn member(&self, id: MemberId) -> Option<Member>;
    fn members(&self) -> Vec<Member>;
    fn put_member(&self, member: Member);

    fn next_round_id(&self) -> RoundId;
    fn round(&self, id: RoundId) -> Option<Round>;
    fn rounds(&self) -> Vec<Round>;
    fn insert_round(&self, round: Round);

    /// Replaces name, roles and allowed members, only while the round was never
    /// started, is unlocked and has no voting status.
    fn replace_definition(&self, round: Round) -> Result<Round, StoreError>;

    /// Stamps the start time if it is not set yet.
    fn mark_started(&self, id: RoundId, at: DateTime<Utc>) -> Result<Round, StoreError>;

    /// Flips the lock flag, failing if it already has the requested value.
    ///
    /// Locking stamps the end time. Unlocking clears it and deletes every vote and
    /// voting status of the round in the same step.
    fn set_locked(
        &self,
        id: RoundId,
        locked: bool,
        at: DateTime<Utc>,
    ) -> Result<Round, StoreError>;

    /// Removes the round with its votes and statuses. Returns the removed round.
    fn remove_round(&self, id: RoundId) -> Option<Round>;

    /// Appends a ballot: the votes and the voting status are committed together, or not at all.
    ///
    /// Fails if the round is locked at write time, or if the member already holds
    /// a status for the round.
    fn commit_ballot(&self, status: VotingStatus, votes: Vec<Vote>) -> Result<(), StoreError>;

    fn votes(&self, round_id: RoundId) -> Vec<Vote>;
    fn voting_statuses(&self, round_id: RoundId) -> Vec<VotingStatus>;
    fn has_voted(&self, round_id: RoundId, member_id: MemberId) -> bool;
}

#[derive(Default)]
struct Tables {
    members: BTreeMap<MemberId, Member>,
    rounds: BTreeMap<RoundId, Round>,
    votes: BTreeMap<RoundId, Vec<Vote>>,
    // The key is the uniqueness constraint on (round, member).
    statuses: BTreeMap<(RoundId, MemberId), VotingStatus>,
    last_round_id: u64,
}

impl Tables {
    fn status_count(&self, round_id: RoundId) -> usize {
        self.statuses
            .range((round_id, MemberId(0))..=(round_id, MemberId(u64::MAX)))
            .count()
    }

    fn clear_ballots(&mut self, round_id: RoundId) -> usize {
        let removed_votes = self.votes.remove(&round_id).map(|v| v.len()).unwrap_or(0);
        let before = self.statuses.len();
        self.statuses.retain(|(rid, _), _| *rid != round_id);
        let removed_statuses = before - self.statuses.len();
        debug!(
            "clear_ballots: {}: removed {} votes and {} voting statuses",
            round_id, removed_votes, removed_statuses
        );
        removed_statuses
    }
}

/// An in-process store. All tables sit behind one lock, which makes every call atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl ElectionStore for MemoryStore {
    fn member(&self, id: MemberId) -> Option<Member> {
        self.tables.read().members.get(&id).cloned()
    }

    fn members(&self) -> Vec<Member> {
        self.tables.read().members.values().cloned().collect()
    }

    fn put_member(&self, member: Member) {
        self.tables.write().members.insert(member.id, member);
    }

    fn next_round_id(&self) -> RoundId {
        let mut t = self.tables.write();
        t.last_round_id += 1;
        RoundId(t.last_round_id)
    }

    fn round(&self, id: RoundId) -> Option<Round> {
        self.tables.read().rounds.get(&id).cloned()
    }

    fn rounds(&self) -> Vec<Round> {
        self.tables.read().rounds.values().cloned().collect()
    }

    fn insert_round(&self, round: Round) {
        let mut t = self.tables.write();
        t.last_round_id = t.last_round_id.max(round.id.0);
        t.rounds.insert(round.id, round);
    }

    fn replace_definition(&self, round: Round) -> Result<Round, StoreError> {
        let round_id = round.id;
        let mut t = self.tables.write();
        let count = t.status_count(round_id);
        let current = t.rounds.get_mut(&round_id).context(UnknownRoundSnafu { round_id })?;
        ensure!(
            current.start_time.is_none(),
            DefinitionStartedSnafu { round_id }
        );
        ensure!(!current.is_locked, RoundIsLockedSnafu { round_id });
        ensure!(count == 0, DefinitionHasBallotsSnafu { round_id, count });
        current.name = round.name;
        current.roles = round.roles;
        current.allowed_members = round.allowed_members;
        Ok(current.clone())
    }

    fn mark_started(&self, id: RoundId, at: DateTime<Utc>) -> Result<Round, StoreError> {
        let mut t = self.tables.write();
        let round = t
            .rounds
            .get_mut(&id)
            .context(UnknownRoundSnafu { round_id: id })?;
        if round.start_time.is_none() {
            round.start_time = Some(at);
        }
        Ok(round.clone())
    }

    fn set_locked(
        &self,
        id: RoundId,
        locked: bool,
        at: DateTime<Utc>,
    ) -> Result<Round, StoreError> {
        let mut t = self.tables.write();
        let round = t
            .rounds
            .get_mut(&id)
            .context(UnknownRoundSnafu { round_id: id })?;
        ensure!(
            round.is_locked != locked,
            LockUnchangedSnafu {
                round_id: id,
                locked
            }
        );
        round.is_locked = locked;
        round.end_time = if locked { Some(at) } else { None };
        let res = round.clone();
        if !locked {
            t.clear_ballots(id);
        }
        Ok(res)
    }

    fn remove_round(&self, id: RoundId) -> Option<Round> {
        let mut t = self.tables.write();
        let removed = t.rounds.remove(&id);
        if removed.is_some() {
            t.clear_ballots(id);
        }
        removed
    }

    fn commit_ballot(&self, status: VotingStatus, votes: Vec<Vote>) -> Result<(), StoreError> {
        let round_id = status.round_id;
        let member_id = status.member_id;
        let mut t = self.tables.write();
        let round = t.rounds.get(&round_id).context(UnknownRoundSnafu { round_id })?;
        ensure!(!round.is_locked, RoundIsLockedSnafu { round_id });
        ensure!(
            !t.statuses.contains_key(&(round_id, member_id)),
            DuplicateVotingStatusSnafu {
                round_id,
                member_id
            }
        );
        t.votes.entry(round_id).or_default().extend(votes);
        t.statuses.insert((round_id, member_id), status);
        Ok(())
    }

    fn votes(&self, round_id: RoundId) -> Vec<Vote> {
        self.tables
            .read()
            .votes
            .get(&round_id)
            .cloned()
            .unwrap_or_default()
    }

    fn voting_statuses(&self, round_id: RoundId) -> Vec<VotingStatus> {
        self.tables
            .read()
            .statuses
            .range((round_id, MemberId(0))..=(round_id, MemberId(u64::MAX)))
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn has_voted(&self, round_id: RoundId, member_id: MemberId) -> bool {
        self.tables
            .read()
            .statuses
            .contains_key(&(round_id, member_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{RoleDraft, RoundDraft};

    fn store_with_round() -> MemoryStore {
        let store = MemoryStore::new();
        let ms = vec![Member::new(1, "A", "X"), Member::new(2, "B", "X")];
        let round = RoundDraft::new("R")
            .role(RoleDraft::new("Chair", &ms))
            .build(store.next_round_id())
            .unwrap();
        store.insert_round(round);
        store
    }

    fn status(member: u64) -> VotingStatus {
        VotingStatus {
            round_id: RoundId(1),
            member_id: MemberId(member),
            voted_at: Utc::now(),
            signature: String::new(),
        }
    }

    fn vote() -> Vote {
        Vote {
            round_id: RoundId(1),
            role: "Chair".to_string(),
            contestant: ContestantId::Member(MemberId(1)),
        }
    }

    #[test]
    fn uniqueness_on_round_and_member() {
        let store = store_with_round();
        store.commit_ballot(status(7), vec![vote()]).unwrap();
        let res = store.commit_ballot(status(7), vec![vote()]);
        assert_eq!(
            res,
            Err(StoreError::DuplicateVotingStatus {
                round_id: RoundId(1),
                member_id: MemberId(7)
            })
        );
        assert_eq!(store.votes(RoundId(1)).len(), 1);
        assert_eq!(store.voting_statuses(RoundId(1)).len(), 1);
    }

    #[test]
    fn unlock_cascades() {
        let store = store_with_round();
        store.commit_ballot(status(3), vec![vote()]).unwrap();
        let locked = store.set_locked(RoundId(1), true, Utc::now()).unwrap();
        assert!(locked.end_time.is_some());
        assert!(store.commit_ballot(status(4), vec![vote()]).is_err());
        assert_eq!(store.votes(RoundId(1)).len(), 1);

        assert!(store.set_locked(RoundId(1), true, Utc::now()).is_err());
        let unlocked = store.set_locked(RoundId(1), false, Utc::now()).unwrap();
        assert!(unlocked.end_time.is_none());
        assert!(store.votes(RoundId(1)).is_empty());
        assert!(!store.has_voted(RoundId(1), MemberId(3)));
    }

    #[test]
    fn definition_frozen_after_ballots() {
        let store = store_with_round();
        let round = store.round(RoundId(1)).unwrap();
        store.commit_ballot(status(3), vec![vote()]).unwrap();
        let res = store.replace_definition(round);
        assert_eq!(
            res,
            Err(StoreError::DefinitionHasBallots {
                round_id: RoundId(1),
                count: 1
            })
        );
    }
}
