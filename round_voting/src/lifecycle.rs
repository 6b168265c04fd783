use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;

use crate::builder::RoundDraft;
use crate::config::*;
use crate::ledger::{store_error, VoteLedger};
use crate::store::ElectionStore;

/// The round currently open for voting, shared by every stand.
///
/// Each change bumps the version so that a terminal coming back can tell if
/// what it holds is stale.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActiveRound {
    #[serde(rename = "roundId")]
    pub round_id: Option<RoundId>,
    pub version: u64,
}

/// Owns the state transitions of rounds.
pub struct RoundManager {
    store: Arc<dyn ElectionStore>,
    ledger: VoteLedger,
    active: RwLock<ActiveRound>,
}

impl RoundManager {
    pub fn new(store: Arc<dyn ElectionStore>, ledger: VoteLedger) -> RoundManager {
        RoundManager {
            store,
            ledger,
            active: RwLock::new(ActiveRound::default()),
        }
    }

    pub fn round(&self, id: RoundId) -> VotingResult<Round> {
        self.store.round(id).context(NotFoundSnafu {
            entity: Entity::Round(id),
        })
    }

    pub fn rounds(&self) -> Vec<Round> {
        self.store.rounds()
    }

    pub fn create_round(&self, draft: &RoundDraft) -> VotingResult<Round> {
        let round = draft.build(self.store.next_round_id())?;
        info!(
            "create_round: {} '{}' with {} roles",
            round.id,
            round.name,
            round.roles.len()
        );
        self.store.insert_round(round.clone());
        Ok(round)
    }

    /// Replaces the definition of a round that never started and has no ballot.
    pub fn edit_round(&self, id: RoundId, draft: &RoundDraft) -> VotingResult<Round> {
        let current = self.round(id)?;
        snafu::ensure!(
            current.start_time.is_none(),
            RejectedSnafu {
                reason: Rejection::RoundStarted
            }
        );
        snafu::ensure!(
            !current.is_locked,
            RejectedSnafu {
                reason: Rejection::RoundLocked
            }
        );
        snafu::ensure!(
            self.ledger.voted_members(id).is_empty(),
            RejectedSnafu {
                reason: Rejection::BallotsRecorded
            }
        );
        let edited = draft.build(id)?;
        // The store checks the same conditions again under its own lock.
        let res = self
            .store
            .replace_definition(edited)
            .map_err(store_error)?;
        info!("edit_round: {} is now '{}'", id, res.name);
        Ok(res)
    }

    /// Deletes a round, its votes and its statuses. Returns the round and, if it
    /// was the active one, the cleared pointer as it was left.
    pub fn delete_round(&self, id: RoundId) -> VotingResult<(Round, Option<ActiveRound>)> {
        let removed = self.store.remove_round(id).context(NotFoundSnafu {
            entity: Entity::Round(id),
        })?;
        let mut active = self.active.write();
        let cleared = if active.round_id == Some(id) {
            active.round_id = None;
            active.version += 1;
            Some(*active)
        } else {
            None
        };
        info!("delete_round: {} deleted (active: {})", id, cleared.is_some());
        Ok((removed, cleared))
    }

    /// Points the election at a round, or at nothing. Starts the round if needed.
    pub fn activate(&self, id: Option<RoundId>) -> VotingResult<(ActiveRound, Option<Round>)> {
        let round = match id {
            Some(rid) => Some(
                self.store
                    .mark_started(rid, Utc::now())
                    .map_err(store_error)?,
            ),
            None => None,
        };
        if let Some(r) = round.as_ref() {
            if r.is_locked {
                warn!("activate: {} is locked, stands will not accept ballots", r.id);
            }
        }
        let mut active = self.active.write();
        active.round_id = id;
        active.version += 1;
        info!(
            "activate: active round is now {:?} (version {})",
            active.round_id, active.version
        );
        Ok((*active, round))
    }

    pub fn active(&self) -> ActiveRound {
        *self.active.read()
    }

    /// Bumps the version of the pointer if it designates this round.
    pub(crate) fn touch(&self, id: RoundId) -> Option<ActiveRound> {
        let mut active = self.active.write();
        if active.round_id == Some(id) {
            active.version += 1;
            Some(*active)
        } else {
            None
        }
    }

    /// Freezes a round. Fails if it is already locked.
    pub fn lock(&self, id: RoundId) -> VotingResult<Round> {
        let round = self
            .store
            .set_locked(id, true, Utc::now())
            .map_err(store_error)?;
        info!("lock: {} locked at {:?}", id, round.end_time);
        Ok(round)
    }

    /// Reopens a locked round. All the ballots of the round are deleted.
    pub fn unlock(&self, id: RoundId) -> VotingResult<Round> {
        let round = self
            .store
            .set_locked(id, false, Utc::now())
            .map_err(store_error)?;
        info!("unlock: {} reopened, ballots reset", id);
        Ok(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RoleDraft;
    use crate::store::MemoryStore;

    fn manager() -> (RoundManager, VoteLedger) {
        let store: Arc<dyn ElectionStore> = Arc::new(MemoryStore::new());
        let ledger = VoteLedger::new(store.clone());
        (RoundManager::new(store, ledger.clone()), ledger)
    }

    fn draft(name: &str) -> RoundDraft {
        let ms = vec![Member::new(1, "A", "X"), Member::new(2, "B", "X")];
        RoundDraft::new(name).role(RoleDraft::new("Chair", &ms))
    }

    #[test]
    fn lifecycle_transitions() {
        let (rm, ledger) = manager();
        let round = rm.create_round(&draft("R1")).unwrap();
        assert_eq!(round.state(), RoundState::Draft);

        let (active, started) = rm.activate(Some(round.id)).unwrap();
        assert_eq!(active.round_id, Some(round.id));
        assert_eq!(active.version, 1);
        assert_eq!(started.unwrap().state(), RoundState::Active);

        ledger
            .record_ballot(round.id, MemberId(1), vec![], "", Utc::now())
            .unwrap();

        let locked = rm.lock(round.id).unwrap();
        assert_eq!(locked.state(), RoundState::Locked);
        assert!(locked.end_time.is_some());
        assert_eq!(
            rm.lock(round.id).unwrap_err().rejection(),
            Some(Rejection::AlreadyLocked)
        );
        assert_eq!(ledger.voted_members(round.id).len(), 1);

        let reopened = rm.unlock(round.id).unwrap();
        assert_eq!(reopened.state(), RoundState::Active);
        assert!(reopened.end_time.is_none());
        assert!(ledger.voted_members(round.id).is_empty());
        assert_eq!(
            rm.unlock(round.id).unwrap_err().rejection(),
            Some(Rejection::NotLocked)
        );
    }

    #[test]
    fn unknown_round() {
        let (rm, _) = manager();
        assert_eq!(
            rm.lock(RoundId(9)),
            Err(VotingError::NotFound {
                entity: Entity::Round(RoundId(9))
            })
        );
        assert!(rm.unlock(RoundId(9)).is_err());
        assert!(rm.activate(Some(RoundId(9))).is_err());
        assert!(rm.delete_round(RoundId(9)).is_err());
    }

    #[test]
    fn edits_only_before_start() {
        let (rm, _) = manager();
        let round = rm.create_round(&draft("R1")).unwrap();
        let edited = rm.edit_round(round.id, &draft("Renamed")).unwrap();
        assert_eq!(edited.name, "Renamed");

        rm.activate(Some(round.id)).unwrap();
        assert_eq!(
            rm.edit_round(round.id, &draft("Again")).unwrap_err().rejection(),
            Some(Rejection::RoundStarted)
        );
        assert_eq!(rm.round(round.id).unwrap().name, "Renamed");
    }

    #[test]
    fn delete_clears_pointer() {
        let (rm, ledger) = manager();
        let round = rm.create_round(&draft("R1")).unwrap();
        rm.activate(Some(round.id)).unwrap();
        ledger
            .record_ballot(round.id, MemberId(2), vec![], "", Utc::now())
            .unwrap();
        let (_, cleared) = rm.delete_round(round.id).unwrap();
        assert_eq!(
            cleared,
            Some(ActiveRound {
                round_id: None,
                version: 2
            })
        );
        assert_eq!(rm.active(), cleared.unwrap());

        let other = rm.create_round(&draft("R2")).unwrap();
        let (_, cleared) = rm.delete_round(other.id).unwrap();
        assert!(cleared.is_none());
        assert_eq!(rm.active().version, 2);
        assert!(ledger.voted_members(round.id).is_empty());
    }
}
