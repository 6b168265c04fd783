//! The operations offered to the election manager, the stands and the admins.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};

use crate::builder::RoundDraft;
use crate::config::*;
use crate::ledger::VoteLedger;
use crate::lifecycle::{ActiveRound, RoundManager};
use crate::pairing::{LivenessMonitor, StandCoordinator, StandStatus, StandTerminal, TerminalAction};
use crate::store::{ElectionStore, MemoryStore};
use crate::submission::{BallotRequest, Receipt, VoteProcessor};
use crate::tally_round;

/// Outcome of a change of the active round.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadAck {
    pub active: ActiveRound,
    /// The terminals the change was sent to. Zero is not an error.
    pub receivers: usize,
}

/// Outcome of a pairing.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairingAck {
    pub sequence: u64,
    pub receivers: usize,
}

pub struct Election {
    settings: ElectionSettings,
    store: Arc<dyn ElectionStore>,
    ledger: VoteLedger,
    rounds: Arc<RoundManager>,
    stands: Arc<StandCoordinator>,
    processor: VoteProcessor,
}

fn require_manager(caller: Caller, action: &'static str) -> VotingResult<()> {
    ensure!(
        caller == Caller::ElectionManager,
        UnauthorizedSnafu { caller, action }
    );
    Ok(())
}

fn require_organizer(caller: Caller, action: &'static str) -> VotingResult<()> {
    ensure!(
        matches!(caller, Caller::ElectionManager | Caller::Admin),
        UnauthorizedSnafu { caller, action }
    );
    Ok(())
}

fn require_stand(caller: Caller, stand_id: StandId, action: &'static str) -> VotingResult<()> {
    ensure!(
        caller == Caller::VotingStand(stand_id),
        UnauthorizedSnafu { caller, action }
    );
    Ok(())
}

impl Election {
    /// An election over an in-memory store.
    pub fn new(settings: ElectionSettings) -> Election {
        Election::with_store(settings, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(settings: ElectionSettings, store: Arc<dyn ElectionStore>) -> Election {
        info!("Election: settings {:?}", settings);
        let ledger = VoteLedger::new(store.clone());
        let rounds = Arc::new(RoundManager::new(store.clone(), ledger.clone()));
        let stands = Arc::new(StandCoordinator::new(settings.channel_capacity));
        let processor = VoteProcessor::new(
            store.clone(),
            rounds.clone(),
            ledger.clone(),
            stands.clone(),
            settings.require_presence,
        );
        Election {
            settings,
            store,
            ledger,
            rounds,
            stands,
            processor,
        }
    }

    pub fn settings(&self) -> &ElectionSettings {
        &self.settings
    }

    // ******** Members ********

    pub fn register_member(&self, caller: Caller, member: Member) -> VotingResult<Member> {
        require_organizer(caller, "register members")?;
        debug!("register_member: {} {:?}", member.id, member.name);
        self.store.put_member(member.clone());
        Ok(member)
    }

    pub fn member(&self, id: MemberId) -> VotingResult<Member> {
        self.store.member(id).context(NotFoundSnafu {
            entity: Entity::Member(id),
        })
    }

    pub fn members(&self) -> Vec<Member> {
        self.store.members()
    }

    pub fn set_presence(
        &self,
        caller: Caller,
        member_id: MemberId,
        is_present: bool,
    ) -> VotingResult<Member> {
        require_organizer(caller, "record presence")?;
        let mut member = self.member(member_id)?;
        member.is_present = is_present;
        self.store.put_member(member.clone());
        info!("set_presence: {} present: {}", member_id, is_present);
        Ok(member)
    }

    /// Records that another person stands in for the member, or removes the substitute.
    ///
    /// Ballots stay attached to the original member.
    pub fn substitute_member(
        &self,
        caller: Caller,
        member_id: MemberId,
        substitute: Option<Member>,
    ) -> VotingResult<Member> {
        require_organizer(caller, "substitute members")?;
        let mut member = self.member(member_id)?;
        member.replaced_by = substitute.map(Box::new);
        self.store.put_member(member.clone());
        info!(
            "substitute_member: {} shown as {:?}",
            member_id,
            member.display_member().name
        );
        Ok(member)
    }

    // ******** Rounds ********

    pub fn round(&self, id: RoundId) -> VotingResult<Round> {
        self.rounds.round(id)
    }

    pub fn rounds(&self) -> Vec<Round> {
        self.rounds.rounds()
    }

    pub fn active_round(&self) -> ActiveRound {
        self.rounds.active()
    }

    pub fn create_round(&self, caller: Caller, draft: &RoundDraft) -> VotingResult<Round> {
        require_organizer(caller, "create rounds")?;
        self.rounds.create_round(draft)
    }

    pub fn edit_round(&self, caller: Caller, id: RoundId, draft: &RoundDraft) -> VotingResult<Round> {
        require_organizer(caller, "edit rounds")?;
        self.rounds.edit_round(id, draft)
    }

    /// Deletes a round with all its ballots. The stands stop voting if it was active.
    pub fn delete_round(&self, caller: Caller, id: RoundId) -> VotingResult<Round> {
        require_organizer(caller, "delete rounds")?;
        let (round, cleared) = self.rounds.delete_round(id)?;
        if let Some(active) = cleared {
            self.stands.load_round(None, active.version);
        }
        Ok(round)
    }

    /// Makes a round the active one (or none) and sends it to every stand.
    pub fn load_round(&self, caller: Caller, id: Option<RoundId>) -> VotingResult<LoadAck> {
        require_manager(caller, "load rounds")?;
        let (active, round) = self.rounds.activate(id)?;
        let receivers = self.stands.load_round(round, active.version);
        Ok(LoadAck { active, receivers })
    }

    pub fn lock_round(&self, caller: Caller, id: RoundId) -> VotingResult<Round> {
        require_manager(caller, "lock rounds")?;
        let round = self.rounds.lock(id)?;
        self.refresh_active(&round);
        Ok(round)
    }

    /// Reopens a locked round. Every ballot of the round is deleted.
    pub fn unlock_round(&self, caller: Caller, id: RoundId) -> VotingResult<Round> {
        require_manager(caller, "unlock rounds")?;
        let round = self.rounds.unlock(id)?;
        self.refresh_active(&round);
        Ok(round)
    }

    // The stands hold a copy of the active round: resend it when its lock flag changes.
    fn refresh_active(&self, round: &Round) {
        if let Some(active) = self.rounds.touch(round.id) {
            self.stands.load_round(Some(round.clone()), active.version);
        }
    }

    // ******** Stands ********

    /// Pairs a member with a stand for the active round.
    pub fn load_member(
        &self,
        caller: Caller,
        member_id: MemberId,
        stand_id: StandId,
    ) -> VotingResult<PairingAck> {
        require_manager(caller, "pair members")?;
        let member = self.member(member_id)?;
        let round_id = self.rounds.active().round_id.context(RejectedSnafu {
            reason: Rejection::NoActiveRound,
        })?;
        if self.ledger.has_voted(round_id, member_id) {
            warn!("load_member: {} already voted in {}", member_id, round_id);
            return RejectedSnafu {
                reason: Rejection::AlreadyVoted,
            }
            .fail();
        }
        let (sequence, receivers) = self.stands.load_member(member, stand_id);
        Ok(PairingAck {
            sequence,
            receivers,
        })
    }

    pub fn acknowledge(&self, caller: Caller, stand_id: StandId, sequence: u64) -> VotingResult<()> {
        require_stand(caller, stand_id, "acknowledge for this stand")?;
        self.stands.acknowledge(stand_id, sequence)
    }

    pub fn clear_stand(&self, caller: Caller, stand_id: StandId) -> VotingResult<Option<Member>> {
        require_manager(caller, "clear stands")?;
        Ok(self.stands.clear_stand(stand_id))
    }

    pub fn stand_status(&self, stand_id: StandId) -> StandStatus {
        self.stands.stand_status(stand_id)
    }

    pub fn stands(&self) -> Vec<(StandId, StandStatus)> {
        self.stands.stands()
    }

    pub fn connect_terminal(&self, caller: Caller, stand_id: StandId) -> VotingResult<StandTerminal> {
        require_stand(caller, stand_id, "connect as this stand")?;
        Ok(self.stands.connect(stand_id))
    }

    /// Brings a terminal back in line after it missed events.
    pub fn sync_terminal(
        &self,
        caller: Caller,
        terminal: &mut StandTerminal,
    ) -> VotingResult<TerminalAction> {
        let stand_id = terminal.stand_id();
        require_stand(caller, stand_id, "synchronize this stand")?;
        let action = terminal.resync(self.stands.snapshot(stand_id));
        self.stands.reconnected(stand_id);
        Ok(action)
    }

    /// A heartbeat monitor for a stand, configured with the settings of the election.
    ///
    /// A pending check ends as soon as the stand connects or resynchronizes.
    pub fn liveness_monitor(&self, stand_id: StandId) -> LivenessMonitor {
        self.stands.liveness_monitor(stand_id, self.settings.heartbeat)
    }

    // ******** Ballots and results ********

    pub fn submit_vote(&self, caller: Caller, request: &BallotRequest) -> VotingResult<Receipt> {
        require_stand(caller, request.stand_id, "submit ballots for this stand")?;
        self.processor.submit_vote(request)
    }

    pub fn get_voted_members(&self, round_id: RoundId) -> VotingResult<Vec<VotingStatus>> {
        self.rounds.round(round_id)?;
        Ok(self.ledger.voted_members(round_id))
    }

    pub fn participant_count(&self, round_id: RoundId) -> VotingResult<u64> {
        let round = self.rounds.round(round_id)?;
        Ok(self
            .ledger
            .participant_count(&round, self.settings.participant_count))
    }

    /// The results of a round. Only available once locked, unless provisional
    /// results are allowed by the settings.
    pub fn get_results(&self, caller: Caller, round_id: RoundId) -> VotingResult<RoundTally> {
        require_organizer(caller, "read results")?;
        let round = self.rounds.round(round_id)?;
        ensure!(
            round.is_locked || self.settings.allow_provisional_results,
            RejectedSnafu {
                reason: Rejection::ResultsNotFinal
            }
        );
        let participants = self
            .ledger
            .participant_count(&round, self.settings.participant_count);
        let votes = self.ledger.votes(round_id);
        Ok(tally_round(&round, &votes, participants))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RoleDraft;
    use crate::pairing::LinkState;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const MANAGER: Caller = Caller::ElectionManager;

    fn election(n: u64) -> Election {
        let _ = env_logger::builder().is_test(true).try_init();
        let e = Election::new(ElectionSettings::DEFAULT_SETTINGS);
        for i in 1..=n {
            e.register_member(Caller::Admin, Member::new(i, &format!("M{}", i), "Turin"))
                .unwrap();
        }
        e
    }

    fn chair_round(e: &Election) -> Round {
        let ms = vec![e.member(MemberId(1)).unwrap(), e.member(MemberId(2)).unwrap()];
        e.create_round(
            MANAGER,
            &RoundDraft::new("Chair election").role(RoleDraft::new("Chair", &ms).white_votes(1)),
        )
        .unwrap()
    }

    fn ballot(round: RoundId, member: u64, stand: u32, choice: ContestantId) -> BallotRequest {
        let mut votes_by_role = BTreeMap::new();
        votes_by_role.insert("Chair".to_string(), vec![choice]);
        BallotRequest {
            round_id: round,
            member_id: MemberId(member),
            stand_id: StandId(stand),
            votes_by_role,
            signature: format!("signature of {}", member),
        }
    }

    fn stand(id: u32) -> Caller {
        Caller::VotingStand(StandId(id))
    }

    #[test]
    fn at_most_once_sequential() {
        let e = election(4);
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        let req = ballot(round.id, 3, 1, ContestantId::Member(MemberId(1)));
        e.submit_vote(stand(1), &req).unwrap();
        let again = e.submit_vote(stand(1), &req).unwrap_err();
        assert_eq!(again.rejection(), Some(Rejection::AlreadyVoted));
        assert_eq!(e.get_voted_members(round.id).unwrap().len(), 1);
    }

    #[test]
    fn at_most_once_concurrent() {
        let e = election(4);
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        let results: Vec<VotingResult<Receipt>> = std::thread::scope(|s| {
            let handles: Vec<_> = (1..=8u32)
                .map(|sid| {
                    let e = &e;
                    s.spawn(move || {
                        let req = ballot(round.id, 3, sid, ContestantId::Member(MemberId(2)));
                        e.submit_vote(stand(sid), &req)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for r in results.iter().filter(|r| r.is_err()) {
            assert_eq!(
                r.as_ref().unwrap_err().rejection(),
                Some(Rejection::AlreadyVoted)
            );
        }
        e.lock_round(MANAGER, round.id).unwrap();
        let tally = e.get_results(MANAGER, round.id).unwrap();
        let total: u64 = tally.roles[0].entries.iter().map(|en| en.count).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn concurrent_members_are_independent() {
        let e = election(20);
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        std::thread::scope(|s| {
            for member in 3..=20u64 {
                let e = &e;
                s.spawn(move || {
                    let sid = member as u32;
                    let req = ballot(round.id, member, sid, ContestantId::Member(MemberId(1)));
                    e.submit_vote(stand(sid), &req).unwrap();
                });
            }
        });
        assert_eq!(e.get_voted_members(round.id).unwrap().len(), 18);
    }

    #[test]
    fn lock_freezes_and_unlock_resets() {
        let e = election(10);
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        for member in 1..=8 {
            let req = ballot(round.id, member, 1, ContestantId::Member(MemberId(1)));
            e.submit_vote(stand(1), &req).unwrap();
        }
        assert_eq!(
            e.get_results(MANAGER, round.id).unwrap_err().rejection(),
            Some(Rejection::ResultsNotFinal)
        );

        e.lock_round(MANAGER, round.id).unwrap();
        let late = ballot(round.id, 9, 1, ContestantId::Member(MemberId(2)));
        assert_eq!(
            e.submit_vote(stand(1), &late).unwrap_err().rejection(),
            Some(Rejection::RoundLocked)
        );
        let tally = e.get_results(MANAGER, round.id).unwrap();
        let chair = tally.role("Chair").unwrap();
        assert_eq!(tally.participant_count, 10);
        assert_eq!(chair.votes_needed, 7);
        assert_eq!(chair.elected, vec![MemberId(1)]);

        e.unlock_round(MANAGER, round.id).unwrap();
        assert!(e.get_voted_members(round.id).unwrap().is_empty());
        e.lock_round(MANAGER, round.id).unwrap();
        let tally = e.get_results(MANAGER, round.id).unwrap();
        assert!(tally.roles[0].entries.iter().all(|en| en.count == 0));
        assert!(tally.roles[0].elected.is_empty());
    }

    #[test]
    fn participant_count_sources() {
        let settings = ElectionSettings {
            participant_count: ParticipantCountSource::VotedMembers,
            allow_provisional_results: true,
            ..ElectionSettings::DEFAULT_SETTINGS
        };
        let e = Election::new(settings);
        for i in 1..=10 {
            e.register_member(MANAGER, Member::new(i, "M", "Turin")).unwrap();
        }
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        for member in 1..=3 {
            let req = ballot(round.id, member, 1, ContestantId::Member(MemberId(2)));
            e.submit_vote(stand(1), &req).unwrap();
        }
        assert_eq!(e.participant_count(round.id).unwrap(), 3);
        let tally = e.get_results(Caller::Admin, round.id).unwrap();
        assert_eq!(tally.roles[0].votes_needed, 2);
        assert_eq!(tally.roles[0].elected, vec![MemberId(2)]);
    }

    #[test]
    fn pairing_end_to_end() {
        let e = election(5);
        let round = chair_round(&e);
        let mut terminal = e.connect_terminal(stand(2), StandId(2)).unwrap();
        let mut other = e.connect_terminal(stand(3), StandId(3)).unwrap();

        assert_eq!(
            e.load_member(MANAGER, MemberId(4), StandId(2)).unwrap_err().rejection(),
            Some(Rejection::NoActiveRound)
        );
        let ack = e.load_round(MANAGER, Some(round.id)).unwrap();
        assert_eq!(ack.receivers, 2);
        assert_eq!(ack.active.round_id, Some(round.id));

        let pairing = e.load_member(MANAGER, MemberId(4), StandId(2)).unwrap();
        let actions = terminal.poll().unwrap();
        assert_eq!(
            actions.last(),
            Some(&TerminalAction::RenderBallot {
                member: e.member(MemberId(4)).unwrap(),
                sequence: pairing.sequence
            })
        );
        assert!(other.poll().unwrap().contains(&TerminalAction::Ignored));
        assert!(other.ballot().is_none());

        assert!(e
            .acknowledge(stand(3), StandId(2), pairing.sequence)
            .is_err());
        e.acknowledge(stand(2), StandId(2), pairing.sequence).unwrap();
        assert!(matches!(
            e.stand_status(StandId(2)),
            StandStatus::Loaded { .. }
        ));

        let req = ballot(round.id, 4, 2, ContestantId::WhiteVote(0));
        let receipt = e.submit_vote(stand(2), &req).unwrap();
        assert!(receipt.stand_released);
        assert_eq!(e.stand_status(StandId(2)), StandStatus::Idle);
        assert_eq!(terminal.poll().unwrap(), vec![TerminalAction::BallotCleared]);

        assert_eq!(
            e.load_member(MANAGER, MemberId(4), StandId(2)).unwrap_err().rejection(),
            Some(Rejection::AlreadyVoted)
        );
    }

    #[test]
    fn stopping_voting_aborts_ballots() {
        let e = election(5);
        let round = chair_round(&e);
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        e.load_round(MANAGER, Some(round.id)).unwrap();
        e.load_member(MANAGER, MemberId(5), StandId(1)).unwrap();
        terminal.poll().unwrap();
        assert!(terminal.ballot().is_some());

        let ack = e.load_round(MANAGER, None).unwrap();
        assert_eq!(ack.active.round_id, None);
        let actions = terminal.poll().unwrap();
        assert_eq!(
            actions,
            vec![TerminalAction::RoundChanged {
                round_id: None,
                ballot_aborted: true
            }]
        );
    }

    #[test]
    fn lock_is_pushed_to_stands() {
        let e = election(5);
        let round = chair_round(&e);
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        e.load_round(MANAGER, Some(round.id)).unwrap();
        e.load_member(MANAGER, MemberId(5), StandId(1)).unwrap();
        terminal.poll().unwrap();

        e.lock_round(MANAGER, round.id).unwrap();
        let actions = terminal.poll().unwrap();
        assert_eq!(
            actions,
            vec![TerminalAction::RoundChanged {
                round_id: Some(round.id),
                ballot_aborted: true
            }]
        );
        assert!(terminal.round().unwrap().is_locked);
        assert_eq!(e.active_round().version, 2);
    }

    #[test]
    fn locking_unloads_acknowledged_stands() {
        let e = election(5);
        let round = chair_round(&e);
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        e.load_round(MANAGER, Some(round.id)).unwrap();
        let pairing = e.load_member(MANAGER, MemberId(3), StandId(1)).unwrap();
        terminal.poll().unwrap();
        e.acknowledge(stand(1), StandId(1), pairing.sequence).unwrap();
        assert!(matches!(
            e.stand_status(StandId(1)),
            StandStatus::Loaded { .. }
        ));

        e.lock_round(MANAGER, round.id).unwrap();
        terminal.poll().unwrap();
        assert!(terminal.ballot().is_none());
        assert_eq!(e.stand_status(StandId(1)), StandStatus::Idle);
        assert!(e.stands().is_empty());

        e.unlock_round(MANAGER, round.id).unwrap();
        terminal.poll().unwrap();
        assert!(terminal.ballot().is_none());
        assert_eq!(e.stand_status(StandId(1)), StandStatus::Idle);
        assert_eq!(
            e.acknowledge(stand(1), StandId(1), pairing.sequence)
                .unwrap_err()
                .rejection(),
            Some(Rejection::StaleAssignment)
        );
    }

    #[test]
    fn deleting_active_round_stops_stands() {
        let e = election(3);
        let round = chair_round(&e);
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        e.load_round(MANAGER, Some(round.id)).unwrap();
        e.delete_round(Caller::Admin, round.id).unwrap();
        let actions = terminal.poll().unwrap();
        assert_eq!(
            actions.last(),
            Some(&TerminalAction::RoundChanged {
                round_id: None,
                ballot_aborted: false
            })
        );
        assert!(e.round(round.id).is_err());
        assert_eq!(terminal.version(), e.active_round().version);

        let next = chair_round(&e);
        let ack = e.load_round(MANAGER, Some(next.id)).unwrap();
        assert!(ack.active.version > terminal.version());
        terminal.poll().unwrap();
        assert_eq!(terminal.round().map(|r| r.id), Some(next.id));
    }

    #[test]
    fn late_terminal_is_synchronized() {
        let e = election(3);
        let round = chair_round(&e);
        e.load_round(MANAGER, Some(round.id)).unwrap();
        let pairing = e.load_member(MANAGER, MemberId(3), StandId(7)).unwrap();
        assert_eq!(pairing.receivers, 0);

        let mut terminal = e.connect_terminal(stand(7), StandId(7)).unwrap();
        assert_eq!(terminal.round().map(|r| r.id), Some(round.id));
        assert_eq!(terminal.ballot().map(|(m, s)| (m.id, s)), Some((MemberId(3), pairing.sequence)));
        let action = e.sync_terminal(stand(7), &mut terminal).unwrap();
        assert!(matches!(action, TerminalAction::RenderBallot { .. }));
        assert!(e.sync_terminal(stand(8), &mut terminal).is_err());
    }

    #[test]
    fn roles_are_enforced() {
        let e = election(3);
        let round = chair_round(&e);
        assert_eq!(
            e.lock_round(stand(1), round.id),
            Err(VotingError::Unauthorized {
                caller: stand(1),
                action: "lock rounds"
            })
        );
        assert!(e.load_round(Caller::Admin, Some(round.id)).is_err());
        assert!(e.unlock_round(Caller::Admin, round.id).is_err());
        assert!(e.register_member(stand(1), Member::new(9, "X", "Y")).is_err());
        let req = ballot(round.id, 3, 1, ContestantId::Member(MemberId(1)));
        assert!(matches!(
            e.submit_vote(stand(2), &req),
            Err(VotingError::Unauthorized { .. })
        ));
        assert!(e.submit_vote(MANAGER, &req).is_err());
        assert!(e.get_results(stand(1), round.id).is_err());
    }

    #[test]
    fn substitutes_and_presence() {
        let e = election(3);
        let m = e
            .substitute_member(Caller::Admin, MemberId(1), Some(Member::new(99, "Sub", "Turin")))
            .unwrap();
        assert_eq!(m.display_member().name, "Sub");
        e.set_presence(MANAGER, MemberId(3), false).unwrap();
        let round = chair_round(&e);
        let req = ballot(round.id, 3, 1, ContestantId::Member(MemberId(1)));
        assert!(matches!(
            e.submit_vote(stand(1), &req),
            Err(VotingError::NotFound { .. })
        ));
        assert_eq!(e.participant_count(round.id).unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_reports_lost_link() {
        let e = election(1);
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        let monitor = e.liveness_monitor(StandId(1));
        let state = monitor.check(|_| async { false }).await;
        assert_eq!(
            state,
            LinkState::ConnectionError {
                attempts: BackoffPolicy::DEFAULT_POLICY.max_attempts
            }
        );
        terminal.set_link_state(state);
        assert_eq!(terminal.link_state(), state);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_ends_pending_checks() {
        let e = election(1);
        let monitor = e.liveness_monitor(StandId(1));
        let check = tokio::spawn(async move { monitor.check(|_| async { false }).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut terminal = e.connect_terminal(stand(1), StandId(1)).unwrap();
        assert_eq!(check.await.unwrap(), LinkState::Reconnected);

        let monitor = e.liveness_monitor(StandId(1));
        let check = tokio::spawn(async move { monitor.check(|_| async { false }).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        e.sync_terminal(stand(1), &mut terminal).unwrap();
        assert_eq!(check.await.unwrap(), LinkState::Reconnected);
    }
}
