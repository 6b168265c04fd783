//! Pairing of members with stands.
//!
//! The coordinator broadcasts every change to all the connected terminals and each
//! terminal keeps what concerns its own stand. Nothing here touches persisted state:
//! a restart loses the assignments and stands have to be paired again.
//!
//! Delivery is fire-and-forget. A terminal that fell behind (lagged receiver) or
//! reconnected asks for a [`TerminalSnapshot`] instead of expecting a replay.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::Notify;

use crate::config::*;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TerminalEvent {
    /// `None` means that voting stopped: any ballot in progress is aborted.
    RoundLoaded { round: Option<Round>, version: u64 },
    MemberLoaded {
        member: Member,
        #[serde(rename = "standId")]
        stand_id: StandId,
        sequence: u64,
    },
    StandCleared {
        #[serde(rename = "standId")]
        stand_id: StandId,
    },
}

/// What the election manager sees for a stand.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StandStatus {
    Idle,
    /// Broadcast, not yet acknowledged by the terminal.
    Pending { member: Member, sequence: u64 },
    Loaded { member: Member, sequence: u64 },
}

/// The state a terminal needs to catch up after missing events.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub round: Option<Round>,
    pub version: u64,
    pub assignment: Option<(Member, u64)>,
}

#[derive(Debug, Clone)]
struct Assignment {
    member: Member,
    sequence: u64,
    acknowledged: bool,
}

pub struct StandCoordinator {
    sender: broadcast::Sender<TerminalEvent>,
    current: RwLock<(Option<Round>, u64)>,
    assignments: Mutex<HashMap<StandId, Assignment>>,
    sequence: AtomicU64,
    // One signal per stand, shared by all the liveness checks of that stand.
    reconnects: Mutex<HashMap<StandId, Arc<Notify>>>,
}

impl StandCoordinator {
    pub fn new(capacity: usize) -> StandCoordinator {
        let (sender, _) = broadcast::channel(capacity.max(1));
        StandCoordinator {
            sender,
            current: RwLock::new((None, 0)),
            assignments: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            reconnects: Mutex::new(HashMap::new()),
        }
    }

    // Returns the number of terminals the event was handed to.
    fn send(&self, event: TerminalEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(ev)) => {
                warn!("send: no terminal connected, dropping {:?}", ev);
                0
            }
        }
    }

    /// Connects a terminal for the given stand, already synchronized.
    ///
    /// The liveness checks pending for the stand end with [`LinkState::Reconnected`].
    pub fn connect(&self, stand_id: StandId) -> StandTerminal {
        let receiver = self.sender.subscribe();
        let mut terminal = StandTerminal::new(stand_id, receiver);
        terminal.resync(self.snapshot(stand_id));
        self.reconnected(stand_id);
        info!(
            "connect: {} connected ({} terminals)",
            stand_id,
            self.sender.receiver_count()
        );
        terminal
    }

    pub fn terminal_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Wakes the liveness checks pending for the stand.
    pub fn reconnected(&self, stand_id: StandId) {
        if let Some(signal) = self.reconnects.lock().get(&stand_id) {
            debug!("reconnected: {} is back", stand_id);
            signal.notify_waiters();
        }
    }

    /// A liveness monitor for the stand, cancelled by the next connection or resync.
    pub fn liveness_monitor(&self, stand_id: StandId, policy: BackoffPolicy) -> LivenessMonitor {
        let signal = self
            .reconnects
            .lock()
            .entry(stand_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        LivenessMonitor::with_signal(policy, signal)
    }

    /// Broadcasts the active round. Events older than the last loaded version are dropped.
    ///
    /// Assignments are discarded whenever the terminals abort their ballot
    /// (see [`StandTerminal::apply`]).
    pub fn load_round(&self, round: Option<Round>, version: u64) -> usize {
        {
            let mut current = self.current.write();
            if version < current.1 {
                warn!(
                    "load_round: version {} is older than {}, ignored",
                    version, current.1
                );
                return 0;
            }
            let previous_id = current.0.as_ref().map(|r| r.id);
            let new_id = round.as_ref().map(|r| r.id);
            let stops = round.as_ref().map_or(true, |r| r.is_locked);
            if previous_id != new_id || stops {
                let mut assignments = self.assignments.lock();
                if !assignments.is_empty() {
                    info!("load_round: dropping {} assignments", assignments.len());
                }
                assignments.clear();
            }
            *current = (round.clone(), version);
        }
        let round_id = round.as_ref().map(|r| r.id);
        let receivers = self.send(TerminalEvent::RoundLoaded { round, version });
        info!(
            "load_round: {:?} (version {}) sent to {} terminals",
            round_id, version, receivers
        );
        receivers
    }

    /// Assigns a member to a stand and broadcasts it. Returns the assignment sequence
    /// number and the number of terminals reached.
    pub fn load_member(&self, member: Member, stand_id: StandId) -> (u64, usize) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.assignments.lock().insert(
            stand_id,
            Assignment {
                member: member.clone(),
                sequence,
                acknowledged: false,
            },
        );
        if let Some(p) = previous {
            info!(
                "load_member: {} replaces {} on {}",
                member.id, p.member.id, stand_id
            );
        }
        let member_id = member.id;
        let receivers = self.send(TerminalEvent::MemberLoaded {
            member,
            stand_id,
            sequence,
        });
        info!(
            "load_member: {} on {} (sequence {}, {} terminals)",
            member_id, stand_id, sequence, receivers
        );
        (sequence, receivers)
    }

    /// Marks the assignment as rendered by the terminal.
    pub fn acknowledge(&self, stand_id: StandId, sequence: u64) -> VotingResult<()> {
        let mut assignments = self.assignments.lock();
        match assignments.get_mut(&stand_id) {
            Some(a) if a.sequence == sequence => {
                a.acknowledged = true;
                debug!("acknowledge: {} sequence {}", stand_id, sequence);
                Ok(())
            }
            _ => RejectedSnafu {
                reason: Rejection::StaleAssignment,
            }
            .fail(),
        }
    }

    /// Frees a stand after its voter submitted. An assignment made for another
    /// member in the meantime is kept.
    pub fn release_stand(&self, stand_id: StandId, member_id: MemberId) -> bool {
        {
            let mut assignments = self.assignments.lock();
            match assignments.get(&stand_id) {
                Some(a) if a.member.id != member_id => {
                    info!(
                        "release_stand: {} now holds {}, not releasing {}",
                        stand_id, a.member.id, member_id
                    );
                    return false;
                }
                _ => {
                    assignments.remove(&stand_id);
                }
            }
        }
        self.send(TerminalEvent::StandCleared { stand_id });
        true
    }

    /// Unloads whatever is on the stand.
    pub fn clear_stand(&self, stand_id: StandId) -> Option<Member> {
        let removed = self.assignments.lock().remove(&stand_id);
        self.send(TerminalEvent::StandCleared { stand_id });
        removed.map(|a| a.member)
    }

    pub fn stand_status(&self, stand_id: StandId) -> StandStatus {
        match self.assignments.lock().get(&stand_id) {
            None => StandStatus::Idle,
            Some(a) if a.acknowledged => StandStatus::Loaded {
                member: a.member.clone(),
                sequence: a.sequence,
            },
            Some(a) => StandStatus::Pending {
                member: a.member.clone(),
                sequence: a.sequence,
            },
        }
    }

    /// All the stands holding an assignment, ordered by stand.
    pub fn stands(&self) -> Vec<(StandId, StandStatus)> {
        let mut ids: Vec<StandId> = self.assignments.lock().keys().cloned().collect();
        ids.sort();
        ids.into_iter()
            .map(|sid| (sid, self.stand_status(sid)))
            .collect()
    }

    pub fn snapshot(&self, stand_id: StandId) -> TerminalSnapshot {
        let (round, version) = self.current.read().clone();
        let assignment = self
            .assignments
            .lock()
            .get(&stand_id)
            .map(|a| (a.member.clone(), a.sequence));
        TerminalSnapshot {
            round,
            version,
            assignment,
        }
    }
}

/// What a terminal must do after an event.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TerminalAction {
    RoundChanged {
        round_id: Option<RoundId>,
        ballot_aborted: bool,
    },
    RenderBallot {
        member: Member,
        sequence: u64,
    },
    BallotCleared,
    Ignored,
    /// Events were missed: the terminal has to ask for a snapshot.
    Resync {
        missed: u64,
    },
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LinkState {
    Connected,
    Reconnected,
    ConnectionError { attempts: u32 },
}

/// The stand side of the pairing protocol.
pub struct StandTerminal {
    stand_id: StandId,
    receiver: broadcast::Receiver<TerminalEvent>,
    round: Option<Round>,
    version: u64,
    ballot: Option<(Member, u64)>,
    link: LinkState,
}

impl StandTerminal {
    fn new(stand_id: StandId, receiver: broadcast::Receiver<TerminalEvent>) -> StandTerminal {
        StandTerminal {
            stand_id,
            receiver,
            round: None,
            version: 0,
            ballot: None,
            link: LinkState::Connected,
        }
    }

    pub fn stand_id(&self) -> StandId {
        self.stand_id
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The member whose ballot is on screen, with the assignment sequence.
    pub fn ballot(&self) -> Option<(&Member, u64)> {
        self.ballot.as_ref().map(|(m, s)| (m, *s))
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn set_link_state(&mut self, state: LinkState) {
        if state != self.link {
            info!("{}: link {:?} -> {:?}", self.stand_id, self.link, state);
        }
        self.link = state;
    }

    pub fn apply(&mut self, event: &TerminalEvent) -> TerminalAction {
        match event {
            TerminalEvent::RoundLoaded { round, version } => {
                if *version <= self.version {
                    debug!(
                        "{}: stale round event version {} (holding {})",
                        self.stand_id, version, self.version
                    );
                    return TerminalAction::Ignored;
                }
                let new_id = round.as_ref().map(|r| r.id);
                let current_id = self.round.as_ref().map(|r| r.id);
                let stops = match round {
                    None => true,
                    Some(r) => r.is_locked || Some(r.id) != current_id,
                };
                let ballot_aborted = stops && self.ballot.is_some();
                if ballot_aborted {
                    info!("{}: ballot aborted", self.stand_id);
                    self.ballot = None;
                }
                self.round = round.clone();
                self.version = *version;
                TerminalAction::RoundChanged {
                    round_id: new_id,
                    ballot_aborted,
                }
            }
            TerminalEvent::MemberLoaded {
                member,
                stand_id,
                sequence,
            } => {
                if *stand_id != self.stand_id {
                    return TerminalAction::Ignored;
                }
                if self.round.is_none() {
                    warn!(
                        "{}: {} loaded without an active round",
                        self.stand_id, member.id
                    );
                    return TerminalAction::Ignored;
                }
                if let Some((m, s)) = self.ballot.as_ref() {
                    if m.id == member.id && s == sequence {
                        return TerminalAction::Ignored;
                    }
                }
                self.ballot = Some((member.clone(), *sequence));
                TerminalAction::RenderBallot {
                    member: member.clone(),
                    sequence: *sequence,
                }
            }
            TerminalEvent::StandCleared { stand_id } => {
                if *stand_id == self.stand_id && self.ballot.is_some() {
                    self.ballot = None;
                    TerminalAction::BallotCleared
                } else {
                    TerminalAction::Ignored
                }
            }
        }
    }

    /// Drains the pending events without waiting.
    pub fn poll(&mut self) -> VotingResult<Vec<TerminalAction>> {
        let mut actions = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => actions.push(self.apply(&event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("{}: missed {} events", self.stand_id, missed);
                    actions.push(TerminalAction::Resync { missed });
                }
                Err(TryRecvError::Closed) => {
                    self.set_link_state(LinkState::ConnectionError { attempts: 0 });
                    return ConnectionSnafu.fail();
                }
            }
        }
        Ok(actions)
    }

    /// Waits for the next event.
    pub async fn next_action(&mut self) -> VotingResult<TerminalAction> {
        match self.receiver.recv().await {
            Ok(event) => Ok(self.apply(&event)),
            Err(RecvError::Lagged(missed)) => {
                warn!("{}: missed {} events", self.stand_id, missed);
                Ok(TerminalAction::Resync { missed })
            }
            Err(RecvError::Closed) => {
                self.set_link_state(LinkState::ConnectionError { attempts: 0 });
                ConnectionSnafu.fail()
            }
        }
    }

    /// Replaces the local view with the one held by the coordinator.
    pub fn resync(&mut self, snapshot: TerminalSnapshot) -> TerminalAction {
        debug!(
            "{}: resync to version {} (was {})",
            self.stand_id, snapshot.version, self.version
        );
        self.round = snapshot.round;
        self.version = snapshot.version;
        self.ballot = snapshot.assignment.clone();
        match snapshot.assignment {
            Some((member, sequence)) if self.round.is_some() => {
                TerminalAction::RenderBallot { member, sequence }
            }
            _ => TerminalAction::RoundChanged {
                round_id: self.round.as_ref().map(|r| r.id),
                ballot_aborted: false,
            },
        }
    }
}

/// Cancels the liveness checks in progress when the terminal is back.
#[derive(Clone)]
pub struct ReconnectHandle(Arc<Notify>);

impl ReconnectHandle {
    pub fn reconnected(&self) {
        self.0.notify_waiters();
    }
}

/// Heartbeat over one terminal connection, with bounded exponential backoff.
pub struct LivenessMonitor {
    policy: BackoffPolicy,
    reconnected: Arc<Notify>,
}

impl LivenessMonitor {
    pub fn new(policy: BackoffPolicy) -> LivenessMonitor {
        LivenessMonitor::with_signal(policy, Arc::new(Notify::new()))
    }

    fn with_signal(policy: BackoffPolicy, reconnected: Arc<Notify>) -> LivenessMonitor {
        LivenessMonitor {
            policy,
            reconnected,
        }
    }

    pub fn reconnect_handle(&self) -> ReconnectHandle {
        ReconnectHandle(self.reconnected.clone())
    }

    /// Probes the connection until it answers, the attempts run out, or a
    /// reconnection cancels the check. The probe receives the attempt number.
    pub async fn check<F, Fut>(&self, mut probe: F) -> LinkState
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            let reconnected = self.reconnected.notified();
            tokio::pin!(reconnected);

            tokio::select! {
                alive = probe(attempt) => {
                    if alive {
                        debug!("check: alive after {} attempts", attempt);
                        return LinkState::Connected;
                    }
                }
                _ = &mut reconnected => {
                    info!("check: reconnected during attempt {}", attempt);
                    return LinkState::Reconnected;
                }
            }

            if attempt >= max_attempts {
                warn!("check: no answer after {} attempts", attempt);
                return LinkState::ConnectionError { attempts: attempt };
            }
            let delay = self.policy.delay_after(attempt);
            debug!("check: attempt {} failed, retrying in {:?}", attempt, delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut reconnected => {
                    info!("check: reconnected while backing off");
                    return LinkState::Reconnected;
                }
            }
            attempt += 1;
        }
    }
}
