// ********* Identifiers ***********

use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u64);

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

/// A physical voting terminal.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StandId(pub u32);

impl Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member #{}", self.0)
    }
}

impl Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "round #{}", self.0)
    }
}

impl Display for StandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stand {}", self.0)
    }
}

// ********* Input data structures ***********

/// A person entitled to vote, as registered for the event.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub city: String,
    #[serde(rename = "isPresent")]
    pub is_present: bool,
    /// The alternate member physically standing in for this one.
    #[serde(rename = "replacedBy", default)]
    pub replaced_by: Option<Box<Member>>,
    #[serde(rename = "isMM", default)]
    pub is_mm: bool,
}

impl Member {
    pub fn new(id: u64, name: &str, city: &str) -> Member {
        Member {
            id: MemberId(id),
            name: name.to_string(),
            city: city.to_string(),
            is_present: true,
            replaced_by: None,
            is_mm: false,
        }
    }

    /// The identity to show on screens and in result sheets.
    ///
    /// Ballots and voting statuses always stay attached to `self.id`.
    pub fn display_member(&self) -> &Member {
        match &self.replaced_by {
            Some(substitute) => substitute,
            None => self,
        }
    }
}

/// The label used for the merged "no confidence" entry in results.
pub const WHITE_VOTE_LABEL: &str = "White vote";

/// Reference to a selectable entry of a ballot.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum ContestantId {
    Member(MemberId),
    /// The index of the white vote placeholder within its role.
    WhiteVote(u32),
}

impl Display for ContestantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContestantId::Member(mid) => write!(f, "contestant {}", mid),
            ContestantId::WhiteVote(idx) => write!(f, "white vote #{}", idx),
        }
    }
}

/// An entry on the ballot of a role.
///
/// Real contestants are snapshots of the member taken when the round was created.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Contestant {
    Member(Member),
    WhiteVote { index: u32 },
}

impl Contestant {
    pub fn id(&self) -> ContestantId {
        match self {
            Contestant::Member(m) => ContestantId::Member(m.id),
            Contestant::WhiteVote { index } => ContestantId::WhiteVote(*index),
        }
    }

    pub fn is_white_vote(&self) -> bool {
        matches!(self, Contestant::WhiteVote { .. })
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: String,
    pub contestants: Vec<Contestant>,
    #[serde(rename = "maxVotes")]
    pub max_votes: u32,
    #[serde(rename = "numWhiteVotes")]
    pub num_white_votes: u32,
    #[serde(rename = "numWinners")]
    pub num_winners: u32,
}

impl RoleConfig {
    pub fn real_contestants(&self) -> impl Iterator<Item = &Member> {
        self.contestants.iter().filter_map(|c| match c {
            Contestant::Member(m) => Some(m),
            Contestant::WhiteVote { .. } => None,
        })
    }

    pub fn has_contestant(&self, cid: ContestantId) -> bool {
        self.contestants.iter().any(|c| c.id() == cid)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundState {
    /// Never started.
    Draft,
    /// Started and accepting ballots.
    Active,
    Locked,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub name: String,
    pub roles: Vec<RoleConfig>,
    /// Empty means that every registered member may vote.
    #[serde(rename = "allowedMembers", default)]
    pub allowed_members: Vec<Member>,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "isLocked", default)]
    pub is_locked: bool,
}

impl Round {
    pub fn state(&self) -> RoundState {
        if self.is_locked {
            RoundState::Locked
        } else if self.start_time.is_some() {
            RoundState::Active
        } else {
            RoundState::Draft
        }
    }

    pub fn role(&self, name: &str) -> Option<&RoleConfig> {
        self.roles.iter().find(|r| r.role == name)
    }

    pub fn allows(&self, member_id: MemberId) -> bool {
        self.allowed_members.is_empty() || self.allowed_members.iter().any(|m| m.id == member_id)
    }
}

/// One selection on one ballot. It carries no reference to the voter.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "roundId")]
    pub round_id: RoundId,
    pub role: String,
    pub contestant: ContestantId,
}

/// The record that a member voted in a round. Exactly one per (round, member).
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VotingStatus {
    #[serde(rename = "roundId")]
    pub round_id: RoundId,
    #[serde(rename = "memberId")]
    pub member_id: MemberId,
    #[serde(rename = "votedAt")]
    pub voted_at: DateTime<Utc>,
    pub signature: String,
}

// ********* Callers **********

/// The identity of the caller, as established by the session layer.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Caller {
    ElectionManager,
    VotingStand(StandId),
    Admin,
}

impl Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Caller::ElectionManager => write!(f, "election manager"),
            Caller::VotingStand(sid) => write!(f, "voting {}", sid),
            Caller::Admin => write!(f, "admin"),
        }
    }
}

// ********* Configuration **********

/// Which population the winning threshold is computed against.
///
/// The two sources give different winners near the threshold, so the choice
/// is always explicit in the settings.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantCountSource {
    /// Members marked present among those allowed to vote in the round.
    PresentMembers,
    /// Members holding a voting status for the round.
    VotedMembers,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(rename = "initialDelayMs")]
    pub initial_delay_ms: u64,
    #[serde(rename = "maxDelayMs")]
    pub max_delay_ms: u64,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub const DEFAULT_POLICY: BackoffPolicy = BackoffPolicy {
        initial_delay_ms: 500,
        max_delay_ms: 4000,
        max_attempts: 4,
    };

    /// The pause after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(32);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::DEFAULT_POLICY
    }
}

/// Missing keys take their value from [`ElectionSettings::DEFAULT_SETTINGS`].
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    #[serde(rename = "participantCount")]
    pub participant_count: ParticipantCountSource,
    #[serde(rename = "requirePresence")]
    pub require_presence: bool,
    #[serde(rename = "allowProvisionalResults")]
    pub allow_provisional_results: bool,
    #[serde(rename = "channelCapacity")]
    pub channel_capacity: usize,
    pub heartbeat: BackoffPolicy,
}

impl ElectionSettings {
    pub const DEFAULT_SETTINGS: ElectionSettings = ElectionSettings {
        participant_count: ParticipantCountSource::PresentMembers,
        require_presence: true,
        allow_provisional_results: false,
        channel_capacity: 64,
        heartbeat: BackoffPolicy::DEFAULT_POLICY,
    };
}

impl Default for ElectionSettings {
    fn default() -> Self {
        ElectionSettings::DEFAULT_SETTINGS
    }
}

// ******** Output data structures *********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThresholdRule {
    /// 66% of the participants, used with one or two real contestants.
    Qualified,
    /// Half of the participants plus one.
    Majority,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TallySubject {
    Member {
        id: MemberId,
        #[serde(rename = "displayName")]
        display_name: String,
    },
    WhiteVote,
}

impl TallySubject {
    pub fn label(&self) -> &str {
        match self {
            TallySubject::Member { display_name, .. } => display_name,
            TallySubject::WhiteVote => WHITE_VOTE_LABEL,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    Elected,
    /// Tied at the seat cutoff, to be settled by the election manager.
    Tied,
    /// The white vote took a seat: the seat stays empty.
    SeatUnfilled,
    NotElected,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TallyEntry {
    pub subject: TallySubject,
    pub count: u64,
    /// Share of the participant count, in percent.
    pub percentage: f64,
    #[serde(rename = "passesThreshold")]
    pub passes_threshold: bool,
    pub status: EntryStatus,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TieReport {
    pub count: u64,
    /// The seats left to the tied contenders.
    pub seats: u32,
    pub contenders: Vec<TallySubject>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoleTally {
    pub role: String,
    #[serde(rename = "thresholdRule")]
    pub threshold_rule: ThresholdRule,
    #[serde(rename = "participantCount")]
    pub participant_count: u64,
    #[serde(rename = "votesNeeded")]
    pub votes_needed: u64,
    #[serde(rename = "numWinners")]
    pub num_winners: u32,
    pub entries: Vec<TallyEntry>,
    pub elected: Vec<MemberId>,
    #[serde(rename = "unfilledSeats")]
    pub unfilled_seats: u32,
    pub tie: Option<TieReport>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RoundTally {
    #[serde(rename = "roundId")]
    pub round_id: RoundId,
    #[serde(rename = "roundName")]
    pub round_name: String,
    #[serde(rename = "participantCount")]
    pub participant_count: u64,
    pub roles: Vec<RoleTally>,
}

impl RoundTally {
    pub fn role(&self, name: &str) -> Option<&RoleTally> {
        self.roles.iter().find(|r| r.role == name)
    }
}

// ******** Errors *********

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Entity {
    Round(RoundId),
    Member(MemberId),
    Contestant { role: String, id: ContestantId },
}

impl Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Round(rid) => write!(f, "{}", rid),
            Entity::Member(mid) => write!(f, "{}", mid),
            Entity::Contestant { role, id } => write!(f, "{} in role '{}'", id, role),
        }
    }
}

/// Why an operation was refused in the current state.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Rejection {
    RoundLocked,
    AlreadyVoted,
    AlreadyLocked,
    NotLocked,
    RoundStarted,
    BallotsRecorded,
    NotEligible,
    ResultsNotFinal,
    NoActiveRound,
    StaleAssignment,
}

impl Rejection {
    /// These end the ballot flow for the member at the stand.
    pub fn halts_ballot(&self) -> bool {
        matches!(self, Rejection::AlreadyVoted | Rejection::RoundLocked)
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Rejection::RoundLocked => "the round is locked",
            Rejection::AlreadyVoted => "the member already voted in this round",
            Rejection::AlreadyLocked => "the round is already locked",
            Rejection::NotLocked => "the round is not locked",
            Rejection::RoundStarted => "the round has already been started",
            Rejection::BallotsRecorded => "ballots were already recorded for the round",
            Rejection::NotEligible => "the member is not allowed to vote in this round",
            Rejection::ResultsNotFinal => "results are only available once the round is locked",
            Rejection::NoActiveRound => "no round is currently active",
            Rejection::StaleAssignment => "the stand assignment has changed",
        };
        write!(f, "{}", msg)
    }
}

/// What is wrong with the selections for one role of a ballot.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum BallotProblem {
    MissingSelection,
    TooManySelections { max: u32, got: usize },
    DuplicateSelection(ContestantId),
    UnknownRole,
}

impl Display for BallotProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BallotProblem::MissingSelection => write!(f, "no selection was made"),
            BallotProblem::TooManySelections { max, got } => {
                write!(f, "{} selections made, at most {} allowed", got, max)
            }
            BallotProblem::DuplicateSelection(cid) => write!(f, "{} selected twice", cid),
            BallotProblem::UnknownRole => write!(f, "the round has no such role"),
        }
    }
}

/// What is wrong with a round definition.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RoundProblem {
    NoRoles,
    DuplicateRole(String),
    NoContestants(String),
    DuplicateContestant { role: String, member: MemberId },
    SingleContestantWithoutWhiteVote(String),
    NoWinners(String),
    NoSelections(String),
    TooManyWinners { role: String, winners: u32, contestants: usize },
}

impl Display for RoundProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundProblem::NoRoles => write!(f, "a round needs at least one role"),
            RoundProblem::DuplicateRole(r) => write!(f, "role '{}' is defined twice", r),
            RoundProblem::NoContestants(r) => write!(f, "role '{}' has no contestant", r),
            RoundProblem::DuplicateContestant { role, member } => {
                write!(f, "{} appears twice in role '{}'", member, role)
            }
            RoundProblem::SingleContestantWithoutWhiteVote(r) => write!(
                f,
                "role '{}' has a single contestant and needs at least one white vote",
                r
            ),
            RoundProblem::NoWinners(r) => write!(f, "role '{}' elects nobody", r),
            RoundProblem::NoSelections(r) => write!(f, "role '{}' allows no selection", r),
            RoundProblem::TooManyWinners {
                role,
                winners,
                contestants,
            } => write!(
                f,
                "role '{}' elects {} but only has {} contestants",
                role, winners, contestants
            ),
        }
    }
}

/// Errors raised by the voting core. None of them is fatal to the process.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VotingError {
    #[snafu(display("{entity} not found"))]
    NotFound { entity: Entity },

    #[snafu(display("rejected: {reason}"))]
    Rejected { reason: Rejection },

    #[snafu(display("invalid ballot for role '{role}': {problem}"))]
    InvalidBallot { role: String, problem: BallotProblem },

    #[snafu(display("invalid round definition: {problem}"))]
    InvalidRound { problem: RoundProblem },

    #[snafu(display("the stand channel is closed"))]
    Connection {},

    #[snafu(display("{caller} may not {action}"))]
    Unauthorized {
        caller: Caller,
        action: &'static str,
    },
}

impl VotingError {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            VotingError::Rejected { reason } => Some(*reason),
            _ => None,
        }
    }
}

pub type VotingResult<T> = Result<T, VotingError>;
