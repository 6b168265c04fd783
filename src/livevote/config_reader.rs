use crate::livevote::*;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The export of one round, with everything recorded for it.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInput {
    #[serde(default)]
    pub settings: Option<ElectionSettings>,
    pub round: Round,
    pub members: Vec<Member>,
    #[serde(default)]
    pub votes: Vec<Vote>,
    #[serde(rename = "votingStatuses", default)]
    pub voting_statuses: Vec<VotingStatus>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRole {
    pub role: String,
    /// Registered members, by id.
    pub candidates: Vec<MemberId>,
    #[serde(rename = "maxVotes", default = "one")]
    pub max_votes: u32,
    #[serde(rename = "numWhiteVotes", default)]
    pub num_white_votes: u32,
    #[serde(rename = "numWinners", default = "one")]
    pub num_winners: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ReplayBallot {
    pub member: MemberId,
    pub stand: StandId,
    pub votes: BTreeMap<String, Vec<ContestantId>>,
    #[serde(default)]
    pub signature: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRound {
    pub name: String,
    pub roles: Vec<ReplayRole>,
    #[serde(rename = "allowedMembers", default)]
    pub allowed_members: Vec<MemberId>,
    #[serde(default)]
    pub ballots: Vec<ReplayBallot>,
    #[serde(default = "yes")]
    pub lock: bool,
}

/// A scripted session: the rounds are played in order through the stands.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ReplayInput {
    #[serde(default)]
    pub settings: Option<ElectionSettings>,
    pub members: Vec<Member>,
    pub rounds: Vec<ReplayRound>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub input: String,
    #[serde(rename = "inputType")]
    pub input_type: String,
    #[serde(rename = "participantCount")]
    pub participant_count: ParticipantCountSource,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

pub fn read_input<T: DeserializeOwned>(path: &str) -> LiveVoteResult<T> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let res: T = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(res)
}

pub fn read_summary(path: &str) -> LiveVoteResult<JSValue> {
    let js: JSValue = read_input(path)?;
    debug!("read_summary: {} results", js["results"].as_array().map_or(0, |l| l.len()));
    Ok(js)
}
