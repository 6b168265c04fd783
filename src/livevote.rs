use log::{debug, info, warn};

use round_voting::*;
use snafu::{prelude::*, Backtrace};

use std::fs;

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::livevote::config_reader::*;
use crate::livevote::io_common::*;
use crate::livevote::io_replay::ReplayOutcome;

mod config_reader;
mod io_common;
mod io_replay;
mod io_snapshot;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LiveVoteError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content of {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing the summary to {path}"))]
    WritingJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error serializing the summary"))]
    SerializingJson { source: serde_json::Error },

    #[snafu(display("No input file provided (use --input)"))]
    MissingInput {},

    #[snafu(display("Input type {input_type:?} is not supported: use 'snapshot' or 'replay'"))]
    UnknownInputType { input_type: String },

    #[snafu(display("Participant count {value:?} is not supported: use 'present' or 'voted'"))]
    UnknownParticipants { value: String },

    #[snafu(display("Round {round:?} refers to unknown {member_id}"))]
    UnknownMember { round: String, member_id: MemberId },

    #[snafu(display("Voting error during the {step}"))]
    Voting { source: VotingError, step: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
        backtrace: Backtrace,
    },
}

pub type LiveVoteResult<T> = Result<T, LiveVoteError>;

fn resolve_settings(
    args: &Args,
    from_input: Option<ElectionSettings>,
) -> LiveVoteResult<ElectionSettings> {
    let mut settings = match args.settings.as_ref() {
        Some(path) => read_input::<ElectionSettings>(path)?,
        None => from_input.unwrap_or_default(),
    };
    if let Some(p) = args.participants.as_ref() {
        settings.participant_count = match p.as_str() {
            "present" => ParticipantCountSource::PresentMembers,
            "voted" => ParticipantCountSource::VotedMembers,
            x => return UnknownParticipantsSnafu { value: x }.fail(),
        };
    }
    debug!("resolve_settings: {:?}", settings);
    Ok(settings)
}

fn entry_to_json(e: &TallyEntry) -> JSValue {
    json!({
        "name": e.subject.label(),
        "votes": e.count.to_string(),
        "percentage": format_percentage(e.percentage),
        "passesThreshold": e.passes_threshold,
        "status": e.status,
    })
}

fn role_to_json(r: &RoleTally) -> JSValue {
    let tally: Vec<JSValue> = r.entries.iter().map(entry_to_json).collect();
    let elected: Vec<String> = r
        .entries
        .iter()
        .filter(|e| e.status == EntryStatus::Elected)
        .map(|e| e.subject.label().to_string())
        .collect();
    let tie: Option<JSValue> = r.tie.as_ref().map(|t| {
        let contenders: Vec<String> = t.contenders.iter().map(|c| c.label().to_string()).collect();
        json!({
            "votes": t.count.to_string(),
            "seats": t.seats,
            "contenders": contenders,
        })
    });
    json!({
        "role": r.role,
        "thresholdRule": r.threshold_rule,
        "votesNeeded": r.votes_needed.to_string(),
        "numWinners": r.num_winners,
        "tally": tally,
        "elected": elected,
        "unfilledSeats": r.unfilled_seats,
        "tie": tie,
    })
}

fn round_to_json(t: &RoundTally) -> JSValue {
    let roles: Vec<JSValue> = t.roles.iter().map(role_to_json).collect();
    json!({
        "round": t.round_name,
        "roundId": t.round_id,
        "participants": t.participant_count.to_string(),
        "roles": roles,
    })
}

fn outcome_to_json(o: &ReplayOutcome) -> JSValue {
    let mut js = match o.tally.as_ref() {
        Some(t) => round_to_json(t),
        None => json!({
            "round": o.round_name,
            "roundId": o.round_id,
            "roles": null,
        }),
    };
    let rejected: Vec<JSValue> = o
        .rejected
        .iter()
        .map(|r| {
            json!({
                "member": r.member_id,
                "stand": r.stand_id,
                "error": r.error,
            })
        })
        .collect();
    js["rejected"] = json!(rejected);
    js
}

fn build_summary_js(config: &OutputConfig, results: Vec<JSValue>) -> JSValue {
    json!({
        "config": config,
        "results": results,
    })
}

/// Computes the summary of the election described by the arguments.
pub fn tabulate(args: &Args) -> LiveVoteResult<JSValue> {
    let input = args.input.clone().context(MissingInputSnafu {})?;
    let input_type = args
        .input_type
        .clone()
        .unwrap_or_else(|| "snapshot".to_string());
    info!("tabulate: reading {:?} as {}", input, input_type);

    let (settings, results) = match input_type.as_str() {
        "snapshot" => {
            let snapshot: SnapshotInput = read_input(&input)?;
            let settings = resolve_settings(args, snapshot.settings)?;
            let tally = io_snapshot::tally_snapshot(&snapshot, &settings)?;
            (settings, vec![round_to_json(&tally)])
        }
        "replay" => {
            let script: ReplayInput = read_input(&input)?;
            let settings = resolve_settings(args, script.settings)?;
            let outcomes = io_replay::replay(&script, settings)?;
            (settings, outcomes.iter().map(outcome_to_json).collect())
        }
        x => return UnknownInputTypeSnafu { input_type: x }.fail(),
    };

    let config = OutputConfig {
        input: simplify_file_name(&input),
        input_type,
        participant_count: settings.participant_count,
    };
    Ok(build_summary_js(&config, results))
}

pub fn run_election(args: &Args) -> LiveVoteResult<()> {
    let result_js = tabulate(args)?;
    let pretty_js_stats =
        serde_json::to_string_pretty(&result_js).context(SerializingJsonSnafu {})?;

    match args.out.as_deref() {
        None | Some("") | Some("stdout") => println!("{}", pretty_js_stats),
        Some(path) => {
            fs::write(path, &pretty_js_stats).context(WritingJsonSnafu { path })?;
            info!("run_election: summary written to {}", path);
        }
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = args.reference.as_ref() {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(SerializingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snafu::ErrorCompat;

    fn data_path(test_name: &str, file: &str) -> String {
        format!(
            "{}/tests/data/{}/{}",
            env!("CARGO_MANIFEST_DIR"),
            test_name,
            file
        )
    }

    fn run_election_test(test_name: &str, input_type: &str) -> LiveVoteResult<()> {
        info!("Running test {}", test_name);
        let args = Args {
            input: Some(data_path(test_name, &format!("{}_input.json", test_name))),
            input_type: Some(input_type.to_string()),
            settings: None,
            reference: Some(data_path(
                test_name,
                &format!("{}_expected_summary.json", test_name),
            )),
            out: None,
            participants: None,
            verbose: false,
        };
        run_election(&args)
    }

    pub fn test_wrapper(test_name: &str, input_type: &str) {
        let res = run_election_test(test_name, input_type);
        if let Err(e) = res {
            warn!("Error occured {:?}", e);
            eprintln!("An error occured {}", e);
            if let Some(bt) = ErrorCompat::backtrace(&e) {
                eprintln!("trace: {}", bt);
            } else {
                eprintln!("No trace found");
            }
            panic!("test {} failed: {}", test_name, e);
        }
    }

    fn args_for(test_name: &str, input_type: &str) -> Args {
        Args {
            input: Some(data_path(test_name, &format!("{}_input.json", test_name))),
            input_type: Some(input_type.to_string()),
            settings: None,
            reference: None,
            out: None,
            participants: None,
            verbose: false,
        }
    }

    #[test]
    fn board_snapshot() {
        test_wrapper("board_snapshot", "snapshot");
    }

    #[test]
    fn assembly_replay() {
        test_wrapper("assembly_replay", "replay");
    }

    #[test]
    fn voted_members_as_participants() {
        let mut args = args_for("board_snapshot", "snapshot");
        args.participants = Some("voted".to_string());
        let js = tabulate(&args).unwrap();
        assert_eq!(js["config"]["participantCount"], json!("votedMembers"));
        assert_eq!(js["results"][0]["participants"], json!("9"));

        args.participants = Some("everyone".to_string());
        assert!(matches!(
            tabulate(&args),
            Err(LiveVoteError::UnknownParticipants { .. })
        ));
    }

    #[test]
    fn open_round_without_provisional_results() {
        let mut snapshot: SnapshotInput =
            read_input(&data_path("board_snapshot", "board_snapshot_input.json")).unwrap();
        snapshot.round.is_locked = false;
        let res = io_snapshot::tally_snapshot(&snapshot, &ElectionSettings::DEFAULT_SETTINGS);
        assert!(matches!(
            res,
            Err(LiveVoteError::Voting {
                source: VotingError::Rejected {
                    reason: Rejection::ResultsNotFinal
                },
                ..
            })
        ));

        let settings = ElectionSettings {
            allow_provisional_results: true,
            ..ElectionSettings::DEFAULT_SETTINGS
        };
        let tally = io_snapshot::tally_snapshot(&snapshot, &settings).unwrap();
        assert_eq!(tally.participant_count, 9);
    }

    #[test]
    fn unknown_input_type() {
        let args = args_for("board_snapshot", "xlsx");
        assert!(matches!(
            tabulate(&args),
            Err(LiveVoteError::UnknownInputType { .. })
        ));
        let mut args = args_for("board_snapshot", "snapshot");
        args.input = None;
        assert!(matches!(
            tabulate(&args),
            Err(LiveVoteError::MissingInput {})
        ));
    }
}
