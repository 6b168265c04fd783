use clap::Parser;

/// This program tabulates the rounds of a live election, or replays a voting session.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file with the election data. Its format depends on --input-type.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default snapshot) The type of the input:
    /// 'snapshot' for the export of one round with its ballots,
    /// 'replay' for a scripted session played through stands.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (file path, optional) A JSON file with the election settings. It overrides the settings
    /// found in the input.
    #[clap(short, long, value_parser)]
    pub settings: Option<String>,

    /// (file path) A reference file containing the outcome of an election in JSON format. If provided, livevote will
    /// check that the tabulated output matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the election will be written in JSON format to the given
    /// location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// ('present' or 'voted') The population used to compute the winning threshold. Overrides
    /// the settings.
    #[clap(long, value_parser)]
    pub participants: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
