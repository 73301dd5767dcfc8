//! Module for the command line arguments.

use clap::Parser;
use rand::distr::{Alphanumeric, SampleString};

/// Exit status for missing or malformed arguments.
const USAGE_ERROR: u8 = 84;

/// An autonomous Zappy player.
#[derive(Debug, Clone, Parser)]
#[clap(disable_help_flag = true)]
pub struct Args {
    /// The port number of the Zappy server to connect to.
    #[clap(short = 'p')]
    pub port: u16,
    /// Name of the team the AI is playing for.
    #[clap(short = 'n')]
    pub team: String,
    /// The hostname of the Zappy server to connect to.
    #[clap(short = 'h')]
    pub host: String,
}

/// Parses the command line, exiting with 0 on `-help` and 84 on anything
/// malformed.
pub fn parse() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() == 2 && argv[1] == "-help" {
        println!("USAGE: ./zappy_ai -p port -n name -h machine");
        std::process::exit(0);
    }

    match Args::try_parse_from(&argv) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(USAGE_ERROR.into());
        }
    }
}

/// Everything fixed at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub team_name: String,
    pub host: String,
    /// Random token telling our own broadcasts apart from teammates'.
    pub unique_id: String,
}

impl AgentConfig {
    pub fn new(args: Args) -> Self {
        let unique_id = Alphanumeric.sample_string(&mut rand::rng(), 8);
        Self {
            port: args.port,
            team_name: args.team,
            host: args.host,
            unique_id,
        }
    }
}
