use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "duelbet")]
#[command(version = "0.1.0")]
#[command(about = "Neuroevolved wagering policies for a two-competitor betting arena", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "DUELBET_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Read history from a JSON-lines file instead of PostgreSQL
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// Log decisions without placing wagers
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evolve wager policies from scratch, checkpointing each improvement
    Train {
        /// Standalone runs before exiting (0 = until interrupted)
        #[arg(long)]
        runs: Option<usize>,
        /// Seed for splits and evaluation sets
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Refine the best checkpoints against reshuffled evaluation sets
    Meta {
        /// Checkpoints seeding the population
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Evolve one outcome predictor per tier
    Predictors {
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Score the best checkpoints on held-out history
    Simulate {
        /// Checkpoints to score
        #[arg(long, default_value = "5")]
        top: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Wager live with the consensus of the best checkpoints
    Bet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["duelbet", "train", "--runs", "3", "--data", "h.jsonl"]);
        assert_eq!(cli.data, Some(PathBuf::from("h.jsonl")));
        assert!(!cli.dry_run);
        assert!(matches!(cli.command, Commands::Train { runs: Some(3), seed: None }));
    }

    #[test]
    fn bet_accepts_dry_run() {
        let cli = Cli::parse_from(["duelbet", "bet", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::Bet));
    }
}
