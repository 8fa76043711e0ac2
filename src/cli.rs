use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(
    name = "slack-export-viewer",
    version,
    about = "Turn a Slack export into threaded channel pages with a local attachment mirror"
)]
struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert an export (directory or .zip) into HTML and text transcripts
    Convert(ConvertArgs),
    /// Print per-channel statistics without converting anything
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Export directory or .zip archive
    export: PathBuf,
    #[arg(short, long, default_value = "output")]
    output: PathBuf,
    /// Only convert these channels
    #[arg(long, num_args = 1.., conflicts_with = "channels_existing")]
    channels: Vec<String>,
    /// Only convert channels that already have an output directory
    #[arg(long)]
    channels_existing: bool,
    #[arg(long)]
    channel_workers: Option<usize>,
    #[arg(long)]
    fetch_workers: Option<usize>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct StatsArgs {
    export: PathBuf,
    #[arg(long, num_args = 1..)]
    channels: Vec<String>,
    /// Output directory whose ledger to compare against
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    if !report.ok {
        anyhow::bail!("{} finished with {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    match cli.command {
        Command::Convert(args) => {
            let report = commands::convert::run(&commands::convert::ConvertOptions {
                export: args.export,
                output: args.output,
                channels: args.channels,
                channels_existing: args.channels_existing,
                channel_workers: args.channel_workers,
                fetch_workers: args.fetch_workers,
            })?;
            print_report(&report, args.json)
        }
        Command::Stats(args) => {
            let report = commands::stats::run(&commands::stats::StatsOptions {
                export: args.export,
                channels: args.channels,
                output: args.output,
            })?;
            print_report(&report, args.json)
        }
    }
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
    fn channels_and_channels_existing_conflict() {
        let parsed = Cli::try_parse_from([
            "slack-export-viewer",
            "convert",
            "export.zip",
            "--channels",
            "general",
            "--channels-existing",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn convert_defaults() {
        let cli = Cli::try_parse_from(["slack-export-viewer", "--debug", "convert", "export.zip"]).expect("parse");
        assert!(cli.debug);
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.output, PathBuf::from("output"));
        assert!(args.channels.is_empty());
        assert_eq!(args.fetch_workers, None);
    }
}
