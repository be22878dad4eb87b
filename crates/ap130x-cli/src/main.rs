// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod error;
mod fw_name;
mod inspect;
mod sensors;
mod simulate;
mod sipm_addr;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// AP130X CLI - ISP firmware inspection and simulated bring-up tool
#[derive(Parser)]
#[command(name = "ap130x")]
#[command(version)]
#[command(about = "AP130X CLI - ISP firmware inspection and simulated bring-up tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=trace for register traffic)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported sensor models
    Sensors(sensors::Args),

    /// Show the firmware file name for a board
    FwName(fw_name::Args),

    /// Parse and validate a firmware image
    Inspect(inspect::Args),

    /// Decode or encode a sensor debug-probe address
    SipmAddr(sipm_addr::Args),

    /// Bring up a simulated ISP and stream from it
    Simulate(simulate::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Sensors(args) => sensors::execute(args, cli.json),
        Commands::FwName(args) => fw_name::execute(args, cli.json),
        Commands::Inspect(args) => inspect::execute(args, cli.json),
        Commands::SipmAddr(args) => sipm_addr::execute(args, cli.json),
        Commands::Simulate(args) => simulate::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Logging initialized");
}
