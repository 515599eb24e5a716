//! nativebind CLI
//!
//! Command-line interface for building and inspecting native bindings

use anyhow::Context;
use clap::Parser;
use std::process;

use nativebind::cli::{Cli, CliContext, Driver};
use nativebind::config::Config;
use nativebind::logging::{self, LogOptions};

fn main() {
    let cli = Cli::parse();
    let context = CliContext::new(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli, context.clone()) {
        context.error(&format!("{:#}", e));
        process::exit(1);
    }
}

fn run(cli: &Cli, context: CliContext) -> anyhow::Result<()> {
    let config = Config::load_from(&Config::default_paths()).context("failed to load configuration")?;

    let mut options = LogOptions::from_env(LogOptions::with_level(config.log_level));
    if let Some(level) = cli.effective_log_level() {
        options.level = level;
    }
    logging::init(options);

    let driver = Driver::new(context, config);
    driver
        .run(&cli.command)
        .with_context(|| format!("{} failed", command_name(cli)))
}

fn command_name(cli: &Cli) -> &'static str {
    match cli.command {
        nativebind::cli::Commands::Build { .. } => "build",
        nativebind::cli::Commands::Check { .. } => "check",
        nativebind::cli::Commands::Config => "config",
    }
}
