mod bootstrap_helpers;
mod cli_args;
mod render;
mod run_command;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, CliCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    match cli.command {
        CliCommand::Run(args) => run_command::run_session(args, &cli.state_dir).await,
        CliCommand::Sessions => {
            print!("{}", run_command::list_sessions(&cli.state_dir)?);
            Ok(())
        }
    }
}
