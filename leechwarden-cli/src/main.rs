//! ## leechwarden-cli
//! **Operational interface**
//! Runs the leecher detection loop against aria2 and offers one-shot
//! maintenance of the nftables enforcement table.

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run(cli.config, args).await,
        Commands::Cleanup(args) => commands::cleanup(cli.config, args),
        Commands::List => commands::list(cli.config),
        Commands::Unblock(args) => commands::unblock(cli.config, args),
        Commands::CheckConfig => commands::check_config(cli.config),
    }
}
