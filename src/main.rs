use clap::Parser;
use keyward::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate(args) => cli::generate::run(args).await,
        Command::Hash(args) => cli::hash::run(args).await,
        Command::Sweep(args) => cli::sweep::run(args).await,
    }
}
