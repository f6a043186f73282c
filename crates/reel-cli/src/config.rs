use clap::{Parser, Subcommand};

use crate::commands::{genre::GenreCmd, migrate::MigrateCmd, movie::MovieCmd};

#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "CLI for reel - manages the movie catalogue database directly, results are printed as JSON."
)]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or upgrade database schema
    Migrate(MigrateCmd),
    Genre(GenreCmd),
    Movie(MovieCmd),
}

impl crate::commands::Executor for Command {
    async fn run(self) -> anyhow::Result<()> {
        match self {
            Command::Migrate(cmd) => cmd.run().await,
            Command::Genre(cmd) => cmd.run().await,
            Command::Movie(cmd) => cmd.run().await,
        }
    }
}
