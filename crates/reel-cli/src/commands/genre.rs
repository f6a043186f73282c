use clap::{Parser, Subcommand};
use garde::Validate as _;
use reel_dal::genre::{CreateGenre, GenreRepository};
use reel_types::config::BackendConfig;

use crate::commands::{Executor, connect, print_json};

#[derive(Parser, Debug)]
pub struct GenreCmd {
    #[command(flatten)]
    backend: BackendConfig,
    #[command(subcommand)]
    action: GenreAction,
}

#[derive(Subcommand, Debug)]
enum GenreAction {
    /// Add new genre
    Add {
        #[arg(short, long, help = "Genre name")]
        name: String,
        #[arg(short, long, help = "Genre slug, derived from name if missing")]
        slug: Option<String>,
    },
    /// List all genres
    List,
}

impl Executor for GenreCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = connect(&self.backend).await?;
        let repository = GenreRepository::new(pool);
        match self.action {
            GenreAction::Add { name, slug } => {
                let payload = CreateGenre { name, slug };
                payload
                    .validate()
                    .map_err(|e| anyhow::anyhow!("Invalid genre: {e}"))?;
                let genre = repository.create(payload).await?;
                print_json(&genre)
            }
            GenreAction::List => print_json(&repository.list_all().await?),
        }
    }
}
