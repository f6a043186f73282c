use clap::Parser;
use reel_types::config::BackendConfig;
use tracing::info;

use crate::commands::{Executor, connect};

#[derive(Parser, Debug)]
pub struct MigrateCmd {
    #[command(flatten)]
    backend: BackendConfig,
}

impl Executor for MigrateCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = connect(&self.backend).await?;
        reel_dal::migrate(&pool).await?;
        info!("Database {} migrated", self.backend.database_url());
        Ok(())
    }
}
