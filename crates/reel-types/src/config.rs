use clap::Args;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone, Args)]
pub struct BackendConfig {
    #[arg(
        long,
        env = "REEL_DATABASE_URL",
        help = "Database URL e.g. sqlite://file.db or similar, default is sqlite://[data-dir]/reel.db, where data-dir is set by --data-dir"
    )]
    database_url: Option<String>,

    #[arg(
        long,
        env = "REEL_DATA_DIR",
        help = "Data directory (databases, configs etc.), default is system default like ~/.local/share/reel",
        default_value_t = default_data_dir()
    )]
    data_dir: String,

    #[arg(
        long,
        env = "REEL_DEFAULT_PAGE_SIZE",
        default_value_t = 10,
        help = "Page size used when listing without explicit limit"
    )]
    pub default_page_size: u32,

    #[arg(
        long,
        env = "REEL_MAX_PAGE_SIZE",
        default_value_t = 1000,
        help = "Upper bound for requested page size"
    )]
    pub max_page_size: u32,
}

fn default_data_dir() -> String {
    let dir = dirs::data_dir()
        .map(|p| p.join("reel"))
        .unwrap_or_else(|| PathBuf::from("reel"));

    if !fs::exists(&dir).expect("Failed to check if data directory exists") {
        fs::create_dir_all(&dir).expect("Failed to create data directory");
    } else if !dir.is_dir() {
        panic!("Data directory is not a directory",)
    }

    dir.to_string_lossy().to_string()
}

impl BackendConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}/reel.db?mode=rwc", self.data_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        backend: BackendConfig,
    }

    #[test]
    fn test_database_url_from_data_dir() {
        let cli = TestCli::try_parse_from(["test", "--data-dir", "/tmp/reel-test"]).unwrap();
        assert_eq!(
            cli.backend.database_url(),
            "sqlite:///tmp/reel-test/reel.db?mode=rwc"
        );
        assert_eq!(cli.backend.default_page_size, 10);
        assert_eq!(cli.backend.max_page_size, 1000);
    }

    #[test]
    fn test_explicit_database_url() {
        let cli = TestCli::try_parse_from([
            "test",
            "--data-dir",
            "/tmp/reel-test",
            "--database-url",
            "sqlite::memory:",
            "--default-page-size",
            "25",
        ])
        .unwrap();
        assert_eq!(cli.backend.database_url(), "sqlite::memory:");
        assert_eq!(cli.backend.default_page_size, 25);
    }
}
