use clap::{Parser, Subcommand};
use reel_app::MovieService;
use reel_dal::{
    movie::{CreateMovie, UpdateMovie},
    query::QueryParams,
};
use reel_types::config::BackendConfig;
use time::Date;

use crate::commands::{
    Executor, api_error, connect, parse_date, parse_pair, print_json, query_defaults,
};

#[derive(Parser, Debug)]
pub struct MovieCmd {
    #[command(flatten)]
    backend: BackendConfig,
    #[command(subcommand)]
    action: MovieAction,
}

#[derive(Subcommand, Debug)]
enum MovieAction {
    /// Add new movie, slug is generated from title and release date
    Create {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, value_parser = parse_date, help = "Release date as YYYY-MM-DD")]
        release_date: Date,
        #[arg(short, long = "genre", required = true, help = "Genre id, can be used multiple times")]
        genres: Vec<i64>,
    },
    /// List movies, query is given as key=value pairs (searchTerm, sort, page, limit, fields or field filters)
    List {
        #[arg(value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// As list, plus genre=<fragment> matches movies by genre slug
    Search {
        #[arg(value_parser = parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Show movie by its slug
    Get { slug: String },
    /// Change movie, only given fields are updated
    Update {
        id: i64,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, value_parser = parse_date)]
        release_date: Option<Date>,
        #[arg(short, long = "genre", help = "Replaces all genres, can be used multiple times")]
        genres: Vec<i64>,
        #[arg(long)]
        deleted: Option<bool>,
        #[arg(long, help = "Not allowed, slug is always derived from title and release date")]
        slug: Option<String>,
    },
    /// Mark movie as deleted
    Delete { id: i64 },
}

impl Executor for MovieCmd {
    async fn run(self) -> anyhow::Result<()> {
        let pool = connect(&self.backend).await?;
        let service = MovieService::new(pool, query_defaults(&self.backend));
        match self.action {
            MovieAction::Create {
                title,
                description,
                release_date,
                genres,
            } => {
                let payload = CreateMovie {
                    title,
                    description,
                    release_date,
                    genres,
                };
                let movie = service.create(payload).await.map_err(api_error)?;
                print_json(&movie)
            }
            MovieAction::List { query } => {
                let params = QueryParams::from_pairs(query)?;
                let batch = service.list(params).await.map_err(api_error)?;
                print_json(&batch)
            }
            MovieAction::Search { query } => {
                let params = QueryParams::from_pairs(query)?;
                let batch = service.search(params).await.map_err(api_error)?;
                print_json(&batch)
            }
            MovieAction::Get { slug } => match service.get_by_slug(&slug).await.map_err(api_error)? {
                Some(movie) => print_json(&movie),
                None => anyhow::bail!("Movie {slug} not found"),
            },
            MovieAction::Update {
                id,
                title,
                description,
                release_date,
                genres,
                deleted,
                slug,
            } => {
                let payload = UpdateMovie {
                    title,
                    description,
                    release_date,
                    genres: (!genres.is_empty()).then_some(genres),
                    is_deleted: deleted,
                    slug,
                };
                let movie = service.update(id, payload).await.map_err(api_error)?;
                print_json(&movie)
            }
            MovieAction::Delete { id } => match service.delete(id).await.map_err(api_error)? {
                Some(movie) => print_json(&movie),
                None => anyhow::bail!("Movie {id} not found"),
            },
        }
    }
}
