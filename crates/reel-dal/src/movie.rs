use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::{Acquire, Executor, Pool, SqliteConnection};
use time::Date;
use tracing::debug;

use crate::{
    Batch, ChosenDB, Error,
    error::Result,
    genre::{GenreShort, genres_for_movies},
    query::{Entity, FieldKind, Link, Projected, QuerySpec, sortable_fields},
};

const ENTITY_NAME: &str = "Movie";

const SELECT_MOVIE: &str = "SELECT id, title, description, release_date, slug, is_deleted, version, created, modified FROM movie";

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub release_date: Date,
    #[sqlx(skip)]
    pub genres: Vec<GenreShort>,
    pub slug: String,
    pub is_deleted: bool,
    pub version: i64,
    pub created: time::PrimitiveDateTime,
    pub modified: time::PrimitiveDateTime,
}

impl Entity for Movie {
    const TABLE: &'static str = "movie";
    const FIELDS: &'static [&'static str] = &[
        "title",
        "description",
        "release_date",
        "slug",
        "is_deleted",
        "version",
        "created",
        "modified",
    ];
    const FIELD_KINDS: &'static [(&'static str, FieldKind)] = &[
        ("is_deleted", FieldKind::Bool),
        ("version", FieldKind::Int),
    ];
    const HIDDEN_FIELDS: &'static [&'static str] = &["version"];
    const DEFAULT_SORT: &'static str = "-created,-id";
    const LINKS: &'static [Link] = &[Link {
        field: "genres",
        table: "movie_genres",
        owner_key: "movie_id",
        target_key: "genre_id",
    }];
}

fn valid_genre_ids(genres: &Vec<i64>, _ctx: &()) -> garde::Result {
    if genres.is_empty() {
        Err(garde::Error::new("at least one genre is required"))
    } else if genres.iter().any(|id| *id < 1) {
        Err(garde::Error::new("genre id must be positive"))
    } else {
        Ok(())
    }
}

/// Years with four digits only, slugs carry the date as `YYYY-MM-DD`.
fn valid_release_date(date: &Date, _ctx: &()) -> garde::Result {
    if (0..=9999).contains(&date.year()) {
        Ok(())
    } else {
        Err(garde::Error::new("release year must be between 0 and 9999"))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateMovie {
    #[garde(length(min = 1, max = 511))]
    pub title: String,
    #[garde(length(max = 5000))]
    pub description: Option<String>,
    #[garde(custom(valid_release_date))]
    pub release_date: Date,
    #[garde(custom(valid_genre_ids))]
    pub genres: Vec<i64>,
}

/// Partial update as sent by a client.
///
/// `slug` is accepted only to be able to reject it.
#[derive(Debug, Serialize, Deserialize, Clone, Default, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateMovie {
    #[garde(length(min = 1, max = 511))]
    pub title: Option<String>,
    #[garde(length(max = 5000))]
    pub description: Option<String>,
    #[garde(inner(custom(valid_release_date)))]
    pub release_date: Option<Date>,
    #[garde(inner(custom(valid_genre_ids)))]
    pub genres: Option<Vec<i64>>,
    #[garde(skip)]
    pub is_deleted: Option<bool>,
    #[garde(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// Changes applied by [`MovieRepositoryImpl::update`], `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct MovieChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<Date>,
    pub genres: Option<Vec<i64>>,
    pub is_deleted: Option<bool>,
    pub slug: Option<String>,
}

impl MovieChanges {
    pub fn soft_delete() -> Self {
        MovieChanges {
            is_deleted: Some(true),
            ..Default::default()
        }
    }

    fn touches_columns(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.release_date.is_some()
            || self.is_deleted.is_some()
            || self.slug.is_some()
    }
}

pub type MovieRepository = MovieRepositoryImpl<Pool<ChosenDB>>;

pub struct MovieRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> MovieRepositoryImpl<E>
where
    for<'a> &'a E: Executor<'c, Database = ChosenDB> + Acquire<'c, Database = ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateMovie, slug: String) -> Result<Movie> {
        let mut transaction = self.executor.begin().await?;
        let result = sqlx::query(
            "INSERT INTO movie (title, description, release_date, slug, is_deleted, version) VALUES (?, ?, ?, ?, FALSE, 1)",
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(payload.release_date)
        .bind(&slug)
        .execute(&mut *transaction)
        .await
        .map_err(|e| Error::from_write(e, ENTITY_NAME))?;

        let id = result.last_insert_rowid();
        link_genres(&mut transaction, id, &payload.genres).await?;
        let movie = load_one(&mut transaction, Lookup::Id(id))
            .await?
            .ok_or_else(|| Error::RecordNotFound(ENTITY_NAME.to_string()))?;
        transaction.commit().await?;
        debug!("Inserted movie {} with id {}", movie.slug, movie.id);
        Ok(movie)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Movie>> {
        let mut conn = self.executor.acquire().await?;
        load_one(&mut conn, Lookup::Id(id)).await
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Movie>> {
        let mut conn = self.executor.acquire().await?;
        load_one(&mut conn, Lookup::Slug(slug)).await
    }

    pub async fn find_one(&self, title: &str, release_date: Date) -> Result<Option<Movie>> {
        let mut conn = self.executor.acquire().await?;
        load_one(&mut conn, Lookup::TitleAndDate(title, release_date)).await
    }

    /// Id of the movie holding `slug`, deleted movies included.
    pub async fn slug_owner(&self, slug: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM movie WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.executor)
            .await?;
        Ok(id)
    }

    /// Returns the updated record, or `None` when no movie has this id.
    pub async fn update(&self, id: i64, changes: MovieChanges) -> Result<Option<Movie>> {
        let mut transaction = self.executor.begin().await?;

        let mut query = sqlx::QueryBuilder::<ChosenDB>::new("UPDATE movie SET ");
        let mut columns = query.separated(", ");
        if let Some(title) = changes.title.clone() {
            columns.push("title = ").push_bind_unseparated(title);
        }
        if let Some(description) = changes.description.clone() {
            columns
                .push("description = ")
                .push_bind_unseparated(description);
        }
        if let Some(release_date) = changes.release_date {
            columns
                .push("release_date = ")
                .push_bind_unseparated(release_date);
        }
        if let Some(is_deleted) = changes.is_deleted {
            columns.push("is_deleted = ").push_bind_unseparated(is_deleted);
        }
        if let Some(slug) = changes.slug.clone() {
            columns.push("slug = ").push_bind_unseparated(slug);
        }
        columns.push("version = version + 1");
        columns.push("modified = datetime('now')");
        query.push(" WHERE id = ").push_bind(id);

        let result = query
            .build()
            .execute(&mut *transaction)
            .await
            .map_err(|e| Error::from_write(e, ENTITY_NAME))?;

        if result.rows_affected() == 0 {
            debug!("No movie with id {id} to update");
            return Ok(None);
        }

        if let Some(genres) = changes.genres.as_deref() {
            sqlx::query("DELETE FROM movie_genres WHERE movie_id = ?")
                .bind(id)
                .execute(&mut *transaction)
                .await?;
            link_genres(&mut transaction, id, genres).await?;
        } else if !changes.touches_columns() {
            debug!("Update of movie {id} only bumped version");
        }

        let movie = load_one(&mut transaction, Lookup::Id(id)).await?;
        transaction.commit().await?;
        Ok(movie)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM movie")
            .fetch_one(&self.executor)
            .await?;
        Ok(count.try_into().unwrap_or_default())
    }

    /// Executes listing spec, genres are populated for returned rows.
    pub async fn list(&self, spec: QuerySpec<Movie>) -> Result<Batch<Projected<Movie>>> {
        let listing = spec.listing();
        let order = listing.ordering(&sortable_fields::<Movie>())?;
        let mut conn = self.executor.acquire().await?;

        let mut count_query =
            sqlx::QueryBuilder::<ChosenDB>::new(format!("SELECT count(*) FROM {}", Movie::TABLE));
        spec.push_where(&mut count_query);
        let total: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *conn)
            .await?;

        let mut query = sqlx::QueryBuilder::<ChosenDB>::new(SELECT_MOVIE);
        spec.push_where(&mut query);
        if !order.is_empty() {
            query.push(" ORDER BY ").push(&order);
        }
        query
            .push(" LIMIT ")
            .push_bind(listing.limit)
            .push(" OFFSET ")
            .push_bind(listing.offset);
        debug!("Listing movies: {}", query.sql());

        let movies = query
            .build_query_as::<Movie>()
            .fetch_all(&mut *conn)
            .await?;
        let movies = attach_genres(&mut conn, movies).await?;

        let projection = spec.projection();
        Ok(Batch {
            offset: listing.offset,
            limit: listing.limit,
            total: total.try_into().unwrap_or_default(),
            rows: movies
                .into_iter()
                .map(|m| Projected::new(m, projection.clone()))
                .collect(),
        })
    }
}

enum Lookup<'a> {
    Id(i64),
    Slug(&'a str),
    TitleAndDate(&'a str, Date),
}

async fn load_one(conn: &mut SqliteConnection, lookup: Lookup<'_>) -> Result<Option<Movie>> {
    let mut query = sqlx::QueryBuilder::<ChosenDB>::new(SELECT_MOVIE);
    match lookup {
        Lookup::Id(id) => query.push(" WHERE id = ").push_bind(id),
        Lookup::Slug(slug) => query.push(" WHERE slug = ").push_bind(slug.to_string()),
        Lookup::TitleAndDate(title, release_date) => query
            .push(" WHERE title = ")
            .push_bind(title.to_string())
            .push(" AND release_date = ")
            .push_bind(release_date),
    };
    let movie = query
        .build_query_as::<Movie>()
        .fetch_optional(&mut *conn)
        .await?;
    match movie {
        Some(movie) => Ok(attach_genres(conn, vec![movie]).await?.pop()),
        None => Ok(None),
    }
}

async fn attach_genres(conn: &mut SqliteConnection, mut movies: Vec<Movie>) -> Result<Vec<Movie>> {
    let ids = movies.iter().map(|m| m.id).collect::<Vec<_>>();
    let mut genres = genres_for_movies(&ids, &mut *conn).await?;
    for movie in movies.iter_mut() {
        movie.genres = genres.remove(&movie.id).unwrap_or_default();
    }
    Ok(movies)
}

async fn link_genres(conn: &mut SqliteConnection, movie_id: i64, genres: &[i64]) -> Result<()> {
    if genres.is_empty() {
        return Ok(());
    }
    let mut query =
        sqlx::QueryBuilder::<ChosenDB>::new("INSERT OR IGNORE INTO movie_genres (movie_id, genre_id) ");
    query.push_values(genres, |mut row, genre_id| {
        row.push_bind(movie_id).push_bind(*genre_id);
    });
    query
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::from_write(e, "Genre"))?;
    Ok(())
}
