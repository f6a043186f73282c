use std::collections::HashMap;

use futures::TryStreamExt as _;
use garde::Validate;
use reel_types::utils::slugify;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Pool};
use tracing::debug;

use crate::{ChosenDB, Error, error::Result};

#[allow(clippy::ptr_arg)]
fn has_slug(value: &String, _ctx: &()) -> garde::Result {
    if slugify(value).is_empty() {
        Err(garde::Error::new("must contain at least one letter or digit"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateGenre {
    #[garde(length(min = 1, max = 255), custom(has_slug))]
    pub name: String,
    /// Derived from name when missing
    #[garde(length(min = 1, max = 255), inner(custom(has_slug)))]
    pub slug: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub version: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GenreShort {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

pub type GenreRepository = GenreRepositoryImpl<Pool<ChosenDB>>;

pub struct GenreRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> GenreRepositoryImpl<E>
where
    for<'a> &'a E: Executor<'c, Database = ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateGenre) -> Result<Genre> {
        let slug = payload
            .slug
            .as_deref()
            .map(slugify)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| slugify(&payload.name));
        if slug.is_empty() {
            return Err(Error::InvalidValue(format!(
                "Genre {:?} has no usable slug",
                payload.name
            )));
        }
        let result = sqlx::query("INSERT INTO genre (name, slug, version) VALUES (?, ?, 1)")
            .bind(&payload.name)
            .bind(&slug)
            .execute(&self.executor)
            .await
            .map_err(|e| Error::from_write(e, "Genre"))?;

        let id = result.last_insert_rowid();
        debug!("Created genre {slug} with id {id}");
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<Genre> {
        sqlx::query_as::<_, Genre>("SELECT id, name, slug, version FROM genre WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.executor)
            .await?
            .ok_or_else(|| Error::RecordNotFound("Genre".to_string()))
    }

    pub async fn list_all(&self) -> Result<Vec<GenreShort>> {
        let records = sqlx::query_as::<_, GenreShort>(
            "SELECT id, name, slug FROM genre ORDER BY name LIMIT ?",
        )
        .bind(crate::MAX_LIMIT as i64)
        .fetch(&self.executor)
        .try_collect::<Vec<_>>()
        .await?;
        Ok(records)
    }

    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<GenreShort>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut query = sqlx::QueryBuilder::<ChosenDB>::new(
            "SELECT id, name, slug FROM genre WHERE id IN (",
        );
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(") ORDER BY name");
        let records = query
            .build_query_as::<GenreShort>()
            .fetch_all(&self.executor)
            .await?;
        Ok(records)
    }

    /// Ids of genres whose slug contains `pattern`, ignoring case.
    pub async fn find_ids_by_slug_pattern(&self, pattern: &str) -> Result<Vec<i64>> {
        // slugs are stored lowercase
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM genre WHERE instr(slug, ?) > 0 ORDER BY id",
        )
        .bind(pattern.to_lowercase())
        .fetch_all(&self.executor)
        .await?;
        debug!("Genre pattern {pattern:?} matched {} genres", ids.len());
        Ok(ids)
    }
}

/// Loads genres linked to given movies, keyed by movie id.
pub(crate) async fn genres_for_movies<'c, X>(
    movie_ids: &[i64],
    executor: X,
) -> Result<HashMap<i64, Vec<GenreShort>>>
where
    X: Executor<'c, Database = ChosenDB>,
{
    if movie_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut query = sqlx::QueryBuilder::<ChosenDB>::new(
        "SELECT mg.movie_id, g.id, g.name, g.slug FROM movie_genres mg \
         JOIN genre g ON g.id = mg.genre_id WHERE mg.movie_id IN (",
    );
    let mut list = query.separated(", ");
    for id in movie_ids {
        list.push_bind(*id);
    }
    list.push_unseparated(") ORDER BY g.name");

    let rows = query
        .build_query_as::<(i64, i64, String, String)>()
        .fetch_all(executor)
        .await?;

    let mut genres: HashMap<i64, Vec<GenreShort>> = HashMap::new();
    for (movie_id, id, name, slug) in rows {
        genres
            .entry(movie_id)
            .or_default()
            .push(GenreShort { id, name, slug });
    }
    Ok(genres)
}
