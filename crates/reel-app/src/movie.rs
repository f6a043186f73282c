use garde::Validate as _;
use reel_dal::{
    Batch, Pool,
    genre::GenreRepository,
    movie::{CreateMovie, Movie, MovieChanges, MovieRepository, UpdateMovie},
    query::{Condition, Projected, QueryBuilder, QueryDefaults, QueryParams, QuerySpec},
};
use reel_types::utils::generate_slug;
use time::Date;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};

const MOVIE_EXISTS: &str = "Movie already exists!";
const SLUG_READ_ONLY: &str = "You cannot set slug directly!";

const SEARCH_FIELDS: &[&str] = &["title", "description"];
/// Query key holding genre slug fragment, handled by [`MovieService::search`].
const GENRE_KEY: &str = "genre";
const GENRES_FIELD: &str = "genres";
const IS_DELETED_FIELD: &str = "is_deleted";

/// Store attempts when a free slug gets taken before the write lands.
const SLUG_ATTEMPTS: usize = 3;
const MAX_SLUG_SUFFIX: u32 = 1000;

/// True if `slug` is `base` itself or `base` with a numeric discriminator.
fn has_base(slug: &str, base: &str) -> bool {
    match slug.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

fn slug_conflict() -> ApiError {
    ApiError::Dal(reel_dal::Error::Conflict("Movie slug".to_string()))
}

pub struct MovieService {
    movies: MovieRepository,
    genres: GenreRepository,
    defaults: QueryDefaults,
}

impl MovieService {
    pub fn new(pool: Pool, defaults: QueryDefaults) -> Self {
        Self {
            movies: MovieRepository::new(pool.clone()),
            genres: GenreRepository::new(pool),
            defaults,
        }
    }

    pub async fn create(&self, payload: CreateMovie) -> ApiResult<Movie> {
        payload.validate()?;
        if self
            .duplicate_of(&payload.title, payload.release_date, None)
            .await?
        {
            warn!(
                "Rejected duplicate movie {} ({})",
                payload.title, payload.release_date
            );
            return Err(ApiError::BadRequest(MOVIE_EXISTS.to_string()));
        }

        let base_slug = generate_slug(&payload.title, payload.release_date);
        for _ in 0..SLUG_ATTEMPTS {
            let slug = self.free_slug(&base_slug, None).await?;
            match self.movies.create(payload.clone(), slug).await {
                Ok(movie) => {
                    info!("Created movie {} with id {}", movie.slug, movie.id);
                    return Ok(movie);
                }
                Err(reel_dal::Error::Conflict(_)) => {
                    if self.duplicate_of(&payload.title, payload.release_date, None).await? {
                        return Err(ApiError::BadRequest(MOVIE_EXISTS.to_string()));
                    }
                    debug!("Slug for {base_slug} taken meanwhile, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(slug_conflict())
    }

    /// Soft-deleted movies are left out unless `is_deleted` filter is given.
    pub async fn list(&self, params: QueryParams) -> ApiResult<Batch<Projected<Movie>>> {
        let spec = self.listing_spec(params)?;
        let batch = self.movies.list(spec).await?;
        Ok(batch)
    }

    pub async fn get_by_slug(&self, slug: &str) -> ApiResult<Option<Movie>> {
        let movie = self.movies.find_by_slug(slug).await?;
        Ok(movie)
    }

    pub async fn get(&self, id: i64) -> ApiResult<Option<Movie>> {
        let movie = self.movies.find_by_id(id).await?;
        Ok(movie)
    }

    pub async fn update(&self, id: i64, payload: UpdateMovie) -> ApiResult<Movie> {
        if payload.slug.is_some() {
            warn!("Rejected update of movie {id} with explicit slug");
            return Err(ApiError::BadRequest(SLUG_READ_ONLY.to_string()));
        }
        payload.validate()?;

        let existing = self
            .movies
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Movie {id}")))?;

        let title = payload.title.clone().unwrap_or(existing.title);
        let release_date = payload.release_date.unwrap_or(existing.release_date);
        let base_slug = (payload.title.is_some() || payload.release_date.is_some())
            .then(|| generate_slug(&title, release_date))
            .filter(|base| !has_base(&existing.slug, base));

        let mut changes = MovieChanges {
            title: payload.title,
            description: payload.description,
            release_date: payload.release_date,
            genres: payload.genres,
            is_deleted: payload.is_deleted,
            slug: None,
        };
        for _ in 0..SLUG_ATTEMPTS {
            if let Some(base) = base_slug.as_deref() {
                changes.slug = Some(self.free_slug(base, Some(id)).await?);
            }
            match self.movies.update(id, changes.clone()).await {
                Ok(Some(movie)) => {
                    info!("Updated movie {} to version {}", movie.id, movie.version);
                    return Ok(movie);
                }
                Ok(None) => return Err(ApiError::NotFound(format!("Movie {id}"))),
                Err(reel_dal::Error::Conflict(_)) => {
                    if self.duplicate_of(&title, release_date, Some(id)).await? {
                        return Err(ApiError::BadRequest(MOVIE_EXISTS.to_string()));
                    }
                    debug!("Slug for movie {id} taken meanwhile, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(slug_conflict())
    }

    /// Like [`MovieService::list`], plus `genre` narrows results to genres whose slug contains it.
    pub async fn search(&self, params: QueryParams) -> ApiResult<Batch<Projected<Movie>>> {
        let genre_pattern = params
            .filter_value(GENRE_KEY)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let mut spec = self.listing_spec(params)?;

        if let Some(pattern) = genre_pattern {
            let genre_ids = self.genres.find_ids_by_slug_pattern(&pattern).await?;
            if genre_ids.is_empty() {
                debug!("No genre matches {pattern:?}, search result will be empty");
            }
            spec = spec.and(Condition::one_of(GENRES_FIELD, genre_ids))?;
        }

        let batch = self.movies.list(spec).await?;
        Ok(batch)
    }

    /// Marks movie as deleted, `None` when there is no such movie.
    pub async fn delete(&self, id: i64) -> ApiResult<Option<Movie>> {
        let movie = self.movies.update(id, MovieChanges::soft_delete()).await?;
        match movie {
            Some(ref m) => info!("Soft deleted movie {}", m.slug),
            None => debug!("Nothing to delete for movie {id}"),
        }
        Ok(movie)
    }

    /// `base` or the first `base-N` not used by another movie than `owner`.
    async fn free_slug(&self, base: &str, owner: Option<i64>) -> ApiResult<String> {
        for n in 1..=MAX_SLUG_SUFFIX {
            let candidate = if n == 1 {
                base.to_string()
            } else {
                format!("{base}-{n}")
            };
            match self.movies.slug_owner(&candidate).await? {
                Some(other) if Some(other) != owner => continue,
                _ => {
                    if n > 1 {
                        debug!("Slug {base} is taken, using {candidate}");
                    }
                    return Ok(candidate);
                }
            }
        }
        warn!("No free slug left for {base}");
        Err(slug_conflict())
    }

    async fn duplicate_of(
        &self,
        title: &str,
        release_date: Date,
        except: Option<i64>,
    ) -> ApiResult<bool> {
        let other = self.movies.find_one(title, release_date).await?;
        Ok(other.is_some_and(|m| Some(m.id) != except))
    }

    fn listing_spec(&self, params: QueryParams) -> ApiResult<QuerySpec<Movie>> {
        let include_deleted = params.filter_value(IS_DELETED_FIELD).is_some();
        let spec = QueryBuilder::<Movie>::new(params, &self.defaults)
            .search(SEARCH_FIELDS)
            .filter(&[GENRE_KEY])
            .paginate()
            .sort()
            .fields()
            .build()?;
        let spec = if include_deleted {
            spec
        } else {
            spec.and(Condition::equals(IS_DELETED_FIELD, false))?
        };
        Ok(spec)
    }
}
