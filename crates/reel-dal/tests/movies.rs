use futures::TryStreamExt as _;
use reel_dal::{
    Error,
    movie::{CreateMovie, MovieChanges, MovieRepository},
    query::{Condition, QueryBuilder, QueryDefaults, QueryParams},
};
use sqlx::Executor;
use time::macros::date;

const TEST_DATA: &str = r#"
INSERT INTO genre (id, version, name, slug) VALUES (1, 1, 'Science Fiction', 'science-fiction');
INSERT INTO genre (id, version, name, slug) VALUES (2, 1, 'Drama', 'drama');
INSERT INTO genre (id, version, name, slug) VALUES (3, 1, 'Crime', 'crime');

INSERT INTO movie (id, version, created, modified, title, description, release_date, slug, is_deleted)
VALUES (1, 1, '2024-01-01 10:00:00', '2024-01-01 10:00:00', 'Dune', 'Spice must flow', '2021-10-22', 'dune-2021-10-22', FALSE);
INSERT INTO movie (id, version, created, modified, title, description, release_date, slug, is_deleted)
VALUES (2, 1, '2024-01-02 10:00:00', '2024-01-02 10:00:00', 'Heat', 'Los Angeles crime saga', '1995-12-15', 'heat-1995-12-15', FALSE);
INSERT INTO movie (id, version, created, modified, title, description, release_date, slug, is_deleted)
VALUES (3, 1, '2024-01-03 10:00:00', '2024-01-03 10:00:00', 'Arrival', NULL, '2016-11-11', 'arrival-2016-11-11', TRUE);

INSERT INTO movie_genres (movie_id, genre_id) VALUES (1, 1);
INSERT INTO movie_genres (movie_id, genre_id) VALUES (1, 2);
INSERT INTO movie_genres (movie_id, genre_id) VALUES (2, 3);
INSERT INTO movie_genres (movie_id, genre_id) VALUES (3, 1);
"#;

async fn init_db() -> sqlx::Pool<sqlx::Sqlite> {
    const DB_URL: &str = "sqlite::memory:";
    let conn = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect_with(reel_dal::connect_options(DB_URL).unwrap())
        .await
        .unwrap();
    reel_dal::migrate(&conn).await.unwrap();

    conn.execute_many(TEST_DATA)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    conn
}

#[tokio::test]
async fn test_movie_lookups() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);

    let movie = repo.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(movie.title, "Dune");
    assert_eq!(movie.release_date, date!(2021 - 10 - 22));
    let genre_names: Vec<_> = movie.genres.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(genre_names, ["Drama", "Science Fiction"]);

    let by_slug = repo.find_by_slug("heat-1995-12-15").await.unwrap().unwrap();
    assert_eq!(by_slug.id, 2);

    let found = repo.find_one("Dune", date!(2021 - 10 - 22)).await.unwrap();
    assert!(found.is_some());
    let missing = repo.find_one("Dune", date!(1984 - 12 - 14)).await.unwrap();
    assert!(missing.is_none());

    assert!(repo.find_by_id(42).await.unwrap().is_none());
    assert_eq!(repo.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_movie_create() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);

    let payload = CreateMovie {
        title: "Blade Runner".to_string(),
        description: Some("Replicants".to_string()),
        release_date: date!(1982 - 06 - 25),
        genres: vec![1, 3, 1],
    };
    let movie = repo
        .create(payload.clone(), "blade-runner-1982-06-25".to_string())
        .await
        .unwrap();
    assert_eq!(movie.slug, "blade-runner-1982-06-25");
    assert_eq!(movie.version, 1);
    assert!(!movie.is_deleted);
    assert_eq!(movie.genres.len(), 2);

    let err = repo
        .create(payload, "blade-runner-again".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_movie_create_unknown_genre() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);

    let payload = CreateMovie {
        title: "Alien".to_string(),
        description: None,
        release_date: date!(1979 - 05 - 25),
        genres: vec![99],
    };
    let err = repo
        .create(payload, "alien-1979-05-25".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReference(ref what) if what == "Genre"));
    assert!(repo.find_by_slug("alien-1979-05-25").await.unwrap().is_none());

    let changes = MovieChanges {
        genres: Some(vec![2, 99]),
        ..Default::default()
    };
    let err = repo.update(1, changes).await.unwrap_err();
    assert!(matches!(err, Error::InvalidReference(_)));
    let dune = repo.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(dune.version, 1);
    assert_eq!(dune.genres.len(), 2);
}

#[tokio::test]
async fn test_movie_update() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);

    let changes = MovieChanges {
        description: Some("Arrakis".to_string()),
        genres: Some(vec![1]),
        ..Default::default()
    };
    let updated = repo.update(1, changes).await.unwrap().unwrap();
    assert_eq!(updated.description.as_deref(), Some("Arrakis"));
    assert_eq!(updated.slug, "dune-2021-10-22");
    assert_eq!(updated.version, 2);
    assert_eq!(updated.genres.len(), 1);

    let deleted = repo
        .update(2, MovieChanges::soft_delete())
        .await
        .unwrap()
        .unwrap();
    assert!(deleted.is_deleted);
    assert!(repo.find_by_id(2).await.unwrap().unwrap().is_deleted);

    assert!(
        repo.update(42, MovieChanges::soft_delete())
            .await
            .unwrap()
            .is_none()
    );

    let clash = MovieChanges {
        title: Some("Heat".to_string()),
        release_date: Some(date!(1995 - 12 - 15)),
        slug: Some("heat-1995-12-15-copy".to_string()),
        ..Default::default()
    };
    let err = repo.update(1, clash).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn test_movie_list() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);
    let defaults = QueryDefaults::default();

    let spec = QueryBuilder::new(QueryParams::new(), &defaults)
        .paginate()
        .sort()
        .fields()
        .build()
        .unwrap();
    let all = repo.list(spec).await.unwrap();
    assert_eq!(all.total, 3);
    let ids: Vec<_> = all.rows.iter().map(|m| m.id).collect();
    assert_eq!(ids, [3, 2, 1]);

    let params = QueryParams::new()
        .with_search_term("CRIME")
        .with_fields("title");
    let spec = QueryBuilder::new(params, &defaults)
        .search(&["title", "description"])
        .paginate()
        .sort()
        .fields()
        .build()
        .unwrap();
    let found = repo.list(spec).await.unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.rows[0].title, "Heat");
    let value = serde_json::to_value(&found.rows[0]).unwrap();
    assert_eq!(value, serde_json::json!({"id": 2, "title": "Heat"}));

    let params = QueryParams::new()
        .with_filter("genres", "1")
        .with_sort("title");
    let spec = QueryBuilder::new(params, &defaults)
        .filter(&[])
        .sort()
        .build()
        .unwrap();
    let in_genre = repo.list(spec).await.unwrap();
    let titles: Vec<_> = in_genre.rows.iter().map(|m| m.title.as_str()).collect();
    assert_eq!(titles, ["Arrival", "Dune"]);

    let spec = QueryBuilder::new(QueryParams::new(), &defaults)
        .build()
        .unwrap()
        .and(Condition::equals("is_deleted", false))
        .unwrap()
        .and(Condition::one_of("genres", vec![1, 3]))
        .unwrap();
    let visible = repo.list(spec).await.unwrap();
    assert_eq!(visible.total, 2);
}

#[tokio::test]
async fn test_movie_list_pages() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);
    let defaults = QueryDefaults::default();

    let params = QueryParams::new().with_sort("title").with_page(2).with_limit(2);
    let spec = QueryBuilder::new(params, &defaults)
        .paginate()
        .sort()
        .build()
        .unwrap();
    let page = repo.list(spec).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.offset, 2);
    assert_eq!(page.rows.len(), 1);
    assert_eq!(page.rows[0].title, "Heat");
}

#[tokio::test]
async fn test_movie_list_text_matching() {
    let conn = init_db().await;
    let repo = MovieRepository::new(conn);
    let defaults = QueryDefaults::default();

    for (title, slug) in [("007", "007-1962-10-05"), ("true", "true-1962-10-05")] {
        let payload = CreateMovie {
            title: title.to_string(),
            description: None,
            release_date: date!(1962 - 10 - 05),
            genres: vec![3],
        };
        repo.create(payload, slug.to_string()).await.unwrap();
    }
    let payload = CreateMovie {
        title: "Amélie".to_string(),
        description: Some("Le fabuleux destin d'Amélie Poulain".to_string()),
        release_date: date!(2001 - 04 - 25),
        genres: vec![2],
    };
    let amelie = repo
        .create(payload, "amelie-2001-04-25".to_string())
        .await
        .unwrap();

    for title in ["007", "true"] {
        let spec = QueryBuilder::new(QueryParams::new().with_filter("title", title), &defaults)
            .filter(&[])
            .build()
            .unwrap();
        let found = repo.list(spec).await.unwrap();
        assert_eq!(found.total, 1, "title filter {title}");
        assert_eq!(found.rows[0].title, title);
    }

    for term in ["AMÉLIE", "amélie", "DESTIN D'AM"] {
        let spec = QueryBuilder::new(QueryParams::new().with_search_term(term), &defaults)
            .search(&["title", "description"])
            .build()
            .unwrap();
        let found = repo.list(spec).await.unwrap();
        assert_eq!(found.total, 1, "search term {term}");
        assert_eq!(found.rows[0].id, amelie.id);
    }

    let spec = QueryBuilder::new(QueryParams::new().with_search_term("(spice"), &defaults)
        .search(&["title", "description"])
        .build()
        .unwrap();
    assert_eq!(repo.list(spec).await.unwrap().total, 0);
}
