//! fairway-db
//!
//! PostgreSQL-backed document store. Documents live as JSONB rows keyed by
//! `(collection, doc_id)`; merge writes use `||`, commit-time fields use the
//! transaction timestamp, and equality queries use `@>` containment.

pub mod store;

pub use sqlx::PgPool;
pub use store::PgDocumentStore;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

/// Connect with an explicit URL.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_documents_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'documents'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_documents_table: exists,
    })
}

/// `(total, stale)` document counts for one collection.
pub async fn collection_counts(pool: &PgPool, collection: &str) -> Result<(i64, i64)> {
    let (total, stale): (i64, i64) = sqlx::query_as::<_, (i64, i64)>(
        r#"
        select count(*),
               count(*) filter (where data @> '{"stale": true}'::jsonb)
        from documents
        where collection = $1
        "#,
    )
    .bind(collection)
    .fetch_one(pool)
    .await
    .context("collection count query failed")?;
    Ok((total, stale))
}
