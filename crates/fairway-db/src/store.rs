use std::collections::BTreeMap;

use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use fairway_reconcile::wire::{decode_document, encode_filter, encode_write, MergeFields, WireWrite};
use fairway_reconcile::{DocumentFilter, DocumentStore, StoreError, StoredDocument, WriteOp};

/// Merge: `set` overlays the existing object, `server_now` names get the
/// transaction timestamp, `remove` names are dropped afterwards.
const MERGE_SQL: &str = r#"
insert into documents (collection, doc_id, data)
values (
    $1,
    $2,
    ($3::jsonb || coalesce(
        (select jsonb_object_agg(k, to_jsonb(now())) from unnest($4::text[]) as t(k)),
        '{}'::jsonb
    )) - $5::text[]
)
on conflict (collection, doc_id) do update
set data = (documents.data || excluded.data) - $5::text[],
    updated_at = now()
"#;

const DELETE_SQL: &str = "delete from documents where collection = $1 and doc_id = $2";

const GET_MANY_SQL: &str =
    "select doc_id, data from documents where collection = $1 and doc_id = any($2)";

const STREAM_SQL: &str =
    "select doc_id, data from documents where collection = $1 and data @> $2 order by doc_id";

#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    collection: String,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode_row(row: &PgRow) -> Result<StoredDocument, StoreError> {
    let key: String = row.try_get("doc_id").map_err(backend)?;
    let data: Value = row.try_get("data").map_err(backend)?;
    match data {
        Value::Object(map) => Ok(decode_document(&key, &map)),
        other => Err(StoreError::Decode {
            key,
            message: format!("document is not an object: {other}"),
        }),
    }
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Raw JSON of one document, for inspection and tests.
    pub async fn raw(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("select data from documents where collection = $1 and doc_id = $2")
            .bind(&self.collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| r.try_get::<Value, _>("data").map_err(backend))
            .transpose()
    }

    async fn apply(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        write: WireWrite,
    ) -> Result<(), sqlx::Error> {
        match write {
            WireWrite::Merge { key, fields } => {
                let MergeFields {
                    set,
                    server_now,
                    remove,
                } = fields;
                let server_now: Vec<String> = server_now.iter().map(|s| s.to_string()).collect();
                let remove: Vec<String> = remove.iter().map(|s| s.to_string()).collect();
                sqlx::query(MERGE_SQL)
                    .bind(&self.collection)
                    .bind(key)
                    .bind(Value::Object(set))
                    .bind(server_now)
                    .bind(remove)
                    .execute(&mut **tx)
                    .await?;
            }
            WireWrite::Delete { key } => {
                sqlx::query(DELETE_SQL)
                    .bind(&self.collection)
                    .bind(key)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_many(&self, keys: &[String]) -> Result<BTreeMap<String, StoredDocument>, StoreError> {
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let rows = sqlx::query(GET_MANY_SQL)
            .bind(&self.collection)
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|r| decode_row(r).map(|d| (d.key.clone(), d)))
            .collect()
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let n = ops.len();
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for op in &ops {
            // Dropping `tx` on error rolls the whole batch back.
            self.apply(&mut tx, encode_write(op)).await.map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        debug!(collection = %self.collection, ops = n, "batch committed");
        Ok(())
    }

    fn stream_where<'a>(
        &'a self,
        filter: &DocumentFilter,
    ) -> BoxStream<'a, Result<StoredDocument, StoreError>> {
        let predicate = Value::Object(encode_filter(filter));
        sqlx::query(STREAM_SQL)
            .bind(self.collection.clone())
            .bind(predicate)
            .fetch(&self.pool)
            .map(|row| row.map_err(backend).and_then(|r| decode_row(&r)))
            .boxed()
    }
}
