//! PostgreSQL corpus store.
//!
//! The connection is an explicit resource: `connect` opens it and spawns the
//! connection driver, `close` drops the client and waits for the driver to
//! finish. Nothing here is global.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litmerge_common::{ExternalIdentifierSet, IdField};
use pgvector::Vector;
use tokio::task::JoinHandle;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::schema::{CanonicalRecord, RecordCandidate, RecordField, TextUnitRecord};
use crate::store::CorpusStore;

const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS canonical_records (
    id               UUID PRIMARY KEY,
    source_system_id TEXT,
    doi              TEXT,
    pubmed_id        TEXT,
    pmc_id           TEXT,
    title            TEXT NOT NULL,
    primary_link     TEXT NOT NULL,
    resolved_link    TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS canonical_records_source_system_id_key
    ON canonical_records (source_system_id) WHERE source_system_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS canonical_records_doi_key
    ON canonical_records (doi) WHERE doi IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS canonical_records_pubmed_id_key
    ON canonical_records (pubmed_id) WHERE pubmed_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS canonical_records_pmc_id_key
    ON canonical_records (pmc_id) WHERE pmc_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS text_units (
    id          UUID PRIMARY KEY,
    record_id   UUID NOT NULL REFERENCES canonical_records (id),
    chunk_index INTEGER NOT NULL,
    text        TEXT NOT NULL,
    embedding   vector,
    metadata    JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS text_units_record_id_idx ON text_units (record_id);
"#;

const RECORD_COLUMNS: &str =
    "id, source_system_id, doi, pubmed_id, pmc_id, title, primary_link, resolved_link, created_at, updated_at";

pub struct PgStore {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgStore {
    /// Open a connection and start its driver task.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connected");
        Ok(Self { client, driver })
    }

    /// Create tables and unique indexes if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA_SQL).await?;
        debug!("Corpus schema ready");
        Ok(())
    }

    /// Drop the client and wait for the connection driver to exit.
    pub async fn close(self) {
        drop(self.client);
        if let Err(e) = self.driver.await {
            warn!(error = %e, "PostgreSQL driver task failed");
        }
        info!("PostgreSQL connection closed");
    }
}

fn row_to_record(row: &Row) -> Result<CanonicalRecord> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(CanonicalRecord {
        id: row.try_get("id")?,
        identifiers: ExternalIdentifierSet {
            source_system_id: row.try_get("source_system_id")?,
            doi: row.try_get("doi")?,
            pubmed_id: row.try_get("pubmed_id")?,
            pmc_id: row.try_get("pmc_id")?,
        },
        title: row.try_get("title")?,
        primary_link: row.try_get("primary_link")?,
        resolved_link: row.try_get("resolved_link")?,
        created_at,
        updated_at,
    })
}

/// Build the OR predicate over present identifier fields. Returns `None` for an empty set.
fn identifier_predicate(ids: &ExternalIdentifierSet) -> Option<(String, Vec<String>)> {
    let present = ids.present();
    if present.is_empty() {
        return None;
    }
    let clauses: Vec<String> = present
        .iter()
        .enumerate()
        .map(|(i, (field, _))| format!("{} = ${}", field.as_str(), i + 1))
        .collect();
    let values = present.iter().map(|(_, v)| v.to_string()).collect();
    Some((clauses.join(" OR "), values))
}

#[async_trait]
impl CorpusStore for PgStore {
    async fn find_by_identifiers(&self, ids: &ExternalIdentifierSet) -> Result<Option<CanonicalRecord>> {
        let Some((predicate, values)) = identifier_predicate(ids) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM canonical_records WHERE {predicate} ORDER BY created_at LIMIT 1"
        );
        let params: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let row = self.client.query_opt(sql.as_str(), &params).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, candidate: &RecordCandidate) -> Result<CanonicalRecord> {
        let ids = &candidate.identifiers;
        let sql = format!(
            "INSERT INTO canonical_records \
                 (id, source_system_id, doi, pubmed_id, pmc_id, title, primary_link) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = self
            .client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &ids.get(IdField::SourceSystemId),
                    &ids.get(IdField::Doi),
                    &ids.get(IdField::PubmedId),
                    &ids.get(IdField::PmcId),
                    &candidate.title,
                    &candidate.primary_link,
                ],
            )
            .await?;
        let record = row_to_record(&row)?;
        debug!(record_id = %record.id, ids = %ids.describe(), "Inserted canonical record");
        Ok(record)
    }

    async fn update_field(&self, id: Uuid, field: RecordField, value: &str) -> Result<()> {
        let sql = format!(
            "UPDATE canonical_records SET {} = $1, updated_at = now() WHERE id = $2",
            field.column()
        );
        let n = self.client.execute(sql.as_str(), &[&value, &id]).await?;
        if n == 0 {
            return Err(DbError::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    async fn exists_for_record(&self, id: Uuid) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM text_units WHERE record_id = $1)",
                &[&id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn insert_text_unit(&self, unit: &TextUnitRecord) -> Result<()> {
        let embedding = unit.embedding.clone().map(Vector::from);
        let chunk_index = i32::try_from(unit.chunk_index)
            .map_err(|_| DbError::Query(format!("chunk index {} out of range", unit.chunk_index)))?;
        self.client
            .execute(
                "INSERT INTO text_units (id, record_id, chunk_index, text, embedding, metadata, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &unit.id,
                    &unit.record_id,
                    &chunk_index,
                    &unit.text,
                    &embedding,
                    &Json(&unit.metadata),
                    &unit.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_by_link_prefix(&self, prefix: &str) -> Result<Vec<CanonicalRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM canonical_records \
             WHERE left(primary_link, char_length($1)) = $1 ORDER BY created_at"
        );
        let rows = self.client.query(sql.as_str(), &[&prefix]).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn record_count(&self) -> Result<usize> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM canonical_records", &[])
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(n as usize)
    }
}
