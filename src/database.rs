use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::document::{DocumentId, NodeId};
use crate::persistence::{
    Backend, ContentRow, DocumentSummary, NodeContent, StoredDocument, StructuralPayload,
};

const DB_PATH_DEFAULT: &str = "kmap.db";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(
                std::env::var("KMAP_DB_PATH").unwrap_or_else(|_| DB_PATH_DEFAULT.to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database at {}", config.path.display()))?;

        let db = Self {
            pool,
            config: config.clone(),
        };

        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#)
        .execute(&self.pool)
        .await
        .context("Failed to create documents table")?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS node_contents (
                node_id TEXT PRIMARY KEY NOT NULL,
                document_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                overview TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
        "#)
        .execute(&self.pool)
        .await
        .context("Failed to create node_contents table")?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_node_contents_document ON node_contents(document_id)"#)
        .execute(&self.pool)
        .await
        .context("Failed to create node_contents_document index")?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at DESC)"#)
        .execute(&self.pool)
        .await
        .context("Failed to create documents_updated index")?;

        Ok(())
    }
}

/// SQLite timestamps come back as `YYYY-MM-DD HH:MM:SS` in UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Invalid timestamp '{raw}'"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// [`Backend`] over the `documents` and `node_contents` tables.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        Ok(Self::new(Database::new(config).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl Backend for SqliteBackend {
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"SELECT id, name, updated_at FROM documents ORDER BY updated_at DESC, name ASC"#,
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list documents")?;

        rows.iter()
            .map(|row| -> Result<DocumentSummary> {
                Ok(DocumentSummary {
                    id: DocumentId::from(row.try_get::<String, _>("id")?),
                    name: row.try_get("name")?,
                    updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
                })
            })
            .collect()
    }

    async fn load_document(&self, id: &DocumentId) -> Result<StoredDocument> {
        let row = sqlx::query(r#"SELECT id, name, data, updated_at FROM documents WHERE id = ?"#)
            .bind(id.as_str())
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to load document")?
            .ok_or_else(|| anyhow!("Document '{id}' not found"))?;

        let data: String = row.try_get("data")?;
        let payload: StructuralPayload = serde_json::from_str(&data)
            .with_context(|| format!("Document '{id}' has a malformed structure"))?;

        Ok(StoredDocument {
            id: DocumentId::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            payload,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    async fn load_content(&self, id: &DocumentId) -> Result<HashMap<NodeId, NodeContent>> {
        let rows = sqlx::query(
            r#"SELECT node_id, content, overview FROM node_contents WHERE document_id = ?"#,
        )
        .bind(id.as_str())
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load node content")?;

        rows.iter()
            .map(|row| -> Result<(NodeId, NodeContent)> {
                Ok((
                    NodeId::from(row.try_get::<String, _>("node_id")?),
                    NodeContent {
                        content: row.try_get("content")?,
                        overview: row.try_get("overview")?,
                    },
                ))
            })
            .collect()
    }

    async fn save_document(
        &self,
        id: Option<&DocumentId>,
        name: &str,
        payload: &StructuralPayload,
    ) -> Result<DocumentId> {
        let data = serde_json::to_string(payload).context("Failed to serialize document")?;

        match id {
            Some(id) => {
                let result = sqlx::query(
                    r#"UPDATE documents SET name = ?, data = ?, updated_at = datetime('now') WHERE id = ?"#,
                )
                .bind(name)
                .bind(&data)
                .bind(id.as_str())
                .execute(self.db.pool())
                .await
                .context("Failed to update document")?;

                if result.rows_affected() == 0 {
                    return Err(anyhow!("Document '{id}' not found"));
                }
                Ok(id.clone())
            }
            None => {
                let id = DocumentId::generate();
                sqlx::query(r#"INSERT INTO documents (id, name, data) VALUES (?, ?, ?)"#)
                    .bind(id.as_str())
                    .bind(name)
                    .bind(&data)
                    .execute(self.db.pool())
                    .await
                    .context("Failed to create document")?;
                Ok(id)
            }
        }
    }

    async fn upsert_content(&self, document: &DocumentId, rows: &[ContentRow]) -> Result<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("Failed to start content transaction")?;

        for row in rows {
            sqlx::query(
                r#"INSERT INTO node_contents (node_id, document_id, title, content, overview)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT(node_id) DO UPDATE SET
                       document_id = excluded.document_id,
                       title = excluded.title,
                       content = excluded.content,
                       overview = excluded.overview,
                       updated_at = datetime('now')"#,
            )
            .bind(row.node_id.as_str())
            .bind(document.as_str())
            .bind(&row.title)
            .bind(&row.content)
            .bind(&row.overview)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert node content")?;
        }

        tx.commit().await.context("Failed to commit node content")?;
        Ok(())
    }

    async fn delete_content_row(&self, node: &NodeId) -> Result<()> {
        sqlx::query(r#"DELETE FROM node_contents WHERE node_id = ?"#)
            .bind(node.as_str())
            .execute(self.db.pool())
            .await
            .context("Failed to delete node content")?;
        Ok(())
    }

    async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        sqlx::query(r#"DELETE FROM documents WHERE id = ?"#)
            .bind(id.as_str())
            .execute(self.db.pool())
            .await
            .context("Failed to delete document")?;
        Ok(())
    }
}
