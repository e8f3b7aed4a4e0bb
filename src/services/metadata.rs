//! `MetadataStore`: one row per stored file in SQLite.

use crate::{
    models::file::StoredObject,
    services::error::{ConstraintKind, StorageError, StorageResult},
};
use sqlx::{SqlitePool, error::ErrorKind};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Insert the row for a new file.
    ///
    /// Unique and foreign-key violations come back as
    /// [`StorageError::ConstraintViolation`].
    pub async fn insert(&self, object: &StoredObject) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO files (
                id, name, encoding, mime_type, storage_backend, path,
                secured, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id)
        .bind(&object.name)
        .bind(&object.encoding)
        .bind(&object.mime_type)
        .bind(object.storage_backend.as_str())
        .bind(&object.path)
        .bind(object.secured)
        .bind(object.created_at)
        .bind(object.updated_at)
        .execute(&*self.db)
        .await
        .map_err(classify)?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<StoredObject>> {
        let row = sqlx::query_as::<_, StoredObject>(
            "SELECT id, name, encoding, mime_type, storage_backend, path,
                    secured, created_at, updated_at
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    /// Drop a row. Used only to compensate a failed upload.
    pub async fn delete_by_id(&self, id: Uuid) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cheap connectivity probe for readiness checks.
    pub async fn ping(&self) -> StorageResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?)
    }
}

fn classify(err: sqlx::Error) -> StorageError {
    let kind = match &err {
        sqlx::Error::Database(db_err) => match db_err.kind() {
            ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
            ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
            ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                Some(ConstraintKind::Other)
            }
            _ => None,
        },
        _ => None,
    };
    match kind {
        Some(kind) => StorageError::ConstraintViolation {
            kind,
            message: err.to_string(),
        },
        None => StorageError::Sqlx(err),
    }
}
