use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::models::{format_timestamp, parse_timestamp, Document, FileType};

/// Document records in the main database.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_type TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                uploaded_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init documents table: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, document: &Document) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO documents (id, filename, file_path, file_type, chunk_count, uploaded_at, processed)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.filename)
        .bind(&document.file_path)
        .bind(document.file_type.as_str())
        .bind(document.chunk_count)
        .bind(format_timestamp(document.uploaded_at))
        .bind(document.processed)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save document: {}", e)))?;
        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Result<Document, ApiError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(ApiError::NotFound("Document not found".to_string())),
        }
    }

    pub async fn list(&self) -> Result<Vec<Document>, ApiError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn delete(&self, document_id: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Document not found".to_string()));
        }
        Ok(())
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document, ApiError> {
    let file_type: String = row.try_get("file_type").map_err(ApiError::internal)?;
    let uploaded_at: String = row.try_get("uploaded_at").map_err(ApiError::internal)?;
    Ok(Document {
        id: row.try_get("id").map_err(ApiError::internal)?,
        filename: row.try_get("filename").map_err(ApiError::internal)?,
        file_path: row.try_get("file_path").map_err(ApiError::internal)?,
        file_type: FileType::parse(&file_type)?,
        chunk_count: row.try_get("chunk_count").map_err(ApiError::internal)?,
        uploaded_at: parse_timestamp(&uploaded_at)?,
        processed: row.try_get("processed").map_err(ApiError::internal)?,
    })
}
