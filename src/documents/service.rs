use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::extract::extract_text;
use super::store::DocumentStore;
use crate::core::errors::ApiError;
use crate::models::{self, Document, FileType};
use crate::rag::{ChunkMetadata, ContextStore, TextSplitter};

/// Document ingestion and deletion across disk, the context store and the
/// document table.
#[derive(Clone)]
pub struct DocumentService {
    store: DocumentStore,
    context: Arc<dyn ContextStore>,
    splitter: TextSplitter,
    upload_dir: PathBuf,
}

impl DocumentService {
    pub fn new(
        store: DocumentStore,
        context: Arc<dyn ContextStore>,
        splitter: TextSplitter,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            context,
            splitter,
            upload_dir,
        }
    }

    /// Stores, extracts, chunks and indexes an upload. Either every step
    /// succeeds and a processed record exists, or the raw file, any indexed
    /// chunks and the record are all gone.
    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<Document, ApiError> {
        let file_type = FileType::from_filename(filename)?;

        let id = uuid::Uuid::new_v4().to_string();
        let path = self
            .upload_dir
            .join(format!("{}_{}", id, sanitize_filename(filename)));

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(ApiError::internal)?;
        if let Err(err) = tokio::fs::write(&path, &bytes).await {
            self.rollback(&id, &path).await;
            return Err(ApiError::internal(format!("Failed to store upload: {}", err)));
        }

        match self.ingest(&id, filename, file_type, &path, bytes).await {
            Ok(document) => {
                info!(
                    "Processed document {} ({}, {} chunks)",
                    document.filename, document.id, document.chunk_count
                );
                Ok(document)
            }
            Err(err) => {
                warn!("Ingestion of {} failed, rolling back: {}", filename, err);
                self.rollback(&id, &path).await;
                Err(err)
            }
        }
    }

    async fn ingest(
        &self,
        id: &str,
        filename: &str,
        file_type: FileType,
        path: &Path,
        bytes: Vec<u8>,
    ) -> Result<Document, ApiError> {
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, file_type))
            .await
            .map_err(|e| ApiError::Processing(format!("Extraction task failed: {}", e)))??;

        let chunks = self.splitter.split(&text);
        if chunks.is_empty() {
            return Err(ApiError::Processing(
                "No text content could be extracted".to_string(),
            ));
        }

        let chunk_count = self
            .context
            .upsert(
                chunks,
                ChunkMetadata {
                    document_id: id.to_string(),
                    filename: filename.to_string(),
                    file_type,
                },
            )
            .await
            .map_err(|e| match e {
                ApiError::Processing(_) => e,
                other => ApiError::Processing(other.to_string()),
            })?;

        let document = Document {
            id: id.to_string(),
            filename: filename.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            file_type,
            chunk_count: chunk_count as i64,
            uploaded_at: models::now(),
            processed: true,
        };
        self.store.insert(&document).await?;
        Ok(document)
    }

    async fn rollback(&self, id: &str, path: &Path) {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), err);
            }
        }
        if let Err(err) = self.context.delete(id).await {
            warn!("Failed to remove chunks of {}: {}", id, err);
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        self.store.list().await
    }

    /// Removes chunks and the raw file best-effort, then the record.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), ApiError> {
        let document = self.store.get(document_id).await?;

        match self.context.delete(document_id).await {
            Ok(removed) => info!("Removed {} chunks of {}", removed, document_id),
            Err(err) => warn!("Failed to remove chunks of {}: {}", document_id, err),
        }

        if let Err(err) = tokio::fs::remove_file(&document.file_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", document.file_path, err);
            }
        }

        self.store.delete(document_id).await
    }
}

/// Keeps the final path component, replacing anything outside
/// `[A-Za-z0-9._-]`.
fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
