use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::models::{self, format_timestamp, parse_timestamp, Message, MessageRole, Thread};

/// One completed chat turn, committed atomically by [`HistoryStore::commit_exchange`].
#[derive(Debug, Clone)]
pub struct Exchange {
    pub thread_id: String,
    pub user_content: String,
    pub assistant_content: String,
    pub sources: Option<String>,
    /// New thread title, set only on a thread's first turn.
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommittedExchange {
    pub thread: Thread,
    pub user_message: Message,
    pub assistant_message: Message,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    default_title: String,
}

impl HistoryStore {
    pub async fn new(pool: SqlitePool, default_title: impl Into<String>) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init threads table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                sources TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(thread_id) REFERENCES threads(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init messages table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id, created_at)",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self {
            pool,
            default_title: default_title.into(),
        })
    }

    pub async fn create_thread(&self, title: Option<String>) -> Result<Thread, ApiError> {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.default_title.clone());
        let now = models::now();
        let thread = Thread {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            created_at: now,
            updated_at: now,
        };

        sqlx::query("INSERT INTO threads (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&thread.id)
            .bind(&thread.title)
            .bind(format_timestamp(now))
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create thread: {}", e)))?;

        Ok(thread)
    }

    pub async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, title, created_at, updated_at FROM threads ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(thread_from_row).collect()
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        let row = sqlx::query("SELECT id, title, created_at, updated_at FROM threads WHERE id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        match row {
            Some(row) => thread_from_row(&row),
            None => Err(thread_not_found()),
        }
    }

    pub async fn update_thread_title(&self, thread_id: &str, title: &str) -> Result<Thread, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        claim_thread(&mut tx, thread_id).await?;
        let previous = fetch_updated_at(&mut tx, thread_id).await?;
        let now = advance(previous);

        sqlx::query("UPDATE threads SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(format_timestamp(now))
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        self.get_thread(thread_id).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(thread_not_found());
        }
        Ok(())
    }

    /// Messages in canonical chat order. Fails with NotFound for an unknown thread.
    pub async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError> {
        self.get_thread(thread_id).await?;
        self.thread_messages(thread_id).await
    }

    /// [`Self::list_messages`] for callers that already loaded the thread.
    /// An unknown thread yields an empty list.
    pub(crate) async fn thread_messages(&self, thread_id: &str) -> Result<Vec<Message>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, thread_id, role, content, sources, created_at FROM messages \
             WHERE thread_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(message_from_row).collect()
    }

    /// Persists a user/assistant pair plus the thread's title and
    /// `updated_at` in a single transaction. Nothing is written if the thread
    /// no longer exists or any statement fails.
    pub async fn commit_exchange(&self, exchange: Exchange) -> Result<CommittedExchange, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        claim_thread(&mut tx, &exchange.thread_id).await?;

        let previous = fetch_updated_at(&mut tx, &exchange.thread_id).await?;
        let last_message = sqlx::query(
            "SELECT MAX(created_at) AS last FROM messages WHERE thread_id = ?",
        )
        .bind(&exchange.thread_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(ApiError::internal)?
        .try_get::<Option<String>, _>("last")
        .map_err(ApiError::internal)?;

        let mut floor = previous;
        if let Some(raw) = last_message {
            floor = floor.max(parse_timestamp(&raw)?);
        }

        let user_at = advance(floor);
        let assistant_at = user_at + Duration::microseconds(1);

        let user_message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: exchange.thread_id.clone(),
            role: MessageRole::User,
            content: exchange.user_content,
            sources: None,
            created_at: user_at,
        };
        let assistant_message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: exchange.thread_id.clone(),
            role: MessageRole::Assistant,
            content: exchange.assistant_content,
            sources: exchange.sources,
            created_at: assistant_at,
        };

        for message in [&user_message, &assistant_message] {
            sqlx::query(
                "INSERT INTO messages (id, thread_id, role, content, sources, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&message.id)
            .bind(&message.thread_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&message.sources)
            .bind(format_timestamp(message.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to insert message: {}", e)))?;
        }

        match &exchange.title {
            Some(title) => {
                sqlx::query("UPDATE threads SET title = ?, updated_at = ? WHERE id = ?")
                    .bind(title)
                    .bind(format_timestamp(assistant_at))
                    .bind(&exchange.thread_id)
                    .execute(&mut *tx)
                    .await
            }
            None => {
                sqlx::query("UPDATE threads SET updated_at = ? WHERE id = ?")
                    .bind(format_timestamp(assistant_at))
                    .bind(&exchange.thread_id)
                    .execute(&mut *tx)
                    .await
            }
        }
        .map_err(|e| ApiError::internal(format!("Failed to update thread: {}", e)))?;

        let thread = sqlx::query("SELECT id, title, created_at, updated_at FROM threads WHERE id = ?")
            .bind(&exchange.thread_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        let thread = thread_from_row(&thread)?;

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(CommittedExchange {
            thread,
            user_message,
            assistant_message,
        })
    }
}

/// Takes the database write lock by touching the thread row, so the reads
/// that follow in `tx` cannot be invalidated by a concurrent writer.
async fn claim_thread(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    thread_id: &str,
) -> Result<(), ApiError> {
    let result = sqlx::query("UPDATE threads SET updated_at = updated_at WHERE id = ?")
        .bind(thread_id)
        .execute(&mut **tx)
        .await
        .map_err(ApiError::internal)?;

    if result.rows_affected() == 0 {
        return Err(thread_not_found());
    }
    Ok(())
}

async fn fetch_updated_at(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    thread_id: &str,
) -> Result<DateTime<Utc>, ApiError> {
    let row = sqlx::query("SELECT updated_at FROM threads WHERE id = ?")
        .bind(thread_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(ApiError::internal)?;

    let Some(row) = row else {
        return Err(thread_not_found());
    };
    let raw: String = row.try_get("updated_at").map_err(ApiError::internal)?;
    parse_timestamp(&raw)
}

/// Wall-clock now, but strictly after `floor` so ordering survives clock skew
/// and same-microsecond commits.
fn advance(floor: DateTime<Utc>) -> DateTime<Utc> {
    let now = models::now();
    if now > floor {
        now
    } else {
        floor + Duration::microseconds(1)
    }
}

fn thread_not_found() -> ApiError {
    ApiError::NotFound("Thread not found".to_string())
}

fn thread_from_row(row: &SqliteRow) -> Result<Thread, ApiError> {
    let created_at: String = row.try_get("created_at").map_err(ApiError::internal)?;
    let updated_at: String = row.try_get("updated_at").map_err(ApiError::internal)?;
    Ok(Thread {
        id: row.try_get("id").map_err(ApiError::internal)?,
        title: row.try_get("title").map_err(ApiError::internal)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, ApiError> {
    let role: String = row.try_get("role").map_err(ApiError::internal)?;
    let created_at: String = row.try_get("created_at").map_err(ApiError::internal)?;
    Ok(Message {
        id: row.try_get("id").map_err(ApiError::internal)?,
        thread_id: row.try_get("thread_id").map_err(ApiError::internal)?,
        role: MessageRole::parse(&role)?,
        content: row.try_get("content").map_err(ApiError::internal)?,
        sources: row.try_get("sources").map_err(ApiError::internal)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
