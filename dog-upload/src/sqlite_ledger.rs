//! SQLite-backed record store.
//!
//! The pool holds a single connection, so transactions never interleave and a
//! `sqlite::memory:` database lives as long as the ledger does.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};

use crate::ledger::{ChunkCompletion, ChunkOutcome, ChunkRepo, FileRepo, SessionRepo};
use crate::{
    ChunkRecord, ChunkStatus, FileId, LedgerError, LedgerResult, OwnerId, SessionStatus,
    StoredFile, UploadId, UploadSession,
};

const SESSION_COLUMNS: &str = "upload_id, owner_id, file_name, total_size, chunk_size, \
     total_chunks, uploaded_size, status, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "upload_id, chunk_index, start_byte, end_byte, size, status, storage_key, checksum";

const FILE_COLUMNS: &str = "file_id, upload_id, owner_id, file_name, title, storage_key, \
     size_bytes, content_type, created_at";

/// Record store on SQLite
#[derive(Clone)]
pub struct SqliteUploadLedger {
    pool: Pool<Sqlite>,
}

impl SqliteUploadLedger {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let ledger = Self::with_options(opts).await?;
        info!(url, "Opened SQLite upload ledger");
        Ok(ledger)
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> LedgerResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::with_options(opts).await
    }

    async fn with_options(opts: SqliteConnectOptions) -> LedgerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create tables if they do not exist.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                upload_id     TEXT PRIMARY KEY NOT NULL,
                owner_id      TEXT NOT NULL,
                file_name     TEXT NOT NULL,
                total_size    INTEGER NOT NULL,
                chunk_size    INTEGER NOT NULL,
                total_chunks  INTEGER NOT NULL,
                uploaded_size INTEGER NOT NULL DEFAULT 0,
                status        TEXT NOT NULL,
                created_at    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_records (
                upload_id   TEXT NOT NULL REFERENCES upload_sessions(upload_id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                start_byte  INTEGER NOT NULL,
                end_byte    INTEGER NOT NULL,
                size        INTEGER NOT NULL,
                status      TEXT NOT NULL,
                storage_key TEXT,
                checksum    TEXT,
                PRIMARY KEY (upload_id, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stored_files (
                file_id      TEXT PRIMARY KEY NOT NULL,
                upload_id    TEXT UNIQUE,
                owner_id     TEXT NOT NULL,
                file_name    TEXT NOT NULL,
                title        TEXT NOT NULL,
                storage_key  TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                created_at   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunk_records_status ON chunk_records (upload_id, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn file_by_upload<'e, E>(
        executor: E,
        upload_id: &UploadId,
    ) -> LedgerResult<Option<StoredFile>>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM stored_files WHERE upload_id = ?"
        ))
        .bind(upload_id.as_str())
        .fetch_optional(executor)
        .await?;
        row.map(StoredFile::try_from).transpose()
    }
}

#[async_trait]
impl SessionRepo for SqliteUploadLedger {
    async fn create_session(
        &self,
        session: &UploadSession,
        chunks: &[ChunkRecord],
    ) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM upload_sessions WHERE upload_id = ?)",
        )
        .bind(session.upload_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(LedgerError::AlreadyExists(session.upload_id.to_string()));
        }

        sqlx::query(&format!(
            "INSERT INTO upload_sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(session.upload_id.as_str())
        .bind(session.owner_id.as_str())
        .bind(&session.file_name)
        .bind(db_int(session.total_size)?)
        .bind(db_int(session.chunk_size)?)
        .bind(db_int(session.total_chunks)?)
        .bind(db_int(session.uploaded_size)?)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            if chunk.upload_id != session.upload_id {
                return Err(LedgerError::Conflict(format!(
                    "chunk {} belongs to {}",
                    chunk.chunk_index, chunk.upload_id
                )));
            }
            let inserted = sqlx::query(&format!(
                "INSERT OR IGNORE INTO chunk_records ({CHUNK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(chunk.upload_id.as_str())
            .bind(db_int(chunk.chunk_index)?)
            .bind(db_int(chunk.start_byte)?)
            .bind(db_int(chunk.end_byte)?)
            .bind(db_int(chunk.size)?)
            .bind(chunk.status.as_str())
            .bind(chunk.storage_key.as_deref())
            .bind(chunk.checksum.as_deref())
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                return Err(LedgerError::AlreadyExists(format!(
                    "chunk {} of {}",
                    chunk.chunk_index, session.upload_id
                )));
            }
        }

        tx.commit().await?;
        debug!(upload_id = %session.upload_id, chunks = chunks.len(), "Session persisted");
        Ok(())
    }

    async fn get_session(&self, upload_id: &UploadId) -> LedgerResult<Option<UploadSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE upload_id = ?"
        ))
        .bind(upload_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(UploadSession::try_from).transpose()
    }

    async fn mark_failed(&self, upload_id: &UploadId, failed_at: i64) -> LedgerResult<bool> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        if status.is_none() {
            return Err(LedgerError::NotFound(upload_id.to_string()));
        }

        let result = sqlx::query(
            "UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ? AND status = ?",
        )
        .bind(SessionStatus::Failed.as_str())
        .bind(failed_at)
        .bind(upload_id.as_str())
        .bind(SessionStatus::Uploading.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ChunkRepo for SqliteUploadLedger {
    async fn get_chunk(
        &self,
        upload_id: &UploadId,
        chunk_index: u64,
    ) -> LedgerResult<Option<ChunkRecord>> {
        let row = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunk_records WHERE upload_id = ? AND chunk_index = ?"
        ))
        .bind(upload_id.as_str())
        .bind(db_int(chunk_index)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ChunkRecord::try_from).transpose()
    }

    async fn complete_chunk(&self, completion: &ChunkCompletion) -> LedgerResult<ChunkOutcome> {
        let upload_id = completion.upload_id.as_str();
        let chunk_index = db_int(completion.chunk_index)?;

        let mut tx = self.pool.begin().await?;

        let session_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id)
                .fetch_optional(&mut *tx)
                .await?;
        match session_status.as_deref().map(parse_session_status).transpose()? {
            None => return Err(LedgerError::NotFound(upload_id.to_string())),
            Some(SessionStatus::Uploading) => {}
            Some(other) => {
                return Err(LedgerError::Conflict(format!(
                    "session {} is {}",
                    upload_id,
                    other.as_str()
                )))
            }
        }

        let prior: Option<String> = sqlx::query_scalar(
            "SELECT status FROM chunk_records WHERE upload_id = ? AND chunk_index = ?",
        )
        .bind(upload_id)
        .bind(chunk_index)
        .fetch_optional(&mut *tx)
        .await?;
        let prior = match prior {
            Some(status) => parse_chunk_status(&status)?,
            None => {
                return Err(LedgerError::NotFound(format!(
                    "chunk {} of {}",
                    completion.chunk_index, upload_id
                )))
            }
        };
        let first_time = prior != ChunkStatus::Completed;

        sqlx::query(
            "UPDATE chunk_records SET status = ?, storage_key = ?, size = ?, checksum = ? \
             WHERE upload_id = ? AND chunk_index = ?",
        )
        .bind(ChunkStatus::Completed.as_str())
        .bind(&completion.storage_key)
        .bind(db_int(completion.size)?)
        .bind(completion.checksum.as_deref())
        .bind(upload_id)
        .bind(chunk_index)
        .execute(&mut *tx)
        .await?;

        let added = if first_time { db_int(completion.size)? } else { 0 };
        sqlx::query(
            "UPDATE upload_sessions SET uploaded_size = uploaded_size + ?, updated_at = ? \
             WHERE upload_id = ?",
        )
        .bind(added)
        .bind(completion.completed_at)
        .bind(upload_id)
        .execute(&mut *tx)
        .await?;

        let uploaded_size: i64 =
            sqlx::query_scalar("SELECT uploaded_size FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(ChunkOutcome {
            first_time,
            uploaded_size: from_db_int(uploaded_size, "uploaded_size")?,
        })
    }

    async fn count_incomplete_chunks(&self, upload_id: &UploadId) -> LedgerResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunk_records WHERE upload_id = ? AND status != ?",
        )
        .bind(upload_id.as_str())
        .bind(ChunkStatus::Completed.as_str())
        .fetch_one(&self.pool)
        .await?;
        from_db_int(count, "count")
    }

    async fn completed_chunks(&self, upload_id: &UploadId) -> LedgerResult<Vec<ChunkRecord>> {
        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunk_records WHERE upload_id = ? AND status = ? \
             ORDER BY chunk_index ASC"
        ))
        .bind(upload_id.as_str())
        .bind(ChunkStatus::Completed.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChunkRecord::try_from).collect()
    }
}

#[async_trait]
impl FileRepo for SqliteUploadLedger {
    async fn insert_file(&self, file: &StoredFile) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_file_row(&mut tx, file).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finalize_session(
        &self,
        upload_id: &UploadId,
        file: &StoredFile,
        completed_at: i64,
    ) -> LedgerResult<StoredFile> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        match status.as_deref().map(parse_session_status).transpose()? {
            None => return Err(LedgerError::NotFound(upload_id.to_string())),
            Some(SessionStatus::Completed) => {
                let existing = Self::file_by_upload(&mut *tx, upload_id).await?;
                return existing.ok_or_else(|| {
                    LedgerError::Corrupt(format!("completed session {} has no file", upload_id))
                });
            }
            Some(SessionStatus::Failed) => {
                return Err(LedgerError::Conflict(format!("session {} is failed", upload_id)));
            }
            Some(SessionStatus::Uploading) => {}
        }

        insert_file_row(&mut tx, file).await?;

        sqlx::query("UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ?")
            .bind(SessionStatus::Completed.as_str())
            .bind(completed_at)
            .bind(upload_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(file.clone())
    }

    async fn get_file(&self, file_id: &FileId) -> LedgerResult<Option<StoredFile>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM stored_files WHERE file_id = ?"
        ))
        .bind(file_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(StoredFile::try_from).transpose()
    }

    async fn file_for_upload(&self, upload_id: &UploadId) -> LedgerResult<Option<StoredFile>> {
        Self::file_by_upload(&self.pool, upload_id).await
    }
}

async fn insert_file_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file: &StoredFile,
) -> LedgerResult<()> {
    let inserted = sqlx::query(&format!(
        "INSERT OR IGNORE INTO stored_files ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(file.file_id.as_str())
    .bind(file.upload_id.as_ref().map(UploadId::as_str))
    .bind(file.owner_id.as_str())
    .bind(&file.file_name)
    .bind(&file.title)
    .bind(&file.storage_key)
    .bind(db_int(file.size_bytes)?)
    .bind(&file.content_type)
    .bind(file.created_at)
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(LedgerError::AlreadyExists(file.file_id.to_string()));
    }
    Ok(())
}

/// SQLite integers are signed
fn db_int(value: u64) -> LedgerResult<i64> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Conflict(format!("value {value} does not fit in a column")))
}

fn from_db_int(value: i64, column: &str) -> LedgerResult<u64> {
    u64::try_from(value)
        .map_err(|_| LedgerError::Corrupt(format!("negative {column}: {value}")))
}

fn parse_session_status(value: &str) -> LedgerResult<SessionStatus> {
    SessionStatus::parse(value)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown session status '{value}'")))
}

fn parse_chunk_status(value: &str) -> LedgerResult<ChunkStatus> {
    ChunkStatus::parse(value)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown chunk status '{value}'")))
}

#[derive(Debug, FromRow)]
struct SessionRow {
    upload_id: String,
    owner_id: String,
    file_name: String,
    total_size: i64,
    chunk_size: i64,
    total_chunks: i64,
    uploaded_size: i64,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SessionRow> for UploadSession {
    type Error = LedgerError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            upload_id: UploadId::from_string(row.upload_id),
            owner_id: OwnerId::new(row.owner_id),
            file_name: row.file_name,
            total_size: from_db_int(row.total_size, "total_size")?,
            chunk_size: from_db_int(row.chunk_size, "chunk_size")?,
            total_chunks: from_db_int(row.total_chunks, "total_chunks")?,
            uploaded_size: from_db_int(row.uploaded_size, "uploaded_size")?,
            status: parse_session_status(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChunkRow {
    upload_id: String,
    chunk_index: i64,
    start_byte: i64,
    end_byte: i64,
    size: i64,
    status: String,
    storage_key: Option<String>,
    checksum: Option<String>,
}

impl TryFrom<ChunkRow> for ChunkRecord {
    type Error = LedgerError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Self {
            upload_id: UploadId::from_string(row.upload_id),
            chunk_index: from_db_int(row.chunk_index, "chunk_index")?,
            start_byte: from_db_int(row.start_byte, "start_byte")?,
            end_byte: from_db_int(row.end_byte, "end_byte")?,
            size: from_db_int(row.size, "size")?,
            status: parse_chunk_status(&row.status)?,
            storage_key: row.storage_key,
            checksum: row.checksum,
        })
    }
}

#[derive(Debug, FromRow)]
struct FileRow {
    file_id: String,
    upload_id: Option<String>,
    owner_id: String,
    file_name: String,
    title: String,
    storage_key: String,
    size_bytes: i64,
    content_type: String,
    created_at: i64,
}

impl TryFrom<FileRow> for StoredFile {
    type Error = LedgerError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: FileId::from_string(row.file_id),
            upload_id: row.upload_id.map(UploadId::from_string),
            owner_id: OwnerId::new(row.owner_id),
            file_name: row.file_name,
            title: row.title,
            storage_key: row.storage_key,
            size_bytes: from_db_int(row.size_bytes, "size_bytes")?,
            content_type: row.content_type,
            created_at: row.created_at,
        })
    }
}
