use super::models::{encode_timestamp, truncate_to_micros, FileRecord, FileStatus, StatusCounts};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Error as SqlxError, SqliteConnection, SqlitePool};
use tracing::{error, info};

const SELECT_COLUMNS: &str =
    "SELECT id, filename, file_type, status, upload_timestamp, transcription_text FROM file_metadata";

pub struct FileMetadataRepository;

impl FileMetadataRepository {
    pub async fn find_by_filename(
        pool: &SqlitePool,
        filename: &str,
    ) -> Result<Option<FileRecord>, SqlxError> {
        sqlx::query_as::<_, FileRecord>(&format!("{} WHERE filename = ?", SELECT_COLUMNS))
            .bind(filename)
            .fetch_optional(pool)
            .await
    }

    /// All records, newest upload first (ties broken by id, also descending).
    pub async fn list(pool: &SqlitePool) -> Result<Vec<FileRecord>, SqlxError> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "{} ORDER BY upload_timestamp DESC, id DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(pool)
        .await
    }

    /// Create the record for a new upload, or reset an existing one to Pending.
    ///
    /// Runs in one `BEGIN IMMEDIATE` transaction so readers never see a half-reset
    /// row. The write lock must be taken before the read: a deferred transaction
    /// that upgrades later fails with `SQLITE_BUSY` instead of waiting out
    /// `busy_timeout`. A re-upload's timestamp is always strictly later than the
    /// one it replaces, even when the clock has not moved on.
    pub async fn upsert_pending(
        pool: &SqlitePool,
        filename: &str,
        file_type: &str,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, SqlxError> {
        let mut transaction = pool.begin_with("BEGIN IMMEDIATE").await?;

        match Self::upsert_in_transaction(&mut transaction, filename, file_type, now).await {
            Ok(record) => {
                transaction.commit().await?;
                Ok(record)
            }
            Err(e) => {
                error!("Failed to upsert metadata for {}: {}", filename, e);
                transaction.rollback().await?;
                Err(e)
            }
        }
    }

    async fn upsert_in_transaction(
        conn: &mut SqliteConnection,
        filename: &str,
        file_type: &str,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, SqlxError> {
        let existing: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, upload_timestamp FROM file_metadata WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&mut *conn)
        .await?;

        let now = truncate_to_micros(now);
        match existing {
            Some((id, previous)) => {
                let timestamp = if now > previous {
                    now
                } else {
                    previous + Duration::microseconds(1)
                };
                info!("File {} exists, resetting metadata to pending", filename);
                sqlx::query(
                    "UPDATE file_metadata
                     SET upload_timestamp = ?, status = ?, transcription_text = NULL
                     WHERE id = ?",
                )
                .bind(encode_timestamp(timestamp))
                .bind(FileStatus::Pending)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                info!("New file {}, creating metadata", filename);
                sqlx::query(
                    "INSERT INTO file_metadata (filename, file_type, status, upload_timestamp)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(filename)
                .bind(file_type)
                .bind(FileStatus::Pending)
                .bind(encode_timestamp(now))
                .execute(&mut *conn)
                .await?;
            }
        }

        sqlx::query_as::<_, FileRecord>(&format!("{} WHERE filename = ?", SELECT_COLUMNS))
            .bind(filename)
            .fetch_one(&mut *conn)
            .await
    }

    /// Pending → Completed with the transcript text. Returns false if the row is gone.
    pub async fn mark_completed(
        pool: &SqlitePool,
        filename: &str,
        text: &str,
    ) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            "UPDATE file_metadata SET status = ?, transcription_text = ? WHERE filename = ?",
        )
        .bind(FileStatus::Completed)
        .bind(text)
        .bind(filename)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Any state → Failed. The transcript text is cleared along with it.
    pub async fn mark_failed(pool: &SqlitePool, filename: &str) -> Result<bool, SqlxError> {
        let result = sqlx::query(
            "UPDATE file_metadata SET status = ?, transcription_text = NULL WHERE filename = ?",
        )
        .bind(FileStatus::Failed)
        .bind(filename)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &SqlitePool, filename: &str) -> Result<bool, SqlxError> {
        let result = sqlx::query("DELETE FROM file_metadata WHERE filename = ?")
            .bind(filename)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flip every Pending row to Failed; only valid when nothing is in flight.
    pub async fn fail_stale_pending(pool: &SqlitePool) -> Result<u64, SqlxError> {
        let result = sqlx::query(
            "UPDATE file_metadata SET status = ?, transcription_text = NULL WHERE status = ?",
        )
        .bind(FileStatus::Failed)
        .bind(FileStatus::Pending)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn status_counts(pool: &SqlitePool) -> Result<StatusCounts, SqlxError> {
        let rows: Vec<(FileStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM file_metadata GROUP BY status")
                .fetch_all(pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status {
                FileStatus::Pending => counts.pending = count,
                FileStatus::Completed => counts.completed = count,
                FileStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
