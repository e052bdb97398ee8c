use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another instance has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Configure SQLite connection options with busy_timeout pragma.
        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Using pragma() ensures all connections
        // in the pool inherit this setting.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; the session controller is the sole writer
        // and a handful of connections covers concurrent reads from preloads.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            // Migration errors could also be lock-related
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All schema changes are wrapped in a single transaction so a failed
    /// step (disk full, power loss) rolls back cleanly. All migrations use
    /// `IF NOT EXISTS` for idempotency, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        // Enable foreign keys (must be outside transaction, per-connection setting)
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Favourited cards, one row per (chapter, card)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS favourites (
                chapter TEXT NOT NULL,
                card INTEGER NOT NULL,
                added_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (chapter, card)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Shuffle navigation history, one JSON array per chapter
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nav_history (
                chapter TEXT PRIMARY KEY,
                entries TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Revision progress, one JSON document per chapter
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS revision_progress (
                chapter TEXT PRIMARY KEY,
                progress TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Key-value store for session flags and per-chapter scalars.
        // Keys use dotted convention: session.shuffle, session.revision,
        // chapter.<name>.last_card, chapter.<name>.filters, etc.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Wipe all persisted state for one chapter: favourites, navigation
    /// history, revision progress, and per-chapter preference keys.
    pub async fn clear_chapter(&self, chapter: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM favourites WHERE chapter = ?")
            .bind(chapter)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM nav_history WHERE chapter = ?")
            .bind(chapter)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM revision_progress WHERE chapter = ?")
            .bind(chapter)
            .execute(&mut *tx)
            .await?;
        let prefix = format!("chapter.{}.%", chapter);
        sqlx::query("DELETE FROM preferences WHERE key LIKE ?")
            .bind(&prefix)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
