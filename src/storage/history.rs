use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Navigation History Operations
    // ========================================================================

    /// Persist the shuffle navigation history for a chapter as a JSON array.
    /// Replaces any previous history for that chapter.
    pub async fn save_history(&self, chapter: &str, entries: &[u32]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        sqlx::query(
            r#"
            INSERT INTO nav_history (chapter, entries, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(chapter) DO UPDATE SET entries = excluded.entries, updated_at = excluded.updated_at
        "#,
        )
        .bind(chapter)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the persisted history for a chapter.
    ///
    /// Returns `None` when no history was saved. A row that fails to parse
    /// is treated the same way: malformed persisted state is discarded, not
    /// surfaced as an error.
    pub async fn load_history(&self, chapter: &str) -> Result<Option<Vec<u32>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT entries FROM nav_history WHERE chapter = ?")
                .bind(chapter)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(json,)| match serde_json::from_str(&json) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::debug!(chapter = %chapter, error = %e, "Discarding malformed persisted history");
                None
            }
        }))
    }

    /// Drop the persisted history for a chapter (leaving shuffle mode).
    pub async fn clear_history(&self, chapter: &str) -> Result<()> {
        sqlx::query("DELETE FROM nav_history WHERE chapter = ?")
            .bind(chapter)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_history_is_none() {
        let db = test_db().await;
        assert!(db.load_history("ch1_cartes").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_history() {
        let db = test_db().await;
        db.save_history("ch1_cartes", &[4, 1, 9]).await.unwrap();
        assert_eq!(
            db.load_history("ch1_cartes").await.unwrap(),
            Some(vec![4, 1, 9])
        );
    }

    #[tokio::test]
    async fn test_save_history_replaces_previous() {
        let db = test_db().await;
        db.save_history("ch1_cartes", &[1, 2]).await.unwrap();
        db.save_history("ch1_cartes", &[3]).await.unwrap();
        assert_eq!(db.load_history("ch1_cartes").await.unwrap(), Some(vec![3]));
    }

    #[tokio::test]
    async fn test_clear_history() {
        let db = test_db().await;
        db.save_history("ch1_cartes", &[1, 2]).await.unwrap();
        db.clear_history("ch1_cartes").await.unwrap();
        assert!(db.load_history("ch1_cartes").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_history_row_reads_as_none() {
        let db = test_db().await;
        sqlx::query("INSERT INTO nav_history (chapter, entries) VALUES ('ch1_cartes', 'not json')")
            .execute(&db.pool)
            .await
            .unwrap();

        assert!(db.load_history("ch1_cartes").await.unwrap().is_none());
    }
}
