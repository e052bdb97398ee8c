use anyhow::Result;

use super::schema::Database;
use crate::revision::RevisionProgress;

impl Database {
    // ========================================================================
    // Revision Progress Operations
    // ========================================================================

    /// Persist revision progress for a chapter as a JSON document.
    pub async fn save_revision_progress(
        &self,
        chapter: &str,
        progress: &RevisionProgress,
    ) -> Result<()> {
        let json = serde_json::to_string(progress)?;
        sqlx::query(
            r#"
            INSERT INTO revision_progress (chapter, progress, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(chapter) DO UPDATE SET progress = excluded.progress, updated_at = excluded.updated_at
        "#,
        )
        .bind(chapter)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load persisted revision progress for a chapter.
    ///
    /// Returns `None` for a missing row or one that no longer parses —
    /// malformed persisted state reads as "no saved progress".
    pub async fn load_revision_progress(&self, chapter: &str) -> Result<Option<RevisionProgress>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT progress FROM revision_progress WHERE chapter = ?")
                .bind(chapter)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(json,)| match serde_json::from_str(&json) {
            Ok(progress) => Some(progress),
            Err(e) => {
                tracing::debug!(chapter = %chapter, error = %e, "Discarding malformed revision progress");
                None
            }
        }))
    }

    /// Drop persisted revision progress for a chapter (explicit reset).
    pub async fn clear_revision_progress(&self, chapter: &str) -> Result<()> {
        sqlx::query("DELETE FROM revision_progress WHERE chapter = ?")
            .bind(chapter)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::revision::{CardOutcome, RevisionProgress};
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_progress_is_none() {
        let db = test_db().await;
        assert!(db
            .load_revision_progress("ch1_cartes")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_progress() {
        let db = test_db().await;
        let deck = vec![1, 2, 3];
        let mut progress = RevisionProgress::default();
        progress.mark(1, CardOutcome::Ok, &deck);
        progress.mark(2, CardOutcome::NotOk, &deck);

        db.save_revision_progress("ch1_cartes", &progress)
            .await
            .unwrap();
        let loaded = db
            .load_revision_progress("ch1_cartes")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, progress);
    }

    #[tokio::test]
    async fn test_save_progress_replaces_previous() {
        let db = test_db().await;
        let deck = vec![1];
        let mut progress = RevisionProgress::default();
        db.save_revision_progress("ch1_cartes", &progress)
            .await
            .unwrap();

        progress.mark(1, CardOutcome::Ok, &deck);
        progress.begin_next_round();
        db.save_revision_progress("ch1_cartes", &progress)
            .await
            .unwrap();

        let loaded = db
            .load_revision_progress("ch1_cartes")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.round, 2);
    }

    #[tokio::test]
    async fn test_malformed_progress_row_reads_as_none() {
        let db = test_db().await;
        sqlx::query(
            "INSERT INTO revision_progress (chapter, progress) VALUES ('ch1_cartes', '{broken')",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(db
            .load_revision_progress("ch1_cartes")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_clear_progress() {
        let db = test_db().await;
        db.save_revision_progress("ch1_cartes", &RevisionProgress::default())
            .await
            .unwrap();
        db.clear_revision_progress("ch1_cartes").await.unwrap();
        assert!(db
            .load_revision_progress("ch1_cartes")
            .await
            .unwrap()
            .is_none());
    }
}
