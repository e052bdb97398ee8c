use std::collections::BTreeSet;

use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Favourites Operations
    // ========================================================================

    /// Load the favourites set for a chapter. Missing chapter → empty set.
    pub async fn get_favourites(&self, chapter: &str) -> Result<BTreeSet<u32>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT card FROM favourites WHERE chapter = ? ORDER BY card")
                .bind(chapter)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(card,)| u32::try_from(card).ok())
            .collect())
    }

    /// Mark a card as favourite. Idempotent.
    pub async fn add_favourite(&self, chapter: &str, card: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO favourites (chapter, card, added_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(chapter, card) DO NOTHING
        "#,
        )
        .bind(chapter)
        .bind(card as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a card from the favourites. Idempotent.
    pub async fn remove_favourite(&self, chapter: &str, card: u32) -> Result<()> {
        sqlx::query("DELETE FROM favourites WHERE chapter = ? AND card = ?")
            .bind(chapter)
            .bind(card as i64)
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
    async fn test_empty_chapter_has_no_favourites() {
        let db = test_db().await;
        assert!(db.get_favourites("ch1_cartes").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove_favourite() {
        let db = test_db().await;
        db.add_favourite("ch1_cartes", 7).await.unwrap();
        db.add_favourite("ch1_cartes", 3).await.unwrap();

        let favs = db.get_favourites("ch1_cartes").await.unwrap();
        assert_eq!(favs, [3, 7].into_iter().collect());

        db.remove_favourite("ch1_cartes", 7).await.unwrap();
        let favs = db.get_favourites("ch1_cartes").await.unwrap();
        assert_eq!(favs, [3].into_iter().collect());
    }

    #[tokio::test]
    async fn test_add_favourite_idempotent() {
        let db = test_db().await;
        db.add_favourite("ch1_cartes", 7).await.unwrap();
        db.add_favourite("ch1_cartes", 7).await.unwrap();
        assert_eq!(db.get_favourites("ch1_cartes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_favourites_scoped_per_chapter() {
        let db = test_db().await;
        db.add_favourite("ch1_cartes", 1).await.unwrap();
        db.add_favourite("ch2_cartes", 2).await.unwrap();

        assert_eq!(
            db.get_favourites("ch1_cartes").await.unwrap(),
            [1].into_iter().collect()
        );
        assert_eq!(
            db.get_favourites("ch2_cartes").await.unwrap(),
            [2].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn test_remove_missing_favourite_is_noop() {
        let db = test_db().await;
        db.remove_favourite("ch1_cartes", 99).await.unwrap();
    }
}
