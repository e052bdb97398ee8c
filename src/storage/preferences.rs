use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Preference (Key-Value) Operations
    // ========================================================================

    /// Get a single preference value by key.
    ///
    /// Keys use dotted convention: `session.shuffle`, `session.revision`,
    /// `chapter.<name>.last_card`, etc.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a preference value (UPSERT).
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Typed helpers over the KV store
    // ------------------------------------------------------------------------

    /// Global shuffle-enabled flag. Absent or unparseable → `false`.
    pub async fn shuffle_enabled(&self) -> Result<bool> {
        Ok(self.get_preference("session.shuffle").await?.as_deref() == Some("true"))
    }

    pub async fn set_shuffle_enabled(&self, enabled: bool) -> Result<()> {
        self.set_preference("session.shuffle", if enabled { "true" } else { "false" })
            .await
    }

    /// Global revision-mode flag. Absent or unparseable → `false`.
    pub async fn revision_enabled(&self) -> Result<bool> {
        Ok(self.get_preference("session.revision").await?.as_deref() == Some("true"))
    }

    pub async fn set_revision_enabled(&self, enabled: bool) -> Result<()> {
        self.set_preference("session.revision", if enabled { "true" } else { "false" })
            .await
    }

    /// Last-viewed card for a chapter. Absent or unparseable → `None`.
    pub async fn last_card(&self, chapter: &str) -> Result<Option<u32>> {
        let key = format!("chapter.{}.last_card", chapter);
        Ok(self
            .get_preference(&key)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn set_last_card(&self, chapter: &str, card: u32) -> Result<()> {
        let key = format!("chapter.{}.last_card", chapter);
        self.set_preference(&key, &card.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_preference_missing() {
        let db = test_db().await;
        let value = db.get_preference("nonexistent.key").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_set_preference_upsert() {
        let db = test_db().await;
        db.set_preference("session.shuffle", "true").await.unwrap();
        db.set_preference("session.shuffle", "false").await.unwrap();

        let value = db.get_preference("session.shuffle").await.unwrap();
        assert_eq!(value, Some("false".to_string()));
    }

    #[tokio::test]
    async fn test_shuffle_flag_defaults_false() {
        let db = test_db().await;
        assert!(!db.shuffle_enabled().await.unwrap());
        db.set_shuffle_enabled(true).await.unwrap();
        assert!(db.shuffle_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_revision_flag_round_trip() {
        let db = test_db().await;
        assert!(!db.revision_enabled().await.unwrap());
        db.set_revision_enabled(true).await.unwrap();
        assert!(db.revision_enabled().await.unwrap());
        db.set_revision_enabled(false).await.unwrap();
        assert!(!db.revision_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_last_card_per_chapter() {
        let db = test_db().await;
        assert_eq!(db.last_card("ch1_cartes").await.unwrap(), None);

        db.set_last_card("ch1_cartes", 12).await.unwrap();
        db.set_last_card("ch2_cartes", 4).await.unwrap();
        assert_eq!(db.last_card("ch1_cartes").await.unwrap(), Some(12));
        assert_eq!(db.last_card("ch2_cartes").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_unparseable_last_card_reads_as_none() {
        let db = test_db().await;
        db.set_preference("chapter.ch1_cartes.last_card", "twelve")
            .await
            .unwrap();
        assert_eq!(db.last_card("ch1_cartes").await.unwrap(), None);
    }
}
