use sqlx::SqlitePool;

use crate::error::StoreError;

/// Creates the message table if it does not exist.
///
/// Column types stay loose so databases written by earlier tooling still open.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await.map_err(StoreError::Schema)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            ts      TEXT,
            topic   TEXT,
            payload TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(StoreError::Schema)?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_messages_topic
            ON messages (topic);
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(StoreError::Schema)?;

    tx.commit().await.map_err(StoreError::Schema)?;
    Ok(())
}
