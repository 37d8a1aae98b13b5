use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Durable message log. Rows are written by the agent runtime; this
    // engine reads them and deletes them on conversation clear.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(user_id, course_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Legacy side table: sources keyed by message id, from the storage
    // generation before id indirection.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_sources (
            message_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            sources_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-conversation citation counters.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_counters (
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            rag_counter INTEGER NOT NULL DEFAULT 0,
            web_counter INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, course_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(user_id, course_id, seq)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_message_sources_conversation ON message_sources(user_id, course_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
