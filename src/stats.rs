//! Database statistics and health overview.
//!
//! Provides a quick summary of what's stored: conversation counts, message
//! counts, counter positions, and per-conversation breakdowns. Used by
//! `cite stats` to give confidence that the agent runtime is writing the
//! log and that counters are advancing as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-conversation breakdown of message and counter state.
struct ConversationStats {
    user_id: String,
    course_id: String,
    message_count: i64,
    tool_calls: i64,
    rag_counter: i64,
    web_counter: i64,
    last_activity_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;

    let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await?;

    let total_tool_calls: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE role = 'tool'")
            .fetch_one(&pool)
            .await?;

    let total_conversations: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM (SELECT DISTINCT user_id, course_id FROM messages)",
    )
    .fetch_one(&pool)
    .await?;

    let legacy_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_sources")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Citation Ledger — Database Stats");
    println!("================================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Conversations:  {}", total_conversations);
    println!("  Messages:       {}", total_messages);
    println!("  Tool calls:     {}", total_tool_calls);
    println!("  Legacy rows:    {}", legacy_rows);

    // Per-conversation breakdown
    let conversation_rows = sqlx::query(
        r#"
        SELECT
            user_id,
            course_id,
            COUNT(*) AS message_count,
            SUM(CASE WHEN role = 'tool' THEN 1 ELSE 0 END) AS tool_calls,
            MAX(created_at) AS last_activity
        FROM messages
        GROUP BY user_id, course_id
        ORDER BY last_activity DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    // Counter positions per conversation
    let counter_rows =
        sqlx::query("SELECT user_id, course_id, rag_counter, web_counter FROM source_counters")
            .fetch_all(&pool)
            .await?;

    let mut conversation_stats: Vec<ConversationStats> = Vec::new();
    for row in &conversation_rows {
        let user_id: String = row.get("user_id");
        let course_id: String = row.get("course_id");
        let counters = counter_rows.iter().find(|c| {
            let c_user: String = c.get("user_id");
            let c_course: String = c.get("course_id");
            c_user == user_id && c_course == course_id
        });

        conversation_stats.push(ConversationStats {
            message_count: row.get("message_count"),
            tool_calls: row.get("tool_calls"),
            rag_counter: counters.map(|c| c.get("rag_counter")).unwrap_or(0),
            web_counter: counters.map(|c| c.get("web_counter")).unwrap_or(0),
            last_activity_ts: row.get("last_activity"),
            user_id,
            course_id,
        });
    }

    if !conversation_stats.is_empty() {
        println!();
        println!("  By conversation:");
        println!(
            "  {:<16} {:<16} {:>8} {:>6} {:>5} {:>5}   {}",
            "USER", "COURSE", "MESSAGES", "TOOLS", "RAG", "WEB", "LAST ACTIVITY"
        );
        println!("  {}", "-".repeat(76));

        for s in &conversation_stats {
            let activity_display = match s.last_activity_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<16} {:<16} {:>8} {:>6} {:>5} {:>5}   {}",
                s.user_id,
                s.course_id,
                s.message_count,
                s.tool_calls,
                s.rag_counter,
                s.web_counter,
                activity_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_short(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_short(ts)
    }
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
