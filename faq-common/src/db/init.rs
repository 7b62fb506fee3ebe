//! Database initialization
//!
//! Startup sequence:
//! 1. Open (creating if needed) the SQLite file with WAL, foreign keys and a
//!    busy timeout applied to every pooled connection
//! 2. `CREATE TABLE IF NOT EXISTS` for all tables
//! 3. Add columns missing from older databases ([`sync_all_table_schemas`])
//! 4. Create indexes (after step 3, since they may cover added columns)
//! 5. Seed the calibration singleton
//!
//! Every step is idempotent.

use crate::db::table_schemas::sync_all_table_schemas;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout before SQLite reports `database is locked`
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open the pipeline database and bring its schema up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;
    sync_all_table_schemas(&pool).await?;
    create_indexes(&pool).await?;
    seed_calibration_state(&pool).await?;

    Ok(pool)
}

/// Create every table (no-op for ones that exist)
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_conversation_threads_table(pool).await?;
    create_thread_messages_table(pool).await?;
    create_state_transitions_table(pool).await?;
    create_candidates_table(pool).await?;
    create_calibration_state_table(pool).await?;
    create_learning_state_table(pool).await?;
    Ok(())
}

async fn create_conversation_threads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_threads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_key TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            room_id TEXT,
            first_question_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending_question',
            candidate_id INTEGER,
            faq_id TEXT,
            correction_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_thread_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thread_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id INTEGER NOT NULL REFERENCES conversation_threads(id),
            message_id TEXT NOT NULL,
            message_type TEXT NOT NULL,
            sender_id TEXT,
            content TEXT NOT NULL,
            timestamp TEXT,
            is_processed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (thread_id, message_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_state_transitions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_state_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id INTEGER NOT NULL REFERENCES conversation_threads(id),
            from_state TEXT,
            to_state TEXT NOT NULL,
            trigger TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unified_faq_candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            source_event_id TEXT NOT NULL UNIQUE,
            source_timestamp TEXT,
            question_text TEXT NOT NULL,
            staff_answer TEXT NOT NULL,
            staff_sender TEXT,
            edited_question_text TEXT,
            edited_staff_answer TEXT,
            generated_answer TEXT,
            generated_answer_sources TEXT,
            generation_confidence REAL,
            embedding_similarity REAL,
            factual_alignment REAL,
            contradiction_score REAL,
            completeness REAL,
            hallucination_risk REAL,
            final_score REAL NOT NULL DEFAULT 0,
            llm_reasoning TEXT,
            routing TEXT NOT NULL,
            review_status TEXT NOT NULL DEFAULT 'pending',
            reviewed_by TEXT,
            reviewed_at TEXT,
            rejection_reason TEXT,
            faq_id TEXT,
            is_calibration_sample INTEGER NOT NULL DEFAULT 0,
            protocol TEXT,
            category TEXT,
            has_correction INTEGER NOT NULL DEFAULT 0,
            skip_order INTEGER NOT NULL DEFAULT 0,
            calibration_counted INTEGER NOT NULL DEFAULT 0,
            original_user_question TEXT,
            original_staff_answer TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calibration_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            samples_collected INTEGER NOT NULL DEFAULT 0,
            samples_required INTEGER NOT NULL DEFAULT 100,
            is_complete INTEGER NOT NULL DEFAULT 0,
            auto_approve_threshold REAL NOT NULL DEFAULT 0.90,
            spot_check_threshold REAL NOT NULL DEFAULT 0.75,
            completed_at TEXT,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_learning_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS learning_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            auto_send_threshold REAL NOT NULL,
            queue_high_threshold REAL NOT NULL,
            reject_threshold REAL NOT NULL,
            review_history TEXT NOT NULL DEFAULT '[]',
            threshold_history TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

const INDEXES: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS idx_threads_state ON conversation_threads(state)",
    "CREATE INDEX IF NOT EXISTS idx_threads_candidate ON conversation_threads(candidate_id)",
    "CREATE INDEX IF NOT EXISTS idx_thread_messages_message_id ON thread_messages(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_state_transitions_thread ON conversation_state_transitions(thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_candidates_queue \
     ON unified_faq_candidates(review_status, routing, skip_order, created_at)",
];

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    for sql in INDEXES {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

/// Insert the calibration row with defaults if it is missing
///
/// The learning row is not seeded: its absence means "use the fixed
/// calibration thresholds".
async fn seed_calibration_state(pool: &SqlitePool) -> Result<()> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO calibration_state (id, updated_at) VALUES (1, ?)",
    )
    .bind(crate::time::now_db())
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        info!("Seeded calibration state (bootstrap review phase active)");
    }
    Ok(())
}
