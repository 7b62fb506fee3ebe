//! Declared column lists for every pipeline table
//!
//! When a column is added to a table, add it here as well: existing databases
//! pick it up on the next startup through [`sync_all_table_schemas`].

use crate::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

pub struct ConversationThreadsTable;

impl TableSchema for ConversationThreadsTable {
    fn table_name() -> &'static str {
        "conversation_threads"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("thread_key", "TEXT").not_null().unique(),
            ColumnDefinition::new("source", "TEXT").not_null(),
            ColumnDefinition::new("room_id", "TEXT"),
            ColumnDefinition::new("first_question_id", "TEXT").not_null(),
            ColumnDefinition::new("state", "TEXT").not_null().default("'pending_question'"),
            ColumnDefinition::new("candidate_id", "INTEGER"),
            ColumnDefinition::new("faq_id", "TEXT"),
            ColumnDefinition::new("correction_reason", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

pub struct ThreadMessagesTable;

impl TableSchema for ThreadMessagesTable {
    fn table_name() -> &'static str {
        "thread_messages"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("thread_id", "INTEGER").not_null(),
            ColumnDefinition::new("message_id", "TEXT").not_null(),
            ColumnDefinition::new("message_type", "TEXT").not_null(),
            ColumnDefinition::new("sender_id", "TEXT"),
            ColumnDefinition::new("content", "TEXT").not_null(),
            ColumnDefinition::new("timestamp", "TEXT"),
            ColumnDefinition::new("is_processed", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }
}

pub struct StateTransitionsTable;

impl TableSchema for StateTransitionsTable {
    fn table_name() -> &'static str {
        "conversation_state_transitions"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("thread_id", "INTEGER").not_null(),
            ColumnDefinition::new("from_state", "TEXT"),
            ColumnDefinition::new("to_state", "TEXT").not_null(),
            ColumnDefinition::new("trigger", "TEXT").not_null(),
            ColumnDefinition::new("metadata", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }
}

pub struct CandidatesTable;

impl TableSchema for CandidatesTable {
    fn table_name() -> &'static str {
        "unified_faq_candidates"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("source", "TEXT").not_null(),
            ColumnDefinition::new("source_event_id", "TEXT").not_null().unique(),
            ColumnDefinition::new("source_timestamp", "TEXT"),
            ColumnDefinition::new("question_text", "TEXT").not_null(),
            ColumnDefinition::new("staff_answer", "TEXT").not_null(),
            ColumnDefinition::new("staff_sender", "TEXT"),
            ColumnDefinition::new("edited_question_text", "TEXT"),
            ColumnDefinition::new("edited_staff_answer", "TEXT"),
            ColumnDefinition::new("generated_answer", "TEXT"),
            ColumnDefinition::new("generated_answer_sources", "TEXT"),
            ColumnDefinition::new("generation_confidence", "REAL"),
            ColumnDefinition::new("embedding_similarity", "REAL"),
            ColumnDefinition::new("factual_alignment", "REAL"),
            ColumnDefinition::new("contradiction_score", "REAL"),
            ColumnDefinition::new("completeness", "REAL"),
            ColumnDefinition::new("hallucination_risk", "REAL"),
            ColumnDefinition::new("final_score", "REAL").not_null().default("0"),
            ColumnDefinition::new("llm_reasoning", "TEXT"),
            ColumnDefinition::new("routing", "TEXT").not_null(),
            ColumnDefinition::new("review_status", "TEXT").not_null().default("'pending'"),
            ColumnDefinition::new("reviewed_by", "TEXT"),
            ColumnDefinition::new("reviewed_at", "TEXT"),
            ColumnDefinition::new("rejection_reason", "TEXT"),
            ColumnDefinition::new("faq_id", "TEXT"),
            ColumnDefinition::new("is_calibration_sample", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("protocol", "TEXT"),
            ColumnDefinition::new("category", "TEXT"),
            ColumnDefinition::new("has_correction", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("skip_order", "INTEGER").not_null().default("0"),
            // Set once a review has counted this sample toward calibration
            ColumnDefinition::new("calibration_counted", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("original_user_question", "TEXT"),
            ColumnDefinition::new("original_staff_answer", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

pub struct CalibrationStateTable;

impl TableSchema for CalibrationStateTable {
    fn table_name() -> &'static str {
        "calibration_state"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("samples_collected", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("samples_required", "INTEGER").not_null().default("100"),
            ColumnDefinition::new("is_complete", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("auto_approve_threshold", "REAL").not_null().default("0.90"),
            ColumnDefinition::new("spot_check_threshold", "REAL").not_null().default("0.75"),
            ColumnDefinition::new("completed_at", "TEXT"),
            ColumnDefinition::new("updated_at", "TEXT"),
        ]
    }
}

pub struct LearningStateTable;

impl TableSchema for LearningStateTable {
    fn table_name() -> &'static str {
        "learning_state"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("auto_send_threshold", "REAL").not_null(),
            ColumnDefinition::new("queue_high_threshold", "REAL").not_null(),
            ColumnDefinition::new("reject_threshold", "REAL").not_null(),
            ColumnDefinition::new("review_history", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("threshold_history", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

/// Add missing columns to every pipeline table
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<()> {
    let mut added = 0;
    added += SchemaSync::sync_table::<ConversationThreadsTable>(pool).await?;
    added += SchemaSync::sync_table::<ThreadMessagesTable>(pool).await?;
    added += SchemaSync::sync_table::<StateTransitionsTable>(pool).await?;
    added += SchemaSync::sync_table::<CandidatesTable>(pool).await?;
    added += SchemaSync::sync_table::<CalibrationStateTable>(pool).await?;
    added += SchemaSync::sync_table::<LearningStateTable>(pool).await?;

    if added > 0 {
        info!("Schema sync added {} column(s)", added);
    }
    Ok(())
}
