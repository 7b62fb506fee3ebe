//! Conversation thread persistence
//!
//! The store is an auditable ledger: every state write appends a row to
//! `conversation_state_transitions` in the same transaction. It does not
//! decide whether a transition is legal; callers consult
//! [`ThreadState::apply`](crate::models::ThreadState::apply) first.

use chrono::{DateTime, Utc};
use faq_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{
    ConversationThread, MessageType, Source, StateTransitionRecord, ThreadMessage, ThreadState,
    TransitionTrigger,
};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const THREAD_COLUMNS: &str = "id, thread_key, source, room_id, first_question_id, state, \
     candidate_id, faq_id, correction_reason, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, thread_id, message_id, message_type, sender_id, content, timestamp, is_processed, created_at";

/// Trigger recorded for the audit row written when a thread is created
pub const THREAD_CREATED_TRIGGER: &str = "thread_created";

pub struct ThreadStore {
    db: SqlitePool,
}

impl ThreadStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a thread in `pending_question`
    ///
    /// Callers look the thread up with [`find_thread_by_message`](Self::find_thread_by_message)
    /// first. If another poll cycle inserted the same key in between, the
    /// existing row is returned.
    pub async fn create_thread(
        &self,
        source: Source,
        first_question_id: &str,
        room_id: Option<&str>,
    ) -> Result<ConversationThread> {
        let thread_key = ConversationThread::compute_key(source, room_id, first_question_id);
        let now = time::now_db();

        let inserted = retry_on_lock("create_thread", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.db.begin().await?;

            let result = sqlx::query(
                r#"
                INSERT INTO conversation_threads
                    (thread_key, source, room_id, first_question_id, state, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&thread_key)
            .bind(source.as_str())
            .bind(room_id)
            .bind(first_question_id)
            .bind(ThreadState::PendingQuestion.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await;

            let thread_id = match result {
                Ok(r) => r.last_insert_rowid(),
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_unique_violation() {
                        return Ok(None);
                    }
                    return Err(err);
                }
            };

            insert_transition(
                &mut tx,
                thread_id,
                None,
                ThreadState::PendingQuestion,
                THREAD_CREATED_TRIGGER,
                None,
            )
            .await?;

            tx.commit().await?;
            Ok(Some(thread_id))
        })
        .await?;

        match inserted {
            Some(id) => {
                debug!(thread_id = id, source = %source, "Created conversation thread");
                self.require_thread(id).await
            }
            None => {
                debug!(thread_key = %thread_key, "Thread already exists, reusing");
                self.find_thread_by_key(&thread_key)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("thread with key {}", thread_key)))
            }
        }
    }

    pub async fn get_thread(&self, thread_id: i64) -> Result<Option<ConversationThread>> {
        let row = sqlx::query(&format!("SELECT {} FROM conversation_threads WHERE id = ?", THREAD_COLUMNS))
            .bind(thread_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    /// Like [`get_thread`](Self::get_thread) but a missing row is `NotFound`
    pub async fn require_thread(&self, thread_id: i64) -> Result<ConversationThread> {
        self.get_thread(thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {}", thread_id)))
    }

    pub async fn find_thread_by_key(&self, thread_key: &str) -> Result<Option<ConversationThread>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads WHERE thread_key = ?",
            THREAD_COLUMNS
        ))
        .bind(thread_key)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    /// Thread containing `message_id` (as any message or as its first question)
    pub async fn find_thread_by_message(&self, message_id: &str) -> Result<Option<ConversationThread>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM conversation_threads
            WHERE id IN (SELECT thread_id FROM thread_messages WHERE message_id = ?)
               OR first_question_id = ?
            ORDER BY id
            LIMIT 1
            "#,
            THREAD_COLUMNS
        ))
        .bind(message_id)
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    pub async fn find_thread_by_candidate(&self, candidate_id: i64) -> Result<Option<ConversationThread>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads WHERE candidate_id = ? ORDER BY id LIMIT 1",
            THREAD_COLUMNS
        ))
        .bind(candidate_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    /// Append a message; returns `false` if `(thread_id, message_id)` already existed
    ///
    /// The thread's `updated_at` is bumped either way.
    pub async fn add_message_to_thread(
        &self,
        thread_id: i64,
        message_id: &str,
        message_type: MessageType,
        content: &str,
        sender_id: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let now = time::now_db();
        let timestamp = timestamp.as_ref().map(time::to_db);

        let inserted = retry_on_lock("add_message_to_thread", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.db.begin().await?;

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO thread_messages
                    (thread_id, message_id, message_type, sender_id, content, timestamp, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(thread_id)
            .bind(message_id)
            .bind(message_type.as_str())
            .bind(sender_id)
            .bind(content)
            .bind(&timestamp)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let touched = sqlx::query("UPDATE conversation_threads SET updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(Error::NotFound(format!("thread {}", thread_id)));
            }

            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        })
        .await?;

        if !inserted {
            debug!(thread_id, message_id, "Message already attached to thread");
        }
        Ok(inserted)
    }

    pub async fn get_thread_messages(&self, thread_id: i64) -> Result<Vec<ThreadMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM thread_messages WHERE thread_id = ? ORDER BY id",
            MESSAGE_COLUMNS
        ))
        .bind(thread_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    /// Latest message of `message_type` in a thread
    pub async fn latest_message_of_type(
        &self,
        thread_id: i64,
        message_type: MessageType,
    ) -> Result<Option<ThreadMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM thread_messages WHERE thread_id = ? AND message_type = ? ORDER BY id DESC LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(thread_id)
        .bind(message_type.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    /// Returns whether a row changed
    pub async fn mark_message_processed(&self, thread_id: i64, message_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE thread_messages SET is_processed = 1 WHERE thread_id = ? AND message_id = ? AND is_processed = 0",
        )
        .bind(thread_id)
        .bind(message_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write a new state and its audit row
    pub async fn transition_thread_state(
        &self,
        thread_id: i64,
        to_state: ThreadState,
        trigger: TransitionTrigger,
        metadata: Option<serde_json::Value>,
    ) -> Result<ConversationThread> {
        self.update_with_transition(thread_id, FieldUpdate::None, to_state, trigger, metadata)
            .await
    }

    /// Set `candidate_id` and move to `candidate_created`
    pub async fn link_thread_to_candidate(&self, thread_id: i64, candidate_id: i64) -> Result<ConversationThread> {
        self.update_with_transition(
            thread_id,
            FieldUpdate::CandidateId(candidate_id),
            ThreadState::CandidateCreated,
            TransitionTrigger::CandidateCreated,
            Some(serde_json::json!({ "candidate_id": candidate_id })),
        )
        .await
    }

    /// Set `faq_id` and close the thread
    pub async fn link_thread_to_faq(&self, thread_id: i64, faq_id: &str) -> Result<ConversationThread> {
        self.update_with_transition(
            thread_id,
            FieldUpdate::FaqId(Some(faq_id.to_string())),
            ThreadState::Closed,
            TransitionTrigger::FaqApproved,
            Some(serde_json::json!({ "faq_id": faq_id })),
        )
        .await
    }

    /// Clear `faq_id` after an approval is undone
    pub async fn unlink_thread_faq(&self, thread_id: i64) -> Result<ConversationThread> {
        self.update_with_transition(
            thread_id,
            FieldUpdate::FaqId(None),
            ThreadState::CandidateCreated,
            TransitionTrigger::ApprovalUndone,
            None,
        )
        .await
    }

    /// Record why the thread was reopened and move to `reopened_for_correction`
    pub async fn reopen_thread_for_correction(
        &self,
        thread_id: i64,
        reason: &str,
        trigger: TransitionTrigger,
    ) -> Result<ConversationThread> {
        self.update_with_transition(
            thread_id,
            FieldUpdate::CorrectionReason(reason.to_string()),
            ThreadState::ReopenedForCorrection,
            trigger,
            Some(serde_json::json!({ "reason": reason })),
        )
        .await
    }

    pub async fn get_threads_by_state(&self, state: ThreadState) -> Result<Vec<ConversationThread>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM conversation_threads WHERE state = ? ORDER BY updated_at DESC, id DESC",
            THREAD_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(thread_from_row).collect()
    }

    pub async fn count_by_state(&self) -> Result<BTreeMap<String, i64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM conversation_threads GROUP BY state")
            .fetch_all(&self.db)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("state"), row.get::<i64, _>("n")))
            .collect())
    }

    /// Audit log of a thread, oldest first
    pub async fn get_state_transitions(&self, thread_id: i64) -> Result<Vec<StateTransitionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, thread_id, from_state, to_state, trigger, metadata, created_at
            FROM conversation_state_transitions
            WHERE thread_id = ?
            ORDER BY id
            "#,
        )
        .bind(thread_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                let from_state: Option<String> = row.get("from_state");
                let metadata: Option<String> = row.get("metadata");
                Ok(StateTransitionRecord {
                    id: row.get("id"),
                    thread_id: row.get("thread_id"),
                    from_state: from_state.as_deref().map(|s| s.parse::<ThreadState>()).transpose()?,
                    to_state: row.get::<String, _>("to_state").parse()?,
                    trigger: row.get("trigger"),
                    metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
                    created_at: time::from_db(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn update_with_transition(
        &self,
        thread_id: i64,
        field: FieldUpdate,
        to_state: ThreadState,
        trigger: TransitionTrigger,
        metadata: Option<serde_json::Value>,
    ) -> Result<ConversationThread> {
        let now = time::now_db();
        let metadata = metadata.map(|m| m.to_string());

        let from_state = retry_on_lock("transition_thread_state", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.db.begin().await?;

            let current: Option<String> = sqlx::query_scalar("SELECT state FROM conversation_threads WHERE id = ?")
                .bind(thread_id)
                .fetch_optional(&mut *tx)
                .await?;
            let from_state: ThreadState = current
                .ok_or_else(|| Error::NotFound(format!("thread {}", thread_id)))?
                .parse()?;

            match &field {
                FieldUpdate::None => {}
                FieldUpdate::CandidateId(id) => {
                    sqlx::query("UPDATE conversation_threads SET candidate_id = ? WHERE id = ?")
                        .bind(id)
                        .bind(thread_id)
                        .execute(&mut *tx)
                        .await?;
                }
                FieldUpdate::FaqId(faq_id) => {
                    sqlx::query("UPDATE conversation_threads SET faq_id = ? WHERE id = ?")
                        .bind(faq_id)
                        .bind(thread_id)
                        .execute(&mut *tx)
                        .await?;
                }
                FieldUpdate::CorrectionReason(reason) => {
                    sqlx::query("UPDATE conversation_threads SET correction_reason = ? WHERE id = ?")
                        .bind(reason)
                        .bind(thread_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            sqlx::query("UPDATE conversation_threads SET state = ?, updated_at = ? WHERE id = ?")
                .bind(to_state.as_str())
                .bind(&now)
                .bind(thread_id)
                .execute(&mut *tx)
                .await?;

            insert_transition(
                &mut tx,
                thread_id,
                Some(from_state),
                to_state,
                trigger.as_str(),
                metadata.as_deref(),
            )
            .await?;

            tx.commit().await?;
            Ok(from_state)
        })
        .await?;

        debug!(
            thread_id,
            from = %from_state,
            to = %to_state,
            trigger = %trigger,
            "Thread state transition"
        );

        self.require_thread(thread_id).await
    }
}

/// Column written together with a transition
enum FieldUpdate {
    None,
    CandidateId(i64),
    FaqId(Option<String>),
    CorrectionReason(String),
}

async fn insert_transition(
    tx: &mut Transaction<'_, Sqlite>,
    thread_id: i64,
    from_state: Option<ThreadState>,
    to_state: ThreadState,
    trigger: &str,
    metadata: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conversation_state_transitions
            (thread_id, from_state, to_state, trigger, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(thread_id)
    .bind(from_state.map(|s| s.as_str()))
    .bind(to_state.as_str())
    .bind(trigger)
    .bind(metadata)
    .bind(time::now_db())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn thread_from_row(row: &SqliteRow) -> Result<ConversationThread> {
    Ok(ConversationThread {
        id: row.get("id"),
        thread_key: row.get("thread_key"),
        source: row.get::<String, _>("source").parse()?,
        room_id: row.get("room_id"),
        first_question_id: row.get("first_question_id"),
        state: row.get::<String, _>("state").parse()?,
        candidate_id: row.get("candidate_id"),
        faq_id: row.get("faq_id"),
        correction_reason: row.get("correction_reason"),
        created_at: time::from_db(&row.get::<String, _>("created_at"))?,
        updated_at: time::from_db(&row.get::<String, _>("updated_at"))?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ThreadMessage> {
    Ok(ThreadMessage {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        message_id: row.get("message_id"),
        message_type: row.get::<String, _>("message_type").parse()?,
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        timestamp: time::from_db_opt(row.get("timestamp"))?,
        is_processed: row.get::<i64, _>("is_processed") != 0,
        created_at: time::from_db(&row.get::<String, _>("created_at"))?,
    })
}
