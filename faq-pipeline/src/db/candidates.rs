//! Candidate persistence and review transitions
//!
//! Review transitions (`approve`, `reject`) are conditional updates on
//! `review_status = 'pending'`, so a stale reviewer cannot overwrite a
//! decision made in another tab. Skip ordering is one statement.

use faq_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::models::{
    AnswerSource, Candidate, CandidateUpdate, NewCandidate, QueueCounts, ReviewStatus, Routing, Source,
    StatusCounts,
};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

pub(crate) const CANDIDATE_COLUMNS: &str = "id, source, source_event_id, source_timestamp, question_text, \
     staff_answer, staff_sender, edited_question_text, edited_staff_answer, generated_answer, \
     generated_answer_sources, generation_confidence, embedding_similarity, factual_alignment, \
     contradiction_score, completeness, hallucination_risk, final_score, llm_reasoning, routing, \
     review_status, reviewed_by, reviewed_at, rejection_reason, faq_id, is_calibration_sample, \
     protocol, category, has_correction, skip_order, original_user_question, original_staff_answer, \
     created_at, updated_at";

/// Candidates plus the calibration and learning singletons
pub struct CandidateStore {
    pub(crate) db: SqlitePool,
}

impl CandidateStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a pending candidate
    ///
    /// Returns `None` when `source_event_id` already exists.
    pub async fn create(&self, new: &NewCandidate) -> Result<Option<Candidate>> {
        let now = time::now_db();
        let sources = serde_json::to_string(&new.generated_answer_sources)?;
        let source_timestamp = new.source_timestamp.as_ref().map(time::to_db);
        let c = &new.comparison;

        let inserted = retry_on_lock("create_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO unified_faq_candidates (
                    source, source_event_id, source_timestamp, question_text, staff_answer,
                    staff_sender, generated_answer, generated_answer_sources, generation_confidence,
                    embedding_similarity, factual_alignment, contradiction_score, completeness,
                    hallucination_risk, final_score, llm_reasoning, routing, review_status,
                    is_calibration_sample, protocol, category, original_user_question,
                    original_staff_answer, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(new.source.as_str())
            .bind(&new.source_event_id)
            .bind(&source_timestamp)
            .bind(&new.question_text)
            .bind(&new.staff_answer)
            .bind(&new.staff_sender)
            .bind(&new.generated_answer)
            .bind(&sources)
            .bind(new.generation_confidence)
            .bind(c.embedding_similarity)
            .bind(c.factual_alignment)
            .bind(c.contradiction_score)
            .bind(c.completeness)
            .bind(c.hallucination_risk)
            .bind(c.final_score)
            .bind(&c.llm_reasoning)
            .bind(new.routing.as_str())
            .bind(ReviewStatus::Pending.as_str())
            .bind(new.is_calibration_sample)
            .bind(new.protocol.map(|p| p.as_str()))
            .bind(&new.category)
            .bind(&new.original_user_question)
            .bind(&new.original_staff_answer)
            .bind(&now)
            .bind(&now)
            .execute(&self.db)
            .await;

            match result {
                Ok(r) => Ok(Some(r.last_insert_rowid())),
                Err(e) => {
                    let err = Error::from(e);
                    if err.is_unique_violation() {
                        Ok(None)
                    } else {
                        Err(err)
                    }
                }
            }
        })
        .await?;

        match inserted {
            Some(id) => self.get_by_id(id).await,
            None => {
                debug!(event_id = %new.source_event_id, "Candidate already exists for event");
                Ok(None)
            }
        }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Candidate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM unified_faq_candidates WHERE id = ?",
            CANDIDATE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    /// Like [`get_by_id`](Self::get_by_id) but a missing row is `NotFound`
    pub async fn require(&self, id: i64) -> Result<Candidate> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {}", id)))
    }

    pub async fn get_by_event_id(&self, source_event_id: &str) -> Result<Option<Candidate>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM unified_faq_candidates WHERE source_event_id = ?",
            CANDIDATE_COLUMNS
        ))
        .bind(source_event_id)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(candidate_from_row).transpose()
    }

    pub async fn exists_by_event_id(&self, source_event_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM unified_faq_candidates WHERE source_event_id = ?)",
        )
        .bind(source_event_id)
        .fetch_one(&self.db)
        .await?;

        Ok(exists)
    }

    /// Pending candidates in review order: skipped items sink behind the rest
    pub async fn get_pending(
        &self,
        source: Option<Source>,
        routing: Option<Routing>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Candidate>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM unified_faq_candidates WHERE review_status = 'pending'",
            CANDIDATE_COLUMNS
        ));
        push_filters(&mut qb, source, routing);
        qb.push(" ORDER BY skip_order ASC, created_at ASC, id ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&self.db).await?;
        rows.iter().map(candidate_from_row).collect()
    }

    pub async fn count_pending(&self, source: Option<Source>, routing: Option<Routing>) -> Result<i64> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM unified_faq_candidates WHERE review_status = 'pending'");
        push_filters(&mut qb, source, routing);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.db).await?;
        Ok(count)
    }

    /// Pending candidates per queue
    pub async fn get_queue_counts(&self, source: Option<Source>) -> Result<QueueCounts> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT routing, COUNT(*) AS n FROM unified_faq_candidates WHERE review_status = 'pending'",
        );
        push_filters(&mut qb, source, None);
        qb.push(" GROUP BY routing");

        let rows = qb.build().fetch_all(&self.db).await?;

        let mut counts = QueueCounts::default();
        for row in &rows {
            let n: i64 = row.get("n");
            match row.get::<String, _>("routing").parse::<Routing>() {
                Ok(Routing::AutoApprove) => counts.auto_approve = n,
                Ok(Routing::SpotCheck) => counts.spot_check = n,
                Ok(Routing::FullReview) => counts.full_review = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    pub async fn count_by_status(&self, source: Option<Source>) -> Result<StatusCounts> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT review_status, COUNT(*) AS n FROM unified_faq_candidates WHERE 1 = 1");
        push_filters(&mut qb, source, None);
        qb.push(" GROUP BY review_status");

        let rows = qb.build().fetch_all(&self.db).await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let n: i64 = row.get("n");
            match row.get::<String, _>("review_status").parse::<ReviewStatus>() {
                Ok(ReviewStatus::Pending) => counts.pending = n,
                Ok(ReviewStatus::Approved) => counts.approved = n,
                Ok(ReviewStatus::Rejected) => counts.rejected = n,
                Ok(ReviewStatus::Skipped) => counts.skipped = n,
                Err(_) => {}
            }
        }
        Ok(counts)
    }

    /// Mark approved; `false` if the candidate was not pending
    pub async fn approve(&self, id: i64, reviewer: &str, faq_id: &str) -> Result<bool> {
        let now = time::now_db();
        let result = retry_on_lock("approve_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE unified_faq_candidates
                SET review_status = 'approved', reviewed_by = ?, reviewed_at = ?, faq_id = ?,
                    rejection_reason = NULL, updated_at = ?
                WHERE id = ? AND review_status = 'pending'
                "#,
            )
            .bind(reviewer)
            .bind(&now)
            .bind(faq_id)
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark rejected; `false` if the candidate was not pending
    pub async fn reject(&self, id: i64, reviewer: &str, reason: Option<&str>) -> Result<bool> {
        let now = time::now_db();
        let result = retry_on_lock("reject_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE unified_faq_candidates
                SET review_status = 'rejected', reviewed_by = ?, reviewed_at = ?,
                    rejection_reason = ?, updated_at = ?
                WHERE id = ? AND review_status = 'pending'
                "#,
            )
            .bind(reviewer)
            .bind(&now)
            .bind(reason)
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a pending candidate to the back of its queue
    ///
    /// Returns the new `skip_order`, or `None` if the candidate is not pending.
    pub async fn skip(&self, id: i64) -> Result<Option<i64>> {
        let now = time::now_db();
        let result = retry_on_lock("skip_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE unified_faq_candidates
                SET skip_order = (SELECT COALESCE(MAX(skip_order), 0) + 1 FROM unified_faq_candidates),
                    updated_at = ?
                WHERE id = ? AND review_status = 'pending'
                "#,
            )
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let order: i64 = sqlx::query_scalar("SELECT skip_order FROM unified_faq_candidates WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        Ok(Some(order))
    }

    /// Clear all review metadata and return to the front of the queue
    pub async fn revert_to_pending(&self, id: i64) -> Result<bool> {
        let now = time::now_db();
        let result = retry_on_lock("revert_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE unified_faq_candidates
                SET review_status = 'pending', reviewed_by = NULL, reviewed_at = NULL,
                    rejection_reason = NULL, faq_id = NULL, skip_order = 0, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply the set fields of `update`; `updated_at` is always stamped
    pub async fn update_candidate(&self, id: i64, update: &CandidateUpdate) -> Result<Candidate> {
        let sources = update
            .generated_answer_sources
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        retry_on_lock("update_candidate", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE unified_faq_candidates SET updated_at = ");
            qb.push_bind(time::now_db());

            if let Some(v) = &update.staff_answer {
                qb.push(", staff_answer = ").push_bind(v.clone());
            }
            if let Some(v) = &update.edited_question_text {
                qb.push(", edited_question_text = ").push_bind(v.clone());
            }
            if let Some(v) = &update.edited_staff_answer {
                qb.push(", edited_staff_answer = ").push_bind(v.clone());
            }
            if let Some(v) = &update.generated_answer {
                qb.push(", generated_answer = ").push_bind(v.clone());
            }
            if let Some(v) = &sources {
                qb.push(", generated_answer_sources = ").push_bind(v.clone());
            }
            if let Some(v) = update.generation_confidence {
                qb.push(", generation_confidence = ").push_bind(v);
            }
            if let Some(c) = &update.comparison {
                qb.push(", embedding_similarity = ").push_bind(c.embedding_similarity);
                qb.push(", factual_alignment = ").push_bind(c.factual_alignment);
                qb.push(", contradiction_score = ").push_bind(c.contradiction_score);
                qb.push(", completeness = ").push_bind(c.completeness);
                qb.push(", hallucination_risk = ").push_bind(c.hallucination_risk);
                qb.push(", final_score = ").push_bind(c.final_score);
                qb.push(", llm_reasoning = ").push_bind(c.llm_reasoning.clone());
            }
            if let Some(v) = update.routing {
                qb.push(", routing = ").push_bind(v.as_str());
            }
            if let Some(v) = update.is_calibration_sample {
                qb.push(", is_calibration_sample = ").push_bind(v);
            }
            if let Some(v) = update.protocol {
                qb.push(", protocol = ").push_bind(v.map(|p| p.as_str()));
            }
            if let Some(v) = &update.category {
                qb.push(", category = ").push_bind(v.clone());
            }
            if let Some(v) = update.has_correction {
                qb.push(", has_correction = ").push_bind(v);
            }

            qb.push(" WHERE id = ").push_bind(id);

            let result = qb.build().execute(&self.db).await?;
            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("candidate {}", id)));
            }
            Ok(())
        })
        .await?;

        self.require(id).await
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, source: Option<Source>, routing: Option<Routing>) {
    if let Some(source) = source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(routing) = routing {
        qb.push(" AND routing = ").push_bind(routing.as_str());
    }
}

pub(crate) fn candidate_from_row(row: &SqliteRow) -> Result<Candidate> {
    let sources: Option<String> = row.get("generated_answer_sources");
    let generated_answer_sources: Vec<AnswerSource> = match sources.as_deref() {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(json)?,
        _ => Vec::new(),
    };
    let protocol: Option<String> = row.get("protocol");

    Ok(Candidate {
        id: row.get("id"),
        source: row.get::<String, _>("source").parse()?,
        source_event_id: row.get("source_event_id"),
        source_timestamp: time::from_db_opt(row.get("source_timestamp"))?,
        question_text: row.get("question_text"),
        staff_answer: row.get("staff_answer"),
        staff_sender: row.get("staff_sender"),
        edited_question_text: row.get("edited_question_text"),
        edited_staff_answer: row.get("edited_staff_answer"),
        generated_answer: row.get("generated_answer"),
        generated_answer_sources,
        generation_confidence: row.get("generation_confidence"),
        embedding_similarity: row.get("embedding_similarity"),
        factual_alignment: row.get("factual_alignment"),
        contradiction_score: row.get("contradiction_score"),
        completeness: row.get("completeness"),
        hallucination_risk: row.get("hallucination_risk"),
        final_score: row.get("final_score"),
        llm_reasoning: row.get("llm_reasoning"),
        routing: row.get::<String, _>("routing").parse()?,
        review_status: row.get::<String, _>("review_status").parse()?,
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: time::from_db_opt(row.get("reviewed_at"))?,
        rejection_reason: row.get("rejection_reason"),
        faq_id: row.get("faq_id"),
        is_calibration_sample: row.get::<i64, _>("is_calibration_sample") != 0,
        protocol: protocol.as_deref().map(|p| p.parse()).transpose()?,
        category: row.get("category"),
        has_correction: row.get::<i64, _>("has_correction") != 0,
        skip_order: row.get("skip_order"),
        original_user_question: row.get("original_user_question"),
        original_staff_answer: row.get("original_staff_answer"),
        created_at: time::from_db(&row.get::<String, _>("created_at"))?,
        updated_at: time::from_db(&row.get::<String, _>("updated_at"))?,
    })
}
