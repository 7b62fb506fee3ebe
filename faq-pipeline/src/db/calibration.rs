//! Calibration and learning singletons (row id 1)

use faq_common::{time, Error, Result};
use sqlx::Row;
use tracing::info;

use super::candidates::CandidateStore;
use crate::models::{CalibrationStatus, LearningState};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

impl CandidateStore {
    pub async fn get_calibration_status(&self) -> Result<CalibrationStatus> {
        let row = sqlx::query(
            r#"
            SELECT samples_collected, samples_required, is_complete,
                   auto_approve_threshold, spot_check_threshold, completed_at
            FROM calibration_state WHERE id = 1
            "#,
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound("calibration state".to_string()))?;

        Ok(CalibrationStatus {
            samples_collected: row.get("samples_collected"),
            samples_required: row.get("samples_required"),
            is_complete: row.get::<i64, _>("is_complete") != 0,
            auto_approve_threshold: row.get("auto_approve_threshold"),
            spot_check_threshold: row.get("spot_check_threshold"),
            completed_at: time::from_db_opt(row.get("completed_at"))?,
        })
    }

    /// True while the bootstrap review phase is still collecting samples
    pub async fn is_calibration_mode(&self) -> Result<bool> {
        Ok(!self.get_calibration_status().await?.is_complete)
    }

    /// Count one reviewed calibration sample
    ///
    /// Increment and completion check happen in one statement. A completed
    /// calibration is never touched again.
    pub async fn increment_calibration_count(&self) -> Result<CalibrationStatus> {
        let now = time::now_db();
        let result = retry_on_lock("increment_calibration", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE calibration_state
                SET samples_collected = samples_collected + 1,
                    is_complete = CASE WHEN samples_collected + 1 >= samples_required THEN 1 ELSE 0 END,
                    completed_at = CASE WHEN samples_collected + 1 >= samples_required THEN ? ELSE NULL END,
                    updated_at = ?
                WHERE id = 1 AND is_complete = 0
                "#,
            )
            .bind(&now)
            .bind(&now)
            .execute(&self.db)
            .await?)
        })
        .await?;

        let status = self.get_calibration_status().await?;
        if result.rows_affected() > 0 && status.is_complete {
            info!(
                samples = status.samples_collected,
                "Calibration complete, score-based routing enabled"
            );
        }
        Ok(status)
    }

    /// Mark a calibration sample as counted
    ///
    /// Returns `false` when the candidate is not a calibration sample or an
    /// earlier review already counted it.
    pub async fn claim_calibration_sample(&self, candidate_id: i64) -> Result<bool> {
        let result = retry_on_lock("claim_calibration_sample", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE unified_faq_candidates
                SET calibration_counted = 1
                WHERE id = ? AND is_calibration_sample = 1 AND calibration_counted = 0
                "#,
            )
            .bind(candidate_id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply configured sample count and thresholds
    ///
    /// Completion is sticky: lowering `samples_required` can complete
    /// calibration, raising it never reopens it.
    pub async fn apply_calibration_settings(
        &self,
        samples_required: Option<i64>,
        auto_approve_threshold: Option<f64>,
        spot_check_threshold: Option<f64>,
    ) -> Result<CalibrationStatus> {
        let now = time::now_db();
        retry_on_lock("apply_calibration_settings", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                UPDATE calibration_state
                SET samples_required = COALESCE(?, samples_required),
                    auto_approve_threshold = COALESCE(?, auto_approve_threshold),
                    spot_check_threshold = COALESCE(?, spot_check_threshold),
                    updated_at = ?
                WHERE id = 1
                "#,
            )
            .bind(samples_required)
            .bind(auto_approve_threshold)
            .bind(spot_check_threshold)
            .bind(&now)
            .execute(&self.db)
            .await?;

            sqlx::query(
                r#"
                UPDATE calibration_state
                SET is_complete = 1, completed_at = COALESCE(completed_at, ?)
                WHERE id = 1 AND is_complete = 0 AND samples_collected >= samples_required
                "#,
            )
            .bind(&now)
            .execute(&self.db)
            .await?;
            Ok(())
        })
        .await?;

        self.get_calibration_status().await
    }

    /// Persisted learner state, `None` until the learner first saves
    pub async fn get_learning_state(&self) -> Result<Option<LearningState>> {
        let row = sqlx::query(
            r#"
            SELECT auto_send_threshold, queue_high_threshold, reject_threshold,
                   review_history, threshold_history, updated_at
            FROM learning_state WHERE id = 1
            "#,
        )
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(LearningState {
            auto_send_threshold: row.get("auto_send_threshold"),
            queue_high_threshold: row.get("queue_high_threshold"),
            reject_threshold: row.get("reject_threshold"),
            review_history: serde_json::from_str(&row.get::<String, _>("review_history"))?,
            threshold_history: serde_json::from_str(&row.get::<String, _>("threshold_history"))?,
            updated_at: time::from_db(&row.get::<String, _>("updated_at"))?,
        }))
    }

    /// Upsert learner state; histories are capped before writing
    pub async fn save_learning_state(&self, state: &LearningState) -> Result<()> {
        let mut state = state.clone();
        state.cap_histories();
        let review_history = serde_json::to_string(&state.review_history)?;
        let threshold_history = serde_json::to_string(&state.threshold_history)?;
        let updated_at = time::to_db(&state.updated_at);

        retry_on_lock("save_learning_state", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                INSERT INTO learning_state (
                    id, auto_send_threshold, queue_high_threshold, reject_threshold,
                    review_history, threshold_history, updated_at
                ) VALUES (1, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    auto_send_threshold = excluded.auto_send_threshold,
                    queue_high_threshold = excluded.queue_high_threshold,
                    reject_threshold = excluded.reject_threshold,
                    review_history = excluded.review_history,
                    threshold_history = excluded.threshold_history,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(state.auto_send_threshold)
            .bind(state.queue_high_threshold)
            .bind(state.reject_threshold)
            .bind(&review_history)
            .bind(&threshold_history)
            .bind(&updated_at)
            .execute(&self.db)
            .await?;
            Ok(())
        })
        .await
    }
}
