//! Pipeline metrics
//!
//! Emitted through the `metrics` facade. Without an installed recorder the
//! calls are no-ops.

use metrics::{counter, gauge, histogram};

use crate::models::{QueueCounts, Routing, SkipReason};

pub const PAIRS_PROCESSED: &str = "faq_pipeline_pairs_processed_total";
pub const PAIRS_SKIPPED: &str = "faq_pipeline_pairs_skipped_total";
pub const FINAL_SCORE: &str = "faq_pipeline_final_score";
pub const AUTO_APPROVALS: &str = "faq_pipeline_auto_approvals_total";
pub const QUEUE_SIZE: &str = "faq_pipeline_queue_size";
pub const REVIEWS: &str = "faq_pipeline_reviews_total";

pub fn record_processed(routing: Routing, final_score: f64) {
    counter!(PAIRS_PROCESSED, "routing" => routing.as_str()).increment(1);
    histogram!(FINAL_SCORE).record(final_score);
    if routing == Routing::AutoApprove {
        counter!(AUTO_APPROVALS).increment(1);
    }
}

pub fn record_skipped(reason: SkipReason) {
    counter!(PAIRS_SKIPPED, "reason" => reason.as_str()).increment(1);
}

pub fn set_queue_sizes(counts: &QueueCounts) {
    for routing in Routing::QUEUES {
        gauge!(QUEUE_SIZE, "routing" => routing.as_str()).set(counts.get(routing) as f64);
    }
}

pub fn record_review(action: &'static str) {
    counter!(REVIEWS, "action" => action).increment(1);
}
