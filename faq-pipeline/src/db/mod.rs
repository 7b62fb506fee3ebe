//! Database access for the pipeline
//!
//! Table creation and column sync live in `faq_common::db`; this module
//! holds the typed stores the orchestrator works through.

pub mod calibration;
pub mod candidates;
pub mod threads;

pub use candidates::CandidateStore;
pub use threads::{ThreadStore, THREAD_CREATED_TRIGGER};
