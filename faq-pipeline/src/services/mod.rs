//! Pipeline services
//!
//! The orchestrator is the entry point; everything else is a building block
//! it composes or a concrete adapter for one of the collaborator traits.

pub mod classifier;
pub mod collaborators;
pub mod http_clients;
pub mod learning;
pub mod local_faq_store;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod protocol_detector;
pub mod routing;

pub use classifier::{MessageClassifier, MessageRole, ReplyChainExtractor};
pub use collaborators::{
    AnswerGenerator, ChatTurn, ComparisonEngine, FaqExtractor, FaqStore, GeneratedAnswer, LearningEngine,
};
pub use http_clients::{HttpAnswerGenerator, HttpComparisonEngine, HttpFaqStore};
pub use learning::AdaptiveThresholdLearner;
pub use local_faq_store::InMemoryFaqStore;
pub use orchestrator::{Collaborators, OrchestratorSettings, PipelineOrchestrator};
pub use routing::RoutingEngine;
