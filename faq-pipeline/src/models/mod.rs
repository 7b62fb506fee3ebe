//! Data models for the FAQ pipeline

pub mod calibration;
pub mod candidate;
pub mod faq;
pub mod message;
pub mod processing;
pub mod thread;

pub use calibration::*;
pub use candidate::*;
pub use faq::*;
pub use message::*;
pub use processing::*;
pub use thread::*;
