//! Chat orchestration: prompt pipelines, per-session history, image
//! analysis and the [`ChatSession`] that ties them together.

pub mod history;
pub mod image;
pub mod pipeline;
pub mod session;

pub use session::{session_id_for, ChatSession, TurnOutcome};
