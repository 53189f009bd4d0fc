//! Tutoring sessions over a user's study material.

mod engine;
mod model;

pub use engine::{TutorEngine, TutorReply};
pub use model::{Role, SessionState, Turn, TurnStatus, TutorMode, TutoringSession};
