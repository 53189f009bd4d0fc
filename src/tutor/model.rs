//! Tutoring session records.

use crate::store::{Collection, Record};
use crate::vector_store::ChunkId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How the tutor answers a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TutorMode {
    /// Direct explanation grounded in the material.
    #[default]
    Explain,
    /// Guided learning without handing over quiz answers.
    Tutor,
    /// Hints only; the answer is withheld.
    Hint,
}

impl std::str::FromStr for TutorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "explain" => Ok(TutorMode::Explain),
            "tutor" => Ok(TutorMode::Tutor),
            "hint" => Ok(TutorMode::Hint),
            _ => Err(format!("Unknown tutor mode: {}", s)),
        }
    }
}

impl fmt::Display for TutorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TutorMode::Explain => write!(f, "explain"),
            TutorMode::Tutor => write!(f, "tutor"),
            TutorMode::Hint => write!(f, "hint"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    /// The exchange failed; kept for display, excluded from prompts.
    Failed { reason: String },
}

/// One message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Chunks the answer was grounded on. Empty for user turns.
    #[serde(default)]
    pub context_ids: Vec<ChunkId>,
    pub status: TurnStatus,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            context_ids: Vec::new(),
            status: TurnStatus::Ok,
        }
    }

    pub fn assistant(text: impl Into<String>, context_ids: Vec<ChunkId>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            context_ids,
            status: TurnStatus::Ok,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TurnStatus::Failed { .. })
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = TurnStatus::Failed {
            reason: reason.into(),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    /// A turn is being answered.
    Active,
    Closed,
}

/// Turns written per exchange: the question and its answer.
const EXCHANGE_TURNS: usize = 2;

/// A free-form Q&A session over a set of documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutoringSession {
    pub id: Uuid,
    pub user: String,
    pub document_ids: Vec<Uuid>,
    pub turns: Vec<Turn>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TutoringSession {
    pub fn new(user: impl Into<String>, document_ids: Vec<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            document_ids,
            turns: Vec::new(),
            state: SessionState::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_chars(&self) -> usize {
        self.turns.iter().map(|t| t.text.chars().count()).sum()
    }

    /// Drop whole turns, oldest first, until the session fits `budget`.
    /// The newest exchange is always kept, even when it alone is over budget.
    /// Returns the number of turns dropped.
    pub fn trim_to(&mut self, budget: usize) -> usize {
        let droppable = self.turns.len().saturating_sub(EXCHANGE_TURNS);
        let mut total = self.total_chars();
        let mut drop = 0;
        while total > budget && drop < droppable {
            total -= self.turns[drop].text.chars().count();
            drop += 1;
        }
        self.turns.drain(..drop);
        drop
    }
}

impl Record for TutoringSession {
    const COLLECTION: Collection = Collection::Sessions;

    fn key(&self) -> String {
        self.id.to_string()
    }
}
