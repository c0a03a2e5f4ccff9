//! Core data models used throughout FLIPFLOPS.
//!
//! Documents and chunks flow from the ingestor into the embedding index.
//! Sessions own their turns and exams; turns refer to chunks by id only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source study file after text extraction and chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable id derived from the path relative to the documents root.
    pub id: String,
    /// Path relative to the documents root (`/`-separated).
    pub source_path: String,
    pub title: String,
    pub content_type: String,
    /// Topic label assigned at ingestion (first directory, else title).
    pub topic: Option<String>,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub chunks: Vec<Chunk>,
}

/// A bounded-length text segment of a document; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{document_id}-{position:04}`; stable across re-ingestion.
    pub id: String,
    pub document_id: String,
    pub position: usize,
    pub text: String,
    /// SHA-256 of `text`, used to detect stale embeddings.
    pub hash: String,
}

/// A chunk reference recorded on a [`Turn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    System,
}

/// The protocol a command dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Question,
    Explain,
    Exam,
    Answer,
    Topics,
    Focus,
    Clear,
    Help,
    Exit,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Question => "question",
            CommandKind::Explain => "explain",
            CommandKind::Exam => "exam",
            CommandKind::Answer => "answer",
            CommandKind::Topics => "topics",
            CommandKind::Focus => "focus",
            CommandKind::Clear => "clear",
            CommandKind::Help => "help",
            CommandKind::Exit => "exit",
        }
    }
}

/// One recorded request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub kind: CommandKind,
    pub input: String,
    #[serde(default)]
    pub retrieved: Vec<ChunkRef>,
    pub response: String,
    /// Set when the turn ended in an error; `response` then holds the message.
    #[serde(default)]
    pub failed: bool,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(kind: CommandKind, input: &str, response: String, retrieved: Vec<ChunkRef>) -> Self {
        Self {
            role: Role::User,
            kind,
            input: input.to_string(),
            retrieved,
            response,
            failed: false,
            at: Utc::now(),
        }
    }

    pub fn failure(kind: CommandKind, input: &str, error: String, retrieved: Vec<ChunkRef>) -> Self {
        Self {
            failed: true,
            ..Self::user(kind, input, error, retrieved)
        }
    }

    pub fn system(kind: CommandKind, response: String) -> Self {
        Self {
            role: Role::System,
            kind,
            input: String::new(),
            retrieved: Vec::new(),
            response,
            failed: false,
            at: Utc::now(),
        }
    }
}

/// A multiple-choice question with exactly one correct option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    /// Zero-based index into `options`.
    pub correct: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Zero-based question index.
    pub question: usize,
    /// Zero-based option index.
    pub chosen: usize,
    pub correct: bool,
    pub at: DateTime<Utc>,
}

/// A generated exam bound to a topic and a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    /// One-based ordinal within the session, used by `responder`.
    pub index: usize,
    pub topic: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    pub created_at: DateTime<Utc>,
}

impl Exam {
    pub fn answer_for(&self, question: usize) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| a.question == question)
    }

    pub fn is_complete(&self) -> bool {
        (0..self.questions.len()).all(|q| self.answer_for(q).is_some())
    }

    pub fn correct_count(&self) -> usize {
        self.answers.iter().filter(|a| a.correct).count()
    }

    /// Fraction of questions answered correctly, in `[0.0, 1.0]`.
    pub fn score(&self) -> f64 {
        if self.questions.is_empty() {
            return 0.0;
        }
        self.correct_count() as f64 / self.questions.len() as f64
    }

    /// First question without an answer record.
    pub fn next_unanswered(&self) -> Option<usize> {
        (0..self.questions.len()).find(|q| self.answer_for(*q).is_none())
    }
}

/// Long-term engagement with a topic. Survives `limpar` unless purged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicStats {
    pub exams_generated: u32,
    pub exams_completed: u32,
    pub answered: u32,
    pub correct: u32,
    /// Final score of each completed exam, in order.
    #[serde(default)]
    pub scores: Vec<f64>,
}

impl TopicStats {
    pub fn accuracy(&self) -> Option<f64> {
        if self.answered == 0 {
            None
        } else {
            Some(self.correct as f64 / self.answered as f64)
        }
    }
}

/// The subset of documents/topics retrieval is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub topics: BTreeSet<String>,
    pub documents: BTreeSet<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.documents.is_empty()
    }
}

/// One user's conversation state across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_level: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub engagement: BTreeMap<String, TopicStats>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub exams: Vec<Exam>,
    /// Monotonic exam counter; exam indices are never reused within a session.
    #[serde(default)]
    pub exam_seq: usize,
    /// Topics inferred from the current conversation.
    #[serde(default)]
    pub related_topics: Vec<String>,
    /// Every topic the student has engaged with.
    #[serde(default)]
    pub previous_topics: Vec<String>,
}
