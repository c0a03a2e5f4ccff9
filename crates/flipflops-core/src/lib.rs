//! # FLIPFLOPS Core
//!
//! Runtime-free logic for FLIPFLOPS: the study data model, chunking,
//! the copy-then-swap embedding index, exam validation, command parsing
//! and prompt assembly.
//!
//! This crate has no tokio, HTTP or filesystem dependencies. Everything
//! that talks to the outside world (document extraction, embedding
//! backends, the language model, persistence) lives in the `flipflops`
//! app crate and is wired on top of these types.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Documents, chunks, sessions, turns, exams |
//! | [`error`] | Domain error taxonomy |
//! | [`chunk`] | Paragraph → sentence → window chunker |
//! | [`embedding`] | Cosine similarity and the offline hash embedder |
//! | [`index`] | Embedding index with atomic snapshot swaps |
//! | [`exam`] | Exam JSON extraction, validation and option parsing |
//! | [`command`] | Textual command parsing |
//! | [`prompt`] | Prompt assembly for each protocol |
//! | [`session`] | Session state transitions (turns, exams, answers, reset) |
//! | [`topics`] | Topic catalog and keyword topic inference |

pub mod chunk;
pub mod command;
pub mod embedding;
pub mod error;
pub mod exam;
pub mod index;
pub mod models;
pub mod prompt;
pub mod session;
pub mod topics;

pub use error::{FlipflopsError, Result};
