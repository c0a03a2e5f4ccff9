//! # FLIPFLOPS
//!
//! A retrieval-augmented study assistant. Students drop their study
//! material into a directory; FLIPFLOPS indexes it and answers questions,
//! explains concepts and generates multiple-choice exams grounded in that
//! material, keeping per-session conversation state.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌──────────────────┐
//! │ documents/ │──▶│   Ingestor    │──▶│ Embedding Index  │
//! │ md/pdf/... │   │ extract+chunk │   │ copy-then-swap   │
//! └────────────┘   └───────────────┘   └────────┬─────────┘
//!                                               │ top-K
//!  command ──▶ ┌─────────────────┐  ◀───────────┘
//!              │ Protocol Router │──▶ Response Model (LLM)
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │ Context Manager │──▶ conversations/, FLIPFLOP.md
//!              └─────────────────┘
//! ```
//!
//! Runtime-free logic (chunking, the index, sessions, command parsing,
//! prompts, exam validation) lives in the `flipflops-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Text extraction for md/txt/pdf/docx/csv |
//! | [`ingest`] | Documents root scan, extraction and chunking |
//! | [`embedding`] | Embedding backends (hash, OpenAI, Ollama, fastembed) |
//! | [`indexer`] | Incremental sync and full rebuild of the index |
//! | [`store`] | On-disk layout and atomic JSON persistence |
//! | [`context`] | Sessions, per-session locking, topic catalog |
//! | [`model`] | Response model (Anthropic Messages API) |
//! | [`router`] | Command dispatch to protocols |
//! | [`app`] | Startup wiring |
//! | [`repl`] | Interactive loop |

pub mod app;
pub mod config;
pub mod context;
pub mod embedding;
pub mod extract;
pub mod indexer;
pub mod ingest;
pub mod model;
pub mod repl;
pub mod router;
pub mod store;
