//! On-disk layout under the data directory.
//!
//! ```text
//! <data>/
//!   documents/              source study material (default documents root)
//!   embeddings/index.json   document metadata, chunks and vectors
//!   conversations/<id>.json one file per session
//!   topics/topics.json      ingestion + conversation topic catalog
//!   FLIPFLOP.md             Markdown summary of the latest session
//! ```
//!
//! Files are written to a uniquely named temporary sibling and renamed
//! into place, so a crash never leaves a half-written file behind and
//! concurrent writers of the same file never share a temp file. The last
//! rename wins.

use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flipflops_core::exam::option_letter;
use flipflops_core::index::IndexSnapshot;
use flipflops_core::models::{Role, Session};
use flipflops_core::topics::TopicCatalog;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns listed in `FLIPFLOP.md`.
const CONTEXT_FILE_TURNS: usize = 10;

#[derive(Debug, Clone)]
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.root.join("documents")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("embeddings").join("index.json")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.root.join("conversations")
    }

    pub fn topics_path(&self) -> PathBuf {
        self.root.join("topics").join("topics.json")
    }

    pub fn context_file_path(&self) -> PathBuf {
        self.root.join("FLIPFLOP.md")
    }

    /// Create every directory of the layout.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.documents_dir(),
            self.root.join("embeddings"),
            self.conversations_dir(),
            self.root.join("topics"),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn load_index(&self) -> Result<Option<IndexSnapshot>> {
        read_json(&self.index_path())
    }

    pub fn save_index(&self, snapshot: &IndexSnapshot) -> Result<()> {
        write_json(&self.index_path(), snapshot)
    }

    pub fn load_topics(&self) -> Result<Option<TopicCatalog>> {
        read_json(&self.topics_path())
    }

    pub fn save_topics(&self, catalog: &TopicCatalog) -> Result<()> {
        write_json(&self.topics_path(), catalog)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.conversations_dir()
            .join(format!("{}.json", session_file_stem(id)))
    }

    pub fn load_session(&self, id: &str) -> Result<Option<Session>> {
        read_json(&self.session_path(id))
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        write_json(&self.session_path(&session.id), session)
    }

    pub fn write_context_file(&self, session: &Session) -> Result<()> {
        write_atomic(&self.context_file_path(), context_markdown(session).as_bytes())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    write_atomic(path, &json)
}

/// File name for a session id. ASCII letters, digits, `-` and `_` are
/// kept; every other byte becomes `%XX`, so distinct ids never share a
/// file and no id can leave conversations/.
fn session_file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "%{:02X}", byte);
        }
    }
    stem
}

/// Write to a fresh temp file next to `path` and rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Markdown summary of a session: metadata, profile, recent turns,
/// topics and exam performance.
pub fn context_markdown(session: &Session) -> String {
    let mut md = String::from("# FLIPFLOP.md\n\n");

    md.push_str("## Metadata\n");
    md.push_str(&format!("- Session: {}\n", session.id));
    md.push_str(&format!("- Created: {}\n", session.created_at.to_rfc3339()));
    md.push_str(&format!("- Last Updated: {}\n\n", session.updated_at.to_rfc3339()));

    md.push_str("## User Profile\n");
    md.push_str(&format!("- Level: {}\n", session.user_level));
    let focus: Vec<&str> = session
        .related_topics
        .iter()
        .take(3)
        .map(|s| s.as_str())
        .collect();
    md.push_str(&format!(
        "- Focus Areas: {}\n",
        if focus.is_empty() { "none yet".to_string() } else { focus.join(", ") }
    ));
    if !session.scope.is_empty() {
        let scope: Vec<&str> = session.scope.topics.iter().map(|s| s.as_str()).collect();
        md.push_str(&format!("- Active Scope: {}\n", scope.join(", ")));
    }
    md.push_str(&format!(
        "- Previous Topics: {}\n\n",
        if session.previous_topics.is_empty() {
            "none yet".to_string()
        } else {
            session.previous_topics.join(", ")
        }
    ));

    md.push_str("## Conversation History\n");
    let recent = session.history_excerpt(CONTEXT_FILE_TURNS);
    if recent.is_empty() {
        md.push_str("No conversation history yet.\n");
    }
    for turn in recent {
        let who = match turn.role {
            Role::User => "user",
            Role::System => "system",
        };
        md.push_str(&format!(
            "### {} {} ({}{})\n",
            who,
            turn.at.format("%Y-%m-%d %H:%M:%S"),
            turn.kind.as_str(),
            if turn.failed { ", failed" } else { "" }
        ));
        if !turn.input.is_empty() {
            md.push_str(&format!("> {}\n\n", turn.input));
        }
        md.push_str(&format!("{}\n\n", turn.response.trim()));
    }
    md.push('\n');

    md.push_str("## Topics\n");
    if session.related_topics.is_empty() {
        md.push_str("No topics discussed yet.\n");
    }
    for topic in &session.related_topics {
        md.push_str(&format!("- {}\n", topic));
    }
    md.push('\n');

    md.push_str("## User Performance\n");
    if session.engagement.is_empty() {
        md.push_str("No performance data tracked yet.\n");
    }
    for (topic, stats) in &session.engagement {
        let accuracy = stats
            .accuracy()
            .map(|a| format!("{:.0}%", a * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        md.push_str(&format!(
            "- {}: {} exams generated, {} completed, {}/{} correct ({})\n",
            topic, stats.exams_generated, stats.exams_completed, stats.correct, stats.answered, accuracy
        ));
    }
    for exam in &session.exams {
        let answers: Vec<String> = exam
            .answers
            .iter()
            .map(|a| format!("{}{}", a.question + 1, option_letter(a.chosen)))
            .collect();
        md.push_str(&format!(
            "  - exam {} ({}): {} of {} answered [{}]\n",
            exam.index,
            exam.topic,
            exam.answers.len(),
            exam.questions.len(),
            answers.join(" ")
        ));
    }
    md
}
