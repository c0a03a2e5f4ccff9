//! Context Manager: session lifecycle, persistence and the topic catalog.
//!
//! Each session lives behind its own `tokio::sync::Mutex`. A protocol
//! turn holds that lock from start to finish, so turns of one session
//! never interleave while different sessions proceed in parallel.
//!
//! Every mutation is written back to `conversations/<id>.json` and
//! `FLIPFLOP.md` before the call returns. The topic catalog is shared by
//! all sessions and swapped copy-then-replace, like the index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use flipflops_core::index::IndexSnapshot;
use flipflops_core::models::{CommandKind, Session, Turn};
use flipflops_core::session::{AnswerOutcome, ExamResult};
use flipflops_core::topics::{extract_topics, TopicCatalog, TopicOrigin};
use tracing::{debug, info, warn};

use crate::store::DataStore;

/// Shared handle to one session; lock it for the duration of a turn.
pub type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

pub struct ContextManager {
    store: DataStore,
    user_level: String,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    catalog: RwLock<Arc<TopicCatalog>>,
    catalog_writer: Mutex<()>,
}

impl ContextManager {
    pub fn new(store: DataStore, user_level: &str) -> Self {
        let catalog = match store.load_topics() {
            Ok(Some(catalog)) => catalog,
            Ok(None) => TopicCatalog::new(),
            Err(e) => {
                warn!(error = %e, "topic catalog unreadable, starting empty");
                TopicCatalog::new()
            }
        };
        Self {
            store,
            user_level: user_level.to_string(),
            sessions: Mutex::new(HashMap::new()),
            catalog: RwLock::new(Arc::new(catalog)),
            catalog_writer: Mutex::new(()),
        }
    }

    /// Return the session `id`, loading it from disk or creating it.
    pub fn get_session(&self, id: &str) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = sessions.get(id) {
            return Ok(handle.clone());
        }
        let session = match self.store.load_session(id)? {
            Some(session) => {
                debug!(session = id, turns = session.turns.len(), "session loaded");
                session
            }
            None => {
                info!(session = id, "new session");
                Session::new(id, &self.user_level)
            }
        };
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        sessions.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Append a turn, infer topics from its input and persist.
    pub fn append_turn(&self, session: &mut Session, turn: Turn) -> Result<()> {
        let topics = match turn.kind {
            CommandKind::Question | CommandKind::Explain | CommandKind::Exam => {
                extract_topics(&turn.input)
            }
            _ => Vec::new(),
        };
        session.append_turn(turn);
        if !topics.is_empty() {
            session.note_topics(topics.iter().cloned());
            self.note_conversation_topics(&topics)?;
        }
        self.persist(session)
    }

    pub fn record_answer(
        &self,
        session: &mut Session,
        exam: usize,
        question: Option<usize>,
        chosen: usize,
    ) -> Result<AnswerOutcome> {
        let outcome = session.record_answer(exam, question, chosen)?;
        self.persist(session)?;
        Ok(outcome)
    }

    /// Record a full answer sheet for an exam and persist the tally.
    pub fn record_exam_result(
        &self,
        session: &mut Session,
        exam: usize,
        answers: &[usize],
    ) -> Result<ExamResult> {
        let result = session.record_exam_result(exam, answers)?;
        self.persist(session)?;
        Ok(result)
    }

    pub fn reset(&self, session: &mut Session, purge: bool) -> Result<()> {
        session.reset(purge);
        info!(session = %session.id, purge, "session reset");
        self.persist(session)
    }

    /// Write the session file and the Markdown context file.
    pub fn persist(&self, session: &Session) -> Result<()> {
        self.store.save_session(session)?;
        self.store.write_context_file(session)?;
        Ok(())
    }

    pub fn catalog(&self) -> Arc<TopicCatalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the ingestion topics with those of `snapshot`, keeping
    /// topics that came from conversations.
    pub fn refresh_ingestion_topics(&self, snapshot: &IndexSnapshot) -> Result<()> {
        self.update_catalog(|current| {
            let mut next = snapshot.topics();
            for topic in current.iter().filter(|t| t.origin == TopicOrigin::Conversation) {
                next.add(
                    &topic.label,
                    TopicOrigin::Conversation,
                    None,
                    topic.chunk_ids.iter().cloned(),
                );
            }
            Some(next)
        })
    }

    fn note_conversation_topics(&self, labels: &[String]) -> Result<()> {
        self.update_catalog(|current| {
            if labels.iter().all(|l| current.get(l).is_some()) {
                return None;
            }
            let mut next = current.clone();
            for label in labels {
                next.add(label, TopicOrigin::Conversation, None, Vec::new());
            }
            Some(next)
        })
    }

    fn update_catalog<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&TopicCatalog) -> Option<TopicCatalog>,
    {
        let _writer = self.catalog_writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.catalog();
        let Some(next) = f(&current) else {
            return Ok(());
        };
        if next == *current {
            return Ok(());
        }
        self.store.save_topics(&next)?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipflops_core::models::Question;
    use flipflops_core::FlipflopsError;
    use tempfile::TempDir;

    fn manager() -> (TempDir, ContextManager) {
        let tmp = TempDir::new().unwrap();
        let store = DataStore::new(tmp.path());
        store.ensure_layout().unwrap();
        (tmp, ContextManager::new(store, "ensino médio"))
    }

    fn question() -> Question {
        Question {
            prompt: "2 + 2?".to_string(),
            options: vec!["3".to_string(), "4".to_string()],
            correct: 1,
            explanation: String::new(),
        }
    }

    #[tokio::test]
    async fn test_get_session_returns_same_handle() {
        let (_tmp, ctx) = manager();
        let a = ctx.get_session("s1").unwrap();
        let b = ctx.get_session("s1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.user_level, "ensino médio");
    }

    #[tokio::test]
    async fn test_turns_persist_and_reload() {
        let (tmp, ctx) = manager();
        {
            let handle = ctx.get_session("s1").unwrap();
            let mut session = handle.lock().await;
            ctx.append_turn(
                &mut session,
                Turn::user(
                    CommandKind::Question,
                    "pergunta sobre fotossíntese",
                    "resposta".to_string(),
                    vec![],
                ),
            )
            .unwrap();
            assert_eq!(session.related_topics, vec!["fotossíntese".to_string()]);
        }
        assert!(tmp.path().join("FLIPFLOP.md").exists());
        assert!(ctx.catalog().get("fotossintese").is_some());

        let fresh = ContextManager::new(DataStore::new(tmp.path()), "ensino médio");
        let handle = fresh.get_session("s1").unwrap();
        let session = handle.lock().await;
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].response, "resposta");
        assert!(fresh.catalog().get("fotossíntese").is_some());
    }

    #[tokio::test]
    async fn test_reset_keeps_engagement_unless_purged() {
        let (_tmp, ctx) = manager();
        let handle = ctx.get_session("s1").unwrap();
        let mut session = handle.lock().await;
        session.add_exam("matemática", vec![question()]);
        ctx.record_answer(&mut session, 1, None, 1).unwrap();

        ctx.reset(&mut session, false).unwrap();
        assert!(session.turns.is_empty());
        assert!(session.exams.is_empty());
        assert_eq!(session.engagement["matemática"].correct, 1);

        ctx.reset(&mut session, true).unwrap();
        assert!(session.engagement.is_empty());
    }

    #[tokio::test]
    async fn test_record_exam_result_errors_leave_session_untouched() {
        let (_tmp, ctx) = manager();
        let handle = ctx.get_session("s1").unwrap();
        let mut session = handle.lock().await;
        session.add_exam("matemática", vec![question(), question()]);

        let err = ctx.record_exam_result(&mut session, 9, &[1]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FlipflopsError>(),
            Some(&FlipflopsError::ExamNotFound(9))
        );

        let result = ctx.record_exam_result(&mut session, 1, &[1, 0]).unwrap();
        assert_eq!(result.correct, 1);
        assert_eq!(result.total, 2);
    }

    #[test]
    fn test_refresh_keeps_conversation_topics() {
        let (_tmp, ctx) = manager();
        ctx.note_conversation_topics(&["história".to_string()]).unwrap();

        let mut snapshot = IndexSnapshot::new(Some("hash-8".to_string()));
        snapshot.documents.insert(
            "d1".to_string(),
            flipflops_core::index::DocumentEntry {
                id: "d1".to_string(),
                title: "celula".to_string(),
                source_path: "biologia/celula.md".to_string(),
                topic: Some("biologia".to_string()),
                hash: "h".to_string(),
            },
        );
        ctx.refresh_ingestion_topics(&snapshot).unwrap();

        let catalog = ctx.catalog();
        assert_eq!(catalog.get("biologia").unwrap().origin, TopicOrigin::Ingestion);
        assert_eq!(catalog.get("historia").unwrap().origin, TopicOrigin::Conversation);
    }
}
