//! Protocol Router: parse a command line and run its protocol.
//!
//! One call to [`Router::handle`] is one turn. Commands that touch a
//! session lock it for the whole turn, including the model call. A
//! model failure is recorded as a failed turn and returned; the session
//! stays usable for the next command.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use flipflops_core::command::{parse, Command, USAGE};
use flipflops_core::exam::{format_for_display, option_letter, parse_option, MAX_OPTIONS};
use flipflops_core::index::{EmbeddingIndex, SearchHit};
use flipflops_core::models::{ChunkRef, CommandKind, Exam, Scope, Session, Turn};
use flipflops_core::prompt::{exam_prompt, explain_prompt, question_prompt, PromptContext};
use flipflops_core::session::AnswerOutcome;
use flipflops_core::topics::{normalize_label, TopicCatalog, TopicOrigin};
use flipflops_core::FlipflopsError;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::ContextManager;
use crate::embedding::{embed_query, Embedder};
use crate::model::{complete_with_timeout, request_exam, ResponseModel};

/// A retrieved passage as shown to the student.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub title: String,
    pub path: String,
    pub score: f32,
}

/// Successful outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer { text: String, sources: Vec<Source> },
    Exam(Exam),
    Answered(AnswerOutcome),
    Topics { library: Vec<String>, session: Vec<String> },
    Focus(Option<String>),
    Cleared { purge: bool },
    Help,
    Exit,
}

impl Reply {
    pub fn is_exit(&self) -> bool {
        matches!(self, Reply::Exit)
    }

    /// Text shown to the student.
    pub fn render(&self) -> String {
        match self {
            Reply::Answer { text, sources } => {
                let mut out = text.trim().to_string();
                if !sources.is_empty() {
                    out.push_str("\n\nFontes:");
                    for s in sources {
                        out.push_str(&format!("\n  - {} ({}) [{:.2}]", s.title, s.path, s.score));
                    }
                }
                out
            }
            Reply::Exam(exam) => format_for_display(exam).trim_end().to_string(),
            Reply::Answered(outcome) => render_answer(outcome),
            Reply::Topics { library, session } => {
                let mut out = String::from("Tópicos dos seus materiais:");
                if library.is_empty() {
                    out.push_str("\n  (nenhum documento indexado; rode `flipflops ingest`)");
                }
                for label in library {
                    out.push_str(&format!("\n  - {}", label));
                }
                if !session.is_empty() {
                    out.push_str("\n\nTópicos desta sessão:");
                    for label in session {
                        out.push_str(&format!("\n  - {}", label));
                    }
                }
                out
            }
            Reply::Focus(Some(topic)) => format!("Foco definido em: {}", topic),
            Reply::Focus(None) => "Foco removido; a busca usa todos os materiais.".to_string(),
            Reply::Cleared { purge: false } => {
                "Histórico limpo. Seu desempenho por tópico foi mantido.".to_string()
            }
            Reply::Cleared { purge: true } => {
                "Histórico e desempenho por tópico apagados.".to_string()
            }
            Reply::Help => {
                let mut out = String::from("Comandos:");
                for (usage, what) in USAGE {
                    out.push_str(&format!("\n  {:<44} {}", usage, what));
                }
                out
            }
            Reply::Exit => "Até logo! Bons estudos.".to_string(),
        }
    }
}

fn render_answer(outcome: &AnswerOutcome) -> String {
    let mut out = if outcome.correct {
        format!(
            "Questão {} do exame {}: correta! ({})",
            outcome.question + 1,
            outcome.exam,
            option_letter(outcome.chosen)
        )
    } else {
        format!(
            "Questão {} do exame {}: incorreta. Você marcou {}, a resposta certa é {}.",
            outcome.question + 1,
            outcome.exam,
            option_letter(outcome.chosen),
            option_letter(outcome.correct_option)
        )
    };
    if !outcome.explanation.trim().is_empty() {
        out.push_str(&format!("\n{}", outcome.explanation.trim()));
    }
    if let Some(result) = &outcome.completed {
        out.push_str(&format!(
            "\n\nExame {} concluído: {}/{} ({:.0}%).",
            result.exam,
            result.correct,
            result.total,
            result.score * 100.0
        ));
    }
    out
}

pub struct Router {
    config: Arc<Config>,
    index: Arc<EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ResponseModel>,
    context: Arc<ContextManager>,
}

impl Router {
    pub fn new(
        config: Arc<Config>,
        index: Arc<EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ResponseModel>,
        context: Arc<ContextManager>,
    ) -> Self {
        Self {
            config,
            index,
            embedder,
            model,
            context,
        }
    }

    fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.config.model.timeout_secs)
    }

    /// Run one command line for `session_id`.
    pub async fn handle(&self, session_id: &str, input: &str) -> Result<Reply> {
        let command = parse(input)?;
        debug!(session = session_id, kind = command.kind().as_str(), "command");

        match command {
            Command::Question(text) => {
                let mut session = self.lock_session(session_id).await?;
                self.answer(&mut session, CommandKind::Question, input, &text).await
            }
            Command::Explain(concept) => {
                let mut session = self.lock_session(session_id).await?;
                self.answer(&mut session, CommandKind::Explain, input, &concept).await
            }
            Command::Exam { topic, count } => {
                let mut session = self.lock_session(session_id).await?;
                self.exam(&mut session, input, &topic, count).await
            }
            Command::Answer {
                exam,
                question,
                option,
            } => {
                let mut session = self.lock_session(session_id).await?;
                self.record_answer(&mut session, input, exam, question, &option)
            }
            Command::Topics => {
                let session = self.lock_session(session_id).await?;
                Ok(self.topics(&session))
            }
            Command::Focus(topic) => {
                let mut session = self.lock_session(session_id).await?;
                self.focus(&mut session, topic)
            }
            Command::Clear { purge } => {
                let mut session = self.lock_session(session_id).await?;
                self.context.reset(&mut session, purge)?;
                Ok(Reply::Cleared { purge })
            }
            Command::Help => Ok(Reply::Help),
            Command::Exit => Ok(Reply::Exit),
        }
    }

    /// The session lock is held until the returned guard drops.
    async fn lock_session(&self, id: &str) -> Result<OwnedMutexGuard<Session>> {
        Ok(self.context.get_session(id)?.lock_owned().await)
    }

    /// Top-K passages for `text`. Retrieval problems are logged and the
    /// turn continues without passages.
    async fn retrieve(&self, text: &str, scope: Option<&BTreeSet<String>>) -> Vec<SearchHit> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() {
            return Vec::new();
        }
        let query = match embed_query(self.embedder.as_ref(), text).await {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "query embedding failed, answering without passages");
                return Vec::new();
            }
        };
        let retrieval = &self.config.retrieval;
        match snapshot.search(&query, retrieval.top_k, retrieval.min_score, scope) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "search failed, answering without passages");
                Vec::new()
            }
        }
    }

    fn sources(&self, hits: &[SearchHit]) -> Vec<Source> {
        let snapshot = self.index.snapshot();
        hits.iter()
            .map(|hit| {
                let (title, path) = snapshot
                    .document(&hit.document_id)
                    .map(|d| (d.title.clone(), d.source_path.clone()))
                    .unwrap_or_else(|| (hit.document_id.clone(), String::new()));
                Source {
                    title,
                    path,
                    score: hit.score,
                }
            })
            .collect()
    }

    /// Question and explain protocols.
    async fn answer(
        &self,
        session: &mut Session,
        kind: CommandKind,
        input: &str,
        text: &str,
    ) -> Result<Reply> {
        let scope = (!session.scope.documents.is_empty()).then(|| session.scope.documents.clone());
        let hits = self.retrieve(text, scope.as_ref()).await;
        let refs = hits.iter().map(|h| h.to_ref()).collect::<Vec<_>>();

        let ctx = PromptContext {
            passages: &hits,
            history: session.history_excerpt(self.config.session.history_window),
            user_level: &session.user_level,
        };
        let request = match kind {
            CommandKind::Explain => explain_prompt(text, &ctx),
            _ => question_prompt(text, &ctx),
        };

        match complete_with_timeout(self.model.as_ref(), &request, self.model_timeout()).await {
            Ok(response) => {
                self.context
                    .append_turn(session, Turn::user(kind, input, response.clone(), refs))?;
                Ok(Reply::Answer {
                    text: response,
                    sources: self.sources(&hits),
                })
            }
            Err(e) => self.fail_turn(session, kind, input, e, refs),
        }
    }

    async fn exam(
        &self,
        session: &mut Session,
        input: &str,
        topic: &str,
        count: Option<usize>,
    ) -> Result<Reply> {
        let count = count.unwrap_or(self.config.session.exam_questions);
        let topic_docs = self.index.snapshot().documents_for_topic(topic);
        let scope = if !topic_docs.is_empty() {
            Some(topic_docs)
        } else if !session.scope.documents.is_empty() {
            Some(session.scope.documents.clone())
        } else {
            None
        };
        let hits = self.retrieve(topic, scope.as_ref()).await;
        let refs = hits.iter().map(|h| h.to_ref()).collect::<Vec<_>>();

        let ctx = PromptContext {
            passages: &hits,
            history: session.history_excerpt(self.config.session.history_window),
            user_level: &session.user_level,
        };
        let request = exam_prompt(topic, count, &ctx);

        match request_exam(self.model.as_ref(), &request, self.model_timeout()).await {
            Ok(questions) => {
                let exam = session.add_exam(topic, questions).clone();
                info!(
                    session = %session.id,
                    exam = exam.index,
                    questions = exam.questions.len(),
                    "exam generated"
                );
                self.context.append_turn(
                    session,
                    Turn::user(CommandKind::Exam, input, format_for_display(&exam), refs),
                )?;
                Ok(Reply::Exam(exam))
            }
            Err(e) => self.fail_turn(session, CommandKind::Exam, input, e, refs),
        }
    }

    fn record_answer(
        &self,
        session: &mut Session,
        input: &str,
        exam_index: usize,
        question: Option<usize>,
        option: &str,
    ) -> Result<Reply> {
        let exam = session.exam(exam_index)?;
        let question = match question {
            Some(0) => {
                return Err(FlipflopsError::InvalidAnswer(
                    "questions are numbered from 1".to_string(),
                )
                .into())
            }
            Some(q) => Some(q - 1),
            None => None,
        };
        let option_count = question
            .or_else(|| exam.next_unanswered())
            .and_then(|q| exam.questions.get(q))
            .map(|q| q.options.len())
            .unwrap_or(MAX_OPTIONS);
        let chosen = parse_option(option, option_count).ok_or_else(|| {
            FlipflopsError::InvalidAnswer(format!(
                "'{}' is not an option; use a letter a-{} or a number 1-{}",
                option,
                option_letter(option_count.saturating_sub(1)),
                option_count
            ))
        })?;

        let outcome = self
            .context
            .record_answer(session, exam_index, question, chosen)?;
        let reply = Reply::Answered(outcome);
        self.context.append_turn(
            session,
            Turn::user(CommandKind::Answer, input, reply.render(), Vec::new()),
        )?;
        Ok(reply)
    }

    /// Topic labels from the index plus this session's own topics.
    fn topics(&self, session: &Session) -> Reply {
        let library = self.index.snapshot().topics().labels();

        let mut own = TopicCatalog::new();
        for label in session
            .previous_topics
            .iter()
            .chain(session.engagement.keys())
            .chain(session.scope.topics.iter())
        {
            own.add(label, TopicOrigin::Conversation, None, Vec::new());
        }
        let session_labels = own
            .iter()
            .map(|t| {
                let key = normalize_label(&t.label);
                let stats = session
                    .engagement
                    .iter()
                    .find(|(k, _)| normalize_label(k) == key)
                    .map(|(_, stats)| stats);
                match stats {
                    Some(stats) => match stats.accuracy() {
                        Some(acc) => format!(
                            "{} ({}/{} acertos, {:.0}%)",
                            t.label,
                            stats.correct,
                            stats.answered,
                            acc * 100.0
                        ),
                        None => format!("{} ({} exame(s) gerado(s))", t.label, stats.exams_generated),
                    },
                    None => t.label.clone(),
                }
            })
            .collect();

        Reply::Topics {
            library,
            session: session_labels,
        }
    }

    fn focus(&self, session: &mut Session, topic: Option<String>) -> Result<Reply> {
        let Some(topic) = topic else {
            session.scope = Scope::default();
            self.context.persist(session)?;
            return Ok(Reply::Focus(None));
        };

        let snapshot = self.index.snapshot();
        let documents = snapshot.documents_for_topic(&topic);
        if documents.is_empty() {
            let known = snapshot.topics().labels();
            return Err(FlipflopsError::InvalidArgument(format!(
                "no indexed documents for topic '{}' (known topics: {})",
                topic,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            ))
            .into());
        }
        let label = snapshot
            .topics()
            .get(&topic)
            .map(|t| t.label.clone())
            .unwrap_or(topic);

        session.scope = Scope {
            topics: BTreeSet::from([label.clone()]),
            documents,
        };
        info!(session = %session.id, topic = %label, "focus set");
        self.context.persist(session)?;
        Ok(Reply::Focus(Some(label)))
    }

    /// Record a failed turn and return the error to the caller.
    fn fail_turn(
        &self,
        session: &mut Session,
        kind: CommandKind,
        input: &str,
        error: FlipflopsError,
        refs: Vec<ChunkRef>,
    ) -> Result<Reply> {
        warn!(session = %session.id, kind = kind.as_str(), error = %error, "turn failed");
        self.context
            .append_turn(session, Turn::failure(kind, input, error.to_string(), refs))?;
        Err(error.into())
    }
}
