//! Session state transitions.
//!
//! Every mutation of a [`Session`] goes through these methods so the
//! invariants hold in one place: history is append-only, exam questions
//! are never modified (only answer records are appended), each question
//! takes at most one answer, and topic engagement outlives `reset`
//! unless a purge is requested.

use chrono::Utc;
use serde::Serialize;

use crate::error::{FlipflopsError, Result};
use crate::models::{AnswerRecord, Exam, Question, Scope, Session, TopicStats, Turn};
use crate::topics::normalize_label;

/// Result of recording a single answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerOutcome {
    pub exam: usize,
    pub topic: String,
    /// Zero-based question index.
    pub question: usize,
    pub chosen: usize,
    pub correct_option: usize,
    pub correct: bool,
    pub explanation: String,
    /// Present when this answer completed the exam.
    pub completed: Option<ExamResult>,
}

/// Final tally of an exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamResult {
    pub exam: usize,
    pub topic: String,
    pub correct: usize,
    pub total: usize,
    pub score: f64,
}

impl ExamResult {
    fn of(exam: &Exam) -> Self {
        Self {
            exam: exam.index,
            topic: exam.topic.clone(),
            correct: exam.correct_count(),
            total: exam.questions.len(),
            score: exam.score(),
        }
    }
}

impl Session {
    pub fn new(id: &str, user_level: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            updated_at: now,
            user_level: user_level.to_string(),
            turns: Vec::new(),
            engagement: Default::default(),
            scope: Scope::default(),
            exams: Vec::new(),
            exam_seq: 0,
            related_topics: Vec::new(),
            previous_topics: Vec::new(),
        }
    }

    pub fn append_turn(&mut self, turn: Turn) {
        self.updated_at = turn.at;
        self.turns.push(turn);
    }

    /// The last `n` turns, oldest first.
    pub fn history_excerpt(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Clear history, exams and active scope. Engagement statistics and the
    /// list of previously studied topics survive unless `purge` is set.
    pub fn reset(&mut self, purge: bool) {
        self.turns.clear();
        self.exams.clear();
        self.scope = Scope::default();
        self.related_topics.clear();
        if purge {
            self.engagement.clear();
            self.previous_topics.clear();
        }
        self.updated_at = Utc::now();
    }

    /// Record topics inferred from the conversation.
    pub fn note_topics<I>(&mut self, topics: I)
    where
        I: IntoIterator<Item = String>,
    {
        for topic in topics {
            push_unique(&mut self.related_topics, &topic);
            push_unique(&mut self.previous_topics, &topic);
        }
    }

    /// Engagement entry for `topic`, matching existing labels case- and
    /// accent-insensitively.
    pub fn engagement_mut(&mut self, topic: &str) -> &mut TopicStats {
        let wanted = normalize_label(topic);
        let key = self
            .engagement
            .keys()
            .find(|k| normalize_label(k) == wanted)
            .cloned()
            .unwrap_or_else(|| topic.trim().to_string());
        self.engagement.entry(key).or_default()
    }

    /// Store a freshly generated exam and return it.
    pub fn add_exam(&mut self, topic: &str, questions: Vec<Question>) -> &Exam {
        self.exam_seq += 1;
        let exam = Exam {
            id: uuid::Uuid::new_v4().to_string(),
            index: self.exam_seq,
            topic: topic.trim().to_string(),
            questions,
            answers: Vec::new(),
            created_at: Utc::now(),
        };
        self.engagement_mut(topic).exams_generated += 1;
        push_unique(&mut self.previous_topics, topic.trim());
        self.exams.push(exam);
        &self.exams[self.exams.len() - 1]
    }

    pub fn exam(&self, index: usize) -> Result<&Exam> {
        self.exams
            .iter()
            .find(|e| e.index == index)
            .ok_or(FlipflopsError::ExamNotFound(index))
    }

    /// Record one answer. `question` is zero-based; `None` picks the first
    /// unanswered question.
    pub fn record_answer(
        &mut self,
        exam_index: usize,
        question: Option<usize>,
        chosen: usize,
    ) -> Result<AnswerOutcome> {
        let pos = self.exam_position(exam_index)?;
        let exam = &self.exams[pos];
        let question = match question {
            Some(q) => q,
            None => exam.next_unanswered().ok_or_else(|| {
                FlipflopsError::InvalidAnswer(format!(
                    "every question of exam {} is already answered",
                    exam_index
                ))
            })?,
        };
        validate_answer(exam, question, chosen)?;
        Ok(self.apply_answer(pos, question, chosen))
    }

    /// Record a batch of answers (one option per question, in order) and
    /// return the exam tally. Questions already answered keep their first
    /// answer. Nothing is recorded if any option is invalid.
    pub fn record_exam_result(&mut self, exam_index: usize, answers: &[usize]) -> Result<ExamResult> {
        let pos = self.exam_position(exam_index)?;
        let exam = &self.exams[pos];
        if answers.len() > exam.questions.len() {
            return Err(FlipflopsError::InvalidAnswer(format!(
                "{} answers given for {} questions",
                answers.len(),
                exam.questions.len()
            )));
        }
        let mut pending = Vec::new();
        for (question, &chosen) in answers.iter().enumerate() {
            if exam.answer_for(question).is_some() {
                continue;
            }
            validate_answer(exam, question, chosen)?;
            pending.push((question, chosen));
        }
        for (question, chosen) in pending {
            self.apply_answer(pos, question, chosen);
        }
        Ok(ExamResult::of(&self.exams[pos]))
    }

    fn exam_position(&self, index: usize) -> Result<usize> {
        self.exams
            .iter()
            .position(|e| e.index == index)
            .ok_or(FlipflopsError::ExamNotFound(index))
    }

    fn apply_answer(&mut self, pos: usize, question: usize, chosen: usize) -> AnswerOutcome {
        let exam = &mut self.exams[pos];
        let q = &exam.questions[question];
        let correct = q.correct == chosen;
        let correct_option = q.correct;
        let explanation = q.explanation.clone();
        exam.answers.push(AnswerRecord {
            question,
            chosen,
            correct,
            at: Utc::now(),
        });
        let completed = exam.is_complete().then(|| ExamResult::of(exam));
        let exam_index = exam.index;
        let topic = exam.topic.clone();

        let stats = self.engagement_mut(&topic);
        stats.answered += 1;
        if correct {
            stats.correct += 1;
        }
        if let Some(result) = &completed {
            stats.exams_completed += 1;
            stats.scores.push(result.score);
        }
        self.updated_at = Utc::now();

        AnswerOutcome {
            exam: exam_index,
            topic,
            question,
            chosen,
            correct_option,
            correct,
            explanation,
            completed,
        }
    }
}

fn validate_answer(exam: &Exam, question: usize, chosen: usize) -> Result<()> {
    let Some(q) = exam.questions.get(question) else {
        return Err(FlipflopsError::InvalidAnswer(format!(
            "exam {} has {} questions, there is no question {}",
            exam.index,
            exam.questions.len(),
            question + 1
        )));
    };
    if exam.answer_for(question).is_some() {
        return Err(FlipflopsError::InvalidAnswer(format!(
            "question {} of exam {} is already answered",
            question + 1,
            exam.index
        )));
    }
    if chosen >= q.options.len() {
        return Err(FlipflopsError::InvalidAnswer(format!(
            "question {} has {} options",
            question + 1,
            q.options.len()
        )));
    }
    Ok(())
}

fn push_unique(list: &mut Vec<String>, topic: &str) {
    let wanted = normalize_label(topic);
    if wanted.is_empty() || list.iter().any(|t| normalize_label(t) == wanted) {
        return;
    }
    list.push(topic.to_string());
}
