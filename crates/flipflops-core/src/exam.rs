//! Exam JSON extraction and validation.
//!
//! The model is asked for:
//!
//! ```json
//! {
//!   "questions": [
//!     {
//!       "text": "Texto da pergunta",
//!       "options": ["A", "B", "C", "D", "E"],
//!       "correct_answer": "a",
//!       "explanation": "Por que a alternativa correta é correta"
//!     }
//!   ]
//! }
//! ```
//!
//! Models wrap this in prose or code fences often enough that
//! [`parse_exam`] looks for a fenced block first and falls back to the
//! outermost `{ … }` span.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{FlipflopsError, Result};
use crate::models::{Exam, Question};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 5;

const LETTERS: [char; MAX_OPTIONS] = ['a', 'b', 'c', 'd', 'e'];

#[derive(Debug, Deserialize)]
struct RawExam {
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(alias = "prompt", alias = "question")]
    text: String,
    options: Vec<String>,
    #[serde(alias = "correct", alias = "answer")]
    correct_answer: Value,
    #[serde(default)]
    explanation: String,
}

/// Pull the JSON object out of a model response.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(start) = raw.find("```") {
        let after = &raw[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse and validate up to `expected` questions.
///
/// Every question needs a non-empty text, 2–5 non-empty options and a
/// correct answer that points at one of them. Extra questions beyond
/// `expected` are dropped; zero valid questions is an error.
pub fn parse_exam(raw: &str, expected: usize) -> Result<Vec<Question>> {
    let json = extract_json(raw)
        .ok_or_else(|| FlipflopsError::InvalidResponseShape("no JSON object found".to_string()))?;
    let exam: RawExam = serde_json::from_str(json)
        .map_err(|e| FlipflopsError::InvalidResponseShape(format!("malformed exam JSON: {}", e)))?;

    if exam.questions.is_empty() {
        return Err(FlipflopsError::InvalidResponseShape(
            "exam has no questions".to_string(),
        ));
    }

    let mut questions = Vec::with_capacity(exam.questions.len().min(expected));
    for (i, q) in exam.questions.into_iter().take(expected.max(1)).enumerate() {
        questions.push(validate_question(i + 1, q)?);
    }
    Ok(questions)
}

fn validate_question(number: usize, q: RawQuestion) -> Result<Question> {
    let shape = |msg: String| FlipflopsError::InvalidResponseShape(format!("question {}: {}", number, msg));

    let text = q.text.trim().to_string();
    if text.is_empty() {
        return Err(shape("empty text".to_string()));
    }
    let options: Vec<String> = q.options.iter().map(|o| o.trim().to_string()).collect();
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return Err(shape(format!(
            "expected {}-{} options, got {}",
            MIN_OPTIONS,
            MAX_OPTIONS,
            options.len()
        )));
    }
    if options.iter().any(|o| o.is_empty()) {
        return Err(shape("empty option".to_string()));
    }

    let correct = match &q.correct_answer {
        Value::String(s) => parse_option(s, options.len()),
        // Numbers are 1-based, like the `responder` command.
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| (n as usize).checked_sub(1))
            .filter(|i| *i < options.len()),
        _ => None,
    }
    .ok_or_else(|| shape(format!("invalid correct answer {}", q.correct_answer)))?;

    Ok(Question {
        prompt: text,
        options,
        correct,
        explanation: q.explanation.trim().to_string(),
    })
}

/// Parse an option given as a letter (`a`–`e`, any case, optional `)`)
/// or a 1-based number. Returns the zero-based index if it is in range.
pub fn parse_option(input: &str, option_count: usize) -> Option<usize> {
    let s = input.trim().trim_end_matches([')', '.']).trim();
    let index = if let Ok(n) = s.parse::<usize>() {
        n.checked_sub(1)?
    } else {
        let mut chars = s.chars();
        let c = chars.next()?.to_ascii_lowercase();
        if chars.next().is_some() {
            return None;
        }
        LETTERS.iter().position(|l| *l == c)?
    };
    (index < option_count).then_some(index)
}

/// Letter for a zero-based option index.
pub fn option_letter(index: usize) -> char {
    LETTERS.get(index).copied().unwrap_or('?')
}

/// Render an exam for the student, without the answers.
pub fn format_for_display(exam: &Exam) -> String {
    let mut out = format!("Exame {} ({})\n", exam.index, exam.topic);
    for (i, q) in exam.questions.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", i + 1, q.prompt));
        for (j, option) in q.options.iter().enumerate() {
            out.push_str(&format!("   {}) {}\n", option_letter(j), option));
        }
    }
    out.push_str(&format!(
        "\nResponda com: responder {} <questão> <alternativa>\n",
        exam.index
    ));
    out
}
