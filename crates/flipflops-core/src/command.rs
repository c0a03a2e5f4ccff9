//! Textual command parsing.
//!
//! A line is `<keyword> <argument...>`. Keywords are accepted in
//! Portuguese and English, with or without accents (`tópicos`,
//! `topicos`, `topics`). Topic arguments may be quoted.

use crate::error::{FlipflopsError, Result};
use crate::models::CommandKind;
use crate::topics::fold_accents;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Question(String),
    Explain(String),
    Exam {
        topic: String,
        count: Option<usize>,
    },
    Answer {
        /// One-based exam index.
        exam: usize,
        /// One-based question index; `None` means the next unanswered one.
        question: Option<usize>,
        option: String,
    },
    Topics,
    Focus(Option<String>),
    Clear {
        purge: bool,
    },
    Help,
    Exit,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Question(_) => CommandKind::Question,
            Command::Explain(_) => CommandKind::Explain,
            Command::Exam { .. } => CommandKind::Exam,
            Command::Answer { .. } => CommandKind::Answer,
            Command::Topics => CommandKind::Topics,
            Command::Focus(_) => CommandKind::Focus,
            Command::Clear { .. } => CommandKind::Clear,
            Command::Help => CommandKind::Help,
            Command::Exit => CommandKind::Exit,
        }
    }
}

/// Usage lines shown by `ajuda` and in argument errors.
pub const USAGE: &[(&str, &str)] = &[
    ("pergunta <texto>", "responde usando seus materiais de estudo"),
    ("explicar <conceito>", "explicação socrática de um conceito"),
    ("exame <tópico> [N]", "gera um exame de múltipla escolha"),
    ("responder <exame> [questão] <alternativa>", "registra uma resposta"),
    ("tópicos", "lista os tópicos disponíveis"),
    ("foco [tópico]", "restringe a busca a um tópico (sem argumento: remove)"),
    ("limpar [tudo]", "limpa o histórico (tudo: também o desempenho)"),
    ("ajuda", "mostra esta lista"),
    ("sair", "encerra a sessão interativa"),
];

/// Most questions a single exam may ask for.
pub const MAX_EXAM_QUESTIONS: usize = 20;

/// Parse one input line.
pub fn parse(input: &str) -> Result<Command> {
    let input = input.trim();
    let (keyword, rest) = match input.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (input, ""),
    };
    if keyword.is_empty() {
        return Err(FlipflopsError::UnknownCommand(String::new()));
    }

    match fold_accents(keyword).to_lowercase().as_str() {
        "pergunta" | "perguntar" | "question" | "ask" => {
            Ok(Command::Question(required(rest, "pergunta <texto>")?))
        }
        "explicar" | "explique" | "explain" => {
            Ok(Command::Explain(required(rest, "explicar <conceito>")?))
        }
        "exame" | "gerar-prova" | "exam" => parse_exam_args(rest),
        "responder" | "answer" => parse_answer_args(rest),
        "topicos" | "mostrar-topicos" | "topics" => Ok(Command::Topics),
        "foco" | "focus" => {
            let topic = unquote(rest);
            Ok(Command::Focus((!topic.is_empty()).then(|| topic.to_string())))
        }
        "limpar" | "clear" => match fold_accents(rest).to_lowercase().as_str() {
            "" => Ok(Command::Clear { purge: false }),
            "tudo" | "all" => Ok(Command::Clear { purge: true }),
            other => Err(FlipflopsError::InvalidArgument(format!(
                "unexpected argument to limpar: {}",
                other
            ))),
        },
        "ajuda" | "help" => Ok(Command::Help),
        "sair" | "exit" | "quit" => Ok(Command::Exit),
        _ => Err(FlipflopsError::UnknownCommand(keyword.to_string())),
    }
}

fn required(rest: &str, usage: &str) -> Result<String> {
    if rest.is_empty() {
        Err(FlipflopsError::InvalidArgument(format!("usage: {}", usage)))
    } else {
        Ok(rest.to_string())
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].trim();
        }
    }
    s
}

/// `<topic> [N]`: a trailing integer is the question count.
fn parse_exam_args(rest: &str) -> Result<Command> {
    let usage = || FlipflopsError::InvalidArgument("usage: exame <tópico> [N]".to_string());
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(usage());
    }

    let (topic, count) = match rest.rsplit_once(char::is_whitespace) {
        Some((head, tail)) if tail.parse::<usize>().is_ok() => (head.trim(), tail.parse::<usize>().ok()),
        _ => (rest, None),
    };
    let topic = unquote(topic);
    if topic.is_empty() {
        return Err(usage());
    }
    if let Some(n) = count {
        if !(1..=MAX_EXAM_QUESTIONS).contains(&n) {
            return Err(FlipflopsError::InvalidArgument(format!(
                "question count must be between 1 and {}",
                MAX_EXAM_QUESTIONS
            )));
        }
    }
    Ok(Command::Exam {
        topic: topic.to_string(),
        count,
    })
}

/// `<exam> <question> <option>` or `<exam> <option>`.
fn parse_answer_args(rest: &str) -> Result<Command> {
    let usage =
        || FlipflopsError::InvalidArgument("usage: responder <exame> [questão] <alternativa>".to_string());
    let parts: Vec<&str> = rest.split_whitespace().collect();
    let index = |s: &str, what: &str| {
        s.parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| FlipflopsError::InvalidArgument(format!("invalid {} index: {}", what, s)))
    };

    match parts.as_slice() {
        [exam, option] => Ok(Command::Answer {
            exam: index(*exam, "exam")?,
            question: None,
            option: option.to_string(),
        }),
        [exam, question, option] => Ok(Command::Answer {
            exam: index(*exam, "exam")?,
            question: Some(index(*question, "question")?),
            option: option.to_string(),
        }),
        _ => Err(usage()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(parse("tópicos").unwrap(), Command::Topics);
        assert_eq!(parse("topicos").unwrap(), Command::Topics);
        assert_eq!(parse("TOPICS").unwrap(), Command::Topics);
        assert_eq!(parse("mostrar-topicos").unwrap(), Command::Topics);
        assert_eq!(parse("sair").unwrap(), Command::Exit);
        assert_eq!(parse("ajuda").unwrap(), Command::Help);
        assert_eq!(
            parse("explique fotossíntese").unwrap(),
            Command::Explain("fotossíntese".to_string())
        );
    }

    #[test]
    fn test_question_keeps_full_text() {
        assert_eq!(
            parse("pergunta   O que é fotossíntese?").unwrap(),
            Command::Question("O que é fotossíntese?".to_string())
        );
        assert!(matches!(
            parse("pergunta").unwrap_err(),
            FlipflopsError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_exam_args() {
        assert_eq!(
            parse("exame biologia 3").unwrap(),
            Command::Exam {
                topic: "biologia".to_string(),
                count: Some(3)
            }
        );
        assert_eq!(
            parse("gerar-prova \"Brasil Império\"").unwrap(),
            Command::Exam {
                topic: "Brasil Império".to_string(),
                count: None
            }
        );
        assert_eq!(
            parse("exam química orgânica").unwrap(),
            Command::Exam {
                topic: "química orgânica".to_string(),
                count: None
            }
        );
        assert!(parse("exame").is_err());
        assert!(parse("exame biologia 0").is_err());
        assert_eq!(
            parse(&format!("exame biologia {}", MAX_EXAM_QUESTIONS)).unwrap(),
            Command::Exam {
                topic: "biologia".to_string(),
                count: Some(MAX_EXAM_QUESTIONS)
            }
        );
        assert!(matches!(
            parse("exame biologia 2023"),
            Err(FlipflopsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_answer_args() {
        assert_eq!(
            parse("responder 1 2 c").unwrap(),
            Command::Answer {
                exam: 1,
                question: Some(2),
                option: "c".to_string()
            }
        );
        assert_eq!(
            parse("answer 2 b").unwrap(),
            Command::Answer {
                exam: 2,
                question: None,
                option: "b".to_string()
            }
        );
        assert!(parse("responder 0 1 a").is_err());
        assert!(parse("responder x 1 a").is_err());
        assert!(parse("responder 1").is_err());
    }

    #[test]
    fn test_focus_and_clear() {
        assert_eq!(parse("foco").unwrap(), Command::Focus(None));
        assert_eq!(
            parse("foco 'física'").unwrap(),
            Command::Focus(Some("física".to_string()))
        );
        assert_eq!(parse("limpar").unwrap(), Command::Clear { purge: false });
        assert_eq!(parse("limpar tudo").unwrap(), Command::Clear { purge: true });
        assert!(parse("limpar algo").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            parse("dançar agora").unwrap_err(),
            FlipflopsError::UnknownCommand("dançar".to_string())
        );
        assert!(matches!(parse("   ").unwrap_err(), FlipflopsError::UnknownCommand(_)));
    }

    #[test]
    fn test_kind() {
        assert_eq!(parse("tópicos").unwrap().kind(), CommandKind::Topics);
        assert_eq!(parse("limpar").unwrap().kind(), CommandKind::Clear);
    }
}
