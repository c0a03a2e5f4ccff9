//! Prompt assembly for each protocol.
//!
//! A [`ModelRequest`] is a system instruction, a user message and the
//! [`ResponseShape`] the caller expects back. Retrieved passages and a
//! short history excerpt are rendered into the user message.

use crate::index::SearchHit;
use crate::models::{Role, Turn};

/// Passage text beyond this many bytes is cut before it goes into a prompt.
const MAX_PASSAGE_BYTES: usize = 2000;
/// History responses are shortened harder than passages.
const MAX_HISTORY_BYTES: usize = 400;

const PERSONA: &str = "Você é o FLIPFLOPS, um tutor para estudantes brasileiros do ensino médio \
que se preparam para o vestibular FUVEST. Responda sempre em português do Brasil, \
com linguagem clara e adequada ao nível do estudante.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Text,
    ExamJson { questions: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    pub shape: ResponseShape,
}

/// What a protocol knows when it builds a prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub passages: &'a [SearchHit],
    pub history: &'a [Turn],
    pub user_level: &'a str,
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

fn system_for(ctx: &PromptContext<'_>, extra: &str) -> String {
    format!(
        "{}\nNível do estudante: {}.\n\n{}",
        PERSONA, ctx.user_level, extra
    )
}

fn render_passages(passages: &[SearchHit]) -> String {
    if passages.is_empty() {
        return "(nenhum trecho relevante encontrado nos materiais de estudo)\n".to_string();
    }
    let mut out = String::new();
    for (i, hit) in passages.iter().enumerate() {
        out.push_str(&format!(
            "[{}] ({}, relevância {:.2})\n{}\n\n",
            i + 1,
            hit.chunk_id,
            hit.score,
            truncate(&hit.text, MAX_PASSAGE_BYTES)
        ));
    }
    out
}

fn render_history(history: &[Turn]) -> String {
    let mut out = String::new();
    for turn in history.iter().filter(|t| t.role == Role::User && !t.failed) {
        out.push_str(&format!(
            "Estudante ({}): {}\nFLIPFLOPS: {}\n",
            turn.kind.as_str(),
            turn.input,
            truncate(&turn.response, MAX_HISTORY_BYTES)
        ));
    }
    out
}

fn user_message(ctx: &PromptContext<'_>, task: &str) -> String {
    let mut msg = String::new();
    let history = render_history(ctx.history);
    if !history.is_empty() {
        msg.push_str("Conversa recente:\n");
        msg.push_str(&history);
        msg.push('\n');
    }
    msg.push_str("Trechos dos materiais de estudo:\n");
    msg.push_str(&render_passages(ctx.passages));
    msg.push_str(task);
    msg
}

/// Direct answer grounded in the retrieved passages.
pub fn question_prompt(question: &str, ctx: &PromptContext<'_>) -> ModelRequest {
    ModelRequest {
        system: system_for(
            ctx,
            "Responda à pergunta usando os trechos fornecidos. Cite os trechos pelo número \
             entre colchetes. Se os trechos não forem suficientes, diga isso e responda com \
             o seu conhecimento geral, deixando claro o que vem de fora dos materiais.",
        ),
        user: user_message(ctx, &format!("Pergunta: {}", question)),
        shape: ResponseShape::Text,
    }
}

/// Socratic explanation: guiding questions instead of a ready answer.
pub fn explain_prompt(concept: &str, ctx: &PromptContext<'_>) -> ModelRequest {
    ModelRequest {
        system: system_for(
            ctx,
            "Explique o conceito usando o método socrático:\n\
             1. Comece com uma breve introdução ao conceito.\n\
             2. Faça perguntas que guiem o estudante a descobrir o conhecimento por si mesmo.\n\
             3. Use exemplos da realidade brasileira relevantes para a FUVEST.\n\
             4. Desenvolva o raciocínio passo a passo.\n\
             5. Conclua conectando o conceito a aplicações práticas.\n\
             O objetivo é estimular o pensamento crítico, não entregar respostas prontas.",
        ),
        user: user_message(ctx, &format!("Conceito a ser explicado: {}", concept)),
        shape: ResponseShape::Text,
    }
}

/// Multiple-choice exam as JSON.
pub fn exam_prompt(topic: &str, questions: usize, ctx: &PromptContext<'_>) -> ModelRequest {
    let task = format!(
        "Crie {n} questões de múltipla escolha sobre o tema: {topic}\n\n\
         Requisitos:\n\
         1. Cada questão testa compreensão, não apenas memorização.\n\
         2. Cada questão tem 5 alternativas e exatamente uma correta.\n\
         3. As alternativas incorretas são plausíveis.\n\
         4. Inclua a explicação de por que a alternativa correta é correta.\n\n\
         Responda somente com JSON neste formato:\n\
         ```json\n\
         {{\n  \"questions\": [\n    {{\n      \"text\": \"Texto da pergunta\",\n      \
         \"options\": [\"A\", \"B\", \"C\", \"D\", \"E\"],\n      \"correct_answer\": \"a\",\n      \
         \"explanation\": \"Explicação\"\n    }}\n  ]\n}}\n\
         ```",
        n = questions,
        topic = topic
    );
    ModelRequest {
        system: system_for(
            ctx,
            "Você elabora questões no estilo da FUVEST com base nos materiais de estudo.",
        ),
        user: user_message(ctx, &task),
        shape: ResponseShape::ExamJson { questions },
    }
}

/// Follow-up after an exam response failed validation.
pub fn corrective_prompt(original: &ModelRequest, raw: &str, problem: &str) -> ModelRequest {
    let n = match original.shape {
        ResponseShape::ExamJson { questions } => questions,
        ResponseShape::Text => 1,
    };
    ModelRequest {
        system: original.system.clone(),
        user: format!(
            "{}\n\nSua resposta anterior foi:\n{}\n\nEla não pôde ser usada: {}.\n\
             Responda novamente com apenas um objeto JSON válido contendo \"questions\" \
             com {} questões, cada uma com \"text\", de 2 a 5 \"options\", \
             \"correct_answer\" (letra de a até e) e \"explanation\".",
            original.user,
            truncate(raw, MAX_PASSAGE_BYTES),
            problem,
            n
        ),
        shape: original.shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandKind;

    fn hit(id: &str, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: id.to_string(),
            document_id: "d".to_string(),
            position: 0,
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_question_prompt_includes_passages_and_history() {
        let hits = vec![hit("d-0000", "Fotossíntese é o processo...")];
        let history = vec![
            Turn::user(CommandKind::Question, "o que é célula?", "Unidade da vida.".to_string(), vec![]),
            Turn::failure(CommandKind::Question, "falhou", "model unavailable".to_string(), vec![]),
        ];
        let ctx = PromptContext {
            passages: &hits,
            history: &history,
            user_level: "ensino médio",
        };
        let req = question_prompt("O que é fotossíntese?", &ctx);
        assert_eq!(req.shape, ResponseShape::Text);
        assert!(req.user.contains("Fotossíntese é o processo"));
        assert!(req.user.contains("o que é célula?"));
        assert!(!req.user.contains("falhou"));
        assert!(req.user.ends_with("Pergunta: O que é fotossíntese?"));
        assert!(req.system.contains("ensino médio"));
    }

    #[test]
    fn test_empty_passages_are_flagged() {
        let ctx = PromptContext {
            passages: &[],
            history: &[],
            user_level: "ensino médio",
        };
        let req = explain_prompt("entropia", &ctx);
        assert!(req.user.contains("nenhum trecho relevante"));
        assert!(req.system.contains("socrático"));
    }

    #[test]
    fn test_exam_prompt_shape() {
        let ctx = PromptContext {
            passages: &[],
            history: &[],
            user_level: "ensino médio",
        };
        let req = exam_prompt("biologia", 3, &ctx);
        assert_eq!(req.shape, ResponseShape::ExamJson { questions: 3 });
        assert!(req.user.contains("Crie 3 questões"));
        assert!(req.user.contains("\"correct_answer\""));

        let retry = corrective_prompt(&req, "não sei", "no JSON object found");
        assert_eq!(retry.shape, req.shape);
        assert!(retry.user.contains("no JSON object found"));
    }

    #[test]
    fn test_long_passages_truncated_on_char_boundary() {
        let long = "ç".repeat(MAX_PASSAGE_BYTES);
        let out = truncate(&long, MAX_PASSAGE_BYTES);
        assert!(out.len() <= MAX_PASSAGE_BYTES + '…'.len_utf8());
        assert!(out.ends_with('…'));
    }
}
