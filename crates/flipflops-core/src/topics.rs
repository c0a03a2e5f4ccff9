//! Topic labels, the topic catalog and keyword topic inference.
//!
//! Topics come from two places: ingestion (each document carries the
//! label of its top-level directory, or its title) and conversation
//! (subject keywords found in user messages). Labels that differ only in
//! case or accents are the same topic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Exam subjects recognised in free text.
const SUBJECT_KEYWORDS: &[&str] = &[
    "matemática", "física", "química", "biologia", "história", "geografia",
    "literatura", "gramática", "redação", "inglês", "filosofia", "sociologia",
    "álgebra", "geometria", "trigonometria", "estatística", "probabilidade",
    "cálculo", "mecânica", "eletromagnetismo", "termodinâmica", "óptica",
    "química orgânica", "química inorgânica", "bioquímica", "zoologia",
    "botânica", "ecologia", "genética", "fotossíntese", "idade média",
    "renascimento", "iluminismo", "revolução", "brasil colonial",
    "brasil império", "brasil república", "cartografia", "clima",
    "geopolítica", "romantismo", "realismo", "modernismo", "poesia", "conto",
    "romance", "sintaxe", "morfologia", "semântica",
];

/// Replace Portuguese accented letters with their base letter.
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Comparison key for a topic label: accent-folded, lowercased, with
/// whitespace, `-` and `_` runs collapsed to one space.
pub fn normalize_label(label: &str) -> String {
    fold_accents(label)
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Subject keywords mentioned in a message, in vocabulary order.
pub fn extract_topics(message: &str) -> Vec<String> {
    let words: String = message
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let haystack = format!(" {} ", normalize_label(&words));
    SUBJECT_KEYWORDS
        .iter()
        .filter(|kw| haystack.contains(&format!(" {} ", normalize_label(kw))))
        .map(|kw| kw.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicOrigin {
    Ingestion,
    Conversation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub label: String,
    pub origin: TopicOrigin,
    #[serde(default)]
    pub documents: BTreeSet<String>,
    #[serde(default)]
    pub chunk_ids: BTreeSet<String>,
}

/// Topics keyed by normalized label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicCatalog {
    topics: BTreeMap<String, Topic>,
}

impl TopicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add chunks to a topic, creating it if needed. A label that
    /// normalizes to an existing topic merges into it; the first label
    /// seen is kept for display, and ingestion origin wins.
    pub fn add<I>(&mut self, label: &str, origin: TopicOrigin, document_id: Option<&str>, chunk_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let key = normalize_label(label);
        if key.is_empty() {
            return;
        }
        let topic = self.topics.entry(key).or_insert_with(|| Topic {
            label: label.trim().to_string(),
            origin,
            documents: BTreeSet::new(),
            chunk_ids: BTreeSet::new(),
        });
        if origin == TopicOrigin::Ingestion {
            topic.origin = TopicOrigin::Ingestion;
        }
        if let Some(doc) = document_id {
            topic.documents.insert(doc.to_string());
        }
        topic.chunk_ids.extend(chunk_ids);
    }

    pub fn get(&self, label: &str) -> Option<&Topic> {
        self.topics.get(&normalize_label(label))
    }

    /// Display labels in normalized-label order.
    pub fn labels(&self) -> Vec<String> {
        self.topics.values().map(|t| t.label.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
