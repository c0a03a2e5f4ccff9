//! Vector math and the offline hash embedder.
//!
//! [`EmbeddingProvider`] carries the metadata every embedding backend
//! exposes. Network backends (OpenAI, Ollama) and fastembed live in the
//! `flipflops` app crate; [`HashEmbedder`] lives here because it is pure
//! computation and lets the whole pipeline run without a network.

use crate::topics::fold_accents;

/// Metadata shared by all embedding backends.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded alongside the index (e.g. `"hash-256"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality. Every vector in one index has this length.
    fn dims(&self) -> usize;
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Feature-hashing embedder.
///
/// Each text is accent-folded and lowercased, then split into words.
/// Words of three or more characters and their character trigrams are
/// hashed (FNV-1a) into `dims` buckets; whole words weigh twice as much
/// as trigrams. The result is L2-normalized.
///
/// Deterministic across runs and platforms, so an index built with it
/// never needs re-embedding unless `dims` changes.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            name: format!("hash-{}", dims),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let folded = fold_accents(text).to_lowercase();
        for word in folded
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3)
        {
            self.bump(&mut v, word.as_bytes(), 2.0);
            let chars: Vec<char> = word.chars().collect();
            for tri in chars.windows(3) {
                let gram: String = tri.iter().collect();
                self.bump(&mut v, gram.as_bytes(), 1.0);
            }
        }
        l2_normalize(&mut v);
        v
    }

    fn bump(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dims as u64) as usize;
        // Top bit picks the sign so collisions partially cancel.
        if h >> 63 == 0 {
            v[bucket] += weight;
        } else {
            v[bucket] -= weight;
        }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let e = HashEmbedder::new(64);
        assert_eq!(e.embed("fotossíntese"), e.embed("fotossíntese"));
        assert_eq!(e.embed("x").len(), 64);
        assert_eq!(e.model_name(), "hash-64");
    }

    #[test]
    fn test_hash_embedder_accent_insensitive() {
        let e = HashEmbedder::new(256);
        let sim = cosine_similarity(&e.embed("Fotossíntese"), &e.embed("fotossintese"));
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_ranks_related_text_higher() {
        let e = HashEmbedder::new(256);
        let query = e.embed("o que é fotossíntese?");
        let related = e.embed("A fotossíntese converte luz em energia química nas plantas.");
        let unrelated = e.embed("A Revolução Francesa começou em 1789.");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_hash_embedder_empty_text_is_zero_vector() {
        let e = HashEmbedder::new(16);
        assert!(e.embed("").iter().all(|x| *x == 0.0));
    }
}
