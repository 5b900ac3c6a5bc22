use anyhow::Result;
use async_trait::async_trait;

use crate::providers::embedding::EmbeddingProvider;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "am", "be", "to", "of", "in", "on", "for", "my", "me", "i",
    "you", "your", "it", "its", "this", "that", "please", "can", "could", "would", "do", "does",
    "what", "s",
];

/// Offline embedding: hashed word and character-trigram features, L2 normalized.
/// Deterministic across processes and platforms.
#[derive(Debug, Clone)]
pub struct LexicalEmbeddingProvider {
    dimensions: usize,
    trigram_weight: f32,
}

impl Default for LexicalEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

impl LexicalEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(16),
            trigram_weight: 0.5,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect()
    }

    fn bucket(&self, feature: &str) -> usize {
        (fnv1a(feature.as_bytes()) % self.dimensions as u64) as usize
    }

    pub fn vectorize(&self, text: &str) -> Result<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            anyhow::bail!("cannot embed empty text");
        }

        let mut tokens = Self::tokens(trimmed);
        if tokens.is_empty() {
            tokens.push(trimmed.to_lowercase());
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            vector[self.bucket(&format!("w:{}", token))] += 1.0;

            let padded: Vec<char> = format!("^{}$", token).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&format!("t:{}", trigram))] += self.trigram_weight;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for LexicalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vectorize(text)
    }

    fn name(&self) -> &str {
        "lexical"
    }
}
