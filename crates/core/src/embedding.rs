use serde::{Deserialize, Serialize};

/// Token hash behind the bucket choice. Part of the embedding identity: an
/// index is only comparable with vectors bucketed the same way.
pub const HASH_ALGORITHM: &str = "blake3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 256,
            seed: 1337,
        }
    }
}

/// Bag-of-tokens embedder: every lowercased token bumps one bucket, then the
/// vector is L2-normalized. Deterministic for a given config, so an index
/// built with it can be queried offline.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> HashEmbedderConfig {
        self.config
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in tokens(text) {
            let bucket = self.bucket_for(&token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    // blake3(seed_le || token); the first 8 digest bytes, little-endian,
    // modulo the dimension count. Stable across builds and platforms.
    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.seed.to_le_bytes());
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.config.dimensions.max(1) as u64) as usize
    }
}

// Splits on everything except alphanumerics and inner dots ("2.5mg").
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '.')
        .map(|token| token.trim_matches('.'))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let a = embedder.embed_text("Amoxicillin 500mg | take twice daily");
        let b = embedder.embed_text("Amoxicillin 500mg | take twice daily");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn buckets_are_pinned_across_builds() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert_eq!(embedder.bucket_for("amoxicillin"), 100);
        assert_eq!(embedder.bucket_for("500mg"), 150);

        let vector = embedder.embed_text("Amoxicillin");
        assert_eq!(vector[100], 1.0);
        assert_eq!(vector.iter().filter(|v| **v != 0.0).count(), 1);

        let small = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        assert_eq!(small.bucket_for("amoxicillin"), 7);
        assert_eq!(small.bucket_for("500mg"), 0);
    }

    #[test]
    fn similar_text_scores_higher() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let query = embedder.embed_text("amoxicillin 500mg twice daily");
        let near = embedder.embed_text("Amoxicillin 500mg twice daily for 7 days");
        let far = embedder.embed_text("nitrofurantoin 100mg at night");
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 1,
        });
        let vector = embedder.embed_text("  | ");
        assert_eq!(vector, vec![0.0; 8]);
        assert_eq!(cosine_similarity(&vector, &vector), 0.0);
    }
}
