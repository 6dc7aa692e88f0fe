use super::{EmbeddingBackend, EmbeddingError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic offline embedding backend.
///
/// Each text is split into lowercase alphanumeric words. Every word is hashed to one slot and
/// a sign (feature hashing), and the summed vector is L2-normalized. Texts sharing words land
/// near each other, which is enough for dry runs and local development without an embedding
/// service. A text with no words maps to the zero vector.
pub struct HashingBackend {
    dimension: usize,
}

impl HashingBackend {
    /// Construct a backend producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokens(text) {
            let (slot, sign) = self.feature(&token);
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }

    /// Slot index and sign for one token.
    fn feature(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let slot = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (slot, sign)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::NotConfigured(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(vector: &[f32]) -> f32 {
        vector.iter().map(|value| value * value).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn vectors_are_deterministic_and_normalized() {
        let backend = HashingBackend::new(16);
        let texts = vec!["Harbour news".to_string(), "Harbour news".to_string()];
        let vectors = backend.generate_embeddings(&texts).await.expect("vectors");

        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 16);
        assert!((norm(&vectors[0]) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn case_and_punctuation_do_not_change_the_vector() {
        let backend = HashingBackend::new(32);
        let texts = vec![
            "Harbour strike ends".to_string(),
            "harbour, STRIKE ends!".to_string(),
        ];
        let vectors = backend.generate_embeddings(&texts).await.expect("vectors");
        assert_eq!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn text_without_words_is_the_zero_vector() {
        let backend = HashingBackend::new(8);
        let vectors = backend
            .generate_embeddings(&["  -- ".to_string(), String::new()])
            .await
            .expect("vectors");
        assert!(vectors.iter().all(|vector| vector.iter().all(|value| *value == 0.0)));
    }

    #[tokio::test]
    async fn zero_dimension_is_rejected() {
        let backend = HashingBackend::new(0);
        let error = backend
            .generate_embeddings(&["text".to_string()])
            .await
            .expect_err("invalid dimension");
        assert!(matches!(error, EmbeddingError::NotConfigured(_)));
    }
}
