//! Element and query embedding.
//!
//! The embedder is a pure function of the element's content hash: same hash,
//! same vector, across processes. Inference runs through Model2Vec when the
//! weights are present; otherwise every lookup takes the deterministic
//! fallback path — a sha256-seeded sign-stable expansion that loses semantics
//! but preserves uniqueness, so ranking degrades instead of failing.

pub mod cache;
pub mod vector_store;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use model2vec_rs::model::StaticModel;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::core::errors::PinpointError;

pub const DEFAULT_MODEL: &str = "minishlab/potion-base-8M";

pub struct Embedder {
    model: Option<Arc<StaticModel>>,
    dim: usize,
}

impl Embedder {
    /// Load the embedding model once per process.
    ///
    /// Resolution: `MODEL2VEC_MODEL` env var → `DEFAULT_MODEL`; a matching
    /// directory under `models_dir` is preferred over a hub fetch. With
    /// `strict` unset, any load failure degrades to the fallback embedder;
    /// with `strict` set it surfaces as `EmbedderUnavailable`.
    pub async fn init(models_dir: &Path, fallback_dim: usize, strict: bool) -> Result<Self, PinpointError> {
        let model_id =
            std::env::var("MODEL2VEC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let local = models_dir.join(model_id.replace('/', "_"));
        let source = if local.is_dir() { local.to_string_lossy().to_string() } else { model_id.clone() };

        let loaded = tokio::task::spawn_blocking(move || -> Result<(StaticModel, usize)> {
            let model = StaticModel::from_pretrained(&source, None, None, None)
                .with_context(|| format!("failed to load Model2Vec model from '{}'", source))?;
            let probe = model.encode_single("dimension probe");
            Ok((model, probe.len()))
        })
        .await
        .map_err(|e| PinpointError::EmbedderUnavailable(format!("model init task failed: {e}")))?;

        match loaded {
            Ok((model, dim)) => {
                info!(model = %model_id, dim, "embedding model loaded");
                Ok(Self { model: Some(Arc::new(model)), dim })
            }
            Err(e) if strict => Err(PinpointError::EmbedderUnavailable(e.to_string())),
            Err(e) => {
                warn!(
                    "embedding model unavailable ({}); using deterministic fallback vectors",
                    e
                );
                Ok(Self { model: None, dim: fallback_dim })
            }
        }
    }

    /// Fallback-only embedder, used directly in tests and when weights are
    /// knowingly absent.
    pub fn fallback_only(dim: usize) -> Self {
        Self { model: None, dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// True when semantic vectors are unavailable and results should carry
    /// the `degraded` flag.
    pub fn is_degraded(&self) -> bool {
        self.model.is_none()
    }

    /// Embed one element's content text. `seed` is the content hash; it keys
    /// the fallback so distinct contents stay distinguishable. Returns the
    /// vector plus whether the fallback path was taken.
    pub async fn embed_content(&self, seed: &str, text: &str) -> (Vec<f32>, bool) {
        match &self.model {
            Some(model) => {
                let model = Arc::clone(model);
                let text = text.to_string();
                match tokio::task::spawn_blocking(move || model.encode_single(&text)).await {
                    Ok(mut v) => {
                        l2_normalize(&mut v);
                        (v, false)
                    }
                    Err(e) => {
                        // One element's failure never fails the snapshot.
                        warn!("embedding task failed ({}); assigning fallback vector", e);
                        (fallback_vector(seed, self.dim), true)
                    }
                }
            }
            None => (fallback_vector(seed, self.dim), true),
        }
    }

    /// Embed the user's query phrase. The fallback seeds from the normalized
    /// phrase itself so repeated queries stay deterministic.
    pub async fn embed_query(&self, phrase: &str) -> (Vec<f32>, bool) {
        let qe = self.query_embedding(phrase).await;
        (qe.vector, qe.degraded)
    }

    /// Full query embedding with its normalization form attached.
    pub async fn query_embedding(&self, phrase: &str) -> QueryEmbedding {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let (vector, degraded) =
            self.embed_content(&format!("query:{}", normalized), &normalized).await;
        QueryEmbedding { query: phrase.to_string(), normalized, vector, degraded }
    }
}

/// A query vector paired with the exact normalization it was computed from,
/// so promotion keys and ranking always agree on the phrase form.
#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    pub query: String,
    pub normalized: String,
    pub vector: Vec<f32>,
    pub degraded: bool,
}

/// Deterministic, collision-resistant mapping from a seed string to a
/// unit-norm vector: counter-mode sha256 expanded to little-endian u32 lanes,
/// remapped to [-1, 1].
pub fn fallback_vector(seed: &str, dim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dim);
    let mut counter: u64 = 0;
    while out.len() < dim {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();
        for lane in block.chunks_exact(4) {
            if out.len() >= dim {
                break;
            }
            let raw = u32::from_le_bytes([lane[0], lane[1], lane[2], lane[3]]);
            out.push((raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
        }
        counter += 1;
    }
    l2_normalize(&mut out);
    out
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two equal-length vectors. Unnormalized inputs are
/// handled; mismatched lengths score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic_and_unit_norm() {
        let a = fallback_vector("abc123", 768);
        let b = fallback_vector("abc123", 768);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }

    #[test]
    fn fallback_distinguishes_distinct_seeds() {
        let a = fallback_vector("hash-one", 256);
        let b = fallback_vector("hash-two", 256);
        assert!(cosine(&a, &b).abs() < 0.25, "distinct seeds should be near-orthogonal");
    }

    #[test]
    fn cosine_bounds_and_identity() {
        let a = fallback_vector("x", 64);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
        assert_eq!(cosine(&a, &[]), 0.0);
    }

    #[tokio::test]
    async fn query_embedding_normalizes_whitespace_and_case() {
        let embedder = Embedder::fallback_only(64);
        let a = embedder.query_embedding("  Add   Phone ").await;
        let b = embedder.query_embedding("add phone").await;
        assert_eq!(a.normalized, "add phone");
        assert_eq!(a.vector, b.vector, "equivalent phrases share a vector");
    }

    #[tokio::test]
    async fn degraded_embedder_tags_results() {
        let embedder = Embedder::fallback_only(128);
        assert!(embedder.is_degraded());
        let (v, degraded) = embedder.embed_content("seed", "button Save").await;
        assert!(degraded);
        assert_eq!(v.len(), 128);
        // Same content hash, same vector — invariant 1.
        let (v2, _) = embedder.embed_content("seed", "button Save").await;
        assert_eq!(v, v2);
    }
}
