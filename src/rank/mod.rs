//! Fusion ranking: semantic similarity, structural heuristics, and promotion
//! history combined under semantic dominance (α ≥ max(β, γ)).
//!
//! Ranking is pure — it sees a snapshot, precomputed vectors, and promotion
//! lookups, and never touches the browser. Scores are final once fused; no
//! re-capping happens downstream.

pub mod heuristics;
pub mod target_match;
pub mod vocab;

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::config::RankWeights;
use crate::core::types::{ActionKind, Mode, ScoreBreakdown, Snapshot};
use crate::embed::cosine;
use crate::locator::selector_matches_element;
use crate::snapshot::hash;

use vocab::ProductVocabulary;

/// Hard semantic down-rank applied when an element's container names a
/// different entity from the closed vocabulary than the query does.
const WRONG_ENTITY_PENALTY: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct RankedElement {
    pub frame_index: usize,
    pub element_index: usize,
    pub breakdown: ScoreBreakdown,
}

impl RankedElement {
    pub fn score(&self) -> f32 {
        self.breakdown.fused
    }
}

/// Everything one ranking pass needs.
pub struct RankContext<'a> {
    pub snapshot: &'a Snapshot,
    pub phrase: &'a str,
    pub action: Option<ActionKind>,
    /// Absent in pure no-semantic mode.
    pub query_vector: Option<&'a [f32]>,
    /// Content hash → element vector, from the embedding cache.
    pub vectors: &'a HashMap<String, Arc<Vec<f32>>>,
    /// Promoted `(selector, confidence)` pairs for this (origin, query).
    pub promotions: &'a [(String, f32)],
}

pub struct Ranker<'a> {
    pub weights: RankWeights,
    pub mode: Mode,
    pub vocab: &'a ProductVocabulary,
}

impl Ranker<'_> {
    /// Rank every element of the snapshot, best first. Ties break by frame
    /// and element order so equal inputs always produce equal output.
    pub fn rank(&self, ctx: &RankContext<'_>) -> Vec<RankedElement> {
        let query_tokens = heuristics::tokenize(ctx.phrase);
        let query_entity = self.vocab.first_token_in(ctx.phrase);

        let matcher_scores = match self.mode {
            Mode::Semantic => Vec::new(),
            Mode::NoSemantic | Mode::Hybrid => target_match::match_scores(ctx.snapshot, ctx.phrase),
        };

        // In no-semantic mode cosine is off (α=0) and the exact matcher fills
        // the semantic slot at unit weight.
        let alpha = match self.mode {
            Mode::NoSemantic => 1.0,
            _ => self.weights.alpha,
        };
        let (beta, gamma) = (self.weights.beta, self.weights.gamma);
        let denom = alpha + beta + gamma;

        let mut out: Vec<RankedElement> = Vec::new();
        for (flat, (frame_index, element_index, desc)) in ctx.snapshot.iter_elements().enumerate() {
            let cosine_part = match (self.mode, ctx.query_vector) {
                (Mode::NoSemantic, _) | (_, None) => 0.0,
                (_, Some(qv)) => {
                    let content = hash::content_hash(desc);
                    match ctx.vectors.get(&content) {
                        // Remap cosine from [-1, 1] to [0, 1].
                        Some(ev) => (cosine(qv, ev) + 1.0) / 2.0,
                        None => 0.0,
                    }
                }
            };
            let mut semantic = match self.mode {
                Mode::Semantic => cosine_part,
                Mode::NoSemantic => matcher_scores[flat],
                Mode::Hybrid => cosine_part.max(matcher_scores[flat]),
            };

            let mut entity_penalty = false;
            if let Some(wanted) = query_entity {
                let frame = &ctx.snapshot.frames[frame_index];
                let present = self.vocab.container_tokens(frame, element_index);
                if !present.is_empty()
                    && !present.contains(wanted)
                    && present.iter().any(|t| *t != wanted)
                {
                    semantic -= WRONG_ENTITY_PENALTY;
                    entity_penalty = true;
                }
            }

            let heuristic = heuristics::heuristic_score(desc, ctx.action, &query_tokens);

            let frame = &ctx.snapshot.frames[frame_index];
            let promotion = ctx
                .promotions
                .iter()
                .filter(|(selector, _)| selector_matches_element(selector, frame, element_index))
                .map(|(_, confidence)| *confidence)
                .fold(0.0_f32, f32::max);

            let fused = if denom > 0.0 {
                (alpha * semantic + beta * heuristic + gamma * promotion) / denom
            } else {
                semantic
            };

            out.push(RankedElement {
                frame_index,
                element_index,
                breakdown: ScoreBreakdown { semantic, heuristic, promotion, entity_penalty, fused },
            });
        }

        out.sort_by(|a, b| {
            b.breakdown
                .fused
                .partial_cmp(&a.breakdown.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    (a.frame_index, a.element_index).cmp(&(b.frame_index, b.element_index))
                })
        });
        out
    }
}
