//! Two-tier embedding cache with single-flight delta embedding.
//!
//! Tier 1 is an in-memory LRU (`moka`) shared by every page session in the
//! process; Tier 2 is the on-disk [`VectorStore`]. Both are keyed by element
//! content hash. For a snapshot where δ elements changed since the caches
//! last saw the page, exactly δ embedder calls are made: everything else is
//! served from a tier, and concurrent misses on the same hash collapse into
//! one computation via `moka`'s `get_with`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::config::PinpointConfig;
use crate::core::types::Snapshot;
use crate::snapshot::hash;

use super::vector_store::VectorStore;
use super::Embedder;

/// Outcome counters for one snapshot embedding pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedStats {
    pub total: usize,
    pub mem_hits: usize,
    pub disk_hits: usize,
    pub embedded: usize,
    /// Elements that received fallback vectors.
    pub degraded: usize,
}

impl EmbedStats {
    pub fn hit_ratio(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.mem_hits + self.disk_hits) as f32 / self.total as f32
    }
}

pub struct EmbeddingCache {
    mem: moka::future::Cache<String, Arc<Vec<f32>>>,
    disk: Option<Arc<VectorStore>>,
    embedder: Arc<Embedder>,
    workers: Arc<Semaphore>,
}

impl EmbeddingCache {
    pub fn new(cfg: &PinpointConfig, embedder: Arc<Embedder>, disk: Option<Arc<VectorStore>>) -> Self {
        Self {
            mem: moka::future::Cache::builder().max_capacity(cfg.mem_cap).build(),
            disk,
            embedder,
            workers: Arc::new(Semaphore::new(cfg.embed_workers.max(1))),
        }
    }

    /// Resolve a vector for every unique content hash in `snapshot`.
    ///
    /// Reads are lock-free (moka); misses take a worker permit, embed, and
    /// write through to disk. A second caller racing on the same hash waits
    /// on the first computation instead of repeating it.
    pub async fn vectors_for(
        &self,
        snapshot: &Snapshot,
    ) -> (HashMap<String, Arc<Vec<f32>>>, EmbedStats) {
        // Unique hashes with one representative text each (equal hash ⇒ equal
        // embedded content by construction).
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (_, _, desc) in snapshot.iter_elements() {
            let h = hash::content_hash(desc);
            if seen.insert(h.clone()) {
                pending.push((h, desc.embedding_text()));
            }
        }

        let total = pending.len();
        let disk_hits = Arc::new(AtomicUsize::new(0));
        let embedded = Arc::new(AtomicUsize::new(0));
        let degraded = Arc::new(AtomicUsize::new(0));
        let mut mem_hits = 0usize;

        let mut out: HashMap<String, Arc<Vec<f32>>> = HashMap::with_capacity(total);
        for (content_hash, text) in pending {
            if let Some(vec) = self.mem.get(&content_hash).await {
                mem_hits += 1;
                out.insert(content_hash, vec);
                continue;
            }

            let disk = self.disk.clone();
            let embedder = Arc::clone(&self.embedder);
            let workers = Arc::clone(&self.workers);
            let disk_hits = Arc::clone(&disk_hits);
            let embedded = Arc::clone(&embedded);
            let degraded = Arc::clone(&degraded);
            let key = content_hash.clone();

            let vec = self
                .mem
                .get_with(content_hash.clone(), async move {
                    // Tier 2 first.
                    if let Some(store) = &disk {
                        let store = Arc::clone(store);
                        let lookup_key = key.clone();
                        let found = tokio::task::spawn_blocking(move || store.get(&lookup_key))
                            .await
                            .ok()
                            .flatten();
                        if let Some(v) = found {
                            disk_hits.fetch_add(1, Ordering::Relaxed);
                            return Arc::new(v);
                        }
                    }

                    // Real miss: bounded embedding work, write-through to disk.
                    let _permit = workers.acquire().await;
                    let (v, fell_back) = embedder.embed_content(&key, &text).await;
                    embedded.fetch_add(1, Ordering::Relaxed);
                    if fell_back {
                        degraded.fetch_add(1, Ordering::Relaxed);
                    }
                    if let Some(store) = &disk {
                        let store = Arc::clone(store);
                        let write_key = key.clone();
                        let write_vec = v.clone();
                        let _ = tokio::task::spawn_blocking(move || store.put(&write_key, &write_vec)).await;
                    }
                    Arc::new(v)
                })
                .await;
            out.insert(content_hash, vec);
        }

        let stats = EmbedStats {
            total,
            mem_hits,
            disk_hits: disk_hits.load(Ordering::Relaxed),
            embedded: embedded.load(Ordering::Relaxed),
            degraded: degraded.load(Ordering::Relaxed),
        };
        debug!(
            total = stats.total,
            mem_hits = stats.mem_hits,
            disk_hits = stats.disk_hits,
            embedded = stats.embedded,
            "snapshot embedding pass"
        );
        (out, stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::core::types::{ElementDescriptor, FrameSnapshot, Viewport};

    fn snapshot_of(texts: &[&str]) -> Snapshot {
        let elements: Vec<ElementDescriptor> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ElementDescriptor {
                backend_node_id: i as i64,
                frame_path: vec![],
                tag: "button".into(),
                attributes: BTreeMap::new(),
                text: Some(t.to_string()),
                xpath_absolute: format!("/html[1]/body[1]/button[{}]", i + 1),
                depth: 2,
                in_shadow_dom: false,
                cross_origin: false,
                role: None,
                aria_label: None,
                placeholder: None,
                name: None,
                value: None,
                title: None,
                alt: None,
                input_type: None,
                visible: true,
                clickable: true,
                bounding_box: None,
            })
            .collect();
        let parent_index = vec![None; elements.len()];
        let frames = vec![FrameSnapshot {
            frame_id: "top".into(),
            url: "https://example.com".into(),
            dom_hash: hash::dom_hash(&elements),
            ax_hash: hash::ax_hash(&elements),
            elements,
            parent_index,
        }];
        Snapshot {
            snapshot_id: hash::snapshot_id(&frames),
            captured_at: Utc::now(),
            viewport: Viewport { width: 1280, height: 720 },
            frames,
            partial: false,
        }
    }

    fn test_cache() -> EmbeddingCache {
        let cfg = PinpointConfig::default();
        let embedder = Arc::new(Embedder::fallback_only(64));
        let disk = Some(Arc::new(VectorStore::open_in_memory(64, 1000).unwrap()));
        EmbeddingCache::new(&cfg, embedder, disk)
    }

    #[tokio::test]
    async fn first_pass_embeds_second_pass_hits_memory() {
        let cache = test_cache();
        let snap = snapshot_of(&["Save", "Cancel", "Delete"]);

        let (vectors, stats) = cache.vectors_for(&snap).await;
        assert_eq!(vectors.len(), 3);
        assert_eq!(stats.embedded, 3);
        assert_eq!(stats.mem_hits, 0);

        let (_, stats) = cache.vectors_for(&snap).await;
        assert_eq!(stats.embedded, 0);
        assert_eq!(stats.mem_hits, 3);
        assert!((stats.hit_ratio() - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn delta_only_embeds_changed_elements() {
        let cache = test_cache();
        let before = snapshot_of(&["Save", "Cancel", "Delete", "Archive", "Open", "Close", "Help", "Back", "Next", "Done"]);
        let (_, stats) = cache.vectors_for(&before).await;
        assert_eq!(stats.embedded, 10);

        // 10% churn: one button re-labelled.
        let after = snapshot_of(&["Save", "Cancel", "Delete", "Archive", "Open", "Close", "Help", "Back", "Next", "Submit"]);
        let (_, stats) = cache.vectors_for(&after).await;
        assert_eq!(stats.embedded, 1, "only the changed element embeds");
        assert!(stats.hit_ratio() >= 0.8);
    }

    #[tokio::test]
    async fn duplicate_contents_share_one_vector() {
        let cache = test_cache();
        let snap = snapshot_of(&["Add to Cart", "Add to Cart", "Add to Cart"]);
        let (vectors, stats) = cache.vectors_for(&snap).await;
        // Three identical buttons differ only by position → same content hash.
        assert_eq!(vectors.len(), 1);
        assert_eq!(stats.total, 1);
        assert_eq!(stats.embedded, 1);
    }

    #[tokio::test]
    async fn disk_tier_survives_memory_loss() {
        let cfg = PinpointConfig::default();
        let embedder = Arc::new(Embedder::fallback_only(64));
        let disk = Arc::new(VectorStore::open_in_memory(64, 1000).unwrap());

        let snap = snapshot_of(&["Save"]);
        let first = EmbeddingCache::new(&cfg, Arc::clone(&embedder), Some(Arc::clone(&disk)));
        let (_, stats) = first.vectors_for(&snap).await;
        assert_eq!(stats.embedded, 1);

        // Fresh memory tier, same disk tier — vectors come back from disk.
        let second = EmbeddingCache::new(&cfg, embedder, Some(disk));
        let (_, stats) = second.vectors_for(&snap).await;
        assert_eq!(stats.embedded, 0);
        assert_eq!(stats.disk_hits, 1);
    }
}
