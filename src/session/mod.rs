//! Per-page session manager.
//!
//! Owns the snapshot cache for one browser page and decides when to reindex.
//! Three triggers, any one fires a fresh capture:
//! * a route event (`pushState`/`replaceState`/`popstate`/`hashchange`)
//!   observed since the last snapshot;
//! * the rolling DOM hash differing from the one recorded at capture time;
//! * top-document node count drifting ≥ `reindex_delta_pct` from baseline.
//!
//! The stricter-of-the-two policy is deliberate: a hash change reindexes even
//! below the node-count threshold, and vice versa.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::browser::{scripts, PageSurface};
use crate::core::config::PinpointConfig;
use crate::core::errors::SnapshotError;
use crate::core::types::Snapshot;
use crate::snapshot::SnapshotEngine;

#[derive(Debug, Deserialize)]
struct RouteDrain {
    instrumented: bool,
    #[serde(default)]
    events: Vec<RouteEvent>,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RouteEvent {
    kind: String,
    url: String,
    #[allow(dead_code)]
    seq: u64,
}

#[derive(Debug, Deserialize)]
struct RollingProbe {
    hash: String,
    nodes: u64,
    #[allow(dead_code)]
    url: String,
}

/// Why (or why not) a reindex happened on this poll.
#[derive(Debug, Clone, Default)]
pub struct ReindexDecision {
    pub route_changed: bool,
    pub hash_changed: bool,
    pub node_delta: f32,
    pub reindex: bool,
}

/// Baseline taken right after each capture, compared on every poll.
#[derive(Debug, Clone)]
struct Baseline {
    rolling_hash: String,
    nodes: u64,
    url: String,
}

pub struct SessionManager {
    engine: SnapshotEngine,
    snapshots: VecDeque<Arc<Snapshot>>,
    baseline: Option<Baseline>,
    snap_keep: usize,
    reindex_delta_pct: f32,
}

impl SessionManager {
    pub fn new(cfg: &PinpointConfig) -> Self {
        Self {
            engine: SnapshotEngine::from_config(cfg),
            snapshots: VecDeque::new(),
            baseline: None,
            snap_keep: cfg.snap_keep.max(1),
            reindex_delta_pct: cfg.reindex_delta_pct,
        }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.back().cloned()
    }

    /// Recent snapshots, oldest first, for delta diffing.
    pub fn history(&self) -> impl Iterator<Item = &Arc<Snapshot>> {
        self.snapshots.iter()
    }

    /// Evaluate the reindex triggers without capturing.
    pub async fn poll(&mut self, page: &dyn PageSurface) -> Result<ReindexDecision, SnapshotError> {
        let Some(baseline) = self.baseline.clone() else {
            // Nothing captured yet — everything is stale by definition.
            return Ok(ReindexDecision { reindex: true, ..Default::default() });
        };

        let mut decision = ReindexDecision::default();

        let drained = page.eval_json(scripts::DRAIN_ROUTE_EVENTS).await?;
        let drained: RouteDrain = serde_json::from_value(drained)
            .map_err(|e| SnapshotError::Protocol(format!("bad route drain: {}", e)))?;
        for event in &drained.events {
            debug!(kind = %event.kind, url = %event.url, "route event");
        }
        // Hard navigations reset the instrumentation; a changed URL is the
        // only trace they leave, so it counts as a route event either way.
        decision.route_changed = !drained.events.is_empty() || drained.url != baseline.url;

        let probe = page.eval_json(scripts::ROLLING_HASH).await?;
        let probe: RollingProbe = serde_json::from_value(probe)
            .map_err(|e| SnapshotError::Protocol(format!("bad rolling hash: {}", e)))?;
        decision.hash_changed = probe.hash != baseline.rolling_hash;
        decision.node_delta = if baseline.nodes == 0 {
            if probe.nodes == 0 { 0.0 } else { 1.0 }
        } else {
            (probe.nodes as f32 - baseline.nodes as f32).abs() / baseline.nodes as f32
        };

        decision.reindex = decision.route_changed
            || decision.hash_changed
            || decision.node_delta >= self.reindex_delta_pct;
        Ok(decision)
    }

    /// Return the current snapshot, capturing a fresh one first when any
    /// reindex trigger fired (or when none exists yet).
    pub async fn ensure_snapshot(
        &mut self,
        page: &dyn PageSurface,
    ) -> Result<(Arc<Snapshot>, ReindexDecision), SnapshotError> {
        let decision = self.poll(page).await?;
        if decision.reindex || self.snapshots.is_empty() {
            let snapshot = self.capture(page).await?;
            return Ok((snapshot, decision));
        }
        Ok((self.current().expect("non-empty snapshot ring"), decision))
    }

    /// Unconditional fresh capture; used by self-heal's re-snapshot step.
    pub async fn capture(&mut self, page: &dyn PageSurface) -> Result<Arc<Snapshot>, SnapshotError> {
        let snapshot = Arc::new(self.engine.capture(page).await?);
        self.record_baseline(page).await;
        self.snapshots.push_back(Arc::clone(&snapshot));
        while self.snapshots.len() > self.snap_keep {
            self.snapshots.pop_front();
        }
        info!(
            snapshot_id = %snapshot.snapshot_id,
            nodes = snapshot.node_count(),
            kept = self.snapshots.len(),
            "session reindexed"
        );
        Ok(snapshot)
    }

    async fn record_baseline(&mut self, page: &dyn PageSurface) {
        let baseline = async {
            let probe = page.eval_json(scripts::ROLLING_HASH).await.ok()?;
            let probe: RollingProbe = serde_json::from_value(probe).ok()?;
            // Clear any route events queued before this capture.
            let drained = page.eval_json(scripts::DRAIN_ROUTE_EVENTS).await.ok()?;
            let drained: RouteDrain = serde_json::from_value(drained).ok()?;
            Some(Baseline { rolling_hash: probe.hash, nodes: probe.nodes, url: drained.url })
        }
        .await;
        self.baseline = baseline;
    }
}
