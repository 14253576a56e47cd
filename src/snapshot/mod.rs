//! Snapshot engine — stable, normalized captures of a live page.
//!
//! One engine instance serves one page and serializes its CDP traffic: the
//! stability waiter, the three capture calls (DOM arena, AX tree, layout),
//! and the hash computation all run on a single task.

pub mod build;
pub mod hash;

use chrono::Utc;
use serde::Deserialize;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::browser::{scripts, PageSurface};
use crate::core::config::PinpointConfig;
use crate::core::errors::SnapshotError;
use crate::core::types::{Snapshot, Viewport};

use build::SnapshotInputs;

/// How often the stability waiter samples the page.
const PROBE_INTERVAL_MS: u64 = 100;
/// Cumulative layout shift below this many pixels counts as "no shift".
const SHIFT_TOLERANCE_PX: f64 = 1.0;

#[derive(Debug, Deserialize)]
struct StabilityProbe {
    nodes: u64,
    #[serde(rename = "pendingNet")]
    pending_net: u64,
    #[serde(rename = "layoutShiftPx")]
    layout_shift_px: f64,
    instrumented: bool,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ViewportProbe {
    width: u32,
    height: u32,
}

pub struct SnapshotEngine {
    stable_window_ms: u64,
    capture_timeout_ms: u64,
}

impl SnapshotEngine {
    pub fn from_config(cfg: &PinpointConfig) -> Self {
        Self {
            stable_window_ms: cfg.stable_window_ms,
            capture_timeout_ms: cfg.capture_timeout_ms,
        }
    }

    /// Capture a normalized snapshot, blocking until the DOM has been stable
    /// for the configured window or the capture budget runs out. On budget
    /// exhaustion the best-effort snapshot is returned with `partial = true`.
    pub async fn capture(&self, page: &dyn PageSurface) -> Result<Snapshot, SnapshotError> {
        let deadline = Instant::now() + Duration::from_millis(self.capture_timeout_ms);
        let stable = self.wait_for_stability(page, deadline).await?;
        if !stable {
            warn!(
                budget_ms = self.capture_timeout_ms,
                "stability window not reached — capturing best-effort snapshot"
            );
        }

        let viewport = self.probe_viewport(page).await;
        let top_url = page.current_url().await?;

        let arena = page.document_tree().await?;
        let ax = match page.ax_tree().await {
            Ok(ax) => ax,
            // A page without an AX tree (blank, mid-navigation) still yields a
            // usable DOM snapshot; roles fall back to attributes.
            Err(SnapshotError::Protocol(msg)) => {
                debug!("AX tree unavailable ({}), continuing without it", msg);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let layout = page.layout_info().await?;

        let inputs = SnapshotInputs { arena, ax, layout, top_url };
        let frames = build::build_frames(&inputs);
        if frames.is_empty() {
            return Err(SnapshotError::Protocol("document tree had no root".into()));
        }

        let snapshot = Snapshot {
            snapshot_id: hash::snapshot_id(&frames),
            captured_at: Utc::now(),
            viewport,
            frames,
            partial: !stable,
        };
        debug!(
            snapshot_id = %snapshot.snapshot_id,
            frames = snapshot.frames.len(),
            nodes = snapshot.node_count(),
            partial = snapshot.partial,
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// True when the page settled; false when the deadline passed first.
    ///
    /// Settled means: node count unchanged, zero in-flight fetch/XHR, and
    /// cumulative layout shift under 1 px, across one full stability window.
    /// Pages navigated before instrumentation was installed degrade to the
    /// node-count rule alone.
    async fn wait_for_stability(
        &self,
        page: &dyn PageSurface,
        deadline: Instant,
    ) -> Result<bool, SnapshotError> {
        let window = Duration::from_millis(self.stable_window_ms);
        let mut last_nodes: Option<u64> = None;
        let mut window_start = Instant::now();
        let mut shift_in_window = 0.0_f64;

        loop {
            if Instant::now() >= deadline {
                return Ok(false);
            }

            let value = page.eval_json(scripts::STABILITY_PROBE).await?;
            let probe: StabilityProbe = serde_json::from_value(value)
                .map_err(|e| SnapshotError::Protocol(format!("bad stability probe: {}", e)))?;

            let nodes_changed = last_nodes.map(|n| n != probe.nodes).unwrap_or(true);
            let net_busy = probe.instrumented && probe.pending_net > 0;
            shift_in_window += if probe.instrumented { probe.layout_shift_px } else { 0.0 };

            if nodes_changed || net_busy || shift_in_window >= SHIFT_TOLERANCE_PX {
                last_nodes = Some(probe.nodes);
                window_start = Instant::now();
                shift_in_window = 0.0;
            } else if window_start.elapsed() >= window {
                debug!(nodes = probe.nodes, url = %probe.url, "page stable");
                return Ok(true);
            }

            sleep(Duration::from_millis(PROBE_INTERVAL_MS)).await;
        }
    }

    async fn probe_viewport(&self, page: &dyn PageSurface) -> Viewport {
        match page.eval_json(scripts::VIEWPORT_PROBE).await {
            Ok(value) => serde_json::from_value::<ViewportProbe>(value)
                .map(|v| Viewport { width: v.width, height: v.height })
                .unwrap_or(Viewport { width: 0, height: 0 }),
            Err(_) => Viewport { width: 0, height: 0 },
        }
    }
}
