use std::path::PathBuf;

use serde::Deserialize;

use crate::core::types::Mode;

// ---------------------------------------------------------------------------
// PinpointConfig — file-based config loader (pinpoint.json) with env-var
// fallback for every field. Missing file → defaults; parse error → warn +
// defaults. The knob set here is closed: there are no other tunables.
// ---------------------------------------------------------------------------

/// Fusion weights. Semantic dominance is a hard invariant: `alpha ≥
/// max(beta, gamma)`; out-of-range values are clamped at load time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankWeights {
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self { alpha: 1.0, beta: 0.5, gamma: 0.2 }
    }
}

impl RankWeights {
    /// Enforce semantic dominance by raising `alpha` when needed.
    pub fn normalized(mut self) -> Self {
        let floor = self.beta.max(self.gamma);
        if self.alpha < floor {
            tracing::warn!(
                alpha = self.alpha,
                floor,
                "alpha below max(beta, gamma) — raising to keep semantic dominance"
            );
            self.alpha = floor;
        }
        self
    }
}

/// Raw shape of `pinpoint.json`. All fields optional; `PinpointConfig::load`
/// resolves each one against its `PINPOINT_*` env var and default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub models_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub strict: Option<bool>,
    pub capture_timeout_ms: Option<u64>,
    pub stable_window_ms: Option<u64>,
    pub mem_cap: Option<u64>,
    pub disk_cap: Option<u64>,
    pub max_retries: Option<u32>,
    pub alpha: Option<f32>,
    pub beta: Option<f32>,
    pub gamma: Option<f32>,
    pub reindex_delta_pct: Option<f32>,
    pub mode: Option<String>,
    /// Closed product/entity vocabulary for the wrong-entity down-rank.
    /// This is data, not code — extend it per deployment.
    pub product_vocabulary: Option<Vec<String>>,
}

/// Resolved engine configuration. One instance lives in `CoreContext`.
#[derive(Debug, Clone)]
pub struct PinpointConfig {
    pub models_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub strict: bool,
    pub capture_timeout_ms: u64,
    pub stable_window_ms: u64,
    pub mem_cap: u64,
    pub disk_cap: u64,
    pub max_retries: u32,
    pub weights: RankWeights,
    pub reindex_delta_pct: f32,
    pub mode: Mode,
    pub product_vocabulary: Vec<String>,

    // Fixed per-stage budgets and internals (not env knobs).
    pub embed_batch_timeout_ms: u64,
    pub verify_timeout_ms: u64,
    pub act_timeout_ms: u64,
    pub embed_workers: usize,
    pub elem_dim: usize,
    pub conf_min: f32,
    pub snap_keep: usize,
    pub promotion_ttl_days: i64,
}

impl Default for PinpointConfig {
    fn default() -> Self {
        Self {
            models_dir: default_subdir("models"),
            cache_dir: default_subdir("cache"),
            strict: false,
            capture_timeout_ms: 30_000,
            stable_window_ms: 500,
            mem_cap: 10_000,
            disk_cap: 100_000,
            max_retries: 5,
            weights: RankWeights::default(),
            reindex_delta_pct: 0.30,
            mode: Mode::Semantic,
            product_vocabulary: default_product_vocabulary(),
            embed_batch_timeout_ms: 5_000,
            verify_timeout_ms: 2_000,
            act_timeout_ms: 10_000,
            embed_workers: 4,
            elem_dim: 768,
            conf_min: 0.3,
            snap_keep: 10,
            promotion_ttl_days: 180,
        }
    }
}

fn default_subdir(leaf: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pinpoint")
        .join(leaf)
}

/// Seed vocabulary for the wrong-entity rule. Deployments with their own
/// product taxonomy replace this list wholesale via config.
fn default_product_vocabulary() -> Vec<String> {
    [
        "phone", "laptop", "tablet", "watch", "camera", "headphones", "monitor",
        "keyboard", "mouse", "printer", "speaker", "charger",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Load `pinpoint.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `PINPOINT_CONFIG` env var path
/// 2. `./pinpoint.json`
/// 3. `../pinpoint.json`
///
/// Missing file → `ConfigFile::default()` (silent). Parse error → warn and
/// fall back to defaults rather than refusing to start.
pub fn load_config_file() -> ConfigFile {
    let mut candidates = vec![PathBuf::from("pinpoint.json"), PathBuf::from("../pinpoint.json")];
    if let Some(env_path) = env_str("PINPOINT_CONFIG") {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ConfigFile>(&contents) {
                Ok(cfg) => {
                    tracing::info!("pinpoint.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "pinpoint.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return ConfigFile::default();
                }
            },
            Err(_) => continue,
        }
    }

    ConfigFile::default()
}

impl PinpointConfig {
    /// Resolve the full configuration: file field → `PINPOINT_*` env var →
    /// built-in default, per field.
    pub fn load() -> Self {
        Self::from_file(load_config_file())
    }

    pub fn from_file(file: ConfigFile) -> Self {
        let mut cfg = Self::default();

        if let Some(dir) = file.models_dir.or_else(|| env_str("PINPOINT_MODELS_DIR")) {
            cfg.models_dir = PathBuf::from(dir);
        }
        if let Some(dir) = file.cache_dir.or_else(|| env_str("PINPOINT_CACHE_DIR")) {
            cfg.cache_dir = PathBuf::from(dir);
        }
        if let Some(strict) = file.strict.or_else(|| env_bool("PINPOINT_STRICT")) {
            cfg.strict = strict;
        }
        if let Some(ms) = file.capture_timeout_ms.or_else(|| env_parse("PINPOINT_CAPTURE_TIMEOUT_MS")) {
            cfg.capture_timeout_ms = ms;
        }
        if let Some(ms) = file.stable_window_ms.or_else(|| env_parse("PINPOINT_STABLE_WINDOW_MS")) {
            cfg.stable_window_ms = ms;
        }
        if let Some(cap) = file.mem_cap.or_else(|| env_parse("PINPOINT_MEM_CAP")) {
            cfg.mem_cap = cap;
        }
        if let Some(cap) = file.disk_cap.or_else(|| env_parse("PINPOINT_DISK_CAP")) {
            cfg.disk_cap = cap;
        }
        if let Some(n) = file.max_retries.or_else(|| env_parse("PINPOINT_MAX_RETRIES")) {
            cfg.max_retries = n;
        }
        if let Some(pct) = file.reindex_delta_pct.or_else(|| env_parse("PINPOINT_REINDEX_DELTA_PCT")) {
            cfg.reindex_delta_pct = pct;
        }
        if let Some(mode) = file
            .mode
            .as_deref()
            .and_then(Mode::parse_str)
            .or_else(|| env_str("PINPOINT_MODE").as_deref().and_then(Mode::parse_str))
        {
            cfg.mode = mode;
        }
        if let Some(vocab) = file.product_vocabulary.filter(|v| !v.is_empty()) {
            cfg.product_vocabulary = vocab;
        }

        cfg.weights = RankWeights {
            alpha: file.alpha.or_else(|| env_parse("PINPOINT_ALPHA")).unwrap_or(cfg.weights.alpha),
            beta: file.beta.or_else(|| env_parse("PINPOINT_BETA")).unwrap_or(cfg.weights.beta),
            gamma: file.gamma.or_else(|| env_parse("PINPOINT_GAMMA")).unwrap_or(cfg.weights.gamma),
        }
        .normalized();

        cfg
    }

    pub fn promotion_db_path(&self) -> PathBuf {
        self.cache_dir.join("promotions.sqlite")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.cache_dir.join("vectors.sqlite")
    }
}
