use thiserror::Error;

use super::types::ErrorInfo;

/// Pipeline stage names used in timeouts and tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Snapshot,
    Embed,
    Rank,
    Synthesize,
    Verify,
    Act,
    Heal,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Embed => "embed",
            Self::Rank => "rank",
            Self::Synthesize => "synthesize",
            Self::Verify => "verify",
            Self::Act => "act",
            Self::Heal => "heal",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by the snapshot engine and the CDP surface underneath it.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("browser session lost: {0}")]
    SessionLost(String),
    #[error("snapshot did not settle within {0} ms")]
    Timeout(u64),
    #[error("CDP protocol error: {0}")]
    Protocol(String),
}

/// The synthesizer produced no candidate at all.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("no selector could be synthesized for the target element")]
    Empty,
}

/// Top-level error taxonomy for the public `query` / `act` operations.
///
/// Recoverable variants are retried inside self-heal while retries remain;
/// everything else surfaces with full context. Never collapsed to a boolean.
#[derive(Debug, Error)]
pub enum PinpointError {
    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("{stage} stage exceeded its {budget_ms} ms budget")]
    Timeout { stage: Stage, budget_ms: u64 },

    #[error("snapshot returned before the page settled; results are best-effort")]
    SnapshotPartial,

    #[error("{count} elements matched every candidate above the confidence floor")]
    Ambiguous { count: usize, candidates: Vec<String> },

    #[error("no candidate met the confidence floor for '{phrase}'")]
    NotFound { phrase: String, attempted: Vec<String> },

    #[error("element went away between verification and action")]
    Stale,

    #[error("target element is covered by another element")]
    Occluded,

    #[error("target element is disabled")]
    Disabled,

    #[error("target element is outside the viewport")]
    OffScreen,

    #[error("durable store unreadable: {0}")]
    StoreCorrupt(String),

    #[error("embedding model unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("no selector could be synthesized for the target element")]
    EmptySynthesis,

    #[error("CDP protocol error: {0}")]
    Protocol(String),

    #[error("request cancelled (action dispatched: {dispatched})")]
    Cancelled { dispatched: bool },
}

impl PinpointError {
    /// Stable machine-readable kind for the wire `error{kind,message}` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionLost(_) => "session_lost",
            Self::Timeout { .. } => "timeout",
            Self::SnapshotPartial => "snapshot_partial",
            Self::Ambiguous { .. } => "ambiguous",
            Self::NotFound { .. } => "not_found",
            Self::Stale => "stale",
            Self::Occluded => "occluded",
            Self::Disabled => "disabled",
            Self::OffScreen => "off_screen",
            Self::StoreCorrupt(_) => "store_corrupt",
            Self::EmbedderUnavailable(_) => "embedder_unavailable",
            Self::EmptySynthesis => "synth_empty",
            Self::Protocol(_) => "protocol",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether self-heal is allowed to absorb this failure and retry.
    pub fn is_healable(&self) -> bool {
        matches!(
            self,
            Self::Stale
                | Self::Occluded
                | Self::Disabled
                | Self::OffScreen
                | Self::Ambiguous { .. }
                | Self::NotFound { .. }
        )
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo { kind: self.kind().to_string(), message: self.to_string() }
    }
}

impl From<SnapshotError> for PinpointError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::SessionLost(msg) => Self::SessionLost(msg),
            SnapshotError::Timeout(budget_ms) => Self::Timeout { stage: Stage::Snapshot, budget_ms },
            SnapshotError::Protocol(msg) => Self::Protocol(msg),
        }
    }
}

impl From<SynthError> for PinpointError {
    fn from(_: SynthError) -> Self {
        Self::EmptySynthesis
    }
}
