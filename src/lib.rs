pub mod browser;
pub mod core;
pub mod embed;
pub mod exec;
pub mod heal;
pub mod locator;
pub mod pipeline;
pub mod rank;
pub mod session;
pub mod snapshot;

// --- Primary core exports ---
pub use crate::core::config::PinpointConfig;
pub use crate::core::errors::{PinpointError, SnapshotError, SynthError};
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::CoreContext;
pub use crate::pipeline::{ActOptions, PageSession, QueryOptions};

// --- Convenience module paths ---
pub use crate::browser::{BrowserHandle, CdpPage, PageSurface};
pub use crate::heal::promotion::PromotionStore;
pub use crate::rank::Ranker;
pub use crate::snapshot::SnapshotEngine;
