use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Element & snapshot model
// ─────────────────────────────────────────────────────────────────────────────

/// Pixel rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_zero(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Canonical representation of one DOM node within one frame.
///
/// Descriptors are rebuilt on every snapshot and never mutated after capture.
/// `(frame_path, xpath_absolute)` is unique within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// CDP backend node id — stable for the lifetime of one snapshot.
    pub backend_node_id: i64,
    /// Ordered iframe XPaths from the top document down to this node's frame.
    /// Empty for the top document.
    #[serde(default)]
    pub frame_path: Vec<String>,

    pub tag: String,
    /// Attribute map, lexicographically sorted by name. Boolean attributes
    /// are expanded to `"true"`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Direct text content — whitespace collapsed, trimmed, capped at 256 chars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Unique absolute path with 1-based same-tag sibling indices.
    pub xpath_absolute: String,
    pub depth: u32,
    #[serde(default)]
    pub in_shadow_dom: bool,
    /// Set on iframe owner elements whose content document is unreachable.
    #[serde(default)]
    pub cross_origin: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Accessible name when the AX tree computed one, else the `name` attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// The `type` attribute of inputs and buttons.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,

    pub visible: bool,
    pub clickable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl ElementDescriptor {
    /// `id` attribute, when present and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.attributes.get("id").map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn is_disabled(&self) -> bool {
        self.attributes.contains_key("disabled")
            || self.attributes.get("aria-disabled").map(|v| v == "true").unwrap_or(false)
    }

    /// The text fed to the element embedder. Covers exactly the fields that
    /// participate in the content hash so equal hashes embed identically.
    pub fn embedding_text(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        parts.push(self.tag.clone());
        if let Some(role) = &self.role {
            parts.push(role.clone());
        }
        if let Some(name) = &self.name {
            parts.push(name.clone());
        }
        if let Some(text) = &self.text {
            parts.push(text.clone());
        }
        for (k, v) in &self.attributes {
            parts.push(format!("{}={}", k, v));
        }
        parts.join(" ")
    }
}

/// One frame's elements plus identifying hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub frame_id: String,
    pub url: String,
    /// Content hash over the ordered descriptor list.
    pub dom_hash: String,
    pub ax_hash: String,
    pub elements: Vec<ElementDescriptor>,
    /// Arena parents: `parent_index[i]` is the index of element `i`'s parent
    /// element within this frame, `None` for frame roots. No back-pointers.
    #[serde(default)]
    pub parent_index: Vec<Option<u32>>,
}

impl FrameSnapshot {
    /// Walk from `index` up through the arena, yielding ancestor indices.
    pub fn ancestors(&self, index: usize) -> AncestorIter<'_> {
        AncestorIter { frame: self, next: self.parent_index.get(index).copied().flatten() }
    }
}

pub struct AncestorIter<'a> {
    frame: &'a FrameSnapshot,
    next: Option<u32>,
}

impl Iterator for AncestorIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next? as usize;
        self.next = self.frame.parent_index.get(current).copied().flatten();
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Point-in-time, normalized view of a page across all reachable frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Hash of the concatenated frame hashes.
    pub snapshot_id: String,
    pub captured_at: DateTime<Utc>,
    pub viewport: Viewport,
    pub frames: Vec<FrameSnapshot>,
    /// Set when the capture timed out before the stability window was met.
    #[serde(default)]
    pub partial: bool,
}

impl Snapshot {
    pub fn node_count(&self) -> usize {
        self.frames.iter().map(|f| f.elements.len()).sum()
    }

    /// Iterate every descriptor as `(frame_index, element_index, descriptor)`.
    pub fn iter_elements(&self) -> impl Iterator<Item = (usize, usize, &ElementDescriptor)> {
        self.frames
            .iter()
            .enumerate()
            .flat_map(|(fi, frame)| frame.elements.iter().enumerate().map(move |(ei, e)| (fi, ei, e)))
    }

    pub fn element(&self, frame_index: usize, element_index: usize) -> Option<&ElementDescriptor> {
        self.frames.get(frame_index).and_then(|f| f.elements.get(element_index))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Intent & modes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Type,
    Select,
    Hover,
    Check,
    Uncheck,
    Focus,
    Clear,
    Upload,
}

impl ActionKind {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "click" => Some(Self::Click),
            "type" => Some(Self::Type),
            "select" => Some(Self::Select),
            "hover" => Some(Self::Hover),
            "check" => Some(Self::Check),
            "uncheck" => Some(Self::Uncheck),
            "focus" => Some(Self::Focus),
            "clear" => Some(Self::Clear),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }

    /// Whether the intent requires an enabled target.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Hover | Self::Focus)
    }
}

/// Parsed natural-language instruction. Parsing itself happens upstream; the
/// engine treats this as an input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub action: ActionKind,
    pub target_phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Retrieval mode. `NoSemantic` replaces cosine scoring with the exact target
/// matcher; `Hybrid` takes the better of the two signals per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Semantic,
    NoSemantic,
    Hybrid,
}

impl Mode {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "semantic" => Some(Self::Semantic),
            "no-semantic" | "no_semantic" | "nosemantic" => Some(Self::NoSemantic),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    /// Namespace tag for the promotion store so semantic and non-semantic
    /// histories never mix. Hybrid ranks with semantic vectors, so it shares
    /// the semantic namespace.
    pub fn promotion_key(&self) -> &'static str {
        match self {
            Self::Semantic | Self::Hybrid => "semantic",
            Self::NoSemantic => "no-semantic",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selector model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    Css,
    XPath,
}

/// Which synthesizer tier produced a selector, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Testid,
    Aria,
    Id,
    Role,
    Css,
    XpathText,
    XpathAbs,
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testid => "testid",
            Self::Aria => "aria",
            Self::Id => "id",
            Self::Role => "role",
            Self::Css => "css",
            Self::XpathText => "xpath_text",
            Self::XpathAbs => "xpath_abs",
            Self::Fallback => "fallback",
        }
    }
}

/// One candidate selector emitted by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub selector: String,
    pub kind: SelectorKind,
    pub strategy: Strategy,
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: f32,
    pub heuristic: f32,
    pub promotion: f32,
    /// True when the wrong-entity penalty was applied to the semantic term.
    #[serde(default)]
    pub entity_penalty: bool,
    pub fused: f32,
}

/// Verifier verdict for one candidate selector in one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub unique: bool,
    pub visible: bool,
    pub occluded: bool,
    pub disabled: bool,
    pub used_selector: String,
    #[serde(default)]
    pub frame_path: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timing {
    pub capture_ms: u64,
    pub embed_ms: u64,
    pub rank_ms: u64,
    pub verify_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Alternative locator surfaced alongside the winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub selector: String,
    pub strategy: Strategy,
    pub score: f32,
}

/// Outcome of `query`. On success the selector fields are always populated;
/// on failure they are absent and `error` carries the taxonomy kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub frame_path: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Set when the fallback embedder or a partial snapshot was involved.
    #[serde(default)]
    pub degraded: bool,
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Waits {
    pub before_ms: u64,
    pub after_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameInfo {
    #[serde(default)]
    pub path: Vec<String>,
    pub url: String,
}

/// What the page looked like on either side of an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostAction {
    pub url_before: String,
    pub url_after: String,
    pub dom_hash_before: String,
    pub dom_hash_after: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Outcome of `act`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_locator: Option<Candidate>,
    pub waits: Waits,
    pub frame: FrameInfo,
    pub post_action: PostAction,
    pub timing: Timing,
    pub retries: u32,
    #[serde(default)]
    pub dismissed_overlays: Vec<String>,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(tag: &str) -> ElementDescriptor {
        ElementDescriptor {
            backend_node_id: 1,
            frame_path: vec![],
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            text: None,
            xpath_absolute: format!("/html[1]/body[1]/{}[1]", tag),
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
            bounding_box: Some(BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 }),
        }
    }

    #[test]
    fn ancestor_iteration_follows_arena_parents() {
        let frame = FrameSnapshot {
            frame_id: "f".into(),
            url: "https://example.com".into(),
            dom_hash: "d".into(),
            ax_hash: "a".into(),
            elements: vec![descriptor("html"), descriptor("body"), descriptor("button")],
            parent_index: vec![None, Some(0), Some(1)],
        };
        let chain: Vec<usize> = frame.ancestors(2).collect();
        assert_eq!(chain, vec![1, 0]);
        assert!(frame.ancestors(0).next().is_none());
    }

    #[test]
    fn mode_parsing_and_promotion_namespace() {
        assert_eq!(Mode::parse_str("no-semantic"), Some(Mode::NoSemantic));
        assert_eq!(Mode::parse_str("HYBRID"), Some(Mode::Hybrid));
        assert_eq!(Mode::Hybrid.promotion_key(), "semantic");
        assert_eq!(Mode::NoSemantic.promotion_key(), "no-semantic");
    }

    #[test]
    fn disabled_covers_aria_disabled() {
        let mut d = descriptor("button");
        assert!(!d.is_disabled());
        d.attributes.insert("aria-disabled".into(), "true".into());
        assert!(d.is_disabled());
    }

    #[test]
    fn embedding_text_is_stable_for_equal_content() {
        let mut a = descriptor("button");
        a.attributes.insert("class".into(), "primary".into());
        a.text = Some("Submit".into());
        let mut b = a.clone();
        b.backend_node_id = 99;
        b.xpath_absolute = "/html[1]/body[1]/div[2]/button[1]".into();
        // Identity and position are not part of the embedded content.
        assert_eq!(a.embedding_text(), b.embedding_text());
    }
}
