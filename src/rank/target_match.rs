//! Exact target matcher for no-semantic mode.
//!
//! Scores only exact (normalized) matches of the target phrase against a
//! fixed field priority: innerText, aria-label, title, placeholder, id,
//! name, value, data-testid. Earlier fields win marginally higher scores so
//! a text match outranks a test-id match when both exist. When no element
//! matches on DOM fields at all, the accessibility-tree name is consulted as
//! a fallback.

use crate::core::types::{ElementDescriptor, FrameSnapshot, Snapshot};

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// DOM-field match score in [0, 1]; 0 means no exact match.
pub fn dom_match_score(desc: &ElementDescriptor, phrase: &str) -> f32 {
    let needle = normalize(phrase);
    if needle.is_empty() {
        return 0.0;
    }

    let fields: [(Option<&str>, f32); 8] = [
        (desc.text.as_deref(), 1.0),
        (desc.aria_label.as_deref(), 0.95),
        (desc.title.as_deref(), 0.90),
        (desc.placeholder.as_deref(), 0.85),
        (desc.id(), 0.80),
        (desc.attributes.get("name").map(String::as_str), 0.75),
        (desc.value.as_deref(), 0.70),
        (desc.attributes.get("data-testid").map(String::as_str), 0.65),
    ];
    for (field, score) in fields {
        if let Some(value) = field {
            if normalize(value) == needle {
                return score;
            }
        }
    }
    0.0
}

/// Accessibility-name match score; only consulted when DOM matching came up
/// empty for the whole snapshot.
pub fn ax_match_score(desc: &ElementDescriptor, phrase: &str) -> f32 {
    let needle = normalize(phrase);
    if needle.is_empty() {
        return 0.0;
    }
    match &desc.name {
        Some(name) if normalize(name) == needle => 0.6,
        _ => 0.0,
    }
}

/// Per-element matcher scores for a whole snapshot, applying the AX fallback
/// rule. Output is indexed parallel to `snapshot.iter_elements()` order.
pub fn match_scores(snapshot: &Snapshot, phrase: &str) -> Vec<f32> {
    let dom: Vec<f32> = snapshot
        .iter_elements()
        .map(|(_, _, desc)| dom_match_score(desc, phrase))
        .collect();
    if dom.iter().any(|&s| s > 0.0) {
        return dom;
    }
    snapshot
        .iter_elements()
        .map(|(_, _, desc)| ax_match_score(desc, phrase))
        .collect()
}

/// Convenience for single-frame callers.
pub fn frame_match_scores(frame: &FrameSnapshot, phrase: &str) -> Vec<f32> {
    let dom: Vec<f32> = frame.elements.iter().map(|d| dom_match_score(d, phrase)).collect();
    if dom.iter().any(|&s| s > 0.0) {
        return dom;
    }
    frame.elements.iter().map(|d| ax_match_score(d, phrase)).collect()
}
