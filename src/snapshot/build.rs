//! Raw CDP arena → normalized [`FrameSnapshot`]s.
//!
//! Pure code: everything here operates on shapes the browser layer already
//! fetched, so the whole normalization path is unit-testable without a
//! browser. Normalization rules:
//! * text: whitespace collapsed, trimmed, capped at 256 chars;
//! * attributes: sorted by name, known boolean attributes expanded to
//!   `"true"`, other empty values dropped;
//! * XPath: absolute path from 1-based same-tag sibling indices, re-rooted at
//!   `//*[@id="X"]` when the id is unique in its frame and not hash-like.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::browser::{RawAxNode, RawLayout, RawNode};
use crate::core::types::{BoundingBox, ElementDescriptor, FrameSnapshot};
use crate::locator::hashlike;

use super::hash;

/// Everything the builder needs, already fetched from the page.
pub struct SnapshotInputs {
    pub arena: Vec<RawNode>,
    pub ax: Vec<RawAxNode>,
    pub layout: HashMap<i64, RawLayout>,
    pub top_url: String,
}

const TEXT_CAP: usize = 256;

/// Element tags that never become descriptors. Their siblings still count
/// toward XPath indices so generated paths match the live DOM.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "meta", "link"];

const BOOLEAN_ATTRS: &[&str] = &[
    "disabled", "checked", "selected", "readonly", "required", "multiple", "autofocus",
    "hidden", "open", "contenteditable", "autoplay", "controls", "loop", "muted",
];

const CLICKABLE_TAGS: &[&str] = &["a", "button", "select", "textarea", "option", "summary", "label"];
const CLICKABLE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "menuitem", "tab", "switch", "option", "combobox",
];

pub fn collapse_whitespace(raw: &str, cap: usize) -> Option<String> {
    let collapsed: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() > cap {
        Some(collapsed.chars().take(cap).collect())
    } else {
        Some(collapsed)
    }
}

/// Sort the flat CDP attribute list into a map, expanding booleans and
/// dropping empty non-boolean values.
pub fn normalize_attributes(flat: &[String]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for pair in flat.chunks(2) {
        let name = pair[0].to_ascii_lowercase();
        let value = pair.get(1).cloned().unwrap_or_default();
        if value.is_empty() {
            if BOOLEAN_ATTRS.contains(&name.as_str()) {
                out.insert(name, "true".to_string());
            }
            continue;
        }
        out.insert(name, value);
    }
    out
}

/// Build the ordered frame list: top document first, then same-origin child
/// frames in document order, breadth-first.
pub fn build_frames(inputs: &SnapshotInputs) -> Vec<FrameSnapshot> {
    let mut ax_by_backend: HashMap<i64, AxEntry> = HashMap::with_capacity(inputs.ax.len());
    for node in &inputs.ax {
        if node.ignored {
            continue;
        }
        ax_by_backend.insert(
            node.backend_node_id,
            AxEntry { role: node.role.clone(), name: node.name.clone() },
        );
    }

    let Some(top) = find_top_document(&inputs.arena) else {
        return Vec::new();
    };

    let mut frames = Vec::new();
    let mut queue: VecDeque<(usize, Vec<String>)> = VecDeque::new();
    queue.push_back((top, Vec::new()));
    while let Some((doc_index, frame_path)) = queue.pop_front() {
        let (frame, child_frames) = build_one_frame(inputs, &ax_by_backend, doc_index, frame_path.clone());
        for (iframe_xpath, child_doc) in child_frames {
            let mut child_path = frame_path.clone();
            child_path.push(iframe_xpath);
            queue.push_back((child_doc, child_path));
        }
        frames.push(frame);
    }
    frames
}

struct AxEntry {
    role: Option<String>,
    name: Option<String>,
}

fn find_top_document(arena: &[RawNode]) -> Option<usize> {
    let mut referenced: std::collections::HashSet<usize> = std::collections::HashSet::new();
    for node in arena {
        if let Some(d) = node.content_document {
            referenced.insert(d);
        }
    }
    arena
        .iter()
        .enumerate()
        .find(|(i, n)| n.node_type == 9 && !referenced.contains(i))
        .map(|(i, _)| i)
}

fn build_one_frame(
    inputs: &SnapshotInputs,
    ax_by_backend: &HashMap<i64, AxEntry>,
    doc_index: usize,
    frame_path: Vec<String>,
) -> (FrameSnapshot, Vec<(String, usize)>) {
    let doc = &inputs.arena[doc_index];
    let url = doc.document_url.clone().unwrap_or_else(|| {
        if frame_path.is_empty() { inputs.top_url.clone() } else { String::new() }
    });
    let frame_id = doc
        .frame_id
        .clone()
        .unwrap_or_else(|| format!("doc-{}", doc.backend_node_id));

    let mut builder = FrameBuilder {
        inputs,
        ax_by_backend,
        frame_path,
        id_counts: HashMap::new(),
        elements: Vec::new(),
        parent_index: Vec::new(),
        child_frames: Vec::new(),
    };
    builder.count_ids(doc_index);
    builder.walk_children(doc_index, None, 0, false, "");

    let frame = FrameSnapshot {
        frame_id,
        url,
        dom_hash: hash::dom_hash(&builder.elements),
        ax_hash: hash::ax_hash(&builder.elements),
        elements: builder.elements,
        parent_index: builder.parent_index,
    };
    (frame, builder.child_frames)
}

struct FrameBuilder<'a> {
    inputs: &'a SnapshotInputs,
    ax_by_backend: &'a HashMap<i64, AxEntry>,
    frame_path: Vec<String>,
    /// id attribute → occurrence count within this frame, for the
    /// `//*[@id="X"]` re-rooting rule.
    id_counts: HashMap<String, usize>,
    elements: Vec<ElementDescriptor>,
    parent_index: Vec<Option<u32>>,
    /// Pending child frames: (iframe xpath, content document arena index).
    child_frames: Vec<(String, usize)>,
}

impl FrameBuilder<'_> {
    /// First pass: id occurrence counts within this frame only. Does not
    /// descend into child documents.
    fn count_ids(&mut self, index: usize) {
        let node = &self.inputs.arena[index];
        if node.node_type == 1 {
            let attrs = normalize_attributes(&node.attributes);
            if let Some(id) = attrs.get("id") {
                *self.id_counts.entry(id.clone()).or_insert(0) += 1;
            }
        }
        let children = node.children.clone();
        let shadow_roots = node.shadow_roots.clone();
        for child in children {
            self.count_ids(child);
        }
        for root in shadow_roots {
            self.count_ids(root);
        }
    }

    /// Walk element children of `index`, computing each child's 1-based
    /// same-tag ordinal from per-parent counters. Skipped tags advance the
    /// counters so generated XPaths match the live DOM.
    fn walk_children(
        &mut self,
        index: usize,
        parent_elem: Option<u32>,
        depth: u32,
        in_shadow: bool,
        xpath_prefix: &str,
    ) {
        let children = self.inputs.arena[index].children.clone();
        let mut tag_counters: HashMap<String, usize> = HashMap::new();
        for child in children {
            let node = &self.inputs.arena[child];
            if node.node_type != 1 {
                continue;
            }
            let tag = node.node_name.to_ascii_lowercase();
            let ordinal = {
                let c = tag_counters.entry(tag.clone()).or_insert(0);
                *c += 1;
                *c
            };
            if SKIPPED_TAGS.contains(&tag.as_str()) {
                continue;
            }
            self.visit(child, &tag, ordinal, parent_elem, depth, in_shadow, xpath_prefix);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &mut self,
        index: usize,
        tag: &str,
        ordinal: usize,
        parent_elem: Option<u32>,
        depth: u32,
        in_shadow: bool,
        xpath_prefix: &str,
    ) {
        let node = &self.inputs.arena[index];
        let attrs = normalize_attributes(&node.attributes);

        let mut xpath = format!("{}/{}[{}]", xpath_prefix, tag, ordinal);
        if let Some(id) = attrs.get("id") {
            let unique = self.id_counts.get(id).copied().unwrap_or(0) == 1;
            if unique && !hashlike::is_hash_like(id) && !in_shadow {
                xpath = format!("//*[@id=\"{}\"]", id);
            }
        }

        let ax = self.ax_by_backend.get(&node.backend_node_id);
        let layout = self.inputs.layout.get(&node.backend_node_id);

        let text = collapse_whitespace(&self.direct_text(index), TEXT_CAP);
        let role = ax
            .and_then(|a| a.role.clone())
            .or_else(|| attrs.get("role").cloned())
            .filter(|r| !r.is_empty() && r != "none" && r != "generic");
        let name = ax.and_then(|a| a.name.clone()).or_else(|| attrs.get("name").cloned());

        let visible = layout
            .map(|l| {
                !l.display_none
                    && !l.visibility_hidden
                    && l.opacity > 0.0
                    && l.width > 0.0
                    && l.height > 0.0
            })
            .unwrap_or(false);
        let bounding_box = layout
            .filter(|l| l.width > 0.0 || l.height > 0.0)
            .map(|l| BoundingBox { x: l.x, y: l.y, width: l.width, height: l.height });
        let clickable = CLICKABLE_TAGS.contains(&tag)
            || (tag == "input" && attrs.get("type").map(|t| t != "hidden").unwrap_or(true))
            || role.as_deref().map(|r| CLICKABLE_ROLES.contains(&r)).unwrap_or(false)
            || attrs.contains_key("onclick")
            || attrs.contains_key("contenteditable");

        let is_frame_owner = tag == "iframe" || tag == "frame";
        let cross_origin = is_frame_owner && node.content_document.is_none();
        let content_document = node.content_document;

        let descriptor = ElementDescriptor {
            backend_node_id: node.backend_node_id,
            frame_path: self.frame_path.clone(),
            tag: tag.to_string(),
            text,
            xpath_absolute: xpath.clone(),
            depth,
            in_shadow_dom: in_shadow,
            cross_origin,
            role,
            aria_label: attrs.get("aria-label").cloned(),
            placeholder: attrs.get("placeholder").cloned(),
            name,
            value: attrs.get("value").cloned(),
            title: attrs.get("title").cloned(),
            alt: attrs.get("alt").cloned(),
            input_type: attrs.get("type").cloned(),
            attributes: attrs,
            visible,
            clickable,
            bounding_box,
        };

        let my_index = self.elements.len() as u32;
        self.elements.push(descriptor);
        self.parent_index.push(parent_elem);

        if is_frame_owner {
            if let Some(child_doc) = content_document {
                self.child_frames.push((xpath, child_doc));
            }
            return;
        }

        self.walk_children(index, Some(my_index), depth + 1, in_shadow, &xpath);

        // Shadow children inline under the host. The path keeps extending for
        // uniqueness even though the browser cannot resolve it across the
        // boundary.
        let shadow_roots = self.inputs.arena[index].shadow_roots.clone();
        for root in shadow_roots {
            self.walk_children(root, Some(my_index), depth + 1, true, &xpath);
        }
    }

    /// Concatenated direct child text nodes, raw.
    fn direct_text(&self, index: usize) -> String {
        let arena = &self.inputs.arena;
        let mut out = String::new();
        for &child in &arena[index].children {
            let c = &arena[child];
            if c.node_type == 3 {
                out.push_str(&c.node_value);
                out.push(' ');
            }
        }
        out
    }
}
