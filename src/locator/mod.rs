//! Locator synthesis and verification.
//!
//! The synthesizer emits candidates from a fixed family of selector shapes
//! (attribute CSS, id XPath, text XPath, absolute XPath). Because the family
//! is closed, this module can also *statically* evaluate a selector against a
//! captured frame — used for uniqueness pre-checks during synthesis, for
//! matching promoted selectors back onto ranked descriptors, and for tests.
//! The live verifier re-checks everything against the real DOM before acting.

pub mod hashlike;
pub mod synthesize;
pub mod verify;

use std::sync::OnceLock;

use regex::Regex;

use crate::core::types::{ElementDescriptor, FrameSnapshot};

// ── Quoting helpers ──────────────────────────────────────────────────────────

/// Escape a value for use inside a double-quoted CSS attribute selector.
pub fn css_attr_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Produce an XPath string literal for arbitrary text, switching to
/// `concat()` when the value mixes quote characters.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    if !value.contains('"') {
        return format!("\"{}\"", value);
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|chunk| format!("'{}'", chunk))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

// ── Static CSS evaluation over a captured frame ──────────────────────────────

/// One compound selector: `tag.class[attr="v"]:nth-of-type(n)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundSelector {
    pub tag: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<(String, String)>,
    pub nth_of_type: Option<usize>,
}

impl CompoundSelector {
    pub fn matches(&self, desc: &ElementDescriptor) -> bool {
        if let Some(tag) = &self.tag {
            if !desc.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        for class in &self.classes {
            if !desc.classes().contains(&class.as_str()) {
                return false;
            }
        }
        for (name, value) in &self.attrs {
            if desc.attributes.get(name).map(|v| v != value).unwrap_or(true) {
                return false;
            }
        }
        // nth-of-type is resolved positionally by `css_path_matches`.
        true
    }

    pub fn to_css(&self) -> String {
        let mut out = self.tag.clone().unwrap_or_default();
        for class in &self.classes {
            out.push('.');
            out.push_str(class);
        }
        for (name, value) in &self.attrs {
            out.push_str(&format!("[{}=\"{}\"]", name, css_attr_escape(value)));
        }
        if let Some(n) = self.nth_of_type {
            out.push_str(&format!(":nth-of-type({})", n));
        }
        out
    }
}

/// Descendant chain, outermost ancestor first, target last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CssPath(pub Vec<CompoundSelector>);

impl CssPath {
    pub fn to_css(&self) -> String {
        self.0.iter().map(CompoundSelector::to_css).collect::<Vec<_>>().join(" ")
    }
}

fn nth_of_type_position(frame: &FrameSnapshot, index: usize) -> usize {
    let desc = &frame.elements[index];
    let parent = frame.parent_index.get(index).copied().flatten();
    let mut position = 0;
    for (i, other) in frame.elements.iter().enumerate() {
        if frame.parent_index.get(i).copied().flatten() == parent && other.tag == desc.tag {
            position += 1;
            if i == index {
                return position;
            }
        }
    }
    position.max(1)
}

/// Does element `index` of `frame` match the full descendant chain?
pub fn css_path_matches(frame: &FrameSnapshot, index: usize, path: &CssPath) -> bool {
    let Some((target, ancestors)) = path.0.split_last() else {
        return false;
    };
    let desc = &frame.elements[index];
    if !target.matches(desc) {
        return false;
    }
    if let Some(n) = target.nth_of_type {
        if nth_of_type_position(frame, index) != n {
            return false;
        }
    }

    // Each remaining compound must match some strictly-higher ancestor, in order.
    let chain: Vec<usize> = frame.ancestors(index).collect();
    let mut remaining = ancestors.iter().rev();
    let mut current = remaining.next();
    for &ancestor_idx in &chain {
        let Some(comp) = current else { break };
        if comp.matches(&frame.elements[ancestor_idx]) {
            current = remaining.next();
        }
    }
    current.is_none()
}

pub fn count_css_matches(frame: &FrameSnapshot, path: &CssPath) -> usize {
    (0..frame.elements.len()).filter(|&i| css_path_matches(frame, i, path)).count()
}

// ── Parsing our own selector family back into matchable form ─────────────────

fn compound_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?x)
            ^(?P<tag>[a-zA-Z][a-zA-Z0-9-]*)?
            (?P<rest>(?:\.[-_a-zA-Z0-9]+|\[[-a-zA-Z0-9]+="(?:[^"\\]|\\.)*"\]|:nth-of-type\(\d+\))*)$
            "#,
        )
        .expect("compound selector regex")
    })
}

fn piece_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?x)
            (?:\.(?P<class>[-_a-zA-Z0-9]+))
            |(?:\[(?P<attr>[-a-zA-Z0-9]+)="(?P<value>(?:[^"\\]|\\.)*)"\])
            |(?::nth-of-type\((?P<nth>\d+)\))
            "#,
        )
        .expect("selector piece regex")
    })
}

/// Parse one compound selector from our generated family. Returns `None` for
/// anything outside it (pseudo-classes, combinators, etc.).
pub fn parse_compound(input: &str) -> Option<CompoundSelector> {
    let caps = compound_re().captures(input.trim())?;
    let mut out = CompoundSelector {
        tag: caps.name("tag").map(|m| m.as_str().to_ascii_lowercase()),
        ..Default::default()
    };
    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
    for piece in piece_re().captures_iter(rest) {
        if let Some(class) = piece.name("class") {
            out.classes.push(class.as_str().to_string());
        } else if let Some(attr) = piece.name("attr") {
            let value = piece.name("value").map(|m| m.as_str()).unwrap_or("");
            out.attrs.push((
                attr.as_str().to_ascii_lowercase(),
                value.replace("\\\"", "\"").replace("\\\\", "\\"),
            ));
        } else if let Some(nth) = piece.name("nth") {
            out.nth_of_type = nth.as_str().parse().ok();
        }
    }
    if out.tag.is_none() && out.classes.is_empty() && out.attrs.is_empty() {
        return None;
    }
    Some(out)
}

/// Parse a descendant chain of compounds (space-separated).
pub fn parse_css_path(input: &str) -> Option<CssPath> {
    let compounds: Option<Vec<CompoundSelector>> =
        input.split_whitespace().map(parse_compound).collect();
    let compounds = compounds?;
    if compounds.is_empty() {
        return None;
    }
    Some(CssPath(compounds))
}

fn id_xpath_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^//\*\[@id="([^"]+)"\]$"#).expect("id xpath regex"))
}

fn text_xpath_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^//([a-zA-Z][a-zA-Z0-9-]*)\[normalize-space\(\)='([^']*)'\]$"#)
            .expect("text xpath regex")
    })
}

/// Statically decide whether `selector` (from our generated family) would
/// select element `index` of `frame`. Used to map promoted selectors back
/// onto freshly-ranked descriptors without touching the browser.
pub fn selector_matches_element(selector: &str, frame: &FrameSnapshot, index: usize) -> bool {
    let desc = &frame.elements[index];

    if let Some(caps) = id_xpath_re().captures(selector) {
        return desc.id() == Some(&caps[1]);
    }
    if let Some(caps) = text_xpath_re().captures(selector) {
        return desc.tag.eq_ignore_ascii_case(&caps[1])
            && desc.text.as_deref() == Some(&caps[2]);
    }
    if selector.starts_with('/') {
        return desc.xpath_absolute == selector;
    }
    match parse_css_path(selector) {
        Some(path) => css_path_matches(frame, index, &path),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::types::ElementDescriptor;

    fn desc(tag: &str, attrs: &[(&str, &str)]) -> ElementDescriptor {
        ElementDescriptor {
            backend_node_id: 0,
            frame_path: vec![],
            tag: tag.into(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<BTreeMap<_, _>>(),
            text: None,
            xpath_absolute: String::new(),
            depth: 0,
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
        }
    }

    fn frame(elements: Vec<ElementDescriptor>, parent_index: Vec<Option<u32>>) -> FrameSnapshot {
        FrameSnapshot {
            frame_id: "f".into(),
            url: String::new(),
            dom_hash: String::new(),
            ax_hash: String::new(),
            elements,
            parent_index,
        }
    }

    #[test]
    fn xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(xpath_literal(r#"a'b"c"#), r#"concat('a', "'", 'b"c')"#);
    }

    #[test]
    fn compound_round_trips() {
        let comp = parse_compound(r#"button.primary[data-testid="save"]"#).unwrap();
        assert_eq!(comp.tag.as_deref(), Some("button"));
        assert_eq!(comp.classes, vec!["primary"]);
        assert_eq!(comp.attrs, vec![("data-testid".to_string(), "save".to_string())]);
        assert_eq!(comp.to_css(), r#"button.primary[data-testid="save"]"#);
    }

    #[test]
    fn css_path_matching_respects_ancestor_order() {
        // div.cart > form > button  and a sibling button outside the cart
        let f = frame(
            vec![
                desc("div", &[("class", "cart")]),
                desc("form", &[]),
                desc("button", &[]),
                desc("button", &[]),
            ],
            vec![None, Some(0), Some(1), None],
        );
        let path = parse_css_path("div.cart button").unwrap();
        assert!(css_path_matches(&f, 2, &path));
        assert!(!css_path_matches(&f, 3, &path));
        assert_eq!(count_css_matches(&f, &path), 1);
    }

    #[test]
    fn promoted_selector_maps_back_to_descriptor() {
        let mut save = desc("button", &[("id", "save"), ("data-testid", "save-btn")]);
        save.text = Some("Save".into());
        save.xpath_absolute = "/html[1]/body[1]/button[1]".into();
        let f = frame(vec![save], vec![None]);

        assert!(selector_matches_element(r#"//*[@id="save"]"#, &f, 0));
        assert!(selector_matches_element(r#"[data-testid="save-btn"]"#, &f, 0));
        assert!(selector_matches_element("//button[normalize-space()='Save']", &f, 0));
        assert!(selector_matches_element("/html[1]/body[1]/button[1]", &f, 0));
        assert!(!selector_matches_element(r#"//*[@id="other"]"#, &f, 0));
    }
}
