//! Candidate selector generation, strongest tier first.
//!
//! Tier order is fixed: test ids → aria-label → stable id → role+name →
//! minimal unique CSS → text XPath → absolute XPath → attribute fallbacks.
//! Hash-like values are skipped in the first three tiers. Every tier either
//! yields a selector or is skipped; the absolute XPath tier guarantees at
//! least one candidate for any captured element.

use crate::core::errors::SynthError;
use crate::core::types::{Candidate, FrameSnapshot, SelectorKind, Strategy};

use super::{
    count_css_matches, css_attr_escape, hashlike, xpath_literal, CompoundSelector, CssPath,
};

const TESTID_ATTRS: &[&str] = &["data-testid", "data-test-id", "data-qa"];
/// Longest text still worth pinning a selector to.
const TEXT_SELECTOR_CAP: usize = 60;
/// How many ancestors the minimal-CSS tier may recruit before giving up.
const MAX_CSS_ANCESTORS: usize = 4;

/// Generate the ordered candidate list for element `index` of `frame`.
pub fn synthesize(frame: &FrameSnapshot, index: usize) -> Result<Vec<Candidate>, SynthError> {
    let desc = match frame.elements.get(index) {
        Some(d) => d,
        None => return Err(SynthError::Empty),
    };
    let mut out: Vec<Candidate> = Vec::new();
    let mut push = |selector: String, kind: SelectorKind, strategy: Strategy, out: &mut Vec<Candidate>| {
        if !selector.is_empty() && !out.iter().any(|c| c.selector == selector) {
            out.push(Candidate { selector, kind, strategy });
        }
    };

    // 1. Dedicated test hooks.
    for attr in TESTID_ATTRS {
        if let Some(value) = desc.attributes.get(*attr) {
            if !hashlike::is_hash_like(value) {
                push(
                    format!("[{}=\"{}\"]", attr, css_attr_escape(value)),
                    SelectorKind::Css,
                    Strategy::Testid,
                    &mut out,
                );
            }
        }
    }

    // 2. aria-label — the stable handle for icon-only controls.
    if let Some(label) = desc.aria_label.as_deref().filter(|l| !l.trim().is_empty()) {
        if !hashlike::is_hash_like(label) {
            push(
                format!("[aria-label=\"{}\"]", css_attr_escape(label)),
                SelectorKind::Css,
                Strategy::Aria,
                &mut out,
            );
        }
    }

    // 3. Stable element id.
    if let Some(id) = desc.id() {
        if !hashlike::is_hash_like(id) {
            push(
                format!("//*[@id=\"{}\"]", id),
                SelectorKind::XPath,
                Strategy::Id,
                &mut out,
            );
        }
    }

    // 4. Explicit role plus accessible name.
    if let (Some(role), Some(label)) = (desc.attributes.get("role"), desc.aria_label.as_deref()) {
        if !label.trim().is_empty() {
            push(
                format!(
                    "[role=\"{}\"][aria-label=\"{}\"]",
                    css_attr_escape(role),
                    css_attr_escape(label)
                ),
                SelectorKind::Css,
                Strategy::Role,
                &mut out,
            );
        }
    }

    // 5. Minimal unique CSS path.
    if let Some(path) = minimal_css_path(frame, index) {
        push(path.to_css(), SelectorKind::Css, Strategy::Css, &mut out);
    }

    // 6. Contextual XPath on nearby stable text.
    if let Some(text) = desc.text.as_deref() {
        if !text.is_empty() && text.chars().count() <= TEXT_SELECTOR_CAP {
            let duplicates = frame
                .elements
                .iter()
                .filter(|e| e.tag == desc.tag && e.text.as_deref() == Some(text))
                .count();
            if duplicates == 1 {
                push(
                    format!("//{}[normalize-space()={}]", desc.tag, xpath_literal(text)),
                    SelectorKind::XPath,
                    Strategy::XpathText,
                    &mut out,
                );
            }
        }
    }

    // 7. Absolute XPath — always resolvable, last resort before fallbacks.
    push(
        desc.xpath_absolute.clone(),
        SelectorKind::XPath,
        Strategy::XpathAbs,
        &mut out,
    );

    // 8. Attribute fallbacks for elements with nothing better.
    if desc.attributes.contains_key("contenteditable") {
        push(
            format!("{}[contenteditable=\"true\"]", desc.tag),
            SelectorKind::Css,
            Strategy::Fallback,
            &mut out,
        );
    }
    if desc.attributes.contains_key("onclick") {
        push(
            format!("{}[onclick]", desc.tag),
            SelectorKind::Css,
            Strategy::Fallback,
            &mut out,
        );
    }

    if out.is_empty() {
        return Err(SynthError::Empty);
    }
    Ok(out)
}

/// Shortest descendant chain that disambiguates the element within its frame,
/// or `None` when even `MAX_CSS_ANCESTORS` ancestors plus `:nth-of-type`
/// cannot. Hash-like classes never participate.
fn minimal_css_path(frame: &FrameSnapshot, index: usize) -> Option<CssPath> {
    let desc = frame.elements.get(index)?;

    let target = compound_for(frame, index, 2);
    let mut chain = vec![target];
    let mut path = CssPath(chain.clone());
    if count_css_matches(frame, &path) == 1 {
        return Some(path);
    }

    for ancestor in frame.ancestors(index).take(MAX_CSS_ANCESTORS) {
        let comp = compound_for(frame, ancestor, 1);
        // A bare `div` ancestor adds no discrimination; skip it.
        if comp.classes.is_empty() && comp.attrs.is_empty() && comp.tag.as_deref() == Some("div") {
            continue;
        }
        chain.insert(0, comp);
        path = CssPath(chain.clone());
        if count_css_matches(frame, &path) == 1 {
            return Some(path);
        }
    }

    // Last try: pin the target positionally.
    let position = frame
        .elements
        .iter()
        .enumerate()
        .filter(|(i, e)| {
            frame.parent_index.get(*i).copied().flatten()
                == frame.parent_index.get(index).copied().flatten()
                && e.tag == desc.tag
        })
        .position(|(i, _)| i == index)
        .map(|p| p + 1)?;
    if let Some(last) = chain.last_mut() {
        last.nth_of_type = Some(position);
    }
    path = CssPath(chain);
    if count_css_matches(frame, &path) == 1 {
        return Some(path);
    }
    None
}

/// Tag plus up to `max_classes` non-hash-like classes, plus any stable
/// data-* discriminator the element carries.
fn compound_for(frame: &FrameSnapshot, index: usize, max_classes: usize) -> CompoundSelector {
    let desc = &frame.elements[index];
    let mut comp = CompoundSelector { tag: Some(desc.tag.clone()), ..Default::default() };
    for class in desc.classes() {
        if comp.classes.len() >= max_classes {
            break;
        }
        if !hashlike::is_hash_like(class) {
            comp.classes.push(class.to_string());
        }
    }
    for (name, value) in &desc.attributes {
        if name.starts_with("data-")
            && !TESTID_ATTRS.contains(&name.as_str())
            && !hashlike::is_hash_like(value)
        {
            comp.attrs.push((name.clone(), value.clone()));
            break;
        }
    }
    comp
}
