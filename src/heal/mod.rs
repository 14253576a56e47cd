//! Self-heal support: selector relaxation.
//!
//! When a previously-good locator stops verifying, the healer (driven by the
//! request state machine) walks a fixed ladder before giving up on the
//! element: promoted winners → fresh snapshot + re-rank → *relaxed* variants
//! of the failing selector → the synthesizer's next candidate. This module
//! owns the relaxation ladder; each step trades precision for reach:
//! 1. strip positional indices (`[2]`, `:nth-of-type(2)`);
//! 2. drop non-semantic (hash-like or utility) classes;
//! 3. broaden to role + accessible name from the descriptor.

pub mod promotion;

use std::sync::OnceLock;

use regex::Regex;

use crate::core::types::{Candidate, ElementDescriptor, SelectorKind, Strategy};
use crate::locator::{css_attr_escape, hashlike, xpath_literal};

fn xpath_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\d+\]").expect("xpath index regex"))
}

fn nth_of_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":nth-of-type\(\d+\)").expect("nth-of-type regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.([-_a-zA-Z0-9]+)").expect("class regex"))
}

/// A class that carries no element semantics: build-time hash, layout
/// utility (`mt-2`, `px-4`), or bare framework glue.
fn is_non_semantic_class(class: &str) -> bool {
    hashlike::is_hash_like(class)
        || class.len() <= 3
        || class.chars().any(|c| c.is_ascii_digit())
}

/// Relaxed variants of a failing selector, in the order they should be
/// tried. The original selector is never repeated; an empty result means the
/// ladder has nothing left and the caller moves to the next candidate.
pub fn relax(candidate: &Candidate, descriptor: Option<&ElementDescriptor>) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    let mut push = |selector: String, kind: SelectorKind, out: &mut Vec<Candidate>| {
        if !selector.trim().is_empty()
            && selector != candidate.selector
            && !out.iter().any(|c| c.selector == selector)
        {
            out.push(Candidate { selector, kind, strategy: Strategy::Fallback });
        }
    };

    // Step 1: strip positional indices.
    match candidate.kind {
        SelectorKind::XPath => {
            let stripped = xpath_index_re().replace_all(&candidate.selector, "").to_string();
            push(stripped, SelectorKind::XPath, &mut out);
        }
        SelectorKind::Css => {
            let stripped = nth_of_type_re().replace_all(&candidate.selector, "").to_string();
            push(stripped, SelectorKind::Css, &mut out);
        }
    }

    // Step 2: drop non-semantic classes, then all classes.
    if candidate.kind == SelectorKind::Css && candidate.selector.contains('.') {
        let without_noise = class_re()
            .replace_all(&candidate.selector, |caps: &regex::Captures<'_>| {
                let class = &caps[1];
                if is_non_semantic_class(class) {
                    String::new()
                } else {
                    format!(".{}", class)
                }
            })
            .to_string();
        push(without_noise, SelectorKind::Css, &mut out);

        let classless = class_re().replace_all(&candidate.selector, "").to_string();
        push(classless, SelectorKind::Css, &mut out);
    }

    // Step 3: broaden to role + accessible name from the descriptor.
    if let Some(desc) = descriptor {
        match (desc.attributes.get("role"), desc.aria_label.as_deref()) {
            (Some(role), Some(label)) if !label.is_empty() => {
                push(
                    format!(
                        "[role=\"{}\"][aria-label=\"{}\"]",
                        css_attr_escape(role),
                        css_attr_escape(label)
                    ),
                    SelectorKind::Css,
                    &mut out,
                );
            }
            _ => {}
        }
        if let Some(label) = desc.aria_label.as_deref().filter(|l| !l.is_empty()) {
            push(
                format!("[aria-label=\"{}\"]", css_attr_escape(label)),
                SelectorKind::Css,
                &mut out,
            );
        }
        if let (Some(name), true) = (desc.name.as_deref(), desc.role.is_some()) {
            if !name.is_empty() {
                push(
                    format!("//{}[normalize-space()={}]", desc.tag, xpath_literal(name)),
                    SelectorKind::XPath,
                    &mut out,
                );
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn candidate(selector: &str, kind: SelectorKind) -> Candidate {
        Candidate { selector: selector.into(), kind, strategy: Strategy::Css }
    }

    fn descriptor() -> ElementDescriptor {
        let attributes: BTreeMap<String, String> = BTreeMap::from([
            ("role".to_string(), "button".to_string()),
            ("aria-label".to_string(), "Close dialog".to_string()),
        ]);
        ElementDescriptor {
            backend_node_id: 0,
            frame_path: vec![],
            tag: "button".into(),
            attributes,
            text: None,
            xpath_absolute: "/html[1]/body[1]/button[2]".into(),
            depth: 2,
            in_shadow_dom: false,
            cross_origin: false,
            role: Some("button".into()),
            aria_label: Some("Close dialog".into()),
            placeholder: None,
            name: Some("Close dialog".into()),
            value: None,
            title: None,
            alt: None,
            input_type: None,
            visible: true,
            clickable: true,
            bounding_box: None,
        }
    }

    #[test]
    fn xpath_indices_are_stripped_first() {
        let out = relax(&candidate("/html[1]/body[1]/div[3]/button[2]", SelectorKind::XPath), None);
        assert_eq!(out[0].selector, "/html/body/div/button");
        assert_eq!(out[0].kind, SelectorKind::XPath);
    }

    #[test]
    fn css_relaxation_drops_noise_classes_then_all() {
        let out = relax(
            &candidate("div.cart button.btn.x8f2k9q1z.submit-action:nth-of-type(2)", SelectorKind::Css),
            None,
        );
        // First the positional pin goes, then the hash/utility classes, then everything.
        assert!(out[0].selector.ends_with("button.btn.x8f2k9q1z.submit-action"));
        assert!(out.iter().any(|c| c.selector.contains(".submit-action") && !c.selector.contains("x8f2k9q1z")));
        assert!(out.iter().any(|c| c.selector.contains("div button") || c.selector == "div.cart button" || !c.selector.contains('.')));
    }

    #[test]
    fn broadens_to_role_and_name_when_descriptor_known() {
        let out = relax(&candidate("/html[1]/body[1]/button[2]", SelectorKind::XPath), Some(&descriptor()));
        assert!(out
            .iter()
            .any(|c| c.selector == r#"[role="button"][aria-label="Close dialog"]"#));
        assert!(out.iter().any(|c| c.selector == r#"[aria-label="Close dialog"]"#));
    }

    #[test]
    fn never_repeats_the_original() {
        let out = relax(&candidate("/html/body/button", SelectorKind::XPath), None);
        assert!(out.iter().all(|c| c.selector != "/html/body/button"));
    }
}
