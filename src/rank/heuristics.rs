//! Structural heuristic scoring.
//!
//! Starts at 0.5 and applies small capped adjustments so the heuristic can
//! guide but never overturn semantic order on its own: tag/role fit for the
//! intended action, token overlap with the target phrase, input-type match,
//! and a penalty per hash-like identifier. Visibility and disabled state
//! apply multiplicatively at the end.

use std::collections::HashSet;

use crate::core::types::{ActionKind, ElementDescriptor};
use crate::locator::hashlike;

const TAG_ROLE_BONUS: f32 = 0.15;
const OVERLAP_BONUS_MAX: f32 = 0.25;
const INPUT_TYPE_BONUS: f32 = 0.15;
const HASHLIKE_PENALTY: f32 = 0.10;
const INVISIBLE_FACTOR: f32 = 0.3;
const DISABLED_FACTOR: f32 = 0.2;

/// Lowercased alphanumeric tokens, two characters or longer.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(|s| s.to_string())
        .collect()
}

/// Query tokens that hint at an input `type` attribute.
fn expected_input_type(token: &str) -> Option<&'static str> {
    match token {
        "email" | "mail" => Some("email"),
        "password" | "passphrase" => Some("password"),
        "phone" | "tel" | "telephone" => Some("tel"),
        "search" => Some("search"),
        "number" | "amount" | "quantity" => Some("number"),
        "url" | "link" | "website" => Some("url"),
        "date" => Some("date"),
        "file" | "upload" | "attachment" => Some("file"),
        _ => None,
    }
}

fn action_fits_element(action: ActionKind, desc: &ElementDescriptor) -> bool {
    let role = desc.role.as_deref().unwrap_or("");
    let input_type = desc.input_type.as_deref().unwrap_or("text");
    match action {
        ActionKind::Click => {
            matches!(desc.tag.as_str(), "button" | "a" | "summary")
                || matches!(role, "button" | "link" | "menuitem" | "tab")
                || (desc.tag == "input" && matches!(input_type, "button" | "submit" | "reset" | "image"))
        }
        ActionKind::Type | ActionKind::Clear => {
            matches!(desc.tag.as_str(), "input" | "textarea")
                || desc.attributes.contains_key("contenteditable")
                || matches!(role, "textbox" | "searchbox" | "combobox")
        }
        ActionKind::Select => desc.tag == "select" || matches!(role, "listbox" | "combobox"),
        ActionKind::Check | ActionKind::Uncheck => {
            (desc.tag == "input" && matches!(input_type, "checkbox" | "radio"))
                || matches!(role, "checkbox" | "radio" | "switch")
        }
        ActionKind::Upload => desc.tag == "input" && input_type == "file",
        ActionKind::Hover | ActionKind::Focus => desc.clickable,
    }
}

/// Every searchable token an element exposes: attribute values, accessible
/// name, text, and the structured semantic fields.
fn element_tokens(desc: &ElementDescriptor) -> HashSet<String> {
    let mut out: HashSet<String> = HashSet::new();
    let mut add = |text: &str| {
        for token in tokenize(text) {
            out.insert(token);
        }
    };
    for value in desc.attributes.values() {
        add(value);
    }
    if let Some(id) = desc.id() {
        add(id);
    }
    for field in [&desc.text, &desc.name, &desc.aria_label, &desc.placeholder, &desc.title, &desc.alt] {
        if let Some(v) = field {
            add(v);
        }
    }
    out
}

/// Heuristic component of the fusion score, in [0, 1].
pub fn heuristic_score(
    desc: &ElementDescriptor,
    action: Option<ActionKind>,
    query_tokens: &[String],
) -> f32 {
    let mut score = 0.5_f32;

    if let Some(action) = action {
        if action_fits_element(action, desc) {
            score += TAG_ROLE_BONUS;
        }
    }

    if !query_tokens.is_empty() {
        let tokens = element_tokens(desc);
        let matched = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
        score += OVERLAP_BONUS_MAX * (matched as f32 / query_tokens.len() as f32);

        if let Some(expected) = query_tokens.iter().find_map(|t| expected_input_type(t)) {
            if desc.input_type.as_deref() == Some(expected) {
                score += INPUT_TYPE_BONUS;
            }
        }
    }

    if desc.id().map(hashlike::is_hash_like).unwrap_or(false) {
        score -= HASHLIKE_PENALTY;
    }
    for class in desc.classes() {
        if hashlike::is_hash_like(class) {
            score -= HASHLIKE_PENALTY;
        }
    }
    score = score.clamp(0.0, 1.0);

    if !desc.visible {
        score *= INVISIBLE_FACTOR;
    }
    if desc.is_disabled() {
        score *= DISABLED_FACTOR;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn input(input_type: &str, id: &str) -> ElementDescriptor {
        ElementDescriptor {
            backend_node_id: 0,
            frame_path: vec![],
            tag: "input".into(),
            attributes: BTreeMap::from([
                ("id".to_string(), id.to_string()),
                ("type".to_string(), input_type.to_string()),
            ]),
            text: None,
            xpath_absolute: String::new(),
            depth: 0,
            in_shadow_dom: false,
            cross_origin: false,
            role: Some("textbox".into()),
            aria_label: None,
            placeholder: None,
            name: Some(id.to_string()),
            value: None,
            title: None,
            alt: None,
            input_type: Some(input_type.to_string()),
            visible: true,
            clickable: true,
            bounding_box: None,
        }
    }

    #[test]
    fn email_query_prefers_email_input() {
        let tokens = tokenize("enter email");
        let email = heuristic_score(&input("email", "email"), Some(ActionKind::Type), &tokens);
        let username = heuristic_score(&input("text", "username"), Some(ActionKind::Type), &tokens);
        let password = heuristic_score(&input("password", "password"), Some(ActionKind::Type), &tokens);
        assert!(email > username, "email {email} vs username {username}");
        assert!(email > password, "email {email} vs password {password}");
    }

    #[test]
    fn invisible_and_disabled_are_multiplicative() {
        let tokens = tokenize("save");
        let mut d = input("text", "save");
        let base = heuristic_score(&d, Some(ActionKind::Type), &tokens);
        d.visible = false;
        let hidden = heuristic_score(&d, Some(ActionKind::Type), &tokens);
        assert!((hidden - base * 0.3).abs() < 1e-5);

        d.visible = true;
        d.attributes.insert("disabled".into(), "true".into());
        let disabled = heuristic_score(&d, Some(ActionKind::Type), &tokens);
        assert!((disabled - base * 0.2).abs() < 1e-5);
    }

    #[test]
    fn hash_like_identifiers_are_penalized() {
        let tokens = tokenize("save");
        let clean = heuristic_score(&input("text", "save"), None, &tokens);
        let hashed = heuristic_score(&input("text", "a1B2c3D4x"), None, &tokens);
        assert!(clean > hashed);
    }

    #[test]
    fn score_never_leaves_unit_interval() {
        let mut d = input("email", "email");
        d.attributes.insert("class".into(), "x8f2k9q1 y7g3m2p4 z6h4n1q9".into());
        let tokens = tokenize("enter email address email");
        let s = heuristic_score(&d, Some(ActionKind::Type), &tokens);
        assert!((0.0..=1.0).contains(&s));
    }
}
