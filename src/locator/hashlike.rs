//! "Hash-like" identifier detection.
//!
//! Identifiers that look like build-time randomness (UUIDs, content hashes,
//! CSS-module suffixes, long session tokens) disqualify themselves from the
//! stable selector tiers: they change on every deploy, so a selector built on
//! one is dead on arrival. Plain human-named ids (`email`, `add-to-cart`,
//! `section2`) must pass.

use std::sync::OnceLock;

use regex::Regex;

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("uuid regex")
    })
}

fn webpack_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // CSS-modules / styled-components suffix: `Button__x7fk2q`, `root__a1b2c`
    RE.get_or_init(|| Regex::new(r"__[a-z0-9]{5,}$").expect("webpack regex"))
}

fn base64ish_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9+/]{12,}={0,2}$").expect("base64 regex"))
}

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]{6,}").expect("digit run regex"))
}

/// Heuristic: does this identifier look machine-generated?
pub fn is_hash_like(value: &str) -> bool {
    let v = value.trim();
    if v.is_empty() {
        return false;
    }

    if uuid_re().is_match(v) || webpack_suffix_re().is_match(v) {
        return true;
    }

    // Long digit runs read as database ids / timestamps, not names.
    if digit_run_re().is_match(v) {
        return true;
    }

    // ≥8-char alphanumeric blob mixing letters and at least two digits, or
    // digits plus both cases: `x8f2k9q1`, `Ab3dE9fG`.
    let compact: String = v.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if compact.len() >= 8 {
        let digits = compact.chars().filter(|c| c.is_ascii_digit()).count();
        let has_lower = compact.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = compact.chars().any(|c| c.is_ascii_uppercase());
        let letters = compact.len() - digits;
        if digits >= 2 && letters >= 2 && (digits >= 3 || (has_lower && has_upper)) {
            return true;
        }
        if base64ish_re().is_match(v) && digits >= 2 && has_lower && has_upper {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_and_webpack_suffixes_match() {
        assert!(is_hash_like("123e4567-e89b-12d3-a456-426614174000"));
        assert!(is_hash_like("Button__x7fk2q"));
        assert!(is_hash_like("styles__a1b2cd"));
    }

    #[test]
    fn random_blobs_match() {
        assert!(is_hash_like("x8f2k9q1"));
        assert!(is_hash_like("Ab3dE9fGh2"));
        assert!(is_hash_like("sess-20240611123059"));
        assert!(is_hash_like("dGhpc2lzYTEyVG9rZW4="));
    }

    #[test]
    fn human_names_pass() {
        for good in [
            "email",
            "add-to-cart",
            "submit-button",
            "section2",
            "username",
            "login_form",
            "nav-primary",
            "content4you",
        ] {
            assert!(!is_hash_like(good), "{good} wrongly flagged");
        }
    }

    #[test]
    fn empty_is_not_hash_like() {
        assert!(!is_hash_like(""));
        assert!(!is_hash_like("   "));
    }
}
