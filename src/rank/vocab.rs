//! Closed product/entity vocabulary for the wrong-entity down-rank.
//!
//! The list itself is configuration data (`product_vocabulary` in
//! pinpoint.json); this module only provides fast, word-bounded scanning of
//! descriptor attributes via Aho-Corasick.

use std::collections::HashSet;

use aho_corasick::AhoCorasick;

use crate::core::types::{ElementDescriptor, FrameSnapshot};

/// How many ancestor levels count as an element's "container" when scanning
/// for entity tokens.
const CONTAINER_DEPTH: usize = 5;

pub struct ProductVocabulary {
    tokens: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl ProductVocabulary {
    pub fn new(tokens: &[String]) -> Self {
        let mut normalized: Vec<String> = tokens
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();

        let matcher = if normalized.is_empty() {
            None
        } else {
            AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&normalized)
                .ok()
        };
        Self { tokens: normalized, matcher }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The first vocabulary token appearing as a whole word in `text`.
    pub fn first_token_in(&self, text: &str) -> Option<&str> {
        self.scan(text).into_iter().next()
    }

    /// All vocabulary tokens appearing as whole words in `text`.
    pub fn scan(&self, text: &str) -> Vec<&str> {
        let Some(matcher) = &self.matcher else { return Vec::new() };
        let bytes = text.as_bytes();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut out = Vec::new();
        for m in matcher.find_iter(text) {
            let before_ok = m.start() == 0
                || !bytes[m.start() - 1].is_ascii_alphanumeric();
            let after_ok = m.end() >= bytes.len() || !bytes[m.end()].is_ascii_alphanumeric();
            if before_ok && after_ok && seen.insert(m.pattern().as_usize()) {
                out.push(self.tokens[m.pattern().as_usize()].as_str());
            }
        }
        out
    }

    /// Entity tokens found in the element's own attributes or any container
    /// attribute up to [`CONTAINER_DEPTH`] ancestors.
    pub fn container_tokens<'a>(
        &'a self,
        frame: &FrameSnapshot,
        index: usize,
    ) -> HashSet<&'a str> {
        let mut found: HashSet<&str> = HashSet::new();
        let mut scan_desc = |desc: &ElementDescriptor| {
            for value in desc.attributes.values() {
                for token in self.scan(value) {
                    found.insert(token);
                }
            }
            if let Some(text) = &desc.text {
                for token in self.scan(text) {
                    found.insert(token);
                }
            }
        };

        if let Some(desc) = frame.elements.get(index) {
            scan_desc(desc);
        }
        for ancestor in frame.ancestors(index).take(CONTAINER_DEPTH) {
            scan_desc(&frame.elements[ancestor]);
        }
        found
    }
}
