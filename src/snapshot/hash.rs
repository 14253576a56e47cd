//! Stable fingerprints for elements, frames, and whole snapshots.
//!
//! All hashes are hex-encoded SHA-256 over length-prefixed field streams, so
//! adjacent fields can never collide by concatenation. The element content
//! hash deliberately covers only the fields that feed the embedder — tag,
//! sorted attributes, text, role, name — so layout-only churn (position,
//! visibility, backend ids) keeps its cached vector.

use sha2::{Digest, Sha256};

use crate::core::types::{ElementDescriptor, FrameSnapshot};

fn push_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn hex(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Fingerprint of the semantically meaningful fields of one element.
///
/// Two descriptors with equal content hash MUST receive the same embedding
/// vector; the embedding cache is keyed by this value.
pub fn content_hash(desc: &ElementDescriptor) -> String {
    let mut hasher = Sha256::new();
    push_field(&mut hasher, &desc.tag);
    for (name, value) in &desc.attributes {
        push_field(&mut hasher, name);
        push_field(&mut hasher, value);
    }
    push_field(&mut hasher, desc.text.as_deref().unwrap_or_default());
    push_field(&mut hasher, desc.role.as_deref().unwrap_or_default());
    push_field(&mut hasher, desc.name.as_deref().unwrap_or_default());
    hex(hasher)
}

/// Frame-level DOM hash over the ordered descriptor list. Covers identity,
/// structure, and the semantic fields; two frames with equal `dom_hash` are
/// identical for ranking purposes.
pub fn dom_hash(elements: &[ElementDescriptor]) -> String {
    let mut hasher = Sha256::new();
    for desc in elements {
        hasher.update(desc.backend_node_id.to_le_bytes());
        push_field(&mut hasher, &desc.tag);
        for (name, value) in &desc.attributes {
            push_field(&mut hasher, name);
            push_field(&mut hasher, value);
        }
        push_field(&mut hasher, desc.text.as_deref().unwrap_or_default());
        push_field(&mut hasher, desc.role.as_deref().unwrap_or_default());
        push_field(&mut hasher, desc.name.as_deref().unwrap_or_default());
    }
    hex(hasher)
}

/// Accessibility-tree hash over ordered `(backend_node_id, role, name)`.
pub fn ax_hash(elements: &[ElementDescriptor]) -> String {
    let mut hasher = Sha256::new();
    for desc in elements {
        hasher.update(desc.backend_node_id.to_le_bytes());
        push_field(&mut hasher, desc.role.as_deref().unwrap_or_default());
        push_field(&mut hasher, desc.name.as_deref().unwrap_or_default());
    }
    hex(hasher)
}

/// Snapshot id = hash of the concatenated frame hashes, in frame order.
pub fn snapshot_id(frames: &[FrameSnapshot]) -> String {
    let mut hasher = Sha256::new();
    for frame in frames {
        push_field(&mut hasher, &frame.frame_id);
        push_field(&mut hasher, &frame.dom_hash);
        push_field(&mut hasher, &frame.ax_hash);
    }
    hex(hasher)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::types::BoundingBox;

    fn descriptor() -> ElementDescriptor {
        ElementDescriptor {
            backend_node_id: 7,
            frame_path: vec![],
            tag: "button".into(),
            attributes: BTreeMap::from([("class".to_string(), "primary".to_string())]),
            text: Some("Submit".into()),
            xpath_absolute: "/html[1]/body[1]/button[1]".into(),
            depth: 2,
            in_shadow_dom: false,
            cross_origin: false,
            role: Some("button".into()),
            aria_label: None,
            placeholder: None,
            name: Some("Submit".into()),
            value: None,
            title: None,
            alt: None,
            input_type: None,
            visible: true,
            clickable: true,
            bounding_box: Some(BoundingBox { x: 1.0, y: 2.0, width: 30.0, height: 10.0 }),
        }
    }

    #[test]
    fn content_hash_ignores_position_and_identity() {
        let a = descriptor();
        let mut b = descriptor();
        b.backend_node_id = 999;
        b.xpath_absolute = "/html[1]/body[1]/div[3]/button[2]".into();
        b.visible = false;
        b.bounding_box = None;
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn content_hash_tracks_semantic_fields() {
        let a = descriptor();
        let mut b = descriptor();
        b.text = Some("Cancel".into());
        assert_ne!(content_hash(&a), content_hash(&b));

        let mut c = descriptor();
        c.attributes.insert("data-qa".into(), "submit".into());
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let a = descriptor();
        let mut b = descriptor();
        // "Submit" text + "button" role must not equal "Submitbutton" + "".
        b.text = Some("Submitbutton".into());
        b.role = Some(String::new());
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn dom_hash_tracks_backend_ids() {
        let a = vec![descriptor()];
        let mut b = vec![descriptor()];
        b[0].backend_node_id = 8;
        assert_ne!(dom_hash(&a), dom_hash(&b));
    }
}
