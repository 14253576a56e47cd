//! Live candidate verification against the real DOM.
//!
//! One `eval` round-trip per candidate: the script resolves the target frame
//! through the recorded iframe path, runs the selector, and reports the full
//! check ladder. Checks run in order and all must pass:
//! uniqueness (per-frame) → attached → visible → not occluded → enabled.

use serde::Deserialize;

use crate::browser::PageSurface;
use crate::core::errors::SnapshotError;
use crate::core::types::{Candidate, SelectorKind, VerificationResult};

const VERIFY_TEMPLATE: &str = r#"
(function () {
    var args = __ARGS__;

    function resolveDoc(path) {
        var doc = document;
        for (var i = 0; i < path.length; i++) {
            var r = doc.evaluate(path[i], doc, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
            var el = r.singleNodeValue;
            if (!el || !el.contentDocument) { return null; }
            doc = el.contentDocument;
        }
        return doc;
    }

    function queryAll(doc, selector, kind) {
        if (kind === 'xpath') {
            var out = [];
            var res = doc.evaluate(selector, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
            for (var i = 0; i < res.snapshotLength; i++) { out.push(res.snapshotItem(i)); }
            return out;
        }
        return Array.prototype.slice.call(doc.querySelectorAll(selector));
    }

    var doc = resolveDoc(args.framePath);
    if (!doc) { return JSON.stringify({ frameMissing: true, count: 0 }); }

    var matches;
    try {
        matches = queryAll(doc, args.selector, args.kind);
    } catch (e) {
        return JSON.stringify({ selectorError: String(e), count: 0 });
    }
    if (matches.length !== 1) {
        return JSON.stringify({ count: matches.length });
    }

    var el = matches[0];
    var win = doc.defaultView || window;
    var attached = !!el.isConnected;
    var style = win.getComputedStyle(el);
    var rect = el.getBoundingClientRect();
    var visible = attached
        && rect.width > 0 && rect.height > 0
        && style.display !== 'none'
        && style.visibility !== 'hidden'
        && parseFloat(style.opacity) > 0;

    var occluded = false;
    var occluder = null;
    if (visible) {
        var cx = rect.left + rect.width / 2;
        var cy = rect.top + rect.height / 2;
        var hit = doc.elementFromPoint(cx, cy);
        occluded = !(hit && (hit === el || el.contains(hit)));
        if (occluded && hit) {
            occluder = (hit.tagName || '').toLowerCase() + (hit.id ? '#' + hit.id : '');
        }
    }

    var offscreen = rect.bottom < 0 || rect.right < 0
        || rect.top > (win.innerHeight || 0)
        || rect.left > (win.innerWidth || 0);
    var disabled = !!(el.disabled || el.getAttribute('aria-disabled') === 'true');

    return JSON.stringify({
        count: 1,
        attached: attached,
        visible: visible,
        occluded: occluded,
        occluder: occluder,
        offscreen: offscreen,
        disabled: disabled,
        rect: { x: rect.left, y: rect.top, w: rect.width, h: rect.height }
    });
})()
"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementProbe {
    pub count: usize,
    pub attached: bool,
    pub visible: bool,
    pub occluded: bool,
    pub occluder: Option<String>,
    pub offscreen: bool,
    pub disabled: bool,
    pub frame_missing: bool,
    pub selector_error: Option<String>,
    pub rect: Option<ProbeRect>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ProbeRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl ProbeRect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// A candidate that passed verification, with the geometry the executor needs.
#[derive(Debug, Clone)]
pub struct Verified {
    pub result: VerificationResult,
    pub probe: ElementProbe,
}

pub struct Verifier<'a> {
    page: &'a dyn PageSurface,
}

impl<'a> Verifier<'a> {
    pub fn new(page: &'a dyn PageSurface) -> Self {
        Self { page }
    }

    /// Probe `candidate` inside the frame addressed by `frame_path`.
    /// `actionable` adds the enabled check (click/type/…; hover and focus
    /// tolerate disabled targets).
    pub async fn verify(
        &self,
        candidate: &Candidate,
        frame_path: &[String],
        actionable: bool,
    ) -> Result<Verified, SnapshotError> {
        let probe = self.probe(candidate, frame_path).await?;

        let unique = probe.count == 1;
        let ok = unique
            && probe.attached
            && probe.visible
            && !probe.occluded
            && (!actionable || !probe.disabled);

        let explanation = if probe.frame_missing {
            "target frame is no longer reachable".to_string()
        } else if let Some(err) = &probe.selector_error {
            format!("selector failed to evaluate: {}", err)
        } else if probe.count == 0 {
            "no element matches in the target frame".to_string()
        } else if probe.count > 1 {
            format!("{} elements match; refusing to act on an ambiguous selector", probe.count)
        } else if !probe.attached {
            "element is detached from the document".to_string()
        } else if !probe.visible {
            "element has no visible box".to_string()
        } else if probe.occluded {
            match &probe.occluder {
                Some(o) => format!("element center is covered by {}", o),
                None => "element center is covered by another element".to_string(),
            }
        } else if actionable && probe.disabled {
            "element is disabled".to_string()
        } else {
            "unique, visible, and actionable".to_string()
        };

        Ok(Verified {
            result: VerificationResult {
                ok,
                unique,
                visible: probe.visible,
                occluded: probe.occluded,
                disabled: probe.disabled,
                used_selector: candidate.selector.clone(),
                frame_path: frame_path.to_vec(),
                explanation,
            },
            probe,
        })
    }

    /// Raw probe without verdict assembly; the executor reuses this for
    /// geometry and post-action value reads.
    pub async fn probe(
        &self,
        candidate: &Candidate,
        frame_path: &[String],
    ) -> Result<ElementProbe, SnapshotError> {
        let args = serde_json::json!({
            "framePath": frame_path,
            "selector": candidate.selector,
            "kind": match candidate.kind {
                SelectorKind::Css => "css",
                SelectorKind::XPath => "xpath",
            },
        });
        let js = VERIFY_TEMPLATE.replace("__ARGS__", &args.to_string());
        let value = self.page.eval_json(&js).await?;
        serde_json::from_value(value)
            .map_err(|e| SnapshotError::Protocol(format!("bad verify probe: {}", e)))
    }
}
