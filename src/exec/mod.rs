//! Action execution glue: wait, scroll, dismiss, act, read back.
//!
//! Clicks and keystrokes go through the CDP input domain as trusted events
//! (frameworks ignore synthetic `.click()` calls); value reads, scrolling,
//! and select/check manipulation run as in-page scripts that resolve the
//! target frame the same way the verifier does.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::browser::{MouseEventKind, PageSurface};
use crate::core::errors::{PinpointError, SnapshotError};
use crate::core::types::{ActionKind, Candidate, Intent, SelectorKind, Waits};
use crate::locator::verify::{ElementProbe, Verifier};

/// One in-page operation against a resolved element. Mirrors the verifier's
/// frame resolution so both sides agree on what "the element" is.
const OP_TEMPLATE: &str = r#"
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

    function queryOne(doc, selector, kind) {
        if (kind === 'xpath') {
            var res = doc.evaluate(selector, doc, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
            return res.singleNodeValue;
        }
        return doc.querySelector(selector);
    }

    var doc = resolveDoc(args.framePath);
    if (!doc) { return JSON.stringify({ ok: false, error: 'frame gone' }); }
    var el = queryOne(doc, args.selector, args.kind);
    if (!el) { return JSON.stringify({ ok: false, error: 'element gone' }); }

    var fire = function (type) {
        el.dispatchEvent(new Event(type, { bubbles: true }));
    };

    switch (args.op) {
        case 'scroll':
            el.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
            return JSON.stringify({ ok: true });
        case 'focus':
            el.focus();
            return JSON.stringify({ ok: true });
        case 'read_value':
            return JSON.stringify({
                ok: true,
                value: ('value' in el) ? String(el.value) : (el.textContent || ''),
                checked: ('checked' in el) ? !!el.checked : null
            });
        case 'set_value':
            el.focus();
            el.value = args.value;
            fire('input');
            fire('change');
            return JSON.stringify({ ok: true, value: String(el.value) });
        case 'clear':
            el.focus();
            if ('value' in el) { el.value = ''; } else { el.textContent = ''; }
            fire('input');
            fire('change');
            return JSON.stringify({ ok: true });
        case 'select':
            var matched = null;
            for (var i = 0; i < el.options.length; i++) {
                var opt = el.options[i];
                if (opt.value === args.value || opt.label === args.value ||
                    (opt.textContent || '').trim() === args.value) {
                    matched = opt;
                    break;
                }
            }
            if (!matched) { return JSON.stringify({ ok: false, error: 'no such option' }); }
            el.value = matched.value;
            fire('input');
            fire('change');
            return JSON.stringify({ ok: true, value: String(el.value) });
        default:
            return JSON.stringify({ ok: false, error: 'unknown op ' + args.op });
    }
})()
"#;

/// Escape + known dismissal affordances, tried when the target is occluded.
const DISMISS_SCAN: &str = r#"
(function () {
    var labels = [];
    var candidates = document.querySelectorAll(
        '[aria-label*="close" i], [aria-label*="dismiss" i], ' +
        '.modal-close, .close-button, [data-dismiss], ' +
        '#onetrust-accept-btn-handler, [aria-label*="accept" i][class*="cookie" i]'
    );
    for (var i = 0; i < candidates.length && labels.length < 3; i++) {
        var el = candidates[i];
        var rect = el.getBoundingClientRect();
        if (rect.width > 0 && rect.height > 0) {
            el.click();
            labels.push(el.getAttribute('aria-label') || el.id || el.className || el.tagName);
        }
    }
    return JSON.stringify({ dismissed: labels });
})()
"#;

#[derive(Debug, Deserialize, Default)]
struct OpReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    checked: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DismissReply {
    #[serde(default)]
    dismissed: Vec<String>,
}

/// What one executed action reports back to the state machine.
#[derive(Debug, Clone, Default)]
pub struct ActOutcome {
    pub waits: Waits,
    pub dismissed_overlays: Vec<String>,
    /// Field value read back after type/select/clear actions.
    pub value_after: Option<String>,
}

pub struct Executor<'a> {
    page: &'a dyn PageSurface,
}

impl<'a> Executor<'a> {
    pub fn new(page: &'a dyn PageSurface) -> Self {
        Self { page }
    }

    async fn op(
        &self,
        candidate: &Candidate,
        frame_path: &[String],
        op: &str,
        value: Option<&str>,
    ) -> Result<OpReply, SnapshotError> {
        let args = serde_json::json!({
            "framePath": frame_path,
            "selector": candidate.selector,
            "kind": match candidate.kind {
                SelectorKind::Css => "css",
                SelectorKind::XPath => "xpath",
            },
            "op": op,
            "value": value,
        });
        let js = OP_TEMPLATE.replace("__ARGS__", &args.to_string());
        let reply = self.page.eval_json(&js).await?;
        let reply: OpReply = serde_json::from_value(reply)
            .map_err(|e| SnapshotError::Protocol(format!("bad op reply: {}", e)))?;
        if !reply.ok {
            debug!(op, error = reply.error.as_deref().unwrap_or("unknown"), "in-page op failed");
        }
        Ok(reply)
    }

    /// Scroll the element to the viewport center and return its fresh probe.
    /// An element that still has no geometry afterwards is off-screen.
    pub async fn bring_into_view(
        &self,
        candidate: &Candidate,
        frame_path: &[String],
    ) -> Result<ElementProbe, PinpointError> {
        let reply = self.op(candidate, frame_path, "scroll", None).await?;
        if !reply.ok {
            return Err(PinpointError::Stale);
        }
        // Layout settles before we measure the post-scroll center.
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let probe = Verifier::new(self.page).probe(candidate, frame_path).await?;
        if probe.count == 0 {
            return Err(PinpointError::Stale);
        }
        if probe.offscreen {
            return Err(PinpointError::OffScreen);
        }
        Ok(probe)
    }

    /// Try to clear whatever is covering the target: Escape first, then known
    /// dismissal affordances. Returns labels of anything dismissed.
    pub async fn dismiss_overlays(&self) -> Vec<String> {
        let mut dismissed = Vec::new();
        if self.page.press_key("Escape").await.is_err() {
            return dismissed;
        }
        match self.page.eval_json(DISMISS_SCAN).await {
            Ok(value) => {
                if let Ok(reply) = serde_json::from_value::<DismissReply>(value) {
                    dismissed = reply.dismissed;
                }
            }
            Err(e) => warn!("overlay scan failed: {}", e),
        }
        if !dismissed.is_empty() {
            debug!(?dismissed, "dismissed overlays");
        }
        dismissed
    }

    /// Execute the intent against an already-verified target. `probe` must be
    /// the fresh post-scroll probe so click coordinates are current.
    pub async fn perform(
        &self,
        intent: &Intent,
        candidate: &Candidate,
        frame_path: &[String],
        probe: &ElementProbe,
        backend_node_id: Option<i64>,
    ) -> Result<ActOutcome, PinpointError> {
        let center = probe.rect.map(|r| r.center()).ok_or(PinpointError::OffScreen)?;
        let mut outcome = ActOutcome::default();

        match intent.action {
            ActionKind::Click => {
                self.click_at(center).await?;
            }
            ActionKind::Hover => {
                self.page.dispatch_mouse(MouseEventKind::Move, center.0, center.1, 0).await?;
            }
            ActionKind::Focus => {
                let reply = self.op(candidate, frame_path, "focus", None).await?;
                if !reply.ok {
                    return Err(PinpointError::Stale);
                }
            }
            ActionKind::Type => {
                let text = intent.value.clone().unwrap_or_default();
                // Click to focus so keystrokes land in the field.
                self.click_at(center).await?;
                self.op(candidate, frame_path, "clear", None).await?;
                self.page.insert_text(&text).await?;
                outcome.value_after = self.read_value(candidate, frame_path).await;
            }
            ActionKind::Clear => {
                let reply = self.op(candidate, frame_path, "clear", None).await?;
                if !reply.ok {
                    return Err(PinpointError::Stale);
                }
                outcome.value_after = self.read_value(candidate, frame_path).await;
            }
            ActionKind::Select => {
                let wanted = intent.value.clone().unwrap_or_default();
                let reply = self.op(candidate, frame_path, "select", Some(&wanted)).await?;
                if !reply.ok {
                    return Err(PinpointError::NotFound {
                        phrase: format!("option '{}'", wanted),
                        attempted: vec![candidate.selector.clone()],
                    });
                }
                outcome.value_after = reply.value;
            }
            ActionKind::Check | ActionKind::Uncheck => {
                let want_checked = intent.action == ActionKind::Check;
                let state = self.op(candidate, frame_path, "read_value", None).await?;
                if state.checked != Some(want_checked) {
                    self.click_at(center).await?;
                }
                outcome.value_after = self
                    .op(candidate, frame_path, "read_value", None)
                    .await
                    .ok()
                    .and_then(|r| r.checked)
                    .map(|c| c.to_string());
            }
            ActionKind::Upload => {
                let backend = backend_node_id.ok_or(PinpointError::Stale)?;
                let files: Vec<String> = intent
                    .value
                    .as_deref()
                    .unwrap_or_default()
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                if files.is_empty() {
                    return Err(PinpointError::NotFound {
                        phrase: "no file paths in intent value".into(),
                        attempted: vec![candidate.selector.clone()],
                    });
                }
                self.page.set_file_input(backend, &files).await?;
            }
        }

        Ok(outcome)
    }

    async fn click_at(&self, (x, y): (f64, f64)) -> Result<(), SnapshotError> {
        self.page.dispatch_mouse(MouseEventKind::Move, x, y, 0).await?;
        self.page.dispatch_mouse(MouseEventKind::Down, x, y, 1).await?;
        self.page.dispatch_mouse(MouseEventKind::Up, x, y, 1).await?;
        Ok(())
    }

    async fn read_value(&self, candidate: &Candidate, frame_path: &[String]) -> Option<String> {
        self.op(candidate, frame_path, "read_value", None).await.ok().and_then(|r| r.value)
    }
}
