//! Scripted in-memory page for pipeline tests.
//!
//! Implements [`PageSurface`] over a hand-built DOM arena, so the full
//! snapshot → embed → rank → synthesize → verify → act path runs without a
//! browser. Verification is simulated by statically evaluating our selector
//! family against the built frames; actions are recorded for assertion.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use pinpoint::browser::{MouseEventKind, PageSurface, RawAxNode, RawLayout, RawNode};
use pinpoint::core::errors::SnapshotError;
use pinpoint::core::types::FrameSnapshot;
use pinpoint::locator::selector_matches_element;
use pinpoint::snapshot::build::{build_frames, SnapshotInputs};
use pinpoint::PinpointConfig;

/// Fast-settling config for tests. These suites run on the fallback
/// embedder, whose vectors are deterministic but semantics-free (cosine ≈
/// neutral for everything), so the heuristic weight is raised to parity to
/// keep ordering decided by structure rather than hash noise. Semantic
/// dominance (α ≥ max(β, γ)) still holds.
pub fn test_config() -> PinpointConfig {
    let mut cfg = PinpointConfig {
        stable_window_ms: 40,
        capture_timeout_ms: 3_000,
        ..PinpointConfig::default()
    };
    cfg.weights.beta = 1.0;
    cfg
}

// ── Declarative DOM builder ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct N {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<N>,
    pub hidden: bool,
    /// Same-origin iframe content: (url, body children).
    pub iframe_doc: Option<(String, Vec<N>)>,
}

pub fn n(tag: &str, attrs: &[(&str, &str)]) -> N {
    N {
        tag: tag.to_string(),
        attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        text: None,
        children: Vec::new(),
        hidden: false,
        iframe_doc: None,
    }
}

impl N {
    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn children(mut self, children: Vec<N>) -> Self {
        self.children = children;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn iframe(mut self, url: &str, body: Vec<N>) -> Self {
        self.iframe_doc = Some((url.to_string(), body));
        self
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

struct ArenaBuilder {
    arena: Vec<RawNode>,
    ax: Vec<RawAxNode>,
    layout: HashMap<i64, RawLayout>,
    next_id: i64,
    next_y: f64,
}

impl ArenaBuilder {
    fn alloc(&mut self, node: RawNode) -> usize {
        self.arena.push(node);
        self.arena.len() - 1
    }

    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_document(&mut self, url: &str, body_children: &[N]) -> usize {
        let doc_id = self.id();
        let doc = self.alloc(RawNode {
            node_id: doc_id,
            backend_node_id: doc_id,
            node_type: 9,
            node_name: "#document".into(),
            document_url: Some(url.to_string()),
            frame_id: Some(format!("frame-{}", doc_id)),
            ..Default::default()
        });

        let html_id = self.id();
        let html = self.alloc(RawNode {
            node_id: html_id,
            backend_node_id: html_id,
            node_type: 1,
            node_name: "HTML".into(),
            ..Default::default()
        });
        let body_id = self.id();
        let body = self.alloc(RawNode {
            node_id: body_id,
            backend_node_id: body_id,
            node_type: 1,
            node_name: "BODY".into(),
            ..Default::default()
        });
        self.layout.insert(html_id, full_box(0.0, 0.0, 1280.0, 2000.0));
        self.layout.insert(body_id, full_box(0.0, 0.0, 1280.0, 2000.0));

        let mut kids = Vec::new();
        for child in body_children {
            kids.push(self.add_element(child));
        }
        self.arena[body].children = kids;
        self.arena[html].children = vec![body];
        self.arena[doc].children = vec![html];
        doc
    }

    fn add_element(&mut self, node: &N) -> usize {
        let id = self.id();
        let index = self.alloc(RawNode {
            node_id: id,
            backend_node_id: id,
            node_type: 1,
            node_name: node.tag.to_uppercase(),
            attributes: node
                .attrs
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            ..Default::default()
        });

        if !node.hidden {
            let y = self.next_y;
            self.next_y += 40.0;
            self.layout.insert(id, full_box(10.0, y, 200.0, 30.0));
        }

        // Accessibility entry mirroring what Chromium computes.
        let role = node.attr("role").map(str::to_string).or_else(|| implicit_role(&node.tag));
        let name = node
            .attr("aria-label")
            .map(str::to_string)
            .or_else(|| node.text.clone())
            .or_else(|| node.attr("placeholder").map(str::to_string));
        if role.is_some() || name.is_some() {
            self.ax.push(RawAxNode { backend_node_id: id, role, name, ignored: false });
        }

        let mut kids = Vec::new();
        if let Some(text) = &node.text {
            let tid = self.id();
            kids.push(self.alloc(RawNode {
                node_id: tid,
                backend_node_id: tid,
                node_type: 3,
                node_name: "#text".into(),
                node_value: text.clone(),
                ..Default::default()
            }));
        }
        for child in &node.children {
            kids.push(self.add_element(child));
        }
        self.arena[index].children = kids;

        if let Some((url, body)) = &node.iframe_doc {
            let doc = self.add_document(url, body);
            self.arena[index].content_document = Some(doc);
        }
        index
    }
}

fn full_box(x: f64, y: f64, w: f64, h: f64) -> RawLayout {
    RawLayout {
        x,
        y,
        width: w,
        height: h,
        display_none: false,
        visibility_hidden: false,
        opacity: 1.0,
    }
}

fn implicit_role(tag: &str) -> Option<String> {
    match tag {
        "button" => Some("button".into()),
        "a" => Some("link".into()),
        "input" => Some("textbox".into()),
        "select" => Some("combobox".into()),
        _ => None,
    }
}

// ── The scripted page ────────────────────────────────────────────────────────

struct Dom {
    arena: Vec<RawNode>,
    ax: Vec<RawAxNode>,
    layout: HashMap<i64, RawLayout>,
    frames: Vec<FrameSnapshot>,
    url: String,
    rolling_hash: String,
    node_count: u64,
}

#[derive(Default)]
pub struct Recorded {
    pub mouse: Vec<(String, f64, f64)>,
    pub typed: Vec<String>,
    pub keys: Vec<String>,
    pub files: Vec<(i64, Vec<String>)>,
    /// Snapshot captures observed, one `document_tree` fetch each.
    pub captures: usize,
}

pub struct FakePage {
    dom: Mutex<Dom>,
    route_events: Mutex<Vec<serde_json::Value>>,
    /// Element ids the fake reports as occluded until an Escape is pressed.
    occluded_until_escape: Mutex<HashSet<String>>,
    pub recorded: Mutex<Recorded>,
}

impl FakePage {
    pub fn new(url: &str, body: Vec<N>) -> Self {
        let page = Self {
            dom: Mutex::new(Dom {
                arena: Vec::new(),
                ax: Vec::new(),
                layout: HashMap::new(),
                frames: Vec::new(),
                url: url.to_string(),
                rolling_hash: String::new(),
                node_count: 0,
            }),
            route_events: Mutex::new(Vec::new()),
            occluded_until_escape: Mutex::new(HashSet::new()),
            recorded: Mutex::new(Recorded::default()),
        };
        page.set_dom(url, body);
        page
    }

    /// Replace the whole DOM (heal and SPA tests). Bumps the rolling hash.
    pub fn set_dom(&self, url: &str, body: Vec<N>) {
        let mut b = ArenaBuilder {
            arena: Vec::new(),
            ax: Vec::new(),
            layout: HashMap::new(),
            next_id: 0,
            next_y: 50.0,
        };
        b.add_document(url, &body);

        let inputs = SnapshotInputs {
            arena: b.arena.clone(),
            ax: b.ax.clone(),
            layout: b.layout.clone(),
            top_url: url.to_string(),
        };
        let frames = build_frames(&inputs);
        let node_count = frames.iter().map(|f| f.elements.len() as u64).sum();

        let mut dom = self.dom.lock().unwrap();
        let generation = dom.rolling_hash.len() + 1;
        *dom = Dom {
            arena: b.arena,
            ax: b.ax,
            layout: b.layout,
            frames,
            url: url.to_string(),
            rolling_hash: "g".repeat(generation),
            node_count,
        };
    }

    /// Replace the DOM without disturbing the rolling hash or node count —
    /// simulates a mutation landing in the window between the reindex poll
    /// and verification, which is exactly when selectors go stale.
    pub fn set_dom_quiet(&self, url: &str, body: Vec<N>) {
        let (old_hash, old_count) = {
            let dom = self.dom.lock().unwrap();
            (dom.rolling_hash.clone(), dom.node_count)
        };
        self.set_dom(url, body);
        let mut dom = self.dom.lock().unwrap();
        dom.rolling_hash = old_hash;
        dom.node_count = old_count;
    }

    /// Simulate an SPA route change (`history.pushState`).
    pub fn push_state(&self, url: &str) {
        let mut dom = self.dom.lock().unwrap();
        dom.url = url.to_string();
        drop(dom);
        self.route_events.lock().unwrap().push(json!({
            "kind": "pushState",
            "url": url,
            "seq": 1,
            "ts": 0,
        }));
    }

    /// Report the element with this id as covered until Escape is pressed.
    pub fn occlude_id(&self, id: &str) {
        self.occluded_until_escape.lock().unwrap().insert(id.to_string());
    }

    pub fn frames(&self) -> Vec<FrameSnapshot> {
        self.dom.lock().unwrap().frames.clone()
    }

    fn verify_reply(&self, args: &serde_json::Value) -> serde_json::Value {
        let selector = args["selector"].as_str().unwrap_or_default();
        let frame_path: Vec<String> = args["framePath"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let dom = self.dom.lock().unwrap();
        let Some(frame) = dom
            .frames
            .iter()
            .find(|f| f.elements.first().map(|e| e.frame_path == frame_path).unwrap_or(frame_path.is_empty()))
        else {
            return json!({ "frameMissing": true, "count": 0 });
        };

        let matches: Vec<usize> = (0..frame.elements.len())
            .filter(|&i| selector_matches_element(selector, frame, i))
            .collect();
        if matches.len() != 1 {
            return json!({ "count": matches.len() });
        }
        let desc = &frame.elements[matches[0]];
        let occluded = desc
            .id()
            .map(|id| self.occluded_until_escape.lock().unwrap().contains(id))
            .unwrap_or(false);
        let rect = desc.bounding_box.unwrap_or(pinpoint::core::types::BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        });
        json!({
            "count": 1,
            "attached": true,
            "visible": desc.visible,
            "occluded": occluded,
            "offscreen": false,
            "disabled": desc.is_disabled(),
            "rect": { "x": rect.x, "y": rect.y, "w": rect.width, "h": rect.height },
        })
    }

    fn op_reply(&self, args: &serde_json::Value) -> serde_json::Value {
        match args["op"].as_str().unwrap_or_default() {
            "read_value" => {
                let typed = self.recorded.lock().unwrap().typed.join("");
                json!({ "ok": true, "value": typed, "checked": false })
            }
            "select" | "set_value" => json!({ "ok": true, "value": args["value"] }),
            _ => json!({ "ok": true }),
        }
    }
}

fn parse_embedded_args(js: &str) -> Option<serde_json::Value> {
    let start = js.find("var args = ")? + "var args = ".len();
    let end = js[start..].find(";\n")? + start;
    serde_json::from_str(&js[start..end]).ok()
}

#[async_trait]
impl PageSurface for FakePage {
    async fn document_tree(&self) -> Result<Vec<RawNode>, SnapshotError> {
        self.recorded.lock().unwrap().captures += 1;
        Ok(self.dom.lock().unwrap().arena.clone())
    }

    async fn ax_tree(&self) -> Result<Vec<RawAxNode>, SnapshotError> {
        Ok(self.dom.lock().unwrap().ax.clone())
    }

    async fn layout_info(&self) -> Result<HashMap<i64, RawLayout>, SnapshotError> {
        Ok(self.dom.lock().unwrap().layout.clone())
    }

    async fn eval_json(&self, js: &str) -> Result<serde_json::Value, SnapshotError> {
        // Stability probe
        if js.contains("layoutShiftPx") && js.contains("pendingNet") {
            let dom = self.dom.lock().unwrap();
            return Ok(json!({
                "nodes": dom.node_count,
                "pendingNet": 0,
                "layoutShiftPx": 0.0,
                "instrumented": true,
                "url": dom.url,
            }));
        }
        // Route drain
        if js.contains("routeEvents.splice") {
            let dom_url = self.dom.lock().unwrap().url.clone();
            let events: Vec<serde_json::Value> =
                self.route_events.lock().unwrap().drain(..).collect();
            return Ok(json!({ "instrumented": true, "events": events, "url": dom_url }));
        }
        // Rolling hash
        if js.contains("5381") {
            let dom = self.dom.lock().unwrap();
            return Ok(json!({ "hash": dom.rolling_hash, "nodes": dom.node_count, "url": dom.url }));
        }
        // Viewport
        if js.contains("innerWidth") && js.contains("innerHeight") && !js.contains("var args") {
            return Ok(json!({ "width": 1280, "height": 720 }));
        }
        // Overlay dismissal scan
        if js.contains("onetrust") {
            return Ok(json!({ "dismissed": ["cookie-banner"] }));
        }
        // Verifier / executor ops carry embedded args.
        if let Some(args) = parse_embedded_args(js) {
            if args.get("op").is_some() {
                return Ok(self.op_reply(&args));
            }
            return Ok(self.verify_reply(&args));
        }
        let preview: String = js.chars().take(80).collect();
        Err(SnapshotError::Protocol(format!("unscripted eval: {}", preview)))
    }

    async fn current_url(&self) -> Result<String, SnapshotError> {
        Ok(self.dom.lock().unwrap().url.clone())
    }

    async fn dispatch_mouse(
        &self,
        kind: MouseEventKind,
        x: f64,
        y: f64,
        _click_count: i64,
    ) -> Result<(), SnapshotError> {
        let label = match kind {
            MouseEventKind::Move => "move",
            MouseEventKind::Down => "down",
            MouseEventKind::Up => "up",
        };
        self.recorded.lock().unwrap().mouse.push((label.to_string(), x, y));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), SnapshotError> {
        self.recorded.lock().unwrap().typed.push(text.to_string());
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), SnapshotError> {
        self.recorded.lock().unwrap().keys.push(key.to_string());
        if key == "Escape" {
            self.occluded_until_escape.lock().unwrap().clear();
        }
        Ok(())
    }

    async fn set_file_input(
        &self,
        backend_node_id: i64,
        files: &[String],
    ) -> Result<(), SnapshotError> {
        self.recorded.lock().unwrap().files.push((backend_node_id, files.to_vec()));
        Ok(())
    }
}

/// Shorthand: `button` with a label.
pub fn button(label: &str, attrs: &[(&str, &str)]) -> N {
    n("button", attrs).text(label)
}

/// Shorthand: `input` with a type and id.
pub fn input(input_type: &str, id: &str) -> N {
    n("input", &[("type", input_type), ("id", id)])
}
