//! Native browser management and the CDP page surface.
//!
//! This module is the single source of truth for:
//! * Finding a usable Chromium-family executable (env override → PATH →
//!   well-known install paths).
//! * Launching a hardened headless session, or attaching to a running
//!   browser via its DevTools websocket.
//! * The [`PageSurface`] trait — the narrow, typed slice of CDP the engine
//!   consumes. Snapshot capture, verification, and action dispatch all go
//!   through it, so tests can substitute a scripted fake page.

pub mod scripts;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::accessibility::GetFullAxTreeParams;
use chromiumoxide::cdp::browser_protocol::dom::{
    GetFlattenedDocumentParams, Node, SetFileInputFilesParams,
};
use chromiumoxide::cdp::browser_protocol::dom_snapshot::CaptureSnapshotParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::errors::SnapshotError;

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (set this in Docker/CI).
/// 2. PATH scan via `which` — finds package-manager installs everywhere.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    let candidates = [
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
        "brave-browser",
        "brave",
    ];
    for exe in candidates {
        if let Ok(full) = which::which(exe) {
            return Some(full.to_string_lossy().to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        let well_known = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in well_known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let well_known = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in well_known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let well_known = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in well_known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Headless launch / attach ─────────────────────────────────────────────────

/// Build a `BrowserConfig` for headless operation. Flags chosen for container
/// compatibility (no GPU, no sandbox, shared-memory hints) and quiet startup.
pub fn build_headless_config(exe: &str, width: u32, height: u32) -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))
}

/// A launched or attached browser plus the event loop driving its websocket.
pub struct BrowserHandle {
    pub browser: Browser,
    event_task: JoinHandle<()>,
}

impl BrowserHandle {
    /// Launch a fresh headless browser using the discovered executable.
    pub async fn launch_headless(width: u32, height: u32) -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            anyhow!(
                "no browser found — install Chrome or Chromium, or set CHROME_EXECUTABLE"
            )
        })?;
        info!("launching headless browser: {}", exe);

        let config = build_headless_config(&exe, width, height)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("failed to launch browser ({}): {}", exe, e))?;

        let event_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self { browser, event_task })
    }

    /// Attach to an already-running browser via its DevTools websocket URL
    /// (`ws://127.0.0.1:9222/devtools/browser/...`). Retries with backoff:
    /// the common caller races a browser that is still binding its port.
    pub async fn attach(ws_url: &str) -> Result<Self> {
        info!("attaching to running browser at {}", ws_url);
        let policy = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        let (browser, mut handler) = backoff::future::retry(policy, || async {
            Browser::connect(ws_url).await.map_err(|e| {
                warn!("attach attempt failed: {}", e);
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| anyhow!("failed to attach to {}: {}", ws_url, e))?;

        let event_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self { browser, event_task })
    }

    /// Open a page with the engine instrumentation pre-installed, then
    /// navigate. The init script must be registered before the first
    /// navigation so route hooks see the whole session.
    pub async fn open_page(&self, url: &str) -> Result<CdpPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open page: {}", e))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            scripts::INSTRUMENTATION,
        ))
        .await
        .map_err(|e| anyhow!("failed to install instrumentation: {}", e))?;

        page.goto(url).await.map_err(|e| anyhow!("navigation to {} failed: {}", url, e))?;
        Ok(CdpPage::new(page))
    }

    /// Best-effort shutdown. Close errors are logged, never surfaced.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close error (non-fatal): {}", e);
        }
        self.event_task.abort();
    }
}

// ── Raw CDP shapes consumed by the snapshot builder ──────────────────────────

/// One DOM node as reported by `DOM.getFlattenedDocument`, rebuilt into an
/// arena. Children, shadow roots, and same-origin content documents are
/// recorded as indices into the same arena — no back-pointers.
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub node_id: i64,
    pub backend_node_id: i64,
    /// 1 = element, 3 = text, 9 = document, 11 = fragment (shadow root).
    pub node_type: i64,
    pub node_name: String,
    pub node_value: String,
    /// Flat `[name, value, name, value, …]` exactly as CDP reports it.
    pub attributes: Vec<String>,
    pub children: Vec<usize>,
    pub shadow_roots: Vec<usize>,
    pub content_document: Option<usize>,
    pub is_shadow_root: bool,
    pub frame_id: Option<String>,
    pub document_url: Option<String>,
}

/// One AX node: role/name resolved to plain strings.
#[derive(Debug, Clone)]
pub struct RawAxNode {
    pub backend_node_id: i64,
    pub role: Option<String>,
    pub name: Option<String>,
    pub ignored: bool,
}

/// Geometry and paint-relevant computed styles for one laid-out node.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLayout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f32,
}

/// The narrow CDP surface the engine depends on. One implementation wraps a
/// live `chromiumoxide::Page`; tests provide scripted fakes.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Flattened, pierced DOM arena for the whole page.
    async fn document_tree(&self) -> Result<Vec<RawNode>, SnapshotError>;

    /// Full accessibility tree keyed by backend node id.
    async fn ax_tree(&self) -> Result<Vec<RawAxNode>, SnapshotError>;

    /// Layout geometry + display/visibility/opacity per backend node id.
    async fn layout_info(&self) -> Result<HashMap<i64, RawLayout>, SnapshotError>;

    /// Evaluate a script that returns `JSON.stringify(...)` output and parse it.
    async fn eval_json(&self, js: &str) -> Result<serde_json::Value, SnapshotError>;

    async fn current_url(&self) -> Result<String, SnapshotError>;

    async fn dispatch_mouse(
        &self,
        kind: MouseEventKind,
        x: f64,
        y: f64,
        click_count: i64,
    ) -> Result<(), SnapshotError>;

    /// Insert text into the focused element (CDP `Input.insertText`).
    async fn insert_text(&self, text: &str) -> Result<(), SnapshotError>;

    /// Press and release a named key (`Escape`, `Tab`, …) on the focused node.
    async fn press_key(&self, key: &str) -> Result<(), SnapshotError>;

    /// Attach local files to a file input, addressed by backend node id.
    async fn set_file_input(&self, backend_node_id: i64, files: &[String])
        -> Result<(), SnapshotError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    Down,
    Up,
}

// ── Live implementation over chromiumoxide ───────────────────────────────────

pub struct CdpPage {
    page: Page,
}

fn map_cdp_err(e: chromiumoxide::error::CdpError) -> SnapshotError {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("websocket")
        || lower.contains("channel")
        || lower.contains("closed")
        || lower.contains("disconnect")
    {
        SnapshotError::SessionLost(msg)
    } else {
        SnapshotError::Protocol(msg)
    }
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn inner(&self) -> &Page {
        &self.page
    }

    /// Register one CDP `Node` (and whatever the protocol chose to nest inside
    /// it) into the arena, returning its index. Deduplicated by node id: the
    /// flattened reply sometimes carries both a flat entry and a nested stub
    /// for the same node.
    fn register_node(
        node: &Node,
        arena: &mut Vec<RawNode>,
        by_node_id: &mut HashMap<i64, usize>,
    ) -> usize {
        let node_id = *node.node_id.inner();
        if let Some(&existing) = by_node_id.get(&node_id) {
            return existing;
        }

        let index = arena.len();
        arena.push(RawNode {
            node_id,
            backend_node_id: *node.backend_node_id.inner(),
            node_type: node.node_type,
            node_name: node.node_name.clone(),
            node_value: node.node_value.clone(),
            attributes: node.attributes.clone().unwrap_or_default(),
            children: Vec::new(),
            shadow_roots: Vec::new(),
            content_document: None,
            is_shadow_root: node.shadow_root_type.is_some(),
            frame_id: node.frame_id.as_ref().map(|f| f.inner().to_string()),
            document_url: node.document_url.clone(),
        });
        by_node_id.insert(node_id, index);

        if let Some(children) = &node.children {
            for child in children {
                let child_index = Self::register_node(child, arena, by_node_id);
                arena[index].children.push(child_index);
            }
        }
        if let Some(roots) = &node.shadow_roots {
            for root in roots {
                let root_index = Self::register_node(root, arena, by_node_id);
                arena[index].shadow_roots.push(root_index);
            }
        }
        if let Some(doc) = &node.content_document {
            let doc_index = Self::register_node(doc, arena, by_node_id);
            arena[index].content_document = Some(doc_index);
        }

        index
    }
}

#[async_trait]
impl PageSurface for CdpPage {
    async fn document_tree(&self) -> Result<Vec<RawNode>, SnapshotError> {
        let params = GetFlattenedDocumentParams::builder().depth(-1).pierce(true).build();
        let resp = self.page.execute(params).await.map_err(map_cdp_err)?;
        let nodes = &resp.result.nodes;

        // Pass 1: register every node. The flat array is in document order, so
        // sibling order survives the parent-id linkage below.
        let mut arena: Vec<RawNode> = Vec::with_capacity(nodes.len());
        let mut by_node_id: HashMap<i64, usize> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            Self::register_node(node, &mut arena, &mut by_node_id);
        }

        // Pass 2: link flat entries to their parents. Nested replies already
        // linked theirs in pass 1; skip anything that has a slot taken.
        let mut already_linked: std::collections::HashSet<usize> = std::collections::HashSet::new();
        for (i, raw) in arena.iter().enumerate() {
            for &c in &raw.children {
                already_linked.insert(c);
            }
            for &s in &raw.shadow_roots {
                already_linked.insert(s);
            }
            if let Some(d) = raw.content_document {
                already_linked.insert(d);
            }
            let _ = i;
        }
        for node in nodes {
            let node_id = *node.node_id.inner();
            let Some(&index) = by_node_id.get(&node_id) else { continue };
            if already_linked.contains(&index) {
                continue;
            }
            let Some(parent_id) = node.parent_id.as_ref() else { continue };
            let Some(&parent_index) = by_node_id.get(parent_id.inner()) else { continue };

            if arena[index].node_type == 9 {
                arena[parent_index].content_document = Some(index);
            } else if arena[index].is_shadow_root {
                arena[parent_index].shadow_roots.push(index);
            } else {
                arena[parent_index].children.push(index);
            }
        }

        debug!(nodes = arena.len(), "captured DOM arena");
        Ok(arena)
    }

    async fn ax_tree(&self) -> Result<Vec<RawAxNode>, SnapshotError> {
        let resp = self
            .page
            .execute(GetFullAxTreeParams::builder().build())
            .await
            .map_err(map_cdp_err)?;

        let mut out = Vec::with_capacity(resp.result.nodes.len());
        for node in &resp.result.nodes {
            let Some(backend) = node.backend_dom_node_id.as_ref() else {
                continue;
            };
            let role = node
                .role
                .as_ref()
                .and_then(|v| v.value.as_ref())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let name = node
                .name
                .as_ref()
                .and_then(|v| v.value.as_ref())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .filter(|s| !s.trim().is_empty());
            out.push(RawAxNode {
                backend_node_id: *backend.inner(),
                role,
                name,
                ignored: node.ignored,
            });
        }
        Ok(out)
    }

    async fn layout_info(&self) -> Result<HashMap<i64, RawLayout>, SnapshotError> {
        let mut params = CaptureSnapshotParams::new(vec![
            "display".to_string(),
            "visibility".to_string(),
            "opacity".to_string(),
        ]);
        params.include_dom_rects = Some(true);
        let resp = self.page.execute(params).await.map_err(map_cdp_err)?;

        let strings = &resp.result.strings;
        let lookup = |idx: i64| -> &str {
            if idx >= 0 { strings.get(idx as usize).map(|s| s.as_str()).unwrap_or("") } else { "" }
        };

        let mut out = HashMap::new();
        for doc in &resp.result.documents {
            let backend_ids = match &doc.nodes.backend_node_id {
                Some(ids) => ids,
                None => continue,
            };
            let layout = &doc.layout;
            let node_index = &layout.node_index;
            for (i, ni) in node_index.iter().enumerate() {
                let Some(backend) = backend_ids.get(*ni as usize) else {
                    continue;
                };
                let mut entry = RawLayout { opacity: 1.0, ..Default::default() };

                if let Some(bounds) = layout.bounds.get(i) {
                    let rect = bounds.inner();
                    if rect.len() >= 4 {
                        entry.x = rect[0];
                        entry.y = rect[1];
                        entry.width = rect[2];
                        entry.height = rect[3];
                    }
                }
                if let Some(styles) = layout.styles.get(i) {
                    let style_idx = styles.inner();
                    let display = style_idx.first().map(|s| lookup(*s.inner())).unwrap_or("");
                    let visibility = style_idx.get(1).map(|s| lookup(*s.inner())).unwrap_or("");
                    let opacity = style_idx.get(2).map(|s| lookup(*s.inner())).unwrap_or("1");
                    entry.display_none = display == "none";
                    entry.visibility_hidden = visibility == "hidden" || visibility == "collapse";
                    entry.opacity = opacity.parse().unwrap_or(1.0);
                }
                out.insert(*backend.inner(), entry);
            }
        }
        Ok(out)
    }

    async fn eval_json(&self, js: &str) -> Result<serde_json::Value, SnapshotError> {
        let result = self.page.evaluate(js).await.map_err(map_cdp_err)?;
        let value = result
            .value()
            .ok_or_else(|| SnapshotError::Protocol("evaluate returned no value".into()))?;
        match value.as_str() {
            Some(s) => serde_json::from_str(s)
                .map_err(|e| SnapshotError::Protocol(format!("bad probe JSON: {}", e))),
            // Scripts that return objects directly still come through typed.
            None => Ok(value.clone()),
        }
    }

    async fn current_url(&self) -> Result<String, SnapshotError> {
        let url = self.page.url().await.map_err(map_cdp_err)?;
        url.ok_or_else(|| SnapshotError::Protocol("page has no URL".into()))
    }

    async fn dispatch_mouse(
        &self,
        kind: MouseEventKind,
        x: f64,
        y: f64,
        click_count: i64,
    ) -> Result<(), SnapshotError> {
        let event_type = match kind {
            MouseEventKind::Move => DispatchMouseEventType::MouseMoved,
            MouseEventKind::Down => DispatchMouseEventType::MousePressed,
            MouseEventKind::Up => DispatchMouseEventType::MouseReleased,
        };
        let mut params = DispatchMouseEventParams::new(event_type, x, y);
        if !matches!(kind, MouseEventKind::Move) {
            params.button = Some(MouseButton::Left);
            params.click_count = Some(click_count);
        }
        self.page.execute(params).await.map_err(map_cdp_err)?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), SnapshotError> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(map_cdp_err)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), SnapshotError> {
        let mut down = DispatchKeyEventParams::new(DispatchKeyEventType::KeyDown);
        down.key = Some(key.to_string());
        self.page.execute(down).await.map_err(map_cdp_err)?;

        let mut up = DispatchKeyEventParams::new(DispatchKeyEventType::KeyUp);
        up.key = Some(key.to_string());
        self.page.execute(up).await.map_err(map_cdp_err)?;
        // Small settle so key handlers run before the next CDP call.
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(())
    }

    async fn set_file_input(
        &self,
        backend_node_id: i64,
        files: &[String],
    ) -> Result<(), SnapshotError> {
        let mut params = SetFileInputFilesParams::new(files.to_vec());
        params.backend_node_id =
            Some(chromiumoxide::cdp::browser_protocol::dom::BackendNodeId::new(backend_node_id));
        self.page.execute(params).await.map_err(map_cdp_err)?;
        Ok(())
    }
}

/// Convenience used by the binary: launch or attach based on an optional
/// websocket URL, mirroring how operators run the engine in CI vs locally.
pub async fn connect(ws_url: Option<&str>, width: u32, height: u32) -> Result<BrowserHandle> {
    match ws_url {
        Some(ws) => BrowserHandle::attach(ws).await.context("attach failed"),
        None => BrowserHandle::launch_headless(width, height).await.context("launch failed"),
    }
}
