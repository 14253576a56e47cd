//! In-page instrumentation installed via `Page.addScriptToEvaluateOnNewDocument`.
//!
//! Everything lives under `window.__pinpoint` so repeated injection is a
//! no-op. Three concerns share one script:
//! * network-quiet tracking — fetch/XHR in-flight counters for the snapshot
//!   stability rule;
//! * layout-shift accumulation — a `PerformanceObserver` feeding the
//!   "no ≥1 px shift" half of the same rule;
//! * route hooks — `pushState`/`replaceState` wrappers plus `popstate` and
//!   `hashchange` listeners, queueing events for the session manager.

/// Installed once per document, before any page script runs.
pub const INSTRUMENTATION: &str = r#"
(function pinpointInstall() {
    'use strict';
    if (window.__pinpoint) { return; }

    var state = {
        pendingNet: 0,
        layoutShiftPx: 0,
        routeSeq: 0,
        routeEvents: [],
    };
    window.__pinpoint = state;

    function routeEvent(kind) {
        state.routeSeq += 1;
        state.routeEvents.push({
            kind: kind,
            url: String(location.href),
            seq: state.routeSeq,
            ts: Date.now(),
        });
        // Bound the queue; the engine drains it on every poll.
        if (state.routeEvents.length > 100) {
            state.routeEvents.splice(0, state.routeEvents.length - 100);
        }
    }

    // ── Network-quiet tracking ───────────────────────────────────────────────
    var origFetch = window.fetch;
    if (typeof origFetch === 'function') {
        window.fetch = function () {
            state.pendingNet += 1;
            return origFetch.apply(this, arguments).finally(function () {
                state.pendingNet = Math.max(0, state.pendingNet - 1);
            });
        };
    }

    var origSend = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.send = function () {
        var xhr = this;
        state.pendingNet += 1;
        var settle = function () {
            state.pendingNet = Math.max(0, state.pendingNet - 1);
            xhr.removeEventListener('loadend', settle);
        };
        xhr.addEventListener('loadend', settle);
        return origSend.apply(this, arguments);
    };

    // ── Layout-shift accumulation ────────────────────────────────────────────
    try {
        var po = new PerformanceObserver(function (list) {
            var entries = list.getEntries();
            for (var i = 0; i < entries.length; i++) {
                if (!entries[i].hadRecentInput) {
                    // score * viewport height approximates shifted pixels
                    state.layoutShiftPx += entries[i].value * (window.innerHeight || 1);
                }
            }
        });
        po.observe({ type: 'layout-shift', buffered: false });
    } catch (e) {
        // layout-shift entries are Chromium-only; counters stay at zero elsewhere
    }

    // ── Route hooks ──────────────────────────────────────────────────────────
    var origPush = history.pushState;
    history.pushState = function () {
        var r = origPush.apply(this, arguments);
        routeEvent('pushState');
        return r;
    };
    var origReplace = history.replaceState;
    history.replaceState = function () {
        var r = origReplace.apply(this, arguments);
        routeEvent('replaceState');
        return r;
    };
    window.addEventListener('popstate', function () { routeEvent('popstate'); });
    window.addEventListener('hashchange', function () { routeEvent('hashchange'); });
})();
"#;

/// Sampled by the stability waiter. Returns counters plus a monotonic node
/// count; works even when the instrumentation was never installed (navigated
/// before attach) by reporting `instrumented: false`.
pub const STABILITY_PROBE: &str = r#"
(function () {
    var s = window.__pinpoint;
    var shift = s ? s.layoutShiftPx : 0;
    if (s) { s.layoutShiftPx = 0; }
    return JSON.stringify({
        nodes: document.getElementsByTagName('*').length,
        pendingNet: s ? s.pendingNet : 0,
        layoutShiftPx: shift,
        instrumented: !!s,
        url: String(location.href),
    });
})()
"#;

/// Drains queued route events for the session manager.
pub const DRAIN_ROUTE_EVENTS: &str = r#"
(function () {
    var s = window.__pinpoint;
    if (!s) { return JSON.stringify({ instrumented: false, events: [], url: String(location.href) }); }
    var events = s.routeEvents.splice(0, s.routeEvents.length);
    return JSON.stringify({ instrumented: true, events: events, url: String(location.href) });
})()
"#;

/// Cheap structural checksum of the top document — the session manager's
/// rolling DOM hash. djb2 over tag/id/class of every element; full per-frame
/// hashing happens only at capture time.
pub const ROLLING_HASH: &str = r#"
(function () {
    var h = 5381;
    var els = document.getElementsByTagName('*');
    for (var i = 0; i < els.length; i++) {
        var el = els[i];
        var s = el.tagName + '#' + (el.id || '') + '.' +
            (typeof el.className === 'string' ? el.className : '');
        for (var j = 0; j < s.length; j++) {
            h = ((h << 5) + h + s.charCodeAt(j)) | 0;
        }
    }
    return JSON.stringify({
        hash: String(h >>> 0),
        nodes: els.length,
        url: String(location.href),
    });
})()
"#;

/// Viewport probe for snapshot metadata.
pub const VIEWPORT_PROBE: &str = r#"
(function () {
    return JSON.stringify({
        width: window.innerWidth || 0,
        height: window.innerHeight || 0,
    });
})()
"#;
