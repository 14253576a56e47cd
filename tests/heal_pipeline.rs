//! Self-heal behavior: stale elements recover through a fresh snapshot, the
//! winning selector is promoted, attempts stay bounded, and occlusions get a
//! dismissal round.

mod support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pinpoint::core::types::{ActionKind, Intent};
use pinpoint::{ActOptions, CoreContext, PageSession};
use support::{button, n, test_config, FakePage};

fn click(phrase: &str) -> Intent {
    Intent { action: ActionKind::Click, target_phrase: phrase.to_string(), value: None }
}

#[tokio::test]
async fn click_records_promotion_on_success() {
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![button("Save changes", &[("id", "save")])],
    ));
    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    let result = session.act(&click("save changes"), ActOptions::default(), &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.retries, 0);

    // The trusted click went through CDP input, not a synthetic .click().
    let recorded = page.recorded.lock().unwrap();
    let kinds: Vec<&str> = recorded.mouse.iter().map(|(k, _, _)| k.as_str()).collect();
    assert_eq!(kinds, vec!["move", "down", "up"]);
    drop(recorded);

    let winners = ctx.promotion_store().lookup(
        "https://app.example",
        "save changes",
        "semantic",
        0.0,
    );
    assert!(
        winners.iter().any(|w| w.success == 1),
        "winning selector should be promoted: {winners:?}"
    );
}

#[tokio::test]
async fn stale_element_heals_with_one_retry() {
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![button("Submit order", &[("id", "submit-order")])],
    ));
    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    // Warm the snapshot, then swap the button for an equivalent one (same
    // role and accessible name, different id and position) without tripping
    // the reindex poll. Every selector derived from the stale snapshot now
    // fails: the id is gone, bare `button` is ambiguous, the old text and
    // position resolve to a hidden spinner.
    let warmup = session
        .query("submit order", pinpoint::QueryOptions::default(), &CancellationToken::new())
        .await;
    assert_eq!(warmup.selector.as_deref(), Some("//*[@id=\"submit-order\"]"));
    page.set_dom_quiet(
        "https://app.example/",
        vec![
            button("Loading…", &[]).hidden(),
            n("button", &[("id", "submit-order-btn"), ("aria-label", "Submit order")]).text("Submit"),
        ],
    );

    let result = session.act(&click("submit order"), ActOptions::default(), &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.retries, 1, "one heal round re-snapshots and recovers");
    assert_eq!(
        result.used_locator.map(|c| c.selector),
        Some(r#"[aria-label="Submit order"]"#.to_string())
    );

    // The recovered selector is remembered for next time.
    let winners = ctx.promotion_store().lookup(
        "https://app.example",
        "submit order",
        "semantic",
        0.0,
    );
    assert!(
        winners.iter().any(|w| w.selector == r#"[aria-label="Submit order"]"# && w.success == 1),
        "healed selector should be promoted: {winners:?}"
    );
}

#[tokio::test]
async fn retries_exhaust_into_surfaced_error() {
    // Nothing clickable ever appears; every attempt must fail and the final
    // error carries the taxonomy kind rather than a panic or a bare false.
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![n("div", &[("class", "placeholder")]).hidden()],
    ));
    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    let opts = ActOptions { max_retries: Some(2) };
    let result = session.act(&click("launch sequence"), opts, &CancellationToken::new()).await;
    assert!(!result.success);
    // The reported count is the observed one, not the configured cap.
    assert_eq!(result.retries, 2);
    let error = result.error.expect("error populated");
    assert_eq!(error.kind, "not_found");
}

#[tokio::test]
async fn heal_rounds_are_capped_at_max_retries() {
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![n("div", &[("class", "placeholder")]).hidden()],
    ));
    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    let opts = ActOptions { max_retries: Some(3) };
    let result = session.act(&click("launch sequence"), opts, &CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.retries, 3);

    // Every attempt round captures exactly one snapshot: the first round
    // lazily, each heal round via its stateless re-snapshot. A bound of
    // `max_retries + 1` rounds would show up here as an extra capture.
    let captures = page.recorded.lock().unwrap().captures;
    assert_eq!(captures, 3, "attempt rounds must equal max_retries");
}

#[tokio::test]
async fn occluded_target_gets_a_dismissal_round() {
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![button("Accept terms", &[("id", "accept")])],
    ));
    // The cookie banner covers the button until Escape is pressed.
    page.occlude_id("accept");

    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    let result = session.act(&click("accept terms"), ActOptions::default(), &CancellationToken::new()).await;
    assert!(result.success, "{:?}", result.error);
    assert!(
        result.dismissed_overlays.iter().any(|o| o == "cookie-banner"),
        "dismissal should be recorded: {:?}",
        result.dismissed_overlays
    );

    let recorded = page.recorded.lock().unwrap();
    assert!(recorded.keys.contains(&"Escape".to_string()));
}

#[tokio::test]
async fn cancellation_reports_dispatch_state() {
    let page = Arc::new(FakePage::new(
        "https://app.example/",
        vec![button("Save", &[("id", "save")])],
    ));
    let ctx = CoreContext::for_tests(test_config());
    let session = PageSession::new(Arc::clone(&ctx), Arc::clone(&page));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = session.act(&click("save"), ActOptions::default(), &cancel).await;
    assert!(!result.success);
    let error = result.error.expect("error populated");
    assert_eq!(error.kind, "cancelled");
    // Cancelled before anything ran: no action can have been dispatched.
    assert!(page.recorded.lock().unwrap().mouse.is_empty());
}
