//! Session manager reindex policy and embedding reuse across SPA route
//! changes. Reindex fires iff a route event was observed, the rolling hash
//! changed, or the node count drifted ≥ 30% — any one alone is enough.

mod support;

use std::sync::Arc;

use pinpoint::session::SessionManager;
use pinpoint::CoreContext;
use support::{button, n, test_config, FakePage};

fn product_grid(count: usize) -> Vec<support::N> {
    (0..count)
        .map(|i| {
            n("div", &[("class", "card")]).children(vec![
                n("h2", &[]).text(&format!("Product {i}")),
                button("Add to Cart", &[("data-item", &format!("item-{i}"))]),
            ])
        })
        .collect()
}

#[tokio::test]
async fn route_change_triggers_reindex_with_fresh_snapshot_id() {
    let page = Arc::new(FakePage::new("https://shop.example/catalog", product_grid(10)));
    let mut session = SessionManager::new(&test_config());

    let (first, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();

    // SPA navigation via history.pushState: same shell, slightly new content.
    let mut body = product_grid(10);
    body[9] = n("div", &[("class", "card")]).children(vec![
        n("h2", &[]).text("Product 9 — Sale"),
        button("Add to Cart", &[("data-item", "item-9-sale")]),
    ]);
    page.set_dom("https://shop.example/catalog/sale", body);
    page.push_state("https://shop.example/catalog/sale");

    let decision = session.poll(page.as_ref()).await.unwrap();
    assert!(decision.route_changed);
    assert!(decision.reindex);

    let (second, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();
    assert_ne!(first.snapshot_id, second.snapshot_id);
}

#[tokio::test]
async fn unchanged_page_does_not_reindex() {
    let page = Arc::new(FakePage::new("https://shop.example/catalog", product_grid(5)));
    let mut session = SessionManager::new(&test_config());

    let (first, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();
    let decision = session.poll(page.as_ref()).await.unwrap();
    assert!(!decision.route_changed);
    assert!(!decision.hash_changed);
    assert!(!decision.reindex);

    let (second, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();
    assert_eq!(first.snapshot_id, second.snapshot_id, "snapshot must be reused");
}

#[tokio::test]
async fn dom_churn_reindexes_but_embeddings_are_reused() {
    let cfg = test_config();
    let ctx = CoreContext::for_tests(cfg.clone());
    let page = Arc::new(FakePage::new("https://shop.example/catalog", product_grid(10)));
    let mut session = SessionManager::new(&cfg);

    let (before, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();
    let (_, stats) = ctx.cache.vectors_for(&before).await;
    assert!(stats.embedded > 0);

    // ~10% churn: one card re-labelled, everything else identical.
    let mut body = product_grid(10);
    body[0] = n("div", &[("class", "card")]).children(vec![
        n("h2", &[]).text("Product 0 — Refurbished"),
        button("Add to Cart", &[("data-item", "item-0-refurb")]),
    ]);
    page.set_dom("https://shop.example/catalog", body);

    let decision = session.poll(page.as_ref()).await.unwrap();
    assert!(decision.hash_changed, "rolling hash must catch content churn");
    assert!(decision.reindex);

    let (after, _) = session.ensure_snapshot(page.as_ref()).await.unwrap();
    assert_ne!(before.snapshot_id, after.snapshot_id);

    let (_, stats) = ctx.cache.vectors_for(&after).await;
    assert!(
        stats.hit_ratio() >= 0.8,
        "10% churn should reuse ≥80% of vectors, got {:.2} ({stats:?})",
        stats.hit_ratio()
    );
}

#[tokio::test]
async fn snapshot_ring_is_bounded() {
    let mut cfg = test_config();
    cfg.snap_keep = 3;
    let page = Arc::new(FakePage::new("https://shop.example/", product_grid(2)));
    let mut session = SessionManager::new(&cfg);

    for i in 0..6 {
        page.set_dom(&format!("https://shop.example/p{i}"), product_grid(2 + i));
        session.capture(page.as_ref()).await.unwrap();
    }
    assert_eq!(session.history().count(), 3);
}
