//! The per-request state machine.
//!
//! Each `query`/`act` request walks explicit states — Snapshotting →
//! Embedding → Ranking → Synthesizing → Verifying (→ Acting → Healing) →
//! Done/Failed — with a budget per suspendable stage and a cancellation
//! check between states. There is no hidden recursion: healing is a bounded
//! loop in `act`, never a re-entrant call into the pipeline.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{scripts, PageSurface};
use crate::core::errors::{PinpointError, Stage};
use crate::core::types::{
    ActionResult, Alternative, Candidate, Intent, Mode, PostAction, QueryResult, ScoreBreakdown,
    SelectorKind, Snapshot, Strategy, Timing, Waits,
};
use crate::core::CoreContext;
use crate::exec::Executor;
use crate::heal::{self, promotion};
use crate::locator::synthesize::synthesize;
use crate::locator::verify::{Verified, Verifier};
use crate::rank::{RankContext, RankedElement, Ranker};
use crate::session::SessionManager;

/// How many ranked elements the verifier will consider before reporting
/// `NotFound` / `Ambiguous`.
const VERIFY_CANDIDATE_ELEMENTS: usize = 5;
/// A runner-up element is only tried when its fused score is within this
/// margin of the leader.
const RUNNER_UP_MARGIN: f32 = 0.2;
/// Confidence bonus for a candidate that passed live verification.
const VERIFIED_BONUS: f32 = 0.25;

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub mode: Option<Mode>,
}

#[derive(Debug, Clone, Default)]
pub struct ActOptions {
    pub max_retries: Option<u32>,
}

/// One page's retrieval session: the snapshot actor plus shared context.
pub struct PageSession {
    ctx: Arc<CoreContext>,
    page: Arc<dyn PageSurface>,
    // One snapshot actor per page: captures and reindex decisions serialize.
    session: Mutex<SessionManager>,
}

struct StageTimer {
    timing: Timing,
    started: Instant,
}

impl StageTimer {
    fn new() -> Self {
        Self { timing: Timing::default(), started: Instant::now() }
    }

    fn finish(mut self) -> Timing {
        self.timing.total_ms = self.started.elapsed().as_millis() as u64;
        self.timing
    }
}

async fn staged<T>(
    cancel: &CancellationToken,
    stage: Stage,
    budget_ms: u64,
    slot: &mut u64,
    fut: impl std::future::Future<Output = Result<T, PinpointError>>,
) -> Result<T, PinpointError> {
    let start = Instant::now();
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(PinpointError::Cancelled { dispatched: false }),
        r = tokio::time::timeout(std::time::Duration::from_millis(budget_ms), fut) => {
            r.unwrap_or(Err(PinpointError::Timeout { stage, budget_ms }))
        }
    };
    *slot += start.elapsed().as_millis() as u64;
    result
}

/// Everything retrieval produced for one (snapshot, query) pair.
struct Retrieved {
    snapshot: Arc<Snapshot>,
    winner: Winner,
    alternatives: Vec<Alternative>,
    degraded: bool,
}

struct Winner {
    frame_index: usize,
    element_index: usize,
    breakdown: ScoreBreakdown,
    candidates: Vec<Candidate>,
    verified: Verified,
    /// Index into `candidates` of the verified selector.
    chosen: usize,
    margin: f32,
}

impl PageSession {
    pub fn new(ctx: Arc<CoreContext>, page: Arc<dyn PageSurface>) -> Self {
        let session = Mutex::new(SessionManager::new(&ctx.config));
        Self { ctx, page, session }
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    fn mode(&self, opts_mode: Option<Mode>) -> Mode {
        opts_mode.unwrap_or(self.ctx.config.mode)
    }

    // ── query ────────────────────────────────────────────────────────────────

    /// Resolve a phrase to a verified locator. Failures are reported in-band:
    /// `success = false` plus a populated `error`, never a panic.
    pub async fn query(
        &self,
        phrase: &str,
        opts: QueryOptions,
        cancel: &CancellationToken,
    ) -> QueryResult {
        let mode = self.mode(opts.mode);
        let request = uuid::Uuid::new_v4();
        debug!(%request, phrase, ?mode, "query started");
        let mut timer = StageTimer::new();
        match self.retrieve(phrase, None, mode, cancel, &mut timer, false, false).await {
            Ok(retrieved) => {
                let confidence = (retrieved.winner.breakdown.fused
                    + VERIFIED_BONUS
                    + retrieved.winner.margin * 0.5)
                    .clamp(0.0, 1.0);
                let winner = retrieved.winner;
                let chosen = winner.candidates[winner.chosen].clone();
                let desc = retrieved
                    .snapshot
                    .element(winner.frame_index, winner.element_index)
                    .expect("winner descriptor");
                QueryResult {
                    success: true,
                    selector: Some(chosen.selector),
                    strategy: Some(chosen.strategy),
                    confidence: Some(confidence),
                    frame_path: desc.frame_path.clone(),
                    alternatives: retrieved.alternatives,
                    verification: Some(winner.verified.result),
                    degraded: retrieved.degraded,
                    timing: timer.finish(),
                    error: None,
                }
            }
            Err(err) => QueryResult {
                success: false,
                selector: None,
                strategy: None,
                confidence: None,
                frame_path: Vec::new(),
                alternatives: Vec::new(),
                verification: None,
                degraded: false,
                timing: timer.finish(),
                error: Some(err.to_info()),
            },
        }
    }

    // ── act ──────────────────────────────────────────────────────────────────

    /// Resolve and execute an intent, healing through `max_retries` attempts.
    pub async fn act(
        &self,
        intent: &Intent,
        opts: ActOptions,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let mode = self.mode(None);
        let max_retries = opts.max_retries.unwrap_or(self.ctx.config.max_retries);
        let request = uuid::Uuid::new_v4();
        debug!(%request, phrase = %intent.target_phrase, action = ?intent.action, "act started");
        let mut timer = StageTimer::new();
        let mut dismissed_overlays: Vec<String> = Vec::new();
        let mut attempted: Vec<String> = Vec::new();
        let mut retries: u32 = 0;
        let mut degraded = false;
        let mut last_err = PinpointError::NotFound {
            phrase: intent.target_phrase.clone(),
            attempted: Vec::new(),
        };

        let origin = match self.page.current_url().await {
            Ok(url) => promotion::origin_of(&url),
            Err(e) => {
                return self.action_failure(PinpointError::from(e), timer, retries, dismissed_overlays)
            }
        };
        let mode_key = mode.promotion_key();
        let before = self.page_state().await;

        // Healing never loops: one attempt round per iteration, exactly
        // `max_retries` rounds in total.
        while retries < max_retries {
            if cancel.is_cancelled() {
                return self.action_failure(
                    PinpointError::Cancelled { dispatched: false },
                    timer,
                    retries,
                    dismissed_overlays,
                );
            }

            // Heal step 1 (after a first failure): promoted winners, highest
            // confidence first, before paying for a fresh retrieval. A short
            // jittered pause lets in-flight mutations land before we re-read.
            if retries > 0 {
                let pause = {
                    use rand::RngExt;
                    rand::rng().random_range(50..200u64)
                };
                tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
                debug!(retries, "healing: consulting promoted winners");
                let winners = self
                    .ctx
                    .promotions_lookup(&origin, &intent.target_phrase, mode_key)
                    .await;
                for entry in winners {
                    if attempted.contains(&entry.selector) {
                        continue;
                    }
                    let candidate = candidate_from_selector(&entry.selector);
                    match self
                        .try_candidate(intent, &candidate, &[], None, cancel, &mut timer, &mut dismissed_overlays)
                        .await
                    {
                        Ok(outcome) => {
                            attempted.push(candidate.selector.clone());
                            self.ctx
                                .promotions_record(true, &origin, &intent.target_phrase, &candidate.selector, mode_key)
                                .await;
                            return self
                                .action_success(
                                    intent, candidate, outcome, before, timer, retries, dismissed_overlays, degraded,
                                )
                                .await;
                        }
                        Err(PinpointError::Cancelled { dispatched }) => {
                            return self.action_failure(
                                PinpointError::Cancelled { dispatched },
                                timer,
                                retries,
                                dismissed_overlays,
                            );
                        }
                        Err(e) => {
                            attempted.push(candidate.selector.clone());
                            self.ctx
                                .promotions_record(false, &origin, &intent.target_phrase, &candidate.selector, mode_key)
                                .await;
                            last_err = e;
                        }
                    }
                }

                // Heal step 2: stateless re-snapshot — the stale descriptor
                // list is never reused.
                let mut session = self.session.lock().await;
                if let Err(e) = session.capture(self.page.as_ref()).await {
                    return self.action_failure(e.into(), timer, retries, dismissed_overlays);
                }
            }

            // Retrieve against the (possibly fresh) snapshot.
            let retrieved = match self
                .retrieve(&intent.target_phrase, Some(intent.action), mode, cancel, &mut timer, retries > 0, true)
                .await
            {
                Ok(r) => r,
                Err(e @ PinpointError::Cancelled { .. }) | Err(e @ PinpointError::SessionLost(_)) => {
                    return self.action_failure(e, timer, retries, dismissed_overlays);
                }
                Err(e) => {
                    last_err = e;
                    retries += 1;
                    continue;
                }
            };
            degraded |= retrieved.degraded;

            let winner = retrieved.winner;
            let desc = retrieved
                .snapshot
                .element(winner.frame_index, winner.element_index)
                .cloned();
            let frame_path =
                desc.as_ref().map(|d| d.frame_path.clone()).unwrap_or_default();
            let backend_id = desc.as_ref().map(|d| d.backend_node_id);

            // Heal steps 3–4 are folded into the candidate walk: verified
            // candidate first, then its relaxations, then the next tier.
            let mut ladder: Vec<Candidate> = Vec::new();
            for (i, candidate) in winner.candidates.iter().enumerate() {
                if i == winner.chosen {
                    ladder.push(candidate.clone());
                    for relaxed in heal::relax(candidate, desc.as_ref()) {
                        ladder.push(relaxed);
                    }
                } else {
                    ladder.push(candidate.clone());
                }
            }

            let mut acted = false;
            for candidate in ladder {
                if attempted.contains(&candidate.selector) {
                    continue;
                }
                match self
                    .try_candidate(intent, &candidate, &frame_path, backend_id, cancel, &mut timer, &mut dismissed_overlays)
                    .await
                {
                    Ok(outcome) => {
                        attempted.push(candidate.selector.clone());
                        self.ctx
                            .promotions_record(true, &origin, &intent.target_phrase, &candidate.selector, mode_key)
                            .await;
                        return self
                            .action_success(
                                intent, candidate, outcome, before, timer, retries, dismissed_overlays, degraded,
                            )
                            .await;
                    }
                    Err(PinpointError::Cancelled { dispatched }) => {
                        return self.action_failure(
                            PinpointError::Cancelled { dispatched },
                            timer,
                            retries,
                            dismissed_overlays,
                        );
                    }
                    Err(e) if e.is_healable() => {
                        attempted.push(candidate.selector.clone());
                        self.ctx
                            .promotions_record(false, &origin, &intent.target_phrase, &candidate.selector, mode_key)
                            .await;
                        last_err = e;
                        acted = true;
                        break; // one attempt per retry round
                    }
                    Err(e) => {
                        return self.action_failure(e, timer, retries, dismissed_overlays);
                    }
                }
            }
            if !acted {
                last_err = PinpointError::NotFound {
                    phrase: intent.target_phrase.clone(),
                    attempted: attempted.clone(),
                };
            }
            retries += 1;
        }

        warn!(
            phrase = %intent.target_phrase,
            attempts = retries,
            "action failed after exhausting retries"
        );
        if let PinpointError::NotFound { attempted: a, .. } = &mut last_err {
            *a = attempted;
        }
        self.action_failure(last_err, timer, retries, dismissed_overlays)
    }

    // ── shared internals ─────────────────────────────────────────────────────

    /// Snapshot → embed → rank → synthesize → verify. `force_fresh` skips the
    /// reindex check (self-heal already captured). With `tolerate_occlusion`
    /// a unique, visible but covered winner is still returned — the act path
    /// gets a dismissal round before giving up, while `query` keeps the
    /// strict contract that its selector verifies `ok` as returned.
    #[allow(clippy::too_many_arguments)]
    async fn retrieve(
        &self,
        phrase: &str,
        action: Option<crate::core::types::ActionKind>,
        mode: Mode,
        cancel: &CancellationToken,
        timer: &mut StageTimer,
        force_fresh: bool,
        tolerate_occlusion: bool,
    ) -> Result<Retrieved, PinpointError> {
        let cfg = &self.ctx.config;

        // Snapshotting — one snapshot chosen at query start; everything
        // downstream ranks against it.
        let snapshot = {
            let capture = async {
                let mut session = self.session.lock().await;
                if force_fresh && session.current().is_some() {
                    Ok(session.current().expect("checked above"))
                } else {
                    session
                        .ensure_snapshot(self.page.as_ref())
                        .await
                        .map(|(snap, _)| snap)
                        .map_err(PinpointError::from)
                }
            };
            staged(cancel, Stage::Snapshot, cfg.capture_timeout_ms + 1_000, &mut timer.timing.capture_ms, capture)
                .await?
        };
        let mut degraded = snapshot.partial;

        // Embedding — delta-only via the two-tier cache.
        let (vectors, query_vector) = if mode == Mode::NoSemantic {
            (Default::default(), None)
        } else {
            let work = async {
                let (vectors, stats) = self.ctx.cache.vectors_for(&snapshot).await;
                let (qv, q_degraded) = self.ctx.embedder.embed_query(phrase).await;
                Ok((vectors, qv, stats.degraded > 0 || q_degraded))
            };
            let (vectors, qv, embed_degraded) =
                staged(cancel, Stage::Embed, cfg.embed_batch_timeout_ms, &mut timer.timing.embed_ms, work)
                    .await?;
            degraded |= embed_degraded;
            (vectors, Some(qv))
        };

        // Ranking — pure.
        let rank_start = Instant::now();
        let origin = promotion::origin_of(snapshot.frames.first().map(|f| f.url.as_str()).unwrap_or(""));
        let promoted = self
            .ctx
            .promotions_lookup(&origin, phrase, mode.promotion_key())
            .await
            .into_iter()
            .map(|e| (e.selector, e.confidence))
            .collect::<Vec<_>>();
        let ranker = Ranker { weights: cfg.weights, mode, vocab: &self.ctx.vocab };
        let ranked = ranker.rank(&RankContext {
            snapshot: snapshot.as_ref(),
            phrase,
            action,
            query_vector: query_vector.as_deref(),
            vectors: &vectors,
            promotions: promoted.as_slice(),
        });
        timer.timing.rank_ms += rank_start.elapsed().as_millis() as u64;

        // Synthesizing + Verifying — walk the ranked list until a candidate
        // verifies. Only elements close to the top score are considered:
        // falling through to a clearly-worse element would "succeed" on the
        // wrong target instead of letting self-heal re-snapshot.
        let actionable = action.map(|a| a.is_actionable()).unwrap_or(true);
        let eligible: Vec<&RankedElement> = ranked
            .iter()
            .filter(|r| {
                let Some(d) = snapshot.element(r.frame_index, r.element_index) else {
                    return false;
                };
                // Document scaffolding is never a retrieval target even when
                // its trivial selector would verify.
                if matches!(d.tag.as_str(), "html" | "body") {
                    return false;
                }
                (d.visible || !actionable) && (action.is_none() || d.clickable)
            })
            .collect();
        let top_score = eligible.first().map(|r| r.score()).unwrap_or(0.0);
        let shortlist: Vec<&RankedElement> = eligible
            .into_iter()
            .take_while(|r| top_score - r.score() <= RUNNER_UP_MARGIN)
            .take(VERIFY_CANDIDATE_ELEMENTS)
            .collect();
        if shortlist.is_empty() {
            return Err(PinpointError::NotFound { phrase: phrase.to_string(), attempted: Vec::new() });
        }
        let margin = match (shortlist.first(), shortlist.get(1)) {
            (Some(a), Some(b)) => (a.score() - b.score()).max(0.0),
            _ => 0.0,
        };

        let mut ambiguous_counts: Vec<usize> = Vec::new();
        let mut attempted_selectors: Vec<String> = Vec::new();
        for ranked_elem in &shortlist {
            let frame = &snapshot.frames[ranked_elem.frame_index];
            let candidates = match synthesize(frame, ranked_elem.element_index) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let frame_path = frame
                .elements
                .get(ranked_elem.element_index)
                .map(|d| d.frame_path.clone())
                .unwrap_or_default();

            for ci in 0..candidates.len() {
                let verified = {
                    let candidate = &candidates[ci];
                    let verify = async {
                        Verifier::new(self.page.as_ref())
                            .verify(candidate, &frame_path, actionable)
                            .await
                            .map_err(PinpointError::from)
                    };
                    let verified = staged(
                        cancel,
                        Stage::Verify,
                        cfg.verify_timeout_ms,
                        &mut timer.timing.verify_ms,
                        verify,
                    )
                    .await?;
                    attempted_selectors.push(candidate.selector.clone());
                    verified
                };

                let accepted = verified.result.ok
                    || (tolerate_occlusion
                        && verified.result.unique
                        && verified.probe.attached
                        && verified.result.visible
                        && (!actionable || !verified.result.disabled));
                if accepted {
                    let alternatives = build_alternatives(&snapshot, &shortlist, candidates.as_slice(), ci);
                    return Ok(Retrieved {
                        snapshot: Arc::clone(&snapshot),
                        winner: Winner {
                            frame_index: ranked_elem.frame_index,
                            element_index: ranked_elem.element_index,
                            breakdown: ranked_elem.breakdown,
                            chosen: ci,
                            candidates,
                            verified,
                            margin,
                        },
                        alternatives,
                        degraded,
                    });
                }
                if verified.probe.count > 1 {
                    ambiguous_counts.push(verified.probe.count);
                }
            }
        }

        if !ambiguous_counts.is_empty() && ambiguous_counts.len() >= attempted_selectors.len() {
            return Err(PinpointError::Ambiguous {
                count: ambiguous_counts.iter().copied().max().unwrap_or(2),
                candidates: attempted_selectors,
            });
        }
        Err(PinpointError::NotFound { phrase: phrase.to_string(), attempted: attempted_selectors })
    }

    /// Verify, scroll, clear occlusions, and execute one candidate.
    #[allow(clippy::too_many_arguments)]
    async fn try_candidate(
        &self,
        intent: &Intent,
        candidate: &Candidate,
        frame_path: &[String],
        backend_node_id: Option<i64>,
        cancel: &CancellationToken,
        timer: &mut StageTimer,
        dismissed_overlays: &mut Vec<String>,
    ) -> Result<crate::exec::ActOutcome, PinpointError> {
        let cfg = &self.ctx.config;
        let before_wait = Instant::now();

        let verify = async {
            Verifier::new(self.page.as_ref())
                .verify(candidate, frame_path, intent.action.is_actionable())
                .await
                .map_err(PinpointError::from)
        };
        let mut verified =
            staged(cancel, Stage::Verify, cfg.verify_timeout_ms, &mut timer.timing.verify_ms, verify).await?;

        // Occlusion gets one dismissal round before we give up on the
        // candidate.
        if verified.result.unique && verified.result.occluded {
            let executor = Executor::new(self.page.as_ref());
            let mut dismissed = executor.dismiss_overlays().await;
            dismissed_overlays.append(&mut dismissed);
            let reverify = async {
                Verifier::new(self.page.as_ref())
                    .verify(candidate, frame_path, intent.action.is_actionable())
                    .await
                    .map_err(PinpointError::from)
            };
            verified =
                staged(cancel, Stage::Verify, cfg.verify_timeout_ms, &mut timer.timing.verify_ms, reverify)
                    .await?;
        }

        if !verified.result.ok {
            return Err(verification_error(&verified));
        }

        // Acting, under its own budget. Cancellation here may race an
        // already-dispatched input event, so it reports `dispatched: true`.
        let act = async {
            let executor = Executor::new(self.page.as_ref());
            let probe = executor.bring_into_view(candidate, frame_path).await?;
            executor.perform(intent, candidate, frame_path, &probe, backend_node_id).await
        };
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(PinpointError::Cancelled { dispatched: true }),
            r = tokio::time::timeout(std::time::Duration::from_millis(cfg.act_timeout_ms), act) => {
                r.unwrap_or(Err(PinpointError::Timeout { stage: Stage::Act, budget_ms: cfg.act_timeout_ms }))
            }
        };

        let mut outcome = outcome?;
        outcome.waits.before_ms = before_wait.elapsed().as_millis() as u64;
        Ok(outcome)
    }

    async fn page_state(&self) -> (String, String) {
        let url = self.page.current_url().await.unwrap_or_default();
        let hash = match self.page.eval_json(scripts::ROLLING_HASH).await {
            Ok(v) => v.get("hash").and_then(|h| h.as_str()).unwrap_or_default().to_string(),
            Err(_) => String::new(),
        };
        (url, hash)
    }

    #[allow(clippy::too_many_arguments)]
    async fn action_success(
        &self,
        intent: &Intent,
        candidate: Candidate,
        outcome: crate::exec::ActOutcome,
        before: (String, String),
        timer: StageTimer,
        retries: u32,
        mut dismissed_overlays: Vec<String>,
        degraded: bool,
    ) -> ActionResult {
        dismissed_overlays.extend(outcome.dismissed_overlays.clone());
        // Post-action settle, then read the page state delta.
        let settle = Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let after = self.page_state().await;
        let waits = Waits {
            before_ms: outcome.waits.before_ms,
            after_ms: settle.elapsed().as_millis() as u64,
        };

        info!(
            action = ?intent.action,
            selector = %candidate.selector,
            retries,
            "action succeeded"
        );
        ActionResult {
            success: true,
            used_locator: Some(candidate),
            waits,
            frame: crate::core::types::FrameInfo { path: Vec::new(), url: after.0.clone() },
            post_action: PostAction {
                url_before: before.0,
                url_after: after.0,
                dom_hash_before: before.1,
                dom_hash_after: after.1,
                value: outcome.value_after,
            },
            timing: timer.finish(),
            retries,
            dismissed_overlays,
            degraded,
            error: None,
        }
    }

    fn action_failure(
        &self,
        err: PinpointError,
        timer: StageTimer,
        retries: u32,
        dismissed_overlays: Vec<String>,
    ) -> ActionResult {
        ActionResult {
            success: false,
            used_locator: None,
            waits: Waits::default(),
            frame: crate::core::types::FrameInfo::default(),
            post_action: PostAction::default(),
            timing: timer.finish(),
            retries,
            dismissed_overlays,
            degraded: false,
            error: Some(err.to_info()),
        }
    }
}

fn verification_error(verified: &Verified) -> PinpointError {
    let r = &verified.result;
    if !r.unique && verified.probe.count == 0 {
        PinpointError::Stale
    } else if !r.unique {
        PinpointError::Ambiguous {
            count: verified.probe.count,
            candidates: vec![r.used_selector.clone()],
        }
    } else if r.occluded {
        PinpointError::Occluded
    } else if r.disabled {
        PinpointError::Disabled
    } else if verified.probe.offscreen {
        PinpointError::OffScreen
    } else {
        PinpointError::Stale
    }
}

/// Selector shape → kind. Our family is closed, so a leading slash means
/// XPath and everything else is CSS.
fn candidate_from_selector(selector: &str) -> Candidate {
    let kind = if selector.starts_with('/') || selector.starts_with("(/") {
        SelectorKind::XPath
    } else {
        SelectorKind::Css
    };
    Candidate { selector: selector.to_string(), kind, strategy: Strategy::Fallback }
}

/// Runner-up selectors: remaining tiers of the winner, then the strongest
/// candidate of each shortlisted runner-up element.
fn build_alternatives(
    snapshot: &Snapshot,
    shortlist: &[&RankedElement],
    winner_candidates: &[Candidate],
    chosen: usize,
) -> Vec<Alternative> {
    let mut out: Vec<Alternative> = Vec::new();
    for (i, c) in winner_candidates.iter().enumerate() {
        if i != chosen && out.len() < 3 {
            out.push(Alternative {
                selector: c.selector.clone(),
                strategy: c.strategy,
                score: 0.0,
            });
        }
    }
    for r in shortlist.iter().skip(1).take(2) {
        let frame = &snapshot.frames[r.frame_index];
        if let Ok(candidates) = synthesize(frame, r.element_index) {
            if let Some(first) = candidates.first() {
                out.push(Alternative {
                    selector: first.selector.clone(),
                    strategy: first.strategy,
                    score: r.score(),
                });
            }
        }
    }
    out
}
