//! Handoff state machine for one `(application, step)` pair.
//!
//! A [`HandoffSession`] is owned by whichever view displays the step. It
//! mediates every token-related transition and owns the single status-poll
//! timer; dropping it (or calling [`HandoffSession::teardown`]) cancels that
//! timer.

use std::sync::Arc;

use handoff_core::{HandoffPair, StepId, TokenDescriptor, TokenId, TokenStatus};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::authority::Authority;
use crate::config::HandoffConfig;
use crate::error::{AuthorityError, HandoffError};
use crate::view::{ControlView, Notice, USED_MESSAGE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    Idle,
    Generating,
    Active(TokenDescriptor),
    Used(TokenId),
    Expired(TokenId),
    /// Hidden locally; the authority still considers the token active.
    Dismissed(TokenId),
}

impl HandoffState {
    pub fn displayed_token(&self) -> Option<&TokenId> {
        match self {
            HandoffState::Active(descriptor) => Some(&descriptor.token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffSnapshot {
    pub pair: HandoffPair,
    pub state: HandoffState,
    pub can_generate: bool,
    pub notice: Option<Notice>,
}

impl HandoffSnapshot {
    fn idle(pair: HandoffPair) -> Self {
        Self {
            pair,
            state: HandoffState::Idle,
            can_generate: false,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Continue,
    /// The displayed token reached `used` or `expired`.
    Terminal,
    /// The token is no longer the one on screen; nothing was applied.
    Stale,
}

pub struct HandoffSession {
    authority: Arc<dyn Authority>,
    config: HandoffConfig,
    shared: Arc<watch::Sender<HandoffSnapshot>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HandoffSession {
    /// Creates the session and runs the mount-time entry actions: an
    /// eligibility check, then a lookup of an already-active token so a
    /// reload resumes the code it was showing.
    pub async fn mount(
        authority: Arc<dyn Authority>,
        pair: HandoffPair,
        config: HandoffConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(HandoffSnapshot::idle(pair));
        let session = Self {
            authority,
            config,
            shared: Arc::new(tx),
            poller: Mutex::new(None),
        };
        session.refresh().await;
        session
    }

    pub fn pair(&self) -> HandoffPair {
        self.shared.borrow().pair.clone()
    }

    pub fn snapshot(&self) -> HandoffSnapshot {
        self.shared.borrow().clone()
    }

    pub fn state(&self) -> HandoffState {
        self.shared.borrow().state.clone()
    }

    pub fn can_generate(&self) -> bool {
        self.shared.borrow().can_generate
    }

    pub fn control(&self) -> ControlView {
        ControlView::for_snapshot(&self.shared.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<HandoffSnapshot> {
        self.shared.subscribe()
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Read-only. Any failure counts as "not eligible".
    pub async fn check_eligibility(&self) -> bool {
        let pair = self.pair();
        match self.authority.can_generate(&pair).await {
            Ok(can_generate) => can_generate,
            Err(err) => {
                warn!(%pair, error = %err, "eligibility check failed; treating as ineligible");
                false
            }
        }
    }

    /// Read-only. Any failure counts as "no active token".
    pub async fn check_active_token(&self) -> Option<TokenDescriptor> {
        let pair = self.pair();
        match self.authority.active_token(&pair).await {
            Ok(descriptor) => descriptor.filter(|d| d.pair == pair),
            Err(err) => {
                warn!(%pair, error = %err, "active token lookup failed; assuming none");
                None
            }
        }
    }

    /// Re-synchronises with the authority: cancels any poll, then adopts the
    /// authority's view of eligibility and the active token.
    pub async fn refresh(&self) {
        self.stop_polling();
        let can_generate = self.check_eligibility().await;
        let active = self.check_active_token().await;

        self.shared.send_modify(|snapshot| {
            snapshot.can_generate = can_generate;
            snapshot.state = match &active {
                Some(descriptor) => HandoffState::Active(descriptor.clone()),
                None => HandoffState::Idle,
            };
        });

        if let Some(descriptor) = active {
            info!(
                pair = %descriptor.pair,
                expires_at = %descriptor.expires_at,
                "resuming active handoff code"
            );
            self.start_polling(descriptor.token);
        }
    }

    /// Asks the authority for a fresh token. While the request is pending
    /// the session sits in `Generating`, which rejects further requests.
    pub async fn request_token(&self) -> Result<TokenDescriptor, HandoffError> {
        let mut replace = false;
        let mut rejection = None;
        self.shared.send_if_modified(|snapshot| match &snapshot.state {
            HandoffState::Generating => {
                rejection = Some(HandoffError::InFlight);
                false
            }
            HandoffState::Active(_) => {
                rejection = Some(HandoffError::AlreadyActive);
                false
            }
            _ if !snapshot.can_generate => {
                rejection = Some(HandoffError::EligibilityDenied);
                snapshot.notice = Some(Notice::error(USED_MESSAGE));
                true
            }
            HandoffState::Dismissed(_) => {
                replace = true;
                snapshot.state = HandoffState::Generating;
                true
            }
            _ => {
                snapshot.state = HandoffState::Generating;
                true
            }
        });
        if let Some(rejection) = rejection {
            return Err(rejection);
        }

        let pair = self.pair();
        match self.authority.create_token(&pair, replace).await {
            Ok(descriptor) => {
                let adopted = self.finish_generating(&pair, |snapshot| {
                    snapshot.state = HandoffState::Active(descriptor.clone());
                    snapshot.can_generate = true;
                    snapshot.notice = Some(Notice::success("QR code generated"));
                });
                if !adopted {
                    debug!(%pair, "session moved on while generating; not displaying new code");
                    return Ok(descriptor);
                }
                info!(
                    %pair,
                    replace,
                    expires_at = %descriptor.expires_at,
                    "handoff code generated"
                );
                self.start_polling(descriptor.token.clone());
                Ok(descriptor)
            }
            Err(AuthorityError::Ineligible) => {
                self.finish_generating(&pair, |snapshot| {
                    snapshot.state = HandoffState::Idle;
                    snapshot.can_generate = false;
                    snapshot.notice = Some(Notice::error(USED_MESSAGE));
                });
                Err(HandoffError::EligibilityDenied)
            }
            Err(AuthorityError::Conflict) => {
                warn!(%pair, "authority reported a conflicting active token; re-synchronising");
                self.refresh().await;
                self.shared.send_modify(|snapshot| {
                    snapshot.notice = Some(Notice::info(
                        "A QR code is already active for this page; showing the current one",
                    ));
                });
                Err(HandoffError::Conflict)
            }
            Err(err) => {
                warn!(%pair, error = %err, "failed to generate handoff code");
                self.finish_generating(&pair, |snapshot| {
                    snapshot.state = HandoffState::Idle;
                    snapshot.notice = Some(Notice::error(format!("Failed to generate QR: {err}")));
                });
                Err(err.into())
            }
        }
    }

    /// Applies the outcome of a create call, unless something else (a
    /// refresh, a step switch) already replaced the `Generating` state.
    fn finish_generating(
        &self,
        pair: &HandoffPair,
        apply: impl FnOnce(&mut HandoffSnapshot),
    ) -> bool {
        self.shared.send_if_modified(|snapshot| {
            if &snapshot.pair != pair || snapshot.state != HandoffState::Generating {
                return false;
            }
            apply(snapshot);
            true
        })
    }

    /// Hides the displayed code without telling the authority.
    pub fn hide(&self) -> bool {
        let hidden = self.shared.send_if_modified(|snapshot| match &snapshot.state {
            HandoffState::Active(descriptor) => {
                snapshot.state = HandoffState::Dismissed(descriptor.token.clone());
                true
            }
            _ => false,
        });
        if hidden {
            self.stop_polling();
            debug!(pair = %self.pair(), "handoff code hidden");
        }
        hidden
    }

    /// Click handler of the single control: hides an active code, otherwise
    /// requests one.
    pub async fn toggle(&self) -> Result<Option<TokenDescriptor>, HandoffError> {
        if self.hide() {
            return Ok(None);
        }
        self.request_token().await.map(Some)
    }

    /// Runs one status poll for the displayed token, if any.
    pub async fn poll_once(&self) {
        let Some(token) = self.state().displayed_token().cloned() else {
            return;
        };
        let pair = self.pair();
        let outcome = observe(self.authority.as_ref(), &self.shared, &pair, &token).await;
        // A stale result says nothing about whichever poller now owns the slot.
        if outcome == PollOutcome::Terminal {
            self.stop_polling();
        }
    }

    /// Moves the session to another step. The old pair's timer is gone
    /// before the new pair's entry actions run.
    pub async fn switch_step(&mut self, step: StepId) {
        self.stop_polling();
        let pair = self.pair().with_step(step);
        self.shared.send_replace(HandoffSnapshot::idle(pair));
        self.refresh().await;
    }

    pub fn teardown(self) {
        self.stop_polling();
    }

    fn start_polling(&self, token: TokenId) {
        let authority = Arc::clone(&self.authority);
        let shared = Arc::clone(&self.shared);
        let pair = self.pair();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match observe(authority.as_ref(), &shared, &pair, &token).await {
                    PollOutcome::Continue => {}
                    PollOutcome::Terminal | PollOutcome::Stale => break,
                }
            }
            debug!(%pair, "status poll stopped");
        });

        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_polling(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for HandoffSession {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[derive(Debug, Clone, Copy)]
enum Observation {
    StillActive,
    Used,
    Expired,
}

/// Polls `token` once and applies the result if `token` is still the one on
/// screen for `pair`. Observations about any other token are dropped.
async fn observe(
    authority: &dyn Authority,
    shared: &watch::Sender<HandoffSnapshot>,
    pair: &HandoffPair,
    token: &TokenId,
) -> PollOutcome {
    let observation = match authority.token_status(token, pair).await {
        Ok(report) => match (report.status, report.valid) {
            (TokenStatus::Used, _) => Observation::Used,
            (TokenStatus::Active, true) => Observation::StillActive,
            _ => Observation::Expired,
        },
        Err(AuthorityError::NotFound | AuthorityError::Expired) => Observation::Expired,
        Err(err) => {
            warn!(%pair, error = %err, "status poll failed");
            Observation::StillActive
        }
    };

    let mut correlated = false;
    shared.send_if_modified(|snapshot| {
        correlated =
            &snapshot.pair == pair && snapshot.state.displayed_token() == Some(token);
        if !correlated {
            return false;
        }
        match observation {
            Observation::StillActive => false,
            Observation::Used => {
                snapshot.state = HandoffState::Used(token.clone());
                snapshot.can_generate = false;
                snapshot.notice = Some(Notice::info("QR code scanned on another device"));
                true
            }
            Observation::Expired => {
                snapshot.state = HandoffState::Expired(token.clone());
                snapshot.notice = Some(Notice::info("QR code expired"));
                true
            }
        }
    });

    if !correlated {
        debug!(%pair, "discarding stale status observation");
        return PollOutcome::Stale;
    }
    match observation {
        Observation::StillActive => PollOutcome::Continue,
        Observation::Used => {
            info!(%pair, "handoff code redeemed on another device");
            PollOutcome::Terminal
        }
        Observation::Expired => {
            info!(%pair, "handoff code expired");
            PollOutcome::Terminal
        }
    }
}
