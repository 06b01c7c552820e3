//! Session token lifecycle and adaptive delay multiplier.
//!
//! Workers never touch [`SessionState`] directly. They ask for headers, report each
//! chapter outcome, and rotate when [`SessionManager::record_outcome`] hands them a
//! [`RotationTrigger`]. A trigger is returned to exactly one caller because the
//! counter that produced it is reset under the same lock.
//!
//! Rotation is bounded: at most `probe_attempts` candidate cookies are probed
//! against a known chapter, then an unvalidated cookie is installed regardless.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use novelpull_shared::{ChapterRef, SessionPolicy};

use crate::source::{ContentSource, RequestHeaders};

/// Desktop browser user agents rotated between sessions.
pub const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Name of the session cookie.
const COOKIE_NAME: &str = "novel_web_id";

/// Result of one chapter, as reported to the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Why a rotation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    /// Reactive: this many consecutive failures.
    ConsecutiveFailures(u32),
    /// Proactive: this many successes since the last rotation.
    SuccessQuota(u32),
    /// The remote service rejected the current token.
    SessionRejected,
}

impl fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsecutiveFailures(n) => write!(f, "{n} consecutive failures"),
            Self::SuccessQuota(n) => write!(f, "{n} successes since last rotation"),
            Self::SessionRejected => f.write_str("session rejected"),
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub cookie: String,
    pub user_agent: String,
    pub created_at: DateTime<Local>,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Always within `1.0..=multiplier_max`.
    pub delay_multiplier: f64,
    pub successes_since_rotation: u32,
    pub rotations: u32,
    /// The cookie came from manual configuration and has not been replaced.
    pub pinned: bool,
}

pub struct SessionManager {
    source: Arc<dyn ContentSource>,
    policy: SessionPolicy,
    state: Mutex<SessionState>,
    rotation: Mutex<()>,
}

impl SessionManager {
    /// Start a session with an unvalidated cookie (or the manual one).
    pub fn new(source: Arc<dyn ContentSource>, policy: SessionPolicy) -> Self {
        let (cookie, pinned) = match &policy.manual_cookie {
            Some(cookie) => (cookie.clone(), true),
            None => (mint_cookie(0), false),
        };
        let state = SessionState {
            cookie,
            user_agent: random_user_agent(),
            created_at: Local::now(),
            consecutive_failures: 0,
            total_failures: 0,
            delay_multiplier: 1.0,
            successes_since_rotation: 0,
            rotations: 0,
            pinned,
        };
        debug!(cookie = %state.cookie, pinned, "session started");

        Self {
            source,
            policy,
            state: Mutex::new(state),
            rotation: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub async fn current_headers(&self) -> RequestHeaders {
        let state = self.state.lock().await;
        RequestHeaders {
            cookie: state.cookie.clone(),
            user_agent: state.user_agent.clone(),
        }
    }

    pub async fn delay_multiplier(&self) -> f64 {
        self.state.lock().await.delay_multiplier
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Feed one chapter outcome into the counters and the multiplier.
    ///
    /// Returns a trigger when a rotation threshold was just crossed; the caller
    /// is then responsible for calling [`SessionManager::rotate`].
    pub async fn record_outcome(&self, outcome: Outcome) -> Option<RotationTrigger> {
        let policy = &self.policy;
        let mut state = self.state.lock().await;

        match outcome {
            Outcome::Success => {
                state.consecutive_failures = 0;
                state.delay_multiplier =
                    bounded_multiplier(state.delay_multiplier - policy.step_down, policy);
                state.successes_since_rotation += 1;

                let quota = policy.rotate_after_successes;
                if quota > 0 && !state.pinned && state.successes_since_rotation >= quota {
                    state.successes_since_rotation = 0;
                    return Some(RotationTrigger::SuccessQuota(quota));
                }
                None
            }
            Outcome::Failure => {
                state.consecutive_failures += 1;
                state.total_failures += 1;
                if state.consecutive_failures >= policy.failure_threshold {
                    state.delay_multiplier =
                        bounded_multiplier(state.delay_multiplier + policy.step_up, policy);
                    debug!(
                        multiplier = state.delay_multiplier,
                        consecutive = state.consecutive_failures,
                        "delay multiplier raised"
                    );
                }

                let limit = policy.rotate_after_failures;
                if limit > 0 && state.consecutive_failures % limit == 0 {
                    return Some(RotationTrigger::ConsecutiveFailures(state.consecutive_failures));
                }
                None
            }
        }
    }

    /// Replace the cookie, probing candidates against `probe`.
    ///
    /// Always terminates after at most `probe_attempts` probes. If none is accepted,
    /// an unvalidated cookie is installed.
    pub async fn rotate(&self, probe: &ChapterRef, trigger: RotationTrigger) -> SessionState {
        let _guard = self.rotation.lock().await;
        self.rotate_locked(probe, trigger).await
    }

    /// Rotate only if the session still uses `stale_cookie`.
    ///
    /// Several workers can see the same rejected token; the first one rotates and
    /// the rest return `None`.
    pub async fn rotate_if_current(
        &self,
        stale_cookie: &str,
        probe: &ChapterRef,
        trigger: RotationTrigger,
    ) -> Option<SessionState> {
        let _guard = self.rotation.lock().await;
        if self.state.lock().await.cookie != stale_cookie {
            debug!("session already rotated by another worker");
            return None;
        }
        Some(self.rotate_locked(probe, trigger).await)
    }

    #[instrument(skip_all, fields(trigger = %trigger))]
    async fn rotate_locked(&self, probe: &ChapterRef, trigger: RotationTrigger) -> SessionState {
        let user_agent = if self.policy.rotate_user_agent {
            random_user_agent()
        } else {
            self.state.lock().await.user_agent.clone()
        };

        let mut accepted = None;
        for attempt in 1..=self.policy.probe_attempts {
            tokio::time::sleep(self.policy.probe_interval).await;

            let candidate = mint_cookie(rand::thread_rng().gen_range(1_000..=999_999));
            let headers = RequestHeaders {
                cookie: candidate.clone(),
                user_agent: user_agent.clone(),
            };

            match self.source.primary_chapter(&probe.remote_id, &headers).await {
                Ok(text) if text.chars().count() > self.policy.probe_min_chars => {
                    debug!(attempt, "probe accepted candidate cookie");
                    accepted = Some(candidate);
                    break;
                }
                Ok(text) => debug!(attempt, chars = text.chars().count(), "probe content too short"),
                Err(e) => debug!(attempt, error = %e, "probe failed"),
            }
        }

        let validated = accepted.is_some();
        let cookie = accepted.unwrap_or_else(|| mint_cookie(0));
        if !validated {
            warn!(
                attempts = self.policy.probe_attempts,
                "no candidate cookie passed the probe, using an unvalidated one"
            );
        }

        let mut state = self.state.lock().await;
        state.cookie = cookie;
        state.user_agent = user_agent;
        state.created_at = Local::now();
        state.successes_since_rotation = 0;
        state.rotations += 1;
        state.pinned = false;
        info!(
            %trigger,
            rotations = state.rotations,
            validated,
            multiplier = state.delay_multiplier,
            "session rotated"
        );
        state.clone()
    }
}

/// Keep the multiplier within `1.0..=multiplier_max`, whatever the policy steps are.
fn bounded_multiplier(value: f64, policy: &SessionPolicy) -> f64 {
    value.min(policy.multiplier_max).max(1.0)
}

/// `novel_web_id=<unix millis + offset>`.
fn mint_cookie(offset: u64) -> String {
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    format!("{COOKIE_NAME}={}", millis + offset)
}

fn random_user_agent() -> String {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FetchResult;
    use async_trait::async_trait;
    use novelpull_shared::{FetchError, WorkId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers probes with content of a fixed length and counts them.
    struct ProbeStub {
        chars: usize,
        probes: AtomicUsize,
    }

    impl ProbeStub {
        fn new(chars: usize) -> Arc<Self> {
            Arc::new(Self {
                chars,
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentSource for ProbeStub {
        async fn catalog_page(&self, _: WorkId, _: &RequestHeaders) -> FetchResult<String> {
            Err(FetchError::transport("unused"))
        }

        async fn primary_chapter(&self, _: &str, _: &RequestHeaders) -> FetchResult<String> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok("字".repeat(self.chars))
        }

        async fn fallback_chapter(&self, _: &str, _: &RequestHeaders) -> FetchResult<String> {
            Err(FetchError::transport("unused"))
        }
    }

    fn policy() -> SessionPolicy {
        SessionPolicy {
            probe_interval: Duration::ZERO,
            ..SessionPolicy::default()
        }
    }

    fn probe() -> ChapterRef {
        ChapterRef {
            title: "第1章".into(),
            remote_id: "1".into(),
            ordinal: 0,
        }
    }

    #[tokio::test]
    async fn multiplier_climbs_after_threshold_and_recovers() {
        let session = SessionManager::new(ProbeStub::new(500), policy());

        session.record_outcome(Outcome::Failure).await;
        session.record_outcome(Outcome::Failure).await;
        assert_eq!(session.delay_multiplier().await, 1.0);

        session.record_outcome(Outcome::Failure).await;
        assert!(session.delay_multiplier().await > 1.0);
        let raised = session.delay_multiplier().await;

        session.record_outcome(Outcome::Success).await;
        let lowered = session.delay_multiplier().await;
        assert!(lowered < raised);
        assert!(lowered >= 1.0);

        for _ in 0..50 {
            session.record_outcome(Outcome::Success).await;
        }
        assert_eq!(session.delay_multiplier().await, 1.0);
    }

    #[tokio::test]
    async fn multiplier_is_capped() {
        let session = SessionManager::new(ProbeStub::new(500), policy());
        for _ in 0..100 {
            session.record_outcome(Outcome::Failure).await;
        }
        assert_eq!(session.delay_multiplier().await, session.policy().multiplier_max);
    }

    #[tokio::test]
    async fn multiplier_stays_in_range_with_odd_policy_steps() {
        let session = SessionManager::new(
            ProbeStub::new(500),
            SessionPolicy {
                step_up: -0.5,
                multiplier_max: 8.0,
                ..policy()
            },
        );
        for _ in 0..5 {
            session.record_outcome(Outcome::Failure).await;
        }
        assert_eq!(session.delay_multiplier().await, 1.0);

        let session = SessionManager::new(
            ProbeStub::new(500),
            SessionPolicy {
                step_up: 10.0,
                step_down: -3.0,
                multiplier_max: 4.0,
                ..policy()
            },
        );
        for _ in 0..3 {
            session.record_outcome(Outcome::Failure).await;
        }
        assert_eq!(session.delay_multiplier().await, 4.0);
        session.record_outcome(Outcome::Success).await;
        assert_eq!(session.delay_multiplier().await, 4.0);
    }

    #[tokio::test]
    async fn proactive_rotation_fires_once_at_the_twentieth_success() {
        let stub = ProbeStub::new(500);
        let session = SessionManager::new(stub.clone(), policy());

        for _ in 0..19 {
            assert_eq!(session.record_outcome(Outcome::Success).await, None);
        }
        let trigger = session.record_outcome(Outcome::Success).await;
        assert_eq!(trigger, Some(RotationTrigger::SuccessQuota(20)));

        let state = session.rotate(&probe(), RotationTrigger::SuccessQuota(20)).await;
        assert_eq!(state.rotations, 1);
        assert_eq!(state.successes_since_rotation, 0);

        assert_eq!(session.record_outcome(Outcome::Success).await, None);
        assert_eq!(stub.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reactive_rotation_every_n_consecutive_failures() {
        let session = SessionManager::new(ProbeStub::new(500), policy());
        let mut triggers = Vec::new();
        for _ in 0..16 {
            if let Some(t) = session.record_outcome(Outcome::Failure).await {
                triggers.push(t);
            }
        }
        assert_eq!(
            triggers,
            vec![
                RotationTrigger::ConsecutiveFailures(8),
                RotationTrigger::ConsecutiveFailures(16)
            ]
        );
    }

    #[tokio::test]
    async fn rotation_is_bounded_and_falls_back() {
        let stub = ProbeStub::new(10);
        let session = SessionManager::new(stub.clone(), policy());
        let before = session.current_headers().await.cookie;

        let state = session
            .rotate(&probe(), RotationTrigger::ConsecutiveFailures(8))
            .await;

        assert_eq!(stub.probes.load(Ordering::SeqCst), 5);
        assert!(state.cookie.starts_with("novel_web_id="));
        assert_eq!(state.rotations, 1);
        assert!(before.starts_with("novel_web_id="));
    }

    #[tokio::test]
    async fn rotation_stops_at_first_accepted_probe() {
        let stub = ProbeStub::new(201);
        let session = SessionManager::new(stub.clone(), policy());
        session.rotate(&probe(), RotationTrigger::SessionRejected).await;
        assert_eq!(stub.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_cookie_rotates_only_once() {
        let stub = ProbeStub::new(500);
        let session = SessionManager::new(stub.clone(), policy());
        let stale = session.current_headers().await.cookie;

        let first = session
            .rotate_if_current(&stale, &probe(), RotationTrigger::SessionRejected)
            .await;
        let second = session
            .rotate_if_current(&stale, &probe(), RotationTrigger::SessionRejected)
            .await;

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(session.state().await.rotations, 1);
    }

    #[tokio::test]
    async fn manual_cookie_is_not_rotated_proactively() {
        let policy = SessionPolicy {
            manual_cookie: Some("novel_web_id=manual".into()),
            rotate_after_successes: 2,
            ..policy()
        };
        let session = SessionManager::new(ProbeStub::new(500), policy);
        assert_eq!(session.current_headers().await.cookie, "novel_web_id=manual");

        for _ in 0..5 {
            assert_eq!(session.record_outcome(Outcome::Success).await, None);
        }

        session
            .rotate(&probe(), RotationTrigger::ConsecutiveFailures(8))
            .await;
        assert_ne!(session.current_headers().await.cookie, "novel_web_id=manual");
        assert!(!session.state().await.pinned);
    }
}
