use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use courier_core::errors::AiError;
use courier_core::ids::{ConversationId, ProjectId};

use crate::client::{AiClient, TokenStream};

/// Retry and circuit breaker policy for the AI collaborator.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Trips open after N consecutive failures, lets one probe through after the
/// cooldown, and closes again on the next success.
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: RwLock<BreakerState>,
    consecutive_failures: AtomicU32,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: RwLock::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Whether a request may go out right now. An open breaker past its
    /// cooldown flips to half-open and admits one probe.
    fn try_acquire(&self) -> bool {
        let state = *self.state.read();
        match state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { since } => {
                if since.elapsed() < self.cooldown {
                    return false;
                }
                *self.state.write() = BreakerState::HalfOpen;
                true
            }
        }
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.state.write();
        if *state != BreakerState::Closed {
            info!("AI circuit breaker closed after successful request");
            *state = BreakerState::Closed;
        }
    }

    fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.threshold {
            return;
        }
        let mut state = self.state.write();
        if !matches!(*state, BreakerState::Open { .. }) {
            warn!(
                failures,
                cooldown_secs = self.cooldown.as_secs(),
                "AI circuit breaker opened"
            );
            *state = BreakerState::Open {
                since: Instant::now(),
            };
        }
    }

    fn state_name(&self) -> &'static str {
        match *self.state.read() {
            BreakerState::Closed => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// AiClient wrapper adding retries and a circuit breaker.
///
/// Retryable errors are reattempted with exponential backoff plus jitter,
/// honoring any server-suggested delay. Once the token stream is open no
/// retry happens: the stream is committed. `stop` passes through untouched,
/// it is best-effort by contract.
pub struct ReliableAiClient<C: AiClient> {
    inner: C,
    config: ReliableConfig,
    breaker: CircuitBreaker,
    total_retries: AtomicU64,
}

impl<C: AiClient> ReliableAiClient<C> {
    pub fn new(inner: C, config: ReliableConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_cooldown,
        );
        Self {
            inner,
            config,
            breaker,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Delay before retry number `attempt`, floored at 100ms so a zero
    /// config never busy-loops.
    fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(delay) = hint {
            return delay;
        }
        let doubled = self.config.base_delay.saturating_mul(1 << attempt.min(16));
        let capped = doubled.min(self.config.max_delay).as_millis() as f64;
        let spread = capped * self.config.jitter_factor;
        let jitter = (jitter_source() % (spread as u64 * 2 + 1)) as f64 - spread;
        Duration::from_millis((capped + jitter).max(100.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        self.breaker.state_name()
    }
}

/// Thread-local xorshift64; jitter does not need cryptographic randomness.
fn jitter_source() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1,
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<C: AiClient> AiClient for ReliableAiClient<C> {
    async fn stream_tokens(
        &self,
        conversation_id: &ConversationId,
        project_id: Option<&ProjectId>,
    ) -> Result<TokenStream, AiError> {
        let mut attempt = 0;
        loop {
            if !self.breaker.try_acquire() {
                return Err(AiError::Overloaded);
            }
            match self.inner.stream_tokens(conversation_id, project_id).await {
                Ok(stream) => {
                    self.breaker.on_success();
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.backoff(attempt, e.suggested_delay());
                    attempt += 1;
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        kind = e.error_kind(),
                        error = %e,
                        "retrying AI stream after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.breaker.on_failure();
                    return Err(e);
                }
            }
        }
    }

    async fn stop(&self, conversation_id: &ConversationId) -> Result<(), AiError> {
        self.inner.stop(conversation_id).await
    }
}
