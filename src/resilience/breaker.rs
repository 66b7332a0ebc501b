//! Per-provider circuit breakers wrapped around retried external calls.
//!
//! One `CircuitBreaker` per provider name, created lazily. A call goes
//! through `BreakerRegistry::execute`, which:
//!
//! 1. fails fast with `CircuitOpen` while the breaker is open,
//! 2. lets exactly one trial through once the cool-down has elapsed,
//! 3. retries transient failures per the `RetryPolicy`,
//! 4. counts every surfaced failure and resets on success.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::error::{FailureClass, ProviderError};
use crate::notify::{Notifier, Severity};

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive surfaced failures that open the breaker.
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing a trial call.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: BreakerState,
    pub failures: u32,
    pub threshold: u32,
}

#[derive(Debug)]
struct CircuitBreaker {
    failures: u32,
    state: BreakerState,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    /// Set when a trial is granted. A caller that is cancelled mid-trial never
    /// reports back, so a trial older than the cool-down is considered lost.
    trial_started: Option<Instant>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            failures: 0,
            state: BreakerState::Closed,
            last_failure: None,
            trial_in_flight: false,
            trial_started: None,
        }
    }

    fn trial_lost(&self, cool_down: Duration, now: Instant) -> bool {
        self.trial_started
            .is_some_and(|at| now.saturating_duration_since(at) >= cool_down)
    }

    fn cool_down_elapsed(&self, cool_down: Duration, now: Instant) -> bool {
        self.last_failure
            .is_none_or(|at| now.saturating_duration_since(at) >= cool_down)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Outcome of recording a failure, used to decide whether to alert.
enum Transition {
    None,
    Opened(u32),
    Reopened,
}

/// Process-wide set of breakers. Constructed explicitly and shared by `Arc`.
pub struct BreakerRegistry {
    config: BreakerConfig,
    retry: RetryPolicy,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    notifier: Arc<dyn Notifier>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, retry: RetryPolicy, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            retry,
            breakers: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    /// Run `op` against `provider` with retry and breaker accounting.
    ///
    /// `op` is invoked once per attempt. Transient failures are retried up to
    /// the policy's attempt limit and then surface as `RetriesExhausted`.
    /// Permanent and critical failures surface immediately.
    pub async fn execute<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let permit = self.acquire(provider)?;

        // A half-open trial is exactly one call, never retried.
        let max_attempts = match permit {
            Permit::Trial => 1,
            Permit::Normal => self.retry.max_attempts.max(1),
        };

        let mut attempt = 0;
        let failure = loop {
            match op().await {
                Ok(value) => {
                    self.record_success(provider);
                    return Ok(value);
                }
                Err(e) => {
                    let class = e.classify();
                    attempt += 1;
                    if class != FailureClass::Transient {
                        break e;
                    }
                    if attempt >= max_attempts {
                        break if permit == Permit::Trial {
                            e
                        } else {
                            ProviderError::RetriesExhausted {
                                provider: provider.to_string(),
                                attempts: attempt,
                                last: Box::new(e),
                            }
                        };
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    debug!(
                        provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.record_failure(provider).await;
        Err(failure)
    }

    /// Whether a call to `provider` right now would fail fast.
    pub fn is_open(&self, provider: &str) -> bool {
        let breakers = self.lock();
        let Some(b) = breakers.get(provider) else {
            return false;
        };
        match b.state {
            BreakerState::Closed => false,
            BreakerState::Open => !b.cool_down_elapsed(self.config.cool_down, Instant::now()),
            BreakerState::HalfOpen => {
                b.trial_in_flight && !b.trial_lost(self.config.cool_down, Instant::now())
            }
        }
    }

    pub fn snapshot(&self, provider: &str) -> BreakerSnapshot {
        let breakers = self.lock();
        let (state, failures) = breakers
            .get(provider)
            .map_or((BreakerState::Closed, 0), |b| (b.state, b.failures));
        BreakerSnapshot {
            provider: provider.to_string(),
            state,
            failures,
            threshold: self.config.failure_threshold,
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let names: Vec<String> = self.lock().keys().cloned().collect();
        names.iter().map(|n| self.snapshot(n)).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        // Breaker state stays consistent even if a holder panicked mid-update.
        self.breakers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn acquire(&self, provider: &str) -> Result<Permit, ProviderError> {
        let mut breakers = self.lock();
        let breaker = breakers
            .entry(provider.to_string())
            .or_insert_with(CircuitBreaker::new);
        let now = Instant::now();

        match breaker.state {
            BreakerState::Closed => Ok(Permit::Normal),
            BreakerState::Open if breaker.cool_down_elapsed(self.config.cool_down, now) => {
                breaker.state = BreakerState::HalfOpen;
                breaker.trial_in_flight = true;
                breaker.trial_started = Some(now);
                info!(provider, "Circuit half-open, allowing one trial call");
                Ok(Permit::Trial)
            }
            BreakerState::HalfOpen
                if !breaker.trial_in_flight
                    || breaker.trial_lost(self.config.cool_down, now) =>
            {
                breaker.trial_in_flight = true;
                breaker.trial_started = Some(now);
                Ok(Permit::Trial)
            }
            BreakerState::Open | BreakerState::HalfOpen => Err(ProviderError::CircuitOpen {
                provider: provider.to_string(),
            }),
        }
    }

    fn record_success(&self, provider: &str) {
        let mut breakers = self.lock();
        if let Some(b) = breakers.get_mut(provider) {
            if b.state != BreakerState::Closed {
                info!(provider, "Circuit closed after successful trial");
            }
            b.failures = 0;
            b.state = BreakerState::Closed;
            b.trial_in_flight = false;
            b.trial_started = None;
        }
    }

    async fn record_failure(&self, provider: &str) {
        let transition = {
            let mut breakers = self.lock();
            let b = breakers
                .entry(provider.to_string())
                .or_insert_with(CircuitBreaker::new);
            b.failures = b.failures.saturating_add(1);
            b.last_failure = Some(Instant::now());

            match b.state {
                BreakerState::HalfOpen => {
                    b.state = BreakerState::Open;
                    b.trial_in_flight = false;
                    b.trial_started = None;
                    Transition::Reopened
                }
                BreakerState::Closed if b.failures >= self.config.failure_threshold => {
                    b.state = BreakerState::Open;
                    Transition::Opened(b.failures)
                }
                _ => Transition::None,
            }
        };

        match transition {
            Transition::Opened(failures) => {
                warn!(provider, failures, "Circuit opened");
                self.notifier
                    .alert(
                        Severity::Warning,
                        &format!("Circuit breaker opened for {provider}"),
                        serde_json::json!({
                            "provider": provider,
                            "failures": failures,
                            "cool_down_secs": self.config.cool_down.as_secs(),
                        }),
                    )
                    .await;
            }
            Transition::Reopened => {
                warn!(provider, "Trial call failed, circuit reopened");
                self.notifier
                    .alert(
                        Severity::Warning,
                        &format!("Circuit breaker reopened for {provider}"),
                        serde_json::json!({ "provider": provider }),
                    )
                    .await;
            }
            Transition::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct CountingNotifier {
        alerts: AtomicU32,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn alert(&self, _severity: Severity, _message: &str, _context: serde_json::Value) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_ratio: 0.1,
        }
    }

    fn registry(threshold: u32, cool_down: Duration) -> (BreakerRegistry, Arc<CountingNotifier>) {
        let notifier = Arc::new(CountingNotifier::default());
        let reg = BreakerRegistry::new(
            BreakerConfig {
                failure_threshold: threshold,
                cool_down,
            },
            fast_retry(),
            notifier.clone(),
        );
        (reg, notifier)
    }

    fn server_error() -> ProviderError {
        ProviderError::Http {
            provider: "smtp".into(),
            status: 500,
            body: "boom".into(),
        }
    }

    #[tokio::test]
    async fn transient_failure_retried_then_succeeds() {
        let (reg, _) = registry(5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let result = reg
            .execute("smtp", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(server_error()) } else { Ok("id-1") } }
            })
            .await;

        assert_eq!(result.unwrap(), "id-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reg.snapshot("smtp").failures, 0);
    }

    #[tokio::test]
    async fn transient_failure_exhausts_retries() {
        let (reg, _) = registry(5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let err = reg
            .execute("smtp", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "retries_exhausted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reg.snapshot("smtp").failures, 1);
    }

    #[tokio::test]
    async fn permanent_failure_not_retried() {
        let (reg, _) = registry(5, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let err = reg
            .execute("smtp", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(ProviderError::Http {
                        provider: "smtp".into(),
                        status: 400,
                        body: "invalid recipient".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.classify(), FailureClass::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reg.snapshot("smtp").failures, 1);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let (reg, notifier) = registry(5, Duration::from_secs(60));

        for _ in 0..5 {
            let _ = reg
                .execute("smtp", || async { Err::<(), _>(server_error()) })
                .await;
        }
        assert_eq!(reg.snapshot("smtp").state, BreakerState::Open);
        assert!(reg.is_open("smtp"));
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let err = reg
            .execute("smtp", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ProviderError>(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_allows_exactly_one_trial() {
        let (reg, _) = registry(1, Duration::from_millis(30));
        let _ = reg
            .execute("twilio", || async { Err::<(), _>(server_error()) })
            .await;
        assert!(reg.is_open("twilio"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reg.is_open("twilio"));

        // First caller takes the trial and holds it while the second is rejected.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let reg = Arc::new(reg);
        let trial_reg = reg.clone();
        let trial = tokio::spawn(async move {
            let mut rx = Some(release_rx);
            trial_reg
                .execute("twilio", move || {
                    let rx = rx.take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        Ok::<_, ProviderError>("trial")
                    }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = reg
            .execute("twilio", || async { Ok::<_, ProviderError>("second") })
            .await;
        assert!(second.unwrap_err().is_circuit_open());

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), "trial");
        assert_eq!(reg.snapshot("twilio").state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn cancelled_trial_is_reissued_after_cool_down() {
        let (reg, _) = registry(1, Duration::from_millis(30));
        let _ = reg
            .execute("ai", || async { Err::<(), _>(server_error()) })
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The trial caller gives up before the call resolves.
        let hung = tokio::time::timeout(
            Duration::from_millis(5),
            reg.execute("ai", || std::future::pending::<Result<(), ProviderError>>()),
        )
        .await;
        assert!(hung.is_err());
        assert!(reg.is_open("ai"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let retried = reg
            .execute("ai", || async { Ok::<_, ProviderError>(1) })
            .await;
        assert_eq!(retried.unwrap(), 1);
        assert_eq!(reg.snapshot("ai").state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn failed_trial_reopens() {
        let (reg, notifier) = registry(1, Duration::from_millis(20));
        let _ = reg
            .execute("ai", || async { Err::<(), _>(server_error()) })
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let calls = AtomicU32::new(0);
        let _ = reg
            .execute("ai", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await;

        // Trial is never retried.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reg.snapshot("ai").state, BreakerState::Open);
        assert_eq!(notifier.alerts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn providers_are_isolated() {
        let (reg, _) = registry(1, Duration::from_secs(60));
        let _ = reg
            .execute("sendgrid", || async { Err::<(), _>(server_error()) })
            .await;
        assert!(reg.is_open("sendgrid"));
        assert!(!reg.is_open("smtp"));
        assert!(reg.execute("smtp", || async { Ok::<_, ProviderError>(1) }).await.is_ok());
    }
}
