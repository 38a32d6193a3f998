//! services/retry.rs
//! Reintentos con backoff exponencial + jitter, y chequeo opcional de
//! conectividad antes de un envío.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Política de reintentos: `max_attempts` intentos en total; el retraso tras
/// el intento `n` (0-based) es `min(base·2ⁿ + jitter, max)`, con jitter en `[0, base)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Sin esperas; útil cuando el llamador ya controla el ritmo.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)));
        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.base_delay.as_nanos().min(u64::MAX as u128) as u64;
            Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
        };
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Reintenta `operation` ante cualquier error. Agotados los intentos, el
/// último error se devuelve sin modificar.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_classified(policy, operation, |_| true).await
}

/// Igual que `retry_with_backoff`, pero sólo reintenta los errores para los
/// que `should_retry` devuelve `true`; el resto se propaga de inmediato.
pub async fn retry_classified<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    mut operation: F,
    mut should_retry: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    C: FnMut(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                log::warn!(
                    "(retry) Intento {}/{} falló: {}. Reintentando en {:?}",
                    attempt,
                    policy.max_attempts,
                    err,
                    delay
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Espera (acotada) a que haya red antes de gastar el presupuesto de reintentos.
#[derive(Debug, Clone)]
pub struct Reachability {
    probe_addr: String,
    poll_interval: Duration,
    max_wait: Duration,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

impl Reachability {
    pub fn new(probe_addr: impl Into<String>, poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            probe_addr: probe_addr.into(),
            poll_interval,
            max_wait,
        }
    }

    pub async fn is_online(&self) -> bool {
        matches!(
            timeout(PROBE_TIMEOUT, TcpStream::connect(&self.probe_addr)).await,
            Ok(Ok(_))
        )
    }

    /// `true` en cuanto el probe conecta; `false` si se agota `max_wait`.
    pub async fn wait_until_online(&self) -> bool {
        let start = Instant::now();
        let mut logged = false;
        loop {
            if self.is_online().await {
                if logged {
                    log::info!("(reachability) Conexión restablecida tras {:?}", start.elapsed());
                }
                return true;
            }
            if start.elapsed() >= self.max_wait {
                log::error!(
                    "(reachability) Sin conexión tras {:?}, se desiste",
                    self.max_wait
                );
                return false;
            }
            if !logged {
                log::warn!(
                    "(reachability) Sin conexión ({}), esperando hasta {:?}...",
                    self.probe_addr,
                    self.max_wait
                );
                logged = true;
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1_000));
        for attempt in 0..3 {
            let floor = Duration::from_millis(100 * 2u64.pow(attempt));
            let d = policy.delay_for(attempt);
            assert!(d >= floor, "attempt {attempt}: {d:?} < {floor:?}");
            assert!(d < floor + Duration::from_millis(100));
        }
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn zero_base_means_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(4), Duration::ZERO);
    }

    #[tokio::test]
    async fn succeeds_after_k_failures_and_waits_for_backoff() {
        let policy = RetryPolicy::new(4, Duration::from_millis(20), Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let c = calls.clone();
        let result: Result<&str, String> = retry_with_backoff(&policy, || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= 2 {
                    Err(format!("fallo simulado #{n}"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 20ms + 40ms como mínimo
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let policy = RetryPolicy::immediate(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("error #{n}")) }
        })
        .await;

        assert_eq!(result, Err("error #3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_short_circuit() {
        let policy = RetryPolicy::immediate(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_classified(
            &policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("syntax error".to_string()) }
            },
            |e| e.contains("locked"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reachability_detects_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = Reachability::new(addr.to_string(), Duration::from_millis(10), Duration::from_millis(50));
        assert!(probe.wait_until_online().await);
    }

    #[tokio::test]
    async fn reachability_gives_up_after_max_wait() {
        // Puerto recién liberado: nadie escucha.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let probe = Reachability::new(addr.to_string(), Duration::from_millis(10), Duration::from_millis(40));
        let start = Instant::now();
        assert!(!probe.wait_until_online().await);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
