//! Best-effort notification egress for high-urgency tickets.
//!
//! A bounded worker pool owns delivery; callers enqueue and move on. Each
//! send is gated by the circuit breaker, throttled by the global rate
//! limiter, and retried with jittered exponential backoff. Delivery is not
//! durable: tasks still queued at shutdown are dropped after the drain
//! window, and a process exit mid-retry loses the notification. The ticket
//! itself is already persisted either way.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;
use crate::rate_limit::RateLimiter;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_CAP_SECS: u64 = 30;

/// Payload POSTed to the notification endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationTask {
    pub ticket_id: String,
    pub tenant_id: String,
    pub urgency: String,
    pub reason: String,
}

pub struct Notifier {
    tx: std::sync::Mutex<Option<mpsc::Sender<NotificationTask>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct Sender {
    client: reqwest::Client,
    notify_url: String,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    backoff_base_ms: u64,
}

impl Notifier {
    pub fn new(
        notify_url: &str,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        queue_capacity: usize,
        worker_count: usize,
    ) -> Self {
        Self::with_backoff_base(
            notify_url,
            breaker,
            limiter,
            timeout,
            queue_capacity,
            worker_count,
            1_000,
        )
    }

    /// Construction with a custom backoff base, for tests that cannot
    /// afford second-scale sleeps.
    pub fn with_backoff_base(
        notify_url: &str,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        queue_capacity: usize,
        worker_count: usize,
        backoff_base_ms: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<NotificationTask>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let sender = Arc::new(Sender {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to create HTTP client"),
            notify_url: notify_url.to_string(),
            breaker,
            limiter,
            timeout,
            backoff_base_ms,
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let rx = rx.clone();
                let sender = sender.clone();
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        match task {
                            Some(task) => {
                                sender.send_with_retry(&task).await;
                            }
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Queue a notification. Returns immediately; a full queue drops the
    /// task with a warning.
    pub fn enqueue(&self, task: NotificationTask) {
        let tx = self.tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            tracing::warn!(ticket_id = %task.ticket_id, "notifier is shut down, dropping notification");
            return;
        };
        if let Err(e) = tx.try_send(task) {
            tracing::warn!("notification queue full, dropping task: {}", e);
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl Sender {
    /// Run the bounded-retry send algorithm for one task.
    async fn send_with_retry(&self, task: &NotificationTask) -> bool {
        for attempt in 0..MAX_ATTEMPTS {
            // Fail fast while the breaker is open; the skip is final.
            if let Err(retry_in) = self.breaker.try_acquire() {
                tracing::warn!(
                    ticket_id = %task.ticket_id,
                    retry_in_secs = retry_in.as_secs(),
                    "circuit open, skipping notification"
                );
                return false;
            }

            self.limiter.acquire().await;

            let outcome = self
                .client
                .post(&self.notify_url)
                .timeout(self.timeout)
                .json(task)
                .send()
                .await;

            let retryable = match outcome {
                Ok(response) if response.status().is_success() => {
                    self.breaker.record_success();
                    tracing::info!(ticket_id = %task.ticket_id, "notification delivered");
                    return true;
                }
                Ok(response) if response.status().as_u16() == 429 => {
                    // The rate limiter's domain, not the breaker's.
                    self.breaker.record_success();
                    true
                }
                Ok(response) if response.status().is_server_error() => {
                    self.breaker.record_failure();
                    true
                }
                Ok(response) => {
                    self.breaker.record_success();
                    tracing::error!(
                        ticket_id = %task.ticket_id,
                        status = response.status().as_u16(),
                        "notification rejected"
                    );
                    return false;
                }
                Err(e) => {
                    self.breaker.record_failure();
                    tracing::warn!(ticket_id = %task.ticket_id, "notification send failed: {}", e);
                    true
                }
            };

            if retryable && attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }

        tracing::error!(
            ticket_id = %task.ticket_id,
            attempts = MAX_ATTEMPTS,
            "all notification attempts failed"
        );
        false
    }

    /// `min(2^attempt, cap) + jitter in [0, 2^attempt]`, scaled by the
    /// backoff base.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let step = 2u64.saturating_pow(attempt);
        let base = step.min(BACKOFF_CAP_SECS) * self.backoff_base_ms;
        let jitter = rand::thread_rng().gen_range(0..=step * self.backoff_base_ms);
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn stub_endpoint(
        responses: Vec<StatusCode>,
    ) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let responses = Arc::new(responses);

        let app = Router::new().route(
            "/notify",
            post(move || {
                let hits = hits_clone.clone();
                let responses = responses.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    *responses.get(n).unwrap_or(&StatusCode::OK)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/notify", addr), hits, server)
    }

    fn notifier(url: &str, breaker: Arc<CircuitBreaker>) -> Notifier {
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));
        Notifier::with_backoff_base(url, breaker, limiter, Duration::from_secs(2), 16, 1, 5)
    }

    fn task() -> NotificationTask {
        NotificationTask {
            ticket_id: "ext-1".to_string(),
            tenant_id: "t1".to_string(),
            urgency: "high".to_string(),
            reason: "High urgency ticket detected".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_and_reports_success() {
        let (url, hits, _server) = stub_endpoint(vec![]).await;
        let breaker = Arc::new(CircuitBreaker::with_defaults("notify"));
        let notifier = notifier(&url, breaker.clone());

        notifier.enqueue(task());
        notifier.shutdown().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.status().failure_count, 0);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let (url, hits, _server) = stub_endpoint(vec![
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ])
        .await;
        let breaker = Arc::new(CircuitBreaker::with_defaults("notify"));
        let notifier = notifier(&url, breaker.clone());

        notifier.enqueue(task());
        notifier.shutdown().await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.status().failure_count, 2);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let (url, hits, _server) = stub_endpoint(vec![
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::INTERNAL_SERVER_ERROR,
        ])
        .await;
        let breaker = Arc::new(CircuitBreaker::with_defaults("notify"));
        let notifier = notifier(&url, breaker);

        notifier.enqueue(task());
        notifier.shutdown().await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn open_breaker_skips_without_touching_downstream() {
        let (url, hits, _server) = stub_endpoint(vec![]).await;
        let breaker = Arc::new(CircuitBreaker::new(
            "notify",
            10,
            5,
            Duration::from_secs(30),
        ));
        // Trip the breaker before any notification
        for _ in 0..10 {
            breaker.try_acquire().unwrap();
            breaker.record_failure();
        }

        let notifier = notifier(&url, breaker);
        notifier.enqueue(task());
        notifier.shutdown().await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_4xx_is_not_retried_and_not_a_breaker_failure() {
        let (url, hits, _server) = stub_endpoint(vec![StatusCode::BAD_REQUEST]).await;
        let breaker = Arc::new(CircuitBreaker::with_defaults("notify"));
        let notifier = notifier(&url, breaker.clone());

        notifier.enqueue(task());
        notifier.shutdown().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.status().failure_count, 0);
    }
}
