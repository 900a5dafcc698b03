//! Oracle gateway tests on virtual time

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use tabpilot::core::{OracleConfig, PilotError, Result};
use tabpilot::llm::{Clock, CompletionClient, CompletionRequest, ManualClock, OracleGateway};

/// Client failing with the given statuses in order, then succeeding
struct StatusClient {
    clock: Arc<ManualClock>,
    failures: Vec<Option<u16>>,
    attempts: AtomicUsize,
    admitted: Mutex<Vec<Instant>>,
}

impl StatusClient {
    fn new(clock: Arc<ManualClock>, failures: Vec<Option<u16>>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            failures,
            attempts: AtomicUsize::new(0),
            admitted: Mutex::new(Vec::new()),
        })
    }

    fn always(clock: Arc<ManualClock>, status: u16) -> Arc<Self> {
        Self::new(clock, vec![Some(status); 64])
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn admitted(&self) -> Vec<Instant> {
        self.admitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for StatusClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        self.admitted.lock().unwrap().push(self.clock.now());
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.failures.get(n) {
            Some(status) => Err(PilotError::oracle(*status, "scripted failure")),
            None => Ok("ok".to_string()),
        }
    }

    fn name(&self) -> &str {
        "status"
    }
}

fn gateway(
    client: Arc<StatusClient>,
    clock: Arc<ManualClock>,
    config: &OracleConfig,
) -> OracleGateway {
    OracleGateway::with_clock(client, config, clock)
}

fn oracle_config(ceiling: u32) -> OracleConfig {
    OracleConfig {
        ceiling_per_window: ceiling,
        ..OracleConfig::default()
    }
}

#[tokio::test]
async fn test_rate_limited_calls_follow_schedule_and_lower_ceiling() {
    let clock = Arc::new(ManualClock::new());
    let client = StatusClient::always(clock.clone(), 429);
    let gateway = gateway(client.clone(), clock.clone(), &oracle_config(100));

    let err = assert_err!(gateway.complete("next step?", &[]).await);

    match err {
        PilotError::OracleFatal { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("expected OracleFatal, got {other:?}"),
    }
    assert_eq!(client.attempts(), 5);
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10),
        ]
    );
    // 100 -> 75 -> 56 -> 42 -> 31
    assert_eq!(gateway.ceiling(), 31);
}

#[tokio::test]
async fn test_transient_failures_back_off_without_touching_ceiling() {
    let clock = Arc::new(ManualClock::new());
    let client = StatusClient::new(clock.clone(), vec![Some(503), Some(503)]);
    let gateway = gateway(client.clone(), clock.clone(), &oracle_config(15));

    let text = assert_ok!(gateway.complete("next step?", &[]).await);

    assert_eq!(text, "ok");
    assert_eq!(client.attempts(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(500), Duration::from_millis(1000)]
    );
    assert_eq!(gateway.ceiling(), 15);
}

#[tokio::test]
async fn test_transport_error_without_status_is_retried() {
    let clock = Arc::new(ManualClock::new());
    let client = StatusClient::new(clock.clone(), vec![None]);
    let gateway = gateway(client.clone(), clock.clone(), &oracle_config(15));

    assert_ok!(gateway.complete("next step?", &[]).await);
    assert_eq!(client.attempts(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let clock = Arc::new(ManualClock::new());
    let client = StatusClient::always(clock.clone(), 400);
    let gateway = gateway(client.clone(), clock.clone(), &oracle_config(15));

    let err = assert_err!(gateway.complete("next step?", &[]).await);

    assert!(matches!(err, PilotError::OracleFatal { attempts: 1, .. }));
    assert_eq!(client.attempts(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_no_window_admits_more_than_ceiling() {
    let clock = Arc::new(ManualClock::new());
    let start = clock.now();
    let client = StatusClient::new(clock.clone(), Vec::new());
    let gateway = gateway(client.clone(), clock.clone(), &oracle_config(3));

    for _ in 0..10 {
        assert_ok!(gateway.complete("next step?", &[]).await);
    }

    let window = Duration::from_secs(60);
    let mut buckets: BTreeMap<u128, usize> = BTreeMap::new();
    for at in client.admitted() {
        let bucket = (at - start).as_millis() / window.as_millis();
        *buckets.entry(bucket).or_default() += 1;
    }

    assert!(buckets.values().all(|count| *count <= 3), "{buckets:?}");
    assert_eq!(buckets.get(&0), Some(&3));
    assert_eq!(clock.sleeps(), vec![window; 3]);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_budget() {
    let clock = Arc::new(ManualClock::new());
    let start = clock.now();
    let client = StatusClient::new(clock.clone(), Vec::new());
    let gateway = Arc::new(gateway(client.clone(), clock.clone(), &oracle_config(3)));

    let calls = (0..6).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.complete("next step?", &[]).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    let at_start = client.admitted().iter().filter(|at| **at == start).count();
    assert_eq!(at_start, 3);
    assert_eq!(gateway.rate_limit_state().calls_in_window(), 3);
}
