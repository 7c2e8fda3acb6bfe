//! Dispatcher behavior against the in-memory store with a manual clock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use tutorq_db::{MemoryJobStore, LEASE_EXPIRED_ERROR};
use tutorq_jobs::{
    ClaimOptions, Clock, DispatchEvent, Dispatcher, DispatcherConfig, EnqueueOptions, Enqueuer,
    HandlerRegistry, Job, JobContext, JobHandler, JobResult, JobStatus, JobStore, JobType,
    ManualClock, MockBatchApi, NewJob, NoOpHandler,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn tenant(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn creator() -> Uuid {
    Uuid::from_u128(0xC0FFEE)
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Retry,
    Fail,
    Panic,
    Hang,
}

/// Handler whose outcome is fixed up front; records every job it runs.
struct ScriptedHandler {
    job_type: JobType,
    behavior: Behavior,
    seen: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.seen.lock().unwrap().push(ctx.job_id());
        match self.behavior {
            Behavior::Succeed => JobResult::Success(Some(json!({"ok": true}))),
            Behavior::Retry => JobResult::Retry("upstream unavailable".to_string()),
            Behavior::Fail => JobResult::Failed("bad input".to_string()),
            Behavior::Panic => panic!("boom"),
            Behavior::Hang => std::future::pending::<JobResult>().await,
        }
    }
}

/// Simulates a slow handler whose lease expires and is re-claimed elsewhere
/// before it finishes.
struct LeaseStealer {
    store: Arc<MemoryJobStore>,
    clock: ManualClock,
}

#[async_trait]
impl JobHandler for LeaseStealer {
    fn job_type(&self) -> JobType {
        JobType::GeneratePdf
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        self.clock.advance(chrono::Duration::minutes(20));
        let now = self.clock.now();
        self.store
            .sweep_expired_leases(now - chrono::Duration::minutes(15), now)
            .await
            .unwrap();
        self.store
            .claim("worker-thief", 1, now, ClaimOptions::default())
            .await
            .unwrap();
        JobResult::Success(None)
    }
}

/// The first job it runs stalls for 20 minutes, during which another
/// invocation sweeps every lease of the pass.
struct StallThenSweep {
    store: Arc<MemoryJobStore>,
    clock: ManualClock,
    stalled: AtomicBool,
    seen: Arc<Mutex<Vec<Uuid>>>,
}

#[async_trait]
impl JobHandler for StallThenSweep {
    fn job_type(&self) -> JobType {
        JobType::GeneratePdf
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        self.seen.lock().unwrap().push(ctx.job_id());
        if !self.stalled.swap(true, Ordering::SeqCst) {
            self.clock.advance(chrono::Duration::minutes(20));
            let other = Dispatcher::new(
                self.store.clone(),
                Arc::new(HandlerRegistry::builder().build()),
                Arc::new(self.clock.clone()),
            );
            other.process_jobs(0).await.unwrap();
        }
        JobResult::Success(None)
    }
}

/// Records which invocation ran each job, yielding so overlapping passes interleave.
struct RecordingHandler {
    runs: Arc<Mutex<Vec<(String, Uuid)>>>,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    fn job_type(&self) -> JobType {
        JobType::GeneratePdf
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        tokio::task::yield_now().await;
        self.runs
            .lock()
            .unwrap()
            .push((ctx.worker_id.clone(), ctx.job_id()));
        tokio::task::yield_now().await;
        JobResult::Success(None)
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    clock: ManualClock,
    enqueuer: Enqueuer,
    dispatcher: Dispatcher,
    seen: Arc<Mutex<Vec<Uuid>>>,
}

impl Harness {
    fn new(registry: HandlerRegistry, config: DispatcherConfig) -> Self {
        Self::with_parts(
            Arc::new(MemoryJobStore::new()),
            ManualClock::new(t0()),
            registry,
            config,
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    fn scripted(behavior: Behavior, config: DispatcherConfig) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = HandlerRegistry::builder()
            .with_handler(ScriptedHandler {
                job_type: JobType::GeneratePdf,
                behavior,
                seen: seen.clone(),
            })
            .build();
        Self::with_parts(
            Arc::new(MemoryJobStore::new()),
            ManualClock::new(t0()),
            registry,
            config,
            seen,
        )
    }

    fn with_parts(
        store: Arc<MemoryJobStore>,
        clock: ManualClock,
        registry: HandlerRegistry,
        config: DispatcherConfig,
        seen: Arc<Mutex<Vec<Uuid>>>,
    ) -> Self {
        let registry = Arc::new(registry);
        let enqueuer = Enqueuer::new(
            store.clone(),
            registry.clone(),
            Arc::new(MockBatchApi::new()),
            Arc::new(clock.clone()),
        );
        let dispatcher =
            Dispatcher::new(store.clone(), registry, Arc::new(clock.clone())).with_config(config);
        Self {
            store,
            clock,
            enqueuer,
            dispatcher,
            seen,
        }
    }

    async fn enqueue_for(&self, tenant_id: Uuid, options: EnqueueOptions) -> Job {
        self.enqueuer
            .enqueue(tenant_id, creator(), JobType::GeneratePdf, json!({}), options)
            .await
            .unwrap()
    }

    async fn enqueue(&self, options: EnqueueOptions) -> Job {
        self.enqueue_for(tenant(1), options).await
    }

    async fn job(&self, id: Uuid) -> Job {
        self.enqueuer.get_job(id).await.unwrap()
    }

    fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_higher_priority_claimed_first_regardless_of_creation_order() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let low = h.enqueue(EnqueueOptions::new().with_priority(1)).await;
    h.clock.advance(chrono::Duration::seconds(1));
    let high = h.enqueue(EnqueueOptions::new().with_priority(5)).await;

    assert_eq!(h.dispatcher.process_jobs(1).await.unwrap(), 1);

    assert_eq!(h.seen(), vec![high.id]);
    assert_eq!(h.job(high.id).await.status, JobStatus::Completed);
    assert_eq!(h.job(low.id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_equal_priority_runs_fifo() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let mut expected = Vec::new();
    for _ in 0..4 {
        expected.push(h.enqueue(EnqueueOptions::new()).await.id);
        h.clock.advance(chrono::Duration::seconds(1));
    }

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 4);
    assert_eq!(h.seen(), expected);
}

#[tokio::test]
async fn test_delayed_job_not_claimed_before_run_after() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let job = h
        .enqueue(EnqueueOptions::new().with_delay(chrono::Duration::minutes(10)))
        .await;
    assert_eq!(job.run_after, t0() + chrono::Duration::minutes(10));

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);
    h.clock.advance(chrono::Duration::minutes(9));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);

    h.clock.advance(chrono::Duration::minutes(1));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);
    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_success_records_result_and_clears_lease() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new()).await;
    h.clock.advance(chrono::Duration::seconds(5));

    h.dispatcher.process_jobs(10).await.unwrap();

    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(json!({"ok": true})));
    assert_eq!(done.attempts, 0);
    assert!(done.locked_by.is_none());
    assert!(done.locked_at.is_none());
    assert_eq!(done.updated_at, t0() + chrono::Duration::seconds(5));
}

#[tokio::test]
async fn test_success_without_data_stores_empty_object() {
    let registry = HandlerRegistry::builder()
        .with_handler(NoOpHandler::new(JobType::GeneratePdf))
        .build();
    let h = Harness::new(registry, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new()).await;

    h.dispatcher.process_jobs(10).await.unwrap();

    assert_eq!(h.job(job.id).await.result, Some(json!({})));
}

#[tokio::test]
async fn test_transient_failure_retries_with_backoff_until_failed() {
    let h = Harness::scripted(Behavior::Retry, DispatcherConfig::default());
    let mut events = h.dispatcher.events();
    let job = h.enqueue(EnqueueOptions::new()).await;
    assert_eq!(job.max_attempts, 3);

    // First failure: base delay.
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);
    let first = h.job(job.id).await;
    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.run_after, t0() + chrono::Duration::seconds(30));
    assert_eq!(first.error.as_deref(), Some("upstream unavailable"));
    assert!(first.locked_by.is_none());

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);

    // Second failure: doubled delay.
    h.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);
    let second = h.job(job.id).await;
    assert_eq!(second.attempts, 2);
    assert_eq!(second.run_after, h.clock.now() + chrono::Duration::seconds(60));

    // Third failure exhausts the attempts.
    h.clock.advance(chrono::Duration::seconds(60));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.attempts <= failed.max_attempts);

    h.clock.advance(chrono::Duration::hours(2));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);
    assert_eq!(h.seen().len(), 3);

    let outcomes: Vec<DispatchEvent> = drain(&mut events)
        .into_iter()
        .filter(|e| !matches!(e, DispatchEvent::JobStarted { .. }))
        .collect();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], DispatchEvent::JobRetrying { .. }));
    assert!(matches!(outcomes[1], DispatchEvent::JobRetrying { .. }));
    assert!(matches!(
        &outcomes[2],
        DispatchEvent::JobFailed { job_id, .. } if *job_id == job.id
    ));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let h = Harness::scripted(Behavior::Fail, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new()).await;

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_deref(), Some("bad input"));

    h.clock.advance(chrono::Duration::hours(2));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_single_attempt_job_fails_on_first_transient_error() {
    let h = Harness::scripted(Behavior::Retry, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new().with_max_attempts(1)).await;

    h.dispatcher.process_jobs(10).await.unwrap();

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
}

#[tokio::test]
async fn test_handler_panic_is_transient_failure() {
    let h = Harness::scripted(Behavior::Panic, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new()).await;

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);

    let retried = h.job(job.id).await;
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert!(retried.error.unwrap().contains("boom"));
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_is_transient_failure() {
    let config = DispatcherConfig::default().with_job_timeout(Duration::from_millis(50));
    let h = Harness::scripted(Behavior::Hang, config);
    let job = h.enqueue(EnqueueOptions::new()).await;

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);

    let retried = h.job(job.id).await;
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert!(retried.error.unwrap().contains("timeout"));
}

#[tokio::test]
async fn test_missing_handler_is_permanent_failure() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let orphan = h
        .store
        .insert(NewJob::pending(
            tenant(1),
            creator(),
            JobType::ReconcileStats,
            json!({}),
            t0(),
        ))
        .await
        .unwrap();

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);

    let failed = h.job(orphan.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.error.unwrap().contains("no handler registered"));
}

#[tokio::test]
async fn test_expired_lease_is_swept_back_to_pending() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let job = h.enqueue(EnqueueOptions::new()).await;
    let claimed = h
        .store
        .claim("worker-dead", 1, h.clock.now(), ClaimOptions::default())
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    h.clock.advance(chrono::Duration::minutes(14));
    assert_eq!(h.dispatcher.sweep_stale_leases().await.unwrap(), 0);

    h.clock.advance(chrono::Duration::minutes(2));
    assert_eq!(h.dispatcher.sweep_stale_leases().await.unwrap(), 1);

    let swept = h.job(job.id).await;
    assert_eq!(swept.status, JobStatus::Pending);
    assert_eq!(swept.attempts, 1);
    assert!(swept.locked_by.is_none());
    assert!(swept.locked_at.is_none());
    assert_eq!(swept.error.as_deref(), Some(LEASE_EXPIRED_ERROR));

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);
    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_sweep_fails_job_with_no_attempts_left() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    let mut events = h.dispatcher.events();
    let job = h.enqueue(EnqueueOptions::new().with_max_attempts(1)).await;
    h.store
        .claim("worker-dead", 1, h.clock.now(), ClaimOptions::default())
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::minutes(16));
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_deref(), Some(LEASE_EXPIRED_ERROR));
    assert!(h.seen().is_empty());
    assert_eq!(drain(&mut events), vec![DispatchEvent::LeasesSwept { count: 1 }]);
}

#[tokio::test]
async fn test_lost_lease_is_counted_but_not_overwritten() {
    let store = Arc::new(MemoryJobStore::new());
    let clock = ManualClock::new(t0());
    let registry = HandlerRegistry::builder()
        .with_handler(LeaseStealer {
            store: store.clone(),
            clock: clock.clone(),
        })
        .build();
    let h = Harness::with_parts(
        store,
        clock,
        registry,
        DispatcherConfig::default(),
        Arc::new(Mutex::new(Vec::new())),
    );
    let mut events = h.dispatcher.events();
    let job = h.enqueue(EnqueueOptions::new()).await;

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 1);

    let stolen = h.job(job.id).await;
    assert_eq!(stolen.status, JobStatus::Processing);
    assert_eq!(stolen.locked_by.as_deref(), Some("worker-thief"));
    assert_eq!(stolen.attempts, 1);
    assert!(stolen.result.is_none());
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, DispatchEvent::JobCompleted { .. })));
}

#[tokio::test]
async fn test_job_swept_before_it_starts_is_skipped() {
    let store = Arc::new(MemoryJobStore::new());
    let clock = ManualClock::new(t0());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = HandlerRegistry::builder()
        .with_handler(StallThenSweep {
            store: store.clone(),
            clock: clock.clone(),
            stalled: AtomicBool::new(false),
            seen: seen.clone(),
        })
        .build();
    let h = Harness::with_parts(store, clock, registry, DispatcherConfig::default(), seen);
    let mut events = h.dispatcher.events();

    let first = h.enqueue(EnqueueOptions::new().with_priority(9)).await;
    let waiting = h
        .enqueue(EnqueueOptions::new().with_priority(5).with_max_attempts(3))
        .await;
    let last_try = h
        .enqueue(EnqueueOptions::new().with_priority(1).with_max_attempts(1))
        .await;

    assert_eq!(h.dispatcher.process_jobs(3).await.unwrap(), 1);
    assert_eq!(h.seen(), vec![first.id]);

    // Swept while queued behind the first job; never started here.
    let requeued = h.job(waiting.id).await;
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.attempts, 1);
    assert!(requeued.locked_by.is_none());

    let failed = h.job(last_try.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert_eq!(failed.error.as_deref(), Some(LEASE_EXPIRED_ERROR));

    let started: Vec<Uuid> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            DispatchEvent::JobStarted { job_id, .. } => Some(job_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![first.id]);

    // The requeued jobs run normally on the next pass.
    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 2);
    assert_eq!(h.seen(), vec![first.id, first.id, waiting.id]);
    assert_eq!(h.job(waiting.id).await.status, JobStatus::Completed);
    assert_eq!(h.job(last_try.id).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_pass_never_claims_more_than_fits_in_a_lease() {
    let config = DispatcherConfig::default()
        .with_lease_timeout(Duration::from_secs(100))
        .with_job_timeout(Duration::from_secs(30));
    assert_eq!(config.max_jobs_per_pass(), 3);
    let h = Harness::scripted(Behavior::Succeed, config);
    for _ in 0..5 {
        h.enqueue(EnqueueOptions::new()).await;
    }

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 3);
    let stats = h.enqueuer.queue_stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 2);
}

#[tokio::test]
async fn test_concurrent_passes_never_run_a_job_twice() {
    let runs = Arc::new(Mutex::new(Vec::new()));
    let registry = HandlerRegistry::builder()
        .with_handler(RecordingHandler { runs: runs.clone() })
        .build();
    let h = Harness::new(registry, DispatcherConfig::default());
    let mut ids = HashSet::new();
    for _ in 0..5 {
        ids.insert(h.enqueue(EnqueueOptions::new()).await.id);
    }
    let second = h.dispatcher.clone();

    let (a, b) = tokio::join!(h.dispatcher.process_jobs(5), second.process_jobs(5));
    assert_eq!(a.unwrap() + b.unwrap(), 5);

    let runs = runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 5);
    let ran: HashSet<Uuid> = runs.iter().map(|(_, id)| *id).collect();
    assert_eq!(ran, ids);
    let workers: HashSet<&str> = runs.iter().map(|(w, _)| w.as_str()).collect();
    for worker in &workers {
        let mine: HashSet<Uuid> = runs
            .iter()
            .filter(|(w, _)| w == worker)
            .map(|(_, id)| *id)
            .collect();
        for (other, id) in &runs {
            if other != worker {
                assert!(!mine.contains(id), "{} ran by two invocations", id);
            }
        }
    }

    for id in ids {
        let job = h.job(id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.locked_by.is_none());
        assert!(job.locked_at.is_none());
    }
}

#[tokio::test]
async fn test_per_tenant_limit_lets_other_tenants_through() {
    let config = DispatcherConfig::default().with_per_tenant_limit(Some(1));
    let h = Harness::scripted(Behavior::Succeed, config);
    let mut busy = Vec::new();
    for _ in 0..3 {
        busy.push(
            h.enqueue_for(tenant(1), EnqueueOptions::new().with_priority(5))
                .await
                .id,
        );
    }
    let quiet = h
        .enqueue_for(tenant(2), EnqueueOptions::new().with_priority(1))
        .await;

    assert_eq!(h.dispatcher.process_jobs(2).await.unwrap(), 2);

    assert_eq!(h.job(quiet.id).await.status, JobStatus::Completed);
    let mut completed = 0;
    for id in &busy {
        if h.job(*id).await.status == JobStatus::Completed {
            completed += 1;
        }
    }
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_batch_pending_and_cancelled_jobs_are_never_claimed() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    h.store
        .insert(NewJob::batch_pending(
            tenant(1),
            creator(),
            JobType::GenerateQuestionsBatch,
            vec![json!({})],
            "mock_batch_9".to_string(),
            t0(),
        ))
        .await
        .unwrap();
    let cancelled = h.enqueue(EnqueueOptions::new()).await;
    h.enqueuer.cancel(cancelled.id, "duplicate").await.unwrap();

    assert_eq!(h.dispatcher.process_jobs(10).await.unwrap(), 0);
    assert!(h.seen().is_empty());
}

#[tokio::test]
async fn test_zero_limit_only_sweeps() {
    let h = Harness::scripted(Behavior::Succeed, DispatcherConfig::default());
    h.enqueue(EnqueueOptions::new()).await;

    assert_eq!(h.dispatcher.process_jobs(0).await.unwrap(), 0);
    assert_eq!(h.enqueuer.queue_stats().await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_continuous_mode_processes_until_shutdown() {
    let config = DispatcherConfig::default().with_poll_interval(Duration::from_millis(10));
    let h = Harness::scripted(Behavior::Succeed, config);
    let mut events = h.dispatcher.events();
    let job = h.enqueue(EnqueueOptions::new()).await;

    let handle = h.dispatcher.clone().start();
    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(DispatchEvent::JobCompleted { job_id, .. }) => break job_id,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("job should complete in continuous mode");
    assert_eq!(completed, job.id);

    handle.shutdown().await.unwrap();
    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
}
