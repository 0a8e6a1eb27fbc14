//! Database-backed scenarios: sync dedupe, retry/dead-letter, scheduler
//! idempotency, reminder gating, tenant isolation.
//!
//! These run against TEST_DATABASE_URL and skip (with a note) when it is
//! unset.

mod common;

use std::time::Duration;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use backoffice_core::domains::accounts::DataboxAccount;
use backoffice_core::domains::documents::{
    CreateOutcome, Document, DocumentError, DocumentStore, NewDocument, ReminderOffset,
};
use backoffice_core::domains::deadlines::{DeadlineReminderPayload, run_deadline_reminder};
use backoffice_core::domains::sync::{DataboxSyncPayload, run_databox_sync};
use backoffice_core::kernel::jobs::{
    DeadLetter, EnqueueOptions, Job, JobError, JobPriority, JobQueue, JobSchedule, JobStatus,
    PostgresJobQueue, ScheduleInterval, Scheduler,
};
use backoffice_core::kernel::test_dependencies::{MockFetcher, MockLlm, MockNotifier};

use common::{TestHarness, try_pool};

macro_rules! require_pool {
    () => {
        match try_pool().await {
            Some(pool) => pool,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping database test");
                return;
            }
        }
    };
}

async fn poll_claim(
    queue: &PostgresJobQueue,
    worker_id: &str,
    types: &[String],
) -> Job {
    for _ in 0..100 {
        if let Some(job) = queue
            .claim(worker_id, types, Duration::from_secs(10))
            .await
            .expect("claim")
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no job became claimable");
}

fn new_document(account_id: Uuid, external_id: &str, bytes: &'static [u8]) -> NewDocument {
    NewDocument {
        account_id,
        external_id: external_id.to_string(),
        doc_type: Some("bescheid".to_string()),
        title: Some(format!("Dokument {external_id}")),
        sender: Some("Finanzamt Österreich".to_string()),
        received_at: Utc::now(),
        content: Bytes::from_static(bytes),
        content_type: "application/pdf".to_string(),
        metadata: json!({}),
    }
}

// ============================================================================
// S1: databox sync dedupe
// ============================================================================

#[tokio::test]
async fn databox_sync_dedupes_identical_content() {
    let pool = require_pool!();

    let now = Utc::now();
    let fetcher = MockFetcher::new()
        .with_entry(
            "FN-1",
            "bescheid",
            now - ChronoDuration::hours(2),
            b"PDFA",
            "application/pdf",
        )
        .with_entry(
            "FN-2",
            "mitteilung",
            now - ChronoDuration::hours(1),
            b"PDFA",
            "application/pdf",
        );
    let harness =
        TestHarness::with_mocks(pool, fetcher, MockLlm::new(), MockNotifier::new()).await;

    let account = DataboxAccount::builder()
        .tenant_id(harness.tenant_id)
        .subscriber_id("123456789")
        .display_name("Hauptkonto")
        .sync_interval(ScheduleInterval::Hourly)
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let payload = DataboxSyncPayload {
        tenant_id: harness.tenant_id,
        account_id: None,
        range_days: None,
    };
    let result = run_databox_sync(payload, harness.ctx()).await.expect("sync");

    assert_eq!(result["accounts_synced"], 1);
    assert_eq!(result["documents_found"], 2);
    assert_eq!(result["documents_new"], 1);
    assert_eq!(result["documents_skipped"], 1);

    // Exactly one stored document, addressed by the first entry's id.
    let doc = Document::find_by_external_id(harness.tenant_id, account.id, "FN-1", &harness.pool)
        .await
        .expect("query")
        .expect("document exists");
    assert_eq!(
        doc.content_hash,
        "f7f5bb36cd66891d4fc8dba0b5eb2c464b0c07b293cc7073b3a2699a536b9e7b"
    );
    let second =
        Document::find_by_external_id(harness.tenant_id, account.id, "FN-2", &harness.pool)
            .await
            .expect("query");
    assert!(second.is_none(), "duplicate content must not create a row");

    // One analysis job enqueued for the one new document.
    let analysis_jobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE tenant_id = $1 AND job_type = 'document_analysis'",
    )
    .bind(harness.tenant_id)
    .fetch_one(&harness.pool)
    .await
    .expect("count");
    assert_eq!(analysis_jobs, 1);

    // The account's sync window advanced.
    let account = DataboxAccount::find_by_id(harness.tenant_id, account.id, &harness.pool)
        .await
        .expect("query")
        .expect("account");
    assert!(account.last_sync_at.is_some());
    assert_eq!(harness.fetcher.sessions_opened(), 1);
    assert_eq!(harness.fetcher.sessions_closed(), 1);
}

// ============================================================================
// S2: retry then dead-letter
// ============================================================================

#[tokio::test]
async fn failing_job_retries_then_dead_letters() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;

    let types = vec!["flaky_job".to_string()];
    let result = queue
        .enqueue(
            harness.tenant_id,
            "flaky_job",
            json!({"n": 1}),
            EnqueueOptions::builder().max_retries(2).build(),
        )
        .await
        .expect("enqueue");
    let job_id = result.job_id();

    for attempt in 1..=3 {
        let job = poll_claim(queue, "w1", &types).await;
        assert_eq!(job.id, job_id);
        assert_eq!(job.retry_count, attempt - 1);
        queue
            .fail(job.id, "w1", &JobError::retryable(format!("e{attempt}")))
            .await
            .expect("fail");
    }

    let job = Job::find_by_id(job_id, &harness.pool)
        .await
        .expect("query")
        .expect("job");
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.retry_count, 2);

    let letter = DeadLetter::find_by_original_job_id(job_id, &harness.pool)
        .await
        .expect("query")
        .expect("dead letter exists");
    assert_eq!(letter.error_messages(), vec!["e1", "e2", "e3"]);
}

#[tokio::test]
async fn permanent_failure_dead_letters_immediately() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;

    let types = vec!["poison_job".to_string()];
    let result = queue
        .enqueue(
            harness.tenant_id,
            "poison_job",
            json!({}),
            EnqueueOptions::default(),
        )
        .await
        .expect("enqueue");

    let job = poll_claim(queue, "w1", &types).await;
    queue
        .fail(job.id, "w1", &JobError::permanent("cannot decode payload"))
        .await
        .expect("fail");

    let job = Job::find_by_id(result.job_id(), &harness.pool)
        .await
        .expect("query")
        .expect("job");
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.retry_count, 0);
    assert!(
        DeadLetter::find_by_original_job_id(job.id, &harness.pool)
            .await
            .expect("query")
            .is_some()
    );
}

// ============================================================================
// S3: scheduler idempotent tick
// ============================================================================

#[tokio::test]
async fn concurrent_scheduler_ticks_materialise_once() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool.clone()).await;

    let now = Utc::now();
    let schedule = JobSchedule::builder()
        .tenant_id(harness.tenant_id)
        .name("hourly sync")
        .job_type("scheduled_sync")
        .interval(ScheduleInterval::Hourly)
        .last_run_at(now - ChronoDuration::hours(1))
        .next_run_at(now - ChronoDuration::seconds(30))
        .build()
        .insert(&pool)
        .await
        .expect("schedule insert");

    let queue_a: std::sync::Arc<dyn JobQueue> = harness.queue.clone();
    let queue_b: std::sync::Arc<dyn JobQueue> = harness.queue.clone();
    let scheduler_a = Scheduler::new(pool.clone(), queue_a, Duration::from_secs(30));
    let scheduler_b = Scheduler::new(pool.clone(), queue_b, Duration::from_secs(30));

    let (a, b) = tokio::join!(scheduler_a.run_once(now), scheduler_b.run_once(now));
    a.expect("tick a");
    b.expect("tick b");

    let jobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs WHERE tenant_id = $1 AND job_type = 'scheduled_sync'",
    )
    .bind(harness.tenant_id)
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(jobs, 1, "exactly one job per planned tick");

    let schedule = JobSchedule::find_by_id(schedule.id, &pool)
        .await
        .expect("query")
        .expect("schedule");
    assert_eq!(schedule.run_count, 1);
    let next = schedule.next_run_at.expect("advanced");
    assert!(next > now + ChronoDuration::minutes(59));
    assert!(next < now + ChronoDuration::minutes(61));

    // The materialised payload carries the schedule stamp.
    let payload: serde_json::Value = sqlx::query_scalar(
        "SELECT payload FROM jobs WHERE tenant_id = $1 AND job_type = 'scheduled_sync'",
    )
    .bind(harness.tenant_id)
    .fetch_one(&pool)
    .await
    .expect("payload");
    assert_eq!(payload["schedule_id"], schedule.id.to_string());
}

// ============================================================================
// Queue contracts
// ============================================================================

#[tokio::test]
async fn enqueue_with_same_idempotency_key_returns_same_job() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;

    let options = || {
        EnqueueOptions::builder()
            .idempotency_key("tick-1".to_string())
            .build()
    };

    let first = queue
        .enqueue(harness.tenant_id, "idem_job", json!({}), options())
        .await
        .expect("enqueue");
    let second = queue
        .enqueue(harness.tenant_id, "idem_job", json!({}), options())
        .await
        .expect("enqueue");

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.job_id(), second.job_id());
}

#[tokio::test]
async fn claim_prefers_priority_then_run_at() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;
    let types = vec!["prio_job".to_string()];

    queue
        .enqueue(
            harness.tenant_id,
            "prio_job",
            json!({"which": "normal"}),
            EnqueueOptions::default(),
        )
        .await
        .expect("enqueue");
    queue
        .enqueue(
            harness.tenant_id,
            "prio_job",
            json!({"which": "critical"}),
            EnqueueOptions::builder().priority(JobPriority::Critical).build(),
        )
        .await
        .expect("enqueue");

    let first = poll_claim(queue, "w1", &types).await;
    assert_eq!(first.payload["which"], "critical");
    let second = poll_claim(queue, "w1", &types).await;
    assert_eq!(second.payload["which"], "normal");
}

#[tokio::test]
async fn heartbeat_reports_lost_ownership() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;
    let types = vec!["hb_job".to_string()];

    queue
        .enqueue(harness.tenant_id, "hb_job", json!({}), EnqueueOptions::default())
        .await
        .expect("enqueue");
    let job = poll_claim(queue, "w1", &types).await;

    assert!(
        queue
            .heartbeat(job.id, "w1", Duration::from_secs(30))
            .await
            .expect("heartbeat")
    );
    assert!(
        !queue
            .heartbeat(job.id, "imposter", Duration::from_secs(30))
            .await
            .expect("heartbeat")
    );
}

#[tokio::test]
async fn completed_job_carries_handler_result() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let queue = &harness.queue;
    let types = vec!["result_job".to_string()];

    queue
        .enqueue(
            harness.tenant_id,
            "result_job",
            json!({}),
            EnqueueOptions::default(),
        )
        .await
        .expect("enqueue");
    let job = poll_claim(queue, "w1", &types).await;
    queue
        .complete(job.id, "w1", json!({"processed": 42}))
        .await
        .expect("complete");

    let job = Job::find_by_id(job.id, &harness.pool)
        .await
        .expect("query")
        .expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap()["processed"], 42);
    assert!(job.completed_at.is_some());
}

// ============================================================================
// Document boundaries and tenant isolation
// ============================================================================

#[tokio::test]
async fn size_cap_accepts_exact_and_rejects_by_one() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;

    let account = DataboxAccount::builder()
        .tenant_id(harness.tenant_id)
        .subscriber_id("223456789")
        .display_name("Größenlimit")
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let store = DocumentStore::new(harness.pool.clone(), harness.deps.storage.clone(), 8);

    let mut at_cap = new_document(account.id, "CAP-OK", b"12345678");
    at_cap.content = Bytes::from(vec![0u8; 8]);
    let (_, outcome) = store
        .create(harness.tenant_id, at_cap)
        .await
        .expect("exactly the cap is accepted");
    assert_eq!(outcome, CreateOutcome::Created);

    let mut over_cap = new_document(account.id, "CAP-NO", b"x");
    over_cap.content = Bytes::from(vec![0u8; 9]);
    let err = store
        .create(harness.tenant_id, over_cap)
        .await
        .expect_err("one byte over must be rejected");
    assert!(matches!(err, DocumentError::TooLarge { size: 9, max: 8 }));
}

#[tokio::test]
async fn cross_tenant_document_reads_are_not_found() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;
    let other_tenant = Uuid::new_v4();

    let account = DataboxAccount::builder()
        .tenant_id(other_tenant)
        .subscriber_id("323456789")
        .display_name("Fremdes Konto")
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let store = DocumentStore::new(
        harness.pool.clone(),
        harness.deps.storage.clone(),
        1024 * 1024,
    );
    let (doc, _) = store
        .create(other_tenant, new_document(account.id, "X-1", b"SECRET"))
        .await
        .expect("create");

    // Reading as another tenant is indistinguishable from a missing row.
    let err = store
        .fetch_content(harness.tenant_id, doc.id)
        .await
        .expect_err("cross-tenant read must fail");
    assert!(matches!(err, DocumentError::NotFound));

    let found = Document::find_by_id(harness.tenant_id, doc.id, &harness.pool)
        .await
        .expect("query");
    assert!(found.is_none());
}

// ============================================================================
// S5: reminder at-most-once
// ============================================================================

#[tokio::test]
async fn second_reminder_run_skips_already_sent() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;

    let account = DataboxAccount::builder()
        .tenant_id(harness.tenant_id)
        .subscriber_id("423456789")
        .display_name("Fristen")
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let store = DocumentStore::new(
        harness.pool.clone(),
        harness.deps.storage.clone(),
        1024 * 1024,
    );
    let (doc, _) = store
        .create(harness.tenant_id, new_document(account.id, "FR-1", b"FRIST"))
        .await
        .expect("create");

    let deadline = Utc::now().date_naive() + ChronoDuration::days(3);
    Document::set_deadline(harness.tenant_id, doc.id, deadline, &harness.pool)
        .await
        .expect("set deadline");

    let payload = || DeadlineReminderPayload {
        tenant_id: harness.tenant_id,
        reminder_days: None,
        include_extracted: false,
    };

    let first = run_deadline_reminder(payload(), harness.ctx())
        .await
        .expect("first run");
    assert_eq!(first["reminders_sent"], 1);

    let second = run_deadline_reminder(payload(), harness.ctx())
        .await
        .expect("second run");
    assert_eq!(second["reminders_sent"], 0);

    assert_eq!(harness.notifier.reminder_count(), 1);

    let sent_at =
        Document::reminder_sent_at(harness.tenant_id, doc.id, ReminderOffset::ThreeDays, &harness.pool)
            .await
            .expect("query");
    assert!(sent_at.is_some());
}

#[tokio::test]
async fn reminder_gate_is_won_exactly_once() {
    let pool = require_pool!();
    let harness = TestHarness::new(pool).await;

    let account = DataboxAccount::builder()
        .tenant_id(harness.tenant_id)
        .subscriber_id("523456789")
        .display_name("Gate")
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let store = DocumentStore::new(
        harness.pool.clone(),
        harness.deps.storage.clone(),
        1024 * 1024,
    );
    let (doc, _) = store
        .create(harness.tenant_id, new_document(account.id, "FR-2", b"GATE"))
        .await
        .expect("create");

    let first = Document::mark_reminder_sent(
        harness.tenant_id,
        doc.id,
        ReminderOffset::SevenDays,
        &harness.pool,
    )
    .await
    .expect("mark");
    let second = Document::mark_reminder_sent(
        harness.tenant_id,
        doc.id,
        ReminderOffset::SevenDays,
        &harness.pool,
    )
    .await
    .expect("mark");

    assert!(first, "first updater wins the gate");
    assert!(!second, "losing updater observes the non-null column");
}

#[tokio::test]
async fn failed_delivery_leaves_the_gate_open() {
    let pool = require_pool!();
    let harness = TestHarness::with_mocks(
        pool,
        MockFetcher::new(),
        MockLlm::new(),
        MockNotifier::failing(),
    )
    .await;

    let account = DataboxAccount::builder()
        .tenant_id(harness.tenant_id)
        .subscriber_id("623456789")
        .display_name("Kaputter Kanal")
        .build()
        .insert(&harness.pool)
        .await
        .expect("account insert");

    let store = DocumentStore::new(
        harness.pool.clone(),
        harness.deps.storage.clone(),
        1024 * 1024,
    );
    let (doc, _) = store
        .create(harness.tenant_id, new_document(account.id, "FR-3", b"FAIL"))
        .await
        .expect("create");

    let deadline = Utc::now().date_naive() + ChronoDuration::days(1);
    Document::set_deadline(harness.tenant_id, doc.id, deadline, &harness.pool)
        .await
        .expect("set deadline");

    let result = run_deadline_reminder(
        DeadlineReminderPayload {
            tenant_id: harness.tenant_id,
            reminder_days: None,
            include_extracted: false,
        },
        harness.ctx(),
    )
    .await
    .expect("run");

    assert_eq!(result["reminders_sent"], 0);
    assert_eq!(result["errors"].as_array().unwrap().len(), 1);

    // The column stays NULL so the next run can retry delivery.
    let sent_at =
        Document::reminder_sent_at(harness.tenant_id, doc.id, ReminderOffset::OneDay, &harness.pool)
            .await
            .expect("query");
    assert!(sent_at.is_none());
}
