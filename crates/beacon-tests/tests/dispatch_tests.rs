//! Change routing and dispatch tests across scheduler, queue and store.

use beacon_core::change::{COMMAND_PROPERTY, Category, SCHEDULER_PROPERTY};
use beacon_core::ids::JobId;
use beacon_core::job::{Job, JobOutcome, JobStatus, TriggerKind};
use beacon_core::ports::JobStore;
use beacon_scheduler::{ForceRequest, SchedulerKind};
use beacon_tests::{CPP_URSA_1, CPP_URSA_2, ChangeFixture, TestHarness, at, init_test_logging};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

async fn job(harness: &TestHarness, id: JobId) -> Job {
    harness
        .store
        .get(id)
        .await
        .expect("Failed to load job")
        .expect("Job not found")
}

#[tokio::test]
async fn test_comment_command_queues_one_job_per_bound_builder() {
    init_test_logging();
    let harness = TestHarness::new();

    let ids = harness
        .dispatcher
        .handle_change(ChangeFixture::comment(42, "build", ""))
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let mut builders = BTreeSet::new();
    for id in ids {
        let job = job(&harness, id).await;
        assert_eq!(job.scheduler, "cpp");
        assert_eq!(job.properties[COMMAND_PROPERTY], "build");
        assert!(builders.insert(job.builder));
    }
    assert_eq!(
        builders,
        BTreeSet::from([CPP_URSA_1.to_string(), CPP_URSA_2.to_string()])
    );
    assert_eq!(harness.engine.count(), 2);
}

#[tokio::test]
async fn test_unknown_comment_command_triggers_nothing() {
    let harness = TestHarness::new();

    let ids = harness
        .dispatcher
        .handle_change(ChangeFixture::comment(42, "crossbow", "submit -g wheel"))
        .await
        .unwrap();

    assert!(ids.is_empty());
    assert_eq!(harness.engine.count(), 0);
}

#[tokio::test]
async fn test_periodic_scheduler_fires_only_on_its_timer() {
    init_test_logging();
    let harness = TestHarness::new();

    // Neither a matching nor a non-matching event reaches the nightly builders.
    let from_events = [
        harness.dispatcher.handle_change(ChangeFixture::push_cpp("abc")).await.unwrap(),
        harness.dispatcher.handle_change(ChangeFixture::push_python("def")).await.unwrap(),
    ];
    for id in from_events.iter().flatten() {
        assert_eq!(job(&harness, *id).await.scheduler, "cpp");
    }

    let nightly = harness.dispatcher.project().scheduler("nightly").unwrap();
    let SchedulerKind::Periodic { cadence } = &nightly.kind else {
        panic!("nightly is not periodic");
    };
    assert_eq!(cadence.next_after(at(2, 0)), Some(at(3, 0)));

    let ids = harness.dispatcher.fire_periodic("nightly", at(3, 0)).await.unwrap();
    assert_eq!(ids.len(), 2);
    for id in ids {
        let job = job(&harness, id).await;
        assert_eq!(job.trigger, TriggerKind::Periodic);
        assert!(job.builder.starts_with("Python "));
        assert!(job.change.files.is_empty());
        assert_eq!(job.change.category, Category::Untagged);
        assert_eq!(job.properties[SCHEDULER_PROPERTY], "nightly");
        assert_eq!(job.properties["date"], "2019-04-01");
    }

    let err = harness.dispatcher.fire_periodic("cpp", at(3, 0)).await;
    assert!(err.is_err());
}

async fn complete_all(harness: &TestHarness, ids: &[JobId]) {
    for id in ids {
        harness
            .dispatcher
            .job_completed(*id, JobOutcome::new(JobStatus::Success))
            .await
            .expect("Failed to complete job");
    }
}

#[tokio::test]
async fn test_periodic_scheduler_fires_on_consecutive_days() {
    let harness = TestHarness::new();
    let day = chrono::Duration::hours(24);

    let first = harness.dispatcher.fire_periodic("nightly", at(3, 0)).await.unwrap();
    assert_eq!(first.len(), 2);
    complete_all(&harness, &first).await;

    let second = harness
        .dispatcher
        .fire_periodic("nightly", at(3, 0) + day)
        .await
        .unwrap();
    assert_eq!(second.len(), 2);
    for id in &second {
        let job = job(&harness, *id).await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.properties["date"], "2019-04-02");
    }

    // A firing that lands while the previous one still runs waits for it.
    let third = harness
        .dispatcher
        .fire_periodic("nightly", at(3, 0) + day + day)
        .await
        .unwrap();
    assert_eq!(third.len(), 2);
    assert_eq!(harness.dispatcher.queue_depth().await, 2);
}

#[tokio::test]
async fn test_new_build_comment_queues_again_but_redelivery_does_not() {
    let harness = TestHarness::new();
    let comment = |id: u64| ChangeFixture::comment(42, "build", "").with_comment_id(id);

    let first = harness.dispatcher.handle_change(comment(1001)).await.unwrap();
    assert_eq!(first.len(), 2);
    complete_all(&harness, &first).await;

    let redelivered = harness.dispatcher.handle_change(comment(1001)).await.unwrap();
    assert!(redelivered.is_empty());

    let second = harness.dispatcher.handle_change(comment(1002)).await.unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(harness.engine.count(), 4);
}

#[tokio::test]
async fn test_redelivered_change_does_not_grow_queue() {
    let harness = TestHarness::new();

    // One job per builder runs; the next two revisions wait behind it.
    for revision in ["r1", "r2", "r3"] {
        let ids = harness
            .dispatcher
            .handle_change(ChangeFixture::push_cpp(revision))
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
    }
    assert_eq!(harness.dispatcher.queue_depth().await, 4);

    for revision in ["r1", "r3"] {
        let ids = harness
            .dispatcher
            .handle_change(ChangeFixture::push_cpp(revision))
            .await
            .unwrap();
        assert!(ids.is_empty(), "{revision} was queued twice");
    }
    assert_eq!(harness.dispatcher.queue_depth().await, 4);
    assert_eq!(harness.store.list_recent(100).await.unwrap().len(), 6);

    // A different file set is a different change.
    let widened = ChangeFixture::push_cpp("r3").with_files(["cpp/CMakeLists.txt"]);
    let ids = harness.dispatcher.handle_change(widened).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(harness.dispatcher.queue_depth().await, 6);
}

#[tokio::test]
async fn test_forced_builds_bypass_deduplication() {
    let harness = TestHarness::new();
    let request = || ForceRequest {
        revision: Some("abc".into()),
        ..ForceRequest::default()
    };

    let first = harness.dispatcher.force("manual", request()).await.unwrap();
    let second = harness.dispatcher.force("manual", request()).await.unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(second.len(), 4);
    for id in second {
        assert_eq!(job(&harness, id).await.trigger, TriggerKind::Manual);
    }
}

#[tokio::test]
async fn test_completion_starts_the_next_pending_job() {
    let harness = TestHarness::new();

    let first = harness
        .dispatcher
        .force_builder(CPP_URSA_1, ForceRequest::default())
        .await
        .unwrap();
    let second = harness
        .dispatcher
        .force_builder(CPP_URSA_1, ForceRequest::default())
        .await
        .unwrap();
    assert_eq!(job(&harness, second).await.status, JobStatus::Pending);

    harness.dispatcher.job_started(first).await.unwrap();
    let done = harness
        .dispatcher
        .job_completed(first, JobOutcome::new(JobStatus::Success))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Success);
    assert!(done.completed_at.is_some());

    assert_eq!(job(&harness, second).await.status, JobStatus::Running);
    let started: Vec<JobId> = harness.engine.assignments().iter().map(|a| a.job_id).collect();
    assert_eq!(started, vec![first, second]);

    let again = harness
        .dispatcher
        .job_completed(first, JobOutcome::new(JobStatus::Failure))
        .await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_cancelled_job_can_be_triggered_again() {
    let harness = TestHarness::new();

    harness.dispatcher.handle_change(ChangeFixture::push_cpp("r1")).await.unwrap();
    let pending = harness
        .dispatcher
        .handle_change(ChangeFixture::push_cpp("r2"))
        .await
        .unwrap();

    for id in &pending {
        let job = harness.dispatcher.cancel(*id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
    assert_eq!(harness.dispatcher.queue_depth().await, 0);

    let requeued = harness
        .dispatcher
        .handle_change(ChangeFixture::push_cpp("r2"))
        .await
        .unwrap();
    assert_eq!(requeued.len(), 2);
    assert_eq!(harness.dispatcher.queue_depth().await, 2);
}
