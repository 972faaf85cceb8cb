//! Room aggregation: readiness gating, trigger, and combined summary.

mod common;

use std::sync::Arc;

use scribe_db::{JobKind, JobPatch, JobStatus};
use scribe_services::rooms::run_room_summary_task;
use scribe_services::tasks::TASK_ROOM_SUMMARY;

use common::{MockSummarizer, harness};

async fn seed_member(
    h: &common::Harness,
    job_id: &str,
    member: &str,
    status: JobStatus,
    transcript: Option<&str>,
) {
    h.manager
        .create_job_with_room(job_id, JobKind::Realtime, "room-1", member, bson::doc! {})
        .await
        .unwrap();
    let mut patch = JobPatch::default();
    if let Some(text) = transcript {
        patch = patch.with_transcript(text);
    }
    h.manager.update_status(job_id, status, patch).await.unwrap();
}

#[tokio::test]
async fn trigger_waits_until_every_job_finished() {
    let h = harness();
    h.manager.get_or_create_room("room-1").await.unwrap();

    seed_member(&h, "j-a", "alice", JobStatus::Transcribed, Some("가 발화")).await;
    seed_member(&h, "j-b", "bob", JobStatus::Processing, None).await;

    assert!(!h.manager.check_and_trigger_room_summary("room-1").await);
    assert!(h.queue.tasks.lock().unwrap().is_empty());

    h.manager
        .update_status(
            "j-b",
            JobStatus::Completed,
            JobPatch::default().with_transcript("나 발화"),
        )
        .await
        .unwrap();

    assert!(h.manager.check_and_trigger_room_summary("room-1").await);
    let tasks = h.queue.tasks.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].0, TASK_ROOM_SUMMARY);
    assert_eq!(tasks[0].1["room_id"], "room-1");
}

#[tokio::test]
async fn aggregation_writes_combined_summary() {
    let h = harness();
    h.manager.get_or_create_room("room-1").await.unwrap();

    seed_member(&h, "j-a", "alice", JobStatus::Transcribed, Some("가 발화")).await;
    seed_member(&h, "j-b", "bob", JobStatus::Completed, Some("나 발화")).await;
    seed_member(&h, "j-c", "carol", JobStatus::Transcribed, Some("다 발화")).await;

    run_room_summary_task(
        Arc::clone(&h.manager),
        Arc::new(MockSummarizer { fail: false }),
        Arc::new(h.queue.clone()),
        "room-1".to_string(),
        0,
    )
    .await;

    let room = h
        .manager
        .get_room_info("room-1")
        .await
        .unwrap()
        .expect("room exists");
    assert!(!room["total_summary"].is_null());
    assert_eq!(room["member_count"], 3);
}

#[tokio::test]
async fn not_ready_room_requeues_with_incremented_attempt() {
    let h = harness();
    h.manager.get_or_create_room("room-1").await.unwrap();
    seed_member(&h, "j-a", "alice", JobStatus::Processing, None).await;

    tokio::time::pause();
    let task = tokio::spawn(run_room_summary_task(
        Arc::clone(&h.manager),
        Arc::new(MockSummarizer { fail: false }),
        Arc::new(h.queue.clone()),
        "room-1".to_string(),
        1,
    ));
    tokio::time::advance(scribe_services::rooms::ROOM_SUMMARY_RETRY_DELAY).await;
    task.await.unwrap();

    let tasks = h.queue.tasks.lock().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].1["attempt"], 2);

    // Room summary was not written.
    let room = h
        .manager
        .get_room_info("room-1")
        .await
        .unwrap()
        .expect("room exists");
    assert!(room["total_summary"].is_null());
}
