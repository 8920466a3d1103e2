//! Background scheduler decisions against the in-memory ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use findthisplace_common::{Comment, CommentExtraction, Post, RunRecord, RunStatus};
use findthisplace_enrich::testing::MemoryStore;
use findthisplace_enrich::{Pipeline, PipelineSettings, Scheduler};
use findthisplace_geo::testing::MockTransport;
use findthisplace_geo::Geolocator;

const TWO_HOURS: Duration = Duration::from_secs(2 * 3600);

const SHORT: &str = "https://maps.app.goo.gl/abc123";

fn scheduler(store: &Arc<MemoryStore>) -> Scheduler {
    scheduler_with(store, MockTransport::new(), Duration::from_secs(300))
}

fn scheduler_with(
    store: &Arc<MemoryStore>,
    transport: MockTransport,
    check_interval: Duration,
) -> Scheduler {
    let geo = Arc::new(Geolocator::new(Arc::new(transport), 10));
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        store.clone(),
        geo,
        PipelineSettings::default(),
    ));
    Scheduler::new(pipeline, store.clone(), check_interval, TWO_HOURS)
}

async fn wait_for_first_run(store: &MemoryStore) {
    for _ in 0..200 {
        if !store.runs().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn seeded_store() -> MemoryStore {
    MemoryStore::new().with_users([1]).with_post(Post {
        id: 1,
        text: "[НАЙДЕНО]".to_string(),
        created_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        tags: vec![],
        author_id: 1,
    })
}

fn last_run(hours_ago: i64, status: RunStatus) -> RunRecord {
    RunRecord {
        run_id: "previous".to_string(),
        finished_at: Utc::now() - chrono::Duration::hours(hours_ago),
        status,
    }
}

#[tokio::test]
async fn first_check_runs_when_ledger_is_empty() {
    let store = Arc::new(seeded_store());

    let status = scheduler(&store)
        .run_if_needed(&CancellationToken::new())
        .await;

    assert_eq!(status, Some(RunStatus::Success));
    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Success);
    assert!(store.resolutions().len() == 1);
}

#[tokio::test]
async fn recent_run_is_not_repeated() {
    let store = Arc::new(seeded_store().with_last_run(last_run(1, RunStatus::Success)));

    let status = scheduler(&store)
        .run_if_needed(&CancellationToken::new())
        .await;

    assert_eq!(status, None);
    assert_eq!(store.runs().len(), 1);
    assert!(store.resolutions().is_empty());
}

#[tokio::test]
async fn stale_run_triggers_a_new_one() {
    let store = Arc::new(seeded_store().with_last_run(last_run(3, RunStatus::Fail)));

    let status = scheduler(&store)
        .run_if_needed(&CancellationToken::new())
        .await;

    assert_eq!(status, Some(RunStatus::Success));
    assert_eq!(store.runs().len(), 2);
}

#[tokio::test]
async fn threshold_is_measured_from_the_given_instant() {
    let store = Arc::new(seeded_store().with_last_run(last_run(1, RunStatus::Success)));
    let sched = scheduler(&store);

    assert!(!sched.is_due(Utc::now()).await);
    assert!(sched.is_due(Utc::now() + chrono::Duration::hours(1)).await);
}

#[tokio::test]
async fn failed_run_is_recorded_as_fail() {
    let store = Arc::new(seeded_store());
    store.fail_reads(Some("connection reset"));

    let status = scheduler(&store)
        .run_if_needed(&CancellationToken::new())
        .await;

    assert_eq!(status, Some(RunStatus::Fail));
    assert_eq!(store.runs()[0].status, RunStatus::Fail);
}

#[tokio::test]
async fn cancelled_run_is_not_recorded() {
    let store = Arc::new(seeded_store());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let status = scheduler(&store).run_if_needed(&cancel).await;

    assert_eq!(status, None);
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn background_loop_runs_once_then_stops_on_cancel() {
    let store = Arc::new(seeded_store());
    let sched = Arc::new(scheduler(&store));
    let cancel = CancellationToken::new();

    let handle = sched.spawn(cancel.clone());

    // The first tick fires immediately; wait for its run to land.
    for _ in 0..100 {
        if !store.runs().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops after cancel")
        .unwrap();
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_loop_resolves_short_links_on_worker_threads() {
    let store = Arc::new(seeded_store().with_users([2]).with_comment(Comment {
        id: 10,
        post_id: 1,
        parent_id: None,
        rating: 3,
        text: format!("вот {SHORT}"),
        author_id: 2,
        created_at: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
    }));
    let transport =
        MockTransport::new().redirect(SHORT, "https://www.google.com/maps?ll=40.7128,-74.0060");
    let sched = Arc::new(scheduler_with(&store, transport, Duration::from_secs(300)));
    let cancel = CancellationToken::new();

    let handle = sched.spawn(cancel.clone());
    wait_for_first_run(&store).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops after cancel")
        .unwrap();
    assert_eq!(store.runs()[0].status, RunStatus::Success);
    let coords = store.comment_coordinates();
    assert_eq!(coords.len(), 1);
    assert!(matches!(coords[0].extraction, CommentExtraction::Extracted(_)));
}

#[tokio::test]
async fn zero_check_interval_does_not_panic_the_loop() {
    let store = Arc::new(seeded_store());
    let sched = Arc::new(scheduler_with(&store, MockTransport::new(), Duration::ZERO));
    let cancel = CancellationToken::new();

    let handle = sched.spawn(cancel.clone());
    wait_for_first_run(&store).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops after cancel")
        .expect("scheduler task does not panic");
    assert_eq!(store.runs().len(), 1);
}
