use super::*;
use crate::error::Error;
use crate::types::DeliveryTarget;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingObserver {
    summaries: StdMutex<Vec<DrainSummary>>,
}

impl RecordingObserver {
    fn summaries(&self) -> Vec<DrainSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DrainObserver for RecordingObserver {
    async fn drained(&self, summary: DrainSummary) {
        self.summaries.lock().unwrap().push(summary);
    }
}

fn scheduler() -> (DestinationScheduler, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    (DestinationScheduler::new(observer.clone()), observer)
}

fn ctx(requester: &str) -> RequestContext {
    RequestContext::new(requester, 1, DeliveryTarget::Reply)
}

async fn settle(scheduler: &DestinationScheduler) {
    tokio::time::timeout(TEST_TIMEOUT, scheduler.wait_idle())
        .await
        .expect("scheduler did not drain");
}

#[tokio::test]
async fn units_run_in_submission_order_per_destination() {
    let (scheduler, _) = scheduler();
    let log: Arc<StdMutex<Vec<(u64, usize)>>> = Arc::default();

    for i in 0..6 {
        for dest in [1u64, 2] {
            let log = log.clone();
            scheduler
                .enqueue(WorkUnit::new(DestinationId(dest), ctx("u"), move || async move {
                    // later units finish faster, so any reordering would show
                    tokio::time::sleep(Duration::from_millis(12 - 2 * i as u64)).await;
                    log.lock().unwrap().push((dest, i));
                    Ok(())
                }))
                .await;
        }
    }
    settle(&scheduler).await;

    let log = log.lock().unwrap().clone();
    for dest in [1u64, 2] {
        let order: Vec<usize> = log.iter().filter(|(d, _)| *d == dest).map(|(_, i)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5], "destination {dest}");
    }
}

#[tokio::test]
async fn one_destination_never_runs_two_units_at_once() {
    let (scheduler, observer) = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = scheduler.clone();
            let running = running.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    let running = running.clone();
                    let peak = peak.clone();
                    scheduler
                        .enqueue(WorkUnit::new(DestinationId(9), ctx("u"), move || async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }))
                        .await;
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    settle(&scheduler).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let total: usize = observer.summaries().iter().map(|s| s.completed).sum();
    assert_eq!(total, 20);
}

#[tokio::test]
async fn failures_and_panics_do_not_stop_the_worker() {
    let (scheduler, observer) = scheduler();
    let ran_last = Arc::new(AtomicUsize::new(0));
    let dest = DestinationId(3);

    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), || async {
            Err(Error::Other("boom".into()))
        }))
        .await;
    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), || async {
            let blow_up = true;
            if blow_up {
                panic!("unit blew up");
            }
            Ok(())
        }))
        .await;
    let flag = ran_last.clone();
    scheduler
        .enqueue(WorkUnit::new(dest, ctx("last"), move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await;
    settle(&scheduler).await;

    assert_eq!(ran_last.load(Ordering::SeqCst), 1);
    let summaries = observer.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].completed, 1);
    assert_eq!(summaries[0].failed, 2);
    assert_eq!(summaries[0].context.requester, "last");
}

#[tokio::test]
async fn drain_is_reported_once_per_worker() {
    let (scheduler, observer) = scheduler();
    let dest = DestinationId(4);

    for _ in 0..3 {
        scheduler
            .enqueue(WorkUnit::new(dest, ctx("u"), || async { Ok(()) }))
            .await;
    }
    settle(&scheduler).await;
    assert!(!scheduler.is_active(dest).await);
    assert_eq!(scheduler.pending(dest).await, 0);

    let summaries = observer.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].destination, dest);
    assert_eq!(summaries[0].completed, 3);

    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), || async { Ok(()) }))
        .await;
    settle(&scheduler).await;
    assert_eq!(observer.summaries().len(), 2);
}

#[tokio::test]
async fn different_destinations_run_concurrently() {
    let (scheduler, _) = scheduler();
    let barrier = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicUsize::new(0));

    for dest in [10u64, 11] {
        let barrier = barrier.clone();
        let done = done.clone();
        scheduler
            .enqueue(WorkUnit::new(DestinationId(dest), ctx("u"), move || async move {
                // both units must be in flight at once to pass the barrier
                tokio::time::timeout(Duration::from_secs(5), barrier.wait())
                    .await
                    .map_err(|_| Error::Other("destinations were serialized".into()))?;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await;
    }
    settle(&scheduler).await;

    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pending_counts_units_behind_the_running_one() {
    let (scheduler, _) = scheduler();
    let dest = DestinationId(5);
    let gate = Arc::new(tokio::sync::Notify::new());

    let release = gate.clone();
    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), move || async move {
            release.notified().await;
            Ok(())
        }))
        .await;
    for _ in 0..2 {
        scheduler
            .enqueue(WorkUnit::new(dest, ctx("u"), || async { Ok(()) }))
            .await;
    }

    // give the worker a chance to pick up the first unit
    tokio::time::timeout(TEST_TIMEOUT, async {
        while scheduler.pending(dest).await != 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert!(scheduler.is_active(dest).await);
    assert_eq!(scheduler.active_destinations().await, 1);

    gate.notify_one();
    settle(&scheduler).await;
    assert!(!scheduler.is_active(dest).await);
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let (tx, mut rx) = broadcast::channel(16);
    let scheduler = DestinationScheduler::new(Arc::new(LogDrainObserver)).with_events(tx);
    let dest = DestinationId(6);

    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), || async {
            Err(Error::Other("nope".into()))
        }))
        .await;
    settle(&scheduler).await;

    assert!(matches!(rx.recv().await.unwrap(), Event::WorkerStarted { destination } if destination == dest));
    assert!(matches!(rx.recv().await.unwrap(), Event::UnitFailed { .. }));
    match rx.recv().await.unwrap() {
        Event::Drained {
            completed, failed, ..
        } => {
            assert_eq!(completed, 0);
            assert_eq!(failed, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

struct SlowObserver {
    reported: AtomicUsize,
}

#[async_trait]
impl DrainObserver for SlowObserver {
    async fn drained(&self, _summary: DrainSummary) {
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.reported.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn wait_idle_covers_the_drain_report() {
    let observer = Arc::new(SlowObserver {
        reported: AtomicUsize::new(0),
    });
    let scheduler = DestinationScheduler::new(observer.clone());

    scheduler
        .enqueue(WorkUnit::new(DestinationId(7), ctx("u"), || async { Ok(()) }))
        .await;
    settle(&scheduler).await;

    assert_eq!(observer.reported.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_idle().await);
}

struct PanickingObserver;

#[async_trait]
impl DrainObserver for PanickingObserver {
    async fn drained(&self, _summary: DrainSummary) {
        panic!("observer blew up");
    }
}

#[tokio::test]
async fn panicking_observer_does_not_wedge_wait_idle() {
    let scheduler = DestinationScheduler::new(Arc::new(PanickingObserver));
    let dest = DestinationId(8);

    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), || async { Ok(()) }))
        .await;
    settle(&scheduler).await;
    assert!(scheduler.is_idle().await);

    // the destination can still be used afterwards
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = ran.clone();
    scheduler
        .enqueue(WorkUnit::new(dest, ctx("u"), move || async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .await;
    settle(&scheduler).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
