use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Barrier};
use tokio::time::timeout;

use crate::error::EngineError;
use crate::lock::{ReadPriority, WorkspaceLock};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn queued_write_cancels_the_previous_one_and_runs_after_it() {
    let lock = WorkspaceLock::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let first = {
        let log = Arc::clone(&log);
        lock.write(move |token| async move {
            // Superseded writes park here until their token fires.
            token.cancelled().await;
            log.lock().push("first observed cancellation");
            Err(EngineError::Cancelled)
        })
    };
    let second = {
        let log = Arc::clone(&log);
        lock.write(move |_token| async move {
            log.lock().push("second ran");
            Ok(())
        })
    };

    // Cancellation resolves the first waiter quietly.
    assert_eq!(timeout(WAIT, first).await.expect("first settles"), Ok(()));
    assert_eq!(timeout(WAIT, second).await.expect("second settles"), Ok(()));
    assert_eq!(
        *log.lock(),
        vec!["first observed cancellation", "second ran"]
    );
}

#[tokio::test]
async fn pending_reads_run_as_one_concurrent_batch() {
    let lock = WorkspaceLock::new();
    let barrier = Arc::new(Barrier::new(3));

    // If the reads were serialized, every arm would deadlock on the
    // barrier; the timeout turns that into a failure.
    let reads: Vec<_> = (0..3)
        .map(|index| {
            let barrier = Arc::clone(&barrier);
            lock.read(
                move || async move {
                    barrier.wait().await;
                    Ok(index)
                },
                ReadPriority::Normal,
            )
        })
        .collect();

    let results = timeout(WAIT, futures::future::join_all(reads))
        .await
        .expect("batch completes");
    let mut values: Vec<i32> = results
        .into_iter()
        .map(|result| result.expect("read succeeds"))
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2]);
}

#[tokio::test]
async fn reads_observe_the_previously_queued_write() {
    let lock = WorkspaceLock::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let write = {
        let log = Arc::clone(&log);
        lock.write(move |_token| async move {
            log.lock().push("write");
            Ok(())
        })
    };
    let read = {
        let log = Arc::clone(&log);
        lock.read(
            move || async move {
                log.lock().push("read");
                Ok(())
            },
            ReadPriority::Normal,
        )
    };

    timeout(WAIT, write)
        .await
        .expect("write settles")
        .expect("write succeeds");
    timeout(WAIT, read)
        .await
        .expect("read settles")
        .expect("read succeeds");
    assert_eq!(*log.lock(), vec!["write", "read"]);
}

#[tokio::test]
async fn immediate_reads_run_while_a_write_is_in_flight() {
    let lock = WorkspaceLock::new();
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let write = lock.write(move |_token| async move {
        let _ = started_tx.send(());
        let _ = release_rx.await;
        Ok(())
    });

    timeout(WAIT, started_rx)
        .await
        .expect("write starts")
        .expect("start signal");

    // The write still holds the workspace, yet the immediate read finishes.
    let answer = timeout(
        WAIT,
        lock.read(|| async { Ok(42) }, ReadPriority::Immediate),
    )
    .await
    .expect("immediate read settles")
    .expect("immediate read succeeds");
    assert_eq!(answer, 42);

    release_tx.send(()).expect("write still waiting");
    timeout(WAIT, write)
        .await
        .expect("write settles")
        .expect("write succeeds");
}

#[tokio::test]
async fn one_failing_action_does_not_touch_other_waiters() {
    let lock = WorkspaceLock::new();
    let failing_uri = url::Url::parse("inmemory:///broken").expect("valid uri");

    let first = lock.write({
        let failing_uri = failing_uri.clone();
        move |_token| async move {
            Err(EngineError::Source {
                uri: failing_uri,
                message: "injected failure".into(),
            })
        }
    });
    let second = lock.write(move |_token| async move { Ok(()) });

    let err = timeout(WAIT, first)
        .await
        .expect("first settles")
        .expect_err("failure propagates to its own waiter");
    assert!(matches!(err, EngineError::Source { .. }));
    timeout(WAIT, second)
        .await
        .expect("second settles")
        .expect("second unaffected");
}

#[tokio::test]
async fn cancel_write_reaches_an_unstarted_action() {
    let lock = WorkspaceLock::new();
    let write = lock.write(move |token| async move {
        token.cancelled().await;
        Err(EngineError::Cancelled)
    });
    lock.cancel_write();
    assert_eq!(timeout(WAIT, write).await.expect("write settles"), Ok(()));
}
