use std::sync::Arc;
use std::time::Duration;

use deltagraph_core::{Error, ROOT_TAG};
use deltagraph_test_support::{car_manager, modify_car, new_car};

const PATIENCE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn waiter_wakes_on_push() {
    let manager = Arc::new(car_manager());
    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.wait_graph_change(ROOT_TAG).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    manager.receive_data("app", ROOT_TAG, "1", new_car("0", 0), true).unwrap();
    tokio::time::timeout(PATIENCE, waiter).await.unwrap().unwrap();
}

#[tokio::test]
async fn stale_version_returns_immediately() {
    let manager = car_manager();
    manager.receive_data("app", ROOT_TAG, "1", new_car("0", 0), true).unwrap();
    tokio::time::timeout(PATIENCE, manager.wait_graph_change(ROOT_TAG))
        .await
        .unwrap();
    assert!(manager.wait_graph_change_for("0-unknown", Duration::from_millis(1)).await);
}

#[tokio::test]
async fn bounded_wait_times_out_without_a_change() {
    let manager = car_manager();
    let changed = manager
        .wait_graph_change_for(ROOT_TAG, Duration::from_millis(50))
        .await;
    assert!(!changed);
}

#[tokio::test]
async fn bounded_wait_sees_a_change_in_time() {
    let manager = Arc::new(car_manager());
    manager.receive_data("app", ROOT_TAG, "1", new_car("0", 0), true).unwrap();
    let waiter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.wait_graph_change_for("1", PATIENCE).await })
    };
    tokio::task::yield_now().await;
    manager
        .receive_data("app", "1", "2", modify_car("0", &[("xvel", 1)]), true)
        .unwrap();
    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn rejected_push_does_not_wake_waiters() {
    let manager = car_manager();
    let err = manager
        .receive_data("app", "missing", "1", new_car("0", 0), true)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownVersion(_)));
    assert!(
        !manager
            .wait_graph_change_for(ROOT_TAG, Duration::from_millis(20))
            .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn teardown_releases_every_waiter() {
    let manager = Arc::new(car_manager());
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_graph_change(ROOT_TAG).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.teardown();
    for waiter in waiters {
        tokio::time::timeout(PATIENCE, waiter).await.unwrap().unwrap();
    }

    assert!(!manager.graph().is_live());
    let err = manager
        .receive_data("app", ROOT_TAG, "1", new_car("0", 0), true)
        .unwrap_err();
    assert!(matches!(err, Error::TornDown));
    assert!(manager.retrieve_data("app", ROOT_TAG, None).is_err());
    // Waiting on a torn-down graph never blocks.
    manager.wait_graph_change("anything").await;
}
