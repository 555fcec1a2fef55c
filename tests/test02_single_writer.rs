mod common;

use std::thread;

use common::{FakeError, RecordingDriver};
use sqlite_bridge::prelude::*;
use tokio::runtime::Handle;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_handle_call_runs_on_the_worker_thread() -> Result<(), Box<dyn std::error::Error>> {
    let driver = RecordingDriver::tracking_thread_exit();
    let conn = Connection::connect(
        Handle::current(),
        driver.clone(),
        ConnectOptions::new("fake").with_single_writer(true),
    )
    .await?;
    let worker = conn.worker_thread_id().expect("single-writer worker");
    assert_ne!(worker, thread::current().id());

    let cursor = conn.execute("INSERT INTO t VALUES (1)", &[]).await?;
    cursor.fetch_all().await?;
    let cursor = conn.execute("SELECT 1", &[]).await?;
    assert_eq!(cursor.fetch_one().await?.map(Row::into_values).map(|v| v.len()), Some(1));
    conn.commit().await?;
    conn.set_row_factory(RowFactory::Named).await?;
    conn.close().await?;

    let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, SqliteBridgeError::ConnectionClosed));

    assert_eq!(driver.count("open"), 1);
    assert_eq!(driver.count("close"), 1);
    assert!(driver.count("fetch_one") >= 1);
    assert!(
        driver.threads().iter().all(|id| *id == worker),
        "handle touched off the worker: {:?}",
        driver.calls()
    );

    // The worker has exited by the time close() returns.
    assert_eq!(driver.count("thread_exit"), 1);
    let calls = driver.calls();
    let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names[names.len() - 2..], ["close", "thread_exit"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_are_served_one_at_a_time() -> Result<(), Box<dyn std::error::Error>> {
    let driver = RecordingDriver::new();
    let conn = Connection::connect(
        Handle::current(),
        driver.clone(),
        ConnectOptions::new("fake").with_single_writer(true),
    )
    .await?;
    let worker = conn.worker_thread_id().expect("worker");

    let mut tasks = Vec::new();
    for i in 0..50 {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            conn.execute("UPDATE t SET a = ?1", &[RowValues::Int(i)])
                .await
                .map(|cursor| cursor.row_count())
        }));
    }
    for task in tasks {
        assert_eq!(task.await??, -1);
    }

    assert_eq!(conn.total_changes().await?, 50);
    assert_eq!(driver.count("execute"), 50);
    assert!(driver.threads().iter().all(|id| *id == worker));
    conn.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_panicking_job_does_not_kill_the_worker() -> Result<(), Box<dyn std::error::Error>> {
    let driver = RecordingDriver::new();
    let conn = Connection::connect(
        Handle::current(),
        driver.clone(),
        ConnectOptions::new("fake").with_single_writer(true),
    )
    .await?;

    let err = conn.execute("PANIC", &[]).await.unwrap_err();
    assert!(
        matches!(&err, SqliteBridgeError::WorkerError(msg) if msg.contains("driver panicked")),
        "unexpected error: {err:?}"
    );

    let cursor = conn.execute("SELECT after", &[]).await?;
    assert!(cursor.fetch_one().await?.is_some());
    conn.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn driver_errors_pass_through_untouched() -> Result<(), Box<dyn std::error::Error>> {
    for single_writer in [false, true] {
        let driver = RecordingDriver::new();
        let conn = Connection::connect(
            Handle::current(),
            driver,
            ConnectOptions::new("fake").with_single_writer(single_writer),
        )
        .await?;

        let err = conn.execute("FAIL", &[]).await.unwrap_err();
        let SqliteBridgeError::DriverError(inner) = err else {
            panic!("expected a driver error");
        };
        let fake = inner.downcast_ref::<FakeError>().expect("fake driver error");
        assert_eq!(fake.0, "statement failed");
        conn.close().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_open_stops_the_worker_and_reports_the_driver_error()
-> Result<(), Box<dyn std::error::Error>> {
    let driver = RecordingDriver::failing_after(0);
    let err = Connection::connect(
        Handle::current(),
        driver.clone(),
        ConnectOptions::new("fake").with_single_writer(true),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("refusing to open fake"));
    assert_eq!(driver.count("open"), 1);
    assert_ne!(driver.threads()[0], thread::current().id());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_an_open_connection_closes_the_handle() -> Result<(), Box<dyn std::error::Error>> {
    for single_writer in [false, true] {
        let driver = RecordingDriver::new();
        let conn = Connection::connect(
            Handle::current(),
            driver.clone(),
            ConnectOptions::new("fake").with_single_writer(single_writer),
        )
        .await?;
        let worker = conn.worker_thread_id();
        conn.execute("INSERT INTO t VALUES (1)", &[]).await?;
        drop(conn);

        assert_eq!(driver.count("close"), 1);
        if let Some(worker) = worker {
            assert!(driver.threads().iter().all(|id| *id == worker));
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_mode_has_no_worker() -> Result<(), Box<dyn std::error::Error>> {
    let driver = RecordingDriver::new();
    let conn = Connection::connect(Handle::current(), driver.clone(), ConnectOptions::new("fake"))
        .await?;
    assert!(conn.worker_thread_id().is_none());
    assert!(!conn.is_single_writer());

    conn.execute("INSERT INTO t VALUES (1)", &[]).await?;
    conn.close().await?;
    // Blocking-pool threads, never the test's own thread.
    assert!(driver.threads().iter().all(|id| *id != thread::current().id()));
    Ok(())
}
