use futures_util::TryStreamExt;
use sqlite_bridge::prelude::*;
use tokio::runtime::Handle;

async fn seeded(single_writer: bool) -> Result<Connection, SqliteBridgeError> {
    let conn = sqlite_bridge::sqlite::connect(
        Handle::current(),
        ConnectOptions::new(":memory:").with_single_writer(single_writer),
    )
    .await?;
    conn.execute_script(
        "CREATE TABLE nums (n INTEGER PRIMARY KEY, label TEXT);
         INSERT INTO nums (n, label) VALUES (1, 'one'), (2, 'two'), (3, 'three'),
                                           (4, 'four'), (5, 'five');",
    )
    .await?;
    Ok(conn)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_variants_walk_one_result() -> Result<(), Box<dyn std::error::Error>> {
    for single_writer in [false, true] {
        let conn = seeded(single_writer).await?;
        let mut cursor = conn
            .execute("SELECT n, label FROM nums ORDER BY n", &[])
            .await?;
        assert_eq!(
            cursor.description(),
            Some(&["n".to_string(), "label".to_string()][..])
        );
        assert_eq!(cursor.row_count(), -1);

        let first = cursor.fetch_one().await?.expect("first row");
        assert_eq!(first.get_index(0), Some(&RowValues::Int(1)));

        assert_eq!(cursor.array_size(), 1);
        assert_eq!(cursor.fetch_many(None).await?.len(), 1);
        cursor.set_array_size(2);
        assert_eq!(cursor.fetch_many(None).await?.len(), 2);
        assert_eq!(cursor.fetch_many(Some(10)).await?.len(), 1);
        assert!(cursor.fetch_all().await?.is_empty());
        assert!(cursor.fetch_one().await?.is_none());

        conn.close().await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rows_stream_yields_every_remaining_row() -> Result<(), Box<dyn std::error::Error>> {
    let conn = seeded(true).await?;
    let cursor = conn
        .execute(
            "SELECT label FROM nums WHERE n > ?1 ORDER BY n",
            &[RowValues::Int(2)],
        )
        .await?;
    let labels: Vec<String> = cursor
        .rows()
        .map_ok(|row| {
            row.get_index(0)
                .and_then(RowValues::as_text)
                .unwrap_or_default()
                .to_string()
        })
        .try_collect()
        .await?;
    assert_eq!(labels, ["three", "four", "five"]);
    conn.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cursor_reexecutes_and_reports_dml_results() -> Result<(), Box<dyn std::error::Error>> {
    let conn = seeded(false).await?;
    let mut cursor = conn.cursor().await?;
    assert!(cursor.description().is_none());
    assert!(cursor.fetch_one().await?.is_none());

    cursor
        .execute(
            "INSERT INTO nums (n, label) VALUES (?1, ?2)",
            &[RowValues::Int(10), RowValues::Text("ten".into())],
        )
        .await?;
    assert_eq!(cursor.row_count(), 1);
    assert_eq!(cursor.last_row_id(), Some(10));

    cursor
        .execute_many(
            "UPDATE nums SET label = upper(label) WHERE n = ?1",
            &[vec![RowValues::Int(1)], vec![RowValues::Int(2)], vec![RowValues::Int(99)]],
        )
        .await?;
    assert_eq!(cursor.row_count(), 2);
    conn.commit().await?;

    cursor
        .execute("SELECT label FROM nums WHERE n <= 2 ORDER BY n", &[])
        .await?;
    let rows = cursor.fetch_all().await?;
    assert_eq!(
        rows,
        vec![
            Row::Tuple(vec![RowValues::Text("ONE".into())]),
            Row::Tuple(vec![RowValues::Text("TWO".into())]),
        ]
    );

    cursor.execute_script("DELETE FROM nums WHERE n = 10;").await?;
    assert!(cursor.description().is_none());
    assert_eq!(cursor.connection().id(), conn.id());
    conn.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_cursors_and_connections_refuse_work() -> Result<(), Box<dyn std::error::Error>> {
    let conn = seeded(true).await?;
    let mut cursor = conn.execute("SELECT n FROM nums", &[]).await?;
    cursor.close().await?;
    cursor.close().await?;
    assert!(cursor.closed());
    assert!(matches!(
        cursor.fetch_one().await,
        Err(SqliteBridgeError::ExecutionError(_))
    ));
    assert!(cursor.execute("SELECT 1", &[]).await.is_err());

    let open_cursor = conn.execute("SELECT n FROM nums", &[]).await?;
    conn.close().await?;
    assert!(matches!(
        open_cursor.fetch_all().await,
        Err(SqliteBridgeError::ConnectionClosed)
    ));
    Ok(())
}
