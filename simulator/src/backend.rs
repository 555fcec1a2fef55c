use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rusqlite::ErrorCode;
use sqlite_bridge::prelude::*;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::args::{DispatchMode, SimConfig};
use crate::model::{Op, TaskState};

/// Expected, recoverable outcomes. Anything else is a simulator failure.
#[derive(Debug, Clone)]
pub(crate) enum SimError {
    Busy,
    Rejected,
    Waiting,
}

#[derive(Debug, Clone)]
pub(crate) struct StepOutcome {
    pub(crate) result: Result<(), SimError>,
    pub(crate) conn_id: Option<u64>,
}

impl StepOutcome {
    fn ok(conn_id: Option<u64>) -> Self {
        Self {
            result: Ok(()),
            conn_id,
        }
    }

    fn err(err: SimError, conn_id: Option<u64>) -> Self {
        Self {
            result: Err(err),
            conn_id,
        }
    }
}

type PendingAcquire = JoinHandle<Result<Connection, SqliteBridgeError>>;

/// A real pool over an on-disk database plus the connections each task holds.
pub(crate) struct PoolHarness {
    pub(crate) pool: Pool,
    held: HashMap<usize, Connection>,
    pending: HashMap<usize, PendingAcquire>,
    path: PathBuf,
    ddl_counter: u64,
}

impl PoolHarness {
    pub(crate) async fn open(config: &SimConfig) -> Result<Self, String> {
        let path = std::env::temp_dir().join(format!("sqlite-bridge-sim-{}.db", config.seed));
        remove_database(&path);

        let connect = ConnectOptions::builder(path.to_string_lossy().into_owned())
            .timeout(Duration::from_millis(config.busy_timeout_ms))
            .single_writer(config.mode == DispatchMode::SingleWriter)
            .finish();
        let pool = PoolOptions::builder(connect)
            .minsize(config.min_size)
            .maxsize(config.pool_size)
            .build(Handle::current(), Arc::new(SqliteDriver))
            .await
            .map_err(|err| format!("pool create failed: {err}"))?;

        let conn = pool
            .acquire()
            .await
            .map_err(|err| format!("initial acquire failed: {err}"))?;
        conn.execute_script(
            "CREATE TABLE ledger (
                id      INTEGER PRIMARY KEY,
                task    INTEGER NOT NULL,
                amount  INTEGER NOT NULL
            );",
        )
        .await
        .map_err(|err| format!("schema setup failed: {err}"))?;
        pool.release(conn)
            .await
            .map_err(|err| format!("initial release failed: {err}"))?;

        Ok(Self {
            pool,
            held: HashMap::new(),
            pending: HashMap::new(),
            path,
            ddl_counter: 0,
        })
    }

    pub(crate) fn held(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.held.iter().map(|(task, conn)| (*task, conn))
    }

    pub(crate) fn is_pending(&self, task_id: usize) -> bool {
        self.pending.contains_key(&task_id)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) async fn apply(
        &mut self,
        task: &mut TaskState,
        op: Op,
        rng: &mut ChaCha8Rng,
    ) -> Result<StepOutcome, String> {
        match op {
            Op::Sleep(_) => Ok(StepOutcome::ok(task.conn_id)),
            Op::Checkout => self.checkout(task).await,
            Op::Release => self.release(task).await,
            Op::Clear => {
                self.pool
                    .clear()
                    .await
                    .map_err(|err| format!("clear failed: {err}"))?;
                Ok(StepOutcome::ok(task.conn_id))
            }
            Op::Insert => {
                let amount = rng.random_range(1..=1_000_i64);
                self.insert(task, amount).await
            }
            Op::Select => self.select(task).await,
            Op::Commit | Op::Rollback => self.finish_tx(task, op).await,
            Op::Ddl => self.ddl(task).await,
            Op::Fail => self.fail(task).await,
        }
    }

    async fn checkout(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        if task.conn_id.is_some() {
            return Err(format!("task {} attempted double checkout", task.id));
        }

        let Some(handle) = self.pending.remove(&task.id) else {
            let pool = self.pool.clone();
            self.pending
                .insert(task.id, tokio::spawn(async move { pool.acquire().await }));
            task.waiting = true;
            return Ok(StepOutcome::err(SimError::Waiting, None));
        };

        if !handle.is_finished() {
            self.pending.insert(task.id, handle);
            return Ok(StepOutcome::err(SimError::Waiting, None));
        }

        let conn = handle
            .await
            .map_err(|err| format!("acquire task for {} failed to join: {err}", task.id))?
            .map_err(|err| format!("acquire for task {} failed: {err}", task.id))?;
        let conn_id = conn.id();
        task.waiting = false;
        task.conn_id = Some(conn_id);
        task.in_tx = conn
            .in_transaction()
            .await
            .map_err(|err| format!("conn {conn_id}: {err}"))?;
        if task.in_tx {
            return Err(format!("conn {conn_id} handed out with an open transaction"));
        }
        self.held.insert(task.id, conn);
        Ok(StepOutcome::ok(Some(conn_id)))
    }

    async fn release(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        if task.in_tx {
            return Err(format!("task {} released while in a transaction", task.id));
        }
        let conn = self
            .held
            .remove(&task.id)
            .ok_or_else(|| format!("task {} released without a checkout", task.id))?;
        let conn_id = conn.id();
        self.pool
            .release(conn)
            .await
            .map_err(|err| format!("release of conn {conn_id} failed: {err}"))?;
        task.forget_connection();
        Ok(StepOutcome::ok(Some(conn_id)))
    }

    fn conn_for(&self, task: &TaskState) -> Result<&Connection, String> {
        self.held
            .get(&task.id)
            .ok_or_else(|| format!("task {} has no connection", task.id))
    }

    async fn insert(&mut self, task: &mut TaskState, amount: i64) -> Result<StepOutcome, String> {
        let conn = self.conn_for(task)?;
        let conn_id = conn.id();
        let params = [RowValues::Int(task.id as i64), RowValues::Int(amount)];
        match conn
            .execute("INSERT INTO ledger (task, amount) VALUES (?1, ?2)", &params)
            .await
        {
            Ok(cursor) => {
                if cursor.row_count() != 1 {
                    return Err(format!(
                        "conn {conn_id}: insert reported {} rows",
                        cursor.row_count()
                    ));
                }
                task.in_tx = true;
                expect_tx_state(conn, true).await?;
                Ok(StepOutcome::ok(Some(conn_id)))
            }
            Err(err) => {
                let outcome = classify(conn_id, err)?;
                task.in_tx = resync_tx_state(conn).await?;
                Ok(StepOutcome::err(outcome, Some(conn_id)))
            }
        }
    }

    async fn select(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        let conn = self.conn_for(task)?;
        let conn_id = conn.id();
        let cursor = conn
            .execute(
                "SELECT count(*), coalesce(sum(amount), 0) FROM ledger WHERE task = ?1",
                &[RowValues::Int(task.id as i64)],
            )
            .await
            .map_err(|err| format!("conn {conn_id}: select failed: {err}"))?;
        let row = cursor
            .fetch_one()
            .await
            .map_err(|err| format!("conn {conn_id}: fetch failed: {err}"))?
            .ok_or_else(|| format!("conn {conn_id}: aggregate returned no row"))?;
        if row.len() != 2 {
            return Err(format!("conn {conn_id}: expected two columns, got {row:?}"));
        }
        expect_tx_state(conn, task.in_tx).await?;
        Ok(StepOutcome::ok(Some(conn_id)))
    }

    async fn finish_tx(&mut self, task: &mut TaskState, op: Op) -> Result<StepOutcome, String> {
        let conn = self.conn_for(task)?;
        let conn_id = conn.id();
        let result = if op == Op::Commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };
        match result {
            Ok(()) => {
                task.in_tx = false;
                expect_tx_state(conn, false).await?;
                Ok(StepOutcome::ok(Some(conn_id)))
            }
            Err(err) => {
                let outcome = classify(conn_id, err)?;
                task.in_tx = resync_tx_state(conn).await?;
                Ok(StepOutcome::err(outcome, Some(conn_id)))
            }
        }
    }

    async fn ddl(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        self.ddl_counter += 1;
        let table = format!("scratch_{}", self.ddl_counter);
        let conn = self.conn_for(task)?;
        let conn_id = conn.id();
        let script = format!("CREATE TABLE {table} (v INTEGER); DROP TABLE {table};");
        match conn.execute_script(&script).await {
            Ok(_) => {
                task.in_tx = false;
                expect_tx_state(conn, false).await?;
                Ok(StepOutcome::ok(Some(conn_id)))
            }
            Err(err) => {
                let outcome = classify(conn_id, err)?;
                task.in_tx = resync_tx_state(conn).await?;
                Ok(StepOutcome::err(outcome, Some(conn_id)))
            }
        }
    }

    async fn fail(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        let conn = self.conn_for(task)?;
        let conn_id = conn.id();
        match conn.execute("SELECT * FROM no_such_table", &[]).await {
            Ok(_) => Err(format!("conn {conn_id}: query on a missing table succeeded")),
            Err(SqliteBridgeError::SqliteError(_)) => {
                expect_tx_state(conn, task.in_tx).await?;
                Ok(StepOutcome::err(SimError::Rejected, Some(conn_id)))
            }
            Err(err) => Err(format!("conn {conn_id}: unexpected error kind: {err:?}")),
        }
    }

    /// Roll back and release everything, drain pending acquires, then close.
    pub(crate) async fn shutdown(mut self, tasks: &mut [TaskState]) -> Result<PoolStatus, String> {
        for task in tasks.iter_mut() {
            if let Some(conn) = self.held.remove(&task.id) {
                if task.in_tx {
                    conn.rollback()
                        .await
                        .map_err(|err| format!("final rollback failed: {err}"))?;
                }
                self.pool
                    .release(conn)
                    .await
                    .map_err(|err| format!("final release failed: {err}"))?;
            }
            task.forget_connection();
        }

        let pending: Vec<_> = self.pending.drain().collect();
        for (task_id, handle) in pending {
            let conn = handle
                .await
                .map_err(|err| format!("acquire task for {task_id} failed to join: {err}"))?
                .map_err(|err| format!("late acquire for task {task_id} failed: {err}"))?;
            self.pool
                .release(conn)
                .await
                .map_err(|err| format!("late release failed: {err}"))?;
        }
        for task in tasks.iter_mut() {
            task.waiting = false;
        }

        self.pool.close();
        self.pool
            .wait_closed()
            .await
            .map_err(|err| format!("wait_closed failed: {err}"))?;
        let status = self.pool.status();
        remove_database(&self.path);
        Ok(status)
    }
}

fn classify(conn_id: u64, err: SqliteBridgeError) -> Result<SimError, String> {
    let busy = match &err {
        SqliteBridgeError::SqliteError(inner) => matches!(
            inner.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        ),
        _ => false,
    };
    if busy {
        Ok(SimError::Busy)
    } else {
        Err(format!("conn {conn_id}: unexpected error: {err:?}"))
    }
}

async fn resync_tx_state(conn: &Connection) -> Result<bool, String> {
    conn.in_transaction()
        .await
        .map_err(|err| format!("conn {}: in_transaction failed: {err}", conn.id()))
}

async fn expect_tx_state(conn: &Connection, expected: bool) -> Result<(), String> {
    let actual = resync_tx_state(conn).await?;
    if actual == expected {
        Ok(())
    } else {
        Err(format!(
            "conn {}: in_transaction is {actual}, model expected {expected}",
            conn.id()
        ))
    }
}

fn remove_database(path: &Path) {
    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(path.with_extension("db-journal"));
}
