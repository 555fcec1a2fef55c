use std::collections::HashMap;

use crate::backend::PoolHarness;
use crate::model::TaskState;

pub(crate) struct Oracle;

impl Oracle {
    /// Cross-check the model, the held connections and the pool's own counters.
    pub(crate) fn check(tasks: &[TaskState], harness: &PoolHarness) -> Result<(), String> {
        let status = harness.pool.status();
        if status.closed || status.closing {
            return Err(format!("pool shut down mid-run: {status:?}"));
        }
        if status.freesize + status.used + status.acquiring != status.size {
            return Err(format!("pool counters disagree: {status:?}"));
        }
        if status.size > status.maxsize {
            return Err(format!("pool grew past maxsize: {status:?}"));
        }

        let mut owners: HashMap<u64, usize> = HashMap::new();
        let mut held = 0;
        for (task_id, conn) in harness.held() {
            held += 1;
            if conn.closed() {
                return Err(format!("task {task_id} holds closed conn {}", conn.id()));
            }
            if let Some(other) = owners.insert(conn.id(), task_id) {
                return Err(format!(
                    "conn {} held by tasks {other} and {task_id}",
                    conn.id()
                ));
            }
            let task = tasks
                .get(task_id)
                .ok_or_else(|| format!("task {task_id} missing"))?;
            if task.conn_id != Some(conn.id()) {
                return Err(format!("task {task_id} and conn {} mismatch", conn.id()));
            }
        }

        // Finished-but-uncollected acquires already count as used.
        if status.used < held || status.used > held + harness.pending_count() {
            return Err(format!(
                "pool reports {} used, tasks hold {held} with {} pending: {status:?}",
                status.used,
                harness.pending_count()
            ));
        }

        for task in tasks {
            if task.in_tx && task.conn_id.is_none() {
                return Err(format!("task {} in tx without conn", task.id));
            }
            if task.waiting != harness.is_pending(task.id) {
                return Err(format!("task {} waiting flag out of sync", task.id));
            }
            if task.waiting && task.conn_id.is_some() {
                return Err(format!("task {} waits while holding a conn", task.id));
            }
            if let Some(conn_id) = task.conn_id {
                if owners.get(&conn_id) != Some(&task.id) {
                    return Err(format!(
                        "task {} claims conn {conn_id} without ownership",
                        task.id
                    ));
                }
            }
        }

        Ok(())
    }
}
