use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::args::SimConfig;
use crate::backend::{PoolHarness, SimError};
use crate::logging::EventLog;
use crate::model::{Op, TaskState};
use crate::oracle::Oracle;
use crate::scheduler::Scheduler;

#[derive(Debug)]
pub(crate) struct RunSummary {
    pub(crate) steps: u64,
    pub(crate) now_ms: u64,
    pub(crate) busy: u64,
    pub(crate) waits: u64,
}

pub(crate) async fn run(config: SimConfig, rng: &mut ChaCha8Rng) -> Result<RunSummary, String> {
    let mut harness = PoolHarness::open(&config).await?;
    let mut tasks: Vec<TaskState> = (0..config.tasks).map(TaskState::new).collect();
    let mut scheduler = Scheduler::new(config.tasks);
    let mut events = EventLog::new(config.first_steps, config.tail_steps);

    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut summary = RunSummary {
        steps: 0,
        now_ms: 0,
        busy: 0,
        waits: 0,
    };
    while summary.steps < max_steps && scheduler.clock.now_ms <= max_time {
        let Some(task_id) = scheduler.next_ready(rng) else {
            break;
        };
        let in_flight_tx = tasks.iter().filter(|t| t.in_tx).count();
        let op = next_op(&tasks[task_id], in_flight_tx, &config, rng);
        let outcome = match harness.apply(&mut tasks[task_id], op, rng).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                events.dump_failure(&reason);
                return Err(reason);
            }
        };

        match (&outcome.result, op) {
            (_, Op::Sleep(ms)) => scheduler.sleep(task_id, ms),
            (Err(SimError::Waiting), _) => {
                summary.waits += 1;
                scheduler.sleep(task_id, 1);
            }
            (Err(SimError::Busy), _) => {
                summary.busy += 1;
                scheduler.mark_ready(task_id);
            }
            _ => scheduler.mark_ready(task_id),
        }

        let result_label = match &outcome.result {
            Ok(()) => "Ok".to_string(),
            Err(err) => format!("Err({err:?})"),
        };
        let conn_label = outcome
            .conn_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        events.record(format!(
            "step={} time={}ms task={} op={} conn={} result={}",
            summary.steps,
            scheduler.clock.now_ms,
            task_id,
            format_op(op),
            conn_label,
            result_label
        ));

        if let Err(reason) = Oracle::check(&tasks, &harness) {
            events.dump_failure(&reason);
            return Err(reason);
        }

        // Let spawned acquires and releases make progress between steps.
        tokio::task::yield_now().await;
        scheduler.tick();
        summary.steps += 1;
    }

    summary.now_ms = scheduler.clock.now_ms;
    let status = harness.shutdown(&mut tasks).await.inspect_err(|reason| {
        events.dump_failure(reason);
    })?;
    if !status.closed || status.size != 0 {
        let reason = format!("pool not drained after shutdown: {status:?}");
        events.dump_failure(&reason);
        return Err(reason);
    }
    Ok(summary)
}

fn next_op(task: &TaskState, in_flight_tx: usize, config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
    if task.waiting {
        return Op::Checkout;
    }
    if rng.random::<f64>() < config.sleep_rate {
        return Op::Sleep(rng.random_range(1..=50));
    }

    if task.conn_id.is_none() {
        let weights = [(Op::Checkout, 0.95), (Op::Clear, config.clear_rate)];
        return choose_weighted(&weights, rng);
    }

    if task.in_tx {
        let weights = [
            (Op::Insert, 0.45),
            (Op::Select, 0.20),
            (Op::Commit, 0.20),
            (Op::Rollback, 0.10),
            (Op::Ddl, config.ddl_rate),
            (Op::Fail, config.error_rate),
        ];
        return choose_weighted(&weights, rng);
    }

    let mut weights = vec![
        (Op::Select, 0.30),
        (Op::Release, 0.25),
        (Op::Ddl, config.ddl_rate),
        (Op::Fail, config.error_rate),
        (Op::Clear, config.clear_rate),
    ];
    // An insert opens an implicit transaction.
    if in_flight_tx < config.max_in_flight_tx {
        weights.push((Op::Insert, 0.35));
    }
    choose_weighted(&weights, rng)
}

fn choose_weighted(items: &[(Op, f64)], rng: &mut ChaCha8Rng) -> Op {
    let total: f64 = items.iter().map(|(_, weight)| weight.max(0.0)).sum();
    if total <= f64::EPSILON {
        return items.first().map_or(Op::Sleep(1), |(op, _)| *op);
    }
    let mut target = rng.random::<f64>() * total;
    for (op, weight) in items {
        let w = weight.max(0.0);
        if target <= w {
            return *op;
        }
        target -= w;
    }
    items.last().map_or(Op::Sleep(1), |(op, _)| *op)
}

fn format_op(op: Op) -> String {
    match op {
        Op::Sleep(ms) => format!("Sleep({ms}ms)"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Args, SimConfig};
    use clap::Parser;
    use rand::SeedableRng;

    fn quiet_config() -> SimConfig {
        let args = Args::parse_from(["simulator", "--sleep-rate", "0", "--seed", "1"]);
        SimConfig::from_args(args)
    }

    #[test]
    fn waiting_tasks_only_poll_their_checkout() {
        let config = quiet_config();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut task = TaskState::new(0);
        task.waiting = true;
        for _ in 0..50 {
            assert_eq!(next_op(&task, 0, &config, &mut rng), Op::Checkout);
        }
    }

    #[test]
    fn idle_tasks_never_start_a_transaction_past_the_cap() {
        let config = quiet_config();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut task = TaskState::new(0);
        task.conn_id = Some(1);
        for _ in 0..500 {
            let op = next_op(&task, config.max_in_flight_tx, &config, &mut rng);
            assert_ne!(op, Op::Insert);
            assert_ne!(op, Op::Commit);
        }
    }

    #[test]
    fn tasks_in_a_transaction_never_release() {
        let config = quiet_config();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut task = TaskState::new(0);
        task.conn_id = Some(1);
        task.in_tx = true;
        for _ in 0..500 {
            assert_ne!(next_op(&task, 1, &config, &mut rng), Op::Release);
        }
    }
}
