use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, PartialEq, Eq)]
pub(crate) enum DispatchMode {
    Blocking,
    SingleWriter,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Seeded sqlite-bridge pool simulator")]
pub(crate) struct Args {
    #[arg(long, value_enum, default_value = "blocking")]
    pub(crate) mode: DispatchMode,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    #[arg(long, default_value_t = 1)]
    pub(crate) min_size: usize,
    #[arg(long, default_value_t = 8)]
    pub(crate) pool_size: usize,
    #[arg(long, default_value_t = 16)]
    pub(crate) tasks: usize,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) ddl_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub(crate) error_rate: f64,
    #[arg(long, default_value_t = 0.005)]
    pub(crate) clear_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) sleep_rate: f64,
    #[arg(long, default_value_t = 4)]
    pub(crate) max_in_flight_tx: usize,
    /// Busy timeout handed to every pooled connection.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "20ms")]
    pub(crate) busy_timeout: Duration,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) mode: DispatchMode,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) min_size: usize,
    pub(crate) pool_size: usize,
    pub(crate) tasks: usize,
    pub(crate) ddl_rate: f64,
    pub(crate) error_rate: f64,
    pub(crate) clear_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) max_in_flight_tx: usize,
    pub(crate) busy_timeout_ms: u64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let pool_size = args.pool_size.max(1);
        let mut config = SimConfig {
            mode: args.mode,
            duration_ms: args.duration.map(|d| d.as_millis() as u64),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            min_size: args.min_size.min(pool_size),
            pool_size,
            tasks: args.tasks.max(1),
            ddl_rate: clamp_rate(args.ddl_rate),
            error_rate: clamp_rate(args.error_rate),
            clear_rate: clamp_rate(args.clear_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            max_in_flight_tx: args.max_in_flight_tx.max(1),
            busy_timeout_ms: args.busy_timeout.as_millis() as u64,
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(5_000);
        self.duration_ms = None;
        self.min_size = 1;
        self.pool_size = 3;
        self.tasks = 6;
        self.ddl_rate = 0.01;
        self.error_rate = 0.01;
        self.clear_rate = 0.005;
        self.sleep_rate = 0.05;
        self.max_in_flight_tx = 2;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(100_000);
        self.duration_ms = None;
        self.min_size = 4;
        self.pool_size = 16;
        self.tasks = 64;
        self.ddl_rate = 0.03;
        self.error_rate = 0.03;
        self.clear_rate = 0.01;
        self.sleep_rate = 0.08;
        self.max_in_flight_tx = 8;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_limits_bounds() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(0.5), 0.5);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
    }

    #[test]
    fn sizes_are_clamped_into_a_valid_pool() {
        let args = Args::parse_from(["simulator", "--min-size", "9", "--pool-size", "0"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.pool_size, 1);
        assert_eq!(config.min_size, 1);
        assert_eq!(config.busy_timeout_ms, 20);
    }

    #[test]
    fn presets_override_flags() {
        let args = Args::parse_from(["simulator", "--quick", "--tasks", "100"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.preset.as_deref(), Some("quick"));
        assert_eq!(config.tasks, 6);
        assert_eq!(config.mode, DispatchMode::Blocking);
    }
}
