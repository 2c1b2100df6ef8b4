use std::{
    error::Error,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use racelab::{
    DispatchError, Executor, PoolConfig, PooledDispatcher, ProcessRequest, Reporter, Scenario,
    SerialDispatcher,
    aggregate::{DispatchAggregate, LoadAggregate},
    loadgen::{BurstExecutor, PacedExecutor, Stage},
    metric::ClientMetric,
    report::{self, DispatchReport, JsonReporter, LoadReport, StdoutReporter},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One request at a time, unsynchronized increment
    Serial,
    /// Worker pool, increment guarded by --use-lock
    Pooled,
}

/// Load one dispatcher and count what the ledger lost.
///
/// Without `--rate` a fixed burst of `--requests` is sent. With it, `--concurrency`
/// virtual users are paced: a ramp to `--rate` over `--ramp-secs`, a hold for
/// `--hold-secs`, and a think time between each user's calls.
#[derive(Debug, Parser)]
#[command(name = "race", version)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Pooled)]
    variant: Mode,

    /// Total requests to send in burst mode
    #[arg(long, default_value_t = 200)]
    requests: usize,

    /// Requests in flight at once (burst) or virtual users (paced)
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Target requests per second; switches to paced mode
    #[arg(long)]
    rate: Option<f64>,

    #[arg(long, default_value_t = 5)]
    ramp_secs: u64,

    #[arg(long, default_value_t = 10)]
    hold_secs: u64,

    /// Shortest pause between a user's calls
    #[arg(long, default_value_t = 500)]
    think_min_ms: u64,

    /// Longest pause between a user's calls
    #[arg(long, default_value_t = 2000)]
    think_max_ms: u64,

    /// Pool size, ignored by the serial dispatcher
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// `cpu` or `io`
    #[arg(long, default_value = "io")]
    workload: String,

    #[arg(long, default_value_t = 50)]
    duration_ms: u64,

    /// Guard the pooled increment with the ledger lock
    #[arg(long)]
    use_lock: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Log every request
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone)]
enum Target {
    Serial(Arc<Mutex<SerialDispatcher>>),
    Pooled(Arc<PooledDispatcher>),
}

impl Target {
    fn ledger_value(&self) -> u64 {
        match self {
            Target::Serial(d) => d.lock().map(|d| d.ledger().read()).unwrap_or_default(),
            Target::Pooled(d) => d.ledger().read(),
        }
    }

    fn snapshot(&self) -> DispatchAggregate {
        match self {
            Target::Serial(d) => d
                .lock()
                .map(|d| d.recorder().snapshot())
                .unwrap_or_default(),
            Target::Pooled(d) => d.recorder().snapshot(),
        }
    }
}

async fn call(target: Target, request: ProcessRequest) -> ClientMetric {
    let start = Instant::now();
    let res = match target {
        Target::Pooled(pool) => pool.process(request).await,
        // The serial dispatcher blocks its caller, so it gets a blocking thread and a
        // mutex standing in for the single-threaded server.
        Target::Serial(serial) => {
            tokio::task::spawn_blocking(move || match serial.lock() {
                Ok(mut d) => d.process(request),
                Err(_) => Err(DispatchError::WorkerUnavailable),
            })
            .await
            .unwrap_or(Err(DispatchError::WorkerUnavailable))
        }
    };

    if let Err(err) = &res {
        tracing::warn!("request failed: {err}");
    }
    ClientMetric {
        latency: start.elapsed(),
        success: res.is_ok(),
        ledger_value: res.ok().map(|r| r.ledger_value),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let request = ProcessRequest::parse(&cli.workload, cli.duration_ms, cli.use_lock)?;
    let target = match cli.variant {
        Mode::Serial => {
            if cli.use_lock {
                tracing::warn!("--use-lock has no effect on the serial dispatcher");
            }
            Target::Serial(Arc::new(Mutex::new(SerialDispatcher::default())))
        }
        Mode::Pooled => Target::Pooled(Arc::new(PooledDispatcher::new(
            PoolConfig::builder().workers(cli.workers).build(),
        )?)),
    };

    let scenario = Scenario::<LoadAggregate, _, _>::builder()
        .name(format!("{:?} {}", cli.variant, cli.workload))
        .action({
            let target = target.clone();
            move || call(target.clone(), request)
        })
        .build();

    let start = Instant::now();
    let results = match cli.rate {
        None => {
            BurstExecutor::builder()
                .requests(cli.requests)
                .concurrency(cli.concurrency)
                .build()
                .exec(&scenario)
                .await?
        }
        Some(rate) => {
            PacedExecutor::builder()
                .stages(vec![
                    Stage::new(Duration::from_secs(cli.ramp_secs), rate),
                    Stage::new(Duration::from_secs(cli.hold_secs), rate),
                ])
                .workers(cli.concurrency)
                .think_time((
                    Duration::from_millis(cli.think_min_ms),
                    Duration::from_millis(cli.think_max_ms),
                ))
                .build()
                .exec(&scenario)
                .await?
        }
    };
    let elapsed = start.elapsed();

    let completed = results.success_count;
    let load = LoadReport::from(results).with_wall_time(elapsed);
    let dispatch = DispatchReport::from(target.snapshot());

    if cli.json {
        Reporter::<LoadAggregate, _>::report(&JsonReporter, &load).await?;
        Reporter::<DispatchAggregate, _>::report(&JsonReporter, &dispatch).await?;
    } else {
        Reporter::<LoadAggregate, _>::report(&StdoutReporter, &load).await?;
        Reporter::<DispatchAggregate, _>::report(&StdoutReporter, &dispatch).await?;
    }

    let ledger = target.ledger_value();
    println!(
        "completed {completed} in {elapsed:?}, ledger holds {ledger}, lost {}",
        report::lost_updates(completed, ledger)
    );

    Ok(())
}
