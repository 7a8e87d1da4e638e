//! Producer/consumer harness for workpool.
//!
//! `enqueue` fills a spool directory; `run` starts a pool that drains it until Ctrl-C.
//! Workers are re-executions of this binary with the same arguments, so `run` must stay
//! deterministic apart from the seeding step, which only the master performs.

mod consumer;
mod spool;

use std::path::{Path, PathBuf};
use std::process;

use workpool::{Exit, Pool, PoolConfig, init_tracing, is_worker_process};

use crate::consumer::SpoolConsumer;
use crate::spool::{Spool, Task};

const DEFAULT_SPOOL: &str = "./spool";

#[derive(Debug, PartialEq)]
enum Command {
    Enqueue {
        count: u64,
        spool: PathBuf,
    },
    Run {
        seed: u64,
        fail: bool,
        config: Option<PathBuf>,
        spool: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: workpool-demo enqueue <count> [--spool <dir>]");
            eprintln!("       workpool-demo run [--seed <n>] [--fail] [--config <file>] [--spool <dir>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --spool <dir>    Spool directory [default: {DEFAULT_SPOOL}]");
            eprintln!("  --seed <n>       Enqueue n tasks before starting the pool");
            eprintln!("  --fail           Reject every third task to exercise retries");
            eprintln!("  --config <file>  Pool configuration (JSON)");
            process::exit(2);
        }
    };

    let result = match command {
        Command::Enqueue { count, spool } => enqueue(count, &spool).await.map(|()| 0),
        Command::Run {
            seed,
            fail,
            config,
            spool,
        } => run(seed, fail, config.as_deref(), spool).await,
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut subcommand: Option<String> = None;
    let mut count: Option<u64> = None;
    let mut seed = 0;
    let mut fail = false;
    let mut config = None;
    let mut spool = PathBuf::from(DEFAULT_SPOOL);

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--spool" => {
                i += 1;
                spool = PathBuf::from(args.get(i).ok_or("--spool requires a value")?);
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(args.get(i).ok_or("--config requires a value")?));
            }
            "--seed" => {
                i += 1;
                let raw = args.get(i).ok_or("--seed requires a value")?;
                seed = raw.parse().map_err(|_| format!("invalid --seed: {raw}"))?;
            }
            "--fail" => fail = true,
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg if subcommand.is_none() => subcommand = Some(arg.to_string()),
            arg if subcommand.as_deref() == Some("enqueue") && count.is_none() => {
                count = Some(arg.parse().map_err(|_| format!("invalid count: {arg}"))?);
            }
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    match subcommand.as_deref() {
        Some("enqueue") => Ok(Command::Enqueue {
            count: count.ok_or("missing required argument: <count>")?,
            spool,
        }),
        Some("run") => Ok(Command::Run {
            seed,
            fail,
            config,
            spool,
        }),
        Some(other) => Err(format!("unknown command: {other}")),
        None => Err("missing command".to_string()),
    }
}

async fn seed_spool(spool: &Path, count: u64) -> anyhow::Result<()> {
    let spool = Spool::open(spool).await?;
    for payload in 0..count {
        spool.push(&Task::new(payload)).await?;
    }
    tracing::info!(count, pending = spool.len().await?, "Spool seeded");
    Ok(())
}

async fn enqueue(count: u64, spool: &Path) -> anyhow::Result<()> {
    init_tracing(None);
    seed_spool(spool, count).await
}

async fn run(seed: u64, fail: bool, config: Option<&Path>, spool: PathBuf) -> anyhow::Result<i32> {
    let config = match config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };
    init_tracing(config.log_file.as_deref());

    if seed > 0 && !is_worker_process() {
        seed_spool(&spool, seed).await?;
    }

    let pool = Pool::builder(move || SpoolConsumer::new(spool.clone(), fail))
        .config(config)
        .on_worker_exit(|consumer, ctx| {
            if consumer.close() {
                tracing::debug!(worker_id = ctx.id(), "Spool closed");
            }
        })
        .on_master_exit(|consumer, ctx| {
            consumer.close();
            tracing::info!(pid = ctx.id(), "master exiting");
        })
        .build()?;

    let exit = pool.run().await?;
    if let Exit::Master(shutdown) = &exit {
        println!("{}", shutdown.message);
    }
    Ok(exit.code())
}
