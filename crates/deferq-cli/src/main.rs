use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deferq_core::{
    HttpMethod, LifecycleBuilder, RecoveryLoop, SchedulerConfig, TaskId, TaskLifecycle,
};

/// deferq - 分散遅延タスクスケジューラ
#[derive(Parser, Debug)]
#[command(name = "deferq", version, about = "Distributed delayed HTTP task scheduler")]
struct Cli {
    /// 設定ファイル（TOML）。`DEFERQ_*` 環境変数で上書き可能
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a task
    Submit {
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        #[arg(long, default_value = "get")]
        method: HttpMethod,

        #[arg(long)]
        url: String,

        /// Stay alive until the task is terminal and print the record
        #[arg(long)]
        wait: bool,
    },
    /// Cancel a pending task
    Cancel {
        #[arg(long)]
        id: TaskId,
    },
    /// Print a task record as JSON
    Status {
        #[arg(long)]
        id: TaskId,
    },
    /// Re-arm and run pending tasks until Ctrl-C
    Worker {
        #[arg(long, default_value_t = 5_000, value_parser = clap::value_parser!(u64).range(1..))]
        scan_interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deferq=info,deferq_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SchedulerConfig::load(cli.config.as_deref()).context("loading config")?;
    let lifecycle = LifecycleBuilder::from_config(&config)
        .await
        .context("connecting to store")?
        .build()
        .await
        .context("initialising scheduler")?;

    match cli.command {
        Command::Submit {
            delay_ms,
            method,
            url,
            wait,
        } => {
            let record = lifecycle
                .create(Duration::from_millis(delay_ms), method, url)
                .await?;
            if wait {
                let done = wait_terminal(&lifecycle, record.id).await?;
                println!("{}", serde_json::to_string_pretty(&done)?);
            } else {
                // The local timer dies with this process; a worker picks the task up.
                println!("{}", record.id);
            }
        }
        Command::Cancel { id } => {
            lifecycle.cancel(id).await?;
            println!("cancelled {id}");
        }
        Command::Status { id } => match lifecycle.get(id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => bail!("task {id} not found"),
        },
        Command::Worker { scan_interval_ms } => {
            let recovery =
                RecoveryLoop::spawn(lifecycle.clone(), Duration::from_millis(scan_interval_ms));
            info!(prefix = lifecycle.keys().prefix(), "worker running, Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            recovery.shutdown_and_join().await;
            lifecycle.shutdown().await;
        }
    }
    Ok(())
}

async fn wait_terminal(lifecycle: &TaskLifecycle, id: TaskId) -> Result<deferq_core::TaskRecord> {
    loop {
        match lifecycle.get(id).await? {
            Some(record) if record.status.is_terminal() => return Ok(record),
            Some(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            None => bail!("task {id} disappeared"),
        }
    }
}
