mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use cli::{Cli, RunConfig};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use relaysave::pipeline::TransferPipeline;
use relaysave::sink::TerminalSink;
use relaysave::source::HttpSource;
use relaysave::storage::StorageRegistry;
use relaysave::task::Task;
use relaysave::util;
use relaysave::worker::{TaskOutcome, WorkerPool};

// Returning instead of exiting lets the runtime shut down, which removes
// staged files still waiting on their cache TTL.
#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = RunConfig::try_from(cli.clone());
    init_logger(
        &cli,
        config.as_ref().ok().map(|config| config.settings.log.level.as_str()),
    );

    debug!("CLI arguments: {:?}", cli);
    let config = config?;
    let settings = &config.settings;
    util::ensure_dir(&settings.temp.base_path)?;

    let source = Arc::new(HttpSource::new(config.timeout)?);
    let storages = StorageRegistry::from_configs(&settings.storages);
    let sink = Arc::new(TerminalSink::new(config.progress));
    let pipeline = Arc::new(TransferPipeline::new(
        settings.pipeline_config(),
        source.clone(),
        storages,
        sink,
    ));

    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let pool = WorkerPool::spawn(pipeline, settings.workers, outcome_tx);
    let collector = tokio::spawn(collect_outcomes(outcome_rx));

    let shutdown = pool.shutdown_token();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling all transfers (press Ctrl-C again to exit now)");
            interrupt.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let mut failed = 0usize;
    for (index, url) in config.urls.iter().enumerate() {
        if shutdown.is_cancelled() {
            let skipped = config.urls.len() - index;
            warn!("Skipping {skipped} remaining URL(s) after interrupt");
            failed += skipped;
            break;
        }
        let described = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                failed += 1;
                continue;
            }
            described = source.describe(url.as_str()) => described,
        };
        let file = match described {
            Ok(file) => file,
            Err(err) => {
                error!("Skipping {url}: {err}");
                failed += 1;
                continue;
            }
        };
        let storage_path = config.storage_path(&file.name);
        let task = Task::new(file, &config.storage, storage_path, 0, index as i64)
            .with_parent(&shutdown);
        debug!("Submitting {task}");
        match pool.submit(task).await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => failed += 1,
            Err(err) => return Err(err.into()),
        }
    }

    pool.shutdown().await;
    failed += collector
        .await
        .map_err(|err| anyhow!("outcome collector failed: {err}"))?;

    if failed > 0 {
        return Err(anyhow!(
            "{failed} of {} transfer(s) failed",
            config.urls.len()
        ));
    }
    info!("All transfers completed successfully");
    Ok(())
}

async fn collect_outcomes(mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>) -> usize {
    let mut failed = 0;
    while let Some(outcome) = outcomes.recv().await {
        match &outcome.result {
            Ok(()) => info!(
                "[{}] {} saved to [{}]:{}",
                outcome.key, outcome.file_name, outcome.storage_name, outcome.storage_path
            ),
            Err(err) if err.is_cancelled() => {
                warn!("[{}] {} cancelled", outcome.key, outcome.file_name);
                failed += 1;
            }
            Err(err) => {
                error!("[{}] {} failed: {err}", outcome.key, outcome.file_name);
                failed += 1;
            }
        }
    }
    failed
}

fn init_logger(cli: &Cli, configured: Option<&str>) {
    use env_logger::Env;
    use log::LevelFilter;

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        configured
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::Info)
    };
    builder.filter_level(level);
    if !cli.verbose {
        builder.format_timestamp_secs();
    }
    let _ = builder.try_init();
}
