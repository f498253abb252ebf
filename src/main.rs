//! quadrature-grid CLI entry point

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use quadrature_grid::config::cli::{Cli, ExecutionMode};
use quadrature_grid::config::{toml, validator, Config};
use quadrature_grid::distributed::{Coordinator, CoordinatorSettings, JobParams, WorkerAgent};
use quadrature_grid::output::json::{write_json_output, JobReport};
use quadrature_grid::output::text;
use quadrature_grid::util::resource::node_name;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(&cli);
    cli.validate()?;

    let config = toml::load_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    match cli.mode {
        ExecutionMode::Coordinator => runtime.block_on(run_coordinator(&cli, config)),
        ExecutionMode::Worker => runtime.block_on(run_worker(config)),
    }
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level {
        builder.filter_level(level.as_filter());
    }
    builder.format_timestamp_millis().init();
}

/// Run in coordinator mode
async fn run_coordinator(cli: &Cli, config: Config) -> Result<()> {
    let settings = &config.coordinator;
    let coordinator = Coordinator::new(CoordinatorSettings {
        policy: settings.assignment,
        job_timeout: settings.job_timeout()?,
        max_frame_len: settings.max_frame_len,
    });

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind coordinator to {}", settings.listen_addr))?;
    let server = tokio::spawn(Arc::clone(&coordinator).serve(listener));

    info!(
        "Assignment policy: {}, job timeout: {}",
        settings.assignment,
        settings.job_timeout.as_deref().unwrap_or("none")
    );

    let settle = settings.settle_delay()?;
    info!("Waiting {}ms for workers to connect...", settle.as_millis());
    tokio::time::sleep(settle).await;
    info!(
        "{} workers connected, total capacity {}",
        coordinator.registry().len(),
        coordinator.registry().total_capacity()
    );

    let hostname = Some(node_name());
    let mut reports = Vec::new();

    if let Some((lower, upper, step)) = cli.single_job() {
        let params = JobParams { lower, upper, step };
        let outcome = run_job(&coordinator, params, &config, &hostname, &mut reports).await;
        coordinator.shutdown();
        server.await.context("Coordinator task failed")??;
        return outcome.map(|_| ());
    }

    loop {
        let next = tokio::task::spawn_blocking(|| {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            text::prompt_job(&mut stdin.lock(), &mut stdout.lock())
        })
        .await
        .context("Prompt task failed")?
        .context("Failed to read job bounds")?;

        let Some((lower, upper, step)) = next else {
            info!("Input closed, shutting down");
            break;
        };

        // a failed job is reported; the operator can try again
        let params = JobParams { lower, upper, step };
        if let Err(e) = run_job(&coordinator, params, &config, &hostname, &mut reports).await {
            error!("{:#}", e);
        }
    }

    coordinator.shutdown();
    server.await.context("Coordinator task failed")?
}

/// Submit one job, wait for it, and report the outcome
async fn run_job(
    coordinator: &Coordinator,
    params: JobParams,
    config: &Config,
    hostname: &Option<String>,
    reports: &mut Vec<JobReport>,
) -> Result<f64> {
    let started = Utc::now();
    let start = Instant::now();

    let submission = coordinator.submit_job(params).await?;
    let outcome = coordinator.await_job(submission.job_id).await;
    let elapsed = start.elapsed();

    text::print_submission(&submission, elapsed);
    if let Ok(value) = outcome {
        text::print_result(value);
    }

    if let Some(ref path) = config.coordinator.json_output {
        let report_outcome = outcome.as_ref().copied().map_err(|e| e.to_string());
        reports.push(JobReport::new(
            &submission,
            report_outcome,
            started,
            elapsed,
            hostname.clone(),
        ));
        write_json_output(path, reports, true)?;
        info!("Wrote JSON report to {}", path.display());
    }

    Ok(outcome?)
}

/// Run in worker mode
async fn run_worker(config: Config) -> Result<()> {
    let settings = config.worker;
    let agent = WorkerAgent::new(
        settings.coordinator_addr,
        settings.capacity,
        settings.max_frame_len,
    );

    let summary = agent.run().await?;
    info!(
        "Worker {} done: {} sub-tasks completed with capacity {}",
        summary.session_id, summary.tasks_completed, summary.capacity
    );
    Ok(())
}
