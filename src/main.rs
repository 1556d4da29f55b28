//! planloop - demo entry point.
//!
//! Coordinates a batch of sample tasks against the simulated capability and
//! prints each outcome plus the metrics summary.
//!
//! Besides the engine's `PLANLOOP_*` variables:
//! - `PLANLOOP_DEMO_SEED` - Optional. RNG seed of the simulated capability. Defaults to `7`.
//! - `PLANLOOP_DEMO_FAILURE_RATE` - Optional. Per-call failure probability. Defaults to `0.15`.

use std::sync::Arc;

use anyhow::Context;
use planloop::{
    capability::SimulatedCapability, config::Config, events::EventKind, metrics::MetricsCollector,
    task::{Priority, Task},
    Coordinator,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planloop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: max_replans={} concurrency={}",
        config.max_replanning_attempts, config.concurrency_limit
    );

    let seed: u64 = env_or("PLANLOOP_DEMO_SEED", 7)?;
    let failure_rate: f64 = env_or("PLANLOOP_DEMO_FAILURE_RATE", 0.15)?;
    let capability = SimulatedCapability::new(seed).with_failure_rate(failure_rate);

    let metrics = MetricsCollector::spawn();
    let coordinator = Coordinator::new(config, Arc::new(capability)).with_metrics(metrics.clone());

    // Surface re-plans as they happen
    let mut bus = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match bus.recv().await {
                Ok(event) if event.kind == EventKind::Replanning => {
                    info!(task_id = %event.task_id, "{}", event.message);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcomes = coordinator.submit_all(sample_tasks()?).await;

    println!();
    for outcome in &outcomes {
        println!("{} [{}]", outcome.task.title(), outcome.status);
        match (&outcome.verification, &outcome.failure) {
            (Some(v), _) => println!(
                "  quality {:.2}, accuracy {:.2}, {} re-plan(s), {:.2?}",
                v.quality_score, v.accuracy_score, outcome.replans, outcome.elapsed
            ),
            (None, Some(reason)) => println!("  {}", reason),
            (None, None) => {}
        }
        if let Some(last) = outcome.last_verification() {
            for rec in &last.recommendations {
                println!("  - {}", rec);
            }
        }
    }

    println!("\n{}", metrics.snapshot().await?);
    Ok(())
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn sample_tasks() -> anyhow::Result<Vec<Task>> {
    fn reqs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    Ok(vec![
        Task::new(
            "User management REST API",
            "Complete REST API for managing users with CRUD operations, authentication and documentation",
            Priority::High,
            reqs(&[
                "CRUD endpoints for users",
                "JWT authentication",
                "Input validation",
                "API documentation",
                "Unit and integration tests",
            ]),
            "Working API with complete documentation",
        )?,
        Task::new(
            "Reporting system",
            "Generate scheduled reports with charts and PDF export",
            Priority::Medium,
            reqs(&[
                "Dynamic charts",
                "PDF export",
                "Responsive web interface",
                "Report scheduling",
                "Data cache",
            ]),
            "Reporting system with a web interface",
        )?,
        Task::new(
            "Payments API integration",
            "Integrate with an external payments API, including webhook notifications and robust error handling",
            Priority::Critical,
            reqs(&[
                "Payments API integration",
                "Webhook processing",
                "Error handling and retry logic",
                "Detailed transaction logs",
                "Sandbox tests",
                "Integration health monitoring",
                "Detailed technical documentation",
            ]),
            "Robust payments integration",
        )?,
        Task::new(
            "Monitoring dashboard",
            "Web dashboard showing live system metrics",
            Priority::High,
            reqs(&[
                "Responsive web interface",
                "Live charts",
                "Configurable alerts",
                "Metrics history",
            ]),
            "Live monitoring dashboard",
        )?,
    ])
}
