/// A binary that monitors the pipeline processes listed in a deployment file:
/// it starts them, polls their status and exports metrics until interrupted,
/// then shuts them down.
use clap::Parser;
use colored::Colorize;
use log::{error, info, warn};
use pipeline_monitor::aggregator::StatusAggregator;
use pipeline_monitor::api::PipelineMonitor;
use pipeline_monitor::config::{DeploymentFile, MonitorConfig};
use pipeline_monitor::lifecycle::registry::PipelineRegistry;
use pipeline_monitor::runner::interaction::HttpPipelineTransport;
use pipeline_monitor::runner::pipeline_executor::StaticExecutor;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Create env logger.
    let name = "[monitor]".cyan();
    pipeline_monitor::logging::init_logging(name);

    let config = MonitorConfig::parse();
    let deployment = DeploymentFile::load(&config.deployment_file)?;

    let metrics_handle = pipeline_monitor::metrics::init()?;
    let _metrics_server = pipeline_monitor::metrics::create_endpoint(
        metrics_handle,
        &config.metrics_address,
        config.metrics_port,
    )?;

    let transport = Arc::new(HttpPipelineTransport::new(
        reqwest::Client::new(),
        config.command_timeout(),
    ));
    let registry = Arc::new(PipelineRegistry::new(
        transport.clone(),
        Arc::new(StaticExecutor::new(deployment.locations())),
        config.automaton_config(),
        config.logs_limits(),
    ));
    let aggregator = Arc::new(StatusAggregator::new(
        registry.clone(),
        transport,
        config.aggregator_config()?,
    ));
    let monitor = PipelineMonitor::new(registry.clone(), aggregator.clone());

    for pipeline in &deployment.pipelines {
        registry
            .create(&pipeline.name, pipeline.connector_modes())
            .await?;
        if let Err(e) = monitor.pipeline_action(&pipeline.name, "start").await {
            error!("Pipeline {}: unable to start: {e}", pipeline.name);
        }
    }
    info!(
        "Monitoring {} pipeline(s) from '{}'",
        deployment.pipelines.len(),
        config.deployment_file
    );

    let aggregator_task = tokio::spawn(aggregator.clone().run());
    tokio::signal::ctrl_c().await?;
    info!("Interrupted: shutting down all pipelines");

    for summary in monitor.list_pipelines().await {
        info!(
            "Pipeline {}: {} ({} processed records)",
            summary.name,
            summary.state_label,
            summary
                .metrics
                .map(|m| m.total_processed_records.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }
    registry
        .shutdown_all(config.automaton_config().shutdown_timeout * 2)
        .await;
    aggregator.shutdown();
    if let Err(e) = aggregator_task.await {
        warn!("Status aggregator ended abnormally: {e}");
    }
    Ok(())
}
