use crate::aggregator::AggregatorConfig;
use crate::runner::logs_buffer::LogsLimits;
use crate::runner::pipeline_automata::AutomatonConfig;
use anyhow::{bail, Context, Result as AnyResult};
use clap::Parser;
use pipeline_monitor_types::config::InputEndpointConfig;
use pipeline_monitor_types::ConnectorMode;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Pipeline monitor configuration read from command-line arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct MonitorConfig {
    /// YAML file listing the pipelines to monitor.
    #[arg(long, env = "FELDERA_MONITOR_DEPLOYMENT_FILE")]
    pub deployment_file: String,

    /// Period at which the status of all live pipelines is polled.
    #[arg(long, default_value_t = 2_500, env = "FELDERA_MONITOR_STATUS_POLL_PERIOD_MS")]
    pub status_poll_period_ms: u64,

    /// Timeout of a single status request.
    #[arg(long, default_value_t = 5_000)]
    pub status_request_timeout_ms: u64,

    /// Time after which a polling round stops waiting for the pipelines that
    /// have not answered yet.
    #[arg(long, default_value_t = 10_000)]
    pub status_round_timeout_ms: u64,

    /// Maximum number of status requests in flight.
    #[arg(long, default_value_t = 16)]
    pub max_concurrent_status_requests: usize,

    /// Time the executor has to provision a pipeline.
    #[arg(long, default_value_t = 60_000)]
    pub provisioning_timeout_ms: u64,

    #[arg(long, default_value_t = 300)]
    pub provisioning_poll_period_ms: u64,

    /// Time a provisioned pipeline has to answer its first status request.
    #[arg(long, default_value_t = 60_000)]
    pub initialization_timeout_ms: u64,

    #[arg(long, default_value_t = 300)]
    pub initialization_poll_period_ms: u64,

    /// Time the executor has to stop a pipeline.
    #[arg(long, default_value_t = 10_000)]
    pub shutdown_timeout_ms: u64,

    /// Timeout of the start, pause and shutdown requests to a pipeline.
    #[arg(long, default_value_t = 10_000)]
    pub command_timeout_ms: u64,

    /// Maximum size in bytes of the logs kept per pipeline.
    #[arg(long, default_value_t = 1_000_000, env = "FELDERA_MONITOR_LOGS_BUFFER_LIMIT_BYTE")]
    pub logs_buffer_limit_byte: usize,

    /// Maximum number of log lines kept per pipeline.
    #[arg(long, default_value_t = 50_000, env = "FELDERA_MONITOR_LOGS_BUFFER_LIMIT_NUM_LINES")]
    pub logs_buffer_limit_num_lines: usize,

    /// IP address on which the Prometheus exporter binds.
    #[arg(long, default_value = "127.0.0.1", env = "FELDERA_MONITOR_METRICS_ADDRESS")]
    pub metrics_address: String,

    /// Port of the Prometheus exporter.
    #[arg(long, default_value_t = 8081, env = "FELDERA_MONITOR_METRICS_PORT")]
    pub metrics_port: u16,
}

impl MonitorConfig {
    /// Fails if a round would give up before a single request can time out.
    pub fn aggregator_config(&self) -> AnyResult<AggregatorConfig> {
        if self.status_round_timeout_ms < self.status_request_timeout_ms {
            bail!(
                "--status-round-timeout-ms ({}) must not be smaller than \
                 --status-request-timeout-ms ({})",
                self.status_round_timeout_ms,
                self.status_request_timeout_ms
            );
        }
        if self.max_concurrent_status_requests == 0 {
            bail!("--max-concurrent-status-requests must be at least 1");
        }
        Ok(AggregatorConfig {
            poll_period: Duration::from_millis(self.status_poll_period_ms),
            request_timeout: Duration::from_millis(self.status_request_timeout_ms),
            round_timeout: Duration::from_millis(self.status_round_timeout_ms),
            max_concurrent_requests: self.max_concurrent_status_requests,
        })
    }

    pub fn automaton_config(&self) -> AutomatonConfig {
        AutomatonConfig {
            provisioning_timeout: Duration::from_millis(self.provisioning_timeout_ms),
            provisioning_poll_period: Duration::from_millis(self.provisioning_poll_period_ms),
            initialization_timeout: Duration::from_millis(self.initialization_timeout_ms),
            initialization_poll_period: Duration::from_millis(self.initialization_poll_period_ms),
            status_request_timeout: Duration::from_millis(self.status_request_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn logs_limits(&self) -> LogsLimits {
        LogsLimits {
            max_bytes: self.logs_buffer_limit_byte,
            max_lines: self.logs_buffer_limit_num_lines,
        }
    }
}

/// One pipeline process of the deployment file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PipelineDeployment {
    pub name: String,
    /// `host:port` of the HTTP API of the process.
    pub location: String,
    /// Input connectors by endpoint name.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputEndpointConfig>,
}

impl PipelineDeployment {
    /// Initial mode of each input connector.
    pub fn connector_modes(&self) -> BTreeMap<String, ConnectorMode> {
        self.inputs
            .iter()
            .map(|(name, config)| {
                (
                    name.clone(),
                    ConnectorMode::from_paused(config.connector_config.paused),
                )
            })
            .collect()
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeploymentFile {
    pub pipelines: Vec<PipelineDeployment>,
}

impl DeploymentFile {
    pub fn from_yaml(yaml: &str) -> AnyResult<Self> {
        let file: DeploymentFile =
            serde_yaml::from_str(yaml).context("invalid deployment file")?;
        let mut names = BTreeSet::new();
        for pipeline in &file.pipelines {
            if !names.insert(pipeline.name.as_str()) {
                bail!("pipeline '{}' is listed more than once", pipeline.name);
            }
        }
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read deployment file '{}'", path.display()))?;
        Self::from_yaml(&yaml)
    }

    /// Location of each pipeline by name.
    pub fn locations(&self) -> BTreeMap<String, String> {
        self.pipelines
            .iter()
            .map(|pipeline| (pipeline.name.clone(), pipeline.location.clone()))
            .collect()
    }
}
