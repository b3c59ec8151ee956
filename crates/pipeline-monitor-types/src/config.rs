//! Configuration reported by a pipeline process alongside its metrics.
//!
//! The monitor does not interpret transport or format settings: they are
//! carried as opaque JSON so that any connector type can be displayed.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use utoipa::ToSchema;

/// Default value of `ConnectorConfig::max_queued_records`.
pub const fn default_max_queued_records() -> u64 {
    1_000_000
}

pub const fn default_workers() -> u16 {
    8
}

/// Process-wide configuration of a pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RuntimeConfig {
    /// Number of DBSP worker threads.
    #[serde(default = "default_workers")]
    pub workers: u16,

    /// Enable CPU profiler.
    #[serde(default)]
    pub cpu_profiler: bool,

    /// Minimal input batch size.
    ///
    /// The pipeline waits until the specified number of records is received
    /// or until `max_buffering_delay_usecs` elapses before starting processing.
    #[serde(default)]
    pub min_batch_size_records: u64,

    /// Maximal delay in microseconds to wait for `min_batch_size_records`.
    #[serde(default)]
    pub max_buffering_delay_usecs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cpu_profiler: false,
            min_batch_size_records: 0,
            max_buffering_delay_usecs: 0,
        }
    }
}

/// A data connector's configuration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConnectorConfig {
    /// Transport endpoint configuration.
    #[schema(value_type = Object)]
    pub transport: JsonValue,

    /// Parser or encoder configuration.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub format: Option<JsonValue>,

    /// Backpressure threshold.
    #[serde(default = "default_max_queued_records")]
    pub max_queued_records: u64,

    /// Create connector in paused state.
    ///
    /// The default is `false`.
    #[serde(default)]
    pub paused: bool,
}

impl ConnectorConfig {
    /// Connector over the given transport with default settings.
    pub fn new(transport: JsonValue) -> Self {
        Self {
            transport,
            format: None,
            max_queued_records: default_max_queued_records(),
            paused: false,
        }
    }
}

/// Describes an input connector configuration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InputEndpointConfig {
    /// The name of the input stream of the circuit that this endpoint is
    /// connected to.
    pub stream: Cow<'static, str>,

    /// Connector configuration.
    #[serde(flatten)]
    pub connector_config: ConnectorConfig,
}

/// Describes an output connector configuration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutputEndpointConfig {
    /// The name of the output stream of the circuit that this endpoint is
    /// connected to.
    pub stream: Cow<'static, str>,

    /// Connector configuration.
    #[serde(flatten)]
    pub connector_config: ConnectorConfig,
}
