//! Status and metrics snapshots reported by a pipeline process.
//!
//! A [`ControllerStatus`] is produced once per successful status request and
//! is never mutated after construction: later observations replace it.
//! The only cross-snapshot relationship the monitor enforces is the one-way
//! latches (`pipeline_complete`, `end_of_input`), which are carried forward
//! from the previous snapshot of the same deployment while the new snapshot is
//! being built.

use crate::config::{InputEndpointConfig, OutputEndpointConfig, RuntimeConfig};
use crate::pipeline_state::ConnectorMode;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Process-wide aggregate metrics of a pipeline.
#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct GlobalMetrics {
    /// Resident set size of the pipeline process, in bytes.
    #[serde(default)]
    pub rss_bytes: u64,

    /// Total number of records currently buffered by all endpoints.
    #[serde(default)]
    pub buffered_input_records: u64,

    /// Total number of records received from all endpoints.
    #[serde(default)]
    pub total_input_records: u64,

    /// Total number of input records processed by the DBSP engine.
    #[serde(default)]
    pub total_processed_records: u64,

    /// True if the pipeline has processed all input data to completion.
    /// Once set, it is never cleared for the same deployment.
    #[serde(default)]
    pub pipeline_complete: bool,
}

impl GlobalMetrics {
    /// Keeps `pipeline_complete` set if it was set in `previous`.
    ///
    /// Returns `true` if the latch had to be restored, i.e., the pipeline
    /// reported a regression.
    pub fn latch_from(&mut self, previous: &GlobalMetrics) -> bool {
        let regressed = previous.pipeline_complete && !self.pipeline_complete;
        self.pipeline_complete |= previous.pipeline_complete;
        regressed
    }

    /// Names of the cumulative counters that are lower than in `previous`.
    pub fn counter_regressions(&self, previous: &GlobalMetrics) -> Vec<&'static str> {
        let mut regressions = Vec::new();
        if self.total_input_records < previous.total_input_records {
            regressions.push("total_input_records");
        }
        if self.total_processed_records < previous.total_processed_records {
            regressions.push("total_processed_records");
        }
        regressions
    }
}

/// Metrics of an input endpoint.
#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct InputEndpointMetrics {
    /// Total bytes pushed to the endpoint since it was created.
    #[serde(default)]
    pub total_bytes: u64,

    /// Total records pushed to the endpoint since it was created.
    #[serde(default)]
    pub total_records: u64,

    /// Number of bytes currently buffered by the endpoint (not yet consumed by
    /// the circuit).
    #[serde(default)]
    pub buffered_bytes: u64,

    /// Number of records currently buffered by the endpoint (not yet consumed
    /// by the circuit).
    #[serde(default)]
    pub buffered_records: u64,

    #[serde(default)]
    pub num_transport_errors: u64,

    #[serde(default)]
    pub num_parse_errors: u64,

    /// True if end-of-input has been signaled. One-way latch.
    #[serde(default)]
    pub end_of_input: bool,
}

impl InputEndpointMetrics {
    /// Keeps `end_of_input` set if it was set in `previous`.
    ///
    /// Returns `true` if the latch had to be restored.
    pub fn latch_from(&mut self, previous: &InputEndpointMetrics) -> bool {
        let regressed = previous.end_of_input && !self.end_of_input;
        self.end_of_input |= previous.end_of_input;
        regressed
    }

    pub fn counter_regressions(&self, previous: &InputEndpointMetrics) -> Vec<&'static str> {
        let mut regressions = Vec::new();
        if self.total_bytes < previous.total_bytes {
            regressions.push("total_bytes");
        }
        if self.total_records < previous.total_records {
            regressions.push("total_records");
        }
        if self.num_transport_errors < previous.num_transport_errors {
            regressions.push("num_transport_errors");
        }
        if self.num_parse_errors < previous.num_parse_errors {
            regressions.push("num_parse_errors");
        }
        regressions
    }
}

/// Metrics of an output endpoint.
#[derive(Default, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub struct OutputEndpointMetrics {
    #[serde(default)]
    pub transmitted_records: u64,

    #[serde(default)]
    pub transmitted_bytes: u64,

    /// Number of records queued for transmission.
    #[serde(default)]
    pub buffered_records: u64,

    /// Number of batches queued for transmission.
    #[serde(default)]
    pub buffered_batches: u64,

    #[serde(default)]
    pub num_encode_errors: u64,

    #[serde(default)]
    pub num_transport_errors: u64,

    /// The number of input records processed by the circuit whose outputs
    /// have been transmitted by this endpoint.
    #[serde(default)]
    pub total_processed_input_records: u64,
}

/// Status of an input endpoint within one snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct InputEndpointStatus {
    /// Unique among the inputs of the pipeline.
    pub endpoint_name: String,

    pub config: InputEndpointConfig,

    pub metrics: InputEndpointMetrics,

    /// Whether the endpoint supports replay after a restart.
    #[serde(default)]
    pub is_fault_tolerant: bool,

    /// The endpoint was paused by the user.
    #[serde(default)]
    pub paused: bool,

    /// Set when the endpoint failed and stopped.
    #[serde(default)]
    pub fatal_error: Option<String>,
}

impl InputEndpointStatus {
    /// Run mode as reported by the pipeline process.
    pub fn mode(&self) -> ConnectorMode {
        ConnectorMode::from_paused(self.paused)
    }
}

/// Status of an output endpoint within one snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct OutputEndpointStatus {
    /// Unique among the outputs of the pipeline.
    pub endpoint_name: String,

    pub config: OutputEndpointConfig,

    pub metrics: OutputEndpointMetrics,

    #[serde(default)]
    pub is_fault_tolerant: bool,

    #[serde(default)]
    pub fatal_error: Option<String>,
}

/// Complete status of one pipeline process at one point in time.
///
/// Endpoint order is the order reported by the pipeline process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct ControllerStatus {
    #[serde(default)]
    pub global_config: RuntimeConfig,

    pub global_metrics: GlobalMetrics,

    #[serde(default)]
    pub inputs: Vec<InputEndpointStatus>,

    #[serde(default)]
    pub outputs: Vec<OutputEndpointStatus>,
}

/// Outcome of comparing a fresh snapshot against the previous one of the same
/// deployment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotRegressions {
    /// One-way latches that were reported cleared and have been restored.
    pub latches: Vec<String>,

    /// Cumulative counters that went down. Reported as-is.
    pub counters: Vec<String>,
}

impl SnapshotRegressions {
    pub fn is_empty(&self) -> bool {
        self.latches.is_empty() && self.counters.is_empty()
    }
}

impl ControllerStatus {
    pub fn input(&self, endpoint_name: &str) -> Option<&InputEndpointStatus> {
        self.inputs
            .iter()
            .find(|input| input.endpoint_name == endpoint_name)
    }

    pub fn output(&self, endpoint_name: &str) -> Option<&OutputEndpointStatus> {
        self.outputs
            .iter()
            .find(|output| output.endpoint_name == endpoint_name)
    }

    /// Builds the snapshot to publish from a freshly received status,
    /// restoring any latch that was already set in `previous`.
    ///
    /// Input endpoints are matched by name. Endpoints absent from `previous`
    /// are taken as reported.
    pub fn with_latches_from(mut self, previous: &ControllerStatus) -> (Self, SnapshotRegressions) {
        let mut regressions = SnapshotRegressions::default();

        regressions.counters.extend(
            self.global_metrics
                .counter_regressions(&previous.global_metrics)
                .into_iter()
                .map(|field| format!("global_metrics.{field}")),
        );
        if self.global_metrics.latch_from(&previous.global_metrics) {
            regressions
                .latches
                .push("global_metrics.pipeline_complete".to_string());
        }

        for input in self.inputs.iter_mut() {
            let Some(before) = previous.input(&input.endpoint_name) else {
                continue;
            };
            regressions.counters.extend(
                input
                    .metrics
                    .counter_regressions(&before.metrics)
                    .into_iter()
                    .map(|field| format!("inputs[{}].{field}", input.endpoint_name)),
            );
            if input.metrics.latch_from(&before.metrics) {
                regressions
                    .latches
                    .push(format!("inputs[{}].end_of_input", input.endpoint_name));
            }
        }

        (self, regressions)
    }
}

#[cfg(test)]
mod test {
    use super::{ControllerStatus, GlobalMetrics, InputEndpointMetrics};
    use proptest::prelude::*;
    use serde_json::json;

    fn status(pipeline_complete: bool, orders_eoi: bool, orders_records: u64) -> ControllerStatus {
        serde_json::from_value(json!({
            "global_config": { "workers": 4 },
            "global_metrics": {
                "rss_bytes": 1024,
                "total_input_records": orders_records,
                "total_processed_records": orders_records,
                "pipeline_complete": pipeline_complete
            },
            "inputs": [
                {
                    "endpoint_name": "orders",
                    "config": { "stream": "orders", "transport": { "name": "kafka_input" } },
                    "metrics": { "total_records": orders_records, "end_of_input": orders_eoi },
                    "is_fault_tolerant": true
                },
                {
                    "endpoint_name": "customers",
                    "config": { "stream": "customers", "transport": { "name": "file_input" }, "paused": true },
                    "metrics": {},
                    "paused": true
                }
            ],
            "outputs": [
                {
                    "endpoint_name": "totals",
                    "config": { "stream": "totals", "transport": { "name": "kafka_output" } },
                    "metrics": { "transmitted_records": 7 }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parses_stats_and_keeps_endpoint_order() {
        let status = status(false, false, 10);
        let names: Vec<&str> = status
            .inputs
            .iter()
            .map(|i| i.endpoint_name.as_str())
            .collect();
        assert_eq!(names, vec!["orders", "customers"]);
        assert_eq!(status.global_config.workers, 4);
        assert!(status.input("orders").unwrap().is_fault_tolerant);
        assert!(status.input("customers").unwrap().mode().is_paused());
        assert_eq!(status.output("totals").unwrap().metrics.transmitted_records, 7);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let status: ControllerStatus = serde_json::from_value(json!({
            "global_metrics": { "state": "Running", "cpu_msecs": 12, "rss_bytes": 5 },
            "suspend_error": null
        }))
        .unwrap();
        assert_eq!(status.global_metrics.rss_bytes, 5);
        assert!(status.inputs.is_empty());
    }

    #[test]
    fn latches_are_restored() {
        let previous = status(true, true, 10);
        let (next, regressions) = status(false, false, 12).with_latches_from(&previous);
        assert!(next.global_metrics.pipeline_complete);
        assert!(next.input("orders").unwrap().metrics.end_of_input);
        assert_eq!(
            regressions.latches,
            vec![
                "global_metrics.pipeline_complete".to_string(),
                "inputs[orders].end_of_input".to_string()
            ]
        );
        assert!(regressions.counters.is_empty());
    }

    #[test]
    fn counter_regressions_are_reported_not_corrected() {
        let previous = status(false, false, 10);
        let (next, regressions) = status(false, false, 3).with_latches_from(&previous);
        assert_eq!(next.global_metrics.total_input_records, 3);
        assert!(regressions.latches.is_empty());
        assert!(regressions
            .counters
            .contains(&"global_metrics.total_input_records".to_string()));
        assert!(regressions
            .counters
            .contains(&"inputs[orders].total_records".to_string()));
    }

    #[test]
    fn rss_may_go_down() {
        let previous = GlobalMetrics {
            rss_bytes: 100,
            ..Default::default()
        };
        let next = GlobalMetrics {
            rss_bytes: 10,
            ..Default::default()
        };
        assert!(next.counter_regressions(&previous).is_empty());
    }

    proptest! {
        #[test]
        fn pipeline_complete_never_unlatches(sequence in prop::collection::vec(any::<GlobalMetrics>(), 1..20)) {
            let mut published: Option<GlobalMetrics> = None;
            for mut metrics in sequence {
                if let Some(previous) = &published {
                    metrics.latch_from(previous);
                    prop_assert!(!previous.pipeline_complete || metrics.pipeline_complete);
                }
                published = Some(metrics);
            }
        }

        #[test]
        fn end_of_input_never_unlatches(sequence in prop::collection::vec(any::<InputEndpointMetrics>(), 1..20)) {
            let mut published: Option<InputEndpointMetrics> = None;
            for mut metrics in sequence {
                if let Some(previous) = &published {
                    let was_cleared = previous.end_of_input && !metrics.end_of_input;
                    prop_assert_eq!(metrics.latch_from(previous), was_cleared);
                    prop_assert!(!previous.end_of_input || metrics.end_of_input);
                }
                published = Some(metrics);
            }
        }
    }
}
