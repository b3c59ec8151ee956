pub mod adapter_stats;
pub mod config;
pub mod error;
pub mod pipeline_state;

pub use adapter_stats::{
    ControllerStatus, GlobalMetrics, InputEndpointMetrics, InputEndpointStatus,
    OutputEndpointMetrics, OutputEndpointStatus, SnapshotRegressions,
};
pub use error::{DetailedError, ErrorResponse};
pub use pipeline_state::{ConnectorMode, PipelineState};
