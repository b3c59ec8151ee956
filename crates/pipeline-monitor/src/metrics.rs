use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use actix_web::{get, http::header::ContentType, web, HttpResponse, HttpServer, Responder};
use log::info;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tokio::task::JoinHandle;

pub(crate) const STATUS_ROUNDS: &str = "feldera.monitor.status_rounds";
pub(crate) const STATUS_ROUND_LATENCY: &str = "feldera.monitor.status_round_latency";
pub(crate) const STATUS_REQUESTS_SUCCEEDED: &str = "feldera.monitor.status_requests_succeeded";
pub(crate) const STATUS_REQUESTS_FAILED: &str = "feldera.monitor.status_requests_failed";
pub(crate) const REACHABLE_PIPELINES: &str = "feldera.monitor.reachable_pipelines";
pub(crate) const PIPELINE_PROCESSED_RECORDS: &str = "feldera.monitor.pipeline_processed_records";
pub(crate) const LIFECYCLE_TRANSITIONS: &str = "feldera.monitor.lifecycle_transitions";
pub(crate) const UNKNOWN_STATE_DEFECTS: &str = "feldera.monitor.unknown_state_defects";
pub(crate) const LATCH_REGRESSIONS: &str = "feldera.monitor.latch_regressions";

/// Initialize metrics.
pub fn init() -> Result<PrometheusHandle, BuildError> {
    describe_counter!(STATUS_ROUNDS, "Completed status aggregation rounds");
    describe_histogram!(
        STATUS_ROUND_LATENCY,
        Unit::Seconds,
        "Duration of a status aggregation round"
    );
    describe_counter!(
        STATUS_REQUESTS_SUCCEEDED,
        "Status requests answered with a snapshot"
    );
    describe_counter!(
        STATUS_REQUESTS_FAILED,
        "Status requests that failed or did not complete within the round"
    );
    describe_gauge!(
        REACHABLE_PIPELINES,
        "Pipelines with a snapshot in the latest round"
    );
    describe_gauge!(
        PIPELINE_PROCESSED_RECORDS,
        "Total processed records per pipeline as of the latest round"
    );
    describe_counter!(
        LIFECYCLE_TRANSITIONS,
        "Committed lifecycle transitions by target state"
    );
    describe_counter!(
        UNKNOWN_STATE_DEFECTS,
        "Refused commits of states or edges outside the lifecycle"
    );
    describe_counter!(
        LATCH_REGRESSIONS,
        "One-way flags reported cleared by a pipeline and restored"
    );

    install_metrics_recorder()
}

/// Install a Prometheus recorder, once per process.
fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    static METRIC_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    if let Some(handle) = METRIC_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(METRIC_HANDLE.get_or_init(|| handle).clone())
}

/// Create a scrape endpoint for metrics on http://{address}:{port}/metrics
pub fn create_endpoint(
    monitor_metrics: PrometheusHandle,
    address: &str,
    port: u16,
) -> std::io::Result<JoinHandle<std::io::Result<()>>> {
    let monitor_metrics = web::Data::new(monitor_metrics);
    let server = HttpServer::new(move || {
        actix_web::App::new()
            .app_data(monitor_metrics.clone())
            .service(metrics)
    })
    .workers(1)
    .disable_signals()
    .bind((address, port))?
    .run();
    info!("Metrics are served on http://{address}:{port}/metrics");
    Ok(tokio::spawn(server))
}

/// A prometheus-compatible metrics scrape endpoint.
#[get("/metrics")]
async fn metrics(monitor_metrics: web::Data<PrometheusHandle>) -> impl Responder {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body(monitor_metrics.render())
}

#[cfg(test)]
mod test {
    use super::{init, STATUS_ROUNDS};
    use ::metrics::counter;

    #[test]
    fn recorder_is_installed_once() {
        let handle = init().unwrap();
        let again = init().unwrap();
        counter!(STATUS_ROUNDS).increment(3);
        assert!(handle.render().contains("feldera_monitor_status_rounds"));
        assert!(again.render().contains("feldera_monitor_status_rounds"));
    }
}
