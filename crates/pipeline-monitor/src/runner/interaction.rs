use crate::connector::ConnectorAction;
use crate::error::source_error;
use crate::lifecycle::state_machine::PipelineAction;
use crate::runner::error::RunnerError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use pipeline_monitor_types::error::ErrorResponse;
use pipeline_monitor_types::ControllerStatus;
use reqwest::StatusCode;
use std::fmt::Display;
use std::time::Duration;

/// Formats the URL to reach an endpoint of the pipeline.
pub fn format_pipeline_url(location: &str, endpoint: &str) -> String {
    format!("http://{location}/{endpoint}")
}

/// Formats the error message displayed when a request to a pipeline timed out.
pub fn format_timeout_error_message<T: Display>(timeout: Duration, error: T) -> String {
    format!(
        "timeout ({}s) was reached: the pipeline took too long to respond, \
         the pipeline logs might contain additional information \
         (original error: {error})",
        timeout.as_secs()
    )
}

/// Operations the monitor performs on a running pipeline process.
///
/// `location` is the `host:port` the process was deployed at.
/// `pipeline_name` is only used to build errors.
#[async_trait]
pub trait PipelineTransport: Send + Sync {
    /// Retrieves the current status and metrics.
    async fn get_status(
        &self,
        pipeline_name: &str,
        location: &str,
        timeout: Duration,
    ) -> Result<ControllerStatus, RunnerError>;

    /// Sends a lifecycle command. `Ok` means the process acknowledged it.
    async fn send_command(
        &self,
        pipeline_name: &str,
        location: &str,
        action: PipelineAction,
    ) -> Result<(), RunnerError>;

    /// Starts or pauses an individual input connector.
    async fn set_connector_mode(
        &self,
        pipeline_name: &str,
        location: &str,
        connector_name: &str,
        action: ConnectorAction,
    ) -> Result<(), RunnerError>;

    /// Opens the log stream of the process. The stream ends when the process
    /// shuts down or the connection is lost.
    async fn log_lines(
        &self,
        pipeline_name: &str,
        location: &str,
    ) -> Result<BoxStream<'static, String>, RunnerError>;
}

/// Retrieves the status, giving up after `timeout` even if the transport
/// itself does not enforce it.
pub async fn get_status_within(
    transport: &dyn PipelineTransport,
    pipeline_name: &str,
    location: &str,
    timeout: Duration,
) -> Result<ControllerStatus, RunnerError> {
    tokio::time::timeout(timeout, transport.get_status(pipeline_name, location, timeout))
        .await
        .unwrap_or_else(|elapsed| {
            Err(RunnerError::UnreachablePipeline {
                pipeline_name: pipeline_name.to_string(),
                error: format_timeout_error_message(timeout, elapsed),
            })
        })
}

/// Transport over the HTTP API of the pipeline process.
#[derive(Clone)]
pub struct HttpPipelineTransport {
    client: reqwest::Client,
    command_timeout: Duration,
}

impl HttpPipelineTransport {
    pub fn new(client: reqwest::Client, command_timeout: Duration) -> Self {
        Self {
            client,
            command_timeout,
        }
    }

    async fn get(
        &self,
        pipeline_name: &str,
        location: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response, RunnerError> {
        let url = format_pipeline_url(location, endpoint);
        self.client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RunnerError::UnreachablePipeline {
                        pipeline_name: pipeline_name.to_string(),
                        error: format_timeout_error_message(timeout, &e),
                    }
                } else {
                    RunnerError::UnreachablePipeline {
                        pipeline_name: pipeline_name.to_string(),
                        error: format!(
                            "unable to send request due to: {e}, source: {}",
                            source_error(&e)
                        ),
                    }
                }
            })
    }

    /// Turns a non-success response into an error.
    async fn error_from_response(
        pipeline_name: &str,
        endpoint: &str,
        response: reqwest::Response,
    ) -> RunnerError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorResponse>(&body).unwrap_or_else(|_| {
            ErrorResponse::from_message(
                "UnexpectedResponse",
                if body.is_empty() {
                    format!("HTTP {status} without body")
                } else {
                    body
                },
            )
        });
        match status {
            StatusCode::SERVICE_UNAVAILABLE => RunnerError::UnreachablePipeline {
                pipeline_name: pipeline_name.to_string(),
                error: format!("pipeline is unavailable: {error}"),
            },
            StatusCode::INTERNAL_SERVER_ERROR if endpoint == "stats" => {
                RunnerError::PipelineRuntimeFailure {
                    pipeline_name: pipeline_name.to_string(),
                    error,
                }
            }
            status => RunnerError::PipelineEndpointError {
                pipeline_name: pipeline_name.to_string(),
                endpoint: endpoint.to_string(),
                status_code: status.as_u16(),
                error,
            },
        }
    }
}

#[async_trait]
impl PipelineTransport for HttpPipelineTransport {
    async fn get_status(
        &self,
        pipeline_name: &str,
        location: &str,
        timeout: Duration,
    ) -> Result<ControllerStatus, RunnerError> {
        let response = self.get(pipeline_name, location, "stats", timeout).await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(pipeline_name, "stats", response).await);
        }
        response
            .json::<ControllerStatus>()
            .await
            .map_err(|e| RunnerError::PipelineInvalidResponse {
                pipeline_name: pipeline_name.to_string(),
                error: format!("unable to deserialize /stats response due to: {e}"),
            })
    }

    async fn send_command(
        &self,
        pipeline_name: &str,
        location: &str,
        action: PipelineAction,
    ) -> Result<(), RunnerError> {
        let endpoint = action.endpoint();
        let response = self
            .get(pipeline_name, location, endpoint, self.command_timeout)
            .await?;
        if response.status().is_success() {
            debug!("Pipeline {pipeline_name} acknowledged /{endpoint}");
            Ok(())
        } else {
            Err(Self::error_from_response(pipeline_name, endpoint, response).await)
        }
    }

    async fn set_connector_mode(
        &self,
        pipeline_name: &str,
        location: &str,
        connector_name: &str,
        action: ConnectorAction,
    ) -> Result<(), RunnerError> {
        let endpoint = format!(
            "input_endpoints/{}/{action}",
            urlencoding::encode(connector_name)
        );
        let response = self
            .get(pipeline_name, location, &endpoint, self.command_timeout)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(pipeline_name, &endpoint, response).await)
        }
    }

    async fn log_lines(
        &self,
        pipeline_name: &str,
        location: &str,
    ) -> Result<BoxStream<'static, String>, RunnerError> {
        let url = format_pipeline_url(location, "logs");
        let response = self.client.get(&url).send().await.map_err(|e| {
            RunnerError::UnreachablePipeline {
                pipeline_name: pipeline_name.to_string(),
                error: format!(
                    "unable to follow logs due to: {e}, source: {}",
                    source_error(&e)
                ),
            }
        })?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(pipeline_name, "logs", response).await);
        }
        let mut body = Box::pin(response.bytes_stream());
        Ok(async_stream::stream! {
            // Bytes are only decoded once a full line is in, a chunk may end
            // in the middle of a character.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(Ok(chunk)) = body.next().await {
                pending.extend_from_slice(&chunk);
                while let Some(end) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=end).collect();
                    yield String::from_utf8_lossy(&line)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                }
            }
            if !pending.is_empty() {
                yield String::from_utf8_lossy(&pending).into_owned();
            }
        }
        .boxed())
    }
}

#[cfg(test)]
mod test {
    use super::{get_status_within, HttpPipelineTransport, PipelineTransport};
    use crate::connector::ConnectorAction;
    use crate::lifecycle::state_machine::PipelineAction;
    use crate::runner::error::RunnerError;
    use crate::runner::mock::{MockStatus, MockTransport};
    use futures_util::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn transport() -> HttpPipelineTransport {
        HttpPipelineTransport::new(reqwest::Client::new(), TIMEOUT)
    }

    fn stats_body() -> serde_json::Value {
        json!({
            "global_config": { "workers": 2 },
            "global_metrics": { "rss_bytes": 10, "total_input_records": 3 },
            "inputs": [{
                "endpoint_name": "orders",
                "config": { "stream": "orders", "transport": { "name": "kafka_input" } },
                "metrics": { "total_records": 3 }
            }],
            "outputs": []
        })
    }

    #[tokio::test]
    async fn status_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_body()))
            .mount(&server)
            .await;
        let location = server.address().to_string();
        let status = transport()
            .get_status("p1", &location, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(status.global_metrics.total_input_records, 3);
        assert_eq!(status.inputs[0].endpoint_name, "orders");
    }

    #[tokio::test]
    async fn status_failures_are_classified() {
        let server = MockServer::start().await;
        let location = server.address().to_string();

        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        assert!(matches!(
            transport().get_status("p1", &location, TIMEOUT).await,
            Err(RunnerError::PipelineInvalidResponse { .. })
        ));

        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "message": "worker panicked",
                "error_code": "WorkerPanic",
                "details": null
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        match transport().get_status("p1", &location, TIMEOUT).await {
            Err(RunnerError::PipelineRuntimeFailure { error, .. }) => {
                assert_eq!(error.error_code, "WorkerPanic")
            }
            other => panic!("unexpected: {other:?}"),
        }

        Mock::given(method("GET"))
            .and(path("/stats"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        assert!(matches!(
            transport().get_status("p1", &location, TIMEOUT).await,
            Err(RunnerError::UnreachablePipeline { .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let location = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            transport().get_status("p1", &location, TIMEOUT).await,
            Err(RunnerError::UnreachablePipeline { .. })
        ));
    }

    #[tokio::test]
    async fn commands_and_connector_actions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pause"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "cannot start",
                "error_code": "InvalidState",
                "details": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/input_endpoints/my%20orders/pause"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let location = server.address().to_string();
        let transport = transport();

        transport
            .send_command("p1", &location, PipelineAction::Pause)
            .await
            .unwrap();
        match transport
            .send_command("p1", &location, PipelineAction::Start)
            .await
        {
            Err(RunnerError::PipelineEndpointError {
                status_code, error, ..
            }) => {
                assert_eq!(status_code, 400);
                assert_eq!(error.message, "cannot start");
            }
            other => panic!("unexpected: {other:?}"),
        }
        transport
            .set_connector_mode("p1", &location, "my orders", ConnectorAction::Pause)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn log_lines_are_split() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("first\r\nsecond\nthird"))
            .mount(&server)
            .await;
        let location = server.address().to_string();
        let lines: Vec<String> = transport()
            .log_lines("p1", &location)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn log_characters_split_across_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let location = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            // "café\n" with the two bytes of 'é' in different chunks
            socket.write_all(b"4\r\ncaf\xc3\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(b"2\r\n\xa9\n\r\n0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        let lines: Vec<String> = transport()
            .log_lines("p1", &location)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(lines, vec!["café"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn status_gives_up_when_the_transport_does_not() {
        let transport = MockTransport::default();
        transport.set_status("p1", MockStatus::Hang);
        let result =
            get_status_within(&transport, "p1", "p1.local:8080", Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(RunnerError::UnreachablePipeline { .. })
        ));
    }
}
