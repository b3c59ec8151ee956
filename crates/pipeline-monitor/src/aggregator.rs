//! Periodic status polling of all live pipelines.
//!
//! A round fans out one status request per live pipeline, with bounded
//! concurrency, and collects whatever answered before the round deadline.
//! The result replaces the published view wholesale: a pipeline that did not
//! answer is absent from it, its previous snapshot is not carried forward.
//!
//! The only values taken from earlier rounds are the one-way latches
//! (`pipeline_complete`, `end_of_input`), which are restored if a pipeline
//! reports them cleared within the same deployment.

use crate::lifecycle::registry::{PipelineRegistry, PollTarget};
use crate::metrics::{
    LATCH_REGRESSIONS, PIPELINE_PROCESSED_RECORDS, REACHABLE_PIPELINES, STATUS_REQUESTS_FAILED,
    STATUS_REQUESTS_SUCCEEDED, STATUS_ROUNDS, STATUS_ROUND_LATENCY,
};
use crate::runner::error::RunnerError;
use crate::runner::interaction::{get_status_within, PipelineTransport};
use chrono::{DateTime, Utc};
use futures_util::{stream, Stream, StreamExt};
use log::{debug, info, warn};
use metrics::{counter, gauge, histogram};
use pipeline_monitor_types::ControllerStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Time between the start of two rounds.
    pub poll_period: Duration,
    /// Timeout of each status request.
    pub request_timeout: Duration,
    /// Time after which a round stops waiting for outstanding requests.
    pub round_timeout: Duration,
    /// Maximum number of status requests in flight.
    pub max_concurrent_requests: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(2_500),
            request_timeout: Duration::from_secs(5),
            round_timeout: Duration::from_secs(10),
            max_concurrent_requests: 16,
        }
    }
}

/// Snapshot of one pipeline as received in a round.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CapturedStatus {
    pub pipeline_name: String,
    pub deployment_id: Option<Uuid>,
    pub status: ControllerStatus,
    pub captured_at: DateTime<Utc>,
    /// Round in which the snapshot was captured.
    pub round: u64,
}

/// Result of the latest completed round.
#[derive(Debug, Clone, Default)]
pub struct StatusView {
    /// Number of the round, `0` before the first one completed.
    pub round: u64,
    pub completed_at: Option<DateTime<Utc>>,
    /// Pipelines that answered in this round, by name.
    pub pipelines: BTreeMap<String, Arc<CapturedStatus>>,
}

/// Item of a status subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Snapshot(Arc<CapturedStatus>),
    /// The pipeline was absent from a round. No item follows.
    Ended,
}

/// What is kept from one round to the next.
#[derive(Default)]
struct RoundMemory {
    round: u64,
    /// Latest published status per pipeline, with the deployment it belongs to.
    previous: BTreeMap<String, (Option<Uuid>, ControllerStatus)>,
}

pub struct StatusAggregator {
    registry: Arc<PipelineRegistry>,
    transport: Arc<dyn PipelineTransport>,
    config: AggregatorConfig,
    memory: Mutex<RoundMemory>,
    view: watch::Sender<Arc<StatusView>>,
    shutdown: Notify,
}

impl StatusAggregator {
    pub fn new(
        registry: Arc<PipelineRegistry>,
        transport: Arc<dyn PipelineTransport>,
        config: AggregatorConfig,
    ) -> Self {
        let (view, _) = watch::channel(Arc::new(StatusView::default()));
        Self {
            registry,
            transport,
            config,
            memory: Mutex::new(RoundMemory::default()),
            view,
            shutdown: Notify::new(),
        }
    }

    /// Latest completed round.
    pub fn view(&self) -> Arc<StatusView> {
        self.view.borrow().clone()
    }

    async fn poll_one(
        &self,
        target: PollTarget,
    ) -> (PollTarget, Result<ControllerStatus, RunnerError>, DateTime<Utc>) {
        let result = match &target.location {
            None => Err(RunnerError::UnknownDeploymentLocation {
                pipeline_name: target.pipeline_name.clone(),
            }),
            Some(location) => {
                get_status_within(
                    self.transport.as_ref(),
                    &target.pipeline_name,
                    location,
                    self.config.request_timeout,
                )
                .await
            }
        };
        (target, result, Utc::now())
    }

    /// Runs one round, publishes and returns its view. Rounds never overlap.
    pub async fn round(&self) -> Arc<StatusView> {
        let mut memory = self.memory.lock().await;
        let started = Instant::now();
        let targets = self.registry.poll_targets().await;
        let live: BTreeMap<String, Option<Uuid>> = targets
            .iter()
            .map(|target| (target.pipeline_name.clone(), target.deployment_id))
            .collect();
        let requested = targets.len();

        let outcomes: Vec<_> = stream::iter(targets)
            .map(|target| self.poll_one(target))
            .buffer_unordered(self.config.max_concurrent_requests.max(1))
            .take_until(sleep_until(started + self.config.round_timeout))
            .collect()
            .await;
        if outcomes.len() < requested {
            debug!(
                "Status round: {} of {requested} pipelines did not answer in time",
                requested - outcomes.len()
            );
        }

        memory.round += 1;
        let round = memory.round;
        memory
            .previous
            .retain(|name, (deployment_id, _)| live.get(name) == Some(&*deployment_id));

        let mut pipelines = BTreeMap::new();
        for (target, result, captured_at) in outcomes {
            let name = target.pipeline_name;
            match result {
                Ok(status) => {
                    let status = match memory.previous.get(&name) {
                        Some((_, previous)) => {
                            let (status, regressions) = status.with_latches_from(previous);
                            if !regressions.latches.is_empty() {
                                counter!(LATCH_REGRESSIONS)
                                    .increment(regressions.latches.len() as u64);
                                warn!(
                                    "Pipeline {name}: reported cleared latches, restored: {}",
                                    regressions.latches.join(", ")
                                );
                            }
                            if !regressions.counters.is_empty() {
                                warn!(
                                    "Pipeline {name}: counters went down: {}",
                                    regressions.counters.join(", ")
                                );
                            }
                            status
                        }
                        None => status,
                    };
                    gauge!(PIPELINE_PROCESSED_RECORDS, "pipeline" => name.clone())
                        .set(status.global_metrics.total_processed_records as f64);
                    memory
                        .previous
                        .insert(name.clone(), (target.deployment_id, status.clone()));
                    pipelines.insert(
                        name.clone(),
                        Arc::new(CapturedStatus {
                            pipeline_name: name,
                            deployment_id: target.deployment_id,
                            status,
                            captured_at,
                            round,
                        }),
                    );
                }
                Err(RunnerError::PipelineRuntimeFailure { error, .. }) => {
                    if self
                        .registry
                        .report_runtime_failure(&name, target.deployment_id, error)
                        .await
                    {
                        info!("Pipeline {name}: runtime failure detected while polling");
                    }
                }
                Err(e) => debug!("Pipeline {name}: excluded from round {round}: {e}"),
            }
        }

        let reachable = pipelines.len();
        counter!(STATUS_ROUNDS).increment(1);
        counter!(STATUS_REQUESTS_SUCCEEDED).increment(reachable as u64);
        counter!(STATUS_REQUESTS_FAILED).increment((requested - reachable) as u64);
        gauge!(REACHABLE_PIPELINES).set(reachable as f64);
        histogram!(STATUS_ROUND_LATENCY).record(started.elapsed().as_secs_f64());

        let view = Arc::new(StatusView {
            round,
            completed_at: Some(Utc::now()),
            pipelines,
        });
        self.view.send_replace(view.clone());
        view
    }

    /// Snapshots of the pipeline as rounds complete, starting with the
    /// current one if any. Ends with [`StatusUpdate::Ended`] after the first
    /// round the pipeline is absent from.
    pub fn subscribe_status(&self, pipeline_name: &str) -> impl Stream<Item = StatusUpdate> {
        let mut receiver = self.view.subscribe();
        let pipeline_name = pipeline_name.to_string();
        async_stream::stream! {
            let current = receiver.borrow_and_update().clone();
            if let Some(snapshot) = current.pipelines.get(&pipeline_name) {
                yield StatusUpdate::Snapshot(snapshot.clone());
            }
            while receiver.changed().await.is_ok() {
                let view = receiver.borrow_and_update().clone();
                match view.pipelines.get(&pipeline_name) {
                    Some(snapshot) => yield StatusUpdate::Snapshot(snapshot.clone()),
                    None => break,
                }
            }
            yield StatusUpdate::Ended;
        }
    }

    /// Runs rounds every poll period until [`StatusAggregator::shutdown`].
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.round().await;
                }
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Status aggregator stopped");
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod test {
    use super::{AggregatorConfig, StatusAggregator, StatusUpdate};
    use crate::lifecycle::registry::PipelineRegistry;
    use crate::runner::logs_buffer::LogsLimits;
    use crate::runner::mock::{controller_status, MockExecutor, MockStatus, MockTransport};
    use crate::runner::pipeline_automata::AutomatonConfig;
    use futures_util::StreamExt;
    use pipeline_monitor_types::PipelineState;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct Setup {
        registry: Arc<PipelineRegistry>,
        transport: Arc<MockTransport>,
        aggregator: Arc<StatusAggregator>,
    }

    async fn setup(running: &[&str]) -> Setup {
        let transport = Arc::new(MockTransport::default());
        let registry = Arc::new(PipelineRegistry::new(
            transport.clone(),
            Arc::new(MockExecutor::default()),
            AutomatonConfig {
                provisioning_poll_period: Duration::from_millis(10),
                initialization_poll_period: Duration::from_millis(10),
                ..AutomatonConfig::default()
            },
            LogsLimits::default(),
        ));
        for name in running {
            registry.create(name, BTreeMap::new()).await.unwrap();
            registry.start(name).await.unwrap();
            assert_eq!(
                registry.wait_idle(name).await.unwrap(),
                PipelineState::Running
            );
        }
        let aggregator = Arc::new(StatusAggregator::new(
            registry.clone(),
            transport.clone(),
            AggregatorConfig {
                poll_period: Duration::from_millis(20),
                request_timeout: Duration::from_millis(100),
                round_timeout: Duration::from_millis(200),
                max_concurrent_requests: 2,
            },
        ));
        Setup {
            registry,
            transport,
            aggregator,
        }
    }

    fn names(view: &super::StatusView) -> Vec<&str> {
        view.pipelines.keys().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn hanging_pipeline_is_excluded_then_recovers() {
        let Setup {
            transport,
            aggregator,
            registry,
        } = setup(&["a", "b", "c"]).await;
        registry.create("idle", BTreeMap::new()).await.unwrap();
        transport.set_status("a", MockStatus::Healthy(controller_status(10, false)));
        transport.set_status("b", MockStatus::Hang);
        transport.set_status("c", MockStatus::Healthy(controller_status(30, false)));

        let first = aggregator.round().await;
        assert_eq!(first.round, 1);
        assert_eq!(names(&first), vec!["a", "c"]);
        assert_eq!(
            first.pipelines["c"].status.global_metrics.total_processed_records,
            30
        );

        transport.set_status("b", MockStatus::Healthy(controller_status(20, false)));
        let second = aggregator.round().await;
        assert_eq!(names(&second), vec!["a", "b", "c"]);
        assert_eq!(second.pipelines["b"].round, 2);
        assert_eq!(
            second.pipelines["b"].status.global_metrics.total_processed_records,
            20
        );
        assert!(second.pipelines["a"].captured_at >= first.pipelines["a"].captured_at);
        assert_eq!(aggregator.view().round, 2);
    }

    #[tokio::test]
    async fn hanging_pipeline_does_not_hold_the_only_request_slot() {
        let Setup {
            registry,
            transport,
            ..
        } = setup(&["a", "b", "c"]).await;
        transport.set_status("a", MockStatus::Hang);
        let aggregator = StatusAggregator::new(
            registry,
            transport.clone(),
            AggregatorConfig {
                poll_period: Duration::from_millis(20),
                request_timeout: Duration::from_millis(100),
                round_timeout: Duration::from_millis(500),
                max_concurrent_requests: 1,
            },
        );
        let view = aggregator.round().await;
        assert_eq!(names(&view), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn unreachable_pipeline_is_not_carried_forward() {
        let Setup {
            transport,
            aggregator,
            registry,
        } = setup(&["a"]).await;
        let view = aggregator.round().await;
        assert_eq!(names(&view), vec!["a"]);
        transport.set_status("a", MockStatus::Unreachable);
        assert!(aggregator.round().await.pipelines.is_empty());
        assert_eq!(
            registry.get("a").await.unwrap().state,
            PipelineState::Running
        );
    }

    #[tokio::test]
    async fn latches_survive_regressions_within_a_deployment() {
        let Setup {
            transport,
            aggregator,
            registry,
        } = setup(&["a"]).await;
        transport.set_status("a", MockStatus::Healthy(controller_status(10, true)));
        aggregator.round().await;
        transport.set_status("a", MockStatus::Unreachable);
        aggregator.round().await;
        transport.set_status("a", MockStatus::Healthy(controller_status(12, false)));
        let view = aggregator.round().await;
        let metrics = &view.pipelines["a"].status.global_metrics;
        assert!(metrics.pipeline_complete);
        assert_eq!(metrics.total_processed_records, 12);

        // A new deployment starts from a clean slate
        registry.shutdown("a").await.unwrap();
        registry.wait_idle("a").await.unwrap();
        registry.start("a").await.unwrap();
        registry.wait_idle("a").await.unwrap();
        let view = aggregator.round().await;
        assert!(!view.pipelines["a"].status.global_metrics.pipeline_complete);
    }

    #[tokio::test]
    async fn runtime_failure_moves_pipeline_to_failed() {
        let Setup {
            transport,
            aggregator,
            registry,
        } = setup(&["a", "b"]).await;
        transport.set_status("a", MockStatus::RuntimeFailure("worker panicked".to_string()));
        let view = aggregator.round().await;
        assert_eq!(names(&view), vec!["b"]);
        let descr = registry.get("a").await.unwrap();
        assert_eq!(descr.state, PipelineState::Failed);
        assert_eq!(descr.deployment_error.unwrap().message, "worker panicked");
        assert_eq!(
            registry.get("b").await.unwrap().state,
            PipelineState::Running
        );
    }

    #[tokio::test]
    async fn subscription_ends_when_pipeline_is_absent() {
        let Setup {
            transport,
            aggregator,
            ..
        } = setup(&["a"]).await;
        aggregator.round().await;
        let mut updates = Box::pin(aggregator.subscribe_status("a"));
        match updates.next().await.unwrap() {
            StatusUpdate::Snapshot(snapshot) => assert_eq!(snapshot.round, 1),
            StatusUpdate::Ended => panic!("expected a snapshot"),
        }
        aggregator.round().await;
        match updates.next().await.unwrap() {
            StatusUpdate::Snapshot(snapshot) => assert_eq!(snapshot.round, 2),
            StatusUpdate::Ended => panic!("expected a snapshot"),
        }
        transport.set_status("a", MockStatus::Unreachable);
        aggregator.round().await;
        assert_eq!(updates.next().await, Some(StatusUpdate::Ended));
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test]
    async fn run_until_shutdown() {
        let Setup { aggregator, .. } = setup(&["a"]).await;
        let task = tokio::spawn(aggregator.clone().run());
        let mut updates = Box::pin(aggregator.subscribe_status("a"));
        assert!(matches!(
            updates.next().await,
            Some(StatusUpdate::Snapshot(_))
        ));
        aggregator.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(aggregator.view().round >= 1);
    }
}
