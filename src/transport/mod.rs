//! gRPC transport layer for TrialScope.
//!
//! Each stream RPC spawns its session on its own task. Updates travel over an
//! unbounded channel so emission never suspends the session; dropping the
//! response stream cancels the session's token, which ends it without error.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::engine::TrialScopeEngine;
use crate::error::{ErrorKind, TrialScopeError, TrialScopeResult};
use crate::experiment::ExperimentId;
use crate::search::{Operation, PreviewConfig, SearchPreview, TrainingUnit};
use crate::stream::{MetricBatchesUpdate, MetricNamesUpdate};

pub mod proto {
    tonic::include_proto!("trialscope");
}

use proto::trial_scope_server::{TrialScope, TrialScopeServer};

/// Maximum size of a preview configuration payload.
const MAX_CONFIG_JSON_BYTES: usize = 1024 * 1024; // 1 MiB

/// gRPC service implementation.
pub struct TrialScopeServiceImpl {
    engine: Arc<TrialScopeEngine>,
}

impl TrialScopeServiceImpl {
    #[must_use]
    pub fn new(engine: Arc<TrialScopeEngine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn into_server(self) -> TrialScopeServer<Self> {
        TrialScopeServer::new(self)
    }
}

fn status_from_error(err: &TrialScopeError) -> Status {
    match err.kind() {
        ErrorKind::InvalidArgument => Status::invalid_argument(err.to_string()),
        ErrorKind::NotFound => Status::not_found(err.to_string()),
        ErrorKind::Internal => Status::internal(err.to_string()),
    }
}

fn parse_experiment_id(raw: i32) -> Result<ExperimentId, Status> {
    ExperimentId::try_from(raw).map_err(|e| status_from_error(&e.into()))
}

fn parse_preview_config(bytes: &[u8]) -> Result<PreviewConfig, Status> {
    if bytes.is_empty() {
        return Err(Status::invalid_argument("config_json is required"));
    }
    if bytes.len() > MAX_CONFIG_JSON_BYTES {
        return Err(Status::invalid_argument("config_json exceeds maximum size"));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| Status::invalid_argument(format!("error parsing experiment config: {e}")))
}

/// Cancels `cancel` once the client drops its end of the stream.
///
/// The watcher exits as soon as the session finishes and cancels the token
/// itself, releasing its sender so the stream can close.
fn watch_disconnect<T: Send + 'static>(tx: UnboundedSender<T>, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = tx.closed() => cancel.cancel(),
            () = cancel.cancelled() => {}
        }
    });
}

/// Sink used by a session: forwards updates, failing once the client is gone.
fn forward<'a, T, M>(
    tx: &'a UnboundedSender<Result<M, Status>>,
    path: &'static str,
) -> impl FnMut(T) -> TrialScopeResult<()> + 'a
where
    M: From<T>,
{
    move |update| {
        tx.send(Ok(M::from(update)))
            .map_err(|_| TrialScopeError::disconnected(path))
    }
}

fn report_failure<M>(
    tx: &UnboundedSender<Result<M, Status>>,
    path: &'static str,
    err: &TrialScopeError,
) {
    if tx.is_closed() {
        debug!(stream = path, error = %err, "session ended after client disconnect");
        return;
    }
    warn!(stream = path, error = %err, "stream failed");
    let _ = tx.send(Err(status_from_error(err)));
}

impl From<MetricNamesUpdate> for proto::MetricNamesResponse {
    fn from(update: MetricNamesUpdate) -> Self {
        Self {
            searcher_metric: update.searcher_metric,
            training_metrics: update.training,
            validation_metrics: update.validation,
        }
    }
}

impl From<MetricBatchesUpdate> for proto::MetricBatchesResponse {
    fn from(update: MetricBatchesUpdate) -> Self {
        Self {
            batches: update.batches,
        }
    }
}

impl From<Operation> for proto::RunnableOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Train { unit, count } => {
                let unit = match unit {
                    TrainingUnit::Records => proto::Unit::Records,
                    TrainingUnit::Batches => proto::Unit::Batches,
                    TrainingUnit::Epochs => proto::Unit::Epochs,
                };
                Self {
                    r#type: proto::RunnableType::Train as i32,
                    length: Some(proto::TrainingUnits {
                        unit: unit as i32,
                        count,
                    }),
                }
            }
            Operation::Validate => Self {
                r#type: proto::RunnableType::Validate as i32,
                length: None,
            },
            Operation::Checkpoint => Self {
                r#type: proto::RunnableType::Checkpoint as i32,
                length: None,
            },
        }
    }
}

fn to_proto_preview(preview: SearchPreview) -> Result<proto::PreviewSearchResponse, Status> {
    let seed = u32::try_from(preview.seed).map_err(|_| Status::internal("seed out of range"))?;
    let trials = preview
        .groups
        .into_iter()
        .map(|group| {
            let occurrences = i32::try_from(group.occurrences)
                .map_err(|_| Status::internal("occurrence count out of range"))?;
            Ok(proto::TrialSimulation {
                operations: group
                    .representative
                    .operations()
                    .iter()
                    .copied()
                    .map(proto::RunnableOperation::from)
                    .collect(),
                occurrences,
            })
        })
        .collect::<Result<Vec<_>, Status>>()?;
    Ok(proto::PreviewSearchResponse { seed, trials })
}

#[tonic::async_trait]
impl TrialScope for TrialScopeServiceImpl {
    type StreamMetricNamesStream =
        UnboundedReceiverStream<Result<proto::MetricNamesResponse, Status>>;

    async fn stream_metric_names(
        &self,
        request: Request<proto::MetricNamesRequest>,
    ) -> Result<Response<Self::StreamMetricNamesStream>, Status> {
        let req = request.into_inner();
        let id = parse_experiment_id(req.experiment_id)?;
        let poller = self
            .engine
            .metric_names_stream(id)
            .map_err(|e| status_from_error(&e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        watch_disconnect(tx.clone(), cancel.clone());

        tokio::spawn(async move {
            let _done = cancel.clone().drop_guard();
            let sink = forward::<MetricNamesUpdate, _>(&tx, "metric_names_stream");
            if let Err(err) = poller.run(cancel, sink).await {
                report_failure(&tx, "metric_names_stream", &err);
            }
        });

        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }

    type StreamMetricBatchesStream =
        UnboundedReceiverStream<Result<proto::MetricBatchesResponse, Status>>;

    async fn stream_metric_batches(
        &self,
        request: Request<proto::MetricBatchesRequest>,
    ) -> Result<Response<Self::StreamMetricBatchesStream>, Status> {
        let req = request.into_inner();
        let id = parse_experiment_id(req.experiment_id)?;
        let poller = self
            .engine
            .metric_batches_stream(
                id,
                Some(req.training_metric.as_str()),
                Some(req.validation_metric.as_str()),
            )
            .map_err(|e| status_from_error(&e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        watch_disconnect(tx.clone(), cancel.clone());

        tokio::spawn(async move {
            let _done = cancel.clone().drop_guard();
            let sink = forward::<MetricBatchesUpdate, _>(&tx, "metric_batches_stream");
            if let Err(err) = poller.run(cancel, sink).await {
                report_failure(&tx, "metric_batches_stream", &err);
            }
        });

        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }

    async fn preview_search(
        &self,
        request: Request<proto::PreviewSearchRequest>,
    ) -> Result<Response<proto::PreviewSearchResponse>, Status> {
        let req = request.into_inner();
        let config = parse_preview_config(&req.config_json)?;
        let preview = self
            .engine
            .preview_search(&config, u64::from(req.seed))
            .map_err(|e| status_from_error(&e))?;
        Ok(Response::new(to_proto_preview(preview)?))
    }
}

pub use proto::trial_scope_client::TrialScopeClient;
