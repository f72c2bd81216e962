// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The inbound `CoordinatorService` implementation: Register, StreamStatus,
//! SubmitResult.

use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::warn;

use crate::distributed::coordinator::Coordinator;
use crate::distributed::rpc::proto::coordinator_service_server::CoordinatorService;
use crate::distributed::rpc::proto::{
    RegisterRequest, RegisterResponse, StreamStatusRequest, StreamStatusResponse,
    SubmitResultRequest, SubmitResultResponse, WorkerStateProto,
};
use crate::distributed::types::{StatusCodeHistogram, TestResult, WorkerStatus};

/// Inbound RPC surface, delegating every call to a shared [`Coordinator`].
pub struct CoordinatorGrpcApi {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorGrpcApi {
    /// Build the RPC surface over a shared coordinator.
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

fn worker_status_from_proto(status: i32) -> WorkerStatus {
    match WorkerStateProto::try_from(status).unwrap_or(WorkerStateProto::Unspecified) {
        WorkerStateProto::Ready => WorkerStatus::Ready,
        WorkerStateProto::Busy => WorkerStatus::Busy,
        WorkerStateProto::Finishing => WorkerStatus::Finishing,
        WorkerStateProto::Error => WorkerStatus::Error,
        WorkerStateProto::Unspecified => WorkerStatus::Error,
    }
}

#[tonic::async_trait]
impl CoordinatorService for CoordinatorGrpcApi {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        match self.coordinator.register_worker(req.worker_id, req.address).await {
            Ok(()) => Ok(Response::new(RegisterResponse {
                success: true,
                message: String::new(),
            })),
            Err(err) => Ok(Response::new(RegisterResponse {
                success: false,
                message: err.to_string(),
            })),
        }
    }

    type StreamStatusStream =
        Pin<Box<dyn Stream<Item = Result<StreamStatusResponse, Status>> + Send + 'static>>;

    async fn stream_status(
        &self,
        request: Request<Streaming<StreamStatusRequest>>,
    ) -> Result<Response<Self::StreamStatusStream>, Status> {
        let mut inbound = request.into_inner();
        let coordinator = Arc::clone(&self.coordinator);
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        tokio::spawn(async move {
            while let Some(update) = inbound.next().await {
                let response = match update {
                    Ok(update) => {
                        let status = worker_status_from_proto(update.status);
                        let current_test_id = if update.test_id.is_empty() {
                            None
                        } else {
                            Some(update.test_id)
                        };
                        coordinator
                            .update_worker_status(
                                &update.worker_id,
                                status,
                                current_test_id,
                                update.progress_msg,
                                update.completed_requests,
                                update.total_requests,
                            )
                            .await;
                        Ok(StreamStatusResponse {
                            accepted: true,
                            message: String::new(),
                        })
                    }
                    Err(err) => {
                        warn!(error = %err, "stream_status inbound error");
                        Err(Status::aborted(err.to_string()))
                    }
                };
                if tx.send(response).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn submit_result(
        &self,
        request: Request<SubmitResultRequest>,
    ) -> Result<Response<SubmitResultResponse>, Status> {
        let req = request.into_inner();
        let status_code_counts: StatusCodeHistogram = req.status_code_counts;

        let result = TestResult {
            id: uuid::Uuid::new_v4().to_string(),
            test_id: req.test_id,
            worker_id: req.worker_id,
            engine_metrics_base64: req.engine_metrics_base64,
            timestamp: chrono::DateTime::from_timestamp(req.timestamp, 0)
                .unwrap_or_else(chrono::Utc::now),
            total_requests: req.total_requests,
            completed_requests: req.completed_requests,
            duration_ms: req.duration_ms,
            success_rate: req.success_rate,
            average_latency_ms: req.average_latency_ms,
            p95_latency_ms: req.p95_latency_ms,
            status_code_counts,
        };

        match self.coordinator.submit_result(result).await {
            Ok(()) => Ok(Response::new(SubmitResultResponse {
                success: true,
                message: String::new(),
            })),
            Err(err) => Ok(Response::new(SubmitResultResponse {
                success: false,
                message: err.to_string(),
            })),
        }
    }
}
