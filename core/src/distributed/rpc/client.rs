// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The outbound `WorkerService` client: one long-lived channel per worker,
//! dialled at Register (§4.1, §5 "Outbound channels").

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::Channel;

use crate::distributed::rpc::proto::worker_service_client::WorkerServiceClient;
use crate::distributed::rpc::proto::AssignTestRequest as ProtoAssignTestRequest;
use crate::distributed::transport::{
    AssignTestRequest, AssignTestResponse, WorkerTransport, WorkerTransportFactory,
    ASSIGN_TEST_DEADLINE,
};
use crate::distributed::types::DistributedError;

/// How long [`TonicWorkerTransportFactory::connect`] waits for the initial
/// dial before rejecting the register (§4.1).
const DIAL_DEADLINE: Duration = Duration::from_secs(5);

/// Dials a worker's `host:port` over plain HTTP/2 and hands back a connected
/// [`TonicWorkerTransport`].
#[derive(Debug, Default)]
pub struct TonicWorkerTransportFactory;

#[async_trait]
impl WorkerTransportFactory for TonicWorkerTransportFactory {
    async fn connect(&self, address: &str) -> Result<Arc<dyn WorkerTransport>, DistributedError> {
        let endpoint = format!("http://{address}");
        let channel = tokio::time::timeout(
            DIAL_DEADLINE,
            Channel::from_shared(endpoint)
                .map_err(|err| DistributedError::Transport(err.to_string()))?
                .connect(),
        )
        .await
        .map_err(|_elapsed| DistributedError::Transport(format!("dial to {address} timed out")))?
        .map_err(|err| DistributedError::Transport(err.to_string()))?;

        Ok(Arc::new(TonicWorkerTransport {
            client: Mutex::new(WorkerServiceClient::new(channel)),
        }))
    }
}

/// A single worker's outbound channel, wrapping a tonic client handle.
pub struct TonicWorkerTransport {
    client: Mutex<WorkerServiceClient<Channel>>,
}

#[async_trait]
impl WorkerTransport for TonicWorkerTransport {
    async fn assign_test(
        &self,
        request: AssignTestRequest,
    ) -> Result<AssignTestResponse, DistributedError> {
        let proto_request = ProtoAssignTestRequest {
            test_id: request.test_id,
            attack_options_json: request.attack_options_json,
            duration: request.duration,
            rate_per_second: request.rate_per_second,
            targets_base64: request.targets_base64,
        };

        let mut outbound = tonic::Request::new(proto_request);
        outbound.set_timeout(ASSIGN_TEST_DEADLINE);

        let mut client = self.client.lock().await;
        let response = client
            .assign_test(outbound)
            .await
            .map_err(|status| DistributedError::Transport(status.to_string()))?
            .into_inner();

        Ok(AssignTestResponse {
            accepted: response.accepted,
            message: response.message,
        })
    }
}
