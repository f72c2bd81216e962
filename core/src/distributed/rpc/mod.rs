// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The wire layer: generated protobuf/tonic types, the inbound server
//! (`CoordinatorService`), and the outbound client (`WorkerService`, i.e.
//! [`crate::distributed::transport::WorkerTransport`]).

pub mod client;
pub mod server;

/// Generated protobuf/tonic code for `coordinator.proto`.
pub mod proto {
    #![allow(clippy::all)]
    tonic::include_proto!("loadtest.coordinator.v1");
}

pub use client::TonicWorkerTransportFactory;
pub use server::CoordinatorGrpcApi;
