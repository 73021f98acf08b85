//! Concrete [`ContainerRuntime`](crate::framework::ContainerRuntime) implementations.

pub mod docker_client;

pub use docker_client::*;
