//! Container lifecycle management for Vigil.
//!
//! Two structurally different backends sit behind the
//! [`ContainerBackend`](backend::ContainerBackend) trait: the Docker engine
//! adapter and the self-hosted mini runtime supervisor. The
//! [`Dispatcher`](dispatch::Dispatcher) routes each request to one of them
//! and flattens every outcome into a well-formed response.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod dispatch;
pub mod logs;
pub mod process;
pub mod state;
pub mod stats;
