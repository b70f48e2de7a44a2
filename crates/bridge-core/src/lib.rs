// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration and lifecycle for the telemetry bridge.
//!
//! This crate wires the `firehose-bridge` pipeline into a running set of
//! services: it validates configuration, spawns the task inventory, and
//! coordinates graceful shutdown. The launcher binary (CLI parsing,
//! credential acquisition, health endpoints) lives outside this workspace;
//! it embeds [`services::BridgeServices`] and maps [`error::ServicesError`]
//! to a process exit code via [`error::ServicesError::exit_code`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod error;
pub mod logging;
pub mod services;

pub use config::BridgeConfig;
pub use error::ServicesError;
pub use services::{Backends, BridgeServices, ServicesHandle};
