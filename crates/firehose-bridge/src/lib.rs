// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Telemetry bridge pipeline.
//!
//! Consumes a firehose of platform envelopes, enriches them with application
//! metadata, and forwards logs and metrics to a remote monitoring backend.
//! The embedder supplies the firehose channel and the backend clients; this
//! crate owns everything in between: classification, label construction,
//! metadata caching, metric buffering and deduplication, batched writes with
//! retry, log forwarding, and self-accounting.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod app_info;
pub mod backend;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod heartbeat;
pub mod labels;
pub mod logs;
pub mod metrics;
pub mod nozzle;
pub mod serializer;
