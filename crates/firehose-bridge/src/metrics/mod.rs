// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric batching and delivery.
//!
//! Records produced by the serializer pass through three stages:
//!
//! ```text
//!   Serializer
//!       │
//!       v
//!   ┌──────────────┐
//!   │ MetricBuffer │  (mutex-guarded window, hard cap)
//!   └──────┬───────┘
//!          │ swap-on-flush
//!          v
//!   ┌──────────────┐
//!   │ FlushDriver  │  (dedup, split into batches)
//!   └──────┬───────┘
//!          │ work channel
//!          v
//!   ┌──────────────┐
//!   │ MetricAdapter│  (descriptor cache, retries, worker pool)
//!   └──────────────┘
//! ```
//!
//! Dedup happens once per window, at flush time: gauges keep the latest
//! write, cumulatives keep the monotonic maximum.

pub mod adapter;
pub mod buffer;
pub mod record;

pub use adapter::{AdapterService, MetricAdapter};
pub use buffer::{FlushDriver, MetricBuffer};
pub use record::{dedup, Descriptor, MetricBatch, MetricKind, MetricRecord};
