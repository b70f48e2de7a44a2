// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log forwarding.
//!
//! Log-classified envelopes are converted to backend entries and queued on a
//! bounded in-memory queue; a single worker drains the queue into the
//! logging client. Submission is fire-and-forget: delivery failures are
//! logged and counted, never propagated, and when the queue overflows the
//! oldest entry is evicted so the newest data survives.

pub mod sink;

pub use sink::{LogSink, LogSinkService};
