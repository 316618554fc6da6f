//! Telemetry for Vigil.
//!
//! A [`TelemetryAggregator`](aggregator::TelemetryAggregator) samples the
//! host once per period, lists containers on both backends, appends to a
//! fixed-size [`HistoryBuffer`](history::HistoryBuffer), and broadcasts
//! each frame to subscribers.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod aggregator;
pub mod history;
pub mod host;
