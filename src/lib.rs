//! # Herald
//!
//! `herald` orchestrates typed notification queues (one-time passwords,
//! transactional alerts, campaigns) on a partitioned message broker. It keeps
//! the broker's topics in line with a desired layout, assigns consumer
//! processes to queues by priority weight, drains each consumer's messages in
//! strict priority order and aggregates delivery statistics.
//!
//! ## Core Modules
//!
//! - `broker`: broker traits and the embedded, sled-backed partitioned log.
//! - `config`: loading and validating settings.
//! - `dispatch`: the per-consumer priority pipeline.
//! - `notification`: the message record carried between topics.
//! - `orchestrator`: topic reconciliation and consumer assignment for one engine instance.
//! - `reporting`: latency and throughput statistics from processed records.
//! - `routing`: producer-side fan-out of messages by type.
//! - `transport`: the WebSocket control server and its clients.
//! - `utils`: logging setup and error types.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod notification;
pub mod orchestrator;
pub mod reporting;
pub mod routing;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
