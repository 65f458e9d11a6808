//! The `dispatch` module runs one consumer process's priority pipeline.
//!
//! Intake pulls records off the assigned queue(s) and files them into one
//! bounded buffer per [`MessageType`](crate::notification::MessageType).
//! Drain always takes the next record from the highest-priority non-empty
//! buffer, stamps it processed and forwards a copy to the reporting topic.
//! Lower tiers can starve while higher tiers stay busy.

pub mod pipeline;
pub mod tiers;

pub use pipeline::{DispatchPipeline, DispatchSummary, Forwarder, run_drain, run_intake};
pub use tiers::{TierReceiver, TierSender, tiers};

#[cfg(test)]
mod tests;
