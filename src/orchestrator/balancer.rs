//! Consumer assignment
//!
//! Each registering consumer is sent to the queue furthest below its
//! weighted share: with `total = 1 + assigned`, a queue's shortfall is
//! `round(total * weight) - assigned_to_queue`. The largest positive
//! shortfall wins (first queue on ties); when no queue is short, the
//! heaviest queue wins. Counters only grow for the lifetime of the
//! balancer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::QueueSpec;
use crate::utils::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct QueueAssignment {
    pub name: String,
    pub weight: f64,
    pub consumers: u64,
}

#[derive(Debug, Default)]
pub struct AssignmentBalancer {
    queues: Mutex<Vec<QueueAssignment>>,
}

impl AssignmentBalancer {
    pub fn new(specs: &[QueueSpec]) -> Self {
        let queues = specs
            .iter()
            .map(|spec| QueueAssignment {
                name: spec.name.clone(),
                weight: spec.weight,
                consumers: 0,
            })
            .collect();
        Self {
            queues: Mutex::new(queues),
        }
    }

    /// Picks the queue for a new consumer and counts it.
    pub fn register(&self) -> Result<String> {
        let mut queues = self.lock();
        let idx = choose(&queues).ok_or(EngineError::NoQueues)?;

        let chosen = &mut queues[idx];
        chosen.consumers += 1;
        info!(queue = %chosen.name, consumers = chosen.consumers, "consumer assigned");
        Ok(chosen.name.clone())
    }

    pub fn snapshot(&self) -> Vec<QueueAssignment> {
        self.lock().clone()
    }

    /// Swaps in a new queue set. Queues that survive keep their counters.
    pub fn replace(&self, specs: &[QueueSpec]) {
        let mut queues = self.lock();
        let next = specs
            .iter()
            .map(|spec| QueueAssignment {
                name: spec.name.clone(),
                weight: spec.weight,
                consumers: queues
                    .iter()
                    .find(|q| q.name == spec.name)
                    .map_or(0, |q| q.consumers),
            })
            .collect();
        *queues = next;
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueAssignment>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Index of the queue the next consumer should join.
pub(crate) fn choose(queues: &[QueueAssignment]) -> Option<usize> {
    if queues.is_empty() {
        return None;
    }

    let total = 1 + queues.iter().map(|q| q.consumers).sum::<u64>();
    let mut best: Option<(usize, i64)> = None;
    for (idx, queue) in queues.iter().enumerate() {
        let expected = (total as f64 * queue.weight).round() as i64;
        let difference = expected - queue.consumers as i64;
        debug!(queue = %queue.name, expected, difference, "assignment candidate");
        if difference > 0 && best.is_none_or(|(_, top)| difference > top) {
            best = Some((idx, difference));
        }
    }

    best.map(|(idx, _)| idx).or_else(|| {
        let mut heaviest = 0;
        for (idx, queue) in queues.iter().enumerate().skip(1) {
            if queue.weight > queues[heaviest].weight {
                heaviest = idx;
            }
        }
        Some(heaviest)
    })
}
