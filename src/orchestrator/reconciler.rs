//! Topic reconciliation
//!
//! Converges the broker's topic layout onto the desired queue list plus the
//! reporting topic. Each admin call is bounded by a timeout; a failure on one
//! topic is logged and the remaining topics are still reconciled. A topic
//! whose partition count differs is deleted and recreated, which drops
//! whatever it still held.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::BrokerAdmin;
use crate::config::QueueSpec;
use crate::utils::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    Created,
    Recreated,
    Unchanged,
}

/// What one reconciliation pass did, by topic name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub recreated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

impl ReconcileReport {
    /// Number of topics that needed a create or delete call.
    pub fn mutations(&self) -> usize {
        self.created.len() + self.recreated.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, name: &str, outcome: TopicOutcome) {
        let bucket = match outcome {
            TopicOutcome::Created => &mut self.created,
            TopicOutcome::Recreated => &mut self.recreated,
            TopicOutcome::Unchanged => &mut self.unchanged,
        };
        bucket.push(name.to_string());
    }
}

pub struct TopicReconciler<A> {
    admin: A,
    timeout: Duration,
    replication_factor: u16,
}

impl<A: BrokerAdmin> TopicReconciler<A> {
    pub fn new(admin: A, timeout: Duration, replication_factor: u16) -> Self {
        Self {
            admin,
            timeout,
            replication_factor,
        }
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Reconciles the reporting topic first, then every queue in order.
    pub async fn reconcile(
        &self,
        specs: &[QueueSpec],
        reporting_queue: &str,
        reporting_partitions: u32,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let targets = std::iter::once((reporting_queue, reporting_partitions))
            .chain(specs.iter().map(|s| (s.name.as_str(), s.partitions)));

        for (name, partitions) in targets {
            match self.reconcile_topic(name, partitions).await {
                Ok(outcome) => report.record(name, outcome),
                Err(e) => {
                    error!(topic = name, error = %e, "couldn't reconcile topic");
                    report.failed.push(name.to_string());
                }
            }
        }

        info!(
            created = report.created.len(),
            recreated = report.recreated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        report
    }

    async fn reconcile_topic(&self, name: &str, partitions: u32) -> Result<TopicOutcome> {
        let current = self
            .bounded("describe_topic", name, self.admin.describe_topic(name))
            .await?;

        match current {
            None => {
                self.create(name, partitions).await?;
                Ok(TopicOutcome::Created)
            }
            Some(layout) if layout.partitions != partitions => {
                warn!(
                    topic = name,
                    current = layout.partitions,
                    desired = partitions,
                    "partition count differs, recreating topic and dropping its records"
                );
                self.bounded("delete_topic", name, self.admin.delete_topic(name))
                    .await?;
                self.create(name, partitions).await?;
                Ok(TopicOutcome::Recreated)
            }
            Some(_) => Ok(TopicOutcome::Unchanged),
        }
    }

    async fn create(&self, name: &str, partitions: u32) -> Result<()> {
        let call = self
            .admin
            .create_topic(name, partitions, self.replication_factor);
        self.bounded("create_topic", name, call).await
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        topic: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| EngineError::AdminTimeout {
                operation,
                topic: topic.to_string(),
                timeout: self.timeout,
            })?
    }
}
