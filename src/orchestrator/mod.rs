//! Orchestration engine context
//!
//! One [`Orchestrator`] owns everything a single engine instance mutates:
//! the desired topic layout, the reconciler that enforces it, the consumer
//! assignment balancer and the handle to reporting statistics. Nothing is
//! process-global, so several instances can run side by side (and do, in
//! tests) without sharing state.

pub mod balancer;
pub mod reconciler;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::{BrokerAdmin, ClusterInfo};
use crate::config::{ConfigError, OrchestrationSettings, QueueDefinition, QueueSpec, Settings};
use crate::reporting::StatsHandle;
use crate::utils::error::Result;

pub use balancer::{AssignmentBalancer, QueueAssignment};
pub use reconciler::{ReconcileReport, TopicReconciler};

/// Answer to the health query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_throughput: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_info: Option<ClusterInfo>,
}

pub struct Orchestrator<A> {
    reconciler: TopicReconciler<A>,
    balancer: AssignmentBalancer,
    desired: Mutex<OrchestrationSettings>,
    stats: StatsHandle,
    metadata_timeout: Duration,
}

impl<A: BrokerAdmin> Orchestrator<A> {
    pub fn new(admin: A, settings: &Settings, stats: StatsHandle) -> Self {
        let reconciler = TopicReconciler::new(
            admin,
            Duration::from_secs(settings.broker.admin_timeout_secs),
            settings.broker.replication_factor,
        );
        Self {
            reconciler,
            balancer: AssignmentBalancer::new(&settings.orchestration.queues),
            desired: Mutex::new(settings.orchestration.clone()),
            stats,
            metadata_timeout: Duration::from_secs(settings.broker.metadata_timeout_secs),
        }
    }

    /// Initial reconciliation at startup.
    pub async fn start(&self) -> ReconcileReport {
        let desired = self.desired().clone();
        info!(
            queues = desired.queues.len(),
            reporting_queue = %desired.reporting_queue,
            "reconciling broker topics"
        );
        self.reconcile(&desired).await
    }

    /// Assigns a newly started consumer process to a queue.
    pub fn register_consumer(&self) -> Result<String> {
        self.balancer.register()
    }

    /// Validates a queue list against this instance's reporting queue.
    pub fn validate(
        &self,
        definitions: Vec<QueueDefinition>,
    ) -> std::result::Result<Vec<QueueSpec>, ConfigError> {
        crate::config::validate_queues(definitions, &self.reporting_queue())
    }

    /// Replaces the desired queue list, reconciles against it and updates
    /// the balancer's weights.
    pub async fn reconfigure(&self, queues: Vec<QueueSpec>) -> ReconcileReport {
        let desired = {
            let mut desired = self.desired();
            desired.queues = queues;
            desired.clone()
        };
        info!(queues = desired.queues.len(), "reconfiguring");

        let report = self.reconcile(&desired).await;
        self.balancer.replace(&desired.queues);
        report
    }

    pub async fn health(&self) -> HealthReport {
        let snapshot = self.stats.snapshot();
        let broker_info =
            match tokio::time::timeout(self.metadata_timeout, self.reconciler.admin().cluster_info())
                .await
            {
                Ok(Ok(info)) => Some(info),
                Ok(Err(e)) => {
                    warn!(error = %e, "couldn't retrieve broker information");
                    None
                }
                Err(_) => {
                    warn!(timeout = ?self.metadata_timeout, "broker information timed out");
                    None
                }
            };

        HealthReport {
            status: "successful".to_string(),
            average_latency_ms: snapshot.average_latency_ms,
            approx_throughput: snapshot.approx_throughput,
            broker_info,
        }
    }

    pub fn reporting_queue(&self) -> String {
        self.desired().reporting_queue.clone()
    }

    pub fn queues(&self) -> Vec<QueueSpec> {
        self.desired().queues.clone()
    }

    pub fn assignments(&self) -> Vec<QueueAssignment> {
        self.balancer.snapshot()
    }

    pub fn stats(&self) -> &StatsHandle {
        &self.stats
    }

    async fn reconcile(&self, desired: &OrchestrationSettings) -> ReconcileReport {
        self.reconciler
            .reconcile(
                &desired.queues,
                &desired.reporting_queue,
                desired.reporting_partitions,
            )
            .await
    }

    fn desired(&self) -> MutexGuard<'_, OrchestrationSettings> {
        self.desired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
