use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::notification::MessageType;

/// Top-level configuration settings for the application.
///
/// Built from [`PartialSettings`] merged over [`Settings::default`] and then
/// checked by [`Settings::validated`]; nothing downstream re-checks it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub broker: BrokerSettings,
    pub orchestration: OrchestrationSettings,
    pub dispatch: DispatchSettings,
    pub reporting: ReportingSettings,
    pub routing: Vec<RouteSettings>,
}

/// Address the control/broker WebSocket server binds to.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Embedded broker storage and admin call bounds.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub path: String,
    pub admin_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub replication_factor: u16,
}

/// Desired topic layout and consumer weights.
#[derive(Debug, Clone)]
pub struct OrchestrationSettings {
    pub reporting_queue: String,
    pub reporting_partitions: u32,
    pub queues: Vec<QueueSpec>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub tier_capacity: usize,
    pub group: String,
    pub local_consumers: usize,
}

#[derive(Debug, Clone)]
pub struct ReportingSettings {
    pub window_secs: usize,
    pub group: String,
}

/// Producer-side route: every message of `context` goes to each of `targets`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteSettings {
    pub context: MessageType,
    pub targets: Vec<String>,
}

/// A queue as written in configuration or a reconfigure request.
///
/// `priority` is an integer percentage, 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    pub partitions: u32,
    pub priority: u32,
}

/// Validated desired state of one queue. `weight` is `priority / 100`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    pub partitions: u32,
    pub weight: f64,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, partitions: u32, weight: f64) -> Self {
        Self {
            name: name.into(),
            partitions,
            weight,
        }
    }
}

impl TryFrom<QueueDefinition> for QueueSpec {
    type Error = ConfigError;

    fn try_from(def: QueueDefinition) -> Result<Self, Self::Error> {
        check_topic_name(&def.name)?;
        if def.partitions == 0 {
            return Err(ConfigError::Invalid(format!(
                "queue `{}` must have at least one partition",
                def.name
            )));
        }
        if def.priority > 100 {
            return Err(ConfigError::Invalid(format!(
                "queue `{}` has priority {}, expected 0-100",
                def.name, def.priority
            )));
        }
        Ok(QueueSpec {
            name: def.name,
            partitions: def.partitions,
            weight: f64::from(def.priority) / 100.0,
        })
    }
}

/// Validates a full queue list against the reporting queue name.
pub fn validate_queues(
    definitions: Vec<QueueDefinition>,
    reporting_queue: &str,
) -> Result<Vec<QueueSpec>, ConfigError> {
    if definitions.is_empty() {
        return Err(ConfigError::Invalid("at least one queue is required".into()));
    }

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(definitions.len());
    for def in definitions {
        if !seen.insert(def.name.clone()) {
            return Err(ConfigError::Invalid(format!("queue `{}` is defined twice", def.name)));
        }
        if def.name == reporting_queue {
            return Err(ConfigError::Invalid(format!(
                "queue `{}` collides with the reporting queue",
                def.name
            )));
        }
        specs.push(QueueSpec::try_from(def)?);
    }
    Ok(specs)
}

/// Topic names are restricted to `[A-Za-z0-9._-]`.
pub fn check_topic_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("`{name}` is not a valid topic name")))
    }
}

impl Settings {
    /// Checks cross-field constraints once, at load.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let reporting_queue = &self.orchestration.reporting_queue;
        check_topic_name(reporting_queue)?;
        if self.orchestration.queues.is_empty() {
            return Err(ConfigError::Invalid("at least one queue is required".into()));
        }
        if let Some(clash) = self
            .orchestration
            .queues
            .iter()
            .find(|q| &q.name == reporting_queue)
        {
            return Err(ConfigError::Invalid(format!(
                "queue `{}` collides with the reporting queue",
                clash.name
            )));
        }
        if self.orchestration.reporting_partitions == 0 {
            return Err(ConfigError::Invalid(
                "orchestration.reporting_partitions must be at least 1".into(),
            ));
        }
        if self.broker.admin_timeout_secs == 0 || self.broker.metadata_timeout_secs == 0 {
            return Err(ConfigError::Invalid("broker timeouts must be positive".into()));
        }
        if self.broker.replication_factor == 0 {
            return Err(ConfigError::Invalid(
                "broker.replication_factor must be at least 1".into(),
            ));
        }
        if self.dispatch.tier_capacity == 0 {
            return Err(ConfigError::Invalid("dispatch.tier_capacity must be positive".into()));
        }
        if self.reporting.window_secs == 0 {
            return Err(ConfigError::Invalid("reporting.window_secs must be positive".into()));
        }
        for route in &self.routing {
            if route.targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "route for `{}` has no targets",
                    route.context.code()
                )));
            }
            for target in &route.targets {
                check_topic_name(target)?;
            }
        }
        Ok(self)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// [`Settings::default`] by [`PartialSettings::merge`].
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub orchestration: Option<PartialOrchestrationSettings>,
    pub dispatch: Option<PartialDispatchSettings>,
    pub reporting: Option<PartialReportingSettings>,
    pub routing: Option<Vec<RouteSettings>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub path: Option<String>,
    pub admin_timeout_secs: Option<u64>,
    pub metadata_timeout_secs: Option<u64>,
    pub replication_factor: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialOrchestrationSettings {
    pub reporting_queue: Option<String>,
    pub reporting_partitions: Option<u32>,
    pub queues: Option<Vec<QueueDefinition>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialDispatchSettings {
    pub tier_capacity: Option<usize>,
    pub group: Option<String>,
    pub local_consumers: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialReportingSettings {
    pub window_secs: Option<usize>,
    pub group: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `default` and validates queue entries.
    pub fn merge(self, default: Settings) -> Result<Settings, ConfigError> {
        let server = self.server;
        let logging = self.logging;
        let broker = self.broker;
        let orchestration = self.orchestration;
        let dispatch = self.dispatch;
        let reporting = self.reporting;

        let reporting_queue = orchestration
            .as_ref()
            .and_then(|o| o.reporting_queue.clone())
            .unwrap_or(default.orchestration.reporting_queue);

        let queues = match orchestration.as_ref().and_then(|o| o.queues.clone()) {
            Some(definitions) => validate_queues(definitions, &reporting_queue)?,
            None => default.orchestration.queues,
        };

        Ok(Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
            broker: BrokerSettings {
                path: broker
                    .as_ref()
                    .and_then(|b| b.path.clone())
                    .unwrap_or(default.broker.path),
                admin_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.admin_timeout_secs)
                    .unwrap_or(default.broker.admin_timeout_secs),
                metadata_timeout_secs: broker
                    .as_ref()
                    .and_then(|b| b.metadata_timeout_secs)
                    .unwrap_or(default.broker.metadata_timeout_secs),
                replication_factor: broker
                    .as_ref()
                    .and_then(|b| b.replication_factor)
                    .unwrap_or(default.broker.replication_factor),
            },
            orchestration: OrchestrationSettings {
                reporting_partitions: orchestration
                    .as_ref()
                    .and_then(|o| o.reporting_partitions)
                    .unwrap_or(default.orchestration.reporting_partitions),
                reporting_queue,
                queues,
            },
            dispatch: DispatchSettings {
                tier_capacity: dispatch
                    .as_ref()
                    .and_then(|d| d.tier_capacity)
                    .unwrap_or(default.dispatch.tier_capacity),
                group: dispatch
                    .as_ref()
                    .and_then(|d| d.group.clone())
                    .unwrap_or(default.dispatch.group),
                local_consumers: dispatch
                    .as_ref()
                    .and_then(|d| d.local_consumers)
                    .unwrap_or(default.dispatch.local_consumers),
            },
            reporting: ReportingSettings {
                window_secs: reporting
                    .as_ref()
                    .and_then(|r| r.window_secs)
                    .unwrap_or(default.reporting.window_secs),
                group: reporting
                    .as_ref()
                    .and_then(|r| r.group.clone())
                    .unwrap_or(default.reporting.group),
            },
            routing: self.routing.unwrap_or(default.routing),
        })
    }
}

/// Provides default values for `Settings`.
///
/// Three queues (OTP/TRX/CMP weighted 60/30/10) and one route per type, so a
/// bare `herald serve` is immediately usable.
impl Default for Settings {
    fn default() -> Self {
        let queue = |name: &str, weight: f64| QueueSpec::new(name, 3, weight);
        let route = |context: MessageType, target: &str| RouteSettings {
            context,
            targets: vec![target.to_string()],
        };

        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
            broker: BrokerSettings {
                path: "herald_broker".to_string(),
                admin_timeout_secs: 5,
                metadata_timeout_secs: 10,
                replication_factor: 1,
            },
            orchestration: OrchestrationSettings {
                reporting_queue: "messaging_reporting".to_string(),
                reporting_partitions: 10,
                queues: vec![
                    queue("messaging_otp", 0.6),
                    queue("messaging_trx", 0.3),
                    queue("messaging_cmp", 0.1),
                ],
            },
            dispatch: DispatchSettings {
                tier_capacity: 200,
                group: "message_dispatcher".to_string(),
                local_consumers: 0,
            },
            reporting: ReportingSettings {
                window_secs: 60,
                group: "message_stats".to_string(),
            },
            routing: vec![
                route(MessageType::OneTimePassword, "messaging_otp"),
                route(MessageType::Transactional, "messaging_trx"),
                route(MessageType::Campaign, "messaging_cmp"),
            ],
        }
    }
}
