mod settings;

use ::config::{Config, Environment, File};
use thiserror::Error;

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, DispatchSettings, LoggingSettings, OrchestrationSettings, QueueDefinition,
    QueueSpec, ReportingSettings, RouteSettings, ServerSettings, Settings, check_topic_name,
    validate_queues,
};

/// Default configuration file, relative to the working directory, without extension.
pub const DEFAULT_CONFIG_PATH: &str = "config/default";

/// Prefix for environment overrides, e.g. `HERALD__SERVER__PORT=4000`.
pub const ENV_PREFIX: &str = "HERALD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

/// Loads `path` (any format the `config` crate understands, file optional),
/// layers `HERALD__*` environment variables on top, merges the result over
/// the defaults and validates it.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    partial.merge(Settings::default())?.validated()
}
