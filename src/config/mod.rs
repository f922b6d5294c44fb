mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, ServerSettings, Settings};

/// Prefix of the environment variables read by [`load_config`],
/// e.g. `POPLOG_BROKER__WORKERS=8`.
pub const ENV_PREFIX: &str = "POPLOG";

/// Loads the configuration from the default file and environment variables,
/// merges it over the default values and validates the result.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = merge(partial, Settings::default());
    validate(&settings)?;
    Ok(settings)
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let broker = partial.broker;

    Settings {
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
        broker: BrokerSettings {
            data_path: broker
                .as_ref()
                .and_then(|b| b.data_path.clone())
                .unwrap_or(default.broker.data_path),
            workers: broker
                .as_ref()
                .and_then(|b| b.workers)
                .unwrap_or(default.broker.workers),
            poll_interval_ms: broker
                .as_ref()
                .and_then(|b| b.poll_interval_ms)
                .unwrap_or(default.broker.poll_interval_ms),
            accept_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.accept_timeout_ms)
                .unwrap_or(default.broker.accept_timeout_ms),
        },
    }
}

/// Rejects settings the engine cannot run with.
pub fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let broker = &settings.broker;
    if broker.workers == 0 {
        return Err(ConfigError::Message(
            "broker.workers must be at least 1".to_string(),
        ));
    }
    if broker.poll_interval_ms == 0 {
        return Err(ConfigError::Message(
            "broker.poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    if broker.accept_timeout_ms == 0 {
        return Err(ConfigError::Message(
            "broker.accept_timeout_ms must be greater than 0".to_string(),
        ));
    }
    if broker.data_path.is_empty() {
        return Err(ConfigError::Message(
            "broker.data_path must not be empty".to_string(),
        ));
    }
    Ok(())
}
