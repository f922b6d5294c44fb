use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for both the listener and the broker engine.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the TCP listener will bind to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Configuration settings for the broker.
///
/// Controls where topic logs and consumer offsets live, how many workers
/// drain the command queue and the two polling intervals of the engine.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub data_path: String,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub accept_timeout_ms: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled in from the defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

/// Partial server settings.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Partial broker settings.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub data_path: Option<String>,
    pub workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub accept_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9001,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            data_path: "data".to_string(),
            workers: 5,
            poll_interval_ms: 500,
            accept_timeout_ms: 200,
        }
    }
}

impl ServerSettings {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BrokerSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn accept_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.accept_timeout_ms)
    }
}
