//! Configuration for stream sessions, simulations, and the server process.
//!
//! Uses `figment` for layered server configuration: defaults -> TOML file ->
//! environment. Library callers can construct the structs directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default delay between two polls of a stream session.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Default cap on searcher events processed by one simulation.
pub const DEFAULT_MAX_SIMULATION_EVENTS: usize = 1_000_000;

/// Default gRPC listen port.
pub const DEFAULT_PORT: u16 = 50061;

/// Stream session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay between polls, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl StreamConfig {
    /// Config with the given poll interval.
    #[must_use]
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self {
            poll_interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Rejects settings a session cannot run with.
    ///
    /// # Errors
    /// - `InvalidConfig` if the poll interval is zero
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "stream.poll_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Search simulation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Maximum searcher events processed before a simulation is aborted.
    pub max_events: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_SIMULATION_EVENTS,
        }
    }
}

impl SimulationConfig {
    /// Rejects settings a simulation cannot run with.
    ///
    /// # Errors
    /// - `InvalidConfig` if the event limit is zero
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_events == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "simulation.max_events".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Server process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gRPC server binds to.
    pub listen_addr: SocketAddr,
    /// Stream session settings.
    pub stream: StreamConfig,
    /// Simulation settings.
    pub simulation: SimulationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            stream: StreamConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validates every section.
    ///
    /// # Errors
    /// The first section error found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.stream.validate()?;
        self.simulation.validate()
    }
}

/// Load server configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables prefixed with `TRIALSCOPE_`
///    (`TRIALSCOPE_STREAM__POLL_INTERVAL_MS=500`)
/// 2. The TOML file at `path`, when given and present
/// 3. Built-in defaults
///
/// # Errors
/// Returns the figment error if a source cannot be read or a value has the
/// wrong type.
#[cfg(feature = "server")]
pub fn load_server_config(
    path: Option<&std::path::Path>,
) -> Result<ServerConfig, Box<figment::Error>> {
    use figment::providers::{Env, Format, Serialized, Toml};
    use figment::Figment;

    let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }
    figment = figment.merge(Env::prefixed("TRIALSCOPE_").split("__"));
    figment.extract().map_err(Box::new)
}
