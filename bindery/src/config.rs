use bindery_rpc::ChannelPolicy;
use config::{ConfigBuilder, ConfigError, builder::DefaultState};
use serde::Deserialize;
use std::{io, time::Duration};
use tracing::warn;

const CONFIG_FILE: &str = "bindery";

const ENV_PREFIX: &str = "BINDERY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub channels: ChannelConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Unbounded when unset.
    pub inbound_capacity: Option<usize>,
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let policy = ChannelPolicy::default();
        Self {
            inbound_capacity: policy.inbound,
            outbound_capacity: policy.outbound,
        }
    }
}

impl ChannelConfig {
    pub fn policy(&self) -> ChannelPolicy {
        ChannelPolicy {
            inbound: self.inbound_capacity,
            outbound: self.outbound_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Responses sent per request by the streaming demo methods.
    pub repeat: usize,
    pub pause_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            repeat: 4,
            pause_ms: 250,
        }
    }
}

impl DemoConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Reads `bindery.{toml,yaml,json,..}` from the working directory, then
/// `BINDERY_*` environment overrides (`BINDERY_CHANNELS__OUTBOUND_CAPACITY`).
pub fn init_config() -> anyhow::Result<Config> {
    let config = builder()
        .add_source(config::File::with_name(CONFIG_FILE))
        .build();

    let config = match config {
        Ok(config) => config,
        Err(e) if is_missing(&e) => {
            warn!("config not found: {}", e);
            builder().build()?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(config.try_deserialize()?)
}

fn builder() -> ConfigBuilder<DefaultState> {
    config::Config::builder().add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}

fn is_missing(e: &ConfigError) -> bool {
    match e {
        ConfigError::NotFound(_) => true,
        ConfigError::Foreign(e) => e
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound),
        _ => false,
    }
}
