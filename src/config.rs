use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL of the CRUD backend hosting the Message and Call Log stores.
    #[serde(default = "default_store_base_url")]
    pub store_base_url: String,
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    /// Seconds an unanswered offer may ring before it is failed. 0 disables.
    #[serde(default = "default_ring_timeout_secs")]
    pub ring_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_port() -> u16 { 5000 }
fn default_store_base_url() -> String { "http://localhost:4000".into() }
fn default_store_timeout_secs() -> u64 { 5 }
fn default_ring_timeout_secs() -> u64 { 30 }
fn default_sweep_interval_secs() -> u64 { 5 }

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("URBANMOVE_REALTIME").separator("__"))
            .build()?;
        Ok(config.try_deserialize().unwrap_or_else(|_| Self {
            port: default_port(),
            store_base_url: default_store_base_url(),
            store_timeout_secs: default_store_timeout_secs(),
            ring_timeout_secs: default_ring_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }))
    }
}
