use config::{ConfigError, Environment};
use serde::Deserialize;

/// Deployment environment. Dev turns on verbose logging by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Dev,
    Prod,
}

/// Runtime configuration for the market data client, read from
/// `REMX_*` environment variables (a `.env` file is honoured by the CLI).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the backend REST API, e.g. `https://api.example.com`.
    pub api_url: String,
    /// Base URL of the realtime endpoint, e.g. `wss://api.example.com`.
    pub ws_url: String,
    pub environment: Env,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080".to_string(),
            environment: Env::Dev,
        }
    }
}

impl Config {
    /// Layer `REMX_API_URL`, `REMX_WS_URL` and `REMX_ENVIRONMENT` over the
    /// local-dev defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        config::Config::builder()
            .set_default("api_url", defaults.api_url)?
            .set_default("ws_url", defaults.ws_url)?
            .set_default("environment", "dev")?
            .add_source(Environment::with_prefix("REMX"))
            .build()?
            .try_deserialize()
    }

    /// Full websocket endpoint for the market stream.
    pub fn ws_endpoint(&self) -> String {
        format!("{}/ws/market", self.ws_url.trim_end_matches('/'))
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.environment {
            Env::Dev => "remx_rs=debug,info",
            Env::Prod => "info",
        }
    }
}
