use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// argus relay command line arguments
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct RelayArgs {
    /// The MQTT broker host
    #[arg(long, default_value = "localhost", env = "ARGUS_MQTT_HOST")]
    pub mqtt_host: String,

    /// The MQTT broker port
    #[arg(long, default_value_t = 1883, env = "ARGUS_MQTT_PORT")]
    pub mqtt_port: u16,

    /// Broker protocol
    #[arg(long, value_enum, default_value = "mqtt", env = "ARGUS_MQTT_PROTOCOL")]
    pub mqtt_protocol: BrokerProtocol,

    /// Topic namespace the vehicle publishes under
    #[arg(long, default_value = "teslamate", env = "ARGUS_TOPIC_PREFIX")]
    pub topic_prefix: String,

    /// Vehicle identifier within the namespace
    #[arg(long, default_value_t = 1, env = "ARGUS_CAR_ID")]
    pub car_id: u32,

    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0", env = "ARGUS_HTTP_BIND")]
    pub http_bind: String,

    /// HTTP port
    #[arg(long, default_value_t = 8090, env = "ARGUS_HTTP_PORT")]
    pub http_port: u16,

    /// Externally advertised relay URL, handed to clients verbatim
    #[arg(long, env = "ARGUS_PROXY_URL")]
    pub proxy_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BrokerProtocol {
    Mqtt,
    Mqtts,
}

impl RelayArgs {
    pub fn public_config(&self) -> PublicConfig {
        PublicConfig {
            topic_prefix: self.topic_prefix.clone(),
            car_id: self.car_id,
            proxy_url: self.proxy_url.clone(),
        }
    }
}

/// Shape served by the read-back endpoint for client bootstrap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub topic_prefix: String,
    pub car_id: u32,
    pub proxy_url: Option<String>,
}

/// Locally persisted client override record.  Any field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientOverrides {
    pub proxy_url: Option<String>,
    pub topic_prefix: Option<String>,
    pub car_id: Option<u32>,
}

#[derive(Debug, Error)]
pub enum OverridesError {
    #[error("could not read override file: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed override file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ClientOverrides {
    /// Loads the override record, tolerating a missing file.
    pub fn load(path: &Path) -> Result<Self, OverridesError> {
        if !path.is_file() {
            return Ok(ClientOverrides::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Client connection parameters after merging the relay's read-back config
/// over the local override record.  Read-back values win when present.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub proxy_url: Option<String>,
    pub topic_prefix: String,
    pub car_id: u32,
}

pub fn merge_client_config(
    read_back: Option<PublicConfig>,
    overrides: &ClientOverrides,
) -> ClientConfig {
    let read_back = read_back.as_ref();
    ClientConfig {
        proxy_url: read_back
            .and_then(|config| config.proxy_url.clone())
            .or_else(|| overrides.proxy_url.clone()),
        topic_prefix: read_back
            .map(|config| config.topic_prefix.clone())
            .or_else(|| overrides.topic_prefix.clone())
            .unwrap_or_else(|| "teslamate".to_string()),
        car_id: read_back.map(|config| config.car_id).or(overrides.car_id).unwrap_or(1),
    }
}

/// Fetches the read-back endpoint.  A failure just means the local override
/// record stands on its own, the display must come up regardless.
pub async fn fetch_public_config(base_url: &str) -> Option<PublicConfig> {
    let url = format!("{}/config", base_url.trim_end_matches('/'));
    match reqwest::get(&url).await {
        Ok(response) => match response.json::<PublicConfig>().await {
            Ok(config) => Some(config),
            Err(err) => {
                warn!("malformed config read-back: {err}");
                None
            }
        },
        Err(err) => {
            warn!("could not fetch relay config: {err}");
            None
        }
    }
}
