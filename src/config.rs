//! # Configuration Management
//!
//! This module loads the bridge configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between section and key)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, BRIDGE_STORE_DIR, WEBHOOK_URL)
//! 2. Environment variables (APP_SERVER__PORT, APP_WEBHOOK__URL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP API listens
/// - `store`: where per-session directories live
/// - `pairing`: how long the QR endpoint waits for a code
/// - `webhook`: where incoming messages are forwarded
/// - `client`: which messaging backend drives the sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub pairing: PairingConfig,
    pub webhook: WebhookConfig,
    pub client: ClientConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Root of the on-disk session layout.
///
/// Each session gets `{dir}/{session_id}/` holding `device.json` (credentials),
/// `messages.db` (chat history) and `media/` (downloaded attachments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub dir: String,
}

/// Pairing flow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Upper bound for `GET /api/qr` to wait for the first pairing code
    pub qr_wait_ms: u64,
}

/// Outbound webhook for incoming messages. An empty `url` disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_secs: u64,
}

/// Messaging backend selection.
///
/// ## Fields:
/// - `backend`: only `"simulated"` ships with the bridge; other backends plug in
///   through `client::ClientFactory`
/// - `code_interval_secs`: how often a fresh pairing code is issued
/// - `max_codes`: codes issued before the pairing stream closes
/// - `connect_delay_ms`: artificial transport latency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub backend: String,
    pub code_interval_secs: u64,
    pub max_codes: u32,
    pub connect_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            store: StoreConfig {
                dir: "store".to_string(),
            },
            pairing: PairingConfig { qr_wait_ms: 2000 },
            webhook: WebhookConfig {
                url: String::new(),
                timeout_secs: 10,
            },
            client: ClientConfig {
                backend: "simulated".to_string(),
                code_interval_secs: 20,
                max_codes: 6,
                connect_delay_ms: 0,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PAIRING__QR_WAIT_MS=5000`: Wait longer for pairing codes
    /// - `BRIDGE_STORE_DIR=/var/lib/bridge`: Move the session store
    /// - `WEBHOOK_URL=https://hooks.example.com/incoming`: Forward incoming messages
    pub fn load() -> Result<Self> {
        let mut settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&AppConfig::default())?)
            .add_source(::config::File::with_name("config").required(false))
            .add_source(::config::Environment::with_prefix("APP").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(dir) = env::var("BRIDGE_STORE_DIR") {
            settings = settings.set_override("store.dir", dir)?;
        }

        if let Ok(url) = env::var("WEBHOOK_URL") {
            settings = settings.set_override("webhook.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.store.dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Store directory cannot be empty"));
        }

        if self.pairing.qr_wait_ms == 0 {
            return Err(anyhow::anyhow!("QR wait must be greater than 0"));
        }

        if self.webhook.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Webhook timeout must be greater than 0"));
        }

        if !self.webhook.url.is_empty()
            && !(self.webhook.url.starts_with("http://") || self.webhook.url.starts_with("https://"))
        {
            return Err(anyhow::anyhow!(
                "Webhook URL must be http(s), got {}",
                self.webhook.url
            ));
        }

        if self.client.backend != "simulated" {
            return Err(anyhow::anyhow!(
                "Unsupported client backend: {}",
                self.client.backend
            ));
        }

        if self.client.max_codes == 0 {
            return Err(anyhow::anyhow!("Pairing code count must be greater than 0"));
        }

        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        PathBuf::from(&self.store.dir)
    }

    pub fn qr_wait(&self) -> Duration {
        Duration::from_millis(self.pairing.qr_wait_ms)
    }

    /// `None` when forwarding is switched off.
    pub fn webhook_url(&self) -> Option<&str> {
        let url = self.webhook.url.trim();
        (!url.is_empty()).then_some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store_dir(), PathBuf::from("store"));
        assert_eq!(config.qr_wait(), Duration::from_secs(2));
        assert!(config.webhook_url().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.webhook.url = "ftp://example.com/hook".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.client.backend = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_url_enabled() {
        let mut config = AppConfig::default();
        config.webhook.url = " https://hooks.example.com/incoming ".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.webhook_url(), Some("https://hooks.example.com/incoming"));
    }
}
