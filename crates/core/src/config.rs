//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9192").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Include timestamps in log lines. Disable when the process supervisor
    /// already stamps output (default: true).
    #[serde(default = "default_log_timestamps")]
    pub log_timestamps: bool,
}

fn default_bind() -> String {
    "0.0.0.0:9192".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            log_timestamps: default_log_timestamps(),
        }
    }
}

/// Origin content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Base URL requests are forwarded to (e.g., "https://storage.googleapis.com").
    #[serde(default = "default_origin_base_url")]
    pub base_url: String,
    /// Whole-request timeout in seconds. Large objects on slow origins hold
    /// the writer claim for the entire transfer, so this is generous.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_origin_base_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    4 * 60 * 60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: default_origin_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl OriginConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate origin configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid origin base_url '{}': {e}", self.base_url))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "origin base_url must be an http(s) URL: {}",
                self.base_url
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err("origin request_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Cache storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one file per cached path.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("cache")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Admin surface configuration.
///
/// Admin endpoints and purge requests are authorized purely by the
/// connecting address. Entries may be single addresses or CIDR ranges.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_allowed_addresses")]
    pub allowed_addresses: Vec<String>,
}

fn default_allowed_addresses() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            allowed_addresses: default_allowed_addresses(),
        }
    }
}

impl AdminConfig {
    /// Validate that every entry parses as an address or a network.
    pub fn validate(&self) -> Result<(), String> {
        for entry in &self.allowed_addresses {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err("admin allowed_addresses contains an empty entry".to_string());
            }
            let bare = entry.trim_start_matches('[').trim_end_matches(']');
            if bare.parse::<IpAddr>().is_err() && bare.parse::<ipnet::IpNet>().is_err() {
                return Err(format!("invalid admin allowed address: {entry}"));
            }
        }
        Ok(())
    }
}

/// Signed-URL configuration.
///
/// When present, requests to the origin are signed with the service
/// account key, and requests served from the cache must carry an
/// unexpired `Expires` parameter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Signing identity placed in the `GoogleAccessId` parameter.
    pub access_id: String,
    /// PEM encoded RSA private key (PKCS#8 or PKCS#1).
    pub private_key_path: PathBuf,
    /// How long generated URLs stay valid, in seconds.
    #[serde(default = "default_validity_window_secs")]
    pub validity_window_secs: u64,
}

fn default_validity_window_secs() -> u64 {
    300
}

impl SigningConfig {
    pub fn validity_window(&self) -> Duration {
        Duration::from_secs(self.validity_window_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.access_id.trim().is_empty() {
            return Err("signing access_id must not be empty".to_string());
        }
        if self.validity_window_secs == 0 {
            return Err("signing validity_window_secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    /// Signed-URL mode (optional).
    pub signing: Option<SigningConfig>,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Callers are expected to point `storage.path`
    /// and `origin.base_url` at test fixtures.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
                metrics_enabled: false,
                log_timestamps: true,
            },
            ..Self::default()
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> crate::Result<()> {
        self.origin.validate().map_err(crate::Error::Config)?;
        self.admin.validate().map_err(crate::Error::Config)?;
        if let Some(signing) = &self.signing {
            signing.validate().map_err(crate::Error::Config)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::{Format, Toml};

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:9192");
        assert_eq!(config.storage.path, PathBuf::from("cache"));
        assert_eq!(config.admin.allowed_addresses, vec!["127.0.0.1", "::1"]);
        assert_eq!(config.origin.request_timeout(), Duration::from_secs(14400));
        assert!(config.signing.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn empty_document_deserializes() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.server.metrics_enabled);
    }

    #[test]
    fn toml_sections_are_layered_over_defaults() {
        let config: AppConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [origin]
                base_url = "https://storage.example.com"

                [admin]
                allowed_addresses = ["10.0.0.0/8", "[::1]"]

                [signing]
                access_id = "svc@example.iam"
                private_key_path = "/etc/larder/key.pem"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.origin.base_url, "https://storage.example.com");
        assert_eq!(config.origin.connect_timeout_secs, 30);
        let signing = config.signing.as_ref().unwrap();
        assert_eq!(signing.validity_window(), Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_origin_url() {
        let mut config = AppConfig::for_testing();
        config.origin.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.origin.base_url = "mailto:ops@example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_allow_list_entries() {
        let mut config = AppConfig::for_testing();
        config.admin.allowed_addresses = vec!["".to_string()];
        assert!(config.validate().is_err());

        config.admin.allowed_addresses = vec!["localhost".to_string()];
        assert!(config.validate().is_err());

        config.admin.allowed_addresses = vec!["192.168.1.0/24".to_string()];
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_validity_window() {
        let mut config = AppConfig::for_testing();
        config.signing = Some(SigningConfig {
            access_id: "svc".to_string(),
            private_key_path: PathBuf::from("key.pem"),
            validity_window_secs: 0,
        });
        assert!(config.validate().is_err());
    }
}
