use hubbub_core::HubOptions;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Hub engine settings
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Hub validations
        if self.hub.notification_threshold == 0 {
            return Err("hub.notification_threshold must be > 0".into());
        }
        if self.hub.idle_delay_ms == 0 {
            return Err("hub.idle_delay_ms must be > 0".into());
        }
        if self.hub.request_timeout_ms == 0 || self.hub.connect_timeout_ms == 0 {
            return Err("hub timeouts must be > 0".into());
        }
        if self.hub.failure_buffer == 0 {
            return Err("hub.failure_buffer must be > 0".into());
        }
        self.hub.location_url()?;
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Settings handed to the hub engine.
    pub fn hub_options(&self) -> Result<HubOptions, String> {
        let hub = &self.hub;
        Ok(HubOptions {
            location: hub.location_url()?,
            notification_threshold: hub.notification_threshold,
            idle_delay: Duration::from_millis(hub.idle_delay_ms),
            request_timeout: Duration::from_millis(hub.request_timeout_ms),
            connect_timeout: Duration::from_millis(hub.connect_timeout_ms),
            failure_buffer: hub.failure_buffer,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit_bytes() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Public URL of this hub. Publishers must name it in `Link: rel="hub"`.
    #[serde(default)]
    pub location: Option<String>,
    /// Publications fanned out at the same time
    #[serde(default = "default_notification_threshold")]
    pub notification_threshold: usize,
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_failure_buffer")]
    pub failure_buffer: usize,
}

impl HubSettings {
    fn location_url(&self) -> Result<Option<Url>, String> {
        match self.location.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => Url::parse(raw)
                .map(Some)
                .map_err(|e| format!("hub.location is not an absolute URL: {e}")),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            location: None,
            notification_threshold: default_notification_threshold(),
            idle_delay_ms: default_idle_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            failure_buffer: default_failure_buffer(),
        }
    }
}

fn default_notification_threshold() -> usize {
    10
}

fn default_idle_delay_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_failure_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "hubbub.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        // A missing file is fine; defaults and environment still apply
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., HUBBUB__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("HUBBUB")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.addr().port(), 8080);

        let options = cfg.hub_options().unwrap();
        assert_eq!(options.notification_threshold, 10);
        assert_eq!(options.idle_delay, Duration::from_millis(3000));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
        assert!(options.location.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.hub.notification_threshold = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.hub.location = Some("not a url".into());
        assert!(cfg.validate().unwrap_err().contains("hub.location"));

        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9191

[hub]
location = "https://hub.example/"
notification_threshold = 3
"#
        )
        .unwrap();

        let cfg = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.server.port, 9191);
        assert_eq!(cfg.hub.notification_threshold, 3);
        assert_eq!(cfg.hub.idle_delay_ms, 3000);
        assert_eq!(
            cfg.hub_options().unwrap().location.unwrap().as_str(),
            "https://hub.example/"
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let cfg = loader::load_config(Some("/nonexistent/hubbub.toml")).unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.logging.level, "info");
    }
}
