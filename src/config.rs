//! Configuration loaded from `.ticktrek/ticktrek.toml`.
//!
//! Values are layered: built-in defaults, then the file, then `TICKTREK_*`
//! environment variables, then CLI flags (applied by the `serve` command).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! host = "127.0.0.1"
//! dev_mode = false
//!
//! [storage]
//! data_path = ".ticktrek/data.json"
//! seed_admin_password = "password123"
//!
//! [auth]
//! require_approval = false
//! session_ttl_hours = 24
//!
//! [log]
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::workspace::auth::MAX_SESSION_TTL_HOURS;
use crate::workspace::server::ServerConfig;

/// Directory holding the config and (by default) the data file.
pub const CONFIG_DIR: &str = ".ticktrek";
pub const CONFIG_FILE: &str = "ticktrek.toml";

const DEFAULT_SEED_PASSWORD: &str = "password123";

pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    /// Bind address; unset picks one from `dev_mode`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Permissive CORS and a wildcard bind for local frontend work.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 3141,
            host: None,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// JSON data file, relative to the project directory.
    pub data_path: PathBuf,
    /// Password for the admin seeded into a new data file.
    pub seed_admin_password: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(CONFIG_DIR).join("data.json"),
            seed_admin_password: DEFAULT_SEED_PASSWORD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Users joining with an invite wait for an admin to approve them.
    pub require_approval: bool,
    pub session_ttl_hours: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            require_approval: false,
            session_ttl_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

/// The complete ticktrek.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickTrekToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub log: LogSection,
}

impl TickTrekToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse ticktrek.toml")
    }

    /// Load `ticktrek.toml` from `config_dir`, or defaults if it is missing.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize ticktrek.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Override values from `TICKTREK_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = env_parse::<u16>("TICKTREK_PORT")? {
            self.server.port = port;
        }
        if let Ok(host) = std::env::var("TICKTREK_HOST") {
            self.server.host = Some(host);
        }
        if let Some(dev) = env_parse::<bool>("TICKTREK_DEV_MODE")? {
            self.server.dev_mode = dev;
        }
        if let Ok(path) = std::env::var("TICKTREK_DATA_PATH") {
            self.storage.data_path = PathBuf::from(path);
        }
        if let Some(required) = env_parse::<bool>("TICKTREK_REQUIRE_APPROVAL")? {
            self.auth.require_approval = required;
        }
        if let Some(hours) = env_parse::<u64>("TICKTREK_SESSION_TTL_HOURS")? {
            self.auth.session_ttl_hours = hours;
        }
        if let Some(json) = env_parse::<bool>("TICKTREK_LOG_JSON")? {
            self.log.json = json;
        }
        Ok(())
    }

    /// Resolve into the server's runtime configuration. A relative data path
    /// is taken relative to `project_dir`.
    pub fn server_config(&self, project_dir: &Path) -> ServerConfig {
        let data_path = if self.storage.data_path.is_absolute() {
            self.storage.data_path.clone()
        } else {
            project_dir.join(&self.storage.data_path)
        };
        ServerConfig {
            port: self.server.port,
            host: self.server.host.clone(),
            data_path,
            seed_admin_password: self.storage.seed_admin_password.clone(),
            dev_mode: self.server.dev_mode,
            require_approval: self.auth.require_approval,
            session_ttl_hours: self.auth.session_ttl_hours,
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the OS will pick a random port".to_string());
        }
        if let Some(host) = &self.server.host
            && host.trim().is_empty()
        {
            warnings.push("server.host is empty".to_string());
        }
        if self.storage.data_path.as_os_str().is_empty() {
            warnings.push("storage.data_path is empty".to_string());
        }
        if self.storage.seed_admin_password.len() < 8 {
            warnings.push("storage.seed_admin_password is shorter than 8 characters".to_string());
        }
        if self.auth.session_ttl_hours == 0 {
            warnings.push("auth.session_ttl_hours is 0: sessions expire immediately".to_string());
        } else if self.auth.session_ttl_hours > MAX_SESSION_TTL_HOURS {
            warnings.push(format!(
                "auth.session_ttl_hours is {}: capped at {}",
                self.auth.session_ttl_hours, MAX_SESSION_TTL_HOURS
            ));
        }

        warnings
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", name, value)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "TICKTREK_PORT",
        "TICKTREK_HOST",
        "TICKTREK_DEV_MODE",
        "TICKTREK_DATA_PATH",
        "TICKTREK_REQUIRE_APPROVAL",
        "TICKTREK_SESSION_TTL_HOURS",
        "TICKTREK_LOG_JSON",
    ];

    fn clear_env() -> Vec<(&'static str, String)> {
        let saved = ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (*name, v)))
            .collect();
        for name in ENV_VARS {
            unsafe { std::env::remove_var(name) };
        }
        saved
    }

    fn restore_env(saved: Vec<(&'static str, String)>) {
        for name in ENV_VARS {
            unsafe { std::env::remove_var(name) };
        }
        for (name, value) in saved {
            unsafe { std::env::set_var(name, value) };
        }
    }

    #[test]
    fn test_defaults() {
        let config = TickTrekToml::default();
        assert_eq!(config.server.port, 3141);
        assert!(config.server.host.is_none());
        assert_eq!(config.storage.data_path, PathBuf::from(".ticktrek/data.json"));
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert!(!config.auth.require_approval);
        assert!(!config.log.json);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let content = r#"
[server]
port = 8080

[auth]
require_approval = true
"#;
        let config = TickTrekToml::parse(content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(!config.server.dev_mode);
        assert!(config.auth.require_approval);
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert_eq!(config.storage.seed_admin_password, "password123");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = TickTrekToml::parse("[server\nport = ").unwrap_err();
        assert!(err.to_string().contains("ticktrek.toml"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = TickTrekToml::default();
        config.server.host = Some("0.0.0.0".into());
        config.log.json = true;
        config.save(&path).unwrap();

        let loaded = TickTrekToml::load(&path).unwrap();
        assert_eq!(loaded.server.host.as_deref(), Some("0.0.0.0"));
        assert!(loaded.log.json);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = TickTrekToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[server]\nport = 9000\n").unwrap();
        let config = TickTrekToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        unsafe {
            std::env::set_var("TICKTREK_PORT", "4000");
            std::env::set_var("TICKTREK_DEV_MODE", "true");
            std::env::set_var("TICKTREK_SESSION_TTL_HOURS", "2");
            std::env::set_var("TICKTREK_DATA_PATH", "/var/lib/ticktrek/db.json");
        }

        let mut config = TickTrekToml::parse("[server]\nport = 8080\n").unwrap();
        config.apply_env().unwrap();
        assert_eq!(config.server.port, 4000);
        assert!(config.server.dev_mode);
        assert_eq!(config.auth.session_ttl_hours, 2);
        assert_eq!(
            config.storage.data_path,
            PathBuf::from("/var/lib/ticktrek/db.json")
        );

        restore_env(saved);
    }

    #[test]
    fn test_env_invalid_value_is_an_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = clear_env();

        unsafe { std::env::set_var("TICKTREK_PORT", "eighty") };
        let mut config = TickTrekToml::default();
        let err = config.apply_env().unwrap_err();
        assert!(err.to_string().contains("TICKTREK_PORT"));

        restore_env(saved);
    }

    #[test]
    fn test_server_config_resolves_relative_data_path() {
        let config = TickTrekToml::default();
        let server = config.server_config(Path::new("/srv/app"));
        assert_eq!(server.data_path, PathBuf::from("/srv/app/.ticktrek/data.json"));
        assert_eq!(server.port, 3141);
        assert_eq!(server.session_ttl_hours, 24);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = TickTrekToml::default();
        config.server.port = 0;
        config.storage.seed_admin_password = "short".into();
        config.auth.session_ttl_hours = 0;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("server.port")));
        assert!(warnings.iter().any(|w| w.contains("seed_admin_password")));
        assert!(warnings.iter().any(|w| w.contains("session_ttl_hours")));
    }

    #[test]
    fn test_validate_caps_long_sessions() {
        let mut config = TickTrekToml::default();
        config.auth.session_ttl_hours = MAX_SESSION_TTL_HOURS + 1;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("capped"));
    }
}
