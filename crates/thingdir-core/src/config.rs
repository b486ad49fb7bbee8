//! Service configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/thingdir/config.toml)
//! 3. Environment variables (THINGDIR_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::protocol::{PageLimits, DEFAULT_PORT, DEFAULT_SERVICE_TYPE};

/// Environment variable prefix
const ENV_PREFIX: &str = "THINGDIR";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name this instance advertises itself under
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Backing file of the directory store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Listen address
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Server URL used by client commands (derived from address/port if unset)
    #[serde(default)]
    pub server_url: Option<String>,

    /// Write the store to disk every N seconds while serving
    #[serde(default)]
    pub flush_interval_secs: Option<u64>,

    /// Accept requests without credentials (read-only)
    #[serde(default)]
    pub allow_anonymous: bool,

    /// Role granted to callers with a verified client certificate
    #[serde(default)]
    pub certificate_role: Option<Role>,

    /// Accept the X-Client-Identity header as a verified certificate subject.
    /// Only enable behind a TLS terminator that sets and strips it.
    #[serde(default)]
    pub trust_client_identity_header: bool,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub paging: PageLimits,

    /// Password users
    #[serde(default)]
    pub users: BTreeMap<String, UserConfig>,
}

/// Service discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_service_type")]
    pub service_type: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_type: default_service_type(),
        }
    }
}

/// A password user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            store_path: default_store_path(),
            address: default_address(),
            port: default_port(),
            server_url: None,
            discovery: DiscoveryConfig::default(),
            paging: PageLimits::default(),
            flush_interval_secs: None,
            allow_anonymous: false,
            users: BTreeMap::new(),
            certificate_role: None,
            trust_client_identity_header: false,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (THINGDIR_STORE_PATH, THINGDIR_ADDRESS, ...)
    /// 2. Config file (~/.config/thingdir/config.toml or THINGDIR_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `--config` if given, otherwise from the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.paging.max_limit == 0 {
            bail!("paging.max_limit must be at least 1");
        }
        if self.paging.default_limit == 0 {
            bail!("paging.default_limit must be at least 1");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // THINGDIR_STORE_PATH
        if let Ok(val) = std::env::var(format!("{}_STORE_PATH", ENV_PREFIX)) {
            self.store_path = PathBuf::from(val);
        }

        // THINGDIR_ADDRESS
        if let Ok(val) = std::env::var(format!("{}_ADDRESS", ENV_PREFIX)) {
            self.address = val;
        }

        // THINGDIR_PORT
        if let Ok(val) = std::env::var(format!("{}_PORT", ENV_PREFIX)) {
            self.port = val
                .parse()
                .with_context(|| format!("Invalid {}_PORT: {:?}", ENV_PREFIX, val))?;
        }

        // THINGDIR_DISCOVERY
        if let Ok(val) = std::env::var(format!("{}_DISCOVERY", ENV_PREFIX)) {
            self.discovery.enabled = val.eq_ignore_ascii_case("true") || val == "1";
        }

        // THINGDIR_URL
        if let Ok(val) = std::env::var(format!("{}_URL", ENV_PREFIX)) {
            self.server_url = if val.is_empty() { None } else { Some(val) };
        }

        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    ///
    /// The file holds user passwords, so only the owner may read it.
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            options.mode(0o600);
            // An existing file keeps its mode on open
            if config_path.exists() {
                std::fs::set_permissions(config_path, std::fs::Permissions::from_mode(0o600))
                    .with_context(|| {
                        format!("Failed to restrict config file: {:?}", config_path)
                    })?;
            }
        }
        let mut file = options
            .open(config_path)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with THINGDIR_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thingdir")
            .join("config.toml")
    }

    /// Socket address the server binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// URL client commands connect to
    ///
    /// A wildcard listen address is reached through the loopback interface.
    pub fn server_url(&self) -> String {
        if let Some(url) = &self.server_url {
            return url.clone();
        }
        let host = match self.address.as_str() {
            "0.0.0.0" | "" => "127.0.0.1",
            "::" => "[::1]",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

fn default_instance_id() -> String {
    "thingdir".to_string()
}

/// Get the default store file
fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thingdir")
        .join("directory.json")
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_role() -> Role {
    Role::Viewer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "THINGDIR_STORE_PATH",
        "THINGDIR_ADDRESS",
        "THINGDIR_PORT",
        "THINGDIR_DISCOVERY",
        "THINGDIR_URL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.service_type, "_thingdir._tcp");
        assert!(config.store_path.ends_with("thingdir/directory.json"));
        assert_eq!(config.paging, PageLimits::default());
        assert!(config.users.is_empty());
        assert!(!config.allow_anonymous);
    }

    #[test]
    fn test_server_url() {
        let mut config = Config::default();
        assert_eq!(config.server_url(), "http://127.0.0.1:8886");
        assert_eq!(config.listen_address(), "0.0.0.0:8886");

        config.address = "10.0.0.5".into();
        config.port = 9000;
        assert_eq!(config.server_url(), "http://10.0.0.5:9000");

        config.server_url = Some("https://dir.example.com".into());
        assert_eq!(config.server_url(), "https://dir.example.com");
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("THINGDIR_STORE_PATH", "/tmp/thingdir-test/dir.json");
        env::set_var("THINGDIR_ADDRESS", "127.0.0.1");
        env::set_var("THINGDIR_PORT", "9443");
        env::set_var("THINGDIR_DISCOVERY", "1");
        config.apply_env_overrides().unwrap();

        assert_eq!(
            config.store_path,
            PathBuf::from("/tmp/thingdir-test/dir.json")
        );
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 9443);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn test_env_override_invalid_port() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("THINGDIR_PORT", "http");
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_env_override_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("THINGDIR_URL", "http://dir.local:8886");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.server_url.as_deref(), Some("http://dir.local:8886"));

        // Empty string clears it
        env::set_var("THINGDIR_URL", "");
        config.apply_env_overrides().unwrap();
        assert!(config.server_url.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            instance_id = "lab-directory"
            store_path = "/custom/directory.json"
            port = 9000
            flush_interval_secs = 30
            allow_anonymous = true
            certificate_role = "editor"

            [discovery]
            enabled = true

            [paging]
            max_limit = 50

            [users.alice]
            password = "secret"
            role = "editor"

            [users.bob]
            password = "hunter2"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.instance_id, "lab-directory");
        assert_eq!(config.store_path, PathBuf::from("/custom/directory.json"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.flush_interval_secs, Some(30));
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.service_type, "_thingdir._tcp");
        assert_eq!(config.paging.max_limit, 50);
        assert_eq!(config.paging.default_limit, 100);
        assert_eq!(config.users["alice"].role, Role::Editor);
        assert_eq!(config.users["bob"].role, Role::Viewer);
        assert_eq!(config.certificate_role, Some(Role::Editor));
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.port = 9100;
        config.users.insert(
            "alice".into(),
            UserConfig {
                password: "secret".into(),
                role: Role::Editor,
            },
        );
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.port, 9100);
        assert_eq!(loaded.users["alice"].password, "secret");
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        // A pre-existing world-readable file is tightened as well
        std::fs::write(&path, "port = 1\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut config = Config::default();
        config.users.insert(
            "alice".into(),
            UserConfig {
                password: "secret".into(),
                role: Role::Viewer,
            },
        );
        config.save_to_path(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let fresh = temp_dir.path().join("fresh.toml");
        config.save_to_path(&fresh).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_rejects_zero_page_limits() {
        let _guard = EnvGuard::new(ENV_VARS);

        let err = Config::load_from_str("[paging]\nmax_limit = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_limit"));
        assert!(Config::load_from_str("[paging]\ndefault_limit = 0\n").is_err());

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[paging]\nmax_limit = 0\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn test_identity_header_untrusted_by_default() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(!Config::default().trust_client_identity_header);
        let config = Config::load_from_str("trust_client_identity_header = true").unwrap();
        assert!(config.trust_client_identity_header);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        // Should return defaults when file doesn't exist
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.server_url.is_none());
    }
}
