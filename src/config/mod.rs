//! Configuration management
//!
//! Handles loading and validation of the session manager configuration from
//! a TOML file, with CLI overrides applied on top.
//!
//! ```toml
//! [server]
//! pipe_dir = "/var/run/freerds"
//!
//! [modules]
//! directory = "/usr/lib/freerds/modules"
//! default_module = "X11"
//! greeter_module = "Greeter"
//!
//! [auth]
//! provider = "pam"
//!
//! [properties.session]
//! timeout = 30
//!
//! [properties.module.X11]
//! maxXRes = 3840
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod properties;
pub mod types;

pub use properties::{ConfigAccessor, PropertyStore, PropertyValue};
pub use types::{AuthConfig, ChannelsConfig, ModulesConfig, ServerConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control endpoint and daemon settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Backend module discovery
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Authentication provider
    #[serde(default)]
    pub auth: AuthConfig,
    /// Virtual channel policy
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Module and session properties (dotted key tree)
    #[serde(default)]
    pub properties: toml::Table,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, pipe_dir: Option<PathBuf>, pid_file: Option<PathBuf>) -> Self {
        if let Some(pipe_dir) = pipe_dir {
            self.server.pipe_dir = pipe_dir;
        }
        if let Some(pid_file) = pid_file {
            self.server.pid_file = pid_file;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.control_endpoint.is_empty() || self.server.control_endpoint.contains('/') {
            anyhow::bail!(
                "Invalid config: control_endpoint must be a plain socket name, got {:?}",
                self.server.control_endpoint
            );
        }

        // envelope header alone is 15 bytes
        if self.server.max_message_size < 64 {
            anyhow::bail!(
                "Invalid config: max_message_size {} is below the 64 byte minimum",
                self.server.max_message_size
            );
        }

        if self.server.call_timeout_ms == 0 {
            anyhow::bail!("Invalid config: call_timeout_ms must be positive");
        }

        if self.server.monitor_interval_ms == 0 {
            anyhow::bail!("Invalid config: monitor_interval_ms must be positive");
        }

        if self.modules.default_module.trim().is_empty() {
            anyhow::bail!("Invalid config: default_module must not be empty");
        }

        if self.modules.connect_timeout_ms == 0 {
            anyhow::bail!("Invalid config: connect_timeout_ms must be positive");
        }

        glob::Pattern::new(&self.modules.pattern)
            .with_context(|| format!("Invalid config: bad module pattern {:?}", self.modules.pattern))?;

        match self.auth.provider.as_str() {
            "none" | "pam" => {}
            other => anyhow::bail!("Invalid config: unknown auth provider {:?}", other),
        }

        Ok(())
    }

    /// Build the property store from the `[properties]` table
    pub fn property_store(&self) -> PropertyStore {
        PropertyStore::from_table(&self.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.server.control_endpoint_path(),
            PathBuf::from("/var/run/freerds/FreeRDS_SessionManager")
        );
        assert_eq!(config.modules.default_module, "X11");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
pipe_dir = "/tmp/freerds-test"

[modules]
greeter_module = "Greeter"

[auth]
provider = "none"

[channels]
allowed = ["cliprdr", "rdpsnd"]

[properties.session]
timeout = 15
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.pipe_dir, PathBuf::from("/tmp/freerds-test"));
        assert_eq!(config.server.max_message_size, crate::rpc::DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.modules.greeter_module.as_deref(), Some("Greeter"));
        assert!(config.channels.is_allowed("CLIPRDR"));
        assert!(!config.channels.is_allowed("rdpdr"));

        let props = config.property_store();
        assert_eq!(props.get_number(1, "session.timeout"), Some(15));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let mut config = Config::default_config();
        config.auth.provider = "ldap".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_message_size() {
        let mut config = Config::default_config();
        config.server.max_message_size = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = Config::default_config()
            .with_overrides(Some(PathBuf::from("/run/rds")), None);
        assert_eq!(config.server.pipe_dir, PathBuf::from("/run/rds"));
        assert_eq!(
            config.server.pid_file,
            PathBuf::from("/var/run/freerds/freerds-session-manager.pid")
        );
    }
}
