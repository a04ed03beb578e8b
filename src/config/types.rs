//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::rpc::DEFAULT_MAX_MESSAGE_SIZE;

/// Control endpoint and daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding the control socket and per-session backend sockets
    #[serde(default = "default_pipe_dir")]
    pub pipe_dir: PathBuf,

    /// Socket name of the control endpoint inside `pipe_dir`
    #[serde(default = "default_control_endpoint")]
    pub control_endpoint: String,

    /// Largest frame accepted or sent on any channel
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// PID file written at startup
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Timeout for outbound calls to peers and backends (milliseconds)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Interval of the session timeout scan (milliseconds)
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pipe_dir: default_pipe_dir(),
            control_endpoint: default_control_endpoint(),
            max_message_size: default_max_message_size(),
            pid_file: default_pid_file(),
            call_timeout_ms: default_call_timeout_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Full path of the control socket
    pub fn control_endpoint_path(&self) -> PathBuf {
        self.pipe_dir.join(&self.control_endpoint)
    }

    /// Outbound call timeout
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Session timeout scan interval
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn default_pipe_dir() -> PathBuf {
    PathBuf::from("/var/run/freerds")
}

fn default_control_endpoint() -> String {
    "FreeRDS_SessionManager".to_string()
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/freerds/freerds-session-manager.pid")
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_monitor_interval_ms() -> u64 {
    crate::task::MONITOR_INTERVAL.as_millis() as u64
}

/// Backend module configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory scanned for module descriptors
    #[serde(default = "default_module_dir")]
    pub directory: PathBuf,

    /// Glob pattern for descriptor file names
    #[serde(default = "default_module_pattern")]
    pub pattern: String,

    /// Module serving authenticated sessions
    #[serde(default = "default_module")]
    pub default_module: String,

    /// Module serving unauthenticated connections (login screen)
    #[serde(default)]
    pub greeter_module: Option<String>,

    /// How long a backend may take to open its endpoint (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            directory: default_module_dir(),
            pattern: default_module_pattern(),
            default_module: default_module(),
            greeter_module: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ModulesConfig {
    /// Endpoint wait budget
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_module_dir() -> PathBuf {
    PathBuf::from("/usr/lib/freerds/modules")
}

fn default_module_pattern() -> String {
    "*.module.toml".to_string()
}

fn default_module() -> String {
    "X11".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Provider ("pam", "none")
    #[serde(default = "default_auth_provider")]
    pub provider: String,

    /// PAM service name
    #[serde(default = "default_pam_service")]
    pub pam_service: String,

    /// Failed attempts before lockout (0 = never lock)
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: usize,

    /// Lockout duration in seconds
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_auth_provider(),
            pam_service: default_pam_service(),
            max_failed_attempts: default_max_failed_attempts(),
            lockout_duration: default_lockout_duration(),
        }
    }
}

fn default_auth_provider() -> String {
    if cfg!(feature = "pam-auth") {
        "pam".to_string()
    } else {
        "none".to_string()
    }
}

fn default_pam_service() -> String {
    "freerds".to_string()
}

fn default_max_failed_attempts() -> usize {
    5
}

fn default_lockout_duration() -> u64 {
    300
}

/// Virtual channel policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Channels a session may open (empty = all channels allowed)
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl ChannelsConfig {
    /// Whether a static or dynamic virtual channel may be opened
    pub fn is_allowed(&self, channel_name: &str) -> bool {
        self.allowed.is_empty()
            || self
                .allowed
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(channel_name))
    }
}
