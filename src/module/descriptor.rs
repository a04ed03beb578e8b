//! Backend module descriptors
//!
//! A descriptor is a small TOML file installed next to the backend binary:
//!
//! ```toml
//! name = "X11"
//! api_version = 1
//! kind = "x11"
//! command = "/usr/lib/freerds/freerds-x11"
//! args = ["--endpoint", "{endpoint}", "--display", "{display}",
//!         "--geometry", "{width}x{height}", "--depth", "{bpp}"]
//!
//! [env]
//! XDG_SESSION_TYPE = "x11"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{ModuleError, Result};

/// Plugin ABI version spoken by this session manager
pub const MODULE_API_VERSION: u32 = 1;

/// Backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// X server with the RDP display driver
    X11,
    /// RDP passthrough to another host
    Rdp,
    /// Chromium Embedded Framework shell
    Cef,
    /// NetSurf browser shell
    NetSurf,
    /// Arbitrary command speaking the backend protocol
    Command,
}

impl BackendKind {
    /// Endpoint tag used when the descriptor does not set one
    pub fn default_endpoint_tag(self) -> &'static str {
        match self {
            BackendKind::X11 => "X11",
            BackendKind::Rdp => "RDP",
            BackendKind::Cef => "CEF",
            BackendKind::NetSurf => "NetSurf",
            BackendKind::Command => "Backend",
        }
    }
}

/// Parsed module descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module name, stored upper-cased
    pub name: String,

    /// Plugin ABI version
    pub api_version: u32,

    /// Backend flavour
    pub kind: BackendKind,

    /// Executable to launch
    pub command: PathBuf,

    /// Arguments; `{session_id}`, `{endpoint}`, `{display}`, `{width}`,
    /// `{height}`, `{bpp}` and `{user}` are substituted at launch
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the backend
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Override for the endpoint tag
    #[serde(default)]
    pub endpoint_tag: Option<String>,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
}

impl ModuleDescriptor {
    /// Programmatic descriptor
    pub fn new(name: &str, kind: BackendKind, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            api_version: MODULE_API_VERSION,
            kind,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            endpoint_tag: None,
            description: None,
        }
    }

    /// Builder-style argument list
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate a descriptor file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut descriptor: ModuleDescriptor =
            toml::from_str(&content).map_err(|e| ModuleError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if descriptor.name.trim().is_empty() {
            return Err(ModuleError::InvalidDescriptor {
                path: path.to_path_buf(),
                reason: "empty module name".to_string(),
            });
        }

        if descriptor.api_version != MODULE_API_VERSION {
            return Err(ModuleError::ApiVersionMismatch {
                name: descriptor.name,
                expected: MODULE_API_VERSION,
                found: descriptor.api_version,
            });
        }

        descriptor.name = descriptor.name.trim().to_ascii_uppercase();
        Ok(descriptor)
    }

    /// Tag used in the backend endpoint name
    pub fn endpoint_tag(&self) -> &str {
        self.endpoint_tag
            .as_deref()
            .unwrap_or_else(|| self.kind.default_endpoint_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_descriptor(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_descriptor() {
        let file = write_descriptor(
            r#"
name = "netsurf"
api_version = 1
kind = "netsurf"
command = "/usr/bin/netsurf-fb"
args = ["-e", "{endpoint}"]

[env]
NETSURF_HOME = "/tmp"
"#,
        );

        let descriptor = ModuleDescriptor::from_file(file.path()).unwrap();
        assert_eq!(descriptor.name, "NETSURF");
        assert_eq!(descriptor.kind, BackendKind::NetSurf);
        assert_eq!(descriptor.endpoint_tag(), "NetSurf");
        assert_eq!(descriptor.args, vec!["-e", "{endpoint}"]);
        assert_eq!(descriptor.env.get("NETSURF_HOME").unwrap(), "/tmp");
    }

    #[test]
    fn test_api_version_mismatch() {
        let file = write_descriptor(
            "name = \"X11\"\napi_version = 7\nkind = \"x11\"\ncommand = \"/bin/true\"\n",
        );

        let err = ModuleDescriptor::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::ApiVersionMismatch {
                expected: 1,
                found: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let file = write_descriptor(
            "name = \"X\"\napi_version = 1\nkind = \"wayland\"\ncommand = \"/bin/true\"\n",
        );
        assert!(matches!(
            ModuleDescriptor::from_file(file.path()),
            Err(ModuleError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_endpoint_tag_override() {
        let mut descriptor = ModuleDescriptor::new("greeter", BackendKind::Cef, "/usr/bin/greeter");
        assert_eq!(descriptor.name, "GREETER");
        assert_eq!(descriptor.endpoint_tag(), "CEF");

        descriptor.endpoint_tag = Some("Greeter".to_string());
        assert_eq!(descriptor.endpoint_tag(), "Greeter");
    }
}
