//! Configuration types for the clamd client.

use crate::transport::{
    TcpTransport, UnixSocketTransport, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SOCKET_PATH,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// ClamAV daemon connection settings.
    #[serde(default)]
    pub clamd: ClamdConfig,
}

/// How to reach the daemon.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Unix domain socket.
    #[default]
    Unix,
    /// TCP socket.
    Tcp,
}

/// ClamAV daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClamdConfig {
    /// Which socket type to use.
    #[serde(default)]
    pub transport: TransportKind,

    /// Path to clamd Unix socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// clamd TCP host.
    #[serde(default = "default_host")]
    pub host: String,

    /// clamd TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect, send and receive timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for ClamdConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            socket_path: default_socket_path(),
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> u64 {
    30000 // 30 seconds
}

impl ClamdConfig {
    /// Unix socket transport built from these settings.
    pub fn unix_transport(&self) -> UnixSocketTransport {
        UnixSocketTransport::new(self.socket_path.clone(), self.timeout_ms)
    }

    /// TCP transport built from these settings.
    pub fn tcp_transport(&self) -> TcpTransport {
        TcpTransport::new(self.host.clone(), self.port, self.timeout_ms)
    }
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = Self::parse(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file without validating it, for callers that adjust
    /// values before calling [`Config::validate`].
    pub fn parse(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.clamd.timeout_ms == 0 {
            anyhow::bail!("clamd.timeout_ms must be greater than 0");
        }

        match self.clamd.transport {
            TransportKind::Unix => {
                if self.clamd.socket_path.as_os_str().is_empty() {
                    anyhow::bail!("clamd.socket_path must be set for the unix transport");
                }
            }
            TransportKind::Tcp => {
                if self.clamd.host.is_empty() {
                    anyhow::bail!("clamd.host must be set for the tcp transport");
                }
                if self.clamd.port == 0 {
                    anyhow::bail!("clamd.port must be greater than 0");
                }
            }
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# clamd client configuration

clamd:
  transport: unix                        # unix or tcp
  socket_path: "/run/clamav/clamd.ctl"   # used by the unix transport
  host: "127.0.0.1"                      # used by the tcp transport
  port: 3310
  timeout_ms: 30000                      # connect/send/receive timeout
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern is valid");

    re.replace_all(content, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_clamd_config() {
        let clamd = ClamdConfig::default();
        assert_eq!(clamd.transport, TransportKind::Unix);
        assert_eq!(clamd.socket_path, PathBuf::from("/run/clamav/clamd.ctl"));
        assert_eq!(clamd.host, "127.0.0.1");
        assert_eq!(clamd.port, 3310);
        assert_eq!(clamd.timeout_ms, 30000);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("CLAMD_CLIENT_TEST_SOCKET", "/tmp/test.sock");
        let input = "socket_path: \"${CLAMD_CLIENT_TEST_SOCKET}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "socket_path: \"/tmp/test.sock\"");
        std::env::remove_var("CLAMD_CLIENT_TEST_SOCKET");
    }

    #[test]
    fn test_expand_unset_env_var_is_empty() {
        let result = expand_env_vars("host: \"${CLAMD_CLIENT_TEST_UNSET_VAR}\"");
        assert_eq!(result, "host: \"\"");
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
clamd:
  transport: tcp
  host: "clamav.internal"
  port: 3311
  timeout_ms: 10000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.clamd.transport, TransportKind::Tcp);
        assert_eq!(config.clamd.host, "clamav.internal");
        assert_eq!(config.clamd.port, 3311);
        assert_eq!(config.clamd.timeout_ms, 10000);
        assert_eq!(config.clamd.socket_path, PathBuf::from("/run/clamav/clamd.ctl"));
        assert_eq!(config.clamd.tcp_transport().address(), "clamav.internal:3311");
    }

    #[test]
    fn test_parse_empty_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.clamd.transport, TransportKind::Unix);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = serde_yaml::from_str(&Config::example()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clamd:\n  socket_path: \"/tmp/clamd.sock\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.clamd.socket_path, PathBuf::from("/tmp/clamd.sock"));
        assert_eq!(
            config.clamd.unix_transport().socket_path(),
            std::path::Path::new("/tmp/clamd.sock")
        );
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clamd:\n  timeout_ms: 0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_parse_does_not_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clamd:\n  timeout_ms: 0").unwrap();

        let mut config = Config::parse(file.path()).unwrap();
        assert!(config.validate().is_err());
        config.clamd.timeout_ms = 500;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            clamd: ClamdConfig {
                timeout_ms: 0,
                ..ClamdConfig::default()
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tcp_requires_host_and_port() {
        let config = Config {
            clamd: ClamdConfig {
                transport: TransportKind::Tcp,
                host: String::new(),
                ..ClamdConfig::default()
            },
        };
        assert!(config.validate().is_err());

        let config = Config {
            clamd: ClamdConfig {
                transport: TransportKind::Tcp,
                port: 0,
                ..ClamdConfig::default()
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unix_requires_socket_path() {
        let config = Config {
            clamd: ClamdConfig {
                socket_path: PathBuf::new(),
                ..ClamdConfig::default()
            },
        };
        assert!(config.validate().is_err());
    }
}
