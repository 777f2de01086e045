//! Environment configuration: loading, selection and validation.
//!
//! The config file is read once per invocation. Records are kept raw until
//! one is selected, then validated into an immutable [`EnvironmentConfig`].

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv6Addr;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, ErrorCode, Result};
use crate::utils::validation;
use crate::vcs::Vcs;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "deedeeploy.yml";

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One environment entry exactly as it appears in the config file.
///
/// Every field defaults so that a missing key is reported by validation
/// with its own error code instead of failing the whole parse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub vcs: String,
    /// Accepted for compatibility with existing config files; unused.
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub postcmd: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub environments: Vec<EnvironmentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProtocol {
    Ssh,
    Ftp,
}

impl TransferProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProtocol::Ssh => "ssh",
            TransferProtocol::Ftp => "ftp",
        }
    }
}

impl FromStr for TransferProtocol {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(TransferProtocol::Ssh),
            "ftp" => Ok(TransferProtocol::Ftp),
            _ => Err(()),
        }
    }
}

/// A remote host reachable over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for HostAddr {
    type Err = ();

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A bare IPv6
    /// address without brackets is taken whole, on the default port.
    /// Anything else with more than one colon is rejected.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or(())?;
            host.parse::<Ipv6Addr>().map_err(|_| ())?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or(())?)),
            }
        } else {
            match s.matches(':').count() {
                0 => (s, None),
                1 => {
                    let (host, port) = s.split_once(':').ok_or(())?;
                    (host, Some(port))
                }
                _ => {
                    s.parse::<Ipv6Addr>().map_err(|_| ())?;
                    (s, None)
                }
            }
        };

        // A leading '-' would be read as an ssh option.
        if host.is_empty() || host.starts_with('-') || host.contains(char::is_whitespace) {
            return Err(());
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| ())?,
            None => DEFAULT_SSH_PORT,
        };
        if port == 0 {
            return Err(());
        }

        Ok(HostAddr {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A selected and validated environment. Read-only for the rest of the run.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub name: String,
    pub hosts: Vec<HostAddr>,
    pub transfer: TransferProtocol,
    pub vcs: Vcs,
    pub remote_path: String,
    pub user: String,
    pub post_commands: Vec<String>,
}

/// Read and parse the config file at `path`.
pub fn load(path: &Path) -> Result<ConfigFile> {
    let path_str = path.display().to_string();
    tracing::debug!(path = %path_str, "reading config file");

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config_load_failed(path_str.clone(), e.to_string()))?;

    ConfigFile::parse_with_path(&content, &path_str)
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_with_path(content, DEFAULT_CONFIG_FILE)
    }

    fn parse_with_path(content: &str, path: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(path, e))?;

        let mut seen = HashSet::new();
        for env in &file.environments {
            if !seen.insert(env.name.as_str()) {
                return Err(Error::config_duplicate_environment(env.name.clone()));
            }
        }

        Ok(file)
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.iter().map(|e| e.name.clone()).collect()
    }

    /// Select the environment called `name` and validate it.
    pub fn resolve(&self, name: &str) -> Result<EnvironmentConfig> {
        let record = self
            .environments
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::environment_not_found(name, self.environment_names()))?;

        tracing::debug!(environment = %record.name, "environment found in config file");
        validate(record)
    }
}

/// Checks run in a fixed order; the first failing one is reported.
pub fn validate(record: &EnvironmentRecord) -> Result<EnvironmentConfig> {
    let env = record.name.as_str();
    let invalid = |code: ErrorCode, key: &str, value: Option<&str>| {
        Error::config_invalid_value(code, env, key, value.map(str::to_string))
    };

    let transfer: TransferProtocol = validation::require_parse(&record.protocol, || {
        invalid(
            ErrorCode::ConfigInvalidTransferProtocol,
            "protocol",
            Some(record.protocol.as_str()),
        )
    })?;

    let vcs: Vcs = validation::require_parse(&record.vcs, || {
        invalid(ErrorCode::ConfigInvalidVcs, "vcs", Some(record.vcs.as_str()))
    })?;

    let user = validation::require_non_empty(&record.user, || {
        invalid(ErrorCode::ConfigMissingUser, "user", None)
    })?;

    let remote_path = validation::require_non_empty(&record.path, || {
        invalid(ErrorCode::ConfigMissingPath, "path", None)
    })?;
    if !remote_path.starts_with('/') {
        return Err(invalid(
            ErrorCode::ConfigInvalidPath,
            "path",
            Some(remote_path),
        ));
    }

    let raw_hosts = validation::require_non_empty_vec(&record.hosts, || {
        invalid(ErrorCode::ConfigNoHosts, "hosts", None)
    })?;
    let hosts = raw_hosts
        .iter()
        .map(|h| {
            validation::require_parse::<HostAddr>(h, || {
                invalid(ErrorCode::ConfigInvalidHost, "hosts", Some(h.as_str()))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EnvironmentConfig {
        name: record.name.clone(),
        hosts,
        transfer,
        vcs,
        remote_path: remote_path.to_string(),
        user: user.to_string(),
        post_commands: record.postcmd.clone(),
    })
}
