use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigLoadFailed,
    ConfigInvalidYaml,
    ConfigDuplicateEnvironment,
    ConfigInvalidTransferProtocol,
    ConfigInvalidVcs,
    ConfigMissingUser,
    ConfigMissingPath,
    ConfigInvalidPath,
    ConfigNoHosts,
    ConfigInvalidHost,

    EnvironmentNotFound,

    SshAgentUnavailable,
    SshConnectFailed,

    RemoteCommandFailed,

    DeployNotImplemented,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigLoadFailed => "config.load_failed",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigDuplicateEnvironment => "config.duplicate_environment",
            ErrorCode::ConfigInvalidTransferProtocol => "config.invalid_transfer_protocol",
            ErrorCode::ConfigInvalidVcs => "config.invalid_vcs",
            ErrorCode::ConfigMissingUser => "config.missing_user",
            ErrorCode::ConfigMissingPath => "config.missing_path",
            ErrorCode::ConfigInvalidPath => "config.invalid_path",
            ErrorCode::ConfigNoHosts => "config.no_hosts",
            ErrorCode::ConfigInvalidHost => "config.invalid_host",

            ErrorCode::EnvironmentNotFound => "environment.not_found",

            ErrorCode::SshAgentUnavailable => "ssh.agent_unavailable",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::DeployNotImplemented => "deploy.not_implemented",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Process exit code for this error's category.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigLoadFailed
            | ErrorCode::ConfigInvalidYaml
            | ErrorCode::ConfigDuplicateEnvironment
            | ErrorCode::ConfigInvalidTransferProtocol
            | ErrorCode::ConfigInvalidVcs
            | ErrorCode::ConfigMissingUser
            | ErrorCode::ConfigMissingPath
            | ErrorCode::ConfigInvalidPath
            | ErrorCode::ConfigNoHosts
            | ErrorCode::ConfigInvalidHost => 2,

            ErrorCode::EnvironmentNotFound => 4,

            ErrorCode::SshAgentUnavailable | ErrorCode::SshConnectFailed => 10,

            ErrorCode::RemoteCommandFailed => 20,

            ErrorCode::DeployNotImplemented => 30,

            ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLoadDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub environment: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUnavailableDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectFailedDetails {
    pub host: String,
    pub user: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub host: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn config_load_failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigLoadFailed,
            format!("Unable to read config file {}", path),
            to_details(ConfigLoadDetails {
                path,
                error: error.into(),
            }),
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, err: serde_yml::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            format!("Unable to parse config file: {}", err),
            to_details(ConfigLoadDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_duplicate_environment(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ConfigDuplicateEnvironment,
            format!("Environment '{}' is defined more than once", name),
            serde_json::json!({ "environment": name }),
        )
        .with_hint("Environment names must be unique; rename or remove the duplicate entry")
    }

    /// One constructor for every per-field check done after selection.
    pub fn config_invalid_value(
        code: ErrorCode,
        environment: impl Into<String>,
        key: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        let key = key.into();
        let message = match code {
            ErrorCode::ConfigInvalidTransferProtocol => format!(
                "Invalid protocol specified: {}",
                value.as_deref().unwrap_or_default()
            ),
            ErrorCode::ConfigInvalidVcs => format!(
                "Invalid vcs specified: {}",
                value.as_deref().unwrap_or_default()
            ),
            ErrorCode::ConfigMissingUser => "No username specified".to_string(),
            ErrorCode::ConfigMissingPath => "No path specified".to_string(),
            ErrorCode::ConfigInvalidPath => format!(
                "Remote path must be absolute: {}",
                value.as_deref().unwrap_or_default()
            ),
            ErrorCode::ConfigNoHosts => "No host(s) found".to_string(),
            ErrorCode::ConfigInvalidHost => format!(
                "Invalid host address: {}",
                value.as_deref().unwrap_or_default()
            ),
            _ => format!("Invalid configuration value for '{}'", key),
        };

        Self::new(
            code,
            message,
            to_details(ConfigInvalidValueDetails {
                environment: environment.into(),
                key,
                value,
            }),
        )
    }

    pub fn environment_not_found(id: impl Into<String>, available: Vec<String>) -> Self {
        let id = id.into();
        let hint = if available.is_empty() {
            "The config file defines no environments".to_string()
        } else {
            format!("Available environments: {}", available.join(", "))
        };
        Self::new(
            ErrorCode::EnvironmentNotFound,
            format!("Environment '{}' not found in config file", id),
            to_details(NotFoundDetails { id, available }),
        )
        .with_hint(hint)
    }

    pub fn ssh_agent_unavailable(socket: Option<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::SshAgentUnavailable,
            format!("SSH agent unavailable: {}", error),
            to_details(AgentUnavailableDetails { socket, error }),
        )
        .with_hint("Start ssh-agent and add a key with 'ssh-add', then make sure SSH_AUTH_SOCK is exported")
    }

    pub fn ssh_connect_failed(
        host: impl Into<String>,
        user: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let error = error.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Unable to connect to {}: {}", host, error),
            to_details(ConnectFailedDetails {
                host,
                user: user.into(),
                error,
            }),
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let reason = if details.stderr.trim().is_empty() {
            format!("exit status {}", details.exit_code)
        } else {
            details.stderr.trim().to_string()
        };
        Self::new(
            ErrorCode::RemoteCommandFailed,
            format!("Failed to run on {}: {}", details.host, reason),
            to_details(details),
        )
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        let feature = feature.into();
        Self::new(
            ErrorCode::DeployNotImplemented,
            format!("{} not yet implemented", feature),
            serde_json::json!({ "feature": feature }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_share_exit_code() {
        for code in [
            ErrorCode::ConfigInvalidVcs,
            ErrorCode::ConfigNoHosts,
            ErrorCode::ConfigMissingUser,
        ] {
            assert_eq!(code.exit_code(), 2);
        }
    }

    #[test]
    fn categories_have_distinct_exit_codes() {
        assert_eq!(ErrorCode::EnvironmentNotFound.exit_code(), 4);
        assert_eq!(ErrorCode::SshAgentUnavailable.exit_code(), 10);
        assert_eq!(ErrorCode::SshConnectFailed.exit_code(), 10);
        assert_eq!(ErrorCode::RemoteCommandFailed.exit_code(), 20);
        assert_eq!(ErrorCode::DeployNotImplemented.exit_code(), 30);
        assert_eq!(ErrorCode::InternalIoError.exit_code(), 1);
    }

    #[test]
    fn not_found_hints_available_environments() {
        let err = Error::environment_not_found(
            "prod",
            vec!["staging".to_string(), "test".to_string()],
        );
        assert_eq!(err.code, ErrorCode::EnvironmentNotFound);
        assert_eq!(err.message, "Environment 'prod' not found in config file");
        assert_eq!(err.hints[0].message, "Available environments: staging, test");
        assert_eq!(err.details["available"][1], "test");
    }

    #[test]
    fn remote_failure_message_prefers_stderr() {
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            host: "web1:22".to_string(),
            command: "svn up".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "svn: E155007: not a working copy\n".to_string(),
        });
        assert_eq!(
            err.message,
            "Failed to run on web1:22: svn: E155007: not a working copy"
        );
        assert_eq!(err.details["exitCode"], 1);
    }

    #[test]
    fn remote_failure_message_falls_back_to_exit_status() {
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            host: "web1:22".to_string(),
            command: "false".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
        });
        assert_eq!(err.message, "Failed to run on web1:22: exit status 1");
    }
}
