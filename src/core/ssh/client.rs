use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use tempfile::TempDir;

use super::relay::AgentRelay;
use super::{Connection, Connector};
use crate::agent::{Credentials, AUTH_SOCK_ENV};
use crate::config::HostAddr;
use crate::error::{Error, RemoteCommandFailedDetails, Result};

const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 10;

/// Opens connections by starting an OpenSSH control master per host.
///
/// The master authenticates against an [`AgentRelay`] backed by the
/// session's signer. Commands then run as separate sessions multiplexed
/// over that master, so each host is authenticated once no matter how many
/// commands it runs.
#[derive(Debug, Clone)]
pub struct SshConnector {
    program: PathBuf,
    connect_timeout_secs: u32,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl SshConnector {
    /// Use a specific ssh binary instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct SshConnection {
    host: HostAddr,
    user: String,
    program: PathBuf,
    control_path: PathBuf,
    _relay: AgentRelay,
    // Holds the control and relay sockets; removed after both are closed.
    _control_dir: TempDir,
}

/// Captured result of one remote command.
struct CommandOutput {
    stdout: String,
    stderr: String,
    success: bool,
    exit_code: i32,
}

/// One remote session. The child is killed and reaped if the guard is
/// dropped before the command finished.
struct Channel {
    child: Option<Child>,
}

impl Channel {
    fn open(cmd: &mut Command) -> io::Result<Self> {
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(Self { child: Some(child) })
    }

    /// Collect both streams and the exit status. The child stays in the
    /// guard until it has been reaped, so an error here still kills it.
    fn wait(mut self) -> io::Result<CommandOutput> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| io::Error::other("channel already closed"))?;

        let stderr_pipe = child.stderr.take();
        let stderr_reader = thread::spawn(move || read_pipe(stderr_pipe));
        let stdout = read_pipe(child.stdout.take())?;
        let stderr = stderr_reader
            .join()
            .map_err(|_| io::Error::other("stderr reader panicked"))??;
        let status = child.wait()?;
        self.child = None;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn target_args(host: &HostAddr, user: &str) -> Vec<String> {
    let mut args = Vec::new();
    if host.port != 22 {
        args.push("-p".to_string());
        args.push(host.port.to_string());
    }
    args.push("-l".to_string());
    args.push(user.to_string());
    args.push(host.host.clone());
    args
}

/// Arguments that start a backgrounded control master for `host`.
fn build_master_args(
    host: &HostAddr,
    user: &str,
    control_path: &Path,
    connect_timeout_secs: u32,
) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "ControlMaster=yes".to_string(),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-o".to_string(),
        "ControlPersist=yes".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("IdentityAgent={}", AUTH_SOCK_ENV),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout_secs),
        "-o".to_string(),
        "ServerAliveInterval=15".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
        "-f".to_string(),
        "-N".to_string(),
    ];
    args.extend(target_args(host, user));
    args
}

/// Arguments that run `command` over an existing master.
fn build_exec_args(host: &HostAddr, user: &str, control_path: &Path, command: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "ControlMaster=no".to_string(),
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
    ];
    args.extend(target_args(host, user));
    args.push(command.to_string());
    args
}

fn build_exit_args(host: &HostAddr, user: &str, control_path: &Path) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        format!("ControlPath={}", control_path.display()),
        "-O".to_string(),
        "exit".to_string(),
    ];
    args.extend(target_args(host, user));
    args
}

impl Connector for SshConnector {
    type Connection = SshConnection;

    fn connect(&self, host: &HostAddr, credentials: &Credentials) -> Result<SshConnection> {
        let connect_failed =
            |error: String| Error::ssh_connect_failed(host.to_string(), &credentials.user, error);

        let signer = credentials.signer();
        let identities = signer.identities().map_err(|e| connect_failed(e.message))?;
        if identities.is_empty() {
            return Err(connect_failed("no identities available to authenticate with".to_string()));
        }
        for identity in &identities {
            let algorithm = identity.algorithm().unwrap_or_else(|| "unknown".to_string());
            tracing::debug!(algorithm = %algorithm, comment = %identity.comment, "offering identity");
        }

        let control_dir = tempfile::Builder::new()
            .prefix("deedeeploy-")
            .tempdir()
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some("create ssh control directory".to_string()))
            })?;
        let control_path = control_dir.path().join("ctl");
        let relay = AgentRelay::serve(signer, &control_dir.path().join("agent.sock"))?;

        // The backgrounded master keeps inherited descriptors open, so
        // stderr goes to a file rather than a pipe we would wait on forever.
        let log_path = control_dir.path().join("connect.log");
        let log = File::create(&log_path).map_err(|e| {
            Error::internal_io(e.to_string(), Some("create ssh connect log".to_string()))
        })?;

        tracing::debug!(host = %host, user = %credentials.user, "opening ssh connection");
        let status = Command::new(&self.program)
            .args(build_master_args(
                host,
                &credentials.user,
                &control_path,
                self.connect_timeout_secs,
            ))
            .env(AUTH_SOCK_ENV, relay.socket())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .status()
            .map_err(|e| connect_failed(format!("failed to start ssh: {}", e)))?;

        if !status.success() {
            let stderr = std::fs::read_to_string(&log_path).unwrap_or_default();
            let reason = match stderr.trim() {
                "" => format!("ssh exited with status {}", status.code().unwrap_or(-1)),
                text => text.to_string(),
            };
            return Err(connect_failed(reason));
        }

        log_status!("ssh", "Connected to {}", host);
        Ok(SshConnection {
            host: host.clone(),
            user: credentials.user.clone(),
            program: self.program.clone(),
            control_path,
            _relay: relay,
            _control_dir: control_dir,
        })
    }
}

impl SshConnection {
    fn execute(&self, command: &str) -> io::Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(build_exec_args(&self.host, &self.user, &self.control_path, command));
        Channel::open(&mut cmd)?.wait()
    }
}

impl Connection for SshConnection {
    fn host(&self) -> &HostAddr {
        &self.host
    }

    fn run(&self, command: &str) -> Result<String> {
        tracing::debug!(host = %self.host, command, "running remote command");

        let output = self.execute(command).map_err(|e| {
            Error::remote_command_failed(RemoteCommandFailedDetails {
                host: self.host.to_string(),
                command: command.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("SSH error: {}", e),
            })
        })?;

        if !output.success {
            return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
                host: self.host.to_string(),
                command: command.to_string(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }));
        }

        tracing::debug!(host = %self.host, output = %output.stdout, "remote command finished");
        Ok(output.stdout)
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        let result = Command::new(&self.program)
            .args(build_exit_args(&self.host, &self.user, &self.control_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = result {
            tracing::debug!(host = %self.host, error = %e, "failed to stop ssh control master");
        }
    }
}
