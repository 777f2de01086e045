//! SSH agent client and session credentials.
//!
//! Signing is delegated to a running `ssh-agent` over its Unix socket. No
//! private key material is ever read by this process.

use std::fmt;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Environment variable holding the agent socket address.
pub const AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";

pub(crate) const SSH_AGENT_FAILURE: u8 = 5;
pub(crate) const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub(crate) const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub(crate) const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub(crate) const SSH_AGENT_SIGN_RESPONSE: u8 = 14;

// Replies larger than this are treated as a protocol error.
const MAX_MESSAGE_LEN: usize = 256 * 1024;

/// A public key held by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

impl Identity {
    /// Key algorithm name, e.g. `ssh-ed25519`, read from the key blob.
    pub fn algorithm(&self) -> Option<String> {
        let mut reader = WireReader::new(&self.key_blob);
        let name = reader.string().ok()?;
        String::from_utf8(name.to_vec()).ok()
    }
}

/// Signing capability handed to the remote executor.
///
/// `flags` carries the agent protocol signature flags (for example the
/// rsa-sha2 hash selection) through unchanged.
pub trait Signer: Send + Sync {
    fn identities(&self) -> Result<Vec<Identity>>;
    fn sign(&self, identity: &Identity, data: &[u8], flags: u32) -> Result<Vec<u8>>;
}

/// Connection to a running SSH agent.
pub struct AgentClient {
    socket: PathBuf,
    stream: Mutex<UnixStream>,
}

impl AgentClient {
    pub fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).map_err(|e| {
            Error::ssh_agent_unavailable(Some(socket.display().to_string()), e.to_string())
        })?;

        Ok(Self {
            socket: socket.to_path_buf(),
            stream: Mutex::new(stream),
        })
    }

    fn protocol_error(&self, message: impl Into<String>) -> Error {
        Error::ssh_agent_unavailable(Some(self.socket.display().to_string()), message)
    }

    /// Send one framed request and read the framed reply.
    fn request(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| Error::internal_unexpected("SSH agent connection lock poisoned"))?;

        write_frame(&mut *stream, payload)
            .map_err(|e| self.protocol_error(format!("write to agent: {}", e)))?;
        read_frame(&mut *stream)
            .map_err(|e| self.protocol_error(format!("read from agent: {}", e)))
    }
}

/// Write one length-prefixed agent message.
pub(crate) fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    put_string(&mut frame, payload);
    stream.write_all(&frame)
}

/// Read one length-prefixed agent message.
pub(crate) fn read_frame<R: Read>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid agent message length {}", len),
        ));
    }

    let mut message = vec![0u8; len];
    stream.read_exact(&mut message)?;
    Ok(message)
}

impl Signer for AgentClient {
    fn identities(&self) -> Result<Vec<Identity>> {
        let reply = self.request(&[SSH_AGENTC_REQUEST_IDENTITIES])?;
        let malformed = || self.protocol_error("malformed identities answer");

        let mut reader = WireReader::new(&reply);
        match reader.u8().map_err(|_| malformed())? {
            SSH_AGENT_IDENTITIES_ANSWER => {}
            SSH_AGENT_FAILURE => return Err(self.protocol_error("agent refused to list identities")),
            other => return Err(self.protocol_error(format!("unexpected agent reply type {}", other))),
        }

        let count = reader.u32().map_err(|_| malformed())?;
        let mut identities = Vec::new();
        for _ in 0..count {
            let key_blob = reader.string().map_err(|_| malformed())?.to_vec();
            let comment = reader.string().map_err(|_| malformed())?;
            identities.push(Identity {
                key_blob,
                comment: String::from_utf8_lossy(comment).into_owned(),
            });
        }
        Ok(identities)
    }

    fn sign(&self, identity: &Identity, data: &[u8], flags: u32) -> Result<Vec<u8>> {
        let mut msg = vec![SSH_AGENTC_SIGN_REQUEST];
        put_string(&mut msg, &identity.key_blob);
        put_string(&mut msg, data);
        put_u32(&mut msg, flags);

        let reply = self.request(&msg)?;
        let malformed = || self.protocol_error("malformed sign response");

        let mut reader = WireReader::new(&reply);
        match reader.u8().map_err(|_| malformed())? {
            SSH_AGENT_SIGN_RESPONSE => Ok(reader.string().map_err(|_| malformed())?.to_vec()),
            SSH_AGENT_FAILURE => Err(self.protocol_error(format!(
                "agent refused to sign with key '{}'",
                identity.comment
            ))),
            other => Err(self.protocol_error(format!("unexpected agent reply type {}", other))),
        }
    }
}

/// Authentication context for one deployment session.
///
/// Built once and shared read-only by every host connection. Connections
/// only see the [`Signer`], never the agent transport behind it.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    signer: Arc<dyn Signer>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Self {
            user: user.into(),
            signer,
        }
    }

    pub fn signer(&self) -> Arc<dyn Signer> {
        Arc::clone(&self.signer)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

pub trait Authenticator {
    fn authenticate(&self, user: &str) -> Result<Credentials>;
}

/// Builds credentials backed by the agent at `SSH_AUTH_SOCK`.
#[derive(Debug, Clone)]
pub struct AgentAuthenticator {
    socket: Option<PathBuf>,
}

impl AgentAuthenticator {
    pub fn from_env() -> Self {
        let socket = std::env::var_os(AUTH_SOCK_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self { socket }
    }

    pub fn with_socket(socket: Option<PathBuf>) -> Self {
        Self { socket }
    }
}

impl Authenticator for AgentAuthenticator {
    fn authenticate(&self, user: &str) -> Result<Credentials> {
        let socket = self.socket.as_ref().ok_or_else(|| {
            Error::ssh_agent_unavailable(None, format!("{} is not set", AUTH_SOCK_ENV))
        })?;

        tracing::debug!(socket = %socket.display(), "connecting to SSH agent");
        let client = AgentClient::connect(socket)?;
        let identities = client.identities()?;

        if identities.is_empty() {
            tracing::warn!("SSH agent holds no identities; authentication will likely fail");
        }

        Ok(Credentials::new(user, Arc::new(client)))
    }
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn put_string(buf: &mut Vec<u8>, value: &[u8]) {
    put_u32(buf, value.len() as u32);
    buf.extend_from_slice(value);
}

/// Cursor over SSH wire-format data.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], ()> {
        let end = self.pos.checked_add(n).ok_or(())?;
        let slice = self.buf.get(self.pos..end).ok_or(())?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> std::result::Result<u8, ()> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> std::result::Result<u32, ()> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn string(&mut self) -> std::result::Result<&'a [u8], ()> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}
