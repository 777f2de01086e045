//! Agent socket served from a [`Signer`].
//!
//! OpenSSH only knows how to ask an agent socket for signatures. The relay
//! answers that protocol from whatever signer the session was built with,
//! so a connection never depends on where the keys actually live.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::agent::{
    self, Signer, WireReader, SSH_AGENTC_REQUEST_IDENTITIES, SSH_AGENTC_SIGN_REQUEST,
    SSH_AGENT_FAILURE, SSH_AGENT_IDENTITIES_ANSWER, SSH_AGENT_SIGN_RESPONSE,
};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct AgentRelay {
    socket: PathBuf,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl AgentRelay {
    /// Bind `socket` and answer agent requests on it until dropped.
    pub fn serve(signer: Arc<dyn Signer>, socket: &Path) -> Result<Self> {
        let listener = UnixListener::bind(socket).map_err(|e| {
            Error::internal_io(
                e.to_string(),
                Some(format!("bind agent relay at {}", socket.display())),
            )
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("agent-relay".to_string())
                .spawn(move || accept_loop(listener, signer, stop))
                .map_err(|e| Error::internal_io(e.to_string(), Some("start agent relay".to_string())))?
        };

        Ok(Self {
            socket: socket.to_path_buf(),
            stop,
            acceptor: Some(acceptor),
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl Drop for AgentRelay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        // The acceptor only sees the flag once accept() returns.
        let woken = UnixStream::connect(&self.socket).is_ok();
        if let Some(acceptor) = self.acceptor.take() {
            if woken && acceptor.join().is_err() {
                tracing::debug!("agent relay thread panicked");
            }
        }
        let _ = std::fs::remove_file(&self.socket);
    }
}

fn accept_loop(listener: UnixListener, signer: Arc<dyn Signer>, stop: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let signer = Arc::clone(&signer);
                let spawned = thread::Builder::new()
                    .name("agent-relay-client".to_string())
                    .spawn(move || serve_client(stream, signer.as_ref()));
                if let Err(e) = spawned {
                    tracing::debug!(error = %e, "agent relay could not serve client");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "agent relay stopped accepting");
                break;
            }
        }
    }
}

fn serve_client(mut stream: UnixStream, signer: &dyn Signer) {
    while let Ok(request) = agent::read_frame(&mut stream) {
        let reply = answer(signer, &request);
        if agent::write_frame(&mut stream, &reply).is_err() {
            break;
        }
    }
}

/// Unsupported or failed requests get the generic failure reply, as from a
/// locked agent.
fn answer(signer: &dyn Signer, request: &[u8]) -> Vec<u8> {
    let mut reader = WireReader::new(request);
    let reply = match reader.u8() {
        Ok(SSH_AGENTC_REQUEST_IDENTITIES) => list_identities(signer),
        Ok(SSH_AGENTC_SIGN_REQUEST) => sign(signer, &mut reader),
        Ok(other) => {
            tracing::debug!(message_type = other, "agent relay: unsupported request");
            None
        }
        Err(()) => None,
    };
    reply.unwrap_or_else(|| vec![SSH_AGENT_FAILURE])
}

fn list_identities(signer: &dyn Signer) -> Option<Vec<u8>> {
    let identities = match signer.identities() {
        Ok(identities) => identities,
        Err(e) => {
            tracing::debug!(error = %e, "agent relay: listing identities failed");
            return None;
        }
    };

    let mut reply = vec![SSH_AGENT_IDENTITIES_ANSWER];
    agent::put_u32(&mut reply, identities.len() as u32);
    for identity in &identities {
        agent::put_string(&mut reply, &identity.key_blob);
        agent::put_string(&mut reply, identity.comment.as_bytes());
    }
    Some(reply)
}

fn sign(signer: &dyn Signer, reader: &mut WireReader<'_>) -> Option<Vec<u8>> {
    let key_blob = reader.string().ok()?;
    let data = reader.string().ok()?;
    let flags = reader.u32().unwrap_or(0);

    let identity = signer
        .identities()
        .ok()?
        .into_iter()
        .find(|identity| identity.key_blob == key_blob)?;

    match signer.sign(&identity, data, flags) {
        Ok(signature) => {
            let mut reply = vec![SSH_AGENT_SIGN_RESPONSE];
            agent::put_string(&mut reply, &signature);
            Some(reply)
        }
        Err(e) => {
            tracing::debug!(error = %e, key = %identity.comment, "agent relay: signing failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentClient, Identity};
    use crate::error::ErrorCode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSigner {
        signed: Mutex<Vec<(Vec<u8>, u32)>>,
    }

    fn identity() -> Identity {
        let mut key_blob = Vec::new();
        agent::put_string(&mut key_blob, b"ssh-ed25519");
        agent::put_string(&mut key_blob, &[1u8; 32]);
        Identity {
            key_blob,
            comment: "deploy@ci".to_string(),
        }
    }

    impl Signer for RecordingSigner {
        fn identities(&self) -> Result<Vec<Identity>> {
            Ok(vec![identity()])
        }

        fn sign(&self, _identity: &Identity, data: &[u8], flags: u32) -> Result<Vec<u8>> {
            self.signed.lock().unwrap().push((data.to_vec(), flags));
            Ok([b"sig:".as_slice(), data].concat())
        }
    }

    #[test]
    fn serves_identities_from_signer() {
        let dir = tempfile::tempdir().unwrap();
        let relay = AgentRelay::serve(
            Arc::new(RecordingSigner::default()),
            &dir.path().join("agent.sock"),
        )
        .unwrap();

        let client = AgentClient::connect(relay.socket()).unwrap();
        let identities = client.identities().unwrap();

        assert_eq!(identities, vec![identity()]);
        assert_eq!(identities[0].algorithm().as_deref(), Some("ssh-ed25519"));
    }

    #[test]
    fn signs_through_signer_with_flags() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Arc::new(RecordingSigner::default());
        let relay = AgentRelay::serve(signer.clone(), &dir.path().join("agent.sock")).unwrap();

        let client = AgentClient::connect(relay.socket()).unwrap();
        let signature = client.sign(&identity(), b"session", 2).unwrap();

        assert_eq!(signature, b"sig:session");
        assert_eq!(
            *signer.signed.lock().unwrap(),
            vec![(b"session".to_vec(), 2)]
        );
    }

    #[test]
    fn unknown_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let signer = Arc::new(RecordingSigner::default());
        let relay = AgentRelay::serve(signer.clone(), &dir.path().join("agent.sock")).unwrap();

        let stranger = Identity {
            key_blob: vec![0, 0, 0, 1, b'x'],
            comment: "stranger".to_string(),
        };
        let client = AgentClient::connect(relay.socket()).unwrap();
        let err = client.sign(&stranger, b"session", 0).unwrap_err();

        assert_eq!(err.code, ErrorCode::SshAgentUnavailable);
        assert!(signer.signed.lock().unwrap().is_empty());
    }

    #[test]
    fn unsupported_request_gets_failure() {
        assert_eq!(
            answer(&RecordingSigner::default(), &[17]),
            vec![SSH_AGENT_FAILURE]
        );
    }

    #[test]
    fn drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let relay = AgentRelay::serve(Arc::new(RecordingSigner::default()), &socket).unwrap();
        drop(relay);

        assert!(!socket.exists());
        assert!(AgentClient::connect(&socket).is_err());
    }
}
