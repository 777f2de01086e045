//! End-to-end tests for the deedeeploy binary.
//!
//! A fake `ssh` on PATH and a fake agent socket stand in for real hosts.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use tempfile::TempDir;

const CONFIG: &str = r#"
environments:
  - name: production
    hosts: [web1, down.example, web3]
    protocol: ssh
    vcs: svn
    user: deploy
    path: /srv/app
    postcmd:
      - echo migrate
      - echo reload
  - name: staging
    hosts: [web1, web2]
    protocol: ssh
    vcs: svn
    user: deploy
    path: /srv/staging
    postcmd: [echo done]
  - name: broken
    hosts: [web1, web2]
    protocol: ssh
    vcs: svn
    user: deploy
    path: /srv/broken
  - name: git
    hosts: [web1]
    protocol: ssh
    vcs: git
    user: deploy
    path: /srv/app
  - name: nohosts
    protocol: ssh
    vcs: svn
    user: deploy
    path: /srv/app
"#;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deedeeploy.yml"), CONFIG).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path().join("ssh-calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Fake ssh: refuses `down.example`, fails commands under /srv/broken,
    /// echoes every other command back.
    fn install_fake_ssh(&self) -> PathBuf {
        let bin = self.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("ssh");
        let body = format!(
            r#"#!/bin/sh
prev=""; last=""
for arg; do prev="$last"; last="$arg"; done
case "$*" in
  *ControlMaster=yes*)
    echo "connect $last" >> '{log}'
    if [ "$last" = "down.example" ]; then
      echo "ssh: connect to host down.example port 22: Connection refused" >&2
      exit 255
    fi
    exit 0 ;;
  *"-O exit"*) exit 0 ;;
esac
echo "run $prev $last" >> '{log}'
case "$last" in
  *broken*) echo "svn: E155007: not a working copy" >&2; exit 1 ;;
esac
echo "ran: $last"
"#,
            log = self.path().join("ssh-calls.log").display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        bin
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("deedeeploy").unwrap();
        cmd.current_dir(self.path()).env_remove("SSH_AUTH_SOCK").env_remove("RUST_LOG");
        cmd
    }

    fn deploy_command(&self) -> Command {
        let bin = self.install_fake_ssh();
        let socket = spawn_fake_agent(self.path());
        let path = format!(
            "{}:{}",
            bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let mut cmd = self.command();
        cmd.env("PATH", path).env("SSH_AUTH_SOCK", socket);
        cmd
    }
}

/// Agent that answers identity requests with one key.
fn spawn_fake_agent(dir: &Path) -> PathBuf {
    let socket = dir.join("agent.sock");
    let listener = UnixListener::bind(&socket).unwrap();

    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            serve_agent(&mut stream);
        }
    });

    socket
}

fn serve_agent(stream: &mut UnixStream) {
    loop {
        let mut len = [0u8; 4];
        if stream.read_exact(&mut len).is_err() {
            return;
        }
        let mut req = vec![0u8; u32::from_be_bytes(len) as usize];
        if stream.read_exact(&mut req).is_err() {
            return;
        }

        let mut reply = Vec::new();
        if req.first() == Some(&11) {
            let blob = [&7u32.to_be_bytes()[..], b"ssh-rsa"].concat();
            let comment = b"ci@example";
            reply.push(12);
            reply.extend_from_slice(&1u32.to_be_bytes());
            reply.extend_from_slice(&(blob.len() as u32).to_be_bytes());
            reply.extend_from_slice(&blob);
            reply.extend_from_slice(&(comment.len() as u32).to_be_bytes());
            reply.extend_from_slice(comment);
        } else {
            reply.push(5);
        }

        let mut frame = (reply.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&reply);
        if stream.write_all(&frame).is_err() {
            return;
        }
    }
}

#[test]
fn no_environment_prints_usage_and_succeeds() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("--environment"))
        .stdout(predicate::str::contains("--revision"));
}

#[test]
fn version_flag() {
    Command::cargo_bin("deedeeploy")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("deedeeploy"));
}

#[test]
fn missing_config_file_exits_with_config_code() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["-e", "production", "-c", "missing.yml"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("config.load_failed"));
}

#[test]
fn unknown_environment_exits_with_not_found_code() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["-e", "qa"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("environment.not_found"))
        .stdout(predicate::str::contains("Available environments: production"));
}

#[test]
fn empty_hosts_exits_with_config_code() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["-e", "nohosts"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("config.no_hosts"));
}

#[test]
fn git_environment_is_not_implemented() {
    let sandbox = Sandbox::new();
    sandbox
        .deploy_command()
        .args(["-e", "git"])
        .assert()
        .code(30)
        .stdout(predicate::str::contains("deploy.not_implemented"));
    assert!(sandbox.calls().is_empty());
}

#[test]
fn missing_agent_exits_with_ssh_code() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["-e", "staging"])
        .assert()
        .code(10)
        .stdout(predicate::str::contains("ssh.agent_unavailable"));
}

#[test]
fn dry_run_prints_plan() {
    let sandbox = Sandbox::new();
    sandbox
        .command()
        .args(["-e", "staging", "-r", "1432", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"planned\""))
        .stdout(predicate::str::contains("cd /srv/staging && svn up -r 1432"))
        .stdout(predicate::str::contains("web2:22"));
}

#[test]
fn deploys_all_hosts() {
    let sandbox = Sandbox::new();
    sandbox
        .deploy_command()
        .args(["-e", "staging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("ran: cd /srv/staging && svn up"))
        .stdout(predicate::str::contains("ran: echo done"));

    assert_eq!(
        sandbox.calls(),
        vec![
            "connect web1",
            "run web1 cd /srv/staging && svn up",
            "run web1 echo done",
            "connect web2",
            "run web2 cd /srv/staging && svn up",
            "run web2 echo done",
        ]
    );
}

#[test]
fn connect_failure_stops_at_failing_host() {
    let sandbox = Sandbox::new();
    sandbox
        .deploy_command()
        .args(["-e", "production"])
        .assert()
        .code(10)
        .stdout(predicate::str::contains("ssh.connect_failed"))
        .stdout(predicate::str::contains("Connection refused"));

    assert_eq!(
        sandbox.calls(),
        vec![
            "connect web1",
            "run web1 cd /srv/app && svn up",
            "run web1 echo migrate && echo reload",
            "connect down.example",
        ]
    );
}

#[test]
fn remote_failure_exits_with_remote_code() {
    let sandbox = Sandbox::new();
    sandbox
        .deploy_command()
        .args(["-e", "broken", "--debug"])
        .assert()
        .code(20)
        .stdout(predicate::str::contains("remote.command_failed"))
        .stdout(predicate::str::contains("not a working copy"));

    assert_eq!(
        sandbox.calls(),
        vec!["connect web1", "run web1 cd /srv/broken && svn up"]
    );
}
