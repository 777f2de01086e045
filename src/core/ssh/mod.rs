//! Remote command execution over SSH.
//!
//! A [`Connector`] opens one [`Connection`] per host. Every
//! [`Connection::run`] call uses its own channel, released when the command
//! ends whether it succeeded or not.

mod client;
mod relay;

pub use client::{SshConnection, SshConnector};
pub use relay::AgentRelay;

use crate::agent::Credentials;
use crate::config::HostAddr;
use crate::error::Result;

pub trait Connection {
    fn host(&self) -> &HostAddr;

    /// Run `command` as a single remote shell invocation and return its
    /// stdout. Transport failures and non-zero exits are both errors.
    fn run(&self, command: &str) -> Result<String>;
}

pub trait Connector {
    type Connection: Connection;

    fn connect(&self, host: &HostAddr, credentials: &Credentials) -> Result<Self::Connection>;
}
