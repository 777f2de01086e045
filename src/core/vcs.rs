//! Version-control backends and the remote update command for each.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vcs {
    /// Subversion: centralized, updated in place with `svn up`.
    Svn,
    /// Git: distributed. No update path yet.
    Git,
}

impl Vcs {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vcs::Svn => "svn",
            Vcs::Git => "git",
        }
    }

    /// Remote command that brings the working copy at `remote_path` to
    /// `revision`, or to the latest revision when none is given.
    pub fn update_command(&self, remote_path: &str, revision: Option<&str>) -> Result<String> {
        match self {
            Vcs::Svn => Ok(svn_update(remote_path, revision)),
            Vcs::Git => Err(Error::not_implemented("Git deployment")
                .with_hint("Only 'svn' environments can be deployed for now")),
        }
    }
}

impl FromStr for Vcs {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "svn" => Ok(Vcs::Svn),
            "git" => Ok(Vcs::Git),
            _ => Err(()),
        }
    }
}

fn svn_update(remote_path: &str, revision: Option<&str>) -> String {
    let cd = format!("cd {}", shell::quote_arg(remote_path));
    match revision.map(str::trim).filter(|r| !r.is_empty()) {
        Some(rev) => format!("{} && svn up -r {}", cd, shell::quote_arg(rev)),
        None => format!("{} && svn up", cd),
    }
}
