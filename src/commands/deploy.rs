use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use deedeeploy::config::DEFAULT_CONFIG_FILE;
use deedeeploy::deploy::{self, DeployReport, DeployRequest};

use super::CmdResult;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Environment to deploy to (defined in config)
    #[arg(short, long, value_name = "NAME")]
    pub environment: Option<String>,

    /// Revision to update deploy target to (defaults to HEAD)
    #[arg(short, long, value_name = "REV")]
    pub revision: Option<String>,

    /// Path to the deployment config file
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Show what would be run on each host without connecting
    #[arg(long)]
    pub dry_run: bool,
}

impl DeployArgs {
    /// The requested environment, if one was given and is not blank.
    pub fn environment(&self) -> Option<&str> {
        self.environment
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub command: String,
    pub config_path: String,
    #[serde(flatten)]
    pub report: DeployReport,
}

pub fn run(environment: &str, args: &DeployArgs) -> CmdResult<DeployOutput> {
    let config_path = PathBuf::from(shellexpand::tilde(&args.config).to_string());

    let request = DeployRequest {
        environment: environment.to_string(),
        revision: args.revision.clone(),
        dry_run: args.dry_run,
    };

    let report = deploy::run(&config_path, &request)?;

    Ok((
        DeployOutput {
            command: "deploy".to_string(),
            config_path: config_path.display().to_string(),
            report,
        },
        0,
    ))
}
