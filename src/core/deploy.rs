use serde::Serialize;
use std::path::Path;

use crate::agent::{AgentAuthenticator, Authenticator};
use crate::config::{self, ConfigFile, EnvironmentConfig, TransferProtocol};
use crate::error::{Error, Result};
use crate::ssh::{Connection, Connector, SshConnector};
use crate::utils::shell;

/// Inputs for one deployment session.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub environment: String,
    /// Target revision. `None` or blank deploys the latest revision.
    pub revision: Option<String>,
    /// Resolve and plan only; no authentication, no connections.
    pub dry_run: bool,
}

/// Everything needed to deploy, computed before any host is touched.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub environment: EnvironmentConfig,
    pub revision: Option<String>,
    pub update_command: String,
    pub post_command: Option<String>,
}

/// Result for a single host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDeployResult {
    pub host: String,
    pub status: String,
    pub update_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_output: Option<String>,
}

impl HostDeployResult {
    fn planned(host: &str, plan: &DeployPlan) -> Self {
        Self {
            host: host.to_string(),
            status: "planned".to_string(),
            update_command: plan.update_command.clone(),
            update_output: None,
            post_command: plan.post_command.clone(),
            post_output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub environment: String,
    pub revision: Option<String>,
    pub dry_run: bool,
    pub transfer: String,
    pub vcs: String,
    pub user: String,
    pub remote_path: String,
    pub hosts: Vec<HostDeployResult>,
}

impl DeployReport {
    fn new(plan: &DeployPlan, dry_run: bool, hosts: Vec<HostDeployResult>) -> Self {
        Self {
            environment: plan.environment.name.clone(),
            revision: plan.revision.clone(),
            dry_run,
            transfer: plan.environment.transfer.as_str().to_string(),
            vcs: plan.environment.vcs.as_str().to_string(),
            user: plan.environment.user.clone(),
            remote_path: plan.environment.remote_path.clone(),
            hosts,
        }
    }
}

/// High-level entry point: loads the config file and deploys with the SSH
/// agent from the environment and the system ssh client.
pub fn run(config_path: &Path, request: &DeployRequest) -> Result<DeployReport> {
    let config = config::load(config_path)?;
    deploy(
        &config,
        request,
        &AgentAuthenticator::from_env(),
        &SshConnector::default(),
    )
}

/// Resolve, plan, then deploy every host in order.
pub fn deploy<A, C>(
    config: &ConfigFile,
    request: &DeployRequest,
    authenticator: &A,
    connector: &C,
) -> Result<DeployReport>
where
    A: Authenticator,
    C: Connector,
{
    let plan = plan(config, request)?;

    if request.dry_run {
        let hosts = plan
            .environment
            .hosts
            .iter()
            .map(|h| HostDeployResult::planned(&h.to_string(), &plan))
            .collect();
        return Ok(DeployReport::new(&plan, true, hosts));
    }

    execute(&plan, authenticator, connector)
}

/// Validate the environment and compute the remote commands.
///
/// Unsupported backends fail here, so nothing is deployed anywhere.
pub fn plan(config: &ConfigFile, request: &DeployRequest) -> Result<DeployPlan> {
    let environment = config.resolve(&request.environment)?;

    if environment.transfer == TransferProtocol::Ftp {
        return Err(Error::not_implemented("FTP transfer")
            .with_hint("Set 'protocol: ssh' for this environment"));
    }

    let revision = request
        .revision
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    if revision.is_none() {
        tracing::debug!("No revision specified, defaulting to HEAD");
    }

    let update_command = environment
        .vcs
        .update_command(&environment.remote_path, revision.as_deref())?;
    let post_command = shell::chain_commands(&environment.post_commands);

    Ok(DeployPlan {
        environment,
        revision,
        update_command,
        post_command,
    })
}

/// Authenticate once, then walk the hosts in order.
///
/// The first failure aborts the session. Hosts after it are not contacted
/// and hosts before it are left as deployed.
pub fn execute<A, C>(plan: &DeployPlan, authenticator: &A, connector: &C) -> Result<DeployReport>
where
    A: Authenticator,
    C: Connector,
{
    let credentials = authenticator.authenticate(&plan.environment.user)?;

    let mut results = Vec::with_capacity(plan.environment.hosts.len());
    for host in &plan.environment.hosts {
        log_status!("deploy", "Start deployment on host '{}'", host);
        let connection = connector.connect(host, &credentials)?;
        results.push(deploy_host(&connection, plan)?);
    }

    log_status!(
        "deploy",
        "Deployed '{}' to {} host(s)",
        plan.environment.name,
        results.len()
    );
    Ok(DeployReport::new(plan, false, results))
}

fn deploy_host<C: Connection>(connection: &C, plan: &DeployPlan) -> Result<HostDeployResult> {
    let host = connection.host().to_string();

    tracing::debug!(host = %host, command = %plan.update_command, "updating working copy");
    let update_output = connection.run(&plan.update_command)?;

    // An empty remote command would open a login shell, so skip it.
    let post_output = match &plan.post_command {
        Some(cmd) => {
            tracing::debug!(host = %host, command = %cmd, "running post-commands");
            Some(connection.run(cmd)?)
        }
        None => None,
    };

    Ok(HostDeployResult {
        host,
        status: "deployed".to_string(),
        update_command: plan.update_command.clone(),
        update_output: Some(update_output),
        post_command: plan.post_command.clone(),
        post_output,
    })
}
