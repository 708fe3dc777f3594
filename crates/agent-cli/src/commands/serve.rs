use agent_core::AgentConfig;
use agent_server::ControlServer;
use std::path::Path;
use tracing::info;

use crate::logging;

pub async fn run(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => AgentConfig::load_from(path)?,
        None => AgentConfig::load_default()?,
    };
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    logging::init(&config.paths.agent_log)?;
    info!(
        "Job log: {}, work dir: {}",
        config.paths.job_log.display(),
        config.paths.work_dir.display()
    );

    ControlServer::new(config).serve().await?;
    Ok(())
}
