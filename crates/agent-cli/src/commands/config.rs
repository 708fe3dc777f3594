use agent_core::AgentConfig;

const SAMPLE_CONFIG: &str = r#"# Job agent configuration

server:
  host: 0.0.0.0
  port: 8000

paths:
  # Pull-method job log, served on /job_logs
  job_log: /tmp/job_log.json
  # Agent process log, served on /agent_logs
  agent_log: /tmp/agent_log
  # Per-job working directories of the shell executor
  work_dir: /tmp/job-agent

teardown:
  archive_poll_interval_ms: 1000

callbacks:
  max_attempts: 100
  retry_delay_ms: 1000
"#;

pub fn run(path: bool, init: bool) -> anyhow::Result<()> {
    let config_path = AgentConfig::default_path();

    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    println!("Config path: {}", config_path.display());
    if config_path.exists() {
        let config = AgentConfig::load_from(&config_path)?;
        println!("Listen:      {}:{}", config.server.host, config.server.port);
        println!("Job log:     {}", config.paths.job_log.display());
        println!("Agent log:   {}", config.paths.agent_log.display());
        println!("Work dir:    {}", config.paths.work_dir.display());
    } else {
        println!("Status:      not found, using defaults");
        println!("Run `job-agent config --init` to create one.");
    }

    Ok(())
}
