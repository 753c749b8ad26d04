//! Desktop telemetry agent for Linux.

use anyhow::Result;
use hassagent_framework::{AgentArgs, AgentConfig, AgentRunner};

use hassagent_linux::config::LinuxAgentConfig;
use hassagent_linux::sensors;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = AgentArgs::parse_with_default("hassagent.json5");

    let config = LinuxAgentConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut runner = AgentRunner::new_with_args("hassagent", config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .with_status_publishing();

    let sensors_config = runner.config().sensors.clone();
    for producer in sensors::start(&sensors_config, runner.shutdown(), runner.buses()) {
        runner.add_producer(producer);
    }

    tracing::info!(
        device = %runner.device().name,
        device_id = %runner.device().id,
        prefix = %runner.config().agent().key_prefix,
        "hassagent running"
    );

    // Build status metadata
    let metadata = serde_json::json!({
        "sensors": {
            "disk": sensors_config.disk.poll.enabled,
            "network": sensors_config.network.poll.enabled,
            "memory": sensors_config.memory.enabled,
            "battery": sensors_config.battery.enabled,
            "session": sensors_config.session.enabled,
        },
        "poll_interval_secs": {
            "disk": sensors_config.disk.poll.interval_secs,
            "network": sensors_config.network.poll.interval_secs,
            "memory": sensors_config.memory.interval_secs,
        },
    });

    // Run until Ctrl+C or SIGTERM
    runner
        .run_with_metadata(Some(metadata))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
