//! Replay backend command: `agentmd-progress mock-server`.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use agentmd_progress::mock::{Fixture, MockConfig, serve};

pub async fn cmd_mock_server(
    fixture: &Path,
    port: u16,
    delay_ms: u64,
    snapshots: bool,
    dev: bool,
) -> Result<()> {
    let fixture = Fixture::load(fixture)?;
    let config = MockConfig {
        port,
        delay: Duration::from_millis(delay_ms),
        snapshots,
        dev_mode: dev,
        ..MockConfig::new(fixture)
    };
    serve(config).await
}
